//! Stack identity resolution.
//!
//! A stack is named `{identity}-{os}-{MM-DD-YYYY}`, so a user gets one stack
//! per operating system per day. Creating twice on the same day updates the
//! same stack.

use chrono::{NaiveDate, Utc};
use serde::Serialize;

/// Date format used in stack names.
const DATE_FORMAT: &str = "%m-%d-%Y";

/// Source of the current date.
pub trait Clock: Send + Sync {
    /// Returns today's date.
    fn today(&self) -> NaiveDate;
}

/// Wall clock, in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// A clock stuck on one date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// A resolved stack name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StackName(String);

impl StackName {
    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StackName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StackName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds the stack name for an identity and OS tag on a given date.
#[must_use]
pub fn stack_name_on(identity: &str, os_tag: &str, date: NaiveDate) -> StackName {
    StackName(format!("{identity}-{os_tag}-{}", date.format(DATE_FORMAT)))
}

/// Resolves the stack name for today.
#[must_use]
pub fn resolve(identity: &str, os_tag: &str, clock: &dyn Clock) -> StackName {
    stack_name_on(identity, os_tag, clock.today())
}
