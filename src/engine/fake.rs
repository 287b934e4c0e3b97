//! Recording engine double for orchestrator tests.
//!
//! It remembers every call, refuses `up`/`destroy` on a stack that has not
//! been refreshed since its last mutation, and notices when two mutations on
//! one stack overlap.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{EngineError, EngineResult, ProviderError, StateError};
use crate::program::DeploymentProgram;

use super::state::Operation;
use super::workspace::{ConfigValue, Engine, StackKey, UpdateSummary};

/// A recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    InstallPlugin { name: String, version: String },
    HasPlugin { name: String, version: String },
    SelectStack(String),
    UpsertStack(String),
    SetConfig { stack: String, key: String, secret: bool, value: String },
    Refresh(String),
    Up(String),
    Destroy(String),
}

/// Where the double fails or hangs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Point {
    Install,
    SetConfig,
    Refresh,
    Up,
    Destroy,
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<Call>,
    stacks: HashSet<StackKey>,
    plugins: HashSet<(String, String)>,
    refreshed: HashSet<StackKey>,
    in_flight: HashMap<StackKey, usize>,
    overlapped: bool,
    violations: Vec<String>,
}

/// The engine double.
#[derive(Debug, Default)]
pub struct FakeEngine {
    inner: Mutex<Inner>,
    fail_at: Option<Point>,
    hang_at: Option<Point>,
    mutation_delay: Duration,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stack(self, key: &StackKey) -> Self {
        self.lock().stacks.insert(key.clone());
        self
    }

    pub fn with_plugin(self, name: &str, version: &str) -> Self {
        self.lock()
            .plugins
            .insert((name.to_string(), version.to_string()));
        self
    }

    pub fn failing_at(mut self, point: Point) -> Self {
        self.fail_at = Some(point);
        self
    }

    pub fn hanging_at(mut self, point: Point) -> Self {
        self.hang_at = Some(point);
        self
    }

    pub fn with_mutation_delay(mut self, delay: Duration) -> Self {
        self.mutation_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn overlapped(&self) -> bool {
        self.lock().overlapped
    }

    pub fn violations(&self) -> Vec<String> {
        self.lock().violations.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, call: Call) {
        self.lock().calls.push(call);
    }

    async fn checkpoint(&self, point: Point) -> EngineResult<()> {
        if self.hang_at == Some(point) {
            std::future::pending::<()>().await;
        }
        if self.fail_at == Some(point) {
            return Err(ProviderError::api_error(500, format!("injected {point:?} failure")).into());
        }
        Ok(())
    }

    fn require_stack(&self, key: &StackKey) -> EngineResult<()> {
        if self.lock().stacks.contains(key) {
            Ok(())
        } else {
            Err(EngineError::StackNotFound {
                stack: key.stack.clone(),
                project: key.project.clone(),
            })
        }
    }

    /// Runs a mutation, enforcing refresh-first and detecting overlap.
    async fn mutate(&self, key: &StackKey, what: &str, point: Point) -> EngineResult<()> {
        self.require_stack(key)?;
        {
            let mut inner = self.lock();
            if !inner.refreshed.remove(key) {
                let violation = format!("{what} on {key} before refresh");
                inner.violations.push(violation.clone());
                return Err(StateError::storage(violation).into());
            }
            let count = inner.in_flight.entry(key.clone()).or_default();
            *count += 1;
            if *count > 1 {
                inner.overlapped = true;
            }
        }

        if !self.mutation_delay.is_zero() {
            tokio::time::sleep(self.mutation_delay).await;
        }
        let outcome = self.checkpoint(point).await;

        if let Some(count) = self.lock().in_flight.get_mut(key) {
            *count -= 1;
        }
        outcome
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn install_plugin(&self, name: &str, version: &str) -> EngineResult<()> {
        self.record(Call::InstallPlugin {
            name: name.to_string(),
            version: version.to_string(),
        });
        self.checkpoint(Point::Install).await?;
        self.lock()
            .plugins
            .insert((name.to_string(), version.to_string()));
        Ok(())
    }

    async fn has_plugin(&self, name: &str, version: &str) -> EngineResult<bool> {
        self.record(Call::HasPlugin {
            name: name.to_string(),
            version: version.to_string(),
        });
        Ok(self
            .lock()
            .plugins
            .contains(&(name.to_string(), version.to_string())))
    }

    async fn select_stack(&self, key: &StackKey) -> EngineResult<()> {
        self.record(Call::SelectStack(key.stack.clone()));
        self.require_stack(key)
    }

    async fn upsert_stack(&self, key: &StackKey) -> EngineResult<()> {
        self.record(Call::UpsertStack(key.stack.clone()));
        self.lock().stacks.insert(key.clone());
        Ok(())
    }

    async fn set_config(
        &self,
        key: &StackKey,
        config_key: &str,
        value: ConfigValue,
    ) -> EngineResult<()> {
        self.record(Call::SetConfig {
            stack: key.stack.clone(),
            key: config_key.to_string(),
            secret: value.is_secret(),
            value: value.expose().to_string(),
        });
        self.require_stack(key)?;
        self.checkpoint(Point::SetConfig).await
    }

    async fn refresh(&self, key: &StackKey) -> EngineResult<UpdateSummary> {
        self.record(Call::Refresh(key.stack.clone()));
        self.require_stack(key)?;
        self.checkpoint(Point::Refresh).await?;
        self.lock().refreshed.insert(key.clone());
        Ok(UpdateSummary::new(Operation::Refresh))
    }

    async fn up(&self, key: &StackKey, program: &DeploymentProgram) -> EngineResult<UpdateSummary> {
        self.record(Call::Up(key.stack.clone()));
        let declared = program.declare()?;
        self.mutate(key, "up", Point::Up).await?;

        let mut summary = UpdateSummary::new(Operation::Update);
        summary.created = declared.len();
        Ok(summary)
    }

    async fn destroy(&self, key: &StackKey) -> EngineResult<UpdateSummary> {
        self.record(Call::Destroy(key.stack.clone()));
        self.mutate(key, "destroy", Point::Destroy).await?;
        Ok(UpdateSummary::new(Operation::Destroy))
    }
}
