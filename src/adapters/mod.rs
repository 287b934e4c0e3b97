//! Entry points around the orchestrator.
//!
//! Each adapter decodes a request, runs it, and encodes a [`Response`].

pub mod http;
pub mod queue;
mod response;

pub use response::{Response, status_for};

use serde_json::error::Category;

use crate::config::RequestInput;
use crate::error::{Result, StackError};

/// Decodes a caller-supplied JSON request.
///
/// Shape errors report only their position, since serde may quote the
/// offending value and that value can be the credential.
///
/// # Errors
///
/// Returns `InvalidSpecification` if the body is not a request.
pub fn parse_request(body: &str) -> Result<RequestInput> {
    serde_json::from_str(body).map_err(|e| {
        let message = match e.classify() {
            Category::Data => format!(
                "request does not match the expected shape at line {} column {}",
                e.line(),
                e.column()
            ),
            Category::Syntax | Category::Eof | Category::Io => format!("malformed JSON: {e}"),
        };
        StackError::invalid(message, "body")
    })
}
