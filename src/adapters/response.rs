//! Caller-facing response envelope.

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::error::{ErrorKind, StackError};
use crate::orchestrator::RunReport;

/// Response returned by every entry point.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// HTTP-style status code.
    pub status_code: u16,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// JSON body.
    pub body: Value,
}

impl Response {
    /// A JSON response with the given status.
    #[must_use]
    pub fn json(status_code: u16, body: Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            status_code,
            headers,
            body,
        }
    }

    /// Maps a failure onto its status and error body.
    #[must_use]
    pub fn from_error(err: &StackError) -> Self {
        Self::json(
            status_for(err),
            json!({
                "error": {
                    "kind": err.kind(),
                    "message": err.to_string(),
                }
            }),
        )
    }

    /// Builds the response for a finished run.
    #[must_use]
    pub fn from_report(report: &RunReport) -> Self {
        let summary = match &report.outcome {
            Ok(summary) => summary,
            Err(err) => return Self::from_error(err),
        };
        Self::json(
            200,
            json!({
                "stack": report.stack.as_ref().map(|k| &k.stack),
                "project": report.stack.as_ref().map(|k| &k.project),
                "intent": report.intent,
                "phases": report.phases,
                "summary": summary,
                "spec": report.echo,
            }),
        )
    }

    /// Returns true for a 2xx status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status_code >= 200 && self.status_code < 300
    }
}

impl From<&RunReport> for Response {
    fn from(report: &RunReport) -> Self {
        Self::from_report(report)
    }
}

/// Status code for a failure.
#[must_use]
pub fn status_for(err: &StackError) -> u16 {
    match err.kind() {
        ErrorKind::InvalidSpecification => 400,
        ErrorKind::DestroyError if err.engine_cause().is_some_and(|e| e.is_not_found()) => 404,
        ErrorKind::ResourceDeclarationError => 422,
        ErrorKind::PluginInstallError
        | ErrorKind::RefreshError
        | ErrorKind::ApplyError
        | ErrorKind::DestroyError => 502,
        ErrorKind::Cancelled => 504,
        ErrorKind::ConfigurationError | ErrorKind::InternalError => 500,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, EngineError, ProviderError};
    use crate::orchestrator::LifecyclePhase;

    fn destroy_error(source: EngineError) -> StackError {
        StackError::Destroy {
            stack: "carlos-ubuntu18.04-01-02-2024".into(),
            source,
        }
    }

    #[test]
    fn test_status_mapping() {
        let not_found = destroy_error(EngineError::StackNotFound {
            stack: "carlos-ubuntu18.04-01-02-2024".into(),
            project: "slack-vms".into(),
        });
        let provider = destroy_error(ProviderError::api_error(500, "boom").into());
        let declaration = StackError::Apply {
            stack: "s".into(),
            source: EngineError::declaration("carlos-vm", "duplicate resource name"),
        };
        let missing = StackError::Configuration(ConfigError::MissingSecret {
            key: "linode:token".into(),
            env_var: "LINODE_TOKEN".into(),
        });

        assert_eq!(status_for(&StackError::invalid("swap", "vm_options.swap_size")), 400);
        assert_eq!(status_for(&not_found), 404);
        assert_eq!(status_for(&provider), 502);
        assert_eq!(status_for(&declaration), 422);
        assert_eq!(status_for(&missing), 500);
        assert_eq!(
            status_for(&StackError::Cancelled {
                phase: LifecyclePhase::Refreshed
            }),
            504
        );
        assert_eq!(status_for(&StackError::internal("x")), 500);
    }

    #[test]
    fn test_error_body_shape() {
        let response = Response::from_error(&StackError::invalid(
            "swap size must be between 0 and 32767",
            "vm_options.swap_size",
        ));

        assert_eq!(response.body["error"]["kind"], "InvalidSpecification");
        assert!(response.body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("swap size"));
        assert!(!response.is_success());

        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["statusCode"], 400);
        assert_eq!(wire["headers"]["Content-Type"], "application/json");
    }
}
