//! The stack lifecycle state machine.
//!
//! Every run walks the same states:
//!
//! ```text
//! Resolving -> PluginReady -> Configured -> Refreshed -> Applying   -> Succeeded
//!                                                      \ Destroying /   or Failed
//! ```
//!
//! A failure at any step ends the run in `Failed` without attempting the
//! remaining steps. Nothing is retried here.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{Intent, RequestInput, Settings, SpecEcho, SpecValidator, VmRequest};
use crate::engine::{Engine, StackKey, UpdateSummary};
use crate::error::{Result, StackError};
use crate::identity::{self, Clock, StackName, SystemClock};
use crate::program::DeploymentProgram;

use super::cancel::CancelSignal;
use super::locks::StackLocks;
use super::plugins::{PluginPin, ensure_plugin, ensure_plugin_if_missing};
use super::secrets::SecretInjector;

/// States of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LifecyclePhase {
    /// Validating the request and selecting the stack.
    Resolving,
    /// The provider plugin is installed.
    PluginReady,
    /// The provider credential is set.
    Configured,
    /// Recorded state matches the provider.
    Refreshed,
    /// Running the deployment program.
    Applying,
    /// Deleting the stack's resources.
    Destroying,
    /// The run completed.
    Succeeded,
    /// The run stopped on an error.
    Failed,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            Self::Resolving => "resolving",
            Self::PluginReady => "plugin_ready",
            Self::Configured => "configured",
            Self::Refreshed => "refreshed",
            Self::Applying => "applying",
            Self::Destroying => "destroying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{phase}")
    }
}

/// Everything a run produced.
#[derive(Debug)]
pub struct RunReport {
    /// Stack the run targeted; `None` if the request never validated.
    pub stack: Option<StackKey>,
    /// Intent of the run, if known.
    pub intent: Option<Intent>,
    /// States visited, in order.
    pub phases: Vec<LifecyclePhase>,
    /// Summary of the final engine operation, or the error that stopped the run.
    pub outcome: Result<UpdateSummary>,
    /// Response-safe echo of the request.
    pub echo: Option<SpecEcho>,
}

impl RunReport {
    fn rejected(intent: Option<Intent>, err: StackError) -> Self {
        Self {
            stack: None,
            intent,
            phases: vec![LifecyclePhase::Resolving, LifecyclePhase::Failed],
            outcome: Err(err),
            echo: None,
        }
    }

    /// Returns the last state the run reached.
    #[must_use]
    pub fn final_phase(&self) -> LifecyclePhase {
        self.phases.last().copied().unwrap_or(LifecyclePhase::Resolving)
    }

    /// Returns true if the run succeeded.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Drives engine calls for one request at a time per stack.
pub struct Orchestrator {
    engine: Arc<dyn Engine>,
    settings: Arc<Settings>,
    clock: Arc<dyn Clock>,
    validator: SpecValidator,
    locks: StackLocks,
    secrets: SecretInjector,
    pin: PluginPin,
}

impl Orchestrator {
    /// Creates an orchestrator using the wall clock.
    #[must_use]
    pub fn new(engine: Arc<dyn Engine>, settings: Arc<Settings>) -> Self {
        Self {
            engine,
            secrets: SecretInjector::new(Arc::clone(&settings)),
            settings,
            clock: Arc::new(SystemClock),
            validator: SpecValidator::new(),
            locks: StackLocks::new(),
            pin: PluginPin::LINODE,
        }
    }

    /// Replaces the clock used for stack names.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the process settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns the engine runs are driven against.
    #[must_use]
    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    /// Resolves the stack name a request from `identity` for `os_tag` gets today.
    #[must_use]
    pub fn stack_name(&self, identity: &str, os_tag: &str) -> StackName {
        identity::resolve(identity, os_tag, self.clock.as_ref())
    }

    /// Validates raw input and runs it.
    ///
    /// `intent` overrides the intent carried by the input; one of the two
    /// must be present.
    pub async fn execute(
        &self,
        input: &RequestInput,
        intent: Option<Intent>,
        cancel: &CancelSignal,
    ) -> RunReport {
        let validated = match intent {
            Some(intent) => self.validator.validate_with_intent(input, intent),
            None => self.validator.validate(input),
        };
        match validated {
            Ok(request) => self.run(&request, cancel).await,
            Err(err) => {
                warn!("Rejected request from {}: {}", input.requester_username, err);
                RunReport::rejected(intent.or(input.intent), err)
            }
        }
    }

    /// Runs a validated request to completion or first failure.
    pub async fn run(&self, request: &VmRequest, cancel: &CancelSignal) -> RunReport {
        let spec = &request.spec;
        let name = self.stack_name(&spec.identity, &spec.os_tag);
        let key = StackKey::new(name.as_str(), &spec.project);
        let mut phases = vec![LifecyclePhase::Resolving];

        info!(
            "{} requested {} of stack {}",
            spec.requester, request.intent, key
        );

        let outcome = match guarded(cancel, LifecyclePhase::Resolving, async {
            Ok(self.locks.acquire(&name).await)
        })
        .await
        {
            Ok(_guard) => self.drive(request, &key, cancel, &mut phases).await,
            Err(err) => Err(err),
        };

        match &outcome {
            Ok(summary) => {
                info!(
                    "{} of {} succeeded with {} change(s)",
                    request.intent,
                    key,
                    summary.changes()
                );
                phases.push(LifecyclePhase::Succeeded);
            }
            Err(err) => {
                error!(
                    "{} of {} failed during {}: {}",
                    request.intent,
                    key,
                    phases.last().copied().unwrap_or(LifecyclePhase::Resolving),
                    err
                );
                phases.push(LifecyclePhase::Failed);
            }
        }

        RunReport {
            stack: Some(key),
            intent: Some(request.intent),
            phases,
            outcome,
            echo: Some(spec.echo()),
        }
    }

    async fn drive(
        &self,
        request: &VmRequest,
        key: &StackKey,
        cancel: &CancelSignal,
        phases: &mut Vec<LifecyclePhase>,
    ) -> Result<UpdateSummary> {
        let engine = self.engine.as_ref();
        let stack = || key.stack.clone();

        match request.intent {
            Intent::Create => {
                guarded(cancel, LifecyclePhase::Resolving, async {
                    engine
                        .upsert_stack(key)
                        .await
                        .map_err(|source| StackError::Apply { stack: stack(), source })
                })
                .await?;
                guarded(cancel, LifecyclePhase::Resolving, ensure_plugin(engine, self.pin))
                    .await?;
            }
            Intent::Destroy => {
                guarded(cancel, LifecyclePhase::Resolving, async {
                    engine
                        .select_stack(key)
                        .await
                        .map_err(|source| StackError::Destroy { stack: stack(), source })
                })
                .await?;
                guarded(
                    cancel,
                    LifecyclePhase::Resolving,
                    ensure_plugin_if_missing(engine, self.pin),
                )
                .await?;
            }
        }
        phases.push(LifecyclePhase::PluginReady);

        guarded(cancel, LifecyclePhase::PluginReady, self.secrets.inject(engine, key)).await?;
        phases.push(LifecyclePhase::Configured);

        guarded(cancel, LifecyclePhase::Configured, async {
            engine
                .refresh(key)
                .await
                .map_err(|source| StackError::Refresh { stack: stack(), source })
        })
        .await?;
        phases.push(LifecyclePhase::Refreshed);

        match request.intent {
            Intent::Create => {
                phases.push(LifecyclePhase::Applying);
                let program = DeploymentProgram::for_spec(Arc::clone(&request.spec));
                guarded(cancel, LifecyclePhase::Applying, async {
                    engine
                        .up(key, &program)
                        .await
                        .map_err(|source| StackError::Apply { stack: stack(), source })
                })
                .await
            }
            Intent::Destroy => {
                phases.push(LifecyclePhase::Destroying);
                guarded(cancel, LifecyclePhase::Destroying, async {
                    engine
                        .destroy(key)
                        .await
                        .map_err(|source| StackError::Destroy { stack: stack(), source })
                })
                .await
            }
        }
    }
}

/// Runs `step` unless `cancel` fires first.
async fn guarded<T>(
    cancel: &CancelSignal,
    phase: LifecyclePhase,
    step: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(StackError::Cancelled { phase }),
        out = step => out,
    }
}
