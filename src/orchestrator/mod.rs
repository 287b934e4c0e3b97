//! Stack lifecycle orchestration.
//!
//! The orchestrator turns a validated request into the ordered engine calls
//! that create or destroy one stack, serializing runs per stack name and
//! stopping at the first failure or cancellation.

mod cancel;
mod lifecycle;
mod locks;
mod plugins;
mod secrets;

pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use lifecycle::{LifecyclePhase, Orchestrator, RunReport};
pub use locks::StackLocks;
pub use plugins::{PluginPin, ensure_plugin, ensure_plugin_if_missing};
pub use secrets::SecretInjector;
