//! File-backed engine.
//!
//! Layout under the workspace directory:
//!
//! ```text
//! <workspace>/
//!   plugins/manifest.json
//!   stacks/<project>/<stack>.json
//!   stacks/<project>/<stack>.lock
//! ```
//!
//! Secret configuration is kept in memory for the lifetime of the engine and
//! never reaches disk; the state file only records that the key is set.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::DeclarationHasher;
use crate::error::{EngineError, EngineResult};
use crate::program::{DeploymentProgram, ResourceDeclaration};

use super::diff::{DiffAction, compute_diff};
use super::lock::generate_holder_id;
use super::plugin::{PluginManifest, PluginRegistry, ProviderConfig, ProviderPlugin};
use super::state::{
    ConfigEntry, HistoryEntry, Operation, PendingCreate, ResourceState, StackState,
};
use super::store::{LocalStackStore, StackStore};
use super::workspace::{
    ConfigValue, Engine, EngineEvent, ProgressSink, ResourceSummary, StackKey, TracingProgress,
    UpdateSummary,
};

const PLUGINS_DIR: &str = "plugins";
const MANIFEST_FILE: &str = "manifest.json";
const STACKS_DIR: &str = "stacks";

/// Engine keeping stack state in a local workspace directory.
pub struct LocalEngine {
    workspace: PathBuf,
    store: Arc<dyn StackStore>,
    registry: PluginRegistry,
    progress: Arc<dyn ProgressSink>,
    /// Config values set in this process, including secrets.
    config: RwLock<HashMap<StackKey, BTreeMap<String, ConfigValue>>>,
    /// Serializes manifest read-modify-write.
    manifest_lock: Mutex<()>,
    holder: String,
}

/// Stack lock that is released when dropped, even if the operation holding
/// it is cancelled. The release in `Drop` is synchronous, so the lock is gone
/// before the cancelled call returns to its caller.
struct HeldLock {
    store: Arc<dyn StackStore>,
    key: StackKey,
    lock_id: Option<String>,
}

impl LocalEngine {
    /// Creates an engine over `workspace` with the given plugins.
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>, registry: PluginRegistry) -> Self {
        let workspace = workspace.into();
        let store = Arc::new(LocalStackStore::new(workspace.join(STACKS_DIR)));
        Self::with_store(workspace, store, registry)
    }

    /// Creates an engine with a custom state store.
    #[must_use]
    pub fn with_store(
        workspace: impl Into<PathBuf>,
        store: Arc<dyn StackStore>,
        registry: PluginRegistry,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            store,
            registry,
            progress: Arc::new(TracingProgress),
            config: RwLock::new(HashMap::new()),
            manifest_lock: Mutex::new(()),
            holder: generate_holder_id(),
        }
    }

    /// Replaces the progress sink.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Workspace directory.
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn manifest_path(&self) -> PathBuf {
        self.workspace.join(PLUGINS_DIR).join(MANIFEST_FILE)
    }

    /// Plugins installed in the workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be read.
    pub async fn installed_plugins(&self) -> EngineResult<PluginManifest> {
        PluginManifest::load(&self.manifest_path()).await
    }

    /// Recorded state of a stack, if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read.
    pub async fn stack_state(&self, key: &StackKey) -> EngineResult<Option<StackState>> {
        self.store.load(key).await
    }

    async fn load_existing(&self, key: &StackKey) -> EngineResult<StackState> {
        self.store
            .load(key)
            .await?
            .ok_or_else(|| EngineError::StackNotFound {
                stack: key.stack.clone(),
                project: key.project.clone(),
            })
    }

    async fn lock(&self, key: &StackKey) -> EngineResult<HeldLock> {
        let info = self.store.acquire_lock(key, &self.holder).await?;
        Ok(HeldLock {
            store: Arc::clone(&self.store),
            key: key.clone(),
            lock_id: Some(info.lock_id),
        })
    }

    /// Finds the plugin for a provider, which must be installed.
    fn installed_plugin(
        &self,
        manifest: &PluginManifest,
        provider: &str,
    ) -> EngineResult<Arc<dyn ProviderPlugin>> {
        let plugin = self
            .registry
            .get(provider)
            .ok_or_else(|| EngineError::PluginNotAvailable {
                name: provider.to_string(),
            })?;

        if manifest.contains(provider, plugin.version()) {
            Ok(plugin)
        } else {
            Err(EngineError::PluginNotInstalled {
                name: provider.to_string(),
            })
        }
    }

    /// Builds the configuration a plugin sees for a stack.
    async fn provider_config(
        &self,
        key: &StackKey,
        state: &StackState,
        plugin: &dyn ProviderPlugin,
    ) -> EngineResult<ProviderConfig> {
        let prefix = format!("{}:", plugin.name());
        let mut config = ProviderConfig::new(plugin.name());

        for (name, entry) in &state.config {
            if let (Some(short), Some(value)) = (name.strip_prefix(&prefix), &entry.value) {
                config.insert(short, ConfigValue::Plain(value.clone()));
            }
        }

        if let Some(values) = self.config.read().await.get(key) {
            for (name, value) in values {
                if let Some(short) = name.strip_prefix(&prefix) {
                    config.insert(short, value.clone());
                }
            }
        }

        for required in plugin.required_config() {
            config.require(required)?;
        }

        Ok(config)
    }

    /// Resolves plugin and config for a provider, caching per operation.
    async fn session(
        &self,
        cache: &mut HashMap<String, (Arc<dyn ProviderPlugin>, ProviderConfig)>,
        manifest: &PluginManifest,
        key: &StackKey,
        state: &StackState,
        provider: &str,
    ) -> EngineResult<(Arc<dyn ProviderPlugin>, ProviderConfig)> {
        if let Some(found) = cache.get(provider) {
            return Ok(found.clone());
        }
        let plugin = self.installed_plugin(manifest, provider)?;
        let config = self.provider_config(key, state, plugin.as_ref()).await?;
        cache.insert(provider.to_string(), (Arc::clone(&plugin), config.clone()));
        Ok((plugin, config))
    }

    async fn save_failure(
        &self,
        state: &mut StackState,
        operation: Operation,
        err: &EngineError,
    ) {
        state.add_history(HistoryEntry::failed(
            operation,
            state.resource_names(),
            &err.to_string(),
        ));
        if let Err(save_err) = self.store.save(state).await {
            warn!("Failed to record {operation} failure for {}: {save_err}", state.stack);
        }
    }

    fn finish(&self, key: &StackKey, state: &StackState, mut summary: UpdateSummary) -> UpdateSummary {
        summary.resources = state
            .resources
            .values()
            .map(|r| {
                (
                    r.name.clone(),
                    ResourceSummary {
                        id: r.id.clone(),
                        outputs: r.outputs.clone(),
                    },
                )
            })
            .collect();

        self.progress.emit(&EngineEvent::OperationCompleted {
            stack: key.clone(),
            summary: summary.clone(),
        });
        summary
    }

    /// Settles creates an earlier operation abandoned before recording
    /// their result: the resource is adopted if the provider has it, and the
    /// pending entry is dropped either way.
    async fn settle_pending(
        &self,
        sessions: &mut HashMap<String, (Arc<dyn ProviderPlugin>, ProviderConfig)>,
        manifest: &PluginManifest,
        key: &StackKey,
        state: &mut StackState,
    ) -> EngineResult<()> {
        let pending: Vec<PendingCreate> = state.pending.values().cloned().collect();
        for entry in pending {
            let (plugin, config) = self
                .session(sessions, manifest, key, state, &entry.provider)
                .await?;

            let found = plugin.find(&config, &entry.inputs).await?;
            match found {
                Some(found) => {
                    info!("Adopting {} ({}) from an interrupted create", entry.name, found.id);
                    state.set_resource(ResourceState {
                        input_hash: DeclarationHasher::new().hash_inputs(&entry.inputs),
                        name: entry.name.clone(),
                        provider: entry.provider,
                        kind: entry.kind,
                        id: found.id,
                        inputs: entry.inputs,
                        credential: entry.credential,
                        outputs: found.outputs,
                        created_at: entry.started_at,
                        updated_at: Utc::now(),
                    });
                }
                None => debug!("Interrupted create of {} left nothing behind", entry.name),
            }

            state.clear_pending(&entry.name);
            self.store.save(state).await?;
        }
        Ok(())
    }

    async fn refresh_locked(&self, key: &StackKey) -> EngineResult<UpdateSummary> {
        let mut state = self.load_existing(key).await?;
        let manifest = self.installed_plugins().await?;
        let mut summary = UpdateSummary::new(Operation::Refresh);
        let mut sessions = HashMap::new();

        self.progress.emit(&EngineEvent::OperationStarted {
            stack: key.clone(),
            operation: Operation::Refresh,
        });

        if let Err(e) = self.settle_pending(&mut sessions, &manifest, key, &mut state).await {
            self.save_failure(&mut state, Operation::Refresh, &e).await;
            return Err(e);
        }

        let recorded: Vec<ResourceState> = state.resources.values().cloned().collect();
        for resource in recorded {
            let read = async {
                let (plugin, config) = self
                    .session(&mut sessions, &manifest, key, &state, &resource.provider)
                    .await?;
                plugin.read(&config, &resource.id).await
            }
            .await;

            match read {
                Ok(Some(outputs)) => {
                    let mut updated = resource;
                    updated.outputs = outputs;
                    updated.updated_at = Utc::now();
                    state.set_resource(updated);
                    summary.record(DiffAction::Same);
                }
                Ok(None) => {
                    info!("{} ({}) no longer exists, dropping it", resource.name, resource.id);
                    state.remove_resource(&resource.name);
                    summary.record(DiffAction::Delete);
                }
                Err(e) => {
                    self.save_failure(&mut state, Operation::Refresh, &e).await;
                    return Err(e);
                }
            }
        }

        state.add_history(HistoryEntry::new(Operation::Refresh, state.resource_names()));
        self.store.save(&state).await?;
        Ok(self.finish(key, &state, summary))
    }

    async fn up_locked(
        &self,
        key: &StackKey,
        program: &DeploymentProgram,
    ) -> EngineResult<UpdateSummary> {
        let mut state = self.load_existing(key).await?;
        let manifest = self.installed_plugins().await?;
        let declared = program.declare()?;

        for decl in &declared {
            if let Err(e) = self.installed_plugin(&manifest, &decl.provider) {
                return Err(EngineError::declaration(&decl.name, e.to_string()));
            }
        }

        let mut sessions = HashMap::new();
        if let Err(e) = self.settle_pending(&mut sessions, &manifest, key, &mut state).await {
            self.save_failure(&mut state, Operation::Update, &e).await;
            return Err(e);
        }

        let diff = compute_diff(&declared, &state);
        debug!("Planned {} steps for {key}", diff.steps.len());

        self.progress.emit(&EngineEvent::OperationStarted {
            stack: key.clone(),
            operation: Operation::Update,
        });

        let by_name: HashMap<&str, &ResourceDeclaration> =
            declared.iter().map(|d| (d.name.as_str(), d)).collect();
        let mut summary = UpdateSummary::new(Operation::Update);

        for step in &diff.steps {
            if step.action == DiffAction::Same {
                summary.record(DiffAction::Same);
                continue;
            }

            self.progress.emit(&EngineEvent::StepStarted {
                resource: step.name.clone(),
                action: step.action,
            });

            let outcome = self
                .apply_step(
                    &mut sessions,
                    &manifest,
                    key,
                    &mut state,
                    step.action,
                    &step.name,
                    by_name.get(step.name.as_str()).copied(),
                )
                .await;

            if let Err(e) = outcome {
                self.progress.emit(&EngineEvent::StepFailed {
                    resource: step.name.clone(),
                    action: step.action,
                    message: e.to_string(),
                });
                self.save_failure(&mut state, Operation::Update, &e).await;
                return Err(e);
            }

            self.progress.emit(&EngineEvent::StepCompleted {
                resource: step.name.clone(),
                action: step.action,
            });
            summary.record(step.action);
        }

        state.program_hash = DeclarationHasher::new().hash_program(&declared);
        state.add_history(HistoryEntry::new(Operation::Update, state.resource_names()));
        self.store.save(&state).await?;
        Ok(self.finish(key, &state, summary))
    }

    /// Executes one planned step, saving state after every provider call.
    #[allow(clippy::too_many_arguments)]
    async fn apply_step(
        &self,
        sessions: &mut HashMap<String, (Arc<dyn ProviderPlugin>, ProviderConfig)>,
        manifest: &PluginManifest,
        key: &StackKey,
        state: &mut StackState,
        action: DiffAction,
        name: &str,
        decl: Option<&ResourceDeclaration>,
    ) -> EngineResult<()> {
        let missing = || EngineError::declaration(name, "planned step has no declaration");

        if matches!(action, DiffAction::Delete | DiffAction::Replace) {
            if let Some(recorded) = state.resources.get(name).cloned() {
                let (plugin, config) = self
                    .session(sessions, manifest, key, state, &recorded.provider)
                    .await?;
                plugin.delete(&config, &recorded.id).await?;
                state.remove_resource(name);
                self.store.save(state).await?;
            }
        }

        match action {
            DiffAction::Create | DiffAction::Replace => {
                let decl = decl.ok_or_else(missing)?;
                let (plugin, config) = self
                    .session(sessions, manifest, key, state, &decl.provider)
                    .await?;
                let hasher = DeclarationHasher::new();
                let credential = hasher.credential_digest(&decl.args.root_pass);

                state.mark_pending(PendingCreate {
                    name: decl.name.clone(),
                    provider: decl.provider.clone(),
                    kind: decl.kind.clone(),
                    inputs: decl.args.inputs.clone(),
                    credential: Some(credential.clone()),
                    started_at: Utc::now(),
                });
                self.store.save(state).await?;

                let created = match plugin.create(&config, &decl.args).await {
                    Ok(created) => created,
                    Err(e) => {
                        if e.is_rejected_by_provider() {
                            state.clear_pending(&decl.name);
                        }
                        return Err(e);
                    }
                };

                let now = Utc::now();
                state.clear_pending(&decl.name);
                state.set_resource(ResourceState {
                    name: decl.name.clone(),
                    provider: decl.provider.clone(),
                    kind: decl.kind.clone(),
                    id: created.id,
                    input_hash: hasher.hash_inputs(&decl.args.inputs),
                    inputs: decl.args.inputs.clone(),
                    credential: Some(credential),
                    outputs: created.outputs,
                    created_at: now,
                    updated_at: now,
                });
                self.store.save(state).await?;
            }
            DiffAction::Update => {
                let decl = decl.ok_or_else(missing)?;
                let mut recorded = state.resources.get(name).cloned().ok_or_else(missing)?;
                let (plugin, config) = self
                    .session(sessions, manifest, key, state, &recorded.provider)
                    .await?;
                recorded.outputs = plugin.update(&config, &recorded.id, &decl.args.inputs).await?;
                recorded.input_hash = DeclarationHasher::new().hash_inputs(&decl.args.inputs);
                recorded.inputs = decl.args.inputs.clone();
                recorded.updated_at = Utc::now();
                state.set_resource(recorded);
                self.store.save(state).await?;
            }
            DiffAction::Delete | DiffAction::Same => {}
        }

        Ok(())
    }

    async fn destroy_locked(&self, key: &StackKey) -> EngineResult<UpdateSummary> {
        let mut state = self.load_existing(key).await?;
        let manifest = self.installed_plugins().await?;
        let mut summary = UpdateSummary::new(Operation::Destroy);
        let mut sessions = HashMap::new();

        self.progress.emit(&EngineEvent::OperationStarted {
            stack: key.clone(),
            operation: Operation::Destroy,
        });

        if let Err(e) = self.settle_pending(&mut sessions, &manifest, key, &mut state).await {
            self.save_failure(&mut state, Operation::Destroy, &e).await;
            return Err(e);
        }

        let recorded: Vec<ResourceState> = state.resources.values().cloned().collect();
        for resource in recorded {
            self.progress.emit(&EngineEvent::StepStarted {
                resource: resource.name.clone(),
                action: DiffAction::Delete,
            });

            let deleted = async {
                let (plugin, config) = self
                    .session(&mut sessions, &manifest, key, &state, &resource.provider)
                    .await?;
                plugin.delete(&config, &resource.id).await
            }
            .await;

            if let Err(e) = deleted {
                self.progress.emit(&EngineEvent::StepFailed {
                    resource: resource.name.clone(),
                    action: DiffAction::Delete,
                    message: e.to_string(),
                });
                self.save_failure(&mut state, Operation::Destroy, &e).await;
                return Err(e);
            }

            state.remove_resource(&resource.name);
            self.store.save(&state).await?;
            self.progress.emit(&EngineEvent::StepCompleted {
                resource: resource.name.clone(),
                action: DiffAction::Delete,
            });
            summary.record(DiffAction::Delete);
        }

        state.program_hash.clear();
        state.add_history(HistoryEntry::new(Operation::Destroy, Vec::new()));
        self.store.save(&state).await?;
        Ok(self.finish(key, &state, summary))
    }
}

#[async_trait]
impl Engine for LocalEngine {
    async fn install_plugin(&self, name: &str, version: &str) -> EngineResult<()> {
        self.registry.resolve(name, version)?;

        let _guard = self.manifest_lock.lock().await;
        let path = self.manifest_path();
        let mut manifest = PluginManifest::load(&path).await?;
        if manifest.record(name, version) {
            manifest.save(&path).await?;
            info!("Installed plugin {name} {version}");
        } else {
            debug!("Plugin {name} {version} already installed");
        }
        Ok(())
    }

    async fn has_plugin(&self, name: &str, version: &str) -> EngineResult<bool> {
        Ok(self.installed_plugins().await?.contains(name, version))
    }

    async fn select_stack(&self, key: &StackKey) -> EngineResult<()> {
        if self.store.exists(key).await? {
            debug!("Selected stack {key}");
            Ok(())
        } else {
            Err(EngineError::StackNotFound {
                stack: key.stack.clone(),
                project: key.project.clone(),
            })
        }
    }

    async fn upsert_stack(&self, key: &StackKey) -> EngineResult<()> {
        if self.store.exists(key).await? {
            debug!("Selected stack {key}");
            return Ok(());
        }

        let held = self.lock(key).await?;
        let created = async {
            if !self.store.exists(key).await? {
                self.store.save(&StackState::new(&key.stack, &key.project)).await?;
                info!("Created stack {key}");
            }
            Ok::<(), EngineError>(())
        }
        .await;
        held.release().await?;
        created
    }

    async fn set_config(
        &self,
        key: &StackKey,
        config_key: &str,
        value: ConfigValue,
    ) -> EngineResult<()> {
        let held = self.lock(key).await?;
        let recorded = async {
            let mut state = self.load_existing(key).await?;
            let entry = ConfigEntry {
                secret: value.is_secret(),
                value: (!value.is_secret()).then(|| value.expose().to_string()),
            };
            if state.config.get(config_key) != Some(&entry) {
                state.set_config(config_key, entry);
                self.store.save(&state).await?;
            }
            Ok::<(), EngineError>(())
        }
        .await;
        held.release().await?;
        recorded?;

        debug!(
            "Set {}config '{config_key}' on {key}",
            if value.is_secret() { "secret " } else { "" }
        );
        self.config
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .insert(config_key.to_string(), value);
        Ok(())
    }

    async fn refresh(&self, key: &StackKey) -> EngineResult<UpdateSummary> {
        let held = self.lock(key).await?;
        let result = self.refresh_locked(key).await;
        held.release().await?;
        result
    }

    async fn up(&self, key: &StackKey, program: &DeploymentProgram) -> EngineResult<UpdateSummary> {
        let held = self.lock(key).await?;
        let result = self.up_locked(key, program).await;
        held.release().await?;
        result
    }

    async fn destroy(&self, key: &StackKey) -> EngineResult<UpdateSummary> {
        let held = self.lock(key).await?;
        let result = self.destroy_locked(key).await;
        held.release().await?;
        result
    }
}

impl std::fmt::Debug for LocalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEngine")
            .field("workspace", &self.workspace)
            .field("backend", &self.store.backend_type())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl HeldLock {
    async fn release(mut self) -> EngineResult<()> {
        match self.lock_id.take() {
            Some(lock_id) => self.store.release_lock(&self.key, &lock_id).await,
            None => Ok(()),
        }
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        let Some(lock_id) = self.lock_id.take() else {
            return;
        };
        if let Err(e) = self.store.release_lock_now(&self.key, &lock_id) {
            warn!("Lock on {} left behind, it expires on its own: {e}", self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpecValidator;
    use crate::engine::{CreatedResource, InstanceOutputs, MockProviderPlugin};
    use crate::error::{ProviderError, StateError};
    use crate::testing::{StalledCreatePlugin, sample_input};
    use mockall::predicate::eq;
    use secrecy::SecretString;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;

    const TOKEN_KEY: &str = "linode:token";
    const REQUIRED: &[&str] = &["token"];

    fn key() -> StackKey {
        StackKey::new("carlos-ubuntu18.04-01-02-2024", "slack-vms")
    }

    fn program() -> DeploymentProgram {
        DeploymentProgram::for_spec(SpecValidator::new().validate(&sample_input()).unwrap().spec)
    }

    fn running() -> InstanceOutputs {
        InstanceOutputs {
            status: String::from("running"),
            ipv4: vec![String::from("192.0.2.10")],
            ipv6: None,
        }
    }

    fn base_plugin() -> MockProviderPlugin {
        let mut plugin = MockProviderPlugin::new();
        plugin.expect_name().return_const("linode");
        plugin.expect_version().return_const("v3.7.1");
        plugin.expect_required_config().return_const(REQUIRED);
        plugin
    }

    #[derive(Default)]
    struct Recorder(StdMutex<Vec<EngineEvent>>);

    impl ProgressSink for Recorder {
        fn emit(&self, event: &EngineEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    async fn ready_engine(plugin: impl ProviderPlugin + 'static, dir: &TempDir) -> LocalEngine {
        let engine = LocalEngine::new(dir.path(), PluginRegistry::new().with(Arc::new(plugin)));
        engine.install_plugin("linode", "v3.7.1").await.unwrap();
        engine.upsert_stack(&key()).await.unwrap();
        engine
            .set_config(
                &key(),
                TOKEN_KEY,
                ConfigValue::secret(&SecretString::from("tok-123")),
            )
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_select_missing_stack() {
        let dir = TempDir::new().unwrap();
        let engine = LocalEngine::new(dir.path(), PluginRegistry::new());
        let err = engine.select_stack(&key()).await.unwrap_err();
        assert!(err.is_not_found());

        engine.upsert_stack(&key()).await.unwrap();
        engine.upsert_stack(&key()).await.unwrap();
        assert!(engine.select_stack(&key()).await.is_ok());
    }

    #[tokio::test]
    async fn test_install_plugin_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let engine = LocalEngine::new(dir.path(), PluginRegistry::new().with(Arc::new(base_plugin())));

        assert!(!engine.has_plugin("linode", "v3.7.1").await.unwrap());
        engine.install_plugin("linode", "v3.7.1").await.unwrap();
        engine.install_plugin("linode", "v3.7.1").await.unwrap();
        assert!(engine.has_plugin("linode", "v3.7.1").await.unwrap());
        assert_eq!(engine.installed_plugins().await.unwrap().plugins.len(), 1);

        let err = engine.install_plugin("linode", "v9.9.9").await.unwrap_err();
        assert!(matches!(err, EngineError::PluginVersionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_up_creates_then_is_stable() {
        let dir = TempDir::new().unwrap();
        let mut plugin = base_plugin();
        plugin.expect_create().times(1).returning(|config, args| {
            assert_eq!(config.require("token").unwrap().expose(), "tok-123");
            assert_eq!(args.inputs.label, "carlos-dev");
            Ok(CreatedResource {
                id: String::from("1001"),
                outputs: running(),
            })
        });
        let engine = ready_engine(plugin, &dir).await;

        let summary = engine.up(&key(), &program()).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.resources["carlos-vm"].id, "1001");

        let summary = engine.up(&key(), &program()).await.unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(summary.unchanged, 1);

        let state = engine.stack_state(&key()).await.unwrap().unwrap();
        assert!(!state.program_hash.is_empty());
        assert!(state.config[TOKEN_KEY].secret);

        let on_disk = std::fs::read_to_string(
            dir.path()
                .join("stacks/slack-vms/carlos-ubuntu18.04-01-02-2024.json"),
        )
        .unwrap();
        assert!(!on_disk.contains("tok-123"));
        assert!(!on_disk.contains("correct-horse-battery"));
    }

    #[tokio::test]
    async fn test_refresh_drops_vanished_resources() {
        let dir = TempDir::new().unwrap();
        let mut plugin = base_plugin();
        plugin.expect_create().returning(|_, _| {
            Ok(CreatedResource {
                id: String::from("1001"),
                outputs: InstanceOutputs::default(),
            })
        });
        plugin
            .expect_read()
            .with(mockall::predicate::always(), eq("1001"))
            .times(2)
            .returning({
                let calls = StdMutex::new(0);
                move |_, _| {
                    let mut n = calls.lock().unwrap();
                    *n += 1;
                    Ok((*n == 1).then(running))
                }
            });
        let engine = ready_engine(plugin, &dir).await;
        engine.up(&key(), &program()).await.unwrap();

        let summary = engine.refresh(&key()).await.unwrap();
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.resources["carlos-vm"].outputs.status, "running");

        let summary = engine.refresh(&key()).await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert!(summary.resources.is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut plugin = base_plugin();
        plugin.expect_create().never();
        let engine = LocalEngine::new(dir.path(), PluginRegistry::new().with(Arc::new(plugin)));
        engine.install_plugin("linode", "v3.7.1").await.unwrap();
        engine.upsert_stack(&key()).await.unwrap();

        match engine.up(&key(), &program()).await {
            Err(EngineError::MissingConfig { key }) => assert_eq!(key, TOKEN_KEY),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_uninstalled_provider_is_a_declaration_error() {
        let dir = TempDir::new().unwrap();
        let engine = LocalEngine::new(dir.path(), PluginRegistry::new().with(Arc::new(base_plugin())));
        engine.upsert_stack(&key()).await.unwrap();

        let err = engine.up(&key(), &program()).await.unwrap_err();
        assert!(matches!(err, EngineError::ResourceDeclaration { .. }));
    }

    #[tokio::test]
    async fn test_failed_create_keeps_state_accurate() {
        let dir = TempDir::new().unwrap();
        let mut plugin = base_plugin();
        plugin
            .expect_create()
            .returning(|_, _| Err(ProviderError::api_error(400, "region unavailable").into()));
        let engine = ready_engine(plugin, &dir).await;

        let err = engine.up(&key(), &program()).await.unwrap_err();
        assert!(matches!(err, EngineError::Provider(_)));

        let state = engine.stack_state(&key()).await.unwrap().unwrap();
        assert!(state.resources.is_empty());
        assert!(state.pending.is_empty());
        let last = state.history.last().unwrap();
        assert!(!last.success);
        assert!(engine.store.lock_info(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_label_change_updates_image_change_replaces() {
        let dir = TempDir::new().unwrap();
        let mut plugin = base_plugin();
        plugin.expect_create().times(2).returning({
            let next = StdMutex::new(1000);
            move |_, _| {
                let mut id = next.lock().unwrap();
                *id += 1;
                Ok(CreatedResource {
                    id: id.to_string(),
                    outputs: running(),
                })
            }
        });
        plugin
            .expect_update()
            .times(1)
            .returning(|_, _, inputs| {
                assert_eq!(inputs.label, "carlos-dev-2");
                Ok(running())
            });
        plugin
            .expect_delete()
            .with(mockall::predicate::always(), eq("1001"))
            .times(1)
            .returning(|_, _| Ok(()));
        let engine = ready_engine(plugin, &dir).await;
        engine.up(&key(), &program()).await.unwrap();

        let mut input = sample_input();
        input.vm_options.label_name = String::from("carlos-dev-2");
        let relabeled =
            DeploymentProgram::for_spec(SpecValidator::new().validate(&input).unwrap().spec);
        let summary = engine.up(&key(), &relabeled).await.unwrap();
        assert_eq!(summary.updated, 1);

        input.vm_options.image_name = String::from("linode/ubuntu22.04");
        input.vm_options.operating_system = String::from("ubuntu22.04");
        let reimaged =
            DeploymentProgram::for_spec(SpecValidator::new().validate(&input).unwrap().spec);
        let summary = engine.up(&key(), &reimaged).await.unwrap();
        assert_eq!(summary.replaced, 1);
        assert_eq!(summary.resources["carlos-vm"].id, "1002");
    }

    #[tokio::test]
    async fn test_destroy_removes_everything_and_reports_progress() {
        let dir = TempDir::new().unwrap();
        let mut plugin = base_plugin();
        plugin.expect_create().returning(|_, _| {
            Ok(CreatedResource {
                id: String::from("1001"),
                outputs: running(),
            })
        });
        plugin.expect_delete().times(1).returning(|_, _| Ok(()));
        let recorder = Arc::new(Recorder::default());
        let engine = ready_engine(plugin, &dir)
            .await
            .with_progress(Arc::clone(&recorder) as Arc<dyn ProgressSink>);
        engine.up(&key(), &program()).await.unwrap();

        let summary = engine.destroy(&key()).await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert!(summary.resources.is_empty());
        assert!(engine.select_stack(&key()).await.is_ok());

        let events = recorder.0.lock().unwrap();
        assert!(events.contains(&EngineEvent::StepCompleted {
            resource: String::from("carlos-vm"),
            action: DiffAction::Delete,
        }));
    }

    #[tokio::test]
    async fn test_cancelled_up_leaves_the_stack_unlocked() {
        let dir = TempDir::new().unwrap();
        let engine = ready_engine(StalledCreatePlugin::default(), &dir).await;

        let (stack_key, stack_program) = (key(), program());
        let stalled = tokio::time::timeout(Duration::from_millis(50), engine.up(&stack_key, &stack_program));
        assert!(stalled.await.is_err());

        assert!(engine.store.lock_info(&key()).await.unwrap().is_none());
        engine.refresh(&key()).await.unwrap();
        engine
            .set_config(
                &key(),
                TOKEN_KEY,
                ConfigValue::secret(&SecretString::from("tok-123")),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_interrupted_create_is_adopted_not_repeated() {
        let dir = TempDir::new().unwrap();
        let plugin = StalledCreatePlugin::default();
        let engine = ready_engine(plugin.clone(), &dir).await;

        let (stack_key, stack_program) = (key(), program());
        let stalled = tokio::time::timeout(Duration::from_millis(50), engine.up(&stack_key, &stack_program));
        assert!(stalled.await.is_err());

        let state = engine.stack_state(&key()).await.unwrap().unwrap();
        assert!(state.resources.is_empty());
        assert_eq!(state.pending["carlos-vm"].inputs.label, "carlos-dev");

        let summary = engine.refresh(&key()).await.unwrap();
        assert_eq!(summary.resources["carlos-vm"].id, "1001");

        let summary = engine.up(&key(), &program()).await.unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(plugin.creates.load(Ordering::SeqCst), 1);
        assert_eq!(plugin.finds.load(Ordering::SeqCst), 1);

        let state = engine.stack_state(&key()).await.unwrap().unwrap();
        assert!(state.pending.is_empty());
        assert!(state.resources["carlos-vm"].credential.is_some());
    }

    #[tokio::test]
    async fn test_unknown_create_outcome_is_checked_before_retrying() {
        let dir = TempDir::new().unwrap();
        let mut plugin = base_plugin();
        plugin.expect_create().times(2).returning({
            let calls = StdMutex::new(0);
            move |_, _| {
                let mut n = calls.lock().unwrap();
                *n += 1;
                if *n == 1 {
                    Err(ProviderError::network("connection reset").into())
                } else {
                    Ok(CreatedResource {
                        id: String::from("1002"),
                        outputs: running(),
                    })
                }
            }
        });
        plugin.expect_find().times(1).returning(|_, inputs| {
            assert_eq!(inputs.label, "carlos-dev");
            Ok(None)
        });
        let engine = ready_engine(plugin, &dir).await;

        engine.up(&key(), &program()).await.unwrap_err();
        let state = engine.stack_state(&key()).await.unwrap().unwrap();
        assert!(state.pending.contains_key("carlos-vm"));

        let summary = engine.up(&key(), &program()).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.resources["carlos-vm"].id, "1002");
    }

    #[tokio::test]
    async fn test_new_password_replaces_the_instance() {
        let dir = TempDir::new().unwrap();
        let mut plugin = base_plugin();
        plugin.expect_create().times(2).returning({
            let next = StdMutex::new(1000);
            move |_, _| {
                let mut id = next.lock().unwrap();
                *id += 1;
                Ok(CreatedResource {
                    id: id.to_string(),
                    outputs: running(),
                })
            }
        });
        plugin
            .expect_delete()
            .with(mockall::predicate::always(), eq("1001"))
            .times(1)
            .returning(|_, _| Ok(()));
        let engine = ready_engine(plugin, &dir).await;
        engine.up(&key(), &program()).await.unwrap();

        let mut input = sample_input();
        input.vm_options.password = String::from("battery-staple-horse");
        let rekeyed = DeploymentProgram::for_spec(SpecValidator::new().validate(&input).unwrap().spec);
        let summary = engine.up(&key(), &rekeyed).await.unwrap();
        assert_eq!(summary.replaced, 1);
        assert_eq!(summary.resources["carlos-vm"].id, "1002");

        let on_disk = std::fs::read_to_string(
            dir.path()
                .join("stacks/slack-vms/carlos-ubuntu18.04-01-02-2024.json"),
        )
        .unwrap();
        assert!(!on_disk.contains("battery-staple-horse"));
    }

    #[tokio::test]
    async fn test_locked_stack_is_refused() {
        let dir = TempDir::new().unwrap();
        let engine = ready_engine(base_plugin(), &dir).await;
        let _held = engine.store.acquire_lock(&key(), "other-process").await.unwrap();

        let err = engine.refresh(&key()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::State(StateError::LockedByOther { .. })
        ));
    }
}
