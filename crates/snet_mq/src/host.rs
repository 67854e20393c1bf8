//! Plugin Host
//!
//! Owns the type registry, the instance map, the failed-open set and the
//! produce queue. Background work:
//!
//! - library watcher loop: module files → registered types
//! - config watcher loop: config files → instances
//! - failed-open retry loop
//! - produce workers (started on first produce)
//!
//! Shutdown tears these down in that order before closing instances.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tokio::sync::{OnceCell, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendContext, ExportedType};
use crate::event::{EventPublisher, HostEvent};
use crate::instance::{InstanceState, PluginInstance};
use crate::loader::ModuleLoader;
use crate::naming::{InstanceFile, instance_key};
use crate::options::HostOptions;
use crate::produce::{InstanceMap, Payload, ProduceQueue, ProduceRequest};
use crate::registry::TypeRegistry;
use crate::result::OperateResult;
use crate::watcher::{WatchEvent, WatchFilter, spawn_consumer, watch_dir};
use crate::{HostError, HostResult};

/// A config whose type was not registered when it arrived
#[derive(Debug, Clone)]
struct PendingConfig {
    type_name: String,
    sn: String,
    config: serde_json::Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Host
// ─────────────────────────────────────────────────────────────────────────────

/// Discovers, configures and drives message-queue backends
pub struct PluginHost {
    options: HostOptions,
    loader: Arc<dyn ModuleLoader>,
    types: TypeRegistry,
    /// Module file → module identifier
    modules: DashMap<PathBuf, String>,
    instances: InstanceMap,
    failed_open: DashSet<String>,
    pending: DashMap<String, PendingConfig>,
    events: EventPublisher,
    /// Watcher loops and the retry loop
    token: CancellationToken,
    /// Produce workers; cancelled only after the queue drains
    worker_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    queue: OnceCell<ProduceQueue>,
    shut_down: AtomicBool,
}

impl PluginHost {
    /// Create a host; nothing runs until [`PluginHost::start`]
    pub fn new(options: HostOptions, loader: impl ModuleLoader) -> Arc<Self> {
        Arc::new(Self {
            options,
            loader: Arc::new(loader),
            types: TypeRegistry::new(),
            modules: DashMap::new(),
            instances: Arc::new(DashMap::new()),
            failed_open: DashSet::new(),
            pending: DashMap::new(),
            events: EventPublisher::new(1024),
            token: CancellationToken::new(),
            worker_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            queue: OnceCell::new(),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    /// Subscribe to host diagnostics
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    pub fn event_publisher(&self) -> EventPublisher {
        self.events.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Start
    // ─────────────────────────────────────────────────────────────────────────

    /// Scan both directories, then start the watchers and the retry loop
    ///
    /// A directory that cannot be created is logged and its watcher is not
    /// started; the host keeps running.
    pub async fn start(self: &Arc<Self>) {
        if self.shut_down.load(Ordering::SeqCst) {
            warn!("Plugin host already shut down, not starting");
            return;
        }

        let library_ready = ensure_dir(&self.options.library_dir);
        let config_ready = ensure_dir(&self.options.config_dir);

        // Library directory first so configs find their types
        if library_ready {
            for path in scan_dir(&self.options.library_dir, &self.library_filter()) {
                self.on_library_created(&path).await;
            }
        }
        if config_ready {
            for path in scan_dir(&self.options.config_dir, &self.config_filter()) {
                self.on_config_created(&path).await;
            }
        }

        if self.options.watch {
            if library_ready {
                self.start_library_watcher();
            }
            if config_ready {
                self.start_config_watcher();
            }
        }

        let host = Arc::clone(self);
        let token = self.token.child_token();
        self.tasks
            .lock()
            .push(tokio::spawn(async move { host.run_retry_loop(token).await }));

        info!(
            types = self.types.len(),
            instances = self.instances.len(),
            "Plugin host started"
        );
    }

    fn library_filter(&self) -> WatchFilter {
        WatchFilter::Pattern(self.options.library_pattern.clone())
    }

    fn config_filter(&self) -> WatchFilter {
        WatchFilter::Suffix(self.options.config_suffix.clone())
    }

    fn start_library_watcher(self: &Arc<Self>) {
        let host = Arc::clone(self);
        self.start_watcher("library", self.options.library_dir.clone(), self.library_filter(), move |change| {
            let host = Arc::clone(&host);
            async move {
                match change {
                    WatchEvent::Created(path) => host.on_library_created(&path).await,
                    WatchEvent::Deleted(path) => host.on_library_deleted(&path).await,
                }
            }
        });
    }

    fn start_config_watcher(self: &Arc<Self>) {
        let host = Arc::clone(self);
        self.start_watcher("config", self.options.config_dir.clone(), self.config_filter(), move |change| {
            let host = Arc::clone(&host);
            async move {
                match change {
                    WatchEvent::Created(path) => host.on_config_created(&path).await,
                    WatchEvent::Deleted(path) => host.on_config_deleted(&path).await,
                }
            }
        });
    }

    fn start_watcher<F, Fut>(&self, name: &'static str, dir: PathBuf, filter: WatchFilter, handler: F)
    where
        F: Fn(WatchEvent) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = match watch_dir(&dir, filter, tx, self.events.clone()) {
            Ok(watcher) => watcher,
            Err(e) => {
                error!(watcher = name, dir = %dir.display(), "Failed to start watcher: {}", e);
                self.events.publish(HostEvent::WatcherError {
                    message: format!("{}: {}", dir.display(), e),
                });
                return;
            }
        };

        let handle = spawn_consumer(
            name,
            Some(watcher),
            rx,
            self.token.child_token(),
            self.options.debounce(),
            handler,
        );
        self.tasks.lock().push(handle);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Library Events
    // ─────────────────────────────────────────────────────────────────────────

    async fn on_library_created(&self, path: &Path) {
        let module = self.loader.module_id(path);
        let exports = match self.loader.load(path) {
            Ok(exports) => exports,
            Err(e) => {
                warn!(path = %path.display(), "Module load failed: {}", e);
                self.events.publish(HostEvent::ModuleFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                });
                return;
            }
        };
        self.modules.insert(path.to_path_buf(), module.clone());

        let mut registered = Vec::new();
        for export in exports {
            let name = export.name.clone();
            if self.register_type(&module, export) {
                registered.push(name);
            } else {
                debug!(module = %module, type_name = %name, "Skipping non-backend export");
            }
        }

        for type_name in registered {
            self.bind_pending(&type_name).await;
        }
    }

    async fn on_library_deleted(&self, path: &Path) {
        let module = self
            .modules
            .remove(path)
            .map(|(_, id)| id)
            .unwrap_or_else(|| self.loader.module_id(path));
        info!(module = %module, "Module removed");
        self.unregister_types_matching(&module).await;
    }

    /// Register an exported type; false when it is not a concrete backend
    pub fn register_type(&self, module: &str, export: ExportedType) -> bool {
        let name = export.name.clone();
        if !self.types.register(module, export) {
            return false;
        }
        info!(module, type_name = %name, "Backend type registered");
        self.events.publish(HostEvent::TypeRegistered {
            type_name: name,
            module: module.to_string(),
        });
        true
    }

    /// Remove every type matching `ident` and every instance built from one
    ///
    /// Instances whose key contains `ident` are removed as well. Returns the
    /// removed type names.
    pub async fn unregister_types_matching(&self, ident: &str) -> Vec<String> {
        let removed = self.types.remove_matching(ident);
        for type_name in &removed {
            info!(type_name = %type_name, "Backend type unregistered");
            self.events.publish(HostEvent::TypeUnregistered {
                type_name: type_name.clone(),
            });
        }

        let keys: Vec<String> = self
            .instances
            .iter()
            .filter(|e| {
                (!ident.is_empty() && e.key().contains(ident)) || removed.contains(&e.type_name)
            })
            .map(|e| e.key().clone())
            .collect();
        for key in keys {
            match self.remove_instance(&key).await {
                Ok(()) => {}
                Err(HostError::InstanceNotFound(_)) => debug!(instance = %key, "Instance already removed"),
                Err(e) => warn!(instance = %key, "Failed to remove instance: {}", e),
            }
        }

        self.pending.retain(|_, p| !removed.contains(&p.type_name));
        removed
    }

    async fn bind_pending(&self, type_name: &str) {
        let keys: Vec<String> = self
            .pending
            .iter()
            .filter(|p| p.type_name == type_name)
            .map(|p| p.key().clone())
            .collect();

        for key in keys {
            let Some((_, pending)) = self.pending.remove(&key) else {
                continue;
            };
            if let Err(e) = self
                .create_instance(&pending.type_name, &pending.sn, pending.config)
                .await
            {
                warn!(instance = %key, "Deferred instance creation failed: {}", e);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Config Events
    // ─────────────────────────────────────────────────────────────────────────

    async fn on_config_created(&self, path: &Path) {
        let file = match InstanceFile::from_path(path, &self.options.config_suffix) {
            Ok(file) => file,
            Err(e) => {
                self.config_failed(path, e.to_string());
                return;
            }
        };

        let mut config = match self.read_config(path).await {
            Ok(config) => config,
            Err(e) => {
                self.config_failed(path, e.to_string());
                return;
            }
        };
        file.bind_sn(&mut config, &self.options.sn_key);

        let key = file.key();
        if self.instances.contains_key(&key) {
            debug!(instance = %key, "Instance already exists, ignoring config");
            return;
        }
        if !self.types.contains(&file.type_name) {
            info!(instance = %key, type_name = %file.type_name, "Type not registered yet, deferring config");
            self.pending.insert(
                key,
                PendingConfig {
                    type_name: file.type_name,
                    sn: file.sn,
                    config,
                },
            );
            return;
        }

        if let Err(e) = self.create_instance(&file.type_name, &file.sn, config).await {
            self.config_failed(path, e.to_string());
        }
    }

    async fn on_config_deleted(&self, path: &Path) {
        let Ok(file) = InstanceFile::from_path(path, &self.options.config_suffix) else {
            return;
        };
        let key = file.key();
        self.pending.remove(&key);
        match self.remove_instance(&key).await {
            Ok(()) => {}
            Err(HostError::InstanceNotFound(_)) => debug!(instance = %key, "No instance for deleted config"),
            Err(e) => warn!(instance = %key, "Failed to remove instance: {}", e),
        }
    }

    /// Read and parse a config file, retrying while it is locked or half-written
    async fn read_config(&self, path: &Path) -> HostResult<serde_json::Value> {
        let attempts = self.options.config_retries.max(1);
        let mut attempt = 1;
        loop {
            match read_config_file(path).await {
                Ok(config) => return Ok(config),
                Err(e) if attempt < attempts => {
                    warn!(path = %path.display(), attempt, "Config read failed, retrying: {}", e);
                    tokio::time::sleep(self.options.config_retry_backoff()).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn config_failed(&self, path: &Path, message: String) {
        warn!(path = %path.display(), "Config failed: {}", message);
        self.events.publish(HostEvent::ConfigFailed {
            path: path.to_path_buf(),
            message,
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Instances
    // ─────────────────────────────────────────────────────────────────────────

    /// Construct an instance of a registered type, opening it if auto-open is set
    pub async fn create_instance(
        &self,
        type_name: &str,
        sn: &str,
        config: serde_json::Value,
    ) -> HostResult<Arc<PluginInstance>> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(HostError::ShutDown);
        }
        let registered = self
            .types
            .get(type_name)
            .ok_or_else(|| HostError::TypeNotRegistered(type_name.to_string()))?;
        let key = instance_key(type_name, sn);

        let instance = {
            let entry = match self.instances.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Err(HostError::InstanceExists(key));
                }
                dashmap::mapref::entry::Entry::Vacant(entry) => entry,
            };
            let backend = (registered.factory)(BackendContext {
                key: key.clone(),
                type_name: type_name.to_string(),
                sn: sn.to_string(),
                config,
                events: self.events.clone(),
            })?;
            let instance = Arc::new(PluginInstance::new(
                key.clone(),
                type_name.to_string(),
                sn.to_string(),
                backend,
            ));
            entry.insert(Arc::clone(&instance));
            instance
        };

        info!(instance = %key, "Instance created");
        self.events.publish(HostEvent::InstanceCreated { key });

        if self.options.auto_open {
            self.open_instance(&instance).await;
        }
        Ok(instance)
    }

    /// Close and drop an instance
    pub async fn remove_instance(&self, key: &str) -> HostResult<()> {
        let (_, instance) = self
            .instances
            .remove(key)
            .ok_or_else(|| HostError::InstanceNotFound(key.to_string()))?;
        self.failed_open.remove(key);
        self.dispose(&instance, true).await;

        info!(instance = %key, "Instance removed");
        self.events.publish(HostEvent::InstanceRemoved {
            key: key.to_string(),
        });
        Ok(())
    }

    async fn dispose(&self, instance: &PluginInstance, hard: bool) {
        let was_open = instance.is_open();
        instance.set_state(InstanceState::Closed);
        if was_open {
            let result = instance.backend.close(hard).await;
            if !result.success {
                warn!(instance = %instance.key, message = %result.message, "Close failed");
            }
        }
    }

    /// Open an instance by key
    pub async fn open(&self, key: &str) -> HostResult<OperateResult> {
        let instance = self.instance(key)?;
        instance.transition(InstanceState::Closed, InstanceState::Configured);
        Ok(self.open_instance(&instance).await)
    }

    async fn open_instance(&self, instance: &PluginInstance) -> OperateResult {
        let from = instance.state();
        if matches!(from, InstanceState::Closed | InstanceState::Opening)
            || !instance.transition(from, InstanceState::Opening)
        {
            return OperateResult::fail("instance is closed or busy");
        }

        let result = instance.backend.open().await;
        if result.success {
            if instance.transition(InstanceState::Opening, InstanceState::Open) {
                self.failed_open.remove(&instance.key);
                info!(instance = %instance.key, "Instance opened");
                self.events.publish(HostEvent::Opened {
                    key: instance.key.clone(),
                });
            }
        } else if instance.transition(InstanceState::Opening, InstanceState::FailedOpen) {
            self.failed_open.insert(instance.key.clone());
            warn!(instance = %instance.key, message = %result.message, "Open failed, will retry");
            self.events.publish(HostEvent::OpenFailed {
                key: instance.key.clone(),
                message: result.message.clone(),
            });
        }
        result
    }

    /// Close an instance without removing it
    pub async fn close(&self, key: &str, hard: bool) -> HostResult<OperateResult> {
        let instance = self.instance(key)?;
        self.failed_open.remove(key);
        instance.set_state(InstanceState::Closed);
        Ok(instance.backend.close(hard).await)
    }

    pub async fn status(&self, key: &str) -> HostResult<OperateResult> {
        Ok(self.instance(key)?.backend.status().await)
    }

    pub async fn consume(&self, key: &str, topic: &str) -> HostResult<OperateResult> {
        Ok(self.instance(key)?.backend.consume(topic).await)
    }

    pub async fn unconsume(&self, key: &str, topic: &str) -> HostResult<OperateResult> {
        Ok(self.instance(key)?.backend.unconsume(topic).await)
    }

    fn instance(&self, key: &str) -> HostResult<Arc<PluginInstance>> {
        self.instances
            .get(key)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| HostError::InstanceNotFound(key.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Registered type names, sorted
    pub fn types(&self) -> Vec<String> {
        self.types.names()
    }

    /// Instance keys with their state, sorted by key
    pub fn instances(&self) -> Vec<(String, InstanceState)> {
        let mut list: Vec<_> = self
            .instances
            .iter()
            .map(|e| (e.key().clone(), e.value().state()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    pub fn instance_state(&self, key: &str) -> Option<InstanceState> {
        self.instances.get(key).map(|e| e.value().state())
    }

    /// Keys waiting for an open retry, sorted
    pub fn failed_open(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.failed_open.iter().map(|k| k.key().clone()).collect();
        keys.sort();
        keys
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Failed-Open Retry
    // ─────────────────────────────────────────────────────────────────────────

    async fn run_retry_loop(&self, token: CancellationToken) {
        let interval = self.options.retry_interval();
        debug!(?interval, "Failed-open retry loop started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            self.retry_failed_opens().await;
        }

        debug!("Failed-open retry loop stopped");
    }

    async fn retry_failed_opens(&self) {
        let keys: Vec<String> = self.failed_open.iter().map(|k| k.key().clone()).collect();
        for key in keys {
            let Some(instance) = self.instances.get(&key).map(|e| Arc::clone(e.value())) else {
                self.failed_open.remove(&key);
                continue;
            };
            match instance.state() {
                InstanceState::FailedOpen => {
                    debug!(instance = %key, "Retrying open");
                    self.open_instance(&instance).await;
                }
                InstanceState::Opening => {}
                _ => {
                    self.failed_open.remove(&key);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Produce
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue a message for every open instance, or for `targets` only
    ///
    /// Waits while the queue is full. Delivery outcomes arrive as
    /// [`HostEvent::Produced`] / [`HostEvent::UnknownTargets`].
    pub async fn produce(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Payload>,
        targets: Vec<String>,
    ) -> HostResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(HostError::ShutDown);
        }
        let queue = self
            .queue
            .get_or_init(|| async {
                ProduceQueue::start(
                    self.options.capacity(),
                    self.options.worker_count(),
                    Arc::clone(&self.instances),
                    self.events.clone(),
                    self.worker_token.child_token(),
                )
            })
            .await;

        queue
            .enqueue(ProduceRequest {
                topic: topic.into(),
                payload: payload.into(),
                targets,
            })
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shutdown
    // ─────────────────────────────────────────────────────────────────────────

    /// Stop everything; idempotent
    ///
    /// Order: watcher and retry loops, queue drain, workers, instances.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Plugin host shutting down");

        self.token.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!("Host task panicked: {:?}", e);
            }
        }

        if let Some(queue) = self.queue.get() {
            queue.shutdown(self.options.drain_timeout()).await;
        }
        self.worker_token.cancel();

        let keys: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, instance)) = self.instances.remove(&key) {
                self.dispose(&instance, false).await;
                self.events.publish(HostEvent::InstanceRemoved { key });
            }
        }
        self.failed_open.clear();
        self.pending.clear();

        info!("Plugin host stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("types", &self.types.len())
            .field("instances", &self.instances.len())
            .field("failed_open", &self.failed_open.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn ensure_dir(dir: &Path) -> bool {
    match std::fs::create_dir_all(dir) {
        Ok(()) => true,
        Err(e) => {
            error!(dir = %dir.display(), "Cannot create directory, watcher disabled: {}", e);
            false
        }
    }
}

fn scan_dir(dir: &Path, filter: &WatchFilter) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| filter.matches(p))
        .collect();
    paths.sort();
    paths
}

async fn read_config_file(path: &Path) -> HostResult<serde_json::Value> {
    let text = tokio::fs::read_to_string(path).await?;
    if text.trim().is_empty() {
        return Err(HostError::Config(format!("{} is empty", path.display())));
    }

    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let value = if is_toml {
        let parsed: toml::Value =
            toml::from_str(&text).map_err(|e| HostError::Config(e.to_string()))?;
        serde_json::to_value(parsed).map_err(|e| HostError::Config(e.to_string()))?
    } else {
        serde_json::from_str(&text).map_err(|e| HostError::Config(e.to_string()))?
    };

    if !value.is_object() {
        return Err(HostError::Config(format!(
            "{} does not contain an object",
            path.display()
        )));
    }
    Ok(value)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendError};
    use crate::builtin;
    use crate::loader::StaticModuleLoader;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const RECORDING: &str = "Test.Mq.RecordingBackend";

    /// Records produced messages; fails `FailOpens` opens before succeeding
    struct RecordingBackend {
        fail_opens: AtomicUsize,
        delay_ms: u64,
        received: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[derive(serde::Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct RecordingSettings {
        #[serde(default)]
        fail_opens: usize,
        #[serde(default)]
        delay_ms: u64,
    }

    fn sink() -> &'static Mutex<std::collections::HashMap<String, Arc<Mutex<Vec<(String, String)>>>>> {
        static SINK: std::sync::OnceLock<
            Mutex<std::collections::HashMap<String, Arc<Mutex<Vec<(String, String)>>>>>,
        > = std::sync::OnceLock::new();
        SINK.get_or_init(|| Mutex::new(std::collections::HashMap::new()))
    }

    fn received(key: &str) -> Vec<(String, String)> {
        sink()
            .lock()
            .get(key)
            .map(|r| r.lock().clone())
            .unwrap_or_default()
    }

    fn recording_module() -> Vec<ExportedType> {
        vec![
            ExportedType::backend(RECORDING, |ctx| {
                let settings: RecordingSettings = ctx.parse_config()?;
                let received = Arc::new(Mutex::new(Vec::new()));
                sink().lock().insert(ctx.key.clone(), Arc::clone(&received));
                Ok(Arc::new(RecordingBackend {
                    fail_opens: AtomicUsize::new(settings.fail_opens),
                    delay_ms: settings.delay_ms,
                    received,
                }) as Arc<dyn Backend>)
            }),
            ExportedType::backend("Test.Mq.Broken", |ctx| {
                Err(BackendError::Other(format!("{} cannot be built", ctx.key)))
            }),
        ]
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        async fn open(&self) -> OperateResult {
            let remaining = self.fail_opens.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_opens.store(remaining - 1, Ordering::SeqCst);
                return OperateResult::fail("broker unreachable");
            }
            OperateResult::ok()
        }
        async fn close(&self, _hard: bool) -> OperateResult {
            OperateResult::ok()
        }
        async fn status(&self) -> OperateResult {
            OperateResult::ok()
        }
        async fn produce(&self, topic: &str, payload: &Payload) -> OperateResult {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            let text = String::from_utf8_lossy(payload.as_bytes()).into_owned();
            self.received.lock().push((topic.to_string(), text));
            OperateResult::ok()
        }
        async fn consume(&self, _topic: &str) -> OperateResult {
            OperateResult::ok()
        }
        async fn unconsume(&self, _topic: &str) -> OperateResult {
            OperateResult::ok()
        }
    }

    fn loader() -> StaticModuleLoader {
        StaticModuleLoader::with_builtin().with_module("Test.Mq", recording_module)
    }

    fn host_in(dir: &Path) -> Arc<PluginHost> {
        let options = HostOptions::new(dir.join("lib"), dir.join("cfg"))
            .with_library_pattern("*.Mq*")
            .with_retry_interval(Duration::from_millis(20))
            .with_debounce(Duration::from_millis(10))
            .with_config_retries(2, Duration::from_millis(10))
            .with_workers(2)
            .with_watch(false);
        PluginHost::new(options, loader())
    }

    fn register_recording(host: &PluginHost) {
        for export in recording_module() {
            host.register_type("Test.Mq", export);
        }
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_open_instance() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        register_recording(&host);

        host.create_instance(RECORDING, "b1", serde_json::json!({})).await.unwrap();
        host.create_instance(RECORDING, "b2", serde_json::json!({})).await.unwrap();

        host.produce("plant/temp", "21.5", Vec::new()).await.unwrap();

        let k1 = instance_key(RECORDING, "b1");
        let k2 = instance_key(RECORDING, "b2");
        eventually(|| received(&k1).len() == 1 && received(&k2).len() == 1).await;
        assert_eq!(received(&k1)[0], ("plant/temp".to_string(), "21.5".to_string()));

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_target_does_not_block_valid_one() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        register_recording(&host);
        let mut events = host.subscribe();

        host.create_instance(RECORDING, "u1", serde_json::json!({})).await.unwrap();
        let valid = instance_key(RECORDING, "u1");

        host.produce("t", "x", vec![valid.clone(), "Nope.1".into()])
            .await
            .unwrap();

        eventually(|| received(&valid).len() == 1).await;

        let mut reported = None;
        while let Ok(event) = tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            if let Ok(HostEvent::UnknownTargets { keys, .. }) = event {
                reported = Some(keys);
                break;
            }
        }
        assert_eq!(reported, Some(vec!["Nope.1".to_string()]));

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_removal_during_produce_keeps_workers_alive() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        register_recording(&host);

        host.create_instance(RECORDING, "slow", serde_json::json!({"DelayMs": 50}))
            .await
            .unwrap();
        host.create_instance(RECORDING, "fast", serde_json::json!({})).await.unwrap();
        let slow = instance_key(RECORDING, "slow");
        let fast = instance_key(RECORDING, "fast");

        host.produce("t", "first", Vec::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        host.remove_instance(&slow).await.unwrap();
        host.produce("t", "second", Vec::new()).await.unwrap();

        eventually(|| received(&fast).len() == 2).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(received(&slow).iter().all(|(_, m)| m != "second"));
        assert_eq!(host.instance_state(&slow), None);

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_open_is_retried_until_open() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        register_recording(&host);
        host.start().await;

        let instance = host
            .create_instance(RECORDING, "r1", serde_json::json!({"FailOpens": 2}))
            .await
            .unwrap();
        assert_eq!(instance.state(), InstanceState::FailedOpen);
        assert_eq!(host.failed_open(), vec![instance.key.clone()]);

        eventually(|| instance.is_open()).await;
        assert!(host.failed_open().is_empty());

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_initial_scan_binds_configs_and_library_delete_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");
        let cfg = dir.path().join("cfg");
        std::fs::create_dir_all(&lib).unwrap();
        std::fs::create_dir_all(&cfg).unwrap();
        std::fs::write(lib.join("Snet.Mq.Builtin.dll"), b"").unwrap();
        std::fs::write(lib.join("Test.Mq"), b"").unwrap();
        std::fs::write(cfg.join(format!("{}.m1.config.json", builtin::MEMORY_BACKEND)), r#"{"Capacity": 10}"#)
            .unwrap();
        std::fs::write(cfg.join(format!("{}.s1.config.json", RECORDING)), r#"{"SN": "other"}"#).unwrap();
        std::fs::write(cfg.join("Unknown.Type.1.config.json"), "{}").unwrap();

        let host = host_in(dir.path());
        host.start().await;

        assert!(host.types().contains(&builtin::MEMORY_BACKEND.to_string()));
        assert!(host.types().contains(&RECORDING.to_string()));
        assert_eq!(
            host.instance_state(&instance_key(builtin::MEMORY_BACKEND, "m1")),
            Some(InstanceState::Open)
        );
        assert_eq!(
            host.instance_state(&instance_key(RECORDING, "s1")),
            Some(InstanceState::Open)
        );

        host.on_library_deleted(&lib.join("Snet.Mq.Builtin.dll")).await;
        assert!(host.types().iter().all(|t| !t.starts_with("Snet.Mq.Builtin")));
        assert_eq!(host.instance_state(&instance_key(builtin::MEMORY_BACKEND, "m1")), None);
        assert!(host.instance_state(&instance_key(RECORDING, "s1")).is_some());

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_deferred_config_binds_when_type_arrives() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        let cfg = dir.path().join("cfg");
        std::fs::create_dir_all(&cfg).unwrap();
        let path = cfg.join(format!("{}.d1.config.json", builtin::MEMORY_BACKEND));
        std::fs::write(&path, "{}").unwrap();

        host.on_config_created(&path).await;
        assert!(host.instances().is_empty());

        for export in builtin::register() {
            host.register_type(builtin::MODULE_ID, export);
        }
        host.bind_pending(builtin::MEMORY_BACKEND).await;
        assert_eq!(host.instances().len(), 1);

        host.on_config_deleted(&path).await;
        assert!(host.instances().is_empty());
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_config_errors_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        register_recording(&host);
        let mut events = host.subscribe();
        let cfg = dir.path().join("cfg");
        std::fs::create_dir_all(&cfg).unwrap();

        let garbage = cfg.join(format!("{}.g1.config.json", RECORDING));
        std::fs::write(&garbage, "{not json").unwrap();
        host.on_config_created(&garbage).await;

        let broken = cfg.join("Test.Mq.Broken.b1.config.json");
        std::fs::write(&broken, "{}").unwrap();
        host.on_config_created(&broken).await;

        let mut failures = 0;
        while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            if matches!(event, HostEvent::ConfigFailed { .. }) {
                failures += 1;
            }
        }
        assert_eq!(failures, 2);
        assert!(host.instances().is_empty());
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_half_written_config_is_reread_before_failing() {
        let dir = tempfile::tempdir().unwrap();
        let options = HostOptions::new(dir.path().join("lib"), dir.path().join("cfg"))
            .with_config_retries(5, Duration::from_millis(200))
            .with_workers(2)
            .with_watch(false);
        let host = PluginHost::new(options, loader());
        register_recording(&host);
        let mut events = host.subscribe();
        let cfg = dir.path().join("cfg");
        std::fs::create_dir_all(&cfg).unwrap();

        let path = cfg.join(format!("{}.r1.config.json", RECORDING));
        std::fs::write(&path, "").unwrap();
        let writer = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                std::fs::write(&path, "{}").unwrap();
            })
        };

        host.on_config_created(&path).await;
        writer.await.unwrap();

        let key = instance_key(RECORDING, "r1");
        eventually(|| host.instance_state(&key) == Some(InstanceState::Open)).await;
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, HostEvent::ConfigFailed { .. }), "{:?}", event);
        }
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_unregister_tolerates_concurrent_removal() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        register_recording(&host);
        host.create_instance(RECORDING, "c1", serde_json::json!({})).await.unwrap();
        host.create_instance(RECORDING, "c2", serde_json::json!({})).await.unwrap();
        let key = instance_key(RECORDING, "c1");

        let (removed, direct) = tokio::join!(
            host.unregister_types_matching("Test.Mq"),
            host.remove_instance(&key)
        );

        assert!(removed.contains(&RECORDING.to_string()));
        assert!(matches!(direct, Ok(()) | Err(HostError::InstanceNotFound(_))));
        assert!(host.instances().is_empty());
        assert!(host.types().iter().all(|t| !t.starts_with("Test.Mq")));
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_and_shutdown_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        register_recording(&host);

        host.create_instance(RECORDING, "x", serde_json::json!({})).await.unwrap();
        let dup = host.create_instance(RECORDING, "x", serde_json::json!({})).await;
        assert!(matches!(dup, Err(HostError::InstanceExists(_))));
        let missing = host.create_instance("No.Such", "1", serde_json::json!({})).await;
        assert!(matches!(missing, Err(HostError::TypeNotRegistered(_))));

        host.shutdown().await;
        host.shutdown().await;
        assert!(host.instances().is_empty());
        assert!(matches!(
            host.produce("t", "late", Vec::new()).await,
            Err(HostError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn test_watcher_picks_up_new_config() {
        let dir = tempfile::tempdir().unwrap();
        let options = HostOptions::new(dir.path().join("lib"), dir.path().join("cfg"))
            .with_debounce(Duration::from_millis(10))
            .with_config_retries(3, Duration::from_millis(20));
        let host = PluginHost::new(options, loader());
        for export in builtin::register() {
            host.register_type(builtin::MODULE_ID, export);
        }
        host.start().await;

        let key = instance_key(builtin::MEMORY_BACKEND, "w1");
        let path = dir
            .path()
            .join("cfg")
            .join(format!("{}.config.json", key));
        std::fs::write(&path, "{}").unwrap();

        eventually(|| host.instance_state(&key) == Some(InstanceState::Open)).await;

        std::fs::remove_file(&path).unwrap();
        eventually(|| host.instance_state(&key).is_none()).await;

        host.shutdown().await;
    }
}
