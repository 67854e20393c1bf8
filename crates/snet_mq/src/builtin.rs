//! Built-in backends
//!
//! Exported by the compiled-in module `Snet.Mq.Builtin`:
//!
//! - `Snet.Mq.Builtin.MemoryBackend`: in-process broker; messages produced
//!   on a consumed topic come back as [`HostEvent::Received`]
//! - `Snet.Mq.Builtin.FileBackend`: appends one JSON line per message to
//!   the file named by its `Path` config field

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::backend::{Backend, BackendContext, BackendError, ExportedType, BACKEND_INTERFACE};
use crate::event::{EventPublisher, HostEvent};
use crate::produce::Payload;
use crate::result::OperateResult;

pub const MODULE_ID: &str = "Snet.Mq.Builtin";
pub const MEMORY_BACKEND: &str = "Snet.Mq.Builtin.MemoryBackend";
pub const FILE_BACKEND: &str = "Snet.Mq.Builtin.FileBackend";

/// Registration function of the built-in module
pub fn register() -> Vec<ExportedType> {
    vec![
        ExportedType::backend(MEMORY_BACKEND, |ctx| {
            Ok(Arc::new(MemoryBackend::from_context(ctx)?) as Arc<dyn Backend>)
        }),
        ExportedType::backend(FILE_BACKEND, |ctx| {
            Ok(Arc::new(FileBackend::from_context(ctx)?) as Arc<dyn Backend>)
        }),
        ExportedType::abstract_type("Snet.Mq.Builtin.BackendBase", vec![BACKEND_INTERFACE.into()]),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Backend
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MemorySettings {
    #[serde(default = "default_capacity")]
    capacity: usize,
}

fn default_capacity() -> usize {
    1000
}

#[derive(Default)]
struct MemoryState {
    open: bool,
    subscriptions: HashSet<String>,
    messages: VecDeque<(String, Payload)>,
}

/// In-process broker keeping the most recent messages
pub struct MemoryBackend {
    key: String,
    capacity: usize,
    events: EventPublisher,
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn from_context(ctx: BackendContext) -> Result<Self, BackendError> {
        let settings: MemorySettings = ctx.parse_config()?;
        Ok(Self {
            key: ctx.key,
            capacity: settings.capacity.max(1),
            events: ctx.events,
            state: Mutex::new(MemoryState::default()),
        })
    }

    /// Recorded messages, oldest first
    pub fn messages(&self) -> Vec<(String, Payload)> {
        self.state.lock().messages.iter().cloned().collect()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn open(&self) -> OperateResult {
        self.state.lock().open = true;
        OperateResult::ok()
    }

    async fn close(&self, hard: bool) -> OperateResult {
        let mut state = self.state.lock();
        state.open = false;
        state.subscriptions.clear();
        if hard {
            state.messages.clear();
        }
        OperateResult::ok()
    }

    async fn status(&self) -> OperateResult {
        let state = self.state.lock();
        OperateResult::ok_with(serde_json::json!({
            "open": state.open,
            "messages": state.messages.len(),
            "subscriptions": state.subscriptions.iter().collect::<Vec<_>>(),
        }))
    }

    async fn produce(&self, topic: &str, payload: &Payload) -> OperateResult {
        let started = Instant::now();
        let subscribed = {
            let mut state = self.state.lock();
            if !state.open {
                return OperateResult::fail("not open").timed(started);
            }
            if state.messages.len() == self.capacity {
                state.messages.pop_front();
            }
            state.messages.push_back((topic.to_string(), payload.clone()));
            state.subscriptions.contains(topic)
        };

        if subscribed {
            self.events.publish(HostEvent::Received {
                key: self.key.clone(),
                topic: topic.to_string(),
                payload: payload.clone(),
            });
        }
        OperateResult::ok().timed(started)
    }

    async fn consume(&self, topic: &str) -> OperateResult {
        let mut state = self.state.lock();
        if !state.open {
            return OperateResult::fail("not open");
        }
        state.subscriptions.insert(topic.to_string());
        OperateResult::ok()
    }

    async fn unconsume(&self, topic: &str) -> OperateResult {
        if self.state.lock().subscriptions.remove(topic) {
            OperateResult::ok()
        } else {
            OperateResult::fail(format!("not consuming {}", topic))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Backend
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileSettings {
    path: PathBuf,
}

/// Appends produced messages to a JSON-lines file
pub struct FileBackend {
    key: String,
    path: PathBuf,
    file: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl FileBackend {
    pub fn from_context(ctx: BackendContext) -> Result<Self, BackendError> {
        let settings: FileSettings = ctx.parse_config()?;
        Ok(Self {
            key: ctx.key,
            path: settings.path,
            file: tokio::sync::Mutex::new(None),
        })
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn open(&self) -> OperateResult {
        let started = Instant::now();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return OperateResult::fail(e.to_string()).timed(started);
            }
        }
        match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
        {
            Ok(file) => {
                *self.file.lock().await = Some(file);
                info!(instance = %self.key, path = %self.path.display(), "File backend opened");
                OperateResult::ok().timed(started)
            }
            Err(e) => OperateResult::fail(e.to_string()).timed(started),
        }
    }

    async fn close(&self, _hard: bool) -> OperateResult {
        let mut guard = self.file.lock().await;
        if let Some(mut file) = guard.take() {
            if let Err(e) = file.flush().await {
                return OperateResult::fail(e.to_string());
            }
        }
        OperateResult::ok()
    }

    async fn status(&self) -> OperateResult {
        let open = self.file.lock().await.is_some();
        OperateResult::ok_with(serde_json::json!({
            "open": open,
            "path": self.path.display().to_string(),
        }))
    }

    async fn produce(&self, topic: &str, payload: &Payload) -> OperateResult {
        let started = Instant::now();
        let line = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "topic": topic,
            "payload": payload,
        });
        let mut text = line.to_string();
        text.push('\n');

        let mut guard = self.file.lock().await;
        let Some(file) = guard.as_mut() else {
            return OperateResult::fail("not open").timed(started);
        };
        if let Err(e) = file.write_all(text.as_bytes()).await {
            return OperateResult::fail(e.to_string()).timed(started);
        }
        if let Err(e) = file.flush().await {
            return OperateResult::fail(e.to_string()).timed(started);
        }
        debug!(instance = %self.key, topic, "Appended message");
        OperateResult::ok().timed(started)
    }

    async fn consume(&self, _topic: &str) -> OperateResult {
        OperateResult::fail("FileBackend does not support consume")
    }

    async fn unconsume(&self, _topic: &str) -> OperateResult {
        OperateResult::fail("FileBackend does not support consume")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
