#![allow(dead_code, unused_imports)]

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

pub use actions::{
    CorrelationId, DebugSession, DebugSessionStatus, DebugTrigger, ModuleConfig, Notification,
    NotificationChannel, ScriptContent, ScriptStore, ScriptSummary, StoreError,
};
use serde_json::json;
use uuid::Uuid;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoredScript {
    pub editor: String,
    pub header: String,
    pub code: String,
    pub disabled: bool,
}

/// In-process stand-in for the backend's script storage.
#[derive(Default)]
pub struct MemoryScriptStore {
    scripts: Mutex<BTreeMap<String, StoredScript>>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    last_trigger: Mutex<Option<DebugTrigger>>,
    early_events: Mutex<Option<Arc<NotificationChannel>>>,
    pub fail_save: AtomicBool,
    pub fail_run: AtomicBool,
    pub save_calls: AtomicU64,
    pub run_calls: AtomicU64,
    pub rename_calls: AtomicU64,
}

impl MemoryScriptStore {
    pub fn with_script(name: &str, code: &str) -> Self {
        let store = Self::default();
        store.insert(name, code);
        store
    }

    pub fn insert(&self, name: &str, code: &str) {
        self.scripts.lock().expect("store lock").insert(
            name.to_string(),
            StoredScript {
                editor: "manual".to_string(),
                code: code.to_string(),
                ..StoredScript::default()
            },
        );
    }

    pub fn stored(&self, name: &str) -> Option<StoredScript> {
        self.scripts.lock().expect("store lock").get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.scripts.lock().expect("store lock").keys().cloned().collect()
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().expect("store lock").clone()
    }

    /// Makes every accepted run emit one output before its id is returned.
    pub fn emit_before_reply(&self, channel: Arc<NotificationChannel>) {
        *self.early_events.lock().expect("store lock") = Some(channel);
    }

    pub fn last_trigger(&self) -> Option<DebugTrigger> {
        self.last_trigger.lock().expect("store lock").clone()
    }

    fn missing(name: &str) -> StoreError {
        StoreError::Rejected(format!("script {name} does not exist"))
    }
}

impl ScriptStore for MemoryScriptStore {
    async fn module_config(&self) -> Result<ModuleConfig, StoreError> {
        let scripts = self
            .scripts
            .lock()
            .expect("store lock")
            .iter()
            .map(|(name, script)| ScriptSummary {
                name: name.clone(),
                last_execution: None,
                disabled: script.disabled,
            })
            .collect();
        Ok(ModuleConfig { scripts })
    }

    async fn get_script(&self, script: &str) -> Result<ScriptContent, StoreError> {
        let stored = self.stored(script).ok_or_else(|| Self::missing(script))?;
        Ok(ScriptContent {
            editor: Some(stored.editor),
            header: stored.header,
            code: stored.code,
        })
    }

    async fn save_script(
        &self,
        script: &str,
        editor: &str,
        header: &str,
        code: &str,
    ) -> Result<(), StoreError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("disk full".to_string()));
        }
        let mut scripts = self.scripts.lock().expect("store lock");
        let entry = scripts.entry(script.to_string()).or_default();
        entry.editor = editor.to_string();
        entry.header = header.to_string();
        entry.code = code.to_string();
        Ok(())
    }

    async fn delete_script(&self, script: &str) -> Result<(), StoreError> {
        self.scripts
            .lock()
            .expect("store lock")
            .remove(script)
            .map(|_| ())
            .ok_or_else(|| Self::missing(script))
    }

    async fn disable_script(&self, script: &str, disabled: bool) -> Result<(), StoreError> {
        let mut scripts = self.scripts.lock().expect("store lock");
        let entry = scripts.get_mut(script).ok_or_else(|| Self::missing(script))?;
        entry.disabled = disabled;
        Ok(())
    }

    async fn rename_script(&self, old_script: &str, new_script: &str) -> Result<(), StoreError> {
        self.rename_calls.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().expect("store lock");
        if scripts.contains_key(new_script) {
            return Err(StoreError::Rejected(format!(
                "script {new_script} already exists"
            )));
        }
        let stored = scripts
            .remove(old_script)
            .ok_or_else(|| Self::missing(old_script))?;
        scripts.insert(new_script.to_string(), stored);
        Ok(())
    }

    async fn run_script_for_debug(
        &self,
        script: &str,
        trigger: Option<&DebugTrigger>,
    ) -> Result<CorrelationId, StoreError> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_run.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("executor unavailable".to_string()));
        }
        if self.stored(script).is_none() {
            return Err(Self::missing(script));
        }
        *self.last_trigger.lock().expect("store lock") = trigger.cloned();
        let correlation_id = CorrelationId::new(Uuid::new_v4().to_string());
        if let Some(channel) = self.early_events.lock().expect("store lock").as_ref() {
            channel.publish(Notification::Output {
                correlation_id: correlation_id.clone(),
                payload: json!({ "message": "starting", "level": "DEBUG", "timestamp": 0 }),
            });
        }
        Ok(correlation_id)
    }

    async fn upload_script(&self, file_name: &str, content: Vec<u8>) -> Result<(), StoreError> {
        let code = String::from_utf8_lossy(&content).into_owned();
        self.uploads
            .lock()
            .expect("store lock")
            .push((file_name.to_string(), content));
        self.insert(file_name, &code);
        Ok(())
    }

    async fn download_script(&self, script: &str) -> Result<Vec<u8>, StoreError> {
        let stored = self.stored(script).ok_or_else(|| Self::missing(script))?;
        Ok(stored.code.into_bytes())
    }
}

pub fn unique_temp_path(test_name: &str, file_name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("ac-console-{test_name}-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("temp dir should be created");
    dir.join(file_name)
}

/// Polls `check` until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
