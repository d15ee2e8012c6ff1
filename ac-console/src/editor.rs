use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use rpc_abi::DEFAULT_EDITOR;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    debug_session::{DebugSession, DebugSessionError, DebugSessionManager, DebugSessionStatus},
    logging::category_debug,
    notification::{SharedNotificationChannel, Subscription},
    rpc::{DebugTrigger, Notification},
    script::{ScriptNameError, validate_rename},
    store::{ScriptStore, StoreError},
};

#[derive(Debug)]
pub enum EditorError {
    Store(StoreError),
    Name(ScriptNameError),
    Debug(DebugSessionError),
}

impl fmt::Display for EditorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditorError::Store(err) => write!(f, "{err}"),
            EditorError::Name(err) => write!(f, "{err}"),
            EditorError::Debug(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for EditorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EditorError::Store(err) => Some(err),
            EditorError::Name(err) => Some(err),
            EditorError::Debug(err) => Some(err),
        }
    }
}

impl From<StoreError> for EditorError {
    fn from(err: StoreError) -> Self {
        EditorError::Store(err)
    }
}

impl From<ScriptNameError> for EditorError {
    fn from(err: ScriptNameError) -> Self {
        EditorError::Name(err)
    }
}

impl From<DebugSessionError> for EditorError {
    fn from(err: DebugSessionError) -> Self {
        EditorError::Debug(err)
    }
}

/// Editing context of one script: its buffer plus the debug session that runs it.
pub struct ScriptEditor<S: ScriptStore> {
    store: Arc<S>,
    channel: SharedNotificationChannel,
    manager: Arc<DebugSessionManager>,
    script: String,
    editor_mode: String,
    header: String,
    code: String,
    modified: Arc<AtomicBool>,
    idle_timeout: Option<Duration>,
    pump: Option<JoinHandle<()>>,
}

impl<S: ScriptStore> ScriptEditor<S> {
    pub async fn open(
        store: Arc<S>,
        channel: SharedNotificationChannel,
        script: &str,
        idle_timeout: Option<Duration>,
    ) -> Result<Self, EditorError> {
        let content = store.get_script(script).await?;
        debug!(
            "{} opened script={script} code_bytes={}",
            category_debug(),
            content.code.len()
        );
        Ok(Self {
            store,
            channel,
            manager: Arc::new(DebugSessionManager::new()),
            script: script.to_string(),
            editor_mode: content
                .editor
                .unwrap_or_else(|| DEFAULT_EDITOR.to_string()),
            header: content.header,
            code: content.code,
            modified: Arc::new(AtomicBool::new(false)),
            idle_timeout,
            pump: None,
        })
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn editor_mode(&self) -> &str {
        &self.editor_mode
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn set_code(&mut self, code: impl Into<String>) {
        self.code = code.into();
        self.modified.store(true, Ordering::Release);
    }

    pub fn set_header(&mut self, header: impl Into<String>) {
        self.header = header.into();
        self.modified.store(true, Ordering::Release);
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    pub async fn save(&self) -> Result<(), EditorError> {
        self.store
            .save_script(&self.script, DEFAULT_EDITOR, &self.header, &self.code)
            .await?;
        self.modified.store(false, Ordering::Release);
        Ok(())
    }

    /// Saves the buffer, renames the script and switches to the new name.
    pub async fn save_as(&mut self, new_name: &str) -> Result<String, EditorError> {
        let target = validate_rename(&self.script, new_name)?;
        self.save().await?;
        self.store.rename_script(&self.script, &target).await?;
        info!(
            "{} renamed script {} -> {target}",
            category_debug(),
            self.script
        );
        self.script = target.clone();
        Ok(target)
    }

    pub async fn debug(&mut self) -> Result<DebugSession, EditorError> {
        self.debug_with_trigger(None).await
    }

    pub async fn debug_with_trigger(
        &mut self,
        trigger: Option<DebugTrigger>,
    ) -> Result<DebugSession, EditorError> {
        self.stop_pump();

        let save = {
            let store = Arc::clone(&self.store);
            let modified = Arc::clone(&self.modified);
            let script = self.script.clone();
            let header = self.header.clone();
            let code = self.code.clone();
            move || async move {
                store
                    .save_script(&script, DEFAULT_EDITOR, &header, &code)
                    .await?;
                modified.store(false, Ordering::Release);
                Ok::<(), StoreError>(())
            }
        };
        let run = {
            let store = Arc::clone(&self.store);
            let script = self.script.clone();
            move || async move { store.run_script_for_debug(&script, trigger.as_ref()).await }
        };

        let session = self
            .manager
            .start_run(&self.script, self.is_modified(), save, run)
            .await?;

        if let Some(correlation_id) = session.correlation_id.clone() {
            let subscription = self.channel.subscribe(correlation_id);
            self.pump = Some(spawn_pump(
                Arc::clone(&self.manager),
                subscription,
                self.idle_timeout,
            ));
        }
        Ok(session)
    }

    pub fn debugging(&self) -> bool {
        self.manager.is_running()
    }

    pub fn session(&self) -> DebugSession {
        self.manager.snapshot()
    }

    pub fn manager(&self) -> &Arc<DebugSessionManager> {
        &self.manager
    }

    /// Resolves once the current session is no longer running.
    pub async fn wait_for_completion(&self) -> DebugSession {
        let mut updates = self.manager.watch();
        loop {
            let session = self.manager.snapshot();
            if session.status != DebugSessionStatus::Running {
                return session;
            }
            if updates.changed().await.is_err() {
                return self.manager.snapshot();
            }
        }
    }

    /// Leaves the editor; notifications still in flight are discarded.
    pub fn close(&mut self) {
        self.stop_pump();
        self.manager.reset();
        debug!("{} closed editor script={}", category_debug(), self.script);
    }

    fn stop_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl<S: ScriptStore> Drop for ScriptEditor<S> {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

fn spawn_pump(
    manager: Arc<DebugSessionManager>,
    mut subscription: Subscription,
    idle_timeout: Option<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let correlation_id = subscription.correlation_id().clone();
        loop {
            let next = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, subscription.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        info!(
                            "{} no events for {}ms, expiring correlation_id={correlation_id}",
                            category_debug(),
                            limit.as_millis()
                        );
                        manager.expire(&correlation_id);
                        break;
                    }
                },
                None => subscription.recv().await,
            };

            match next {
                Some(Notification::Output {
                    correlation_id,
                    payload,
                }) => {
                    let applied = manager.on_output(&correlation_id, payload).is_applied();
                    if !applied && !manager.is_current(&correlation_id) {
                        break;
                    }
                }
                Some(Notification::End { correlation_id }) => {
                    manager.on_end(&correlation_id);
                    break;
                }
                None => break,
            }
        }
    })
}
