use std::{fmt, future::Future, io};

use crate::rpc::{CorrelationId, DebugTrigger, ModuleConfig, ScriptContent};

#[derive(Debug)]
pub enum StoreError {
    Transport(String),
    Status { status: u16, body: String },
    Decode(String),
    Rejected(String),
    Io(io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Transport(message) => write!(f, "rpc transport error: {message}"),
            StoreError::Status { status, body } if body.trim().is_empty() => {
                write!(f, "rpc endpoint returned status {status}")
            }
            StoreError::Status { status, body } => {
                write!(f, "rpc endpoint returned status {status}: {}", body.trim())
            }
            StoreError::Decode(message) => write!(f, "invalid rpc payload: {message}"),
            StoreError::Rejected(message) => write!(f, "{message}"),
            StoreError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err)
    }
}

/// Remote owner of the action scripts.
pub trait ScriptStore: Send + Sync {
    fn module_config(&self) -> impl Future<Output = Result<ModuleConfig, StoreError>> + Send;

    fn get_script(
        &self,
        script: &str,
    ) -> impl Future<Output = Result<ScriptContent, StoreError>> + Send;

    fn save_script(
        &self,
        script: &str,
        editor: &str,
        header: &str,
        code: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete_script(&self, script: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn disable_script(
        &self,
        script: &str,
        disabled: bool,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn rename_script(
        &self,
        old_script: &str,
        new_script: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns the correlation id that tags the run's notifications.
    fn run_script_for_debug(
        &self,
        script: &str,
        trigger: Option<&DebugTrigger>,
    ) -> impl Future<Output = Result<CorrelationId, StoreError>> + Send;

    fn upload_script(
        &self,
        file_name: &str,
        content: Vec<u8>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn download_script(
        &self,
        script: &str,
    ) -> impl Future<Output = Result<Vec<u8>, StoreError>> + Send;
}
