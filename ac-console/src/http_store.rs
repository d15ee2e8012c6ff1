use std::time::Duration;

use reqwest::multipart::{Form, Part};
use rpc_abi::{
    CMD_ADD_SCRIPT, CMD_DEBUG_SCRIPT, CMD_DELETE_SCRIPT, CMD_DISABLE_SCRIPT, CMD_DOWNLOAD_SCRIPT,
    CMD_GET_MODULE_CONFIG, CMD_GET_SCRIPT, CMD_RENAME_SCRIPT, CMD_SAVE_SCRIPT, command_name,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{
    config::ConsoleConfig,
    logging::category_rpc,
    rpc::{
        CorrelationId, DebugRunAccepted, DebugTrigger, DownloadTicket, ModuleConfig, RpcRequest,
        RpcResponse, ScriptContent,
    },
    store::{ScriptStore, StoreError},
};

/// `ScriptStore` speaking the backend's JSON command protocol.
#[derive(Clone)]
pub struct HttpScriptStore {
    client: reqwest::Client,
    base_url: String,
    module: String,
    request_timeout: Duration,
}

impl HttpScriptStore {
    pub fn new(client: reqwest::Client, config: &ConsoleConfig) -> Self {
        Self {
            client,
            base_url: config.normalized_base_url(),
            module: config.module.clone(),
            request_timeout: config.request_timeout(),
        }
    }

    pub fn with_base_url(client: reqwest::Client, base_url: &str) -> Self {
        let config = ConsoleConfig {
            base_url: base_url.to_string(),
            ..ConsoleConfig::default()
        };
        Self::new(client, &config)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_command(&self, command: u16, params: Value) -> Result<Value, StoreError> {
        let name = command_name(command);
        let request = RpcRequest {
            command: name.to_string(),
            to: self.module.clone(),
            params,
        };
        debug!("{} -> {name} to={}", category_rpc(), self.module);

        let response = self
            .client
            .post(format!("{}/command", self.base_url))
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                warn!("{} {name} transport error: {err}", category_rpc());
                StoreError::Transport(err.to_string())
            })?;

        read_envelope(name, response).await
    }

    async fn send_and_decode<T: DeserializeOwned>(
        &self,
        command: u16,
        params: Value,
    ) -> Result<T, StoreError> {
        let data = self.send_command(command, params).await?;
        serde_json::from_value(data)
            .map_err(|err| StoreError::Decode(format!("{}: {err}", command_name(command))))
    }
}

impl ScriptStore for HttpScriptStore {
    async fn module_config(&self) -> Result<ModuleConfig, StoreError> {
        self.send_and_decode(CMD_GET_MODULE_CONFIG, json!({})).await
    }

    async fn get_script(&self, script: &str) -> Result<ScriptContent, StoreError> {
        self.send_and_decode(CMD_GET_SCRIPT, json!({ "script": script }))
            .await
    }

    async fn save_script(
        &self,
        script: &str,
        editor: &str,
        header: &str,
        code: &str,
    ) -> Result<(), StoreError> {
        self.send_command(
            CMD_SAVE_SCRIPT,
            json!({ "script": script, "editor": editor, "header": header, "code": code }),
        )
        .await?;
        info!("{} saved script={script}", category_rpc());
        Ok(())
    }

    async fn delete_script(&self, script: &str) -> Result<(), StoreError> {
        self.send_command(CMD_DELETE_SCRIPT, json!({ "script": script }))
            .await
            .map(|_| ())
    }

    async fn disable_script(&self, script: &str, disabled: bool) -> Result<(), StoreError> {
        self.send_command(
            CMD_DISABLE_SCRIPT,
            json!({ "script": script, "disabled": disabled }),
        )
        .await
        .map(|_| ())
    }

    async fn rename_script(&self, old_script: &str, new_script: &str) -> Result<(), StoreError> {
        self.send_command(
            CMD_RENAME_SCRIPT,
            json!({ "old_script": old_script, "new_script": new_script }),
        )
        .await
        .map(|_| ())
    }

    async fn run_script_for_debug(
        &self,
        script: &str,
        trigger: Option<&DebugTrigger>,
    ) -> Result<CorrelationId, StoreError> {
        let params = match trigger {
            Some(trigger) => json!({
                "script": script,
                "event_name": trigger.event_name,
                "event_values": trigger.event_values,
            }),
            None => json!({ "script": script, "event_name": null, "event_values": null }),
        };
        let accepted: DebugRunAccepted = self.send_and_decode(CMD_DEBUG_SCRIPT, params).await?;
        info!(
            "{} debug run accepted script={script} correlation_id={}",
            category_rpc(),
            accepted.correlation_id
        );
        Ok(accepted.correlation_id)
    }

    async fn upload_script(&self, file_name: &str, content: Vec<u8>) -> Result<(), StoreError> {
        let size = content.len();
        let form = Form::new()
            .text("command", command_name(CMD_ADD_SCRIPT))
            .text("to", self.module.clone())
            .part("file", Part::bytes(content).file_name(file_name.to_string()));

        let response = self
            .client
            .post(format!("{}/upload", self.base_url))
            .timeout(self.request_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        read_envelope(command_name(CMD_ADD_SCRIPT), response).await?;
        info!(
            "{} uploaded file={file_name} bytes={size}",
            category_rpc()
        );
        Ok(())
    }

    async fn download_script(&self, script: &str) -> Result<Vec<u8>, StoreError> {
        let ticket: DownloadTicket = self
            .send_and_decode(CMD_DOWNLOAD_SCRIPT, json!({ "script": script }))
            .await?;

        let response = self
            .client
            .get(format!("{}/download", self.base_url))
            .timeout(self.request_timeout)
            .query(&[("filepath", ticket.filepath.as_str())])
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

async fn read_envelope(command: &str, response: reqwest::Response) -> Result<Value, StoreError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(
            "{} {command} rejected with status {status}",
            category_rpc()
        );
        return Err(StoreError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let envelope = response
        .json::<RpcResponse>()
        .await
        .map_err(|err| StoreError::Decode(format!("{command}: {err}")))?;
    if envelope.error {
        let message = envelope
            .message
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| format!("{command} failed"));
        warn!("{} {command} failed: {message}", category_rpc());
        return Err(StoreError::Rejected(message));
    }
    Ok(envelope.data)
}
