mod catalog;
mod config;
mod debug_session;
mod editor;
mod event_poller;
mod http_store;
mod logging;
mod notification;
mod rpc;
mod script;
mod store;

pub use rpc_abi::{
    COMMAND_COUNT, COMMANDS, DEFAULT_EDITOR, EVENT_DEBUG_END, EVENT_DEBUG_MESSAGE, MODULE_NAME,
    RPC_VERSION, RpcCommand, SCRIPT_EXTENSION, command_by_index, command_by_name, rpc_json,
};

pub use catalog::{CatalogError, ScriptCatalog};
pub use config::{
    ConfigError, ConsoleConfig, ENV_DEBUG_IDLE_TIMEOUT_MS, ENV_POLL_MS, ENV_RPC_TIMEOUT_MS,
    ENV_URL, MAX_INTERVAL_MS, MIN_INTERVAL_MS, normalize_base_url, parse_ms, sanitize_interval,
};
pub use debug_session::{
    DebugSession, DebugSessionError, DebugSessionManager, DebugSessionMetrics,
    DebugSessionStatus, EndReason, EventDisposition, OutputRecord, StaleReason, StartFailure,
};
pub use editor::{EditorError, ScriptEditor};
pub use event_poller::{
    DispatchSummary, EventPollerConfig, dispatch_events, run_event_poller, spawn_event_poller,
};
pub use http_store::HttpScriptStore;
pub use logging::{init as init_logging, level_label};
pub use notification::{
    ChannelMetrics, Delivery, NotificationChannel, SharedNotificationChannel, Subscription,
};
pub use rpc::{
    CorrelationId, DebugLevel, DebugOutput, DebugRunAccepted, DebugTrigger, DownloadTicket,
    EnvelopeSkip, EventEnvelope, EventPollRequest, EventPollResponse, ModuleConfig, Notification,
    PollRegistration, RpcRequest, RpcResponse, ScriptContent, ScriptSummary,
};
pub use script::{ScriptNameError, has_script_extension, normalize_script_name, validate_rename};
pub use store::{ScriptStore, StoreError};
