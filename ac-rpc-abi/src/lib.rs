#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RpcCommand {
    pub index: u16,
    pub name: &'static str,
    pub params: &'static [&'static str],
}

pub const RPC_VERSION: u16 = 2;

pub const MODULE_NAME: &str = "actions";
pub const SCRIPT_EXTENSION: &str = ".py";
pub const DEFAULT_EDITOR: &str = "manual";

pub const EVENT_DEBUG_MESSAGE: &str = "actions.debug.message";
pub const EVENT_DEBUG_END: &str = "actions.debug.end";

pub const CMD_GET_MODULE_CONFIG: u16 = 0;
pub const CMD_GET_SCRIPT: u16 = 1;
pub const CMD_SAVE_SCRIPT: u16 = 2;
pub const CMD_DELETE_SCRIPT: u16 = 3;
pub const CMD_DISABLE_SCRIPT: u16 = 4;
pub const CMD_RENAME_SCRIPT: u16 = 5;
pub const CMD_DEBUG_SCRIPT: u16 = 6;
pub const CMD_DOWNLOAD_SCRIPT: u16 = 7;
pub const CMD_ADD_SCRIPT: u16 = 8;

pub const COMMANDS: [RpcCommand; 9] = [
    RpcCommand {
        index: CMD_GET_MODULE_CONFIG,
        name: "get_module_config",
        params: &[],
    },
    RpcCommand {
        index: CMD_GET_SCRIPT,
        name: "get_script",
        params: &["script"],
    },
    RpcCommand {
        index: CMD_SAVE_SCRIPT,
        name: "save_script",
        params: &["script", "editor", "header", "code"],
    },
    RpcCommand {
        index: CMD_DELETE_SCRIPT,
        name: "delete_script",
        params: &["script"],
    },
    RpcCommand {
        index: CMD_DISABLE_SCRIPT,
        name: "disable_script",
        params: &["script", "disabled"],
    },
    RpcCommand {
        index: CMD_RENAME_SCRIPT,
        name: "rename_script",
        params: &["old_script", "new_script"],
    },
    RpcCommand {
        index: CMD_DEBUG_SCRIPT,
        name: "debug_script",
        params: &["script", "event_name", "event_values"],
    },
    RpcCommand {
        index: CMD_DOWNLOAD_SCRIPT,
        name: "download_script",
        params: &["script"],
    },
    // Sent as a multipart upload rather than through the command endpoint.
    RpcCommand {
        index: CMD_ADD_SCRIPT,
        name: "add_script",
        params: &["filepath"],
    },
];

pub const COMMAND_COUNT: u16 = COMMANDS.len() as u16;

fn commands_by_name() -> &'static std::collections::HashMap<&'static str, &'static RpcCommand> {
    static LOOKUP: std::sync::OnceLock<
        std::collections::HashMap<&'static str, &'static RpcCommand>,
    > = std::sync::OnceLock::new();
    LOOKUP.get_or_init(|| {
        let mut map = std::collections::HashMap::with_capacity(COMMANDS.len());
        for command in COMMANDS.iter() {
            map.insert(command.name, command);
        }
        map
    })
}

pub fn command_by_index(index: u16) -> Option<&'static RpcCommand> {
    COMMANDS.get(index as usize)
}

pub fn command_by_name(name: &str) -> Option<&'static RpcCommand> {
    commands_by_name().get(name).copied()
}

pub fn command_name(index: u16) -> &'static str {
    command_by_index(index)
        .map(|command| command.name)
        .unwrap_or("unknown")
}

pub fn is_debug_event(event: &str) -> bool {
    event == EVENT_DEBUG_MESSAGE || event == EVENT_DEBUG_END
}

pub fn rpc_json() -> &'static str {
    include_str!("../rpc.json")
}
