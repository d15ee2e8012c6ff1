use std::{env, future::Future, path::PathBuf, sync::Arc};

use actions::{
    ConsoleConfig, DebugOutput, DebugSessionManager, DebugSessionStatus, EndReason, EventPollerConfig, HttpScriptStore,
    NotificationChannel, OutputRecord, ScriptCatalog, ScriptEditor, init_logging, level_label,
    spawn_event_poller,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = match parse_cli_args() {
        Ok(CliAction::Run(cli)) => *cli,
        Ok(CliAction::Help) => {
            print_cli_help();
            return Ok(());
        }
        Ok(CliAction::Version) => {
            println!("{}", binary_version_text());
            return Ok(());
        }
        Err(err) => {
            eprintln!("error: {err}\n");
            print_cli_help();
            return Err(err.into());
        }
    };

    init_logging()?;

    let mut config = ConsoleConfig::from_env()?;
    if let Some(url) = cli.url.as_deref() {
        config.set_base_url("--url", url)?;
    }
    if let Some(value) = cli.poll_interval_ms {
        config.poll_interval_ms = value;
    }
    if let Some(value) = cli.rpc_timeout_ms {
        config.request_timeout_ms = value;
    }
    if let Some(value) = cli.debug_idle_timeout_ms {
        config.debug_idle_timeout_ms = value;
    }

    let client = reqwest::Client::builder().build()?;
    let store = Arc::new(HttpScriptStore::new(client.clone(), &config));
    let catalog = ScriptCatalog::new(Arc::clone(&store));

    match cli.command {
        Command::List => {
            for script in catalog.refresh().await? {
                let state = if script.disabled { "disabled" } else { "enabled" };
                let last = script
                    .last_execution
                    .map(|at| at.to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!("{:<32} {state:<8} last_execution={last}", script.name);
            }
        }
        Command::Show { script } => {
            let editor =
                ScriptEditor::open(store, NotificationChannel::new(), &script, None).await?;
            println!("# {} ({})", editor.script(), editor.editor_mode());
            if !editor.header().is_empty() {
                println!("{}", editor.header());
            }
            println!("{}", editor.code());
        }
        Command::Create { name } => {
            let script = catalog.create(&name).await?;
            println!("created {script}");
        }
        Command::Save { script, file } => {
            let code = tokio::fs::read_to_string(&file).await?;
            let mut editor =
                ScriptEditor::open(store, NotificationChannel::new(), &script, None).await?;
            editor.set_code(code);
            editor.save().await?;
            println!("saved {script}");
        }
        Command::Delete { script } => {
            catalog.delete(&script).await?;
            println!("deleted {script}");
        }
        Command::Enable { script } => {
            catalog.set_disabled(&script, false).await?;
            println!("enabled {script}");
        }
        Command::Disable { script } => {
            catalog.set_disabled(&script, true).await?;
            println!("disabled {script}");
        }
        Command::Rename { old, new } => {
            let target = catalog.rename(&old, &new).await?;
            println!("renamed {old} -> {target}");
        }
        Command::Upload { file } => {
            let script = catalog.upload(&file).await?;
            println!("uploaded {script}");
        }
        Command::Download { script, destination } => {
            let bytes = catalog.download(&script, &destination).await?;
            println!("wrote {bytes} bytes to {}", destination.display());
        }
        Command::Debug { script, file } => {
            run_debug(client, store, &config, &script, file).await?;
        }
    }

    Ok(())
}

async fn run_debug(
    client: reqwest::Client,
    store: Arc<HttpScriptStore>,
    config: &ConsoleConfig,
    script: &str,
    file: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let channel = NotificationChannel::new();
    let poller = spawn_event_poller(
        client,
        Arc::clone(&channel),
        EventPollerConfig {
            base_url: config.base_url.clone(),
            poll_interval_ms: config.poll_interval_ms,
            request_timeout_ms: config.request_timeout_ms,
        },
    );

    let mut editor =
        ScriptEditor::open(store, channel, script, config.debug_idle_timeout()).await?;
    if let Some(path) = file {
        editor.set_code(tokio::fs::read_to_string(&path).await?);
    }

    let started = editor.debug().await;
    let session = match started {
        Ok(session) => session,
        Err(err) => {
            poller.abort();
            return Err(err.into());
        }
    };
    if let Some(correlation_id) = session.correlation_id.as_ref() {
        info!("debugging {script} correlation_id={correlation_id}");
    }

    let manager = Arc::clone(editor.manager());
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let (end, printed) = stream_session_output(&manager, interrupt, print_output).await;
    if end == StreamEnd::Interrupted {
        warn!("interrupted, discarding debug session for {script}");
        editor.close();
    }
    poller.abort();

    let session = editor.session();
    match (session.status, session.end_reason) {
        (DebugSessionStatus::Completed, Some(EndReason::TimedOut)) => {
            eprintln!("debug run of {script} timed out waiting for events");
        }
        (DebugSessionStatus::Completed, _) => {
            eprintln!("debug run of {script} finished ({printed} messages)");
        }
        _ => {}
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StreamEnd {
    Finished,
    Interrupted,
}

/// Emits session output as it is applied until the run leaves `running` or
/// `shutdown` resolves. Returns how the stream ended and the records emitted.
async fn stream_session_output(
    manager: &DebugSessionManager,
    shutdown: impl Future<Output = ()>,
    mut emit: impl FnMut(&OutputRecord),
) -> (StreamEnd, usize) {
    let mut updates = manager.watch();
    let mut emitted = 0;
    tokio::pin!(shutdown);
    loop {
        for record in manager.output_since(emitted) {
            emit(&record);
            emitted += 1;
        }
        if !manager.is_running() {
            return (StreamEnd::Finished, emitted);
        }
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    return (StreamEnd::Finished, emitted);
                }
            }
            () = &mut shutdown => return (StreamEnd::Interrupted, emitted),
        }
    }
}

fn print_output(record: &OutputRecord) {
    match DebugOutput::from_payload(&record.payload) {
        Some(output) => println!(
            "{} [{}] {}",
            output.timestamp,
            level_label(output.level.as_str()),
            output.message
        ),
        None => println!("{}", record.payload),
    }
}

#[derive(Clone, Debug)]
enum Command {
    List,
    Show { script: String },
    Create { name: String },
    Save { script: String, file: PathBuf },
    Delete { script: String },
    Enable { script: String },
    Disable { script: String },
    Rename { old: String, new: String },
    Upload { file: PathBuf },
    Download { script: String, destination: PathBuf },
    Debug { script: String, file: Option<PathBuf> },
}

#[derive(Clone, Debug)]
struct CliArgs {
    url: Option<String>,
    poll_interval_ms: Option<u64>,
    rpc_timeout_ms: Option<u64>,
    debug_idle_timeout_ms: Option<u64>,
    command: Command,
}

enum CliAction {
    Run(Box<CliArgs>),
    Help,
    Version,
}

fn parse_cli_args() -> Result<CliAction, String> {
    let mut args = env::args().skip(1).peekable();
    let mut url = None;
    let mut poll_interval_ms = None;
    let mut rpc_timeout_ms = None;
    let mut debug_idle_timeout_ms = None;
    let mut file = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliAction::Help),
            "-V" | "--version" => return Ok(CliAction::Version),
            "--url" => url = Some(next_arg_value("--url", &mut args)?),
            "--poll-interval-ms" => {
                poll_interval_ms = Some(next_ms_value("--poll-interval-ms", &mut args)?);
            }
            "--rpc-timeout-ms" => {
                rpc_timeout_ms = Some(next_ms_value("--rpc-timeout-ms", &mut args)?);
            }
            "--debug-idle-timeout-ms" => {
                debug_idle_timeout_ms = Some(next_ms_value("--debug-idle-timeout-ms", &mut args)?);
            }
            "--file" => file = Some(PathBuf::from(next_arg_value("--file", &mut args)?)),
            _ if arg.starts_with('-') => return Err(format!("unknown argument: {arg}")),
            _ => positional.push(arg),
        }
    }

    let command = parse_command(positional, file)?;
    Ok(CliAction::Run(Box::new(CliArgs {
        url,
        poll_interval_ms,
        rpc_timeout_ms,
        debug_idle_timeout_ms,
        command,
    })))
}

fn parse_command(positional: Vec<String>, file: Option<PathBuf>) -> Result<Command, String> {
    let mut words = positional.into_iter();
    let Some(name) = words.next() else {
        return Err("missing command".to_string());
    };
    let rest: Vec<String> = words.collect();
    if file.is_some() && name != "debug" {
        return Err("--file is only valid with the debug command".to_string());
    }

    let command = match (name.as_str(), rest.as_slice()) {
        ("list", []) => Command::List,
        ("show", [script]) => Command::Show {
            script: script.clone(),
        },
        ("create", [script]) => Command::Create { name: script.clone() },
        ("save", [script, path]) => Command::Save {
            script: script.clone(),
            file: PathBuf::from(path),
        },
        ("delete", [script]) => Command::Delete {
            script: script.clone(),
        },
        ("enable", [script]) => Command::Enable {
            script: script.clone(),
        },
        ("disable", [script]) => Command::Disable {
            script: script.clone(),
        },
        ("rename", [old, new]) => Command::Rename {
            old: old.clone(),
            new: new.clone(),
        },
        ("upload", [path]) => Command::Upload {
            file: PathBuf::from(path),
        },
        ("download", [script, path]) => Command::Download {
            script: script.clone(),
            destination: PathBuf::from(path),
        },
        ("debug", [script]) => Command::Debug {
            script: script.clone(),
            file,
        },
        (
            "list" | "show" | "create" | "save" | "delete" | "enable" | "disable" | "rename"
            | "upload" | "download" | "debug",
            _,
        ) => return Err(format!("wrong number of arguments for {name}")),
        _ => return Err(format!("unknown command: {name}")),
    };
    Ok(command)
}

fn next_arg_value(
    flag: &str,
    args: &mut std::iter::Peekable<impl Iterator<Item = String>>,
) -> Result<String, String> {
    let value = args
        .next()
        .ok_or_else(|| format!("missing value for {flag}"))?;
    if value.trim().is_empty() {
        return Err(format!("value for {flag} cannot be empty"));
    }
    Ok(value)
}

fn next_ms_value(
    flag: &str,
    args: &mut std::iter::Peekable<impl Iterator<Item = String>>,
) -> Result<u64, String> {
    let value = next_arg_value(flag, args)?;
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid {flag}: {value}"))
}

fn print_cli_help() {
    eprintln!(concat!(
        "Usage: ac-console [options] <command> [args]\n\n",
        "Commands:\n",
        "  list                                List scripts of the actions module\n",
        "  show <script>                       Print a script's header and code\n",
        "  create <name>                       Create an empty script (.py appended)\n",
        "  save <script> <file>                Replace a script's code with a local file\n",
        "  delete <script>                     Delete a script\n",
        "  enable <script>                     Enable a script\n",
        "  disable <script>                    Disable a script\n",
        "  rename <old> <new>                  Rename a script\n",
        "  upload <file>                       Upload a local .py file\n",
        "  download <script> <dest>            Download a script to a local file\n",
        "  debug <script> [--file <path>]      Run a script in debug mode and stream its output\n\n",
        "Options:\n",
        "  --url <URL>                         Backend base url (env AC_CONSOLE_URL, default http://127.0.0.1)\n",
        "  --poll-interval-ms <MS>             Event poll interval (env AC_CONSOLE_POLL_MS, default 1000)\n",
        "  --rpc-timeout-ms <MS>               RPC timeout (env AC_CONSOLE_RPC_TIMEOUT_MS, default 5000)\n",
        "  --debug-idle-timeout-ms <MS>        End a silent debug run after MS, 0 disables (default 300000)\n",
        "  -V, --version                       Show version with git metadata\n",
        "  -h, --help                          Show this help\n"
    ));
}

fn binary_version_text() -> String {
    let binary = env!("CARGO_PKG_NAME");
    let git_tag = option_env!("AC_BUILD_GIT_TAG").unwrap_or("untagged");
    let git_commit = option_env!("AC_BUILD_GIT_COMMIT").unwrap_or("unknown");
    let dirty = matches!(
        option_env!("AC_BUILD_GIT_DIRTY").unwrap_or("false"),
        "true" | "1" | "yes" | "dirty"
    );

    if dirty {
        format!("{binary} {git_tag} (dirty commit: {git_commit})")
    } else {
        format!("{binary} {git_tag}")
    }
}
