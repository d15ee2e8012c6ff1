use owo_colors::OwoColorize;
use std::sync::OnceLock;
use supports_color::Stream;
use tracing_subscriber::EnvFilter;

static ANSI_ENABLED: OnceLock<bool> = OnceLock::new();

/// Installs the global subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let ansi = ansi_enabled();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(())
}

pub fn category_debug() -> String {
    paint("DEBUG", |label| format!("{}", label.bright_magenta().bold()))
}

pub fn category_rpc() -> String {
    paint("RPC", |label| format!("{}", label.bright_cyan().bold()))
}

pub fn category_event() -> String {
    paint("EVENT", |label| format!("{}", label.bright_green().bold()))
}

/// Colors a debug-output level the way the console prints it.
pub fn level_label(level: &str) -> String {
    if !ansi_enabled() {
        return level.to_string();
    }

    match level {
        "DEBUG" => format!("{}", level.bright_blue()),
        "INFO" => format!("{}", level.bright_green()),
        "WARNING" => format!("{}", level.bright_yellow()),
        "ERROR" | "CRITICAL" | "EXCEPTION" => format!("{}", level.bright_red()),
        _ => format!("{}", level.bright_white()),
    }
}

fn paint(label: &str, colored: impl FnOnce(&str) -> String) -> String {
    if ansi_enabled() {
        colored(label)
    } else {
        label.to_string()
    }
}

fn ansi_enabled() -> bool {
    *ANSI_ENABLED.get_or_init(detect_ansi)
}

fn detect_ansi() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }

    if std::env::var_os("FORCE_COLOR").is_some() {
        let _ = enable_ansi_support();
        return true;
    }

    let windows_vt = enable_ansi_support().is_ok();
    windows_vt || supports_color::on_cached(Stream::Stderr).is_some()
}

#[cfg(windows)]
fn enable_ansi_support() -> windows::core::Result<()> {
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Console::{
        ENABLE_VIRTUAL_TERMINAL_PROCESSING, GetConsoleMode, GetStdHandle, STD_ERROR_HANDLE,
        SetConsoleMode,
    };

    unsafe {
        let handle = GetStdHandle(STD_ERROR_HANDLE)?;
        if handle == HANDLE::default() {
            return Ok(());
        }

        let mut mode = std::mem::zeroed();
        GetConsoleMode(handle, &mut mode)?;
        SetConsoleMode(handle, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING)?;
        Ok(())
    }
}

#[cfg(not(windows))]
fn enable_ansi_support() -> Result<(), ()> {
    Err(())
}
