use std::fmt;

use rpc_abi::SCRIPT_EXTENSION;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptNameError {
    Empty,
    InvalidCharacters(String),
    Unchanged(String),
}

impl fmt::Display for ScriptNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptNameError::Empty => write!(f, "script name cannot be empty"),
            ScriptNameError::InvalidCharacters(name) => {
                write!(f, "script name '{name}' must not contain path separators")
            }
            ScriptNameError::Unchanged(name) => {
                write!(f, "new script name must differ from '{name}'")
            }
        }
    }
}

impl std::error::Error for ScriptNameError {}

pub fn has_script_extension(name: &str) -> bool {
    name.ends_with(SCRIPT_EXTENSION)
}

/// Trims the name and appends `.py` when missing.
pub fn normalize_script_name(name: &str) -> Result<String, ScriptNameError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == SCRIPT_EXTENSION {
        return Err(ScriptNameError::Empty);
    }
    if trimmed.contains(['/', '\\']) {
        return Err(ScriptNameError::InvalidCharacters(trimmed.to_string()));
    }
    if has_script_extension(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}{SCRIPT_EXTENSION}"))
    }
}

/// Returns the normalized target name.
pub fn validate_rename(old_script: &str, new_script: &str) -> Result<String, ScriptNameError> {
    if old_script.trim().is_empty() {
        return Err(ScriptNameError::Empty);
    }
    let target = normalize_script_name(new_script)?;
    if target == old_script.trim() {
        return Err(ScriptNameError::Unchanged(target));
    }
    Ok(target)
}
