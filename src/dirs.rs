use std::path::PathBuf;

/// Returns the base directory for gateway data.
///
/// Uses `$STORY_GATEWAY_HOME` if set, otherwise defaults to `~/.story-gateway`.
pub fn gateway_home() -> PathBuf {
    if let Ok(home) = std::env::var("STORY_GATEWAY_HOME") {
        return PathBuf::from(home);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".story-gateway")
}

/// Returns the path to the user configuration file.
pub fn config_path() -> PathBuf {
    gateway_home().join("config.toml")
}

/// Returns the path where the chat client persists its conversation id.
pub fn conversation_path() -> PathBuf {
    gateway_home().join("conversation.json")
}
