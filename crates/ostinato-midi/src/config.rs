//! Engine settings and their on-disk persistence.

use std::fs;
use std::path::PathBuf;

/// Recognized engine options.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Prefix shared by every handler identifier.
    pub handler_prefix: String,
    /// Deliver decoded events to registered handlers.
    pub dispatch_enabled: bool,
    /// Forward unhandled raw messages to every open output.
    pub passthrough_enabled: bool,
    /// Send per-event snapshots to the debug observer.
    pub debug_events: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            handler_prefix: "Midi".into(),
            dispatch_enabled: true,
            passthrough_enabled: true,
            debug_events: false,
        }
    }
}

fn settings_path() -> Option<PathBuf> {
    let mut base = dirs::config_dir()?;
    base.push("Ostinato");
    if !base.exists() {
        let _ = fs::create_dir_all(&base);
    }
    base.push("midi.json");
    Some(base)
}

/// Load settings from disk. Returns defaults if loading fails.
pub fn load() -> EngineSettings {
    let Some(path) = settings_path() else {
        return EngineSettings::default();
    };
    match fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => EngineSettings::default(),
    }
}

/// Save settings to disk.
pub fn save(settings: &EngineSettings) {
    let Some(path) = settings_path() else {
        return;
    };
    if let Ok(json) = serde_json::to_string_pretty(settings) {
        if let Err(err) = fs::write(&path, json) {
            tracing::warn!(?err, "failed to write midi settings");
        }
    }
}
