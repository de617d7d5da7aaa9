use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// Runtime and authoring settings. Missing fields take their defaults, so
/// an empty `()` file is a valid settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NarrativeSettings {
    /// Reset a task's progress when the quest moves past it, so a
    /// repeatable task starts from zero the next time around.
    pub reset_tasks_when_completed: bool,
    /// Base seed for picking alternative lines.
    pub line_seed: u64,
    /// Report authoring lints alongside validation findings.
    pub enable_warnings: bool,
}

impl Default for NarrativeSettings {
    fn default() -> Self {
        Self {
            reset_tasks_when_completed: false,
            line_seed: 0,
            enable_warnings: true,
        }
    }
}

impl NarrativeSettings {
    pub fn parse_ron(input: &str) -> Result<NarrativeSettings, SettingsError> {
        Ok(ron::from_str(input)?)
    }

    pub fn load_from_ron(path: &Path) -> Result<NarrativeSettings, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let settings = NarrativeSettings::parse_ron("()").unwrap();
        assert_eq!(settings, NarrativeSettings::default());
        assert!(settings.enable_warnings);
    }

    #[test]
    fn partial_override() {
        let settings =
            NarrativeSettings::parse_ron("(reset_tasks_when_completed: true, line_seed: 7)").unwrap();
        assert!(settings.reset_tasks_when_completed);
        assert_eq!(settings.line_seed, 7);
        assert!(settings.enable_warnings);
    }

    #[test]
    fn unknown_field_rejected() {
        assert!(NarrativeSettings::parse_ron("(line_sead: 7)").is_err());
    }
}
