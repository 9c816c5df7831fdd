//! # cbtsynth-settings
//!
//! Layered configuration for the session synthesizer.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SynthSettings::default()`]
//! 2. **User file**: `~/.cbtsynth/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `CBTSYNTH_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<SynthSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from the default path with env var
/// overrides. If loading fails, returns compiled defaults.
pub fn get_settings() -> &'static SynthSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: SynthSettings) -> std::result::Result<(), SynthSettings> {
    SETTINGS.set(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = SynthSettings::default();
        let _style = StyleRules::default();
        assert!(settings_path().ends_with("settings.json"));
    }
}
