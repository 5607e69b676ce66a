//! # interconnect-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`InterconnectSettings::default()`]
//! 2. **User file** — `~/.interconnect/settings.json`, or the file named by
//!    `INTERCONNECT_SETTINGS` (deep-merged over defaults)
//! 3. **Environment variables** — `INTERCONNECT_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<InterconnectSettings> = OnceLock::new();

/// Get the process-wide settings.
///
/// Loaded on first call; falls back to compiled defaults if loading fails.
pub fn get_settings() -> &'static InterconnectSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            InterconnectSettings::default()
        })
    })
}

/// Install a specific settings value as the process-wide settings.
///
/// Returns the value back if settings were already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: InterconnectSettings) -> std::result::Result<(), InterconnectSettings> {
    SETTINGS.set(settings)
}
