//! # lobby-settings
//!
//! Configuration management with layered sources for the lobby server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`LobbySettings::default()`]
//! 2. **User file** — `~/.lobby/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `LOBBY_*` overrides (highest priority)
//!
//! After layering, [`LobbySettings::validate`] corrects values that would
//! break connection liveness (a ping period that is not shorter than the
//! pong timeout).
//!
//! # Usage
//!
//! ```no_run
//! use lobby_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
