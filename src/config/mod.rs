//! Settings subsystem.
//!
//! # Data Flow
//! ```text
//! settings file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → env.rs overlay (EtcdSettings__*, USE_LOCAL_CONFIG)
//!     → validation.rs (semantic checks)
//!     → Settings (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Settings are immutable once loaded
//! - All fields have defaults to allow minimal files
//! - Environment variables win over file values

pub mod env;
pub mod loader;
pub mod schema;
pub mod validation;

pub use env::{EnvSource, MapEnv, ProcessEnv};
pub use loader::{load_settings, parse_settings, read_settings, SettingsError};
pub use schema::{LoadSettings, Settings, StoreSettings, WatchSettings};
pub use validation::{validate_runtime_settings, validate_settings, ValidationError};
