//! Configuration management for idiot.
//!
//! Provides XDG-compliant configuration storage and application settings.

mod settings;

pub use settings::{AppSettings, Paths};
