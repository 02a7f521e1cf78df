//! sk-core: Shared types for the Sakura score player
//!
//! This crate holds everything that does not need a thread:
//! - Score model and note grouping
//! - Key mapping (note → actuator action)
//! - Sheet loading (JSON song files)
//! - Playback configuration

mod config;
mod error;
mod mapping;
mod score;
mod sheet;

pub use config::*;
pub use error::*;
pub use mapping::*;
pub use score::*;
pub use sheet::*;
