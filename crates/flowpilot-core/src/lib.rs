//! # FlowPilot Core
//!
//! Shared foundation for the FlowPilot process automation engine:
//! - Error type + `Result` alias used across all crates
//! - Action/status enums and subject references
//! - Collaborator traits (`EntityStore`, `ActionExecutor`)
//! - TOML configuration with per-field defaults

pub mod config;
pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use config::FlowConfig;
pub use error::{FlowError, Result};
pub use memory::MemoryEntityStore;
pub use traits::{ActionExecutor, EntityStore};
pub use types::{ActionStatus, ActionType, ClientProcessState, LogStatus, SubjectRef};
