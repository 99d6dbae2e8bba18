//! # FlowPilot Engine
//!
//! Drives a subject's traversal of a process definition.
//!
//! ## Architecture
//! ```text
//! ProcessEngine
//!   ├── enter_stage: Timing Resolver → ActionStore.enqueue (supersedes prior)
//!   ├── advance: current_stage + 1, clamped at N+1, enters the next stage
//!   ├── fire: stale check → dispatch via ActionExecutor → mark executed → log
//!   └── approve / reject: the held-for-review path
//!
//! ActionStore (sqlite)   durable pending/executed/cancelled action queue
//! AutomationLog (sqlite) append-only record of every execution attempt
//! sweep                  tokio interval firing due pending actions in order
//! ```
//!
//! Every entry point is idempotent under at-least-once delivery: a second
//! `fire` on a terminal action exits without re-dispatching, and a second
//! `enter_stage` supersedes rather than duplicates.

pub mod engine;
pub mod log;
pub mod store;
pub mod sweep;

pub use engine::ProcessEngine;
pub use log::{AutomationLog, AutomationLogEntry};
pub use store::{ActionStore, ScheduledAction};
pub use sweep::spawn_sweep;
