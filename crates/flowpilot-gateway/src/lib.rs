//! # FlowPilot Gateway
//! HTTP surface for operators and the client portal.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ Axum Router                                │
//! │  /api/v1/processes        definition CRUD  │
//! │  /api/v1/actions          queue + approval │
//! │  /api/v1/log              automation log   │
//! │  /api/v1/portal           external view    │
//! └──────────────────┬─────────────────────────┘
//!                    ▼
//!            ProcessEngine (flowpilot-engine)
//! ```

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
