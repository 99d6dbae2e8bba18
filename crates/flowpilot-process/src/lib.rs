//! # FlowPilot Process
//!
//! The user-authored side of the automation engine: ordered stage sequences
//! owned by a tenant, each stage carrying a timing rule and an action spec.
//!
//! ## Architecture
//! ```text
//! ProcessDefinition (ordered stages, fixed first/last)
//!   ├── StageDefinition: category + TimingRule + ActionSpec
//!   │     ├── visibility: internal | external (portal projection)
//!   │     └── requires_approval: held for review before firing
//!   └── validate(): endpoint categories, delay amounts, neighbor cycles
//!
//! Timing Resolver (pure)
//!   rule + reference instant (+ neighbor instant) → absolute trigger instant
//! ```

pub mod stages;
pub mod timing;

pub use stages::{
    ActionSpec, ProcessDefinition, StageCategory, StageDefinition, Visibility,
};
pub use timing::{Direction, DelayUnit, PresetDelay, TimingRule, resolve};
