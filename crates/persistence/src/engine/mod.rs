//! The persistence engine.
//!
//! [`EntityStore`] is the entry point. The submodules split the work the way
//! a write flows through it:
//!
//! - [`validation`] - pre-write checks and detected-issue recording
//! - `resolve` - reference resolution and ad-hoc creation
//! - `stitch` - multi-level table-inheritance writes and reads
//! - [`reconcile`] and `associations` - versioned association diffing
//! - `materialize` - load-mode driven reads
//! - [`registry`] - classification code dispatch

pub mod reconcile;
pub mod registry;
pub mod validation;

mod associations;
mod bulk;
mod materialize;
mod persist;
mod resolve;
mod stitch;
mod store;

pub use reconcile::{ReconcilePlan, ReconcileStats, plan};
pub use registry::{ClassKeyRegistry, ClassKeyRegistryBuilder};
pub use store::{EntityStore, EntityStoreBuilder};
pub use validation::{
    DETECTED_ISSUES_EXTENSION, StandardValidator, Validator, WritePhase, apply_issues,
};
