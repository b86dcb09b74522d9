//! # chartsync Reconciler
//!
//! Reconciles externally published ranking charts against the local catalog
//! and drives acquisition of missing titles.
//!
//! Pipeline: parser → resolver → rank history tracker (per chart run), then
//! gap detector → acquisition executor. The reconciliation cache sits in front
//! of resolver and gap-detector lookups.

pub mod cache;
pub mod clients;
pub mod executor;
pub mod gap;
pub mod parser;
pub mod resolver;
pub mod run;
pub mod tracker;
pub mod types;

pub use types::{SyncError, SyncResult};
