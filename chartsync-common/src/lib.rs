//! # chartsync Common Library
//!
//! Shared code for the chartsync reconciler including:
//! - Catalog database models and queries (Movie, Chart, ChartEntry, ChartHistory)
//! - Database initialization and first-run schema
//! - Configuration loading
//! - Common error types

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
