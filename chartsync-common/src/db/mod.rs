//! Catalog database models and queries

pub mod charts;
pub mod entries;
pub mod history;
pub mod init;
pub mod movies;

pub use init::{create_tables, init_database};
