//! CI triage library.
//!
//! Caches concluded openQA jobs in SQLite, classifies their test failures,
//! and compares them against reference and historical runs.

pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod migration;
pub mod models;
pub mod services;
