//! Hourly Wikipedia pageview ingestion.
//!
//! Hours are resolved into [`domain::HourSlot`]s, fetched idempotently into a local
//! directory by a bounded worker pool, and bulk-loaded into a warehouse table through
//! a staged upload per file.

pub mod availability;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod fs_util;
pub mod loader;
pub mod output;
pub mod source;
pub mod store;
pub mod warehouse;
pub mod window;
pub mod workflow;
