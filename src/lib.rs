//! Support Console: customer messaging triage and live agent dashboard.

pub mod config;
pub mod error;
pub mod import;
pub mod store;
pub mod support;
pub mod triage;
