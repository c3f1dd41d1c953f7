//! Offline batch jobs: CSV message import and canned-message seeding.

pub mod canned;
pub mod csv_import;

pub use canned::seed_default_canned;
pub use csv_import::{ColumnMap, FileReport, ImportReport, Importer};
