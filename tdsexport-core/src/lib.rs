//! Core library for tdsexport.
//!
//! Turns named SQL Server queries into a documented Excel workbook:
//!
//! 1. a [`security::CredentialResolver`] produces a connection descriptor
//! 2. [`source::MssqlSource`] opens one read-only session
//! 3. [`engine::ExportEngine`] runs each query, cleans the result and merges
//!    field documentation from [`introspect`]
//! 4. [`workbook::WorkbookWriter`] writes one sheet per dataset plus a
//!    `Documentation` sheet, replacing the target file atomically
//!
//! # Security Guarantees
//! - Passwords and access tokens live in zeroizing containers
//! - No secret appears in `Debug`/`Display` output, logs or error messages
//! - Only the configured queries and catalog lookups are sent to the server

pub mod clean;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod introspect;
pub mod logging;
pub mod models;
pub mod security;
pub mod source;
pub mod theme;
pub mod workbook;

// Re-export commonly used types
pub use config::JobConfig;
pub use engine::ExportEngine;
pub use error::{ExportError, Result, Stage};
pub use models::{CellValue, Dataset, ExportJob, FieldDescriptor, NamedQuery};
pub use source::{DataSource, MssqlSource, ResultColumn, ResultSet, SourceError, close_after};
pub use theme::{Theme, ThemePreference};
pub use workbook::WorkbookWriter;
