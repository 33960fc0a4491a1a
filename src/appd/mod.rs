//! App Directory
//!
//! Query interface to the application catalog:
//! - `AppDirectory` trait answered by any catalog source
//! - `StaticDirectory` backed by an in-memory list or JSON file
//! - `CompositeDirectory` merging several sources

pub mod app;
pub mod source;

pub use app::{DirectoryApp, IntentDefinition};
pub use source::{AppDirectory, CompositeDirectory, DirectoryQuery, StaticDirectory};
