//! Repository layer
//!
//! Persistence of finished runs. Each record is one JSON document under
//! the runs directory, named after the run id.

pub mod run;

pub use run as run_repository;
