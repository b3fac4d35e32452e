//! Data Transfer Objects
//!
//! Lightweight representations of domain entities used for listing runs
//! without loading every job log.

pub mod run;
