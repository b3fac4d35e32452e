//! Core domain types
//!
//! This module contains the core domain structures used across Keel crates.
//! These types represent the fundamental business entities and are shared between
//! the definition loader, the job runner and the orchestrator.

pub mod artifact;
pub mod condition;
pub mod deployment;
pub mod environment;
pub mod job;
pub mod log;
pub mod pipeline;
pub mod run;
pub mod trigger;
