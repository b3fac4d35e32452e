//! Keel Core
//!
//! Core types and abstractions for the Keel pipeline orchestrator.
//!
//! This crate contains:
//! - Domain types: Core business entities (stages, jobs, artifacts, runs, etc.)
//! - DTOs: Lightweight summaries used for display and listing

pub mod domain;
pub mod dto;
