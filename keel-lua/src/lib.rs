//! Keel Lua definitions
//!
//! Pipelines are written as Lua tables and evaluated in a restricted sandbox.
//! This crate provides:
//! - The sandbox with its `pipeline` helper module
//! - The parser turning a definition into immutable stage definitions

pub mod error;
pub mod parser;
pub mod sandbox;

pub use error::{DefinitionError, Result};
pub use parser::parse_pipeline_definition;
pub use sandbox::create_sandbox;

pub use keel_core::domain::pipeline::{PipelineDefinition, StageDefinition};
