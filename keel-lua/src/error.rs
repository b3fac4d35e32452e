//! Definition loading errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DefinitionError>;

/// Errors raised while turning a Lua definition into stage definitions
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// Lua evaluation or type conversion failed
    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),

    #[error("{context} must have a '{field}' field")]
    MissingField { context: String, field: String },

    #[error("invalid '{field}' in {context}: {message}")]
    InvalidField {
        context: String,
        field: String,
        message: String,
    },
}

impl DefinitionError {
    pub(crate) fn missing(context: impl Into<String>, field: &str) -> Self {
        Self::MissingField {
            context: context.into(),
            field: field.to_string(),
        }
    }

    pub(crate) fn invalid(context: impl Into<String>, field: &str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            context: context.into(),
            field: field.to_string(),
            message: message.into(),
        }
    }
}
