/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template compilation.
//!
//! Every failure is fatal to the compile call that raised it; there is no
//! partial output.

use crate::input_type::Kind;
use thiserror::Error;

/// Errors that can occur while compiling a template.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// Error parsing the template syntax.
    #[error("Parse error at {line}:{column}: {message}")]
    Parse {
        message: String,
        line: usize,
        column: usize,
    },

    /// Syntax that parses but has no lowering (sub-expressions, unknown
    /// helpers, unsupported block heads, ...).
    #[error("Unsupported syntax: {message}")]
    Unsupported { message: String },

    /// A path was narrowed to a kind other than the one previously inferred.
    #[error(
        "Type narrowing conflict: Trying to identify {path} as {requested}, but it was previously identified as {previous}"
    )]
    TypeConflict {
        path: String,
        requested: Kind,
        previous: Kind,
    },

    /// An intermediate path segment was dereferenced in a way that
    /// contradicts its inferred kind.
    #[error(
        "{path} accesses {field} field as {requested}, but the field has been identified as {previous}"
    )]
    AccessConflict {
        path: String,
        field: String,
        requested: Kind,
        previous: Kind,
    },

    /// A length hint was supplied for a kind that carries no length.
    #[error("{kind} type does not have length")]
    LengthlessKind { kind: Kind },

    /// A `../` path climbs past the root scope.
    #[error("Path expression {original} has excessive depth")]
    ExcessiveDepth { original: String },

    /// A built-in alias such as `@index` used outside of a scope defining it.
    #[error("Unresolved built-in {name}")]
    UnresolvedBuiltIn { name: String },

    /// The template never reads the render input.
    #[error("The template file does not contain any template expressions.")]
    EmptyTemplate,

    /// Reference to a partial that was not supplied.
    #[error("Trying to use an unknown partial: {name}")]
    UnknownPartial { name: String },

    /// A partial referenced with different extraction groups.
    #[error("The partial {name} is called with inconsistent extra values")]
    InconsistentPartialGroup {
        name: String,
        first: Option<String>,
        requested: Option<String>,
    },

    /// A partial that (directly or indirectly) references itself.
    #[error("Recursive partial inclusion detected: {name}")]
    RecursivePartial { name: String },

    /// Read-only type resolution hit a node of the wrong kind.
    #[error("Trying to access {field} as {requested}, but it is a {actual}")]
    Resolution {
        field: String,
        requested: Kind,
        actual: Kind,
    },

    /// Arrays of arrays cannot be expressed in the ABI.
    #[error("Multi-dimensional arrays are not supported in ABI (field {field})")]
    MultiDimensionalArray { field: String },

    /// A type reached during emission has no registered declaration.
    #[error("No type name registered for {description}")]
    UnnamedType { description: String },

    /// The compile options are malformed.
    #[error("Invalid options: {message}")]
    InvalidOptions { message: String },

    /// The source formatter rejected the generated code.
    #[error("Formatting failed: {message}")]
    Format { message: String },
}

impl CompileError {
    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        CompileError::Unsupported {
            message: message.into(),
        }
    }
}

/// Result type for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_conflict_message_names_both_kinds() {
        let err = CompileError::TypeConflict {
            path: "__input.x.y".to_string(),
            requested: Kind::Uint,
            previous: Kind::String,
        };
        assert_eq!(
            err.to_string(),
            "Type narrowing conflict: Trying to identify __input.x.y as uint, but it was previously identified as string"
        );
    }

    #[test]
    fn test_unsupported_helper() {
        let err = CompileError::unsupported("sub-expressions");
        assert_eq!(err.to_string(), "Unsupported syntax: sub-expressions");
    }
}
