//! Error handling for the value inspection engine
//!
//! This module defines custom error types and a Result alias for use
//! throughout the crate. Most errors are transient runtime conditions
//! (an unreadable address, an incomplete type) that the dump engine
//! downgrades to a "not accessible" leaf at the nearest item boundary.
//! Layout syntax errors indicate a defect in a registered formatter and
//! propagate out of a dump instead.

use thiserror::Error;

/// Main error type for inspection operations
#[derive(Error, Debug)]
pub enum ValViewError {
    /// Errors related to memory access in the debuggee
    #[error("Memory access error at address 0x{address:08X}: {message}")]
    MemoryAccess { address: u64, message: String },

    /// A type's size could not be determined
    #[error("Unknown size for type '{0}'")]
    UnknownSize(String),

    /// A value operation needed a byte count that could not be established
    #[error("Indeterminate size: {0}")]
    IndeterminateSize(String),

    /// A layout descriptor string is malformed
    #[error("Layout syntax error in '{pattern}': {message}")]
    LayoutSyntax { pattern: String, message: String },

    /// Attempted to follow a value that is neither native nor addressable
    #[error("Dereference error: {0}")]
    Dereference(String),

    /// Fields were requested on a type with no native or synthetic definition
    #[error("Unresolved type '{0}'")]
    UnresolvedType(String),

    /// A type name could not be parsed (array suffix, template arguments)
    #[error("Type name error: {0}")]
    TypeName(String),

    /// The host backend rejected or cannot perform an operation
    #[error("Backend error: {0}")]
    Backend(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ValViewError>,
    },
}

impl ValViewError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ValViewError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a layout syntax error
    pub fn layout(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        ValViewError::LayoutSyntax {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Whether this error indicates a programming defect that must not be
    /// converted into a "not accessible" leaf.
    ///
    /// Layout patterns come from statically registered formatters, so a
    /// malformed one is a bug in the formatter rather than a property of
    /// the debuggee.
    pub fn is_fatal(&self) -> bool {
        match self {
            ValViewError::LayoutSyntax { .. } => true,
            ValViewError::WithContext { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

/// Result type alias for inspection operations
pub type Result<T> = std::result::Result<T, ValViewError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ValViewError::UnknownSize("Foo".to_string());
        assert_eq!(err.to_string(), "Unknown size for type 'Foo'");
    }

    #[test]
    fn test_memory_access_error() {
        let err = ValViewError::MemoryAccess {
            address: 0x2000_0000,
            message: "Access denied".to_string(),
        };
        assert!(err.to_string().contains("0x20000000"));
        assert!(err.to_string().contains("Access denied"));
    }

    #[test]
    fn test_error_with_context() {
        let err = ValViewError::Dereference("no address".to_string());
        let with_ctx = err.with_context("Failed to expand pointer");
        assert!(with_ctx.to_string().contains("Failed to expand pointer"));
    }

    #[test]
    fn test_layout_errors_are_fatal() {
        assert!(ValViewError::layout("IIx", "unknown code 'x'").is_fatal());
        let wrapped: Result<()> =
            Err(ValViewError::layout("z", "bad")).context("while splitting");
        assert!(wrapped.unwrap_err().is_fatal());
        assert!(!ValViewError::UnknownSize("T".into()).is_fatal());
        assert!(!ValViewError::MemoryAccess {
            address: 0,
            message: String::new(),
        }
        .is_fatal());
    }
}
