//! Schematron findings
//!
//! A [`Diagnostic`] is the value produced for every context node where an
//! `assert` fails or a `report` fires. It is plain data: equality and
//! formatting are value-based, and it can be freely cloned and sent between
//! threads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Title used when the schema has no (or a blank) `title` element
pub const UNTITLED_SCHEMA: &str = "Untitled Schematron Schema";

/// A single Schematron finding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Assertion message, trimmed
    pub message: String,
    /// Title of the schema that produced the finding
    pub title: String,
    /// Source line of the context node the assertion was evaluated at
    pub line: u32,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, title: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            title: title.into(),
            line,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Schema \"{}\", line {}: \"{}\"",
            self.title, self.line, self.message
        )
    }
}
