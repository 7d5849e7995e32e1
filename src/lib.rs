//! # validate-schematron Library
//!
//! Validates XML documents against Schematron rule schemas, using libxml2 for
//! parsing and XPath evaluation.
//!
//! ```no_run
//! use std::path::Path;
//! use validate_schematron::{Schema, ValidationOptions};
//!
//! # fn main() -> validate_schematron::error::Result<()> {
//! let options = ValidationOptions::new().with_working_directory("rules");
//! let schema = Schema::from_file(Path::new("rules/EN16931.sch"), &options)?;
//! for diagnostic in schema.validate_file(Path::new("invoice.xml"), &options)? {
//!     println!("{diagnostic}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod evaluator;
pub mod file_discovery;
pub mod functions;
pub mod libxml2;
pub mod logging;
pub mod output;
pub mod resolver;
pub mod schema;
pub mod schematron;
pub mod validator;
pub mod xpath;

pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use config::{Config, ConfigError, ConfigManager};
pub use diagnostic::{Diagnostic, UNTITLED_SCHEMA};
pub use error::ValidationError;
pub use evaluator::Evaluator;
pub use file_discovery::{DiscoveryStats, FileDiscovery};
pub use libxml2::{LibXml2Wrapper, Node, NodeKind, XmlDocument};
pub use output::{Output, QueryResult};
pub use resolver::ResourceResolver;
pub use schema::{Assertion, AssertionKind, Pattern, Rule, Schema};
pub use schematron::{ValidationOptions, validate, validate_bytes, validate_files};
pub use validator::{
    FileValidationResult, PerformanceMetrics, ProgressCallback, ValidationConfig, ValidationEngine,
    ValidationPhase, ValidationProgress, ValidationResults, ValidationStatus,
};
pub use xpath::{Item, Namespaces, Sequence};
