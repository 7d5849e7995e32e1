use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::xpath::Namespaces;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show critical errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show detailed information
    Verbose,
    /// Show all available debugging information
    Debug,
}

/// Report format on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Per-file status lines, diagnostics and a summary
    #[default]
    Human,
    /// Machine-readable JSON report
    Json,
    /// Summary counts only
    Summary,
}

/// Validate XML documents against Schematron rule schemas
#[derive(Parser, Debug, Clone)]
#[command(name = "validate-schematron")]
#[command(about = "Validate XML documents against Schematron rule schemas using libxml2")]
#[command(version)]
pub struct Cli {
    /// Directory or file to validate
    pub path: PathBuf,

    /// Schematron schema to validate against
    #[arg(short = 's', long = "schema", required_unless_present = "select")]
    pub schema: Option<PathBuf>,

    /// File extensions to process (comma-separated)
    #[arg(
        short = 'e',
        long = "extensions",
        help = "File extensions to process (e.g., 'xml,ubl') [default: xml]"
    )]
    pub extensions: Option<String>,

    /// Number of concurrent validations
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Enable debug output (implies verbose)
    #[arg(long = "debug", conflicts_with = "quiet")]
    pub debug: bool,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (TOML or JSON)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Report format
    #[arg(long = "format", value_enum)]
    pub output_format: Option<OutputFormat>,

    /// Base directory for document() paths in rule expressions
    #[arg(short = 'w', long = "working-dir")]
    pub working_dir: Option<PathBuf>,

    /// Directory whose files may satisfy external references (repeatable)
    #[arg(long = "resource-dir", action = clap::ArgAction::Append)]
    pub resource_dirs: Vec<PathBuf>,

    /// File that may satisfy external references (repeatable)
    #[arg(long = "resource", action = clap::ArgAction::Append)]
    pub resources: Vec<PathBuf>,

    /// Include file patterns (glob syntax)
    #[arg(long = "include", action = clap::ArgAction::Append)]
    pub include_patterns: Vec<String>,

    /// Exclude file patterns (glob syntax)
    #[arg(long = "exclude", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Show progress on stderr
    #[arg(long = "progress")]
    pub progress: bool,

    /// Stop starting new validations after the first failing file
    #[arg(long = "fail-fast")]
    pub fail_fast: bool,

    /// Load external DTDs (default attributes and entities)
    #[arg(long = "load-dtd")]
    pub load_dtd: bool,

    /// Print the result of an XPath expression instead of validating
    #[arg(long = "select", value_name = "XPATH")]
    pub select: Option<String>,

    /// Context nodes for --select (default: the document node)
    #[arg(long = "context", value_name = "XPATH", requires = "select")]
    pub context: Option<String>,

    /// Namespace binding for --select (repeatable)
    #[arg(
        long = "ns",
        value_name = "PREFIX=URI",
        action = clap::ArgAction::Append,
        requires = "select"
    )]
    pub namespaces: Vec<String>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Extensions given with `-e`, if any
    pub fn get_extensions(&self) -> Option<Vec<String>> {
        self.extensions.as_ref().map(|extensions| {
            extensions
                .split(',')
                .map(|s| s.trim().trim_start_matches('.').to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.path.exists() {
            return Err(format!("Path does not exist: {}", self.path.display()));
        }
        if let Some(schema) = &self.schema
            && !schema.is_file()
        {
            return Err(format!("Schema file does not exist: {}", schema.display()));
        }
        if let Some(threads) = self.threads
            && threads == 0
        {
            return Err("Number of threads must be greater than 0".to_string());
        }
        self.namespace_bindings()?;
        Ok(())
    }

    /// Parse the `--ns prefix=uri` bindings; a repeated prefix keeps the last URI
    pub fn namespace_bindings(&self) -> Result<Namespaces, String> {
        let mut namespaces = Namespaces::new();
        for binding in &self.namespaces {
            let Some((prefix, uri)) = binding.split_once('=') else {
                return Err(format!(
                    "Invalid namespace binding '{}', expected PREFIX=URI",
                    binding
                ));
            };
            let prefix = prefix.trim();
            if prefix.is_empty() || prefix.contains(':') {
                return Err(format!("Invalid namespace prefix in '{}'", binding));
            }
            namespaces.insert(prefix.to_string(), uri.trim().to_string());
        }
        Ok(namespaces)
    }

    pub fn get_thread_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.debug {
            VerbosityLevel::Debug
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    /// Query mode prints `--select` results instead of validating
    pub fn is_query(&self) -> bool {
        self.select.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_basic_cli_parsing() {
        let cli =
            Cli::try_parse_from(["validate-schematron", "--schema", "rules.sch", "/tmp"]).unwrap();
        assert_eq!(cli.path, PathBuf::from("/tmp"));
        assert_eq!(cli.schema, Some(PathBuf::from("rules.sch")));
        assert_eq!(cli.get_extensions(), None);
        assert_eq!(cli.output_format, None);
        assert_eq!(cli.verbosity(), VerbosityLevel::Normal);
        assert!(!cli.is_query());
    }

    #[test]
    fn test_schema_required_without_select() {
        assert!(Cli::try_parse_from(["validate-schematron", "/tmp"]).is_err());

        let cli =
            Cli::try_parse_from(["validate-schematron", "--select", "//code", "/tmp"]).unwrap();
        assert!(cli.is_query());
        assert_eq!(cli.schema, None);
    }

    #[test]
    fn test_context_requires_select() {
        let result = Cli::try_parse_from([
            "validate-schematron",
            "-s",
            "rules.sch",
            "--context",
            "//item",
            "/tmp",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_repeatable_options() {
        let cli = Cli::try_parse_from([
            "validate-schematron",
            "-s",
            "rules.sch",
            "--resource-dir",
            "/res/a",
            "--resource-dir",
            "/res/b",
            "--resource",
            "/res/codes.xml",
            "--include",
            "**/*.xml",
            "--format",
            "json",
            "-e",
            "xml, .ubl",
            "-w",
            "/work",
            "/tmp",
        ])
        .unwrap();

        assert_eq!(cli.resource_dirs.len(), 2);
        assert_eq!(cli.resources, [PathBuf::from("/res/codes.xml")]);
        assert_eq!(cli.include_patterns, ["**/*.xml"]);
        assert_eq!(cli.output_format, Some(OutputFormat::Json));
        assert_eq!(
            cli.get_extensions(),
            Some(vec!["xml".to_string(), "ubl".to_string()])
        );
        assert_eq!(cli.working_dir, Some(PathBuf::from("/work")));
    }

    #[test]
    fn test_namespace_bindings() {
        let cli = Cli::try_parse_from([
            "validate-schematron",
            "--select",
            "//cbc:ID",
            "--ns",
            "cbc=urn:a",
            "--ns",
            "cac=urn:b",
            "--ns",
            "cbc=urn:c",
            "/tmp",
        ])
        .unwrap();

        let namespaces = cli.namespace_bindings().unwrap();
        assert_eq!(namespaces.len(), 2);
        assert_eq!(namespaces["cbc"], "urn:c");
        assert_eq!(namespaces["cac"], "urn:b");
    }

    #[test]
    fn test_invalid_namespace_binding() {
        let cli = Cli::try_parse_from([
            "validate-schematron",
            "--select",
            "/",
            "--ns",
            "no-equals-sign",
            "/tmp",
        ])
        .unwrap();
        assert!(cli.namespace_bindings().is_err());
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_verbosity_flags() {
        let quiet = Cli::try_parse_from(["validate-schematron", "-s", "r.sch", "-q", "/tmp"]).unwrap();
        assert_eq!(quiet.verbosity(), VerbosityLevel::Quiet);

        let debug =
            Cli::try_parse_from(["validate-schematron", "-s", "r.sch", "--debug", "/tmp"]).unwrap();
        assert_eq!(debug.verbosity(), VerbosityLevel::Debug);

        assert!(Cli::try_parse_from(["validate-schematron", "-s", "r.sch", "-q", "-v", "/tmp"]).is_err());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let cli = Cli::try_parse_from(["validate-schematron", "--select", "/", "-t", "0", "/tmp"])
            .unwrap();
        assert!(cli.validate().is_err());
    }
}
