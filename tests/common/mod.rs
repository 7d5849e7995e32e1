#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use validate_schematron::{Diagnostic, ValidationOptions};

pub const INVOICE_TITLE: &str = "Example invoice rules";

/// Test fixture paths
pub struct TestFixtures {
    pub fixtures_dir: PathBuf,
}

impl TestFixtures {
    pub fn new() -> Self {
        let fixtures_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures");

        Self { fixtures_dir }
    }

    pub fn xml_dir(&self) -> PathBuf {
        self.fixtures_dir.join("xml")
    }

    pub fn xml_valid_dir(&self) -> PathBuf {
        self.xml_dir().join("valid")
    }

    pub fn xml_invalid_dir(&self) -> PathBuf {
        self.xml_dir().join("invalid")
    }

    pub fn invoice_schema(&self) -> PathBuf {
        self.fixtures_dir.join("schemas").join("invoice.sch")
    }

    pub fn valid_invoice(&self) -> PathBuf {
        self.xml_valid_dir().join("invoice_ok.xml")
    }

    pub fn invalid_invoice(&self) -> PathBuf {
        self.xml_invalid_dir().join("invoice_bad.xml")
    }

    pub fn malformed_invoice(&self) -> PathBuf {
        self.xml_dir().join("malformed").join("not_well_formed.xml")
    }

    pub fn dtd_dir(&self) -> PathBuf {
        self.fixtures_dir.join("dtd")
    }

    /// Options resolving `document()` paths against the fixtures directory
    pub fn options(&self) -> ValidationOptions {
        ValidationOptions::new().with_working_directory(&self.fixtures_dir)
    }
}

/// Findings for `invoice_bad.xml`, in report order
pub fn expected_invalid_diagnostics() -> Vec<Diagnostic> {
    vec![
        Diagnostic::new("An invoice must have an identifier.", INVOICE_TITLE, 2),
        Diagnostic::new(
            "Invoice total 10 does not match the line amounts.",
            INVOICE_TITLE,
            2,
        ),
        Diagnostic::new("Line 1 amount must be 6.", INVOICE_TITLE, 4),
        Diagnostic::new("Line 2 has an unusually large quantity.", INVOICE_TITLE, 5),
        Diagnostic::new("Currency XXX is not in the code list.", INVOICE_TITLE, 3),
    ]
}

/// Copy the fixture documents into a fresh temporary directory
pub fn copy_fixture_documents(fixtures: &TestFixtures) -> std::io::Result<TempDir> {
    let temp_dir = TempDir::new()?;
    for source in [
        fixtures.valid_invoice(),
        fixtures.invalid_invoice(),
        fixtures.malformed_invoice(),
    ] {
        let name = source.file_name().unwrap_or_default();
        std::fs::copy(&source, temp_dir.path().join(name))?;
    }
    Ok(temp_dir)
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
