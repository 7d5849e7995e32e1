//! Batch validation through the async engine

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{TestFixtures, copy_fixture_documents, expected_invalid_diagnostics, file_name};
use validate_schematron::{
    FileDiscovery, ProgressCallback, Schema, ValidationConfig, ValidationEngine,
    ValidationProgress, ValidationStatus,
};

fn engine(fixtures: &TestFixtures, config: ValidationConfig) -> ValidationEngine {
    let options = fixtures.options();
    let schema = Schema::from_file(&fixtures.invoice_schema(), &options).unwrap();
    ValidationEngine::new(Arc::new(schema), options, config)
}

#[tokio::test]
async fn test_fixture_tree() {
    let fixtures = TestFixtures::new();
    let results = engine(&fixtures, ValidationConfig::default())
        .validate_path(&fixtures.xml_dir(), &FileDiscovery::new())
        .await
        .unwrap();

    assert_eq!(results.total_files, 3);
    assert_eq!(results.valid_files, 1);
    assert_eq!(results.invalid_files, 1);
    assert_eq!(results.error_files, 1);
    assert_eq!(results.total_diagnostics, 5);

    let invalid = results
        .file_results
        .iter()
        .find(|result| result.status.is_invalid())
        .unwrap();
    assert_eq!(file_name(&invalid.path), "invoice_bad.xml");
    assert_eq!(invalid.status, ValidationStatus::Invalid { error_count: 5 });
    assert_eq!(invalid.diagnostics, expected_invalid_diagnostics());

    let error = results
        .file_results
        .iter()
        .find(|result| result.status.is_error())
        .unwrap();
    assert_eq!(file_name(&error.path), "not_well_formed.xml");
}

#[tokio::test]
async fn test_results_follow_discovery_order() {
    let fixtures = TestFixtures::new();
    let documents = copy_fixture_documents(&fixtures).unwrap();

    let config = ValidationConfig {
        max_concurrent_validations: 3,
        ..ValidationConfig::default()
    };
    let results = engine(&fixtures, config)
        .validate_path(documents.path(), &FileDiscovery::new())
        .await
        .unwrap();

    let names: Vec<_> = results
        .file_results
        .iter()
        .map(|result| file_name(&result.path))
        .collect();
    assert_eq!(
        names,
        ["invoice_bad.xml", "invoice_ok.xml", "not_well_formed.xml"]
    );
}

#[tokio::test]
async fn test_fail_fast_with_single_worker() {
    let fixtures = TestFixtures::new();
    let documents = copy_fixture_documents(&fixtures).unwrap();

    let config = ValidationConfig {
        max_concurrent_validations: 1,
        fail_fast: true,
        ..ValidationConfig::default()
    };
    let results = engine(&fixtures, config)
        .validate_path(documents.path(), &FileDiscovery::new())
        .await
        .unwrap();

    // invoice_bad.xml comes first and stops the run.
    assert!(results.file_results[0].status.is_invalid());
    assert!(results.file_results[1].status.is_skipped());
    assert!(results.file_results[2].status.is_skipped());
    assert_eq!(results.skipped_files, 2);
}

#[tokio::test]
async fn test_include_pattern_limits_files() {
    let fixtures = TestFixtures::new();
    let discovery = FileDiscovery::new()
        .with_include_patterns(vec!["**/valid/*.xml".to_string()])
        .unwrap();

    let results = engine(&fixtures, ValidationConfig::default())
        .validate_path(&fixtures.xml_dir(), &discovery)
        .await
        .unwrap();
    assert_eq!(results.total_files, 1);
    assert!(results.all_valid());
}

#[tokio::test]
async fn test_progress_reports_every_file() {
    let fixtures = TestFixtures::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let callback: ProgressCallback = Arc::new(move |progress: ValidationProgress| {
        if progress.current_file.is_some() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    engine(&fixtures, ValidationConfig::default())
        .validate_path_with_progress(&fixtures.xml_dir(), &FileDiscovery::new(), Some(callback))
        .await
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_missing_root_is_an_error() {
    let fixtures = TestFixtures::new();
    let result = engine(&fixtures, ValidationConfig::default())
        .validate_path(
            &fixtures.fixtures_dir.join("does-not-exist"),
            &FileDiscovery::new(),
        )
        .await;
    assert!(result.is_err());
}
