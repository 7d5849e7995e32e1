use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use validate_schematron::cli::Cli;
use validate_schematron::config::{Config, ConfigManager};
use validate_schematron::evaluator::Evaluator;
use validate_schematron::file_discovery::FileDiscovery;
use validate_schematron::logging::init_logging;
use validate_schematron::output::{Output, QueryResult};
use validate_schematron::schema::Schema;
use validate_schematron::schematron::ValidationOptions;
use validate_schematron::validator::{
    ProgressCallback, ValidationConfig, ValidationEngine, ValidationPhase, ValidationProgress,
};
use validate_schematron::xpath::Namespaces;

const EXIT_FAILURES: u8 = 1;
const EXIT_USAGE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(message) = cli.validate() {
        eprintln!("error: {}", message);
        return ExitCode::from(EXIT_USAGE);
    }

    let config = match ConfigManager::load_config(&cli).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if let Err(e) = init_logging(config.verbosity()) {
        eprintln!("warning: {}", e);
    }
    debug!(?config, "effective configuration");

    match run(&cli, &config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_FAILURES),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(EXIT_USAGE)
        }
    }
}

/// Returns whether every file passed
async fn run(cli: &Cli, config: &Config) -> Result<bool> {
    let options = ConfigManager::to_validation_options(config)?;

    let schema = match &cli.schema {
        Some(path) => {
            let schema = Schema::from_file(path, &options)
                .with_context(|| format!("Failed to load schema {}", path.display()))?;
            info!(
                title = %schema.title,
                rules = schema.rule_count(),
                assertions = schema.assertion_count(),
                "loaded schema"
            );
            Some(schema)
        }
        None => None,
    };

    let discovery = FileDiscovery::new()
        .with_extensions(config.files.extensions.clone())
        .with_include_patterns(config.files.include_patterns.clone())?
        .with_exclude_patterns(config.files.exclude_patterns.clone())?
        .with_max_depth(config.files.max_depth)
        .with_follow_symlinks(config.files.follow_symlinks);

    let output = Output::new(config.output.format.into(), config.verbosity());

    if let Some(expression) = &cli.select {
        let mut namespaces = schema
            .as_ref()
            .map(|schema| schema.namespaces.clone())
            .unwrap_or_default();
        namespaces.extend(cli.namespace_bindings().map_err(anyhow::Error::msg)?);

        let files = discovery.discover_files(&cli.path).await?;
        let query = Query {
            expression: expression.clone(),
            context: cli.context.clone(),
            namespaces,
        };
        let results = tokio::task::spawn_blocking(move || query.run(&files, &options)).await?;

        print!("{}", output.format_query_results(&results));
        return Ok(results.iter().all(|result| result.error.is_none()));
    }

    let schema = schema.context("--schema is required unless --select is given")?;
    let title = schema.title.clone();
    let engine = ValidationEngine::new(Arc::new(schema), options, ValidationConfig::from(config));

    let progress = config.validation.show_progress.then(progress_reporter);
    let results = engine
        .validate_path_with_progress(&cli.path, &discovery, progress)
        .await?;

    print!("{}", output.format_results(&title, &results));
    std::io::stdout().flush()?;

    Ok(!results.has_errors())
}

/// A `--select` query over a list of files
struct Query {
    expression: String,
    context: Option<String>,
    namespaces: Namespaces,
}

impl Query {
    fn run(&self, files: &[PathBuf], options: &ValidationOptions) -> Vec<QueryResult> {
        files
            .iter()
            .map(|path| match self.run_file(path, options) {
                Ok(results) => QueryResult {
                    path: path.clone(),
                    results,
                    error: None,
                },
                Err(e) => QueryResult {
                    path: path.clone(),
                    results: Vec::new(),
                    error: Some(e.to_string()),
                },
            })
            .collect()
    }

    fn run_file(
        &self,
        path: &Path,
        options: &ValidationOptions,
    ) -> validate_schematron::error::Result<Vec<Vec<String>>> {
        let data = std::fs::read(path)?;
        let evaluator = Evaluator::new(options);
        let document = evaluator.parse_document(&data, Some(&path.to_string_lossy()))?;

        let results = evaluator.select(
            &document,
            &self.expression,
            self.context.as_deref(),
            &self.namespaces,
        )?;
        Ok(results
            .iter()
            .map(|sequence| sequence.iter().map(|item| item.string_value()).collect())
            .collect())
    }
}

fn progress_reporter() -> ProgressCallback {
    Arc::new(|progress: ValidationProgress| match progress.phase {
        ValidationPhase::Validation => {
            let file = progress
                .current_file
                .as_deref()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            eprint!("\r[{}/{}] {}\x1b[K", progress.completed, progress.total, file);
        }
        ValidationPhase::Complete if progress.total > 0 => eprintln!(),
        _ => {}
    })
}
