use crate::cli::{Cli, OutputFormat, VerbosityLevel};
use crate::resolver::ResourceResolver;
use crate::schematron::ValidationOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const CONFIG_FILE_NAMES: [&str; 4] = [
    "validate-schematron.toml",
    "validate-schematron.json",
    ".validate-schematron.toml",
    ".validate-schematron.json",
];

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),

    #[error("Resource configuration error: {0}")]
    Resources(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub validation: ValidationConfig,
    pub resources: ResourceConfig,
    pub output: OutputConfig,
    pub files: FileConfig,
}

/// Validation-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Number of concurrent validations
    pub threads: Option<usize>,
    /// Stop starting new validations after the first failing file
    pub fail_fast: bool,
    /// Show progress indicators
    pub show_progress: bool,
    /// Base directory for `document()` paths
    pub working_directory: PathBuf,
    /// Load external DTDs while parsing
    pub load_dtd: bool,
    /// Per-file timeout in seconds
    pub timeout_seconds: u64,
}

/// Candidate locations for external references
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ResourceConfig {
    /// Every file beneath these directories becomes a candidate
    pub directories: Vec<PathBuf>,
    /// Individual candidate files
    pub files: Vec<PathBuf>,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormatConfig,
    pub verbose: bool,
    pub quiet: bool,
    pub debug: bool,
}

/// File processing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// File extensions to process
    pub extensions: Vec<String>,
    /// Include patterns (glob syntax)
    pub include_patterns: Vec<String>,
    /// Exclude patterns (glob syntax)
    pub exclude_patterns: Vec<String>,
    /// Maximum directory depth (unlimited when absent)
    pub max_depth: Option<usize>,
    pub follow_symlinks: bool,
}

/// Output format configuration (serializable version of CLI OutputFormat)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormatConfig {
    #[default]
    Human,
    Json,
    Summary,
}

impl From<OutputFormat> for OutputFormatConfig {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Human => OutputFormatConfig::Human,
            OutputFormat::Json => OutputFormatConfig::Json,
            OutputFormat::Summary => OutputFormatConfig::Summary,
        }
    }
}

impl From<OutputFormatConfig> for OutputFormat {
    fn from(format: OutputFormatConfig) -> Self {
        match format {
            OutputFormatConfig::Human => OutputFormat::Human,
            OutputFormatConfig::Json => OutputFormat::Json,
            OutputFormatConfig::Summary => OutputFormat::Summary,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            threads: None,
            fail_fast: false,
            show_progress: false,
            working_directory: PathBuf::from("."),
            load_dtd: false,
            timeout_seconds: 300,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["xml".to_string()],
            include_patterns: vec![],
            exclude_patterns: vec![],
            max_depth: None,
            follow_symlinks: false,
        }
    }
}

impl Config {
    pub fn verbosity(&self) -> VerbosityLevel {
        if self.output.quiet {
            VerbosityLevel::Quiet
        } else if self.output.debug {
            VerbosityLevel::Debug
        } else if self.output.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        Self::load_config_with(&SystemEnvProvider, cli).await
    }

    /// Same as [`load_config`](Self::load_config) with a custom environment
    pub async fn load_config_with(env: &impl EnvProvider, cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides_with(env, config)?;
        config = Self::merge_with_cli(config, cli);
        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            Some(ext) => return Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => match toml::from_str::<Config>(&content) {
                Ok(config) => config,
                Err(_) => serde_json::from_str(&content)?,
            },
        };

        debug!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }

    /// Find a configuration file in the current directory or the user config directory
    pub async fn find_config_file() -> Result<Option<Config>> {
        let mut search_dirs = vec![PathBuf::from(".")];
        if let Some(config_dir) = dirs::config_dir() {
            search_dirs.push(config_dir.join("validate-schematron"));
        }
        Self::find_config_file_in(&search_dirs).await
    }

    /// Load the first known configuration file found in `search_dirs`
    pub async fn find_config_file_in(search_dirs: &[PathBuf]) -> Result<Option<Config>> {
        for dir in search_dirs {
            for name in CONFIG_FILE_NAMES {
                let path = dir.join(name);
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }
        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(threads) = env.get("VALIDATE_SCHEMATRON_THREADS") {
            config.validation.threads = Some(parse_env("VALIDATE_SCHEMATRON_THREADS", &threads)?);
        }
        if let Some(fail_fast) = env.get("VALIDATE_SCHEMATRON_FAIL_FAST") {
            config.validation.fail_fast = parse_env("VALIDATE_SCHEMATRON_FAIL_FAST", &fail_fast)?;
        }
        if let Some(working_dir) = env.get("VALIDATE_SCHEMATRON_WORKING_DIR") {
            config.validation.working_directory = PathBuf::from(working_dir);
        }
        if let Some(load_dtd) = env.get("VALIDATE_SCHEMATRON_LOAD_DTD") {
            config.validation.load_dtd = parse_env("VALIDATE_SCHEMATRON_LOAD_DTD", &load_dtd)?;
        }
        if let Some(timeout) = env.get("VALIDATE_SCHEMATRON_TIMEOUT") {
            config.validation.timeout_seconds = parse_env("VALIDATE_SCHEMATRON_TIMEOUT", &timeout)?;
        }

        // Same separator rules as PATH.
        if let Some(resource_dirs) = env.get("VALIDATE_SCHEMATRON_RESOURCE_DIRS") {
            config.resources.directories = std::env::split_paths(&resource_dirs)
                .filter(|path| !path.as_os_str().is_empty())
                .collect();
        }

        if let Some(verbose) = env.get("VALIDATE_SCHEMATRON_VERBOSE") {
            config.output.verbose = parse_env("VALIDATE_SCHEMATRON_VERBOSE", &verbose)?;
        }
        if let Some(quiet) = env.get("VALIDATE_SCHEMATRON_QUIET") {
            config.output.quiet = parse_env("VALIDATE_SCHEMATRON_QUIET", &quiet)?;
        }
        if let Some(format) = env.get("VALIDATE_SCHEMATRON_FORMAT") {
            config.output.format = match format.to_lowercase().as_str() {
                "human" => OutputFormatConfig::Human,
                "json" => OutputFormatConfig::Json,
                "summary" => OutputFormatConfig::Summary,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid VALIDATE_SCHEMATRON_FORMAT value: {}",
                        format
                    )));
                }
            };
        }

        if let Some(extensions) = env.get("VALIDATE_SCHEMATRON_EXTENSIONS") {
            config.files.extensions = extensions
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    ///
    /// Flags only ever switch settings on; options override when given.
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if cli.threads.is_some() {
            config.validation.threads = cli.threads;
        }
        config.validation.fail_fast |= cli.fail_fast;
        config.validation.show_progress |= cli.progress;
        config.validation.load_dtd |= cli.load_dtd;
        if let Some(working_dir) = &cli.working_dir {
            config.validation.working_directory = working_dir.clone();
        }

        if !cli.resource_dirs.is_empty() {
            config.resources.directories = cli.resource_dirs.clone();
        }
        if !cli.resources.is_empty() {
            config.resources.files = cli.resources.clone();
        }

        if let Some(format) = cli.output_format {
            config.output.format = format.into();
        }
        if cli.quiet {
            config.output.quiet = true;
            config.output.verbose = false;
            config.output.debug = false;
        }
        if cli.verbose || cli.debug {
            config.output.verbose = true;
            config.output.quiet = false;
        }
        config.output.debug |= cli.debug;

        if let Some(extensions) = cli.get_extensions() {
            config.files.extensions = extensions;
        }
        if !cli.include_patterns.is_empty() {
            config.files.include_patterns = cli.include_patterns.clone();
        }
        if !cli.exclude_patterns.is_empty() {
            config.files.exclude_patterns = cli.exclude_patterns.clone();
        }

        config
    }

    /// Merge two configurations (second takes precedence for non-empty values)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        if override_config.validation.threads.is_some() {
            base.validation.threads = override_config.validation.threads;
        }
        base.validation.fail_fast = override_config.validation.fail_fast;
        base.validation.show_progress = override_config.validation.show_progress;
        base.validation.working_directory = override_config.validation.working_directory;
        base.validation.load_dtd = override_config.validation.load_dtd;
        base.validation.timeout_seconds = override_config.validation.timeout_seconds;

        if !override_config.resources.directories.is_empty() {
            base.resources.directories = override_config.resources.directories;
        }
        if !override_config.resources.files.is_empty() {
            base.resources.files = override_config.resources.files;
        }

        base.output = override_config.output;

        if !override_config.files.extensions.is_empty() {
            base.files.extensions = override_config.files.extensions;
        }
        if !override_config.files.include_patterns.is_empty() {
            base.files.include_patterns = override_config.files.include_patterns;
        }
        if !override_config.files.exclude_patterns.is_empty() {
            base.files.exclude_patterns = override_config.files.exclude_patterns;
        }
        if override_config.files.max_depth.is_some() {
            base.files.max_depth = override_config.files.max_depth;
        }
        base.files.follow_symlinks = override_config.files.follow_symlinks;

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if let Some(threads) = config.validation.threads {
            if threads == 0 {
                return Err(ConfigError::Validation(
                    "Number of threads must be greater than 0".to_string(),
                ));
            }
            if threads > 1000 {
                return Err(ConfigError::Validation(
                    "Number of threads cannot exceed 1000".to_string(),
                ));
            }
        }

        if config.validation.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        if config.files.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "At least one file extension must be specified".to_string(),
            ));
        }

        for ext in &config.files.extensions {
            if ext.contains('/') || ext.contains('\\') || ext.contains('.') {
                return Err(ConfigError::Validation(format!(
                    "Invalid file extension: {}",
                    ext
                )));
            }
        }

        Ok(())
    }

    /// Get the effective thread count
    pub fn get_thread_count(config: &Config) -> usize {
        config.validation.threads.unwrap_or_else(num_cpus::get)
    }

    pub fn get_timeout_duration(config: &Config) -> Duration {
        Duration::from_secs(config.validation.timeout_seconds)
    }

    /// Build per-call validation options, scanning the resource directories
    pub fn to_validation_options(config: &Config) -> Result<ValidationOptions> {
        let resolver =
            ResourceResolver::from_resources(&config.resources.directories, &config.resources.files)
                .map_err(|e| ConfigError::Resources(e.to_string()))?;

        Ok(ValidationOptions::new()
            .with_working_directory(&config.validation.working_directory)
            .with_resolver(resolver)
            .with_load_dtd(config.validation.load_dtd))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Mock environment variable provider for testing
    #[derive(Default)]
    struct MockEnvProvider {
        vars: HashMap<String, String>,
    }

    impl MockEnvProvider {
        fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
            self.vars.insert(key.into(), value.into());
        }
    }

    impl EnvProvider for MockEnvProvider {
        fn get(&self, key: &str) -> Option<String> {
            self.vars.get(key).cloned()
        }
    }

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["validate-schematron", "--schema", "rules.sch"];
        full.extend_from_slice(args);
        full.push("/tmp");
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.validation.threads, None);
        assert!(!config.validation.fail_fast);
        assert_eq!(config.validation.working_directory, PathBuf::from("."));
        assert!(!config.validation.load_dtd);
        assert!(config.resources.directories.is_empty());
        assert_eq!(config.output.format, OutputFormatConfig::Human);
        assert_eq!(config.files.extensions, vec!["xml"]);
        assert_eq!(config.verbosity(), VerbosityLevel::Normal);
        assert!(ConfigManager::validate_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_load_toml_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("validate-schematron.toml");

        let toml_content = r#"
[validation]
threads = 8
fail_fast = true
working_directory = "/srv/rules"
load_dtd = true

[resources]
directories = ["/srv/rules/codelists"]
files = ["/srv/rules/UBL-Invoice.xsd"]

[output]
format = "json"
verbose = true

[files]
extensions = ["xml", "ubl"]
exclude_patterns = ["**/drafts/**"]
"#;
        fs::write(&config_path, toml_content).unwrap();

        let config = ConfigManager::load_from_file(&config_path).await.unwrap();

        assert_eq!(config.validation.threads, Some(8));
        assert!(config.validation.fail_fast);
        assert_eq!(config.validation.working_directory, PathBuf::from("/srv/rules"));
        assert!(config.validation.load_dtd);
        assert_eq!(
            config.resources.directories,
            [PathBuf::from("/srv/rules/codelists")]
        );
        assert_eq!(config.resources.files.len(), 1);
        assert_eq!(config.output.format, OutputFormatConfig::Json);
        assert!(config.output.verbose);
        assert_eq!(config.files.extensions, vec!["xml", "ubl"]);
        assert_eq!(config.files.exclude_patterns, vec!["**/drafts/**"]);
        // Missing keys fall back to defaults.
        assert_eq!(config.validation.timeout_seconds, 300);
        assert!(config.files.include_patterns.is_empty());
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.json");
        fs::write(
            &config_path,
            r#"{"validation": {"threads": 2}, "output": {"format": "summary"}}"#,
        )
        .unwrap();

        let config = ConfigManager::load_from_file(&config_path).await.unwrap();
        assert_eq!(config.validation.threads, Some(2));
        assert_eq!(config.output.format, OutputFormatConfig::Summary);
    }

    #[tokio::test]
    async fn test_load_without_extension_tries_both() {
        let temp_dir = TempDir::new().unwrap();
        let toml_path = temp_dir.path().join("schematronrc");
        fs::write(&toml_path, "[validation]\nthreads = 3\n").unwrap();
        let json_path = temp_dir.path().join("schematronjs");
        fs::write(&json_path, r#"{"validation": {"threads": 5}}"#).unwrap();

        let from_toml = ConfigManager::load_from_file(&toml_path).await.unwrap();
        assert_eq!(from_toml.validation.threads, Some(3));
        let from_json = ConfigManager::load_from_file(&json_path).await.unwrap();
        assert_eq!(from_json.validation.threads, Some(5));
    }

    #[tokio::test]
    async fn test_unsupported_format() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "validation: {}").unwrap();

        let result = ConfigManager::load_from_file(&path).await;
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(ext)) if ext == "yaml"));
    }

    #[tokio::test]
    async fn test_find_config_file_in_order() {
        let temp_dir = TempDir::new().unwrap();
        assert!(
            ConfigManager::find_config_file_in(&[temp_dir.path().to_path_buf()])
                .await
                .unwrap()
                .is_none()
        );

        fs::write(
            temp_dir.path().join(".validate-schematron.json"),
            r#"{"validation": {"threads": 7}}"#,
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("validate-schematron.toml"),
            "[validation]\nthreads = 4\n",
        )
        .unwrap();

        let found = ConfigManager::find_config_file_in(&[temp_dir.path().to_path_buf()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.validation.threads, Some(4));
    }

    #[test]
    fn test_environment_overrides() {
        let mut env = MockEnvProvider::default();
        env.set("VALIDATE_SCHEMATRON_THREADS", "16");
        env.set("VALIDATE_SCHEMATRON_FAIL_FAST", "true");
        env.set("VALIDATE_SCHEMATRON_WORKING_DIR", "/data/rules");
        env.set("VALIDATE_SCHEMATRON_LOAD_DTD", "true");
        env.set("VALIDATE_SCHEMATRON_RESOURCE_DIRS", "/res/a:/res/b");
        env.set("VALIDATE_SCHEMATRON_FORMAT", "JSON");
        env.set("VALIDATE_SCHEMATRON_EXTENSIONS", "xml, ubl");

        let config =
            ConfigManager::apply_environment_overrides_with(&env, Config::default()).unwrap();

        assert_eq!(config.validation.threads, Some(16));
        assert!(config.validation.fail_fast);
        assert_eq!(config.validation.working_directory, PathBuf::from("/data/rules"));
        assert!(config.validation.load_dtd);
        assert_eq!(
            config.resources.directories,
            [PathBuf::from("/res/a"), PathBuf::from("/res/b")]
        );
        assert_eq!(config.output.format, OutputFormatConfig::Json);
        assert_eq!(config.files.extensions, vec!["xml", "ubl"]);
    }

    #[test]
    fn test_invalid_environment_values() {
        let mut env = MockEnvProvider::default();
        env.set("VALIDATE_SCHEMATRON_THREADS", "many");
        let result = ConfigManager::apply_environment_overrides_with(&env, Config::default());
        assert!(matches!(result, Err(ConfigError::Environment(_))));

        let mut env = MockEnvProvider::default();
        env.set("VALIDATE_SCHEMATRON_FORMAT", "xml");
        let result = ConfigManager::apply_environment_overrides_with(&env, Config::default());
        assert!(matches!(result, Err(ConfigError::Environment(_))));
    }

    #[test]
    fn test_cli_takes_precedence() {
        let mut config = Config::default();
        config.validation.threads = Some(2);
        config.validation.fail_fast = true;
        config.output.format = OutputFormatConfig::Json;
        config.resources.directories = vec![PathBuf::from("/from/config")];

        let cli = cli(&[
            "-t",
            "6",
            "--format",
            "summary",
            "--resource-dir",
            "/from/cli",
            "-w",
            "/work",
            "-e",
            "ubl",
        ]);
        let merged = ConfigManager::merge_with_cli(config, &cli);

        assert_eq!(merged.validation.threads, Some(6));
        // Absent flags keep the configured value.
        assert!(merged.validation.fail_fast);
        assert_eq!(merged.output.format, OutputFormatConfig::Summary);
        assert_eq!(merged.resources.directories, [PathBuf::from("/from/cli")]);
        assert_eq!(merged.validation.working_directory, PathBuf::from("/work"));
        assert_eq!(merged.files.extensions, vec!["ubl"]);
    }

    #[test]
    fn test_cli_quiet_overrides_configured_verbose() {
        let mut config = Config::default();
        config.output.verbose = true;

        let merged = ConfigManager::merge_with_cli(config, &cli(&["-q"]));
        assert_eq!(merged.verbosity(), VerbosityLevel::Quiet);
        assert!(ConfigManager::validate_config(&merged).is_ok());
    }

    #[test]
    fn test_validate_config_rejections() {
        let mut config = Config::default();
        config.validation.threads = Some(0);
        assert!(ConfigManager::validate_config(&config).is_err());
        config.validation.threads = Some(1001);
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.output.verbose = true;
        config.output.quiet = true;
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.files.extensions.clear();
        assert!(ConfigManager::validate_config(&config).is_err());

        for bad in ["x/ml", "x\\ml", ".xml"] {
            let mut config = Config::default();
            config.files.extensions = vec![bad.to_string()];
            assert!(
                matches!(
                    ConfigManager::validate_config(&config),
                    Err(ConfigError::Validation(_))
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_to_validation_options() {
        let temp_dir = TempDir::new().unwrap();
        let codelists = temp_dir.path().join("codelists");
        fs::create_dir_all(&codelists).unwrap();
        fs::write(codelists.join("currency.xml"), "<codes/>").unwrap();
        fs::write(codelists.join("country.xml"), "<codes/>").unwrap();

        let mut config = Config::default();
        config.resources.directories = vec![codelists.clone()];
        config.validation.working_directory = temp_dir.path().to_path_buf();
        config.validation.load_dtd = true;

        let options = ConfigManager::to_validation_options(&config).unwrap();
        assert_eq!(options.working_directory, temp_dir.path());
        assert!(options.load_dtd);
        assert_eq!(
            options.resolver.locations(),
            [codelists.join("country.xml"), codelists.join("currency.xml")]
        );
        assert_eq!(
            options.resolver.resolve("currency.xml"),
            codelists.join("currency.xml").to_string_lossy()
        );
    }

    #[test]
    fn test_missing_resource_directory() {
        let mut config = Config::default();
        config.resources.directories = vec![PathBuf::from("/nonexistent/resources")];
        assert!(matches!(
            ConfigManager::to_validation_options(&config),
            Err(ConfigError::Resources(_))
        ));
    }

    #[tokio::test]
    async fn test_load_config_full_precedence() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("custom.toml");
        fs::write(&config_path, "[validation]\nthreads = 3\nfail_fast = true\n").unwrap();

        let mut env = MockEnvProvider::default();
        env.set("VALIDATE_SCHEMATRON_THREADS", "9");

        let config_arg = config_path.to_string_lossy().to_string();
        let cli = cli(&["--config", &config_arg]);
        let config = ConfigManager::load_config_with(&env, &cli).await.unwrap();

        assert_eq!(config.validation.threads, Some(9));
        assert!(config.validation.fail_fast);
    }
}
