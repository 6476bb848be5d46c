use folio_agent::GeneratorConfig;
use folio_pipeline::{default_catalog, LimitsConfig, TaskRegistry, DEFAULT_MAX_ITERATIONS};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct FolioConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Custom catalog file; the built-in book pipeline when absent.
    #[serde(default)]
    pub catalog: Option<PathBuf>,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

impl Default for FolioConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            catalog: None,
            generator: GeneratorConfig::default(),
            limits: LimitsConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl FolioConfig {
    /// Read `path`. A missing file yields the defaults; relative paths inside
    /// the file are resolved against its directory.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config: FolioConfig = match tokio::fs::read_to_string(path).await {
            Ok(source) => toml::from_str(&source).map_err(|e| {
                anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e)
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                ));
            }
        };

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if config.data_dir.is_relative() {
            config.data_dir = base.join(&config.data_dir);
        }
        if let Some(catalog) = config.catalog.as_mut() {
            if catalog.is_relative() {
                *catalog = base.join(&*catalog);
            }
        }
        Ok(config)
    }

    /// The configured catalog, or the built-in one.
    pub async fn registry(&self) -> anyhow::Result<TaskRegistry> {
        let registry = match &self.catalog {
            Some(path) => {
                let source = tokio::fs::read_to_string(path).await.map_err(|e| {
                    anyhow::anyhow!("Failed to read catalog '{}': {}", path.display(), e)
                })?;
                TaskRegistry::from_toml_str(&source)?
            }
            None => default_catalog()?,
        };
        info!(tasks = registry.len(), layers = registry.layers().len(), "Catalog loaded");
        Ok(registry)
    }
}
