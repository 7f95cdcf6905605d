use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::store::{DocumentCodec, DocumentFormat, FileSystemStorage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub format: DocumentFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./idpa-storage"),
            format: DocumentFormat::Yaml,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional `idpa` file and `IDPA_` environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        config = config.add_source(config::File::with_name("idpa").required(false));

        // IDPA_STORAGE_ROOT -> storage.root
        config = config.add_source(
            config::Environment::with_prefix("IDPA")
                .separator("_")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    pub fn codec(&self) -> DocumentCodec {
        DocumentCodec::new(self.storage.format)
    }

    /// Open the filesystem storage at the configured root
    pub fn storage(&self) -> anyhow::Result<Arc<FileSystemStorage>> {
        Ok(Arc::new(FileSystemStorage::new(self.storage.root.clone(), self.codec())?))
    }
}
