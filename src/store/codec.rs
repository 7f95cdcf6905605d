use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    #[default]
    Yaml,
    Json,
}

/// Turns documents into file contents and back.
///
/// Constructed once and handed to the storage; there is no global mapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentCodec {
    format: DocumentFormat,
}

impl DocumentCodec {
    pub fn new(format: DocumentFormat) -> Self {
        Self { format }
    }

    pub fn yaml() -> Self {
        Self::new(DocumentFormat::Yaml)
    }

    pub fn json() -> Self {
        Self::new(DocumentFormat::Json)
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    /// File extension of documents written by this codec
    pub fn extension(&self) -> &'static str {
        match self.format {
            DocumentFormat::Yaml => "yml",
            DocumentFormat::Json => "json",
        }
    }

    pub fn encode<T: Serialize>(&self, document: &T) -> Result<String> {
        match self.format {
            DocumentFormat::Yaml => serde_yaml::to_string(document).context("Failed to encode YAML document"),
            DocumentFormat::Json => {
                serde_json::to_string_pretty(document).context("Failed to encode JSON document")
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, raw: &str) -> Result<T> {
        match self.format {
            DocumentFormat::Yaml => serde_yaml::from_str(raw).context("Failed to decode YAML document"),
            DocumentFormat::Json => serde_json::from_str(raw).context("Failed to decode JSON document"),
        }
    }
}
