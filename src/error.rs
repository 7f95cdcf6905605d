use crate::model::VersionOrTimestamp;

/// Precondition and parse failures callers may want to match on.
///
/// Storage and codec failures travel as plain `anyhow` errors with context;
/// these variants can be recovered with `err.downcast_ref::<IdpaError>()`.
#[derive(Debug, thiserror::Error)]
pub enum IdpaError {
    /// Annotations are always stored under an explicit version
    #[error("annotation for tag '{tag}' carries no version")]
    MissingAnnotationVersion { tag: String },

    /// An annotation was submitted before any application model exists for it
    #[error("no application model stored for tag '{tag}' at or before version {version}")]
    NoApplication {
        tag: String,
        version: VersionOrTimestamp,
    },

    /// Tags name storage directories and must be a single path component
    #[error("invalid tag: '{0}'")]
    InvalidTag(String),

    #[error("invalid version or timestamp: '{0}'")]
    InvalidVersion(String),

    #[error("invalid element reference: '{0}'")]
    InvalidElementReference(String),
}
