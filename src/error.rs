use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures the assessment engine can surface to callers.
///
/// Unreadable file content is deliberately *not* an error: during contender
/// resolution the diff engine degrades to a size comparison instead (see
/// [`crate::diff::diff`]), so that a handful of permission-restricted files
/// never makes two images incomparable.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported level schema version: {0}")]
    UnsupportedVersion(String),

    #[error("no level named '{0}' in the registry")]
    LevelNotFound(String),

    #[error("invalid level pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("level field '{0}' cannot be modified")]
    InvalidLevelField(String),

    #[error("malformed archive stream: {0}")]
    ArchiveCorrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failure reported by an external [`crate::sources::ImageSource`].
    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn corrupt(reason: &str, source: std::io::Error) -> Self {
        Error::ArchiveCorrupt(format!("{reason}: {source}"))
    }
}
