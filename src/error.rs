//! Error types for the avatar export pipeline.

use thiserror::Error;

/// Result type alias using ExportError.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Main error type for avatar composition and export.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Atlas size, format or another configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The part textures cannot be placed inside the requested atlas.
    #[error("Atlas overflow: {0}")]
    AtlasOverflow(String),

    /// Two parts declare the same bone name with different bind poses.
    #[error("Skeleton merge conflict on bone '{bone}': {reason}")]
    SkeletonMergeConflict { bone: String, reason: String },

    /// A container chunk broke the 4-byte alignment invariant.
    #[error("Alignment violation: {0}")]
    AlignmentViolation(String),

    /// The scene cannot be written into the requested container.
    #[error("Encoding failure: {0}")]
    EncodingFailure(String),

    /// Part geometry, textures, skin or humanoid data is inconsistent.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A binary container could not be decoded.
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// Failed to read or parse a ZIP archive.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Failed to parse JSON data.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to read or process an image.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Payload-free discriminant of [`ExportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidConfiguration,
    AtlasOverflow,
    SkeletonMergeConflict,
    AlignmentViolation,
    EncodingFailure,
    MalformedInput,
    MalformedContainer,
    Zip,
    Json,
    Image,
    Io,
}

impl ExportError {
    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            ExportError::AtlasOverflow(_) => ErrorKind::AtlasOverflow,
            ExportError::SkeletonMergeConflict { .. } => ErrorKind::SkeletonMergeConflict,
            ExportError::AlignmentViolation(_) => ErrorKind::AlignmentViolation,
            ExportError::EncodingFailure(_) => ErrorKind::EncodingFailure,
            ExportError::MalformedInput(_) => ErrorKind::MalformedInput,
            ExportError::MalformedContainer(_) => ErrorKind::MalformedContainer,
            ExportError::Zip(_) => ErrorKind::Zip,
            ExportError::Json(_) => ErrorKind::Json,
            ExportError::Image(_) => ErrorKind::Image,
            ExportError::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the caller can fix the input or configuration and retry.
    ///
    /// An alignment violation is an encoder bug, not a property of the input.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ExportError::AlignmentViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_recoverability() {
        let err = ExportError::AtlasOverflow("too big".to_string());
        assert_eq!(err.kind(), ErrorKind::AtlasOverflow);
        assert!(err.is_recoverable());

        let err = ExportError::AlignmentViolation("json chunk".to_string());
        assert_eq!(err.kind(), ErrorKind::AlignmentViolation);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_conflict_message_names_bone() {
        let err = ExportError::SkeletonMergeConflict {
            bone: "spine".to_string(),
            reason: "rest transform differs".to_string(),
        };
        assert!(err.to_string().contains("'spine'"));
    }
}
