use thiserror::Error;

/// Errors raised by the conversion core.
///
/// Everything here aborts the conversion. Recoverable per-item problems are
/// reported as [`crate::convert::ValidationIssue`] entries instead.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("not a binary glTF container: {0}")]
    Format(String),

    #[error("truncated {chunk} chunk: declared {declared} bytes but only {remaining} remain")]
    Truncated {
        chunk: &'static str,
        declared: usize,
        remaining: usize,
    },

    #[error("malformed glTF JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid glTF document: {0}")]
    Document(String),

    #[error("missing required key `{0}`")]
    MissingKey(String),

    #[error("accessor {index} is invalid: {reason}")]
    Accessor { index: usize, reason: String },

    #[error("bone `{bone}` references unknown bone `{reference}`")]
    UnresolvedBone { bone: String, reference: String },

    #[error("bone hierarchy contains a cycle through `{0}`")]
    CyclicBone(String),

    #[error("group morph `{0}` reaches itself through its offsets")]
    CyclicMorph(String),

    #[error("failed to start texture workers: {0}")]
    WorkerPool(String),

    #[error("texture processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("conversion cancelled")]
    Cancelled,
}

impl ConvertError {
    /// True when the error is a user cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConvertError::Cancelled)
    }
}
