use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Runtime(#[from] core_runtime::Error),

    #[error("Malformed listing entry ({reason}): {raw}")]
    MalformedEntry { reason: String, raw: String },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Tag '{tag}' names no category")]
    EmptyCategory { tag: String },

    #[error("Tag '{tag}' names a category outside the images root")]
    InvalidCategory { tag: String },

    #[error("Transform failed for {input}: {message}")]
    TransformFailed { input: String, message: String },

    #[error("Transform produced no output at {0}")]
    OutputMissing(String),

    #[error("Uploaded file {0} is not visible on the remote store")]
    UploadNotConfirmed(String),

    #[error("Moved item is not visible at {0}")]
    MoveNotConfirmed(String),

    #[error("Item {item_id} moved to {destination} but tag {tag_id} is still assigned: {message}")]
    PartialRelocation {
        item_id: String,
        destination: String,
        tag_id: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, PipelineError::Bridge(e) if e.is_connection_lost())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
