use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriveError {
    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("tool not found: {0}")]
    ToolMissing(String),

    #[error("{tool} exited with {status}: {stderr}")]
    ExternalToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("mount failed: {0}")]
    MountFailure(String),

    #[error("unmount failed: {0}")]
    UnmountFailure(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
