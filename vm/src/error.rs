use cinder_drive::DriveError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VmError {
    #[error("microvm already exists: {0}")]
    AlreadyExists(String),

    #[error("microvm not found: {0}")]
    NotFound(String),

    #[error("microvm {0} has no init drive; create it with --init")]
    MissingInitDrive(String),

    #[error("missing asset: {0}")]
    MissingAsset(String),

    #[error("no release asset matching {0}")]
    AssetNotFound(String),

    #[error("config {path}: {message}")]
    ConfigIo { path: String, message: String },

    #[error("{stage}: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<VmError>,
    },

    #[error("unmount failed while cleaning up: {0}")]
    Cleanup(DriveError),

    #[error("{original} (additionally, unmount failed: {cleanup})")]
    CleanupAfterFailure {
        original: Box<VmError>,
        cleanup: DriveError,
    },

    #[error("launch failed: {0}")]
    LaunchFailed(String),

    #[error("drive error: {0}")]
    Drive(#[from] DriveError),

    #[error("image error: {0}")]
    Image(#[from] cinder_image::ImageError),

    #[error("registry error: {0}")]
    Registry(#[from] cinder_remote::RegistryError),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VmError {
    /// Wraps an error with the pipeline stage it occurred in.
    pub(crate) fn in_stage(self, stage: &'static str) -> Self {
        VmError::Stage {
            stage,
            source: Box::new(self),
        }
    }
}

/// Two-phase mount release: combines the result of the mounted work with
/// the result of the paired unmount. An unmount failure never aborts the
/// process; it is surfaced to the caller, attached to the original failure
/// when there was one.
pub(crate) fn resolve_unmount<T>(
    work: Result<T, VmError>,
    unmount: Result<(), DriveError>,
) -> Result<T, VmError> {
    match (work, unmount) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup)) => Err(VmError::Cleanup(cleanup)),
        (Err(original), Ok(())) => Err(original),
        (Err(original), Err(cleanup)) => Err(VmError::CleanupAfterFailure {
            original: Box::new(original),
            cleanup,
        }),
    }
}
