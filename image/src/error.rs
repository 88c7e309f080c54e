use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("layer not cached: {0}")]
    LayerNotCached(String),

    #[error("unpack failed: {0}")]
    UnpackFailure(String),

    #[error("registry error: {0}")]
    Registry(#[from] cinder_remote::RegistryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
