mod client;
mod error;
mod reference;
mod types;

pub use client::RegistryClient;
pub use error::RegistryError;
pub use reference::ImageReference;
pub use types::{ImageManifest, LayerDescriptor, RuntimeConfig};
