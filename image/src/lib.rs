mod cache;
mod error;
mod fetcher;
mod unpack;

pub use cache::LayerCache;
pub use error::ImageError;
pub use fetcher::{CachedLayer, Fetcher};
pub use unpack::extract_layer;
