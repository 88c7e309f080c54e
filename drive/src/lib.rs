mod drive;
mod error;
mod size;

pub use drive::{Drive, DriveSpec, allocate};
pub use error::DriveError;
pub use size::parse_size;
