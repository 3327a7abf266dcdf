//! Common types shared across the multidim crates.

pub mod bbox;
pub mod error;

pub use bbox::BoundingBox;
pub use error::{MultidimError, MultidimResult};
