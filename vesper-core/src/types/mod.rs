//! Fundamental value types shared across the Vesper crates.

pub mod color;
pub mod geometry;

pub use color::Color;
pub use geometry::{Rect, RectInt, Size};
