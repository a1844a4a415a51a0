//! Market data feeds - synthetic ticker generation

pub mod synthetic;

pub use synthetic::SyntheticFeed;
