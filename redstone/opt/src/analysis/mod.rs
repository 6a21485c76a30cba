//! Analysis passes. These do not transform the program but compute
//! information that transformations rely on.
mod dependency;

pub use dependency::DependencyGraph;
