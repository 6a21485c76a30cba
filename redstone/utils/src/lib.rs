//! Shared utilities for the Redstone compiler.
mod errors;
mod global_sym;
mod id;
mod namegenerator;

pub mod idx;
pub mod math;

pub use errors::{Error, ErrorKind, RedstoneResult};
pub use global_sym::GSym;
pub use id::{GetName, Id};
pub use idx::{IndexRef, IndexedMap};
pub use math::bits_needed_for;
pub use namegenerator::NameGenerator;
