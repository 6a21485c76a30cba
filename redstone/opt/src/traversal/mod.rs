//! Helpers for writing passes over functions.
mod construct;
mod visitor;

pub use construct::{ConstructVisitor, Named, ParseVal, PassOpt};
pub use visitor::Visitor;
