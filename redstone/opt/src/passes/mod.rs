//! Passes that transform functions in place.
mod schedule;

pub use schedule::AsapSchedule;
