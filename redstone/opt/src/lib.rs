//! Optimizations and analyses for the Redstone IR.
pub mod analysis;
pub mod passes;
pub mod solver;
pub mod traversal;
