//! Lowering of scheduled functions into logical cycle plans.
//!
//! A physical renderer (RTL, simulation) consumes [Plan]s without making any
//! scheduling or forwarding decision of its own.
mod lower;
mod plan;
mod printer;

pub use lower::Lower;
pub use plan::{
    Counter, Expr, Guard, Guarded, Join, Plan, PortComp, PortSignal, Register,
    Signal, Slot, Stmt, Transition, Wire,
};
pub use printer::PlanPrinter;
