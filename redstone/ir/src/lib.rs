//! Internal representation for the Redstone compiler.
//!
//! A [Function] holds an arena of [Value]s and a list of [Block]s. Each block
//! is an ordered sequence of values sharing one time origin, together with
//! the [TimeTable] of relations that the scheduler must honour.
mod context;
mod from_ast;
mod printer;
mod structure;
mod time;

pub use context::Context;
pub use from_ast::ast_to_ir;
pub use printer::Printer;
pub use structure::{
    Block, Condition, Event, Function, Predicate, Value, ValueIdx, ValueKind,
};
pub use time::{
    ClassIdx, JoinPoint, TimeClass, TimeOp, TimeRelation, TimeTable, TimeTerm,
    WaitSlot,
};

pub use redstone_frontend::{Direction, Instance, Port, PortId, SignalKind};
