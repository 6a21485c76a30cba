//! Frontend for Redstone: the temporal AST and the scoped builder that
//! constructs it.
pub mod ast;
mod context;

pub use ast::{
    port_name, Action, ActionId, BranchAction, Condition, Direction, Event,
    Instance, InstanceId, Item, LoopAction, Module, NormalAction, Op, Port,
    PortId, Region, RegionId, Relation, SignalKind, SwitchAction, TVar,
    TimeDef, TimeRelation, TimeVar, Timing, Var, VarId,
};
pub use context::{
    ArmScope, BranchHandle, BranchScope, BuildContext, LoopScope, SwitchScope,
    Timed,
};
