//! # The Redstone Compiler
//!
//! This crate plumbs together the Redstone compiler crates. A module built
//! with [frontend::BuildContext] is flattened into IR, every block is
//! scheduled as soon as possible and the single-block function is lowered to
//! a [backend::Plan] that a physical renderer consumes.
//!
//! Pass options use the `pass:opt=val` convention, e.g.
//! `schedule:verbose` or `lower:counter=fsm`.
pub use redstone_backend as backend;
pub use redstone_frontend as frontend;
pub use redstone_ir as ir;
pub use redstone_opt as opt;
pub use redstone_utils as utils;

use backend::{Lower, Plan, PlanPrinter};
use opt::passes::AsapSchedule;
use opt::traversal::Visitor;
use utils::RedstoneResult;

/// Flatten `module` and schedule every block of the result.
pub fn schedule_function(
    module: &frontend::Module,
    extra_opts: Vec<String>,
) -> RedstoneResult<ir::Context> {
    let mut ctx = ir::Context::from_module(module, extra_opts)?;
    AsapSchedule::do_pass_default(&mut ctx)?;
    Ok(ctx)
}

/// Schedule and lower every function of `ctx`.
pub fn compile_context(ctx: &mut ir::Context) -> RedstoneResult<Vec<Plan>> {
    AsapSchedule::do_pass_default(ctx)?;
    for func in &ctx.functions {
        log::debug!("{}", ir::Printer::function_to_string(func));
    }
    let lower = Lower::do_pass_default(ctx)?;
    for plan in lower.plans() {
        log::debug!("{}", PlanPrinter::plan_to_string(plan));
    }
    Ok(lower.into_plans())
}

/// Compile `module` into one plan per function.
pub fn compile(
    module: &frontend::Module,
    extra_opts: Vec<String>,
) -> RedstoneResult<Vec<Plan>> {
    let mut ctx = ir::Context::from_module(module, extra_opts)?;
    compile_context(&mut ctx)
}
