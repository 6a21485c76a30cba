use crate::analysis::DependencyGraph;
use crate::solver::{
    Cmp, DifferenceSolver, IntegerProgram, LinearConstraint, Solver,
    SolverStatus,
};
use crate::traversal::{ConstructVisitor, Named, ParseVal, PassOpt, Visitor};
use itertools::Itertools;
use redstone_ir::{self as ir, TimeOp, TimeTerm, ValueIdx, ValueKind};
use redstone_utils::{Error, IndexRef, RedstoneResult};
use std::collections::HashMap;

/// Assigns every value of a block the earliest cycle that satisfies its
/// dependencies, its anchors and the block's time relations, minimizing the
/// block's makespan.
///
/// The problem is an integer program with one variable per value, one per
/// unresolved time class and a `total_time` bounding all values from above.
/// Producer and consumer may share a cycle. Times are only written back when
/// the solver reports an optimal solution, so a failed block is left exactly
/// as it was.
pub struct AsapSchedule {
    objective: String,
    solver: Box<dyn Solver>,
}

impl Named for AsapSchedule {
    fn name() -> &'static str {
        "schedule"
    }

    fn description() -> &'static str {
        "assign the earliest feasible cycle to every value"
    }

    fn opts() -> Vec<PassOpt> {
        vec![
            PassOpt::new(
                "objective",
                "scheduling objective; only ASAP is supported",
                ParseVal::Str("ASAP".to_string()),
                PassOpt::parse_str,
            ),
            PassOpt::new(
                "verbose",
                "log solver progress at info level",
                ParseVal::Bool(false),
                PassOpt::parse_bool,
            ),
        ]
    }
}

impl ConstructVisitor for AsapSchedule {
    fn from(ctx: &ir::Context) -> RedstoneResult<Self> {
        let opts = Self::get_opts(ctx);
        Ok(Self::new(opts["objective"].string(), opts["verbose"].bool()))
    }

    fn clear_data(&mut self) {
        /* All data can be transferred between functions */
    }
}

impl AsapSchedule {
    pub fn new(objective: &str, verbose: bool) -> Self {
        Self {
            objective: objective.to_string(),
            solver: Box::new(DifferenceSolver::new(verbose)),
        }
    }

    /// Use `solver` instead of the built-in difference solver.
    pub fn with_solver<S: Solver + 'static>(mut self, solver: S) -> Self {
        self.solver = Box::new(solver);
        self
    }

    /// Schedule block `block` of `func` in place.
    pub fn schedule_block(
        &self,
        func: &mut ir::Function,
        block: usize,
    ) -> RedstoneResult<()> {
        if self.objective != "ASAP" {
            return Err(Error::unsupported_objective(&self.objective));
        }
        let blk = &func.blocks[block];
        let graph = DependencyGraph::from_block(func, blk)?;

        let mut prog = IntegerProgram::default();
        let ts = blk
            .body
            .iter()
            .map(|v| prog.add_var(func.value_name(*v)))
            .collect_vec();
        let value_var: HashMap<ValueIdx, usize> =
            blk.body.iter().copied().zip(ts.iter().copied()).collect();
        let class_vars = blk
            .timing
            .classes
            .values()
            .map(|c| prog.add_var(c.name))
            .collect_vec();
        let total = prog.add_var("total_time");

        for (pos, idx) in blk.body.iter().enumerate() {
            let value = &func.values[*idx];
            prog.add_constraint(LinearConstraint::difference(total, ts[pos], 0));
            if value.kind == ValueKind::Phi {
                prog.add_constraint(LinearConstraint::fix(ts[pos], 0));
            }
            if let Some(time) = value.time {
                prog.add_constraint(LinearConstraint::fix(ts[pos], time as i64));
            }
        }
        for (class, var) in blk.timing.classes.values().zip(&class_vars) {
            if let Some(time) = class.resolved {
                prog.add_constraint(LinearConstraint::fix(*var, time as i64));
            }
        }
        for (producer, consumer) in graph.edges() {
            prog.add_constraint(LinearConstraint::difference(
                ts[*consumer],
                ts[*producer],
                0,
            ));
        }

        let term_var = |term: &TimeTerm| -> RedstoneResult<(Option<usize>, i64)> {
            match term {
                TimeTerm::Const(k) => Ok((None, *k)),
                TimeTerm::Class(c, k) => Ok((Some(class_vars[c.index()]), *k)),
                TimeTerm::Value(v, k) => match value_var.get(v) {
                    Some(var) => Ok((Some(*var), *k)),
                    None => Err(Error::undefined_value(format!(
                        "time relation of block `{}' refers to `{}', which is not part of the block",
                        blk.name,
                        func.value_name(*v)
                    ))),
                },
            }
        };
        for rel in &blk.timing.relations {
            let (lv, lk) = term_var(&rel.lhs)?;
            let (rv, rk) = term_var(&rel.rhs)?;
            // lhs op rhs  <=>  rv - lv cmp lk - rk
            let terms = rv
                .map(|v| (v, 1))
                .into_iter()
                .chain(lv.map(|v| (v, -1)))
                .collect_vec();
            let constraint = match rel.op {
                TimeOp::Le => LinearConstraint::new(terms, Cmp::Ge, lk - rk),
                TimeOp::Lt => LinearConstraint::new(terms, Cmp::Ge, lk - rk + 1),
                TimeOp::Eq => LinearConstraint::new(terms, Cmp::Eq, lk - rk),
            };
            prog.add_constraint(constraint);
        }
        prog.minimize(total);

        let response = self.solver.solve(&prog);
        if response.status != SolverStatus::Optimal {
            return Err(Error::scheduling_infeasible(format!(
                "block `{}' of `{}': solver reported {:?}",
                blk.name, func.name, response.status
            )));
        }

        let body = blk.body.clone();
        for (pos, idx) in body.iter().enumerate() {
            func.values[*idx].time = Some(response.values[ts[pos]] as u64);
        }
        let timing = &mut func.blocks[block].timing;
        for (class, var) in timing.classes.values_mut().zip(&class_vars) {
            class.resolved = Some(response.values[*var] as u64);
        }
        log::info!(
            "Scheduled block `{}' of `{}' with makespan {}",
            func.blocks[block].name,
            func.name,
            response.values[total]
        );
        Ok(())
    }
}

impl Visitor for AsapSchedule {
    fn block(
        &mut self,
        func: &mut ir::Function,
        block: usize,
    ) -> RedstoneResult<()> {
        self.schedule_block(func, block)
    }
}
