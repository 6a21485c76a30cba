//! Flattening of the temporal AST into blocks of values.
//!
//! Each loop body becomes its own [Block] whose time origin is the loop's
//! iteration start. Everything outside loops goes into an `entry` block
//! anchored at reset, which is dropped when it ends up empty. Branch and
//! switch arms are inlined into the enclosing block as predicated values.
//! Temporaries are renamed into SSA form on the way; a temporary with more
//! than one reaching definition after a branch gets a `phi`.
//!
//! Time variables are resolved in two steps. Equalities (offsets, waits and
//! `tset`) are collapsed by a weighted union-find over the whole module. Per
//! block, a variable in the same class as the block origin becomes a
//! constant; every other class becomes a [TimeClass] of that block, related
//! to values by [TimeRelation]s.
use crate::structure::{
    Block, Condition, Event, Function, Predicate, Value, ValueIdx, ValueKind,
};
use crate::time::{ClassIdx, JoinPoint, TimeClass, TimeRelation, TimeTerm, WaitSlot};
use itertools::Itertools;
use redstone_frontend::{self as ast, ActionId, RegionId, TVar, VarId};
use redstone_utils::{
    Error, Id, IndexRef, IndexedMap, NameGenerator, RedstoneResult,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Current definition of every temporary.
type Env = BTreeMap<VarId, ValueIdx>;

/// Weighted union-find over time variables. `offset[t]` is
/// `time(t) - time(parent[t])`.
struct TimeUnion {
    parent: Vec<TVar>,
    offset: Vec<i64>,
}

impl TimeUnion {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).map(TVar::new).collect(),
            offset: vec![0; size],
        }
    }

    /// The class representative of `t` and `time(t) - time(root)`.
    fn find(&self, mut t: TVar) -> (TVar, i64) {
        let mut off = 0;
        while self.parent[t.index()] != t {
            off += self.offset[t.index()];
            t = self.parent[t.index()];
        }
        (t, off)
    }

    /// Record `time(a) == time(b) + k`. Returns whether two classes merged.
    fn union(
        &mut self,
        a: TVar,
        b: TVar,
        k: i64,
        tvars: &IndexedMap<TVar, ast::TimeVar>,
    ) -> RedstoneResult<bool> {
        let (ra, oa) = self.find(a);
        let (rb, ob) = self.find(b);
        if ra == rb {
            if oa != ob + k {
                return Err(Error::conflicting_time(format!(
                    "`{}' is required to equal `{}' + {k}, but is already `{}' + {}",
                    tvars[a].name,
                    tvars[b].name,
                    tvars[b].name,
                    oa - ob
                )));
            }
            return Ok(false);
        }
        self.parent[ra.index()] = rb;
        self.offset[ra.index()] = ob + k - oa;
        Ok(true)
    }

    fn from_module(module: &ast::Module) -> RedstoneResult<Self> {
        let mut uf = Self::new(module.tvars.len());
        for (t, tv) in module.tvars.iter() {
            match &tv.def {
                ast::TimeDef::Offset { base, delay } => {
                    uf.union(t, *base, *delay as i64, &module.tvars)?;
                }
                ast::TimeDef::Wait { at, .. } => {
                    uf.union(t, *at, 0, &module.tvars)?;
                }
                _ => {}
            }
        }
        for rel in &module.relations {
            if rel.rel == ast::Relation::Eq {
                uf.union(rel.lhs, rel.rhs, 0, &module.tvars)?;
            }
        }

        // A maximum of two variables in the same class is known statically.
        // Resolving one may put the operands of another into one class.
        let maxes = module
            .tvars
            .iter()
            .filter_map(|(t, tv)| match tv.def {
                ast::TimeDef::StaticMax(a, b) => Some((t, a, b)),
                _ => None,
            })
            .collect_vec();
        let mut changed = true;
        while changed {
            changed = false;
            for (t, a, b) in &maxes {
                let (ra, oa) = uf.find(*a);
                let (rb, ob) = uf.find(*b);
                if ra == rb {
                    let larger = if oa >= ob { *a } else { *b };
                    changed |= uf.union(*t, larger, 0, &module.tvars)?;
                }
            }
        }
        Ok(uf)
    }
}

/// What `tphi` needs to know about a flattened branch.
struct BranchInfo {
    block: usize,
    at: Option<TimeTerm>,
    selector: Event,
    arm_values: Vec<ValueIdx>,
}

/// Per-block state of the flattener.
struct BlockState {
    idx: usize,
    name: Id,
    /// Class representative of the block origin and the origin's offset
    /// from it.
    origin: (TVar, i64),
    classes: HashMap<TVar, ClassIdx>,
    /// Class representatives referenced by the block, in order.
    referenced: Vec<TVar>,
    seen: HashSet<TVar>,
}

impl BlockState {
    fn touch(&mut self, root: TVar) {
        if self.seen.insert(root) {
            self.referenced.push(root);
        }
    }
}

struct Flattener<'a> {
    module: &'a ast::Module,
    uf: TimeUnion,
    /// Members of each union-find class.
    members: HashMap<TVar, Vec<TVar>>,
    func: Function,
    branches: HashMap<ActionId, BranchInfo>,
    wait_events: HashMap<TVar, Event>,
    namegen: NameGenerator,
}

impl<'a> Flattener<'a> {
    fn new(module: &'a ast::Module, uf: TimeUnion) -> Self {
        let mut members: HashMap<TVar, Vec<TVar>> = HashMap::new();
        for t in module.tvars.keys() {
            members.entry(uf.find(t).0).or_default().push(t);
        }
        let mut func = Function::new(module.name);
        func.ports = module.ports.clone();
        func.instances = module.instances.values().cloned().collect();
        Self {
            module,
            uf,
            members,
            func,
            branches: HashMap::new(),
            wait_events: HashMap::new(),
            namegen: NameGenerator::default(),
        }
    }

    fn var_name(&self, var: VarId) -> String {
        match self.module.vars[var].name {
            Some(n) => n.to_string(),
            None => format!("{var:?}"),
        }
    }

    fn lookup(
        &self,
        var: VarId,
        env: &Env,
        bs: &BlockState,
    ) -> RedstoneResult<ValueIdx> {
        env.get(&var).copied().ok_or_else(|| {
            Error::undefined_value(format!(
                "temporary `{}' is used before it is defined in block `{}'",
                self.var_name(var),
                bs.name
            ))
        })
    }

    fn convert_event(
        &self,
        event: &ast::Event,
        env: &Env,
        bs: &BlockState,
    ) -> RedstoneResult<Event> {
        Ok(match event {
            ast::Event::Level(ast::Condition::Port(p)) => {
                Event::Level(Condition::Port(*p))
            }
            ast::Event::Level(ast::Condition::Var(v)) => {
                Event::Level(Condition::Value(self.lookup(*v, env, bs)?))
            }
            ast::Event::Pulse(p) => Event::Pulse(*p),
        })
    }

    /* ============================ Time ============================ */

    /// The cycle of `t` relative to the origin of the block.
    fn term(&mut self, bs: &mut BlockState, t: TVar) -> TimeTerm {
        let (root, off) = self.uf.find(t);
        bs.touch(root);
        let (origin, origin_off) = bs.origin;
        if root == origin {
            return TimeTerm::Const(off - origin_off);
        }
        let name = self.module.tvars[root].name;
        let classes = &mut self.func.blocks[bs.idx].timing.classes;
        let class = *bs.classes.entry(root).or_insert_with(|| {
            classes.push(TimeClass {
                name,
                resolved: None,
            })
        });
        let term = TimeTerm::Class(class, off);
        if off < 0 {
            // The representative is unknown but its members are cycles too.
            self.push_unique(bs, TimeRelation::le(TimeTerm::Const(0), term));
        }
        term
    }

    fn push_unique(&mut self, bs: &BlockState, rel: TimeRelation) {
        let relations = &mut self.func.blocks[bs.idx].timing.relations;
        if !relations.contains(&rel) {
            relations.push(rel);
        }
    }

    fn relate(
        &mut self,
        bs: &BlockState,
        rel: TimeRelation,
    ) -> RedstoneResult<()> {
        match rel.holds_statically() {
            Some(true) => Ok(()),
            Some(false) => Err(Error::conflicting_time(format!(
                "`{rel}' can never hold in block `{}'",
                bs.name
            ))),
            None => {
                self.push_unique(bs, rel);
                Ok(())
            }
        }
    }

    /// Bind value `idx` to `timing` and to every enclosing arm's start.
    fn place(
        &mut self,
        bs: &mut BlockState,
        idx: ValueIdx,
        timing: ast::Timing,
        ats: &[TimeTerm],
    ) -> RedstoneResult<()> {
        let this = TimeTerm::Value(idx, 0);
        for at in ats {
            self.relate(bs, TimeRelation::le(*at, this))?;
        }
        match timing {
            ast::Timing::Free => {}
            ast::Timing::At(t) => match self.term(bs, t) {
                TimeTerm::Const(k) if k >= 0 => {
                    self.func.values[idx].time = Some(k as u64)
                }
                TimeTerm::Const(k) => {
                    return Err(Error::conflicting_time(format!(
                        "`{}' would be placed at cycle {k} of block `{}'",
                        self.module.tvars[t].name, bs.name
                    )))
                }
                term => self.relate(bs, TimeRelation::eq(this, term))?,
            },
            ast::Timing::Within(lo, hi) => {
                if let Some(lo) = lo {
                    let lo = self.term(bs, lo);
                    self.relate(bs, TimeRelation::le(lo, this))?;
                }
                if let Some(hi) = hi {
                    let hi = self.term(bs, hi);
                    self.relate(bs, TimeRelation::le(this, hi))?;
                }
            }
        }
        Ok(())
    }

    /// An event observed at `at` reads its source value no later than `at`.
    /// Sources defined in an enclosing block are already available.
    fn observe(
        &mut self,
        bs: &BlockState,
        event: Event,
        at: TimeTerm,
    ) -> RedstoneResult<()> {
        match event.source() {
            Some(src) if self.func.blocks[bs.idx].body.contains(&src) => {
                self.relate(bs, TimeRelation::le(TimeTerm::Value(src, 0), at))
            }
            _ => Ok(()),
        }
    }

    /// Relations contributed by the special members of every class the
    /// block references: maxima, runtime joins and waits.
    fn expand_classes(
        &mut self,
        bs: &mut BlockState,
        env: &Env,
    ) -> RedstoneResult<()> {
        let module = self.module;
        let mut next = 0;
        while next < bs.referenced.len() {
            let root = bs.referenced[next];
            next += 1;
            let members = self.members.get(&root).cloned().unwrap_or_default();
            for t in members {
                match &module.tvars[t].def {
                    ast::TimeDef::StaticMax(a, b) => {
                        let this = self.term(bs, t);
                        for operand in [*a, *b] {
                            let operand = self.term(bs, operand);
                            self.relate(bs, TimeRelation::le(operand, this))?;
                        }
                    }
                    ast::TimeDef::RuntimeJoin { branch, .. } => {
                        let this = self.term(bs, t);
                        let Some(info) = self.branches.get(branch) else {
                            return Err(Error::malformed(format!(
                                "`{}' joins a branch that is not part of block `{}'",
                                self.module.tvars[t].name, bs.name
                            )));
                        };
                        if info.block != bs.idx {
                            return Err(Error::malformed(format!(
                                "`{}' joins a branch of another block",
                                self.module.tvars[t].name
                            )));
                        }
                        let mut rels = info
                            .arm_values
                            .iter()
                            .map(|v| TimeRelation::le(TimeTerm::Value(*v, 0), this))
                            .collect_vec();
                        if let Some(at) = info.at {
                            rels.push(TimeRelation::le(at, this));
                        }
                        let join = JoinPoint {
                            at: this,
                            selector: info.selector,
                        };
                        for rel in rels {
                            self.relate(bs, rel)?;
                        }
                        self.observe(bs, join.selector, this)?;
                        self.func.blocks[bs.idx].timing.joins.push(join);
                    }
                    ast::TimeDef::Wait { event, .. } => {
                        let event = match self.wait_events.get(&t) {
                            Some(e) => *e,
                            None => self.convert_event(event, env, bs)?,
                        };
                        let at = self.term(bs, t);
                        self.observe(bs, event, at)?;
                        self.func.blocks[bs.idx]
                            .timing
                            .waits
                            .push(WaitSlot { at, event });
                    }
                    ast::TimeDef::Zero
                    | ast::TimeDef::Free
                    | ast::TimeDef::Offset { .. } => {}
                }
            }
        }
        Ok(())
    }

    /* ============================ Values ============================ */

    /// Translate one operation. Returns the value and the temporary it
    /// defines.
    fn op_value(
        &self,
        op: &ast::Op,
        env: &Env,
        bs: &BlockState,
    ) -> RedstoneResult<(Value, Option<VarId>)> {
        let var = |v: VarId| &self.module.vars[v];
        let port_width = |p: ast::PortId| self.module.ports[p].width;
        let (value, def) = match op {
            ast::Op::Read { from, to } => {
                (Value::read(*from, var(*to).width), Some(*to))
            }
            ast::Op::Sample { from, to } => {
                (Value::sample(*from, var(*to).width), Some(*to))
            }
            ast::Op::Write { from, to } => (
                Value::write(self.lookup(*from, env, bs)?, *to, port_width(*to)),
                None,
            ),
            ast::Op::Drive { from, to } => (
                Value::drive(self.lookup(*from, env, bs)?, *to, port_width(*to)),
                None,
            ),
            ast::Op::Add { operands, to }
            | ast::Op::Mul { operands, to }
            | ast::Op::BoolEq { operands, to } => {
                let kind = match op {
                    ast::Op::Add { .. } => ValueKind::Add,
                    ast::Op::Mul { .. } => ValueKind::Mul,
                    _ => ValueKind::BoolEq,
                };
                let a = self.lookup(operands[0], env, bs)?;
                let b = self.lookup(operands[1], env, bs)?;
                (Value::binary(kind, a, b, var(*to).width), Some(*to))
            }
            ast::Op::Emit { pulse } => (Value::emit(*pulse), None),
            ast::Op::Store { from, to } => (
                Value::store(self.lookup(*from, env, bs)?, var(*to).width),
                Some(*to),
            ),
            ast::Op::Phi { to } => (
                Value::phi(env.get(to).copied(), var(*to).width),
                Some(*to),
            ),
        };
        let value = match def.and_then(|d| var(d).name) {
            Some(name) => value.named(name),
            None => value,
        };
        Ok((value, def))
    }

    fn flatten_normal(
        &mut self,
        bs: &mut BlockState,
        action: &ast::NormalAction,
        env: &mut Env,
        preds: &[Predicate],
        ats: &[TimeTerm],
    ) -> RedstoneResult<()> {
        for op in &action.ops {
            let (mut value, def) = self.op_value(op, env, bs)?;
            value.predicates = preds.to_vec();
            let idx = self.func.push_value(bs.idx, value);
            if let Some(var) = def {
                env.insert(var, idx);
            }
            self.place(bs, idx, action.timing, ats)?;
        }
        Ok(())
    }

    /// Merge the environments reaching the end of each arm. Temporaries with
    /// more than one reaching definition get a `phi`.
    fn merge_arms(
        &mut self,
        bs: &BlockState,
        before: &Env,
        mut arms: Vec<Env>,
        exhaustive: bool,
        preds: &[Predicate],
    ) -> Env {
        if !exhaustive {
            arms.push(before.clone());
        }
        let vars: BTreeSet<VarId> =
            arms.iter().flat_map(|e| e.keys().copied()).collect();
        let mut merged = before.clone();
        for var in vars {
            let defs = arms
                .iter()
                .filter_map(|e| e.get(&var).copied())
                .unique()
                .collect_vec();
            let def = match defs.as_slice() {
                [] => continue,
                [single] => *single,
                _ => {
                    let v = &self.module.vars[var];
                    let mut phi = Value::phi(defs, v.width);
                    phi.name = v.name;
                    phi.predicates = preds.to_vec();
                    log::debug!(
                        "Inserting phi for `{}' in block `{}'",
                        self.var_name(var),
                        bs.name
                    );
                    self.func.push_value(bs.idx, phi)
                }
            };
            merged.insert(var, def);
        }
        merged
    }

    /// Predicates for the values of an arm: the enclosing ones, the arm's
    /// own selector and the arm region's guard.
    fn arm_predicates(
        &self,
        preds: &[Predicate],
        arm: Predicate,
        region: RegionId,
        env: &Env,
        bs: &BlockState,
    ) -> RedstoneResult<Vec<Predicate>> {
        let mut out = preds.to_vec();
        out.push(arm);
        if let Some(guard) = &self.module.regions[region].guard {
            out.push(Predicate::When(self.convert_event(guard, env, bs)?));
        }
        Ok(out)
    }

    fn flatten_region(
        &mut self,
        bs: &mut BlockState,
        region: RegionId,
        env: &mut Env,
        preds: &[Predicate],
        ats: &[TimeTerm],
    ) -> RedstoneResult<()> {
        let module = self.module;
        for item in &module.regions[region].items {
            match item {
                ast::Item::Var(_) => {}
                ast::Item::TVar(t) => {
                    if let ast::TimeDef::Wait { event, .. } = &module.tvars[*t].def
                    {
                        let event = self.convert_event(event, env, bs)?;
                        self.wait_events.insert(*t, event);
                    }
                }
                ast::Item::Relation(idx) => {
                    let rel = &module.relations[*idx];
                    // Equalities were collapsed by the union-find.
                    if let ast::Relation::Before { strict } = rel.rel {
                        let lhs = self.term(bs, rel.lhs);
                        let rhs = self.term(bs, rel.rhs);
                        let rel = if strict {
                            TimeRelation::lt(lhs, rhs)
                        } else {
                            TimeRelation::le(lhs, rhs)
                        };
                        self.relate(bs, rel)?;
                    }
                }
                ast::Item::Action(id) => {
                    self.flatten_action(bs, *id, env, preds, ats)?
                }
            }
        }
        Ok(())
    }

    fn flatten_action(
        &mut self,
        bs: &mut BlockState,
        id: ActionId,
        env: &mut Env,
        preds: &[Predicate],
        ats: &[TimeTerm],
    ) -> RedstoneResult<()> {
        let module = self.module;
        match &module.actions[id] {
            ast::Action::Normal(action) => {
                self.flatten_normal(bs, action, env, preds, ats)
            }
            ast::Action::Loop(l) => {
                if !preds.is_empty() {
                    log::warn!(
                        "Loop nested in a conditional arm of block `{}' becomes an unconditional block",
                        bs.name
                    );
                }
                let name = self.namegen.gen_name("loop");
                self.flatten_block(
                    l.body,
                    l.iter_start,
                    name,
                    env.clone(),
                    Some(l.next_iter_start),
                )?;
                Ok(())
            }
            ast::Action::Branch(b) => {
                let cond = self.convert_event(&b.condition, env, bs)?;
                let at = b.at.map(|t| self.term(bs, t));
                let ats = ats.iter().copied().chain(at).collect_vec();
                let start = self.func.blocks[bs.idx].body.len();
                let mut arms = Vec::with_capacity(2);
                for (region, arm) in [
                    (b.true_region, Predicate::When(cond)),
                    (b.false_region, Predicate::Unless(cond)),
                ] {
                    let mut arm_env = env.clone();
                    let arm_preds =
                        self.arm_predicates(preds, arm, region, &arm_env, bs)?;
                    self.flatten_region(
                        bs,
                        region,
                        &mut arm_env,
                        &arm_preds,
                        &ats,
                    )?;
                    arms.push(arm_env);
                }
                let arm_values = self.func.blocks[bs.idx].body[start..].to_vec();
                self.branches.insert(
                    id,
                    BranchInfo {
                        block: bs.idx,
                        at,
                        selector: cond,
                        arm_values,
                    },
                );
                *env = self.merge_arms(bs, env, arms, true, preds);
                Ok(())
            }
            ast::Action::Switch(s) => {
                let selector = self.lookup(s.selector, env, bs)?;
                let at = s.at.map(|t| self.term(bs, t));
                let ats = ats.iter().copied().chain(at).collect_vec();
                let cases = s.cases.keys().copied().collect_vec();
                let arms_iter = s
                    .cases
                    .iter()
                    .map(|(value, region)| {
                        (
                            *region,
                            Predicate::Case {
                                selector,
                                value: *value,
                            },
                        )
                    })
                    .chain(s.default.map(|region| {
                        (
                            region,
                            Predicate::Default {
                                selector,
                                cases: cases.clone(),
                            },
                        )
                    }))
                    .collect_vec();
                let mut arms = Vec::with_capacity(arms_iter.len());
                for (region, arm) in arms_iter {
                    let mut arm_env = env.clone();
                    let arm_preds =
                        self.arm_predicates(preds, arm, region, &arm_env, bs)?;
                    self.flatten_region(
                        bs,
                        region,
                        &mut arm_env,
                        &arm_preds,
                        &ats,
                    )?;
                    arms.push(arm_env);
                }
                *env = self.merge_arms(
                    bs,
                    env,
                    arms,
                    s.default.is_some(),
                    preds,
                );
                Ok(())
            }
        }
    }

    /// Flatten `region` into a new block whose cycle 0 is `origin`.
    fn flatten_block(
        &mut self,
        region: RegionId,
        origin: TVar,
        name: Id,
        mut env: Env,
        next_iteration: Option<TVar>,
    ) -> RedstoneResult<usize> {
        let (root, off) = self.uf.find(origin);
        let mut bs = BlockState {
            idx: self.func.blocks.len(),
            name,
            origin: (root, off),
            classes: HashMap::new(),
            referenced: Vec::new(),
            seen: HashSet::new(),
        };
        bs.touch(root);
        let guard = self.module.regions[region]
            .guard
            .map(|g| self.convert_event(&g, &env, &bs))
            .transpose()?;
        self.func.add_block(Block::new(name, guard));

        self.flatten_region(&mut bs, region, &mut env, &[], &[])?;

        if let Some(next) = next_iteration {
            let next = self.term(&mut bs, next);
            // The next iteration cannot start before the current one.
            self.relate(&bs, TimeRelation::le(TimeTerm::Const(0), next))?;
            self.func.blocks[bs.idx].timing.next_iteration = Some(next);
        }
        self.expand_classes(&mut bs, &env)?;
        Ok(bs.idx)
    }
}

/// Flatten `module` into a [Function].
pub fn ast_to_ir(module: &ast::Module) -> RedstoneResult<Function> {
    let uf = TimeUnion::from_module(module)?;
    let mut flattener = Flattener::new(module, uf);
    let entry = flattener.namegen.gen_name("entry");
    let top = flattener.flatten_block(
        module.top,
        module.tzero,
        entry,
        Env::new(),
        None,
    )?;
    let mut func = flattener.func;
    let block = &func.blocks[top];
    if block.body.is_empty() && block.timing.waits.is_empty() {
        func.blocks.remove(top);
    }
    log::info!(
        "Flattened `{}' into {} block(s) with {} value(s)",
        func.name,
        func.blocks.len(),
        func.values.len()
    );
    Ok(func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use redstone_frontend::{BuildContext, Op};
    use redstone_utils::ErrorKind;

    #[test]
    fn offsets_resolve_to_constants() {
        let mut ctx = BuildContext::start_module("m");
        let a = ctx.input(8, Some("a"));
        let o = ctx.output(8, Some("o"));
        {
            let t0 = ctx.tzero();
            let mut body = ctx.loop_at(Some(t0));
            let (cur, next) = (body.iter_start, body.next_iter_start);
            let x = body.value(8, Some("x"));
            let t2 = body.delay(cur, 2);
            body.at(cur).perform([Op::read(a, x)]).unwrap();
            body.at(t2).perform([Op::write(x, o)]).unwrap();
            let t3 = body.delay(t2, 1);
            body.tset(next, t3);
        }
        let f = ast_to_ir(&ctx.finish()).unwrap();
        assert_eq!(f.blocks.len(), 1);
        let block = &f.blocks[0];
        let times = block.body.iter().map(|v| f.values[*v].time).collect_vec();
        assert_eq!(times, vec![Some(0), Some(2)]);
        assert_eq!(block.timing.next_iteration, Some(TimeTerm::Const(3)));
        assert!(block.timing.classes.is_empty());
    }

    #[test]
    fn contradictory_offsets_conflict() {
        let mut ctx = BuildContext::start_module("m");
        let t0 = ctx.tzero();
        let t1 = ctx.delay(t0, 1);
        let t2 = ctx.delay(t0, 2);
        ctx.tset(t1, t2);
        let err = ast_to_ir(&ctx.finish()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConflictingTimeRelation);
    }

    #[test]
    fn static_before_is_checked() {
        let mut ctx = BuildContext::start_module("m");
        let t0 = ctx.tzero();
        let t1 = ctx.delay(t0, 1);
        ctx.tbefore(t1, t0, false);
        let err = ast_to_ir(&ctx.finish()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConflictingTimeRelation);
    }

    #[test]
    fn tmax_of_known_times_is_known() {
        let mut ctx = BuildContext::start_module("m");
        let a = ctx.input(8, Some("a"));
        let x = ctx.value(8, Some("x"));
        let t0 = ctx.tzero();
        let t3 = ctx.delay(t0, 3);
        let t1 = ctx.delay(t0, 1);
        let m = ctx.tmax(t3, t1);
        ctx.at(m).perform([Op::read(a, x)]).unwrap();
        let f = ast_to_ir(&ctx.finish()).unwrap();
        assert_eq!(f.values[ValueIdx::new(0)].time, Some(3));
    }

    #[test]
    fn branch_merges_with_phi() {
        let mut ctx = BuildContext::start_module("m");
        let a = ctx.input(8, Some("a"));
        let s = ctx.input(1, Some("s"));
        let vars = ctx.values(&[8, 1, 8], "x sel out");
        let (x, sel, out) = (vars[0], vars[1], vars[2]);
        ctx.perform([Op::read(a, x), Op::read(s, sel)]).unwrap();
        let handle = {
            let mut br = ctx.branch(ast::Event::var(sel), None).unwrap();
            br.then().perform([Op::add(x, x, out)]).unwrap();
            br.otherwise().perform([Op::mul(x, x, out)]).unwrap();
            br.handle()
        };
        let join = ctx.tphi(handle);
        let o = ctx.output(8, Some("o"));
        ctx.at(join).perform([Op::write(out, o)]).unwrap();
        let f = ast_to_ir(&ctx.finish()).unwrap();

        let block = &f.blocks[0];
        let kinds = block.body.iter().map(|v| f.values[*v].kind).collect_vec();
        assert_eq!(
            kinds,
            vec![
                ValueKind::Read,
                ValueKind::Read,
                ValueKind::Add,
                ValueKind::Mul,
                ValueKind::Phi,
                ValueKind::Write
            ]
        );
        let sel_def = block.body[1];
        let add = &f.values[block.body[2]];
        assert_eq!(
            add.predicates,
            vec![Predicate::When(Event::Level(Condition::Value(sel_def)))]
        );
        let phi = &f.values[block.body[4]];
        assert_eq!(phi.operands.as_slice(), &[block.body[2], block.body[3]]);
        let write = &f.values[block.body[5]];
        assert_eq!(write.operands.as_slice(), &[block.body[4]]);
        assert_eq!(block.timing.joins.len(), 1);
        assert_eq!(block.timing.classes.len(), 1);
    }

    #[test]
    fn undefined_temporary_is_reported() {
        let mut ctx = BuildContext::start_module("m");
        let o = ctx.output(8, Some("o"));
        let x = ctx.value(8, Some("x"));
        ctx.perform([Op::write(x, o)]).unwrap();
        let err = ast_to_ir(&ctx.finish()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UndefinedValueReference);
        assert!(err.message().contains("`x'"));
    }

    #[test]
    fn wait_shares_the_slot_of_its_start() {
        let mut ctx = BuildContext::start_module("m");
        let go = ctx.input_pulse(Some("go"));
        let a = ctx.input(8, Some("a"));
        let x = ctx.value(8, Some("x"));
        let t0 = ctx.tzero();
        let t1 = ctx.delay(t0, 1);
        let w = ctx.wait(ast::Event::Pulse(go), t1).unwrap();
        ctx.at(w).perform([Op::sample(a, x)]).unwrap();
        let f = ast_to_ir(&ctx.finish()).unwrap();
        let block = &f.blocks[0];
        assert_eq!(f.values[block.body[0]].time, Some(1));
        assert_eq!(
            block.timing.waits,
            vec![WaitSlot {
                at: TimeTerm::Const(1),
                event: Event::Pulse(go)
            }]
        );
    }

    #[test]
    fn wait_on_a_value_is_no_earlier_than_the_value() {
        let mut ctx = BuildContext::start_module("m");
        let a = ctx.input(1, Some("a"));
        let done = ctx.output_pulse(Some("done"));
        let x = ctx.value(1, Some("x"));
        let t0 = ctx.tzero();
        let t1 = ctx.delay(t0, 1);
        ctx.at(t1).perform([Op::read(a, x)]).unwrap();
        let t = ctx.tvar();
        let w = ctx.wait(ast::Event::var(x), t).unwrap();
        ctx.at(w).perform([Op::emit(done)]).unwrap();
        let f = ast_to_ir(&ctx.finish()).unwrap();
        let block = &f.blocks[0];
        let read = block.body[0];
        let (class, _) = block.timing.classes.iter().next().unwrap();
        assert_eq!(
            block.timing.waits,
            vec![WaitSlot {
                at: TimeTerm::Class(class, 0),
                event: Event::Level(Condition::Value(read))
            }]
        );
        assert!(block.timing.relations.contains(&TimeRelation::le(
            TimeTerm::Value(read, 0),
            TimeTerm::Class(class, 0)
        )));
    }
}
