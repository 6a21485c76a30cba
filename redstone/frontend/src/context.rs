//! Scoped construction of [Module]s.
//!
//! A [BuildContext] owns the module under construction together with a stack
//! of open regions. Operations are appended to the region on top of the stack.
//! Loops and branch/switch arms open a child region through a guard object
//! that borrows the context and closes the region again when it is dropped,
//! so the parent region is restored on every exit path: normal completion, an
//! error propagated with `?`, or unwinding.
use crate::ast::{
    Action, ActionId, BranchAction, Condition, Direction, Event, Instance,
    InstanceId, Item, LoopAction, Module, NormalAction, Op, Port, PortId,
    Region, RegionId, Relation, SignalKind, SwitchAction, TVar, TimeDef,
    TimeRelation, TimeVar, Timing, Var, VarId,
};
use linked_hash_map::LinkedHashMap;
use redstone_utils::{Error, Id, NameGenerator, RedstoneResult};
use std::ops::{Deref, DerefMut};

/// Builds one [Module]. One context per compilation unit.
pub struct BuildContext {
    module: Module,
    /// Open regions; the first entry is always the module's top region.
    regions: Vec<RegionId>,
    namegen: NameGenerator,
}

impl BuildContext {
    /// Start building a new module called `name`.
    pub fn start_module(name: &str) -> Self {
        let module = Module::new(Id::from(name));
        let top = module.top;
        let namegen = NameGenerator::reserving(
            [module.tvars[module.tzero].name].into_iter().collect(),
        );
        Self {
            module,
            regions: vec![top],
            namegen,
        }
    }

    /// The module built so far.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Finish construction and return the module.
    pub fn finish(self) -> Module {
        self.module
    }

    /// The region operations are currently appended to.
    pub fn current_region(&self) -> RegionId {
        // The top region is never popped.
        self.regions[self.regions.len() - 1]
    }

    /// Depth of the region stack. The top region alone has depth 1.
    pub fn depth(&self) -> usize {
        self.regions.len()
    }

    fn push_item(&mut self, item: Item) {
        let cur = self.current_region();
        self.module.regions[cur].items.push(item);
    }

    fn enter_region(&mut self, region: RegionId) {
        self.regions.push(region);
    }

    fn exit_region(&mut self) {
        if self.regions.len() > 1 {
            self.regions.pop();
        }
    }

    fn new_region(&mut self, name: Option<Id>) -> RegionId {
        self.module.regions.push(Region {
            name,
            ..Default::default()
        })
    }

    fn new_tvar(&mut self, prefix: &str, def: TimeDef) -> TVar {
        let name = self.namegen.gen_name(prefix);
        let t = self.module.tvars.push(TimeVar { name, def });
        self.push_item(Item::TVar(t));
        t
    }

    fn push_action(&mut self, action: Action) -> ActionId {
        let id = self.module.actions.push(action);
        self.push_item(Item::Action(id));
        id
    }

    /* ============================ Ports ============================ */

    fn add_port(
        &mut self,
        name: Option<&str>,
        direction: Direction,
        kind: SignalKind,
        width: u64,
    ) -> PortId {
        self.module.ports.push(Port::new(
            name.map(Id::from),
            direction,
            kind,
            width,
        ))
    }

    /// Declare an input bus of `width` bits.
    pub fn input(&mut self, width: u64, name: Option<&str>) -> PortId {
        self.add_port(name, Direction::Input, SignalKind::Bus, width)
    }

    /// Declare an output bus of `width` bits.
    pub fn output(&mut self, width: u64, name: Option<&str>) -> PortId {
        self.add_port(name, Direction::Output, SignalKind::Bus, width)
    }

    /// Declare a one-bit input strobe.
    pub fn input_pulse(&mut self, name: Option<&str>) -> PortId {
        self.add_port(name, Direction::Input, SignalKind::Pulse, 1)
    }

    /// Declare a one-bit output strobe.
    pub fn output_pulse(&mut self, name: Option<&str>) -> PortId {
        self.add_port(name, Direction::Output, SignalKind::Pulse, 1)
    }

    /// Record a sub-component reference.
    pub fn instantiate<'b, I>(
        &mut self,
        module_name: &str,
        width: u64,
        depth: u64,
        ports: I,
    ) -> RedstoneResult<InstanceId>
    where
        I: IntoIterator<Item = (&'b str, PortId)>,
    {
        let mut bindings = LinkedHashMap::new();
        for (name, port) in ports {
            self.port(port)?;
            bindings.insert(Id::from(name), port);
        }
        Ok(self.module.instances.push(Instance {
            module_name: module_name.into(),
            width,
            depth,
            ports: bindings,
        }))
    }

    /* ========================== Temporaries ========================== */

    /// Declare a temporary of `width` bits in the current region.
    pub fn value(&mut self, width: u64, name: Option<&str>) -> VarId {
        let var = self.module.vars.push(Var {
            name: name.map(Id::from),
            width,
        });
        self.push_item(Item::Var(var));
        var
    }

    /// Declare one temporary per width. `names` is a whitespace-separated
    /// list; temporaries without a matching name are anonymous.
    pub fn values(&mut self, widths: &[u64], names: &str) -> Vec<VarId> {
        let mut names = names.split_whitespace();
        widths
            .iter()
            .map(|w| {
                let name = names.next();
                self.value(*w, name)
            })
            .collect()
    }

    /* ======================== Time variables ======================== */

    /// The first cycle after reset.
    pub fn tzero(&self) -> TVar {
        self.module.tzero
    }

    /// A fresh, unconstrained time variable.
    pub fn tvar(&mut self) -> TVar {
        self.new_tvar("t", TimeDef::Free)
    }

    /// `t + delay`.
    pub fn delay(&mut self, t: TVar, delay: u64) -> TVar {
        self.new_tvar("t", TimeDef::Offset { base: t, delay })
    }

    /// Compile-time maximum of `a` and `b`.
    pub fn tmax(&mut self, a: TVar, b: TVar) -> TVar {
        self.new_tvar("max", TimeDef::StaticMax(a, b))
    }

    fn relate(&mut self, lhs: TVar, rel: Relation, rhs: TVar) {
        let idx = self.module.relations.len();
        self.module.relations.push(TimeRelation { lhs, rel, rhs });
        self.push_item(Item::Relation(idx));
    }

    /// Force `a` to equal `b`.
    pub fn tset(&mut self, a: TVar, b: TVar) {
        self.relate(a, Relation::Eq, b)
    }

    /// Force `a` to happen no later than `b` (strictly earlier if `strict`).
    pub fn tbefore(&mut self, a: TVar, b: TVar, strict: bool) {
        self.relate(a, Relation::Before { strict }, b)
    }

    /// Force `a` to happen no earlier than `b` (strictly later if `strict`).
    pub fn tafter(&mut self, a: TVar, b: TVar, strict: bool) {
        self.relate(b, Relation::Before { strict }, a)
    }

    /// The first cycle no earlier than `at` in which `event` holds. The
    /// returned variable shares `at`'s counter slot; lowering stalls the slot
    /// until the event is observed.
    pub fn wait(&mut self, event: Event, at: TVar) -> RedstoneResult<TVar> {
        self.check_event(&event)?;
        Ok(self.new_tvar("wait", TimeDef::Wait { event, at }))
    }

    /// Runtime join point of `branch`.
    pub fn tphi(&mut self, branch: BranchHandle) -> TVar {
        self.new_tvar(
            "join",
            TimeDef::RuntimeJoin {
                branch: branch.action,
                selector: branch.condition,
            },
        )
    }

    /* ========================== Operations ========================== */

    fn port(&self, port: PortId) -> RedstoneResult<&Port> {
        self.module.ports.get(port).ok_or_else(|| {
            Error::malformed(format!(
                "port {port:?} does not belong to module `{}'",
                self.module.name
            ))
        })
    }

    fn check_port(
        &self,
        port: PortId,
        direction: Direction,
        kind: Option<SignalKind>,
        what: &str,
    ) -> RedstoneResult<()> {
        let p = self.port(port)?;
        if p.direction != direction || kind.is_some_and(|k| k != p.kind) {
            return Err(Error::malformed(format!(
                "cannot {what} port `{}'",
                self.module.port_name(port)
            )));
        }
        Ok(())
    }

    fn check_var(&self, var: VarId) -> RedstoneResult<()> {
        if !self.module.vars.contains(var) {
            return Err(Error::malformed(format!(
                "temporary {var:?} does not belong to module `{}'",
                self.module.name
            )));
        }
        Ok(())
    }

    fn check_event(&self, event: &Event) -> RedstoneResult<()> {
        match event {
            Event::Level(Condition::Port(p)) => {
                self.check_port(*p, Direction::Input, None, "wait on")
            }
            Event::Level(Condition::Var(v)) => self.check_var(*v),
            Event::Pulse(p) => self.check_port(
                *p,
                Direction::Input,
                Some(SignalKind::Pulse),
                "wait for a pulse on",
            ),
        }
    }

    fn check_op(&self, op: &Op) -> RedstoneResult<()> {
        match op {
            Op::Read { from, to } | Op::Sample { from, to } => {
                self.check_port(*from, Direction::Input, None, "read from")?;
                self.check_var(*to)
            }
            Op::Write { from, to } | Op::Drive { from, to } => {
                self.check_var(*from)?;
                self.check_port(
                    *to,
                    Direction::Output,
                    Some(SignalKind::Bus),
                    "write to",
                )
            }
            Op::Add { operands, to }
            | Op::Mul { operands, to }
            | Op::BoolEq { operands, to } => {
                operands.iter().try_for_each(|v| self.check_var(*v))?;
                self.check_var(*to)
            }
            Op::Emit { pulse } => self.check_port(
                *pulse,
                Direction::Output,
                Some(SignalKind::Pulse),
                "emit on",
            ),
            Op::Store { from, to } => {
                self.check_var(*from)?;
                self.check_var(*to)
            }
            Op::Phi { to } => self.check_var(*to),
        }
    }

    fn perform_timed<I>(
        &mut self,
        timing: Timing,
        ops: I,
    ) -> RedstoneResult<ActionId>
    where
        I: IntoIterator<Item = Op>,
    {
        let ops = ops.into_iter().collect::<smallvec::SmallVec<_>>();
        for op in &ops {
            self.check_op(op)?;
        }
        Ok(self.push_action(Action::Normal(NormalAction { ops, timing })))
    }

    /// Perform `ops` at a time chosen by the scheduler.
    pub fn perform<I>(&mut self, ops: I) -> RedstoneResult<ActionId>
    where
        I: IntoIterator<Item = Op>,
    {
        self.perform_timed(Timing::Free, ops)
    }

    /// Bind the next operations to `t`.
    pub fn at(&mut self, t: TVar) -> Timed<'_> {
        Timed {
            ctx: self,
            timing: Timing::At(t),
        }
    }

    /// Constrain the next operations to `lo <= time <= hi`.
    pub fn within(&mut self, lo: Option<TVar>, hi: Option<TVar>) -> Timed<'_> {
        Timed {
            ctx: self,
            timing: Timing::Within(lo, hi),
        }
    }

    /// Only enter the current region when `event` holds.
    pub fn guard(&mut self, event: Event) -> RedstoneResult<()> {
        self.check_event(&event)?;
        let cur = self.current_region();
        let region = &mut self.module.regions[cur];
        if region.guard.replace(event).is_some() {
            log::warn!("Replacing the guard of region {cur:?}");
        }
        Ok(())
    }

    /* ========================= Control flow ========================= */

    /// Open a loop whose first iteration starts no earlier than `at`.
    pub fn loop_at(&mut self, at: Option<TVar>) -> LoopScope<'_> {
        let iter_start = self.namegen.gen_name("iter");
        let next_iter_start = self.namegen.gen_name("next");
        let iter_start = self.module.tvars.push(TimeVar {
            name: iter_start,
            def: TimeDef::Free,
        });
        let next_iter_start = self.module.tvars.push(TimeVar {
            name: next_iter_start,
            def: TimeDef::Free,
        });
        let body = self.new_region(Some("loop".into()));
        self.push_action(Action::Loop(LoopAction {
            at,
            iter_start,
            next_iter_start,
            body,
        }));
        self.enter_region(body);
        self.push_item(Item::TVar(iter_start));
        self.push_item(Item::TVar(next_iter_start));
        LoopScope {
            ctx: self,
            iter_start,
            next_iter_start,
        }
    }

    /// Open a two-way branch on `condition`. Arms are opened with
    /// [BranchScope::then] and [BranchScope::otherwise].
    pub fn branch(
        &mut self,
        condition: Event,
        at: Option<TVar>,
    ) -> RedstoneResult<BranchScope<'_>> {
        self.check_event(&condition)?;
        let true_region = self.new_region(Some("then".into()));
        let false_region = self.new_region(Some("else".into()));
        let action = self.push_action(Action::Branch(BranchAction {
            condition,
            at,
            true_region,
            false_region,
        }));
        Ok(BranchScope {
            ctx: self,
            handle: BranchHandle { action, condition },
            true_region,
            false_region,
        })
    }

    /// Open a multi-way branch on the value of `selector`.
    pub fn switch(
        &mut self,
        selector: VarId,
        at: Option<TVar>,
    ) -> RedstoneResult<SwitchScope<'_>> {
        self.check_var(selector)?;
        let action = self.push_action(Action::Switch(SwitchAction {
            selector,
            at,
            cases: LinkedHashMap::new(),
            default: None,
        }));
        Ok(SwitchScope { ctx: self, action })
    }
}

/// Operations bound to a time. Created by [BuildContext::at] and
/// [BuildContext::within].
pub struct Timed<'a> {
    ctx: &'a mut BuildContext,
    timing: Timing,
}

impl Timed<'_> {
    pub fn perform<I>(self, ops: I) -> RedstoneResult<ActionId>
    where
        I: IntoIterator<Item = Op>,
    {
        self.ctx.perform_timed(self.timing, ops)
    }
}

/// Identifies a branch for [BuildContext::tphi].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchHandle {
    pub action: ActionId,
    pub condition: Event,
}

/// An open loop body. Dropping it closes the body.
pub struct LoopScope<'a> {
    ctx: &'a mut BuildContext,
    /// Start time of the current iteration.
    pub iter_start: TVar,
    /// Start time of the next iteration.
    pub next_iter_start: TVar,
}

/// An open branch. The parent region stays current until an arm is opened.
pub struct BranchScope<'a> {
    ctx: &'a mut BuildContext,
    handle: BranchHandle,
    true_region: RegionId,
    false_region: RegionId,
}

impl BranchScope<'_> {
    pub fn handle(&self) -> BranchHandle {
        self.handle
    }

    /// Open the arm taken when the condition holds.
    pub fn then(&mut self) -> ArmScope<'_> {
        ArmScope::enter(self.ctx, self.true_region)
    }

    /// Open the arm taken when the condition does not hold.
    pub fn otherwise(&mut self) -> ArmScope<'_> {
        ArmScope::enter(self.ctx, self.false_region)
    }
}

/// An open switch.
pub struct SwitchScope<'a> {
    ctx: &'a mut BuildContext,
    action: ActionId,
}

impl SwitchScope<'_> {
    fn switch_mut(&mut self) -> &mut SwitchAction {
        match &mut self.ctx.module.actions[self.action] {
            Action::Switch(s) => s,
            _ => unreachable!("switch scope refers to a non-switch action"),
        }
    }

    /// Open the arm for selector value `value`. Reopening a case appends to
    /// its region.
    pub fn case(&mut self, value: u64) -> ArmScope<'_> {
        let existing = self.switch_mut().cases.get(&value).copied();
        let region = match existing {
            Some(r) => r,
            None => {
                let r = self.ctx.new_region(Some(format!("case{value}").into()));
                self.switch_mut().cases.insert(value, r);
                r
            }
        };
        ArmScope::enter(self.ctx, region)
    }

    /// Open the arm taken when no case matches.
    pub fn default(&mut self) -> ArmScope<'_> {
        let existing = self.switch_mut().default;
        let region = match existing {
            Some(r) => r,
            None => {
                let r = self.ctx.new_region(Some("default".into()));
                self.switch_mut().default = Some(r);
                r
            }
        };
        ArmScope::enter(self.ctx, region)
    }
}

/// An open branch or switch arm. Dropping it closes the arm.
pub struct ArmScope<'a> {
    ctx: &'a mut BuildContext,
}

impl<'a> ArmScope<'a> {
    fn enter(ctx: &'a mut BuildContext, region: RegionId) -> Self {
        ctx.enter_region(region);
        Self { ctx }
    }
}

macro_rules! scope_guard {
    ($scope:ident) => {
        impl Deref for $scope<'_> {
            type Target = BuildContext;

            fn deref(&self) -> &BuildContext {
                self.ctx
            }
        }

        impl DerefMut for $scope<'_> {
            fn deref_mut(&mut self) -> &mut BuildContext {
                self.ctx
            }
        }

        impl Drop for $scope<'_> {
            fn drop(&mut self) {
                self.ctx.exit_region();
            }
        }
    };
}

scope_guard!(LoopScope);
scope_guard!(ArmScope);

#[cfg(test)]
mod tests {
    use super::*;
    use redstone_utils::ErrorKind;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn values_without_names_are_anonymous() {
        let mut ctx = BuildContext::start_module("m");
        let vars = ctx.values(&[8, 16, 1], "a b");
        let m = ctx.module();
        assert_eq!(vars.len(), 3);
        assert_eq!(m.vars[vars[0]].name, Some(Id::from("a")));
        assert_eq!(m.vars[vars[1]].width, 16);
        assert_eq!(m.vars[vars[2]].name, None);
    }

    #[test]
    fn loop_scope_restores_parent() {
        let mut ctx = BuildContext::start_module("m");
        let top = ctx.current_region();
        {
            let t0 = ctx.tzero();
            let body = ctx.loop_at(Some(t0));
            assert_eq!(body.depth(), 2);
            assert_ne!(body.current_region(), top);
        }
        assert_eq!(ctx.current_region(), top);
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn error_inside_arm_restores_parent() {
        let mut ctx = BuildContext::start_module("m");
        let a = ctx.input(8, Some("a"));
        let sel = ctx.value(1, Some("sel"));
        let v = ctx.value(8, Some("v"));
        let top = ctx.current_region();

        let res: RedstoneResult<()> = (|| {
            let mut br = ctx.branch(Event::var(sel), None)?;
            let mut arm = br.then();
            // Writing to an input port is rejected.
            arm.perform([Op::write(v, a)])?;
            Ok(())
        })();

        assert_eq!(res.map_err(|e| e.kind()), Err(ErrorKind::Malformed));
        assert_eq!(ctx.current_region(), top);
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn panic_inside_loop_restores_parent() {
        let mut ctx = BuildContext::start_module("m");
        let top = ctx.current_region();
        let res = panic::catch_unwind(AssertUnwindSafe(|| {
            let _body = ctx.loop_at(None);
            panic!("user code failed");
        }));
        assert!(res.is_err());
        assert_eq!(ctx.current_region(), top);
    }

    #[test]
    fn switch_cases_keep_declaration_order() {
        let mut ctx = BuildContext::start_module("m");
        let sel = ctx.value(2, Some("sel"));
        let out = ctx.value(2, Some("out"));
        {
            let mut sw = ctx.switch(sel, None).unwrap();
            sw.case(2).perform([Op::phi(out)]).unwrap();
            sw.case(0).perform([Op::phi(out)]).unwrap();
            sw.default().perform([Op::phi(out)]).unwrap();
            sw.case(2).perform([Op::phi(out)]).unwrap();
        }
        let m = ctx.finish();
        let Action::Switch(sw) = &m.actions[ActionId::from(0)] else {
            panic!("expected a switch");
        };
        assert_eq!(sw.cases.keys().copied().collect::<Vec<_>>(), vec![2, 0]);
        let case2 = sw.cases[&2];
        assert_eq!(m.regions[case2].items.len(), 2);
        assert!(sw.default.is_some());
    }

    #[test]
    fn pulse_wait_requires_input_pulse() {
        let mut ctx = BuildContext::start_module("m");
        let bus = ctx.input(8, Some("bus"));
        let done = ctx.output_pulse(Some("done"));
        let t0 = ctx.tzero();
        assert!(ctx.wait(Event::Pulse(bus), t0).is_err());
        assert!(ctx.wait(Event::Pulse(done), t0).is_err());
        let go = ctx.input_pulse(Some("go"));
        assert!(ctx.wait(Event::Pulse(go), t0).is_ok());
    }

    #[test]
    fn relations_are_recorded_in_declaring_region() {
        let mut ctx = BuildContext::start_module("m");
        let t0 = ctx.tzero();
        let t1 = ctx.delay(t0, 1);
        ctx.tafter(t1, t0, true);
        let m = ctx.finish();
        assert_eq!(
            m.relations,
            vec![TimeRelation {
                lhs: t0,
                rel: Relation::Before { strict: true },
                rhs: t1
            }]
        );
        assert!(m.regions[m.top].items.contains(&Item::Relation(0)));
    }
}
