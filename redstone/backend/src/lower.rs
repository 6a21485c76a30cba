use crate::plan::{
    Counter, Expr, Guard, Guarded, Join, Plan, PortComp, PortSignal, Register,
    Signal, Slot, Stmt, Transition, Wire,
};
use itertools::Itertools;
use linked_hash_map::LinkedHashMap;
use redstone_ir::{
    self as ir, Condition, Event, PortId, Predicate, TimeTerm, ValueIdx,
    ValueKind,
};
use redstone_opt::traversal::{
    ConstructVisitor, Named, ParseVal, PassOpt, Visitor,
};
use redstone_utils::{bits_needed_for, Error, Id, RedstoneResult};
use std::collections::{BTreeMap, HashMap};

/// Lowers a scheduled single-block function into a counter-driven [Plan].
///
/// Values are bucketed by their scheduled cycle into one slot per counter
/// state. Every value with a result gets a wire carrying it within its own
/// cycle; values consumed in a strictly later cycle additionally get a
/// register. Consumers read the register when the producer ran in an earlier
/// cycle and the wire otherwise.
pub struct Lower {
    /// Lowering is only defined for top-level functions.
    top: bool,
    /// Name of the counter register.
    counter: String,
    /// Plans produced when run as a pass, one per function.
    plans: Vec<Plan>,
}

impl Named for Lower {
    fn name() -> &'static str {
        "lower"
    }

    fn description() -> &'static str {
        "lower a scheduled function to a counter-driven plan"
    }

    fn opts() -> Vec<PassOpt> {
        vec![
            PassOpt::new(
                "top",
                "lower functions as top-level components",
                ParseVal::Bool(true),
                PassOpt::parse_bool,
            ),
            PassOpt::new(
                "counter",
                "name of the counter register",
                ParseVal::Str("counter".to_string()),
                PassOpt::parse_str,
            ),
        ]
    }
}

impl ConstructVisitor for Lower {
    fn from(ctx: &ir::Context) -> RedstoneResult<Self> {
        let opts = Self::get_opts(ctx);
        Ok(Self::new(opts["top"].bool(), opts["counter"].string()))
    }

    fn clear_data(&mut self) {
        /* plans accumulate across functions */
    }
}

impl Visitor for Lower {
    fn start(&mut self, func: &mut ir::Function) -> RedstoneResult<()> {
        let plan = self.lower(func)?;
        self.plans.push(plan);
        Ok(())
    }
}

impl Lower {
    pub fn new(top: bool, counter: &str) -> Self {
        Self {
            top,
            counter: counter.to_string(),
            plans: Vec::new(),
        }
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    pub fn into_plans(self) -> Vec<Plan> {
        self.plans
    }

    /// Lower `func`. Nothing is returned unless every value lowers.
    pub fn lower(&self, func: &ir::Function) -> RedstoneResult<Plan> {
        if func.blocks.len() != 1 {
            return Err(Error::unsupported_shape(format!(
                "`{}' has {} blocks; lowering requires exactly one",
                func.name,
                func.blocks.len()
            )));
        }
        if !self.top {
            return Err(Error::unsupported_shape(format!(
                "`{}' is not a top-level function",
                func.name
            )));
        }
        let block = &func.blocks[0];
        if let Some(v) = block.body.iter().find(|v| func.values[**v].time.is_none())
        {
            return Err(Error::lowering_precondition(format!(
                "block `{}' of `{}' is not scheduled: `{}' has no time",
                block.name,
                func.name,
                func.value_name(*v)
            )));
        }
        if !block.timing.is_resolved() {
            return Err(Error::lowering_precondition(format!(
                "block `{}' of `{}' has unresolved time classes",
                block.name, func.name
            )));
        }
        Lowering::new(func, block, self.counter.as_str())?.build()
    }
}

/// State of lowering one block.
struct Lowering<'a> {
    func: &'a ir::Function,
    block: &'a ir::Block,
    counter: Id,
    wires: Vec<Wire>,
    registers: Vec<Register>,
    wire_of: HashMap<ValueIdx, usize>,
    reg_of: HashMap<ValueIdx, usize>,
    /// Wait events by slot.
    waits: BTreeMap<u64, Vec<Event>>,
    joins: Vec<(u64, Event)>,
    last: u64,
    width: u64,
}

impl<'a> Lowering<'a> {
    fn new(
        func: &'a ir::Function,
        block: &'a ir::Block,
        counter: &str,
    ) -> RedstoneResult<Self> {
        let slot_of = |term: &TimeTerm| -> RedstoneResult<u64> {
            term.eval(&func.values, &block.timing.classes)
                .map(|t| t.max(0) as u64)
                .ok_or_else(|| {
                    Error::lowering_precondition(format!(
                        "time `{term}' of block `{}' is not resolved",
                        block.name
                    ))
                })
        };
        let mut waits: BTreeMap<u64, Vec<Event>> = BTreeMap::new();
        for wait in &block.timing.waits {
            waits.entry(slot_of(&wait.at)?).or_default().push(wait.event);
        }
        let joins = block
            .timing
            .joins
            .iter()
            .map(|j| Ok((slot_of(&j.at)?, j.selector)))
            .collect::<RedstoneResult<Vec<_>>>()?;

        let tmax = block.makespan(&func.values).unwrap_or(0);
        let mut last = [
            Some(tmax),
            waits.keys().last().copied(),
            joins.iter().map(|(s, _)| *s).max(),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0);
        if let Some(next) = &block.timing.next_iteration {
            let ii = slot_of(next)?;
            if ii <= tmax {
                log::warn!(
                    "Initiation interval {ii} of `{}' is shorter than its {} cycle(s) of work and is ignored",
                    block.name,
                    tmax + 1
                );
            }
            last = last.max(ii.saturating_sub(1));
        }
        let width = bits_needed_for(last + 1);

        let mut lowering = Self {
            func,
            block,
            counter: Id::from(counter),
            wires: Vec::new(),
            registers: Vec::new(),
            wire_of: HashMap::new(),
            reg_of: HashMap::new(),
            waits,
            joins,
            last,
            width,
        };
        lowering.allocate();
        Ok(lowering)
    }

    fn time(&self, v: ValueIdx) -> u64 {
        self.func.values[v].time.unwrap_or(0)
    }

    /// Latest cycle in which each value is read.
    fn last_uses(&self) -> LinkedHashMap<ValueIdx, u64> {
        let mut uses: LinkedHashMap<ValueIdx, u64> = LinkedHashMap::new();
        let mut record = |v: ValueIdx, t: u64| {
            let entry = uses.entry(v).or_insert(t);
            *entry = (*entry).max(t);
        };
        for idx in &self.block.body {
            let value = &self.func.values[*idx];
            let t = self.time(*idx);
            for src in value.operands.iter().copied().chain(value.control_predecessors()) {
                record(src, t);
            }
        }
        for (slot, events) in &self.waits {
            for src in events.iter().filter_map(Event::source) {
                record(src, *slot);
            }
        }
        for (slot, selector) in &self.joins {
            if let Some(src) = selector.source() {
                record(src, *slot);
            }
        }
        uses
    }

    /// Allocate wires for every value with a result and registers for those
    /// read in a later cycle.
    fn allocate(&mut self) {
        let (func, block) = (self.func, self.block);
        let uses = self.last_uses();
        for idx in &block.body {
            let value = &func.values[*idx];
            if value.void {
                continue;
            }
            let name = func.value_name(*idx);
            self.wire_of.insert(*idx, self.wires.len());
            self.wires.push(Wire {
                name,
                width: value.width,
                value: *idx,
            });
            let produced = self.time(*idx);
            if let Some(used) = uses.get(idx).filter(|t| **t > produced) {
                log::debug!(
                    "`{name}' is produced in cycle {produced} and read in cycle {used}: allocating a register"
                );
                self.reg_of.insert(*idx, self.registers.len());
                self.registers.push(Register {
                    name: Id::from(format!("{name}_reg")),
                    width: value.width,
                    value: *idx,
                });
            }
        }
    }

    /// The signal carrying `v` for a consumer in cycle `t`: the register when
    /// `v` was produced in an earlier cycle, the wire otherwise.
    fn select(&self, v: ValueIdx, t: u64) -> RedstoneResult<Signal> {
        let name = self.func.value_name(v);
        let Some(wire) = self.wire_of.get(&v) else {
            return Err(Error::undefined_value(format!(
                "`{name}' has no result in block `{}'",
                self.block.name
            )));
        };
        let produced = self.time(v);
        if produced > t {
            return Err(Error::lowering_precondition(format!(
                "`{name}' is read in cycle {t} but produced in cycle {produced}"
            )));
        }
        if produced == t {
            log::debug!("cycle {t}: forwarding `{name}' from its wire");
            return Ok(Signal::Wire(*wire));
        }
        match self.reg_of.get(&v) {
            Some(reg) => {
                log::debug!("cycle {t}: reading `{name}' from its register");
                Ok(Signal::Reg(*reg))
            }
            None => Err(Error::misc(format!(
                "`{name}' is read in cycle {t} but has no register"
            ))),
        }
    }

    fn event_guard(&self, event: &Event, t: u64) -> RedstoneResult<Guard> {
        Ok(match event {
            Event::Level(Condition::Port(p)) | Event::Pulse(p) => {
                Guard::signal(Signal::Port(*p))
            }
            Event::Level(Condition::Value(v)) => {
                Guard::signal(self.select(*v, t)?)
            }
        })
    }

    fn predicate_guard(&self, pred: &Predicate, t: u64) -> RedstoneResult<Guard> {
        let compare = |op: PortComp, selector: ValueIdx, k: u64| {
            let width = self.func.values[selector].width;
            Ok::<_, Error>(Guard::CompOp(
                op,
                self.select(selector, t)?,
                Signal::constant(k, width),
            ))
        };
        match pred {
            Predicate::When(e) => self.event_guard(e, t),
            Predicate::Unless(e) => Ok(self.event_guard(e, t)?.not()),
            Predicate::Case { selector, value } => {
                compare(PortComp::Eq, *selector, *value)
            }
            Predicate::Default { selector, cases } => {
                cases.iter().try_fold(Guard::True, |g, k| {
                    Ok(g.and(compare(PortComp::Neq, *selector, *k)?))
                })
            }
        }
    }

    fn port_of(&self, v: ValueIdx) -> RedstoneResult<PortId> {
        self.func.values[v].port.ok_or_else(|| {
            Error::malformed(format!(
                "`{}' has no port",
                self.func.value_name(v)
            ))
        })
    }

    fn operand(&self, v: ValueIdx, i: usize) -> RedstoneResult<ValueIdx> {
        self.func.values[v].operands.get(i).copied().ok_or_else(|| {
            Error::malformed(format!(
                "`{}' is missing operand {i}",
                self.func.value_name(v)
            ))
        })
    }

    /// Statements realizing `v` in its cycle.
    fn realize(&self, v: ValueIdx) -> RedstoneResult<Vec<Stmt>> {
        let value = &self.func.values[v];
        let t = self.time(v);
        let wire = self.wire_of.get(&v).copied();
        let reg = self.reg_of.get(&v).copied();
        let mut stmts = Vec::new();
        let mut produce = |src: Expr, latch: Signal| {
            if let Some(wire) = wire {
                stmts.push(Stmt::Assign { wire, src });
            }
            if let Some(reg) = reg {
                stmts.push(Stmt::Latch { reg, src: latch });
            }
        };
        match value.kind {
            ValueKind::Read | ValueKind::Sample => {
                let port = Signal::Port(self.port_of(v)?);
                produce(Expr::Signal(port), port);
            }
            ValueKind::Add | ValueKind::Mul | ValueKind::BoolEq => {
                let l = self.select(self.operand(v, 0)?, t)?;
                let r = self.select(self.operand(v, 1)?, t)?;
                let expr = match value.kind {
                    ValueKind::Add => Expr::Add(l, r),
                    ValueKind::Mul => Expr::Mul(l, r),
                    _ => Expr::Eq(l, r),
                };
                let latch = wire.map(Signal::Wire).unwrap_or(Signal::constant(0, value.width));
                produce(expr, latch);
            }
            ValueKind::Write | ValueKind::Drive => {
                let src = self.select(self.operand(v, 0)?, t)?;
                stmts.push(Stmt::Drive {
                    port: self.port_of(v)?,
                    src,
                });
            }
            ValueKind::Emit => stmts.push(Stmt::Pulse {
                port: self.port_of(v)?,
            }),
            ValueKind::Phi | ValueKind::Store => {
                return Err(Error::unhandled_kind(format!(
                    "`{}' is a {} value, which cannot be lowered",
                    self.func.value_name(v),
                    value.kind
                )))
            }
        }
        Ok(stmts)
    }

    fn build(self) -> RedstoneResult<Plan> {
        let func = self.func;
        let start = match &self.block.guard {
            Some(event) => self.event_guard(event, 0)?,
            None => Guard::True,
        };

        let mut stmts: Vec<Vec<Guarded>> =
            (0..=self.last).map(|_| Vec::new()).collect();
        for idx in &self.block.body {
            let value = &func.values[*idx];
            let t = self.time(*idx);
            let guard = value.predicates.iter().try_fold(Guard::True, |g, p| {
                Ok::<_, Error>(g.and(self.predicate_guard(p, t)?))
            })?;
            for stmt in self.realize(*idx)? {
                stmts[t as usize].push(Guarded {
                    guard: guard.clone(),
                    stmt,
                });
            }
        }

        let mut slots = Vec::with_capacity(stmts.len());
        let mut transitions = Vec::with_capacity(stmts.len());
        for (t, stmts) in (0..=self.last).zip(stmts) {
            let wait = match self.waits.get(&t) {
                Some(events) => Some(events.iter().try_fold(
                    Guard::True,
                    |g, e| Ok::<_, Error>(g.and(self.event_guard(e, t)?)),
                )?),
                None => None,
            };
            let enter = if t == 0 { start.clone() } else { Guard::True };
            let cond = enter.and(wait.clone().unwrap_or_default());
            let next = if t == self.last { 0 } else { t + 1 };
            transitions.push(if cond.is_true() {
                Transition::Unconditional(next)
            } else {
                Transition::Conditional(vec![(cond.clone(), next), (Guard::True, t)])
            });
            slots.push(Slot {
                time: t,
                guard: Guard::state(t, self.width).and(cond),
                stmts,
                wait,
            });
        }

        let joins = self
            .joins
            .iter()
            .map(|(slot, selector)| {
                Ok(Join {
                    slot: *slot,
                    selector: self.event_guard(selector, *slot)?,
                })
            })
            .collect::<RedstoneResult<Vec<_>>>()?;

        let ports = func
            .ports
            .iter()
            .map(|(idx, p)| PortSignal {
                name: func.port_name(idx),
                direction: p.direction,
                kind: p.kind,
                width: p.width,
            })
            .collect_vec();

        let plan = Plan {
            name: func.name,
            ports,
            wires: self.wires,
            registers: self.registers,
            counter: Counter {
                name: self.counter,
                width: self.width,
                last: self.last,
                transitions,
            },
            slots,
            instances: func.instances.clone(),
            joins,
            start,
        };
        for (i, reg) in plan.registers.iter().enumerate() {
            if !plan.register_is_read(i) {
                log::warn!("Register `{}' is never read", reg.name);
            }
        }
        log::info!(
            "Lowered `{}': {} slot(s), {}-bit counter, {} register(s)",
            plan.name,
            plan.slots.len(),
            plan.counter.width,
            plan.registers.len()
        );
        Ok(plan)
    }
}
