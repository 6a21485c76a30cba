//! Abstract syntax tree for temporally-annotated Redstone modules.
//!
//! Every entity lives in an arena owned by [Module] and is addressed by a
//! small copyable index. Regions and actions are only ever appended to, so an
//! index stays valid for the lifetime of the module.
use linked_hash_map::LinkedHashMap;
use redstone_utils::{impl_index, GetName, Id, IndexedMap};
use smallvec::SmallVec;

#[cfg(feature = "serialize")]
use serde::Serialize;

/// Index of a [Port] in a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct PortId(u32);
impl_index!(PortId);

/// A symbolic time variable. Resolved to a cycle number by scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct TVar(u32);
impl_index!(TVar);

/// Index of a temporary declared with `value`/`values`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct VarId(u32);
impl_index!(VarId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct RegionId(u32);
impl_index!(RegionId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct ActionId(u32);
impl_index!(ActionId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct InstanceId(u32);
impl_index!(InstanceId);

/// Direction of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Direction {
    Input,
    Output,
}

/// Whether a port holds a value or strobes for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum SignalKind {
    /// A persistent multi-bit value.
    Bus,
    /// A one-cycle strobe.
    Pulse,
}

/// A terminal of a module. Immutable once declared.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Port {
    pub name: Option<Id>,
    pub direction: Direction,
    pub kind: SignalKind,
    pub width: u64,
}

impl Port {
    pub fn new(
        name: Option<Id>,
        direction: Direction,
        kind: SignalKind,
        width: u64,
    ) -> Self {
        Self {
            name,
            direction,
            kind,
            width,
        }
    }

    pub fn input(name: &str, width: u64) -> Self {
        Self::new(Some(name.into()), Direction::Input, SignalKind::Bus, width)
    }

    pub fn output(name: &str, width: u64) -> Self {
        Self::new(Some(name.into()), Direction::Output, SignalKind::Bus, width)
    }

    pub fn is_pulse(&self) -> bool {
        self.kind == SignalKind::Pulse
    }
}

/// A temporary declared in a region. Operations that write it define a new
/// value; later reads see the latest definition.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Var {
    pub name: Option<Id>,
    pub width: u64,
}

/// A level-sensitive condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Condition {
    /// The port's signal is truthy.
    Port(PortId),
    /// The temporary's current definition is truthy.
    Var(VarId),
}

/// A guard predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Event {
    Level(Condition),
    /// Holds in the cycle an input pulse strobes.
    Pulse(PortId),
}

impl Event {
    pub fn port(port: PortId) -> Self {
        Event::Level(Condition::Port(port))
    }

    pub fn var(var: VarId) -> Self {
        Event::Level(Condition::Var(var))
    }
}

/// How a [TVar] was introduced.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum TimeDef {
    /// The first cycle after reset.
    Zero,
    /// Unconstrained until related to something else.
    Free,
    /// A fixed number of cycles after `base`.
    Offset { base: TVar, delay: u64 },
    /// Compile-time maximum of two time variables.
    StaticMax(TVar, TVar),
    /// Runtime join point of a branch; the realized value depends on which
    /// arm executed.
    RuntimeJoin { branch: ActionId, selector: Event },
    /// The first cycle no earlier than `at` in which `event` holds.
    Wait { event: Event, at: TVar },
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct TimeVar {
    pub name: Id,
    pub def: TimeDef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Relation {
    Eq,
    Before { strict: bool },
}

/// `lhs rel rhs` between two time variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct TimeRelation {
    pub lhs: TVar,
    pub rel: Relation,
    pub rhs: TVar,
}

/// The payload of a [NormalAction].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Op {
    Read { from: PortId, to: VarId },
    Sample { from: PortId, to: VarId },
    Write { from: VarId, to: PortId },
    Drive { from: VarId, to: PortId },
    Add { operands: [VarId; 2], to: VarId },
    Mul { operands: [VarId; 2], to: VarId },
    BoolEq { operands: [VarId; 2], to: VarId },
    Emit { pulse: PortId },
    /// Reserved.
    Store { from: VarId, to: VarId },
    /// Reserved.
    Phi { to: VarId },
}

impl Op {
    pub fn read(from: PortId, to: VarId) -> Self {
        Op::Read { from, to }
    }

    pub fn sample(from: PortId, to: VarId) -> Self {
        Op::Sample { from, to }
    }

    pub fn write(from: VarId, to: PortId) -> Self {
        Op::Write { from, to }
    }

    pub fn drive(from: VarId, to: PortId) -> Self {
        Op::Drive { from, to }
    }

    pub fn add(a: VarId, b: VarId, to: VarId) -> Self {
        Op::Add {
            operands: [a, b],
            to,
        }
    }

    pub fn mul(a: VarId, b: VarId, to: VarId) -> Self {
        Op::Mul {
            operands: [a, b],
            to,
        }
    }

    pub fn bool_eq(a: VarId, b: VarId, to: VarId) -> Self {
        Op::BoolEq {
            operands: [a, b],
            to,
        }
    }

    pub fn emit(pulse: PortId) -> Self {
        Op::Emit { pulse }
    }

    pub fn store(from: VarId, to: VarId) -> Self {
        Op::Store { from, to }
    }

    pub fn phi(to: VarId) -> Self {
        Op::Phi { to }
    }
}

/// When the operations of a [NormalAction] happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Timing {
    /// Placed by the scheduler.
    Free,
    At(TVar),
    Within(Option<TVar>, Option<TVar>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct NormalAction {
    pub ops: SmallVec<[Op; 2]>,
    pub timing: Timing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct LoopAction {
    pub at: Option<TVar>,
    pub iter_start: TVar,
    pub next_iter_start: TVar,
    pub body: RegionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct BranchAction {
    pub condition: Event,
    pub at: Option<TVar>,
    pub true_region: RegionId,
    pub false_region: RegionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct SwitchAction {
    pub selector: VarId,
    pub at: Option<TVar>,
    /// Cases in declaration order.
    pub cases: LinkedHashMap<u64, RegionId>,
    pub default: Option<RegionId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Action {
    Normal(NormalAction),
    Loop(LoopAction),
    Branch(BranchAction),
    Switch(SwitchAction),
}

/// An element of a region, in program order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Item {
    TVar(TVar),
    Var(VarId),
    Action(ActionId),
    /// An ordering relation declared in this region.
    Relation(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Region {
    pub name: Option<Id>,
    /// The region is only entered when the guard holds.
    pub guard: Option<Event>,
    pub items: Vec<Item>,
}

impl Region {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A sub-component reference.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Instance {
    pub module_name: Id,
    pub width: u64,
    pub depth: u64,
    pub ports: LinkedHashMap<Id, PortId>,
}

/// A module under construction, or the result of [finishing](crate::BuildContext::finish)
/// a build context.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Module {
    pub name: Id,
    pub ports: IndexedMap<PortId, Port>,
    pub instances: IndexedMap<InstanceId, Instance>,
    pub vars: IndexedMap<VarId, Var>,
    pub tvars: IndexedMap<TVar, TimeVar>,
    pub relations: Vec<TimeRelation>,
    pub regions: IndexedMap<RegionId, Region>,
    pub actions: IndexedMap<ActionId, Action>,
    pub top: RegionId,
    pub tzero: TVar,
}

impl Module {
    pub fn new(name: Id) -> Self {
        let mut regions = IndexedMap::new();
        let top = regions.push(Region {
            name: Some(name),
            ..Default::default()
        });
        let mut tvars = IndexedMap::new();
        let tzero = tvars.push(TimeVar {
            name: "tzero".into(),
            def: TimeDef::Zero,
        });
        Self {
            name,
            ports: IndexedMap::new(),
            instances: IndexedMap::new(),
            vars: IndexedMap::new(),
            tvars,
            relations: Vec::new(),
            regions,
            actions: IndexedMap::new(),
            top,
            tzero,
        }
    }

    /// Name of a port, falling back to its position.
    pub fn port_name(&self, port: PortId) -> Id {
        port_name(&self.ports, port)
    }
}

impl GetName for Module {
    fn name(&self) -> Id {
        self.name
    }
}

/// Name of `port` in `ports`, or `port<N>` for anonymous ports.
pub fn port_name(ports: &IndexedMap<PortId, Port>, port: PortId) -> Id {
    use redstone_utils::IndexRef;
    ports
        .get(port)
        .and_then(|p| p.name)
        .unwrap_or_else(|| Id::from(format!("port{}", port.index())))
}
