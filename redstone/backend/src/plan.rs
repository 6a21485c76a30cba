//! The logical cycle plan handed to physical backends.
//!
//! A plan is a time-multiplexed FSM: a free-running counter selects one slot
//! per cycle, and every statement of the selected slot fires under its guard.
//! Renderers consume the plan as-is; all scheduling and forwarding decisions
//! have already been made.
use redstone_ir::{Direction, Instance, PortId, SignalKind, ValueIdx};
use redstone_utils::{Id, IndexRef};

#[cfg(feature = "serialize")]
use serde::Serialize;

/// A terminal signal of the circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct PortSignal {
    pub name: Id,
    pub direction: Direction,
    pub kind: SignalKind,
    pub width: u64,
}

/// The same-cycle combinational result of a value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Wire {
    pub name: Id,
    pub width: u64,
    pub value: ValueIdx,
}

/// Holds the result of a value for consumers in later cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Register {
    pub name: Id,
    pub width: u64,
    pub value: ValueIdx,
}

/// Something that can be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Signal {
    Port(PortId),
    /// Index into [Plan::wires].
    Wire(usize),
    /// Index into [Plan::registers].
    Reg(usize),
    Counter,
    /// A constant `value` of `width` bits.
    Const { value: u64, width: u64 },
}

impl Signal {
    pub fn constant(value: u64, width: u64) -> Self {
        Signal::Const { value, width }
    }
}

/// Right-hand side of a wire assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Expr {
    Signal(Signal),
    Add(Signal, Signal),
    Mul(Signal, Signal),
    Eq(Signal, Signal),
}

/// Comparison operations that can be performed between signals by
/// [Guard::CompOp].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum PortComp {
    /// s1 == s2
    Eq,
    /// s1 != s2
    Neq,
}

/// A condition over signals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Guard {
    /// Represents `c1 || c2`.
    Or(Box<Guard>, Box<Guard>),
    /// Represents `c1 && c2`.
    And(Box<Guard>, Box<Guard>),
    /// Represents `!c1`
    Not(Box<Guard>),
    #[default]
    /// The constant true
    True,
    /// Comparison operator.
    CompOp(PortComp, Signal, Signal),
    /// The signal is non-zero.
    Port(Signal),
}

impl Guard {
    pub fn is_true(&self) -> bool {
        matches!(self, Guard::True)
    }

    pub fn signal(s: Signal) -> Self {
        Guard::Port(s)
    }

    /// `counter == state` for a counter of `width` bits.
    pub fn state(state: u64, width: u64) -> Self {
        Guard::CompOp(
            PortComp::Eq,
            Signal::Counter,
            Signal::constant(state, width),
        )
    }

    pub fn and(self, rhs: Guard) -> Self {
        if rhs == Guard::True {
            self
        } else if self == Guard::True {
            rhs
        } else if self == rhs {
            self
        } else {
            Guard::And(Box::new(self), Box::new(rhs))
        }
    }

    pub fn or(self, rhs: Guard) -> Self {
        match (self, rhs) {
            (Guard::True, _) | (_, Guard::True) => Guard::True,
            (l, r) => {
                if l == r {
                    l
                } else {
                    Guard::Or(Box::new(l), Box::new(r))
                }
            }
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        match self {
            Guard::Not(g) => *g,
            g => Guard::Not(Box::new(g)),
        }
    }

    /// Evaluate the guard, reading signal values through `read`.
    pub fn eval<F>(&self, read: &mut F) -> bool
    where
        F: FnMut(&Signal) -> u64,
    {
        match self {
            Guard::Or(l, r) => l.eval(read) || r.eval(read),
            Guard::And(l, r) => l.eval(read) && r.eval(read),
            Guard::Not(g) => !g.eval(read),
            Guard::True => true,
            Guard::CompOp(op, l, r) => {
                let (l, r) = (read(l), read(r));
                match op {
                    PortComp::Eq => l == r,
                    PortComp::Neq => l != r,
                }
            }
            Guard::Port(s) => read(s) != 0,
        }
    }

    /// Every signal the guard reads.
    pub fn all_signals(&self) -> Vec<Signal> {
        match self {
            Guard::Or(l, r) | Guard::And(l, r) => {
                let mut atoms = l.all_signals();
                atoms.append(&mut r.all_signals());
                atoms
            }
            Guard::Not(g) => g.all_signals(),
            Guard::True => vec![],
            Guard::CompOp(_, l, r) => vec![*l, *r],
            Guard::Port(s) => vec![*s],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Stmt {
    /// Load `src` into register `reg` at the next clock edge.
    Latch { reg: usize, src: Signal },
    /// Drive wire `wire` combinationally.
    Assign { wire: usize, src: Expr },
    /// Drive output bus `port`.
    Drive { port: PortId, src: Signal },
    /// Strobe output pulse `port` for one cycle.
    Pulse { port: PortId },
}

impl Stmt {
    /// Signals read by this statement.
    pub fn reads(&self) -> Vec<Signal> {
        match self {
            Stmt::Latch { src, .. } | Stmt::Drive { src, .. } => vec![*src],
            Stmt::Assign { src, .. } => match src {
                Expr::Signal(s) => vec![*s],
                Expr::Add(l, r) | Expr::Mul(l, r) | Expr::Eq(l, r) => {
                    vec![*l, *r]
                }
            },
            Stmt::Pulse { .. } => vec![],
        }
    }
}

/// A statement that takes effect only when `guard` holds.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Guarded {
    pub guard: Guard,
    pub stmt: Stmt,
}

/// Everything that happens while the counter holds `time`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Slot {
    pub time: u64,
    /// Holds exactly when the slot is active.
    pub guard: Guard,
    pub stmts: Vec<Guarded>,
    /// The counter stalls on this slot until the condition holds.
    pub wait: Option<Guard>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Transition {
    Unconditional(u64),
    /// The first guard that holds selects the next state. The counter holds
    /// its state when none does.
    Conditional(Vec<(Guard, u64)>),
}

/// The counter that drives the slots.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Counter {
    pub name: Id,
    pub width: u64,
    /// The last state before wrapping back to 0.
    pub last: u64,
    /// Indexed by state.
    pub transitions: Vec<Transition>,
}

impl Counter {
    /// The state after one clock edge in state `current`. Guards are
    /// evaluated with `eval`. States outside the counter's range behave like
    /// reset.
    pub fn next_state<F>(&self, current: u64, mut eval: F) -> u64
    where
        F: FnMut(&Guard) -> bool,
    {
        match self.transitions.get(current as usize) {
            None => 0,
            Some(Transition::Unconditional(next)) => *next,
            Some(Transition::Conditional(arms)) => arms
                .iter()
                .find(|(guard, _)| eval(guard))
                .map(|(_, next)| *next)
                .unwrap_or(current),
        }
    }
}

/// A convergence point of a branch whose arms may complete in different
/// cycles. Exported for backends that multiplex join-time results.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Join {
    pub slot: u64,
    pub selector: Guard,
}

/// The lowered form of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Plan {
    pub name: Id,
    /// Indexed by [PortId].
    pub ports: Vec<PortSignal>,
    pub wires: Vec<Wire>,
    pub registers: Vec<Register>,
    pub counter: Counter,
    /// One slot per counter state, in order.
    pub slots: Vec<Slot>,
    pub instances: Vec<Instance>,
    pub joins: Vec<Join>,
    /// Start condition evaluated while the counter is 0.
    pub start: Guard,
}

impl Plan {
    pub fn port(&self, port: PortId) -> &PortSignal {
        &self.ports[port.index()]
    }

    /// The register holding `value`, if one was allocated.
    pub fn register_of(&self, value: ValueIdx) -> Option<usize> {
        self.registers.iter().position(|r| r.value == value)
    }

    /// The wire carrying `value`, if the value has a result.
    pub fn wire_of(&self, value: ValueIdx) -> Option<usize> {
        self.wires.iter().position(|w| w.value == value)
    }

    /// A printable name for `signal`.
    pub fn signal_name(&self, signal: &Signal) -> String {
        match signal {
            Signal::Port(p) => self.port(*p).name.to_string(),
            Signal::Wire(w) => self.wires[*w].name.to_string(),
            Signal::Reg(r) => self.registers[*r].name.to_string(),
            Signal::Counter => self.counter.name.to_string(),
            Signal::Const { value, width } => format!("{width}'d{value}"),
        }
    }

    /// Whether any statement or guard reads register `reg`.
    pub fn register_is_read(&self, reg: usize) -> bool {
        let target = Signal::Reg(reg);
        self.slots.iter().any(|slot| {
            slot.stmts.iter().any(|g| {
                g.stmt.reads().contains(&target)
                    || g.guard.all_signals().contains(&target)
            }) || slot
                .wait
                .as_ref()
                .is_some_and(|w| w.all_signals().contains(&target))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_builders_simplify() {
        let g = Guard::signal(Signal::Counter);
        assert_eq!(Guard::True.and(g.clone()), g);
        assert_eq!(g.clone().and(g.clone()), g);
        assert_eq!(g.clone().or(Guard::True), Guard::True);
        assert_eq!(g.clone().not().not(), g);
    }

    #[test]
    fn guards_evaluate() {
        let g = Guard::state(2, 2).and(Guard::signal(Signal::Reg(0)).not());
        let mut read = |s: &Signal| match s {
            Signal::Counter => 2,
            Signal::Const { value, .. } => *value,
            _ => 0,
        };
        assert!(g.eval(&mut read));
        assert_eq!(g.all_signals().len(), 3);
    }

    #[test]
    fn conditional_transition_holds() {
        let counter = Counter {
            name: "counter".into(),
            width: 1,
            last: 1,
            transitions: vec![
                Transition::Conditional(vec![(
                    Guard::signal(Signal::Port(PortId::new(0))),
                    1,
                )]),
                Transition::Unconditional(0),
            ],
        };
        assert_eq!(counter.next_state(0, |_| false), 0);
        assert_eq!(counter.next_state(0, |_| true), 1);
        assert_eq!(counter.next_state(1, |_| false), 0);
        assert_eq!(counter.next_state(7, |_| true), 0);
    }
}
