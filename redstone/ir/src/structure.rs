//! Representation for structure (functions, blocks and values) in a Redstone
//! program.
use crate::time::TimeTable;
use redstone_frontend::{Instance, Port, PortId};
use redstone_utils::{impl_index, GetName, Id, IndexRef, IndexedMap};
use smallvec::SmallVec;

#[cfg(feature = "serialize")]
use serde::Serialize;

/// Index of a [Value] in its [Function].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct ValueIdx(u32);
impl_index!(ValueIdx);

/// The operation a [Value] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum ValueKind {
    Read,
    Sample,
    Write,
    Drive,
    Add,
    Mul,
    BoolEq,
    Emit,
    Phi,
    Store,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Read => "read",
            ValueKind::Sample => "sample",
            ValueKind::Write => "write",
            ValueKind::Drive => "drive",
            ValueKind::Add => "add",
            ValueKind::Mul => "mul",
            ValueKind::BoolEq => "bool_eq",
            ValueKind::Emit => "emit",
            ValueKind::Phi => "phi",
            ValueKind::Store => "store",
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A level-sensitive condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Condition {
    Port(PortId),
    Value(ValueIdx),
}

/// A guard predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Event {
    /// The signal is truthy.
    Level(Condition),
    /// An input pulse strobes.
    Pulse(PortId),
}

impl Event {
    pub fn port(port: PortId) -> Self {
        Event::Level(Condition::Port(port))
    }

    /// The value this event reads, if any.
    pub fn source(&self) -> Option<ValueIdx> {
        match self {
            Event::Level(Condition::Value(v)) => Some(*v),
            _ => None,
        }
    }
}

/// Controls whether a predicated value takes effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Predicate {
    When(Event),
    Unless(Event),
    /// `selector == value`
    Case { selector: ValueIdx, value: u64 },
    /// `selector` matches none of `cases`.
    Default {
        selector: ValueIdx,
        cases: Vec<u64>,
    },
}

impl Predicate {
    /// The value this predicate reads, if any.
    pub fn source(&self) -> Option<ValueIdx> {
        match self {
            Predicate::When(e) | Predicate::Unless(e) => e.source(),
            Predicate::Case { selector, .. }
            | Predicate::Default { selector, .. } => Some(*selector),
        }
    }
}

/// A typed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Value {
    pub kind: ValueKind,
    /// Produces no usable result.
    pub void: bool,
    pub name: Option<Id>,
    pub width: u64,
    pub operands: SmallVec<[ValueIdx; 2]>,
    /// Source port of reads, destination port of writes and emits.
    pub port: Option<PortId>,
    /// All must hold for the value to take effect.
    pub predicates: Vec<Predicate>,
    /// Scheduled cycle, relative to the start of the enclosing block.
    pub time: Option<u64>,
}

impl Value {
    fn new(kind: ValueKind, void: bool, width: u64) -> Self {
        Self {
            kind,
            void,
            name: None,
            width,
            operands: SmallVec::new(),
            port: None,
            predicates: Vec::new(),
            time: None,
        }
    }

    pub fn read(from: PortId, width: u64) -> Self {
        Self {
            port: Some(from),
            ..Self::new(ValueKind::Read, false, width)
        }
    }

    pub fn sample(from: PortId, width: u64) -> Self {
        Self {
            port: Some(from),
            ..Self::new(ValueKind::Sample, false, width)
        }
    }

    pub fn write(value: ValueIdx, to: PortId, width: u64) -> Self {
        Self {
            port: Some(to),
            operands: smallvec::smallvec![value],
            ..Self::new(ValueKind::Write, true, width)
        }
    }

    pub fn drive(value: ValueIdx, to: PortId, width: u64) -> Self {
        Self {
            port: Some(to),
            operands: smallvec::smallvec![value],
            ..Self::new(ValueKind::Drive, true, width)
        }
    }

    /// A binary arithmetic or comparison value.
    pub fn binary(
        kind: ValueKind,
        a: ValueIdx,
        b: ValueIdx,
        width: u64,
    ) -> Self {
        debug_assert!(matches!(
            kind,
            ValueKind::Add | ValueKind::Mul | ValueKind::BoolEq
        ));
        Self {
            operands: smallvec::smallvec![a, b],
            ..Self::new(kind, false, width)
        }
    }

    pub fn add(a: ValueIdx, b: ValueIdx, width: u64) -> Self {
        Self::binary(ValueKind::Add, a, b, width)
    }

    pub fn mul(a: ValueIdx, b: ValueIdx, width: u64) -> Self {
        Self::binary(ValueKind::Mul, a, b, width)
    }

    pub fn bool_eq(a: ValueIdx, b: ValueIdx) -> Self {
        Self::binary(ValueKind::BoolEq, a, b, 1)
    }

    pub fn emit(to: PortId) -> Self {
        Self {
            port: Some(to),
            ..Self::new(ValueKind::Emit, true, 1)
        }
    }

    pub fn store(value: ValueIdx, width: u64) -> Self {
        Self {
            operands: smallvec::smallvec![value],
            ..Self::new(ValueKind::Store, false, width)
        }
    }

    /// Merge of control-flow dependent definitions.
    pub fn phi<I>(incoming: I, width: u64) -> Self
    where
        I: IntoIterator<Item = ValueIdx>,
    {
        Self {
            operands: incoming.into_iter().collect(),
            ..Self::new(ValueKind::Phi, false, width)
        }
    }

    /// Anchor the value at cycle `time`.
    pub fn at_time(mut self, time: u64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn named<S: Into<Id>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn when(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Values whose results this value consumes as data. Phi operands are
    /// not predecessors: a phi is always placed at cycle 0.
    pub fn predecessors(&self) -> &[ValueIdx] {
        match self.kind {
            ValueKind::Add | ValueKind::Mul | ValueKind::BoolEq => {
                &self.operands
            }
            ValueKind::Write | ValueKind::Drive | ValueKind::Store => {
                &self.operands[..self.operands.len().min(1)]
            }
            ValueKind::Read
            | ValueKind::Sample
            | ValueKind::Emit
            | ValueKind::Phi => &[],
        }
    }

    /// Values read by this value's predicates.
    pub fn control_predecessors(&self) -> impl Iterator<Item = ValueIdx> + '_ {
        self.predicates.iter().filter_map(Predicate::source)
    }
}

/// A flattened region: an ordered sequence of values sharing one time origin.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Block {
    pub name: Id,
    /// Start condition of the block.
    pub guard: Option<Event>,
    pub body: Vec<ValueIdx>,
    pub timing: TimeTable,
}

impl Block {
    pub fn new<S: Into<Id>>(name: S, guard: Option<Event>) -> Self {
        Self {
            name: name.into(),
            guard,
            body: Vec::new(),
            timing: TimeTable::default(),
        }
    }

    /// A block is scheduled when every value in it carries a time.
    pub fn scheduled(&self, values: &IndexedMap<ValueIdx, Value>) -> bool {
        self.body.iter().all(|v| values[*v].time.is_some())
    }

    /// The latest scheduled cycle in the block.
    pub fn makespan(&self, values: &IndexedMap<ValueIdx, Value>) -> Option<u64> {
        self.body.iter().filter_map(|v| values[*v].time).max()
    }
}

impl GetName for Block {
    fn name(&self) -> Id {
        self.name
    }
}

/// A function: its signature and a list of blocks.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Function {
    pub name: Id,
    pub ports: IndexedMap<PortId, Port>,
    pub instances: Vec<Instance>,
    /// Every value of every block.
    pub values: IndexedMap<ValueIdx, Value>,
    pub blocks: Vec<Block>,
}

impl Function {
    pub fn new<S: Into<Id>>(name: S) -> Self {
        Self {
            name: name.into(),
            ports: IndexedMap::new(),
            instances: Vec::new(),
            values: IndexedMap::new(),
            blocks: Vec::new(),
        }
    }

    pub fn add_port(&mut self, port: Port) -> PortId {
        self.ports.push(port)
    }

    pub fn add_value(&mut self, value: Value) -> ValueIdx {
        self.values.push(value)
    }

    /// Add `value` and append it to the body of block `block`.
    pub fn push_value(&mut self, block: usize, value: Value) -> ValueIdx {
        let idx = self.values.push(value);
        self.blocks[block].body.push(idx);
        idx
    }

    pub fn add_block(&mut self, block: Block) -> usize {
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    pub fn port_name(&self, port: PortId) -> Id {
        redstone_frontend::port_name(&self.ports, port)
    }

    /// A printable name for `value`.
    pub fn value_name(&self, value: ValueIdx) -> Id {
        self.values
            .get(value)
            .and_then(|v| v.name)
            .map(|n| Id::from(format!("{n}_{}", value.index())))
            .unwrap_or_else(|| Id::from(format!("v{}", value.index())))
    }
}

impl GetName for Function {
    fn name(&self) -> Id {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predecessors_follow_value_kind() {
        let mut f = Function::new("f");
        let a = f.add_port(Port::input("a", 8));
        let o = f.add_port(Port::output("o", 8));
        let x = f.add_value(Value::read(a, 8));
        let y = f.add_value(Value::read(a, 8));
        let sum = f.add_value(Value::add(x, y, 8));
        let w = f.add_value(Value::drive(sum, o, 8));
        let p = f.add_value(Value::phi([x, y], 8));

        assert!(f.values[x].predecessors().is_empty());
        assert_eq!(f.values[sum].predecessors(), &[x, y]);
        assert_eq!(f.values[w].predecessors(), &[sum]);
        assert!(f.values[w].void);
        assert!(f.values[p].predecessors().is_empty());
    }

    #[test]
    fn scheduled_requires_every_time() {
        let mut f = Function::new("f");
        let a = f.add_port(Port::input("a", 8));
        let b = f.add_block(Block::new("entry", None));
        f.push_value(b, Value::read(a, 8).at_time(0));
        assert!(f.blocks[b].scheduled(&f.values));
        f.push_value(b, Value::read(a, 8));
        assert!(!f.blocks[b].scheduled(&f.values));
        assert_eq!(f.blocks[b].makespan(&f.values), Some(0));
    }
}
