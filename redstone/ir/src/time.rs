//! Block-local time relations.
//!
//! Flattening resolves symbolic time variables as far as it can. Whatever
//! remains symbolic is a [TimeClass]: an unknown cycle, solved jointly with
//! value times by the scheduler. A [TimeTerm] names a cycle as a constant, a
//! class plus an offset, or a value's time plus an offset.
use crate::structure::{Event, Value, ValueIdx};
use redstone_utils::{impl_index, Id, IndexedMap};

#[cfg(feature = "serialize")]
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct ClassIdx(u32);
impl_index!(ClassIdx);

/// An equivalence class of time variables with unknown cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct TimeClass {
    pub name: Id,
    /// Set by scheduling.
    pub resolved: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum TimeTerm {
    Const(i64),
    Class(ClassIdx, i64),
    Value(ValueIdx, i64),
}

impl TimeTerm {
    /// Evaluate with the times currently attached to values and classes.
    pub fn eval(
        &self,
        values: &IndexedMap<ValueIdx, Value>,
        classes: &IndexedMap<ClassIdx, TimeClass>,
    ) -> Option<i64> {
        match self {
            TimeTerm::Const(k) => Some(*k),
            TimeTerm::Class(c, k) => classes[*c].resolved.map(|t| t as i64 + k),
            TimeTerm::Value(v, k) => values[*v].time.map(|t| t as i64 + k),
        }
    }

    /// Shift by `k` cycles.
    pub fn offset(self, k: i64) -> Self {
        match self {
            TimeTerm::Const(c) => TimeTerm::Const(c + k),
            TimeTerm::Class(c, o) => TimeTerm::Class(c, o + k),
            TimeTerm::Value(v, o) => TimeTerm::Value(v, o + k),
        }
    }
}

impl std::fmt::Display for TimeTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use redstone_utils::IndexRef;
        let (base, k) = match self {
            TimeTerm::Const(k) => return write!(f, "{k}"),
            TimeTerm::Class(c, k) => (format!("T{}", c.index()), k),
            TimeTerm::Value(v, k) => (format!("%{}", v.index()), k),
        };
        match k {
            0 => write!(f, "{base}"),
            k if *k > 0 => write!(f, "{base}+{k}"),
            k => write!(f, "{base}{k}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum TimeOp {
    Le,
    Lt,
    Eq,
}

impl std::fmt::Display for TimeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TimeOp::Le => "<=",
            TimeOp::Lt => "<",
            TimeOp::Eq => "==",
        })
    }
}

/// `lhs op rhs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct TimeRelation {
    pub lhs: TimeTerm,
    pub op: TimeOp,
    pub rhs: TimeTerm,
}

impl std::fmt::Display for TimeRelation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

impl TimeRelation {
    pub fn le(lhs: TimeTerm, rhs: TimeTerm) -> Self {
        Self {
            lhs,
            op: TimeOp::Le,
            rhs,
        }
    }

    pub fn lt(lhs: TimeTerm, rhs: TimeTerm) -> Self {
        Self {
            lhs,
            op: TimeOp::Lt,
            rhs,
        }
    }

    pub fn eq(lhs: TimeTerm, rhs: TimeTerm) -> Self {
        Self {
            lhs,
            op: TimeOp::Eq,
            rhs,
        }
    }

    /// Decide a relation between two constants. `None` when either side is
    /// symbolic.
    pub fn holds_statically(&self) -> Option<bool> {
        let (TimeTerm::Const(l), TimeTerm::Const(r)) = (self.lhs, self.rhs)
        else {
            return None;
        };
        Some(match self.op {
            TimeOp::Le => l <= r,
            TimeOp::Lt => l < r,
            TimeOp::Eq => l == r,
        })
    }
}

/// A counter slot that stalls until `event` is observed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct WaitSlot {
    pub at: TimeTerm,
    pub event: Event,
}

/// Convergence point of a branch whose realized time depends on the arm
/// taken at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct JoinPoint {
    pub at: TimeTerm,
    pub selector: Event,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct TimeTable {
    pub classes: IndexedMap<ClassIdx, TimeClass>,
    pub relations: Vec<TimeRelation>,
    pub waits: Vec<WaitSlot>,
    pub joins: Vec<JoinPoint>,
    /// Start of the next iteration, when the block is a loop body.
    pub next_iteration: Option<TimeTerm>,
}

impl TimeTable {
    pub fn is_resolved(&self) -> bool {
        self.classes.values().all(|c| c.resolved.is_some())
    }
}
