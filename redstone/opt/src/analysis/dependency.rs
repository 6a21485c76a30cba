use itertools::Itertools;
use redstone_ir::{Block, Function, ValueIdx};
use redstone_utils::{Error, RedstoneResult};
use std::collections::HashMap;

/// Producer to consumer precedence edges of one block.
///
/// Nodes are positions in the block body. An edge `(p, c)` means the value
/// at position `p` must be scheduled no later than the value at position
/// `c`. Data edges come from [Value::predecessors](redstone_ir::Value) and
/// control edges from the values read by a value's predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: Vec<(usize, usize)>,
    size: usize,
}

impl DependencyGraph {
    /// Build the graph for `block`. Fails if a value refers to a value that
    /// was not defined earlier in the same block.
    pub fn from_block(func: &Function, block: &Block) -> RedstoneResult<Self> {
        let mut position: HashMap<ValueIdx, usize> = HashMap::new();
        let mut edges = Vec::new();
        for (pos, idx) in block.body.iter().enumerate() {
            let value = &func.values[*idx];
            let sources = value
                .predecessors()
                .iter()
                .copied()
                .chain(value.control_predecessors())
                .unique();
            for src in sources {
                let Some(p) = position.get(&src) else {
                    return Err(Error::undefined_value(format!(
                        "`{}' refers to `{}', which is not defined earlier in block `{}'",
                        func.value_name(*idx),
                        func.value_name(src),
                        block.name
                    )));
                };
                edges.push((*p, pos));
            }
            position.insert(*idx, pos);
        }
        log::debug!(
            "Block `{}': {} value(s), {} dependency edge(s)",
            block.name,
            block.body.len(),
            edges.len()
        );
        Ok(Self {
            edges,
            size: block.body.len(),
        })
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Number of values in the block.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Positions of the values that consume the value at `pos`.
    pub fn consumers(&self, pos: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges
            .iter()
            .filter(move |(p, _)| *p == pos)
            .map(|(_, c)| *c)
    }
}
