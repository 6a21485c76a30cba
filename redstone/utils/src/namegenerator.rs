use crate::Id;
use std::collections::{HashMap, HashSet};

/// Hands out fresh names by numbering repeated prefixes.
#[derive(Clone, Debug, Default)]
pub struct NameGenerator {
    /// Uses of each prefix so far.
    counts: HashMap<Id, u64>,
    taken: HashSet<Id>,
}

impl NameGenerator {
    /// A generator that never produces any of `names`.
    pub fn reserving(names: HashSet<Id>) -> Self {
        NameGenerator {
            counts: HashMap::new(),
            taken: names,
        }
    }

    /// The first use of `prefix` returns it unchanged; later uses append a
    /// counter.
    /// ```
    /// # use redstone_utils::NameGenerator;
    /// let mut namegen = NameGenerator::default();
    /// assert_eq!(namegen.gen_name("loop"), "loop");
    /// assert_eq!(namegen.gen_name("loop"), "loop0");
    /// ```
    pub fn gen_name<S>(&mut self, prefix: S) -> Id
    where
        S: Into<Id>,
    {
        let mut prefix: Id = prefix.into();
        loop {
            let uses = self.counts.entry(prefix).or_insert(0);
            let name = match *uses {
                0 => prefix,
                n => Id::from(format!("{prefix}{}", n - 1)),
            };
            *uses += 1;
            if self.taken.insert(name) {
                return name;
            }
            // Taken by a reserved name: number that name instead.
            prefix = name;
        }
    }
}
