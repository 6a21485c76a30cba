//! Integer programs and the solvers that answer them.
//!
//! The scheduler states its problem as an [IntegerProgram] over non-negative
//! integer variables and hands it to a [Solver]. [DifferenceSolver] is exact
//! for the programs the scheduler produces, where every constraint relates at
//! most two variables with unit coefficients of opposite sign.
use itertools::Itertools;
use petgraph::algo::bellman_ford;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::BTreeMap;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Ge,
    Le,
    Eq,
}

impl Display for Cmp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Cmp::Ge => ">=",
            Cmp::Le => "<=",
            Cmp::Eq => "==",
        })
    }
}

/// `sum(coeff * var) cmp rhs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConstraint {
    pub terms: Vec<(usize, i64)>,
    pub cmp: Cmp,
    pub rhs: i64,
}

impl LinearConstraint {
    pub fn new(terms: Vec<(usize, i64)>, cmp: Cmp, rhs: i64) -> Self {
        Self { terms, cmp, rhs }
    }

    /// `a - b >= rhs`
    pub fn difference(a: usize, b: usize, rhs: i64) -> Self {
        Self::new(vec![(a, 1), (b, -1)], Cmp::Ge, rhs)
    }

    /// `var == rhs`
    pub fn fix(var: usize, rhs: i64) -> Self {
        Self::new(vec![(var, 1)], Cmp::Eq, rhs)
    }

    /// Coefficients with duplicate variables summed and zeros removed.
    fn normalized(&self) -> Vec<(usize, i64)> {
        let mut merged: BTreeMap<usize, i64> = BTreeMap::new();
        for (var, coeff) in &self.terms {
            *merged.entry(*var).or_default() += coeff;
        }
        merged.into_iter().filter(|(_, c)| *c != 0).collect()
    }
}

impl Display for LinearConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lhs = if self.terms.is_empty() {
            "0".to_string()
        } else {
            self.terms
                .iter()
                .map(|(v, c)| format!("{c}*x{v}"))
                .join(" + ")
        };
        write!(f, "{lhs} {} {}", self.cmp, self.rhs)
    }
}

/// Minimize a linear objective over non-negative integer variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegerProgram {
    /// Names of the variables, for diagnostics.
    pub names: Vec<String>,
    pub constraints: Vec<LinearConstraint>,
    pub objective: Vec<(usize, i64)>,
}

impl IntegerProgram {
    pub fn num_vars(&self) -> usize {
        self.names.len()
    }

    /// Add a variable and return its index.
    pub fn add_var<S: ToString>(&mut self, name: S) -> usize {
        self.names.push(name.to_string());
        self.names.len() - 1
    }

    pub fn add_constraint(&mut self, constraint: LinearConstraint) {
        self.constraints.push(constraint);
    }

    /// Minimize `var`.
    pub fn minimize(&mut self, var: usize) {
        self.objective = vec![(var, 1)];
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolverStatus {
    Optimal,
    Infeasible,
    /// Anything else the solver could report, such as an unsupported
    /// program.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverResponse {
    pub status: SolverStatus,
    /// One value per variable when the status is optimal.
    pub values: Vec<i64>,
}

impl SolverResponse {
    fn failed(status: SolverStatus) -> Self {
        Self {
            status,
            values: Vec::new(),
        }
    }
}

/// An opaque constraint solver.
pub trait Solver {
    fn solve(&self, program: &IntegerProgram) -> SolverResponse;
}

/// Exact solver for systems of difference constraints.
///
/// Every constraint `x_a - x_b >= c` becomes an edge `b -> a` of weight `c`
/// in a constraint graph with an extra origin node fixed at 0. Longest path
/// distances from the origin are the least solution: each variable is as
/// small as the constraints allow, which minimizes any objective with
/// non-negative coefficients. A positive cycle means the program is
/// infeasible.
#[derive(Debug, Clone, Default)]
pub struct DifferenceSolver {
    verbose: bool,
}

impl DifferenceSolver {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    fn log(&self, msg: &str) {
        if self.verbose {
            log::info!("{msg}");
        } else {
            log::debug!("{msg}");
        }
    }
}

/// `x_a - x_b >= c` where `None` is the origin.
type Difference = (Option<usize>, Option<usize>, i64);

fn differences(
    constraint: &LinearConstraint,
) -> Result<Vec<Difference>, SolverStatus> {
    let terms = constraint.normalized();
    let ge = |terms: &[(usize, i64)], rhs: i64| -> Result<Difference, SolverStatus> {
        match terms {
            [] if 0 >= rhs => Ok((None, None, 0)),
            [] => Err(SolverStatus::Infeasible),
            [(v, 1)] => Ok((Some(*v), None, rhs)),
            [(v, -1)] => Ok((None, Some(*v), rhs)),
            [(a, 1), (b, -1)] | [(b, -1), (a, 1)] => Ok((Some(*a), Some(*b), rhs)),
            _ => Err(SolverStatus::Other(format!(
                "`{constraint}' is not a difference constraint"
            ))),
        }
    };
    let negated = terms.iter().map(|(v, c)| (*v, -c)).collect_vec();
    match constraint.cmp {
        Cmp::Ge => Ok(vec![ge(&terms, constraint.rhs)?]),
        Cmp::Le => Ok(vec![ge(&negated, -constraint.rhs)?]),
        Cmp::Eq => Ok(vec![
            ge(&terms, constraint.rhs)?,
            ge(&negated, -constraint.rhs)?,
        ]),
    }
}

impl Solver for DifferenceSolver {
    fn solve(&self, program: &IntegerProgram) -> SolverResponse {
        let n = program.num_vars();
        self.log(&format!(
            "Solving integer program with {n} variable(s) and {} constraint(s)",
            program.constraints.len()
        ));
        if let Some((var, _)) = program.objective.iter().find(|(_, c)| *c < 0) {
            return SolverResponse::failed(SolverStatus::Other(format!(
                "objective decreases with `{}'",
                program.names[*var]
            )));
        }

        let mut graph: DiGraph<(), f64> = DiGraph::with_capacity(n + 1, 0);
        let nodes = (0..n).map(|_| graph.add_node(())).collect_vec();
        let origin = graph.add_node(());
        let node = |v: Option<usize>| -> NodeIndex { v.map_or(origin, |v| nodes[v]) };

        // Variables are non-negative.
        for v in &nodes {
            graph.add_edge(origin, *v, 0.0);
        }
        for constraint in &program.constraints {
            let diffs = match differences(constraint) {
                Ok(d) => d,
                Err(status) => {
                    self.log(&format!("`{constraint}' rejected: {status:?}"));
                    return SolverResponse::failed(status);
                }
            };
            for (a, b, c) in diffs {
                if a.is_none() && b.is_none() {
                    continue;
                }
                // Shortest paths over negated weights are longest paths.
                graph.add_edge(node(b), node(a), -(c as f64));
            }
        }

        match bellman_ford(&graph, origin) {
            Ok(paths) => {
                let values = nodes
                    .iter()
                    .map(|v| (-paths.distances[v.index()]).round() as i64)
                    .collect_vec();
                if self.verbose {
                    for (name, value) in program.names.iter().zip(&values) {
                        log::info!("  {name} = {value}");
                    }
                }
                SolverResponse {
                    status: SolverStatus::Optimal,
                    values,
                }
            }
            Err(_) => {
                self.log("Constraint graph has a positive cycle");
                SolverResponse::failed(SolverStatus::Infeasible)
            }
        }
    }
}
