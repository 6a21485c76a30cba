//! Text rendering of plans for logging and debugging.
use crate::plan::{Expr, Guard, Plan, PortComp, Stmt, Transition};
use itertools::Itertools;
use redstone_ir::{Direction, SignalKind};
use std::io;

pub struct PlanPrinter;

impl PlanPrinter {
    pub fn guard_str(plan: &Plan, guard: &Guard) -> String {
        match guard {
            Guard::And(l, r) => format!(
                "{} & {}",
                Self::guard_str(plan, l),
                Self::guard_str(plan, r)
            ),
            Guard::Or(l, r) => format!(
                "({} | {})",
                Self::guard_str(plan, l),
                Self::guard_str(plan, r)
            ),
            Guard::Not(g) => match **g {
                Guard::Port(_) | Guard::True => {
                    format!("!{}", Self::guard_str(plan, g))
                }
                _ => format!("!({})", Self::guard_str(plan, g)),
            },
            Guard::True => "1'd1".to_string(),
            Guard::CompOp(op, l, r) => {
                let op = match op {
                    PortComp::Eq => "==",
                    PortComp::Neq => "!=",
                };
                format!(
                    "{} {op} {}",
                    plan.signal_name(l),
                    plan.signal_name(r)
                )
            }
            Guard::Port(s) => plan.signal_name(s),
        }
    }

    fn expr_str(plan: &Plan, expr: &Expr) -> String {
        let bin = |op: &str, l, r| {
            format!("{} {op} {}", plan.signal_name(l), plan.signal_name(r))
        };
        match expr {
            Expr::Signal(s) => plan.signal_name(s),
            Expr::Add(l, r) => bin("+", l, r),
            Expr::Mul(l, r) => bin("*", l, r),
            Expr::Eq(l, r) => bin("==", l, r),
        }
    }

    fn stmt_str(plan: &Plan, stmt: &Stmt) -> String {
        match stmt {
            Stmt::Latch { reg, src } => format!(
                "{} <= {}",
                plan.registers[*reg].name,
                plan.signal_name(src)
            ),
            Stmt::Assign { wire, src } => format!(
                "{} = {}",
                plan.wires[*wire].name,
                Self::expr_str(plan, src)
            ),
            Stmt::Drive { port, src } => {
                format!("{} = {}", plan.port(*port).name, plan.signal_name(src))
            }
            Stmt::Pulse { port } => format!("pulse {}", plan.port(*port).name),
        }
    }

    pub fn write_plan<F: io::Write>(plan: &Plan, f: &mut F) -> io::Result<()> {
        writeln!(f, "plan {} {{", plan.name)?;
        for port in &plan.ports {
            let dir = match port.direction {
                Direction::Input => "input",
                Direction::Output => "output",
            };
            match port.kind {
                SignalKind::Bus => {
                    writeln!(f, "  {dir} {}: {};", port.name, port.width)?
                }
                SignalKind::Pulse => {
                    writeln!(f, "  {dir} pulse {};", port.name)?
                }
            }
        }
        for inst in &plan.instances {
            writeln!(
                f,
                "  instance {}<{}, {}>({});",
                inst.module_name,
                inst.width,
                inst.depth,
                inst.ports
                    .iter()
                    .map(|(name, port)| format!(
                        "{name} = {}",
                        plan.port(*port).name
                    ))
                    .join(", ")
            )?;
        }
        for wire in &plan.wires {
            writeln!(f, "  wire {}: {};", wire.name, wire.width)?;
        }
        for reg in &plan.registers {
            writeln!(f, "  reg {}: {};", reg.name, reg.width)?;
        }
        let counter = &plan.counter;
        writeln!(
            f,
            "  counter {}: {} = 0..{};",
            counter.name, counter.width, counter.last
        )?;
        for slot in &plan.slots {
            writeln!(
                f,
                "  slot {} [{}] {{",
                slot.time,
                Self::guard_str(plan, &slot.guard)
            )?;
            if let Some(wait) = &slot.wait {
                writeln!(f, "    wait {};", Self::guard_str(plan, wait))?;
            }
            for g in &slot.stmts {
                let stmt = Self::stmt_str(plan, &g.stmt);
                if g.guard.is_true() {
                    writeln!(f, "    {stmt};")?;
                } else {
                    writeln!(
                        f,
                        "    {stmt} if {};",
                        Self::guard_str(plan, &g.guard)
                    )?;
                }
            }
            match &counter.transitions[slot.time as usize] {
                Transition::Unconditional(next) => {
                    writeln!(f, "    next {next};")?
                }
                Transition::Conditional(arms) => writeln!(
                    f,
                    "    next {};",
                    arms.iter()
                        .map(|(g, next)| if g.is_true() {
                            format!("{next}")
                        } else {
                            format!("{} ? {next}", Self::guard_str(plan, g))
                        })
                        .join(" : ")
                )?,
            }
            writeln!(f, "  }}")?;
        }
        for join in &plan.joins {
            writeln!(
                f,
                "  join at {} on {};",
                join.slot,
                Self::guard_str(plan, &join.selector)
            )?;
        }
        writeln!(f, "}}")
    }

    pub fn plan_to_string(plan: &Plan) -> String {
        let mut buf = Vec::new();
        // Writing into a vector cannot fail.
        let _ = Self::write_plan(plan, &mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Lower;
    use redstone_ir::{Block, Event, Function, Port, Value};

    #[test]
    fn renders_slots_and_transitions() {
        let mut f = Function::new("echo");
        let go = f.add_port(Port::input("go", 1));
        let a = f.add_port(Port::input("a", 4));
        let o = f.add_port(Port::output("o", 4));
        let b = f.add_block(Block::new("entry", Some(Event::port(go))));
        let x = f.push_value(b, Value::read(a, 4).at_time(0));
        f.push_value(b, Value::write(x, o, 4).at_time(1));
        let plan = Lower::new(true, "fsm").lower(&f).unwrap();
        let out = PlanPrinter::plan_to_string(&plan);
        assert!(out.starts_with("plan echo {"));
        assert!(out.contains("  counter fsm: 1 = 0..1;"));
        assert!(out.contains("  slot 0 [fsm == 1'd0 & go] {"));
        assert!(out.contains("    v0_reg <= a;"));
        assert!(out.contains("    o = v0_reg;"));
        assert!(out.contains("    next go ? 1 : 0;"));
    }
}
