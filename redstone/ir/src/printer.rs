//! Implements a formatter for the in-memory representation of functions.
use crate::{
    Block, Condition, Event, Function, Predicate, SignalKind, Value, ValueIdx,
};
use itertools::Itertools;
use redstone_frontend::Direction;
use redstone_utils::IndexRef;
use std::io;

/// Printer for the IR.
pub struct Printer;

impl Printer {
    fn format_ports(func: &Function) -> String {
        func.ports
            .iter()
            .map(|(idx, p)| {
                let dir = match p.direction {
                    Direction::Input => "in",
                    Direction::Output => "out",
                };
                match p.kind {
                    SignalKind::Bus => {
                        format!("{}: {dir} {}", func.port_name(idx), p.width)
                    }
                    SignalKind::Pulse => {
                        format!("{}: {dir} pulse", func.port_name(idx))
                    }
                }
            })
            .join(", ")
    }

    fn format_value_ref(idx: ValueIdx) -> String {
        format!("%{}", idx.index())
    }

    pub fn format_event(func: &Function, event: &Event) -> String {
        match event {
            Event::Level(Condition::Port(p)) => func.port_name(*p).to_string(),
            Event::Level(Condition::Value(v)) => Self::format_value_ref(*v),
            Event::Pulse(p) => format!("pulse({})", func.port_name(*p)),
        }
    }

    fn format_predicate(func: &Function, pred: &Predicate) -> String {
        match pred {
            Predicate::When(e) => Self::format_event(func, e),
            Predicate::Unless(e) => format!("!{}", Self::format_event(func, e)),
            Predicate::Case { selector, value } => {
                format!("{} == {value}", Self::format_value_ref(*selector))
            }
            Predicate::Default { selector, cases } => format!(
                "{} not in [{}]",
                Self::format_value_ref(*selector),
                cases.iter().join(", ")
            ),
        }
    }

    /// Format a single value as `%i = kind operands`.
    pub fn format_value(func: &Function, idx: ValueIdx, value: &Value) -> String {
        let mut buf = String::new();
        if !value.void {
            buf.push_str(&format!("{} = ", Self::format_value_ref(idx)));
        }
        buf.push_str(value.kind.as_str());
        let operands = value
            .operands
            .iter()
            .map(|v| Self::format_value_ref(*v))
            .join(", ");
        if !operands.is_empty() {
            buf.push(' ');
            buf.push_str(&operands);
        }
        if let Some(port) = value.port {
            let port = func.port_name(port);
            if value.void {
                buf.push_str(&format!(" -> {port}"));
            } else {
                buf.push_str(&format!(" {port}"));
            }
        }
        if !value.void {
            buf.push_str(&format!(" : {}", value.width));
        }
        if let Some(name) = value.name {
            buf.push_str(&format!(" \"{name}\""));
        }
        if !value.predicates.is_empty() {
            buf.push_str(&format!(
                " if {}",
                value
                    .predicates
                    .iter()
                    .map(|p| Self::format_predicate(func, p))
                    .join(" & ")
            ));
        }
        match value.time {
            Some(t) => buf.push_str(&format!(" @{t}")),
            None => buf.push_str(" @?"),
        }
        buf
    }

    pub fn write_block<F: io::Write>(
        func: &Function,
        block: &Block,
        indent: usize,
        f: &mut F,
    ) -> io::Result<()> {
        write!(f, "{}{}", " ".repeat(indent), block.name)?;
        if let Some(guard) = &block.guard {
            write!(f, " [{}]", Self::format_event(func, guard))?;
        }
        writeln!(f, " {{")?;
        for idx in &block.body {
            writeln!(
                f,
                "{}{};",
                " ".repeat(indent + 2),
                Self::format_value(func, *idx, &func.values[*idx])
            )?;
        }
        let timing = &block.timing;
        for (idx, class) in timing.classes.iter() {
            let resolved = class
                .resolved
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".to_string());
            writeln!(
                f,
                "{}T{} \"{}\" = {resolved};",
                " ".repeat(indent + 2),
                idx.index(),
                class.name
            )?;
        }
        for rel in &timing.relations {
            writeln!(f, "{}assume {rel};", " ".repeat(indent + 2))?;
        }
        for wait in &timing.waits {
            writeln!(
                f,
                "{}wait {} at {};",
                " ".repeat(indent + 2),
                Self::format_event(func, &wait.event),
                wait.at
            )?;
        }
        for join in &timing.joins {
            writeln!(
                f,
                "{}join on {} at {};",
                " ".repeat(indent + 2),
                Self::format_event(func, &join.selector),
                join.at
            )?;
        }
        if let Some(next) = &timing.next_iteration {
            writeln!(f, "{}next {next};", " ".repeat(indent + 2))?;
        }
        writeln!(f, "{}}}", " ".repeat(indent))
    }

    pub fn write_function<F: io::Write>(
        func: &Function,
        f: &mut F,
    ) -> io::Result<()> {
        writeln!(f, "function {}({}) {{", func.name, Self::format_ports(func))?;
        for inst in &func.instances {
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
                        func.port_name(*port)
                    ))
                    .join(", ")
            )?;
        }
        for block in &func.blocks {
            Self::write_block(func, block, 2, f)?;
        }
        writeln!(f, "}}")
    }

    pub fn function_to_string(func: &Function) -> String {
        let mut buf = Vec::new();
        // Writing into a vector cannot fail.
        let _ = Self::write_function(func, &mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redstone_frontend::Port;

    #[test]
    fn prints_values_with_times() {
        let mut func = Function::new("adder");
        let a = func.add_port(Port::input("a", 8));
        let o = func.add_port(Port::output("o", 8));
        let b = func.add_block(Block::new("entry", None));
        let x = func.push_value(b, Value::read(a, 8).at_time(0));
        func.push_value(b, Value::write(x, o, 8));
        let out = Printer::function_to_string(&func);
        assert!(out.starts_with("function adder(a: in 8, o: out 8) {"));
        assert!(out.contains("%0 = read a : 8 @0;"));
        assert!(out.contains("write %0 -> o @?;"));
    }
}
