use redstone::backend::{
    Expr, Guard, Lower, Plan, PortComp, Signal, Stmt, Transition,
};
use redstone::frontend::{self, BuildContext, Module, Op};
use redstone::ir::{self, Block, Direction, Port, PortId, SignalKind, Value};
use redstone::opt::analysis::DependencyGraph;
use redstone::opt::passes::AsapSchedule;
use redstone::opt::traversal::Visitor;
use redstone::utils::ErrorKind;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct ScenarioA {
    func: ir::Function,
    en: PortId,
    o: PortId,
    done: PortId,
}

/// 8-bit `a` and `b` read in cycles 0 and 1 under an enable, summed, and
/// written with a done pulse in cycle 2.
fn scenario_a() -> ScenarioA {
    let mut func = ir::Function::new("adder");
    let en = func.add_port(Port::input("en", 1));
    let a = func.add_port(Port::input("a", 8));
    let b = func.add_port(Port::input("b", 8));
    let o = func.add_port(Port::output("o", 8));
    let done = func.add_port(Port::new(
        Some("done".into()),
        Direction::Output,
        SignalKind::Pulse,
        1,
    ));
    let blk =
        func.add_block(Block::new("entry", Some(ir::Event::port(en))));
    let x = func.push_value(blk, Value::read(a, 8).at_time(0));
    let y = func.push_value(blk, Value::read(b, 8).at_time(1));
    let s = func.push_value(blk, Value::add(x, y, 8));
    func.push_value(blk, Value::write(s, o, 8).at_time(2));
    func.push_value(blk, Value::emit(done).at_time(2));
    ScenarioA { func, en, o, done }
}

fn times(func: &ir::Function) -> Vec<Option<u64>> {
    func.blocks[0]
        .body
        .iter()
        .map(|v| func.values[*v].time)
        .collect()
}

fn lower_a() -> (ScenarioA, ir::Context, Plan) {
    let sc = scenario_a();
    let mut ctx = ir::Context::new(vec![sc.func.clone()], vec![]);
    let mut plans = redstone::compile_context(&mut ctx).unwrap();
    let plan = plans.remove(0);
    (sc, ctx, plan)
}

#[test]
fn scenario_a_schedules_add_after_b() {
    init();
    let (_, ctx, _) = lower_a();
    assert_eq!(
        times(&ctx.functions[0]),
        vec![Some(0), Some(1), Some(1), Some(2), Some(2)]
    );
}

#[test]
fn scenario_a_lowers_to_two_bit_counter() {
    init();
    let (sc, _, plan) = lower_a();
    let en = Guard::signal(Signal::Port(sc.en));
    assert_eq!(plan.counter.width, 2);
    assert_eq!(plan.counter.last, 2);
    assert_eq!(plan.slots.len(), 3);
    assert_eq!(plan.start, en);
    assert_eq!(plan.slots[0].guard, Guard::state(0, 2).and(en.clone()));
    assert_eq!(
        plan.counter.transitions[0],
        Transition::Conditional(vec![(en, 1), (Guard::True, 0)])
    );

    // write and done fire together, only in the last slot
    assert_eq!(plan.slots[2].guard, Guard::state(2, 2));
    let effects = |slot: usize| {
        plan.slots[slot]
            .stmts
            .iter()
            .filter(|g| matches!(g.stmt, Stmt::Drive { .. } | Stmt::Pulse { .. }))
            .map(|g| g.stmt.clone())
            .collect::<Vec<_>>()
    };
    assert!(effects(0).is_empty());
    assert!(effects(1).is_empty());
    let last = effects(2);
    assert_eq!(last.len(), 2);
    assert!(last
        .iter()
        .any(|s| matches!(s, Stmt::Drive { port, src: Signal::Reg(_) } if *port == sc.o)));
    assert!(last.contains(&Stmt::Pulse { port: sc.done }));
}

#[test]
fn counter_wraps_after_last_slot() {
    init();
    let (sc, _, plan) = lower_a();
    let step = |cur: u64, start: u64| {
        plan.counter.next_state(cur, |g| {
            g.eval(&mut |s: &Signal| match s {
                Signal::Port(p) if *p == sc.en => start,
                Signal::Counter => cur,
                Signal::Const { value, .. } => *value,
                _ => 0,
            })
        })
    };
    assert_eq!(step(0, 0), 0);
    assert_eq!(step(0, 1), 1);
    assert_eq!(step(1, 0), 2);
    assert_eq!(step(2, 0), 0);
    assert_eq!(step(2, 1), 0);
    // The start condition is only consulted in state 0.
    for t in 1..=plan.counter.last {
        assert!(matches!(
            plan.counter.transitions[t as usize],
            Transition::Unconditional(_)
        ));
    }
}

fn scenario_b() -> Module {
    let mut ctx = BuildContext::start_module("adder32");
    let go = ctx.input_pulse(Some("go"));
    let a = ctx.input(32, Some("a"));
    let b = ctx.input(32, Some("b"));
    let o = ctx.output(32, Some("o"));
    let v = ctx.values(&[32, 32, 32], "x y s");
    let (x, y, s) = (v[0], v[1], v[2]);
    let t0 = ctx.tzero();
    let w = ctx.wait(frontend::Event::Pulse(go), t0).unwrap();
    ctx.at(w)
        .perform([Op::sample(a, x), Op::sample(b, y)])
        .unwrap();
    ctx.perform([Op::add(x, y, s)]).unwrap();
    ctx.at(w).perform([Op::write(s, o)]).unwrap();
    ctx.finish()
}

#[test]
fn scenario_b_forwards_same_cycle_operands() {
    init();
    let module = scenario_b();
    let plan = redstone::compile(&module, vec![]).unwrap().remove(0);
    assert_eq!(plan.slots.len(), 1);
    assert!(plan.registers.is_empty());
    let go = PortId::from(0);
    assert_eq!(plan.slots[0].wait, Some(Guard::signal(Signal::Port(go))));
    let add = plan.slots[0]
        .stmts
        .iter()
        .find_map(|g| match g.stmt {
            Stmt::Assign {
                src: Expr::Add(l, r),
                ..
            } => Some((l, r)),
            _ => None,
        })
        .unwrap();
    assert!(matches!(add, (Signal::Wire(_), Signal::Wire(_))));
}

#[test]
fn lowering_is_deterministic() {
    init();
    let module = scenario_b();
    let first = redstone::compile(&module, vec![]).unwrap();
    let second = redstone::compile(&module, vec![]).unwrap();
    assert_eq!(first, second);
}

#[test]
fn scenario_c_unscheduled_block_is_rejected() {
    init();
    let mut func = ir::Function::new("lazy");
    let a = func.add_port(Port::input("a", 8));
    let o = func.add_port(Port::output("o", 8));
    let blk = func.add_block(Block::new("entry", None));
    let x = func.push_value(blk, Value::read(a, 8));
    func.push_value(blk, Value::write(x, o, 8));

    let err = Lower::new(true, "counter").lower(&func).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LoweringPreconditionViolation);

    let mut ctx = ir::Context::new(vec![func], vec![]);
    let err = Lower::do_pass_default(&mut ctx).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::LoweringPreconditionViolation);
}

fn two_blocks() -> Module {
    let mut ctx = BuildContext::start_module("two");
    let a = ctx.input(8, Some("a"));
    let o = ctx.output(8, Some("o"));
    let x = ctx.value(8, Some("x"));
    ctx.perform([Op::read(a, x)]).unwrap();
    {
        let t0 = ctx.tzero();
        let mut body = ctx.loop_at(Some(t0));
        let cur = body.iter_start;
        let y = body.value(8, Some("y"));
        body.at(cur).perform([Op::read(a, y)]).unwrap();
        body.perform([Op::write(y, o)]).unwrap();
    }
    ctx.finish()
}

#[test]
fn scenario_d_two_blocks_are_rejected() {
    init();
    let module = two_blocks();
    let ctx = redstone::schedule_function(&module, vec![]).unwrap();
    let func = &ctx.functions[0];
    assert_eq!(func.blocks.len(), 2);
    assert!(func.blocks.iter().all(|b| b.scheduled(&func.values)));

    let err = redstone::compile(&module, vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFunctionShape);
}

/// A loop reading `a` and `b` one cycle apart and writing their sum two
/// cycles after the iteration starts. The next iteration starts `ii` cycles
/// after the current one.
fn adder_loop(ii: u64) -> Module {
    let mut ctx = BuildContext::start_module("adder1");
    let a = ctx.input(8, Some("a"));
    let b = ctx.input(8, Some("b"));
    let o = ctx.output(8, Some("o"));
    {
        let t0 = ctx.tzero();
        let mut body = ctx.loop_at(Some(t0));
        let (cur, next) = (body.iter_start, body.next_iter_start);
        let v = body.values(&[8, 8, 8], "x y s");
        let t1 = body.delay(cur, 1);
        let t2 = body.delay(cur, 2);
        body.at(cur).perform([Op::read(a, v[0])]).unwrap();
        body.at(t1).perform([Op::read(b, v[1])]).unwrap();
        body.perform([Op::add(v[0], v[1], v[2])]).unwrap();
        body.at(t2).perform([Op::write(v[2], o)]).unwrap();
        let tn = body.delay(cur, ii);
        body.tset(next, tn);
    }
    ctx.finish()
}

#[test]
fn short_initiation_interval_is_ignored() {
    init();
    let plan = redstone::compile(&adder_loop(1), vec![]).unwrap().remove(0);
    assert_eq!(plan.counter.last, 2);
    assert_eq!(plan.counter.width, 2);
}

#[test]
fn long_initiation_interval_extends_counter() {
    init();
    let plan = redstone::compile(&adder_loop(5), vec![]).unwrap().remove(0);
    assert_eq!(plan.counter.last, 4);
    assert_eq!(plan.counter.width, 3);
    assert_eq!(plan.slots.len(), 5);
    assert!(plan.slots[4].stmts.is_empty());
}

#[test]
fn cross_cycle_results_are_registered() {
    init();
    let mut ctx = BuildContext::start_module("adder2");
    let a = ctx.input(8, Some("a"));
    let b = ctx.input(8, Some("b"));
    let o = ctx.output(8, Some("o"));
    let v = ctx.values(&[8, 8, 8], "x y s");
    let t0 = ctx.tzero();
    let t1 = ctx.delay(t0, 1);
    ctx.at(t0)
        .perform([Op::read(a, v[0]), Op::read(b, v[1])])
        .unwrap();
    ctx.perform([Op::add(v[0], v[1], v[2])]).unwrap();
    ctx.at(t1).perform([Op::write(v[2], o)]).unwrap();
    let plan = redstone::compile(&ctx.finish(), vec![]).unwrap().remove(0);

    assert_eq!(plan.registers.len(), 1);
    let sum = plan.registers[0].value;
    let drive = plan.slots[1]
        .stmts
        .iter()
        .find_map(|g| match g.stmt {
            Stmt::Drive { src, .. } => Some(src),
            _ => None,
        })
        .unwrap();
    assert_eq!(drive, Signal::Reg(0));
    assert_eq!(plan.register_of(sum), Some(0));
    assert!(plan.register_is_read(0));
}

/// Arms of a branch on `sel` define `out` differently; the merge needs a phi.
fn async_branch() -> Module {
    let mut ctx = BuildContext::start_module("async_branch");
    let a = ctx.input(8, Some("a"));
    let s = ctx.input(1, Some("s"));
    let o = ctx.output(8, Some("o"));
    let v = ctx.values(&[8, 1, 8], "x sel out");
    let (x, sel, out) = (v[0], v[1], v[2]);
    ctx.perform([Op::read(a, x), Op::read(s, sel)]).unwrap();
    let handle = {
        let mut br = ctx.branch(frontend::Event::var(sel), None).unwrap();
        br.then().perform([Op::add(x, x, out)]).unwrap();
        br.otherwise().perform([Op::mul(x, x, out)]).unwrap();
        br.handle()
    };
    let join = ctx.tphi(handle);
    ctx.at(join).perform([Op::write(out, o)]).unwrap();
    ctx.finish()
}

#[test]
fn schedule_respects_dependencies_and_phi() {
    init();
    let ctx = redstone::schedule_function(&async_branch(), vec![]).unwrap();
    let func = &ctx.functions[0];
    let block = &func.blocks[0];
    let time = |pos: usize| func.values[block.body[pos]].time.unwrap();
    let graph = DependencyGraph::from_block(func, block).unwrap();
    assert!(!graph.edges().is_empty());
    for (p, c) in graph.edges() {
        assert!(time(*c) >= time(*p));
    }
    for (pos, v) in block.body.iter().enumerate() {
        if func.values[*v].kind == ir::ValueKind::Phi {
            assert_eq!(time(pos), 0);
        }
    }
    assert!(block.timing.is_resolved());
}

#[test]
fn phi_reaching_lowering_is_unhandled() {
    init();
    let err = redstone::compile(&async_branch(), vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnhandledValueKind);
}

#[test]
fn runtime_join_is_exported() {
    init();
    let mut ctx = BuildContext::start_module("join");
    let a = ctx.input(8, Some("a"));
    let s = ctx.input(1, Some("s"));
    let o = ctx.output(8, Some("o"));
    let done = ctx.output_pulse(Some("done"));
    let v = ctx.values(&[8, 1], "x sel");
    let (x, sel) = (v[0], v[1]);
    ctx.perform([Op::read(a, x), Op::read(s, sel)]).unwrap();
    let handle = {
        let mut br = ctx.branch(frontend::Event::var(sel), None).unwrap();
        br.then().perform([Op::write(x, o)]).unwrap();
        br.otherwise().perform([Op::emit(done)]).unwrap();
        br.handle()
    };
    let join = ctx.tphi(handle);
    ctx.at(join).perform([Op::emit(done)]).unwrap();
    let plan = redstone::compile(&ctx.finish(), vec![]).unwrap().remove(0);

    assert_eq!(plan.joins.len(), 1);
    assert_eq!(plan.joins[0].slot, 0);
    assert!(matches!(plan.joins[0].selector, Guard::Port(Signal::Wire(_))));
}

#[test]
fn contradictory_anchors_leave_times_untouched() {
    init();
    let mut func = ir::Function::new("bad");
    let a = func.add_port(Port::input("a", 8));
    let blk = func.add_block(Block::new("entry", None));
    let x = func.push_value(blk, Value::read(a, 8).at_time(5));
    func.push_value(blk, Value::add(x, x, 8).at_time(2));
    func.push_value(blk, Value::read(a, 8));

    let mut ctx = ir::Context::new(vec![func], vec![]);
    let err = AsapSchedule::do_pass_default(&mut ctx).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::SchedulingInfeasible);
    assert_eq!(times(&ctx.functions[0]), vec![Some(5), Some(2), None]);
}

#[test]
fn rescheduling_is_idempotent() {
    init();
    let mut ctx = ir::Context::new(vec![scenario_a().func], vec![]);
    AsapSchedule::do_pass_default(&mut ctx).unwrap();
    let first = times(&ctx.functions[0]);
    AsapSchedule::do_pass_default(&mut ctx).unwrap();
    assert_eq!(times(&ctx.functions[0]), first);
}

#[test]
fn pass_options_are_honoured() {
    init();
    let module = scenario_b();
    let err = redstone::compile(
        &module,
        vec!["schedule:objective=ALAP".to_string()],
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedSchedulingObjective);

    let plan = redstone::compile(&module, vec!["lower:counter=fsm".to_string()])
        .unwrap()
        .remove(0);
    assert_eq!(plan.counter.name, "fsm");
}

#[test]
fn instances_are_exported() {
    init();
    let mut ctx = BuildContext::start_module("with_fifo");
    let a = ctx.input(8, Some("a"));
    let o = ctx.output(8, Some("o"));
    ctx.instantiate("fifo", 8, 16, [("din", o)]).unwrap();
    let x = ctx.value(8, Some("x"));
    ctx.perform([Op::read(a, x), Op::write(x, o)]).unwrap();
    let plan = redstone::compile(&ctx.finish(), vec![]).unwrap().remove(0);
    assert_eq!(plan.instances.len(), 1);
    assert_eq!(plan.instances[0].module_name, "fifo");
    assert_eq!(plan.instances[0].depth, 16);
}

/// `x` is read in cycle 1. The wait on `x` starts at a free time, and `fin`
/// fires one cycle after the wait.
fn late_wait() -> Module {
    let mut ctx = BuildContext::start_module("late_wait");
    let a = ctx.input(1, Some("a"));
    let done = ctx.output_pulse(Some("done"));
    let fin = ctx.output_pulse(Some("fin"));
    let x = ctx.value(1, Some("x"));
    let t0 = ctx.tzero();
    let t1 = ctx.delay(t0, 1);
    ctx.at(t1).perform([Op::read(a, x)]).unwrap();
    let t = ctx.tvar();
    let w = ctx.wait(frontend::Event::var(x), t).unwrap();
    ctx.at(w).perform([Op::emit(done)]).unwrap();
    let after = ctx.delay(w, 1);
    ctx.at(after).perform([Op::emit(fin)]).unwrap();
    ctx.finish()
}

#[test]
fn wait_is_not_scheduled_before_its_source() {
    init();
    let ctx = redstone::schedule_function(&late_wait(), vec![]).unwrap();
    let func = &ctx.functions[0];
    assert_eq!(times(func), vec![Some(1), Some(1), Some(2)]);
    let classes = &func.blocks[0].timing.classes;
    assert!(classes.values().all(|c| c.resolved == Some(1)));
}

#[test]
fn counter_stalls_on_a_later_wait_slot() {
    init();
    let plan = redstone::compile(&late_wait(), vec![]).unwrap().remove(0);
    assert_eq!(plan.counter.last, 2);
    assert_eq!(plan.counter.width, 2);
    assert!(plan.registers.is_empty());

    let wait = plan.slots[1].wait.clone().unwrap();
    assert!(matches!(wait, Guard::Port(Signal::Wire(_))));
    assert_eq!(plan.slots[1].guard, Guard::state(1, 2).and(wait.clone()));
    assert_eq!(
        plan.counter.transitions[1],
        Transition::Conditional(vec![(wait, 2), (Guard::True, 1)])
    );
    assert_eq!(plan.counter.transitions[2], Transition::Unconditional(0));

    let step = |x: u64| {
        plan.counter.next_state(1, |g| {
            g.eval(&mut |s: &Signal| match s {
                Signal::Wire(_) => x,
                Signal::Counter => 1,
                Signal::Const { value, .. } => *value,
                _ => 0,
            })
        })
    };
    assert_eq!(step(0), 1);
    assert_eq!(step(1), 2);
}

#[test]
fn join_is_not_scheduled_before_its_selector() {
    init();
    let mut ctx = BuildContext::start_module("late_join");
    let s = ctx.input(1, Some("s"));
    let done = ctx.output_pulse(Some("done"));
    let sel = ctx.value(1, Some("sel"));
    let t0 = ctx.tzero();
    let t1 = ctx.delay(t0, 1);
    ctx.at(t1).perform([Op::read(s, sel)]).unwrap();
    let handle = ctx.branch(frontend::Event::var(sel), None).unwrap().handle();
    let join = ctx.tphi(handle);
    ctx.at(join).perform([Op::emit(done)]).unwrap();
    let plan = redstone::compile(&ctx.finish(), vec![]).unwrap().remove(0);

    assert_eq!(plan.joins.len(), 1);
    assert_eq!(plan.joins[0].slot, 1);
    assert!(matches!(plan.joins[0].selector, Guard::Port(Signal::Wire(_))));
}

#[test]
fn switch_default_excludes_every_case() {
    init();
    let mut ctx = BuildContext::start_module("decoder");
    let s = ctx.input(2, Some("s"));
    let a = ctx.input(8, Some("a"));
    let o = ctx.output(8, Some("o"));
    let hit = ctx.output_pulse(Some("hit"));
    let v = ctx.values(&[2, 8], "sel x");
    let (sel, x) = (v[0], v[1]);
    ctx.perform([Op::read(s, sel), Op::read(a, x)]).unwrap();
    {
        let mut sw = ctx.switch(sel, None).unwrap();
        sw.case(1).perform([Op::emit(hit)]).unwrap();
        sw.case(2).perform([Op::emit(hit)]).unwrap();
        sw.default().perform([Op::write(x, o)]).unwrap();
    }
    let plan = redstone::compile(&ctx.finish(), vec![]).unwrap().remove(0);
    assert_eq!(plan.slots.len(), 1);

    let stmts = &plan.slots[0].stmts;
    let sel_sig = stmts
        .iter()
        .find_map(|g| match (&g.stmt, &g.guard) {
            (Stmt::Pulse { .. }, Guard::CompOp(PortComp::Eq, s, _)) => Some(*s),
            _ => None,
        })
        .unwrap();
    let drive = stmts
        .iter()
        .find(|g| matches!(g.stmt, Stmt::Drive { .. }))
        .unwrap();
    let neq = |k| Guard::CompOp(PortComp::Neq, sel_sig, Signal::constant(k, 2));
    assert_eq!(drive.guard, neq(1).and(neq(2)));

    let taken = |sel: u64| {
        drive.guard.eval(&mut |s: &Signal| match s {
            Signal::Const { value, .. } => *value,
            _ => sel,
        })
    };
    assert!(taken(0));
    assert!(!taken(1));
    assert!(!taken(2));
    assert!(taken(3));
}

#[test]
fn strict_before_separates_cycles() {
    init();
    let build = |strict: bool| {
        let mut ctx = BuildContext::start_module("ordered");
        let a = ctx.input(8, Some("a"));
        let b = ctx.input(8, Some("b"));
        let v = ctx.values(&[8, 8], "x y");
        let (t, u) = (ctx.tvar(), ctx.tvar());
        ctx.tbefore(t, u, strict);
        ctx.at(t).perform([Op::read(a, v[0])]).unwrap();
        ctx.at(u).perform([Op::read(b, v[1])]).unwrap();
        ctx.finish()
    };
    let ctx = redstone::schedule_function(&build(true), vec![]).unwrap();
    assert_eq!(times(&ctx.functions[0]), vec![Some(0), Some(1)]);
    let ctx = redstone::schedule_function(&build(false), vec![]).unwrap();
    assert_eq!(times(&ctx.functions[0]), vec![Some(0), Some(0)]);
}

#[cfg(feature = "serialize")]
#[test]
fn plans_serialize() {
    let (_, _, plan) = lower_a();
    let json = serde_json::to_string(&plan).unwrap();
    assert!(json.contains("\"counter\""));
    assert!(json.contains("\"adder\""));
}
