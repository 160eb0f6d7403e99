// tests/expander.rs

mod common;
use crate::common::builders::{RuntimeBuilder, gpu, host, region, region_on};
use crate::common::init_tracing;

use std::collections::BTreeSet;

use lanedag::dag::{
    AccessMode, BufferAccess, CopyEndpoint, DagBuilder, DagEnumerator, ExecutionHints, Expansion,
    NodeStatus, Operation,
};
use lanedag::runtime::SubmittedOps;
use lanedag::sched::DagInterpreter;

fn interpret(builder: &mut DagBuilder) -> DagInterpreter {
    let dag = builder.finish_and_reset();
    let enumerator = DagEnumerator::new(&dag);
    DagInterpreter::new(dag, enumerator)
}

#[test]
fn running_the_expander_twice_gives_the_same_result() {
    init_tracing();
    let a = region(1);
    let b = region_on(2, gpu(0));

    let mut builder = DagBuilder::default();
    builder.append(Operation::require(&a, AccessMode::Read, gpu(0)), ExecutionHints::new());
    builder.append(Operation::require(&a, AccessMode::Read, gpu(0)), ExecutionHints::new());
    builder.append(
        Operation::memcpy(CopyEndpoint::new(&b, gpu(0)), CopyEndpoint::new(&a, gpu(1))),
        ExecutionHints::new(),
    );
    builder.append(
        Operation::memcpy(CopyEndpoint::new(&b, gpu(0)), CopyEndpoint::new(&a, gpu(1))),
        ExecutionHints::new(),
    );
    let dag = builder.finish_and_reset();

    let first = DagInterpreter::new(dag.clone(), DagEnumerator::new(&dag));
    let second = DagInterpreter::new(dag.clone(), DagEnumerator::new(&dag));

    assert_eq!(first.expansions(), second.expansions());
    // Neither run touched the regions themselves.
    assert_eq!(a.valid_devices(), BTreeSet::from([host()]));
}

#[test]
fn requirement_already_satisfied_is_optimized_away() {
    init_tracing();
    let r = region(1);

    let mut builder = DagBuilder::default();
    let first = builder.append(Operation::require(&r, AccessMode::Read, gpu(0)), ExecutionHints::new());
    let second = builder.append(Operation::require(&r, AccessMode::Read, gpu(0)), ExecutionHints::new());
    let on_host = builder.append(Operation::require(&r, AccessMode::Read, host()), ExecutionHints::new());
    // Coherence transitions on one region are serialized.
    assert_eq!(second.requirements(), &[first.id()]);

    let interpreter = interpret(&mut builder);

    assert!(interpreter.expansion_of(first.id()).unwrap().is_operation_replaced());
    assert!(interpreter.expansion_of(second.id()).unwrap().is_optimized_away());
    assert!(interpreter.expansion_of(on_host.id()).unwrap().is_optimized_away());
}

#[test]
fn discard_write_requirement_never_moves_data() {
    init_tracing();
    let r = region(1);

    let mut builder = DagBuilder::default();
    let discard = builder.append(
        Operation::require(&r, AccessMode::DiscardWrite, gpu(0)),
        ExecutionHints::new(),
    );
    let read_back = builder.append(Operation::require(&r, AccessMode::Read, host()), ExecutionHints::new());

    let interpreter = interpret(&mut builder);

    assert_eq!(interpreter.expansion_of(discard.id()), Some(&Expansion::OptimizedAway));
    // The discard made gpu(0) the only valid copy, so reading on the host
    // needs a copy back.
    let replacement = interpreter
        .expansion_of(read_back.id())
        .and_then(Expansion::replacement_operation)
        .expect("read-back should be replaced by a copy");
    let Operation::Memcpy(copy) = replacement else {
        panic!("expected a memcpy, got {replacement:?}");
    };
    assert_eq!(copy.source.device, gpu(0));
    assert_eq!(copy.dest.device, host());
}

#[test]
fn missing_data_is_copied_from_the_lowest_valid_device() {
    init_tracing();
    let r = region_on(1, gpu(1));

    let mut builder = DagBuilder::default();
    let req = builder.append(Operation::require(&r, AccessMode::ReadWrite, gpu(0)), ExecutionHints::new());

    let interpreter = interpret(&mut builder);

    match interpreter.expansion_of(req.id()) {
        Some(Expansion::Replaced(Operation::Memcpy(copy))) => {
            assert_eq!(copy.source.device, gpu(1));
            assert_eq!(copy.dest.device, gpu(0));
            assert_eq!(copy.source.region.id(), r.id());
            assert_eq!(copy.bytes, r.size());
        }
        other => panic!("expected a replacement copy, got {other:?}"),
    }

    let effective = interpreter.effective_hints(0);
    assert_eq!(effective.expansion(), interpreter.expansion_of(req.id()));
    let (_, valid) = interpreter
        .validity_updates()
        .find(|(region, _)| region.id() == r.id())
        .unwrap();
    assert_eq!(valid, &BTreeSet::from([gpu(0)]));
}

#[test]
fn identical_copy_is_forwarded_until_a_region_changes() {
    init_tracing();
    let src = region_on(1, gpu(0));
    let dst = region_on(2, gpu(1));
    let copy = || Operation::memcpy(CopyEndpoint::new(&src, gpu(0)), CopyEndpoint::new(&dst, gpu(1)));

    let mut builder = DagBuilder::default();
    let c1 = builder.append(copy(), ExecutionHints::new());
    let c2 = builder.append(copy(), ExecutionHints::new());
    builder.append(
        Operation::kernel("touch", vec![BufferAccess::new(&src, AccessMode::Write)]),
        ExecutionHints::bind_to_device(gpu(0)),
    );
    let c3 = builder.append(copy(), ExecutionHints::new());

    let interpreter = interpret(&mut builder);

    assert_eq!(interpreter.expansion_of(c1.id()), Some(&Expansion::Kept));
    assert_eq!(
        interpreter.expansion_of(c2.id()).and_then(Expansion::forwarding_target),
        Some(c1.id())
    );
    assert_eq!(interpreter.expansion_of(c3.id()), Some(&Expansion::Kept));
}

#[test]
fn submission_follows_the_expansion() {
    init_tracing();
    let rt = RuntimeBuilder::new();
    let log = rt.log();
    let scheduler = rt.build_scheduler();
    let r = region(1);
    let src = region_on(2, gpu(0));
    let dst = region_on(3, gpu(1));
    let copy = || Operation::memcpy(CopyEndpoint::new(&src, gpu(0)), CopyEndpoint::new(&dst, gpu(1)));

    let mut builder = DagBuilder::default();
    let req = builder.append(Operation::require(&r, AccessMode::Read, gpu(0)), ExecutionHints::new());
    let again = builder.append(Operation::require(&r, AccessMode::Read, gpu(0)), ExecutionHints::new());
    let k = builder.append(
        Operation::kernel("k", vec![BufferAccess::new(&r, AccessMode::Read)]),
        ExecutionHints::bind_to_device(gpu(0)),
    );
    let c1 = builder.append(copy(), ExecutionHints::new());
    let c2 = builder.append(copy(), ExecutionHints::new());

    let scheduled = scheduler.submit(builder.finish_and_reset(), &SubmittedOps::new());
    assert!(scheduled.report.is_ok());
    assert_eq!(scheduled.report.submitted, 3);
    assert_eq!(scheduled.report.skipped, 1);
    assert_eq!(scheduled.report.forwarded, 1);

    assert_eq!(log.submitted_labels(), vec!["memcpy", "k", "memcpy"]);
    assert!(matches!(again.status(), Some(NodeStatus::Skipped { .. })));
    assert!(matches!(
        c2.status(),
        Some(NodeStatus::Forwarded { target, .. }) if *target == c1.id()
    ));
    assert_eq!(c2.placement(), c1.placement());

    // `k` waits on the copy behind `req`, looking through the skipped node.
    let deps: Vec<_> = scheduled.annotations[2]
        .dependencies
        .iter()
        .map(|n| n.id())
        .collect();
    assert_eq!(deps, vec![req.id()]);
    assert_eq!(k.placement().unwrap().device, gpu(0));

    // Validity is committed once the graph is submitted.
    assert_eq!(r.valid_devices(), BTreeSet::from([host(), gpu(0)]));
    assert_eq!(dst.valid_devices(), BTreeSet::from([gpu(1)]));
}
