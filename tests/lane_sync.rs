// tests/lane_sync.rs

mod common;
use crate::common::builders::{GPU, OTHER, RuntimeBuilder, gpu, host, other, region, region_on};
use crate::common::fake_queue::{DeviceLog, QueueCall};
use crate::common::{init_tracing, with_timeout};

use std::collections::BTreeSet;
use std::error::Error;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lanedag::config::{LaneSection, SchedulerSection};
use lanedag::dag::{
    AccessMode, BufferAccess, CopyEndpoint, DagBuilder, ExecutionHint, ExecutionHints, NodeStatus,
    Operation,
};
use lanedag::errors::LanedagError;
use lanedag::exec::{BackendExecutor, MultiQueueExecutor};
use lanedag::runtime::SubmittedOps;
use lanedag::sched::{Scheduler, WaitKind};

type TestResult = Result<(), Box<dyn Error>>;

fn rw(region: &std::sync::Arc<lanedag::dag::DataRegion>) -> Vec<BufferAccess> {
    vec![BufferAccess::new(region, AccessMode::ReadWrite)]
}

#[test]
fn dependency_on_the_same_lane_needs_no_wait() {
    init_tracing();
    let rt = RuntimeBuilder::new();
    let log = rt.log();
    let scheduler = rt.build_scheduler();
    let r = region_on(1, gpu(0));

    let mut builder = DagBuilder::default();
    let k1 = builder.append(Operation::kernel("k1", rw(&r)), ExecutionHints::bind_to_device(gpu(0)));
    let k2 = builder.append(Operation::kernel("k2", rw(&r)), ExecutionHints::bind_to_device(gpu(0)));

    let scheduled = scheduler.submit(builder.finish_and_reset(), &SubmittedOps::new());

    assert!(scheduled.report.is_ok());
    assert_eq!(k1.placement(), k2.placement());
    assert_eq!(scheduled.annotations[1].waits.len(), 1);
    assert_eq!(scheduled.annotations[1].waits[0].wait_kind(), Some(WaitKind::SameLane));
    assert_eq!(log.same_backend_waits(), 0);
    assert_eq!(log.external_waits(), 0);
    assert_eq!(log.submitted_labels(), vec!["k1", "k2"]);
}

#[test]
fn dependency_on_another_lane_waits_on_an_event() {
    init_tracing();
    let rt = RuntimeBuilder::new();
    let log = rt.log();
    let scheduler = rt.build_scheduler();
    let src = region_on(1, gpu(0));
    let dst = region_on(2, gpu(0));

    let mut builder = DagBuilder::default();
    let k = builder.append(Operation::kernel("k", rw(&src)), ExecutionHints::bind_to_device(gpu(0)));
    let copy = builder.append(
        Operation::memcpy(CopyEndpoint::new(&src, gpu(0)), CopyEndpoint::new(&dst, gpu(0))),
        ExecutionHints::new(),
    );
    assert_eq!(copy.requirements(), &[k.id()]);

    let scheduled = scheduler.submit(builder.finish_and_reset(), &SubmittedOps::new());

    let (kp, cp) = (k.placement().unwrap(), copy.placement().unwrap());
    assert_eq!(kp.device, cp.device);
    assert_ne!(kp.lane, cp.lane);
    assert_eq!(
        scheduled.annotations[1].waits[0].wait_kind(),
        Some(WaitKind::SameBackend)
    );
    assert_eq!(log.same_backend_waits(), 1);
    assert_eq!(log.external_waits(), 0);
}

#[test]
fn dependency_across_backends_uses_an_external_wait() {
    init_tracing();
    let rt = RuntimeBuilder::new().with_backend(OTHER, 1);
    let log = rt.log();
    let scheduler = rt.build_scheduler();
    let r = region(1);

    let mut builder = DagBuilder::default();
    builder.append(Operation::kernel("producer", rw(&r)), ExecutionHints::bind_to_device(gpu(0)));
    let consumer = builder.append(
        Operation::kernel("consumer", vec![BufferAccess::new(&r, AccessMode::Read)]),
        ExecutionHints::bind_to_device(other(0)),
    );

    let scheduled = scheduler.submit(builder.finish_and_reset(), &SubmittedOps::new());

    assert!(scheduled.report.is_ok());
    assert_eq!(consumer.placement().unwrap().device, other(0));
    assert_eq!(log.external_waits(), 1);
    assert_eq!(log.same_backend_waits(), 0);
    assert_eq!(log.submitted_labels(), vec!["producer", "consumer"]);
}

#[test]
fn only_the_latest_predecessor_per_lane_is_waited_on() {
    init_tracing();
    let rt = RuntimeBuilder::new();
    let scheduler = rt.build_scheduler();
    let a = region_on(1, gpu(0));
    let b = region_on(2, gpu(0));

    let mut builder = DagBuilder::default();
    let wa = builder.append(Operation::kernel("wa", rw(&a)), ExecutionHints::bind_to_device(gpu(0)));
    // The explicit edge pulls `wb` onto the lane of `wa`.
    let wb = builder.append(
        Operation::kernel("wb", rw(&b)),
        ExecutionHints::bind_to_device(gpu(0)).with(ExecutionHint::ExplicitRequire(wa.id())),
    );
    let reader = builder.append(
        Operation::kernel(
            "reader",
            vec![
                BufferAccess::new(&a, AccessMode::Read),
                BufferAccess::new(&b, AccessMode::Read),
            ],
        ),
        ExecutionHints::bind_to_device(gpu(1)),
    );
    assert_eq!(reader.requirements(), &[wa.id(), wb.id()]);

    let scheduled = scheduler.submit(builder.finish_and_reset(), &SubmittedOps::new());

    assert_eq!(wa.placement(), wb.placement());
    let waits = &scheduled.annotations[2].waits;
    assert_eq!(waits.len(), 1);
    assert_eq!(waits[0].waited_node().unwrap().id(), wb.id());
    assert_eq!(waits[0].wait_kind(), Some(WaitKind::SameBackend));
    assert_eq!(scheduled.annotations[2].dependencies.len(), 2);
}

#[test]
fn wait_blocks_until_every_device_finishes() -> TestResult {
    init_tracing();
    let log = DeviceLog::manual();
    let rt = RuntimeBuilder::new().with_log(log.clone());
    let manager = rt.build_manager();
    let a = region(1);
    let b = region(2);

    let k1 = manager
        .build()
        .append(Operation::kernel("k1", rw(&a)), ExecutionHints::bind_to_device(gpu(0)));
    let k2 = manager
        .build()
        .append(Operation::kernel("k2", rw(&b)), ExecutionHints::bind_to_device(gpu(1)));
    manager.flush_sync()?;

    assert!(k2.requirements().is_empty());
    assert_eq!(log.same_backend_waits() + log.external_waits(), 0);
    assert!(!k1.is_complete() && !k2.is_complete());

    log.complete_device(gpu(0));
    assert!(k1.is_complete());
    assert!(!k2.is_complete());
    assert_eq!(manager.submitted_ops().in_flight(), 1);

    let completer = {
        let log = log.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            log.complete_device(gpu(1));
        })
    };

    let result = with_timeout(move || {
        let outcome = manager.wait().map_err(|e| e.to_string());
        (outcome, manager.submitted_ops().in_flight())
    });
    completer.join().expect("completer thread panicked");

    assert_eq!(result, (Ok(()), 0));
    assert!(k2.is_complete());
    Ok(())
}

#[test]
fn failed_submission_fails_dependants_but_not_siblings() -> TestResult {
    init_tracing();
    let rt = RuntimeBuilder::new();
    let log = rt.log();
    log.fail_on("bad");
    let manager = rt.build_manager();
    let r = region_on(1, gpu(0));
    let s = region_on(2, gpu(0));

    let (bad, dependant, sibling) = {
        let mut builder = manager.build();
        let bad = builder.append(Operation::kernel("bad", rw(&r)), ExecutionHints::bind_to_device(gpu(0)));
        let dependant = builder.append(
            Operation::kernel("dependant", vec![BufferAccess::new(&r, AccessMode::Read)]),
            ExecutionHints::bind_to_device(gpu(0)),
        );
        let sibling = builder.append(Operation::kernel("sibling", rw(&s)), ExecutionHints::bind_to_device(gpu(0)));
        (bad, dependant, sibling)
    };

    let err = manager.flush_sync().expect_err("flush should report the failure");
    assert!(
        matches!(err, LanedagError::Submission { node, .. } if node == bad.id()),
        "unexpected error: {err:?}"
    );

    assert!(bad.has_failed());
    assert!(dependant.has_failed());
    assert!(!sibling.has_failed());
    assert!(sibling.is_submitted());
    assert_eq!(log.submitted_labels(), vec!["sibling"]);
    assert_eq!(manager.stats().failures, 2);

    // Errors are reported once.
    manager.flush_sync()?;
    Ok(())
}

#[test]
fn reader_on_another_backend_waits_for_its_producer_and_wait_covers_both() -> TestResult {
    init_tracing();
    let log = DeviceLog::manual();
    let rt = RuntimeBuilder::new().with_backend(OTHER, 1).with_log(log.clone());
    let manager = rt.build_manager();
    let x = region(1);

    let k1 = manager.build().append(
        Operation::kernel("k1", vec![BufferAccess::new(&x, AccessMode::Write)]),
        ExecutionHints::bind_to_device(gpu(0)),
    );
    let k2 = manager.build().append(
        Operation::kernel("k2", vec![BufferAccess::new(&x, AccessMode::Read)]),
        ExecutionHints::bind_to_device(other(0)),
    );
    assert_eq!(k2.requirements(), &[k1.id()]);
    manager.flush_sync()?;

    assert_eq!(log.external_waits(), 1);
    assert_eq!(log.same_backend_waits(), 0);

    // The external wait is on the completion event recorded right after k1.
    let calls = log.calls();
    let k1_submit = calls
        .iter()
        .position(|c| matches!(c, QueueCall::Submit { label, .. } if label == "k1"))
        .expect("k1 was not submitted");
    let k1_queue = calls[k1_submit].queue();
    let k1_done = calls[k1_submit + 1..]
        .iter()
        .find_map(|c| match c {
            QueueCall::InsertEvent { queue, event } if *queue == k1_queue => Some(*event),
            _ => None,
        })
        .expect("no completion event after k1");
    assert!(
        calls
            .iter()
            .any(|c| matches!(c, QueueCall::WaitExternalEvent { event, .. } if *event == k1_done)),
        "k2 does not wait on k1: {calls:?}"
    );

    log.complete_device(gpu(0));
    assert!(k1.is_complete());
    assert!(!k2.is_complete());

    let completer = {
        let log = log.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            log.complete_device(other(0));
        })
    };
    let result = with_timeout(move || {
        let outcome = manager.wait().map_err(|e| e.to_string());
        (outcome, manager.submitted_ops().in_flight())
    });
    completer.join().expect("completer thread panicked");

    assert_eq!(result, (Ok(()), 0));
    assert!(k2.is_complete());
    Ok(())
}

#[test]
fn skipped_requirement_from_an_earlier_flush_still_orders_its_dependants() -> TestResult {
    init_tracing();
    let log = DeviceLog::manual();
    let rt = RuntimeBuilder::new().with_log(log.clone());
    let manager = rt.build_manager();
    let x = region(1);

    let (r1, r2) = {
        let mut builder = manager.build();
        let r1 = builder.append(Operation::require(&x, AccessMode::Read, gpu(0)), ExecutionHints::new());
        let r2 = builder.append(Operation::require(&x, AccessMode::Read, gpu(0)), ExecutionHints::new());
        (r1, r2)
    };
    manager.flush_sync()?;

    assert!(matches!(r2.status(), Some(NodeStatus::Skipped { .. })));
    assert!(!r1.is_complete());
    // The skipped node stands for the copy behind r1 until that finishes.
    assert!(!r2.is_complete());
    assert!(!manager.submitted_ops().is_dead(r2.id()));

    let k = manager.build().append(
        Operation::kernel("k", vec![]),
        ExecutionHints::bind_to_device(gpu(0)).with(ExecutionHint::ExplicitRequire(r2.id())),
    );
    manager.flush_sync()?;

    let (copy_lane, kernel_lane) = (r1.placement().unwrap(), k.placement().unwrap());
    assert_eq!(copy_lane.device, kernel_lane.device);
    assert_ne!(copy_lane.lane, kernel_lane.lane);
    assert_eq!(log.same_backend_waits(), 1);
    assert_eq!(log.submitted_labels(), vec!["memcpy", "k"]);

    log.complete_all();
    assert!(r2.is_complete());
    manager.wait()?;
    Ok(())
}

#[test]
fn failed_write_fails_readers_in_later_flushes_until_overwritten() -> TestResult {
    init_tracing();
    let rt = RuntimeBuilder::new();
    let log = rt.log();
    log.fail_on("bad");
    let manager = rt.build_manager();
    let x = region_on(1, gpu(0));

    let bad = manager
        .build()
        .append(Operation::kernel("bad", rw(&x)), ExecutionHints::bind_to_device(gpu(0)));
    assert!(manager.flush_sync().is_err());
    assert_eq!(x.failed_writer(), Some(bad.id()));

    let dependant = manager.build().append(
        Operation::kernel("dependant", vec![BufferAccess::new(&x, AccessMode::Read)]),
        ExecutionHints::bind_to_device(gpu(0)),
    );
    let err = manager.flush_sync().expect_err("reader of a failed write should fail");
    assert!(
        matches!(err, LanedagError::Submission { node, .. } if node == dependant.id()),
        "unexpected error: {err:?}"
    );
    assert!(dependant.has_failed());
    assert!(log.submitted_labels().is_empty());

    // A write that ignores the old contents makes the region usable again.
    let reset = manager.build().append(
        Operation::kernel("reset", vec![BufferAccess::new(&x, AccessMode::DiscardWrite)]),
        ExecutionHints::bind_to_device(gpu(0)),
    );
    let reader = manager.build().append(
        Operation::kernel("reader", vec![BufferAccess::new(&x, AccessMode::Read)]),
        ExecutionHints::bind_to_device(gpu(0)),
    );
    manager.flush_sync()?;

    assert!(reset.is_submitted() && !reset.has_failed());
    assert!(!reader.has_failed());
    assert_eq!(x.failed_writer(), None);
    assert_eq!(log.submitted_labels(), vec!["reset", "reader"]);
    assert_eq!(manager.stats().failures, 2);
    Ok(())
}

#[test]
fn unbound_kernel_writes_are_tracked_on_the_device_it_ran_on() -> TestResult {
    init_tracing();
    let rt = RuntimeBuilder::new();
    let log = rt.log();
    let manager = rt.build_manager();
    let x = region(1);

    let k = manager.build().append(Operation::kernel("k", rw(&x)), ExecutionHints::new());
    manager.flush_sync()?;

    assert_eq!(k.placement().unwrap().device, gpu(0));
    assert_eq!(x.valid_devices(), BTreeSet::from([gpu(0)]));

    let back = manager
        .build()
        .append(Operation::require(&x, AccessMode::Read, host()), ExecutionHints::new());
    manager.flush_sync()?;

    assert!(matches!(back.status(), Some(NodeStatus::Submitted { .. })));
    assert_eq!(log.submitted_labels(), vec!["k", "memcpy"]);
    assert_eq!(x.valid_devices(), BTreeSet::from([host(), gpu(0)]));
    Ok(())
}

#[test]
fn queues_are_created_once_per_lane_and_reused() {
    init_tracing();
    let log = DeviceLog::new();
    let executor = Arc::new(MultiQueueExecutor::new(
        GPU,
        vec![gpu(0), gpu(1)],
        LaneSection::default(),
        log.factory(),
    ));
    let scheduler = Scheduler::new(
        vec![Arc::clone(&executor) as Arc<dyn BackendExecutor>],
        &SchedulerSection::default(),
    );
    let tracker = SubmittedOps::new();
    let r = region_on(1, gpu(0));
    assert_eq!(executor.queue_count(), 0);

    let mut builder = DagBuilder::default();
    for _ in 0..3 {
        builder.append(Operation::kernel("k", rw(&r)), ExecutionHints::bind_to_device(gpu(0)));
        builder.append(Operation::kernel("k", rw(&r)), ExecutionHints::bind_to_device(gpu(0)));
        let scheduled = scheduler.submit(builder.finish_and_reset(), &tracker);
        assert!(scheduled.report.is_ok());
        tracker.update_with_submission(scheduled.interpreter.nodes());
    }
    assert_eq!(executor.queue_count(), 1);
    assert_eq!(log.queues_created(), 1);

    builder.append(Operation::kernel("elsewhere", vec![]), ExecutionHints::bind_to_device(gpu(1)));
    scheduler.submit(builder.finish_and_reset(), &tracker);
    assert_eq!(executor.queue_count(), 2);
    assert_eq!(log.queues_created(), 2);
}

#[test]
fn profiling_records_an_event_before_each_submission() {
    init_tracing();
    let rt = RuntimeBuilder::new().with_profiling();
    let log = rt.log();
    let scheduler = rt.build_scheduler();

    let mut builder = DagBuilder::default();
    let k = builder.append(Operation::kernel("k", vec![]), ExecutionHints::bind_to_device(gpu(0)));
    let scheduled = scheduler.submit(builder.finish_and_reset(), &SubmittedOps::new());

    assert!(scheduled.annotations[0].has_event_before());
    let calls = log.calls();
    assert!(
        matches!(
            calls.as_slice(),
            [
                QueueCall::InsertEvent { .. },
                QueueCall::Submit { label, .. },
                QueueCall::InsertEvent { .. },
            ] if label == "k"
        ),
        "unexpected call sequence: {calls:?}"
    );
    assert!(matches!(
        k.status(),
        Some(NodeStatus::Submitted { before: Some(_), .. })
    ));
}

#[test]
fn queue_creation_failure_is_reported_for_the_node() -> TestResult {
    init_tracing();
    let rt = RuntimeBuilder::new();
    let log = rt.log();
    log.fail_queue_creation(gpu(1));
    let manager = rt.build_manager();
    let (a, b) = (region(1), region(2));

    let (lost, fine) = {
        let mut builder = manager.build();
        let lost = builder.append(Operation::kernel("lost", rw(&a)), ExecutionHints::bind_to_device(gpu(1)));
        let fine = builder.append(Operation::kernel("fine", rw(&b)), ExecutionHints::bind_to_device(gpu(0)));
        (lost, fine)
    };

    match manager.flush_sync() {
        Err(LanedagError::Submission { node, reason }) => {
            assert_eq!(node, lost.id());
            assert!(reason.contains("Failed to create queue"), "unexpected reason: {reason}");
        }
        other => panic!("expected a submission failure, got {other:?}"),
    }
    assert!(lost.has_failed());
    assert!(!fine.has_failed());
    assert_eq!(log.submitted_labels(), vec!["fine"]);
    assert_eq!(log.queues_created(), 1);
    Ok(())
}

#[test]
#[should_panic(expected = "needs at least one memcpy and one kernel lane")]
fn executor_without_memcpy_lanes_is_rejected() {
    MultiQueueExecutor::new(
        GPU,
        vec![gpu(0)],
        LaneSection { memcpy: 0, kernel: 4 },
        DeviceLog::new().factory(),
    );
}
