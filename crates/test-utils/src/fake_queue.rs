use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use lanedag::dag::Operation;
use lanedag::errors::{LanedagError, Result};
use lanedag::exec::{DeviceEvent, InorderQueue, QueueEvent, QueueFactory};
use lanedag::types::DeviceId;

/// One call a fake queue received, in global order across all queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCall {
    Submit { queue: usize, device: DeviceId, label: String },
    InsertEvent { queue: usize, event: usize },
    WaitEvent { queue: usize, event: usize },
    WaitExternalEvent { queue: usize, event: usize },
}

impl QueueCall {
    pub fn queue(&self) -> usize {
        match self {
            QueueCall::Submit { queue, .. }
            | QueueCall::InsertEvent { queue, .. }
            | QueueCall::WaitEvent { queue, .. }
            | QueueCall::WaitExternalEvent { queue, .. } => *queue,
        }
    }
}

/// Event handed out by a fake queue. Completes immediately unless the log
/// was created with [`DeviceLog::manual`].
pub struct FakeEvent {
    pub id: usize,
    pub device: DeviceId,
    done: Mutex<bool>,
    cv: Condvar,
}

impl FakeEvent {
    fn new(id: usize, device: DeviceId, done: bool) -> Self {
        Self {
            id,
            device,
            done: Mutex::new(done),
            cv: Condvar::new(),
        }
    }

    pub fn complete(&self) {
        *self.done.lock().unwrap() = true;
        self.cv.notify_all();
    }
}

impl fmt::Debug for FakeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FakeEvent#{}({})", self.id, self.device)
    }
}

impl DeviceEvent for FakeEvent {
    fn is_complete(&self) -> bool {
        *self.done.lock().unwrap()
    }

    fn wait(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.cv.wait(done).unwrap();
        }
    }
}

/// Shared recorder for every queue created through [`DeviceLog::factory`].
#[derive(Default)]
pub struct DeviceLog {
    calls: Mutex<Vec<QueueCall>>,
    events: Mutex<Vec<Arc<FakeEvent>>>,
    failing_labels: Mutex<HashSet<String>>,
    unavailable_devices: Mutex<HashSet<DeviceId>>,
    next_queue: AtomicUsize,
    manual: AtomicBool,
}

impl DeviceLog {
    /// Events complete as soon as they are inserted.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Events stay pending until completed by the test.
    pub fn manual() -> Arc<Self> {
        let log = Self::default();
        log.manual.store(true, Ordering::SeqCst);
        Arc::new(log)
    }

    /// Make every submit of an operation with this label fail.
    pub fn fail_on(&self, label: &str) {
        self.failing_labels.lock().unwrap().insert(label.to_string());
    }

    /// Make the factory refuse to create queues on `device`.
    pub fn fail_queue_creation(&self, device: DeviceId) {
        self.unavailable_devices.lock().unwrap().insert(device);
    }

    pub fn factory(self: &Arc<Self>) -> QueueFactory {
        let log = Arc::clone(self);
        Arc::new(move |device: DeviceId| -> Result<Box<dyn InorderQueue>> {
            if log.unavailable_devices.lock().unwrap().contains(&device) {
                return Err(LanedagError::Other(anyhow::anyhow!("{device} is offline")));
            }
            let id = log.next_queue.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeQueue {
                id,
                device,
                log: Arc::clone(&log),
                inserted: Mutex::new(Vec::new()),
            }) as Box<dyn InorderQueue>)
        })
    }

    pub fn calls(&self) -> Vec<QueueCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Labels of submitted operations, in submission order.
    pub fn submitted_labels(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                QueueCall::Submit { label, .. } => Some(label),
                _ => None,
            })
            .collect()
    }

    pub fn same_backend_waits(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, QueueCall::WaitEvent { .. }))
            .count()
    }

    pub fn external_waits(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, QueueCall::WaitExternalEvent { .. }))
            .count()
    }

    pub fn queues_created(&self) -> usize {
        self.next_queue.load(Ordering::SeqCst)
    }

    pub fn pending_events(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| !e.is_complete())
            .count()
    }

    /// Complete every pending event recorded on `device`.
    pub fn complete_device(&self, device: DeviceId) {
        for event in self.events.lock().unwrap().iter() {
            if event.device == device {
                event.complete();
            }
        }
    }

    pub fn complete_all(&self) {
        for event in self.events.lock().unwrap().iter() {
            event.complete();
        }
    }

    fn record(&self, call: QueueCall) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Label used in the log for an operation: the kernel name, `memcpy`, or
/// `barrier`.
pub fn label_of(operation: &Operation) -> String {
    match operation {
        Operation::Kernel(k) => k.name.clone(),
        other => other.kind_name().to_string(),
    }
}

struct FakeQueue {
    id: usize,
    device: DeviceId,
    log: Arc<DeviceLog>,
    inserted: Mutex<Vec<Arc<FakeEvent>>>,
}

impl FakeQueue {
    /// Id of an event previously handed out through this log.
    fn event_id(&self, event: &QueueEvent) -> usize {
        let ptr = Arc::as_ptr(event) as *const ();
        self.log
            .events
            .lock()
            .unwrap()
            .iter()
            .find(|e| Arc::as_ptr(*e) as *const () == ptr)
            .map(|e| e.id)
            .expect("event was not created by a fake queue")
    }
}

impl InorderQueue for FakeQueue {
    fn device(&self) -> DeviceId {
        self.device
    }

    fn submit(&self, operation: &Operation) -> Result<()> {
        let label = label_of(operation);
        if self.log.failing_labels.lock().unwrap().contains(&label) {
            return Err(LanedagError::Other(anyhow::anyhow!(
                "injected failure for {label}"
            )));
        }
        self.log.record(QueueCall::Submit {
            queue: self.id,
            device: self.device,
            label,
        });
        Ok(())
    }

    fn insert_event(&self) -> Result<QueueEvent> {
        let mut events = self.log.events.lock().unwrap();
        let id = events.len();
        let manual = self.log.manual.load(Ordering::SeqCst);
        let event = Arc::new(FakeEvent::new(id, self.device, !manual));
        events.push(Arc::clone(&event));
        drop(events);

        self.inserted.lock().unwrap().push(Arc::clone(&event));
        self.log.record(QueueCall::InsertEvent {
            queue: self.id,
            event: id,
        });
        Ok(event)
    }

    fn wait_event(&self, event: &QueueEvent) -> Result<()> {
        self.log.record(QueueCall::WaitEvent {
            queue: self.id,
            event: self.event_id(event),
        });
        Ok(())
    }

    fn wait_external_event(&self, event: &QueueEvent) -> Result<()> {
        self.log.record(QueueCall::WaitExternalEvent {
            queue: self.id,
            event: self.event_id(event),
        });
        Ok(())
    }

    fn is_idle(&self) -> bool {
        self.inserted.lock().unwrap().iter().all(|e| e.is_complete())
    }
}
