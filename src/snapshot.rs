//! Snapshot triggering: per-aggregate event counting bound to the
//! commit/rollback lifecycle of the current unit of work.
//!
//! A trigger is created when an aggregate instance is loaded or newly
//! created, observes every domain event applied to that instance, and asks
//! the [`Snapshotter`] for a snapshot once more events than the configured
//! threshold have been handled. The request is deferred to a unit-of-work
//! boundary so that it fires exactly once per relevant outcome:
//!
//! - events handled after [`initialization_finished`] (live handling)
//!   schedule the snapshot on **commit**;
//! - events handled before it (replay while rebuilding the aggregate)
//!   schedule on **rollback** only, so a normal replay commit does not
//!   re-snapshot an aggregate that was just rebuilt.
//!
//! Which boundary applies is decided when the threshold is crossed, not
//! when the unit of work ends: a listener registered while awaiting
//! initialization stays a rollback listener even if initialization
//! finishes before the boundary.
//!
//! Trigger state survives serialization so that a counter travels with its
//! aggregate across snapshots or process boundaries;
//! [`SnapshotTriggerDefinition::reconfigure`] re-attaches a restored
//! trigger without resetting its count.
//!
//! [`initialization_finished`]: SnapshotTrigger::initialization_finished

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::TriggerError;
use crate::message::Message;
use crate::unit_of_work::CurrentUnitOfWork;

/// Collaborator that materializes aggregate snapshots.
///
/// `schedule_snapshot` is fire-and-forget: the trigger neither awaits
/// completion nor receives a result.
pub trait Snapshotter: Send + Sync {
    /// Request a snapshot of the given aggregate instance.
    fn schedule_snapshot(&self, aggregate_type: &str, aggregate_id: &str);
}

/// Per-instance observer of handled domain events.
pub trait SnapshotTrigger {
    /// Record one handled event.
    ///
    /// # Errors
    ///
    /// [`TriggerError::NoActiveUnitOfWork`] when called outside a unit of
    /// work (the event is still counted), and
    /// [`TriggerError::NotAttached`] when the threshold is crossed on a
    /// deserialized trigger that was never reconfigured.
    fn event_handled(&mut self, event: &Message) -> Result<(), TriggerError>;

    /// Mark the end of aggregate initialization (replay finished).
    fn initialization_finished(&mut self);
}

/// Stateless factory for snapshot triggers.
pub trait SnapshotTriggerDefinition {
    /// The trigger type this definition produces.
    type Trigger: SnapshotTrigger;

    /// Produce a fresh trigger for a newly loaded or created aggregate
    /// instance of `aggregate_type`.
    fn prepare_trigger(&self, aggregate_type: &str) -> Self::Trigger;

    /// Re-establish a restored (deserialized) trigger for a freshly loaded
    /// instance of `aggregate_type`. The trigger's counter and
    /// initialization state are preserved exactly; only its collaborator
    /// wiring is renewed.
    fn reconfigure(&self, aggregate_type: &str, trigger: Self::Trigger) -> Self::Trigger;
}

/// Counter state shared between the trigger and its registered boundary
/// listeners. `pending` is true while a listener is registered on the
/// current unit of work and makes further registrations a no-op.
struct TriggerCell {
    counter: u64,
    pending: bool,
}

/// Trigger that requests a snapshot once more than `threshold` events have
/// been handled since the last snapshot (or since creation).
pub struct EventCountSnapshotTrigger {
    cell: Arc<Mutex<TriggerCell>>,
    snapshotter: Option<Arc<dyn Snapshotter>>,
    aggregate_type: String,
    threshold: u64,
    initialized: bool,
}

impl EventCountSnapshotTrigger {
    fn new(snapshotter: Arc<dyn Snapshotter>, aggregate_type: &str, threshold: u64) -> Self {
        Self {
            cell: Arc::new(Mutex::new(TriggerCell {
                counter: 0,
                pending: false,
            })),
            snapshotter: Some(snapshotter),
            aggregate_type: aggregate_type.to_string(),
            threshold,
            initialized: false,
        }
    }

    fn attach(&mut self, snapshotter: Arc<dyn Snapshotter>, aggregate_type: &str) {
        self.snapshotter = Some(snapshotter);
        self.aggregate_type = aggregate_type.to_string();
    }

    /// The aggregate type this trigger was prepared for.
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// Events handled since the last snapshot (or since creation).
    pub fn counter(&self) -> u64 {
        self.cell.lock().expect("trigger cell lock poisoned").counter
    }
}

impl SnapshotTrigger for EventCountSnapshotTrigger {
    fn event_handled(&mut self, event: &Message) -> Result<(), TriggerError> {
        // Only domain events carry the owning-aggregate identity the
        // snapshot request needs; anything else is not part of this
        // aggregate's history.
        let Some(aggregate_id) = event.aggregate_id() else {
            tracing::debug!(message = event.name(), "ignoring event without an owning aggregate");
            return Ok(());
        };

        let crossed = {
            let mut cell = self.cell.lock().expect("trigger cell lock poisoned");
            cell.counter += 1;
            cell.counter > self.threshold && !cell.pending
        };

        // The event is counted even without a boundary to attach to, but
        // an event-sourced handler running outside a unit of work is an
        // integration error and must not pass silently.
        if !CurrentUnitOfWork::is_active() {
            return Err(TriggerError::NoActiveUnitOfWork);
        }
        if !crossed {
            return Ok(());
        }
        let snapshotter = self
            .snapshotter
            .clone()
            .ok_or(TriggerError::NotAttached)?;

        let fire_cell = Arc::clone(&self.cell);
        let cleanup_cell = Arc::clone(&self.cell);
        let aggregate_type = self.aggregate_type.clone();
        let aggregate_id = aggregate_id.to_string();
        let fire = move || {
            {
                let mut cell = fire_cell.lock().expect("trigger cell lock poisoned");
                cell.counter = 0;
                cell.pending = false;
            }
            tracing::debug!(
                aggregate_type = %aggregate_type,
                aggregate_id = %aggregate_id,
                "snapshot scheduled at unit-of-work boundary"
            );
            snapshotter.schedule_snapshot(&aggregate_type, &aggregate_id);
        };

        let _ = CurrentUnitOfWork::with(|uow| {
            // Replay events are confirmed on rollback only; live events on
            // commit only. The choice is fixed at crossing time.
            if self.initialized {
                uow.on_commit(fire);
            } else {
                uow.on_rollback(fire);
            }
            // Whatever the outcome, the pending gate opens again once this
            // unit of work is over.
            uow.on_cleanup(move || {
                cleanup_cell
                    .lock()
                    .expect("trigger cell lock poisoned")
                    .pending = false;
            });
        });
        self.cell.lock().expect("trigger cell lock poisoned").pending = true;

        tracing::debug!(
            aggregate_type = %self.aggregate_type,
            threshold = self.threshold,
            initialized = self.initialized,
            "snapshot threshold exceeded; boundary listener registered"
        );
        Ok(())
    }

    fn initialization_finished(&mut self) {
        self.initialized = true;
    }
}

impl fmt::Debug for EventCountSnapshotTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCountSnapshotTrigger")
            .field("aggregate_type", &self.aggregate_type)
            .field("threshold", &self.threshold)
            .field("counter", &self.counter())
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

/// Persisted shape of an [`EventCountSnapshotTrigger`]. The snapshotter
/// and any pending listener wiring are deliberately absent; they belong to
/// the process and unit of work the trigger was serialized in.
#[derive(Serialize, Deserialize)]
struct PersistedTrigger {
    aggregate_type: String,
    threshold: u64,
    counter: u64,
    initialized: bool,
}

impl Serialize for EventCountSnapshotTrigger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let counter = self.counter();
        PersistedTrigger {
            aggregate_type: self.aggregate_type.clone(),
            threshold: self.threshold,
            counter,
            initialized: self.initialized,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EventCountSnapshotTrigger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let persisted = PersistedTrigger::deserialize(deserializer)?;
        Ok(Self {
            cell: Arc::new(Mutex::new(TriggerCell {
                counter: persisted.counter,
                pending: false,
            })),
            snapshotter: None,
            aggregate_type: persisted.aggregate_type,
            threshold: persisted.threshold,
            initialized: persisted.initialized,
        })
    }
}

/// Definition producing [`EventCountSnapshotTrigger`]s with a shared
/// snapshotter and threshold.
pub struct EventCountSnapshotTriggerDefinition {
    snapshotter: Arc<dyn Snapshotter>,
    threshold: u64,
}

impl EventCountSnapshotTriggerDefinition {
    /// Build a definition scheduling a snapshot after more than
    /// `threshold` events per aggregate instance.
    ///
    /// # Panics
    ///
    /// Panics if `threshold` is zero.
    pub fn new(snapshotter: Arc<dyn Snapshotter>, threshold: u64) -> Self {
        assert!(threshold > 0, "snapshot threshold must be positive");
        Self {
            snapshotter,
            threshold,
        }
    }
}

impl SnapshotTriggerDefinition for EventCountSnapshotTriggerDefinition {
    type Trigger = EventCountSnapshotTrigger;

    fn prepare_trigger(&self, aggregate_type: &str) -> EventCountSnapshotTrigger {
        EventCountSnapshotTrigger::new(
            Arc::clone(&self.snapshotter),
            aggregate_type,
            self.threshold,
        )
    }

    fn reconfigure(
        &self,
        aggregate_type: &str,
        mut trigger: EventCountSnapshotTrigger,
    ) -> EventCountSnapshotTrigger {
        // Counter and initialization state pass through untouched; a
        // serialize/restore round trip must never reset the count.
        trigger.attach(Arc::clone(&self.snapshotter), aggregate_type);
        trigger
    }
}

/// Inert trigger used when snapshotting is disabled.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NoSnapshotTrigger;

impl SnapshotTrigger for NoSnapshotTrigger {
    fn event_handled(&mut self, _event: &Message) -> Result<(), TriggerError> {
        Ok(())
    }

    fn initialization_finished(&mut self) {}
}

/// Definition producing [`NoSnapshotTrigger`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSnapshotTriggerDefinition;

impl SnapshotTriggerDefinition for NoSnapshotTriggerDefinition {
    type Trigger = NoSnapshotTrigger;

    fn prepare_trigger(&self, _aggregate_type: &str) -> NoSnapshotTrigger {
        NoSnapshotTrigger
    }

    fn reconfigure(&self, _aggregate_type: &str, trigger: NoSnapshotTrigger) -> NoSnapshotTrigger {
        trigger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit_of_work::UnitOfWork;
    use serde_json::json;

    /// Records every schedule request for assertions.
    #[derive(Default)]
    struct RecordingSnapshotter {
        requests: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSnapshotter {
        fn request_count(&self) -> usize {
            self.requests.lock().expect("lock").len()
        }

        fn requests(&self) -> Vec<(String, String)> {
            self.requests.lock().expect("lock").clone()
        }
    }

    impl Snapshotter for RecordingSnapshotter {
        fn schedule_snapshot(&self, aggregate_type: &str, aggregate_id: &str) {
            self.requests
                .lock()
                .expect("lock")
                .push((aggregate_type.to_string(), aggregate_id.to_string()));
        }
    }

    fn definition(threshold: u64) -> (Arc<RecordingSnapshotter>, EventCountSnapshotTriggerDefinition) {
        let snapshotter = Arc::new(RecordingSnapshotter::default());
        let definition = EventCountSnapshotTriggerDefinition::new(
            Arc::clone(&snapshotter) as Arc<dyn Snapshotter>,
            threshold,
        );
        (snapshotter, definition)
    }

    fn order_event(sequence: u64) -> Message {
        Message::domain_event("OrderUpdated", "o-1", sequence, json!({}))
    }

    fn handle_events(trigger: &mut EventCountSnapshotTrigger, count: u64) {
        for sequence in 0..count {
            trigger
                .event_handled(&order_event(sequence))
                .expect("event should be handled");
        }
    }

    #[test]
    fn commit_fires_once_after_initialization() {
        let (snapshotter, definition) = definition(3);
        let mut trigger = definition.prepare_trigger("order");
        trigger.initialization_finished();

        let uow = UnitOfWork::begin("m-1");
        handle_events(&mut trigger, 4);
        assert_eq!(snapshotter.request_count(), 0, "nothing before the boundary");
        uow.commit();

        assert_eq!(snapshotter.requests(), vec![("order".to_string(), "o-1".to_string())]);
        assert_eq!(trigger.counter(), 0, "listener resets the counter");
    }

    #[test]
    fn rollback_does_not_fire_after_initialization() {
        let (snapshotter, definition) = definition(3);
        let mut trigger = definition.prepare_trigger("order");
        trigger.initialization_finished();

        let uow = UnitOfWork::begin("m-1");
        handle_events(&mut trigger, 4);
        uow.rollback();

        assert_eq!(snapshotter.request_count(), 0);
        assert_eq!(trigger.counter(), 4, "rollback leaves the count in place");
    }

    #[test]
    fn rollback_fires_once_before_initialization() {
        let (snapshotter, definition) = definition(3);
        let mut trigger = definition.prepare_trigger("order");

        let uow = UnitOfWork::begin("m-1");
        handle_events(&mut trigger, 4);
        uow.rollback();

        assert_eq!(snapshotter.request_count(), 1);
        assert_eq!(trigger.counter(), 0);
    }

    #[test]
    fn commit_does_not_fire_before_initialization() {
        let (snapshotter, definition) = definition(3);
        let mut trigger = definition.prepare_trigger("order");

        let uow = UnitOfWork::begin("m-1");
        handle_events(&mut trigger, 4);
        uow.commit();

        assert_eq!(snapshotter.request_count(), 0);
    }

    #[test]
    fn initialization_after_crossing_keeps_the_rollback_listener() {
        // The listener registered at crossing time is authoritative:
        // finishing initialization afterwards neither reschedules to the
        // commit boundary nor cancels the pending request.
        let (snapshotter, definition) = definition(3);
        let mut trigger = definition.prepare_trigger("order");

        let uow = UnitOfWork::begin("m-1");
        handle_events(&mut trigger, 4);
        trigger.initialization_finished();
        uow.rollback();

        assert_eq!(snapshotter.request_count(), 1);
    }

    #[test]
    fn initialization_after_crossing_does_not_move_to_commit() {
        let (snapshotter, definition) = definition(3);
        let mut trigger = definition.prepare_trigger("order");

        let uow = UnitOfWork::begin("m-1");
        handle_events(&mut trigger, 4);
        trigger.initialization_finished();
        uow.commit();

        assert_eq!(snapshotter.request_count(), 0);
    }

    #[test]
    fn threshold_not_exceeded_fires_nothing() {
        let (snapshotter, definition) = definition(3);
        let mut trigger = definition.prepare_trigger("order");
        trigger.initialization_finished();

        let uow = UnitOfWork::begin("m-1");
        handle_events(&mut trigger, 3);
        uow.commit();

        assert_eq!(
            snapshotter.request_count(),
            0,
            "threshold events alone must not trigger; one more is needed"
        );
    }

    #[test]
    fn burst_past_threshold_fires_exactly_once() {
        let (snapshotter, definition) = definition(3);
        let mut trigger = definition.prepare_trigger("order");
        trigger.initialization_finished();

        let uow = UnitOfWork::begin("m-1");
        handle_events(&mut trigger, 10);
        uow.commit();

        assert_eq!(snapshotter.request_count(), 1);
    }

    #[test]
    fn counter_resumes_across_units_of_work() {
        let (snapshotter, definition) = definition(3);
        let mut trigger = definition.prepare_trigger("order");
        trigger.initialization_finished();

        let uow = UnitOfWork::begin("m-1");
        handle_events(&mut trigger, 4);
        uow.commit();
        assert_eq!(snapshotter.request_count(), 1);

        let uow = UnitOfWork::begin("m-2");
        handle_events(&mut trigger, 4);
        uow.commit();
        assert_eq!(snapshotter.request_count(), 2);
    }

    #[test]
    fn commit_without_pending_listener_fires_nothing() {
        let (snapshotter, definition) = definition(3);
        let mut trigger = definition.prepare_trigger("order");
        trigger.initialization_finished();

        let uow = UnitOfWork::begin("m-1");
        handle_events(&mut trigger, 2);
        uow.commit();
        let uow = UnitOfWork::begin("m-2");
        handle_events(&mut trigger, 1);
        uow.commit();

        // 3 events across two units of work: threshold never exceeded.
        assert_eq!(snapshotter.request_count(), 0);
        assert_eq!(trigger.counter(), 3);
    }

    #[test]
    fn no_active_unit_of_work_is_a_precondition_violation() {
        let (_snapshotter, definition) = definition(3);
        let mut trigger = definition.prepare_trigger("order");
        trigger.initialization_finished();

        let err = trigger
            .event_handled(&order_event(0))
            .expect_err("no unit of work should be an error");
        assert!(matches!(err, TriggerError::NoActiveUnitOfWork));
        assert_eq!(trigger.counter(), 1, "the event is still counted");
    }

    #[test]
    fn events_without_owning_aggregate_are_ignored() {
        let (snapshotter, definition) = definition(1);
        let mut trigger = definition.prepare_trigger("order");
        trigger.initialization_finished();

        let uow = UnitOfWork::begin("m-1");
        trigger
            .event_handled(&Message::event("Heartbeat", json!({})))
            .expect("non-domain event should be accepted");
        trigger
            .event_handled(&Message::event("Heartbeat", json!({})))
            .expect("non-domain event should be accepted");
        uow.commit();

        assert_eq!(trigger.counter(), 0);
        assert_eq!(snapshotter.request_count(), 0);
    }

    #[test]
    fn serialization_preserves_the_counter() {
        let (snapshotter, definition) = definition(3);
        let mut trigger = definition.prepare_trigger("order");

        let uow = UnitOfWork::begin("m-1");
        handle_events(&mut trigger, 3);
        uow.commit();

        let encoded = serde_json::to_string(&trigger).expect("serialization should succeed");
        let restored: EventCountSnapshotTrigger =
            serde_json::from_str(&encoded).expect("deserialization should succeed");
        assert_eq!(restored.counter(), 3, "restore must not reset the counter");

        let mut trigger = definition.reconfigure("order", restored);
        assert_eq!(trigger.counter(), 3);

        // One more event exceeds the threshold; pre-initialization counts
        // confirm on rollback.
        let uow = UnitOfWork::begin("m-2");
        handle_events(&mut trigger, 1);
        uow.rollback();

        assert_eq!(snapshotter.request_count(), 1);
    }

    #[test]
    fn restored_trigger_keeps_initialization_state() {
        let (snapshotter, definition) = definition(3);
        let mut trigger = definition.prepare_trigger("order");
        trigger.initialization_finished();

        let uow = UnitOfWork::begin("m-1");
        handle_events(&mut trigger, 3);
        uow.commit();

        let encoded = serde_json::to_string(&trigger).expect("serialization should succeed");
        let restored: EventCountSnapshotTrigger =
            serde_json::from_str(&encoded).expect("deserialization should succeed");
        let mut trigger = definition.reconfigure("order", restored);

        let uow = UnitOfWork::begin("m-2");
        handle_events(&mut trigger, 1);
        uow.commit();

        assert_eq!(
            snapshotter.requests(),
            vec![("order".to_string(), "o-1".to_string())]
        );
    }

    #[test]
    fn crossing_on_a_detached_trigger_is_an_error() {
        let (_snapshotter, definition) = definition(2);
        let mut trigger = definition.prepare_trigger("order");
        trigger.initialization_finished();

        let uow = UnitOfWork::begin("m-1");
        handle_events(&mut trigger, 2);
        uow.commit();

        let encoded = serde_json::to_string(&trigger).expect("serialization should succeed");
        let mut restored: EventCountSnapshotTrigger =
            serde_json::from_str(&encoded).expect("deserialization should succeed");

        // Not reconfigured: counting works, crossing cannot schedule.
        let uow = UnitOfWork::begin("m-2");
        let err = restored
            .event_handled(&order_event(9))
            .expect_err("crossing without a snapshotter should fail");
        assert!(matches!(err, TriggerError::NotAttached));
        uow.rollback();
    }

    #[test]
    #[should_panic(expected = "snapshot threshold must be positive")]
    fn zero_threshold_is_rejected() {
        let snapshotter = Arc::new(RecordingSnapshotter::default());
        let _ = EventCountSnapshotTriggerDefinition::new(snapshotter, 0);
    }

    #[test]
    fn no_snapshot_trigger_is_inert() {
        let mut trigger = NoSnapshotTriggerDefinition.prepare_trigger("order");
        trigger
            .event_handled(&order_event(0))
            .expect("inert trigger accepts events anywhere");
        trigger.initialization_finished();
        let trigger = NoSnapshotTriggerDefinition.reconfigure("order", trigger);
        let _ = trigger;
    }
}
