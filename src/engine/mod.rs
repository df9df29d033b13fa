pub mod attendance;
pub mod conflict;
mod error;
mod mutations;
pub mod occupancy;
mod queries;
pub mod substitution;

pub use error::EngineError;
pub use occupancy::{compute_occupancy, merge_overlapping};
pub use queries::AssignmentFilter;
pub use substitution::find_substitution_candidates;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::config::AttendancePolicy;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;
pub type SharedAssignment = Arc<RwLock<ExamAssignment>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending_other = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            pending_other = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = pending_other {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    /// Explicit bookings, one timeline per room or person.
    pub resources: DashMap<Ulid, SharedResourceState>,
    pub assignments: DashMap<Ulid, SharedAssignment>,
    pub notify: Arc<NotifyHub>,
    pub policy: AttendancePolicy,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → resource id.
    pub(super) booking_to_resource: DashMap<Ulid, Ulid>,
    /// Assigned proctor → assignment ids.
    pub(super) by_proctor: DashMap<Ulid, Vec<Ulid>>,
    /// Live (issued, unused, still pending) code → assignment id.
    pub(super) codes: DashMap<String, Ulid>,
}

/// Apply a booking event to a ResourceState (caller holds the lock).
fn apply_to_resource(rs: &mut ResourceState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingAdded { id, resource_id, span, source_id } => {
            rs.insert_booking(Booking {
                id: *id,
                resource_id: *resource_id,
                span: *span,
                source_id: *source_id,
            });
            index.insert(*id, *resource_id);
        }
        Event::BookingRemoved { id, .. } => {
            rs.remove_booking(*id);
            index.remove(id);
        }
        _ => {}
    }
}

/// Apply an assignment event (caller holds the lock) and keep the code index in step.
fn apply_to_assignment(a: &mut ExamAssignment, event: &Event, codes: &DashMap<String, Ulid>) {
    let previous_code = a.live_code().map(str::to_string);

    match event {
        Event::CodeIssued { code, .. } => attendance::issue_code(a, code.clone()),
        Event::CodeReset { .. } => attendance::reset(a),
        Event::AttendanceConfirmed { status, checked_in_by, code_entry_time, remarks, .. } => {
            attendance::record_check_in(a, *status, *checked_in_by, *code_entry_time, remarks.clone());
        }
        Event::MarkedAbsent { .. } => attendance::mark_absent(a),
        Event::StatusOverridden { status, remarks, .. } => {
            attendance::override_status(a, *status, remarks.clone());
        }
        Event::BookingAdded { .. } | Event::BookingRemoved { .. } | Event::AssignmentCreated { .. } => {}
    }

    if let Some(code) = previous_code {
        codes.remove_if(&code, |_, owner| *owner == a.id);
    }
    if a.status == AttendanceStatus::Pending
        && let Some(code) = a.live_code() {
            codes.insert(code.to_string(), a.id);
        }
}

/// The assignment an event concerns, if any.
fn event_assignment_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::CodeIssued { assignment_id, .. }
        | Event::CodeReset { assignment_id }
        | Event::AttendanceConfirmed { assignment_id, .. }
        | Event::MarkedAbsent { assignment_id }
        | Event::StatusOverridden { assignment_id, .. } => Some(*assignment_id),
        Event::AssignmentCreated { id, .. } => Some(*id),
        Event::BookingAdded { .. } | Event::BookingRemoved { .. } => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, policy: AttendancePolicy) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            resources: DashMap::new(),
            assignments: DashMap::new(),
            notify,
            policy,
            wal_tx,
            booking_to_resource: DashMap::new(),
            by_proctor: DashMap::new(),
            codes: DashMap::new(),
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never block here: this may run inside an async context.
        for event in &events {
            engine.replay_event(event);
        }
        tracing::debug!(
            "replayed {} events: {} assignments, {} resource timelines",
            events.len(),
            engine.assignments.len(),
            engine.resources.len()
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::AssignmentCreated { id, exam_schedule_id, proctor_id, room_id, window } => {
                self.register_assignment(ExamAssignment::new(*id, *exam_schedule_id, *proctor_id, *room_id, *window));
            }
            Event::BookingAdded { resource_id, .. } | Event::BookingRemoved { resource_id, .. } => {
                let rs = self.resource_entry(*resource_id);
                let mut guard = rs.try_write().expect("replay: uncontended write");
                apply_to_resource(&mut guard, event, &self.booking_to_resource);
            }
            other => {
                if let Some(id) = event_assignment_id(other)
                    && let Some(a) = self.get_assignment_ref(&id) {
                        let mut guard = a.try_write().expect("replay: uncontended write");
                        apply_to_assignment(&mut guard, other, &self.codes);
                    }
            }
        }
    }

    /// Insert a new assignment into the map and indexes.
    pub(super) fn register_assignment(&self, a: ExamAssignment) {
        self.by_proctor.entry(a.assigned_proctor_id).or_default().push(a.id);
        self.assignments.insert(a.id, Arc::new(RwLock::new(a)));
    }

    /// Timeline for `resource_id`, created on first use.
    pub(super) fn resource_entry(&self, resource_id: Ulid) -> SharedResourceState {
        self.resources
            .entry(resource_id)
            .or_insert_with(|| Arc::new(RwLock::new(ResourceState::new(resource_id))))
            .value()
            .clone()
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub(super) fn get_assignment_ref(&self, id: &Ulid) -> Option<SharedAssignment> {
        self.assignments.get(id).map(|e| e.value().clone())
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))
    }

    /// WAL-append + apply + notify for a booking event.
    pub(super) async fn persist_booking(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event, &self.booking_to_resource);
        self.notify.send(rs.id, event);
        Ok(())
    }

    /// WAL-append + apply + notify for an assignment event. The caller holds the
    /// assignment's write lock for the whole call, which makes check-validate-commit atomic.
    pub(super) async fn persist_assignment(
        &self,
        a: &mut ExamAssignment,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_assignment(a, event, &self.codes);
        self.notify_assignment(a, event);
        Ok(())
    }

    pub(super) fn notify_assignment(&self, a: &ExamAssignment, event: &Event) {
        self.notify.send(a.assigned_proctor_id, event);
        if let Some(room) = a.room_id {
            self.notify.send(room, event);
        }
        if let Some(by) = a.checked_in_by
            && by != a.assigned_proctor_id {
                self.notify.send(by, event);
            }
    }
}
