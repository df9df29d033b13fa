use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::attendance::{self, clean_remarks, normalize_code};
use super::conflict::{validate_instant, validate_span};
use super::{apply_to_resource, Engine, EngineError, WalCommand};

impl Engine {
    pub async fn add_booking(
        &self,
        id: Ulid,
        resource_id: Ulid,
        span: Span,
        source_id: Option<Ulid>,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        if self.booking_to_resource.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let rs = self.resource_entry(resource_id);
        let mut guard = rs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }

        let event = Event::BookingAdded { id, resource_id, span, source_id };
        self.persist_booking(&mut guard, &event).await
    }

    /// Record several bookings at once. All-or-nothing: if any booking is
    /// rejected, none are committed. Bookings may span different resources.
    pub async fn add_bookings(&self, bookings: Vec<Booking>) -> Result<(), EngineError> {
        if bookings.is_empty() {
            return Ok(());
        }
        if bookings.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let mut seen = std::collections::HashSet::with_capacity(bookings.len());
        for b in &bookings {
            validate_span(&b.span)?;
            if !seen.insert(b.id) || self.booking_to_resource.contains_key(&b.id) {
                return Err(EngineError::AlreadyExists(b.id));
            }
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut resource_ids: Vec<Ulid> = bookings.iter().map(|b| b.resource_id).collect();
        resource_ids.sort();
        resource_ids.dedup();

        let mut guards = Vec::with_capacity(resource_ids.len());
        let mut slot = HashMap::new();
        for rid in &resource_ids {
            let guard = self.resource_entry(*rid).write_owned().await;
            let incoming = bookings.iter().filter(|b| b.resource_id == *rid).count();
            if guard.bookings.len() + incoming > MAX_BOOKINGS_PER_RESOURCE {
                return Err(EngineError::LimitExceeded("too many bookings on resource"));
            }
            slot.insert(*rid, guards.len());
            guards.push(guard);
        }

        for b in bookings {
            let event = Event::BookingAdded {
                id: b.id,
                resource_id: b.resource_id,
                span: b.span,
                source_id: b.source_id,
            };
            self.wal_append(&event).await?;
            apply_to_resource(&mut guards[slot[&b.resource_id]], &event, &self.booking_to_resource);
            self.notify.send(b.resource_id, &event);
        }
        Ok(())
    }

    /// Returns the resource the booking was on.
    pub async fn remove_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let resource_id = self
            .booking_to_resource
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let rs = self.get_resource(&resource_id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        // Re-check under the lock: a concurrent removal may have won.
        if !self.booking_to_resource.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BookingRemoved { id, resource_id };
        self.persist_booking(&mut guard, &event).await?;
        Ok(resource_id)
    }

    pub async fn create_assignment(
        &self,
        id: Ulid,
        exam_schedule_id: Ulid,
        proctor_id: Ulid,
        room_id: Option<Ulid>,
        window: Span,
    ) -> Result<(), EngineError> {
        validate_span(&window)?;
        if self.assignments.len() >= MAX_ASSIGNMENTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many assignments"));
        }
        if self.assignments.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::AssignmentCreated { id, exam_schedule_id, proctor_id, room_id, window };
        self.wal_append(&event).await?;
        let a = ExamAssignment::new(id, exam_schedule_id, proctor_id, room_id, window);
        self.notify_assignment(&a, &event);
        self.register_assignment(a);
        tracing::debug!("assignment {id} created for proctor {proctor_id}");
        Ok(())
    }

    // ── One-time codes ───────────────────────────────────────

    /// Reserve a code no other pending assignment holds.
    fn reserve_code(&self, owner: Ulid) -> Result<String, EngineError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = attendance::generate_code();
            if let Entry::Vacant(slot) = self.codes.entry(code.clone()) {
                slot.insert(owner);
                return Ok(code);
            }
        }
        Err(EngineError::LimitExceeded("could not draw an unused code"))
    }

    pub async fn generate_code(&self, assignment_id: Ulid) -> Result<String, EngineError> {
        let a = self
            .get_assignment_ref(&assignment_id)
            .ok_or(EngineError::NotFound(assignment_id))?;
        let mut guard = a.write().await;
        if guard.status.is_terminal() {
            return Err(EngineError::AlreadyFinalized { id: assignment_id, status: guard.status });
        }
        if guard.live_code().is_some() {
            return Err(EngineError::CodeAlreadyIssued(assignment_id));
        }

        let code = self.reserve_code(assignment_id)?;
        let event = Event::CodeIssued { assignment_id, code: code.clone() };
        if let Err(e) = self.persist_assignment(&mut guard, &event).await {
            self.codes.remove_if(&code, |_, owner| *owner == assignment_id);
            return Err(e);
        }
        metrics::counter!(crate::observability::CODES_ISSUED_TOTAL).increment(1);
        Ok(code)
    }

    /// Issue codes for every listed assignment that is still pending and has no
    /// live code. Unknown ids fail the call before anything is issued.
    pub async fn generate_codes(&self, ids: &[Ulid]) -> Result<Vec<(Ulid, String)>, EngineError> {
        if ids.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        if let Some(missing) = ids.iter().find(|id| !self.assignments.contains_key(id)) {
            return Err(EngineError::NotFound(*missing));
        }

        let mut issued = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.generate_code(id).await {
                Ok(code) => issued.push((id, code)),
                Err(EngineError::CodeAlreadyIssued(_) | EngineError::AlreadyFinalized { .. }) => {
                    tracing::debug!("skipping code generation for {id}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(issued)
    }

    /// Administrative reset: drops the code and any recorded attendance.
    pub async fn reset_code(&self, assignment_id: Ulid) -> Result<(), EngineError> {
        let a = self
            .get_assignment_ref(&assignment_id)
            .ok_or(EngineError::NotFound(assignment_id))?;
        let mut guard = a.write().await;
        let event = Event::CodeReset { assignment_id };
        self.persist_assignment(&mut guard, &event).await?;
        tracing::info!("assignment {assignment_id} reset");
        Ok(())
    }

    /// Reset several assignments. Returns how many were reset.
    pub async fn reset_codes(&self, ids: &[Ulid]) -> Result<usize, EngineError> {
        if ids.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        if let Some(missing) = ids.iter().find(|id| !self.assignments.contains_key(id)) {
            return Err(EngineError::NotFound(*missing));
        }
        for &id in ids {
            self.reset_code(id).await?;
        }
        Ok(ids.len())
    }

    // ── Attendance ───────────────────────────────────────────

    /// Finalize attendance for an assignment whose code has been verified.
    /// Code lookup, validation, consumption and the status write happen under
    /// one write lock, so of two concurrent calls exactly one succeeds.
    pub async fn confirm_attendance(
        &self,
        assignment_id: Ulid,
        role: CheckInRole,
        remarks: Option<&str>,
        now: Ms,
    ) -> Result<AttendanceStatus, EngineError> {
        validate_instant(now)?;
        let a = self
            .get_assignment_ref(&assignment_id)
            .ok_or(EngineError::NotFound(assignment_id))?;
        let mut guard = a.write().await;
        let status = attendance::plan_check_in(&guard, role, remarks, now, &self.policy)?;
        let checked_in_by = match role {
            CheckInRole::Assigned => Some(guard.assigned_proctor_id),
            CheckInRole::Substitute => None,
        };
        self.commit_check_in(&mut guard, status, checked_in_by, now, remarks).await?;
        Ok(status)
    }

    /// Verify `code` for `person` and finalize attendance in one step.
    /// The role follows from whether `person` is the assigned proctor.
    pub async fn check_in(
        &self,
        code: &str,
        person: Ulid,
        remarks: Option<&str>,
        now: Ms,
    ) -> Result<(Ulid, AttendanceStatus), EngineError> {
        validate_instant(now)?;
        let assignment_id = self
            .codes
            .get(&normalize_code(code))
            .map(|e| *e.value())
            .ok_or(EngineError::CodeNotFound)?;
        let a = self
            .get_assignment_ref(&assignment_id)
            .ok_or(EngineError::CodeNotFound)?;
        let mut guard = a.write().await;
        let classification = attendance::verify(&guard, code, person)?;
        let status = attendance::plan_check_in(&guard, classification.role(), remarks, now, &self.policy)?;
        self.commit_check_in(&mut guard, status, Some(person), now, remarks).await?;
        Ok((assignment_id, status))
    }

    async fn commit_check_in(
        &self,
        a: &mut ExamAssignment,
        status: AttendanceStatus,
        checked_in_by: Option<Ulid>,
        now: Ms,
        remarks: Option<&str>,
    ) -> Result<(), EngineError> {
        let event = Event::AttendanceConfirmed {
            assignment_id: a.id,
            status,
            checked_in_by,
            code_entry_time: now,
            remarks: clean_remarks(remarks).map(str::to_string),
        };
        self.persist_assignment(a, &event).await?;
        metrics::counter!(crate::observability::CHECK_INS_TOTAL, "status" => status.as_str()).increment(1);
        tracing::info!("assignment {} checked in as {status}", a.id);
        Ok(())
    }

    /// Mark every overdue pending assignment absent. Each assignment is re-checked
    /// under its own lock, so a racing check-in always wins. Failures are logged
    /// and skipped; the next sweep retries them.
    pub async fn run_absence_sweep(&self, now: Ms) -> Result<Vec<Ulid>, EngineError> {
        validate_instant(now)?;
        let candidates: Vec<_> = self.assignments.iter().map(|e| e.value().clone()).collect();
        let mut updated = Vec::new();

        for a in candidates {
            let mut guard = a.write().await;
            if !attendance::is_absent_due(&guard, now) {
                continue;
            }
            let event = Event::MarkedAbsent { assignment_id: guard.id };
            match self.persist_assignment(&mut guard, &event).await {
                Ok(()) => updated.push(guard.id),
                Err(e) => tracing::error!("absence sweep: could not mark {} absent: {e}", guard.id),
            }
        }

        if !updated.is_empty() {
            metrics::counter!(crate::observability::ABSENCES_MARKED_TOTAL).increment(updated.len() as u64);
            tracing::info!("absence sweep marked {} assignments absent", updated.len());
        }
        Ok(updated)
    }

    /// Administrative override. Bypasses the terminal-state rule.
    pub async fn override_status(
        &self,
        assignment_id: Ulid,
        status: AttendanceStatus,
        remarks: Option<&str>,
    ) -> Result<(), EngineError> {
        if let Some(r) = remarks
            && r.len() > MAX_REMARKS_LEN {
                return Err(EngineError::LimitExceeded("remarks too long"));
            }
        let a = self
            .get_assignment_ref(&assignment_id)
            .ok_or(EngineError::NotFound(assignment_id))?;
        let mut guard = a.write().await;
        let event = Event::StatusOverridden {
            assignment_id,
            status,
            remarks: clean_remarks(remarks).map(str::to_string),
        };
        self.persist_assignment(&mut guard, &event).await?;
        tracing::info!("assignment {assignment_id} overridden to {status}");
        Ok(())
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let resources: Vec<_> = self.resources.iter().map(|e| e.value().clone()).collect();
        for rs in resources {
            let guard = rs.read().await;
            for b in &guard.bookings {
                events.push(Event::BookingAdded {
                    id: b.id,
                    resource_id: b.resource_id,
                    span: b.span,
                    source_id: b.source_id,
                });
            }
        }

        let assignments: Vec<_> = self.assignments.iter().map(|e| e.value().clone()).collect();
        for a in assignments {
            let guard = a.read().await;
            snapshot_events(&guard, &mut events);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Shortest event sequence that rebuilds `a` on replay.
fn snapshot_events(a: &ExamAssignment, events: &mut Vec<Event>) {
    events.push(Event::AssignmentCreated {
        id: a.id,
        exam_schedule_id: a.exam_schedule_id,
        proctor_id: a.assigned_proctor_id,
        room_id: a.room_id,
        window: a.window,
    });
    if let Some(code) = &a.one_time_code {
        events.push(Event::CodeIssued { assignment_id: a.id, code: code.clone() });
    }
    if let Some(at) = a.code_entry_time {
        events.push(Event::AttendanceConfirmed {
            assignment_id: a.id,
            status: a.status,
            checked_in_by: a.checked_in_by,
            code_entry_time: at,
            remarks: a.remarks.clone(),
        });
    } else if a.status != AttendanceStatus::Pending || a.remarks.is_some() {
        events.push(Event::StatusOverridden {
            assignment_id: a.id,
            status: a.status,
            remarks: a.remarks.clone(),
        });
    }
}
