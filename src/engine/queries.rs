use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{is_commitment_of, validate_instant};
use super::{attendance, occupancy, substitution, Engine, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentFilter {
    All,
    Proctor(Ulid),
}

fn validate_window(window: &Span) -> Result<(), EngineError> {
    if !window.is_valid() {
        return Err(EngineError::InvalidInterval {
            start: window.start,
            end: window.end,
        });
    }
    validate_instant(window.start)?;
    validate_instant(window.end)?;
    if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// Does the assignment keep `resource_id` busy? Rooms are busy for every exam
/// held in them; people only for the exams they are committed to.
fn occupies(a: &ExamAssignment, resource_id: Ulid) -> bool {
    a.room_id == Some(resource_id) || is_commitment_of(resource_id, a)
}

impl Engine {
    /// Point-in-time copy of every assignment.
    pub async fn snapshot_assignments(&self) -> Vec<ExamAssignment> {
        let shared: Vec<_> = self.assignments.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for a in shared {
            out.push(a.read().await.clone());
        }
        out
    }

    pub async fn get_assignment(&self, id: Ulid) -> Result<ExamAssignment, EngineError> {
        let a = self.get_assignment_ref(&id).ok_or(EngineError::NotFound(id))?;
        let guard = a.read().await;
        Ok(guard.clone())
    }

    /// Assignments sorted by window start.
    pub async fn list_assignments(&self, filter: AssignmentFilter) -> Vec<ExamAssignment> {
        let mut out = match filter {
            AssignmentFilter::All => self.snapshot_assignments().await,
            AssignmentFilter::Proctor(proctor) => {
                let ids = self.by_proctor.get(&proctor).map(|e| e.value().clone()).unwrap_or_default();
                let mut out = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Ok(a) = self.get_assignment(id).await {
                        out.push(a);
                    }
                }
                out
            }
        };
        out.sort_by_key(|a| (a.window.start, a.id));
        out
    }

    /// Explicit bookings on the resource plus one derived booking per
    /// assignment that occupies it, all overlapping `window`, sorted by start.
    pub async fn list_bookings(&self, resource_id: Ulid, window: Span) -> Result<Vec<Booking>, EngineError> {
        validate_window(&window)?;
        let mut out = Vec::new();
        if let Some(rs) = self.get_resource(&resource_id) {
            let guard = rs.read().await;
            out.extend(guard.overlapping(&window).cloned());
        }

        for a in self.snapshot_assignments().await {
            if occupies(&a, resource_id) && a.window.overlaps(&window) {
                out.push(Booking {
                    id: a.id,
                    resource_id,
                    span: a.window,
                    source_id: Some(a.id),
                });
            }
        }

        out.sort_by_key(|b| (b.span.start, b.id));
        Ok(out)
    }

    pub async fn occupancy(&self, resource_id: Ulid, window: Span) -> Result<Vec<Interval>, EngineError> {
        let bookings = self.list_bookings(resource_id, window).await?;
        occupancy::compute_occupancy(resource_id, &bookings, window)
    }

    /// The configured school day containing `t`.
    pub fn day_window(&self, t: Ms) -> Result<Span, EngineError> {
        validate_instant(t)?;
        Ok(self.policy.day_window(t))
    }

    /// Occupancy over the configured school day containing `t`.
    pub async fn occupancy_for_day(&self, resource_id: Ulid, t: Ms) -> Result<Vec<Interval>, EngineError> {
        let window = self.day_window(t)?;
        self.occupancy(resource_id, window).await
    }

    pub fn get_assignment_by_code(&self, code: &str) -> Result<Ulid, EngineError> {
        self.codes
            .get(&attendance::normalize_code(code))
            .map(|e| *e.value())
            .ok_or(EngineError::CodeNotFound)
    }

    /// Look up the assignment owning `code` and classify `person` against it.
    /// Changes nothing.
    pub async fn verify_code(&self, code: &str, person: Ulid) -> Result<Verification, EngineError> {
        let id = self.get_assignment_by_code(code)?;
        let a = self.get_assignment(id).await.map_err(|_| EngineError::CodeNotFound)?;
        let classification = attendance::verify(&a, code, person)?;
        Ok(Verification { assignment: a, classification })
    }

    pub async fn find_substitution_candidates(&self, person: Ulid) -> Vec<ExamAssignment> {
        let all = self.snapshot_assignments().await;
        let mut out = substitution::find_substitution_candidates(person, &all, &self.policy);
        out.sort_by_key(|a| (a.window.start, a.id));
        out
    }

    pub async fn attendance_summary(&self) -> AttendanceSummary {
        let mut summary = AttendanceSummary::default();
        for a in self.snapshot_assignments().await {
            summary.record(a.status);
        }
        summary
    }

    /// Assignments of `proctor` in the given phase at `now`, as a proctor's
    /// upcoming / ongoing / completed tabs show them.
    pub async fn assignments_in_phase(&self, proctor: Ulid, phase: Phase, now: Ms) -> Vec<ExamAssignment> {
        self.list_assignments(AssignmentFilter::Proctor(proctor))
            .await
            .into_iter()
            .filter(|a| a.phase(now) == phase)
            .collect()
    }
}
