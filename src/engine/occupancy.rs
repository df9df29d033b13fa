use tracing::warn;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

// ── Occupancy Algorithm ───────────────────────────────────────────

/// Split `window` into alternating busy/free intervals for one resource.
///
/// Bookings are clipped to the window and merged when they touch or overlap,
/// so the output is sorted, gap-free, covers `window` exactly once and never
/// has two adjacent intervals with the same `occupied` flag.
///
/// A booking with `start >= end` is logged and left out rather than failing
/// the whole day. Bookings naming different resources are a caller bug.
pub fn compute_occupancy(
    resource_id: Ulid,
    bookings: &[Booking],
    window: Span,
) -> Result<Vec<Interval>, EngineError> {
    if !window.is_valid() {
        return Err(EngineError::InvalidInterval {
            start: window.start,
            end: window.end,
        });
    }

    let mut busy: Vec<Span> = Vec::with_capacity(bookings.len());
    for b in bookings {
        if b.resource_id != resource_id {
            return Err(EngineError::MixedResource {
                expected: resource_id,
                found: b.resource_id,
            });
        }
        if !b.span.is_valid() {
            warn!(
                "excluding booking {} on {resource_id}: invalid interval [{}, {})",
                b.id, b.span.start, b.span.end
            );
            continue;
        }
        if let Some(clipped) = b.span.clip(&window) {
            busy.push(clipped);
        }
    }

    busy.sort_by_key(|s| s.start);
    let merged = merge_overlapping(&busy);

    let mut out = Vec::with_capacity(merged.len() * 2 + 1);
    let mut cursor = window.start;
    for span in merged {
        if cursor < span.start {
            out.push(Interval::free(cursor, span.start));
        }
        out.push(Interval::busy(span.start, span.end));
        cursor = span.end;
    }
    if cursor < window.end {
        out.push(Interval::free(cursor, window.end));
    }

    Ok(out)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}
