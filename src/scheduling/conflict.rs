use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("range end must be after range start")]
    EmptyRange,
    #[error("duration_min must be positive")]
    NonPositiveDuration,
    #[error("granularity_min must be positive")]
    NonPositiveGranularity,
}

/// Half-open interval [start, end). All booking math in this crate uses
/// half-open ranges, so back-to-back appointments sharing an endpoint
/// do not conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, SchedulingError> {
        if end <= start {
            return Err(SchedulingError::EmptyRange);
        }
        Ok(Self { start, end })
    }

    pub fn duration_min(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    /// True when `other` lies entirely inside self.
    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Half-open overlap test: touching endpoints are not a conflict.
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// An existing appointment that holds an employee's time.
/// Callers are expected to pre-filter by status (see models::status_blocks_time).
#[derive(Debug, Clone)]
pub struct BookedSlot {
    pub appointment_id: Uuid,
    pub employee_id: Uuid,
    pub range: TimeRange,
}

/// Every blocking appointment that collides with the candidate range.
/// Empty result means the booking may proceed.
pub fn find_conflicts<'a>(candidate: &TimeRange, booked: &'a [BookedSlot]) -> Vec<&'a BookedSlot> {
    booked
        .iter()
        .filter(|b| b.range.overlaps(candidate))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn range(sh: u32, sm: u32, eh: u32, em: u32) -> TimeRange {
        TimeRange::new(at(sh, sm), at(eh, em)).unwrap()
    }

    fn booked(id: u128, sh: u32, sm: u32, eh: u32, em: u32) -> BookedSlot {
        BookedSlot {
            appointment_id: Uuid::from_u128(id),
            employee_id: Uuid::from_u128(99),
            range: range(sh, sm, eh, em),
        }
    }

    #[test]
    fn test_rejects_empty_and_inverted_ranges() {
        assert_eq!(TimeRange::new(at(10, 0), at(10, 0)), Err(SchedulingError::EmptyRange));
        assert_eq!(TimeRange::new(at(11, 0), at(10, 0)), Err(SchedulingError::EmptyRange));
    }

    #[test]
    fn test_touching_endpoints_do_not_overlap() {
        // 9:00-10:00 then 10:00-11:00 is a legal back-to-back pair
        assert!(!range(9, 0, 10, 0).overlaps(&range(10, 0, 11, 0)));
        assert!(!range(10, 0, 11, 0).overlaps(&range(9, 0, 10, 0)));
    }

    #[test]
    fn test_partial_and_nested_overlap() {
        assert!(range(9, 0, 10, 0).overlaps(&range(9, 30, 10, 30)));
        assert!(range(9, 0, 12, 0).overlaps(&range(10, 0, 11, 0)));
        assert!(range(10, 0, 11, 0).overlaps(&range(9, 0, 12, 0)));
        assert!(!range(9, 0, 10, 0).overlaps(&range(11, 0, 12, 0)));
    }

    #[test]
    fn test_find_conflicts_returns_every_collision() {
        let existing = vec![
            booked(1, 9, 0, 9, 45),
            booked(2, 10, 0, 10, 30),
            booked(3, 11, 0, 12, 0),
        ];

        let candidate = range(9, 30, 10, 15);
        let hits = find_conflicts(&candidate, &existing);
        let ids: Vec<Uuid> = hits.iter().map(|b| b.appointment_id).collect();
        assert_eq!(ids, vec![Uuid::from_u128(1), Uuid::from_u128(2)]);

        // exactly between two bookings
        assert!(find_conflicts(&range(9, 45, 10, 0), &existing).is_empty());
    }
}
