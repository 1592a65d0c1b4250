use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use super::conflict::{SchedulingError, TimeRange};

/// One row of employee_hours: a recurring weekly working window.
/// Minutes are counted from midnight UTC; weekday is Monday-based 0..=6.
#[derive(Debug, Clone, Copy)]
pub struct WeeklyHours {
    pub weekday: i16,
    pub open_min: i32,
    pub close_min: i32,
}

/// Parameters for one availability computation.
#[derive(Debug, Clone, Copy)]
pub struct SlotQuery {
    /// Full time to reserve: service duration + addon minutes + buffer.
    pub duration_min: i64,
    /// Grid step for candidate start times.
    pub granularity_min: i64,
    /// Lead-time cutoff; slots starting before this are dropped.
    pub earliest_start: Option<DateTime<Utc>>,
}

/// Concrete working windows for one date, from the weekly recurring hours.
/// Rows for other weekdays are ignored, so callers can pass an employee's
/// whole week unfiltered.
pub fn windows_for_date(date: NaiveDate, hours: &[WeeklyHours]) -> Vec<TimeRange> {
    let weekday = date.weekday().num_days_from_monday() as i16;
    let midnight = date.and_hms_opt(0, 0, 0).unwrap().and_utc();

    let mut windows: Vec<TimeRange> = hours
        .iter()
        .filter(|h| h.weekday == weekday && h.open_min < h.close_min)
        .map(|h| TimeRange {
            start: midnight + Duration::minutes(h.open_min as i64),
            end: midnight + Duration::minutes(h.close_min as i64),
        })
        .collect();

    windows.sort_by_key(|w| w.start);
    windows
}

/// Generate the free slots of one employee-day.
///
/// A candidate start is kept iff the full [start, start+duration) range
/// fits inside a single working window, collides with no time-off range
/// and no blocking appointment, and does not start before the lead-time
/// cutoff. Candidates step through each window on the granularity grid;
/// output is ascending and duplicate-free.
pub fn day_slots(
    query: &SlotQuery,
    working: &[TimeRange],
    time_off: &[TimeRange],
    booked: &[TimeRange],
) -> Result<Vec<TimeRange>, SchedulingError> {
    if query.duration_min <= 0 {
        return Err(SchedulingError::NonPositiveDuration);
    }
    if query.granularity_min <= 0 {
        return Err(SchedulingError::NonPositiveGranularity);
    }

    let duration = Duration::minutes(query.duration_min);
    let step = Duration::minutes(query.granularity_min);

    let mut slots: Vec<TimeRange> = Vec::new();

    for window in working {
        let mut start = window.start;
        while start + duration <= window.end {
            let candidate = TimeRange { start, end: start + duration };
            start += step;

            if let Some(cutoff) = query.earliest_start {
                if candidate.start < cutoff {
                    continue;
                }
            }
            if time_off.iter().any(|t| t.overlaps(&candidate)) {
                continue;
            }
            if booked.iter().any(|b| b.overlaps(&candidate)) {
                continue;
            }
            slots.push(candidate);
        }
    }

    slots.sort_by_key(|s| s.start);
    slots.dedup_by_key(|s| s.start);
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        // 2026-03-02 is a Monday
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn range(sh: u32, sm: u32, eh: u32, em: u32) -> TimeRange {
        TimeRange::new(at(sh, sm), at(eh, em)).unwrap()
    }

    fn query(duration: i64) -> SlotQuery {
        SlotQuery {
            duration_min: duration,
            granularity_min: 30,
            earliest_start: None,
        }
    }

    fn starts(slots: &[TimeRange]) -> Vec<(u32, u32)> {
        slots
            .iter()
            .map(|s| {
                use chrono::Timelike;
                (s.start.hour(), s.start.minute())
            })
            .collect()
    }

    #[test]
    fn test_windows_for_date_picks_matching_weekday() {
        let hours = vec![
            WeeklyHours { weekday: 0, open_min: 9 * 60, close_min: 12 * 60 },
            WeeklyHours { weekday: 0, open_min: 13 * 60, close_min: 17 * 60 },
            WeeklyHours { weekday: 2, open_min: 8 * 60, close_min: 16 * 60 },
            // degenerate row is dropped
            WeeklyHours { weekday: 0, open_min: 600, close_min: 600 },
        ];
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let windows = windows_for_date(monday, &hours);
        assert_eq!(windows, vec![range(9, 0, 12, 0), range(13, 0, 17, 0)]);
    }

    #[test]
    fn test_day_slots_grid_inside_window() {
        // 9:00-11:00, 60-minute service, 30-minute grid: 9:00, 9:30, 10:00
        let slots = day_slots(&query(60), &[range(9, 0, 11, 0)], &[], &[]).unwrap();
        assert_eq!(starts(&slots), vec![(9, 0), (9, 30), (10, 0)]);
    }

    #[test]
    fn test_day_slots_never_straddle_windows() {
        // Two windows with a lunch gap: nothing may span 12:00-13:00
        let working = [range(9, 0, 12, 0), range(13, 0, 15, 0)];
        let slots = day_slots(&query(90), &working, &[], &[]).unwrap();
        assert_eq!(starts(&slots), vec![(9, 0), (9, 30), (10, 0), (10, 30), (13, 0), (13, 30)]);
    }

    #[test]
    fn test_day_slots_excludes_booked_and_time_off() {
        let working = [range(9, 0, 13, 0)];
        let booked = [range(10, 0, 10, 45)];
        let time_off = [range(11, 30, 12, 0)];
        let slots = day_slots(&query(60), &working, &time_off, &booked).unwrap();
        // 9:00 fits; 9:30+ collides with the 10:00 booking until it ends;
        // 10:45 is off-grid so the next candidate is 11:00, which hits time off;
        // 12:00 is the last start that both clears time off and fits by 13:00.
        assert_eq!(starts(&slots), vec![(9, 0), (12, 0)]);
    }

    #[test]
    fn test_day_slots_respects_lead_time_cutoff() {
        let q = SlotQuery {
            duration_min: 30,
            granularity_min: 30,
            earliest_start: Some(at(10, 15)),
        };
        let slots = day_slots(&q, &[range(9, 0, 12, 0)], &[], &[]).unwrap();
        assert_eq!(starts(&slots), vec![(10, 30), (11, 0), (11, 30)]);
    }

    #[test]
    fn test_day_slots_duration_longer_than_window() {
        let slots = day_slots(&query(240), &[range(9, 0, 12, 0)], &[], &[]).unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn test_day_slots_validates_query() {
        assert_eq!(
            day_slots(&query(0), &[range(9, 0, 12, 0)], &[], &[]),
            Err(SchedulingError::NonPositiveDuration)
        );
        let q = SlotQuery { duration_min: 30, granularity_min: 0, earliest_start: None };
        assert_eq!(
            day_slots(&q, &[range(9, 0, 12, 0)], &[], &[]),
            Err(SchedulingError::NonPositiveGranularity)
        );
    }

    #[test]
    fn test_day_slots_overlapping_windows_dedup() {
        let working = [range(9, 0, 11, 0), range(10, 0, 12, 0)];
        let slots = day_slots(&query(60), &working, &[], &[]).unwrap();
        assert_eq!(starts(&slots), vec![(9, 0), (9, 30), (10, 0), (10, 30), (11, 0)]);
    }
}
