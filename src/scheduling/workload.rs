use uuid::Uuid;

/// One employee's booked load for a target day, computed from their
/// blocking appointments. Candidates handed to this module are already
/// qualified for the service and conflict-free for the requested window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmployeeLoad {
    pub employee_id: Uuid,
    pub employee_display_number: i64,
    pub booked_min: i64,
    pub appointment_count: i64,
}

/// Ordering key: least booked minutes first, ties broken by fewer
/// appointments, then by lowest display number. The last key is unique
/// per employee, so the ranking is a total order and the same input set
/// always produces the same recommendation regardless of arrival order.
fn load_key(e: &EmployeeLoad) -> (i64, i64, i64) {
    (e.booked_min, e.appointment_count, e.employee_display_number)
}

/// Full ranking, lightest load first.
pub fn sorted_by_load(mut candidates: Vec<EmployeeLoad>) -> Vec<EmployeeLoad> {
    candidates.sort_by_key(load_key);
    candidates
}

/// The employee who should take the next booking, or None when no
/// candidate survived conflict filtering.
pub fn recommend(candidates: &[EmployeeLoad]) -> Option<Uuid> {
    candidates.iter().min_by_key(|e| load_key(e)).map(|e| e.employee_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(id: u128, number: i64, booked_min: i64, count: i64) -> EmployeeLoad {
        EmployeeLoad {
            employee_id: Uuid::from_u128(id),
            employee_display_number: number,
            booked_min,
            appointment_count: count,
        }
    }

    #[test]
    fn test_recommend_picks_least_booked_minutes() {
        let candidates = vec![
            load(1, 1, 180, 3),
            load(2, 2, 90, 4),
            load(3, 3, 240, 2),
        ];
        assert_eq!(recommend(&candidates), Some(Uuid::from_u128(2)));
    }

    #[test]
    fn test_tie_breaks_on_fewer_appointments_then_display_number() {
        // same minutes, different counts
        let by_count = vec![load(1, 1, 120, 3), load(2, 2, 120, 2)];
        assert_eq!(recommend(&by_count), Some(Uuid::from_u128(2)));

        // fully tied except display number
        let by_number = vec![load(7, 12, 120, 2), load(8, 4, 120, 2)];
        assert_eq!(recommend(&by_number), Some(Uuid::from_u128(8)));
    }

    #[test]
    fn test_recommendation_is_order_independent() {
        let mut candidates = vec![
            load(1, 5, 60, 1),
            load(2, 3, 60, 1),
            load(3, 9, 0, 0),
        ];
        let expected = recommend(&candidates);
        candidates.reverse();
        assert_eq!(recommend(&candidates), expected);
        candidates.swap(0, 1);
        assert_eq!(recommend(&candidates), expected);
    }

    #[test]
    fn test_sorted_by_load_is_total_order() {
        let ranked = sorted_by_load(vec![
            load(1, 2, 120, 2),
            load(2, 1, 120, 2),
            load(3, 3, 0, 0),
            load(4, 4, 120, 1),
        ]);
        let numbers: Vec<i64> = ranked.iter().map(|e| e.employee_display_number).collect();
        assert_eq!(numbers, vec![3, 4, 1, 2]);
    }

    #[test]
    fn test_recommend_empty_is_none() {
        assert_eq!(recommend(&[]), None);
    }
}
