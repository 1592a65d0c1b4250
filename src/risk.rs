// Customer risk scoring. Deterministic: the score is recomputed from
// appointment-history facts on every read, never cached.
//
// score = 100 * (w_ns * c_ns + w_lc * c_lc + w_cr * c_cr + w_rec * c_rec)
// with every component clamped to [0, 1] and monotone in its fact.

use serde::Serialize;

/// Appointment-history facts for one customer, loaded by the route layer.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RiskFacts {
    pub completed: i64,
    pub no_shows: i64,
    /// Cancellations inside the salon's late-cancel window before start.
    pub late_cancels: i64,
    /// All cancellations, late or not.
    pub cancels: i64,
    /// Days since the most recent no-show or late cancel, if any.
    pub days_since_last_incident: Option<i64>,
    pub account_age_days: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct RiskWeights {
    pub no_show: f64,
    pub late_cancel: f64,
    pub cancel_rate: f64,
    pub recency: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        RiskWeights {
            no_show: 0.45,
            late_cancel: 0.25,
            cancel_rate: 0.15,
            recency: 0.15,
        }
    }
}

/// Tier cutoffs over the 0-100 score.
#[derive(Debug, Clone, Copy)]
pub struct RiskThresholds {
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        RiskThresholds {
            moderate: 25.0,
            high: 50.0,
            critical: 75.0,
        }
    }
}

/// Incidents older than this stop contributing to the recency component.
const RECENCY_HORIZON_DAYS: f64 = 90.0;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RiskComponents {
    pub c_no_show: f64,
    pub c_late_cancel: f64,
    pub c_cancel_rate: f64,
    pub c_recency: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Moderate => "moderate",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }

    /// Mapping used for customer.risk_override (smallint).
    pub fn from_i16(v: i16) -> Option<RiskTier> {
        match v {
            0 => Some(RiskTier::Low),
            1 => Some(RiskTier::Moderate),
            2 => Some(RiskTier::High),
            3 => Some(RiskTier::Critical),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> i16 {
        match self {
            RiskTier::Low => 0,
            RiskTier::Moderate => 1,
            RiskTier::High => 2,
            RiskTier::Critical => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mitigation {
    /// Customer must confirm the appointment before it holds the slot
    /// past the reminder deadline.
    ConfirmationRequired,
    /// Appointment is created with deposit_required = true.
    DepositRequired,
    /// Bookings with source = online are rejected; desk/phone only.
    OnlineBookingBlocked,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub tier: RiskTier,
    pub components: RiskComponents,
    pub mitigations: Vec<Mitigation>,
}

/// Component transforms. Saturation points: three no-shows or four late
/// cancels max out their component, so one more bad mark on an already-bad
/// record cannot push the score past the weighted ceiling.
pub fn components(facts: &RiskFacts) -> RiskComponents {
    let total_outcomes = facts.completed + facts.no_shows + facts.cancels;

    let c_no_show = (facts.no_shows as f64 / 3.0).min(1.0);
    let c_late_cancel = (facts.late_cancels as f64 / 4.0).min(1.0);
    let c_cancel_rate = if total_outcomes > 0 {
        (facts.cancels + facts.no_shows) as f64 / total_outcomes as f64
    } else {
        0.0
    };
    let c_recency = match facts.days_since_last_incident {
        Some(days) => (1.0 - days as f64 / RECENCY_HORIZON_DAYS).clamp(0.0, 1.0),
        None => 0.0,
    };

    RiskComponents {
        c_no_show,
        c_late_cancel,
        c_cancel_rate,
        c_recency,
    }
}

pub fn score(components: &RiskComponents, weights: &RiskWeights) -> f64 {
    100.0
        * (weights.no_show * components.c_no_show
            + weights.late_cancel * components.c_late_cancel
            + weights.cancel_rate * components.c_cancel_rate
            + weights.recency * components.c_recency)
}

pub fn tier_for(score: f64, thresholds: &RiskThresholds) -> RiskTier {
    if score < thresholds.moderate {
        RiskTier::Low
    } else if score < thresholds.high {
        RiskTier::Moderate
    } else if score < thresholds.critical {
        RiskTier::High
    } else {
        RiskTier::Critical
    }
}

/// Mitigation policy for a tier. Tiers are cumulative: every measure of a
/// lower tier is carried into the higher ones.
pub fn mitigations_for(tier: RiskTier) -> Vec<Mitigation> {
    match tier {
        RiskTier::Low => vec![],
        RiskTier::Moderate => vec![Mitigation::ConfirmationRequired],
        RiskTier::High => vec![
            Mitigation::ConfirmationRequired,
            Mitigation::DepositRequired,
        ],
        RiskTier::Critical => vec![
            Mitigation::ConfirmationRequired,
            Mitigation::DepositRequired,
            Mitigation::OnlineBookingBlocked,
        ],
    }
}

pub fn assess_with(
    facts: &RiskFacts,
    weights: &RiskWeights,
    thresholds: &RiskThresholds,
) -> RiskAssessment {
    let components = components(facts);
    let score = score(&components, weights);
    let tier = tier_for(score, thresholds);
    let mitigations = mitigations_for(tier);
    RiskAssessment {
        score,
        tier,
        components,
        mitigations,
    }
}

/// Assessment with the default weights and thresholds.
pub fn assess(facts: &RiskFacts) -> RiskAssessment {
    assess_with(facts, &RiskWeights::default(), &RiskThresholds::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(completed: i64, no_shows: i64, late_cancels: i64, cancels: i64) -> RiskFacts {
        RiskFacts {
            completed,
            no_shows,
            late_cancels,
            cancels,
            days_since_last_incident: None,
            account_age_days: 365,
        }
    }

    #[test]
    fn test_clean_history_scores_zero() {
        let a = assess(&facts(12, 0, 0, 0));
        assert_eq!(a.score, 0.0);
        assert_eq!(a.tier, RiskTier::Low);
        assert!(a.mitigations.is_empty());
    }

    #[test]
    fn test_no_history_scores_zero() {
        let a = assess(&RiskFacts::default());
        assert_eq!(a.score, 0.0);
        assert_eq!(a.tier, RiskTier::Low);
    }

    #[test]
    fn test_components_saturate() {
        let c = components(&facts(0, 10, 10, 10));
        assert_eq!(c.c_no_show, 1.0);
        assert_eq!(c.c_late_cancel, 1.0);
        assert_eq!(c.c_cancel_rate, 1.0);
    }

    #[test]
    fn test_score_is_monotone_in_no_shows() {
        let mut prev = -1.0;
        for n in 0..6 {
            let a = assess(&facts(10, n, 0, 0));
            assert!(a.score >= prev, "score dropped at {n} no-shows");
            prev = a.score;
        }
    }

    #[test]
    fn test_repeat_no_show_customer_is_high_risk() {
        let mut f = facts(2, 3, 1, 2);
        f.days_since_last_incident = Some(7);
        let a = assess(&f);
        assert!(a.score >= 50.0, "score was {}", a.score);
        assert!(a.tier >= RiskTier::High);
        assert!(a.mitigations.contains(&Mitigation::DepositRequired));
    }

    #[test]
    fn test_worst_case_is_critical_and_blocks_online() {
        let f = RiskFacts {
            completed: 0,
            no_shows: 5,
            late_cancels: 5,
            cancels: 5,
            days_since_last_incident: Some(0),
            account_age_days: 30,
        };
        let a = assess(&f);
        assert_eq!(a.score, 100.0);
        assert_eq!(a.tier, RiskTier::Critical);
        assert!(a.mitigations.contains(&Mitigation::OnlineBookingBlocked));
    }

    #[test]
    fn test_recency_decays_to_zero_at_horizon() {
        let mut f = facts(5, 1, 0, 1);
        f.days_since_last_incident = Some(0);
        let fresh = assess(&f).score;
        f.days_since_last_incident = Some(45);
        let halfway = assess(&f).score;
        f.days_since_last_incident = Some(120);
        let stale = assess(&f).score;
        assert!(fresh > halfway && halfway > stale);
        assert_eq!(components(&f).c_recency, 0.0);
    }

    #[test]
    fn test_tier_thresholds() {
        let t = RiskThresholds::default();
        assert_eq!(tier_for(0.0, &t), RiskTier::Low);
        assert_eq!(tier_for(24.9, &t), RiskTier::Low);
        assert_eq!(tier_for(25.0, &t), RiskTier::Moderate);
        assert_eq!(tier_for(50.0, &t), RiskTier::High);
        assert_eq!(tier_for(75.0, &t), RiskTier::Critical);
    }

    #[test]
    fn test_mitigations_are_cumulative() {
        assert!(mitigations_for(RiskTier::Low).is_empty());
        assert_eq!(mitigations_for(RiskTier::Moderate).len(), 1);
        assert_eq!(mitigations_for(RiskTier::High).len(), 2);
        assert_eq!(mitigations_for(RiskTier::Critical).len(), 3);
    }

    #[test]
    fn test_override_tier_mapping_roundtrip() {
        for tier in [RiskTier::Low, RiskTier::Moderate, RiskTier::High, RiskTier::Critical] {
            assert_eq!(RiskTier::from_i16(tier.as_i16()), Some(tier));
        }
        assert_eq!(RiskTier::from_i16(9), None);
    }
}
