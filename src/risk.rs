//! Rule-based adjustment of the classifier's raw probability.
//!
//! Low cloud, poor visibility and strong gusts each add a fixed penalty on top
//! of the model output. Penalties are additive and independent; a missing
//! signal contributes nothing. Tier boundaries are strict, so a value sitting
//! exactly on a boundary falls into the lower tier.

use crate::models::Conditions;

// ---

/// Auxiliary signals the adjuster looks at. Distances in metres.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AuxSignals {
    pub cloud_base_m: Option<f64>,
    pub cloud_ceiling_m: Option<f64>,
    pub visibility_m: Option<f64>,
    pub wind_gust: Option<f64>,
}

impl From<&Conditions> for AuxSignals {
    fn from(c: &Conditions) -> Self {
        AuxSignals {
            cloud_base_m: c.cloud_base_m,
            cloud_ceiling_m: c.cloud_ceiling_m,
            visibility_m: c.visibility_m,
            wind_gust: c.wind_gust,
        }
    }
}

/// Penalty for a value that is bad when *below* the tier limits.
fn below(value: Option<f64>, severe: (f64, f64), moderate: (f64, f64)) -> f64 {
    match value {
        Some(v) if v < severe.0 => severe.1,
        Some(v) if v < moderate.0 => moderate.1,
        _ => 0.0,
    }
}

/// Penalty for a value that is bad when *above* the tier limits.
fn above(value: Option<f64>, severe: (f64, f64), moderate: (f64, f64)) -> f64 {
    match value {
        Some(v) if v > severe.0 => severe.1,
        Some(v) if v > moderate.0 => moderate.1,
        _ => 0.0,
    }
}

/// Apply all penalties to `base` and clamp the result to `[0, 1]`.
pub fn adjust_risk(base: f64, aux: &AuxSignals) -> f64 {
    // ---
    let penalty = below(aux.cloud_base_m, (1000.0, 0.10), (1500.0, 0.05))
        + below(aux.cloud_ceiling_m, (2000.0, 0.08), (3000.0, 0.04))
        + below(aux.visibility_m, (1000.0, 0.10), (3000.0, 0.05))
        + above(aux.wind_gust, (15.0, 0.12), (10.0, 0.06));

    let adjusted = base + penalty;
    if adjusted.is_nan() {
        return 0.0;
    }
    adjusted.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    const EPS: f64 = 1e-12;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < EPS
    }

    #[test]
    fn test_no_signals_leaves_base_unchanged() {
        // ---
        assert!(approx(adjust_risk(0.37, &AuxSignals::default()), 0.37));
    }

    #[test]
    fn test_each_severe_tier() {
        // ---
        let cases = [
            (AuxSignals { cloud_base_m: Some(800.0), ..Default::default() }, 0.10),
            (AuxSignals { cloud_ceiling_m: Some(1500.0), ..Default::default() }, 0.08),
            (AuxSignals { visibility_m: Some(400.0), ..Default::default() }, 0.10),
            (AuxSignals { wind_gust: Some(18.0), ..Default::default() }, 0.12),
        ];
        for (aux, penalty) in cases {
            assert!(approx(adjust_risk(0.2, &aux), 0.2 + penalty), "{aux:?}");
        }
    }

    #[test]
    fn test_each_moderate_tier() {
        // ---
        let cases = [
            (AuxSignals { cloud_base_m: Some(1200.0), ..Default::default() }, 0.05),
            (AuxSignals { cloud_ceiling_m: Some(2500.0), ..Default::default() }, 0.04),
            (AuxSignals { visibility_m: Some(2000.0), ..Default::default() }, 0.05),
            (AuxSignals { wind_gust: Some(12.0), ..Default::default() }, 0.06),
        ];
        for (aux, penalty) in cases {
            assert!(approx(adjust_risk(0.2, &aux), 0.2 + penalty), "{aux:?}");
        }
    }

    #[test]
    fn test_boundaries_fall_into_lower_tier() {
        // ---
        let aux = AuxSignals {
            cloud_base_m: Some(1000.0),
            cloud_ceiling_m: Some(3000.0),
            visibility_m: Some(1000.0),
            wind_gust: Some(10.0),
        };
        // 1000 m base: moderate only. 3000 m ceiling: none.
        // 1000 m visibility: moderate only. Gust 10: none.
        assert!(approx(adjust_risk(0.1, &aux), 0.1 + 0.05 + 0.05));

        let aux = AuxSignals {
            cloud_base_m: Some(1500.0),
            cloud_ceiling_m: Some(2000.0),
            visibility_m: Some(3000.0),
            wind_gust: Some(15.0),
        };
        assert!(approx(adjust_risk(0.1, &aux), 0.1 + 0.04 + 0.06));
    }

    #[test]
    fn test_penalties_are_additive() {
        // ---
        let aux = AuxSignals {
            cloud_base_m: Some(500.0),
            cloud_ceiling_m: Some(2500.0),
            visibility_m: Some(2000.0),
            wind_gust: Some(11.0),
        };
        assert!(approx(adjust_risk(0.3, &aux), 0.3 + 0.10 + 0.04 + 0.05 + 0.06));
    }

    #[test]
    fn test_clamped_to_one() {
        // ---
        let worst = AuxSignals {
            cloud_base_m: Some(100.0),
            cloud_ceiling_m: Some(100.0),
            visibility_m: Some(100.0),
            wind_gust: Some(30.0),
        };
        assert_eq!(adjust_risk(0.9, &worst), 1.0);
    }

    #[test]
    fn test_clamped_to_zero() {
        // ---
        assert_eq!(adjust_risk(-0.2, &AuxSignals::default()), 0.0);
        assert_eq!(adjust_risk(f64::NAN, &AuxSignals::default()), 0.0);
    }

    #[test]
    fn test_monotonic_in_each_signal() {
        // ---
        let mut last = 0.0;
        for base_m in [3000.0, 1500.0, 1499.0, 1000.0, 999.0, 0.0] {
            let aux = AuxSignals { cloud_base_m: Some(base_m), ..Default::default() };
            let adjusted = adjust_risk(0.2, &aux);
            assert!(adjusted >= last);
            last = adjusted;
        }

        let mut last = 0.0;
        for gust in [0.0, 10.0, 10.5, 15.0, 15.5, 40.0] {
            let aux = AuxSignals { wind_gust: Some(gust), ..Default::default() };
            let adjusted = adjust_risk(0.2, &aux);
            assert!(adjusted >= last);
            last = adjusted;
        }
    }

    #[test]
    fn test_from_conditions() {
        // ---
        let conditions = Conditions {
            cloud_base_m: Some(900.0),
            wind_gust: Some(3.0),
            ..Default::default()
        };
        let aux = AuxSignals::from(&conditions);
        assert_eq!(aux.cloud_base_m, Some(900.0));
        assert_eq!(aux.cloud_ceiling_m, None);
        assert_eq!(aux.wind_gust, Some(3.0));
    }
}
