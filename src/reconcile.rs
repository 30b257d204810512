//! Live observation reconciliation.
//!
//! Some nodes carry a pressure/temperature-only sensor. For those, humidity
//! comes from the realtime conditions service, and dew point is derived from
//! whatever humidity we end up with.

use crate::atmosphere::dew_point;
use crate::models::{Conditions, LiveObservation, SensorSample};

// ---

/// Merge a sensor sample with the current conditions at the same site.
///
/// Humidity resolution order: sensor, then conditions service, then zero.
pub fn reconcile(sample: &SensorSample, conditions: &Conditions) -> LiveObservation {
    // ---
    let humidity = sample
        .humidity
        .or(conditions.humidity)
        .unwrap_or(0.0);

    LiveObservation {
        temperature: sample.temperature,
        pressure: sample.pressure,
        humidity,
        dew_point: dew_point(sample.temperature, humidity),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn sample(humidity: Option<f64>) -> SensorSample {
        SensorSample {
            temperature: 25.0,
            pressure: 901.3,
            humidity,
        }
    }

    fn conditions(humidity: Option<f64>) -> Conditions {
        Conditions {
            humidity,
            ..Default::default()
        }
    }

    #[test]
    fn test_sensor_humidity_wins() {
        // ---
        let obs = reconcile(&sample(Some(71.0)), &conditions(Some(62.0)));
        assert_eq!(obs.humidity, 71.0);
    }

    #[test]
    fn test_missing_humidity_taken_from_conditions() {
        // ---
        let obs = reconcile(&sample(None), &conditions(Some(62.0)));
        assert_eq!(obs.humidity, 62.0);
        assert!(obs.dew_point.is_some());
    }

    #[test]
    fn test_missing_everywhere_defaults_to_zero() {
        // ---
        let obs = reconcile(&sample(None), &conditions(None));
        assert_eq!(obs.humidity, 0.0);
        assert_eq!(obs.dew_point, None);
    }

    #[test]
    fn test_sensor_values_pass_through() {
        // ---
        let obs = reconcile(&sample(Some(60.0)), &conditions(None));
        assert_eq!(obs.temperature, 25.0);
        assert_eq!(obs.pressure, 901.3);
        let dew = obs.dew_point.unwrap();
        assert!((dew - 16.7).abs() < 0.05);
    }
}
