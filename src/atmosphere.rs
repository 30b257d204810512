//! Atmospheric formulas: dew point and barometric altitude.

// ---

/// Magnus coefficients (Alduchov & Eskridge).
const MAGNUS_B: f64 = 17.625;
const MAGNUS_C: f64 = 243.04;

/// Standard sea-level pressure in hPa.
const SEA_LEVEL_HPA: f64 = 1013.25;

/// Dew point in °C from temperature (°C) and relative humidity (%).
///
/// Returns `None` when the formula has no real answer, e.g. for a relative
/// humidity of zero or below.
pub fn dew_point(temperature_c: f64, relative_humidity: f64) -> Option<f64> {
    // ---
    if relative_humidity.is_nan() || relative_humidity <= 0.0 || !temperature_c.is_finite() {
        return None;
    }
    let gamma = (MAGNUS_B * temperature_c) / (MAGNUS_C + temperature_c)
        + (relative_humidity / 100.0).ln();
    let dew = (MAGNUS_C * gamma) / (MAGNUS_B - gamma);
    dew.is_finite().then_some(dew)
}

/// Estimated altitude in metres from barometric pressure in hPa.
///
/// Returns `None` for zero, negative or non-finite pressure.
pub fn altitude(pressure_hpa: f64) -> Option<f64> {
    // ---
    if !pressure_hpa.is_finite() || pressure_hpa <= 0.0 {
        return None;
    }
    Some(44330.0 * (1.0 - (pressure_hpa / SEA_LEVEL_HPA).powf(0.1903)))
}
