/// Default target peak level in dBFS.
pub const DEFAULT_TARGET_PEAK_DB: f64 = -1.0;

/// Round to two decimals so engine commands are deterministic. Negative zero becomes zero.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0 + 0.0
}

/// Gain in dB that moves `measured_peak_db` onto `target_peak_db`.
pub fn compute_gain(measured_peak_db: f64, target_peak_db: f64) -> f64 {
    round2(target_peak_db - measured_peak_db)
}

/// The `volume` filter argument for a given gain, e.g. `volume=2.20dB`.
pub fn volume_filter(gain_db: f64) -> String {
    format!("volume={:.2}dB", round2(gain_db))
}

/// Fall back to the default target when the user supplied something unusable.
pub fn sanitize_target(target_peak_db: f64) -> f64 {
    if target_peak_db.is_finite() {
        target_peak_db
    } else {
        DEFAULT_TARGET_PEAK_DB
    }
}
