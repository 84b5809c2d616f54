//! Formatting helpers for download progress

const UNITS: [&str; 7] = ["bytes", "KB", "MB", "GB", "TB", "PB", "EB"];

/// Round `value` to `digits` significant digits
pub fn round_significant(value: f64, digits: u32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let exponent = digits as i32 - 1 - magnitude;
    if exponent >= 0 {
        let factor = 10f64.powi(exponent);
        (value * factor).round() / factor
    } else {
        let factor = 10f64.powi(-exponent);
        (value / factor).round() * factor
    }
}

/// Format `value` with `digits` significant digits, without trailing zeros
pub fn format_significant(value: f64, digits: u32) -> String {
    if value == 0.0 || !value.is_finite() {
        return "0".to_string();
    }
    let magnitude = value.abs().log10().floor() as i32;
    let decimals = (digits as i32 - 1 - magnitude).max(0) as usize;
    let formatted = format!("{:.*}", decimals, round_significant(value, digits));
    if formatted.contains('.') {
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        formatted
    }
}

/// Format a byte count with binary units and 3 significant digits,
/// e.g. `"250 MB"` or `"1.5 KB"`
pub fn convert_to_units(bytes: f64) -> String {
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{} {}", format_significant(value, 3), UNITS[unit])
}

/// Percent of `total` already downloaded, within [0, 100] and rounded to
/// 3 significant digits
pub fn download_progress(completed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let percent = (completed as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
    round_significant(percent, 3)
}
