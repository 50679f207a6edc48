//! Human-readable sizes for the presentation layer.

const UNITS: [&str; 9] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];
const K: f64 = 1000.0;

/// Render a byte count with decimal units and up to two decimals, trailing
/// zeros dropped: `1500` is `"1.5 KB"`, `0` is `"0 Byte"`.
pub fn format_bytes(bytes: u64) -> String {
    scaled(bytes as f64)
}

/// Render a throughput in bytes per second, e.g. `"2.4 KB/s"`.
pub fn format_rate(bytes_per_second: f64) -> String {
    format!("{}/s", scaled(bytes_per_second))
}

fn scaled(value: f64) -> String {
    if !value.is_finite() || value <= 0.0 {
        return "0 Byte".to_string();
    }
    let exponent = (value.ln() / K.ln()).floor().clamp(0.0, (UNITS.len() - 1) as f64) as usize;
    let fixed = format!("{:.2}", value / K.powi(exponent as i32));
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[exponent])
}
