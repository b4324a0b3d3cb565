// src/format.rs

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Shown while there is no usable rate yet.
pub const SPEED_PENDING: &str = "Calculating...";

/// Human readable size, e.g. `"512.00 KB"`, `"1.50 MB"`, `"4.08 GB"`.
pub fn format_bytes(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < MIB {
        format!("{:.2} KB", bytes / KIB)
    } else if bytes < GIB {
        format!("{:.2} MB", bytes / MIB)
    } else {
        format!("{:.2} GB", bytes / GIB)
    }
}

/// Human readable transfer rate.
pub fn format_speed(bytes_per_second: f64) -> String {
    if !bytes_per_second.is_finite() || bytes_per_second <= 0.0 {
        return SPEED_PENDING.to_string();
    }

    let mbps = bytes_per_second / MIB;
    if mbps < 0.01 {
        format!("{:.1} KB/s", bytes_per_second / KIB)
    } else if mbps < 1.0 {
        format!("{:.2} MB/s", mbps)
    } else {
        format!("{:.1} MB/s", mbps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_pick_unit_by_magnitude() {
        assert_eq!(format_bytes(0), "0.00 KB");
        assert_eq!(format_bytes(512 * 1024), "512.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 / 2), "1.50 MB");
        assert_eq!(format_bytes(4 * 1024 * 1024 * 1024), "4.00 GB");
    }

    #[test]
    fn speed_pending_until_positive() {
        assert_eq!(format_speed(0.0), SPEED_PENDING);
        assert_eq!(format_speed(-5.0), SPEED_PENDING);
        assert_eq!(format_speed(f64::NAN), SPEED_PENDING);
        assert_eq!(format_speed(f64::INFINITY), SPEED_PENDING);
    }

    #[test]
    fn speed_units() {
        assert_eq!(format_speed(2048.0), "2.0 KB/s");
        assert_eq!(format_speed(MIB / 4.0), "0.25 MB/s");
        assert_eq!(format_speed(MIB * 2.5), "2.5 MB/s");
    }
}
