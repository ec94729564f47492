use std::fs;

const HOSTNAME_PATH: &str = "/proc/sys/kernel/hostname";

/// Host name of this machine, or `"unknown"` when it cannot be read.
pub fn hostname() -> String {
    fs::read_to_string(HOSTNAME_PATH)
        .ok()
        .as_deref()
        .and_then(parse_hostname)
        .unwrap_or_else(|| "unknown".to_string())
}

fn parse_hostname(raw: &str) -> Option<String> {
    let name = raw.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Renders a monotonic nanosecond timestamp as seconds since boot.
pub fn boot_seconds(timestamp_ns: u64) -> String {
    format!(
        "{}.{:03}",
        timestamp_ns / 1_000_000_000,
        timestamp_ns % 1_000_000_000 / 1_000_000
    )
}
