/// Progress reported for provider statuses outside the known table.
pub const UNKNOWN_STATUS_PROGRESS: u8 = 50;

const STATUS_PROGRESS: [(&str, u8); 6] = [
    ("preparing", 10),
    ("uploading", 25),
    ("queued", 40),
    ("processing", 60),
    ("ready", 90),
    ("completed", 100),
];

/// Normalized 0-100 progress for a provider status string.
pub fn map_progress(status: &str) -> u8 {
    let status = status.trim();
    STATUS_PROGRESS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(status))
        .map(|(_, progress)| *progress)
        .unwrap_or(UNKNOWN_STATUS_PROGRESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_statuses() {
        assert_eq!(map_progress("preparing"), 10);
        assert_eq!(map_progress("uploading"), 25);
        assert_eq!(map_progress("queued"), 40);
        assert_eq!(map_progress("processing"), 60);
        assert_eq!(map_progress("ready"), 90);
        assert_eq!(map_progress("completed"), 100);
    }

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(map_progress("READY"), 90);
        assert_eq!(map_progress(" Processing "), 60);
    }

    #[test]
    fn unknown_status_defaults_to_midpoint() {
        assert_eq!(map_progress("unknown-status"), 50);
        assert_eq!(map_progress(""), 50);
    }
}
