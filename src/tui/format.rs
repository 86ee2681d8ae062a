use std::time::Duration;

const KB: u64 = 1024;
const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * 1024 * 1024;

/// Caption for a per-interval byte total as a rate, in the largest unit
/// that still displays at least 1.
pub fn io_rate_caption(total_bytes: u64, interval_sec: u64) -> String {
    let rate = total_bytes / interval_sec.max(1);
    if rate >= GB {
        format!("{}GB/s", rate / GB)
    } else if rate >= MB {
        format!("{}MB/s", rate / MB)
    } else if rate >= KB {
        format!("{}KB/s", rate / KB)
    } else {
        format!("{rate}B/s")
    }
}

/// Shorten a path to `max_len` by eliding the middle.
pub fn path_caption(path: &str, max_len: usize) -> String {
    let chars: Vec<char> = path.chars().collect();
    if chars.len() <= max_len {
        return path.to_string();
    }
    let keep = (max_len / 2).saturating_sub(2);
    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{head}..{tail}")
}

/// Elapsed-time caption rounded to whole seconds.
pub fn since_caption(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_unit_switches_at_exact_powers() {
        assert_eq!(io_rate_caption(1023, 1), "1023B/s");
        assert_eq!(io_rate_caption(1024, 1), "1KB/s");
        assert_eq!(io_rate_caption(1024 * 1024, 1), "1MB/s");
        assert_eq!(io_rate_caption(1024 * 1024 * 1024, 1), "1GB/s");
    }

    #[test]
    fn rate_divides_by_the_interval_first() {
        assert_eq!(io_rate_caption(4096, 4), "1KB/s");
        assert_eq!(io_rate_caption(4092, 4), "1023B/s");
        assert_eq!(io_rate_caption(0, 4), "0B/s");
    }

    #[test]
    fn long_path_keeps_head_and_tail() {
        assert_eq!(path_caption("/a/very/long/path/name", 10), "/a/..ame");
    }

    #[test]
    fn short_path_is_untouched() {
        assert_eq!(path_caption("/etc/hosts", 25), "/etc/hosts");
        assert_eq!(path_caption("", 10), "");
    }

    #[test]
    fn since_caption_picks_the_right_fields() {
        assert_eq!(since_caption(Duration::from_secs(42)), "42s");
        assert_eq!(since_caption(Duration::from_secs(62)), "1m2s");
        assert_eq!(since_caption(Duration::from_secs(3723)), "1h2m3s");
    }
}
