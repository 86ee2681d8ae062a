use std::fmt::Write as FmtWrite;
use std::sync::Mutex;

use crate::aggregate::Summaries;

/// One published set of scrape values, all per-second over the last
/// sampling interval, replaced wholesale each housekeeping tick so a
/// scrape never reads half of one tick and half of another.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GaugeSet {
    pub tcp_src_endpoint_count: u64,
    pub tcp_src_traffic_bytes: u64,
    pub tcp_dest_endpoint_count: u64,
    pub tcp_dest_traffic_bytes: u64,
    pub fd_in_read_count: u64,
    pub fd_in_write_count: u64,
    pub fd_read_bytes: u64,
    pub fd_written_bytes: u64,
    pub block_io_sector_count: u64,
    pub block_io_duration_millis: u64,
}

impl GaugeSet {
    /// Derive the gauge values from one aggregation pass. Division by the
    /// interval is integer and floors; sub-unit activity reads as zero.
    pub fn compute(summaries: &Summaries, interval_sec: u64) -> GaugeSet {
        let interval = interval_sec.max(1);
        let per_sec = |total: u64| total / interval;

        let read_bytes: u64 = summaries.files.iter().map(|f| f.read_bytes).sum();
        let written_bytes: u64 = summaries.files.iter().map(|f| f.written_bytes).sum();
        let src_bytes: u64 = summaries.tcp_src.iter().map(|p| p.bytes).sum();
        let dest_bytes: u64 = summaries.tcp_dest.iter().map(|p| p.bytes).sum();
        let sectors: u64 = summaries.block.iter().map(|b| b.sectors).sum();
        let duration_nanos: u64 = summaries
            .block
            .iter()
            .map(|b| b.duration.as_nanos() as u64)
            .sum();

        GaugeSet {
            tcp_src_endpoint_count: per_sec(summaries.tcp_src.len() as u64),
            tcp_src_traffic_bytes: per_sec(src_bytes),
            tcp_dest_endpoint_count: per_sec(summaries.tcp_dest.len() as u64),
            tcp_dest_traffic_bytes: per_sec(dest_bytes),
            fd_in_read_count: per_sec(summaries.fds_reading),
            fd_in_write_count: per_sec(summaries.fds_writing),
            fd_read_bytes: per_sec(read_bytes),
            fd_written_bytes: per_sec(written_bytes),
            block_io_sector_count: per_sec(sectors),
            block_io_duration_millis: per_sec(duration_nanos) / 1_000_000,
        }
    }
}

/// Scrape-side state: the target identity labels fixed at startup and the
/// latest gauge set.
pub struct Metrics {
    pid: i32,
    hostname: String,
    gauges: Mutex<GaugeSet>,
}

impl Metrics {
    pub fn new(pid: i32, hostname: String) -> Self {
        Self {
            pid,
            hostname,
            gauges: Mutex::new(GaugeSet::default()),
        }
    }

    pub fn publish(&self, gauges: GaugeSet) {
        *self.gauges.lock().unwrap() = gauges;
    }

    pub fn current(&self) -> GaugeSet {
        *self.gauges.lock().unwrap()
    }

    /// Render the text exposition body for one scrape.
    pub fn render(&self) -> String {
        let gauges = self.current();
        let rows: [(&str, &str, u64); 10] = [
            (
                "tcp_src_endpoint_count",
                "TCP peers seen as traffic source per second.",
                gauges.tcp_src_endpoint_count,
            ),
            (
                "tcp_src_traffic_bytes",
                "Bytes per second attributed to source peers.",
                gauges.tcp_src_traffic_bytes,
            ),
            (
                "tcp_dest_endpoint_count",
                "TCP peers seen as traffic destination per second.",
                gauges.tcp_dest_endpoint_count,
            ),
            (
                "tcp_dest_traffic_bytes",
                "Bytes per second attributed to destination peers.",
                gauges.tcp_dest_traffic_bytes,
            ),
            (
                "fd_in_read_count",
                "Distinct file descriptors with read activity per second.",
                gauges.fd_in_read_count,
            ),
            (
                "fd_in_write_count",
                "Distinct file descriptors with write activity per second.",
                gauges.fd_in_write_count,
            ),
            (
                "fd_read_bytes",
                "Bytes read per second across mapped file descriptors.",
                gauges.fd_read_bytes,
            ),
            (
                "fd_written_bytes",
                "Bytes written per second across mapped file descriptors.",
                gauges.fd_written_bytes,
            ),
            (
                "block_io_sector_count",
                "Block device sectors touched per second.",
                gauges.block_io_sector_count,
            ),
            (
                "block_io_duration_millis",
                "Block IO time in milliseconds per second.",
                gauges.block_io_duration_millis,
            ),
        ];

        let mut body = String::new();
        for (name, help, value) in rows {
            let _ = writeln!(body, "# HELP {name} {help}");
            let _ = writeln!(body, "# TYPE {name} gauge");
            let _ = writeln!(
                body,
                "{name}{{pid=\"{}\",hostname=\"{}\"}} {value}",
                self.pid, self.hostname
            );
        }
        body
    }
}
