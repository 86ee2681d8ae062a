use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use log::debug;

use crate::aggregate;
use crate::metrics::{GaugeSet, Metrics};
use crate::procview::ProcView;

/// Counter map of one tracer map printout: textual kernel key to counter.
pub type CounterMap = HashMap<String, u64>;

/// The six counter maps the tracer prints and clears every interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    ReadFd,
    WriteFd,
    TcpSrc,
    TcpDest,
    BlkdevDur,
    BlkdevSectors,
}

impl Family {
    pub const ALL: [Family; 6] = [
        Family::ReadFd,
        Family::WriteFd,
        Family::TcpSrc,
        Family::TcpDest,
        Family::BlkdevDur,
        Family::BlkdevSectors,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Family::ReadFd => "read_fd",
            Family::WriteFd => "write_fd",
            Family::TcpSrc => "tcp_src",
            Family::TcpDest => "tcp_dest",
            Family::BlkdevDur => "blkdev_dur",
            Family::BlkdevSectors => "blkdev_sectors",
        }
    }

    pub fn from_name(name: &str) -> Option<Family> {
        Family::ALL.into_iter().find(|f| f.name() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Default)]
struct FamilySlot {
    counters: CounterMap,
    updated_at: Option<Instant>,
}

/// Consistent multi-family snapshot taken under one lock acquisition.
/// Stale families come back empty.
#[derive(Clone, Debug, Default)]
pub struct Families {
    pub read_fd: CounterMap,
    pub write_fd: CounterMap,
    pub tcp_src: CounterMap,
    pub tcp_dest: CounterMap,
    pub blkdev_dur: CounterMap,
    pub blkdev_sectors: CounterMap,
}

/// Holds the most recent printout of each tracer map together with its
/// arrival time. One writer replaces one family per lock acquisition;
/// readers clone whatever is fresh. A family whose last update is older
/// than one sampling interval reads as empty.
pub struct SampleStore {
    interval: Duration,
    slots: Mutex<[FamilySlot; 6]>,
}

impl SampleStore {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slots: Mutex::new(std::array::from_fn(|_| FamilySlot::default())),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Replace one family with a freshly parsed counter map.
    pub fn replace(&self, family: Family, counters: CounterMap) {
        self.replace_at(family, counters, Instant::now());
    }

    pub(crate) fn replace_at(&self, family: Family, counters: CounterMap, now: Instant) {
        let mut slots = self.slots.lock().unwrap();
        let slot = &mut slots[family.index()];
        debug!("sample {}: {} keys", family.name(), counters.len());
        slot.counters = counters;
        slot.updated_at = Some(now);
    }

    /// Snapshot of all six families; stale ones are empty.
    pub fn snapshot(&self) -> Families {
        self.snapshot_at(Instant::now())
    }

    pub(crate) fn snapshot_at(&self, now: Instant) -> Families {
        let slots = self.slots.lock().unwrap();
        let fresh = |family: Family| -> CounterMap {
            let slot = &slots[family.index()];
            match slot.updated_at {
                Some(t) if now.duration_since(t) <= self.interval => slot.counters.clone(),
                _ => CounterMap::new(),
            }
        };
        Families {
            read_fd: fresh(Family::ReadFd),
            write_fd: fresh(Family::WriteFd),
            tcp_src: fresh(Family::TcpSrc),
            tcp_dest: fresh(Family::TcpDest),
            blkdev_dur: fresh(Family::BlkdevDur),
            blkdev_sectors: fresh(Family::BlkdevSectors),
        }
    }

    /// Housekeeping: drop stale family maps for good (bounds memory after
    /// the tracer goes silent) and return a snapshot of what remains, all
    /// in one lock acquisition.
    pub fn evict_and_snapshot(&self) -> Families {
        self.evict_and_snapshot_at(Instant::now())
    }

    pub(crate) fn evict_and_snapshot_at(&self, now: Instant) -> Families {
        {
            let mut slots = self.slots.lock().unwrap();
            for (family, slot) in Family::ALL.into_iter().zip(slots.iter_mut()) {
                let stale = match slot.updated_at {
                    Some(t) => now.duration_since(t) > self.interval,
                    None => false,
                };
                if stale && !slot.counters.is_empty() {
                    debug!("evicting stale family {}", family.name());
                    slot.counters = CounterMap::new();
                }
            }
        }
        self.snapshot_at(now)
    }
}

/// Wakes every sampling interval: ages out silent families and republishes
/// the scrape gauges from a fresh aggregation pass.
pub fn spawn_housekeeping(
    store: Arc<SampleStore>,
    view: Arc<RwLock<ProcView>>,
    metrics: Arc<Metrics>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(store.interval());
        loop {
            tick.tick().await;
            let families = store.evict_and_snapshot();
            let summaries = {
                let view = view.read().unwrap();
                aggregate::summarize(&families, &view.fd_paths, &view.disks)
            };
            let interval_sec = store.interval().as_secs().max(1);
            metrics.publish(GaugeSet::compute(&summaries, interval_sec));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(entries: &[(&str, u64)]) -> CounterMap {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn family_names_round_trip() {
        for family in Family::ALL {
            assert_eq!(Family::from_name(family.name()), Some(family));
        }
        assert_eq!(Family::from_name("rss_stat"), None);
    }

    #[test]
    fn fresh_family_is_visible() {
        let store = SampleStore::new(Duration::from_secs(4));
        let t0 = Instant::now();
        store.replace_at(Family::ReadFd, counters(&[("3", 2048)]), t0);
        let snap = store.snapshot_at(t0 + Duration::from_secs(1));
        assert_eq!(snap.read_fd.get("3"), Some(&2048));
        assert!(snap.write_fd.is_empty());
    }

    #[test]
    fn stale_family_reads_empty() {
        let store = SampleStore::new(Duration::from_secs(4));
        let t0 = Instant::now();
        store.replace_at(Family::ReadFd, counters(&[("3", 2048)]), t0);
        // Exactly one interval is still fresh, beyond it is not.
        let at_edge = store.snapshot_at(t0 + Duration::from_secs(4));
        assert_eq!(at_edge.read_fd.len(), 1);
        let beyond = store.snapshot_at(t0 + Duration::from_secs(8));
        assert!(beyond.read_fd.is_empty());
    }

    #[test]
    fn silence_across_all_families_empties_every_sum() {
        let store = SampleStore::new(Duration::from_secs(2));
        let t0 = Instant::now();
        store.replace_at(Family::ReadFd, counters(&[("3", 10), ("4", 20)]), t0);
        store.replace_at(Family::TcpSrc, counters(&[("[2],1", 5)]), t0);
        store.replace_at(Family::BlkdevDur, counters(&[("8388608", 99)]), t0);

        let snap = store.snapshot_at(t0 + Duration::from_secs(5));
        let total: u64 = [
            &snap.read_fd,
            &snap.write_fd,
            &snap.tcp_src,
            &snap.tcp_dest,
            &snap.blkdev_dur,
            &snap.blkdev_sectors,
        ]
        .iter()
        .flat_map(|m| m.values())
        .sum();
        assert_eq!(total, 0);
    }

    #[test]
    fn eviction_drops_the_stale_map_itself() {
        let store = SampleStore::new(Duration::from_secs(2));
        let t0 = Instant::now();
        store.replace_at(Family::WriteFd, counters(&[("7", 512)]), t0);

        let evicted = store.evict_and_snapshot_at(t0 + Duration::from_secs(10));
        assert!(evicted.write_fd.is_empty());
        // A later in-window snapshot must not resurrect the old counters.
        let snap = store.snapshot_at(t0 + Duration::from_secs(10));
        assert!(snap.write_fd.is_empty());
    }

    #[test]
    fn silence_zeroes_the_published_picture() {
        use crate::metrics::GaugeSet;

        let interval = Duration::from_secs(4);
        let store = SampleStore::new(interval);
        let t0 = Instant::now();
        store.replace_at(Family::ReadFd, counters(&[("3", 2048), ("4", 1024)]), t0);

        let fd_paths: HashMap<i32, String> = [
            (3, "/etc/hosts".to_string()),
            (4, "/tmp/x".to_string()),
        ]
        .into();
        let disks = HashMap::new();

        // While fresh, the whole pipeline sees the bytes.
        let families = store.evict_and_snapshot_at(t0 + interval);
        let summaries = aggregate::summarize(&families, &fd_paths, &disks);
        let gauges = GaugeSet::compute(&summaries, 4);
        assert_eq!(gauges.fd_read_bytes, 768);

        // Two silent intervals later the summary is empty and the gauges
        // read zero.
        let families = store.evict_and_snapshot_at(t0 + interval * 2);
        let summaries = aggregate::summarize(&families, &fd_paths, &disks);
        assert!(summaries.files.is_empty());
        let gauges = GaugeSet::compute(&summaries, 4);
        assert_eq!(gauges, GaugeSet::default());
    }

    #[test]
    fn replacement_advances_the_window() {
        let store = SampleStore::new(Duration::from_secs(2));
        let t0 = Instant::now();
        store.replace_at(Family::ReadFd, counters(&[("3", 1)]), t0);
        store.replace_at(Family::ReadFd, counters(&[("3", 2)]), t0 + Duration::from_secs(2));
        let snap = store.snapshot_at(t0 + Duration::from_secs(3));
        assert_eq!(snap.read_fd.get("3"), Some(&2));
    }
}
