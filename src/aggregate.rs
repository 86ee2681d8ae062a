use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use crate::store::{CounterMap, Families};

/// Bytes moved through one file during the last interval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileActivity {
    pub name: String,
    pub read_bytes: u64,
    pub written_bytes: u64,
}

/// Bytes exchanged with one TCP peer during the last interval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerActivity {
    pub addr: IpAddr,
    pub port: u16,
    pub bytes: u64,
}

/// IO charged to one block device during the last interval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockActivity {
    pub device: String,
    pub duration: Duration,
    pub sectors: u64,
}

#[derive(Clone, Debug, Default)]
pub struct Summaries {
    pub files: Vec<FileActivity>,
    /// Distinct FDs with read/write activity that resolved through the FD
    /// table. Two FDs on the same file merge in `files` but count twice.
    pub fds_reading: u64,
    pub fds_writing: u64,
    pub tcp_src: Vec<PeerActivity>,
    pub tcp_dest: Vec<PeerActivity>,
    pub block: Vec<BlockActivity>,
}

/// One aggregation pass over a store snapshot and the current procfs view.
pub fn summarize(
    families: &Families,
    fd_paths: &HashMap<i32, String>,
    disks: &HashMap<String, String>,
) -> Summaries {
    let mapped = |map: &CounterMap| {
        map.keys().filter(|k| lookup_fd(k, fd_paths).is_some()).count() as u64
    };
    Summaries {
        files: file_summary(&families.read_fd, &families.write_fd, fd_paths),
        fds_reading: mapped(&families.read_fd),
        fds_writing: mapped(&families.write_fd),
        tcp_src: net_summary(&families.tcp_src),
        tcp_dest: net_summary(&families.tcp_dest),
        block: block_summary(&families.blkdev_dur, &families.blkdev_sectors, disks),
    }
}

/// Join FD counters against the FD table. FDs the table does not know are
/// dropped rather than shown as unknown; the tracer and the table are
/// sampled independently and briefly disagree around open/close.
pub fn file_summary(
    read_fd: &CounterMap,
    write_fd: &CounterMap,
    fd_paths: &HashMap<i32, String>,
) -> Vec<FileActivity> {
    let mut by_name: HashMap<&str, (u64, u64)> = HashMap::new();
    for (key, bytes) in read_fd {
        let Some(name) = lookup_fd(key, fd_paths) else {
            continue;
        };
        by_name.entry(name).or_default().0 += bytes;
    }
    for (key, bytes) in write_fd {
        let Some(name) = lookup_fd(key, fd_paths) else {
            continue;
        };
        by_name.entry(name).or_default().1 += bytes;
    }
    let mut files: Vec<FileActivity> = by_name
        .into_iter()
        .map(|(name, (read_bytes, written_bytes))| FileActivity {
            name: name.to_string(),
            read_bytes,
            written_bytes,
        })
        .collect();
    files.sort_by(|a, b| {
        (b.read_bytes + b.written_bytes).cmp(&(a.read_bytes + a.written_bytes))
    });
    files
}

fn lookup_fd<'a>(key: &str, fd_paths: &'a HashMap<i32, String>) -> Option<&'a str> {
    let fd: i32 = key.parse().ok()?;
    fd_paths.get(&fd).map(String::as_str)
}

/// Decode the tracer's peer key: 28 comma-separated signed byte decimals in
/// brackets (a sockaddr_in6-shaped blob), then the port in text. Byte 0
/// picks the family; anything that is not AF_INET or AF_INET6 is dropped.
pub fn decode_peer_key(key: &str) -> Option<(IpAddr, u16)> {
    let rest = key.strip_prefix('[')?;
    let (blob, port) = rest.split_once("],")?;
    let port: u16 = port.trim().parse().ok()?;

    let mut bytes = [0u8; 28];
    let mut count = 0;
    for token in blob.split(',') {
        if count == bytes.len() {
            return None;
        }
        let signed: i8 = token.trim().parse().ok()?;
        bytes[count] = signed as u8;
        count += 1;
    }
    if count != bytes.len() {
        return None;
    }

    let addr = match bytes[0] {
        2 => IpAddr::V4(Ipv4Addr::new(bytes[4], bytes[5], bytes[6], bytes[7])),
        10 => {
            let mut v6 = [0u8; 16];
            v6.copy_from_slice(&bytes[4..20]);
            IpAddr::V6(Ipv6Addr::from(v6))
        }
        _ => return None,
    };
    Some((addr, port))
}

/// Per-peer traffic, corrupt keys dropped, heaviest first.
pub fn net_summary(peers: &CounterMap) -> Vec<PeerActivity> {
    let mut out: Vec<PeerActivity> = peers
        .iter()
        .filter_map(|(key, bytes)| {
            let (addr, port) = decode_peer_key(key)?;
            Some(PeerActivity {
                addr,
                port,
                bytes: *bytes,
            })
        })
        .collect();
    out.sort_by(|a, b| b.bytes.cmp(&a.bytes));
    out
}

/// The kernel's packed dev_t as printed by the block tracepoints.
fn devt_name<'a>(key: &str, disks: &'a HashMap<String, String>) -> Option<&'a str> {
    let devt: u64 = key.parse().ok()?;
    let major = devt >> 20;
    let minor = (devt >> 8) & 0x7f;
    disks
        .get(&format!("{major}:{minor}"))
        .map(String::as_str)
}

/// Join block counters against the disk table; devices the table does not
/// know are dropped. Sector counts merge into the entries the duration map
/// established. Longest total IO time first.
pub fn block_summary(
    durations: &CounterMap,
    sectors: &CounterMap,
    disks: &HashMap<String, String>,
) -> Vec<BlockActivity> {
    let mut by_device: HashMap<&str, (u64, u64)> = HashMap::new();
    for (key, nanos) in durations {
        let Some(name) = devt_name(key, disks) else {
            continue;
        };
        by_device.entry(name).or_default().0 += nanos;
    }
    for (key, count) in sectors {
        let Some(name) = devt_name(key, disks) else {
            continue;
        };
        if let Some(entry) = by_device.get_mut(name) {
            entry.1 += count;
        }
    }
    let mut out: Vec<BlockActivity> = by_device
        .into_iter()
        .map(|(device, (nanos, sectors))| BlockActivity {
            device: device.to_string(),
            duration: Duration::from_nanos(nanos),
            sectors,
        })
        .collect();
    out.sort_by(|a, b| b.duration.cmp(&a.duration));
    out
}
