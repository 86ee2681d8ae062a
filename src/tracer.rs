use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::store::{CounterMap, Family, SampleStore};

/// bpftrace program driving the whole pipeline: stash the FD on syscall
/// entry, attribute bytes on successful exit, tag TCP traffic by peer,
/// pair block IO start/done by sector, then print-and-clear all six maps
/// once per interval.
fn trace_script(pid: i32, interval_sec: u64) -> String {
    format!(
        r#"tracepoint:syscalls:sys_enter_read /pid == {pid}/ {{ @rfd[tid] = args->fd; }}
tracepoint:syscalls:sys_exit_read /pid == {pid}/ {{ if (args->ret > 0) {{ @read_fd[@rfd[tid]] += args->ret; }} delete(@rfd[tid]); }}
tracepoint:syscalls:sys_enter_write /pid == {pid}/ {{ @wfd[tid] = args->fd; }}
tracepoint:syscalls:sys_exit_write /pid == {pid}/ {{ if (args->ret > 0) {{ @write_fd[@wfd[tid]] += args->ret; }} delete(@wfd[tid]); }}
tracepoint:tcp:tcp_probe {{ @tcp_src[args->saddr, args->sport] += args->data_len; @tcp_dest[args->daddr, args->dport] += args->data_len; }}
tracepoint:block:block_io_start {{ @blkdev_sectors[args->dev] += args->nr_sector; @blkdev_req[args->sector] = nsecs; }}
tracepoint:block:block_io_done /@blkdev_req[args->sector]/ {{ @blkdev_dur[args->dev] += nsecs - @blkdev_req[args->sector]; delete(@blkdev_req[args->sector]); }}
interval:s:{interval_sec} {{
    print(@read_fd); clear(@read_fd);
    print(@write_fd); clear(@write_fd);
    print(@tcp_src); clear(@tcp_src);
    print(@tcp_dest); clear(@tcp_dest);
    print(@blkdev_dur); clear(@blkdev_dur);
    print(@blkdev_sectors); clear(@blkdev_sectors);
}}
"#
    )
}

#[derive(Debug, Deserialize)]
struct TraceRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Classify one stdout line. Only `map` records whose single top-level key
/// names a known family count; everything else (attach banners, lost-event
/// notices, corrupt lines) is discarded.
fn parse_record(line: &str) -> Option<(Family, CounterMap)> {
    let record: TraceRecord = serde_json::from_str(line).ok()?;
    if record.kind != "map" {
        return None;
    }
    let maps = record.data.as_object()?;
    for (key, value) in maps {
        let Some(family) = Family::from_name(key.trim_start_matches('@')) else {
            continue;
        };
        let entries = value.as_object()?;
        let mut counters = CounterMap::with_capacity(entries.len());
        for (counter_key, counter) in entries {
            // bpftrace prints sums as plain integers; anything negative
            // would be a miscounted interval, not usable data.
            let Some(count) = counter.as_u64() else {
                continue;
            };
            counters.insert(counter_key.clone(), count);
        }
        return Some((family, counters));
    }
    None
}

pub struct Tracer {
    pub bpftrace: PathBuf,
    pub pid: i32,
    pub interval_sec: u64,
}

/// Keeps the child killable after its pipes have been split off into the
/// ingestion tasks.
pub struct TracerHandle {
    child: Child,
}

impl TracerHandle {
    pub async fn stop(mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        info!("tracer stopped");
    }
}

impl Tracer {
    /// Launch bpftrace and start streaming its records into the store.
    /// Failing to spawn the child is the only hard error; once running,
    /// bad records are dropped and an exiting tracer just stops feeding
    /// the store, which ages the samples out.
    pub fn start(&self, store: Arc<SampleStore>) -> Result<TracerHandle> {
        let script = trace_script(self.pid, self.interval_sec);
        debug!("tracer program:\n{script}");
        let mut child = Command::new(&self.bpftrace)
            .arg("-e")
            .arg(&script)
            .arg("-f")
            .arg("json")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("cannot launch tracer {}", self.bpftrace.display()))?;

        info!(
            "tracing pid {} with {} every {}s",
            self.pid,
            self.bpftrace.display(),
            self.interval_sec
        );

        let stdout = child.stdout.take().context("tracer stdout not piped")?;
        let stderr = child.stderr.take().context("tracer stderr not piped")?;

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some((family, counters)) = parse_record(&line) {
                            store.replace(family, counters);
                        } else if !line.trim().is_empty() {
                            debug!("ignoring tracer record: {line}");
                        }
                    }
                    Ok(None) => {
                        warn!("tracer stdout closed; samples will age out");
                        break;
                    }
                    Err(err) => {
                        warn!("tracer stdout read failed: {err}");
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!("bpftrace: {line}");
            }
        });

        Ok(TracerHandle { child })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_filters_syscalls_by_pid_and_prints_on_interval() {
        let script = trace_script(4242, 4);
        assert!(script.contains("/pid == 4242/"));
        assert!(script.contains("interval:s:4"));
        for family in Family::ALL {
            assert!(script.contains(&format!("print(@{});", family.name())));
            assert!(script.contains(&format!("clear(@{});", family.name())));
        }
        // Helper maps must stay private to the script.
        assert!(!script.contains("print(@rfd)"));
        assert!(!script.contains("print(@blkdev_req)"));
    }

    #[test]
    fn map_record_parses_into_its_family() {
        let line = r#"{"type":"map","data":{"@read_fd":{"3":2048,"7":512}}}"#;
        let (family, counters) = parse_record(line).unwrap();
        assert_eq!(family, Family::ReadFd);
        assert_eq!(counters.get("3"), Some(&2048));
        assert_eq!(counters.get("7"), Some(&512));
    }

    #[test]
    fn tcp_keys_survive_verbatim() {
        let line = r#"{"type":"map","data":{"@tcp_src":{"[2,0,-89,74,127,0,0,1,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0],42826":73}}}"#;
        let (family, counters) = parse_record(line).unwrap();
        assert_eq!(family, Family::TcpSrc);
        assert_eq!(counters.len(), 1);
        assert!(counters.keys().next().unwrap().starts_with("[2,"));
    }

    #[test]
    fn empty_map_record_is_an_empty_counter_set() {
        let line = r#"{"type":"map","data":{"@blkdev_dur":{}}}"#;
        let (family, counters) = parse_record(line).unwrap();
        assert_eq!(family, Family::BlkdevDur);
        assert!(counters.is_empty());
    }

    #[test]
    fn non_map_and_unknown_records_are_discarded() {
        assert!(parse_record(r#"{"type":"attached_probes","data":{"probes":8}}"#).is_none());
        assert!(parse_record(r#"{"type":"map","data":{"@rfd":{"11":3}}}"#).is_none());
        assert!(parse_record(r#"{"type":"map","data":{"@blkdev_req":{"100":1}}}"#).is_none());
        assert!(parse_record("not json at all").is_none());
        assert!(parse_record("").is_none());
        assert!(parse_record(r#"{"type":"map"}"#).is_none());
    }

    #[test]
    fn negative_counters_are_skipped_not_fatal() {
        let line = r#"{"type":"map","data":{"@write_fd":{"3":-5,"4":10}}}"#;
        let (_, counters) = parse_record(line).unwrap();
        assert_eq!(counters.get("3"), None);
        assert_eq!(counters.get("4"), Some(&10));
    }

    #[tokio::test]
    async fn records_from_a_fake_tracer_reach_the_store() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        // A stand-in tracer: one valid record, one banner to be ignored,
        // then hang around until killed.
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(
            file,
            r#"echo '{{"type":"attached_probes","data":{{"probes":8}}}}'"#
        )
        .unwrap();
        writeln!(
            file,
            r#"echo '{{"type":"map","data":{{"@read_fd":{{"3":2048}}}}}}'"#
        )
        .unwrap();
        writeln!(file, "sleep 5").unwrap();
        file.flush().unwrap();
        let path = file.into_temp_path();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();

        let store = Arc::new(SampleStore::new(Duration::from_secs(4)));
        let tracer = Tracer {
            bpftrace: path.to_path_buf(),
            pid: 1,
            interval_sec: 4,
        };
        let handle = tracer.start(Arc::clone(&store)).unwrap();

        let mut found = false;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if store.snapshot().read_fd.get("3") == Some(&2048) {
                found = true;
                break;
            }
        }
        handle.stop().await;
        assert!(found, "record never arrived in the store");
    }

    #[test]
    fn spawn_of_missing_binary_fails() {
        let tracer = Tracer {
            bpftrace: PathBuf::from("/nonexistent/bpftrace"),
            pid: 1,
            interval_sec: 4,
        };
        let store = Arc::new(SampleStore::new(std::time::Duration::from_secs(4)));
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        assert!(tracer.start(store).is_err());
    }
}
