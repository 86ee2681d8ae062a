use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use procfs::process::{FDTarget, Process, all_processes};

/// Per-thread view derived from `/proc/<pid>/task/<tid>/{stat,status}`.
#[derive(Clone, Debug, Default)]
pub struct TaskSnap {
    pub tid: i32,
    pub state: char,
    pub uid: u32,
    pub gid: u32,
}

/// Everything the display needs to know about one process, extracted from
/// procfs into plain data so no `/proc` file descriptors are held between
/// refreshes. Fields keep their previous value when an individual read
/// fails mid-refresh.
#[derive(Clone, Debug, Default)]
pub struct ProcessNode {
    pub pid: i32,
    pub comm: String,
    pub exe: String,
    pub cwd: String,
    pub cmdline: Vec<String>,
    pub state: char,
    pub start_ticks: u64,
    pub ppid: i32,
    pub pgrp: i32,
    pub session: i32,
    pub tpgid: i32,
    pub uid: u32,
    pub gid: u32,
    pub threads: Vec<TaskSnap>,
}

impl ProcessNode {
    pub fn new(pid: i32) -> Self {
        let mut node = ProcessNode {
            pid,
            ..ProcessNode::default()
        };
        node.refresh();
        node
    }

    pub fn refresh(&mut self) {
        if self.pid <= 0 {
            return;
        }
        let Ok(proc) = Process::new(self.pid) else {
            return;
        };
        if let Ok(stat) = proc.stat() {
            self.comm = stat.comm.clone();
            self.state = stat.state;
            self.start_ticks = stat.starttime as u64;
            self.ppid = stat.ppid;
            self.pgrp = stat.pgrp;
            self.session = stat.session;
            self.tpgid = stat.tpgid;
        }
        if let Ok(status) = proc.status() {
            self.uid = status.ruid;
            self.gid = status.rgid;
        }
        if let Ok(exe) = proc.exe() {
            self.exe = exe.display().to_string();
        }
        if let Ok(cwd) = proc.cwd() {
            self.cwd = cwd.display().to_string();
        }
        if let Ok(cmdline) = proc.cmdline() {
            self.cmdline = cmdline;
        }
        if let Ok(tasks) = proc.tasks() {
            // Threads come and go between the directory listing and the
            // per-task reads; unreadable ones are simply gone.
            let mut threads = Vec::new();
            for task in tasks.flatten() {
                let Ok(stat) = task.stat() else { continue };
                let (uid, gid) = match task.status() {
                    Ok(status) => (status.ruid, status.rgid),
                    Err(_) => (self.uid, self.gid),
                };
                threads.push(TaskSnap {
                    tid: task.tid,
                    state: stat.state,
                    uid,
                    gid,
                });
            }
            self.threads = threads;
        }
    }
}

/// The polled procfs side of the picture: the five related process nodes,
/// the target's FD table and the disk name table. One writer refreshes it
/// in place each second; renderer and aggregator hold the read lock for a
/// whole pass.
#[derive(Debug, Default)]
pub struct ProcView {
    pub ticks_per_sec: u64,
    pub boot_time_secs: u64,
    pub uptime: Duration,
    pub target: ProcessNode,
    pub parent: ProcessNode,
    pub group: ProcessNode,
    pub session: ProcessNode,
    pub tty: ProcessNode,
    pub fd_paths: HashMap<i32, String>,
    pub disks: HashMap<String, String>,
}

impl ProcView {
    pub fn new(pid: i32) -> Self {
        let target = ProcessNode::new(pid);
        let mut view = ProcView {
            ticks_per_sec: procfs::ticks_per_second().max(1),
            boot_time_secs: procfs::boot_time_secs().unwrap_or_else(|err| {
                warn!("cannot read boot time from /proc/stat: {err}");
                0
            }),
            parent: ProcessNode::new(target.ppid),
            group: ProcessNode::new(target.pgrp),
            session: ProcessNode::new(target.session),
            tty: ProcessNode::new(target.tpgid),
            target,
            ..ProcView::default()
        };
        view.refresh();
        view
    }

    pub fn refresh(&mut self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.uptime = Duration::from_secs(now.saturating_sub(self.boot_time_secs));
        self.target.refresh();
        self.parent.refresh();
        self.group.refresh();
        self.session.refresh();
        self.tty.refresh();
        self.refresh_fd_paths();
        self.refresh_disks();
    }

    /// How long the target has been alive: uptime minus its start offset.
    pub fn since_started(&self) -> Duration {
        let start = Duration::from_secs(self.target.start_ticks / self.ticks_per_sec.max(1));
        self.uptime.saturating_sub(start)
    }

    fn refresh_fd_paths(&mut self) {
        let Ok(proc) = Process::new(self.target.pid) else {
            return;
        };
        let Ok(fds) = proc.fd() else {
            return;
        };
        let mut table = HashMap::new();
        for fd in fds {
            match fd {
                Ok(info) => {
                    table.insert(info.fd, fd_target_string(&info.target));
                }
                // A half-built table would misattribute IO; keep the
                // previous mapping for this cycle instead.
                Err(err) => {
                    debug!("fd listing for pid {} incomplete: {err}", self.target.pid);
                    return;
                }
            }
        }
        self.fd_paths = table;
    }

    fn refresh_disks(&mut self) {
        match procfs::diskstats() {
            Ok(stats) => {
                self.disks = stats
                    .into_iter()
                    .map(|d| (format!("{}:{}", d.major, d.minor), d.name))
                    .collect();
            }
            Err(err) => debug!("cannot read /proc/diskstats: {err}"),
        }
    }
}

fn fd_target_string(target: &FDTarget) -> String {
    match target {
        FDTarget::Path(path) => path.display().to_string(),
        FDTarget::Socket(inode) => format!("socket:[{inode}]"),
        FDTarget::Net(inode) => format!("net:[{inode}]"),
        FDTarget::Pipe(inode) => format!("pipe:[{inode}]"),
        FDTarget::AnonInode(kind) => format!("anon_inode:{kind}"),
        FDTarget::MemFD(name) => format!("/memfd:{name}"),
        FDTarget::Other(other, _) => other.clone(),
    }
}

/// Find a PID by executable basename: first process in `/proc` enumeration
/// order whose comm matches.
pub fn resolve_comm(comm: &str) -> Result<i32> {
    let processes = all_processes().context("cannot enumerate /proc")?;
    for proc in processes.flatten() {
        if let Ok(stat) = proc.stat() {
            if stat.comm == comm {
                return Ok(stat.pid);
            }
        }
    }
    bail!("no running process has executable name {comm:?}")
}

/// Re-poll the procfs view at the display refresh rate.
pub fn spawn_refresh(view: Arc<RwLock<ProcView>>, refresh_rate: Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(refresh_rate);
        loop {
            tick.tick().await;
            view.write().unwrap().refresh();
        }
    });
}
