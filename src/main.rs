use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{info, warn};

use procshave::procview::{self, ProcView};
use procshave::store::{self, SampleStore};
use procshave::tracer::{Tracer, TracerHandle};
use procshave::{Metrics, api, tui};

/// How often the procfs side (hierarchy, FD table, disk table) is re-polled
/// for display.
const REFRESH_RATE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(
    name = "procshave",
    about = "Watch one process's files, TCP peers and block devices, live from bpftrace and procfs"
)]
struct Args {
    /// Target process ID
    #[arg(short = 'p', long = "pid", default_value_t = 1)]
    pid: i32,

    /// Resolve the target by executable name instead (overrides --pid)
    #[arg(long, default_value = "")]
    comm: String,

    /// host:port of the metrics scrape listener; empty string disables it
    #[arg(long = "metricsaddr", default_value = "0.0.0.0:1619")]
    metrics_addr: String,

    /// Path to the bpftrace binary (default: discovered on $PATH)
    #[arg(long)]
    bpftrace: Option<PathBuf>,

    /// Tracer print-and-clear period in seconds
    #[arg(long, default_value_t = 4)]
    interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let pid = if args.comm.is_empty() {
        args.pid
    } else {
        procview::resolve_comm(&args.comm)
            .with_context(|| format!("cannot resolve target {:?}", args.comm))?
    };
    info!("observing pid {pid}");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    let interval_sec = args.interval.max(1);
    let store = Arc::new(SampleStore::new(Duration::from_secs(interval_sec)));
    let view = Arc::new(RwLock::new(ProcView::new(pid)));
    let metrics = Arc::new(Metrics::new(pid, hostname));

    if !args.metrics_addr.is_empty() {
        tokio::spawn(api::serve(args.metrics_addr.clone(), Arc::clone(&metrics)));
    }

    let tracer_handle = start_tracer(args.bpftrace, pid, interval_sec, Arc::clone(&store));

    store::spawn_housekeeping(Arc::clone(&store), Arc::clone(&view), Arc::clone(&metrics));
    procview::spawn_refresh(Arc::clone(&view), REFRESH_RATE);

    let app = tui::App::new(store, view);
    let display = tokio::task::spawn_blocking(move || tui::run(app)).await;

    // Display is down: take the tracer with us, everything else dies with
    // the process.
    if let Some(handle) = tracer_handle {
        handle.stop().await;
    }

    match display {
        Ok(result) => result,
        Err(err) => bail!("display task failed: {err}"),
    }
}

/// Locate and launch the tracer. A missing binary or a failed spawn is a
/// degraded mode, not a fatal one: the panels stay on "No data yet." and
/// the gauges publish zeroes until a tracer is available on a later run.
fn start_tracer(
    bpftrace: Option<PathBuf>,
    pid: i32,
    interval_sec: u64,
    store: Arc<SampleStore>,
) -> Option<TracerHandle> {
    let binary = match bpftrace {
        Some(path) => path,
        None => match which::which("bpftrace") {
            Ok(path) => path,
            Err(err) => {
                warn!("bpftrace not found on $PATH ({err}); running without tracer samples");
                return None;
            }
        },
    };
    let tracer = Tracer {
        bpftrace: binary,
        pid,
        interval_sec,
    };
    match tracer.start(store) {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!("cannot start tracer ({err:#}); running without tracer samples");
            None
        }
    }
}
