use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};

use crate::aggregate::{BlockActivity, FileActivity, PeerActivity};
use crate::procview::{ProcView, ProcessNode, TaskSnap};
use crate::tui::format::{io_rate_caption, path_caption, since_caption};

const LABEL: Color = Color::Rgb(0x38, 0x59, 0x8b);
const RUNNING: Color = Color::Rgb(0x42, 0xb8, 0x83);
const SLEEPING: Color = Color::Rgb(0x00, 0x92, 0xca);
const OTHER: Color = Color::Rgb(0xfe, 0x4e, 0x6e);

/// Cap on block device rows so a machine full of dm volumes cannot scroll
/// the panel away.
const MAX_BLKDEV_ROWS: usize = 12;

fn label(text: impl Into<String>) -> Span<'static> {
    Span::styled(
        text.into(),
        Style::new().fg(LABEL).add_modifier(Modifier::BOLD),
    )
}

/// Background colour class for a scheduler state letter. The letter is
/// whatever procfs reported; the renderer only classifies.
fn state_span(state: char, caption: String) -> Span<'static> {
    let bg = match state {
        'R' => RUNNING,
        'S' => SLEEPING,
        _ => OTHER,
    };
    Span::styled(caption, Style::new().bg(bg))
}

fn node_line(caption: &'static str, node: &ProcessNode) -> Line<'static> {
    Line::from(vec![
        label(caption),
        Span::raw(" "),
        state_span(node.state, node.state.to_string()),
        Span::raw(format!(
            " {} {} ({}:{})",
            node.pid, node.comm, node.uid, node.gid
        )),
    ])
}

/// The five-node ancestry tree. Parent and group swap places depending on
/// whose PID is smaller so the drawn tree stays topologically sensible.
pub fn hierarchy_lines(view: &ProcView) -> Vec<Line<'static>> {
    let mut lines = vec![node_line("┌Session   ", &view.session)];
    if view.tty.pid > 0 {
        lines.push(node_line("├─TTY group", &view.tty));
    } else {
        lines.push(Line::from(label("├─TTY group not used")));
    }
    if view.parent.pid < view.group.pid {
        lines.push(node_line("└┬Parent   ", &view.parent));
        lines.push(node_line(" └┬Group   ", &view.group));
    } else {
        lines.push(node_line("└┬Group    ", &view.group));
        lines.push(node_line(" └┬Parent  ", &view.parent));
    }
    lines.push(Line::from(vec![
        label("  └"),
        Span::raw("Target • "),
        state_span(view.target.state, view.target.state.to_string()),
        Span::raw(format!(
            " {} {} ({}:{})",
            view.target.pid, view.target.comm, view.target.uid, view.target.gid
        )),
    ]));
    lines
}

/// One cell per thread while they fit, a three-way histogram beyond that.
pub fn thread_line(threads: &[TaskSnap]) -> Line<'static> {
    let mut spans = vec![label("Threads: ")];
    if threads.len() <= 32 {
        for (index, thread) in threads.iter().enumerate() {
            spans.push(state_span(thread.state, index.to_string()));
            spans.push(Span::raw(" "));
        }
    } else {
        let mut running = 0;
        let mut sleeping = 0;
        let mut other = 0;
        for thread in threads {
            match thread.state {
                'R' => running += 1,
                'S' => sleeping += 1,
                _ => other += 1,
            }
        }
        spans.push(state_span('R', format!("{running:<4} running")));
        spans.push(Span::raw(" "));
        spans.push(state_span('S', format!("{sleeping:<4} sleeping")));
        spans.push(Span::raw(" "));
        spans.push(state_span('-', format!("{other:<3} other")));
    }
    Line::from(spans)
}

pub fn overview_text(view: &ProcView) -> Text<'static> {
    let mut lines = vec![
        Line::from(vec![
            label("Exe:  "),
            Span::raw(format!(" {}", view.target.exe)),
        ]),
        Line::from(vec![
            label("Cwd:  "),
            Span::raw(format!(" {}", view.target.cwd)),
        ]),
    ];
    if !view.target.cmdline.is_empty() {
        lines.push(Line::from(vec![
            label("Cmd:  "),
            Span::raw(format!(" {}", view.target.cmdline.join(" "))),
        ]));
    }
    lines.push(Line::from(vec![
        label("Since:"),
        Span::raw(format!(" {}", since_caption(view.since_started()))),
    ]));
    lines.push(Line::default());
    lines.extend(hierarchy_lines(view));
    lines.push(Line::default());
    lines.push(thread_line(&view.target.threads));
    Text::from(lines)
}

pub fn file_text(files: &[FileActivity], interval_sec: u64) -> Text<'static> {
    let mut lines = vec![Line::from(label("File R/W IO estimates may be off by ~20%."))];
    if files.is_empty() {
        lines.push(Line::raw("No data yet."));
        return Text::from(lines);
    }
    for file in files {
        lines.push(Line::raw(format!(
            "{} R {} W - {}",
            io_rate_caption(file.read_bytes, interval_sec),
            io_rate_caption(file.written_bytes, interval_sec),
            file.name
        )));
    }
    Text::from(lines)
}

fn peer_rows(lines: &mut Vec<Line<'static>>, peers: &[PeerActivity], interval_sec: u64) {
    for peer in peers {
        lines.push(Line::raw(format!(
            "{} {}:{}",
            io_rate_caption(peer.bytes, interval_sec),
            peer.addr,
            peer.port
        )));
    }
}

pub fn net_text(
    sources: &[PeerActivity],
    destinations: &[PeerActivity],
    interval_sec: u64,
) -> Text<'static> {
    let mut lines = vec![Line::from(label("Network IO activities"))];
    if sources.is_empty() && destinations.is_empty() {
        lines.push(Line::raw("No data yet."));
        return Text::from(lines);
    }
    if !sources.is_empty() {
        lines.push(Line::from(label("From source")));
        peer_rows(&mut lines, sources, interval_sec);
    }
    if !destinations.is_empty() {
        lines.push(Line::from(label("To destination")));
        peer_rows(&mut lines, destinations, interval_sec);
    }
    Text::from(lines)
}

pub fn block_text(devices: &[BlockActivity], interval_sec: u64) -> Text<'static> {
    let mut lines = vec![Line::from(label("Block device IO activities"))];
    if devices.is_empty() {
        lines.push(Line::raw("No data yet."));
        return Text::from(lines);
    }
    let interval = interval_sec.max(1);
    for device in devices.iter().take(MAX_BLKDEV_ROWS) {
        let millis = (device.duration.as_nanos() as u64 / interval + 500_000) / 1_000_000;
        lines.push(Line::raw(format!(
            "{:<26} {} sectors({millis}ms) /s",
            path_caption(&device.device, 25),
            device.sectors / interval,
        )));
    }
    Text::from(lines)
}
