pub mod format;
pub mod render;

use std::io::{self, Stdout};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Paragraph, Wrap};

use crate::aggregate;
use crate::procview::ProcView;
use crate::store::SampleStore;

const EVENT_POLL_TIMEOUT: Duration = Duration::from_millis(250);
const PANEL_COUNT: usize = 4;

const FOCUSED_BORDER: Color = Color::Indexed(228);

pub struct App {
    pub store: Arc<SampleStore>,
    pub view: Arc<RwLock<ProcView>>,
    focus: usize,
}

impl App {
    pub fn new(store: Arc<SampleStore>, view: Arc<RwLock<ProcView>>) -> Self {
        Self {
            store,
            view,
            focus: 0,
        }
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("cannot enable raw mode")?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, EnterAlternateScreen).context("cannot enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).context("cannot create terminal")
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode().context("cannot disable raw mode")?;
    crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("cannot leave alternate screen")?;
    terminal.show_cursor().context("cannot show cursor")?;
    Ok(())
}

/// Run the panel display until the user quits. Blocking; the caller parks
/// it on a blocking task while the ingestion loops run on the runtime.
pub fn run(mut app: App) -> Result<()> {
    let mut terminal = setup_terminal()?;
    let result = event_loop(&mut terminal, &mut app);
    let restore = restore_terminal(&mut terminal);
    result.and(restore)
}

fn event_loop(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|frame| draw(frame, app))?;
        if !event::poll(EVENT_POLL_TIMEOUT)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(());
            }
            KeyCode::Tab => app.focus = (app.focus + 1) % PANEL_COUNT,
            KeyCode::BackTab => app.focus = app.focus.checked_sub(1).unwrap_or(0),
            _ => {}
        }
    }
}

fn panel_block(title: &'static str, focused: bool) -> Block<'static> {
    let block = Block::bordered().title(title);
    if focused {
        block.border_style(Style::new().fg(FOCUSED_BORDER))
    } else {
        block
    }
}

fn draw(frame: &mut ratatui::Frame, app: &App) {
    let interval_sec = app.store.interval().as_secs().max(1);
    let families = app.store.snapshot();

    // The whole render pass works off one consistent procfs view.
    let view = app.view.read().unwrap();
    let summaries = aggregate::summarize(&families, &view.fd_paths, &view.disks);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(frame.area());
    let top = split_row(rows[0]);
    let bottom = split_row(rows[1]);

    let overview = Paragraph::new(render::overview_text(&view))
        .wrap(Wrap { trim: false })
        .block(panel_block("Overview", app.focus == 0));
    frame.render_widget(overview, top[0]);

    let files = Paragraph::new(render::file_text(&summaries.files, interval_sec))
        .block(panel_block("File IO", app.focus == 1));
    frame.render_widget(files, top[1]);

    let net = Paragraph::new(render::net_text(
        &summaries.tcp_src,
        &summaries.tcp_dest,
        interval_sec,
    ))
    .block(panel_block("Network IO", app.focus == 2));
    frame.render_widget(net, bottom[0]);

    let block = Paragraph::new(render::block_text(&summaries.block, interval_sec))
        .block(panel_block("Block IO", app.focus == 3));
    frame.render_widget(block, bottom[1]);
}

fn split_row(area: Rect) -> std::rc::Rc<[Rect]> {
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area)
}
