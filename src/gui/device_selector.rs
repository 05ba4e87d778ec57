use std::{
    io::{self, stdout, Stdout},
    path::PathBuf,
    time::Duration,
};

use crate::gui::error::SelectorError;
use crate::transport::available_ports;

use crossterm::{
    event::{self, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
    Terminal,
};

/// Where the cursor goes after a key press, and whether the choice is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Move(usize),
    Select(usize),
    Quit,
}

fn step(cursor: usize, n_ports: usize, code: KeyCode) -> Step {
    match code {
        KeyCode::Down | KeyCode::Char('j') => Step::Move((cursor + 1) % n_ports),
        KeyCode::Up | KeyCode::Char('k') => Step::Move((cursor + n_ports - 1) % n_ports),
        KeyCode::Enter => Step::Select(cursor),
        KeyCode::Char('q') | KeyCode::Esc => Step::Quit,
        _ => Step::Move(cursor),
    }
}

fn pick(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    available_ports: &[PathBuf],
) -> Result<Option<usize>, SelectorError> {
    let n_ports = available_ports.len();
    let mut cursor = 0;
    let mut list_state = ListState::default().with_selected(Some(cursor));

    loop {
        let title = Title::from(" Serial Device ".cyan().bold());
        let instructions = Title::from(Line::from(vec![
            " Navigate ".into(),
            "<Up>/<Down>".cyan().bold(),
            " Select ".into(),
            "<Enter>".cyan().bold(),
            " Quit ".into(),
            "<Q> ".cyan().bold(),
        ]));
        let block = Block::default()
            .title(title.alignment(Alignment::Center))
            .title(
                instructions
                    .alignment(Alignment::Center)
                    .position(Position::Bottom),
            )
            .borders(Borders::ALL);
        let port_names = available_ports.iter().map(|p| p.to_string_lossy());
        let list = List::new(port_names)
            .style(Style::default().fg(Color::White))
            .highlight_symbol(">>")
            .highlight_style(Style::default().fg(Color::Cyan))
            .block(block);
        list_state.select(Some(cursor));
        terminal.draw(|frame| {
            let area = frame.size();
            frame.render_stateful_widget(list, area, &mut list_state);
        })?;

        if event::poll(Duration::from_millis(16))? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match step(cursor, n_ports, key.code) {
                        Step::Move(next) => cursor = next,
                        Step::Select(chosen) => return Ok(Some(chosen)),
                        Step::Quit => return Ok(None),
                    }
                }
            }
        }
    }
}

/// Let the user pick one of `available_ports` in a full screen list.
/// Returns `None` if they quit without choosing.
pub fn device_selector(
    mut available_ports: Vec<PathBuf>,
) -> Result<Option<PathBuf>, SelectorError> {
    if available_ports.is_empty() {
        return Err(SelectorError::NoDevices);
    }

    enable_raw_mode()?;
    let choice = stdout()
        .execute(EnterAlternateScreen)
        .map_err(SelectorError::from)
        .and_then(|_| {
            let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
            terminal.clear()?;
            pick(&mut terminal, &available_ports)
        });

    // the terminal is handed back even if drawing failed
    restore(disable_raw_mode, || stdout().execute(LeaveAlternateScreen).map(|_| ()))?;

    Ok(choice?.map(|i| available_ports.swap_remove(i)))
}

/// Run both terminal restore steps, then report the first failure.
fn restore<R, L>(raw_mode: R, screen: L) -> io::Result<()>
where
    R: FnOnce() -> io::Result<()>,
    L: FnOnce() -> io::Result<()>,
{
    let raw = raw_mode();
    let left = screen();
    raw.and(left)
}

/// The given device if there is one, otherwise one picked from the
/// devices present.
pub fn resolve_port(given: Option<PathBuf>) -> Result<Option<PathBuf>, SelectorError> {
    match given {
        Some(port) => Ok(Some(port)),
        None => device_selector(available_ports()?),
    }
}
