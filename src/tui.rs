use std::io;
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph};

use crate::app::{RunHandle, RunReport, RunState};
use crate::domain::Strategy;

const SPINNER: &[&str] = &["|", "/", "-", "\\"];
const TICK: Duration = Duration::from_millis(120);

pub struct Tui {
    strategy: Strategy,
    cancel_sent: bool,
}

impl Tui {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            cancel_sent: false,
        }
    }

    /// Draws the run until it finishes. Quitting the view cancels the run and
    /// keeps drawing until in-flight work has drained.
    pub fn watch(&mut self, handle: RunHandle) -> miette::Result<RunReport> {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let started = Instant::now();
        let mut tick = 0usize;
        let mut last_state = handle.state();
        loop {
            if handle.is_finished() {
                break;
            }
            let state = handle.state();
            if state.active {
                last_state = state;
            }
            terminal
                .draw(|frame| {
                    let chunks = Layout::default()
                        .direction(Direction::Vertical)
                        .margin(1)
                        .constraints([
                            Constraint::Length(3),
                            Constraint::Length(3),
                            Constraint::Min(1),
                        ])
                        .split(frame.area());
                    frame.render_widget(self.header(&last_state, tick), chunks[0]);
                    frame.render_widget(progress_gauge(&last_state), chunks[1]);
                    frame.render_widget(self.footer(started.elapsed()), chunks[2]);
                })
                .into_diagnostic()?;

            if event::poll(TICK).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if is_quit(key) && !self.cancel_sent {
                        handle.cancel();
                        self.cancel_sent = true;
                    }
                }
            }
            tick = tick.wrapping_add(1);
        }

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        handle.wait().map_err(miette::Report::new)
    }

    fn header(&self, state: &RunState, tick: usize) -> Paragraph<'static> {
        let spinner = SPINNER[tick % SPINNER.len()];
        let line = Line::from(vec![
            Span::styled(
                "dex-cache ",
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("{spinner} {} load", self.strategy)),
            Span::styled(
                format!("  phase={}", state.phase.label()),
                Style::default().fg(Color::Cyan),
            ),
        ]);
        Paragraph::new(line).block(Block::default().borders(Borders::ALL))
    }

    fn footer(&self, elapsed: Duration) -> Paragraph<'static> {
        let hint = if self.cancel_sent {
            "cancelling: waiting for in-flight requests".to_string()
        } else {
            "q / Esc cancels the run".to_string()
        };
        Paragraph::new(vec![
            Line::from(format!("elapsed {:.1}s", elapsed.as_secs_f64())),
            Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray))),
        ])
    }
}

pub fn confirm_clear() -> miette::Result<bool> {
    let mut stdout = io::stdout();
    enable_raw_mode().into_diagnostic()?;
    stdout.execute(EnterAlternateScreen).into_diagnostic()?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).into_diagnostic()?;

    let confirmed = loop {
        terminal
            .draw(|frame| {
                let block = Block::default().borders(Borders::ALL).title("Confirm");
                let text = Paragraph::new(vec![
                    Line::from("Delete cached names AND ownership?"),
                    Line::from("Press y to confirm, n to cancel."),
                ])
                .alignment(Alignment::Center)
                .block(block);
                frame.render_widget(text, frame.area());
            })
            .into_diagnostic()?;

        if event::poll(Duration::from_millis(100)).into_diagnostic()? {
            if let Event::Key(key) = event::read().into_diagnostic()? {
                match key.code {
                    KeyCode::Char('y') | KeyCode::Char('Y') => break true,
                    KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => break false,
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().into_diagnostic()?;
    let mut stdout = io::stdout();
    stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
    Ok(confirmed)
}

fn progress_gauge(state: &RunState) -> Gauge<'static> {
    let ratio = state.progress.clamp(0.0, 1.0);
    Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio)
        .label(format!("{}%", (ratio * 100.0).round() as u32))
}

fn is_quit(key: KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}
