//! TUI dashboard for a running scan

use crate::proxy::models::ValidatedProxy;
use crate::proxy::scheduler::{ScanStats, StatsSnapshot};
use crate::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::Duration;

/// Maximum number of recent live proxies kept for display
const MAX_RECENT_PROXIES: usize = 100;

/// Scan monitor state
pub struct ScanMonitorApp {
    stats: Arc<ScanStats>,
    /// Live proxies as the scheduler finds them
    live_rx: mpsc::UnboundedReceiver<ValidatedProxy>,
    /// Most recent live proxies, oldest at the front
    recent: VecDeque<ValidatedProxy>,
    list_state: ListState,
    snapshot: StatsSnapshot,
    is_complete: bool,
    should_quit: bool,
}

impl ScanMonitorApp {
    pub fn new(stats: Arc<ScanStats>, live_rx: mpsc::UnboundedReceiver<ValidatedProxy>) -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));
        let snapshot = stats.snapshot();

        Self {
            stats,
            live_rx,
            recent: VecDeque::new(),
            list_state,
            snapshot,
            is_complete: false,
            should_quit: false,
        }
    }

    /// Run the dashboard until the user quits.
    ///
    /// Leaving early does not stop the scan; it keeps running in the
    /// background and its reports are still written.
    pub async fn run(&mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_app(&mut terminal).await;

        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        terminal.show_cursor()?;

        result
    }

    async fn run_app<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        loop {
            self.poll_updates();
            terminal.draw(|f| self.ui(f))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_input(key.code);
                    }
                }
            }
            if self.should_quit {
                break;
            }

            tokio::task::yield_now().await;
        }

        Ok(())
    }

    /// Drain pending live proxies and refresh the counters
    fn poll_updates(&mut self) {
        loop {
            match self.live_rx.try_recv() {
                Ok(proxy) => {
                    self.recent.push_back(proxy);
                    if self.recent.len() > MAX_RECENT_PROXIES {
                        self.recent.pop_front();
                    }
                }
                Err(TryRecvError::Empty) => break,
                // Scheduler dropped its sender: the scan is over
                Err(TryRecvError::Disconnected) => {
                    self.is_complete = true;
                    break;
                }
            }
        }
        self.snapshot = self.stats.snapshot();
    }

    fn handle_input(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            KeyCode::Down => {
                let i = match self.list_state.selected() {
                    Some(i) if i + 1 < self.recent.len() => i + 1,
                    _ => 0,
                };
                self.list_state.select(Some(i));
            }
            KeyCode::Up => {
                let i = match self.list_state.selected() {
                    Some(0) | None => self.recent.len().saturating_sub(1),
                    Some(i) => i - 1,
                };
                self.list_state.select(Some(i));
            }
            _ => {}
        }
    }

    fn status_message(&self) -> String {
        let s = &self.snapshot;
        if self.is_complete {
            format!(
                "Complete! Checked: {} | Live: {} | Press 'q' to exit",
                s.checked, s.live
            )
        } else {
            format!(
                "Scanning... {:.0}% ({}/{}) | Live: {} | 'q' leaves, scan continues",
                s.percent(),
                s.checked,
                s.total,
                s.live
            )
        }
    }

    fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3), // Title
                Constraint::Length(3), // Progress bar
                Constraint::Min(0),    // Live proxies
                Constraint::Length(3), // Status bar
            ])
            .split(f.size());

        let title = Paragraph::new("Proxy Sieve")
            .style(Style::default().fg(Color::Cyan))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(title, chunks[0]);

        let s = self.snapshot;
        let percent = s.percent().clamp(0.0, 100.0) as u16;
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Progress"))
            .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
            .percent(percent)
            .label(format!("{}/{} ({}%)", s.checked, s.total, percent));
        f.render_widget(gauge, chunks[1]);

        let items: Vec<ListItem> = self
            .recent
            .iter()
            .rev() // Show newest first
            .map(|proxy| ListItem::new(proxy.to_string()).style(Style::default().fg(Color::Green)))
            .collect();
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("Live Proxies ({})", s.live))
                    .border_style(
                        Style::default()
                            .fg(Color::Cyan)
                            .add_modifier(Modifier::BOLD),
                    ),
            )
            .highlight_style(Style::default().bg(Color::DarkGray))
            .highlight_symbol(">> ");
        f.render_stateful_widget(list, chunks[2], &mut self.list_state);

        let status = Paragraph::new(self.status_message())
            .style(if self.is_complete {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Yellow)
            })
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(status, chunks[3]);
    }
}
