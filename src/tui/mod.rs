mod help;
mod state;

use crate::cli::Cli;
use crate::model::{Phase, PlaybackEvent, TimingConfig};
use crate::narration;
use crate::scenario::Scenario;
use crate::sequencer::{run_driver, DriverOptions, PlaybackCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Wrap},
    Terminal,
};
use state::{kv_line, status_color, step_speed, UiState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(args: Cli, scenario: Scenario, timing: TimingConfig) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<PlaybackEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<PlaybackCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_scenario = scenario.clone();
    let speed = timing.speed;
    let ui_handle = std::thread::spawn(move || run_threaded(ui_scenario, speed, event_rx, cmd_tx));

    let options = DriverOptions {
        autoplay: args.autoplay,
        exit_on_complete: false,
    };
    // The driver drops its event sender on return, which tells the UI to exit.
    let res = run_driver(&scenario, &timing, options, event_tx, cmd_rx).await;

    let joined = tokio::task::spawn_blocking(move || ui_handle.join())
        .await
        .context("TUI join task failed")?;
    match joined {
        Ok(ui_res) => ui_res?,
        Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
    }

    res.map(|_| ()).context("playback failed")
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    scenario: Scenario,
    speed: f64,
    mut event_rx: UnboundedReceiver<PlaybackEvent>,
    cmd_tx: UnboundedSender<PlaybackCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState::new(scenario, speed);

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now() - tick_rate;

    let res = loop {
        if !drain_events(&mut state, &mut event_rx) {
            // Driver is gone; nothing more will change on screen.
            break Ok(());
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                let cmd = match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(PlaybackCommand::Quit);
                        break Ok(());
                    }
                    (_, KeyCode::Char(' '))
                        if state.playback.is_at_start() && !state.playback.is_playing =>
                    {
                        Some(PlaybackCommand::Start)
                    }
                    (_, KeyCode::Char(' ')) => Some(PlaybackCommand::TogglePause),
                    (_, KeyCode::Char('p')) => Some(if state.playback.is_playing {
                        PlaybackCommand::Pause
                    } else if state.playback.is_at_start() {
                        PlaybackCommand::Start
                    } else {
                        PlaybackCommand::Resume
                    }),
                    (_, KeyCode::Char('r')) => {
                        state.info = "Restarted".into();
                        Some(PlaybackCommand::Restart)
                    }
                    (_, KeyCode::Char('+')) | (_, KeyCode::Char('=')) => Some(
                        PlaybackCommand::SetSpeed(step_speed(state.playback.speed, true)),
                    ),
                    (_, KeyCode::Char('-')) => Some(PlaybackCommand::SetSpeed(step_speed(
                        state.playback.speed,
                        false,
                    ))),
                    (_, KeyCode::Char('?')) => {
                        state.show_help = !state.show_help;
                        None
                    }
                    _ => None,
                };
                if let Some(cmd) = cmd {
                    if cmd_tx.send(cmd).is_err() {
                        state.info = "Playback stopped".into();
                    }
                }
                // Redraw right away so key presses feel immediate.
                last_tick = Instant::now() - tick_rate;
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

/// Apply every queued event without blocking. Returns false once the driver
/// has dropped its sender.
fn drain_events(state: &mut UiState, event_rx: &mut UnboundedReceiver<PlaybackEvent>) -> bool {
    loop {
        match event_rx.try_recv() {
            Ok(ev) => state.apply_event(ev),
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Disconnected) => return false,
        }
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(3),
            ]
            .as_ref(),
        )
        .split(area);

    draw_header(chunks[0], f, state);
    draw_progress(chunks[1], f, state);
    match state.playback.phase {
        Phase::Context => draw_context(chunks[2], f, state),
        Phase::Analysis | Phase::Result => draw_analysis(chunks[2], f, state),
    }
    draw_status(chunks[3], f, state);

    if state.show_help {
        let w = area.width.min(40);
        let h = area.height.min(10);
        let popup = Rect {
            x: area.x + (area.width - w) / 2,
            y: area.y + (area.height - h) / 2,
            width: w,
            height: h,
        };
        help::draw_help(popup, f);
    }
}

fn draw_header(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let s = &state.scenario;
    let title = Line::from(vec![
        Span::raw(format!("{} ", s.logo)),
        Span::styled(
            s.company.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::styled(s.title.clone(), Style::default().fg(Color::Cyan)),
    ]);
    let p = Paragraph::new(title).block(
        Block::default()
            .borders(Borders::ALL)
            .title("agent-replay"),
    );
    f.render_widget(p, area);
}

fn draw_progress(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let color = match state.playback.phase {
        Phase::Context => Color::Blue,
        Phase::Analysis => Color::Yellow,
        Phase::Result => Color::Green,
    };
    let label = format!(
        "{} | {} | {}x",
        state.playback.phase.label(),
        state.status_label(),
        state.playback.speed
    );
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(color))
        .ratio(state.progress())
        .label(label);
    f.render_widget(gauge, area);
}

fn draw_context(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(32), Constraint::Min(0)].as_ref())
        .split(area);

    let items: Vec<ListItem> = state
        .scenario
        .context
        .iter()
        .enumerate()
        .map(|(i, card)| {
            let style = if i == state.playback.context_index {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if i < state.playback.context_index {
                Style::default().fg(Color::Gray)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            ListItem::new(Line::from(Span::styled(card.title.clone(), style)))
        })
        .collect();
    f.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title("Story")),
        cols[0],
    );

    let body = match state.current_context() {
        Some(card) => vec![
            Line::from(Span::styled(
                card.title.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(card.content.clone()),
        ],
        None => vec![Line::from("Preparing analysis…")],
    };
    let p = Paragraph::new(body)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Context"));
    f.render_widget(p, cols[1]);
}

fn draw_analysis(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(40), Constraint::Min(0)].as_ref())
        .split(area);

    let revealed = state.revealed_steps();
    let current = revealed.len().checked_sub(1);
    let items: Vec<ListItem> = state
        .scenario
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            if i >= revealed.len() {
                return ListItem::new(Line::from(Span::styled(
                    format!("{:>2}. …", step.ordinal),
                    Style::default().fg(Color::DarkGray),
                )));
            }
            let mut title_style = Style::default();
            if Some(i) == current && state.playback.phase == Phase::Analysis {
                title_style = title_style.add_modifier(Modifier::BOLD | Modifier::REVERSED);
            }
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:>2}. ", step.ordinal), title_style),
                Span::styled(step.title.clone(), title_style),
                Span::raw(" "),
                Span::styled(
                    step.status.label(),
                    Style::default().fg(status_color(step)),
                ),
            ]))
        })
        .collect();
    f.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title("Agent flow")),
        cols[0],
    );

    if state.playback.phase == Phase::Result {
        draw_result(cols[1], f, state);
        return;
    }

    let lines: Vec<Line> = match current.and_then(|i| revealed.get(i)) {
        Some(step) => narration::step_lines(step)
            .into_iter()
            .enumerate()
            .map(|(i, l)| {
                if i == 0 {
                    Line::from(Span::styled(l, Style::default().fg(status_color(step))))
                } else {
                    Line::from(l)
                }
            })
            .collect(),
        None => vec![Line::from("No steps recorded.")],
    };
    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Decision"));
    f.render_widget(p, cols[1]);
}

fn draw_result(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let s = &state.scenario;
    let mut lines = Vec::new();
    if let Some(step) = s.first_fault() {
        lines.push(Line::from(Span::styled(
            format!("Failure point: step {} ({})", step.ordinal, step.title),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )));
        if let Some(should) = step.what_should_have_happened.as_deref() {
            lines.push(kv_line("Should have", should));
        }
    }
    lines.push(kv_line("Root cause", &s.root_cause));
    lines.push(kv_line("Fix", &s.fix));
    lines.push(kv_line("Prevention confidence", &s.prevention_confidence));
    lines.push(Line::from(""));
    for (label, value) in narration::format_impact(s) {
        lines.push(kv_line(&label, &value));
    }

    let title = if state.completions > 1 {
        format!("Result (replay {})", state.completions)
    } else {
        "Result".to_string()
    };
    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let hint = Span::styled(
        "  space pause · r restart · +/- speed · ? help · q quit",
        Style::default().fg(Color::DarkGray),
    );
    let p = Paragraph::new(Line::from(vec![Span::raw(state.info.clone()), hint]))
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(p, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlaybackState;
    use crate::scenario::ScenarioSet;

    fn ui() -> UiState {
        let s = ScenarioSet::builtin().unwrap().get(None).unwrap().clone();
        UiState::new(s, 1.0)
    }

    #[test]
    fn drain_keeps_going_while_driver_runs() {
        let mut state = ui();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(PlaybackEvent::Info {
            message: "hello".into(),
        })
        .unwrap();
        assert!(drain_events(&mut state, &mut rx));
        assert_eq!(state.info, "hello");
        assert!(drain_events(&mut state, &mut rx));
    }

    #[test]
    fn drain_reports_driver_exit_after_last_events() {
        let mut state = ui();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut done = PlaybackState::initial(1.0);
        done.phase = Phase::Result;
        tx.send(PlaybackEvent::Completed { state: done }).unwrap();
        drop(tx);

        assert!(!drain_events(&mut state, &mut rx));
        assert_eq!(state.completions, 1);
        assert_eq!(state.playback.phase, Phase::Result);
    }
}
