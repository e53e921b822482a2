use crate::model::{PlaybackEvent, TimingConfig};
use crate::narration;
use crate::scenario::{self, Scenario};
use crate::sequencer::{run_driver, validate_speed, DriverOptions};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

fn parse_speed(raw: &str) -> Result<f64, String> {
    let speed: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    validate_speed(speed).map_err(|e| e.to_string())
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "agent-replay",
    version,
    about = "Guided replay of scripted AI agent failure stories"
)]
pub struct Cli {
    /// Scenario key to play (defaults to the first scenario)
    #[arg(long)]
    pub scenario: Option<String>,

    /// Load scenarios from a JSON file instead of the built-in set
    #[arg(long)]
    pub scenarios: Option<PathBuf>,

    /// List available scenarios and exit
    #[arg(long)]
    pub list: bool,

    /// Narrate as plain text and exit when playback completes (no TUI)
    #[arg(long, conflicts_with = "json")]
    pub text: bool,

    /// Print playback events as JSON lines and exit when playback completes (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Playback speed multiplier
    #[arg(long, default_value_t = 1.0, value_parser = parse_speed)]
    pub speed: f64,

    /// Interval between analysis steps at speed 1
    #[arg(long, default_value = "4s")]
    pub step_duration: humantime::Duration,

    /// Pause after the last step before the result
    #[arg(long, default_value = "2s")]
    pub trailing_delay: humantime::Duration,

    /// Start playback when the TUI launches; use --autoplay false to wait for a key press
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub autoplay: bool,

    /// Run the health-check server instead of playback
    #[arg(long)]
    pub serve: bool,

    /// Address the health-check server binds to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Port for the health-check server
    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,
}

impl Cli {
    /// True when the terminal UI will own the screen.
    pub fn wants_tui(&self) -> bool {
        cfg!(feature = "tui") && !(self.serve || self.list || self.text || self.json)
    }
}

/// Build a `TimingConfig` from CLI arguments.
pub fn build_timing(args: &Cli) -> TimingConfig {
    TimingConfig {
        step_duration: Duration::from(args.step_duration),
        trailing_delay: Duration::from(args.trailing_delay),
        speed: args.speed,
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.serve {
        let addr = SocketAddr::new(args.bind, args.port);
        return crate::server::serve(addr).await;
    }

    let set = scenario::load_scenarios(args.scenarios.as_deref())
        .context("failed to load scenarios")?;

    if args.list {
        for s in set.iter() {
            println!(
                "{:<10} {:<10} {} ({} steps)",
                s.key,
                s.company,
                s.title,
                s.steps.len()
            );
        }
        return Ok(());
    }

    let scenario = set.get(args.scenario.as_deref())?.clone();
    let timing = build_timing(&args);
    tracing::debug!(?timing, scenario = %scenario.key, "starting playback");

    if args.json {
        return run_json(scenario, timing).await;
    }
    if !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args, scenario, timing).await;
        }
    }
    run_text(scenario, timing).await
}

const HEADLESS: DriverOptions = DriverOptions {
    autoplay: true,
    exit_on_complete: true,
};

async fn run_text(scenario: Scenario, timing: TimingConfig) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<PlaybackEvent>();
    // Held for the whole run: a closed command channel stops the driver.
    let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    let driven = scenario.clone();
    let handle =
        tokio::spawn(async move { run_driver(&driven, &timing, HEADLESS, evt_tx, cmd_rx).await });

    while let Some(ev) = evt_rx.recv().await {
        if let PlaybackEvent::Info { message } = &ev {
            let _ = out_tx.send(OutputLine::Stderr(message.clone()));
            continue;
        }
        for line in narration::describe_event(&scenario, &ev) {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }

    let state = handle.await.context("playback task failed")??;
    let _ = out_tx.send(OutputLine::Stderr(format!(
        "Finished in phase {}",
        state.phase.label()
    )));
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

async fn run_json(scenario: Scenario, timing: TimingConfig) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<PlaybackEvent>();
    let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    let handle =
        tokio::spawn(async move { run_driver(&scenario, &timing, HEADLESS, evt_tx, cmd_rx).await });

    while let Some(ev) = evt_rx.recv().await {
        let line = serde_json::to_string(&ev)?;
        let _ = out_tx.send(OutputLine::Stdout(line));
    }

    handle.await.context("playback task failed")??;
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
