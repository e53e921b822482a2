use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "agent_replay=info,tower_http=info";

/// Install the stderr subscriber.
///
/// The TUI owns the terminal, so in that mode logging stays off unless
/// `RUST_LOG` asks for it explicitly.
pub fn init(tui: bool) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) if tui => return,
        Err(_) => EnvFilter::new(DEFAULT_FILTER),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
