mod address;
mod async_log;
mod attribution;
mod backends;
mod config;
mod error;
mod handoff;
mod inventory;
mod keybindings;
mod local_addr;
mod monitor;
mod packet;
mod process;
mod resolver;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::future::Future;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::interval;

use crate::async_log::AsyncLogger;
use crate::attribution::{CaptureDirection, EventSink, LogEvent, NullSink};
use crate::backends::capture::select_capture_backend;
use crate::backends::process::ProcfsSource;
use crate::config::{MAX_REFRESH_SECS, MIN_REFRESH_SECS, Settings, SortOrder};
use crate::handoff::HandoffQueue;
use crate::keybindings::Action;
use crate::local_addr::LocalAddrs;
use crate::monitor::NetworkMonitor;
use crate::resolver::{CachingResolver, NameResolver, NumericResolver};
use crate::ui::AppState;

/// nettop - per process network traffic, attributed from live packet capture
#[derive(Parser, Debug)]
#[command(name = "nettop")]
#[command(version)]
#[command(about = "Shows which processes are generating network traffic", long_about = None)]
struct Args {
    /// Refresh interval in seconds (1 to 60)
    #[arg(short, long, value_name = "SECONDS",
          value_parser = clap::value_parser!(u64).range(MIN_REFRESH_SECS..=MAX_REFRESH_SECS))]
    refresh: Option<u64>,

    /// Traffic to attribute: a (all), s (sent) or r (received)
    #[arg(short, long, value_name = "a|s|r", value_parser = parse_capture)]
    capture: Option<CaptureDirection>,

    /// Sort order: a (ascending) or d (descending)
    #[arg(short, long, value_name = "a|d", value_parser = parse_order)]
    order: Option<SortOrder>,

    /// Hide processes without traffic in the last window
    #[arg(long)]
    filter_zero: bool,

    /// Show the TCP/UDP share of each host
    #[arg(long)]
    tcp_udp_split: bool,

    /// Don't resolve host names
    #[arg(short, long)]
    no_resolve: bool,

    /// Append undetermined and unmapped packets to this file
    #[arg(short, long, value_name = "FILE")]
    async_log_file: Option<PathBuf>,

    /// Max host rows per process, 0 for no limit
    #[arg(short, long, value_name = "ROWS")]
    limit_hosts_rows: Option<usize>,

    /// Capture device
    #[arg(short = 'i', long, value_name = "DEVICE")]
    device: Option<String>,

    /// Save the effective settings as the new defaults
    #[arg(long)]
    save_settings: bool,
}

impl Args {
    /// Flags win over the settings file
    fn apply(&self, settings: &mut Settings) {
        if let Some(refresh) = self.refresh {
            settings.refresh_secs = refresh;
        }
        if let Some(capture) = self.capture {
            settings.capture = capture;
        }
        if let Some(order) = self.order {
            settings.order = order;
        }
        settings.filter_zero |= self.filter_zero;
        settings.tcp_udp_split |= self.tcp_udp_split;
        settings.no_resolve |= self.no_resolve;
        if let Some(path) = &self.async_log_file {
            settings.async_log_file = Some(path.clone());
        }
        if let Some(rows) = self.limit_hosts_rows {
            settings.limit_hosts_rows = rows;
        }
        if let Some(device) = &self.device {
            settings.device = device.clone();
        }
        settings.clamp();
    }
}

fn parse_capture(s: &str) -> Result<CaptureDirection, String> {
    match s {
        "a" => Ok(CaptureDirection::Both),
        "s" => Ok(CaptureDirection::Send),
        "r" => Ok(CaptureDirection::Recv),
        _ => Err(format!("invalid capture mode '{}', expected a, s or r", s)),
    }
}

fn parse_order(s: &str) -> Result<SortOrder, String> {
    match s {
        "a" => Ok(SortOrder::Ascending),
        "d" => Ok(SortOrder::Descending),
        _ => Err(format!("invalid order '{}', expected a or d", s)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::formatted_builder()
            .parse_default_env()
            .init();
    }

    let mut settings = Settings::load().unwrap_or_else(|e| {
        log::warn!("Failed to load settings, using defaults: {:#}", e);
        Settings::default()
    });
    args.apply(&mut settings);

    if args.save_settings {
        let path = settings.save()?;
        println!("Saved settings to {}", path.display());
    }

    if !nix::unistd::Uid::effective().is_root() {
        log::warn!("Not running as root, packet capture needs CAP_NET_RAW");
    }

    // Everything that can fail on setup happens before the terminal is taken over
    let backend = select_capture_backend(&settings.device)
        .with_context(|| format!("Failed to start capture on {}", settings.device))?;
    let proc_source = ProcfsSource::new()?;
    let local_addrs = LocalAddrs::from_interfaces();

    let resolver: Arc<dyn NameResolver> = if settings.no_resolve {
        Arc::new(NumericResolver)
    } else {
        Arc::new(CachingResolver::spawn().context("Failed to start name resolver")?)
    };

    let (sink, mut logger): (Arc<dyn EventSink>, Option<AsyncLogger>) =
        match &settings.async_log_file {
            Some(path) => {
                let events = Arc::new(HandoffQueue::<LogEvent>::new());
                let logger = AsyncLogger::spawn(path, Arc::clone(&events), Arc::clone(&resolver))?;
                (events as Arc<dyn EventSink>, Some(logger))
            }
            None => (Arc::new(NullSink) as Arc<dyn EventSink>, None),
        };

    let mut monitor = NetworkMonitor::new(
        &settings,
        backend,
        Box::new(proc_source),
        local_addrs,
        sink,
    )?;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let mut app = AppState::new(&settings, resolver);
    let res = until_shutdown(
        run_app(&mut terminal, &mut app, &mut monitor, settings.refresh_secs),
        shutdown_signal(),
    )
    .await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    let stopped = monitor.shutdown();
    if let Some(logger) = logger.as_mut() {
        logger.stop();
    }

    res?;
    stopped
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() -> Result<()> {
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for SIGINT"),
        _ = terminate.recv() => Ok(()),
    }
}

/// Run `app` until it returns or `shutdown` fires, whichever is first.
async fn until_shutdown(
    app: impl Future<Output = Result<()>>,
    shutdown: impl Future<Output = Result<()>>,
) -> Result<()> {
    tokio::select! {
        res = app => res,
        res = shutdown => {
            log::info!("Shutdown signal received");
            res
        }
    }
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut AppState,
    monitor: &mut NetworkMonitor,
    refresh_secs: u64,
) -> Result<()> {
    let mut update_interval = interval(Duration::from_secs(refresh_secs));
    // The first tick completes immediately; the first report should cover a full window
    update_interval.tick().await;

    loop {
        terminal.draw(|f| ui::draw_ui(f, app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                // If help is shown, any key closes it
                if app.show_help {
                    app.show_help = false;
                    continue;
                }

                match keybindings::action_for(&key) {
                    Some(Action::Quit) => return Ok(()),
                    Some(Action::TogglePause) => {
                        monitor.toggle_pause();
                        app.paused = monitor.is_paused();
                    }
                    Some(Action::ToggleHelp) => app.show_help = true,
                    None => {}
                }
            }
        }

        if tokio::time::timeout(Duration::from_millis(1), update_interval.tick())
            .await
            .is_ok()
        {
            let report = monitor.refresh()?;
            app.update(report);
        }
    }
}
