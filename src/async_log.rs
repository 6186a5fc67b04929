use crate::attribution::LogEvent;
use crate::handoff::HandoffQueue;
use crate::resolver::NameResolver;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const FLUSH_INTERVAL: Duration = Duration::from_millis(250);
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Appends queued events to a file every `FLUSH_INTERVAL`
pub struct AsyncLogger {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl AsyncLogger {
    pub fn spawn(
        path: &Path,
        queue: Arc<HandoffQueue<LogEvent>>,
        resolver: Arc<dyn NameResolver>,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Can't open file {:?} to write async log", path))?;
        let mut out = BufWriter::new(file);
        writeln!(out, "Log opened/appended")
            .and_then(|_| out.flush())
            .with_context(|| format!("Failed to write async log {:?}", path))?;

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("nettop-async-log".into())
                .spawn(move || {
                    let mut failed = false;
                    loop {
                        let stopping = stop.load(Ordering::Relaxed);
                        if let Err(e) = write_pending(&mut out, &queue, resolver.as_ref()) {
                            if !failed {
                                log::warn!("Async log write failed: {}", e);
                            }
                            failed = true;
                        }
                        if stopping {
                            break;
                        }
                        thread::sleep(FLUSH_INTERVAL);
                    }
                })
                .context("Failed to spawn async log thread")?
        };

        log::info!("Logging unattributed packets to {:?}", path);
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Write whatever is still queued and join the writer thread
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AsyncLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_pending<W: Write>(
    out: &mut W,
    queue: &HandoffQueue<LogEvent>,
    resolver: &dyn NameResolver,
) -> io::Result<()> {
    let events = queue.drain();
    if events.is_empty() {
        return Ok(());
    }
    for event in &events {
        writeln!(out, "{}", format_line(event, resolver))?;
    }
    out.flush()
}

fn format_line(event: &LogEvent, resolver: &dyn NameResolver) -> String {
    format!(
        "{} {}",
        event.at.format(TIMESTAMP_FORMAT),
        event.describe(Some(resolver))
    )
}
