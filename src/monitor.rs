use crate::attribution::{CaptureDirection, EventSink, attribute};
use crate::backends::capture::{CaptureBackend, CaptureThread};
use crate::backends::process::ProcSource;
use crate::config::Settings;
use crate::handoff::{FrameCounter, HandoffQueue};
use crate::inventory::Inventory;
use crate::local_addr::LocalAddrs;
use crate::packet::PacketRecord;
use crate::process::{CycleStats, ProcessTrafficStats};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of one refresh cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// One entry per process owning a socket, kernel first
    pub processes: Vec<ProcessTrafficStats>,
    pub cycle: CycleStats,
    /// Wall time since the previous refresh
    pub elapsed: Duration,
    /// Packets were discarded instead of attributed
    pub paused: bool,
}

/// Ties the capture thread to the per-cycle inventory and attribution.
pub struct NetworkMonitor {
    direction: CaptureDirection,
    packets: Arc<HandoffQueue<PacketRecord>>,
    frames: Arc<FrameCounter>,
    capture: CaptureThread,
    proc_source: Box<dyn ProcSource>,
    local_addrs: LocalAddrs,
    sink: Arc<dyn EventSink>,
    buffer: Vec<PacketRecord>,
    last_refresh: Instant,
    paused: bool,
}

impl NetworkMonitor {
    pub fn new(
        settings: &Settings,
        backend: Box<dyn CaptureBackend>,
        proc_source: Box<dyn ProcSource>,
        local_addrs: LocalAddrs,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let packets = Arc::new(HandoffQueue::new());
        let frames = Arc::new(FrameCounter::new());

        log::info!(
            "Starting capture backend {} with {} local address(es), process source {}",
            backend.name(),
            local_addrs.len(),
            proc_source.name()
        );
        let capture = CaptureThread::spawn(backend, Arc::clone(&packets), Arc::clone(&frames))?;

        Ok(Self {
            direction: settings.capture,
            packets,
            frames,
            capture,
            proc_source,
            local_addrs,
            sink,
            buffer: Vec::new(),
            last_refresh: Instant::now(),
            paused: false,
        })
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
        log::debug!("Monitor {}", if self.paused { "paused" } else { "resumed" });
    }

    /// Attribute everything captured since the previous refresh.
    ///
    /// The frame counter and the packet queue are read one after the other,
    /// so a batch published in between is counted in one cycle and
    /// attributed in the next.
    pub fn refresh(&mut self) -> Result<CycleReport> {
        if self.capture.is_finished() {
            self.capture.stop().context("Packet capture stopped")?;
            anyhow::bail!("Packet capture stopped");
        }

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refresh);
        self.last_refresh = now;

        self.buffer.clear();
        self.packets.drain_into(&mut self.buffer);
        let mut cycle = CycleStats {
            total_pkts: self.frames.take(),
            ..Default::default()
        };

        if self.paused {
            log::debug!("Paused, discarding {} packet(s)", self.buffer.len());
            self.buffer.clear();
            return Ok(CycleReport {
                processes: Vec::new(),
                cycle,
                elapsed,
                paused: true,
            });
        }

        let inventory = Inventory::build(self.proc_source.as_ref())
            .context("Failed to build process inventory")?;
        let index = inventory.endpoint_index();

        let processes = attribute(
            &self.buffer,
            &self.local_addrs,
            &index,
            self.direction,
            self.sink.as_ref(),
            &mut cycle,
        );
        self.buffer.clear();

        log::debug!(
            "Cycle: {} frames, {} attributed, {} undetermined, {}/{} unmapped recv/send, {} processes",
            cycle.total_pkts,
            cycle.proc_pkts,
            cycle.undet_pkts,
            cycle.unmap_recv_pkts,
            cycle.unmap_send_pkts,
            inventory.processes().len()
        );

        Ok(CycleReport {
            processes,
            cycle,
            elapsed,
            paused: false,
        })
    }

    /// Stop and join the capture thread
    pub fn shutdown(&mut self) -> Result<()> {
        self.capture.stop()
    }
}
