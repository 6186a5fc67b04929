use crate::address::Address;
use crate::handoff::HandoffQueue;
use crate::inventory::{EndpointDescriptor, EndpointIndex};
use crate::local_addr::LocalAddrs;
use crate::packet::{PacketRecord, Protocol};
use crate::process::{CycleStats, ProcessTrafficStats};
use crate::resolver::NameResolver;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which traffic direction gets attributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CaptureDirection {
    Send,
    Recv,
    #[default]
    Both,
}

impl CaptureDirection {
    pub fn captures_send(&self) -> bool {
        matches!(self, CaptureDirection::Send | CaptureDirection::Both)
    }

    pub fn captures_recv(&self) -> bool {
        matches!(self, CaptureDirection::Recv | CaptureDirection::Both)
    }
}

/// Why a packet could not be attributed to a real process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// Both or neither endpoint is local
    Undetermined,
    /// Received on a local endpoint no process owns
    UnmappedRecv,
    /// Sent from a local endpoint no process owns
    UnmappedSend,
}

impl LogKind {
    pub fn tag(&self) -> &'static str {
        match self {
            LogKind::Undetermined => "UNDET  ",
            LogKind::UnmappedRecv => "UNMAP_R",
            LogKind::UnmappedSend => "UNMAP_S",
        }
    }
}

/// A packet worth logging, stamped with the time it was classified
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub kind: LogKind,
    pub packet: PacketRecord,
    pub at: DateTime<Local>,
}

impl LogEvent {
    pub fn new(kind: LogKind, packet: PacketRecord) -> Self {
        Self {
            kind,
            packet,
            at: Local::now(),
        }
    }

    /// `KIND   :src:port --> dst:port`, names going through `resolver`
    pub fn describe(&self, resolver: Option<&dyn NameResolver>) -> String {
        format!(
            "{}:{}:{} --> {}:{}",
            self.kind.tag(),
            self.packet.src.to_display_string(resolver),
            self.packet.src_port,
            self.packet.dst.to_display_string(resolver),
            self.packet.dst_port
        )
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe(None))
    }
}

/// Destination for log-worthy packets; must not block the caller
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LogEvent);
}

impl EventSink for HandoffQueue<LogEvent> {
    fn emit(&self, event: LogEvent) {
        self.push(event);
    }
}

/// Sink that drops every event
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: LogEvent) {}
}

/// Attribute a batch of packets and aggregate per process and remote host.
///
/// The result has one entry per index slot (kernel first), including
/// processes that saw no traffic this cycle.
pub fn attribute(
    packets: &[PacketRecord],
    local: &LocalAddrs,
    index: &EndpointIndex,
    direction: CaptureDirection,
    sink: &dyn EventSink,
    cycle: &mut CycleStats,
) -> Vec<ProcessTrafficStats> {
    let mut out: Vec<ProcessTrafficStats> = index
        .owners()
        .iter()
        .map(|(pid, cmd)| ProcessTrafficStats::new(*pid, cmd.clone()))
        .collect();

    for packet in packets {
        cycle.observe_ts(packet.ts);

        // self traffic never leaves the host
        if packet.src == packet.dst {
            continue;
        }

        let is_recv = local.is_local(&packet.dst);
        let is_sent = local.is_local(&packet.src);
        if is_recv == is_sent {
            sink.emit(LogEvent::new(LogKind::Undetermined, packet.clone()));
            cycle.undet_pkts += 1;
            continue;
        }

        if is_recv && direction.captures_recv() {
            let slot = match resolve(index, packet.dst, packet.dst_port, packet.protocol) {
                Some(slot) => slot,
                None => {
                    sink.emit(LogEvent::new(LogKind::UnmappedRecv, packet.clone()));
                    cycle.unmap_recv_pkts += 1;
                    EndpointIndex::KERNEL_SLOT
                }
            };
            add_received(&mut out[slot], packet);
        } else if is_sent && direction.captures_send() {
            let slot = match resolve(index, packet.src, packet.src_port, packet.protocol) {
                Some(slot) => slot,
                None => {
                    sink.emit(LogEvent::new(LogKind::UnmappedSend, packet.clone()));
                    cycle.unmap_send_pkts += 1;
                    EndpointIndex::KERNEL_SLOT
                }
            };
            add_sent(&mut out[slot], packet);
        } else {
            continue;
        }

        cycle.proc_pkts += 1;
    }

    out
}

/// Exact endpoint first, then the wildcard address of the same family.
fn resolve(index: &EndpointIndex, addr: Address, port: u16, protocol: Protocol) -> Option<usize> {
    index
        .lookup(&EndpointDescriptor::new(addr, port, protocol))
        .or_else(|| {
            index.lookup(&EndpointDescriptor::new(
                Address::any(addr.family()),
                port,
                protocol,
            ))
        })
}

fn add_received(stats: &mut ProcessTrafficStats, packet: &PacketRecord) {
    let len = u64::from(packet.len);
    stats.total_recv += len;
    let host = stats.hosts.entry(packet.src).or_default();
    host.recv += len;
    host.add_protocol(packet.protocol, len);
}

fn add_sent(stats: &mut ProcessTrafficStats, packet: &PacketRecord) {
    let len = u64::from(packet.len);
    stats.total_sent += len;
    let host = stats.hosts.entry(packet.dst).or_default();
    host.sent += len;
    host.add_protocol(packet.protocol, len);
}
