use crate::address::Address;
use crate::config::SortOrder;
use crate::packet::Protocol;
use std::collections::BTreeMap;
use std::time::Duration;

/// Traffic exchanged with one remote host during a cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostTraffic {
    pub recv: u64,
    pub sent: u64,
    pub tcp: u64,
    pub udp: u64,
}

impl HostTraffic {
    pub fn total(&self) -> u64 {
        self.recv + self.sent
    }

    pub(crate) fn add_protocol(&mut self, protocol: Protocol, len: u64) {
        match protocol {
            Protocol::Tcp => self.tcp += len,
            Protocol::Udp => self.udp += len,
        }
    }

    /// (tcp%, udp%) of this host's bytes, `None` with no traffic
    pub fn tcp_udp_split(&self) -> Option<(u8, u8)> {
        let total = self.tcp + self.udp;
        if total == 0 {
            return None;
        }
        let udp = (100 * self.udp / total) as u8;
        Some((100 - udp, udp))
    }
}

/// Per-process traffic for one refresh cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessTrafficStats {
    pub pid: i32,
    pub cmd: String,
    pub total_recv: u64,
    pub total_sent: u64,
    pub hosts: BTreeMap<Address, HostTraffic>,
}

impl ProcessTrafficStats {
    pub fn new(pid: i32, cmd: String) -> Self {
        Self {
            pid,
            cmd,
            total_recv: 0,
            total_sent: 0,
            hosts: BTreeMap::new(),
        }
    }

    pub fn total(&self) -> u64 {
        self.total_recv + self.total_sent
    }
}

/// Counters for one refresh cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleStats {
    /// Raw frames seen by the capture thread
    pub total_pkts: u64,
    pub proc_pkts: u64,
    pub undet_pkts: u64,
    pub unmap_recv_pkts: u64,
    pub unmap_send_pkts: u64,
    pub min_ts: Option<f64>,
    pub max_ts: Option<f64>,
}

impl CycleStats {
    pub(crate) fn observe_ts(&mut self, ts: f64) {
        self.min_ts = Some(self.min_ts.map_or(ts, |min| min.min(ts)));
        self.max_ts = Some(self.max_ts.map_or(ts, |max| max.max(ts)));
    }

    pub fn unattributed_pkts(&self) -> u64 {
        self.total_pkts.saturating_sub(self.proc_pkts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateUnit {
    Bytes,
    KiB,
    MiB,
    GiB,
}

impl RateUnit {
    pub fn label(&self) -> &'static str {
        match self {
            RateUnit::Bytes => "Byte/s",
            RateUnit::KiB => "KiB/s",
            RateUnit::MiB => "MiB/s",
            RateUnit::GiB => "GiB/s",
        }
    }
}

/// Convert a recv/sent byte pair observed over `elapsed` into rates that
/// share one unit, picked from the larger of the two.
pub fn format_rates(recv: u64, sent: u64, elapsed: Duration) -> (f64, f64, RateUnit) {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;

    let secs = elapsed.as_secs_f64();
    let factor = if secs > 0.0 { 1.0 / secs } else { 0.0 };
    let recv = recv as f64 * factor;
    let sent = sent as f64 * factor;
    let max = recv.max(sent);

    if max >= GIB {
        (recv / GIB, sent / GIB, RateUnit::GiB)
    } else if max >= MIB {
        (recv / MIB, sent / MIB, RateUnit::MiB)
    } else if max >= KIB {
        (recv / KIB, sent / KIB, RateUnit::KiB)
    } else {
        (recv, sent, RateUnit::Bytes)
    }
}

/// Display options read from the settings
#[derive(Debug, Clone, Copy)]
pub struct DisplayOptions {
    pub order: SortOrder,
    pub filter_zero: bool,
    /// 0 means no limit
    pub limit_hosts_rows: usize,
}

/// A process row ready for rendering
#[derive(Debug, Clone)]
pub struct ProcessView<'a> {
    pub stats: &'a ProcessTrafficStats,
    pub hosts: Vec<(&'a Address, &'a HostTraffic)>,
    /// Hosts left out by the row limit
    pub hidden_hosts: usize,
}

pub fn sort_and_filter<'a>(
    stats: &'a [ProcessTrafficStats],
    options: &DisplayOptions,
) -> Vec<ProcessView<'a>> {
    let mut views: Vec<ProcessView<'a>> = stats
        .iter()
        .filter(|s| !options.filter_zero || s.total() > 0)
        .map(|s| {
            let mut hosts: Vec<_> = s.hosts.iter().collect();
            hosts.sort_by(|a, b| options.order.compare(a.1.total(), b.1.total()));
            let hidden_hosts = match options.limit_hosts_rows {
                0 => 0,
                limit => hosts.len().saturating_sub(limit),
            };
            if hidden_hosts > 0 {
                hosts.truncate(options.limit_hosts_rows);
            }
            ProcessView {
                stats: s,
                hosts,
                hidden_hosts,
            }
        })
        .collect();

    views.sort_by(|a, b| options.order.compare(a.stats.total(), b.stats.total()));
    views
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(pid: i32, recv: u64, sent: u64, hosts: &[(u8, u64)]) -> ProcessTrafficStats {
        let mut s = ProcessTrafficStats::new(pid, format!("proc{pid}"));
        s.total_recv = recv;
        s.total_sent = sent;
        for &(last, bytes) in hosts {
            s.hosts.insert(
                Address::from_v4_bytes([10, 0, 0, last]),
                HostTraffic {
                    recv: bytes,
                    ..Default::default()
                },
            );
        }
        s
    }

    #[test]
    fn test_format_rates_units() {
        let sec = Duration::from_secs(1);
        assert_eq!(format_rates(100, 10, sec), (100.0, 10.0, RateUnit::Bytes));
        assert_eq!(format_rates(2048, 0, sec).2, RateUnit::KiB);
        assert_eq!(format_rates(0, 3 * 1024 * 1024, sec).2, RateUnit::MiB);
        assert_eq!(
            format_rates(2 * 1024 * 1024 * 1024, 0, sec),
            (2.0, 0.0, RateUnit::GiB)
        );
        // two seconds halves the rate
        assert_eq!(
            format_rates(2048, 1024, Duration::from_secs(2)),
            (1.0, 0.5, RateUnit::KiB)
        );
        assert_eq!(format_rates(100, 100, Duration::ZERO).0, 0.0);
    }

    #[test]
    fn test_tcp_udp_split() {
        let host = HostTraffic {
            tcp: 300,
            udp: 100,
            ..Default::default()
        };
        assert_eq!(host.tcp_udp_split(), Some((75, 25)));
        assert_eq!(HostTraffic::default().tcp_udp_split(), None);
    }

    #[test]
    fn test_observe_ts() {
        let mut cycle = CycleStats::default();
        cycle.observe_ts(5.0);
        cycle.observe_ts(2.0);
        cycle.observe_ts(9.5);
        assert_eq!(cycle.min_ts, Some(2.0));
        assert_eq!(cycle.max_ts, Some(9.5));
    }

    #[test]
    fn test_sort_filter_and_limit() {
        let all = vec![
            stats(1, 0, 0, &[]),
            stats(2, 500, 0, &[(1, 100), (2, 400)]),
            stats(3, 900, 100, &[(1, 10), (2, 20), (3, 970)]),
        ];

        let views = sort_and_filter(
            &all,
            &DisplayOptions {
                order: SortOrder::Descending,
                filter_zero: true,
                limit_hosts_rows: 2,
            },
        );
        let pids: Vec<i32> = views.iter().map(|v| v.stats.pid).collect();
        assert_eq!(pids, vec![3, 2]);
        assert_eq!(views[0].hosts.len(), 2);
        assert_eq!(views[0].hidden_hosts, 1);
        assert_eq!(views[0].hosts[0].1.recv, 970);
        assert_eq!(views[1].hidden_hosts, 0);

        let views = sort_and_filter(
            &all,
            &DisplayOptions {
                order: SortOrder::Ascending,
                filter_zero: false,
                limit_hosts_rows: 0,
            },
        );
        let pids: Vec<i32> = views.iter().map(|v| v.stats.pid).collect();
        assert_eq!(pids, vec![1, 2, 3]);
        assert_eq!(views[2].hosts.len(), 3);
        assert_eq!(views[2].hosts[0].1.recv, 10);
    }
}
