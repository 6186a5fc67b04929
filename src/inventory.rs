// Per-cycle inventory of processes and the local endpoints they own
//
// Built from scratch on every refresh: socket tables give inode -> local
// endpoint, process fd tables give pid -> inodes.

use crate::address::Address;
use crate::backends::process::{ProcSource, SocketTable};
use crate::error::InventoryError;
use crate::packet::Protocol;
use anyhow::Result;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

/// Pid of the pseudo-process that receives unattributable traffic
pub const KERNEL_PID: i32 = -1;
pub const KERNEL_CMD: &str = "(kernel)";
const NO_CMD_LINE: &str = "(no cmd line)";

/// A local socket endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointDescriptor {
    pub addr: Address,
    pub port: u16,
    pub protocol: Protocol,
}

impl EndpointDescriptor {
    pub fn new(addr: Address, port: u16, protocol: Protocol) -> Self {
        Self {
            addr,
            port,
            protocol,
        }
    }
}

// port, then protocol, then address
impl Ord for EndpointDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.port
            .cmp(&other.port)
            .then(self.protocol.cmp(&other.protocol))
            .then(self.addr.cmp(&other.addr))
    }
}

impl PartialOrd for EndpointDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A process and the endpoints it owned when the inventory was built.
///
/// Identity is the pid alone.
#[derive(Debug, Clone)]
pub struct ProcessDescriptor {
    pub pid: i32,
    pub cmd: String,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl ProcessDescriptor {
    pub fn kernel() -> Self {
        Self {
            pid: KERNEL_PID,
            cmd: KERNEL_CMD.to_string(),
            endpoints: Vec::new(),
        }
    }
}

impl PartialEq for ProcessDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.pid == other.pid
    }
}

impl Eq for ProcessDescriptor {}

impl Hash for ProcessDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pid.hash(state);
    }
}

impl Ord for ProcessDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pid.cmp(&other.pid)
    }
}

impl PartialOrd for ProcessDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The fields of a socket table row the inventory cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketRow {
    pub local: Address,
    pub local_port: u16,
    pub remote: Address,
    pub remote_port: u16,
    pub inode: u64,
}

/// Parse one row of a /proc/net/{tcp,udp}[6] table:
///
/// ```text
///   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
///    0: 0100007F:0035 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 15850 1 ...
/// ```
///
/// Rows that do not fit the column layout (the header, blank lines) give
/// `Ok(None)`. An address field that is not 8 or 32 hex digits is an error.
pub fn parse_socket_row(line: &str) -> Result<Option<SocketRow>, InventoryError> {
    let cols: Vec<&str> = line.split_whitespace().collect();
    if cols.len() < 10 {
        return Ok(None);
    }

    let slot_ok = cols[0]
        .strip_suffix(':')
        .is_some_and(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()));
    if !slot_ok {
        return Ok(None);
    }

    let Some((local_hex, local_port)) = split_endpoint(cols[1]) else {
        return Ok(None);
    };
    let Some((remote_hex, remote_port)) = split_endpoint(cols[2]) else {
        return Ok(None);
    };
    let Ok(inode) = cols[9].parse::<u64>() else {
        return Ok(None);
    };

    Ok(Some(SocketRow {
        local: Address::parse_proc_hex(local_hex)?,
        local_port,
        remote: Address::parse_proc_hex(remote_hex)?,
        remote_port,
        inode,
    }))
}

fn split_endpoint(field: &str) -> Option<(&str, u16)> {
    let (addr, port) = field.split_once(':')?;
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some((addr, u16::from_str_radix(port, 16).ok()?))
}

/// Phase A: map socket inode to the local endpoint it is bound to.
///
/// Within one table only the first row per local port is kept.
pub fn collect_endpoints(source: &dyn ProcSource) -> Result<HashMap<u64, EndpointDescriptor>> {
    let mut by_inode = HashMap::new();

    for table in SocketTable::ALL {
        let text = match source.socket_table(table) {
            Ok(text) => text,
            Err(e) => {
                log::debug!("Skipping {:?} socket table: {:#}", table, e);
                continue;
            }
        };

        let mut ports = HashSet::new();
        for line in text.lines() {
            let Some(row) = parse_socket_row(line)? else {
                continue;
            };
            if !ports.insert(row.local_port) {
                continue;
            }
            by_inode.insert(
                row.inode,
                EndpointDescriptor::new(row.local, row.local_port, table.protocol()),
            );
        }
    }

    Ok(by_inode)
}

/// Processes owning at least one known local endpoint, in pid order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    processes: Vec<ProcessDescriptor>,
}

impl Inventory {
    pub fn build(source: &dyn ProcSource) -> Result<Self> {
        let by_inode = collect_endpoints(source)?;

        let mut pids = source.pids()?;
        pids.sort_unstable();
        pids.dedup();

        let mut processes = Vec::new();
        for pid in pids {
            // the process may have exited since it was listed
            let Ok(mut inodes) = source.socket_inodes(pid) else {
                continue;
            };
            inodes.sort_unstable();

            let mut endpoints: Vec<EndpointDescriptor> = inodes
                .iter()
                .filter_map(|inode| by_inode.get(inode).copied())
                .collect();
            if endpoints.is_empty() {
                continue;
            }
            endpoints.sort();

            let cmd = source
                .cmdline(pid)
                .map(|cmd| sanitize_cmdline(&cmd))
                .unwrap_or_else(|_| NO_CMD_LINE.to_string());

            processes.push(ProcessDescriptor {
                pid,
                cmd,
                endpoints,
            });
        }

        log::debug!(
            "Inventory: {} processes, {} socket endpoints",
            processes.len(),
            by_inode.len()
        );

        Ok(Self { processes })
    }

    pub fn processes(&self) -> &[ProcessDescriptor] {
        &self.processes
    }

    /// Reverse index from endpoint to owning process.
    ///
    /// When several processes hold the same endpoint the lowest pid keeps
    /// it. The kernel pseudo-process always occupies slot 0.
    pub fn endpoint_index(&self) -> EndpointIndex {
        let kernel = ProcessDescriptor::kernel();
        let mut owners = vec![(kernel.pid, kernel.cmd)];
        let mut by_endpoint = HashMap::new();

        for process in &self.processes {
            let slot = owners.len();
            owners.push((process.pid, process.cmd.clone()));
            for endpoint in &process.endpoints {
                by_endpoint.entry(*endpoint).or_insert(slot);
            }
        }

        EndpointIndex {
            owners,
            by_endpoint,
        }
    }
}

fn sanitize_cmdline(raw: &str) -> String {
    raw.replace('\0', " ").trim_end().to_string()
}

/// Endpoint to process lookup used during attribution
#[derive(Debug, Clone)]
pub struct EndpointIndex {
    owners: Vec<(i32, String)>,
    by_endpoint: HashMap<EndpointDescriptor, usize>,
}

impl EndpointIndex {
    pub const KERNEL_SLOT: usize = 0;

    pub fn lookup(&self, endpoint: &EndpointDescriptor) -> Option<usize> {
        self.by_endpoint.get(endpoint).copied()
    }

    /// (pid, command) of every slot, kernel first
    pub fn owners(&self) -> &[(i32, String)] {
        &self.owners
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::BTreeMap;

    /// In-memory snapshot of /proc
    #[derive(Default)]
    pub(crate) struct SnapshotSource {
        pub tables: HashMap<SocketTable, String>,
        pub processes: BTreeMap<i32, (Vec<u64>, String)>,
        pub vanished: Vec<i32>,
        /// Make `pids()` fail like an unreadable /proc
        pub no_process_table: bool,
    }

    impl SnapshotSource {
        pub fn table(mut self, table: SocketTable, rows: &[impl AsRef<str>]) -> Self {
            let mut text = String::from(
                "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n",
            );
            for row in rows {
                text.push_str(row.as_ref());
                text.push('\n');
            }
            self.tables.insert(table, text);
            self
        }

        pub fn process(mut self, pid: i32, inodes: &[u64], cmd: &str) -> Self {
            self.processes.insert(pid, (inodes.to_vec(), cmd.to_string()));
            self
        }
    }

    impl ProcSource for SnapshotSource {
        fn name(&self) -> &'static str {
            "snapshot"
        }

        fn socket_table(&self, table: SocketTable) -> Result<String> {
            self.tables
                .get(&table)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no {:?} table", table))
        }

        fn pids(&self) -> Result<Vec<i32>> {
            if self.no_process_table {
                return Err(InventoryError::ProcessTable("permission denied".into()).into());
            }
            Ok(self
                .processes
                .keys()
                .chain(self.vanished.iter())
                .copied()
                .collect())
        }

        fn socket_inodes(&self, pid: i32) -> Result<Vec<u64>> {
            self.processes
                .get(&pid)
                .map(|(inodes, _)| inodes.clone())
                .ok_or_else(|| anyhow::anyhow!("pid {} is gone", pid))
        }

        fn cmdline(&self, pid: i32) -> Result<String> {
            self.processes
                .get(&pid)
                .map(|(_, cmd)| cmd.clone())
                .ok_or_else(|| anyhow::anyhow!("pid {} is gone", pid))
        }
    }

    /// A socket table row in kernel format
    pub fn row(slot: u32, local: &str, local_port: u16, inode: u64) -> String {
        format!(
            "{slot:4}: {local}:{local_port:04X} 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 {inode} 1 0000000000000000 100 0 0 10 0"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{SnapshotSource, row};
    use super::*;
    use crate::address::Family;

    fn v4(s: &str) -> Address {
        Address::from(s.parse::<std::net::IpAddr>().unwrap())
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn test_parse_socket_row() {
        let line = "   6: 0800A8C0:7199 24F63F4E:7CFC 01 00000000:00000000 00:00000000 00000000  1000        0 203505 1 0000000000000000 26 4 8 10 -1";
        let row = parse_socket_row(line).unwrap().unwrap();
        assert_eq!(row.local, v4("192.168.0.8"));
        assert_eq!(row.local_port, 0x7199);
        assert_eq!(row.remote, v4("78.63.246.36"));
        assert_eq!(row.remote_port, 0x7CFC);
        assert_eq!(row.inode, 203505);
    }

    #[test]
    fn test_non_rows_are_skipped() {
        let header = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode";
        assert_eq!(parse_socket_row(header).unwrap(), None);
        assert_eq!(parse_socket_row("").unwrap(), None);
        assert_eq!(parse_socket_row("   0: 0100007F:0035").unwrap(), None);

        let bad_port = "   0: 0100007F:ZZ35 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 15850 1";
        assert_eq!(parse_socket_row(bad_port).unwrap(), None);
    }

    #[test]
    fn test_bad_address_field_is_fatal() {
        let line = "   0: 0100007F00:0035 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 15850 1";
        assert!(matches!(
            parse_socket_row(line),
            Err(InventoryError::InvalidAddress(_))
        ));

        let source = SnapshotSource::default().table(SocketTable::Tcp, &[line]);
        let err = Inventory::build(&source).unwrap_err();
        assert!(err.downcast_ref::<InventoryError>().is_some());
    }

    #[test]
    fn test_first_row_per_port_wins() {
        let source = SnapshotSource::default().table(
            SocketTable::Tcp,
            &[
                &row(0, "0100007F", 80, 100),
                &row(1, "00000000", 80, 101),
                &row(2, "00000000", 22, 102),
            ],
        );
        let by_inode = collect_endpoints(&source).unwrap();
        assert!(by_inode.contains_key(&100));
        assert!(!by_inode.contains_key(&101));
        assert_eq!(by_inode[&102].port, 22);
        assert_eq!(by_inode[&102].protocol, Protocol::Tcp);
    }

    #[test]
    fn test_same_port_in_other_table_is_kept() {
        let source = SnapshotSource::default()
            .table(SocketTable::Tcp, &[&row(0, "00000000", 53, 1)])
            .table(SocketTable::Udp, &[&row(0, "00000000", 53, 2)]);
        let by_inode = collect_endpoints(&source).unwrap();
        assert_eq!(by_inode[&1].protocol, Protocol::Tcp);
        assert_eq!(by_inode[&2].protocol, Protocol::Udp);
    }

    fn sample_source() -> SnapshotSource {
        SnapshotSource::default()
            .table(
                SocketTable::Tcp,
                &[&row(0, "0100007F", 5000, 10), &row(1, "00000000", 80, 11)],
            )
            .table(SocketTable::Udp6, &[&row(0, &"0".repeat(32), 53, 12)])
            .process(42, &[11, 10, 999], "curl\0http://x\0")
            .process(7, &[12], "resolver")
            .process(8, &[555], "no-known-sockets")
    }

    #[test]
    fn test_build_inventory() {
        let mut source = sample_source();
        source.vanished.push(4242);
        let inventory = Inventory::build(&source).unwrap();

        let pids: Vec<i32> = inventory.processes().iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![7, 42]);

        let curl = &inventory.processes()[1];
        assert_eq!(curl.cmd, "curl http://x");
        let ports: Vec<u16> = curl.endpoints.iter().map(|e| e.port).collect();
        assert_eq!(ports, vec![80, 5000]);

        let resolver = &inventory.processes()[0];
        assert_eq!(resolver.endpoints[0].addr, Address::any(Family::V6));
        assert_eq!(resolver.endpoints[0].protocol, Protocol::Udp);
    }

    #[test]
    fn test_process_table_failure_is_fatal() {
        let mut source = sample_source();
        source.no_process_table = true;
        let err = Inventory::build(&source).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InventoryError>(),
            Some(InventoryError::ProcessTable(_))
        ));
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let source = sample_source();
        let flatten = |inv: &Inventory| -> Vec<(i32, String, Vec<EndpointDescriptor>)> {
            inv.processes()
                .iter()
                .map(|p| (p.pid, p.cmd.clone(), p.endpoints.clone()))
                .collect()
        };
        let first = Inventory::build(&source).unwrap();
        let second = Inventory::build(&source).unwrap();
        assert_eq!(first, second);
        assert_eq!(flatten(&first), flatten(&second));
    }

    #[test]
    fn test_endpoint_index_first_claim_wins() {
        let source = SnapshotSource::default()
            .table(SocketTable::Tcp, &[&row(0, "00000000", 8080, 20)])
            .process(30, &[20], "worker")
            .process(10, &[20], "parent");
        let inventory = Inventory::build(&source).unwrap();
        let index = inventory.endpoint_index();

        let endpoint = EndpointDescriptor::new(Address::any(Family::V4), 8080, Protocol::Tcp);
        let slot = index.lookup(&endpoint).unwrap();
        assert_eq!(index.owners()[slot].0, 10);
        assert_eq!(index.owners()[EndpointIndex::KERNEL_SLOT].0, KERNEL_PID);
    }

    #[test]
    fn test_endpoint_ordering() {
        let a = EndpointDescriptor::new(v4("10.0.0.9"), 80, Protocol::Udp);
        let b = EndpointDescriptor::new(v4("10.0.0.1"), 443, Protocol::Tcp);
        let c = EndpointDescriptor::new(v4("10.0.0.1"), 80, Protocol::Udp);
        let d = EndpointDescriptor::new(v4("10.0.0.1"), 80, Protocol::Tcp);
        let mut all = vec![a, b, c, d];
        all.sort();
        assert_eq!(all, vec![d, c, a, b]);
    }

    #[test]
    fn test_process_identity_is_pid() {
        let a = ProcessDescriptor {
            pid: 5,
            cmd: "a".into(),
            endpoints: vec![],
        };
        let b = ProcessDescriptor {
            pid: 5,
            cmd: "b".into(),
            endpoints: vec![],
        };
        assert_eq!(a, b);
        assert!(ProcessDescriptor::kernel() < a);
    }
}
