// Access to the kernel's process and socket tables
//
// The inventory only talks to a `ProcSource`, so it can be built from the
// live /proc filesystem or from a fixed snapshot.

use crate::packet::Protocol;
use anyhow::Result;

mod procfs;

pub use self::procfs::ProcfsSource;

/// One of the kernel socket tables under /proc/net
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketTable {
    Tcp,
    Udp,
    Tcp6,
    Udp6,
}

impl SocketTable {
    /// Scan order used when building the inventory
    pub const ALL: [SocketTable; 4] = [
        SocketTable::Tcp,
        SocketTable::Udp,
        SocketTable::Tcp6,
        SocketTable::Udp6,
    ];

    pub fn protocol(&self) -> Protocol {
        match self {
            SocketTable::Tcp | SocketTable::Tcp6 => Protocol::Tcp,
            SocketTable::Udp | SocketTable::Udp6 => Protocol::Udp,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            SocketTable::Tcp => "/proc/net/tcp",
            SocketTable::Udp => "/proc/net/udp",
            SocketTable::Tcp6 => "/proc/net/tcp6",
            SocketTable::Udp6 => "/proc/net/udp6",
        }
    }
}

/// Source of process and socket information
pub trait ProcSource: Send + Sync {
    /// Source name (e.g., "procfs")
    fn name(&self) -> &'static str;

    /// Raw text of a socket table
    fn socket_table(&self, table: SocketTable) -> Result<String>;

    /// All process ids; failing here is fatal for the inventory build
    fn pids(&self) -> Result<Vec<i32>>;

    /// Inodes of the sockets `pid` holds open
    fn socket_inodes(&self, pid: i32) -> Result<Vec<u64>>;

    /// Display command line of `pid`
    fn cmdline(&self, pid: i32) -> Result<String>;
}
