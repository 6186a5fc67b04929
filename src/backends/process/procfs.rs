use super::{ProcSource, SocketTable};
use crate::error::InventoryError;
use anyhow::{Context, Result};
use procfs::process::{FDTarget, Process, all_processes};

/// Process source backed by the live /proc filesystem
///
/// This backend reads:
/// - /proc/net/{tcp,udp,tcp6,udp6} - socket tables, as raw text
/// - /proc/[pid]/fd/ - socket inodes
/// - /proc/[pid]/cmdline - command lines
pub struct ProcfsSource;

impl ProcfsSource {
    pub fn new() -> Result<Self> {
        if !Self::is_available() {
            anyhow::bail!("procfs not available (is /proc mounted?)");
        }
        Ok(Self)
    }

    pub fn is_available() -> bool {
        std::path::Path::new("/proc/net/tcp").exists()
    }
}

impl ProcSource for ProcfsSource {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn socket_table(&self, table: SocketTable) -> Result<String> {
        std::fs::read_to_string(table.path())
            .with_context(|| format!("Failed to read {}", table.path()))
    }

    fn pids(&self) -> Result<Vec<i32>> {
        let all_procs =
            all_processes().map_err(|e| InventoryError::ProcessTable(e.to_string()))?;

        let mut pids: Vec<i32> = all_procs
            .filter_map(|proc_result| proc_result.ok())
            .map(|process| process.pid())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn socket_inodes(&self, pid: i32) -> Result<Vec<u64>> {
        let process = Process::new(pid)?;
        let inodes = process
            .fd()?
            .filter_map(|fd_result| fd_result.ok())
            .filter_map(|fd_info| match fd_info.target {
                FDTarget::Socket(inode) => Some(inode),
                _ => None,
            })
            .collect();
        Ok(inodes)
    }

    fn cmdline(&self, pid: i32) -> Result<String> {
        let process = Process::new(pid)?;
        let args = process.cmdline()?;
        if args.is_empty() {
            // kernel threads have no argv, show the name like ps does
            let stat = process.stat()?;
            return Ok(format!("[{}]", stat.comm));
        }
        Ok(args.join(" "))
    }
}
