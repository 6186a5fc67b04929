/// Failures that stop the capture subsystem.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("cannot open capture device {device}: {reason}")]
    Open { device: String, reason: String },
    #[error("link type {found} not supported, only LINUX_SLL ({expected}) is")]
    UnsupportedLinkType { found: i32, expected: i32 },
    #[error("capture read failed: {0}")]
    Read(String),
}

/// Failures that abort a single inventory build.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("cannot enumerate the process table: {0}")]
    ProcessTable(String),
    #[error("invalid hex network address: \"{0}\"")]
    InvalidAddress(String),
}
