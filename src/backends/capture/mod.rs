use crate::handoff::{FrameCounter, HandoffQueue};
use crate::packet::{Frame, PacketRecord, decode_frame};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

#[cfg(feature = "capture-pcap")]
pub mod pcap;

/// Upper bound on frames read by one `dispatch_once` call
pub const MAX_DISPATCH_BATCH: usize = 1024;

/// Packet capture backend trait
pub trait CaptureBackend: Send {
    /// Backend name (e.g., "pcap")
    fn name(&self) -> &'static str;

    /// Read one bounded batch of frames and hand the decoded records over.
    ///
    /// Returns the number of raw frames seen. Must return within the
    /// backend's read timeout when no traffic arrives.
    fn dispatch_once(
        &mut self,
        queue: &HandoffQueue<PacketRecord>,
        counter: &FrameCounter,
    ) -> Result<usize>;
}

/// Frames decoded during one dispatch, published in a single step.
#[derive(Debug, Default)]
pub struct DispatchBatch {
    records: Vec<PacketRecord>,
    seen: usize,
}

impl DispatchBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the frame and keep its record if it decodes.
    pub fn push_frame(&mut self, frame: &Frame<'_>) {
        self.seen += 1;
        if let Some(record) = decode_frame(frame) {
            self.records.push(record);
        }
    }

    /// Raw frames pushed so far, decoded or not
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Publish the records and the frame count. Returns the frames seen.
    pub fn flush(self, queue: &HandoffQueue<PacketRecord>, counter: &FrameCounter) -> usize {
        queue.push_many(self.records);
        counter.add(self.seen as u64);
        self.seen
    }
}

/// Dispatch until `stop` is set or the backend fails.
pub fn run(
    backend: &mut dyn CaptureBackend,
    queue: &HandoffQueue<PacketRecord>,
    counter: &FrameCounter,
    stop: &AtomicBool,
) -> Result<()> {
    while !stop.load(Ordering::Relaxed) {
        backend.dispatch_once(queue, counter)?;
    }
    log::debug!("Capture backend {} stopped", backend.name());
    Ok(())
}

/// Capture backend running on its own thread
pub struct CaptureThread {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<Result<()>>>,
}

impl CaptureThread {
    pub fn spawn(
        mut backend: Box<dyn CaptureBackend>,
        queue: Arc<HandoffQueue<PacketRecord>>,
        counter: Arc<FrameCounter>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("nettop-capture".into())
                .spawn(move || {
                    let result = run(backend.as_mut(), &queue, &counter, &stop);
                    if let Err(e) = &result {
                        log::error!("Capture thread failed: {:#}", e);
                    }
                    result
                })
                .context("Failed to spawn capture thread")?
        };

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Whether the thread has exited on its own
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Signal the thread and wait for it, returning its error if it failed.
    pub fn stop(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow::anyhow!("Capture thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Create a capture backend by name for `device`
pub fn create_capture_backend(name: &str, device: &str) -> Result<Box<dyn CaptureBackend>> {
    match name {
        #[cfg(feature = "capture-pcap")]
        "pcap" => Ok(Box::new(pcap::PcapCapture::open(device)?)),

        _ => {
            let _ = device;
            Err(anyhow::anyhow!("Unknown capture backend: {}", name))
        }
    }
}

/// Open the default capture backend
pub fn select_capture_backend(device: &str) -> Result<Box<dyn CaptureBackend>> {
    #[cfg(feature = "capture-pcap")]
    {
        create_capture_backend("pcap", device)
    }

    #[cfg(not(feature = "capture-pcap"))]
    {
        let _ = device;
        Err(anyhow::anyhow!("No capture backend compiled in"))
    }
}
