use super::{CaptureBackend, DispatchBatch, MAX_DISPATCH_BATCH};
use crate::error::CaptureError;
use crate::handoff::{FrameCounter, HandoffQueue};
use crate::packet::{Frame, PacketRecord};
use anyhow::Result;
use pcap::{Active, Capture, Linktype};

const SNAPLEN: i32 = 65535;
// Only bounds a read in immediate mode. Buffered TPACKET_V3 reads wait for a
// block to fill, which never happens on an idle device, and the stop flag is
// only checked between reads.
const READ_TIMEOUT_MS: i32 = 250;

/// Live capture through libpcap. Needs CAP_NET_RAW or root.
pub struct PcapCapture {
    cap: Capture<Active>,
}

impl PcapCapture {
    /// Open `device` ("any" for every interface) in non-promiscuous mode.
    pub fn open(device: &str) -> Result<Self> {
        let open_error = |e: pcap::Error| CaptureError::Open {
            device: device.to_string(),
            reason: e.to_string(),
        };

        let cap = Capture::from_device(device)
            .map_err(open_error)?
            .promisc(false)
            .snaplen(SNAPLEN)
            .timeout(READ_TIMEOUT_MS)
            .immediate_mode(true)
            .open()
            .map_err(open_error)?;

        let link = cap.get_datalink();
        if link != Linktype::LINUX_SLL {
            return Err(CaptureError::UnsupportedLinkType {
                found: link.0,
                expected: Linktype::LINUX_SLL.0,
            }
            .into());
        }

        log::info!(
            "Capturing on {} (link type {})",
            device,
            link.get_name().unwrap_or_else(|_| link.0.to_string())
        );

        Ok(Self { cap })
    }
}

impl CaptureBackend for PcapCapture {
    fn name(&self) -> &'static str {
        "pcap"
    }

    fn dispatch_once(
        &mut self,
        queue: &HandoffQueue<PacketRecord>,
        counter: &FrameCounter,
    ) -> Result<usize> {
        let mut batch = DispatchBatch::new();

        while batch.seen() < MAX_DISPATCH_BATCH {
            match self.cap.next_packet() {
                Ok(packet) => {
                    let ts = packet.header.ts.tv_sec as f64
                        + packet.header.ts.tv_usec as f64 / 1_000_000.0;
                    batch.push_frame(&Frame {
                        data: packet.data,
                        orig_len: packet.header.len,
                        ts,
                    });
                }
                Err(pcap::Error::TimeoutExpired) => break,
                Err(e) => {
                    batch.flush(queue, counter);
                    return Err(CaptureError::Read(e.to_string()).into());
                }
            }
        }

        Ok(batch.flush(queue, counter))
    }
}
