//! Reassembly of deliveries that span several Transfer frames.

use bytes::{Bytes, BytesMut};

use crate::protocol::{DeliveryState, ReceiverSettleMode};

/// A delivery whose first Transfer has arrived on a receiving link.
#[derive(Debug)]
pub struct DeliveryAssembly {
    pub delivery_id: u32,
    pub tag: Bytes,
    /// Sender settled the delivery on transfer.
    pub settled: bool,
    pub settle_mode: ReceiverSettleMode,
    /// Latest state carried by a Transfer of this delivery.
    pub state: Option<DeliveryState>,
    chunks: Vec<Bytes>,
    size: u64,
    /// The delivery was refused; the remaining frames are dropped.
    discarding: bool,
}

impl DeliveryAssembly {
    pub fn new(
        delivery_id: u32,
        tag: Bytes,
        settled: bool,
        settle_mode: ReceiverSettleMode,
        state: Option<DeliveryState>,
    ) -> Self {
        Self {
            delivery_id,
            tag,
            settled,
            settle_mode,
            state,
            chunks: Vec::new(),
            size: 0,
            discarding: false,
        }
    }

    /// Append one frame's payload.
    pub fn push(&mut self, payload: Bytes) {
        if self.discarding || payload.is_empty() {
            return;
        }
        self.size += payload.len() as u64;
        self.chunks.push(payload);
    }

    /// Bytes accumulated so far.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Drop what was accumulated and ignore the rest of the delivery.
    pub fn discard(&mut self) {
        self.discarding = true;
        self.chunks.clear();
    }

    /// The complete message. A single-frame delivery is not copied.
    pub fn into_payload(self) -> Bytes {
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks.into_iter().next().unwrap_or_default(),
            _ => {
                let mut buf = BytesMut::with_capacity(self.size as usize);
                for chunk in &self.chunks {
                    buf.extend_from_slice(chunk);
                }
                buf.freeze()
            }
        }
    }
}
