use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::broadcast::domain::subscriber::{DeliveryError, Subscriber};

/// Hub-side end of a bounded per-viewer queue.
///
/// Delivery never blocks: a full queue is reported as backpressure and the
/// frame is skipped for this viewer only.
pub struct ChannelSubscriber {
    tx: crossbeam_channel::Sender<Arc<[u8]>>,
    open: Arc<AtomicBool>,
}

/// Transport-side end: the frames waiting to be written to one viewer.
pub struct OutboundFrames {
    rx: crossbeam_channel::Receiver<Arc<[u8]>>,
    open: Arc<AtomicBool>,
}

impl ChannelSubscriber {
    pub fn new(capacity: usize) -> (ChannelSubscriber, OutboundFrames) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let open = Arc::new(AtomicBool::new(true));
        (
            ChannelSubscriber {
                tx,
                open: Arc::clone(&open),
            },
            OutboundFrames { rx, open },
        )
    }
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, frame: &Arc<[u8]>) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::Closed);
        }
        self.tx
            .try_send(Arc::clone(frame))
            .map_err(|e| match e {
                crossbeam_channel::TrySendError::Full(_) => DeliveryError::Backpressure,
                crossbeam_channel::TrySendError::Disconnected(_) => DeliveryError::Closed,
            })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl OutboundFrames {
    /// Next queued frame, if any, without waiting.
    pub fn try_next(&self) -> Option<Arc<[u8]>> {
        self.rx.try_recv().ok()
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Marks the viewer gone; the hub drops it on its next publish.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
