//! Handing frames from the capture thread to a consumer

use crate::frame::Frame;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives frames on the capture thread.
///
/// `deliver` runs on the capture thread and should return quickly; UI work
/// belongs on the UI thread behind a [`LatestFrame`] or a queue.
pub trait FrameSink: Send + 'static {
    fn deliver(&mut self, frame: Frame);
}

impl<F> FrameSink for F
where
    F: FnMut(Frame) + Send + 'static,
{
    fn deliver(&mut self, frame: Frame) {
        self(frame)
    }
}

/// Wake-up hook run after each delivery, e.g. a UI repaint request
pub type Notify = Box<dyn Fn() + Send + Sync>;

struct Slot {
    frame: Mutex<Option<Frame>>,
    dropped: AtomicU64,
}

/// Create a single-slot mailbox that only keeps the newest frame.
///
/// A frame the consumer has not taken yet is replaced by the next one, so a
/// slow consumer never builds a backlog.
pub fn latest_frame(notify: impl Fn() + Send + Sync + 'static) -> (LatestFrameSender, LatestFrame) {
    let slot = Arc::new(Slot {
        frame: Mutex::new(None),
        dropped: AtomicU64::new(0),
    });
    (
        LatestFrameSender {
            slot: slot.clone(),
            notify: Box::new(notify),
        },
        LatestFrame { slot },
    )
}

/// Producer half of [`latest_frame`]
pub struct LatestFrameSender {
    slot: Arc<Slot>,
    notify: Notify,
}

impl FrameSink for LatestFrameSender {
    fn deliver(&mut self, frame: Frame) {
        let replaced = self.slot.frame.lock().replace(frame);
        if replaced.is_some() {
            self.slot.dropped.fetch_add(1, Ordering::Relaxed);
        }
        (self.notify)();
    }
}

/// Consumer half of [`latest_frame`]
#[derive(Clone)]
pub struct LatestFrame {
    slot: Arc<Slot>,
}

impl LatestFrame {
    /// Take the newest undelivered frame, if any
    pub fn take(&self) -> Option<Frame> {
        self.slot.frame.lock().take()
    }

    /// Frames replaced before the consumer took them
    pub fn dropped(&self) -> u64 {
        self.slot.dropped.load(Ordering::Relaxed)
    }
}

/// Create an ordered, unbounded frame queue. Nothing is dropped.
pub fn frame_queue() -> (FrameQueueSender, Receiver<Frame>) {
    let (tx, rx) = unbounded();
    (FrameQueueSender { tx }, rx)
}

/// Producer half of [`frame_queue`]
pub struct FrameQueueSender {
    tx: Sender<Frame>,
}

impl FrameSink for FrameQueueSender {
    fn deliver(&mut self, frame: Frame) {
        if self.tx.send(frame).is_err() {
            log::trace!("frame queue receiver dropped, discarding frame");
        }
    }
}
