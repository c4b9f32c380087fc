//! Capture loop: polls a frame source on a fixed cadence from a background
//! thread and delivers frames to a sink

use crate::config::CaptureConfig;
use crate::delivery::FrameSink;
use crate::source::FrameSource;
use crate::{CaptureError, CaptureResult, CaptureTarget};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Why a capture loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called or the loop was dropped
    Requested,
    /// The captured window was closed or hidden
    TargetGone,
}

/// Counters for a running or finished loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_delivered: u64,
    pub failed_ticks: u64,
    pub panicked_ticks: u64,
}

#[derive(Default)]
struct Shared {
    frames_delivered: AtomicU64,
    failed_ticks: AtomicU64,
    panicked_ticks: AtomicU64,
    last_error: Mutex<Option<String>>,
    stop_reason: Mutex<Option<StopReason>>,
}

/// Single-use capture loop.
///
/// Runs until [`stop`](Self::stop) is called, the loop is dropped, or the
/// target window goes away. A stopped loop cannot be restarted; create a new
/// one for a new target.
pub struct CaptureLoop {
    target: CaptureTarget,
    running: Arc<AtomicBool>,
    shared: Arc<Shared>,
    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureLoop {
    /// Spawn the capture thread
    pub fn start<S, K>(source: S, target: CaptureTarget, config: CaptureConfig, sink: K) -> CaptureResult<Self>
    where
        S: FrameSource + 'static,
        K: FrameSink,
    {
        if let CaptureTarget::Region(rect) = target {
            CaptureTarget::region(rect)?;
        }

        let running = Arc::new(AtomicBool::new(true));
        let shared = Arc::new(Shared::default());
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let worker = Worker {
            source,
            sink,
            target,
            interval: config.interval,
            error_backoff: config.error_backoff,
            running: running.clone(),
            shared: shared.clone(),
            stop_rx,
            failure_streak: 0,
        };

        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker.run())?;

        log::info!("capture started for {:?} every {:?}", target, config.interval);

        Ok(Self {
            target,
            running,
            shared,
            stop_tx: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop the loop and wait for the capture thread to exit.
    ///
    /// After this returns the sink receives no further frames. Calling it
    /// again is a no-op. Called from inside the sink it only requests the
    /// stop, since the thread cannot join itself.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let mut reason = self.shared.stop_reason.lock();
            if reason.is_none() {
                *reason = Some(StopReason::Requested);
            }
        }

        // Disconnecting wakes the loop out of its wait
        drop(self.stop_tx.lock().take());

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("capture thread panicked outside the tick guard");
            }
            log::info!("capture stopped for {:?}", self.target);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn target(&self) -> &CaptureTarget {
        &self.target
    }

    /// Set once the loop has ended
    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.shared.stop_reason.lock()
    }

    /// Message of the most recent failed tick
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            frames_delivered: self.shared.frames_delivered.load(Ordering::Relaxed),
            failed_ticks: self.shared.failed_ticks.load(Ordering::Relaxed),
            panicked_ticks: self.shared.panicked_ticks.load(Ordering::Relaxed),
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Tick {
    Delivered,
    Skipped,
    TargetGone,
}

struct Worker<S, K> {
    source: S,
    sink: K,
    target: CaptureTarget,
    interval: Duration,
    error_backoff: Duration,
    running: Arc<AtomicBool>,
    shared: Arc<Shared>,
    stop_rx: Receiver<()>,
    failure_streak: u64,
}

impl<S: FrameSource, K: FrameSink> Worker<S, K> {
    fn run(mut self) {
        while self.running.load(Ordering::SeqCst) {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.tick()));

            let wait = match outcome {
                Ok(Tick::Delivered) | Ok(Tick::Skipped) => self.interval,
                Ok(Tick::TargetGone) => {
                    log::info!("capture target {:?} is gone, ending stream", self.target);
                    self.finish(StopReason::TargetGone);
                    break;
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log::error!("capture tick panicked: {}; backing off", message);
                    self.shared.panicked_ticks.fetch_add(1, Ordering::Relaxed);
                    *self.shared.last_error.lock() = Some(format!("panic: {}", message));
                    self.error_backoff
                }
            };

            if self.wait_for_stop(wait) {
                break;
            }
        }
    }

    fn tick(&mut self) -> Tick {
        if self.target.is_window() && !self.source.target_exists(&self.target) {
            return Tick::TargetGone;
        }

        match self.source.grab(&self.target) {
            Ok(frame) => {
                if self.failure_streak > 0 {
                    log::debug!("capture recovered after {} failed ticks", self.failure_streak);
                    self.failure_streak = 0;
                }
                if !self.running.load(Ordering::SeqCst) {
                    return Tick::Skipped;
                }
                self.sink.deliver(frame);
                self.shared.frames_delivered.fetch_add(1, Ordering::Relaxed);
                Tick::Delivered
            }
            Err(CaptureError::TargetGone) => Tick::TargetGone,
            Err(e) => {
                self.record_failure(&e);
                Tick::Skipped
            }
        }
    }

    fn record_failure(&mut self, err: &CaptureError) {
        self.failure_streak += 1;
        if self.failure_streak == 1 {
            log::warn!("capture of {:?} failed: {}", self.target, err);
        } else {
            log::debug!("capture of {:?} failed ({} in a row): {}", self.target, self.failure_streak, err);
        }
        self.shared.failed_ticks.fetch_add(1, Ordering::Relaxed);
        *self.shared.last_error.lock() = Some(err.to_string());
    }

    fn finish(&self, reason: StopReason) {
        self.running.store(false, Ordering::SeqCst);
        let mut stop_reason = self.shared.stop_reason.lock();
        if stop_reason.is_none() {
            *stop_reason = Some(reason);
        }
    }

    /// Sleep for `wait`, returning early with `true` once a stop is requested
    fn wait_for_stop(&self, wait: Duration) -> bool {
        match self.stop_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => !self.running.load(Ordering::SeqCst),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::frame_queue;
    use crate::frame::{Frame, FrameOrigin};
    use crate::source::tests::{FakeDesktop, FakeWindow};
    use crate::source::Grabber;
    use crate::Rect;
    use std::time::Instant;

    fn fast_config() -> CaptureConfig {
        CaptureConfig::default()
            .with_interval(Duration::from_millis(5))
            .with_error_backoff(Duration::from_millis(20))
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    /// Source whose behaviour per tick is scripted; the frame's first byte
    /// is the tick number
    struct ScriptedSource {
        ticks: Arc<AtomicU64>,
        script: Box<dyn FnMut(u64) -> CaptureResult<()> + Send>,
        alive: Arc<AtomicBool>,
        grab_delay: Duration,
    }

    impl ScriptedSource {
        fn new(script: impl FnMut(u64) -> CaptureResult<()> + Send + 'static) -> Self {
            Self {
                ticks: Arc::new(AtomicU64::new(0)),
                script: Box::new(script),
                alive: Arc::new(AtomicBool::new(true)),
                grab_delay: Duration::ZERO,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn target_exists(&self, _target: &CaptureTarget) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn grab(&mut self, _target: &CaptureTarget) -> CaptureResult<Frame> {
            let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
            if !self.grab_delay.is_zero() {
                thread::sleep(self.grab_delay);
            }
            (self.script)(tick)?;
            Frame::from_rgb(1, 1, vec![tick as u8, 0, 0], FrameOrigin::Region)
        }
    }

    fn region() -> CaptureTarget {
        CaptureTarget::region(Rect::new(0, 0, 1, 1)).unwrap()
    }

    #[test]
    fn frames_arrive_in_capture_order() {
        let (tx, rx) = frame_queue();
        let capture = CaptureLoop::start(ScriptedSource::new(|_| Ok(())), region(), fast_config(), tx).unwrap();

        assert!(wait_until(Duration::from_secs(2), || rx.len() >= 5));
        capture.stop();

        let markers: Vec<u8> = rx.try_iter().map(|f| f.data()[0]).collect();
        assert!(markers.len() >= 5);
        assert!(markers.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", markers);
        assert_eq!(capture.stop_reason(), Some(StopReason::Requested));
    }

    #[test]
    fn decode_failure_does_not_stop_the_next_tick() {
        let (tx, rx) = frame_queue();
        let source = ScriptedSource::new(|tick| {
            if tick == 0 {
                Err(CaptureError::DecodeFailure("bad buffer".into()))
            } else {
                Ok(())
            }
        });
        let capture = CaptureLoop::start(source, region(), fast_config(), tx).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        capture.stop();

        assert_eq!(first.data()[0], 1);
        assert!(capture.stats().failed_ticks >= 1);
        assert!(capture.last_error().unwrap().contains("bad buffer"));
    }

    #[test]
    fn transient_failures_keep_the_loop_running() {
        let (tx, rx) = frame_queue();
        let source = ScriptedSource::new(|tick| {
            if tick % 2 == 0 {
                Err(CaptureError::TransientCaptureFailure("GetDC failed".into()))
            } else {
                Err(CaptureError::InvalidGeometry { width: 0, height: 0 })
            }
        });
        let capture = CaptureLoop::start(source, region(), fast_config(), tx).unwrap();

        assert!(wait_until(Duration::from_secs(2), || capture.stats().failed_ticks >= 4));
        assert!(capture.is_running());
        capture.stop();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_window_ends_the_loop() {
        let (tx, rx) = frame_queue();
        let source = ScriptedSource::new(|_| Ok(()));
        let alive = source.alive.clone();
        let capture = CaptureLoop::start(source, CaptureTarget::window(0x42), fast_config(), tx).unwrap();

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        alive.store(false, Ordering::SeqCst);

        assert!(wait_until(Duration::from_secs(1), || !capture.is_running()));
        assert_eq!(capture.stop_reason(), Some(StopReason::TargetGone));

        let delivered = capture.stats().frames_delivered;
        while rx.try_recv().is_ok() {}
        thread::sleep(Duration::from_millis(30));
        assert!(rx.try_recv().is_err());
        assert_eq!(capture.stats().frames_delivered, delivered);

        // Stopping an already finished loop is fine and keeps the reason
        capture.stop();
        assert_eq!(capture.stop_reason(), Some(StopReason::TargetGone));
    }

    #[test]
    fn window_closed_during_grab_ends_the_loop() {
        let mut desktop = FakeDesktop::default();
        desktop.windows.insert(
            7,
            FakeWindow {
                rect: Rect::new(0, 0, 4, 4),
                content_bgrx: [1, 2, 3, 0],
                visible: false,
                z: 0,
            },
        );
        let (tx, rx) = frame_queue();
        let capture = CaptureLoop::start(Grabber::new(desktop), CaptureTarget::window(7), fast_config(), tx).unwrap();

        assert!(wait_until(Duration::from_secs(1), || !capture.is_running()));
        assert_eq!(capture.stop_reason(), Some(StopReason::TargetGone));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn panicking_tick_backs_off_and_recovers() {
        let (tx, rx) = frame_queue();
        let source = ScriptedSource::new(|tick| {
            if tick == 0 {
                panic!("driver exploded");
            }
            Ok(())
        });
        let started = Instant::now();
        let capture = CaptureLoop::start(source, region(), fast_config(), tx).unwrap();

        let frame = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
        capture.stop();

        assert_eq!(frame.data()[0], 1);
        assert_eq!(capture.stats().panicked_ticks, 1);
    }

    #[test]
    fn stop_is_idempotent() {
        let (tx, _rx) = frame_queue();
        let capture = CaptureLoop::start(ScriptedSource::new(|_| Ok(())), region(), fast_config(), tx).unwrap();

        capture.stop();
        assert!(!capture.is_running());

        let again = Instant::now();
        capture.stop();
        assert!(again.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn stop_does_not_wait_for_the_interval() {
        let (tx, rx) = frame_queue();
        let config = fast_config().with_interval(Duration::from_secs(30));
        let capture = CaptureLoop::start(ScriptedSource::new(|_| Ok(())), region(), config, tx).unwrap();

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let stopping = Instant::now();
        capture.stop();
        assert!(stopping.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn no_delivery_after_immediate_stop() {
        let delivered_after_stop = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));
        let (flag, done) = (delivered_after_stop.clone(), stopped.clone());

        let mut source = ScriptedSource::new(|_| Ok(()));
        source.grab_delay = Duration::from_millis(20);
        let capture = CaptureLoop::start(source, region(), fast_config(), move |_frame: Frame| {
            if done.load(Ordering::SeqCst) {
                flag.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();

        capture.stop();
        stopped.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(60));

        assert!(!delivered_after_stop.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_from_inside_the_sink_does_not_deadlock() {
        let slot: Arc<Mutex<Option<Arc<CaptureLoop>>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let capture = Arc::new(
            CaptureLoop::start(ScriptedSource::new(|_| Ok(())), region(), fast_config(), move |_frame: Frame| {
                if let Some(capture) = inner.lock().as_ref() {
                    capture.stop();
                }
            })
            .unwrap(),
        );
        *slot.lock() = Some(capture.clone());

        assert!(wait_until(Duration::from_secs(2), || !capture.is_running()));
        slot.lock().take();
        capture.stop();
        assert_eq!(capture.stop_reason(), Some(StopReason::Requested));
    }

    #[test]
    fn empty_region_is_rejected_up_front() {
        let (tx, _rx) = frame_queue();
        let result = CaptureLoop::start(
            ScriptedSource::new(|_| Ok(())),
            CaptureTarget::Region(Rect::new(0, 0, 0, 5)),
            fast_config(),
            tx,
        );
        assert!(matches!(result, Err(CaptureError::InvalidGeometry { .. })));
    }
}
