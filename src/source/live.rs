//! RTSP live feed engine.
//!
//! Network stream decoders buffer frames internally, so a naive single read
//! returns whatever has been sitting in the buffer, not what the camera sees
//! now. This engine keeps a "freshest frame" view of the stream instead:
//!
//! - on connect it pre-flushes the decoder buffer, then starts a background
//!   freshness task that keeps pulling frames at a fixed cadence and
//!   publishes the latest decode into a single shared slot
//! - `acquire_frame` serves a snapshot of that slot when it is recent enough
//!   (the fast path, no I/O), and otherwise falls back to an aggressive
//!   flush-and-read on the calling context
//! - a stalled feed is reopened transparently, with a bounded attempt budget
//!
//! The controlling context is the sole writer of the engine state and the
//! sole caller of connect/acquire/disconnect; the background task is the sole
//! writer of the published frame. The task signals a stall through a shared
//! flag and exits; the controller observes the flag on the next call and
//! performs the state transition itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::stream::VideoStream;
use super::{AcquireError, ConnectError, FrameSource};
use crate::frame::Frame;

/// Frames discarded right after opening the stream so the first acquisition
/// never sees pre-connect buffer contents.
const WARMUP_FLUSH_FRAMES: usize = 5;
/// Frames aggressively discarded before direct reads on the fallback path.
const FALLBACK_FLUSH_FRAMES: usize = 15;
/// Direct read attempts on the fallback path.
const DIRECT_READ_ATTEMPTS: u32 = 3;
/// Delay between direct read attempts.
const DIRECT_READ_DELAY: Duration = Duration::from_millis(200);
/// Freshness task cadence: a fixed sleep between cycles (~30 per second),
/// not a wall-clock-locked frame rate.
const REFRESH_INTERVAL: Duration = Duration::from_millis(33);
/// How old a published frame may be and still satisfy the fast path.
/// Deliberately decoupled from the cadence: a few missed task cycles force a
/// direct pull instead of serving stale pixels.
const FRESH_FRAME_MAX_AGE: Duration = Duration::from_millis(200);
/// Consecutive failed task cycles before the feed counts as stalled.
const WORKER_STALL_THRESHOLD: u32 = 30;
/// Reopen attempts in one reconnect cycle before the engine fails.
const RECONNECT_ATTEMPTS: u32 = 3;
/// Delay between reopen attempts.
const RECONNECT_DELAY: Duration = Duration::from_millis(500);
/// Bounded wait for the freshness task to exit on disconnect. A task that
/// does not stop in time is detached; shutdown never hangs on it.
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Engine lifecycle state. Written only by the controlling context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Disconnected,
    Connecting,
    Live,
    Reconnecting,
    /// Terminal for the session: acquisition fails until `connect()` is
    /// called again.
    Failed,
}

/// Attempt budgets and delays. Fixed for callers; unit tests shrink them.
#[derive(Debug, Clone)]
pub(crate) struct Tunables {
    pub(crate) warmup_flush_frames: usize,
    pub(crate) fallback_flush_frames: usize,
    pub(crate) direct_read_attempts: u32,
    pub(crate) direct_read_delay: Duration,
    pub(crate) refresh_interval: Duration,
    pub(crate) fresh_frame_max_age: Duration,
    pub(crate) worker_stall_threshold: u32,
    pub(crate) reconnect_attempts: u32,
    pub(crate) reconnect_delay: Duration,
    pub(crate) worker_stop_timeout: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            warmup_flush_frames: WARMUP_FLUSH_FRAMES,
            fallback_flush_frames: FALLBACK_FLUSH_FRAMES,
            direct_read_attempts: DIRECT_READ_ATTEMPTS,
            direct_read_delay: DIRECT_READ_DELAY,
            refresh_interval: REFRESH_INTERVAL,
            fresh_frame_max_age: FRESH_FRAME_MAX_AGE,
            worker_stall_threshold: WORKER_STALL_THRESHOLD,
            reconnect_attempts: RECONNECT_ATTEMPTS,
            reconnect_delay: RECONNECT_DELAY,
            worker_stop_timeout: WORKER_STOP_TIMEOUT,
        }
    }
}

/// Latest decoded frame plus the instant it was published.
struct FreshFrame {
    frame: Frame,
    published_at: Instant,
}

/// Handle to the running freshness task.
struct Worker {
    stop: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
    done_rx: Receiver<()>,
    join: Option<JoinHandle<()>>,
}

/// Live network feed with a background freshness task.
pub struct LiveFeedEngine {
    url: String,
    tunables: Tunables,
    state: EngineState,
    stream: Option<Arc<Mutex<VideoStream>>>,
    fresh: Arc<Mutex<Option<FreshFrame>>>,
    worker: Option<Worker>,
}

impl LiveFeedEngine {
    pub fn new(url: &str) -> Self {
        Self::with_tunables(url, Tunables::default())
    }

    pub(crate) fn with_tunables(url: &str, tunables: Tunables) -> Self {
        Self {
            url: url.to_string(),
            tunables,
            state: EngineState::Disconnected,
            stream: None,
            fresh: Arc::new(Mutex::new(None)),
            worker: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Open the stream, pre-flush the decoder buffer, and start the
    /// freshness task. Idempotent while the feed is live and healthy.
    pub fn connect(&mut self) -> Result<(), ConnectError> {
        if self.state == EngineState::Live && !self.worker_stalled() {
            return Ok(());
        }
        self.teardown();
        self.state = EngineState::Connecting;

        let mut stream = match VideoStream::open(&self.url) {
            Ok(stream) => stream,
            Err(e) => {
                self.state = EngineState::Disconnected;
                return Err(e);
            }
        };
        for _ in 0..self.tunables.warmup_flush_frames {
            if let Err(e) = stream.discard_frame() {
                log::debug!("warm-up discard failed: {:#}", e);
                break;
            }
        }

        let stream = Arc::new(Mutex::new(stream));
        self.stream = Some(Arc::clone(&stream));
        self.spawn_worker(stream);
        self.state = EngineState::Live;
        log::info!("live feed connected: {}", self.url);
        Ok(())
    }

    /// Return the freshest available frame.
    ///
    /// Fast path: a recently published frame is cloned and returned with no
    /// I/O on the calling context. Fallback: aggressive flush plus a bounded
    /// number of direct reads, then exactly one reconnect cycle and one final
    /// read. The fallback runs to completion on the calling context; it is
    /// never retried indefinitely.
    pub fn acquire_frame(&mut self) -> Result<Option<Frame>, AcquireError> {
        match self.state {
            EngineState::Disconnected | EngineState::Connecting => {
                return Err(AcquireError::NotConnected)
            }
            EngineState::Failed => return Err(AcquireError::Failed),
            EngineState::Live | EngineState::Reconnecting => {}
        }

        if self.worker_stalled() {
            log::warn!("freshness task reported a stalled feed; reconnecting");
            self.state = EngineState::Reconnecting;
            self.reconnect()?;
        }

        if let Some(frame) = self.fresh_snapshot() {
            return Ok(Some(frame));
        }

        if let Some(frame) = self.direct_pull(
            self.tunables.fallback_flush_frames,
            self.tunables.direct_read_attempts,
        ) {
            return Ok(Some(frame));
        }

        log::warn!("direct reads exhausted; performing one reconnect cycle");
        self.state = EngineState::Reconnecting;
        self.reconnect()?;
        if let Some(frame) = self.direct_pull(0, 1) {
            return Ok(Some(frame));
        }
        Err(AcquireError::Exhausted)
    }

    /// Stop the freshness task (bounded wait), release the stream handle,
    /// and clear the published frame. Reachable from every state.
    pub fn disconnect(&mut self) {
        if self.state != EngineState::Disconnected {
            log::info!("disconnecting live feed: {}", self.url);
        }
        self.teardown();
        self.state = EngineState::Disconnected;
    }

    /// Snapshot of the published frame, if one exists and is recent enough.
    fn fresh_snapshot(&self) -> Option<Frame> {
        let guard = lock(&self.fresh);
        let fresh = guard.as_ref()?;
        if fresh.published_at.elapsed() <= self.tunables.fresh_frame_max_age {
            Some(fresh.frame.clone())
        } else {
            None
        }
    }

    /// Blocking pull on the calling context: discard `flush` buffered frames,
    /// then try up to `attempts` direct reads with short delays between them.
    fn direct_pull(&self, flush: usize, attempts: u32) -> Option<Frame> {
        let stream = Arc::clone(self.stream.as_ref()?);
        let mut stream = lock(&stream);
        for _ in 0..flush {
            if stream.discard_frame().is_err() {
                break;
            }
        }
        for attempt in 1..=attempts {
            match stream.read_frame() {
                Ok(Some((bgr, width, height))) => {
                    return Some(Frame::from_bgr8(bgr, width, height));
                }
                Ok(None) => log::debug!("direct read attempt {} returned no frame", attempt),
                Err(e) => log::debug!("direct read attempt {} failed: {:#}", attempt, e),
            }
            if attempt < attempts {
                std::thread::sleep(self.tunables.direct_read_delay);
            }
        }
        None
    }

    /// One reconnect cycle: full teardown, then a bounded number of reopen
    /// attempts. Ends `Live` on success, `Failed` once the budget is spent.
    fn reconnect(&mut self) -> Result<(), AcquireError> {
        self.teardown();
        for attempt in 1..=self.tunables.reconnect_attempts {
            match self.connect() {
                Ok(()) => {
                    log::info!("live feed reopened after {} attempt(s)", attempt);
                    return Ok(());
                }
                Err(e) => log::warn!(
                    "reconnect attempt {}/{} failed: {:#}",
                    attempt,
                    self.tunables.reconnect_attempts,
                    e
                ),
            }
            if attempt < self.tunables.reconnect_attempts {
                std::thread::sleep(self.tunables.reconnect_delay);
            }
        }
        self.state = EngineState::Failed;
        Err(AcquireError::Failed)
    }

    fn worker_stalled(&self) -> bool {
        match &self.worker {
            Some(worker) => {
                worker.stalled.load(Ordering::Relaxed)
                    || worker
                        .join
                        .as_ref()
                        .map(|join| join.is_finished())
                        .unwrap_or(true)
            }
            None => true,
        }
    }

    fn spawn_worker(&mut self, stream: Arc<Mutex<VideoStream>>) {
        let stop = Arc::new(AtomicBool::new(false));
        let stalled = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel();
        let fresh = Arc::clone(&self.fresh);
        let tunables = self.tunables.clone();
        let join = {
            let stop = Arc::clone(&stop);
            let stalled = Arc::clone(&stalled);
            std::thread::spawn(move || {
                freshness_loop(stream, fresh, stop, stalled, tunables);
                let _ = done_tx.send(());
            })
        };
        self.worker = Some(Worker {
            stop,
            stalled,
            done_rx,
            join: Some(join),
        });
    }

    /// Stop the freshness task and release the stream handle. The wait for
    /// the task is bounded; a non-responsive task is detached rather than
    /// allowed to hang shutdown, and the stream closes when it finally drops
    /// its reference.
    fn teardown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Relaxed);
            match worker.done_rx.recv_timeout(self.tunables.worker_stop_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if let Some(join) = worker.join.take() {
                        let _ = join.join();
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "freshness task did not stop within {:?}; detaching",
                        self.tunables.worker_stop_timeout
                    );
                }
            }
        }
        self.stream = None;
        *lock(&self.fresh) = None;
    }
}

impl Drop for LiveFeedEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl FrameSource for LiveFeedEngine {
    fn connect(&mut self) -> Result<(), ConnectError> {
        LiveFeedEngine::connect(self)
    }

    fn acquire_frame(&mut self) -> Result<Option<Frame>, AcquireError> {
        LiveFeedEngine::acquire_frame(self)
    }

    fn disconnect(&mut self) {
        LiveFeedEngine::disconnect(self)
    }
}

/// Background freshness task.
///
/// Discard-then-decode one frame per cycle on a fixed sleep, publish every
/// successful decode over the previous one, and leave the previous frame in
/// place on failure. After enough consecutive failures the task raises the
/// stalled flag and exits; the controller reconnects and starts a new task.
fn freshness_loop(
    stream: Arc<Mutex<VideoStream>>,
    fresh: Arc<Mutex<Option<FreshFrame>>>,
    stop: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
    tunables: Tunables,
) {
    let mut consecutive_failures = 0u32;
    while !stop.load(Ordering::Relaxed) {
        let decoded = {
            let mut stream = lock(&stream);
            // Drain one buffered frame so the decode that follows is as
            // close to live as the transport allows.
            let _ = stream.discard_frame();
            stream.read_frame()
        };
        match decoded {
            Ok(Some((bgr, width, height))) => {
                consecutive_failures = 0;
                let frame = Frame::from_bgr8(bgr, width, height);
                *lock(&fresh) = Some(FreshFrame {
                    frame,
                    published_at: Instant::now(),
                });
            }
            Ok(None) | Err(_) => {
                if let Err(e) = &decoded {
                    log::debug!("freshness read failed: {:#}", e);
                }
                consecutive_failures += 1;
                if consecutive_failures >= tunables.worker_stall_threshold {
                    log::warn!(
                        "feed stalled after {} consecutive failed reads",
                        consecutive_failures
                    );
                    stalled.store(true, Ordering::Relaxed);
                    return;
                }
            }
        }
        std::thread::sleep(tunables.refresh_interval);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
