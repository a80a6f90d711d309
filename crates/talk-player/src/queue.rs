//! Bounded frame queue between the control thread and the device callback.
//!
//! - control thread → [`FrameQueue::enqueue`] (blocks while full: backpressure)
//! - device callback → [`FrameQueue::fill`] (never waits; underrun is silence)
//!
//! One [`Mutex`] guards the queue and one [`Condvar`] signals "a frame left the queue".
//! Flushes take the same mutex, so the callback never sees a half-replaced queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::frame::{DecodedAudioFrame, FrameSample, SampleLayout};

/// A queued frame plus how many of its leading sample-frames the device already played.
///
/// `0 <= consumed_samples <= frame.sample_count()`; the frame leaves the queue exactly when
/// the two are equal.
#[derive(Debug)]
pub struct BufferedFrame {
    frame: DecodedAudioFrame,
    consumed_samples: usize,
}

impl BufferedFrame {
    pub fn new(frame: DecodedAudioFrame) -> Self {
        Self {
            frame,
            consumed_samples: 0,
        }
    }

    pub fn frame(&self) -> &DecodedAudioFrame {
        &self.frame
    }

    pub fn consumed_samples(&self) -> usize {
        self.consumed_samples
    }

    pub fn remaining(&self) -> usize {
        self.frame.sample_count() - self.consumed_samples
    }

    fn is_consumed(&self) -> bool {
        self.consumed_samples == self.frame.sample_count()
    }
}

/// Counters updated by the device callback.
#[derive(Debug, Default)]
pub struct SinkStats {
    /// Sample-frames copied from decoded audio.
    pub played_frames: AtomicU64,
    /// Callbacks that ran out of audio before filling their buffer.
    pub underrun_events: AtomicU64,
    /// Sample-frames written as silence because of underruns.
    pub underrun_frames: AtomicU64,
    /// Frames queued after the last callback.
    pub buffered_frames: AtomicU64,
}

struct QueueInner {
    frames: VecDeque<BufferedFrame>,
    /// Frames the callback finished with. Dropped by the control thread so the callback
    /// never frees memory.
    retired: VecDeque<DecodedAudioFrame>,
    /// Bumped on every flush; a producer woken into a new generation drops its frame.
    generation: u64,
    closed: bool,
}

/// Bounded queue of decoded frames.
pub struct FrameQueue {
    channels: usize,
    max_queued_frames: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
    stats: SinkStats,
}

impl FrameQueue {
    /// Create a queue for interleaved frames of `channels` channels holding at most
    /// `max_queued_frames` frames.
    pub fn new(channels: usize, max_queued_frames: usize) -> Self {
        let max_queued_frames = max_queued_frames.max(1);
        Self {
            channels: channels.max(1),
            max_queued_frames,
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(max_queued_frames),
                retired: VecDeque::with_capacity(max_queued_frames + 1),
                generation: 0,
                closed: false,
            }),
            cv: Condvar::new(),
            stats: SinkStats::default(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn capacity(&self) -> usize {
        self.max_queued_frames
    }

    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }

    /// Frames currently queued (best-effort snapshot).
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // A panic while holding the lock leaves the deque itself consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append `frame`, blocking while the queue holds `capacity()` frames.
    ///
    /// Returns once the frame is queued, or once it has been dropped because the queue was
    /// flushed or closed while waiting. Must not be called from the device callback.
    pub fn enqueue(&self, frame: DecodedAudioFrame) {
        // Allocated before locking; the callback contends for the same mutex.
        let mut retired = VecDeque::with_capacity(self.max_queued_frames + 1);
        let mut g = self.lock();
        let generation = g.generation;

        while g.frames.len() >= self.max_queued_frames && !g.closed && g.generation == generation
        {
            g = self.cv.wait(g).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        // Swap in a list with spare capacity so the callback's pushes never allocate.
        if !g.retired.is_empty() {
            std::mem::swap(&mut g.retired, &mut retired);
        }

        if g.closed || g.generation != generation {
            drop(g);
            tracing::debug!(pts = %frame.pts(), "dropping frame enqueued across flush/close");
            drop(retired);
            return;
        }

        g.frames.push_back(BufferedFrame::new(frame));
        drop(g);
        drop(retired);
    }

    /// Copy queued audio into `out` without blocking; returns the sample-frames copied.
    ///
    /// This is the device callback body. Whatever the queue cannot cover is zero-filled.
    /// Frames whose sample type, layout or channel count cannot be copied verbatim are
    /// skipped (their span is silence).
    pub fn fill<T: FrameSample>(&self, out: &mut [T]) -> usize {
        let channels = self.channels;
        let wanted = out.len() / channels;
        let mut written = 0usize;
        let mut popped = false;

        let mut g = self.lock();
        while written < wanted {
            let Some(front) = g.frames.front_mut() else {
                break;
            };
            let copyable = front.frame.layout() == SampleLayout::Interleaved
                && front.frame.channels() == channels;
            let src = match T::slice(front.frame.samples()) {
                Some(src) if copyable => src,
                _ => {
                    retire_front(&mut g);
                    popped = true;
                    continue;
                }
            };

            let n = front.remaining().min(wanted - written);
            let from = front.consumed_samples * channels;
            let to = written * channels;
            out[to..to + n * channels].copy_from_slice(&src[from..from + n * channels]);
            front.consumed_samples += n;
            written += n;

            if front.is_consumed() {
                retire_front(&mut g);
                popped = true;
            }
        }
        let buffered = g.frames.len();
        drop(g);

        if popped {
            self.cv.notify_all();
        }

        out[written * channels..].fill(T::silence());

        self.stats
            .played_frames
            .fetch_add(written as u64, Ordering::Relaxed);
        self.stats
            .buffered_frames
            .store(buffered as u64, Ordering::Relaxed);
        if written < wanted {
            self.stats.underrun_events.fetch_add(1, Ordering::Relaxed);
            self.stats
                .underrun_frames
                .fetch_add((wanted - written) as u64, Ordering::Relaxed);
        }
        written
    }

    /// Drop everything queued and wake blocked producers.
    ///
    /// Call before feeding frames from a new position, otherwise stale audio plays first.
    pub fn flush(&self) {
        let mut frames = VecDeque::with_capacity(self.max_queued_frames);
        let mut retired = VecDeque::with_capacity(self.max_queued_frames + 1);
        let mut g = self.lock();
        let dropped = g.frames.len();
        std::mem::swap(&mut g.frames, &mut frames);
        std::mem::swap(&mut g.retired, &mut retired);
        g.generation = g.generation.wrapping_add(1);
        drop(g);
        self.cv.notify_all();
        drop(frames);
        drop(retired);
        self.stats.buffered_frames.store(0, Ordering::Relaxed);
        tracing::debug!(dropped, "frame queue flushed");
    }

    /// Stop accepting frames and wake blocked producers. Idempotent.
    pub fn close(&self) {
        let mut g = self.lock();
        g.closed = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Wait until the callback has drained every queued frame.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        while !g.frames.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            g = next;
        }
        true
    }
}

fn retire_front(g: &mut QueueInner) {
    if let Some(done) = g.frames.pop_front() {
        g.retired.push_back(done.frame);
    }
}
