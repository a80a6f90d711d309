//! Playback stage (CPAL output stream).
//!
//! The device pulls audio on its own thread at a fixed cadence. The callback body is
//! [`FrameQueue::fill`]: it copies queued samples verbatim, never waits on the control
//! thread and writes silence on underrun. It must return within one device period, so it
//! performs no I/O, no decoding and no allocation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, StreamTrait};

use crate::config::PlayerConfig;
use crate::device;
use crate::error::{OpenError, SinkError};
use crate::frame::{AudioParam, DecodedAudioFrame, FrameSample, SampleFormat};
use crate::queue::{FrameQueue, SinkStats};

/// Sink lifecycle.
///
/// `Stopped → Paused ⇄ Playing`. `Stopped` is entered only before a successful open or
/// at teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkState {
    Stopped,
    Paused,
    Playing,
}

/// Output configuration actually granted by the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiatedSpec {
    pub sample_rate: u32,
    pub channels: usize,
    pub sample_format: SampleFormat,
    /// Callback period in sample-frames, when the device accepted a fixed size.
    pub period_frames: Option<u32>,
    pub device: String,
}

/// A pull-driven audio output.
pub trait AudioSink {
    /// Configure the output for `param`. The sink converts nothing, so a format the device
    /// cannot play natively fails with [`OpenError::UnsupportedFormat`].
    fn open(&mut self, param: AudioParam) -> Result<NegotiatedSpec, OpenError>;

    fn play(&mut self) -> Result<(), SinkError>;

    fn pause(&mut self) -> Result<(), SinkError>;

    /// Queue a frame, blocking while the queue is full. Never call from the device callback.
    fn enqueue(&self, frame: DecodedAudioFrame);

    /// Drop everything queued; call before feeding audio from a new position.
    fn flush(&self);

    fn state(&self) -> SinkState;
}

/// State machine guarding play/pause transitions.
#[derive(Debug)]
pub struct Transport {
    state: SinkState,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            state: SinkState::Stopped,
        }
    }
}

impl Transport {
    pub fn state(&self) -> SinkState {
        self.state
    }

    /// Device negotiated; playback starts paused.
    pub fn opened(&mut self) {
        self.state = SinkState::Paused;
    }

    pub fn play(&mut self) -> Result<(), SinkError> {
        match self.state {
            SinkState::Paused => {
                self.state = SinkState::Playing;
                Ok(())
            }
            state => Err(SinkError::InvalidState { op: "play", state }),
        }
    }

    pub fn pause(&mut self) -> Result<(), SinkError> {
        match self.state {
            SinkState::Playing => {
                self.state = SinkState::Paused;
                Ok(())
            }
            state => Err(SinkError::InvalidState { op: "pause", state }),
        }
    }

    pub fn stop(&mut self) {
        self.state = SinkState::Stopped;
    }
}

/// Map an interleaved stream format to the CPAL sample format that plays it unchanged.
pub fn cpal_format(format: SampleFormat) -> Option<cpal::SampleFormat> {
    match format.interleaved() {
        SampleFormat::F32 => Some(cpal::SampleFormat::F32),
        SampleFormat::I16 => Some(cpal::SampleFormat::I16),
        SampleFormat::I32 => Some(cpal::SampleFormat::I32),
        _ => None,
    }
}

/// [`AudioSink`] backed by a CPAL output stream.
pub struct CpalSink {
    device: cpal::Device,
    max_queued_frames: usize,
    period_frames: u32,
    transport: Transport,
    paused: Arc<AtomicBool>,
    queue: Option<Arc<FrameQueue>>,
    stream: Option<cpal::Stream>,
}

impl CpalSink {
    pub fn new(device: cpal::Device, config: &PlayerConfig) -> Self {
        Self {
            device,
            max_queued_frames: config.max_queued_frames,
            period_frames: config.period_frames,
            transport: Transport::default(),
            paused: Arc::new(AtomicBool::new(true)),
            queue: None,
            stream: None,
        }
    }

    /// Callback counters; `None` before open.
    pub fn stats(&self) -> Option<&SinkStats> {
        self.queue.as_deref().map(FrameQueue::stats)
    }

    /// Frames waiting for the device (best-effort snapshot).
    pub fn queued_frames(&self) -> usize {
        self.queue.as_ref().map(|q| q.len()).unwrap_or(0)
    }

    fn negotiate(&mut self, param: AudioParam) -> Result<NegotiatedSpec, OpenError> {
        let format = param.sample_format.interleaved();
        let cpal_fmt = cpal_format(format).ok_or_else(|| {
            OpenError::UnsupportedFormat(format!("{} has no native device format", param.sample_format))
        })?;
        let channels = u16::try_from(param.channels)
            .map_err(|_| OpenError::UnsupportedFormat(format!("{} channels", param.channels)))?;

        let supported =
            device::find_output_config(&self.device, param.sample_rate, channels, cpal_fmt)
                .map_err(|e| OpenError::Device(format!("{e:#}")))?
                .ok_or_else(|| {
                    OpenError::UnsupportedFormat(format!(
                        "{} Hz / {} ch / {} not offered by {}",
                        param.sample_rate,
                        param.channels,
                        format,
                        device::device_name(&self.device)
                    ))
                })?;

        let buffer_size = device::pick_buffer_size(supported.buffer_size(), self.period_frames);
        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: param.sample_rate,
            buffer_size,
        };

        let queue = Arc::new(FrameQueue::new(param.channels, self.max_queued_frames));
        self.paused.store(true, Ordering::Relaxed);
        let stream = match cpal_fmt {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&self.device, &stream_config, &queue, &self.paused)
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&self.device, &stream_config, &queue, &self.paused)
            }
            cpal::SampleFormat::I32 => {
                build_stream::<i32>(&self.device, &stream_config, &queue, &self.paused)
            }
            other => return Err(OpenError::UnsupportedFormat(format!("{other:?}"))),
        }
        .map_err(|e| OpenError::Device(e.to_string()))?;

        // Some backends start streams immediately; the sink opens paused.
        if let Err(e) = stream.pause() {
            tracing::debug!("stream pause after build not supported: {e}");
        }

        self.queue = Some(queue);
        self.stream = Some(stream);

        Ok(NegotiatedSpec {
            sample_rate: param.sample_rate,
            channels: param.channels,
            sample_format: format,
            period_frames: match buffer_size {
                cpal::BufferSize::Fixed(n) => Some(n),
                cpal::BufferSize::Default => None,
            },
            device: device::device_name(&self.device),
        })
    }
}

impl AudioSink for CpalSink {
    fn open(&mut self, param: AudioParam) -> Result<NegotiatedSpec, OpenError> {
        if self.transport.state() != SinkState::Stopped {
            return Err(OpenError::Device("sink is already open".to_string()));
        }
        let spec = self.negotiate(param).inspect_err(|e| {
            tracing::error!("audio sink open failed: {e}");
        })?;
        self.transport.opened();
        tracing::info!(
            device = %spec.device,
            rate_hz = spec.sample_rate,
            channels = spec.channels,
            format = %spec.sample_format,
            period_frames = ?spec.period_frames,
            "audio sink opened"
        );
        Ok(spec)
    }

    fn play(&mut self) -> Result<(), SinkError> {
        self.transport.play()?;
        self.paused.store(false, Ordering::Relaxed);
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.play() {
                self.paused.store(true, Ordering::Relaxed);
                self.transport.pause()?;
                return Err(SinkError::Device(e.to_string()));
            }
        }
        tracing::debug!("audio sink playing");
        Ok(())
    }

    fn pause(&mut self) -> Result<(), SinkError> {
        self.transport.pause()?;
        // The gate alone keeps the queue intact on backends that cannot pause a stream.
        self.paused.store(true, Ordering::Relaxed);
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                tracing::debug!("stream pause not supported, gating callback: {e}");
            }
        }
        tracing::debug!("audio sink paused");
        Ok(())
    }

    fn enqueue(&self, frame: DecodedAudioFrame) {
        match &self.queue {
            Some(queue) => queue.enqueue(frame),
            None => tracing::warn!(pts = %frame.pts(), "enqueue on an unopened sink; frame dropped"),
        }
    }

    fn flush(&self) {
        if let Some(queue) = &self.queue {
            queue.flush();
        }
    }

    fn state(&self) -> SinkState {
        self.transport.state()
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.paused.store(true, Ordering::Relaxed);
        // Dropping the stream stops the callback before the queue goes away.
        drop(self.stream.take());
        if let Some(queue) = self.queue.take() {
            queue.close();
        }
        self.transport.stop();
        tracing::debug!("audio sink closed");
    }
}

/// Type-specialized stream builder for the negotiated sample format.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<FrameQueue>,
    paused: &Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: FrameSample + cpal::SizedSample,
{
    let queue = queue.clone();
    let paused = paused.clone();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            // Paused: silence, and leave the queue untouched.
            if paused.load(Ordering::Relaxed) {
                data.fill(T::silence());
                return;
            }
            queue.fill(data);
        },
        err_fn,
        None,
    )
}
