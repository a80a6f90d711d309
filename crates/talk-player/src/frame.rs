//! Decoded audio frames and the format they are negotiated in.
//!
//! A [`DecodedAudioFrame`] is the unit handed from the decoder to the sink. It owns its
//! samples; moving it into the queue transfers ownership, so nothing is shared between
//! the control thread and the device callback except the queue itself.

use std::fmt;

use crate::time::RationalTime;

/// Sample storage formats a decoder may negotiate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampleFormat {
    I16,
    I32,
    F32,
    I16Planar,
    I32Planar,
    F32Planar,
    #[default]
    None,
}

impl SampleFormat {
    pub fn is_planar(self) -> bool {
        matches!(
            self,
            SampleFormat::I16Planar | SampleFormat::I32Planar | SampleFormat::F32Planar
        )
    }

    /// The packed counterpart produced by interleaving.
    pub fn interleaved(self) -> SampleFormat {
        match self {
            SampleFormat::I16Planar => SampleFormat::I16,
            SampleFormat::I32Planar => SampleFormat::I32,
            SampleFormat::F32Planar => SampleFormat::F32,
            other => other,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::I16 => "s16",
            SampleFormat::I32 => "s32",
            SampleFormat::F32 => "f32",
            SampleFormat::I16Planar => "s16p",
            SampleFormat::I32Planar => "s32p",
            SampleFormat::F32Planar => "f32p",
            SampleFormat::None => "none",
        };
        f.write_str(name)
    }
}

/// Output format negotiated for a stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AudioParam {
    pub sample_rate: u32,
    pub channels: usize,
    pub sample_format: SampleFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleLayout {
    /// `s0c0, s0c1, s1c0, s1c1, ...`
    Interleaved,
    /// One contiguous plane per channel, stored back to back.
    Planar,
}

/// Owned sample storage.
#[derive(Clone, Debug, PartialEq)]
pub enum Samples {
    I16(Vec<i16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::I16(v) => v.len(),
            Samples::I32(v) => v.len(),
            Samples::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One decode unit of audio.
#[derive(Clone, Debug)]
pub struct DecodedAudioFrame {
    samples: Samples,
    sample_count: usize,
    channels: usize,
    sample_rate: u32,
    layout: SampleLayout,
    pts: RationalTime,
}

/// Per-channel view of a frame: one slice per plane, or a single interleaved slice.
pub enum ChannelViews<'a, T> {
    Interleaved(&'a [T]),
    Planar(Vec<&'a [T]>),
}

impl DecodedAudioFrame {
    /// Wrap `samples` holding `sample_count` sample-frames for `channels` channels.
    ///
    /// Returns `None` if the buffer length does not match `sample_count * channels`.
    pub fn new(
        samples: Samples,
        sample_count: usize,
        channels: usize,
        sample_rate: u32,
        layout: SampleLayout,
        pts: RationalTime,
    ) -> Option<Self> {
        if channels == 0 || samples.len() != sample_count.checked_mul(channels)? {
            return None;
        }
        Some(Self {
            samples,
            sample_count,
            channels,
            sample_rate,
            layout,
            pts,
        })
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn layout(&self) -> SampleLayout {
        self.layout
    }

    pub fn pts(&self) -> RationalTime {
        self.pts
    }

    /// Timestamp just past the last sample of this frame.
    pub fn end_time(&self) -> RationalTime {
        let duration = RationalTime::from_samples(self.sample_count as u64, self.sample_rate);
        self.pts.checked_add(duration).unwrap_or(self.pts)
    }

    /// The format of this frame expressed as a [`SampleFormat`].
    pub fn sample_format(&self) -> SampleFormat {
        let packed = match self.samples {
            Samples::I16(_) => SampleFormat::I16,
            Samples::I32(_) => SampleFormat::I32,
            Samples::F32(_) => SampleFormat::F32,
        };
        match self.layout {
            SampleLayout::Interleaved => packed,
            SampleLayout::Planar => match packed {
                SampleFormat::I16 => SampleFormat::I16Planar,
                SampleFormat::I32 => SampleFormat::I32Planar,
                _ => SampleFormat::F32Planar,
            },
        }
    }

    /// Slices into the sample buffer, one per plane.
    pub fn channel_views<T: FrameSample>(&self) -> Option<ChannelViews<'_, T>> {
        let data = T::slice(&self.samples)?;
        Some(match self.layout {
            SampleLayout::Interleaved => ChannelViews::Interleaved(data),
            SampleLayout::Planar => {
                ChannelViews::Planar(data.chunks_exact(self.sample_count.max(1)).collect())
            }
        })
    }

    /// Drop the first `n` sample-frames and move `pts` past them.
    ///
    /// Returns `None` when no samples would remain.
    pub fn trim_front(self, n: usize) -> Option<Self> {
        if n == 0 {
            return Some(self);
        }
        if n >= self.sample_count {
            return None;
        }
        let skipped = RationalTime::from_samples(n as u64, self.sample_rate);
        let pts = self.pts.checked_add(skipped)?;
        let (count, channels, layout) = (self.sample_count, self.channels, self.layout);
        let samples = match self.samples {
            Samples::I16(v) => Samples::I16(drop_leading(v, n, channels, count, layout)),
            Samples::I32(v) => Samples::I32(drop_leading(v, n, channels, count, layout)),
            Samples::F32(v) => Samples::F32(drop_leading(v, n, channels, count, layout)),
        };
        Some(Self {
            samples,
            sample_count: count - n,
            channels,
            sample_rate: self.sample_rate,
            layout,
            pts,
        })
    }

    /// Return an interleaved copy of this frame; interleaved frames are copied verbatim.
    pub fn into_interleaved(self) -> Self {
        if self.layout == SampleLayout::Interleaved {
            return self;
        }
        let n = self.sample_count;
        let samples = match &self.samples {
            Samples::I16(v) => Samples::I16(interleave_planes(v, self.channels, n)),
            Samples::I32(v) => Samples::I32(interleave_planes(v, self.channels, n)),
            Samples::F32(v) => Samples::F32(interleave_planes(v, self.channels, n)),
        };
        Self {
            samples,
            layout: SampleLayout::Interleaved,
            ..self
        }
    }
}

fn drop_leading<T: Copy>(
    mut v: Vec<T>,
    n: usize,
    channels: usize,
    count: usize,
    layout: SampleLayout,
) -> Vec<T> {
    match layout {
        SampleLayout::Interleaved => {
            v.drain(..n * channels);
            v
        }
        SampleLayout::Planar => v
            .chunks_exact(count)
            .flat_map(|plane| plane[n..].iter().copied())
            .collect(),
    }
}

/// Interleave `channels` back-to-back planes of `n` samples each.
///
/// `dst[i * channels + j] = src[j][i]`.
pub fn interleave_planes<T: Copy + Default>(planes: &[T], channels: usize, n: usize) -> Vec<T> {
    let mut dst = vec![T::default(); n * channels];
    for (j, plane) in planes.chunks_exact(n.max(1)).take(channels).enumerate() {
        for (i, &sample) in plane.iter().enumerate() {
            dst[i * channels + j] = sample;
        }
    }
    dst
}

/// Sample types the device callback can write, and their place in [`Samples`].
pub trait FrameSample: Copy + Default + Send + 'static {
    const FORMAT: SampleFormat;

    fn slice(samples: &Samples) -> Option<&[Self]>;

    fn silence() -> Self {
        Self::default()
    }
}

impl FrameSample for i16 {
    const FORMAT: SampleFormat = SampleFormat::I16;

    fn slice(samples: &Samples) -> Option<&[Self]> {
        match samples {
            Samples::I16(v) => Some(v),
            _ => None,
        }
    }
}

impl FrameSample for i32 {
    const FORMAT: SampleFormat = SampleFormat::I32;

    fn slice(samples: &Samples) -> Option<&[Self]> {
        match samples {
            Samples::I32(v) => Some(v),
            _ => None,
        }
    }
}

impl FrameSample for f32 {
    const FORMAT: SampleFormat = SampleFormat::F32;

    fn slice(samples: &Samples) -> Option<&[Self]> {
        match samples {
            Samples::F32(v) => Some(v),
            _ => None,
        }
    }
}
