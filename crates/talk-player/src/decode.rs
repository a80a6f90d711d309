//! Audio decode stage.
//!
//! Wraps a [`StreamReader`] opened on the audio track and normalizes every frame to
//! interleaved samples so the sink can copy them straight into the device buffer.

use std::path::PathBuf;

use crate::error::{DecodeError, OpenError, SeekError};
use crate::frame::{AudioParam, DecodedAudioFrame};
use crate::reader::{DecodeOutcome, MediaKind, StreamDecoder, StreamReader, TrackInfo};
use crate::time::RationalTime;

/// Anything that yields timestamped audio frames and can jump to a position.
///
/// The sync controller only depends on this, so tests can drive it with scripted frames.
pub trait FrameSource {
    /// Next interleaved frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<DecodedAudioFrame>, DecodeError>;

    fn seek(&mut self, timestamp_us: i64) -> Result<(), SeekError>;

    /// Timestamp of the most recently decoded frame.
    fn current_time(&self) -> RationalTime;

    fn audio_param(&self) -> AudioParam;
}

/// Audio decoder producing interleaved frames.
pub struct AudioDecoder {
    reader: StreamReader,
}

impl AudioDecoder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        tracing::debug!(path = ?path, "audio decoder created");
        Self {
            reader: StreamReader::new(path, MediaKind::Audio),
        }
    }

    /// Create and open in one step.
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self, OpenError> {
        let mut decoder = Self::new(path);
        decoder.open()?;
        Ok(decoder)
    }

    pub fn track_info(&self) -> Option<&TrackInfo> {
        self.reader.track_info()
    }

    /// Format of the frames this decoder hands out: the negotiated one, interleaved.
    ///
    /// Only meaningful after a successful open; before that the default (format `None`)
    /// is returned and the violation is logged.
    pub fn audio_param(&self) -> AudioParam {
        match self.reader.track_info() {
            Some(info) => AudioParam {
                sample_format: info.param.sample_format.interleaved(),
                ..info.param
            },
            None => {
                tracing::error!(path = ?self.reader.path(), "audio_param queried before open");
                AudioParam::default()
            }
        }
    }

    /// Next frame, interleaved, or `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<DecodedAudioFrame>, DecodeError> {
        match self.decode_next()? {
            DecodeOutcome::Frame(frame) => Ok(Some(frame)),
            DecodeOutcome::EndOfStream => Ok(None),
        }
    }

    pub fn current_time(&self) -> RationalTime {
        self.reader.current_time()
    }
}

impl StreamDecoder for AudioDecoder {
    type Unit = DecodedAudioFrame;

    fn open(&mut self) -> Result<(), OpenError> {
        self.reader.open()?;
        tracing::info!(path = ?self.reader.path(), "audio decoder ready");
        Ok(())
    }

    fn seek(&mut self, timestamp_us: i64) -> Result<(), SeekError> {
        self.reader.seek(timestamp_us)
    }

    fn decode_next(&mut self) -> Result<DecodeOutcome<DecodedAudioFrame>, DecodeError> {
        Ok(match self.reader.decode_next()? {
            DecodeOutcome::Frame(frame) => DecodeOutcome::Frame(frame.into_interleaved()),
            DecodeOutcome::EndOfStream => DecodeOutcome::EndOfStream,
        })
    }
}

impl FrameSource for AudioDecoder {
    fn next_frame(&mut self) -> Result<Option<DecodedAudioFrame>, DecodeError> {
        AudioDecoder::next_frame(self)
    }

    fn seek(&mut self, timestamp_us: i64) -> Result<(), SeekError> {
        StreamDecoder::seek(self, timestamp_us)
    }

    fn current_time(&self) -> RationalTime {
        AudioDecoder::current_time(self)
    }

    fn audio_param(&self) -> AudioParam {
        AudioDecoder::audio_param(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{SampleFormat, SampleLayout, Samples};
    use crate::test_support::{temp_path, wav_sample, write_wav_s16};

    /// 16-bit value of sample `k`, whichever width the codec decoded to.
    fn as_i16(samples: &Samples, k: usize) -> i16 {
        match samples {
            Samples::I16(v) => v[k],
            Samples::I32(v) => (v[k] >> 16) as i16,
            Samples::F32(v) => (v[k] * 32_768.0).round() as i16,
        }
    }

    #[test]
    fn audio_param_before_open_is_default() {
        let decoder = AudioDecoder::new("unused.wav");
        assert_eq!(decoder.audio_param(), AudioParam::default());
        assert_eq!(decoder.audio_param().sample_format, SampleFormat::None);
    }

    #[test]
    fn frames_come_out_interleaved() {
        let path = temp_path("decode-interleave.wav");
        write_wav_s16(&path, 8_000, 2, 2_000);
        let mut decoder = AudioDecoder::open_path(&path).unwrap();
        assert_eq!(decoder.audio_param().channels, 2);

        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.layout(), SampleLayout::Interleaved);
        assert!(!frame.sample_format().is_planar());
        assert_eq!(decoder.audio_param().sample_format, frame.sample_format());
        for i in 0..frame.sample_count() {
            assert_eq!(as_i16(frame.samples(), 2 * i), wav_sample(i, 0));
            assert_eq!(as_i16(frame.samples(), 2 * i + 1), wav_sample(i, 1));
        }
        assert_eq!(decoder.current_time(), frame.pts());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn end_of_stream_is_none() {
        let path = temp_path("decode-eos.wav");
        write_wav_s16(&path, 8_000, 1, 100);
        let mut decoder = AudioDecoder::open_path(&path).unwrap();
        let mut frames = 0;
        while decoder.next_frame().unwrap().is_some() {
            frames += 1;
        }
        assert!(frames >= 1);
        assert!(decoder.next_frame().unwrap().is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn current_time_tracks_seeks() {
        let path = temp_path("decode-seek.wav");
        write_wav_s16(&path, 8_000, 1, 24_000);
        let mut decoder = AudioDecoder::open_path(&path).unwrap();
        for target_ms in [2_000, 500, 1_500, 0] {
            let target = RationalTime::from_ms(target_ms);
            FrameSource::seek(&mut decoder, target.us()).unwrap();
            assert!(decoder.current_time() <= target);
            let frame = decoder.next_frame().unwrap().unwrap();
            assert!(frame.pts() <= target);
            assert_eq!(decoder.current_time(), frame.pts());
        }
        let _ = std::fs::remove_file(&path);
    }
}
