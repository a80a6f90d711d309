//! Container/stream reader.
//!
//! Uses Symphonia to:
//! - probe the container and pick the best track of the requested kind
//! - demultiplex packets for that track and ignore everything else
//! - decode packets into owned planar frames stamped with exact timestamps
//! - seek and reset the codec so no stale frames come out after a jump

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{self, CodecParameters, CodecType, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo, Track};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::{Sample, SampleFormat as SymphoniaFormat};
use symphonia::core::units::TimeBase;

use crate::error::{DecodeError, OpenError, SeekError};
use crate::frame::{AudioParam, DecodedAudioFrame, SampleFormat, SampleLayout, Samples};
use crate::time::RationalTime;

/// Kind of elementary stream a reader selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Caption,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Caption => f.write_str("caption"),
        }
    }
}

/// Result of one decode step.
#[derive(Debug)]
pub enum DecodeOutcome<T> {
    Frame(T),
    EndOfStream,
}

/// Common shape of every per-stream decoder (audio frames, caption cues).
///
/// Variants differ only in what a decode unit is.
pub trait StreamDecoder {
    type Unit;

    fn open(&mut self) -> Result<(), OpenError>;

    /// Reposition to the nearest decodable point at or before `timestamp_us`.
    fn seek(&mut self, timestamp_us: i64) -> Result<(), SeekError>;

    fn decode_next(&mut self) -> Result<DecodeOutcome<Self::Unit>, DecodeError>;
}

/// Metadata about the selected track.
#[derive(Clone, Debug)]
pub struct TrackInfo {
    pub track_id: u32,
    pub codec: String,
    pub time_base: (u32, u32),
    pub n_frames: Option<u64>,
    pub param: AudioParam,
}

impl TrackInfo {
    /// Track duration when the container reports a frame count.
    pub fn duration(&self) -> Option<RationalTime> {
        let frames = self.n_frames?;
        let (numer, denom) = self.time_base;
        Some(RationalTime::from_time_base(frames, numer, denom))
    }
}

struct OpenStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    time_base: TimeBase,
    info: TrackInfo,
    /// First frame, decoded at open to learn the codec's real output format.
    primed: Option<DecodedAudioFrame>,
}

impl OpenStream {
    /// Next non-empty frame of the selected track, or `None` at end of stream.
    fn read_frame(&mut self, kind: MediaKind) -> Result<Option<DecodedAudioFrame>, DecodeError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    tracing::info!(kind = %kind, "reader reached end of stream");
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(DecodeError::IoFailure(e.to_string())),
            };

            if packet.track_id() != self.info.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                // Corrupt or incomplete packet: the codec wants more input.
                Err(SymphoniaError::DecodeError(msg)) => {
                    tracing::warn!(ts = packet.ts(), "skipping undecodable packet: {msg}");
                    continue;
                }
                Err(SymphoniaError::IoError(e)) => {
                    tracing::warn!(ts = packet.ts(), "skipping packet after codec io error: {e}");
                    continue;
                }
                Err(e) => return Err(DecodeError::Codec(e.to_string())),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let pts =
                RationalTime::from_time_base(packet.ts(), self.time_base.numer, self.time_base.denom);
            return frame_from_buffer(&decoded, pts).map(Some);
        }
    }
}

/// Demuxer plus codec for one selected stream of a container file.
///
/// Created unopened; [`StreamReader::open`] must succeed before seeking or decoding.
pub struct StreamReader {
    path: PathBuf,
    kind: MediaKind,
    stream: Option<OpenStream>,
    current: RationalTime,
}

impl StreamReader {
    pub fn new(path: impl Into<PathBuf>, kind: MediaKind) -> Self {
        Self {
            path: path.into(),
            kind,
            stream: None,
            current: RationalTime::ZERO,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn track_info(&self) -> Option<&TrackInfo> {
        self.stream.as_ref().map(|s| &s.info)
    }

    /// Timestamp of the last decoded frame, or the position reached by the last seek.
    pub fn current_time(&self) -> RationalTime {
        self.current
    }

    fn open_stream(&self) -> Result<OpenStream, OpenError> {
        let file = File::open(&self.path).map_err(|source| OpenError::NotFound {
            path: self.path.clone(),
            source,
        })?;

        let mut hint = Hint::new();
        if let Some(ext) = self.path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| OpenError::Probe {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        let format = probed.format;

        let track = self.select_track(format.as_ref())?;
        let params = track.codec_params.clone();
        let track_id = track.id;

        let sample_rate = params.sample_rate.unwrap_or_default();
        let channels = params.channels.map(|c| c.count()).unwrap_or_default();
        if channels == 0 || sample_rate == 0 {
            return Err(OpenError::UnsupportedFormat(format!(
                "unknown channel layout or rate in {:?}",
                self.path
            )));
        }
        let time_base = params
            .time_base
            .unwrap_or_else(|| TimeBase::new(1, sample_rate));

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|_| OpenError::NoDecoder {
                path: self.path.clone(),
                codec: codec_name(params.codec),
            })?;

        let mut stream = OpenStream {
            format,
            decoder,
            time_base,
            info: TrackInfo {
                track_id,
                codec: codec_name(params.codec),
                time_base: (time_base.numer, time_base.denom),
                n_frames: params.n_frames,
                param: AudioParam {
                    sample_rate,
                    channels,
                    sample_format: SampleFormat::None,
                },
            },
            primed: None,
        };

        // Containers do not always report what the codec emits; decode one frame to know.
        let primed = stream.read_frame(self.kind).map_err(|e| match e {
            DecodeError::FormatChanged { actual, .. } => OpenError::UnsupportedFormat(actual),
            other => OpenError::Probe {
                path: self.path.clone(),
                reason: other.to_string(),
            },
        })?;
        stream.info.param.sample_format = match &primed {
            Some(frame) => frame.sample_format(),
            None => negotiate_sample_format(&params).map_err(OpenError::UnsupportedFormat)?,
        };
        stream.primed = primed;

        Ok(stream)
    }

    /// Pick the container's default track when it is decodable, else the first decodable one.
    fn select_track<'a>(&self, format: &'a dyn FormatReader) -> Result<&'a Track, OpenError> {
        let candidates: Vec<&Track> = format
            .tracks()
            .iter()
            .filter(|t| track_matches_kind(t, self.kind))
            .collect();
        if candidates.is_empty() {
            return Err(OpenError::NoStream {
                path: self.path.clone(),
                kind: self.kind,
            });
        }

        let registry = symphonia::default::get_codecs();
        let decodable = |t: &&Track| registry.get_codec(t.codec_params.codec).is_some();
        let default_id = format.default_track().map(|t| t.id);

        candidates
            .iter()
            .copied()
            .find(|t| Some(t.id) == default_id && decodable(t))
            .or_else(|| candidates.iter().copied().find(decodable))
            .ok_or_else(|| OpenError::NoDecoder {
                path: self.path.clone(),
                codec: codec_name(candidates[0].codec_params.codec),
            })
    }
}

impl StreamDecoder for StreamReader {
    type Unit = DecodedAudioFrame;

    fn open(&mut self) -> Result<(), OpenError> {
        let stream = self.open_stream().inspect_err(|e| {
            tracing::error!(path = ?self.path, kind = %self.kind, "reader open failed: {e}");
        })?;
        tracing::info!(
            path = ?self.path,
            kind = %self.kind,
            codec = %stream.info.codec,
            track = stream.info.track_id,
            rate_hz = stream.info.param.sample_rate,
            channels = stream.info.param.channels,
            format = %stream.info.param.sample_format,
            "stream opened"
        );
        self.stream = Some(stream);
        self.current = RationalTime::ZERO;
        Ok(())
    }

    fn seek(&mut self, timestamp_us: i64) -> Result<(), SeekError> {
        let Some(stream) = self.stream.as_mut() else {
            tracing::error!(kind = %self.kind, "seek before open");
            return Err(SeekError::NotInitialized);
        };

        let ts = us_to_time_base(timestamp_us, stream.time_base);
        let seeked = stream
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts,
                    track_id: stream.info.track_id,
                },
            )
            .map_err(|e| SeekError::IoFailure {
                target_us: timestamp_us,
                reason: e.to_string(),
            })?;

        stream.decoder.reset();
        stream.primed = None;
        self.current = RationalTime::from_time_base(
            seeked.actual_ts,
            stream.time_base.numer,
            stream.time_base.denom,
        );
        tracing::info!(
            target_us = timestamp_us,
            actual_us = self.current.us(),
            kind = %self.kind,
            "reader seeked"
        );
        Ok(())
    }

    fn decode_next(&mut self) -> Result<DecodeOutcome<DecodedAudioFrame>, DecodeError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(DecodeError::NotInitialized);
        };

        let frame = match stream.primed.take() {
            Some(frame) => frame,
            None => match stream.read_frame(self.kind)? {
                Some(frame) => frame,
                None => return Ok(DecodeOutcome::EndOfStream),
            },
        };
        let expected = stream.info.param.sample_format;
        if frame.sample_format() != expected {
            return Err(DecodeError::FormatChanged {
                expected: expected.to_string(),
                actual: frame.sample_format().to_string(),
            });
        }
        self.current = frame.pts();
        Ok(DecodeOutcome::Frame(frame))
    }
}

fn track_matches_kind(track: &Track, kind: MediaKind) -> bool {
    match kind {
        // Symphonia only demuxes audio; anything with a codec and a rate qualifies.
        MediaKind::Audio => {
            track.codec_params.codec != codecs::CODEC_TYPE_NULL
                && track.codec_params.sample_rate.is_some()
        }
        MediaKind::Caption => false,
    }
}

/// Expected planar format for a stream that produced no frame at open.
fn negotiate_sample_format(params: &CodecParameters) -> Result<SampleFormat, String> {
    if let Some(fmt) = params.sample_format {
        return match fmt {
            SymphoniaFormat::S16 => Ok(SampleFormat::I16Planar),
            SymphoniaFormat::S32 => Ok(SampleFormat::I32Planar),
            SymphoniaFormat::F32 => Ok(SampleFormat::F32Planar),
            other => Err(format!("{other:?} samples from {}", codec_name(params.codec))),
        };
    }

    match params.codec {
        codecs::CODEC_TYPE_MP1
        | codecs::CODEC_TYPE_MP2
        | codecs::CODEC_TYPE_MP3
        | codecs::CODEC_TYPE_AAC
        | codecs::CODEC_TYPE_VORBIS
        | codecs::CODEC_TYPE_OPUS => Ok(SampleFormat::F32Planar),
        codecs::CODEC_TYPE_FLAC | codecs::CODEC_TYPE_ALAC => Ok(SampleFormat::I32Planar),
        codecs::CODEC_TYPE_PCM_S16LE | codecs::CODEC_TYPE_PCM_S16BE => Ok(SampleFormat::I16Planar),
        codecs::CODEC_TYPE_PCM_S32LE | codecs::CODEC_TYPE_PCM_S32BE => Ok(SampleFormat::I32Planar),
        codecs::CODEC_TYPE_PCM_F32LE | codecs::CODEC_TYPE_PCM_F32BE => Ok(SampleFormat::F32Planar),
        other => Err(format!("no known sample format for {}", codec_name(other))),
    }
}

/// Copy a decoded buffer into an owned planar frame.
fn frame_from_buffer(
    decoded: &AudioBufferRef<'_>,
    pts: RationalTime,
) -> Result<DecodedAudioFrame, DecodeError> {
    let samples = match decoded {
        AudioBufferRef::S16(buf) => Samples::I16(planes(buf)),
        AudioBufferRef::S32(buf) => Samples::I32(planes(buf)),
        AudioBufferRef::F32(buf) => Samples::F32(planes(buf)),
        other => {
            return Err(DecodeError::FormatChanged {
                expected: "s16p, s32p or f32p".to_string(),
                actual: sample_kind_name(other).to_string(),
            });
        }
    };

    let channels = decoded.spec().channels.count();
    DecodedAudioFrame::new(
        samples,
        decoded.frames(),
        channels,
        decoded.spec().rate,
        SampleLayout::Planar,
        pts,
    )
    .ok_or_else(|| DecodeError::Codec("decoded buffer has inconsistent plane sizes".into()))
}

fn sample_kind_name(buf: &AudioBufferRef<'_>) -> &'static str {
    match buf {
        AudioBufferRef::U8(_) => "u8",
        AudioBufferRef::U16(_) => "u16",
        AudioBufferRef::U24(_) => "u24",
        AudioBufferRef::U32(_) => "u32",
        AudioBufferRef::S8(_) => "s8",
        AudioBufferRef::S16(_) => "s16",
        AudioBufferRef::S24(_) => "s24",
        AudioBufferRef::S32(_) => "s32",
        AudioBufferRef::F32(_) => "f32",
        AudioBufferRef::F64(_) => "f64",
    }
}

fn planes<S: Sample>(buf: &AudioBuffer<S>) -> Vec<S> {
    let channels = buf.spec().channels.count();
    let mut out = Vec::with_capacity(buf.frames() * channels);
    for ch in 0..channels {
        out.extend_from_slice(buf.chan(ch));
    }
    out
}

/// `us * denom / (numer * 1e6)` ticks, floored so the seek lands at or before `us`.
fn us_to_time_base(us: i64, tb: TimeBase) -> u64 {
    if us <= 0 || tb.numer == 0 {
        return 0;
    }
    let ticks = i128::from(us) * i128::from(tb.denom) / (i128::from(tb.numer) * 1_000_000);
    u64::try_from(ticks).unwrap_or(u64::MAX)
}

/// Best-effort codec label for logs and errors.
fn codec_name(codec: CodecType) -> String {
    if let Some(desc) = symphonia::default::get_codecs().get_codec(codec) {
        return desc.short_name.to_uppercase();
    }
    format!("{codec:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{temp_path, write_wav_s16};

    #[test]
    fn open_missing_file_is_not_found() {
        let mut reader = StreamReader::new("/definitely/not/here.wav", MediaKind::Audio);
        assert!(matches!(reader.open(), Err(OpenError::NotFound { .. })));
        assert!(!reader.is_open());
    }

    #[test]
    fn seek_before_open_is_not_initialized() {
        let mut reader = StreamReader::new("unused.wav", MediaKind::Audio);
        assert!(matches!(reader.seek(1_000), Err(SeekError::NotInitialized)));
    }

    #[test]
    fn decode_before_open_is_not_initialized() {
        let mut reader = StreamReader::new("unused.wav", MediaKind::Audio);
        assert!(matches!(
            reader.decode_next(),
            Err(DecodeError::NotInitialized)
        ));
    }

    #[test]
    fn caption_kind_finds_no_stream_in_audio_file() {
        let path = temp_path("reader-caption-kind.wav");
        write_wav_s16(&path, 8_000, 1, 800);
        let mut reader = StreamReader::new(&path, MediaKind::Caption);
        assert!(matches!(reader.open(), Err(OpenError::NoStream { .. })));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn garbage_file_fails_probe() {
        let path = temp_path("reader-garbage.bin");
        std::fs::write(&path, b"this is not a media container").unwrap();
        let mut reader = StreamReader::new(&path, MediaKind::Audio);
        assert!(matches!(reader.open(), Err(OpenError::Probe { .. })));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn decodes_every_sample_of_a_wav_file() {
        let path = temp_path("reader-decode.wav");
        write_wav_s16(&path, 8_000, 2, 8_000);
        let mut reader = StreamReader::new(&path, MediaKind::Audio);
        reader.open().unwrap();

        let info = reader.track_info().unwrap().clone();
        assert_eq!(info.param.sample_rate, 8_000);
        assert_eq!(info.param.channels, 2);
        assert!(matches!(
            info.param.sample_format,
            SampleFormat::I16Planar | SampleFormat::I32Planar
        ));

        let mut total = 0usize;
        let mut last_pts = None;
        while let DecodeOutcome::Frame(frame) = reader.decode_next().unwrap() {
            assert_eq!(frame.layout(), SampleLayout::Planar);
            if let Some(prev) = last_pts {
                assert!(frame.pts() > prev);
            } else {
                assert_eq!(frame.pts(), RationalTime::ZERO);
            }
            last_pts = Some(frame.pts());
            total += frame.sample_count();
        }
        assert_eq!(total, 8_000);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn seek_lands_at_or_before_target() {
        let path = temp_path("reader-seek.wav");
        write_wav_s16(&path, 8_000, 1, 16_000);
        let mut reader = StreamReader::new(&path, MediaKind::Audio);
        reader.open().unwrap();

        let target = RationalTime::from_ms(500);
        reader.seek(target.us()).unwrap();
        assert!(reader.current_time() <= target);

        match reader.decode_next().unwrap() {
            DecodeOutcome::Frame(frame) => assert!(frame.pts() <= target),
            DecodeOutcome::EndOfStream => panic!("unexpected end of stream"),
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn us_to_time_base_floors() {
        let tb = TimeBase::new(1, 44_100);
        assert_eq!(us_to_time_base(1_000_000, tb), 44_100);
        assert_eq!(us_to_time_base(22, tb), 0);
        assert_eq!(us_to_time_base(-5, tb), 0);
    }

    #[test]
    fn negotiates_lossy_codecs_as_float_planar() {
        let mut params = CodecParameters::new();
        params.codec = codecs::CODEC_TYPE_MP3;
        assert_eq!(negotiate_sample_format(&params), Ok(SampleFormat::F32Planar));
        params.codec = codecs::CODEC_TYPE_FLAC;
        assert_eq!(negotiate_sample_format(&params), Ok(SampleFormat::I32Planar));
    }

    #[test]
    fn first_frame_is_not_lost_to_priming() {
        let path = temp_path("reader-primed.wav");
        write_wav_s16(&path, 8_000, 1, 100);
        let mut reader = StreamReader::new(&path, MediaKind::Audio);
        reader.open().unwrap();
        assert_eq!(reader.current_time(), RationalTime::ZERO);
        match reader.decode_next().unwrap() {
            DecodeOutcome::Frame(frame) => {
                assert_eq!(frame.pts(), RationalTime::ZERO);
                assert_eq!(frame.sample_count(), 100);
            }
            DecodeOutcome::EndOfStream => panic!("primed frame missing"),
        }
        assert!(matches!(reader.decode_next().unwrap(), DecodeOutcome::EndOfStream));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rejects_unsupported_sample_formats_at_open() {
        let mut params = CodecParameters::new();
        params.codec = codecs::CODEC_TYPE_PCM_S24LE;
        params.sample_format = Some(SymphoniaFormat::S24);
        assert!(negotiate_sample_format(&params).is_err());
    }
}
