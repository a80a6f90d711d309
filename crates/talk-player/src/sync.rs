//! Caption-paced playback.
//!
//! [`SyncController`] walks an ordered caption list. Each `play_next` feeds the sink the
//! audio between the active caption's `start` and `end`, seeking only when the decoder
//! has drifted further than the configured tolerance from where the caption begins.

use crate::caption::Caption;
use crate::decode::FrameSource;
use crate::error::PlaybackError;
use crate::frame::DecodedAudioFrame;
use crate::playback::{AudioSink, SinkState};
use crate::time::RationalTime;

pub struct SyncController<D: FrameSource, S: AudioSink> {
    decoder: D,
    sink: S,
    captions: Vec<Caption>,
    cursor: usize,
    /// Frame read past the previous caption's end; it opens the next caption.
    pending: Option<DecodedAudioFrame>,
    /// Target of the last seek while no frame has been read since.
    positioned_at: Option<RationalTime>,
    /// End of the last frame taken from the decoder. The decoder's clock reports that
    /// frame's start.
    read_position: Option<RationalTime>,
    seek_tolerance: RationalTime,
}

impl<D: FrameSource, S: AudioSink> SyncController<D, S> {
    /// `sink` must already be open for `decoder`'s audio parameters.
    pub fn new(decoder: D, sink: S, captions: Vec<Caption>, seek_tolerance: RationalTime) -> Self {
        tracing::debug!(
            captions = captions.len(),
            tolerance = %seek_tolerance,
            "sync controller created"
        );
        Self {
            decoder,
            sink,
            captions,
            cursor: 0,
            pending: None,
            positioned_at: None,
            read_position: None,
            seek_tolerance,
        }
    }

    pub fn captions(&self) -> &[Caption] {
        &self.captions
    }

    /// Index of the caption the next `play_next` plays.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The caption most recently played.
    pub fn current_caption(&self) -> Option<&Caption> {
        self.cursor.checked_sub(1).and_then(|i| self.captions.get(i))
    }

    pub fn next_caption(&self) -> Option<&Caption> {
        self.captions.get(self.cursor)
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Play the caption at the cursor, then advance the cursor.
    ///
    /// Returns once audio up to the caption's end has been queued. A frame straddling the
    /// caption's start is trimmed to it. Running out of audio first leaves the cursor
    /// where it was.
    pub fn play_next(&mut self) -> Result<(), PlaybackError> {
        let index = self.cursor;
        let caption = self.captions.get(index).ok_or(PlaybackError::NoMoreCaptions)?;
        let (start, end) = (caption.start(), caption.end());
        tracing::info!(index, start = %start, end = %end, text = caption.text(), "playing caption");

        let position = self
            .read_position
            .unwrap_or_else(|| self.decoder.current_time());
        let drift = start.abs_diff(position);
        if self.positioned_at != Some(start) && drift > self.seek_tolerance {
            tracing::debug!(index, position = %position, drift = %drift, "drift exceeds tolerance");
            self.reposition(start)?;
        }

        if self.sink.state() == SinkState::Paused {
            self.sink.play()?;
        }

        let mut queued = 0usize;
        let mut dropped = 0usize;
        loop {
            let frame = match self.pending.take() {
                Some(frame) => frame,
                None => match self.decoder.next_frame()? {
                    Some(frame) => frame,
                    None => {
                        tracing::warn!(index, queued, "audio ended before caption end");
                        return Err(PlaybackError::EndOfStream { index });
                    }
                },
            };
            self.positioned_at = None;

            if frame.pts() >= end {
                self.read_position = Some(frame.pts());
                self.pending = Some(frame);
                break;
            }
            let frame_end = frame.end_time();
            self.read_position = Some(frame_end);
            if frame_end <= start {
                tracing::debug!(pts = %frame.pts(), "dropping pre-roll frame");
                dropped += 1;
                continue;
            }
            match trim_to_start(frame, start) {
                Some(frame) => {
                    self.sink.enqueue(frame);
                    queued += 1;
                }
                None => dropped += 1,
            }
            if frame_end >= end {
                break;
            }
        }

        tracing::debug!(index, queued, dropped, "caption queued");
        self.cursor = index + 1;
        Ok(())
    }

    /// Move to caption `index`: seek the decoder to its start and drop queued audio.
    pub fn seek_to_caption(&mut self, index: usize) -> Result<(), PlaybackError> {
        let len = self.captions.len();
        let start = self
            .captions
            .get(index)
            .ok_or(PlaybackError::OutOfRange { index, len })?
            .start();
        self.reposition(start)?;
        self.cursor = index;
        tracing::info!(index, start = %start, "cursor moved");
        Ok(())
    }

    /// Play the most recently played caption again (the first one if nothing played yet).
    pub fn replay(&mut self) -> Result<(), PlaybackError> {
        self.seek_to_caption(self.cursor.saturating_sub(1))?;
        self.play_next()
    }

    /// Toggle the sink between playing and paused; returns the new state.
    pub fn toggle_pause(&mut self) -> Result<SinkState, PlaybackError> {
        match self.sink.state() {
            SinkState::Playing => self.sink.pause()?,
            _ => self.sink.play()?,
        }
        Ok(self.sink.state())
    }

    fn reposition(&mut self, target: RationalTime) -> Result<(), PlaybackError> {
        self.decoder.seek(target.us())?;
        self.sink.flush();
        self.pending = None;
        self.read_position = None;
        self.positioned_at = Some(target);
        tracing::info!(target = %target, reached = %self.decoder.current_time(), "decoder repositioned");
        Ok(())
    }
}

/// Cut the samples preceding `start` off a frame that straddles it.
fn trim_to_start(frame: DecodedAudioFrame, start: RationalTime) -> Option<DecodedAudioFrame> {
    if frame.pts() >= start {
        return Some(frame);
    }
    let lead = start.checked_sub(frame.pts())?.samples_ceil(frame.sample_rate());
    frame.trim_front(usize::try_from(lead).ok()?)
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::{DecodeError, OpenError, SeekError, SinkError};
    use crate::frame::{AudioParam, SampleFormat, SampleLayout, Samples};
    use crate::playback::{NegotiatedSpec, Transport};

    const RATE: u32 = 1_000;
    const FRAME_MS: i64 = 500;

    fn ms(v: i64) -> RationalTime {
        RationalTime::from_ms(v)
    }

    fn frame_at(i: usize) -> DecodedAudioFrame {
        let n = (FRAME_MS as u32 * RATE / 1_000) as usize;
        DecodedAudioFrame::new(
            Samples::I16(vec![i as i16; n]),
            n,
            1,
            RATE,
            SampleLayout::Interleaved,
            ms(i as i64 * FRAME_MS),
        )
        .unwrap()
    }

    /// Contiguous half-second frames; seeks land `preroll` frames before the target.
    struct ScriptedSource {
        frames: Vec<DecodedAudioFrame>,
        next: usize,
        current: RationalTime,
        preroll: usize,
        fail_after: Option<usize>,
        reads: usize,
        seeks: Vec<i64>,
    }

    impl ScriptedSource {
        fn new(total_ms: i64) -> Self {
            let count = (total_ms / FRAME_MS) as usize;
            Self {
                frames: (0..count).map(frame_at).collect(),
                next: 0,
                current: RationalTime::ZERO,
                preroll: 0,
                fail_after: None,
                reads: 0,
                seeks: Vec::new(),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<DecodedAudioFrame>, DecodeError> {
            if self.fail_after == Some(self.reads) {
                return Err(DecodeError::Codec("corrupt packet".to_string()));
            }
            self.reads += 1;
            let Some(frame) = self.frames.get(self.next).cloned() else {
                return Ok(None);
            };
            self.next += 1;
            self.current = frame.pts();
            Ok(Some(frame))
        }

        fn seek(&mut self, timestamp_us: i64) -> Result<(), SeekError> {
            self.seeks.push(timestamp_us);
            let target = RationalTime::from_us(timestamp_us.max(0));
            let at = self
                .frames
                .iter()
                .rposition(|f| f.pts() <= target)
                .unwrap_or(0)
                .saturating_sub(self.preroll);
            self.next = at;
            self.current = self.frames.get(at).map(|f| f.pts()).unwrap_or(RationalTime::ZERO);
            Ok(())
        }

        fn current_time(&self) -> RationalTime {
            self.current
        }

        fn audio_param(&self) -> AudioParam {
            AudioParam {
                sample_rate: RATE,
                channels: 1,
                sample_format: SampleFormat::I16,
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        transport: Transport,
        queued: RefCell<Vec<RationalTime>>,
        flushes: Cell<usize>,
    }

    impl RecordingSink {
        fn opened() -> Self {
            let mut sink = Self::default();
            sink.open(AudioParam::default()).unwrap();
            sink
        }

        fn queued(&self) -> Vec<RationalTime> {
            self.queued.borrow().clone()
        }
    }

    impl AudioSink for RecordingSink {
        fn open(&mut self, param: AudioParam) -> Result<NegotiatedSpec, OpenError> {
            self.transport.opened();
            Ok(NegotiatedSpec {
                sample_rate: param.sample_rate,
                channels: param.channels,
                sample_format: param.sample_format,
                period_frames: None,
                device: "recording".to_string(),
            })
        }

        fn play(&mut self) -> Result<(), SinkError> {
            self.transport.play()
        }

        fn pause(&mut self) -> Result<(), SinkError> {
            self.transport.pause()
        }

        fn enqueue(&self, frame: DecodedAudioFrame) {
            self.queued.borrow_mut().push(frame.pts());
        }

        fn flush(&self) {
            self.queued.borrow_mut().clear();
            self.flushes.set(self.flushes.get() + 1);
        }

        fn state(&self) -> SinkState {
            self.transport.state()
        }
    }

    fn hello_world() -> Vec<Caption> {
        vec![
            Caption::new("Hello", ms(0), ms(2_000)).unwrap(),
            Caption::new("World", ms(2_000), ms(4_000)).unwrap(),
        ]
    }

    fn controller(
        source: ScriptedSource,
        captions: Vec<Caption>,
    ) -> SyncController<ScriptedSource, RecordingSink> {
        SyncController::new(source, RecordingSink::opened(), captions, ms(85))
    }

    #[test]
    fn seek_then_play_queues_only_the_caption_window() {
        let mut ctl = controller(ScriptedSource::new(6_000), hello_world());
        ctl.seek_to_caption(1).unwrap();
        assert_eq!(ctl.cursor(), 1);
        ctl.play_next().unwrap();

        assert_eq!(ctl.sink().queued(), vec![ms(2_000), ms(2_500), ms(3_000), ms(3_500)]);
        assert_eq!(ctl.decoder().seeks, vec![2_000_000]);
        assert_eq!(ctl.cursor(), 2);
        assert_eq!(ctl.current_caption().map(Caption::text), Some("World"));
    }

    #[test]
    fn pre_roll_after_seek_is_dropped_without_reseeking() {
        let mut source = ScriptedSource::new(6_000);
        source.preroll = 2;
        let mut ctl = controller(source, hello_world());
        ctl.seek_to_caption(1).unwrap();
        assert_eq!(ctl.decoder().current_time(), ms(1_000));
        ctl.play_next().unwrap();

        let queued = ctl.sink().queued();
        assert_eq!(queued.first(), Some(&ms(2_000)));
        assert!(queued.iter().all(|&t| t >= ms(2_000) && t < ms(4_000)));
        assert_eq!(ctl.decoder().seeks, vec![2_000_000]);
    }

    #[test]
    fn caption_starting_mid_frame_trims_the_leading_samples() {
        let captions = vec![
            Caption::new("Hello", ms(0), ms(2_250)).unwrap(),
            Caption::new("World", ms(2_250), ms(4_000)).unwrap(),
        ];
        let mut ctl = controller(ScriptedSource::new(6_000), captions);
        ctl.seek_to_caption(1).unwrap();
        ctl.play_next().unwrap();

        let queued = ctl.sink().queued();
        assert_eq!(queued, vec![ms(2_250), ms(2_500), ms(3_000), ms(3_500)]);
        assert!(queued.iter().all(|&t| t >= ms(2_250) && t < ms(4_000)));
    }

    #[test]
    fn last_caption_ending_with_the_audio_completes() {
        let mut ctl = controller(ScriptedSource::new(4_000), hello_world());
        ctl.play_next().unwrap();
        ctl.play_next().unwrap();
        assert_eq!(ctl.cursor(), 2);
        assert_eq!(ctl.sink().queued().len(), 8);
        assert!(ctl.decoder().seeks.is_empty());
    }

    #[test]
    fn consecutive_captions_stream_without_seeking() {
        let mut ctl = controller(ScriptedSource::new(6_000), hello_world());
        ctl.play_next().unwrap();
        assert_eq!(ctl.sink().queued().len(), 4);
        ctl.play_next().unwrap();

        let expected: Vec<_> = (0..8).map(|i| ms(i * FRAME_MS)).collect();
        assert_eq!(ctl.sink().queued(), expected);
        assert!(ctl.decoder().seeks.is_empty());
        assert_eq!(ctl.sink().flushes.get(), 0);
    }

    #[test]
    fn frame_past_a_caption_end_opens_the_next_caption() {
        let mut source = ScriptedSource::new(6_000);
        source.frames.remove(2);
        let captions = vec![
            Caption::new("A", ms(0), ms(1_200)).unwrap(),
            Caption::new("B", ms(1_500), ms(3_000)).unwrap(),
        ];
        let mut ctl = controller(source, captions);
        ctl.play_next().unwrap();
        assert_eq!(ctl.sink().queued(), vec![ms(0), ms(500)]);
        ctl.play_next().unwrap();

        assert_eq!(
            ctl.sink().queued(),
            vec![ms(0), ms(500), ms(1_500), ms(2_000), ms(2_500)]
        );
        assert!(ctl.decoder().seeks.is_empty());
    }

    #[test]
    fn no_more_captions_leaves_decoder_untouched() {
        let mut ctl = controller(ScriptedSource::new(6_000), hello_world());
        ctl.play_next().unwrap();
        ctl.play_next().unwrap();
        let reads = ctl.decoder().reads;

        assert!(matches!(ctl.play_next(), Err(PlaybackError::NoMoreCaptions)));
        assert_eq!(ctl.decoder().reads, reads);
        assert!(ctl.decoder().seeks.is_empty());
        assert_eq!(ctl.cursor(), 2);
    }

    #[test]
    fn drift_beyond_tolerance_seeks_and_flushes() {
        let captions = vec![
            Caption::new("A", ms(0), ms(1_000)).unwrap(),
            Caption::new("B", ms(3_000), ms(4_000)).unwrap(),
        ];
        let mut ctl = controller(ScriptedSource::new(6_000), captions);
        ctl.play_next().unwrap();
        ctl.play_next().unwrap();

        assert_eq!(ctl.decoder().seeks, vec![3_000_000]);
        assert_eq!(ctl.sink().flushes.get(), 1);
        assert_eq!(ctl.sink().queued(), vec![ms(3_000), ms(3_500)]);
    }

    #[test]
    fn drift_within_tolerance_keeps_streaming() {
        let captions = vec![
            Caption::new("A", ms(0), ms(1_000)).unwrap(),
            Caption::new("B", ms(1_040), ms(2_000)).unwrap(),
        ];
        let mut ctl = controller(ScriptedSource::new(6_000), captions);
        ctl.play_next().unwrap();
        ctl.play_next().unwrap();

        assert!(ctl.decoder().seeks.is_empty());
        assert_eq!(ctl.sink().queued(), vec![ms(0), ms(500), ms(1_040), ms(1_500)]);
    }

    #[test]
    fn end_of_stream_mid_caption_keeps_cursor() {
        let mut ctl = controller(ScriptedSource::new(3_000), hello_world());
        ctl.play_next().unwrap();
        assert!(matches!(
            ctl.play_next(),
            Err(PlaybackError::EndOfStream { index: 1 })
        ));
        assert_eq!(ctl.cursor(), 1);
    }

    #[test]
    fn decode_failure_is_surfaced() {
        let mut source = ScriptedSource::new(6_000);
        source.fail_after = Some(2);
        let mut ctl = controller(source, hello_world());
        assert!(matches!(
            ctl.play_next(),
            Err(PlaybackError::Decode(DecodeError::Codec(_)))
        ));
        assert_eq!(ctl.cursor(), 0);
    }

    #[test]
    fn seek_out_of_range() {
        let mut ctl = controller(ScriptedSource::new(6_000), hello_world());
        assert!(matches!(
            ctl.seek_to_caption(5),
            Err(PlaybackError::OutOfRange { index: 5, len: 2 })
        ));
        assert!(ctl.decoder().seeks.is_empty());
        assert_eq!(ctl.cursor(), 0);
    }

    #[test]
    fn replay_plays_the_last_caption_again() {
        let mut ctl = controller(ScriptedSource::new(6_000), hello_world());
        ctl.play_next().unwrap();
        ctl.replay().unwrap();

        assert_eq!(ctl.decoder().seeks, vec![0]);
        assert_eq!(ctl.sink().queued(), vec![ms(0), ms(500), ms(1_000), ms(1_500)]);
        assert_eq!(ctl.cursor(), 1);
    }

    #[test]
    fn play_next_resumes_a_paused_sink() {
        let mut ctl = controller(ScriptedSource::new(6_000), hello_world());
        assert_eq!(ctl.sink().state(), SinkState::Paused);
        ctl.play_next().unwrap();
        assert_eq!(ctl.sink().state(), SinkState::Playing);

        assert_eq!(ctl.toggle_pause().unwrap(), SinkState::Paused);
        ctl.play_next().unwrap();
        assert_eq!(ctl.sink().state(), SinkState::Playing);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn seeks_are_logged_through_the_ambient_subscriber() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut ctl = controller(ScriptedSource::new(6_000), hello_world());
            ctl.seek_to_caption(1).unwrap();
        });

        let out = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("decoder repositioned"));
        assert!(out.contains("cursor moved"));
    }
}
