//! Shadow runtime.
//!
//! Resolves the talk audio, loads its captions and runs the interactive loop: a stdin
//! thread feeds [`UserCommand`]s over a channel and the main thread drives the
//! [`SyncController`].

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use talk_player::cache::{HttpFetcher, MediaCache};
use talk_player::caption::{Caption, CaptionDecoder};
use talk_player::decode::{AudioDecoder, FrameSource};
use talk_player::device;
use talk_player::error::PlaybackError;
use talk_player::playback::{AudioSink, CpalSink, SinkState};
use talk_player::sync::SyncController;
use talk_player::time::RationalTime;

use crate::command::{HELP, UserCommand, forward_commands};
use crate::config::ShadowPlayConfig;

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Print every caption of a script.
pub fn print_captions(path: &Path) -> Result<()> {
    let captions = load_captions(path)?;
    let mut out = std::io::stdout().lock();
    for (i, caption) in captions.iter().enumerate() {
        writeln!(out, "{}", format_caption(i, caption))?;
    }
    Ok(())
}

/// Play a talk interactively until the user quits or stdin closes.
pub fn run_play(config: ShadowPlayConfig, install_ctrlc: bool) -> Result<()> {
    let cache = MediaCache::new(&config.player.cache_dir);
    let media = cache.resolve(&config.source, &HttpFetcher::default())?;
    let captions = load_captions(&config.captions)?;

    let decoder = AudioDecoder::open_path(&media)
        .with_context(|| format!("open audio {:?}", media))?;
    let param = decoder.audio_param();

    let host = cpal::default_host();
    let device_name = normalize_device_name(config.device);
    let device = device::pick_device(&host, device_name.as_deref())?;
    tracing::info!(device = %device::device_name(&device), "output device");

    let mut sink = CpalSink::new(device, &config.player);
    sink.open(param).context("open output")?;

    let mut controller =
        SyncController::new(decoder, sink, captions, config.player.seek_tolerance());
    if config.start > 0 {
        controller
            .seek_to_caption(config.start)
            .context("seek to start caption")?;
    }

    let (tx, rx) = crossbeam_channel::unbounded();
    if install_ctrlc {
        install_quit_handler(tx.clone())?;
    }
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || forward_commands(std::io::stdin().lock(), &tx))
        .context("spawn stdin reader")?;

    println!("{HELP}");
    run_session(&mut controller, &rx, &mut std::io::stdout())?;

    if let Some(stats) = controller.sink().stats() {
        tracing::info!(
            played_frames = stats.played_frames.load(Ordering::Relaxed),
            underrun_events = stats.underrun_events.load(Ordering::Relaxed),
            underrun_frames = stats.underrun_frames.load(Ordering::Relaxed),
            "playback finished"
        );
    }
    Ok(())
}

/// Apply commands from `rx` until `Quit` or the channel closes.
pub fn run_session<D, S>(
    controller: &mut SyncController<D, S>,
    rx: &Receiver<UserCommand>,
    out: &mut impl Write,
) -> Result<()>
where
    D: FrameSource,
    S: AudioSink,
{
    while let Ok(cmd) = rx.recv() {
        if !apply_command(controller, cmd, out)? {
            break;
        }
    }
    Ok(())
}

/// Run one command; returns `false` when the session should end.
pub fn apply_command<D, S>(
    controller: &mut SyncController<D, S>,
    cmd: UserCommand,
    out: &mut impl Write,
) -> Result<bool>
where
    D: FrameSource,
    S: AudioSink,
{
    let result = match cmd {
        UserCommand::Quit => return Ok(false),
        UserCommand::Help => {
            writeln!(out, "{HELP}")?;
            Ok(())
        }
        UserCommand::List => {
            for (i, caption) in controller.captions().iter().enumerate() {
                let marker = if i == controller.cursor() { ">" } else { " " };
                writeln!(out, "{marker}{}", format_caption(i, caption))?;
            }
            Ok(())
        }
        UserCommand::TogglePause => controller.toggle_pause().map(|state| {
            let label = match state {
                SinkState::Playing => "resumed",
                _ => "paused",
            };
            let _ = writeln!(out, "{label}");
        }),
        UserCommand::Next => play_and_show(controller, out, |c| c.play_next()),
        UserCommand::Replay => play_and_show(controller, out, |c| c.replay()),
        UserCommand::Goto(index) => controller.seek_to_caption(index).map(|()| {
            if let Some(caption) = controller.next_caption() {
                let _ = writeln!(out, "next: {}", format_caption(index, caption));
            }
        }),
    };

    match result {
        Ok(()) => {}
        Err(PlaybackError::NoMoreCaptions) => writeln!(out, "no more captions")?,
        Err(PlaybackError::EndOfStream { index }) => {
            tracing::warn!(index, "audio ended inside caption");
            writeln!(out, "end of talk")?
        }
        Err(e @ (PlaybackError::OutOfRange { .. } | PlaybackError::Sink(_))) => {
            writeln!(out, "{e}")?
        }
        Err(e) => {
            tracing::error!("playback failed: {e}");
            writeln!(out, "{e}")?;
        }
    }
    Ok(true)
}

fn play_and_show<D, S>(
    controller: &mut SyncController<D, S>,
    out: &mut impl Write,
    play: impl FnOnce(&mut SyncController<D, S>) -> Result<(), PlaybackError>,
) -> Result<(), PlaybackError>
where
    D: FrameSource,
    S: AudioSink,
{
    if let Some(caption) = controller.next_caption() {
        let index = controller.cursor();
        let _ = writeln!(out, "{}", format_caption(index, caption));
    }
    play(controller)
}

fn load_captions(path: &Path) -> Result<Vec<Caption>> {
    let captions =
        CaptionDecoder::read_all(path).with_context(|| format!("load captions {:?}", path))?;
    tracing::info!(count = captions.len(), "captions loaded");
    Ok(captions)
}

fn install_quit_handler(tx: Sender<UserCommand>) -> Result<()> {
    let requested = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler(move || {
        // A second interrupt while a caption is still queueing exits immediately.
        if requested.swap(true, Ordering::Relaxed) || tx.send(UserCommand::Quit).is_err() {
            std::process::exit(130);
        }
    })
    .context("install ctrl-c handler")
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub fn format_caption(index: usize, caption: &Caption) -> String {
    format!(
        "[{index}] {} - {}  {}",
        format_time(caption.start()),
        format_time(caption.end()),
        caption.text()
    )
}

/// `m:ss.mmm`
fn format_time(t: RationalTime) -> String {
    let ms = t.ms().max(0);
    format!("{}:{:02}.{:03}", ms / 60_000, (ms / 1_000) % 60, ms % 1_000)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use talk_player::error::{DecodeError, OpenError, SeekError, SinkError};
    use talk_player::frame::{AudioParam, DecodedAudioFrame, SampleFormat, SampleLayout, Samples};
    use talk_player::playback::{NegotiatedSpec, Transport};

    use super::*;

    const RATE: u32 = 100;

    /// One-second silent frames.
    struct SilentSource {
        total_secs: i64,
        next: i64,
        current: RationalTime,
    }

    impl FrameSource for SilentSource {
        fn next_frame(&mut self) -> Result<Option<DecodedAudioFrame>, DecodeError> {
            if self.next >= self.total_secs {
                return Ok(None);
            }
            let pts = RationalTime::from_secs(self.next);
            self.next += 1;
            self.current = pts;
            Ok(DecodedAudioFrame::new(
                Samples::F32(vec![0.0; RATE as usize]),
                RATE as usize,
                1,
                RATE,
                SampleLayout::Interleaved,
                pts,
            ))
        }

        fn seek(&mut self, timestamp_us: i64) -> Result<(), SeekError> {
            self.next = timestamp_us.max(0) / 1_000_000;
            self.current = RationalTime::from_secs(self.next);
            Ok(())
        }

        fn current_time(&self) -> RationalTime {
            self.current
        }

        fn audio_param(&self) -> AudioParam {
            AudioParam {
                sample_rate: RATE,
                channels: 1,
                sample_format: SampleFormat::F32,
            }
        }
    }

    #[derive(Default)]
    struct CountingSink {
        transport: Transport,
        frames: RefCell<usize>,
    }

    impl AudioSink for CountingSink {
        fn open(&mut self, param: AudioParam) -> Result<NegotiatedSpec, OpenError> {
            self.transport.opened();
            Ok(NegotiatedSpec {
                sample_rate: param.sample_rate,
                channels: param.channels,
                sample_format: param.sample_format,
                period_frames: None,
                device: "counting".to_string(),
            })
        }

        fn play(&mut self) -> Result<(), SinkError> {
            self.transport.play()
        }

        fn pause(&mut self) -> Result<(), SinkError> {
            self.transport.pause()
        }

        fn enqueue(&self, _frame: DecodedAudioFrame) {
            *self.frames.borrow_mut() += 1;
        }

        fn flush(&self) {
            *self.frames.borrow_mut() = 0;
        }

        fn state(&self) -> SinkState {
            self.transport.state()
        }
    }

    fn session() -> SyncController<SilentSource, CountingSink> {
        session_with_audio(10)
    }

    fn session_with_audio(total_secs: i64) -> SyncController<SilentSource, CountingSink> {
        let source = SilentSource {
            total_secs,
            next: 0,
            current: RationalTime::ZERO,
        };
        let mut sink = CountingSink::default();
        sink.open(source.audio_param()).unwrap();
        let captions = vec![
            Caption::new("First sentence.", RationalTime::from_secs(0), RationalTime::from_secs(2))
                .unwrap(),
            Caption::new("Second one.", RationalTime::from_secs(2), RationalTime::from_secs(5))
                .unwrap(),
        ];
        SyncController::new(source, sink, captions, RationalTime::from_ms(85))
    }

    fn run(controller: &mut SyncController<SilentSource, CountingSink>, cmds: &[UserCommand]) -> String {
        let (tx, rx) = crossbeam_channel::unbounded();
        for cmd in cmds {
            tx.send(*cmd).unwrap();
        }
        drop(tx);
        let mut out = Vec::new();
        run_session(controller, &rx, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn next_prints_and_plays_each_caption() {
        let mut ctl = session();
        let out = run(&mut ctl, &[UserCommand::Next, UserCommand::Next, UserCommand::Next]);
        assert!(out.contains("[0] 0:00.000 - 0:02.000  First sentence."));
        assert!(out.contains("[1] 0:02.000 - 0:05.000  Second one."));
        assert!(out.contains("no more captions"));
        assert_eq!(ctl.cursor(), 2);
        assert_eq!(*ctl.sink().frames.borrow(), 5);
    }

    #[test]
    fn audio_running_out_reports_end_of_talk() {
        let mut ctl = session_with_audio(3);
        let out = run(&mut ctl, &[UserCommand::Next, UserCommand::Next]);
        assert!(out.contains("end of talk"));
        assert_eq!(ctl.cursor(), 1);
    }

    #[test]
    fn quit_stops_processing() {
        let mut ctl = session();
        run(&mut ctl, &[UserCommand::Quit, UserCommand::Next]);
        assert_eq!(ctl.cursor(), 0);
    }

    #[test]
    fn goto_out_of_range_is_reported() {
        let mut ctl = session();
        let out = run(&mut ctl, &[UserCommand::Goto(7), UserCommand::Goto(1), UserCommand::List]);
        assert!(out.contains("out of range"));
        assert!(out.contains("next: [1]"));
        assert!(out.contains(">[1]"));
        assert_eq!(ctl.cursor(), 1);
    }

    #[test]
    fn pause_before_playing_reports_sink_state() {
        let mut ctl = session();
        let out = run(&mut ctl, &[UserCommand::TogglePause, UserCommand::TogglePause]);
        assert_eq!(out.lines().collect::<Vec<_>>(), vec!["resumed", "paused"]);
    }

    #[test]
    fn format_time_is_minutes_seconds_millis() {
        assert_eq!(format_time(RationalTime::from_ms(75_250)), "1:15.250");
        assert_eq!(format_time(RationalTime::from_ms(-5)), "0:00.000");
    }

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some("  ".to_string())), None);
        assert_eq!(
            normalize_device_name(Some(" USB DAC ".to_string())),
            Some("USB DAC".to_string())
        );
    }
}
