//! Caption sources.
//!
//! Captions are read from sidecar scripts next to the talk audio:
//! - SubStation Alpha (`.ass`, `.ssa`) `Dialogue` events
//! - SubRip (`.srt`) cues
//! - JSON arrays of `{text, start_ms, end_ms}` records (`.json`)
//!
//! [`CaptionDecoder`] exposes them through the same [`StreamDecoder`] interface as audio.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{CaptionError, DecodeError, OpenError, SeekError};
use crate::reader::{DecodeOutcome, MediaKind, StreamDecoder};
use crate::time::RationalTime;

/// A line of text and the time window it covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caption {
    text: String,
    start: RationalTime,
    end: RationalTime,
}

impl Caption {
    /// Returns `None` when `start > end`.
    pub fn new(text: impl Into<String>, start: RationalTime, end: RationalTime) -> Option<Self> {
        if start > end {
            return None;
        }
        Some(Self {
            text: text.into(),
            start,
            end,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn start(&self) -> RationalTime {
        self.start
    }

    pub fn end(&self) -> RationalTime {
        self.end
    }

    pub fn duration(&self) -> RationalTime {
        self.end.checked_sub(self.start).unwrap_or(RationalTime::ZERO)
    }

    /// Append `next` to this caption, joining the texts with a single space and extending
    /// `end` to cover `next`.
    ///
    /// Fails with [`CaptionError::Gap`] when `next` starts after this caption ends.
    pub fn merge(&mut self, next: &Caption) -> Result<(), CaptionError> {
        if next.start > self.end {
            return Err(CaptionError::Gap {
                end_us: self.end.us(),
                next_start_us: next.start.us(),
            });
        }
        let tail = next.text.trim_start();
        if !tail.is_empty() {
            if !self.text.is_empty() && !self.text.ends_with(char::is_whitespace) {
                self.text.push(' ');
            }
            self.text.push_str(tail);
        }
        self.end = self.end.max(next.end);
        Ok(())
    }
}

/// Caption script format, picked from the file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptionFormat {
    SubStationAlpha,
    SubRip,
    Json,
}

impl CaptionFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "ass" | "ssa" => Some(Self::SubStationAlpha),
            "srt" => Some(Self::SubRip),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn parse(self, input: &str) -> Result<Vec<Caption>, CaptionError> {
        match self {
            Self::SubStationAlpha => parse_ass(input),
            Self::SubRip => parse_srt(input),
            Self::Json => parse_captions_json(input),
        }
    }
}

/// Caption decoder over a sidecar script.
///
/// The whole script is parsed on open; `decode_next` then yields captions in start order.
pub struct CaptionDecoder {
    path: PathBuf,
    captions: Option<Vec<Caption>>,
    next: usize,
}

impl CaptionDecoder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            captions: None,
            next: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of captions in the script; zero before open.
    pub fn len(&self) -> usize {
        self.captions.as_ref().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open the script and drain every caption.
    pub fn read_all(path: impl Into<PathBuf>) -> Result<Vec<Caption>, OpenError> {
        let mut decoder = Self::new(path);
        decoder.open()?;
        Ok(decoder.captions.take().unwrap_or_default())
    }
}

impl StreamDecoder for CaptionDecoder {
    type Unit = Caption;

    fn open(&mut self) -> Result<(), OpenError> {
        let format = CaptionFormat::from_path(&self.path).ok_or_else(|| OpenError::NoDecoder {
            path: self.path.clone(),
            codec: self
                .path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("unknown")
                .to_string(),
        })?;
        let input = std::fs::read_to_string(&self.path).map_err(|source| OpenError::NotFound {
            path: self.path.clone(),
            source,
        })?;
        let mut captions = format.parse(&input).map_err(|e| OpenError::Probe {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        if captions.is_empty() {
            return Err(OpenError::NoStream {
                path: self.path.clone(),
                kind: MediaKind::Caption,
            });
        }
        captions.sort_by_key(Caption::start);
        tracing::info!(
            path = ?self.path,
            format = ?format,
            captions = captions.len(),
            "caption script loaded"
        );
        self.captions = Some(captions);
        self.next = 0;
        Ok(())
    }

    /// Position on the first caption still showing at `timestamp_us`.
    fn seek(&mut self, timestamp_us: i64) -> Result<(), SeekError> {
        let captions = self.captions.as_ref().ok_or(SeekError::NotInitialized)?;
        let target = RationalTime::from_us(timestamp_us.max(0));
        self.next = captions
            .iter()
            .position(|c| c.end > target)
            .unwrap_or(captions.len());
        tracing::debug!(target_us = timestamp_us, index = self.next, "caption seek");
        Ok(())
    }

    fn decode_next(&mut self) -> Result<DecodeOutcome<Caption>, DecodeError> {
        let captions = self.captions.as_ref().ok_or(DecodeError::NotInitialized)?;
        match captions.get(self.next) {
            Some(caption) => {
                self.next += 1;
                Ok(DecodeOutcome::Frame(caption.clone()))
            }
            None => Ok(DecodeOutcome::EndOfStream),
        }
    }
}

const DEFAULT_ASS_FORMAT: [&str; 10] = [
    "layer", "start", "end", "style", "name", "marginl", "marginr", "marginv", "effect", "text",
];

/// Parse the `Dialogue` events of a SubStation Alpha script.
///
/// Field order comes from the `[Events]` `Format:` line; without one the v4+ default
/// order is assumed. Override blocks (`{...}`) are stripped and hard breaks become spaces.
pub fn parse_ass(input: &str) -> Result<Vec<Caption>, CaptionError> {
    let mut in_events = false;
    let mut format: Vec<String> = DEFAULT_ASS_FORMAT.iter().map(|s| s.to_string()).collect();
    let mut captions = Vec::new();

    for (idx, raw) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_start_matches('\u{feff}').trim();
        if line.starts_with('[') {
            in_events = line.eq_ignore_ascii_case("[events]");
            continue;
        }
        if !in_events {
            continue;
        }
        if let Some(fields) = line.strip_prefix("Format:") {
            format = fields
                .split(',')
                .map(|f| f.trim().to_ascii_lowercase())
                .collect();
            if !format.iter().any(|f| f == "text") {
                return Err(CaptionError::Parse {
                    line: line_no,
                    reason: "Format line has no Text field".to_string(),
                });
            }
            continue;
        }
        let Some(body) = line.strip_prefix("Dialogue:") else {
            continue;
        };

        // Text is last and may itself contain commas.
        let values: Vec<&str> = body.trim_start().splitn(format.len(), ',').collect();
        if values.len() != format.len() {
            return Err(CaptionError::Parse {
                line: line_no,
                reason: format!("expected {} fields, got {}", format.len(), values.len()),
            });
        }
        let field = |name: &str| {
            format
                .iter()
                .position(|f| f == name)
                .and_then(|i| values.get(i).copied())
        };
        let missing = |name: &str| CaptionError::Parse {
            line: line_no,
            reason: format!("missing {name} field"),
        };

        let start = parse_ass_time(field("start").ok_or_else(|| missing("Start"))?)
            .ok_or_else(|| bad_time(line_no, "Start"))?;
        let end = parse_ass_time(field("end").ok_or_else(|| missing("End"))?)
            .ok_or_else(|| bad_time(line_no, "End"))?;
        let text = clean_ass_text(field("text").ok_or_else(|| missing("Text"))?);
        if text.is_empty() {
            continue;
        }
        let caption = Caption::new(text, start, end).ok_or_else(|| CaptionError::Parse {
            line: line_no,
            reason: "caption ends before it starts".to_string(),
        })?;
        captions.push(caption);
    }

    Ok(captions)
}

/// Parse the cues of a SubRip script. Multi-line cue text is joined with spaces.
pub fn parse_srt(input: &str) -> Result<Vec<Caption>, CaptionError> {
    let mut captions = Vec::new();
    let mut lines = input.lines().enumerate().peekable();

    loop {
        // Skip blank lines between cues.
        while lines.next_if(|(_, l)| is_blank(l)).is_some() {}
        let Some((idx, first)) = lines.next() else {
            break;
        };

        let (line_no, timing) = if first.contains("-->") {
            (idx + 1, first)
        } else {
            // Cue number; the timing line follows.
            match lines.next() {
                Some((i, l)) if l.contains("-->") => (i + 1, l),
                _ => {
                    return Err(CaptionError::Parse {
                        line: idx + 1,
                        reason: "expected a cue timing line".to_string(),
                    });
                }
            }
        };

        let (start, end) = parse_srt_timing(timing).ok_or_else(|| CaptionError::Parse {
            line: line_no,
            reason: format!("invalid cue timing: {}", timing.trim()),
        })?;

        let mut text = String::new();
        while let Some((_, l)) = lines.next_if(|(_, l)| !is_blank(l)) {
            let l = l.trim();
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(l);
        }
        if text.is_empty() {
            continue;
        }
        let caption = Caption::new(text, start, end).ok_or_else(|| CaptionError::Parse {
            line: line_no,
            reason: "caption ends before it starts".to_string(),
        })?;
        captions.push(caption);
    }

    Ok(captions)
}

#[derive(Debug, Deserialize)]
struct CaptionRecord {
    text: String,
    start_ms: i64,
    end_ms: i64,
}

/// Parse a JSON array of `{text, start_ms, end_ms}` records.
pub fn parse_captions_json(input: &str) -> Result<Vec<Caption>, CaptionError> {
    let records: Vec<CaptionRecord> = serde_json::from_str(input)?;
    records
        .into_iter()
        .enumerate()
        .filter(|(_, r)| !r.text.trim().is_empty())
        .map(|(i, r)| {
            Caption::new(
                r.text.trim(),
                RationalTime::from_ms(r.start_ms),
                RationalTime::from_ms(r.end_ms),
            )
            .ok_or_else(|| CaptionError::Parse {
                line: i + 1,
                reason: format!("record ends at {} ms before it starts at {} ms", r.end_ms, r.start_ms),
            })
        })
        .collect()
}

fn is_blank(line: &str) -> bool {
    line.trim_start_matches('\u{feff}').trim().is_empty()
}

fn bad_time(line: usize, field: &str) -> CaptionError {
    CaptionError::Parse {
        line,
        reason: format!("invalid {field} time"),
    }
}

/// `H:MM:SS.cc` (centiseconds; any fraction length is accepted).
fn parse_ass_time(s: &str) -> Option<RationalTime> {
    let (hms, frac) = s.trim().split_once('.').unwrap_or((s.trim(), "0"));
    clock_to_time(hms, frac)
}

/// `HH:MM:SS,mmm` (a `.` separator is tolerated).
fn parse_srt_time(s: &str) -> Option<RationalTime> {
    let s = s.trim();
    let (hms, frac) = s.split_once([',', '.']).unwrap_or((s, "0"));
    clock_to_time(hms, frac)
}

/// `H:MM:SS` plus a decimal fraction. Fields are unsigned; overflow is rejected.
fn clock_to_time(hms: &str, frac: &str) -> Option<RationalTime> {
    let mut parts = hms.split(':');
    let h = parse_clock_field(parts.next()?)?;
    let m = parse_clock_field(parts.next()?)?;
    let sec = parse_clock_field(parts.next()?)?;
    if parts.next().is_some() || m >= 60 || sec >= 60 {
        return None;
    }
    let ms = h
        .checked_mul(3_600_000)?
        .checked_add(m * 60_000 + sec * 1_000)?
        .checked_add(fraction_to_ms(frac)?)?;
    Some(RationalTime::from_ms(i64::try_from(ms).ok()?))
}

fn parse_clock_field(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_srt_timing(line: &str) -> Option<(RationalTime, RationalTime)> {
    let (start, rest) = line.split_once("-->")?;
    // Anything after the end time (cue position) is ignored.
    let end = rest.split_whitespace().next()?;
    Some((parse_srt_time(start)?, parse_srt_time(end)?))
}

/// Decimal fraction digits to milliseconds, truncating past the third digit.
fn fraction_to_ms(frac: &str) -> Option<u64> {
    if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits: String = frac.chars().chain("000".chars()).take(3).collect();
    digits.parse().ok()
}

fn clean_ass_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_override = false;
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => in_override = true,
            '}' if in_override => in_override = false,
            _ if in_override => {}
            '\\' if matches!(chars.peek().copied(), Some('N' | 'n' | 'h')) => {
                chars.next();
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
