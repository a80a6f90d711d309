//! Caption-synchronized audio playback.
//!
//! Audio flows `StreamReader → AudioDecoder → SyncController → AudioSink`; the sink's
//! device callback drains a bounded [`queue::FrameQueue`] at its own pace.

pub mod cache;
pub mod caption;
pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod frame;
pub mod playback;
pub mod queue;
pub mod reader;
pub mod sync;
pub mod time;
