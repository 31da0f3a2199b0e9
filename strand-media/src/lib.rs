#![warn(rust_2018_idioms)]

pub mod lipsync;
pub mod ntp;
pub mod recorder;
pub mod sample;
pub mod webm;

pub use recorder::{Recorder, RecorderTrackKind};
pub use sample::Sample;
