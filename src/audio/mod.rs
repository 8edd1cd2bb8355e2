//! Audio subsystem module

pub mod decoder;
pub mod pipe;
pub mod ring;
pub mod sample;
pub mod sink;
pub mod source;

pub use decoder::FileSource;
pub use pipe::{Audio, PipeAudio};
pub use ring::RingBuffer;
pub use sample::SampleFormat;
pub use sink::{list_output_devices, DeviceSink, Sink, SinkFn, SinkState};
pub use source::{DecodeState, Source, SourceFn};
