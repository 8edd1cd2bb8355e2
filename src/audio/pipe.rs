//! The decode→transfer pipe
//!
//! [`Audio`] is what the player owns: either nothing, or a
//! [`PipeAudio`] pairing one source with one sink. Each update cycle
//! shifts decoded frames from the source into the sink's ring buffer.

use crate::audio::sink::{Sink, SinkState};
use crate::audio::source::{DecodeState, Source};
use crate::error::{Error, Result};

/// The player's current audio item.
pub enum Audio {
    /// No file loaded; state queries fail with `NoFile`.
    Null,
    /// A loaded file.
    Pipe(PipeAudio),
}

impl Audio {
    /// Whether a file is loaded.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Audio::Pipe(_))
    }

    /// Perform one update cycle. A null audio idles in `Stopped`.
    pub fn update(&mut self) -> Result<SinkState> {
        match self {
            Audio::Null => Ok(SinkState::Stopped),
            Audio::Pipe(pipe) => pipe.update(),
        }
    }

    /// Current transport state.
    pub fn state(&self) -> SinkState {
        match self {
            Audio::Null => SinkState::Stopped,
            Audio::Pipe(pipe) => pipe.sink.state(),
        }
    }

    pub fn set_playing(&mut self, playing: bool) -> Result<()> {
        match self {
            Audio::Null => Err(Error::NoFile),
            Audio::Pipe(pipe) => pipe.set_playing(playing),
        }
    }

    pub fn set_position(&mut self, micros: u64) -> Result<()> {
        match self {
            Audio::Null => Err(Error::NoFile),
            Audio::Pipe(pipe) => pipe.set_position(micros),
        }
    }

    /// Force the end-of-file state: discard buffered PCM, pin the source
    /// at its end and mark it out.
    pub fn end(&mut self) -> Result<()> {
        match self {
            Audio::Null => Err(Error::NoFile),
            Audio::Pipe(pipe) => pipe.end(),
        }
    }

    /// Path of the loaded file.
    pub fn path(&self) -> Result<&str> {
        match self {
            Audio::Null => Err(Error::NoFile),
            Audio::Pipe(pipe) => Ok(pipe.source.path()),
        }
    }

    /// Playback position in microseconds.
    pub fn position(&self) -> Result<u64> {
        match self {
            Audio::Null => Err(Error::NoFile),
            Audio::Pipe(pipe) => Ok(pipe.position()),
        }
    }

    /// File length in microseconds, when the container reports one.
    pub fn length(&self) -> Result<Option<u64>> {
        match self {
            Audio::Null => Err(Error::NoFile),
            Audio::Pipe(pipe) => Ok(pipe.length()),
        }
    }

    /// Broadcast throttle: true at most once per whole second of
    /// position, and once immediately after a load or seek.
    pub fn can_announce_time(&mut self, micros: u64) -> bool {
        match self {
            Audio::Null => false,
            Audio::Pipe(pipe) => pipe.can_announce_time(micros),
        }
    }
}

/// One source feeding one sink through the current decoded frame.
pub struct PipeAudio {
    source: Box<dyn Source>,
    sink: Box<dyn Sink>,
    /// The current decoded frame; empty when finished.
    frame: Vec<u8>,
    /// Read cursor into `frame`. Invariant outside `update`: either the
    /// frame is empty, or `cursor < frame.len()`.
    cursor: usize,
    announced_time: bool,
    last_second: u64,
}

impl PipeAudio {
    pub fn new(source: Box<dyn Source>, sink: Box<dyn Sink>) -> Self {
        Self {
            source,
            sink,
            frame: Vec::new(),
            cursor: 0,
            announced_time: false,
            last_second: 0,
        }
    }

    /// One update cycle: decode if the frame is spent, transfer what
    /// fits, report the sink state.
    pub fn update(&mut self) -> Result<SinkState> {
        if let Some(err) = self.sink.take_error() {
            return Err(err);
        }

        if self.frame_finished() {
            self.decode_next()?;
        }

        if !self.frame.is_empty() {
            self.cursor += self.sink.transfer(&self.frame[self.cursor..]);
            if self.frame_finished() {
                self.clear_frame();
            }
        }

        Ok(self.sink.state())
    }

    fn set_playing(&mut self, playing: bool) -> Result<()> {
        if playing {
            self.sink.start()
        } else {
            self.sink.stop();
            Ok(())
        }
    }

    /// Seek to a microsecond offset. The sink must not be playing.
    fn set_position(&mut self, micros: u64) -> Result<()> {
        let samples = self.source.samples_from_micros(micros);
        let actual = self.source.seek(samples)?;
        self.sink.set_position(actual)?;

        // Stale samples from the old position may still sit in the frame.
        self.clear_frame();
        self.announced_time = false;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.sink.stop();
        // Without a known length the file "ends" where playback got to.
        let target = self
            .source
            .length()
            .unwrap_or_else(|| self.sink.position());
        let actual = self.source.seek(target)?;
        self.sink.set_position(actual)?;
        self.clear_frame();
        self.announced_time = false;
        self.sink.source_out();
        Ok(())
    }

    fn position(&self) -> u64 {
        self.source.micros_from_samples(self.sink.position())
    }

    fn length(&self) -> Option<u64> {
        self.source
            .length()
            .map(|samples| self.source.micros_from_samples(samples))
    }

    fn can_announce_time(&mut self, micros: u64) -> bool {
        let secs = micros / 1_000_000;
        let announce = !self.announced_time || self.last_second < secs;
        if announce {
            self.announced_time = true;
            self.last_second = secs;
        }
        announce
    }

    fn frame_finished(&self) -> bool {
        self.cursor >= self.frame.len()
    }

    fn clear_frame(&mut self) {
        self.frame.clear();
        self.cursor = 0;
    }

    fn decode_next(&mut self) -> Result<()> {
        let (state, bytes) = self.source.decode()?;
        self.frame = bytes;
        self.cursor = 0;
        if state == DecodeState::EndOfFile {
            self.sink.source_out();
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn pipe(len_samples: u64) -> (PipeAudio, Rc<RefCell<SinkProbe>>) {
        let probe = Rc::new(RefCell::new(SinkProbe::default()));
        let source = Box::new(StubSource::new("/music/a.mp3", len_samples));
        let sink = Box::new(StubSink::new(probe.clone()));
        (PipeAudio::new(source, sink), probe)
    }

    #[test]
    fn update_fills_sink_until_buffer_is_full() {
        let (mut pipe, probe) = pipe(10_000);
        for _ in 0..100 {
            pipe.update().unwrap();
        }
        assert_eq!(probe.borrow().buffered, 256 * FRAME_BYTES);
        assert!(!probe.borrow().source_out);
    }

    #[test]
    fn short_file_reaches_at_end_once_drained() {
        let (mut pipe, probe) = pipe(128);
        assert_eq!(pipe.update().unwrap(), SinkState::Stopped);

        pipe.set_playing(true).unwrap();
        loop {
            let state = pipe.update().unwrap();
            if state == SinkState::AtEnd {
                break;
            }
            probe.borrow_mut().drain(64);
        }
        assert!(probe.borrow().source_out);
        assert_eq!(probe.borrow().position, 128);
    }

    #[test]
    fn seek_clears_frame_and_resets_throttle() {
        let (mut pipe, probe) = pipe(48_000 * 10);
        pipe.update().unwrap();
        assert!(pipe.can_announce_time(0));
        assert!(!pipe.can_announce_time(500_000));

        pipe.set_position(2_000_000).unwrap();
        assert!(pipe.frame.is_empty());
        assert_eq!(probe.borrow().seeks, vec![96_000]);
        // The throttle re-arms after a seek.
        assert!(pipe.can_announce_time(2_000_000));
    }

    #[test]
    fn announce_throttle_is_per_whole_second() {
        let (mut pipe, _) = pipe(48_000 * 10);
        assert!(pipe.can_announce_time(100));
        assert!(!pipe.can_announce_time(999_999));
        assert!(pipe.can_announce_time(1_000_000));
        assert!(!pipe.can_announce_time(1_900_000));
        assert!(pipe.can_announce_time(3_000_000));
    }

    #[test]
    fn position_and_length_are_in_micros() {
        let (mut pipe, probe) = pipe(48_000 * 3);
        pipe.update().unwrap();
        probe.borrow_mut().state = SinkState::Playing;
        probe.borrow_mut().drain(64);
        assert_eq!(pipe.length(), Some(3_000_000));
        assert!(pipe.position() <= 3_000_000);
    }

    #[test]
    fn end_pins_source_and_marks_out() {
        let (mut pipe, probe) = pipe(48_000);
        pipe.update().unwrap();
        pipe.end().unwrap();
        assert!(probe.borrow().source_out);
        assert_eq!(probe.borrow().position, 48_000);
        // Drained and out: the callback flips to AT_END.
        probe.borrow_mut().drain(0);
        assert_eq!(pipe.update().unwrap(), SinkState::AtEnd);
    }

    #[test]
    fn out_of_range_seek_errors() {
        let (mut pipe, _) = pipe(48_000);
        assert!(matches!(
            pipe.set_position(10_000_000),
            Err(Error::Seek(_))
        ));
    }

    #[test]
    fn null_audio_refuses_state_queries() {
        let mut audio = Audio::Null;
        assert!(matches!(audio.set_playing(true), Err(Error::NoFile)));
        assert!(matches!(audio.position(), Err(Error::NoFile)));
        assert!(matches!(audio.length(), Err(Error::NoFile)));
        assert!(matches!(audio.end(), Err(Error::NoFile)));
        assert_eq!(audio.update().unwrap(), SinkState::Stopped);
        assert!(!audio.can_announce_time(0));
    }
}
