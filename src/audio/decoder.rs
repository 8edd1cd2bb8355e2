//! Symphonia-backed file source
//!
//! Probes the container, decodes the default audio track packet by packet
//! and hands the pipe interleaved f32 bytes. One decode call returns one
//! packet's worth of frames, which keeps each reactor tick short.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::sample::SampleFormat;
use crate::audio::source::{DecodeState, Decoded, Source};
use crate::error::{Error, Result};

/// An audio file decoded with symphonia.
pub struct FileSource {
    path: String,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: u8,
    sample_rate: u32,
    n_frames: Option<u64>,
    at_eof: bool,
}

impl FileSource {
    /// Open and probe `path`, selecting the default audio track.
    pub fn open(path: &str) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::Load(format!("{path}: {e}")))?;

        let mut hint = Hint::new();
        if let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) {
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
            .map_err(|e| Error::Load(format!("{path}: {e}")))?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| Error::Load(format!("{path}: no audio track")))?;

        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| Error::Load(format!("{path}: unknown channel layout")))?
            .count();
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::Load(format!("{path}: unknown sample rate")))?;
        let n_frames = track.codec_params.n_frames;
        let track_id = track.id;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Load(format!("{path}: {e}")))?;

        tracing::info!(
            path,
            sample_rate,
            channels,
            frames = n_frames,
            "opened audio source"
        );

        Ok(Self {
            path: path.to_string(),
            format,
            decoder,
            track_id,
            channels: channels as u8,
            sample_rate,
            n_frames,
            at_eof: false,
        })
    }

    /// Builder suitable for the player's extension map.
    pub fn build(path: &str) -> Result<Box<dyn Source>> {
        Ok(Box::new(Self::open(path)?))
    }
}

impl Source for FileSource {
    fn path(&self) -> &str {
        &self.path
    }

    fn channel_count(&self) -> u8 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn output_format(&self) -> SampleFormat {
        SampleFormat::Float32
    }

    fn length(&self) -> Option<u64> {
        self.n_frames
    }

    fn decode(&mut self) -> Result<Decoded> {
        if self.at_eof {
            return Ok((DecodeState::EndOfFile, vec![]));
        }

        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.at_eof = true;
                    return Ok((DecodeState::EndOfFile, vec![]));
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.at_eof = true;
                    return Ok((DecodeState::EndOfFile, vec![]));
                }
                Err(e) => return Err(Error::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let mut buf =
                        SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
                    buf.copy_interleaved_ref(decoded);
                    let bytes = bytemuck::cast_slice(buf.samples()).to_vec();
                    return Ok((DecodeState::Decoding, bytes));
                }
                // Malformed packets are skipped; the stream may recover.
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::warn!(path = %self.path, error = e, "skipping bad packet");
                    continue;
                }
                Err(e) => return Err(Error::Decode(e.to_string())),
            }
        }
    }

    fn seek(&mut self, samples: u64) -> Result<u64> {
        if let Some(len) = self.n_frames {
            if samples > len {
                return Err(Error::Seek(format!("position {samples} beyond end {len}")));
            }
            // A seek exactly to the end pins the source at end-of-file;
            // the sink reaches AT_END once its buffer drains.
            if samples == len {
                self.at_eof = true;
                return Ok(len);
            }
        }

        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: samples,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| Error::Seek(e.to_string()))?;

        self.decoder.reset();
        self.at_eof = false;
        Ok(seeked.actual_ts)
    }
}
