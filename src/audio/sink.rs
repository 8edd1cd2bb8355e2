//! Audio sinks and output devices
//!
//! A [`Sink`] consumes decoded PCM through the ring buffer and plays it
//! out. The concrete implementation, [`DeviceSink`], owns a cpal output
//! stream whose real-time callback drains the ring, zero-fills shortfalls
//! and advances the sample-accurate position counter. The callback never
//! allocates, locks or blocks.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver};

use crate::audio::ring::RingBuffer;
use crate::audio::sample::{decode_to_f32, SampleFormat};
use crate::audio::source::Source;
use crate::constants::RING_BUFFER_CAPACITY;
use crate::error::{Error, Result};

/// Transport state of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkState {
    /// Output is silent; buffered PCM is retained.
    #[default]
    Stopped,
    /// The callback is consuming PCM.
    Playing,
    /// The upstream ran out and the buffer has drained.
    AtEnd,
}

const STATE_STOPPED: u8 = 0;
const STATE_PLAYING: u8 = 1;
const STATE_AT_END: u8 = 2;

impl SinkState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            STATE_PLAYING => SinkState::Playing,
            STATE_AT_END => SinkState::AtEnd,
            _ => SinkState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SinkState::Stopped => STATE_STOPPED,
            SinkState::Playing => STATE_PLAYING,
            SinkState::AtEnd => STATE_AT_END,
        }
    }
}

/// A consumer of decoded PCM with transport controls and a
/// sample-accurate position counter.
pub trait Sink {
    /// Begin playback. Fails from [`SinkState::AtEnd`]; a reposition is
    /// required first.
    fn start(&mut self) -> Result<()>;

    /// Pause playback, retaining buffered PCM.
    fn stop(&mut self);

    /// Current transport state.
    fn state(&self) -> SinkState;

    /// Sample index of the frame most recently handed to the device.
    fn position(&self) -> u64;

    /// Forcibly set the position counter and discard buffered PCM.
    ///
    /// Only callable while not playing; clears [`SinkState::AtEnd`].
    fn set_position(&mut self, samples: u64) -> Result<()>;

    /// Mark the upstream as exhausted. Once the buffer drains the sink
    /// moves to [`SinkState::AtEnd`]. Idempotent.
    fn source_out(&mut self);

    /// Copy as many whole frames from `bytes` as fit right now.
    ///
    /// Returns the number of bytes accepted; never blocks.
    fn transfer(&mut self, bytes: &[u8]) -> usize;

    /// Retrieve a pending asynchronous device fault, if any.
    fn take_error(&mut self) -> Option<Error> {
        None
    }
}

/// Builder for sinks, given the source they will play and a device id.
pub type SinkFn = Box<dyn Fn(&dyn Source, usize) -> Result<Box<dyn Sink>>>;

/// State shared between the control side and the device callback.
struct Shared {
    ring: RingBuffer,
    state: AtomicU8,
    position: AtomicU64,
    source_out: AtomicBool,
}

impl Shared {
    /// One-shot transition into AT_END once the upstream is out and the
    /// ring has drained. Runs on the callback thread.
    fn check_at_end(&self) {
        if self.source_out.load(Ordering::Acquire) && self.ring.read_capacity() == 0 {
            self.state.store(STATE_AT_END, Ordering::Release);
        }
    }
}

/// A sink backed by a cpal output device.
pub struct DeviceSink {
    shared: Arc<Shared>,
    bytes_per_frame: usize,
    error_rx: Receiver<Error>,
    // Held to keep the output stream alive; playback gating is done via
    // the shared state, not by pausing the stream.
    _stream: cpal::Stream,
}

impl DeviceSink {
    /// Open output device `device_id` with the format of `source`.
    pub fn new(source: &dyn Source, device_id: usize) -> Result<Self> {
        let device = output_device(device_id)?;
        let channels = u16::from(source.channel_count());
        let format = source.output_format();
        let bytes_per_frame = source.bytes_per_sample() as usize;

        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(source.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };

        let shared = Arc::new(Shared {
            ring: RingBuffer::new(RING_BUFFER_CAPACITY)?,
            state: AtomicU8::new(STATE_STOPPED),
            position: AtomicU64::new(0),
            source_out: AtomicBool::new(false),
        });

        let (error_tx, error_rx) = bounded::<Error>(16);

        let cb_shared = shared.clone();
        let mut scratch = vec![0u8; 8192];
        let data_cb = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            render(&cb_shared, format, channels as usize, bytes_per_frame, &mut scratch, data);
        };
        let err_cb = move |err: cpal::StreamError| {
            let _ = error_tx.try_send(Error::Device(err.to_string()));
        };

        let stream = device
            .build_output_stream(&config, data_cb, err_cb, None)
            .map_err(|e| Error::Device(e.to_string()))?;
        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        Ok(Self {
            shared,
            bytes_per_frame,
            error_rx,
            _stream: stream,
        })
    }

    /// Builder suitable for the player's sink factory.
    pub fn build(source: &dyn Source, device_id: usize) -> Result<Box<dyn Sink>> {
        Ok(Box::new(Self::new(source, device_id)?))
    }
}

impl Sink for DeviceSink {
    fn start(&mut self) -> Result<()> {
        match self.state() {
            SinkState::AtEnd => Err(Error::NoFile),
            _ => {
                self.shared
                    .state
                    .store(SinkState::Playing.as_u8(), Ordering::Release);
                Ok(())
            }
        }
    }

    fn stop(&mut self) {
        // Only PLAYING drops to STOPPED; AT_END is sticky until a seek.
        let _ = self.shared.state.compare_exchange(
            STATE_PLAYING,
            STATE_STOPPED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn state(&self) -> SinkState {
        SinkState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    fn position(&self) -> u64 {
        self.shared.position.load(Ordering::Acquire)
    }

    fn set_position(&mut self, samples: u64) -> Result<()> {
        if self.state() == SinkState::Playing {
            return Err(Error::Internal(
                "sink repositioned while playing".to_string(),
            ));
        }
        // Order matters: retract source_out before flushing so the
        // callback cannot see the emptied ring as an ended stream.
        self.shared.source_out.store(false, Ordering::Release);
        self.shared.ring.flush();
        self.shared.position.store(samples, Ordering::Release);
        self.shared
            .state
            .store(STATE_STOPPED, Ordering::Release);
        Ok(())
    }

    fn source_out(&mut self) {
        self.shared.source_out.store(true, Ordering::Release);
        // While playing the callback owns the transition; when already
        // silent and drained (forced end, seek to length) flip here so the
        // state is visible on the next update.
        if self.state() != SinkState::Playing {
            self.shared.check_at_end();
        }
    }

    fn transfer(&mut self, bytes: &[u8]) -> usize {
        if self.state() == SinkState::AtEnd {
            return 0;
        }
        let fit = self.shared.ring.write_capacity().min(bytes.len());
        let whole = fit - fit % self.bytes_per_frame;
        if whole == 0 {
            return 0;
        }
        self.shared.ring.write(&bytes[..whole])
    }

    fn take_error(&mut self) -> Option<Error> {
        self.error_rx.try_recv().ok()
    }
}

/// The real-time render routine. Reads whole frames from the ring,
/// converts to f32 and zero-fills whatever is left.
fn render(
    shared: &Shared,
    format: SampleFormat,
    channels: usize,
    bytes_per_frame: usize,
    scratch: &mut [u8],
    data: &mut [f32],
) {
    let mut filled = 0usize;

    if shared.state.load(Ordering::Acquire) == STATE_PLAYING {
        while filled < data.len() {
            let want_frames = (data.len() - filled) / channels;
            let want_bytes = (want_frames * bytes_per_frame).min(scratch.len());
            let want_bytes = want_bytes - want_bytes % bytes_per_frame;
            if want_bytes == 0 {
                break;
            }

            let got = shared.ring.read(&mut scratch[..want_bytes]);
            if got == 0 {
                break;
            }

            filled += decode_to_f32(format, &scratch[..got], &mut data[filled..]);
            shared
                .position
                .fetch_add((got / bytes_per_frame) as u64, Ordering::AcqRel);

            if got < want_bytes {
                break;
            }
        }

        // Only the playing path may flip the state here; while silent the
        // control side performs the check on source_out, which keeps this
        // from racing a concurrent reposition.
        shared.check_at_end();
    }

    for sample in &mut data[filled..] {
        *sample = 0.0;
    }
}

/// Enumerate host output devices as `(id, name)` pairs.
///
/// The id is the device's position in the host's output iterator, which
/// is what the command line takes.
pub fn list_output_devices() -> Vec<(usize, String)> {
    let host = cpal::default_host();
    let mut out = Vec::new();
    if let Ok(devices) = host.output_devices() {
        for (id, device) in devices.enumerate() {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            out.push((id, name));
        }
    }
    out
}

/// Look an output device up by enumeration id.
fn output_device(device_id: usize) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| Error::Device(e.to_string()))?;
    devices
        .into_iter()
        .nth(device_id)
        .ok_or_else(|| Error::Device(format!("no output device with id {device_id}")))
}
