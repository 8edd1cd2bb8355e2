//! # playd
//!
//! A minimal TCP-controlled audio file player daemon.
//!
//! One audio file at a time is decoded and streamed to a host output
//! device; line-oriented, tagged commands arriving over TCP start, stop,
//! seek, load, eject and query it, and state changes are broadcast back to
//! every connected client.
//!
//! ## Architecture overview
//!
//! ```text
//!  TCP clients ──▶ Tokenizer ──▶ run_command ──▶ Player ──▶ PipeAudio
//!       ▲                                          │            │
//!       │                                          ▼            ▼
//!       └───────── responses ◀── ResponseSink ◀─ broadcasts   Source (decode)
//!                                                               │
//!                                                               ▼
//!                                                      ring buffer ─▶ Sink
//!                                                      (SPSC bytes)   (device
//!                                                                      callback)
//! ```
//!
//! The reactor ([`net::Reactor`]) is a single-threaded cooperative event
//! loop; the only other thread is the audio device callback owned by the
//! [`audio::Sink`]. The two communicate exclusively through the lock-free
//! ring buffer and a pair of atomics.

pub mod audio;
pub mod error;
pub mod net;
pub mod player;
pub mod protocol;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default IP host the daemon binds to
    pub const DEFAULT_HOST: &str = "0.0.0.0";

    /// Default TCP port the daemon binds to
    pub const DEFAULT_PORT: u16 = 1350;

    /// Period between player update cycles, in milliseconds
    pub const PLAYER_UPDATE_PERIOD_MS: u64 = 5;

    /// PCM ring buffer capacity in bytes (must be a power of two)
    pub const RING_BUFFER_CAPACITY: usize = 1 << 16;

    /// Role string advertised to clients on connect
    pub const ROLE: &str = "player/file";
}
