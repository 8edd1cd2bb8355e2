//! The player: command handlers over the current audio
//!
//! The player owns the loaded [`Audio`], runs its update cycle on every
//! reactor tick and turns commands into state changes plus broadcasts.
//! Command handlers return the final acknowledgement as a [`Response`];
//! failures propagate as [`Error`] kinds for the dispatch boundary to
//! classify.

use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use crate::audio::pipe::{Audio, PipeAudio};
use crate::audio::sink::{SinkFn, SinkState};
use crate::audio::source::{Source, SourceFn};
use crate::constants::ROLE;
use crate::error::{Error, Result};
use crate::protocol::response::{ClientId, Code, Response, ResponseSink, BROADCAST, NOREQUEST};

/// The player state machine and its command API.
pub struct Player {
    /// Output device handed to the sink factory on load.
    device_id: usize,
    make_sink: SinkFn,
    /// Lowercase file extension → source builder.
    sources: HashMap<String, SourceFn>,
    audio: Audio,
    /// Set once by `quit`; the next update reports it to the reactor.
    dead: bool,
    io: Option<Rc<dyn ResponseSink>>,
    /// Sink state seen by the previous update, for edge detection.
    last_state: SinkState,
}

impl Player {
    pub fn new(device_id: usize, make_sink: SinkFn, sources: HashMap<String, SourceFn>) -> Self {
        Self {
            device_id,
            make_sink,
            sources,
            audio: Audio::Null,
            dead: false,
            io: None,
            last_state: SinkState::Stopped,
        }
    }

    /// Attach the sink this player sends responses to.
    ///
    /// Set after construction to break the player↔reactor cycle; until
    /// then responses are silently dropped.
    pub fn set_io(&mut self, io: Rc<dyn ResponseSink>) {
        self.io = Some(io);
    }

    /// Perform one cycle of work.
    ///
    /// Returns whether the player wants more cycles; `false` tells the
    /// reactor to shut down.
    pub fn update(&mut self) -> bool {
        if self.dead {
            return false;
        }

        match self.audio.update() {
            Ok(state) => {
                if state == SinkState::AtEnd && self.last_state != SinkState::AtEnd {
                    self.broadcast(&Response::new(NOREQUEST, Code::End));
                    self.broadcast(&Response::new(NOREQUEST, Code::Stop));
                }
                if state == SinkState::Playing {
                    if let Ok(pos) = self.audio.position() {
                        if self.audio.can_announce_time(pos) {
                            self.broadcast(&Response::new(NOREQUEST, Code::Pos).arg(pos.to_string()));
                        }
                    }
                }
                self.last_state = state;
            }
            Err(err) => {
                tracing::error!(error = %err, "update cycle failed");
                if matches!(err, Error::Decode(_) | Error::Device(_)) {
                    let _ = self.eject(NOREQUEST);
                }
            }
        }

        true
    }

    //
    // Commands
    //

    /// Load `path`, replacing whatever is currently loaded.
    pub fn load(&mut self, tag: &str, path: &str) -> Result<Response> {
        let source = self.build_source(path)?;
        let sink = (self.make_sink)(source.as_ref(), self.device_id)?;

        self.audio = Audio::Pipe(PipeAudio::new(source, sink));
        self.last_state = SinkState::Stopped;
        tracing::info!(path, "loaded file");

        self.broadcast(&Response::new(NOREQUEST, Code::Fload).arg(path));
        self.broadcast(&Response::new(NOREQUEST, Code::Pos).arg("0"));
        if let Ok(Some(len)) = self.audio.length() {
            self.broadcast(&Response::new(NOREQUEST, Code::Len).arg(len.to_string()));
        }
        self.broadcast(&Response::new(NOREQUEST, Code::Stop));

        Ok(Response::success(tag, "load"))
    }

    /// Eject the loaded file, if any. Never fails.
    pub fn eject(&mut self, tag: &str) -> Response {
        if self.audio.is_loaded() {
            self.audio = Audio::Null;
            self.broadcast(&Response::new(NOREQUEST, Code::Eject));
            tracing::info!("ejected");
        }
        self.last_state = SinkState::Stopped;
        Response::success(tag, "eject")
    }

    /// Start or stop playback.
    pub fn set_playing(&mut self, tag: &str, playing: bool) -> Result<Response> {
        self.audio.set_playing(playing)?;
        if playing {
            self.broadcast(&Response::new(NOREQUEST, Code::Play));
            Ok(Response::success(tag, "play"))
        } else {
            self.broadcast(&Response::new(NOREQUEST, Code::Stop));
            Ok(Response::success(tag, "stop"))
        }
    }

    /// Seek to a microsecond offset given as a decimal string.
    pub fn pos(&mut self, tag: &str, pos_str: &str) -> Result<Response> {
        let micros: u64 = pos_str
            .parse()
            .map_err(|_| Error::Invalid("bad position".to_string()))?;
        if !self.audio.is_loaded() {
            return Err(Error::NoFile);
        }

        let was_playing = self.audio.state() == SinkState::Playing;
        self.audio.set_playing(false)?;
        self.audio.set_position(micros)?;

        // A seek to the very end stays stopped and drifts into AT_END.
        let before_end = self.audio.length()?.map_or(true, |len| micros < len);
        if was_playing && before_end {
            self.audio.set_playing(true)?;
        }
        self.last_state = self.audio.state();

        self.broadcast(&Response::new(NOREQUEST, Code::Pos).arg(micros.to_string()));
        Ok(Response::success(tag, "pos"))
    }

    /// Force the loaded file into its ended state.
    pub fn end(&mut self, tag: &str) -> Result<Response> {
        self.audio.end()?;
        self.last_state = self.audio.state();
        self.broadcast(&Response::new(NOREQUEST, Code::End));
        self.broadcast(&Response::new(NOREQUEST, Code::Stop));
        Ok(Response::success(tag, "end"))
    }

    /// Send the full player state to one client.
    pub fn dump(&self, id: ClientId, tag: &str) -> Response {
        self.respond(
            id,
            &Response::new(tag, Code::Ohai)
                .arg("playd")
                .arg(env!("CARGO_PKG_VERSION")),
        );
        self.respond(id, &Response::new(tag, Code::Iama).arg(ROLE));

        if let Ok(path) = self.audio.path() {
            let path = path.to_string();
            self.respond(id, &Response::new(tag, Code::Fload).arg(path));
            if let Ok(pos) = self.audio.position() {
                self.respond(id, &Response::new(tag, Code::Pos).arg(pos.to_string()));
            }
            if let Ok(Some(len)) = self.audio.length() {
                self.respond(id, &Response::new(tag, Code::Len).arg(len.to_string()));
            }
        } else {
            self.respond(id, &Response::new(tag, Code::Eject));
        }

        let state_code = match self.audio.state() {
            SinkState::Playing => Code::Play,
            SinkState::AtEnd => Code::End,
            SinkState::Stopped => Code::Stop,
        };
        self.respond(id, &Response::new(tag, state_code));

        Response::success(tag, "dump")
    }

    /// Mark the player dead; the reactor shuts down on the next tick.
    pub fn quit(&mut self, tag: &str) -> Response {
        tracing::info!("quit requested");
        self.dead = true;
        Response::success(tag, "quit")
    }

    //
    // Internals
    //

    fn build_source(&self, path: &str) -> Result<Box<dyn Source>> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let build = self.sources.get(&ext).ok_or(Error::NoFile)?;
        build(path)
    }

    fn respond(&self, id: ClientId, response: &Response) {
        if let Some(io) = &self.io {
            io.respond(id, response);
        }
    }

    fn broadcast(&self, response: &Response) {
        self.respond(BROADCAST, response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pipe::test_support::{SinkProbe, StubSink, StubSource, RATE};
    use crate::audio::sink::Sink;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Captures every routed response as `(client, packed line)`.
    #[derive(Default)]
    struct CaptureSink(RefCell<Vec<(ClientId, String)>>);

    impl ResponseSink for CaptureSink {
        fn respond(&self, id: ClientId, response: &Response) {
            self.0.borrow_mut().push((id, response.pack()));
        }
    }

    impl CaptureSink {
        fn lines(&self) -> Vec<String> {
            self.0.borrow().iter().map(|(_, l)| l.clone()).collect()
        }

        fn clear(&self) {
            self.0.borrow_mut().clear();
        }
    }

    const TEN_SECONDS: u64 = RATE as u64 * 10;

    fn make_player(len_samples: u64) -> (Player, Rc<CaptureSink>, Rc<RefCell<SinkProbe>>) {
        let probe = Rc::new(RefCell::new(SinkProbe::default()));
        let capture = Rc::new(CaptureSink::default());

        let mut sources: HashMap<String, SourceFn> = HashMap::new();
        sources.insert(
            "mp3".to_string(),
            Box::new(move |path: &str| {
                Ok(Box::new(StubSource::new(path, len_samples)) as Box<dyn Source>)
            }),
        );

        let sink_probe = probe.clone();
        let make_sink: SinkFn = Box::new(move |_source, _device| {
            Ok(Box::new(StubSink::new(sink_probe.clone())) as Box<dyn Sink>)
        });

        let mut player = Player::new(0, make_sink, sources);
        player.set_io(capture.clone());
        (player, capture, probe)
    }

    #[test]
    fn load_broadcasts_file_info_then_acks() {
        let (mut player, capture, _) = make_player(TEN_SECONDS);
        let ack = player.load("x1", "/music/a.mp3").unwrap();

        assert_eq!(
            capture.lines(),
            vec![
                "! FLOAD /music/a.mp3",
                "! POS 0",
                "! LEN 10000000",
                "! STOP",
            ]
        );
        assert_eq!(ack.pack(), "x1 ACK OK load");
    }

    #[test]
    fn load_with_unknown_extension_is_refused() {
        let (mut player, capture, _) = make_player(TEN_SECONDS);
        assert!(matches!(
            player.load("x1", "/music/a.xyz"),
            Err(Error::NoFile)
        ));
        assert!(capture.lines().is_empty());
    }

    #[test]
    fn play_and_stop_broadcast_transport_changes() {
        let (mut player, capture, probe) = make_player(TEN_SECONDS);
        player.load("x1", "/music/a.mp3").unwrap();
        capture.clear();

        let ack = player.set_playing("x2", true).unwrap();
        assert_eq!(ack.pack(), "x2 ACK OK play");
        assert_eq!(probe.borrow().state, SinkState::Playing);

        let ack = player.set_playing("x3", false).unwrap();
        assert_eq!(ack.pack(), "x3 ACK OK stop");
        assert_eq!(capture.lines(), vec!["! PLAY", "! STOP"]);
    }

    #[test]
    fn transport_commands_need_a_file() {
        let (mut player, _, _) = make_player(TEN_SECONDS);
        assert!(matches!(player.set_playing("t", true), Err(Error::NoFile)));
        assert!(matches!(player.set_playing("t", false), Err(Error::NoFile)));
        assert!(matches!(player.pos("t", "0"), Err(Error::NoFile)));
        assert!(matches!(player.end("t"), Err(Error::NoFile)));
    }

    #[test]
    fn pos_rejects_malformed_positions_without_side_effects() {
        let (mut player, capture, _) = make_player(TEN_SECONDS);
        player.load("x1", "/music/a.mp3").unwrap();
        capture.clear();

        let err = player.pos("x4", "notanumber").unwrap_err();
        assert!(matches!(&err, Error::Invalid(m) if m == "bad position"));
        assert!(capture.lines().is_empty());
    }

    #[test]
    fn pos_while_playing_stops_seeks_and_restarts() {
        let (mut player, capture, probe) = make_player(TEN_SECONDS);
        player.load("x1", "/music/a.mp3").unwrap();
        player.set_playing("x2", true).unwrap();
        capture.clear();

        let ack = player.pos("x5", "5000000").unwrap();

        let p = probe.borrow();
        assert_eq!(p.seeks, vec![RATE as u64 * 5]);
        assert_eq!(p.state, SinkState::Playing);
        assert_eq!(p.starts, 2);
        assert_eq!(p.stops, 1);
        drop(p);

        assert_eq!(capture.lines(), vec!["! POS 5000000"]);
        assert_eq!(ack.pack(), "x5 ACK OK pos");
    }

    #[test]
    fn pos_at_length_stays_stopped_and_ends() {
        let (mut player, capture, probe) = make_player(TEN_SECONDS);
        player.load("x1", "/music/a.mp3").unwrap();
        player.set_playing("x2", true).unwrap();
        capture.clear();

        player.pos("x5", "10000000").unwrap();
        assert_eq!(probe.borrow().state, SinkState::Stopped);

        // The next updates decode straight into end-of-file.
        assert!(player.update());
        assert!(player.update());
        assert_eq!(probe.borrow().state, SinkState::AtEnd);

        let lines = capture.lines();
        assert!(lines.contains(&"! END".to_string()));
        assert!(lines.contains(&"! STOP".to_string()));
    }

    #[test]
    fn pos_out_of_range_fails_with_seek() {
        let (mut player, _, _) = make_player(TEN_SECONDS);
        player.load("x1", "/music/a.mp3").unwrap();
        assert!(matches!(
            player.pos("x5", "99000000"),
            Err(Error::Seek(_))
        ));
    }

    #[test]
    fn end_forces_at_end_and_blocks_play_until_seek() {
        let (mut player, capture, probe) = make_player(TEN_SECONDS);
        player.load("x1", "/music/a.mp3").unwrap();
        capture.clear();

        let ack = player.end("x6").unwrap();
        assert_eq!(ack.pack(), "x6 ACK OK end");
        assert_eq!(capture.lines(), vec!["! END", "! STOP"]);
        assert_eq!(probe.borrow().state, SinkState::AtEnd);

        // No duplicate END from the periodic update.
        capture.clear();
        assert!(player.update());
        assert!(capture.lines().is_empty());

        // Play is refused until a seek clears AT_END.
        assert!(matches!(player.set_playing("x7", true), Err(Error::NoFile)));
        player.pos("x8", "0").unwrap();
        player.set_playing("x9", true).unwrap();
        assert_eq!(probe.borrow().state, SinkState::Playing);
    }

    #[test]
    fn natural_end_broadcasts_once() {
        let (mut player, capture, probe) = make_player(256);
        player.load("x1", "/music/a.mp3").unwrap();
        player.set_playing("x2", true).unwrap();
        capture.clear();

        for _ in 0..50 {
            player.update();
            probe.borrow_mut().drain(64);
        }

        let ends = capture.lines().iter().filter(|l| *l == "! END").count();
        assert_eq!(ends, 1);
        assert_eq!(probe.borrow().state, SinkState::AtEnd);
    }

    #[test]
    fn periodic_pos_broadcasts_are_monotone_whole_seconds() {
        let (mut player, capture, probe) = make_player(RATE as u64 * 4);
        player.load("x1", "/music/a.mp3").unwrap();
        player.set_playing("x2", true).unwrap();
        capture.clear();

        for _ in 0..4000 {
            player.update();
            probe.borrow_mut().drain(64);
        }

        let positions: Vec<u64> = capture
            .lines()
            .iter()
            .filter_map(|l| l.strip_prefix("! POS ").map(|v| v.parse().unwrap()))
            .collect();

        assert!(!positions.is_empty());
        assert_eq!(positions[0], 0);
        let seconds: Vec<u64> = positions.iter().map(|p| p / 1_000_000).collect();
        for pair in seconds.windows(2) {
            assert!(pair[0] < pair[1], "POS seconds must strictly increase");
        }
    }

    #[test]
    fn eject_is_idempotent() {
        let (mut player, capture, _) = make_player(TEN_SECONDS);
        player.load("x1", "/music/a.mp3").unwrap();
        capture.clear();

        player.eject("x2");
        assert_eq!(capture.lines(), vec!["! EJECT"]);

        capture.clear();
        let ack = player.eject("x3");
        assert!(capture.lines().is_empty());
        assert_eq!(ack.pack(), "x3 ACK OK eject");
    }

    #[test]
    fn reload_after_eject_matches_a_single_load() {
        let (mut player, capture, _) = make_player(TEN_SECONDS);
        player.load("x1", "/music/a.mp3").unwrap();
        capture.clear();
        player.dump(7, "!");
        let single = capture.lines();

        let (mut player, capture, _) = make_player(TEN_SECONDS);
        player.load("x1", "/music/a.mp3").unwrap();
        player.eject("x2");
        player.load("x3", "/music/a.mp3").unwrap();
        capture.clear();
        player.dump(7, "!");

        assert_eq!(capture.lines(), single);
    }

    #[test]
    fn dump_without_file_reports_ejected_stopped() {
        let (player, capture, _) = make_player(TEN_SECONDS);
        player.dump(3, "!");

        let recorded = capture.0.borrow();
        let to_client: Vec<&str> = recorded
            .iter()
            .filter(|(id, _)| *id == 3)
            .map(|(_, l)| l.as_str())
            .collect();
        assert_eq!(
            to_client,
            vec![
                concat!("! OHAI playd ", env!("CARGO_PKG_VERSION")),
                "! IAMA player/file",
                "! EJECT",
                "! STOP",
            ]
        );
    }

    #[test]
    fn dump_with_file_reports_metrics_and_state() {
        let (mut player, capture, _) = make_player(TEN_SECONDS);
        player.load("x1", "/music/a.mp3").unwrap();
        player.set_playing("x2", true).unwrap();
        capture.clear();

        player.dump(2, "q1");
        let recorded = capture.0.borrow();
        let to_client: Vec<&str> = recorded.iter().map(|(_, l)| l.as_str()).collect();
        assert_eq!(
            to_client,
            vec![
                concat!("q1 OHAI playd ", env!("CARGO_PKG_VERSION")),
                "q1 IAMA player/file",
                "q1 FLOAD /music/a.mp3",
                "q1 POS 0",
                "q1 LEN 10000000",
                "q1 PLAY",
            ]
        );
    }

    #[test]
    fn quit_kills_the_update_loop() {
        let (mut player, _, _) = make_player(TEN_SECONDS);
        assert!(player.update());
        let ack = player.quit("x1");
        assert_eq!(ack.pack(), "x1 ACK OK quit");
        assert!(!player.update());
    }
}
