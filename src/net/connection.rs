//! Command dispatch for one tokenized request line
//!
//! Lines have the shape `TAG VERB [ARG ...]`. The verb is matched
//! case-insensitively, routed to the player, and whatever the handler
//! returns (or raises) becomes the final `ACK` for that line.

use crate::player::Player;
use crate::protocol::response::{ClientId, Response, NOREQUEST};

/// Execute one request line against the player, returning the `ACK`.
///
/// Broadcasts a handler emits go out through the player's response sink
/// before this returns, so the ack always trails them.
pub fn run_command(player: &mut Player, client: ClientId, words: &[String]) -> Response {
    let Some(tag) = words.first() else {
        return Response::failure(NOREQUEST, "bad command");
    };
    let Some(verb) = words.get(1) else {
        return Response::invalid(tag, "bad command");
    };
    let args = &words[2..];

    let result = match (verb.to_ascii_lowercase().as_str(), args) {
        ("play", []) => player.set_playing(tag, true),
        ("stop", []) => player.set_playing(tag, false),
        ("load", [path]) => player.load(tag, path),
        ("eject", []) => Ok(player.eject(tag)),
        ("pos", [pos]) => player.pos(tag, pos),
        ("end", []) => player.end(tag),
        ("dump", []) => Ok(player.dump(client, tag)),
        ("quit", []) => Ok(player.quit(tag)),
        ("play" | "stop" | "load" | "eject" | "pos" | "end" | "dump" | "quit", _) => {
            return Response::invalid(tag, "bad arity");
        }
        _ => return Response::invalid(tag, "unknown command"),
    };

    match result {
        Ok(ack) => ack,
        Err(err) if err.is_client_fault() => Response::invalid(tag, &err.to_string()),
        Err(err) => Response::failure(tag, &err.to_string()),
    }
}
