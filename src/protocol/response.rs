//! Responses sent back to clients
//!
//! A response is a tagged, coded line of words. Packing escapes any word
//! the tokenizer would otherwise split; framing (the trailing newline) is
//! added by the connection writer.

/// Client identifier within the reactor's connection pool.
pub type ClientId = usize;

/// The reserved client id meaning "every live connection".
pub const BROADCAST: ClientId = 0;

/// The tag used on unsolicited messages.
pub const NOREQUEST: &str = "!";

/// Response codes, by wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    /// Server greeting, sent once per new connection.
    Ohai,
    /// Role advertisement.
    Iama,
    /// The loaded file just changed.
    Fload,
    /// No file is loaded.
    Eject,
    /// Current position, in microseconds.
    Pos,
    /// The loaded file finished.
    End,
    /// The transport is playing.
    Play,
    /// The transport is stopped.
    Stop,
    /// Request outcome.
    Ack,
    /// Loaded file length, in microseconds.
    Len,
}

impl Code {
    fn wire_name(self) -> &'static str {
        match self {
            Code::Ohai => "OHAI",
            Code::Iama => "IAMA",
            Code::Fload => "FLOAD",
            Code::Eject => "EJECT",
            Code::Pos => "POS",
            Code::End => "END",
            Code::Play => "PLAY",
            Code::Stop => "STOP",
            Code::Ack => "ACK",
            Code::Len => "LEN",
        }
    }
}

/// A single tagged response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    tag: String,
    code: Code,
    args: Vec<String>,
}

impl Response {
    /// Construct a response with no arguments.
    pub fn new(tag: impl Into<String>, code: Code) -> Self {
        Self {
            tag: tag.into(),
            code,
            args: Vec::new(),
        }
    }

    /// Append an argument. The argument must not be pre-escaped.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Final response for a successful request.
    pub fn success(tag: impl Into<String>, what: &str) -> Self {
        Self::new(tag, Code::Ack).arg("OK").arg(what)
    }

    /// Final response for a request the client got wrong.
    pub fn invalid(tag: impl Into<String>, msg: &str) -> Self {
        Self::new(tag, Code::Ack).arg("WHAT").arg(msg)
    }

    /// Final response for a request the server could not honour.
    pub fn failure(tag: impl Into<String>, msg: &str) -> Self {
        Self::new(tag, Code::Ack).arg("FAIL").arg(msg)
    }

    /// Serialise to a wire line, without the trailing newline.
    pub fn pack(&self) -> String {
        let mut line = String::with_capacity(16 + self.args.iter().map(String::len).sum::<usize>());
        line.push_str(&self.tag);
        line.push(' ');
        line.push_str(self.code.wire_name());
        for arg in &self.args {
            line.push(' ');
            push_escaped(&mut line, arg);
        }
        line
    }
}

/// Append `arg`, quoting it if the tokenizer would otherwise split or
/// reinterpret it.
fn push_escaped(line: &mut String, arg: &str) {
    let needs_quoting = arg.is_empty()
        || arg
            .chars()
            .any(|c| matches!(c, ' ' | '\t' | '\r' | '\n' | '"' | '\'' | '\\'));

    if !needs_quoting {
        line.push_str(arg);
        return;
    }

    line.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            line.push('\\');
        }
        line.push(c);
    }
    line.push('"');
}

/// Anything that can route a response towards one client or all of them.
///
/// The reactor implements this over its connection pool; tests substitute
/// a capture-to-vector sink.
pub trait ResponseSink {
    /// Deliver `response` to `id`, or to every live connection when `id`
    /// is [`BROADCAST`].
    fn respond(&self, id: ClientId, response: &Response);
}
