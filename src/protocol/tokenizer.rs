//! Request line tokenizer
//!
//! Splits an incoming byte stream into lines of words with POSIX-shell
//! style quoting: single quotes are fully literal, double quotes honour
//! backslash escapes, and a bare backslash escapes the next byte. State
//! carries across feeds, so a line may arrive one byte at a time.

/// Quoting mode the tokenizer is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// An incremental line/word parser.
pub struct Tokenizer {
    quote: Quote,
    escape_next: bool,
    in_word: bool,
    word: Vec<u8>,
    words: Vec<String>,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            quote: Quote::None,
            escape_next: false,
            in_word: false,
            word: Vec::new(),
            words: Vec::new(),
        }
    }

    /// Feed bytes in, returning every line completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<String>> {
        let mut lines = Vec::new();

        for &b in bytes {
            if self.escape_next {
                self.push(b);
                self.escape_next = false;
                continue;
            }

            match self.quote {
                Quote::Single => {
                    if b == b'\'' {
                        self.quote = Quote::None;
                    } else {
                        self.push(b);
                    }
                }
                Quote::Double => match b {
                    b'"' => self.quote = Quote::None,
                    b'\\' => self.escape_next = true,
                    _ => self.push(b),
                },
                Quote::None => match b {
                    b'\n' => lines.push(self.end_line()),
                    b'\r' => {}
                    b' ' | b'\t' => self.end_word(),
                    b'\'' => {
                        self.quote = Quote::Single;
                        self.in_word = true;
                    }
                    b'"' => {
                        self.quote = Quote::Double;
                        self.in_word = true;
                    }
                    b'\\' => {
                        self.escape_next = true;
                        self.in_word = true;
                    }
                    _ => self.push(b),
                },
            }
        }

        lines
    }

    fn push(&mut self, b: u8) {
        self.word.push(b);
        self.in_word = true;
    }

    fn end_word(&mut self) {
        if self.in_word {
            self.words
                .push(String::from_utf8_lossy(&self.word).into_owned());
            self.word.clear();
            self.in_word = false;
        }
    }

    fn end_line(&mut self) -> Vec<String> {
        self.end_word();
        std::mem::take(&mut self.words)
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}
