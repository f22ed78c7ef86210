//! Word extraction from file content.

use std::collections::VecDeque;
use std::io::{self, Read};

/// Splits a byte stream into searchable words.
///
/// The returned iterator is lazy, finite for finite input, yields words in
/// source order, and never yields blank tokens. It is consumed exactly once
/// per indexing pass.
pub trait Tokenizer: Send + Sync {
    /// Tokenize `input` into a lazy word stream.
    fn tokenize(
        &self,
        input: Box<dyn Read + Send>,
    ) -> Box<dyn Iterator<Item = io::Result<String>> + Send>;

    /// Human-readable description of the strategy.
    fn meta(&self) -> String;
}

const READ_CHUNK: usize = 1024;

/// The simplest word tokenizer: split on a fixed delimiter set.
#[derive(Debug, Clone)]
pub struct DelimiterTokenizer {
    delimiters: Vec<char>,
}

impl Default for DelimiterTokenizer {
    fn default() -> Self {
        Self {
            delimiters: vec![' ', '\t', '\r', '\n', ',', '.', '?', '!'],
        }
    }
}

impl DelimiterTokenizer {
    /// Tokenizer splitting on the given delimiter characters.
    pub fn new(delimiters: Vec<char>) -> Self {
        Self { delimiters }
    }
}

impl Tokenizer for DelimiterTokenizer {
    fn tokenize(
        &self,
        input: Box<dyn Read + Send>,
    ) -> Box<dyn Iterator<Item = io::Result<String>> + Send> {
        Box::new(Tokens {
            reader: input,
            delimiters: self.delimiters.clone(),
            byte_carry: Vec::new(),
            current: String::new(),
            pending: VecDeque::new(),
            done: false,
        })
    }

    fn meta(&self) -> String {
        let delimiters: Vec<String> = self
            .delimiters
            .iter()
            .map(|d| format!("{:?}", d.to_string()))
            .collect();
        format!(
            "delimiter tokenizer: split on [{}], blanks suppressed",
            delimiters.join(", ")
        )
    }
}

/// Lazy token stream over a reader.
///
/// Reads fixed-size chunks, carrying both partial words and partial UTF-8
/// sequences across chunk boundaries.
struct Tokens {
    reader: Box<dyn Read + Send>,
    delimiters: Vec<char>,
    byte_carry: Vec<u8>,
    current: String,
    pending: VecDeque<String>,
    done: bool,
}

impl Tokens {
    fn flush_current(&mut self) {
        let word = self.current.trim();
        if !word.is_empty() {
            self.pending.push_back(word.to_string());
        }
        self.current.clear();
    }

    /// Consume as much of the byte carry as forms valid UTF-8; an
    /// incomplete trailing sequence waits for the next chunk, an invalid
    /// one is replaced.
    fn consume_carry(&mut self) {
        loop {
            let (valid_len, invalid_len) = match std::str::from_utf8(&self.byte_carry) {
                Ok(_) => (self.byte_carry.len(), 0),
                Err(e) => (e.valid_up_to(), e.error_len().unwrap_or(0)),
            };

            let text = String::from_utf8_lossy(&self.byte_carry[..valid_len]).into_owned();
            for ch in text.chars() {
                if self.delimiters.contains(&ch) {
                    self.flush_current();
                } else {
                    self.current.push(ch);
                }
            }

            if invalid_len > 0 {
                self.current.push(char::REPLACEMENT_CHARACTER);
                self.byte_carry.drain(..valid_len + invalid_len);
            } else {
                self.byte_carry.drain(..valid_len);
                break;
            }
        }
    }
}

impl Iterator for Tokens {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(word) = self.pending.pop_front() {
                return Some(Ok(word));
            }
            if self.done {
                return None;
            }

            let mut buf = [0u8; READ_CHUNK];
            match self.reader.read(&mut buf) {
                Ok(0) => {
                    self.done = true;
                    // Replace any dangling partial sequence, then flush the
                    // final word.
                    if !self.byte_carry.is_empty() {
                        self.current.push(char::REPLACEMENT_CHARACTER);
                        self.byte_carry.clear();
                    }
                    self.flush_current();
                }
                Ok(n) => {
                    self.byte_carry.extend_from_slice(&buf[..n]);
                    self.consume_carry();
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn tokenize_str(input: &str) -> Vec<String> {
        let tokenizer = DelimiterTokenizer::default();
        tokenizer
            .tokenize(Box::new(Cursor::new(input.as_bytes().to_vec())))
            .map(|w| w.unwrap())
            .collect()
    }

    #[test]
    fn test_basic_split() {
        assert_eq!(tokenize_str("foo bar foo."), vec!["foo", "bar", "foo"]);
    }

    #[test]
    fn test_blank_tokens_suppressed() {
        assert_eq!(tokenize_str("a,,   ,b !? c"), vec!["a", "b", "c"]);
        assert_eq!(tokenize_str("   \n\t "), Vec::<String>::new());
    }

    #[test]
    fn test_words_in_source_order() {
        assert_eq!(
            tokenize_str("one two\nthree, four"),
            vec!["one", "two", "three", "four"]
        );
    }

    #[test]
    fn test_word_spanning_chunk_boundary() {
        let long = "a".repeat(READ_CHUNK + 100);
        let input = format!("{long} tail");
        assert_eq!(tokenize_str(&input), vec![long.as_str(), "tail"]);
    }

    #[test]
    fn test_multibyte_char_on_chunk_boundary() {
        // Place a two-byte character so it straddles the read boundary.
        let prefix = "x".repeat(READ_CHUNK - 1);
        let input = format!("{prefix}é tail");
        let tokens = tokenize_str(&input);
        assert_eq!(tokens, vec![format!("{prefix}é"), "tail".to_string()]);
    }

    #[test]
    fn test_custom_delimiters() {
        let tokenizer = DelimiterTokenizer::new(vec![';', ' ']);
        let tokens: Vec<String> = tokenizer
            .tokenize(Box::new(Cursor::new(b"a;b c.d".to_vec())))
            .map(|w| w.unwrap())
            .collect();
        assert_eq!(tokens, vec!["a", "b", "c.d"]);
    }

    #[test]
    fn test_read_error_surfaces() {
        struct FailingReader;
        impl Read for FailingReader {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("disk gone"))
            }
        }

        let tokenizer = DelimiterTokenizer::default();
        let mut tokens = tokenizer.tokenize(Box::new(FailingReader));
        assert!(tokens.next().unwrap().is_err());
        assert!(tokens.next().is_none());
    }
}
