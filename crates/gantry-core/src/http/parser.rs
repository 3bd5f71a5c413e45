//! Byte-driven HTTP/1.1 request parser.
//!
//! The raw request is copied into a single fixed-capacity buffer with
//! zero terminators written over the separators, so every parsed token
//! is a range into that buffer and no per-token allocation happens. Each
//! input byte causes at most one state transition.
//!
//! The request line is split into words. The second word is treated as a
//! filename with an optional `?key=value&...` qualifier; both may use
//! `%HH` escapes (uppercase hex only) and the qualifier may use `+` for
//! space. Remaining lines are header key/value pairs, with folded
//! continuation lines appended to the previous value.

use std::borrow::Cow;

use crate::constants::{CLIENT_MESSAGE_LEN, MAX_COMMAND_WORDS, MAX_HEADERS, MAX_QUAL_KEYS};

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Overflow,
    BadEscape,
    TooManyCommandWords,
    TooManyQualKeys,
    TooManyHeaders,
    BadQualifierKey,
    UnexpectedNewline,
}

impl RejectReason {
    /// Text used in the reject response.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Overflow => "overflow",
            RejectReason::BadEscape => "bad escape",
            RejectReason::TooManyCommandWords => "too many command words",
            RejectReason::TooManyQualKeys => "too many keys in qualifier",
            RejectReason::TooManyHeaders => "too many header key-value pairs",
            RejectReason::BadQualifierKey => "bad qualifier key",
            RejectReason::UnexpectedNewline => "unexpected newline",
        }
    }
}

/// Result of feeding one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseEvent {
    /// More bytes wanted.
    NeedMore,
    /// A complete request is available; no more bytes may be fed.
    Complete,
    /// The request was rejected; no more bytes may be fed.
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    CommandWord,
    Filename,
    FilenameEsc1,
    FilenameEsc2,
    QualifierKey,
    QualifierValue,
    QualifierValueEsc1,
    QualifierValueEsc2,
    HeaderKey,
    ExpectingHeaderValue,
    HeaderValue,
    HeaderContinuation,
    Done,
}

/// In-place request parser.
pub struct RequestParser {
    message: Box<[u8; CLIENT_MESSAGE_LEN]>,
    pointer: usize,
    state: State,
    decode_char: u8,
    outcome: Option<ParseEvent>,

    num_command_words: usize,
    command_words: [usize; MAX_COMMAND_WORDS],

    num_qual_keys: usize,
    qual_keys: [usize; MAX_QUAL_KEYS + 1],
    qual_values: [usize; MAX_QUAL_KEYS + 1],

    num_header_keys: usize,
    header_keys: [usize; MAX_HEADERS],
    header_values: [usize; MAX_HEADERS],
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            message: Box::new([0u8; CLIENT_MESSAGE_LEN]),
            pointer: 0,
            state: State::CommandWord,
            decode_char: 0,
            outcome: None,
            num_command_words: 0,
            command_words: [0; MAX_COMMAND_WORDS],
            num_qual_keys: 0,
            qual_keys: [0; MAX_QUAL_KEYS + 1],
            qual_values: [0; MAX_QUAL_KEYS + 1],
            num_header_keys: 0,
            header_keys: [0; MAX_HEADERS],
            header_values: [0; MAX_HEADERS],
        }
    }

    /// Reset for the next request on a kept-alive connection.
    pub fn reset(&mut self) {
        self.pointer = 0;
        self.state = State::CommandWord;
        self.decode_char = 0;
        self.outcome = None;
        self.num_command_words = 0;
        self.command_words = [0; MAX_COMMAND_WORDS];
        self.num_qual_keys = 0;
        self.num_header_keys = 0;
    }

    fn put(&mut self, b: u8) {
        // The end-of-feed overflow check keeps pointer < capacity between
        // calls, so a single store per transition is always in bounds.
        self.message[self.pointer] = b;
        self.pointer += 1;
    }

    fn reject(&mut self, reason: RejectReason) -> ParseEvent {
        self.state = State::Done;
        let event = ParseEvent::Rejected(reason);
        self.outcome = Some(event);
        event
    }

    fn complete(&mut self) -> ParseEvent {
        self.state = State::Done;
        self.outcome = Some(ParseEvent::Complete);
        ParseEvent::Complete
    }

    fn start_headers(&mut self) {
        self.num_header_keys = 0;
        self.header_keys[0] = self.pointer;
        self.state = State::HeaderKey;
    }

    /// Decode one hex digit; uppercase only.
    fn hex_nibble(c: u8) -> Option<u8> {
        match c {
            b'0'..=b'9' => Some(c - b'0'),
            b'A'..=b'F' => Some(c - b'A' + 10),
            _ => None,
        }
    }

    /// Process one byte from the client.
    pub fn feed(&mut self, c: u8) -> ParseEvent {
        if let Some(outcome) = self.outcome {
            return outcome;
        }

        match self.state {
            State::CommandWord => match c {
                b'\n' => {
                    self.put(0);
                    self.num_command_words += 1;
                    self.start_headers();
                }
                b'\r' => {}
                b' ' | b'\t' => {
                    self.put(0);
                    self.num_command_words += 1;
                    if self.num_command_words < MAX_COMMAND_WORDS {
                        self.command_words[self.num_command_words] = self.pointer;
                        if self.num_command_words == 1 {
                            self.state = State::Filename;
                        }
                    } else {
                        return self.reject(RejectReason::TooManyCommandWords);
                    }
                }
                _ => self.put(c),
            },

            State::Filename => match c {
                b'\n' => {
                    self.put(0);
                    self.num_command_words += 1;
                    self.num_qual_keys = 0;
                    self.start_headers();
                }
                b'?' => {
                    self.put(0);
                    self.num_command_words += 1;
                    self.num_qual_keys = 0;
                    self.qual_keys[0] = self.pointer;
                    self.state = State::QualifierKey;
                }
                b'%' => self.state = State::FilenameEsc1,
                b'\r' => {}
                b' ' | b'\t' => {
                    self.put(0);
                    self.num_command_words += 1;
                    if self.num_command_words < MAX_COMMAND_WORDS {
                        self.command_words[self.num_command_words] = self.pointer;
                        self.state = State::CommandWord;
                    } else {
                        return self.reject(RejectReason::TooManyCommandWords);
                    }
                }
                _ => self.put(c),
            },

            State::QualifierKey => match c {
                b'=' => {
                    self.put(0);
                    self.qual_values[self.num_qual_keys] = self.pointer;
                    self.num_qual_keys += 1;
                    self.state = State::QualifierValue;
                }
                b'\n' | b' ' | b'\t' | b'\r'
                    if self.num_qual_keys == 0 && self.qual_keys[0] == self.pointer =>
                {
                    // Some clients append a bare '?' to a GET target
                    // (e.g. "GET /fonts/glyphicons.eot? HTTP/1.1").
                    // Treat an empty query as if it were not there. Only
                    // two command words exist at this point, so the slot
                    // is free.
                    self.command_words[self.num_command_words] = self.pointer;
                    self.state = State::CommandWord;
                }
                // A key with no value, or an escape within a key (none of
                // the known keys needs escaping).
                b'\n' | b' ' | b'\t' | b'\r' | b'%' | b'&' => {
                    return self.reject(RejectReason::BadQualifierKey);
                }
                _ => self.put(c),
            },

            State::QualifierValue => match c {
                b'\n' => {
                    self.put(0);
                    // Terminate here so the whole value stays readable
                    // even if it contains an escaped null.
                    self.qual_keys[self.num_qual_keys] = self.pointer;
                    self.start_headers();
                }
                b' ' | b'\t' => {
                    self.put(0);
                    self.qual_keys[self.num_qual_keys] = self.pointer;
                    if self.num_command_words < MAX_COMMAND_WORDS {
                        self.command_words[self.num_command_words] = self.pointer;
                    }
                    self.state = State::CommandWord;
                }
                b'\r' => {}
                b'%' => self.state = State::QualifierValueEsc1,
                b'&' => {
                    // Another variable is coming.
                    self.put(0);
                    self.qual_keys[self.num_qual_keys] = self.pointer;
                    if self.num_qual_keys < MAX_QUAL_KEYS {
                        self.state = State::QualifierKey;
                    } else {
                        return self.reject(RejectReason::TooManyQualKeys);
                    }
                }
                b'+' => self.put(b' '),
                _ => self.put(c),
            },

            State::FilenameEsc1 | State::QualifierValueEsc1 => match Self::hex_nibble(c) {
                Some(nibble) => {
                    self.decode_char = nibble << 4;
                    self.state = if self.state == State::FilenameEsc1 {
                        State::FilenameEsc2
                    } else {
                        State::QualifierValueEsc2
                    };
                }
                None => return self.reject(RejectReason::BadEscape),
            },

            State::FilenameEsc2 | State::QualifierValueEsc2 => match Self::hex_nibble(c) {
                Some(nibble) => {
                    self.put(self.decode_char | nibble);
                    self.state = if self.state == State::FilenameEsc2 {
                        State::Filename
                    } else {
                        State::QualifierValue
                    };
                }
                None => return self.reject(RejectReason::BadEscape),
            },

            State::HeaderKey => match c {
                b'\n' => {
                    if self.header_keys[self.num_header_keys] == self.pointer {
                        // Key not started: this is the blank line ending
                        // the headers.
                        return self.complete();
                    }
                    return self.reject(RejectReason::UnexpectedNewline);
                }
                b'\r' => {}
                b':' => {
                    if self.num_header_keys == MAX_HEADERS - 1 {
                        return self.reject(RejectReason::TooManyHeaders);
                    }
                    self.put(0);
                    self.header_values[self.num_header_keys] = self.pointer;
                    self.num_header_keys += 1;
                    self.state = State::ExpectingHeaderValue;
                }
                _ => self.put(c),
            },

            State::ExpectingHeaderValue => {
                if c != b' ' && c != b'\t' {
                    self.state = State::HeaderValue;
                    return self.feed_header_value(c);
                }
            }

            State::HeaderValue => return self.feed_header_value(c),

            State::HeaderContinuation => match c {
                b' ' | b'\t' => {
                    // Continuation of the previous value.
                    self.put(c);
                    self.state = State::HeaderValue;
                }
                b'\n' => {
                    // The blank line; terminate the last value in place.
                    self.message[self.pointer] = 0;
                    return self.complete();
                }
                b'\r' => {}
                _ => {
                    // A new key begins.
                    if self.pointer + 3 <= CLIENT_MESSAGE_LEN {
                        self.put(0);
                        self.header_keys[self.num_header_keys] = self.pointer;
                        self.put(c);
                        self.state = State::HeaderKey;
                    } else {
                        return self.reject(RejectReason::Overflow);
                    }
                }
            },

            State::Done => unreachable!("outcome returned above"),
        }

        if self.pointer == CLIENT_MESSAGE_LEN {
            return self.reject(RejectReason::Overflow);
        }
        ParseEvent::NeedMore
    }

    fn feed_header_value(&mut self, c: u8) -> ParseEvent {
        match c {
            b'\n' => self.state = State::HeaderContinuation,
            b'\r' => {}
            _ => self.put(c),
        }
        if self.pointer == CLIENT_MESSAGE_LEN {
            return self.reject(RejectReason::Overflow);
        }
        ParseEvent::NeedMore
    }

    fn token_at(&self, start: usize) -> Cow<'_, str> {
        let tail = &self.message[start..];
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        String::from_utf8_lossy(&tail[..end])
    }

    /// Number of words on the request line.
    pub fn num_command_words(&self) -> usize {
        self.num_command_words
    }

    /// The `index`-th request-line word.
    pub fn command_word(&self, index: usize) -> Option<Cow<'_, str>> {
        (index < self.num_command_words).then(|| self.token_at(self.command_words[index]))
    }

    /// Number of qualifier key/value pairs.
    pub fn num_qualifiers(&self) -> usize {
        self.num_qual_keys
    }

    pub fn qualifier_key(&self, index: usize) -> Option<Cow<'_, str>> {
        (index < self.num_qual_keys).then(|| self.token_at(self.qual_keys[index]))
    }

    pub fn qualifier_value(&self, index: usize) -> Option<Cow<'_, str>> {
        (index < self.num_qual_keys).then(|| self.token_at(self.qual_values[index]))
    }

    /// The value for a qualifier key, compared case-insensitively.
    pub fn get_key_value(&self, key: &str) -> Option<Cow<'_, str>> {
        (0..self.num_qual_keys)
            .find(|&i| {
                self.token_at(self.qual_keys[i])
                    .eq_ignore_ascii_case(key)
            })
            .map(|i| self.token_at(self.qual_values[i]))
    }

    /// Number of parsed headers.
    pub fn num_headers(&self) -> usize {
        self.num_header_keys
    }

    /// The value for a header name, compared case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<Cow<'_, str>> {
        (0..self.num_header_keys)
            .find(|&i| {
                self.token_at(self.header_keys[i])
                    .eq_ignore_ascii_case(name)
            })
            .map(|i| self.token_at(self.header_values[i]))
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> (RequestParser, ParseEvent) {
        let mut parser = RequestParser::new();
        let mut event = ParseEvent::NeedMore;
        for &b in input.as_bytes() {
            event = parser.feed(b);
            if event != ParseEvent::NeedMore {
                break;
            }
        }
        (parser, event)
    }

    #[test]
    fn get_with_qualifier() {
        let (parser, event) = parse("GET /rr_status?type=2 HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(event, ParseEvent::Complete);
        assert_eq!(parser.num_command_words(), 3);
        assert_eq!(parser.command_word(0).unwrap(), "GET");
        assert_eq!(parser.command_word(1).unwrap(), "/rr_status");
        assert_eq!(parser.command_word(2).unwrap(), "HTTP/1.1");
        assert_eq!(parser.num_qualifiers(), 1);
        assert_eq!(parser.qualifier_key(0).unwrap(), "type");
        assert_eq!(parser.qualifier_value(0).unwrap(), "2");
        assert_eq!(parser.get_key_value("TYPE").unwrap(), "2");
        assert_eq!(parser.header_value("host").unwrap(), "x");
    }

    #[test]
    fn percent_decode_in_qualifier_value() {
        let (parser, event) =
            parse("GET /rr_delete?name=foo%2Fbar.g HTTP/1.1\r\n\r\n");
        assert_eq!(event, ParseEvent::Complete);
        assert_eq!(parser.get_key_value("name").unwrap(), "foo/bar.g");
    }

    #[test]
    fn percent_decode_in_filename() {
        let (parser, event) = parse("GET /my%20page.html HTTP/1.1\r\n\r\n");
        assert_eq!(event, ParseEvent::Complete);
        assert_eq!(parser.command_word(1).unwrap(), "/my page.html");
    }

    #[test]
    fn plus_decodes_to_space_in_values_only() {
        let (parser, event) = parse("GET /rr_gcode?gcode=M117+hello HTTP/1.1\r\n\r\n");
        assert_eq!(event, ParseEvent::Complete);
        assert_eq!(parser.get_key_value("gcode").unwrap(), "M117 hello");
    }

    #[test]
    fn trailing_question_mark_tolerated() {
        let (parser, event) = parse("GET /fonts/x.eot? HTTP/1.1\r\n\r\n");
        assert_eq!(event, ParseEvent::Complete);
        assert_eq!(parser.num_command_words(), 3);
        assert_eq!(parser.command_word(1).unwrap(), "/fonts/x.eot");
        assert_eq!(parser.num_qualifiers(), 0);
    }

    #[test]
    fn multiple_qualifiers() {
        let (parser, event) =
            parse("GET /rr_move?old=a.g&new=b.g&deleteexisting=yes HTTP/1.1\r\n\r\n");
        assert_eq!(event, ParseEvent::Complete);
        assert_eq!(parser.num_qualifiers(), 3);
        assert_eq!(parser.get_key_value("old").unwrap(), "a.g");
        assert_eq!(parser.get_key_value("new").unwrap(), "b.g");
        assert_eq!(parser.get_key_value("deleteexisting").unwrap(), "yes");
    }

    #[test]
    fn lowercase_hex_escape_rejected() {
        let (_, event) = parse("GET /rr_delete?name=foo%2fbar.g HTTP/1.1\r\n\r\n");
        assert_eq!(event, ParseEvent::Rejected(RejectReason::BadEscape));
    }

    #[test]
    fn invalid_escape_rejected() {
        let (_, event) = parse("GET /a%G0 HTTP/1.1\r\n\r\n");
        assert_eq!(event, ParseEvent::Rejected(RejectReason::BadEscape));
    }

    #[test]
    fn escape_in_qualifier_key_rejected() {
        let (_, event) = parse("GET /x?na%41me=1 HTTP/1.1\r\n\r\n");
        assert_eq!(event, ParseEvent::Rejected(RejectReason::BadQualifierKey));
    }

    #[test]
    fn key_without_value_rejected() {
        let (_, event) = parse("GET /x?flag&name=1 HTTP/1.1\r\n\r\n");
        assert_eq!(event, ParseEvent::Rejected(RejectReason::BadQualifierKey));
    }

    #[test]
    fn too_many_command_words_rejected() {
        let (_, event) = parse("GET /x HTTP/1.1 extra words\r\n\r\n");
        assert_eq!(
            event,
            ParseEvent::Rejected(RejectReason::TooManyCommandWords)
        );
    }

    #[test]
    fn too_many_qualifiers_rejected() {
        let (_, event) = parse("GET /x?a=1&b=2&c=3&d=4&e=5&f=6 HTTP/1.1\r\n\r\n");
        assert_eq!(event, ParseEvent::Rejected(RejectReason::TooManyQualKeys));
    }

    #[test]
    fn too_many_headers_rejected() {
        let mut request = String::from("GET /x HTTP/1.1\r\n");
        for i in 0..MAX_HEADERS {
            request.push_str(&format!("H{i}: v\r\n"));
        }
        request.push_str("\r\n");
        let (_, event) = parse(&request);
        assert_eq!(event, ParseEvent::Rejected(RejectReason::TooManyHeaders));
    }

    #[test]
    fn unexpected_newline_rejected() {
        let (_, event) = parse("GET /x HTTP/1.1\r\nBroken\r\n\r\n");
        // A header line without a colon ends at the newline mid-key.
        assert_eq!(event, ParseEvent::Rejected(RejectReason::UnexpectedNewline));
    }

    #[test]
    fn overflow_rejected() {
        let long = "a".repeat(CLIENT_MESSAGE_LEN);
        let (_, event) = parse(&format!("GET /{long} HTTP/1.1\r\n\r\n"));
        assert_eq!(event, ParseEvent::Rejected(RejectReason::Overflow));
    }

    #[test]
    fn folded_header_value() {
        let (parser, event) =
            parse("GET /x HTTP/1.1\r\nX-Long: first\r\n second\r\nHost: h\r\n\r\n");
        assert_eq!(event, ParseEvent::Complete);
        assert_eq!(parser.header_value("X-Long").unwrap(), "first second");
        assert_eq!(parser.header_value("Host").unwrap(), "h");
    }

    #[test]
    fn header_value_leading_whitespace_skipped() {
        let (parser, event) = parse("GET /x HTTP/1.1\r\nContent-Length:    42\r\n\r\n");
        assert_eq!(event, ParseEvent::Complete);
        assert_eq!(parser.header_value("Content-Length").unwrap(), "42");
    }

    #[test]
    fn bare_lf_line_endings_accepted() {
        let (parser, event) = parse("GET /x HTTP/1.1\nHost: y\n\n");
        assert_eq!(event, ParseEvent::Complete);
        assert_eq!(parser.num_command_words(), 3);
        assert_eq!(parser.header_value("Host").unwrap(), "y");
    }

    #[test]
    fn outcome_is_sticky() {
        let (mut parser, event) = parse("GET /x HTTP/1.1\r\n\r\n");
        assert_eq!(event, ParseEvent::Complete);
        assert_eq!(parser.feed(b'z'), ParseEvent::Complete);
    }

    #[test]
    fn reset_allows_next_request() {
        let (mut parser, event) = parse("GET /one HTTP/1.1\r\n\r\n");
        assert_eq!(event, ParseEvent::Complete);

        parser.reset();
        let mut event = ParseEvent::NeedMore;
        for &b in b"POST /two HTTP/1.1\r\n\r\n" {
            event = parser.feed(b);
            if event != ParseEvent::NeedMore {
                break;
            }
        }
        assert_eq!(event, ParseEvent::Complete);
        assert_eq!(parser.command_word(0).unwrap(), "POST");
        assert_eq!(parser.command_word(1).unwrap(), "/two");
    }

    #[test]
    fn parser_never_reads_past_capacity() {
        // Arbitrary garbage either completes or rejects; it must never
        // panic or write past the buffer.
        let mut parser = RequestParser::new();
        for i in 0..(CLIENT_MESSAGE_LEN * 2) {
            let b = (i % 251) as u8;
            match parser.feed(b) {
                ParseEvent::NeedMore => continue,
                ParseEvent::Complete | ParseEvent::Rejected(_) => break,
            }
        }
    }
}
