use memchr::memmem::Finder;
use std::{error::Error, fmt};

// Request-line tokenizer. Only the path survives: method and headers are
// checked for shape and then forgotten.

pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
pub const MAX_PATH_LEN: usize = 4096;

thread_local! {
    // "\r\n\r\n" finder, shared by the receive loop and the parser.
    static FINDER: Finder<'static> = Finder::new(HEADER_TERMINATOR);
}

#[inline(always)]
pub fn find_header_end(buffer: &[u8]) -> Option<usize> {
    FINDER.with(|f| f.find(buffer))
}

#[inline(always)]
pub fn has_header_terminator(buffer: &[u8]) -> bool {
    find_header_end(buffer).is_some()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No `\r\n\r\n` in the fed bytes.
    Incomplete,
    MalformedRequestLine,
    MalformedHeader,
    /// Target is not origin-form or absolute-form, or decodes to garbage.
    InvalidPath,
    PathTooLong(usize),
    /// Bytes after the header block; one request per connection.
    TrailingBytes(usize),
    /// The parser already reported a path.
    AlreadyComplete,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Incomplete => write!(f, "request header is not terminated"),
            ParseError::MalformedRequestLine => write!(f, "malformed request line"),
            ParseError::MalformedHeader => write!(f, "malformed header line"),
            ParseError::InvalidPath => write!(f, "invalid request path"),
            ParseError::PathTooLong(len) => {
                write!(f, "request path is {len} bytes, limit is {MAX_PATH_LEN}")
            }
            ParseError::TrailingBytes(len) => write!(f, "{len} unexpected bytes after header"),
            ParseError::AlreadyComplete => write!(f, "request already parsed"),
        }
    }
}

impl Error for ParseError {}

/// Feed-and-callback request parser. One instance per connection.
#[derive(Debug, Default)]
pub struct RequestParser {
    complete: bool,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one complete request header out of `buffer` and hands the
    /// percent-decoded path to `on_path`. Returns the number of bytes consumed,
    /// which is always the whole buffer on success.
    pub fn execute<F>(&mut self, buffer: &[u8], mut on_path: F) -> Result<usize, ParseError>
    where
        F: FnMut(&str),
    {
        if self.complete {
            return Err(ParseError::AlreadyComplete);
        }
        let end: usize = find_header_end(buffer).ok_or(ParseError::Incomplete)?;
        let head: &[u8] = &buffer[..end];
        let line_end: usize = memchr::memchr(b'\r', head).unwrap_or(end);
        let target: &[u8] = split_request_line(&head[..line_end])?;
        if line_end < end {
            // Whatever follows the request line starts with "\r\n".
            check_headers(&head[line_end..])?;
        }
        let path: String = decode_path(target)?;
        let consumed: usize = end + HEADER_TERMINATOR.len();
        if consumed != buffer.len() {
            return Err(ParseError::TrailingBytes(buffer.len() - consumed));
        }
        self.complete = true;
        on_path(&path);
        Ok(consumed)
    }
}

fn split_request_line(line: &[u8]) -> Result<&[u8], ParseError> {
    let space1: usize = memchr::memchr(b' ', line).ok_or(ParseError::MalformedRequestLine)?;
    let method: &[u8] = &line[..space1];
    let rest: &[u8] = &line[space1 + 1..];
    let space2: usize = memchr::memchr(b' ', rest).ok_or(ParseError::MalformedRequestLine)?;
    let target: &[u8] = &rest[..space2];
    let version: &[u8] = &rest[space2 + 1..];
    if method.is_empty() || !method.iter().all(|b| b.is_ascii_uppercase()) {
        return Err(ParseError::MalformedRequestLine);
    }
    if !version.starts_with(b"HTTP/") || version.len() <= 5 {
        return Err(ParseError::MalformedRequestLine);
    }
    if target.is_empty() {
        return Err(ParseError::MalformedRequestLine);
    }
    Ok(target)
}

fn check_headers(block: &[u8]) -> Result<(), ParseError> {
    let mut rest: &[u8] = block.strip_prefix(b"\r\n").ok_or(ParseError::MalformedHeader)?;
    while !rest.is_empty() {
        let line_end: usize = memchr::memmem::find(rest, b"\r\n").unwrap_or(rest.len());
        let line: &[u8] = &rest[..line_end];
        let colon: usize = memchr::memchr(b':', line).ok_or(ParseError::MalformedHeader)?;
        let name: &[u8] = &line[..colon];
        if name.is_empty() || name.iter().any(|b| b.is_ascii_whitespace()) {
            return Err(ParseError::MalformedHeader);
        }
        rest = rest.get(line_end + 2..).unwrap_or(&[]);
    }
    Ok(())
}

fn decode_path(target: &[u8]) -> Result<String, ParseError> {
    // Absolute-form targets ("http://host/path") keep only their path.
    let target: &[u8] = match target.windows(3).position(|w| w == b"://") {
        Some(scheme_end) if target[0] != b'/' => {
            let authority: &[u8] = &target[scheme_end + 3..];
            match memchr::memchr(b'/', authority) {
                Some(slash) => &authority[slash..],
                None => b"/",
            }
        }
        _ => target,
    };
    if target.first() != Some(&b'/') {
        return Err(ParseError::InvalidPath);
    }
    let raw: &[u8] = match memchr::memchr2(b'?', b'#', target) {
        Some(cut) => &target[..cut],
        None => target,
    };
    let mut decoded: Vec<u8> = Vec::with_capacity(raw.len());
    let mut i: usize = 0;
    while i < raw.len() {
        match raw[i] {
            b'%' => {
                let hi = raw.get(i + 1).and_then(|b| hex_value(*b));
                let lo = raw.get(i + 2).and_then(|b| hex_value(*b));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => decoded.push(hi << 4 | lo),
                    _ => return Err(ParseError::InvalidPath),
                }
                i += 3;
            }
            byte => {
                decoded.push(byte);
                i += 1;
            }
        }
    }
    if decoded.len() > MAX_PATH_LEN {
        return Err(ParseError::PathTooLong(decoded.len()));
    }
    if decoded.contains(&0) {
        return Err(ParseError::InvalidPath);
    }
    String::from_utf8(decoded).map_err(|_| ParseError::InvalidPath)
}

#[inline(always)]
fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
