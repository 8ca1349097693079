// Wire format of the only two answers this server ever gives.

pub const STATUS_SUCCESS: &str = "HTTP/1.1 200 OK\r\n";
pub const STATUS_NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\n";
pub const CLOSE_HEADERS: &str = "Connection: close\r\n\r\n";

pub const NOT_FOUND_BODY: &[u8] = b"<html><body><h1>404 Not Found</h1></body></html>\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Found,
    NotFound,
}

/// Header block for `outcome` advertising `content_length` body bytes.
pub fn format_header(outcome: Outcome, content_length: u64) -> String {
    let status: &str = match outcome {
        Outcome::Found => STATUS_SUCCESS,
        Outcome::NotFound => STATUS_NOT_FOUND,
    };
    format!("{status}Content-Length: {content_length}\r\n{CLOSE_HEADERS}")
}

#[inline(always)]
pub fn ok_header(file_len: u64) -> String {
    format_header(Outcome::Found, file_len)
}

#[inline(always)]
pub fn not_found_header() -> String {
    format_header(Outcome::NotFound, NOT_FOUND_BODY.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_header_is_exact() {
        assert_eq!(
            ok_header(37),
            "HTTP/1.1 200 OK\r\nContent-Length: 37\r\nConnection: close\r\n\r\n"
        );
        assert_eq!(
            ok_header(0),
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn not_found_header_advertises_body_length() {
        let header = not_found_header();
        assert!(header.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(header.contains(&format!("Content-Length: {}\r\n", NOT_FOUND_BODY.len())));
        assert!(header.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn large_lengths_are_not_truncated() {
        assert!(ok_header(u64::MAX).contains("Content-Length: 18446744073709551615\r\n"));
    }
}
