use std::fmt;
use std::io::{BufRead, Read};

use crate::error::{ParseErrorKind, RobocamError};

/// Upper bound on a request head, request line and headers included.
pub const MAX_HEAD_BYTES: usize = 8 * 1024;

fn parse_error(kind: ParseErrorKind) -> RobocamError {
    RobocamError::Parse { kind }
}

/// Protocol versions the server answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    fn from_token(token: &str) -> Result<Self, ParseErrorKind> {
        match token {
            "HTTP/1.0" => Ok(Self::Http10),
            "HTTP/1.1" => Ok(Self::Http11),
            t if t.starts_with("HTTP/") => Err(ParseErrorKind::UnsupportedVersion),
            _ => Err(ParseErrorKind::InvalidRequestLine),
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http10 => f.write_str("HTTP/1.0"),
            Self::Http11 => f.write_str("HTTP/1.1"),
        }
    }
}

/// A parsed HTTP request head.
///
/// Request bodies are never read; none of the served routes accept one.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    /// Request target in origin form, including any query string.
    pub target: String,
    pub version: HttpVersion,
    /// Headers in arrival order. Lookups via [`get_header`](Self::get_header)
    /// are case-insensitive.
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Read one request head from `reader` and parse it.
    ///
    /// At most [`MAX_HEAD_BYTES`] (+1 to detect overflow) are pulled from the
    /// reader, so a client that never sends a line break cannot grow the
    /// buffer. Returns `Ok(None)` if the peer closed before sending anything.
    pub fn read_from<R: BufRead>(reader: &mut R) -> crate::error::Result<Option<Self>> {
        let mut head = Vec::with_capacity(512);
        let mut limited = reader.by_ref().take(MAX_HEAD_BYTES as u64 + 1);

        loop {
            let line_start = head.len();
            if limited.read_until(b'\n', &mut head)? == 0 {
                return match head.len() {
                    0 => Ok(None),
                    n if n > MAX_HEAD_BYTES => Err(parse_error(ParseErrorKind::HeadTooLarge)),
                    _ => Err(parse_error(ParseErrorKind::IncompleteHead)),
                };
            }
            if head.len() > MAX_HEAD_BYTES {
                return Err(parse_error(ParseErrorKind::HeadTooLarge));
            }

            let line = &head[line_start..];
            if line == b"\r\n" || line == b"\n" {
                // Tolerate stray empty lines before the request line.
                if line_start == 0 {
                    head.clear();
                    continue;
                }
                break;
            }
        }

        let text =
            std::str::from_utf8(&head).map_err(|_| parse_error(ParseErrorKind::InvalidEncoding))?;
        Self::parse(text).map(Some)
    }

    /// Parse a complete head (request line, headers, blank line).
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let request_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| parse_error(ParseErrorKind::EmptyRequest))?;

        // Exactly `method SP target SP version`.
        let mut tokens = request_line.split(' ');
        let (Some(method), Some(target), Some(version), None) =
            (tokens.next(), tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(parse_error(ParseErrorKind::InvalidRequestLine));
        };
        if method.is_empty()
            || !method.bytes().all(|b| b.is_ascii_alphabetic())
            || !target.starts_with('/')
        {
            return Err(parse_error(ParseErrorKind::InvalidRequestLine));
        }
        let version = HttpVersion::from_token(version).map_err(parse_error)?;

        let headers = lines
            .take_while(|l| !l.is_empty())
            .map(|line| {
                let (name, value) = line
                    .split_once(':')
                    .ok_or_else(|| parse_error(ParseErrorKind::InvalidHeader))?;
                // Field names carry no whitespace; this also rejects obsolete
                // line folding.
                if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace()) {
                    return Err(parse_error(ParseErrorKind::InvalidHeader));
                }
                Ok((name.to_string(), value.trim().to_string()))
            })
            .collect::<crate::error::Result<Vec<_>>>()?;

        Ok(HttpRequest {
            method: method.to_string(),
            target: target.to_string(),
            version,
            headers,
        })
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Request path with any query string or fragment removed.
    pub fn path(&self) -> &str {
        let end = self
            .target
            .find(['?', '#'])
            .unwrap_or(self.target.len());
        &self.target[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};

    fn kind(err: RobocamError) -> ParseErrorKind {
        match err {
            RobocamError::Parse { kind } => kind,
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn parse_stream_request() {
        let raw = "GET /stream.mjpg HTTP/1.1\r\nHost: robot.local:8081\r\n\r\n";
        let req = HttpRequest::parse(raw).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/stream.mjpg");
        assert_eq!(req.version, HttpVersion::Http11);
        assert_eq!(req.get_header("Host"), Some("robot.local:8081"));
    }

    #[test]
    fn path_strips_query() {
        let raw = "GET /stream.mjpg?t=1700000000 HTTP/1.1\r\n\r\n";
        let req = HttpRequest::parse(raw).unwrap();
        assert_eq!(req.path(), "/stream.mjpg");
        assert_eq!(req.target, "/stream.mjpg?t=1700000000");
    }

    #[test]
    fn bare_newlines_accepted() {
        let req = HttpRequest::parse("GET / HTTP/1.0\nAccept: */*\n\n").unwrap();
        assert_eq!(req.version, HttpVersion::Http10);
        assert_eq!(req.get_header("accept"), Some("*/*"));
    }

    #[test]
    fn parse_empty_request() {
        assert_eq!(kind(HttpRequest::parse("").unwrap_err()), ParseErrorKind::EmptyRequest);
    }

    #[test]
    fn parse_invalid_request_line() {
        for raw in [
            "JUST_A_METHOD\r\n\r\n",
            "GET  /  HTTP/1.1\r\n\r\n",
            "GET http://robot/ HTTP/1.1\r\n\r\n",
            "GET / RTSP/1.0\r\n\r\n",
            "GET / HTTP/1.1 extra\r\n\r\n",
        ] {
            assert_eq!(
                kind(HttpRequest::parse(raw).unwrap_err()),
                ParseErrorKind::InvalidRequestLine,
                "{raw:?}"
            );
        }
    }

    #[test]
    fn http2_preface_is_unsupported_version() {
        let err = HttpRequest::parse("GET / HTTP/2.0\r\n\r\n").unwrap_err();
        assert_eq!(kind(err), ParseErrorKind::UnsupportedVersion);
    }

    #[test]
    fn parse_invalid_header() {
        for raw in [
            "GET / HTTP/1.0\r\nno colon here\r\n\r\n",
            "GET / HTTP/1.0\r\nHost : robot\r\n\r\n",
            "GET / HTTP/1.0\r\nHost: robot\r\n  folded\r\n\r\n",
        ] {
            assert_eq!(
                kind(HttpRequest::parse(raw).unwrap_err()),
                ParseErrorKind::InvalidHeader,
                "{raw:?}"
            );
        }
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "GET / HTTP/1.0\r\nuser-agent: curl/8.0\r\n\r\n";
        let req = HttpRequest::parse(raw).unwrap();
        assert_eq!(req.get_header("User-Agent"), Some("curl/8.0"));
        assert_eq!(req.get_header("USER-AGENT"), Some("curl/8.0"));
        assert_eq!(req.get_header("Referer"), None);
    }

    #[test]
    fn read_stops_at_blank_line() {
        let mut reader =
            Cursor::new(b"\r\nGET /index.html HTTP/1.1\r\nHost: robot\r\n\r\nleftover".to_vec());
        let req = HttpRequest::read_from(&mut reader).unwrap().unwrap();
        assert_eq!(req.path(), "/index.html");

        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "leftover");
    }

    #[test]
    fn read_closed_before_request() {
        let mut reader = Cursor::new(Vec::new());
        assert!(HttpRequest::read_from(&mut reader).unwrap().is_none());
    }

    #[test]
    fn read_truncated_head() {
        let mut reader = Cursor::new(b"GET / HTTP/1.1\r\nHost: ro".to_vec());
        let err = HttpRequest::read_from(&mut reader).unwrap_err();
        assert_eq!(kind(err), ParseErrorKind::IncompleteHead);
    }

    #[test]
    fn unterminated_line_is_bounded() {
        let mut raw = b"GET /".to_vec();
        raw.resize(1024 * 1024, b'a');
        let mut reader = BufReader::new(Cursor::new(raw));

        let err = HttpRequest::read_from(&mut reader).unwrap_err();
        assert_eq!(kind(err), ParseErrorKind::HeadTooLarge);
        // Only about one limit's worth was consumed, not the whole megabyte.
        assert!(reader.get_ref().position() <= 2 * MAX_HEAD_BYTES as u64 + 1);
    }

    #[test]
    fn many_headers_are_bounded() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        while raw.len() <= MAX_HEAD_BYTES {
            raw.extend_from_slice(b"X-Pad: aaaaaaaaaaaaaaaa\r\n");
        }
        raw.extend_from_slice(b"\r\n");
        let err = HttpRequest::read_from(&mut Cursor::new(raw)).unwrap_err();
        assert_eq!(kind(err), ParseErrorKind::HeadTooLarge);
    }

    #[test]
    fn non_utf8_head_rejected() {
        let mut reader = Cursor::new(b"GET /\xff HTTP/1.1\r\n\r\n".to_vec());
        let err = HttpRequest::read_from(&mut reader).unwrap_err();
        assert_eq!(kind(err), ParseErrorKind::InvalidEncoding);
    }
}
