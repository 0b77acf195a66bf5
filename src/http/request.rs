use crate::{
    errors::{ErrorKind, ParseError},
    http::types,
    Method, Version,
};
use memchr::{memchr, memchr2, memchr_iter, memmem};
use percent_encoding::percent_decode_str;
use std::borrow::Cow;

/// Parsed view of one request head.
///
/// Every string field borrows from the connection's request buffer, so a
/// `Request` cannot outlive the next read into (or compaction of) that
/// buffer.
///
/// # Input data requirements
///
/// #### Character encoding
///
/// The request line and header block must be valid `UTF-8`. The body is
/// never inspected.
///
/// #### General designations
/// - `SP`: ASCII space (0x20)
/// - `CRLF`: Carriage return + line feed (`"\r\n"`), exactly this sequence
/// ---
/// - `[METHOD]`: `GET`, `POST`, `PUT`, `PATCH` or `DELETE`, case-sensitive.
///   Any other token is rejected with [`ParseError::UnknownMethod`].
/// - `[TARGET]`: origin-form request target; decoded lazily by
///   [`Request::decoded_path`].
///
/// ## First line
/// ```text
/// [METHOD] SP [TARGET] SP "HTTP/1.1" CRLF
/// ```
///
/// `HTTP/1.0` is accepted only when
/// [`ReqLimits::allow_http10`](crate::limits::ReqLimits::allow_http10) is set.
///
/// ## Header
/// ```text
/// [NAME] ":" OWS [VALUE] OWS CRLF
/// ```
///
/// Names are case-insensitive. Only the headers below are kept, everything
/// else is dropped after its syntax has been checked:
///
/// | Header           | Purpose                                      |
/// |------------------|----------------------------------------------|
/// | `Host`           | Logged                                       |
/// | `Connection`     | `keep-alive` / `close`                       |
/// | `User-Agent`     | Logged                                       |
/// | `Content-Type`   | Kept for handlers                            |
/// | `Content-Length` | Body framing, mandatory for POST/PUT/PATCH   |
/// | `Expect`         | `100-continue` triggers an interim response  |
///
/// ## End of headers
/// ```text
/// CRLF
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'buf> {
    method: Method,
    target: &'buf str,
    version: Version,

    host: Option<&'buf str>,
    connection: Option<&'buf str>,
    user_agent: Option<&'buf str>,
    content_type: Option<&'buf str>,
    content_length: Option<&'buf str>,
    expect: Option<&'buf str>,
}

/// Outcome of one parser pass over the buffered bytes.
#[derive(Debug, PartialEq, Eq)]
pub enum Parsed<'buf> {
    /// The header block is not complete yet.
    Partial,
    /// A full header block; the body (if any) starts at `header_len`.
    Complete {
        request: Request<'buf>,
        header_len: usize,
    },
}

/// Parses a request head from the front of `buf`.
///
/// `buf` may hold a partial head, a complete head, or a complete head
/// followed by body bytes and further pipelined requests. Only the bytes up to
/// `header_len` are interpreted.
pub fn parse_request(buf: &[u8], allow_http10: bool) -> Result<Parsed<'_>, ParseError> {
    let Some(end) = memmem::find(buf, b"\r\n\r\n") else {
        return Ok(Parsed::Partial);
    };

    let head = simdutf8::basic::from_utf8(&buf[..end]).map_err(|_| ParseError::InvalidEncoding)?;

    let mut lines = head.split("\r\n");
    let first_line = lines.next().unwrap_or_default();
    let mut request = parse_first_line(first_line, allow_http10)?;

    for line in lines {
        request.parse_header(line)?;
    }

    Ok(Parsed::Complete {
        request,
        header_len: end + 4,
    })
}

#[inline]
fn parse_first_line(line: &str, allow_http10: bool) -> Result<Request<'_>, ParseError> {
    let bytes = line.as_bytes();

    let method_end = memchr(b' ', bytes).ok_or(ParseError::InvalidRequestLine)?;
    let method = Method::from_bytes(&bytes[..method_end])?;

    let rest = &line[method_end + 1..];
    let target_end = memchr(b' ', rest.as_bytes()).ok_or(ParseError::InvalidRequestLine)?;
    let target = &rest[..target_end];
    let version = &rest[target_end + 1..];

    if target.is_empty() || memchr(b' ', version.as_bytes()).is_some() {
        return Err(ParseError::InvalidRequestLine);
    }
    let version = Version::from_bytes(version.as_bytes(), allow_http10)?;

    Ok(Request {
        method,
        target,
        version,
        host: None,
        connection: None,
        user_agent: None,
        content_type: None,
        content_length: None,
        expect: None,
    })
}

#[inline]
fn trim_ows(value: &str) -> &str {
    value.trim_matches(|c| c == ' ' || c == '\t')
}

// Parse headers
impl<'buf> Request<'buf> {
    #[inline]
    fn parse_header(&mut self, line: &'buf str) -> Result<(), ParseError> {
        let colon = memchr(b':', line.as_bytes()).ok_or(ParseError::InvalidHeader)?;
        let name = &line[..colon];

        if name.is_empty() || name.bytes().any(|b| b == b' ' || b == b'\t') {
            return Err(ParseError::InvalidHeader);
        }
        let value = trim_ows(&line[colon + 1..]);

        let slot = if name.eq_ignore_ascii_case("host") {
            &mut self.host
        } else if name.eq_ignore_ascii_case("connection") {
            &mut self.connection
        } else if name.eq_ignore_ascii_case("user-agent") {
            &mut self.user_agent
        } else if name.eq_ignore_ascii_case("content-type") {
            &mut self.content_type
        } else if name.eq_ignore_ascii_case("content-length") {
            // Differing lengths make the body framing ambiguous.
            if self.content_length.is_some_and(|prev| prev != value) {
                return Err(ParseError::InvalidHeader);
            }
            &mut self.content_length
        } else if name.eq_ignore_ascii_case("expect") {
            &mut self.expect
        } else {
            return Ok(());
        };

        *slot = Some(value);
        Ok(())
    }
}

impl<'buf> Request<'buf> {
    #[inline]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Raw request target, exactly as sent.
    #[inline]
    pub const fn target(&self) -> &'buf str {
        self.target
    }

    #[inline]
    pub const fn version(&self) -> Version {
        self.version
    }

    #[inline]
    pub const fn host(&self) -> Option<&'buf str> {
        self.host
    }

    #[inline]
    pub const fn user_agent(&self) -> Option<&'buf str> {
        self.user_agent
    }

    #[inline]
    pub const fn content_type(&self) -> Option<&'buf str> {
        self.content_type
    }

    /// Declared body length, `None` when the header is absent or not a
    /// non-negative decimal number.
    #[inline]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
            .and_then(|value| types::slice_to_usize(value.as_bytes()))
            .map(|len| len as u64)
    }

    /// `Expect: 100-continue`, compared case-insensitively.
    #[inline]
    pub fn expects_continue(&self) -> bool {
        self.expect
            .is_some_and(|value| value.eq_ignore_ascii_case("100-continue"))
    }

    /// Whether the client allows the connection to stay open after this
    /// request.
    ///
    /// An explicit `close` token wins, then `keep-alive`; otherwise
    /// `HTTP/1.1` defaults to open and `HTTP/1.0` to closed.
    pub fn keep_alive(&self) -> bool {
        let mut keep_alive = None;

        for token in self.connection.unwrap_or_default().split(',').map(trim_ows) {
            if token.eq_ignore_ascii_case("close") {
                return false;
            }
            if token.eq_ignore_ascii_case("keep-alive") {
                keep_alive = Some(true);
            }
        }

        keep_alive.unwrap_or(self.version == Version::Http11)
    }

    /// Percent-decoded path component of the target.
    ///
    /// Query and fragment are cut off, every `%` must be followed by two hex
    /// digits, and the decoded result must be UTF-8 without NUL bytes. An empty
    /// path becomes `/`.
    pub fn decoded_path(&self) -> Result<Cow<'buf, str>, ErrorKind> {
        let raw = match memchr2(b'?', b'#', self.target.as_bytes()) {
            Some(end) => &self.target[..end],
            None => self.target,
        };

        if !raw.is_empty() && !raw.starts_with('/') {
            return Err(ErrorKind::InvalidInput("request target is not origin-form"));
        }

        let bytes = raw.as_bytes();
        for pos in memchr_iter(b'%', bytes) {
            match bytes.get(pos + 1..pos + 3) {
                Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {}
                _ => return Err(ErrorKind::InvalidInput("invalid percent-encoding")),
            }
        }

        let decoded = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|_| ErrorKind::InvalidInput("path is not valid UTF-8"))?;

        if decoded.contains('\0') {
            return Err(ErrorKind::InvalidInput("path contains NUL"));
        }
        if decoded.is_empty() {
            return Ok(Cow::Borrowed("/"));
        }

        Ok(decoded)
    }
}

#[cfg(test)]
mod request_tests {
    use super::*;

    fn complete(src: &str) -> (Request<'_>, usize) {
        match parse_request(src.as_bytes(), false) {
            Ok(Parsed::Complete { request, header_len }) => (request, header_len),
            other => panic!("expected complete request for {src:?}, got {other:?}"),
        }
    }

    #[test]
    fn partial() {
        let cases = [
            "",
            "GET",
            "GET / HTTP/1.1",
            "GET / HTTP/1.1\r\n",
            "GET / HTTP/1.1\r\nHost: a\r\n",
            "GET / HTTP/1.1\r\nHost: a\r\n\r",
        ];

        for src in cases {
            assert_eq!(parse_request(src.as_bytes(), false), Ok(Parsed::Partial), "{src:?}");
        }
    }

    #[test]
    fn parse_valid_request() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\n\r\n", Method::Get, "/", 18),
            ("PUT /a.txt HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello", Method::Put, "/a.txt", 42),
            ("POST /up HTTP/1.1\r\nHost: x\r\n\r\n", Method::Post, "/up", 30),
            ("PATCH /log.txt HTTP/1.1\r\n\r\n", Method::Patch, "/log.txt", 27),
            ("DELETE /a?b=c HTTP/1.1\r\nX-Unknown: 1\r\n\r\n", Method::Delete, "/a?b=c", 40),
        ];

        for (src, method, target, header_len) in cases {
            let (request, len) = complete(src);
            assert_eq!(request.method(), method, "{src:?}");
            assert_eq!(request.target(), target, "{src:?}");
            assert_eq!(request.version(), Version::Http11);
            assert_eq!(len, header_len, "{src:?}");
        }
    }

    #[test]
    fn parse_invalid_request() {
        #[rustfmt::skip]
        let cases = [
            ("FOO / HTTP/1.1\r\n\r\n", ParseError::UnknownMethod),
            ("get / HTTP/1.1\r\n\r\n", ParseError::UnknownMethod),
            ("HEAD / HTTP/1.1\r\n\r\n", ParseError::UnknownMethod),
            ("GET / HTTP/1.0\r\n\r\n", ParseError::UnsupportedVersion),
            ("GET / HTTP/2\r\n\r\n", ParseError::UnsupportedVersion),
            ("GET /\r\n\r\n", ParseError::InvalidRequestLine),
            ("GET\r\n\r\n", ParseError::InvalidRequestLine),
            ("GET  HTTP/1.1\r\n\r\n", ParseError::InvalidRequestLine),
            ("GET / HTTP/1.1 x\r\n\r\n", ParseError::InvalidRequestLine),
            ("GET / HTTP/1.1\r\nNoColon\r\n\r\n", ParseError::InvalidHeader),
            ("GET / HTTP/1.1\r\n: empty\r\n\r\n", ParseError::InvalidHeader),
            ("GET / HTTP/1.1\r\nBad Name: x\r\n\r\n", ParseError::InvalidHeader),
            ("PUT / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 30\r\n\r\n", ParseError::InvalidHeader),
        ];

        for (src, err) in cases {
            assert_eq!(parse_request(src.as_bytes(), false), Err(err), "{src:?}");
        }

        let invalid_utf8 = b"GET /\xff HTTP/1.1\r\n\r\n";
        assert_eq!(parse_request(invalid_utf8, false), Err(ParseError::InvalidEncoding));
    }

    #[test]
    fn http10_switch() {
        let src = b"GET / HTTP/1.0\r\n\r\n";
        assert!(matches!(
            parse_request(src, true),
            Ok(Parsed::Complete { request, .. }) if request.version() == Version::Http10
        ));
    }

    #[test]
    fn recognized_headers() {
        let (request, _) = complete(
            "PUT /f HTTP/1.1\r\nHOST: example\r\nuser-agent:  curl/8 \r\n\
             CoNtEnT-TyPe:\ttext/plain\r\ncontent-length: 12 \r\nEXPECT: 100-Continue\r\n\r\n",
        );

        assert_eq!(request.host(), Some("example"));
        assert_eq!(request.user_agent(), Some("curl/8"));
        assert_eq!(request.content_type(), Some("text/plain"));
        assert_eq!(request.content_length(), Some(12));
        assert!(request.expects_continue());
    }

    #[test]
    fn content_length() {
        let cases = [
            ("0", Some(0)),
            ("5", Some(5)),
            ("-1", None),
            ("abc", None),
            ("", None),
            ("1 2", None),
        ];

        for (value, expected) in cases {
            let src = format!("PUT / HTTP/1.1\r\nContent-Length: {value}\r\n\r\n");
            let (request, _) = complete(&src);
            assert_eq!(request.content_length(), expected, "{value:?}");
        }

        let (request, _) = complete("PUT / HTTP/1.1\r\n\r\n");
        assert_eq!(request.content_length(), None);

        let (request, _) = complete("PUT / HTTP/1.1\r\nContent-Length: 4\r\ncontent-length:4\r\n\r\n");
        assert_eq!(request.content_length(), Some(4));
    }

    #[test]
    fn keep_alive() {
        let cases = [
            ("GET / HTTP/1.1\r\n\r\n", false, true),
            ("GET / HTTP/1.1\r\nConnection: close\r\n\r\n", false, false),
            ("GET / HTTP/1.1\r\nConnection: CLOSE\r\n\r\n", false, false),
            ("GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n", false, true),
            ("GET / HTTP/1.1\r\nConnection: Upgrade, close\r\n\r\n", false, false),
            ("GET / HTTP/1.0\r\n\r\n", true, false),
            ("GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n", true, true),
        ];

        for (src, http10, expected) in cases {
            match parse_request(src.as_bytes(), http10) {
                Ok(Parsed::Complete { request, .. }) => {
                    assert_eq!(request.keep_alive(), expected, "{src:?}")
                }
                other => panic!("{src:?}: {other:?}"),
            }
        }
    }

    #[test]
    fn pipelined() {
        let first = "PUT /a HTTP/1.1\r\nContent-Length: 5\r\n\r\n";
        let second = "GET /a HTTP/1.1\r\n\r\n";
        let buf = format!("{first}hello{second}");

        let (request, header_len) = complete(&buf);
        assert_eq!(header_len, first.len());
        assert_eq!(request.content_length(), Some(5));

        let rest = &buf[header_len + 5..];
        let (request, header_len) = complete(rest);
        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.target(), "/a");
        assert_eq!(header_len, second.len());
    }

    #[test]
    fn decoded_path() {
        let cases = [
            ("/", Ok("/")),
            ("/a%20b.txt", Ok("/a b.txt")),
            ("/dir/file?x=1#frag", Ok("/dir/file")),
            ("/%E2%82%AC", Ok("/\u{20ac}")),
            ("?only-query", Ok("/")),
            ("/bad%2", Err(())),
            ("/bad%zz", Err(())),
            ("/nul%00", Err(())),
            ("/%ff", Err(())),
            ("http://host/abs", Err(())),
        ];

        for (target, expected) in cases {
            let src = format!("GET {target} HTTP/1.1\r\n\r\n");
            let (request, _) = complete(&src);
            let result = request.decoded_path();
            match expected {
                Ok(path) => assert_eq!(result.unwrap(), path, "{target:?}"),
                Err(()) => assert!(
                    matches!(result, Err(ErrorKind::InvalidInput(_))),
                    "{target:?}"
                ),
            }
        }
    }
}
