use crate::{StatusCode, Version};

/// HTTP response head builder.
///
/// Builds the status line and headers into a reusable buffer. Small bodies
/// (error texts) are appended with [`body()`](Response::body); file contents
/// and directory listings are streamed by the caller after the head produced
/// by [`sized()`](Response::sized) or [`unsized_close()`](Response::unsized_close).
///
/// Every finished head carries `Connection: keep-alive` or `Connection: close`.
///
/// # Panics
/// All methods perform order checks in `debug` mode that panic on violations
/// (`status()` first, then headers, then exactly one finalizing method).
#[derive(Debug)]
pub(crate) struct Response {
    buffer: Vec<u8>,
    version: Version,
    keep_alive: bool,
    status: StatusCode,
    state: ResponseState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResponseState {
    Clean,
    Headers,
    Complete,
}

impl Response {
    #[inline(always)]
    pub(crate) fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            version: Version::Http11,
            keep_alive: true,
            status: StatusCode::Ok,
            state: ResponseState::Clean,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self, version: Version, keep_alive: bool) {
        self.buffer.clear();
        self.version = version;
        self.keep_alive = keep_alive;
        self.status = StatusCode::Ok;
        self.state = ResponseState::Clean;
    }

    #[inline(always)]
    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    #[inline(always)]
    pub(crate) const fn status_code(&self) -> StatusCode {
        self.status
    }

    #[inline(always)]
    pub(crate) const fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Interim response sent before reading an `Expect: 100-continue` body.
    #[inline]
    pub(crate) const fn continue_line() -> &'static [u8] {
        b"HTTP/1.1 100 Continue\r\n\r\n"
    }
}

impl Response {
    #[inline]
    #[track_caller]
    pub(crate) fn status(&mut self, status: StatusCode) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Clean,
            "Must be first and called only once"
        );

        self.buffer
            .extend_from_slice(status.into_first_line(self.version));
        self.status = status;
        self.state = ResponseState::Headers;
        self
    }

    /// Adds a header. `Content-Length` and `Connection` are written by the
    /// finalizing methods and must not be passed here.
    #[inline]
    #[track_caller]
    pub(crate) fn header(&mut self, name: &str, value: &str) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        self.buffer.extend_from_slice(name.as_bytes());
        self.buffer.extend_from_slice(b": ");
        self.buffer.extend_from_slice(value.as_bytes());
        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Finalizes the response with an in-memory body.
    #[inline]
    #[track_caller]
    pub(crate) fn body(&mut self, data: &[u8]) {
        self.sized(data.len() as u64);
        self.buffer.extend_from_slice(data);
    }

    /// Finalizes the head of a response whose `len` body bytes the caller
    /// writes separately.
    #[inline]
    #[track_caller]
    pub(crate) fn sized(&mut self, len: u64) {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.connection_header();

        let (arr, start) = Response::number_to_bytes(len);
        self.buffer.extend_from_slice(b"Content-Length: ");
        self.buffer.extend_from_slice(&arr[start..]);
        self.buffer.extend_from_slice(b"\r\n\r\n");
        self.state = ResponseState::Complete;
    }

    /// Finalizes the head of a response of unknown length. The body ends
    /// when the server closes the connection.
    #[inline]
    #[track_caller]
    pub(crate) fn unsized_close(&mut self) {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.keep_alive = false;
        self.connection_header();
        self.buffer.extend_from_slice(b"\r\n");
        self.state = ResponseState::Complete;
    }

    /// Plain-text response carrying the lowercase reason phrase, or no body
    /// for `204`.
    pub(crate) fn simple(&mut self, status: StatusCode) {
        self.status(status);

        match status {
            StatusCode::NoContent | StatusCode::Created => self.sized(0),
            _ => {
                let text = format!("{}\n", status.reason().to_ascii_lowercase());
                self.header("Content-Type", "text/plain; charset=utf-8")
                    .body(text.as_bytes());
            }
        }
    }
}

impl Response {
    #[inline(always)]
    fn connection_header(&mut self) {
        let line: &[u8] = match self.keep_alive {
            true => b"Connection: keep-alive\r\n",
            false => b"Connection: close\r\n",
        };
        self.buffer.extend_from_slice(line);
    }

    #[inline]
    const fn number_to_bytes(mut n: u64) -> ([u8; 20], usize) {
        let mut buffer = [b'0'; 20];
        let mut i = 20;

        if n == 0 {
            return (buffer, 19);
        }

        while n > 0 {
            i -= 1;
            buffer[i] = b'0' + (n % 10) as u8;
            n /= 10;
        }

        (buffer, i)
    }
}
