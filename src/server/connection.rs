use crate::{
    errors::{closing_response, ErrorKind},
    http::{
        request::{parse_request, Parsed, Request},
        response::Response,
    },
    limits::ReqLimits,
    storage::{
        listing, mime,
        lock::PathLocks,
        ops::{self, PutOutcome},
        resolve::DocRoot,
    },
    Method, StatusCode, Version,
};
use std::{
    fs::File,
    io::{self, Read, Write},
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Instant,
};
use tracing::{debug, info, warn};

/// Per-connection protocol driver.
///
/// One instance lives in each worker and is reused for every connection the
/// worker serves. The request buffer is allocated once.
///
/// # States
/// ```text
///   [ ReadingHeaders ] --complete head--> [ Dispatching ] --POST/PUT/PATCH--> [ ReadingBody ]
///          ^                                     |                                   |
///          |                                     \/                                  \/
///          \------- keep-alive, compact ---- [ Responding ] <------------------------/
/// ```
///
/// Bytes after the current request (pipelined requests) stay in the buffer
/// and are moved to its front before the next head is parsed, so they are
/// served without another socket read.
pub(crate) struct HttpConnection {
    buffer: Box<[u8]>,
    len: usize,
    response: Response,

    root: Arc<DocRoot>,
    locks: Arc<PathLocks>,
    req_limits: ReqLimits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    KeepAlive,
    Close,
}

/// What the dispatcher decided to send.
#[derive(Debug)]
enum Reply {
    Status(StatusCode),
    File {
        file: File,
        len: u64,
        mime: &'static str,
    },
    Listing {
        dir: PathBuf,
        display: String,
    },
}

impl HttpConnection {
    pub(crate) fn new(root: Arc<DocRoot>, locks: Arc<PathLocks>, req_limits: ReqLimits) -> Self {
        Self {
            buffer: vec![0; req_limits.buffer_size.max(1)].into_boxed_slice(),
            len: 0,
            response: Response::new(),
            root,
            locks,
            req_limits,
        }
    }

    /// Serves requests from `stream` until either side closes the connection.
    pub(crate) fn run<S: Read + Write>(&mut self, stream: &mut S, peer: SocketAddr) -> io::Result<()> {
        self.len = 0;
        let mut served = 0usize;

        while self.serve_request(stream, peer)? == Next::KeepAlive {
            served += 1;
        }

        debug!(%peer, served = served + 1, "connection finished");
        Ok(())
    }
}

// ReadingHeaders
impl HttpConnection {
    /// Reads until the buffer holds a complete (or malformed) head.
    ///
    /// Returns `false` when the peer closed the connection or the head does
    /// not fit into the buffer (after answering `413`).
    fn fill_head<S: Read + Write>(&mut self, stream: &mut S, peer: SocketAddr) -> io::Result<bool> {
        loop {
            match parse_request(&self.buffer[..self.len], self.req_limits.allow_http10) {
                Ok(Parsed::Partial) => {}
                Ok(Parsed::Complete { .. }) | Err(_) => return Ok(true),
            }

            if self.len == self.buffer.len() {
                warn!(%peer, limit = self.buffer.len(), "request header too large");
                send_closing(stream, &mut self.response, StatusCode::PayloadTooLarge)?;
                return Ok(false);
            }

            let n = read_some(stream, &mut self.buffer[self.len..])?;
            if n == 0 {
                if self.len > 0 {
                    debug!(%peer, pending = self.len, "peer closed mid-request");
                }
                return Ok(false);
            }
            self.len += n;
        }
    }
}

impl HttpConnection {
    fn serve_request<S: Read + Write>(&mut self, stream: &mut S, peer: SocketAddr) -> io::Result<Next> {
        if !self.fill_head(stream, peer)? {
            return Ok(Next::Close);
        }
        let started = Instant::now();

        let Self {
            buffer,
            len,
            response,
            root,
            locks,
            req_limits,
        } = self;

        let (request, header_len) = match parse_request(&buffer[..*len], req_limits.allow_http10) {
            Ok(Parsed::Complete { request, header_len }) => (request, header_len),
            Ok(Parsed::Partial) => return Ok(Next::Close),
            Err(err) => {
                warn!(%peer, cause = %err, "malformed request");
                send_closing(stream, response, err.status())?;
                return Ok(Next::Close);
            }
        };

        // Dispatching
        let prefill = &buffer[header_len..*len];
        let mut keep_alive = request.keep_alive();
        let mut consumed = header_len;

        let reply = match body_length(&request, prefill.len()) {
            Err(status) => {
                keep_alive = false;
                Reply::Status(status)
            }
            Ok(body_len) if !request.method().has_body() => {
                // A body on GET/DELETE is never read, so the framing is lost.
                keep_alive &= body_len == 0;
                dispatch(root, locks, req_limits, &request, &mut io::empty())
                    .unwrap_or_else(|err| error_reply(err, &mut keep_alive, peer))
            }
            Ok(body_len) => {
                // ReadingBody
                let expect_continue =
                    request.expects_continue() && request.version() == Version::Http11;
                let mut body = Body::new(prefill, stream, body_len, expect_continue);

                let reply = dispatch(root, locks, req_limits, &request, &mut body)
                    .unwrap_or_else(|err| error_reply(err, &mut keep_alive, peer));

                // Unread body bytes still on the socket would be parsed as
                // the next request.
                if body.owed_by_socket() > 0 {
                    keep_alive = false;
                }
                consumed = *len;
                reply
            }
        };

        // Responding
        response.reset(request.version(), keep_alive);
        let sent = write_reply(stream, response, reply)?;

        info!(
            target: "access",
            %peer,
            method = request.method().as_str(),
            path = request.target(),
            status = response.status_code().as_u16(),
            bytes = sent,
            duration_ms = started.elapsed().as_millis() as u64,
            user_agent = request.user_agent().unwrap_or("-"),
        );

        let keep_alive = response.keep_alive();

        // Compaction
        buffer.copy_within(consumed..*len, 0);
        *len -= consumed;

        Ok(match keep_alive {
            true => Next::KeepAlive,
            false => Next::Close,
        })
    }
}

/// Body length to read for `request`, or the status that rejects it.
fn body_length(request: &Request<'_>, prefill: usize) -> Result<u64, StatusCode> {
    if !request.method().has_body() {
        return Ok(request.content_length().unwrap_or(0));
    }

    let len = request.content_length().ok_or(StatusCode::LengthRequired)?;
    if (prefill as u64) > len {
        return Err(StatusCode::BadRequest);
    }

    Ok(len)
}

fn error_reply(err: ErrorKind, keep_alive: &mut bool, peer: SocketAddr) -> Reply {
    match &err {
        ErrorKind::Io(_) | ErrorKind::Fatal(_) => warn!(%peer, cause = %err, "request failed"),
        _ => debug!(%peer, cause = %err, "request rejected"),
    }

    if err.closes_connection() {
        *keep_alive = false;
    }
    Reply::Status(err.status())
}

fn dispatch<R: Read>(
    root: &DocRoot,
    locks: &PathLocks,
    limits: &ReqLimits,
    request: &Request<'_>,
    body: &mut R,
) -> Result<Reply, ErrorKind> {
    let display = request.decoded_path()?;
    let path = root.resolve(&display, limits.max_path_len)?;
    let body_len = request.content_length().unwrap_or(0);

    match request.method() {
        Method::Get => {
            if !ops::is_dir(&path)? {
                return open_file(locks, path);
            }

            match ops::index_file(&path) {
                Some(index) => open_file(locks, index),
                None => Ok(Reply::Listing {
                    dir: path,
                    display: display.into_owned(),
                }),
            }
        }
        Method::Put | Method::Post => match ops::put_atomic(locks, &path, body, body_len)? {
            PutOutcome::Created => Ok(Reply::Status(StatusCode::Created)),
            PutOutcome::Replaced => Ok(Reply::Status(StatusCode::NoContent)),
        },
        Method::Patch => {
            ops::append(locks, &path, body, body_len)?;
            Ok(Reply::Status(StatusCode::NoContent))
        }
        Method::Delete => {
            ops::delete(locks, &path)?;
            Ok(Reply::Status(StatusCode::NoContent))
        }
    }
}

#[inline]
fn open_file(locks: &PathLocks, path: PathBuf) -> Result<Reply, ErrorKind> {
    let opened = ops::open_read(locks, &path)?;

    Ok(Reply::File {
        file: opened.file,
        len: opened.len,
        mime: mime::from_path(&path),
    })
}

/// Writes the reply and returns the number of bytes sent.
fn write_reply<S: Write>(stream: &mut S, response: &mut Response, reply: Reply) -> io::Result<u64> {
    match reply {
        Reply::Status(status) => {
            response.simple(status);
            stream.write_all(response.buffer())?;
            stream.flush()?;
            Ok(response.buffer().len() as u64)
        }
        Reply::File { file, len, mime } => {
            response
                .status(StatusCode::Ok)
                .header("Content-Type", mime)
                .sized(len);
            stream.write_all(response.buffer())?;

            let copied = io::copy(&mut file.take(len), stream)?;
            stream.flush()?;
            if copied != len {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "file shrank while being sent",
                ));
            }
            Ok(response.buffer().len() as u64 + copied)
        }
        Reply::Listing { dir, display } => {
            response
                .status(StatusCode::Ok)
                .header("Content-Type", "text/html; charset=utf-8")
                .unsized_close();
            stream.write_all(response.buffer())?;

            let written = listing::write_listing(stream, &dir, &display)?;
            Ok(response.buffer().len() as u64 + written)
        }
    }
}

/// Final response for a request whose framing cannot be trusted. The
/// connection is closed afterwards.
fn send_closing<S: Write>(stream: &mut S, response: &mut Response, status: StatusCode) -> io::Result<()> {
    match closing_response(status) {
        Some(bytes) => stream.write_all(bytes)?,
        None => {
            response.reset(Version::Http11, false);
            response.simple(status);
            stream.write_all(response.buffer())?;
        }
    }
    stream.flush()
}

#[inline]
fn read_some<S: Read>(stream: &mut S, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(buf) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// Request body: the prefill bytes first, then the socket, never more than
/// the declared length.
struct Body<'a, S> {
    prefill: &'a [u8],
    stream: &'a mut S,
    remaining: u64,
    send_continue: bool,
}

impl<'a, S: Read + Write> Body<'a, S> {
    fn new(prefill: &'a [u8], stream: &'a mut S, len: u64, expect_continue: bool) -> Self {
        // `prefill` is never longer than `len` here.
        let send_continue = expect_continue && (prefill.len() as u64) < len;

        Self {
            prefill,
            stream,
            remaining: len,
            send_continue,
        }
    }

    /// Body bytes that have not arrived in the buffer and were not read from
    /// the socket either.
    fn owed_by_socket(&self) -> u64 {
        self.remaining - self.prefill.len() as u64
    }
}

impl<S: Read + Write> Read for Body<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        if !self.prefill.is_empty() {
            let n = buf.len().min(self.prefill.len());
            buf[..n].copy_from_slice(&self.prefill[..n]);
            self.prefill = &self.prefill[n..];
            self.remaining -= n as u64;
            return Ok(n);
        }

        if self.send_continue {
            self.send_continue = false;
            self.stream.write_all(Response::continue_line())?;
            self.stream.flush()?;
            debug!("sent 100 Continue");
        }

        let max = buf.len().min(self.remaining.try_into().unwrap_or(usize::MAX));
        let n = read_some(self.stream, &mut buf[..max])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}
