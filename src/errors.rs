use crate::StatusCode;
use std::io;
use thiserror::Error;

/// Failure categories shared by the resolver, the lock table and the
/// filesystem layer.
///
/// Each variant maps onto exactly one HTTP status (see [`ErrorKind::status`]),
/// so the connection layer never inspects error text.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("not found")]
    NotFound,
    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("capacity exhausted: {0}")]
    Exhausted(&'static str),
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
    #[error("i/o error: {0}")]
    Io(io::Error),
    #[error("fatal: {0}")]
    Fatal(&'static str),
}

impl ErrorKind {
    pub(crate) const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::ProtocolViolation(_) => StatusCode::BadRequest,
            Self::NotFound => StatusCode::NotFound,
            Self::PermissionDenied(_) => StatusCode::Forbidden,
            Self::Conflict(_) => StatusCode::Conflict,
            Self::Exhausted(_) => StatusCode::PayloadTooLarge,
            Self::Io(_) | Self::Fatal(_) => StatusCode::InternalServerError,
        }
    }

    /// Framing errors leave unread body bytes on the socket, so the
    /// connection cannot be reused after them.
    pub(crate) const fn closes_connection(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_) | Self::Fatal(_))
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied("access denied by filesystem"),
            io::ErrorKind::IsADirectory => ErrorKind::Conflict("target is a directory"),
            io::ErrorKind::NotADirectory => ErrorKind::Conflict("path component is not a directory"),
            io::ErrorKind::InvalidInput => ErrorKind::InvalidInput("rejected by filesystem"),
            io::ErrorKind::UnexpectedEof => ErrorKind::ProtocolViolation("body shorter than Content-Length"),
            _ => ErrorKind::Io(err),
        }
    }
}

/// Request-line and header-block errors.
///
/// All of them are answered with a static response and close the connection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown request method")]
    UnknownMethod,
    #[error("malformed request line")]
    InvalidRequestLine,
    #[error("unsupported HTTP version")]
    UnsupportedVersion,
    #[error("header line without a colon")]
    InvalidHeader,
    #[error("header block is not valid UTF-8")]
    InvalidEncoding,
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr;)*) => {
        impl ParseError {
            pub(crate) const fn status(&self) -> StatusCode {
                match self { $(
                    Self::$name => $status_code,
                )* }
            }
        }
    };
}

http_errors! {
    UnknownMethod: StatusCode::MethodNotAllowed;
    InvalidRequestLine: StatusCode::BadRequest;
    UnsupportedVersion: StatusCode::BadRequest;
    InvalidHeader: StatusCode::BadRequest;
    InvalidEncoding: StatusCode::BadRequest;
}

/// Responses sent before a connection is dropped for a framing error.
///
/// They carry no body, so they are kept as static bytes. The request line
/// may not have parsed, so they always use `HTTP/1.1`.
macro_rules! closing_responses {
    ($($status:ident => $line:literal;)*) => {
        pub(crate) const fn closing_response(status: StatusCode) -> Option<&'static [u8]> {
            match status { $(
                StatusCode::$status => Some(concat!(
                    "HTTP/1.1 ", $line, "\r\n",
                    "Content-Length: 0\r\n",
                    "Connection: close\r\n\r\n",
                ).as_bytes()),
            )*
                _ => None,
            }
        }
    };
}

closing_responses! {
    BadRequest => "400 Bad Request";
    MethodNotAllowed => "405 Method Not Allowed";
    LengthRequired => "411 Length Required";
    PayloadTooLarge => "413 Payload Too Large";
}

/// Startup and lifecycle failures of the server itself.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener on port {port}: {source}")]
    Bind { port: u16, source: io::Error },
    #[error("listener is unusable: {0}")]
    Listener(#[source] io::Error),
    #[error("invalid document root: {0}")]
    Root(ErrorKind),
    #[error("failed to spawn {role} thread: {source}")]
    Spawn { role: &'static str, source: io::Error },
    #[error("server is missing required component: {0}")]
    Incomplete(&'static str),
}
