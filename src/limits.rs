//! Server configuration limits and timeouts
//!
//! # Memory Consumption
//!
//! Each worker owns exactly one request buffer of
//! [`ReqLimits::buffer_size`] bytes, allocated when the worker is spawned and
//! reused for every connection and request it serves. Request bodies are never
//! buffered: they are streamed from the socket straight into the target file.
//!
//! `Total` = [`ServerLimits::workers`] x [`ReqLimits::buffer_size`] + `Queue`
//!
//! where `Queue` is at most [`ServerLimits::queue_capacity`] accepted sockets.
//!
//! # Examples
//!
//! ```no_run
//! use docroot_web::{DocRoot, Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use std::time::Duration;
//!
//! let root = DocRoot::new("/srv/www").unwrap();
//!
//! Server::builder()
//!     .bind(8080)
//!     .root(root)
//!     .server_limits(ServerLimits {
//!         workers: 16,
//!         ..ServerLimits::default()
//!     })
//!     .connection_limits(ConnLimits {
//!         socket_read_timeout: Some(Duration::from_secs(30)),
//!         ..ConnLimits::default()
//!     })
//!     .request_limits(ReqLimits {
//!         allow_http10: true,
//!         ..ReqLimits::default()
//!     })
//!     .build()
//!     .unwrap()
//!     .launch()
//!     .unwrap();
//! ```

use std::{io, net::TcpStream, time::Duration};

/// Controls the acceptor, the work queue and the worker pool.
///
/// # Connection management
/// ```text
///          [------------]
///          [ Tcp accept ]
///          [------------]
///                ||
///                || (TcpStream, SocketAddr)
///                \/
///        /----------------\   Yes   [-------------------------]
///        | Queue is full? | ======> [ Acceptor blocks (no     ]
///        \----------------/         [ further accept)         ]
///                || No              [-------------------------]
///                \/
///        [--------------]
///        [ Add to queue ]
///        [--------------]
///                ||
///                \/
///  [--------------------------]
///  [ First idle worker pops   ]
///  [ it and serves it to the  ]
///  [ end of the connection    ]
///  [--------------------------]
/// ```
///
/// Backpressure is applied by blocking the acceptor, not by rejecting
/// clients: once the queue is full, pending connections wait in the kernel
/// backlog.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of worker threads (default: `8`).
    ///
    /// Exactly this many threads are spawned at launch. Each serves one
    /// connection at a time, so this is also the number of clients that can
    /// be served concurrently.
    pub workers: usize,

    /// Capacity of the queue between the acceptor and the workers (default: `1024`).
    pub queue_capacity: usize,

    /// Listen backlog passed to `listen(2)` (default: `128`).
    pub backlog: i32,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 1024,
            backlog: 128,
        }
    }
}

/// Per-connection socket settings.
#[derive(Debug, Clone, Default)]
pub struct ConnLimits {
    /// Read timeout applied to every accepted socket (default: `None`).
    ///
    /// With `None` a stalled client blocks its worker until it sends more
    /// data or closes the connection.
    pub socket_read_timeout: Option<Duration>,

    /// Write timeout applied to every accepted socket (default: `None`).
    pub socket_write_timeout: Option<Duration>,
}

impl ConnLimits {
    /// Applies the timeouts to a freshly accepted socket.
    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_read_timeout(self.socket_read_timeout)?;
        stream.set_write_timeout(self.socket_write_timeout)?;
        stream.set_nodelay(true)
    }
}

/// Request parsing limits.
///
/// # Memory allocation strategy
///
/// The request buffer holds the request line, the header block and any body
/// bytes that arrived together with them. A header block that does not fit
/// into [`buffer_size`](Self::buffer_size) is answered with
/// `413 Payload Too Large` and the connection is closed.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Size of the per-connection request buffer in bytes (default: `65536`).
    pub buffer_size: usize,

    /// Maximum length of a resolved filesystem path in bytes (default: `4096`).
    pub max_path_len: usize,

    /// Accept `HTTP/1.0` request lines in addition to `HTTP/1.1` (default: `false`).
    ///
    /// When enabled, an `HTTP/1.0` connection closes after each response
    /// unless the client sends `Connection: keep-alive`.
    pub allow_http10: bool,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            max_path_len: 4096,
            allow_http10: false,
        }
    }
}
