//! docroot_web - Concurrent HTTP/1.1 file server for one directory tree
//!
//! Serves, creates, replaces, appends to and deletes files under a single
//! document root. Every request path is confined to the root, every mutation
//! is serialized per path and whole-file replacement is atomic.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: persistent connections, pipelining, `Expect: 100-continue`
//! - **HTTP/1.0**: optional, see [`ReqLimits::allow_http10`](limits::ReqLimits::allow_http10)
//!
//! | Method   | Effect                                         | Success |
//! |----------|------------------------------------------------|---------|
//! | `GET`    | file contents, `index.html` or a listing       | `200`   |
//! | `PUT`    | atomic replace through a temporary file        | `201`/`204` |
//! | `POST`   | same as `PUT`                                  | `201`/`204` |
//! | `PATCH`  | append, creating the file if needed            | `204`   |
//! | `DELETE` | remove a regular file                          | `204`   |
//!
//! # Architecture
//!
//! - **Acceptor** - the thread calling [`Server::launch`] accepts sockets
//!   and pushes them into a bounded [`WorkQueue`]
//! - **Workers** - a fixed pool, each owning one request buffer and serving
//!   one connection at a time
//! - **Path locks** - a sharded [`PathLocks`] table with one reader/writer
//!   lock per path, alive only while a guard holds it
//! - **Resolver** - [`DocRoot`] maps request paths to canonical paths that
//!   never leave the root, symlinks included
//!
//! # Examples
//!
//! ```no_run
//! use docroot_web::{DocRoot, Server};
//!
//! let server = Server::builder()
//!     .bind(8080)
//!     .root(DocRoot::new("/srv/www").unwrap())
//!     .build()
//!     .unwrap();
//!
//! let handle = server.shutdown_handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(60));
//!     handle.shutdown();
//! });
//!
//! server.launch().unwrap();
//! ```

pub(crate) mod http {
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod storage {
    pub(crate) mod listing;
    pub(crate) mod lock;
    pub mod mime;
    pub mod ops;
    pub(crate) mod resolve;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod queue;
    pub(crate) mod server_impl;
}
pub(crate) mod config;
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    config::Config,
    errors::{ErrorKind, ParseError, ServerError},
    http::{
        request::{parse_request, Parsed, Request},
        types::{Method, StatusCode, Version},
    },
    server::{
        queue::{Closed, WorkQueue},
        server_impl::{Server, ServerBuilder, ShutdownHandle},
    },
    storage::{
        lock::{PathGuard, PathLocks},
        mime,
        ops,
        resolve::DocRoot,
    },
};
