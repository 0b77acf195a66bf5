use crate::{
    errors::ServerError,
    limits::{ConnLimits, ReqLimits, ServerLimits},
    server::{connection::HttpConnection, queue::WorkQueue},
    storage::{lock::PathLocks, resolve::DocRoot},
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, error, info, warn};

type Job = (TcpStream, SocketAddr);
pub(crate) type AllLimits = (ServerLimits, ConnLimits, ReqLimits);

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// A file server bound to one listener and one document root.
///
/// The thread that calls [`launch`](Self::launch) becomes the acceptor. It
/// pushes every accepted socket into a bounded queue drained by
/// [`ServerLimits::workers`] worker threads.
///
/// # Examples
///
/// ```no_run
/// use docroot_web::{DocRoot, Server};
///
/// Server::builder()
///     .bind(8080)
///     .root(DocRoot::new(".").unwrap())
///     .build()
///     .unwrap()
///     .launch()
///     .unwrap();
/// ```
pub struct Server {
    listener: TcpListener,
    root: Arc<DocRoot>,
    locks: Arc<PathLocks>,
    queue: Arc<WorkQueue<Job>>,
    limits: AllLimits,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            listen: None,
            root: None,
            server_limits: None,
            connection_limits: None,
            request_limits: None,
        }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle that stops [`launch`](Self::launch) from any thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// The lock table shared by every worker.
    pub fn locks(&self) -> &Arc<PathLocks> {
        &self.locks
    }

    /// Spawns the worker pool and runs the accept loop on the calling thread.
    ///
    /// Returns once the [`ShutdownHandle`] is triggered and every worker has
    /// finished the connections already queued.
    ///
    /// # Errors
    ///
    /// [`ServerError::Spawn`] if a worker thread cannot be started. Workers
    /// spawned before the failure are stopped and joined first.
    pub fn launch(self) -> Result<(), ServerError> {
        let Server {
            listener,
            root,
            locks,
            queue,
            limits,
            shutdown,
        } = self;
        let (server_limits, conn_limits, req_limits) = limits;

        let count = server_limits.workers.max(1);
        let mut workers = Vec::with_capacity(count);

        for id in 0..count {
            let conn = HttpConnection::new(Arc::clone(&root), Arc::clone(&locks), req_limits.clone());

            match Self::spawn_worker(id, &queue, &conn_limits, conn) {
                Ok(worker) => workers.push(worker),
                Err(source) => {
                    queue.close();
                    Self::join_workers(workers);
                    return Err(ServerError::Spawn {
                        role: "worker",
                        source,
                    });
                }
            }
        }

        info!(
            addr = ?listener.local_addr().ok(),
            root = %root.path().display(),
            workers = count,
            queue_capacity = server_limits.queue_capacity,
            "listening"
        );

        Self::accept_loop(&listener, &queue, &shutdown);

        queue.close();
        Self::join_workers(workers);

        info!(locked_paths = locks.len(), "server stopped");
        Ok(())
    }

    fn accept_loop(listener: &TcpListener, queue: &WorkQueue<Job>, shutdown: &ShutdownHandle) {
        loop {
            match listener.accept() {
                Ok(job) => {
                    if shutdown.is_shutdown() {
                        break;
                    }
                    if queue.enqueue(job).is_err() {
                        debug!("queue closed, acceptor stopping");
                        break;
                    }
                }
                Err(err) => {
                    if shutdown.is_shutdown() {
                        break;
                    }
                    warn!(cause = %err, "failed to accept");

                    // EMFILE and friends repeat until a descriptor frees up.
                    thread::sleep(ACCEPT_BACKOFF);
                }
            }
        }
    }

    #[inline]
    fn spawn_worker(
        id: usize,
        queue: &Arc<WorkQueue<Job>>,
        conn_limits: &ConnLimits,
        mut conn: HttpConnection,
    ) -> io::Result<JoinHandle<()>> {
        let queue = Arc::clone(queue);
        let conn_limits = conn_limits.clone();

        thread::Builder::new()
            .name(format!("docroot-worker-{id}"))
            .spawn(move || {
                while let Ok((mut stream, peer)) = queue.dequeue() {
                    if let Err(err) = conn_limits.apply(&stream) {
                        warn!(%peer, cause = %err, "failed to configure socket");
                        continue;
                    }

                    if let Err(err) = conn.run(&mut stream, peer) {
                        debug!(%peer, cause = %err, "connection aborted");
                    }
                }

                debug!(worker = id, "worker stopped");
            })
    }

    fn join_workers(workers: Vec<JoinHandle<()>>) {
        for worker in workers {
            let name = worker.thread().name().map(str::to_owned);

            if worker.join().is_err() {
                error!(worker = ?name, "worker panicked");
            }
        }
    }
}

/// Cloneable trigger that stops a running [`Server`].
///
/// Shutdown stops the accept loop and closes the work queue. Connections
/// already queued are still served.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    inner: Arc<ShutdownState>,
}

#[derive(Debug)]
struct ShutdownState {
    stopping: AtomicBool,
    wake: SocketAddr,
    queue: Arc<WorkQueue<Job>>,
}

impl ShutdownHandle {
    /// Requests shutdown. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutdown requested");

        self.inner.queue.close();

        // The acceptor is parked in accept(2) until a client shows up.
        if let Err(err) = TcpStream::connect_timeout(&self.inner.wake, WAKE_TIMEOUT) {
            debug!(addr = %self.inner.wake, cause = %err, "wake-up connection failed");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.stopping.load(Ordering::Acquire)
    }
}

//

enum Listen {
    Port(u16),
    Listener(TcpListener),
}

/// Builder for configuring and creating [`Server`] instances.
///
/// A listener ([`bind`](Self::bind) or [`listener`](Self::listener)) and a
/// [`root`](Self::root) are required; every limit falls back to its default.
pub struct ServerBuilder {
    listen: Option<Listen>,
    root: Option<DocRoot>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
}

impl ServerBuilder {
    /// Listens on `port` on all interfaces.
    ///
    /// A dual-stack IPv6 socket is preferred, with a plain IPv4 socket as the
    /// fallback. The socket is created by [`build`](Self::build) with
    /// `SO_REUSEADDR` and [`ServerLimits::backlog`].
    #[inline(always)]
    pub fn bind(mut self, port: u16) -> Self {
        self.listen = Some(Listen::Port(port));
        self
    }

    /// Uses an already bound listener instead of [`bind`](Self::bind).
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listen = Some(Listen::Listener(listener));
        self
    }

    /// Sets the directory every request path is resolved under.
    #[inline(always)]
    pub fn root(mut self, root: DocRoot) -> Self {
        self.root = Some(root);
        self
    }

    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Incomplete`] if the listener or the root is missing.
    /// - [`ServerError::Bind`] if the port cannot be bound.
    pub fn build(self) -> Result<Server, ServerError> {
        let server_limits = self.server_limits.unwrap_or_default();

        let listener = match self.listen.ok_or(ServerError::Incomplete("listener"))? {
            Listen::Port(port) => bind_dual_stack(port, server_limits.backlog)
                .map_err(|source| ServerError::Bind { port, source })?,
            Listen::Listener(listener) => listener,
        };
        let root = self.root.ok_or(ServerError::Incomplete("root"))?;

        let local = listener.local_addr().map_err(ServerError::Listener)?;
        let queue = Arc::new(WorkQueue::new(server_limits.queue_capacity));

        let shutdown = ShutdownHandle {
            inner: Arc::new(ShutdownState {
                stopping: AtomicBool::new(false),
                wake: wake_addr(local),
                queue: Arc::clone(&queue),
            }),
        };

        Ok(Server {
            listener,
            root: Arc::new(root),
            locks: Arc::new(PathLocks::new()),
            queue,
            limits: (
                server_limits,
                self.connection_limits.unwrap_or_default(),
                self.request_limits.unwrap_or_default(),
            ),
            shutdown,
        })
    }
}

fn bind_dual_stack(port: u16, backlog: i32) -> io::Result<TcpListener> {
    let v6 = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));

    match bind_socket(v6, backlog) {
        Ok(listener) => Ok(listener),
        Err(err) => {
            debug!(cause = %err, "IPv6 listener unavailable, falling back to IPv4");
            bind_socket(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), backlog)
        }
    }
}

fn bind_socket(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Connectable address of a listener bound to `local`.
fn wake_addr(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };

    SocketAddr::new(ip, local.port())
}
