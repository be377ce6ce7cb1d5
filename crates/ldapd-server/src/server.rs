//! Listener ownership, the accept loop, and server-wide shutdown.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handler::Handler;
use crate::session::Session;

/// Port used when the listen address does not name one.
const DEFAULT_LDAP_PORT: u16 = 389;

/// Pause after a retryable accept failure.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Produces the [`Handler`] for a newly accepted connection, or `None` to
/// decline it.
pub type ConnectionHook = dyn Fn(&TcpStream) -> Option<Arc<dyn Handler>> + Send + Sync;

/// An LDAP server: listeners, sessions, and the shutdown protocol.
///
/// The server accepts connections and spawns one [`Session`] per socket;
/// request semantics come entirely from the connection hook's [`Handler`].
/// [`Server::shutdown`] stops every accept loop, notifies every live
/// session, and returns once each has finished its close protocol.
pub struct Server {
    config: ServerConfig,
    hook: Option<Arc<ConnectionHook>>,
    /// One-shot stop signal fanned out to accept loops and sessions.
    shutdown: CancellationToken,
    /// Joins every session task.
    sessions: TaskTracker,
    /// Ids of listeners whose accept loops are live.
    listeners: Mutex<HashSet<u64>>,
    next_listener_id: AtomicU64,
    next_ordinal: AtomicU64,
}

impl Server {
    /// Creates an idle server. Install a connection hook before serving.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            hook: None,
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
            listeners: Mutex::new(HashSet::new()),
            next_listener_id: AtomicU64::new(0),
            next_ordinal: AtomicU64::new(0),
        }
    }

    /// Installs the connection-construction callback.
    ///
    /// The hook runs once per accepted socket. Returning `None` declines the
    /// connection, which is closed without a response.
    pub fn handle_connection<F>(&mut self, hook: F)
    where
        F: Fn(&TcpStream) -> Option<Arc<dyn Handler>> + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
    }

    /// Binds `addr` and serves until shutdown or a fatal accept error.
    ///
    /// An empty address means `:389`; `":port"` binds all interfaces.
    ///
    /// # Errors
    ///
    /// [`ServerError::NoHandler`] without a connection hook,
    /// [`ServerError::BadListenAddr`] or [`ServerError::Bind`] before
    /// serving starts, and anything [`Server::serve`] returns.
    pub async fn listen_and_serve(&self, addr: &str) -> Result<(), ServerError> {
        if self.hook.is_none() {
            return Err(ServerError::NoHandler);
        }
        let addr = resolve_listen_addr(addr)?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        info!(%addr, "listening");
        self.serve(listener).await
    }

    /// Runs the accept loop on `listener` until shutdown or a fatal error.
    ///
    /// Retryable accept failures pause briefly and continue. The listener is
    /// registered for the lifetime of the loop and dropped, and thereby
    /// closed, on every exit path.
    ///
    /// # Errors
    ///
    /// [`ServerError::NoHandler`] without a connection hook;
    /// [`ServerError::Accept`] on a non-retryable accept failure. Live
    /// sessions are not torn down by an accept failure.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let Some(hook) = self.hook.clone() else {
            return Err(ServerError::NoHandler);
        };

        let listener_id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.registry().insert(listener_id);
        let result = self.accept_loop(&listener, &hook).await;
        self.registry().remove(&listener_id);
        result
    }

    async fn accept_loop(
        &self,
        listener: &TcpListener,
        hook: &Arc<ConnectionHook>,
    ) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    debug!("accept loop stopping");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let ordinal = self.next_ordinal.fetch_add(1, Ordering::Relaxed) + 1;
                        info!(conn = ordinal, %peer, "connection accepted");
                        let session = Session::new(
                            ordinal,
                            self.config.clone(),
                            Arc::clone(hook),
                            self.shutdown.clone(),
                        );
                        self.sessions.spawn(session.run(stream));
                    }
                    Err(error) if is_transient_accept_error(&error) => {
                        warn!(%error, "transient accept failure, backing off");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                    Err(error) => {
                        error!(%error, "accept failed");
                        return Err(ServerError::Accept(error));
                    }
                }
            }
        }
    }

    /// Stops the server: ends every accept loop, signals every session, and
    /// waits for all of them to finish their close protocol. Each client
    /// sees a Notice of Disconnection before its socket closes.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.shutdown.cancel();
        self.registry().clear();
        self.sessions.close();
        self.sessions.wait().await;
        info!("all sessions closed");
    }

    /// Number of live accept loops.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registry().len()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashSet<u64>> {
        self.listeners.lock().expect("listener registry lock poisoned")
    }
}

/// Resolves a listen address string, defaulting the port to 389.
fn resolve_listen_addr(addr: &str) -> Result<SocketAddr, ServerError> {
    if addr.is_empty() {
        return Ok(SocketAddr::from(([0, 0, 0, 0], DEFAULT_LDAP_PORT)));
    }
    if let Some(port) = addr.strip_prefix(':') {
        let port = port
            .parse()
            .map_err(|_| ServerError::BadListenAddr(addr.to_string()))?;
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    addr.parse()
        .map_err(|_| ServerError::BadListenAddr(addr.to_string()))
}

/// Whether an accept failure is worth retrying.
///
/// Connection-level races (the peer gave up while queued) and descriptor
/// exhaustion recover on their own; anything else ends the accept loop.
fn is_transient_accept_error(error: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    if matches!(
        error.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    ) {
        return true;
    }
    // ENFILE / EMFILE
    matches!(error.raw_os_error(), Some(23 | 24))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_listen_addr_defaults_to_ldap_port() {
        let addr = resolve_listen_addr("").unwrap();
        assert_eq!(addr.port(), 389);
        assert!(addr.ip().is_unspecified());
    }

    #[test]
    fn port_only_listen_addr() {
        let addr = resolve_listen_addr(":10389").unwrap();
        assert_eq!(addr.port(), 10389);
        assert!(addr.ip().is_unspecified());
    }

    #[test]
    fn full_listen_addr() {
        let addr = resolve_listen_addr("127.0.0.1:1389").unwrap();
        assert_eq!(addr.port(), 1389);
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
    }

    #[test]
    fn bad_listen_addrs_rejected() {
        assert!(matches!(
            resolve_listen_addr(":99999"),
            Err(ServerError::BadListenAddr(_))
        ));
        assert!(matches!(
            resolve_listen_addr("nonsense"),
            Err(ServerError::BadListenAddr(_))
        ));
    }

    #[test]
    fn transient_accept_errors_classified() {
        use std::io::{Error, ErrorKind};
        assert!(is_transient_accept_error(&Error::from(
            ErrorKind::ConnectionAborted
        )));
        assert!(is_transient_accept_error(&Error::from_raw_os_error(24)));
        assert!(!is_transient_accept_error(&Error::from(
            ErrorKind::PermissionDenied
        )));
    }

    #[tokio::test]
    async fn serve_without_hook_fails_fast() {
        let server = Server::new(ServerConfig::default());
        assert!(matches!(
            server.listen_and_serve("127.0.0.1:0").await,
            Err(ServerError::NoHandler)
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        assert!(matches!(
            server.serve(listener).await,
            Err(ServerError::NoHandler)
        ));
    }

    #[tokio::test]
    async fn shutdown_with_no_sessions_returns() {
        let server = Server::new(ServerConfig::default());
        server.shutdown().await;
        assert_eq!(server.listener_count(), 0);
    }
}
