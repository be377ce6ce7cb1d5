//! Per-connection session: dispatch, writer, shutdown watch, teardown.
//!
//! A session owns its socket exclusively. Only the dispatch loop reads it,
//! only the writer task writes it, and only the close protocol closes it.
//!
//! # Teardown ordering
//!
//! Any exit from the dispatch loop (unbind, peer close, read error, forced
//! reader wake) runs the same close sequence:
//!
//! 1. fire the closing signal, parking the shutdown watch
//! 2. wake a reader still blocked on the socket
//! 3. cancel every registered request
//! 4. join the shutdown watch and all request tasks
//! 5. drop the last outbound sender, closing the queue
//! 6. await the writer's drain, then close the socket
//!
//! Steps 3 and 4 guarantee no enqueue happens after step 5, and step 6
//! guarantees every queued response, including a Notice of Disconnection,
//! reaches the wire before the socket closes.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use ldapd_proto::{
    BerCodec, ExtendedResponse, LdapMessage, ProtoError, ProtocolOp,
    NOTICE_OF_DISCONNECTION_OID, RESULT_UNWILLING_TO_PERFORM, STARTTLS_OID,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::config::ServerConfig;
use crate::handler::RequestContext;
use crate::registry::RequestRegistry;
use crate::response::ResponseWriter;
use crate::server::ConnectionHook;
use crate::Handler;

/// Outbound queue depth. Handlers that outrun a slow client block here
/// instead of buffering without bound.
const OUTBOUND_QUEUE_DEPTH: usize = 20;

type Reader = FramedRead<OwnedReadHalf, BerCodec>;
type Writer = FramedWrite<OwnedWriteHalf, BerCodec>;

enum ReadOutcome {
    Message(LdapMessage),
    Eof,
    TimedOut,
    Failed(ProtoError),
}

pub(crate) struct Session {
    ordinal: u64,
    config: ServerConfig,
    hook: Arc<ConnectionHook>,
    /// Server-wide stop signal, observed by the shutdown watch.
    shutdown: CancellationToken,
    /// Fired once teardown begins; parks the shutdown watch.
    closing: CancellationToken,
    /// Unblocks a reader parked on the socket without touching the socket.
    reader_wake: CancellationToken,
    registry: Arc<RequestRegistry>,
    /// Joins the shutdown watch and every request task.
    tasks: TaskTracker,
}

impl Session {
    pub(crate) fn new(
        ordinal: u64,
        config: ServerConfig,
        hook: Arc<ConnectionHook>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ordinal,
            config,
            hook,
            shutdown,
            closing: CancellationToken::new(),
            reader_wake: CancellationToken::new(),
            registry: Arc::new(RequestRegistry::default()),
            tasks: TaskTracker::new(),
        }
    }

    /// Runs the session to completion. Never returns an error; whatever
    /// happens on this connection stays on this connection.
    pub(crate) async fn run(self, stream: TcpStream) {
        let Some(handler) = (self.hook)(&stream) else {
            debug!(conn = self.ordinal, "connection declined by handler hook");
            return;
        };

        let (read_half, write_half) = stream.into_split();
        let codec = BerCodec::with_max_size(self.config.max_message_size);
        let mut frames = FramedRead::new(read_half, codec.clone());
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        let writer = tokio::spawn(write_loop(
            FramedWrite::new(write_half, codec),
            out_rx,
            self.config.write_timeout,
            self.ordinal,
        ));

        self.tasks.spawn(shutdown_watch(
            self.shutdown.clone(),
            self.closing.clone(),
            self.reader_wake.clone(),
            out_tx.clone(),
            self.ordinal,
        ));

        self.dispatch(&mut frames, &handler, &out_tx).await;
        self.close(frames, out_tx, writer).await;
    }

    /// Consumes inbound messages until the peer unbinds, the transport
    /// ends, or the reader is woken for teardown.
    async fn dispatch(
        &self,
        frames: &mut Reader,
        handler: &Arc<dyn Handler>,
        out_tx: &mpsc::Sender<LdapMessage>,
    ) {
        loop {
            let outcome = tokio::select! {
                () = self.reader_wake.cancelled() => {
                    trace!(conn = self.ordinal, "reader woken for teardown");
                    return;
                }
                outcome = read_next(frames, self.config.read_timeout) => outcome,
            };

            let message = match outcome {
                ReadOutcome::Message(message) => message,
                ReadOutcome::Eof => {
                    debug!(conn = self.ordinal, "peer closed the connection");
                    return;
                }
                ReadOutcome::TimedOut => {
                    debug!(conn = self.ordinal, "read deadline exceeded");
                    return;
                }
                ReadOutcome::Failed(error) => {
                    warn!(conn = self.ordinal, %error, "dropping connection");
                    return;
                }
            };

            trace!(conn = self.ordinal, message = %message, "received");

            match &message.op {
                // Handled on this task; an Abandon is never registered and
                // never answered.
                ProtocolOp::AbandonRequest(abandon) => {
                    if self.registry.cancel(abandon.id) {
                        debug!(conn = self.ordinal, target = abandon.id, "request abandoned");
                    } else {
                        debug!(conn = self.ordinal, target = abandon.id, "abandon of unknown request");
                    }
                }
                // Unbind ends the session without a response.
                ProtocolOp::UnbindRequest => {
                    debug!(conn = self.ordinal, "unbind");
                    return;
                }
                // The transport must be quiescent while TLS is negotiated,
                // so StartTLS runs on the dispatch task itself: no other
                // message is read or dispatched until it completes.
                ProtocolOp::ExtendedRequest(extended)
                    if extended.request_name == STARTTLS_OID =>
                {
                    let guard = self.tasks.token();
                    process_request(self.ordinal, handler, &self.registry, out_tx.clone(), &message)
                        .await;
                    drop(guard);
                }
                _ => {
                    let ordinal = self.ordinal;
                    let handler = Arc::clone(handler);
                    let registry = Arc::clone(&self.registry);
                    let out_tx = out_tx.clone();
                    self.tasks.spawn(async move {
                        process_request(ordinal, &handler, &registry, out_tx, &message).await;
                    });
                }
            }
        }
    }

    /// The close protocol. See the module docs for the ordering argument.
    async fn close(self, frames: Reader, out_tx: mpsc::Sender<LdapMessage>, writer: JoinHandle<Writer>) {
        debug!(conn = self.ordinal, "closing");
        self.closing.cancel();
        self.reader_wake.cancel();
        self.registry.cancel_all();

        self.tasks.close();
        self.tasks.wait().await;

        // Last sender; the writer sees the queue close once it has drained.
        drop(out_tx);
        match writer.await {
            Ok(sink) => {
                // Both halves back together; dropping the stream is the one
                // and only socket close.
                if let Ok(stream) = frames.into_inner().reunite(sink.into_inner()) {
                    drop(stream);
                }
            }
            Err(_) => warn!(conn = self.ordinal, "writer task aborted"),
        }
        debug!(conn = self.ordinal, "closed");
    }
}

/// Registers the request, invokes the handler, and deregisters.
async fn process_request(
    conn: u64,
    handler: &Arc<dyn Handler>,
    registry: &Arc<RequestRegistry>,
    out_tx: mpsc::Sender<LdapMessage>,
    message: &LdapMessage,
) {
    let message_id = message.message_id;
    let cancel = registry.register(message_id);
    let ctx = RequestContext::new(cancel);
    let writer = ResponseWriter::new(out_tx, message_id);

    trace!(conn, message_id, op = message.op.name(), "request start");
    handler.serve(&ctx, &writer, message).await;
    registry.deregister(message_id);
    trace!(conn, message_id, "request done");
}

/// Reads the next frame, honoring the optional per-message deadline.
async fn read_next(frames: &mut Reader, read_timeout: Option<Duration>) -> ReadOutcome {
    let next = match read_timeout {
        Some(limit) => match tokio::time::timeout(limit, frames.next()).await {
            Ok(next) => next,
            Err(_) => return ReadOutcome::TimedOut,
        },
        None => frames.next().await,
    };
    match next {
        Some(Ok(message)) => ReadOutcome::Message(message),
        Some(Err(error)) => ReadOutcome::Failed(error),
        None => ReadOutcome::Eof,
    }
}

/// Drains the outbound queue onto the socket, flushing each message, and
/// hands the write half back once the queue closes. It never closes the
/// socket; that is the close protocol's last step.
///
/// An encode or write failure stops the writer; queued and later responses
/// are dropped. The session still tears down normally because senders see
/// the closed queue instead of blocking.
async fn write_loop(
    mut sink: Writer,
    mut out_rx: mpsc::Receiver<LdapMessage>,
    write_timeout: Option<Duration>,
    conn: u64,
) -> Writer {
    while let Some(message) = out_rx.recv().await {
        trace!(conn, message = %message, "writing");
        let result = match write_timeout {
            Some(limit) => match tokio::time::timeout(limit, sink.send(message)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(conn, "write deadline exceeded");
                    break;
                }
            },
            None => sink.send(message).await,
        };
        if let Err(error) = result {
            warn!(conn, %error, "write failed, discarding remaining responses");
            break;
        }
    }
    sink
}

/// Waits for server shutdown or session close, whichever comes first.
///
/// On shutdown it queues the Notice of Disconnection and wakes the reader.
/// Running on the session's task tracker orders the enqueue before the
/// close protocol's queue teardown.
async fn shutdown_watch(
    shutdown: CancellationToken,
    closing: CancellationToken,
    reader_wake: CancellationToken,
    out_tx: mpsc::Sender<LdapMessage>,
    conn: u64,
) {
    tokio::select! {
        () = shutdown.cancelled() => {
            debug!(conn, "queueing disconnection notice");
            let notice = ExtendedResponse::new(RESULT_UNWILLING_TO_PERFORM)
                .with_diagnostic_message("server is about to stop")
                .with_response_name(NOTICE_OF_DISCONNECTION_OID);
            let message = LdapMessage::unsolicited(ProtocolOp::ExtendedResponse(notice));
            if out_tx.send(message).await.is_err() {
                debug!(conn, "outbound queue closed before the notice was queued");
            }
            reader_wake.cancel();
        }
        () = closing.cancelled() => {}
    }
}
