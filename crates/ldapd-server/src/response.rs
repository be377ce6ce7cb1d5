//! Outbound response plumbing.

use ldapd_proto::{LdapMessage, ProtocolOp};
use tokio::sync::mpsc;
use tracing::debug;

/// Capability for emitting responses to one request.
///
/// The writer knows its request's message id and stamps it onto every
/// protocol op before queueing the message for the connection's writer
/// task. It is cheap to use but not to hold: once the handler returns, the
/// session may close the outbound queue, after which writes are silently
/// dropped. Correctly written handlers observe cancellation and return
/// before that point.
pub struct ResponseWriter {
    queue: mpsc::Sender<LdapMessage>,
    message_id: i32,
}

impl ResponseWriter {
    pub(crate) fn new(queue: mpsc::Sender<LdapMessage>, message_id: i32) -> Self {
        Self { queue, message_id }
    }

    /// Message id responses are stamped with.
    #[must_use]
    pub fn message_id(&self) -> i32 {
        self.message_id
    }

    /// Queues `op` as a response to this request.
    ///
    /// Applies backpressure when the client is slow to read. A write after
    /// session close is dropped.
    pub async fn write(&self, op: ProtocolOp) {
        let message = LdapMessage::new(self.message_id, op);
        if self.queue.send(message).await.is_err() {
            debug!(message_id = self.message_id, "response dropped, session closed");
        }
    }
}
