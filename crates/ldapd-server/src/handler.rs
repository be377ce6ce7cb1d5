//! The embedder-facing request handler contract.

use async_trait::async_trait;
use ldapd_proto::LdapMessage;
use tokio_util::sync::CancellationToken;

use crate::response::ResponseWriter;

/// Turns one decoded request into zero or more responses.
///
/// Implementations run concurrently, one task per in-flight request on a
/// connection. A handler that streams responses over time should poll
/// [`RequestContext::cancelled`] between emissions: the signal fires when
/// the client abandons the request and when the session closes, and a
/// handler that ignores it delays connection teardown for as long as it
/// keeps running.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Processes `message`, writing any responses through `writer`.
    async fn serve(&self, ctx: &RequestContext, writer: &ResponseWriter, message: &LdapMessage);
}

/// Per-request context handed to a [`Handler`].
///
/// Carries the cancellation signal for this request. Firing is idempotent;
/// an Abandon and session teardown may both signal the same request.
pub struct RequestContext {
    cancel: CancellationToken,
}

impl RequestContext {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Completes once the request has been cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// True once the request has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
