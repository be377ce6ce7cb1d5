//! Per-operation request routing.

use std::sync::Arc;

use async_trait::async_trait;
use ldapd_proto::{
    BindResponse, ExtendedResponse, LdapMessage, LdapResult, ProtocolOp,
    RESULT_UNWILLING_TO_PERFORM,
};

use crate::handler::{Handler, RequestContext};
use crate::response::ResponseWriter;

/// A [`Handler`] that routes each request kind to its own handler.
///
/// Unrouted requests receive the matching response type with result code
/// `unwillingToPerform`. Abandon and Unbind never reach a handler; the
/// session consumes them itself.
///
/// ```no_run
/// # use ldapd_server::{Handler, RouteMux};
/// # fn routes(bind: impl Handler + 'static, search: impl Handler + 'static) -> RouteMux {
/// RouteMux::new().bind(bind).search(search)
/// # }
/// ```
#[derive(Default)]
pub struct RouteMux {
    bind: Option<Arc<dyn Handler>>,
    search: Option<Arc<dyn Handler>>,
    add: Option<Arc<dyn Handler>>,
    modify: Option<Arc<dyn Handler>>,
    delete: Option<Arc<dyn Handler>>,
    modify_dn: Option<Arc<dyn Handler>>,
    compare: Option<Arc<dyn Handler>>,
    extended: Option<Arc<dyn Handler>>,
}

impl RouteMux {
    /// An empty mux; every request is answered as unsupported.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes bind requests to `handler`.
    #[must_use]
    pub fn bind(mut self, handler: impl Handler + 'static) -> Self {
        self.bind = Some(Arc::new(handler));
        self
    }

    /// Routes search requests to `handler`.
    #[must_use]
    pub fn search(mut self, handler: impl Handler + 'static) -> Self {
        self.search = Some(Arc::new(handler));
        self
    }

    /// Routes add requests to `handler`.
    #[must_use]
    pub fn add(mut self, handler: impl Handler + 'static) -> Self {
        self.add = Some(Arc::new(handler));
        self
    }

    /// Routes modify requests to `handler`.
    #[must_use]
    pub fn modify(mut self, handler: impl Handler + 'static) -> Self {
        self.modify = Some(Arc::new(handler));
        self
    }

    /// Routes delete requests to `handler`.
    #[must_use]
    pub fn delete(mut self, handler: impl Handler + 'static) -> Self {
        self.delete = Some(Arc::new(handler));
        self
    }

    /// Routes modify DN requests to `handler`.
    #[must_use]
    pub fn modify_dn(mut self, handler: impl Handler + 'static) -> Self {
        self.modify_dn = Some(Arc::new(handler));
        self
    }

    /// Routes compare requests to `handler`.
    #[must_use]
    pub fn compare(mut self, handler: impl Handler + 'static) -> Self {
        self.compare = Some(Arc::new(handler));
        self
    }

    /// Routes extended requests, StartTLS included, to `handler`.
    #[must_use]
    pub fn extended(mut self, handler: impl Handler + 'static) -> Self {
        self.extended = Some(Arc::new(handler));
        self
    }

    fn route_for(&self, op: &ProtocolOp) -> Option<&Arc<dyn Handler>> {
        match op {
            ProtocolOp::BindRequest(_) => self.bind.as_ref(),
            ProtocolOp::SearchRequest(_) => self.search.as_ref(),
            ProtocolOp::AddRequest(_) => self.add.as_ref(),
            ProtocolOp::ModifyRequest(_) => self.modify.as_ref(),
            ProtocolOp::DelRequest(_) => self.delete.as_ref(),
            ProtocolOp::ModifyDnRequest(_) => self.modify_dn.as_ref(),
            ProtocolOp::CompareRequest(_) => self.compare.as_ref(),
            ProtocolOp::ExtendedRequest(_) => self.extended.as_ref(),
            _ => None,
        }
    }
}

#[async_trait]
impl Handler for RouteMux {
    async fn serve(&self, ctx: &RequestContext, writer: &ResponseWriter, message: &LdapMessage) {
        match self.route_for(&message.op) {
            Some(handler) => handler.serve(ctx, writer, message).await,
            None => not_supported(writer, &message.op).await,
        }
    }
}

/// Answers an unrouted request with the response type it expects.
async fn not_supported(writer: &ResponseWriter, op: &ProtocolOp) {
    let result =
        LdapResult::new(RESULT_UNWILLING_TO_PERFORM).with_diagnostic_message("operation not supported");
    let response = match op {
        ProtocolOp::BindRequest(_) => Some(ProtocolOp::BindResponse(BindResponse {
            result,
            server_sasl_creds: None,
        })),
        ProtocolOp::SearchRequest(_) => Some(ProtocolOp::SearchResultDone(result)),
        ProtocolOp::AddRequest(_) => Some(ProtocolOp::AddResponse(result)),
        ProtocolOp::ModifyRequest(_) => Some(ProtocolOp::ModifyResponse(result)),
        ProtocolOp::DelRequest(_) => Some(ProtocolOp::DelResponse(result)),
        ProtocolOp::ModifyDnRequest(_) => Some(ProtocolOp::ModifyDnResponse(result)),
        ProtocolOp::CompareRequest(_) => Some(ProtocolOp::CompareResponse(result)),
        ProtocolOp::ExtendedRequest(_) => Some(ProtocolOp::ExtendedResponse(ExtendedResponse {
            result,
            response_name: None,
            response_value: None,
        })),
        // Everything else takes no response.
        _ => None,
    };
    if let Some(op) = response {
        writer.write(op).await;
    }
}
