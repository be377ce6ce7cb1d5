//! # ldapd-server
//!
//! An embeddable LDAP v3 server framework (RFC 4511). The crate owns the
//! connection lifecycle and hands every decoded request to a [`Handler`] the
//! embedder supplies; it ships no directory, schema, or authentication
//! policy of its own.
//!
//! # Architecture
//!
//! One task per concern, per connection:
//!
//! ```text
//! ┌──────────┐   frames    ┌────────────┐  spawn   ┌───────────────┐
//! │  socket  │────────────▶│  dispatch  │─────────▶│ request tasks │
//! │  (read)  │             │   loop     │          │ (Handler)     │
//! └──────────┘             └────────────┘          └───────┬───────┘
//!                             │ abandon/unbind            │ responses
//!                             ▼                           ▼
//!                        ┌──────────┐   mpsc(20)   ┌────────────┐
//!                        │ registry │              │ writer task│──▶ socket
//!                        └──────────┘              └────────────┘  (write)
//! ```
//!
//! A per-connection shutdown watch enqueues the Notice of Disconnection and
//! wakes the reader when the server stops; the session close protocol then
//! cancels in-flight requests, joins them, drains the writer, and closes the
//! socket, in that order.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ldapd_proto::{BindResponse, ProtocolOp, RESULT_SUCCESS};
//! use ldapd_server::{Handler, RouteMux, Server, ServerConfig};
//!
//! # struct AcceptAll;
//! # #[async_trait::async_trait]
//! # impl Handler for AcceptAll {
//! #     async fn serve(
//! #         &self,
//! #         _ctx: &ldapd_server::RequestContext,
//! #         w: &ldapd_server::ResponseWriter,
//! #         _msg: &ldapd_proto::LdapMessage,
//! #     ) {
//! #         w.write(ProtocolOp::BindResponse(BindResponse::new(RESULT_SUCCESS))).await;
//! #     }
//! # }
//! # async fn run() -> Result<(), ldapd_server::ServerError> {
//! let routes: Arc<dyn Handler> = Arc::new(RouteMux::new().bind(AcceptAll));
//! let mut server = Server::new(ServerConfig::default());
//! server.handle_connection(move |_socket| Some(Arc::clone(&routes)));
//! server.listen_and_serve("127.0.0.1:10389").await
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod config;
mod error;
mod handler;
mod registry;
mod response;
mod route;
mod server;
mod session;

pub use config::ServerConfig;
pub use error::ServerError;
pub use handler::{Handler, RequestContext};
pub use response::ResponseWriter;
pub use route::RouteMux;
pub use server::{ConnectionHook, Server};

/// Re-export of the protocol crate for embedders.
pub use ldapd_proto as proto;
