//! Streaming search server on 127.0.0.1:10389.
//!
//! Every search produces one entry per 800 ms until the client abandons the
//! request, unbinds, or the server stops. Useful for poking at cancellation
//! with a real LDAP client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use ldapd_proto::{
    BindResponse, LdapMessage, ProtocolOp, SearchResultEntry, RESULT_SUCCESS,
};
use ldapd_server::{Handler, RequestContext, ResponseWriter, RouteMux, Server, ServerConfig};
use tracing::info;

struct BindHandler;

#[async_trait]
impl Handler for BindHandler {
    async fn serve(&self, _ctx: &RequestContext, writer: &ResponseWriter, _message: &LdapMessage) {
        // Any credentials will do.
        writer
            .write(ProtocolOp::BindResponse(BindResponse::new(RESULT_SUCCESS)))
            .await;
    }
}

struct SearchHandler;

#[async_trait]
impl Handler for SearchHandler {
    async fn serve(&self, ctx: &RequestContext, writer: &ResponseWriter, message: &LdapMessage) {
        let Some(search) = message.search_request() else {
            return;
        };
        info!(base = %search.base_object, filter = %search.filter, "search started");

        loop {
            let mut entry =
                SearchResultEntry::new(format!("cn=Demo User,{}", search.base_object));
            entry.add_attribute("cn", ["Demo User"]);
            entry.add_attribute("mail", ["demo@example.com", "demo@example.org"]);
            entry.add_attribute("telephoneNumber", ["0612324567"]);
            writer.write(ProtocolOp::SearchResultEntry(entry)).await;

            tokio::select! {
                () = ctx.cancelled() => {
                    info!(message_id = message.message_id, "leaving search");
                    return;
                }
                () = tokio::time::sleep(Duration::from_millis(800)) => {}
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let routes: Arc<dyn Handler> = Arc::new(RouteMux::new().bind(BindHandler).search(SearchHandler));
    let mut server = Server::new(ServerConfig::default());
    server.handle_connection(move |_socket| Some(Arc::clone(&routes)));
    let server = Arc::new(server);

    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.listen_and_serve("127.0.0.1:10389").await })
    };

    tokio::signal::ctrl_c().await?;
    server.shutdown().await;
    serving.await??;
    Ok(())
}
