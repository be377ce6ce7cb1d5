//! Bind-only server on 127.0.0.1:10389.
//!
//! Accepts `cn=admin,dc=example` with password `secret` and rejects
//! everything else. Ctrl-C stops the server gracefully.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use ldapd_proto::{
    BindResponse, LdapMessage, ProtocolOp, RESULT_INVALID_CREDENTIALS, RESULT_SUCCESS,
};
use ldapd_server::{Handler, RequestContext, ResponseWriter, RouteMux, Server, ServerConfig};
use tracing::info;

struct BindHandler;

#[async_trait]
impl Handler for BindHandler {
    async fn serve(&self, _ctx: &RequestContext, writer: &ResponseWriter, message: &LdapMessage) {
        let Some(bind) = message.bind_request() else {
            return;
        };
        if bind.name == "cn=admin,dc=example" && bind.simple_password() == Some(b"secret") {
            writer
                .write(ProtocolOp::BindResponse(BindResponse::new(RESULT_SUCCESS)))
                .await;
            return;
        }
        info!(name = %bind.name, "bind rejected");
        writer
            .write(ProtocolOp::BindResponse(
                BindResponse::new(RESULT_INVALID_CREDENTIALS)
                    .with_diagnostic_message("invalid credentials"),
            ))
            .await;
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

    let routes: Arc<dyn Handler> = Arc::new(RouteMux::new().bind(BindHandler));
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
