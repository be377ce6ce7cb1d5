//! End-to-end session lifecycle tests over real sockets.
//!
//! Each test starts a server on an ephemeral port and drives it with a raw
//! framed client speaking the wire protocol directly.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use ldapd_proto::{
    AbandonRequest, BerCodec, BindRequest, BindResponse, ExtendedRequest, ExtendedResponse,
    Filter, LdapMessage, ProtocolOp, SearchRequest, SearchResultEntry, SearchScope,
    NOTICE_OF_DISCONNECTION_OID, RESULT_SUCCESS, RESULT_UNWILLING_TO_PERFORM, STARTTLS_OID,
};
use ldapd_server::{
    Handler, RequestContext, ResponseWriter, RouteMux, Server, ServerConfig, ServerError,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

type Client = Framed<TcpStream, BerCodec>;

async fn start_server(
    handler: Arc<dyn Handler>,
) -> (Arc<Server>, SocketAddr, JoinHandle<Result<(), ServerError>>) {
    let mut server = Server::new(ServerConfig::default());
    server.handle_connection(move |_socket| Some(Arc::clone(&handler)));
    let server = Arc::new(server);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(listener).await })
    };
    (server, addr, serving)
}

async fn connect(addr: SocketAddr) -> Client {
    Framed::new(TcpStream::connect(addr).await.unwrap(), BerCodec::new())
}

/// Receives one message, failing the test instead of hanging.
async fn recv(client: &mut Client) -> Option<LdapMessage> {
    tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("no message within 5s")
        .map(|r| r.expect("decode error"))
}

fn bind_msg(id: i32) -> LdapMessage {
    LdapMessage::new(
        id,
        ProtocolOp::BindRequest(BindRequest::simple("u", &b"p"[..])),
    )
}

fn search_msg(id: i32) -> LdapMessage {
    LdapMessage::new(
        id,
        ProtocolOp::SearchRequest(SearchRequest {
            base_object: "dc=example".into(),
            scope: SearchScope::WholeSubtree,
            deref_aliases: 0,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter: Filter::present("objectClass"),
            attributes: vec![],
        }),
    )
}

struct AcceptBind;

#[async_trait]
impl Handler for AcceptBind {
    async fn serve(&self, _ctx: &RequestContext, writer: &ResponseWriter, _message: &LdapMessage) {
        writer
            .write(ProtocolOp::BindResponse(BindResponse::new(RESULT_SUCCESS)))
            .await;
    }
}

/// Streams one entry per 800 ms until cancelled; never sends a done.
struct StreamingSearch {
    returned_after_cancel: Arc<AtomicBool>,
}

#[async_trait]
impl Handler for StreamingSearch {
    async fn serve(&self, ctx: &RequestContext, writer: &ResponseWriter, _message: &LdapMessage) {
        loop {
            let mut entry = SearchResultEntry::new("cn=someone,dc=example");
            entry.add_attribute("cn", ["someone"]);
            writer.write(ProtocolOp::SearchResultEntry(entry)).await;
            tokio::select! {
                () = ctx.cancelled() => {
                    self.returned_after_cancel.store(true, Ordering::SeqCst);
                    return;
                }
                () = tokio::time::sleep(Duration::from_millis(800)) => {}
            }
        }
    }
}

#[tokio::test]
async fn clean_bind_then_unbind() {
    let (server, addr, serving) = start_server(Arc::new(RouteMux::new().bind(AcceptBind))).await;
    let mut client = connect(addr).await;

    client.send(bind_msg(1)).await.unwrap();
    let response = recv(&mut client).await.expect("bind response");
    assert_eq!(response.message_id, 1);
    match response.op {
        ProtocolOp::BindResponse(r) => assert_eq!(r.result.result_code, RESULT_SUCCESS),
        other => panic!("unexpected {}", other.name()),
    }

    client.send(LdapMessage::new(2, ProtocolOp::UnbindRequest)).await.unwrap();
    // No response to unbind; the very next event is end of stream.
    assert!(recv(&mut client).await.is_none());

    server.shutdown().await;
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn abandon_stops_a_streaming_search() {
    let returned_after_cancel = Arc::new(AtomicBool::new(false));
    let handler = RouteMux::new().search(StreamingSearch {
        returned_after_cancel: Arc::clone(&returned_after_cancel),
    });
    let (server, addr, serving) = start_server(Arc::new(handler)).await;
    let mut client = connect(addr).await;

    client.send(search_msg(10)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    client
        .send(LdapMessage::new(
            11,
            ProtocolOp::AbandonRequest(AbandonRequest { id: 10 }),
        ))
        .await
        .unwrap();

    // The entry already in flight may arrive; nothing else must, and in
    // particular no SearchResultDone for the abandoned id.
    let mut entries = 0;
    loop {
        match tokio::time::timeout(Duration::from_millis(1200), client.next()).await {
            Err(_) => break,
            Ok(Some(Ok(message))) => match message.op {
                ProtocolOp::SearchResultEntry(_) => entries += 1,
                other => panic!("unexpected {} after abandon", other.name()),
            },
            Ok(Some(Err(e))) => panic!("decode error: {e}"),
            Ok(None) => panic!("unexpected eof"),
        }
    }
    assert!(entries <= 1, "saw {entries} entries after abandon");
    assert!(returned_after_cancel.load(Ordering::SeqCst));

    server.shutdown().await;
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn starttls_is_processed_with_the_connection_quiesced() {
    struct Extended;

    #[async_trait]
    impl Handler for Extended {
        async fn serve(
            &self,
            _ctx: &RequestContext,
            writer: &ResponseWriter,
            message: &LdapMessage,
        ) {
            let Some(extended) = message.extended_request() else {
                return;
            };
            if extended.request_name == STARTTLS_OID {
                // A TLS handshake would run here, with the session reading
                // nothing else meanwhile.
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            writer
                .write(ProtocolOp::ExtendedResponse(ExtendedResponse::new(
                    RESULT_SUCCESS,
                )))
                .await;
        }
    }

    let (server, addr, serving) =
        start_server(Arc::new(RouteMux::new().extended(Extended))).await;
    let mut client = connect(addr).await;

    client
        .send(LdapMessage::new(
            1,
            ProtocolOp::ExtendedRequest(ExtendedRequest::new(STARTTLS_OID)),
        ))
        .await
        .unwrap();
    client
        .send(LdapMessage::new(
            2,
            ProtocolOp::ExtendedRequest(ExtendedRequest::new("1.3.6.1.4.1.4203.1.11.3")),
        ))
        .await
        .unwrap();

    // Request 2 answers instantly once dispatched; seeing 1 first proves it
    // was not dispatched until 1 finished.
    let first = recv(&mut client).await.expect("first response");
    let second = recv(&mut client).await.expect("second response");
    assert_eq!(first.message_id, 1);
    assert_eq!(second.message_id, 2);

    server.shutdown().await;
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_notifies_and_waits_for_inflight_handlers() {
    let returned_after_cancel = Arc::new(AtomicBool::new(false));
    let handler = RouteMux::new().search(StreamingSearch {
        returned_after_cancel: Arc::clone(&returned_after_cancel),
    });
    let (server, addr, serving) = start_server(Arc::new(handler)).await;
    let mut client = connect(addr).await;

    client.send(search_msg(5)).await.unwrap();
    let entry = recv(&mut client).await.expect("first entry");
    assert_eq!(entry.message_id, 5);

    let shutdown = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.shutdown().await })
    };

    // The client observes the Notice of Disconnection, then end of stream.
    let notice = recv(&mut client).await.expect("notice of disconnection");
    assert_eq!(notice.message_id, 0);
    match notice.op {
        ProtocolOp::ExtendedResponse(r) => {
            assert_eq!(r.result.result_code, RESULT_UNWILLING_TO_PERFORM);
            assert_eq!(
                r.response_name.as_deref(),
                Some(NOTICE_OF_DISCONNECTION_OID)
            );
            assert_eq!(r.result.diagnostic_message, "server is about to stop");
        }
        other => panic!("unexpected {}", other.name()),
    }
    assert!(recv(&mut client).await.is_none());

    shutdown.await.unwrap();
    // shutdown() returning implies the handler observed cancellation and
    // finished; the flag double-checks it did so via the context.
    assert!(returned_after_cancel.load(Ordering::SeqCst));
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn declined_connection_closes_without_a_response() {
    let mut server = Server::new(ServerConfig::default());
    server.handle_connection(|_socket| None);
    let server = Arc::new(server);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(listener).await })
    };

    // The session closes the socket without ever reading a request.
    let mut client = connect(addr).await;
    assert!(recv(&mut client).await.is_none());

    server.shutdown().await;
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn concurrent_requests_get_their_own_message_ids() {
    // Two overlapping searches answered out of order still carry the right
    // ids, stamped by each request's response writer.
    struct DelayedByBase;

    #[async_trait]
    impl Handler for DelayedByBase {
        async fn serve(
            &self,
            _ctx: &RequestContext,
            writer: &ResponseWriter,
            message: &LdapMessage,
        ) {
            let Some(search) = message.search_request() else {
                return;
            };
            if search.base_object == "dc=slow" {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            writer
                .write(ProtocolOp::SearchResultDone(
                    ldapd_proto::LdapResult::new(RESULT_SUCCESS),
                ))
                .await;
        }
    }

    let (server, addr, serving) =
        start_server(Arc::new(RouteMux::new().search(DelayedByBase))).await;
    let mut client = connect(addr).await;

    let slow = LdapMessage::new(
        20,
        ProtocolOp::SearchRequest(SearchRequest {
            base_object: "dc=slow".into(),
            scope: SearchScope::BaseObject,
            deref_aliases: 0,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter: Filter::present("objectClass"),
            attributes: vec![],
        }),
    );
    client.send(slow).await.unwrap();
    client.send(search_msg(21)).await.unwrap();

    let first = recv(&mut client).await.expect("fast response");
    let second = recv(&mut client).await.expect("slow response");
    assert_eq!(first.message_id, 21);
    assert_eq!(second.message_id, 20);

    server.shutdown().await;
    serving.await.unwrap().unwrap();
}
