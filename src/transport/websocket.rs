use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use percent_encoding::percent_decode_str;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::header::AUTHORIZATION;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{Broker, Delivery, Message, topic};
use crate::session::{Handler, Session};
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::Result;

const AUTHORIZATION_QUERY: &str = "authorization";

pub async fn start_websocket_server(
    addr: &str,
    broker: Arc<Broker>,
    handler: Arc<dyn Handler>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, broker, handler, shutdown).await
}

/// Accepts connections on an already bound listener until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    broker: Arc<Broker>,
    handler: Arc<dyn Handler>,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "WebSocket server listening");

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    continue;
                }
            },
        };

        let broker = broker.clone();
        let handler = handler.clone();
        let shutdown = shutdown.child_token();
        tokio::spawn(async move {
            debug!(%peer, "accepted connection");
            handle_connection(stream, broker, handler, shutdown).await;
        });
    }

    info!("WebSocket server stopped");
    Ok(())
}

/// Credential from the `Authorization` header, or the `authorization` query
/// parameter for browser clients that cannot set headers.
fn request_credential(req: &Request) -> String {
    if let Some(value) = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        return value.to_string();
    }

    req.uri()
        .query()
        .unwrap_or("")
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == AUTHORIZATION_QUERY)
        .map(|(_, value)| {
            percent_decode_str(&value.replace('+', " "))
                .decode_utf8_lossy()
                .into_owned()
        })
        .unwrap_or_default()
}

fn frame(msg: &ServerMessage) -> Option<WsMessage> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(WsMessage::text(json)),
        Err(e) => {
            error!(error = %e, "failed to encode server frame");
            None
        }
    }
}

fn delivery_frame(delivery: Delivery) -> Option<WsMessage> {
    match Message::from_json(&delivery.payload) {
        Ok(msg) => frame(&ServerMessage::delivery(&delivery.subject, msg)),
        Err(e) => {
            warn!(subject = %delivery.subject, error = %e, "undecodable bus message");
            None
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    broker: Arc<Broker>,
    handler: Arc<dyn Handler>,
    shutdown: CancellationToken,
) {
    let mut credential = String::new();
    let capture = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        credential = request_credential(req);
        Ok(resp)
    };
    let ws_stream = match accept_hdr_async(stream, capture).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let session = Session::with_credential(credential).with_cancellation(shutdown.clone());
    if let Err(e) = open_session(handler.as_ref(), &session).await {
        warn!(session = %session.id(), error = %e, "rejected connection");
        reject(ws_stream, &ServerMessage::error(&e)).await;
        return;
    }

    let client_id = session.id().to_string();
    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<WsMessage>();
    let (bus_tx, bus_rx) = mpsc::unbounded_channel::<Delivery>();
    broker.register_client(client_id.clone(), bus_tx);

    let writer = tokio::spawn(write_loop(ws_sender, out_rx, bus_rx));

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = ws_receiver.next() => next,
        };
        let text = match next {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(session = %client_id, error = %e, "read failed");
                break;
            }
        };

        let outcome = match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(request) => process(request, &session, handler.as_ref(), &broker).await,
            Err(e) => {
                warn!(session = %client_id, error = %e, "invalid client frame");
                Err(ServerMessage::error(format!("invalid frame: {e}")))
            }
        };
        if let Err(reply) = outcome {
            if let Some(reply) = frame(&reply) {
                let _ = out_tx.send(reply);
            }
        }
    }

    if let Err(e) = handler.disconnect(&session).await {
        warn!(session = %client_id, error = %e, "disconnect hook failed");
    }
    broker.cleanup_client(&client_id);
    drop(out_tx);
    let _ = writer.await;
    info!(session = %client_id, "connection closed");
}

async fn open_session(handler: &dyn Handler, session: &Session) -> Result<()> {
    handler.auth_connect(session).await?;
    handler.connect(session).await
}

async fn reject(mut ws_stream: WebSocketStream<TcpStream>, reply: &ServerMessage) {
    if let Some(reply) = frame(reply) {
        let _ = ws_stream.send(reply).await;
    }
    let _ = ws_stream.close(None).await;
}

/// Runs one client frame. `Err` carries the error frame to send back.
async fn process(
    request: ClientMessage,
    session: &Session,
    handler: &dyn Handler,
    broker: &Broker,
) -> std::result::Result<(), ServerMessage> {
    match request {
        ClientMessage::Publish { topic, payload } => {
            handler
                .publish(session, &topic, payload.into_bytes())
                .await
                .map_err(ServerMessage::error)?;
        }
        ClientMessage::Subscribe { topic } => {
            let topics = [topic];
            handler
                .auth_subscribe(session, &topics)
                .await
                .map_err(ServerMessage::error)?;
            handler
                .subscribe(session, &topics)
                .await
                .map_err(ServerMessage::error)?;
            let pattern = subject_pattern(broker, &topics[0]).map_err(ServerMessage::error)?;
            broker.subscribe(&pattern, session.id().to_string());
        }
        ClientMessage::Unsubscribe { topic } => {
            let pattern = subject_pattern(broker, &topic).map_err(ServerMessage::error)?;
            handler
                .unsubscribe(session, &[topic])
                .await
                .map_err(ServerMessage::error)?;
            broker.unsubscribe(&pattern, &session.id().to_string());
        }
    }
    Ok(())
}

fn subject_pattern(broker: &Broker, wire_topic: &str) -> Result<String> {
    let (channel, subtopic) = topic::parse_topic(wire_topic)?;
    Ok(broker.subject_for(&channel, &subtopic))
}

async fn write_loop<S>(
    mut ws_sender: S,
    mut out_rx: mpsc::UnboundedReceiver<WsMessage>,
    mut bus_rx: mpsc::UnboundedReceiver<Delivery>,
) where
    S: Sink<WsMessage> + Unpin,
{
    loop {
        let next = tokio::select! {
            Some(reply) = out_rx.recv() => Some(reply),
            Some(delivery) = bus_rx.recv() => delivery_frame(delivery),
            else => break,
        };
        let Some(next) = next else {
            continue;
        };
        if ws_sender.send(next).await.is_err() {
            break;
        }
    }
    let _ = ws_sender.close().await;
}
