//! Subscriber websocket gateway.
//!
//! On the primary the socket is terminated here: the client registers by
//! sending `subscribe\n` and then receives items as JSON text frames. Any
//! other node dials the primary's `/subscribe` and relays frames verbatim
//! in both directions until either leg fails or closes.
//!
//! Every leg is pinged on an interval; a leg that sends nothing (pongs
//! included) for the idle timeout is closed, so a vanished peer cannot
//! strand a subscriber.
//!
//! ```text
//! Accepting ──┬─▶ LocalMode ──┐
//!             └─▶ ProxyMode ──┴─▶ Closed
//! ```

use axum::{
    extract::{
        ConnectInfo, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{Sink, SinkExt, StreamExt};
use relayq_common::constants::{
    paths,
    protocol::{INVALID_MESSAGE, SUBSCRIBE_FRAME},
};
use relayq_common::{Item, QueueError};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{
    self,
    protocol::{CloseFrame as UpstreamCloseFrame, frame::coding::CloseCode},
    Message as UpstreamMessage,
};

use crate::state::AppState;

/// Why a session ended
#[derive(Debug, Error)]
enum SessionError {
    #[error("client socket: {0}")]
    Client(#[from] axum::Error),

    #[error("primary socket: {0}")]
    Upstream(#[from] tungstenite::Error),

    #[error("write timed out")]
    Timeout,

    #[error("{0} silent past the idle timeout")]
    Idle(&'static str),
}

/// Upgrade and hand the socket to the mode matching this node's role
pub async fn subscribe(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        if state.is_primary() {
            local_session(socket, addr.to_string(), state).await;
        } else {
            proxy_session(socket, addr, state).await;
        }
    })
}

/// Ticks every `period`, first tick one period from now
fn keepalive(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Terminate a subscriber on the primary
async fn local_session(mut socket: WebSocket, identity: String, state: AppState) {
    let settings = &state.config.subscription;
    let write_timeout = settings.write_timeout();
    let idle_timeout = settings.idle_timeout();
    let (tx, mut rx) = mpsc::unbounded_channel::<Item>();

    tracing::debug!(client = %identity, "Subscriber session opened");

    let result: Result<(), SessionError> = async {
        let mut pings = keepalive(settings.ping_interval());
        let mut last_heard = Instant::now();

        loop {
            tokio::select! {
                frame = socket.recv() => {
                    last_heard = Instant::now();
                    let reply = match frame {
                        None | Some(Ok(Message::Close(_))) => return Ok(()),
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                        Some(Ok(message)) if is_subscribe(&message) => {
                            match state.queue.subscribe(&identity, tx.clone()).await {
                                Ok(ack) => ack.to_string(),
                                Err(e) => e.to_string(),
                            }
                        }
                        Some(Ok(_)) => INVALID_MESSAGE.to_string(),
                    };
                    send_timed(&mut socket, Message::Text(reply.into()), write_timeout).await?;
                }
                Some(item) = rx.recv() => {
                    let body = serde_json::to_string(&item).unwrap_or_default();
                    send_timed(&mut socket, Message::Text(body.into()), write_timeout).await?;
                }
                _ = pings.tick() => {
                    if last_heard.elapsed() > idle_timeout {
                        return Err(SessionError::Idle("client"));
                    }
                    send_timed(&mut socket, Message::Ping(Default::default()), write_timeout).await?;
                }
            }
        }
    }
    .await;

    if let Err(e) = result {
        tracing::debug!(client = %identity, error = %e, "Subscriber session failed");
    }
    state.queue.unsubscribe(&identity).await;
    tracing::debug!(client = %identity, "Subscriber session closed");
}

fn is_subscribe(message: &Message) -> bool {
    match message {
        Message::Text(text) => text.as_str() == SUBSCRIBE_FRAME,
        Message::Binary(bytes) => bytes.as_ref() == SUBSCRIBE_FRAME.as_bytes(),
        _ => false,
    }
}

/// Whether dialing `primary` would reach this node instead of the primary
fn loops_back(primary: &str, local: &str) -> bool {
    primary == local
        || primary
            .parse::<SocketAddr>()
            .is_ok_and(|addr| addr.ip().is_unspecified())
}

/// Relay a subscriber to the primary
async fn proxy_session(mut client: WebSocket, addr: SocketAddr, state: AppState) {
    let settings = &state.config.subscription;
    let write_timeout = settings.write_timeout();
    let idle_timeout = settings.idle_timeout();

    let primary = match state.membership.locate_primary().await {
        Ok(primary) if loops_back(&primary, &state.membership.local().metadata) => {
            tracing::warn!(client = %addr, primary = %primary, "Primary address loops back to this node");
            Err(QueueError::PrimaryNotFound)
        }
        other => other,
    };
    let primary = match primary {
        Ok(primary) => primary,
        Err(e) => {
            tracing::warn!(client = %addr, error = %e, "Cannot proxy subscriber");
            let _ = send_timed(&mut client, Message::Text(e.to_string().into()), write_timeout).await;
            return;
        }
    };

    let url = format!("ws://{primary}{}", paths::SUBSCRIBE);
    let upstream = match tokio::time::timeout(
        settings.connect_timeout(),
        tokio_tungstenite::connect_async(url.as_str()),
    )
    .await
    {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => {
            tracing::warn!(client = %addr, primary = %primary, error = %e, "Failed to reach primary");
            let _ = send_timed(&mut client, Message::Close(None), write_timeout).await;
            return;
        }
        Err(_) => {
            tracing::warn!(client = %addr, primary = %primary, "Timed out reaching primary");
            let _ = send_timed(&mut client, Message::Close(None), write_timeout).await;
            return;
        }
    };

    tracing::debug!(client = %addr, primary = %primary, "Proxy session opened");

    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    // Either leg ending (stream end, error, idle) ends both
    let result: Result<(), SessionError> = async {
        let mut pings = keepalive(settings.ping_interval());
        let mut client_heard = Instant::now();
        let mut primary_heard = Instant::now();

        loop {
            tokio::select! {
                frame = client_rx.next() => {
                    let Some(frame) = frame else { return Ok(()) };
                    client_heard = Instant::now();
                    if let Some(frame) = to_upstream(frame?) {
                        send_timed(&mut upstream_tx, frame, write_timeout).await?;
                    }
                }
                frame = upstream_rx.next() => {
                    let Some(frame) = frame else { return Ok(()) };
                    primary_heard = Instant::now();
                    if let Some(frame) = to_client_frame(frame?) {
                        send_timed(&mut client_tx, frame, write_timeout).await?;
                    }
                }
                _ = pings.tick() => {
                    if client_heard.elapsed() > idle_timeout {
                        return Err(SessionError::Idle("client"));
                    }
                    if primary_heard.elapsed() > idle_timeout {
                        return Err(SessionError::Idle("primary"));
                    }
                    send_timed(&mut client_tx, Message::Ping(Default::default()), write_timeout).await?;
                    send_timed(&mut upstream_tx, UpstreamMessage::Ping(Default::default()), write_timeout)
                        .await?;
                }
            }
        }
    }
    .await;

    if let Err(e) = result {
        tracing::debug!(client = %addr, error = %e, "Proxy leg failed");
    }

    let _ = tokio::time::timeout(write_timeout, upstream_tx.close()).await;
    let _ = tokio::time::timeout(write_timeout, client_tx.close()).await;
    tracing::debug!(client = %addr, primary = %primary, "Proxy session closed");
}

/// Send one frame, bounded by `limit`
async fn send_timed<S, M, E>(sink: &mut S, message: M, limit: Duration) -> Result<(), SessionError>
where
    S: Sink<M, Error = E> + Unpin,
    SessionError: From<E>,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(result) => result.map_err(SessionError::from),
        Err(_) => Err(SessionError::Timeout),
    }
}

/// Client frame to primary frame. Control frames stay on their own leg.
fn to_upstream(message: Message) -> Option<UpstreamMessage> {
    match message {
        Message::Text(text) => Some(UpstreamMessage::Text(text.as_str().to_owned().into())),
        Message::Binary(bytes) => Some(UpstreamMessage::Binary(bytes)),
        Message::Close(frame) => Some(UpstreamMessage::Close(frame.map(|f| UpstreamCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        }))),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}

/// Primary frame to client frame
fn to_client_frame(message: UpstreamMessage) -> Option<Message> {
    match message {
        UpstreamMessage::Text(text) => Some(Message::Text(text.as_str().to_owned().into())),
        UpstreamMessage::Binary(bytes) => Some(Message::Binary(bytes)),
        UpstreamMessage::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        }))),
        UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_) => None,
    }
}
