//! Background task that owns one channel instance.
//!
//! Connects, authenticates, reads push frames and reconnects until closed
//! or until the retry budget runs out. Every frame is handled before the
//! next one is read, so handlers see events in arrival order.
//!
//! A server close reconnects at once. Back-to-back server closes that never
//! reach authentication go through the backoff and count against the retry
//! budget, so a server that accepts and hangs up cannot pin the client in a
//! reconnect loop.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use taskflow_proto::channel::{ClientEvent, ServerEvent};
use taskflow_proto::codec;

use super::manager::{Command, Link};
use super::{ChannelError, ChannelEvent, ChannelId, ConnectionState, DisconnectReason};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of the WebSocket.
type WsSender = futures_util::stream::SplitSink<WsStream, Message>;

/// How a connect attempt ended.
enum Connect {
    Open(Box<WsStream>),
    Failed(ChannelError),
    Closed,
}

/// How a connected session ended.
enum SessionEnd {
    ServerClosed { authenticated: bool },
    Transport(ChannelError),
    Closed,
}

/// Drives channel `id` until closed or out of retries.
pub(super) async fn run(
    link: Arc<Link>,
    id: ChannelId,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let policy = link.config.reconnect;
    let mut failures: u32 = 0;
    // Consecutive server closes with no authentication in between.
    let mut churn: u32 = 0;

    loop {
        if failures > 0 {
            if policy.exhausted(failures) {
                let attempts = failures - 1;
                tracing::warn!(channel = %id, attempts, "reconnect attempts exhausted, giving up");
                link.emit(ChannelEvent::ReconnectsExhausted { attempts });
                link.set_state(id, ConnectionState::Disconnected);
                return;
            }
            let delay = policy.delay_for(failures);
            link.set_state(id, ConnectionState::Backoff {
                attempt: failures,
                delay,
            });
            link.emit(ChannelEvent::Reconnecting {
                attempt: failures,
                max_attempts: policy.max_attempts,
                delay,
            });
            tracing::info!(channel = %id, attempt = failures, ?delay, "reconnecting after delay");
            if !wait_backoff(delay, &mut commands).await {
                link.set_state(id, ConnectionState::Disconnected);
                return;
            }
        }

        link.set_state(id, ConnectionState::Connecting { attempt: failures });
        let ws = match connect(&link, &mut commands).await {
            Connect::Open(ws) => *ws,
            Connect::Failed(e) => {
                tracing::warn!(channel = %id, err = %e, "channel connect failed");
                link.emit(ChannelEvent::Error(e.to_string()));
                failures += 1;
                continue;
            }
            Connect::Closed => {
                link.set_state(id, ConnectionState::Disconnected);
                return;
            }
        };

        failures = 0;
        match run_session(&link, id, ws, &mut commands).await {
            SessionEnd::Closed => {
                link.emit(ChannelEvent::Disconnected {
                    reason: DisconnectReason::ClientClosed,
                });
                link.set_state(id, ConnectionState::Disconnected);
                tracing::debug!(channel = %id, "channel task exiting");
                return;
            }
            SessionEnd::ServerClosed { authenticated } => {
                link.emit(ChannelEvent::Disconnected {
                    reason: DisconnectReason::ServerClosed,
                });
                churn = if authenticated { 0 } else { churn + 1 };
                failures = churn.saturating_sub(1);
                if failures == 0 {
                    tracing::info!(channel = %id, "channel closed by server, reconnecting now");
                } else {
                    tracing::warn!(channel = %id, closes = churn, "server keeps closing before authentication");
                }
            }
            SessionEnd::Transport(e) => {
                churn = 0;
                tracing::warn!(channel = %id, err = %e, "channel transport lost");
                link.emit(ChannelEvent::Disconnected {
                    reason: DisconnectReason::Transport(e.to_string()),
                });
                failures = 1;
            }
        }
    }
}

/// Sleeps for `delay`. Returns `false` if the channel was closed meanwhile.
async fn wait_backoff(
    delay: std::time::Duration,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return true,
            command = commands.recv() => match command {
                None | Some(Command::Close) => return false,
                Some(Command::ConnectNow | Command::Authenticate) => {
                    tracing::debug!("backoff cut short");
                    return true;
                }
            },
        }
    }
}

/// One connect attempt bounded by the connect timeout.
///
/// Commands other than close are absorbed; the attempt presents the latest
/// credential once connected anyway.
async fn connect(link: &Link, commands: &mut mpsc::UnboundedReceiver<Command>) -> Connect {
    let url = link.config.url.as_str();
    let attempt = tokio::time::timeout(link.config.connect_timeout, connect_async(url));
    tokio::pin!(attempt);
    loop {
        tokio::select! {
            result = &mut attempt => {
                return match result {
                    Err(_) => {
                        tracing::warn!(url, "channel connect timed out");
                        Connect::Failed(ChannelError::Timeout)
                    }
                    Ok(Err(e)) => Connect::Failed(map_ws_connect_error(e)),
                    Ok(Ok((ws, _response))) => Connect::Open(Box::new(ws)),
                };
            }
            command = commands.recv() => match command {
                None | Some(Command::Close) => return Connect::Closed,
                Some(_) => {}
            },
        }
    }
}

/// Runs one connected session: authenticate, then read until it ends.
async fn run_session(
    link: &Link,
    id: ChannelId,
    ws: WsStream,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> SessionEnd {
    let (mut sender, mut reader) = ws.split();
    link.set_state(id, ConnectionState::Connected);
    tracing::info!(channel = %id, url = %link.config.url, "channel connected");

    if let Err(e) = authenticate(link, &mut sender).await {
        return SessionEnd::Transport(e);
    }

    let mut auth_retry: Option<Instant> = None;
    let mut authenticated = false;
    loop {
        let retry_at = auth_retry;
        let retry = async move {
            match retry_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => match codec::decode_server(&text) {
                    Ok(ServerEvent::Authenticated(ack)) if ack.success => {
                        auth_retry = None;
                        authenticated = true;
                        tracing::info!(channel = %id, user_id = ?ack.user_id, "channel authenticated");
                        link.set_state(id, ConnectionState::Authenticated {
                            user_id: ack.user_id.clone(),
                        });
                        link.emit(ChannelEvent::Authenticated { user_id: ack.user_id });
                    }
                    Ok(ServerEvent::Authenticated(ack)) => {
                        let reason = ack.error.unwrap_or_else(|| "authentication failed".to_string());
                        let retry_in = link.config.auth_retry_delay;
                        tracing::warn!(channel = %id, %reason, ?retry_in, "channel authentication rejected");
                        auth_retry = Some(Instant::now() + retry_in);
                        link.set_state(id, ConnectionState::Connected);
                        link.emit(ChannelEvent::AuthRejected { reason, retry_in });
                    }
                    Ok(event) => {
                        if link.is_current(id) {
                            let outcome = link.router.route(event);
                            tracing::trace!(channel = %id, ?outcome, "push event routed");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(channel = %id, err = %e, "malformed channel frame, skipping");
                    }
                },
                Some(Ok(Message::Close(_))) => return SessionEnd::ServerClosed { authenticated },
                Some(Ok(Message::Binary(_))) => {
                    tracing::debug!(channel = %id, "ignoring binary frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    return SessionEnd::Transport(ChannelError::Transport(e.to_string()));
                }
                None => {
                    return SessionEnd::Transport(ChannelError::Transport(
                        "stream ended".to_string(),
                    ));
                }
            },
            () = retry => {
                auth_retry = None;
                tracing::debug!(channel = %id, "presenting credential again");
                if let Err(e) = authenticate(link, &mut sender).await {
                    return SessionEnd::Transport(e);
                }
            }
            command = commands.recv() => match command {
                Some(Command::Authenticate) => {
                    auth_retry = None;
                    link.set_state(id, ConnectionState::Connected);
                    if let Err(e) = authenticate(link, &mut sender).await {
                        return SessionEnd::Transport(e);
                    }
                }
                Some(Command::ConnectNow) => {}
                None | Some(Command::Close) => {
                    if let Err(e) = sender.send(Message::Close(None)).await {
                        tracing::debug!(channel = %id, err = %e, "close frame not sent");
                    }
                    return SessionEnd::Closed;
                }
            },
        }
    }
}

/// Sends an `authenticate` frame carrying the latest credential.
async fn authenticate(link: &Link, sender: &mut WsSender) -> Result<(), ChannelError> {
    let Some(credential) = link.credential() else {
        tracing::warn!("no credential to present, channel stays unauthenticated");
        return Ok(());
    };
    let frame = codec::encode_client(&ClientEvent::Authenticate {
        token: credential.expose().to_string(),
    })?;
    sender.send(Message::Text(frame.into())).await.map_err(|e| {
        tracing::warn!(err = %e, "failed to send authenticate frame");
        ChannelError::Transport(e.to_string())
    })
}

/// Maps a `tokio_tungstenite` connection error to a [`ChannelError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> ChannelError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err)
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable
            ) =>
        {
            ChannelError::Unreachable(io_err.to_string())
        }
        WsError::Http(response) => ChannelError::Upgrade(response.status().as_u16()),
        other => ChannelError::Transport(other.to_string()),
    }
}
