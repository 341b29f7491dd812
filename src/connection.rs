//! A single websocket connection to one relay, speaking the client half of NIP-01.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async_tls, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::event::{Event, Filter};

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

type WsStream = WebSocketStream<MaybeTlsStream<Box<dyn AsyncReadWrite + Unpin + Send>>>;

/// Messages a relay sends to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["EVENT", <sub id>, <event>]`
    Event { subscription_id: String, event: Event },
    /// `["EOSE", <sub id>]`
    Eose(String),
    /// `["CLOSED", <sub id>, <message>]`
    Closed { subscription_id: String, message: String },
    /// `["OK", <event id>, <accepted>, <message>]`
    Ok { event_id: String, accepted: bool, message: String },
    /// `["NOTICE", <message>]`
    Notice(String),
}

impl RelayMessage {
    /// Parse a relay frame, returning `None` for anything unrecognized.
    pub fn parse(txt: &str) -> Option<Self> {
        let val: Value = serde_json::from_str(txt).ok()?;
        let arr = val.as_array()?;
        let text = |i: usize| arr.get(i).and_then(|v| v.as_str()).map(str::to_string);
        match arr.first()?.as_str()? {
            "EVENT" => {
                let event = serde_json::from_value(arr.get(2)?.clone()).ok()?;
                Some(RelayMessage::Event {
                    subscription_id: text(1)?,
                    event,
                })
            }
            "EOSE" => Some(RelayMessage::Eose(text(1)?)),
            "CLOSED" => Some(RelayMessage::Closed {
                subscription_id: text(1)?,
                message: text(2).unwrap_or_default(),
            }),
            "OK" => Some(RelayMessage::Ok {
                event_id: text(1)?,
                accepted: arr.get(2)?.as_bool()?,
                message: text(3).unwrap_or_default(),
            }),
            "NOTICE" => Some(RelayMessage::Notice(text(1).unwrap_or_default())),
            _ => None,
        }
    }
}

/// A relay's answer to a published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub relay: String,
    pub accepted: bool,
    pub message: String,
}

/// Fresh subscription id for a one-shot query.
fn subscription_id() -> String {
    format!("angor-{:016x}", rand::random::<u64>())
}

/// One connected relay. Requests on the same connection are serialized.
pub struct RelayConnection {
    url: String,
    ws: Mutex<WsStream>,
    read_timeout: Duration,
}

impl RelayConnection {
    /// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
    pub async fn connect(url: &str, tor_socks: Option<&str>, read_timeout: Duration) -> Result<Self> {
        let relay_err = |message: String| Error::Relay {
            relay: url.to_string(),
            message,
        };
        let parsed = Url::parse(url).map_err(|e| relay_err(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| relay_err("missing host".into()))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| relay_err("missing port".into()))?;
        let req = url
            .into_client_request()
            .map_err(|e| relay_err(e.to_string()))?;
        let connect = async {
            let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = tor_socks {
                Box::new(
                    Socks5Stream::connect(proxy, (host, port))
                        .await
                        .map_err(|e| relay_err(e.to_string()))?,
                )
            } else {
                Box::new(
                    TcpStream::connect((host, port))
                        .await
                        .map_err(|e| relay_err(e.to_string()))?,
                )
            };
            let (ws, _) = client_async_tls(req, stream)
                .await
                .map_err(|e| relay_err(e.to_string()))?;
            Ok::<_, Error>(ws)
        };
        let ws = timeout(read_timeout, connect)
            .await
            .map_err(|_| relay_err("connect timed out".into()))??;
        debug!(relay = url, "connected");
        Ok(Self {
            url: url.to_string(),
            ws: Mutex::new(ws),
            read_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Relay {
            relay: self.url.clone(),
            message: message.into(),
        }
    }

    /// Issue a one-shot subscription and collect events until `EOSE`.
    ///
    /// A relay that stays silent past the read timeout ends the query with
    /// whatever it delivered so far. Events that do not satisfy `filter` are
    /// dropped.
    pub async fn query(&self, filter: &Filter) -> Result<Vec<Event>> {
        let sub_id = subscription_id();
        let req = json!(["REQ", sub_id, Value::Object(filter.to_json())]);
        let mut ws = self.ws.lock().await;
        ws.send(Message::Text(req.to_string()))
            .await
            .map_err(|e| self.error(e.to_string()))?;

        let mut events = Vec::new();
        loop {
            let next = match timeout(self.read_timeout, ws.next()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!(relay = %self.url, sub = %sub_id, "query timed out before EOSE");
                    break;
                }
            };
            let Some(msg) = next else { break };
            match msg.map_err(|e| self.error(e.to_string()))? {
                Message::Text(txt) => match RelayMessage::parse(&txt) {
                    Some(RelayMessage::Event {
                        subscription_id,
                        event,
                    }) if subscription_id == sub_id => {
                        if filter.matches(&event) {
                            events.push(event);
                        }
                    }
                    Some(RelayMessage::Eose(id)) if id == sub_id => break,
                    Some(RelayMessage::Closed {
                        subscription_id,
                        message,
                    }) if subscription_id == sub_id => {
                        warn!(relay = %self.url, %message, "subscription closed by relay");
                        return Ok(events);
                    }
                    Some(RelayMessage::Notice(message)) => {
                        debug!(relay = %self.url, %message, "notice");
                    }
                    _ => {}
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        let close = json!(["CLOSE", sub_id]);
        if let Err(e) = ws.send(Message::Text(close.to_string())).await {
            debug!(relay = %self.url, "failed to close subscription: {e}");
        }
        Ok(events)
    }

    /// Send a signed event and wait for the relay's `OK`.
    pub async fn publish(&self, event: &Event) -> Result<PublishAck> {
        let msg = json!(["EVENT", event]);
        let mut ws = self.ws.lock().await;
        ws.send(Message::Text(msg.to_string()))
            .await
            .map_err(|e| self.error(e.to_string()))?;
        loop {
            let next = timeout(self.read_timeout, ws.next())
                .await
                .map_err(|_| self.error(format!("no OK for event {}", event.id)))?;
            let Some(msg) = next else {
                return Err(self.error("connection closed"));
            };
            match msg.map_err(|e| self.error(e.to_string()))? {
                Message::Text(txt) => {
                    if let Some(RelayMessage::Ok {
                        event_id,
                        accepted,
                        message,
                    }) = RelayMessage::parse(&txt)
                    {
                        if event_id == event.id {
                            return Ok(PublishAck {
                                relay: self.url.clone(),
                                accepted,
                                message,
                            });
                        }
                    }
                }
                Message::Close(_) => return Err(self.error("connection closed")),
                _ => {}
            }
        }
    }

    /// Send a close frame. Errors are ignored since the socket is being dropped.
    pub async fn close(&self) {
        let mut ws = self.ws.lock().await;
        let _ = ws.close(None).await;
    }
}
