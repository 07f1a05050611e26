// =============================================================================
// Tick Stream — Upstream tick sources feeding the engine
// =============================================================================
//
// The engine only knows the `TickSource` trait: `connect()` hands back a
// channel of raw ticks, and dropping that receiver is the unsubscribe.  The
// Deriv implementation below authorizes (optionally), subscribes to a symbol
// and forwards the last digit of every quote.
// =============================================================================

use anyhow::{anyhow, bail, Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::runtime_config::FeedConfig;
use crate::types::RawTick;

/// Capacity of the channel between a source's reader task and the engine.
const FEED_CHANNEL_CAPACITY: usize = 1024;

type DerivSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type DerivWrite = SplitSink<DerivSocket, Message>;
type DerivRead = SplitStream<DerivSocket>;

/// Receiving half of a live subscription. Dropping it unsubscribes.
pub type TickFeed = mpsc::Receiver<RawTick>;

/// Anything that can deliver a stream of `{ value, timestamp }` ticks.
#[async_trait::async_trait]
pub trait TickSource: Send + Sync {
    /// Open a subscription. Returns once the upstream has confirmed delivery
    /// (or failed to).
    async fn connect(&self) -> Result<TickFeed>;
}

// ---------------------------------------------------------------------------
// Deriv tick source
// ---------------------------------------------------------------------------

/// Streams ticks for one symbol from the Deriv WebSocket API.
pub struct DerivTickSource {
    config: FeedConfig,
    api_token: Option<String>,
}

impl DerivTickSource {
    pub fn new(config: FeedConfig, api_token: Option<String>) -> Self {
        Self {
            config,
            api_token: api_token.filter(|t| !t.is_empty()),
        }
    }
}

#[async_trait::async_trait]
impl TickSource for DerivTickSource {
    async fn connect(&self) -> Result<TickFeed> {
        let symbol = self.config.symbol.clone();

        // One deadline covers connect, subscribe and the first tick.
        let (mut write, mut read, first) =
            tokio::time::timeout(self.config.connect_timeout(), self.open(&symbol))
                .await
                .context("timed out connecting to tick WebSocket")??;

        info!(symbol = %symbol, "tick WebSocket subscribed");

        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        if tx.send(first).await.is_err() {
            bail!("tick feed receiver dropped during connect");
        }

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        let forget = serde_json::json!({ "forget_all": "ticks" });
                        let _ = write.send(Message::Text(forget.to_string())).await;
                        let _ = write.close().await;
                        info!(symbol = %symbol, "tick feed unsubscribed");
                        return;
                    }
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => match parse_deriv_message(&text) {
                            Ok(DerivEvent::Tick(tick)) => {
                                if tx.send(tick).await.is_err() {
                                    continue;
                                }
                            }
                            Ok(DerivEvent::Other(kind)) => {
                                debug!(msg_type = %kind, "ignoring non-tick message");
                            }
                            Ok(DerivEvent::Malformed(reason)) => {
                                warn!(reason = %reason, "dropping malformed tick message");
                            }
                            Err(e) => {
                                error!(symbol = %symbol, error = %e, "upstream reported an error");
                                return;
                            }
                        },
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!(symbol = %symbol, "tick WebSocket stream ended");
                            return;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(symbol = %symbol, error = %e, "tick WebSocket read error");
                            return;
                        }
                    },
                }
            }
        });

        Ok(rx)
    }
}

impl DerivTickSource {
    /// Connect, authorize, subscribe and wait for the first tick, so that a
    /// refused subscription surfaces to the caller of `connect` instead of a
    /// silent empty feed.
    async fn open(&self, symbol: &str) -> Result<(DerivWrite, DerivRead, RawTick)> {
        let url = self.config.url();
        info!(url = %url, symbol = %symbol, "connecting to tick WebSocket");

        let (ws_stream, _response) = connect_async(&url)
            .await
            .context("failed to connect to tick WebSocket")?;
        let (mut write, mut read) = ws_stream.split();

        if let Some(token) = &self.api_token {
            let auth = serde_json::json!({ "authorize": token });
            write
                .send(Message::Text(auth.to_string()))
                .await
                .context("failed to send authorize request")?;
        }

        let subscribe = serde_json::json!({ "ticks": symbol, "subscribe": 1 });
        write
            .send(Message::Text(subscribe.to_string()))
            .await
            .context("failed to send tick subscription")?;

        let first = first_tick(&mut read).await?;
        Ok((write, read, first))
    }
}

/// Read until the first tick arrives, skipping authorize replies and other
/// non-tick traffic.
async fn first_tick<S>(read: &mut S) -> Result<RawTick>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = read.next().await {
        let msg = msg.context("tick WebSocket read error")?;
        if let Message::Text(text) = msg {
            match parse_deriv_message(&text)? {
                DerivEvent::Tick(tick) => return Ok(tick),
                DerivEvent::Other(kind) => {
                    debug!(msg_type = %kind, "ignoring message while subscribing");
                }
                DerivEvent::Malformed(reason) => {
                    warn!(reason = %reason, "malformed message while subscribing");
                }
            }
        }
    }
    Err(anyhow!("tick WebSocket closed before the first tick"))
}

// ---------------------------------------------------------------------------
// Message parsing
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum DerivEvent {
    Tick(RawTick),
    /// A well-formed message that is not a tick (authorize reply, ping, ...).
    Other(String),
    /// A tick message we could not turn into a sample.
    Malformed(String),
}

/// Parse a Deriv API message.
///
/// Expected tick shape:
/// ```json
/// { "msg_type": "tick", "tick": { "quote": 1234.56, "epoch": 1700000000, "pip_size": 2 } }
/// ```
/// An `error` object in any message is returned as `Err`.
fn parse_deriv_message(text: &str) -> Result<DerivEvent> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse Deriv JSON")?;

    if let Some(err) = root.get("error") {
        let code = err["code"].as_str().unwrap_or("unknown");
        let message = err["message"].as_str().unwrap_or("");
        bail!("Deriv API error {code}: {message}");
    }

    let msg_type = root["msg_type"].as_str().unwrap_or_default();
    if msg_type != "tick" {
        return Ok(DerivEvent::Other(msg_type.to_string()));
    }

    let tick = &root["tick"];
    let Some(quote) = tick["quote"].as_f64() else {
        return Ok(DerivEvent::Malformed("missing field tick.quote".to_string()));
    };
    let Some(epoch) = tick["epoch"].as_i64() else {
        return Ok(DerivEvent::Malformed("missing field tick.epoch".to_string()));
    };
    let pip_size = tick["pip_size"].as_u64().unwrap_or(2) as usize;

    match last_digit(quote, pip_size) {
        Some(digit) => Ok(DerivEvent::Tick(RawTick::new(digit as f64, epoch * 1000))),
        None => Ok(DerivEvent::Malformed(format!("unusable quote {quote}"))),
    }
}

/// Last displayed digit of `quote` when rendered with `pip_size` decimals.
pub fn last_digit(quote: f64, pip_size: usize) -> Option<u8> {
    if !quote.is_finite() {
        return None;
    }
    let rendered = format!("{:.*}", pip_size, quote.abs());
    rendered
        .chars()
        .last()
        .and_then(|c| c.to_digit(10))
        .map(|d| d as u8)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn silent_upstream_times_out_during_handshake() {
        // Accepts TCP in the kernel backlog but never answers the upgrade.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = FeedConfig {
            endpoint: format!("ws://{addr}"),
            connect_timeout_secs: 1,
            ..FeedConfig::default()
        };
        let source = DerivTickSource::new(config, None);

        let started = std::time::Instant::now();
        let err = source.connect().await.unwrap_err();
        assert!(format!("{err:#}").contains("timed out"), "{err:#}");
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        drop(listener);
    }

    #[test]
    fn last_digit_respects_pip_size() {
        assert_eq!(last_digit(1234.56, 2), Some(6));
        assert_eq!(last_digit(1234.5, 2), Some(0));
        assert_eq!(last_digit(987.123, 3), Some(3));
        assert_eq!(last_digit(42.0, 0), Some(2));
        assert_eq!(last_digit(f64::NAN, 2), None);
    }

    #[test]
    fn parse_tick_message_ok() {
        let json = r#"{
            "echo_req": { "ticks": "R_100", "subscribe": 1 },
            "msg_type": "tick",
            "subscription": { "id": "abc" },
            "tick": {
                "ask": 1234.57,
                "bid": 1234.55,
                "epoch": 1700000000,
                "id": "abc",
                "pip_size": 2,
                "quote": 1234.56,
                "symbol": "R_100"
            }
        }"#;
        let event = parse_deriv_message(json).expect("should parse");
        assert_eq!(event, DerivEvent::Tick(RawTick::new(6.0, 1_700_000_000_000)));
    }

    #[test]
    fn parse_non_tick_message_is_other() {
        let json = r#"{ "msg_type": "authorize", "authorize": { "loginid": "CR1" } }"#;
        assert_eq!(
            parse_deriv_message(json).unwrap(),
            DerivEvent::Other("authorize".to_string())
        );
    }

    #[test]
    fn parse_error_message_is_err() {
        let json = r#"{ "msg_type": "tick", "error": { "code": "InvalidSymbol", "message": "Symbol R_0 invalid" } }"#;
        let err = parse_deriv_message(json).unwrap_err();
        assert!(err.to_string().contains("InvalidSymbol"));
    }

    #[test]
    fn parse_tick_without_quote_is_malformed() {
        let json = r#"{ "msg_type": "tick", "tick": { "epoch": 1700000000 } }"#;
        assert!(matches!(
            parse_deriv_message(json).unwrap(),
            DerivEvent::Malformed(_)
        ));
    }

    #[test]
    fn empty_token_is_treated_as_absent() {
        let source = DerivTickSource::new(FeedConfig::default(), Some(String::new()));
        assert!(source.api_token.is_none());
    }
}
