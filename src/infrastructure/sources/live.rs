use crate::domain::errors::PipelineError;
use crate::domain::ports::{SourceId, TickSource};
use crate::domain::types::{MarketData, Mode};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket trade feed for one exchange.
///
/// Accepts three payload shapes:
/// - combined stream envelope `{"stream": "btcusdt@trade", "data": {...}}`
/// - raw trade `{"s": "BTCUSDT", "p": "68000.1", "T": 1704067200000}`
/// - plain `{"symbol": "BTCUSDT", "price": 68000.1, "timestamp": 1704067200000}`
pub struct LiveTickSource {
    exchange: String,
    url: Url,
    pairs: HashSet<String>,
    channel_capacity: usize,
}

impl LiveTickSource {
    pub fn new(exchange: impl Into<String>, url: Url, pairs: Vec<String>) -> Self {
        Self {
            exchange: exchange.into(),
            url,
            pairs: pairs.into_iter().map(|p| p.to_uppercase()).collect(),
            channel_capacity: 1024,
        }
    }

    /// Decode one text frame. Unknown messages (acks, other streams) are errors.
    pub fn parse_message(exchange: &str, text: &str) -> Result<MarketData> {
        let payload = match serde_json::from_str::<WireMessage>(text)? {
            WireMessage::Combined { stream, data } => {
                if !stream.ends_with("@trade") {
                    return Err(anyhow!("unsupported stream {}", stream));
                }
                data
            }
            WireMessage::Trade(data) => data,
        };

        let price = match payload.price {
            serde_json::Value::String(s) => Decimal::from_str(s.trim()),
            serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
                .or_else(|_| Decimal::from_scientific(&n.to_string())),
            other => return Err(anyhow!("unexpected price value {}", other)),
        }
        .context("Failed to parse price")?;

        let timestamp = DateTime::<Utc>::from_timestamp_millis(payload.timestamp)
            .ok_or_else(|| anyhow!("timestamp {} out of range", payload.timestamp))?;

        Ok(MarketData::new(
            exchange,
            payload.symbol.to_uppercase(),
            price,
            timestamp,
        ))
    }
}

fn accepts(pairs: &HashSet<String>, pair: &str) -> bool {
    pairs.is_empty() || pairs.contains(pair)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireMessage {
    Combined { stream: String, data: TradePayload },
    Trade(TradePayload),
}

#[derive(Debug, Deserialize)]
struct TradePayload {
    #[serde(rename = "s", alias = "symbol")]
    symbol: String,
    #[serde(rename = "p", alias = "price")]
    price: serde_json::Value,
    #[serde(rename = "T", alias = "timestamp")]
    timestamp: i64,
}

#[async_trait]
impl TickSource for LiveTickSource {
    fn id(&self) -> SourceId {
        SourceId::new(self.exchange.clone(), Mode::Live)
    }

    async fn subscribe(&self) -> Result<Receiver<MarketData>, PipelineError> {
        info!("Connecting to {} feed: {}", self.exchange, self.url);

        let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                PipelineError::connectivity(
                    self.exchange.clone(),
                    format!("connect timed out after {:?}", CONNECT_TIMEOUT),
                )
            })?
            .map_err(|e| PipelineError::connectivity(self.exchange.clone(), e))?;

        info!("{} feed connected", self.exchange);

        let (mut write, mut read) = ws_stream.split();
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let exchange = self.exchange.clone();
        let pairs = self.pairs.clone();

        tokio::spawn(async move {
            loop {
                let msg_result = tokio::select! {
                    _ = tx.closed() => {
                        debug!("{} feed: subscriber gone, closing socket", exchange);
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    next = read.next() => match next {
                        Some(msg) => msg,
                        None => break,
                    },
                };

                match msg_result {
                    Ok(Message::Text(text)) => match Self::parse_message(&exchange, &text) {
                        Ok(tick) if accepts(&pairs, &tick.pair) => {
                            if tx.send(tick).await.is_err() {
                                break;
                            }
                        }
                        Ok(tick) => debug!("{} feed: ignoring pair {}", exchange, tick.pair),
                        Err(e) => {
                            if !text.contains("\"result\":null") {
                                warn!("{} feed: failed to decode message: {}", exchange, e);
                            }
                        }
                    },
                    Ok(Message::Ping(payload)) => {
                        debug!("Received ping from {}", exchange);
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Ok(Message::Close(frame)) => {
                        match frame {
                            Some(cf) => info!(
                                "{} feed closed by server: Code {} Reason '{}'",
                                exchange, cf.code, cf.reason
                            ),
                            None => info!("{} feed closed by server", exchange),
                        }
                        break;
                    }
                    Err(e) => {
                        warn!("{} feed read error: {}", exchange, e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(rx)
    }
}
