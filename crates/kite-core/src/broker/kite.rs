//! Kite Connect REST client.
//!
//! Implements [`BrokerGateway`] against api.kite.trade. Placement calls are
//! never retried here: a transport failure is unknown-outcome and callers
//! must reconcile via [`BrokerGateway::find_order_by_tag`].

use super::{BracketIds, BracketSpec, BrokerGateway, CancelAck, OrderSpec};
use crate::config::KiteConfig;
use crate::error::{Error, Result};
use crate::types::{Candle, Instrument, Margins, OrderSnapshot, OrderStatus, Quote};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

const KITE_API_VERSION: &str = "3";
const VARIETY_REGULAR: &str = "regular";
const VARIETY_BRACKET: &str = "bo";

/// Kite Connect HTTP client.
pub struct KiteClient {
    base_url: String,
    auth_header: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct OrderIdData {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderRecord {
    order_id: String,
    status: String,
    #[serde(default)]
    filled_quantity: u32,
    #[serde(default)]
    average_price: Decimal,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    parent_order_id: Option<String>,
    #[serde(default)]
    order_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteRecord {
    last_price: Decimal,
    #[serde(default)]
    volume: u64,
    ohlc: OhlcRecord,
}

#[derive(Debug, Deserialize)]
struct OhlcRecord {
    close: Decimal,
}

#[derive(Debug, Deserialize)]
struct HistoricalData {
    // [timestamp, open, high, low, close, volume]; the timestamp carries a
    // "+0530" offset that is not valid RFC 3339, so it is parsed manually.
    candles: Vec<(String, Decimal, Decimal, Decimal, Decimal, u64)>,
}

#[derive(Debug, Deserialize)]
struct MarginsData {
    equity: MarginSegment,
}

#[derive(Debug, Deserialize)]
struct MarginSegment {
    available: MarginAvailable,
}

#[derive(Debug, Deserialize)]
struct MarginAvailable {
    cash: Decimal,
}

impl KiteClient {
    pub fn new(config: &KiteConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .connect_timeout(StdDuration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header: format!("token {}:{}", config.api_key, config.access_token),
            http_client,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", &self.auth_header)
            .header("X-Kite-Version", KITE_API_VERSION)
    }

    /// Send a request and unwrap the Kite response envelope. Transport
    /// failures map to `BrokerUnavailable`; envelope errors to `Broker`.
    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                Error::BrokerUnavailable {
                    message: e.to_string(),
                }
            } else {
                Error::Http(e)
            }
        })?;

        let status = response.status();
        let envelope: Envelope<T> = response.json().await?;

        if envelope.status == "success" {
            envelope.data.ok_or_else(|| Error::Broker {
                message: "success response with empty data".to_string(),
            })
        } else {
            Err(Error::Broker {
                message: envelope
                    .message
                    .unwrap_or_else(|| format!("request failed with HTTP {}", status)),
            })
        }
    }

    fn order_form(spec: &OrderSpec) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("tradingsymbol", spec.instrument.tradingsymbol.clone()),
            ("exchange", spec.instrument.exchange.as_str().to_string()),
            ("transaction_type", spec.side.as_str().to_string()),
            ("order_type", spec.order_type.as_str().to_string()),
            ("quantity", spec.quantity.to_string()),
            ("product", spec.product.as_str().to_string()),
            ("validity", "DAY".to_string()),
            ("tag", spec.tag.clone()),
        ];
        if let Some(price) = spec.price {
            form.push(("price", price.to_string()));
        }
        if let Some(trigger) = spec.trigger_price {
            form.push(("trigger_price", trigger.to_string()));
        }
        form
    }

    fn map_status(record: &OrderRecord) -> OrderStatus {
        match record.status.as_str() {
            "COMPLETE" => OrderStatus::Complete,
            "CANCELLED" => OrderStatus::Cancelled,
            "REJECTED" => OrderStatus::Rejected,
            "TRIGGER PENDING" => OrderStatus::TriggerPending,
            _ if record.filled_quantity > 0 => OrderStatus::PartiallyFilled,
            _ => OrderStatus::Open,
        }
    }

    fn snapshot(record: &OrderRecord) -> OrderSnapshot {
        OrderSnapshot {
            status: Self::map_status(record),
            filled_quantity: record.filled_quantity,
            average_price: record.average_price,
        }
    }

    async fn all_orders(&self) -> Result<Vec<OrderRecord>> {
        self.send(self.request(reqwest::Method::GET, "/orders"))
            .await
    }
}

#[async_trait]
impl BrokerGateway for KiteClient {
    async fn place_order(&self, spec: &OrderSpec) -> Result<String> {
        let form = Self::order_form(spec);
        let data: OrderIdData = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/orders/{VARIETY_REGULAR}"),
                )
                .form(&form),
            )
            .await?;

        debug!(
            order_id = %data.order_id,
            symbol = %spec.instrument.tradingsymbol,
            side = spec.side.as_str(),
            quantity = spec.quantity,
            "Placed order"
        );
        Ok(data.order_id)
    }

    async fn place_bracket_order(&self, spec: &BracketSpec) -> Result<BracketIds> {
        let form = vec![
            ("tradingsymbol", spec.instrument.tradingsymbol.clone()),
            ("exchange", spec.instrument.exchange.as_str().to_string()),
            ("transaction_type", spec.side.as_str().to_string()),
            ("order_type", "LIMIT".to_string()),
            ("quantity", spec.quantity.to_string()),
            ("product", "MIS".to_string()),
            ("validity", "DAY".to_string()),
            ("price", spec.price.to_string()),
            ("stoploss", spec.stop_loss_offset.to_string()),
            ("squareoff", spec.target_offset.to_string()),
            ("tag", spec.tag.clone()),
        ];

        let data: OrderIdData = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/orders/{VARIETY_BRACKET}"),
                )
                .form(&form),
            )
            .await?;
        let primary_id = data.order_id;

        // Child legs appear on the order book keyed by parent_order_id.
        let orders = self.all_orders().await?;
        let mut stop_id = None;
        let mut target_id = None;
        for record in orders {
            if record.parent_order_id.as_deref() == Some(primary_id.as_str()) {
                match record.order_type.as_deref() {
                    Some("SL") | Some("SL-M") => stop_id = Some(record.order_id),
                    _ => target_id = Some(record.order_id),
                }
            }
        }

        match (stop_id, target_id) {
            (Some(stop_id), Some(target_id)) => Ok(BracketIds {
                primary_id,
                stop_id,
                target_id,
            }),
            _ => Err(Error::Broker {
                message: format!(
                    "bracket order {primary_id} accepted but child legs not found"
                ),
            }),
        }
    }

    async fn cancel_order(&self, order_id: &str) -> Result<CancelAck> {
        let result: Result<OrderIdData> = self
            .send(self.request(
                reqwest::Method::DELETE,
                &format!("/orders/{VARIETY_REGULAR}/{order_id}"),
            ))
            .await;

        match result {
            Ok(_) => Ok(CancelAck::Cancelled),
            Err(Error::Broker { message }) => {
                // The broker refuses cancellation of terminal orders; that is
                // a benign outcome for mutual cancellation.
                let lowered = message.to_lowercase();
                if lowered.contains("complete") || lowered.contains("cancelled") {
                    debug!(order_id, "Cancel no-op, order already closed");
                    Ok(CancelAck::AlreadyClosed)
                } else {
                    Err(Error::Broker { message })
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderSnapshot> {
        let history: Vec<OrderRecord> = self
            .send(self.request(reqwest::Method::GET, &format!("/orders/{order_id}")))
            .await?;

        history
            .last()
            .map(Self::snapshot)
            .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))
    }

    async fn find_order_by_tag(&self, tag: &str) -> Result<Option<(String, OrderSnapshot)>> {
        let orders = self.all_orders().await?;
        Ok(orders
            .iter()
            .find(|record| record.tag.as_deref() == Some(tag))
            .map(|record| (record.order_id.clone(), Self::snapshot(record))))
    }

    async fn quote(&self, instrument: &Instrument) -> Result<Quote> {
        let key = instrument.key();
        let mut data: std::collections::HashMap<String, QuoteRecord> = self
            .send(
                self.request(reqwest::Method::GET, "/quote")
                    .query(&[("i", key.as_str())]),
            )
            .await?;

        let record = data.remove(&key).ok_or_else(|| Error::Broker {
            message: format!("no quote returned for {key}"),
        })?;

        Ok(Quote {
            last_price: record.last_price,
            prev_close: record.ohlc.close,
            volume: record.volume,
        })
    }

    async fn historical_candles(&self, instrument: &Instrument, days: u32) -> Result<Vec<Candle>> {
        let token = instrument.instrument_token.ok_or_else(|| Error::Broker {
            message: format!(
                "no instrument token for {}, cannot fetch history",
                instrument.tradingsymbol
            ),
        })?;

        let to = Utc::now();
        let from = to - Duration::days(i64::from(days));
        let data: HistoricalData = self
            .send(
                self.request(
                    reqwest::Method::GET,
                    &format!("/instruments/historical/{token}/day"),
                )
                .query(&[
                    ("from", from.format("%Y-%m-%d %H:%M:%S").to_string()),
                    ("to", to.format("%Y-%m-%d %H:%M:%S").to_string()),
                ]),
            )
            .await?;

        if data.candles.is_empty() {
            warn!(symbol = %instrument.tradingsymbol, days, "Broker returned no candles");
        }

        data.candles
            .into_iter()
            .map(|(date, open, high, low, close, volume)| {
                let date = DateTime::parse_from_str(&date, "%Y-%m-%dT%H:%M:%S%z")
                    .map_err(|e| Error::Broker {
                        message: format!("unparseable candle timestamp {date}: {e}"),
                    })?
                    .with_timezone(&Utc);
                Ok(Candle {
                    date,
                    open,
                    high,
                    low,
                    close,
                    volume,
                })
            })
            .collect()
    }

    async fn margins(&self) -> Result<Margins> {
        let data: MarginsData = self
            .send(self.request(reqwest::Method::GET, "/user/margins"))
            .await?;
        Ok(Margins {
            available_cash: data.equity.available.cash,
        })
    }
}
