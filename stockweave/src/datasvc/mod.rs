//! Client for the external technical-data HTTP service.
//!
//! Endpoints: daily candles, supply/demand flows, market indices. Payloads
//! are schema-encoded tables (`{data: {schema: {fields}, data: [[..]]}}`)
//! parsed by [`crate::technical::FramePayload`]. The per-call timeout is
//! provider-configurable and defaults to 30 seconds.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::technical::{CandleFrame, FramePayload};

/// Default HTTP timeout for data-service calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Data-service error.
#[derive(Debug, Error)]
pub enum DataServiceError {
    #[error("http error: {0}")]
    Http(String),

    #[error("malformed payload: {0}")]
    Payload(String),
}

/// Seam for the technical-data service (mocked in tests).
#[async_trait]
pub trait StockDataService: Send + Sync {
    /// Daily candles for one stock.
    async fn get_chart(
        &self,
        stock_code: &str,
        period: &str,
        interval: &str,
    ) -> Result<CandleFrame, DataServiceError>;

    /// Supply/demand flow rows for an inclusive YYYYMMDD range.
    async fn get_supply_demand(
        &self,
        stock_code: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<serde_json::Map<String, Value>>, DataServiceError>;

    /// Market index snapshot.
    async fn get_market_indices(&self) -> Result<Value, DataServiceError>;
}

/// HTTP implementation of [`StockDataService`].
pub struct HttpStockDataClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpStockDataClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DataServiceError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DataServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataServiceError::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, DataServiceError> {
        debug!(url, "data service request");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DataServiceError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DataServiceError::Http(format!("{} for {}", status, url)));
        }
        response
            .json()
            .await
            .map_err(|e| DataServiceError::Payload(e.to_string()))
    }

    fn extract_payload(body: Value) -> Result<FramePayload, DataServiceError> {
        let data = body
            .get("data")
            .cloned()
            .ok_or_else(|| DataServiceError::Payload("data missing".to_string()))?;
        serde_json::from_value(data).map_err(|e| DataServiceError::Payload(e.to_string()))
    }
}

#[async_trait]
impl StockDataService for HttpStockDataClient {
    async fn get_chart(
        &self,
        stock_code: &str,
        period: &str,
        interval: &str,
    ) -> Result<CandleFrame, DataServiceError> {
        let url = format!(
            "{}/api/v1/stock/chart/{}?period={}&interval={}&compressed=true",
            self.base_url, stock_code, period, interval
        );
        let body = self.get_json(&url).await?;
        let payload = Self::extract_payload(body)?;
        CandleFrame::from_payload(&payload).map_err(|e| DataServiceError::Payload(e.to_string()))
    }

    async fn get_supply_demand(
        &self,
        stock_code: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<serde_json::Map<String, Value>>, DataServiceError> {
        let url = format!(
            "{}/api/v1/stock/supply-demand/{}?start_date={}&end_date={}&compressed=true",
            self.base_url, stock_code, start_date, end_date
        );
        let body = self.get_json(&url).await?;
        let payload = Self::extract_payload(body)?;
        Ok(payload.to_records())
    }

    async fn get_market_indices(&self) -> Result<Value, DataServiceError> {
        let url = format!("{}/api/v1/market/indices", self.base_url);
        self.get_json(&url).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::technical::{FramePayload, FrameSchema};
    use serde_json::json;

    /// Scripted data service: one year of synthetic daily candles plus a
    /// fixed supply/demand table.
    pub struct MockStockDataService {
        pub candles: usize,
        pub fail_chart: bool,
    }

    impl MockStockDataService {
        pub fn year_of_candles() -> Self {
            Self {
                candles: 252,
                fail_chart: false,
            }
        }
    }

    #[async_trait]
    impl StockDataService for MockStockDataService {
        async fn get_chart(
            &self,
            _stock_code: &str,
            _period: &str,
            _interval: &str,
        ) -> Result<CandleFrame, DataServiceError> {
            if self.fail_chart {
                return Err(DataServiceError::Http("503 unavailable".to_string()));
            }
            let data: Vec<Vec<Value>> = (0..self.candles)
                .map(|i| {
                    let base = 70_000.0 + (i as f64 * 0.2).sin() * 3_000.0 + i as f64 * 10.0;
                    vec![
                        json!(format!("2024-{:02}-{:02}", 1 + (i / 28) % 12, 1 + i % 28)),
                        json!(base - 100.0),
                        json!(base + 500.0),
                        json!(base - 500.0),
                        json!(base),
                        json!(1_000_000 + (i * 1000) as i64),
                    ]
                })
                .collect();
            let payload = FramePayload {
                schema: FrameSchema {
                    fields: ["timestamp", "open", "high", "low", "close", "volume"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                },
                data,
            };
            CandleFrame::from_payload(&payload)
                .map_err(|e| DataServiceError::Payload(e.to_string()))
        }

        async fn get_supply_demand(
            &self,
            _stock_code: &str,
            _start_date: &str,
            _end_date: &str,
        ) -> Result<Vec<serde_json::Map<String, Value>>, DataServiceError> {
            Ok((0..30)
                .map(|i| {
                    serde_json::from_value(json!({
                        "date": format!("202406{:02}", 1 + i % 28),
                        "foreign_net_buy": 1000.0 - i as f64 * 10.0,
                        "institution_net_buy": -500.0 + i as f64 * 5.0,
                    }))
                    .unwrap()
                })
                .collect())
        }

        async fn get_market_indices(&self) -> Result<Value, DataServiceError> {
            Ok(json!({"KOSPI": 2750.1, "KOSDAQ": 870.4}))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MockStockDataService;
    use super::*;

    /// **Scenario**: the mock service produces a parseable year of candles
    /// (fixture used by the technical-analyzer tests).
    #[tokio::test]
    async fn mock_service_candles_parse() {
        let service = MockStockDataService::year_of_candles();
        let frame = service.get_chart("005930", "1y", "1d").await.unwrap();
        assert_eq!(frame.len(), 252);
        assert!(frame.last_close().is_some());
    }

    /// **Scenario**: an unreachable endpoint surfaces an Http error.
    #[tokio::test]
    async fn unreachable_endpoint_errors() {
        let client = HttpStockDataClient::with_timeout(
            "http://127.0.0.1:1",
            Duration::from_millis(200),
        )
        .unwrap();
        let result = client.get_market_indices().await;
        assert!(matches!(result, Err(DataServiceError::Http(_))));
    }
}
