//! Typed carrier client — settlement search, warehouse lookup, price
//! quotes. Consumed by order intake, never by the engines.
//!
//! Each operation is its own request/response pair; there is no generic
//! model/method payload. Transport failures and non-success responses
//! surface as the typed carrier error; every call is bounded by the
//! configured timeout.

use crate::config::CarrierConfig;
use crate::error::{OpsError, OpsResult};
use crate::types::CityRef;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Queries shorter than this return empty without calling out.
const MIN_QUERY_LEN: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityHit {
    pub city_ref: CityRef,
    pub name: String,
    pub area: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warehouse {
    pub warehouse_ref: String,
    pub number: String,
    pub address: String,
    pub max_weight_kg: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteRequest {
    pub city_to: CityRef,
    pub weight: f64,
    pub declared_value: f64,
    pub cod: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub cost: f64,
    pub estimated_days: Option<i64>,
}

#[derive(Serialize)]
struct ApiEnvelope<'a, T: Serialize> {
    api_key: &'a str,
    #[serde(flatten)]
    body: T,
}

#[derive(Deserialize)]
struct ApiReply<T> {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    data: Option<T>,
}

pub struct CarrierClient {
    agent: ureq::Agent,
    config: CarrierConfig,
}

impl CarrierClient {
    pub fn new(config: CarrierConfig) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self { agent, config }
    }

    pub fn city_search(&self, query: &str, limit: usize) -> OpsResult<Vec<CityHit>> {
        if query.trim().len() < MIN_QUERY_LEN {
            return Ok(Vec::new());
        }
        #[derive(Serialize)]
        struct Req<'a> {
            query: &'a str,
            limit: usize,
        }
        let hits: Vec<CityHit> = self.call("city_search", Req { query, limit })?;
        Ok(hits.into_iter().take(limit).collect())
    }

    pub fn warehouses(&self, city_ref: &str, number: Option<&str>) -> OpsResult<Vec<Warehouse>> {
        #[derive(Serialize)]
        struct Req<'a> {
            city_ref: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            number: Option<&'a str>,
        }
        self.call("warehouses", Req { city_ref, number })
    }

    pub fn price_quote(&self, request: &QuoteRequest) -> OpsResult<Quote> {
        self.call("price_quote", request)
    }

    fn call<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        body: B,
    ) -> OpsResult<T> {
        let url = format!("{}/{operation}", self.config.base_url);
        let envelope = ApiEnvelope {
            api_key: &self.config.api_key,
            body,
        };
        let response = self
            .agent
            .post(&url)
            .send_json(serde_json::to_value(&envelope)?)
            .map_err(|e| carrier_error(operation, e))?;

        let reply: ApiReply<T> = response.into_json().map_err(|e| OpsError::Carrier {
            operation,
            detail: format!("malformed reply: {e}"),
        })?;
        if !reply.success {
            return Err(OpsError::Carrier {
                operation,
                detail: reply.error.unwrap_or_else(|| "carrier reported failure".into()),
            });
        }
        reply.data.ok_or(OpsError::Carrier {
            operation,
            detail: "success reply with no data".into(),
        })
    }
}

fn carrier_error(operation: &'static str, err: ureq::Error) -> OpsError {
    let detail = match err {
        ureq::Error::Status(code, _) => format!("HTTP {code}"),
        ureq::Error::Transport(t) => t.to_string(),
    };
    OpsError::Carrier { operation, detail }
}
