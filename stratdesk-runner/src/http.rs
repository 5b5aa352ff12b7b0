//! `RemoteEngine` over blocking reqwest.
//!
//! One client, one attempt per call: the remote services are not idempotent
//! (uploads overwrite, run starts a session), so nothing is retried here.
//! Only paths are logged; the user key is a URL segment and never appears in
//! log output.

use reqwest::blocking::{multipart, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use stratdesk_core::TradeType;

use crate::artifacts::{Artifact, ArtifactKind};
use crate::backtest::BacktestRequest;
use crate::credentials::Credentials;
use crate::endpoints::{EndpointConfig, Service};
use crate::remote::{ApiError, LogSource, RemoteEngine};
use crate::wire::{
    positions_from_json, BacktestReply, HealthStatus, LogBatch, PositionSnapshot, RunSystemReply,
    StatusReply,
};

pub struct HttpEngine {
    client: Client,
    endpoints: EndpointConfig,
    credentials: Credentials,
}

impl HttpEngine {
    pub fn new(endpoints: EndpointConfig, credentials: Credentials) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(endpoints.timeout())
            .build()
            .map_err(|e| ApiError::Transport {
                service: Service::Trading,
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoints,
            credentials,
        })
    }

    pub fn endpoints(&self) -> &EndpointConfig {
        &self.endpoints
    }

    fn url(&self, service: Service, path: &str) -> String {
        self.endpoints
            .url(service, self.credentials.user_key.expose(), path)
    }

    /// Send, map non-2xx to `Http{status, body}`, and parse JSON (raw text if not JSON).
    fn send(
        &self,
        service: Service,
        path: &str,
        request: RequestBuilder,
    ) -> Result<Value, ApiError> {
        debug!(%service, path, "request");
        let resp = request.send().map_err(|e| ApiError::Transport {
            service,
            message: if e.is_timeout() {
                "request timed out".to_string()
            } else {
                e.without_url().to_string()
            },
        })?;

        let status = resp.status();
        let text = resp.text().map_err(|e| ApiError::Decode {
            service,
            message: e.without_url().to_string(),
        })?;

        if !status.is_success() {
            warn!(%service, path, status = status.as_u16(), "request rejected");
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        debug!(%service, path, status = status.as_u16(), bytes = text.len(), "response");
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    fn decode<T: DeserializeOwned>(service: Service, value: Value) -> Result<T, ApiError> {
        serde_json::from_value(value).map_err(|e| ApiError::Decode {
            service,
            message: e.to_string(),
        })
    }

    /// Status replies tolerate plain-text bodies.
    fn status_reply(service: Service, value: Value) -> Result<StatusReply, ApiError> {
        match value {
            Value::String(text) => Ok(StatusReply::from_text(&text)),
            other => Self::decode(service, other),
        }
    }

    fn reachable(&self, service: Service) -> bool {
        let path = "";
        match self.send(service, path, self.client.get(self.url(service, path))) {
            Ok(_) => true,
            Err(e) => {
                debug!(%service, error = %e, "health check failed");
                false
            }
        }
    }
}

impl LogSource for HttpEngine {
    fn poll_logs(&self, session_id: &str, offset: u64) -> Result<LogBatch, ApiError> {
        let path = "command/logs/";
        let offset = offset.to_string();
        let req = self
            .client
            .get(self.url(Service::Trading, path))
            .query(&[("session_id", session_id), ("offset", offset.as_str())]);
        let value = self.send(Service::Trading, path, req)?;
        Self::decode(Service::Trading, value)
    }
}

impl RemoteEngine for HttpEngine {
    fn health(&self) -> HealthStatus {
        HealthStatus {
            backtest: self.reachable(Service::Backtest),
            trading: self.reachable(Service::Trading),
            position: self.reachable(Service::Position),
        }
    }

    fn upload_artifact(
        &self,
        service: Service,
        artifact: &Artifact,
        trade_type: Option<TradeType>,
    ) -> Result<StatusReply, ApiError> {
        let path = match (service, artifact.kind) {
            (Service::Backtest | Service::Trading, ArtifactKind::Strategy) => "upload/strategy/",
            (Service::Trading, ArtifactKind::Config) => "upload/config/",
            _ => {
                return Err(ApiError::Unsupported {
                    service,
                    operation: "config upload",
                })
            }
        };

        let part = multipart::Part::bytes(artifact.bytes.clone())
            .file_name(artifact.file_name.clone());
        let form = multipart::Form::new().part("file", part);
        let mut req = self.client.post(self.url(service, path)).multipart(form);
        if service == Service::Backtest {
            req = req.query(&[("tradeType", trade_type.unwrap_or_default().as_str())]);
        }

        debug!(%service, file = %artifact.file_name, digest = artifact.short_digest(), "upload");
        let value = self.send(service, path, req)?;
        Self::status_reply(service, value)
    }

    fn check_strategy(
        &self,
        service: Service,
        strategy_name: &str,
        trade_type: Option<TradeType>,
    ) -> Result<StatusReply, ApiError> {
        let (path, req) = match service {
            Service::Backtest => {
                let path = "upload/strategy/check/";
                let tt = trade_type.unwrap_or_default();
                (
                    path,
                    self.client.get(self.url(service, path)).query(&[
                        ("tradeType", tt.as_str()),
                        ("strategy_name", strategy_name),
                    ]),
                )
            }
            Service::Trading => {
                let path = "upload/check/strategy/";
                (
                    path,
                    self.client
                        .get(self.url(service, path))
                        .query(&[("strategy_name", strategy_name)]),
                )
            }
            Service::Position => {
                return Err(ApiError::Unsupported {
                    service,
                    operation: "strategy check",
                })
            }
        };
        let value = self.send(service, path, req)?;
        Self::status_reply(service, value)
    }

    fn delete_artifact(
        &self,
        service: Service,
        kind: ArtifactKind,
        name: &str,
        trade_type: Option<TradeType>,
    ) -> Result<StatusReply, ApiError> {
        let (path, req) = match (service, kind) {
            (Service::Backtest, ArtifactKind::Strategy) => {
                let path = "upload/strategy/delete/";
                let tt = trade_type.unwrap_or_default();
                let req = self
                    .client
                    .delete(self.url(service, path))
                    .query(&[("tradeType", tt.as_str()), ("strategy_name", name)]);
                (path, req)
            }
            (Service::Trading, ArtifactKind::Strategy) => {
                let path = "upload/delete/strategy/";
                let req = self
                    .client
                    .delete(self.url(service, path))
                    .query(&[("strategy_name", name)]);
                (path, req)
            }
            (Service::Trading, ArtifactKind::Config) => {
                let path = "upload/delete/config/";
                let req = self
                    .client
                    .delete(self.url(service, path))
                    .query(&[("config_name", name)]);
                (path, req)
            }
            _ => {
                return Err(ApiError::Unsupported {
                    service,
                    operation: "delete",
                })
            }
        };
        let value = self.send(service, path, req)?;
        Self::status_reply(service, value)
    }

    fn run_system(&self, strategy_name: &str, method: &str) -> Result<RunSystemReply, ApiError> {
        let path = "command/run-system";
        let req = self
            .client
            .post(self.url(Service::Trading, path))
            .json(&json!({ "strategy_name": strategy_name, "method": method }));
        let value = self.send(Service::Trading, path, req)?;
        Ok(RunSystemReply::from_json(&value))
    }

    fn terminate(&self, session_id: &str) -> Result<StatusReply, ApiError> {
        let path = "command/terminate/";
        let req = self
            .client
            .get(self.url(Service::Trading, path))
            .query(&[("session_id", session_id)]);
        let value = self.send(Service::Trading, path, req)?;
        Self::status_reply(Service::Trading, value)
    }

    fn run_backtest(
        &self,
        trade_type: TradeType,
        request: &BacktestRequest,
    ) -> Result<BacktestReply, ApiError> {
        let path = format!("run/{}/backtest/", trade_type.as_str());
        let req = self
            .client
            .post(self.url(Service::Backtest, &path))
            .timeout(self.endpoints.backtest_timeout())
            .json(request);
        let value = self.send(Service::Backtest, &path, req)?;
        Self::decode(Service::Backtest, value)
    }

    fn all_positions(
        &self,
        user_key: &str,
        product_type: &str,
        margin_coin: &str,
    ) -> Result<Vec<PositionSnapshot>, ApiError> {
        let path = "future/position/all-positions";
        let body = json!({
            "user_key": user_key,
            "all_positions": {
                "productType": product_type,
                "marginCoin": margin_coin.to_ascii_uppercase(),
            }
        });
        let req = self
            .client
            .post(self.url(Service::Position, path))
            .json(&body);
        let value = self.send(Service::Position, path, req)?;
        positions_from_json(&value)
    }
}
