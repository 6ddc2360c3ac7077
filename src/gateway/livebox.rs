use std::net::IpAddr;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, IntoUrl, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_GATEWAY_URL: &str = "http://livebox/ws";

const WS_CONTENT_TYPE: &str = "application/x-sah-ws-4-call+json";

/// Reads the WAN address from the web service of a Livebox gateway.
#[derive(Debug)]
pub struct LiveboxResolver {
    url: Url,
    client: Client,
}

impl LiveboxResolver {
    pub fn new<U: IntoUrl>(url: U) -> Result<Self, LiveboxError> {
        Ok(Self {
            url: url.into_url()?,
            client: Client::new(),
        })
    }
}

#[async_trait::async_trait]
impl super::Resolver for LiveboxResolver {
    type Error = LiveboxError;

    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn wan_ip(&self) -> Result<IpAddr, Self::Error> {
        let call = WsCall {
            service: "NMC",
            method: "getWANStatus",
            parameters: Parameters {},
        };
        let response = self.client.post(self.url.clone())
            .header(CONTENT_TYPE, WS_CONTENT_TYPE)
            .body(serde_json::to_vec(&call)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LiveboxError::Status(status));
        }

        let wan_status = response.json::<WsResponse>().await?;
        debug!(?wan_status, "got WAN status from the Livebox");

        let address = wan_status.data
            .and_then(|d| d.ip_address)
            .ok_or(LiveboxError::MissingAddress)?;

        address.trim()
            .parse()
            .map_err(|_| LiveboxError::InvalidAddress(address))
    }
}

#[derive(Debug, Serialize)]
struct WsCall<'a> {
    service: &'a str,
    method: &'a str,
    parameters: Parameters,
}

#[derive(Debug, Serialize)]
struct Parameters {}

#[derive(Debug, Deserialize)]
struct WsResponse {
    data: Option<WanStatus>,
}

#[derive(Debug, Deserialize)]
struct WanStatus {
    #[serde(rename = "IPAddress")]
    ip_address: Option<String>,
}

#[derive(Debug, Error)]
pub enum LiveboxError {
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),
    #[error("the Livebox answered with HTTP status {0}")]
    Status(StatusCode),
    #[error("no data.IPAddress in the Livebox WAN status")]
    MissingAddress,
    #[error("the Livebox reported an invalid WAN IP: {0:?}")]
    InvalidAddress(String),
    #[error(transparent)]
    EncodeError(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use httptest::{all_of, Expectation, Server};
    use httptest::matchers::{contains, eq, json_decoded, request};
    use httptest::responders::{json_encoded, status_code};
    use serde_json::json;
    use crate::gateway::Resolver;
    use super::*;

    fn resolver(server: &Server) -> LiveboxResolver {
        LiveboxResolver::new(server.url_str("/ws")).unwrap()
    }

    #[tokio::test]
    async fn queries_wan_status() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/ws"),
                request::headers(contains(("content-type", WS_CONTENT_TYPE))),
                request::body(json_decoded(eq(json!({
                    "service": "NMC",
                    "method": "getWANStatus",
                    "parameters": {},
                })))),
            ])
            .respond_with(json_encoded(json!({
                "status": true,
                "data": {
                    "LinkType": "gpon",
                    "LinkState": "up",
                    "IPAddress": "5.6.7.8",
                    "IPv6Address": "2a01:cb00::1",
                },
            }))),
        );

        let ip = resolver(&server).wan_ip().await.unwrap();
        assert_eq!(ip, "5.6.7.8".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn missing_address() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/ws"))
                .respond_with(json_encoded(json!({"status": true, "data": {"LinkState": "down"}}))),
        );

        let err = resolver(&server).wan_ip().await.unwrap_err();
        assert!(matches!(err, LiveboxError::MissingAddress));
    }

    #[tokio::test]
    async fn invalid_address() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/ws"))
                .respond_with(json_encoded(json!({"data": {"IPAddress": ""}}))),
        );

        let err = resolver(&server).wan_ip().await.unwrap_err();
        assert!(matches!(err, LiveboxError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn status_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/ws"))
                .respond_with(status_code(500)),
        );

        let err = resolver(&server).wan_ip().await.unwrap_err();
        assert!(matches!(err, LiveboxError::Status(s) if s == StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn unreachable_gateway() {
        let resolver = LiveboxResolver::new("http://127.0.0.1:1/ws").unwrap();

        let err = resolver.wan_ip().await.unwrap_err();
        assert!(matches!(err, LiveboxError::ReqwestError(_)));
    }
}
