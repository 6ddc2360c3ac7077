use std::borrow::Cow;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, IntoUrl, Request, Response, StatusCode, Url};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use super::Record;

pub const DEFAULT_API_URL: &str = "https://dns.api.gandi.net/api/v5/";

const API_KEY_HEADER: &str = "X-Api-Key";

/// Gandi LiveDNS client reading and overwriting a domain's record set.
#[derive(Debug)]
pub struct GandiProvider {
    base_url: Url,
    api_key: HeaderValue,
    client: Client,

    dry_run: bool,
}

impl GandiProvider {
    pub fn new<U: IntoUrl>(url: U, api_token: &str) -> Result<Self, GandiError> {
        if api_token.trim().is_empty() {
            return Err(GandiError::MissingToken);
        }
        let mut api_key = HeaderValue::from_str(api_token)
            .map_err(|_| GandiError::InvalidToken)?;
        api_key.set_sensitive(true);

        let mut base_url = url.into_url()?;
        if base_url.cannot_be_a_base() {
            return Err(GandiError::BadBaseUrl);
        }
        // Url::join drops the last segment unless the path ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            base_url,
            api_key,
            client: Client::new(),
            dry_run: false,
        })
    }

    pub fn dry_run(&self) -> &bool { &self.dry_run }
    pub fn dry_run_mut(&mut self) -> &mut bool { &mut self.dry_run }

    fn records_url(&self, domain: &str) -> Result<Url, GandiError> {
        Ok(self.base_url.join(&format!("domains/{domain}/records"))?)
    }

    /// Builds the request overwriting the records of `domain`. Dry runs log
    /// this request instead of sending it.
    fn write_request(&self, domain: &str, records: &[Record]) -> Result<Request, GandiError> {
        let body = serde_json::to_vec(&WritePayload { items: records })?;

        Ok(self.client.put(self.records_url(domain)?)
            .header(API_KEY_HEADER, self.api_key.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .build()?)
    }
}

#[async_trait::async_trait]
impl super::Provider for GandiProvider {
    type Error = GandiError;

    #[tracing::instrument(skip(self))]
    async fn list_records(&self, domain: &str) -> Result<Vec<Record>, Self::Error> {
        let response = self.client.get(self.records_url(domain)?)
            .header(API_KEY_HEADER, self.api_key.clone())
            .send()
            .await?;
        let records = error_for_status(response)
            .await?
            .json::<Vec<Record>>()
            .await?;

        debug!(?records, "got {} records from Gandi", records.len());

        Ok(records)
    }

    #[tracing::instrument(skip(self, records))]
    async fn replace_records(&self, domain: &str, records: &[Record]) -> Result<(), Self::Error> {
        let request = self.write_request(domain, records)?;

        if self.dry_run {
            let body = request.body()
                .and_then(|b| b.as_bytes())
                .map(String::from_utf8_lossy)
                .unwrap_or(Cow::Borrowed(""));
            info!(
                method = %request.method(),
                url = %request.url(),
                headers = ?request.headers(),
                %body,
                "dry run, not sending the update"
            );
            return Ok(());
        }

        error_for_status(self.client.execute(request).await?).await?;
        info!("records updated for domain {}", domain);

        Ok(())
    }
}

async fn error_for_status(response: Response) -> Result<Response, GandiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let reason = match body.trim() {
        "" => status.canonical_reason().unwrap_or("unknown reason").to_owned(),
        body => body.to_owned(),
    };

    Err(GandiError::Status { status, reason })
}

#[derive(Debug, Serialize)]
struct WritePayload<'a> {
    items: &'a [Record],
}

#[derive(Debug, Error)]
pub enum GandiError {
    #[error("the Gandi API token is not set")]
    MissingToken,
    #[error("the Gandi API token is not a valid header value")]
    InvalidToken,
    #[error("bad base url")]
    BadBaseUrl,
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),
    #[error("HTTP error: {status}: {reason}")]
    Status { status: StatusCode, reason: String },
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),
    #[error(transparent)]
    EncodeError(#[from] serde_json::Error),
}
