use std::{ops::Deref, sync::Arc, time::Duration};

use bytes::Bytes;
use reqwest::{Client, ClientBuilder, IntoUrl, RequestBuilder, Response};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};

use crate::{DvrError, DvrResult};

/// Shared HTTP session.
///
/// Cloning is cheap and keeps the connection pool and the cookie store, so the
/// same value can be handed to the manifest locator and to every segment fetch.
/// Requests that fail to connect are retried with exponential backoff before
/// an error is reported.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    connect_retries: u32,
    backoff: Duration,
}

impl HttpClient {
    pub const DEFAULT_CONNECT_RETRIES: u32 = 5;
    pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

    pub fn new(builder: ClientBuilder) -> DvrResult<Self> {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = builder.cookie_provider(cookies_store).build()?;

        Ok(Self {
            client,
            connect_retries: Self::DEFAULT_CONNECT_RETRIES,
            backoff: Self::DEFAULT_BACKOFF,
        })
    }

    /// Configures the transport-level retry used by [HttpClient::send].
    pub fn with_connect_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.connect_retries = retries;
        self.backoff = backoff;
        self
    }

    /// Sends a request, retrying connection failures only.
    ///
    /// Non-success status codes are returned as [DvrError::HttpError].
    pub async fn send(&self, request: RequestBuilder) -> DvrResult<Response> {
        let mut retries = 0;
        loop {
            let attempt = request
                .try_clone()
                .ok_or_else(|| std::io::Error::other("request body can not be cloned"))?;
            match attempt.send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        tracing::debug!(url = %response.url(), %status, "Request failed");
                        return Err(DvrError::HttpError(status));
                    }
                    return Ok(response);
                }
                Err(e) if e.is_connect() && retries < self.connect_retries => {
                    let delay = self.backoff * 2u32.saturating_pow(retries);
                    retries += 1;
                    tracing::warn!("Connection failed, retry {retries} in {delay:?}. {e}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn get_bytes(&self, url: impl IntoUrl) -> DvrResult<Bytes> {
        let response = self.send(self.client.get(url)).await?;
        Ok(response.bytes().await?)
    }

    pub async fn get_text(&self, url: impl IntoUrl) -> DvrResult<String> {
        let response = self.send(self.client.get(url)).await?;
        Ok(response.text().await?)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = Client::builder()
            .cookie_provider(cookies_store)
            .build()
            .unwrap();

        Self {
            client,
            connect_retries: Self::DEFAULT_CONNECT_RETRIES,
            backoff: Self::DEFAULT_BACKOFF,
        }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
