use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use url::Url;

use crate::error::ClientError;
use crate::model::ErrorBody;
use crate::progress::Progress;

/// Header carrying the caller's identity on every request.
pub const USERNAME_HEADER: &str = "x-username";

/// One HTTP round trip per call; no retries.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    progress: Arc<Progress>,
}

#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub body: Option<Bytes>,
}

impl Reply {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        let Some(body) = &self.body else {
            return Err(self.invalid("empty body"));
        };
        serde_json::from_slice(body).map_err(|e| self.invalid(e))
    }

    /// Like [`Reply::json`], but an absent body is not an error.
    pub fn json_opt<T: DeserializeOwned>(&self) -> Result<Option<T>, ClientError> {
        match &self.body {
            None => Ok(None),
            Some(_) => self.json().map(Some),
        }
    }

    fn invalid(&self, cause: impl std::fmt::Display) -> ClientError {
        ClientError::RequestFailed {
            status: self.status,
            message: format!("invalid response body: {cause}"),
        }
    }
}

impl Fetcher {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        max_concurrency: usize,
        progress: Option<Arc<Progress>>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build reqwest client")?;
        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            progress: progress.unwrap_or_else(Progress::disabled),
        })
    }

    pub async fn send(
        &self,
        method: Method,
        url: Url,
        username: Option<&str>,
    ) -> Result<Reply, ClientError> {
        self.execute(method, url, username, None).await
    }

    pub async fn send_json<T: Serialize>(
        &self,
        method: Method,
        url: Url,
        username: Option<&str>,
        body: &T,
    ) -> Result<Reply, ClientError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| ClientError::validation(format!("encode request body: {e}")))?;
        self.execute(method, url, username, Some(body)).await
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        username: Option<&str>,
        body: Option<Vec<u8>>,
    ) -> Result<Reply, ClientError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ClientError::NetworkUnreachable("request pool closed".to_string()))?;

        let mut req = self
            .client
            .request(method.clone(), url.clone())
            .header(ACCEPT, "application/json");
        if let Some(name) = username {
            req = req.header(USERNAME_HEADER, username_header_value(name)?);
        }
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").body(body);
        }

        self.progress.http_start(&method, &url);
        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.progress.http_err(&method, &url, None);
                tracing::debug!(%method, %url, error = %e, "request did not reach server");
                return Err(network_error(&method, &url, &e));
            }
        };

        let status = resp.status();
        tracing::debug!(%method, %url, %status, "response");

        let bytes = match resp.bytes().await {
            Ok(b) => b,
            Err(e) => {
                self.progress.http_err(&method, &url, Some(status.as_u16()));
                return Err(network_error(&method, &url, &e));
            }
        };

        if !status.is_success() {
            self.progress.http_err(&method, &url, Some(status.as_u16()));
            return Err(ClientError::RequestFailed {
                status: status.as_u16(),
                message: server_message(status, &bytes),
            });
        }

        self.progress
            .http_ok(&method, &url, status.as_u16(), bytes.len());

        // 204 never carries a body, whatever the declared content type says.
        let body = if status == StatusCode::NO_CONTENT || bytes.is_empty() {
            None
        } else {
            Some(bytes)
        };
        Ok(Reply {
            status: status.as_u16(),
            body,
        })
    }
}

fn network_error(method: &Method, url: &Url, e: &reqwest::Error) -> ClientError {
    let kind = if e.is_timeout() { "timed out" } else { "failed" };
    ClientError::NetworkUnreachable(format!("{method} {url} {kind}: {e}"))
}

/// Percent-escapes the identity so any name fits in a header value.
pub fn username_header_value(name: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(&urlencoding::encode(name))
        .map_err(|e| ClientError::validation(format!("username not usable as header: {e}")))
}

fn server_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| format!("Request failed with {}", status.as_u16()))
}
