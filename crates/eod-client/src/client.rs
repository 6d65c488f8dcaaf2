//! Main client implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eod_engine::{
    HistoryEvent, JobHandle, JobSubmission, RemotePlatform, RemoteResult, TransferHandle,
};
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::token::{Credentials, TokenManager};
use crate::types::{Envelope, FileResource, JobResource, Links, ManageAction};

/// Default timeout for API calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for file uploads and downloads.
const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

pub const DEFAULT_STORAGE_SYSTEM: &str = "data.iplantcollaborative.org";

/// Agave v2 API client.
///
/// Cheap to clone; clones share the HTTP pool and the token cache.
///
/// ```no_run
/// use eod_client::AgaveClient;
///
/// # async fn example() -> eod_client::Result<()> {
/// let client = AgaveClient::builder()
///     .base_url("https://agave.iplantc.org")
///     .refresh_credentials("key", "secret", "refresh-token")
///     .build()?;
/// client.mkdir("/jdoe/wf/align/inputs/query/0").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct AgaveClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    http: reqwest::Client,
    base_url: Url,
    storage_system: String,
    tokens: TokenManager,
    timeout: Duration,
    transfer_timeout: Duration,
}

impl AgaveClient {
    pub fn builder() -> AgaveClientBuilder {
        AgaveClientBuilder::new()
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn storage_system(&self) -> &str {
        &self.inner.storage_system
    }

    pub async fn access_token(&self) -> Result<String> {
        self.inner.tokens.access_token().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Jobs
    // ─────────────────────────────────────────────────────────────────────────

    /// Submit a job; the handle carries its history URL.
    pub async fn submit(&self, job: &JobSubmission) -> Result<JobHandle> {
        let url = self.url("jobs/v2/")?;
        let response = self
            .inner
            .http
            .post(url)
            .bearer_auth(self.access_token().await?)
            .json(job)
            .timeout(self.inner.timeout)
            .send()
            .await?;
        let job: JobResource = self.handle_response(response).await?;
        let status_url = history_href(job.links, "job submission")?;
        info!(job_id = %job.id, "Job accepted");
        Ok(JobHandle {
            id: job.id,
            status_url,
        })
    }

    /// Status history of a job or transfer. Relative URLs resolve against
    /// the base URL.
    pub async fn history(&self, url: &str) -> Result<Vec<HistoryEvent>> {
        let url = self.inner.base_url.join(url)?;
        let response = self
            .inner
            .http
            .get(url)
            .bearer_auth(self.access_token().await?)
            .timeout(self.inner.timeout)
            .send()
            .await?;
        self.handle_response(response).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────

    /// Upload a local file into `remote_dir` on the storage system.
    pub async fn import(&self, local: &Path, remote_dir: &str) -> Result<TransferHandle> {
        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Config(format!("'{}' has no file name", local.display())))?;
        let bytes = tokio::fs::read(local).await.map_err(|source| Error::Io {
            path: local.to_path_buf(),
            source,
        })?;
        let size = bytes.len();
        let form = Form::new()
            .text("fileName", file_name.clone())
            .part("fileToUpload", Part::bytes(bytes).file_name(file_name));

        let url = self.media_url(&self.inner.storage_system, remote_dir)?;
        debug!(local = %local.display(), url = %url, bytes = size, "Uploading file");
        let response = self
            .inner
            .http
            .post(url)
            .bearer_auth(self.access_token().await?)
            .multipart(form)
            .timeout(self.inner.transfer_timeout)
            .send()
            .await?;
        let file: FileResource = self.handle_response(response).await?;
        Ok(TransferHandle {
            status_url: history_href(file.links, "file upload")?,
        })
    }

    /// Download `remote` to `local`.
    ///
    /// `agave://<system>//<path>` goes through the files API; plain
    /// `http(s)://` URIs are fetched directly, with credentials only when
    /// they point at the API host.
    pub async fn fetch(&self, remote: &str, local: &Path) -> Result<()> {
        let (url, authenticated) = self.resolve_uri(remote)?;
        let mut request = self
            .inner
            .http
            .get(url.clone())
            .timeout(self.inner.transfer_timeout);
        if authenticated {
            request = request.bearer_auth(self.access_token().await?);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(self.extract_error(response).await);
        }

        let io = |source| Error::Io {
            path: local.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(local).await.map_err(io)?;
        let mut body = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            written += chunk.len();
            file.write_all(&chunk).await.map_err(io)?;
        }
        file.flush().await.map_err(io)?;
        debug!(url = %url, local = %local.display(), bytes = written, "Downloaded file");
        Ok(())
    }

    /// Create a directory (and its parents) on the storage system.
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let url = self.media_url(&self.inner.storage_system, "")?;
        let body = ManageAction {
            action: "mkdir",
            path: path.trim_start_matches('/'),
        };
        let response = self
            .inner
            .http
            .put(url)
            .bearer_auth(self.access_token().await?)
            .json(&body)
            .timeout(self.inner.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.extract_error(response).await);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal HTTP helpers
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        Ok(self.inner.base_url.join(path.trim_start_matches('/'))?)
    }

    fn media_url(&self, system: &str, path: &str) -> Result<Url> {
        self.url(&format!(
            "files/v2/media/system/{system}/{}",
            path.trim_start_matches('/')
        ))
    }

    fn resolve_uri(&self, remote: &str) -> Result<(Url, bool)> {
        let uri = Url::parse(remote)?;
        match uri.scheme() {
            eod_engine::remote::REMOTE_SCHEME => {
                let system = uri
                    .host_str()
                    .ok_or_else(|| Error::Config(format!("'{remote}' names no storage system")))?;
                Ok((self.media_url(system, uri.path())?, true))
            }
            "http" | "https" => {
                let same_host = uri.host_str() == self.inner.base_url.host_str()
                    && uri.port_or_known_default() == self.inner.base_url.port_or_known_default();
                Ok((uri, same_host))
            }
            other => Err(Error::Config(format!(
                "cannot download '{remote}': unsupported scheme '{other}'"
            ))),
        }
    }

    /// Unwrap the `result` of a success envelope.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            return Err(self.extract_error(response).await);
        }
        let url = response.url().to_string();
        let envelope: Envelope<T> = response.json().await?;
        envelope
            .into_result()
            .ok_or_else(|| Error::Malformed(format!("response from {url} has no result")))
    }

    async fn extract_error(&self, response: reqwest::Response) -> Error {
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();

        let message = serde_json::from_str::<Envelope<serde_json::Value>>(&body)
            .ok()
            .and_then(|e| e.message)
            .unwrap_or_else(|| match body.trim() {
                "" => format!("HTTP {status}"),
                text => text.to_string(),
            });

        if status == 401 {
            self.inner.tokens.invalidate().await;
            Error::Auth(message)
        } else {
            Error::Api {
                status,
                url,
                message,
            }
        }
    }
}

fn history_href(links: Option<Links>, what: &str) -> Result<String> {
    links
        .and_then(|l| l.history)
        .map(|h| h.href)
        .ok_or_else(|| Error::Malformed(format!("{what} response has no history link")))
}

#[async_trait]
impl RemotePlatform for AgaveClient {
    async fn current_access_token(&self) -> RemoteResult<String> {
        Ok(self.access_token().await?)
    }

    async fn submit_job(&self, job: &JobSubmission) -> RemoteResult<JobHandle> {
        Ok(self.submit(job).await?)
    }

    async fn upload(&self, local: &Path, remote_dir: &str) -> RemoteResult<TransferHandle> {
        Ok(self.import(local, remote_dir).await?)
    }

    async fn download(&self, remote: &str, local: &Path) -> RemoteResult<()> {
        Ok(self.fetch(remote, local).await?)
    }

    async fn make_dir(&self, path: &str) -> RemoteResult<()> {
        Ok(self.mkdir(path).await?)
    }

    async fn status_history(&self, url: &str) -> RemoteResult<Vec<HistoryEvent>> {
        Ok(self.history(url).await?)
    }
}

/// Builder for an [`AgaveClient`].
#[derive(Debug)]
pub struct AgaveClientBuilder {
    base_url: Option<String>,
    storage_system: String,
    credentials: Option<Credentials>,
    verify_tls: bool,
    timeout: Duration,
    transfer_timeout: Duration,
    user_agent: Option<String>,
}

impl AgaveClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            storage_system: DEFAULT_STORAGE_SYSTEM.to_string(),
            credentials: None,
            verify_tls: true,
            timeout: DEFAULT_TIMEOUT,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            user_agent: None,
        }
    }

    /// API server, e.g. `https://agave.iplantc.org`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn storage_system(mut self, system: impl Into<String>) -> Self {
        self.storage_system = system.into();
        self
    }

    /// Authenticate with a fixed bearer token.
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::Static(token.into()));
        self
    }

    /// Authenticate by exchanging a refresh token with the API key pair.
    pub fn refresh_credentials(
        mut self,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials::Refresh {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            refresh_token: refresh_token.into(),
        });
        self
    }

    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<AgaveClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Config("base_url is required".to_string()))?;
        let credentials = self.credentials.ok_or_else(|| {
            Error::Config("an access token or refresh credentials are required".to_string())
        })?;
        if self.storage_system.trim().is_empty() {
            return Err(Error::Config("storage system cannot be empty".to_string()));
        }

        let mut base_url = Url::parse(&base_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("eod-client/{}", env!("CARGO_PKG_VERSION")));
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .danger_accept_invalid_certs(!self.verify_tls)
            .build()?;

        let tokens = TokenManager::new(http.clone(), base_url.join("token")?, credentials);

        Ok(AgaveClient {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                storage_system: self.storage_system,
                tokens,
                timeout: self.timeout,
                transfer_timeout: self.transfer_timeout,
            }),
        })
    }
}

impl Default for AgaveClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
