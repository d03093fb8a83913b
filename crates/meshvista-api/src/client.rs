use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{ApiError, Result};
use crate::types::{
    Account, Device, Eero, Envelope, Forward, Network, NetworkDetails, Reservation, Speedtest,
};

/// Read-only view of the upstream mesh API used by collectors and migrations.
///
/// `is_authenticated` is a cheap local check (is a session token present);
/// the fetch methods may fail on transient network errors.
#[async_trait]
pub trait MeshApi: Send + Sync {
    fn is_authenticated(&self) -> bool;

    async fn networks(&self) -> Result<Vec<Network>>;

    async fn eeros(&self, network: &Network) -> Result<Vec<Eero>>;

    async fn devices(&self, network: &Network) -> Result<Vec<Device>>;

    async fn network_details(&self, network: &Network) -> Result<NetworkDetails>;

    /// Latest speed test for the network, if the mesh has run one.
    async fn speedtest(&self, network: &Network) -> Result<Option<Speedtest>> {
        Ok(self.network_details(network).await?.speed)
    }

    async fn reservations(&self, network: &Network) -> Result<Vec<Reservation>>;

    async fn forwards(&self, network: &Network) -> Result<Vec<Forward>>;
}

const API_VERSION_PREFIX: &str = "/2.2";

/// JSON-over-HTTPS client authenticated with the `s=<token>` session cookie.
pub struct HttpMeshApi {
    http: reqwest::Client,
    base_url: String,
    session_token: RwLock<Option<String>>,
}

impl HttpMeshApi {
    pub fn new(
        base_url: impl Into<String>,
        session_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("meshvista/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_token: RwLock::new(session_token.filter(|t| !t.is_empty())),
        })
    }

    /// Replace the session token (e.g. after the operator logs in again).
    pub fn set_session_token(&self, token: Option<String>) {
        let mut slot = self
            .session_token
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = token.filter(|t| !t.is_empty());
        info!(authenticated = slot.is_some(), "session token updated");
    }

    fn token(&self) -> Option<String> {
        self.session_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resource paths from payloads are absolute (`/2.2/...`); bare names get
    /// the version prefix.
    fn resolve(&self, path: &str) -> String {
        if path.starts_with(API_VERSION_PREFIX) {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}/{}", self.base_url, API_VERSION_PREFIX, path.trim_start_matches('/'))
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let token = self.token().ok_or(ApiError::NotAuthenticated)?;
        let url = self.resolve(path);
        debug!(%url, "GET");

        let resp = self
            .http
            .get(&url)
            .header(reqwest::header::COOKIE, format!("s={token}"))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.bytes().await?;
        let envelope: Envelope<T> = serde_json::from_slice(&body)?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl MeshApi for HttpMeshApi {
    fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    async fn networks(&self) -> Result<Vec<Network>> {
        let account: Account = self.get("account").await?;
        Ok(account.networks.data)
    }

    async fn eeros(&self, network: &Network) -> Result<Vec<Eero>> {
        self.get(&format!("{}/eeros", network.url)).await
    }

    async fn devices(&self, network: &Network) -> Result<Vec<Device>> {
        self.get(&format!("{}/devices", network.url)).await
    }

    async fn network_details(&self, network: &Network) -> Result<NetworkDetails> {
        self.get(&network.url).await
    }

    async fn reservations(&self, network: &Network) -> Result<Vec<Reservation>> {
        self.get(&format!("{}/reservations", network.url)).await
    }

    async fn forwards(&self, network: &Network) -> Result<Vec<Forward>> {
        self.get(&format!("{}/forwards", network.url)).await
    }
}
