use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use url::Url;

use crate::api::App;
use crate::error::{ApplicationError, ConfigLoadSnafu};
use crate::extractor::YtDlp;
use crate::fetcher::MetadataFetcher;
use crate::refresh::Refresher;
use crate::store::surreal::ConnectError;
use crate::store::{FirestoreError, FirestoreStore, StoreHandle, SurrealStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Firestore,
    Surreal,
}

/// Process configuration, read from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default)]
    pub store_backend: StoreBackend,
    pub firebase_credentials: Option<SecretString>,
    #[serde(default = "default_firestore_database")]
    pub firestore_database: String,
    pub firestore_emulator_host: Option<String>,
    pub surreal_url: Option<Url>,
    #[serde(default = "default_video_collection")]
    pub video_collection: String,

    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: PathBuf,
    #[serde(default)]
    pub ytdlp_verbose: bool,

    pub log_dir: Option<PathBuf>,
}

fn default_port() -> u16 {
    10000
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_service_name() -> String {
    "Mamba Scraper".to_string()
}

fn default_firestore_database() -> String {
    "(default)".to_string()
}

fn default_video_collection() -> String {
    "videos".to_string()
}

fn default_ytdlp_path() -> PathBuf {
    PathBuf::from("yt-dlp")
}

#[derive(Debug, Snafu)]
pub enum StoreSetupError {
    #[snafu(display("Firebase credentials not configured"))]
    NoCredentials,

    #[snafu(display("SurrealDB url not configured"))]
    NoSurrealUrl,

    #[snafu(display("invalid Firebase credentials: {source}"))]
    Firestore { source: FirestoreError },

    #[snafu(display("{source}"))]
    Surreal { source: ConnectError },
}

impl Config {
    pub fn from_env() -> Result<Config, ApplicationError> {
        envy::from_env::<Config>().context(ConfigLoadSnafu)
    }

    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Connect to the configured store. A failure is logged and kept as the reason every refresh
    /// request will report, it never stops the process from starting.
    pub async fn store(&self) -> StoreHandle {
        match self.connect_store().await {
            Ok(store) => {
                tracing::info!(backend = ?self.store_backend, "connected to the video store");
                store
            }
            Err(error) => {
                tracing::warn!(backend = ?self.store_backend, %error, "video store unavailable, refreshing is disabled");
                StoreHandle::unavailable(error.to_string())
            }
        }
    }

    async fn connect_store(&self) -> Result<StoreHandle, StoreSetupError> {
        match self.store_backend {
            StoreBackend::Firestore => {
                let blob = self
                    .firebase_credentials
                    .as_ref()
                    .map(|blob| blob.expose_secret().as_str())
                    .filter(|blob| !blob.trim().is_empty())
                    .context(NoCredentialsSnafu)?;

                let store = FirestoreStore::from_credentials(
                    blob,
                    &self.firestore_database,
                    self.firestore_emulator_host.as_deref(),
                )
                .context(FirestoreSnafu)?;

                Ok(StoreHandle::ready(store))
            }
            StoreBackend::Surreal => {
                let url = self.surreal_url.as_ref().context(NoSurrealUrlSnafu)?;
                let store = SurrealStore::connect(url).await.context(SurrealSnafu)?;

                Ok(StoreHandle::ready(store))
            }
        }
    }

    pub fn fetcher(&self) -> MetadataFetcher {
        MetadataFetcher::new(Arc::new(YtDlp::new(
            self.ytdlp_path.clone(),
            self.ytdlp_verbose,
        )))
    }

    pub async fn app(&self) -> App {
        let refresher = Refresher::new(self.store().await, self.fetcher(), &self.video_collection);
        App::new(Arc::new(refresher), Arc::from(self.service_name.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, envy::Error> {
        envy::from_iter(vars.iter().map(|(key, val)| (key.to_string(), val.to_string())))
    }

    #[test]
    fn everything_has_a_default() {
        let config = config(&[]).unwrap();

        assert_eq!(config.address(), "0.0.0.0:10000".parse().unwrap());
        assert_eq!(config.service_name, "Mamba Scraper");
        assert_eq!(config.store_backend, StoreBackend::Firestore);
        assert_eq!(config.firestore_database, "(default)");
        assert_eq!(config.video_collection, "videos");
        assert_eq!(config.ytdlp_path, PathBuf::from("yt-dlp"));
        assert!(!config.ytdlp_verbose);
        assert!(config.firebase_credentials.is_none());
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            ("PORT", "8080"),
            ("HOST", "127.0.0.1"),
            ("STORE_BACKEND", "surreal"),
            ("SURREAL_URL", "mem://?ns=mamba&db=scraper"),
            ("YTDLP_VERBOSE", "true"),
        ])
        .unwrap();

        assert_eq!(config.address(), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.store_backend, StoreBackend::Surreal);
        assert!(config.surreal_url.is_some());
        assert!(config.ytdlp_verbose);
    }

    #[test]
    fn malformed_port_is_rejected() {
        assert!(config(&[("PORT", "ten thousand")]).is_err());
    }

    #[tokio::test]
    async fn missing_credentials_leave_the_store_unavailable() {
        let store = config(&[("FIREBASE_CREDENTIALS", "  ")]).unwrap().store().await;
        assert_eq!(store.get().err(), Some("Firebase credentials not configured"));
    }

    #[tokio::test]
    async fn broken_credentials_leave_the_store_unavailable() {
        let store = config(&[("FIREBASE_CREDENTIALS", "{not json")]).unwrap().store().await;
        let reason = store.get().err().unwrap();
        assert!(reason.starts_with("invalid Firebase credentials"));
    }

    #[tokio::test]
    async fn connects_to_an_embedded_surreal_store() {
        let store = config(&[
            ("STORE_BACKEND", "surreal"),
            ("SURREAL_URL", "mem://?ns=mamba&db=scraper"),
        ])
        .unwrap()
        .store()
        .await;

        assert!(store.get().is_ok());
    }
}
