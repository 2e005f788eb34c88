use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;
use snafu::Snafu;

use crate::fetcher::Metrics;

pub mod firestore;
pub mod surreal;

pub use firestore::{FirestoreError, FirestoreStore};
pub use surreal::SurrealStore;

pub type Timestamp = DateTime<Utc>;

/// Field stamped with the store's clock on every successful write.
pub const LAST_UPDATED: &str = "last_updated";

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    /// The record does not exist, partial updates never create records
    #[snafu(display("video `{id}` does not exist in `{collection}`"))]
    NotFound { collection: String, id: String },

    #[snafu(display("firestore request failed: {source}"))]
    Firestore { source: FirestoreError },

    #[snafu(display("surrealdb request failed: {source}"))]
    Surreal { source: surrealdb::Error },
}

/// A tracked video as it is stored in the backing database.
///
/// Records are created by another process, this service only ever reads `id`
/// and `link` and writes `views`, `likes` and `last_updated`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VideoRecord {
    pub id: String,
    pub link: Option<String>,
    pub title: Option<String>,
    pub views: Option<u64>,
    pub likes: Option<u64>,
    pub last_updated: Option<Timestamp>,
}

impl VideoRecord {
    /// The link to refresh from, if the record has a non-blank one.
    pub fn link(&self) -> Option<&str> {
        self.link
            .as_deref()
            .map(str::trim)
            .filter(|link| !link.is_empty())
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("Unknown")
    }
}

/// The partial update written after a successful fetch.
///
/// `last_updated` is not part of the payload, each backend stamps it with its own clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoUpdate {
    pub views: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likes: Option<u64>,
}

impl From<&Metrics> for VideoUpdate {
    /// A missing view count is written as zero, a missing like count leaves the stored value alone.
    fn from(metrics: &Metrics) -> Self {
        VideoUpdate {
            views: metrics.views.unwrap_or(0),
            likes: metrics.likes,
        }
    }
}

impl VideoUpdate {
    /// Names of the counter fields this update writes.
    pub fn field_paths(&self) -> Vec<&'static str> {
        let mut paths = vec!["views"];
        if self.likes.is_some() {
            paths.push("likes");
        }
        paths
    }
}

#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Lazily enumerate every record of `collection`, in no particular order.
    fn stream_all<'a>(&'a self, collection: &'a str) -> BoxStream<'a, Result<VideoRecord>>;

    /// Apply a partial update to one existing record.
    async fn update(&self, collection: &str, id: &str, update: &VideoUpdate) -> Result<()>;
}

/// The store connection established at startup, or the reason it could not be.
#[derive(Clone)]
pub enum StoreHandle {
    Ready(Arc<dyn VideoStore>),
    Unavailable(Arc<str>),
}

impl StoreHandle {
    pub fn ready(store: impl VideoStore + 'static) -> Self {
        StoreHandle::Ready(Arc::new(store))
    }

    pub fn unavailable(reason: impl Into<Arc<str>>) -> Self {
        StoreHandle::Unavailable(reason.into())
    }

    pub fn get(&self) -> std::result::Result<&dyn VideoStore, &str> {
        match self {
            StoreHandle::Ready(store) => Ok(&**store),
            StoreHandle::Unavailable(reason) => Err(&**reason),
        }
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreHandle::Ready(_) => f.write_str("StoreHandle::Ready"),
            StoreHandle::Unavailable(reason) => {
                f.debug_tuple("StoreHandle::Unavailable").field(reason).finish()
            }
        }
    }
}
