use futures::TryStreamExt as _;
use serde::Serialize;
use snafu::{ensure, ResultExt as _, Snafu};
use tracing::instrument;

use crate::extractor::ExtractError;
use crate::fetcher::MetadataFetcher;
use crate::store::{StoreError, StoreHandle, VideoUpdate};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RefreshError {
    /// The store could not be set up at startup, nothing can be refreshed
    #[snafu(display("{reason}"))]
    NotConfigured { reason: String },

    #[snafu(display("missing required field `{field}`"))]
    MissingInput { field: &'static str },

    #[snafu(display("could not fetch stats for `{url}`: {source}"))]
    Fetch { url: String, source: ExtractError },

    #[snafu(display("could not update video `{id}`: {source}"))]
    Store { id: String, source: StoreError },

    #[snafu(display("could not list tracked videos: {source}"))]
    Enumerate { source: StoreError },
}

impl RefreshError {
    /// Whether the caller sent a bad request, as opposed to the service failing.
    pub fn is_client_error(&self) -> bool {
        matches!(self, RefreshError::MissingInput { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub updated: usize,
}

/// Counters written for a single video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Refreshed {
    pub views: u64,
    pub likes: Option<u64>,
}

/// Pulls fresh metrics for tracked videos and writes them back to the store.
#[derive(Debug, Clone)]
pub struct Refresher {
    store: StoreHandle,
    fetcher: MetadataFetcher,
    collection: String,
}

impl Refresher {
    pub fn new(store: StoreHandle, fetcher: MetadataFetcher, collection: impl Into<String>) -> Self {
        Refresher {
            store,
            fetcher,
            collection: collection.into(),
        }
    }

    /// Refresh every tracked video, one after another.
    ///
    /// Videos without a link, videos whose metadata cannot be fetched and videos whose write is
    /// rejected are skipped. Only an unusable store fails the whole run.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn refresh_all(&self) -> Result<RefreshSummary, RefreshError> {
        let store = self.store.get().map_err(not_configured)?;

        let mut videos = store.stream_all(&self.collection);
        let mut updated = 0;

        while let Some(video) = videos.try_next().await.context(EnumerateSnafu)? {
            let Some(link) = video.link() else {
                tracing::info!(video.id = %video.id, "skipping video without a link");
                continue;
            };

            tracing::info!(video.id = %video.id, "checking: {}...", video.title());

            let Ok(metrics) = self.fetcher.fetch(link).await else {
                tracing::info!(video.id = %video.id, url = %link, "skipping video, stats unavailable");
                continue;
            };

            let update = VideoUpdate::from(&metrics);
            match store.update(&self.collection, &video.id, &update).await {
                Ok(()) => {
                    tracing::info!(video.id = %video.id, ?update, "updated video stats");
                    updated += 1;
                }
                Err(error) => {
                    tracing::warn!(video.id = %video.id, %error, "could not write video stats");
                }
            }
        }

        tracing::info!(updated, "refreshed video stats");
        Ok(RefreshSummary { updated })
    }

    /// Refresh one video named by the caller.
    #[instrument(skip(self))]
    pub async fn refresh_one(&self, id: &str, url: &str) -> Result<Refreshed, RefreshError> {
        let id = id.trim();
        let url = url.trim();
        ensure!(!id.is_empty(), MissingInputSnafu { field: "id" });
        ensure!(!url.is_empty(), MissingInputSnafu { field: "url" });

        let store = self.store.get().map_err(not_configured)?;

        let metrics = self.fetcher.fetch(url).await.context(FetchSnafu { url })?;
        let update = VideoUpdate::from(&metrics);

        store
            .update(&self.collection, id, &update)
            .await
            .context(StoreSnafu { id })?;

        tracing::info!(video.id = %id, ?update, "updated video stats");

        Ok(Refreshed {
            views: update.views,
            likes: update.likes,
        })
    }
}

fn not_configured(reason: &str) -> RefreshError {
    RefreshError::NotConfigured {
        reason: reason.to_string(),
    }
}
