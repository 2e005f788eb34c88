use std::sync::Arc;

use derive_new::new;
use serde::Serialize;
use tracing::instrument;

use crate::extractor::{ExtractError, Extractor};

/// Engagement counters reported for a video, either may be unavailable on the source platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, new)]
pub struct Metrics {
    pub views: Option<u64>,
    pub likes: Option<u64>,
}

#[derive(Clone, new)]
pub struct MetadataFetcher {
    extractor: Arc<dyn Extractor>,
}

impl MetadataFetcher {
    /// Query the extractor for `url`. Failures are logged here and handed back as a value,
    /// callers decide whether to skip or report them.
    #[instrument(skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<Metrics, ExtractError> {
        tracing::info!(%url, "fetching video metadata");

        match self.extractor.extract(url).await {
            Ok(info) => {
                let metrics = Metrics::new(info.view_count, info.like_count);
                tracing::debug!(%url, ?metrics, "fetched video metadata");
                Ok(metrics)
            }
            Err(error) => {
                tracing::warn!(%url, %error, "error fetching video metadata");
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for MetadataFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataFetcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::extractor::VideoInfo;

    struct Fixed(Result<VideoInfo, String>);

    #[async_trait]
    impl Extractor for Fixed {
        async fn extract(&self, _url: &str) -> Result<VideoInfo, ExtractError> {
            self.0.clone().map_err(|stderr| ExtractError::Exit {
                code: Some(1),
                stderr,
            })
        }
    }

    #[tokio::test]
    async fn normalizes_extractor_output() {
        let fetcher = MetadataFetcher::new(Arc::new(Fixed(Ok(VideoInfo::new(Some(7), None)))));
        let metrics = fetcher.fetch("https://example.com/v").await.unwrap();
        assert_eq!(metrics, Metrics::new(Some(7), None));
    }

    #[tokio::test]
    async fn extractor_failures_are_returned() {
        let fetcher = MetadataFetcher::new(Arc::new(Fixed(Err("blocked".into()))));
        let error = fetcher.fetch("https://example.com/v").await.unwrap_err();
        assert_eq!(error.to_string(), "extractor exited with code 1: blocked");
    }
}
