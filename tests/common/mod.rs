#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::Utc;
use futures::stream::{self, BoxStream};
use futures::StreamExt as _;

use mamba_scraper::api::{create_router, App};
use mamba_scraper::extractor::{ExtractError, Extractor, VideoInfo};
use mamba_scraper::fetcher::MetadataFetcher;
use mamba_scraper::refresh::Refresher;
use mamba_scraper::store::{
    FirestoreError, StoreError, StoreHandle, VideoRecord, VideoStore, VideoUpdate,
};

/// An extractor answering from a fixed table and remembering every url it was asked about.
#[derive(Default)]
pub struct FakeExtractor {
    answers: Mutex<HashMap<String, VideoInfo>>,
    calls: Mutex<Vec<String>>,
}

impl FakeExtractor {
    pub fn answer(&self, url: &str, views: Option<u64>, likes: Option<u64>) {
        self.answers
            .lock()
            .unwrap()
            .insert(url.to_string(), VideoInfo::new(views, likes));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, url: &str) -> Result<VideoInfo, ExtractError> {
        self.calls.lock().unwrap().push(url.to_string());

        let answer = self.answers.lock().unwrap().get(url).cloned();
        answer.ok_or_else(|| ExtractError::Exit {
            code: Some(1),
            stderr: format!("ERROR: Unsupported URL: {url}"),
        })
    }
}

/// An in-memory store that applies updates the way the real backends do and logs every write.
#[derive(Default)]
pub struct RecordingStore {
    records: Mutex<BTreeMap<String, VideoRecord>>,
    writes: Mutex<Vec<(String, VideoUpdate)>>,
    read_only: Mutex<HashSet<String>>,
}

impl RecordingStore {
    pub fn with(records: impl IntoIterator<Item = VideoRecord>) -> Self {
        let store = RecordingStore::default();
        store
            .records
            .lock()
            .unwrap()
            .extend(records.into_iter().map(|record| (record.id.clone(), record)));
        store
    }

    /// Refuse every write to `id`, the way a security rule would.
    pub fn reject_writes(&self, id: &str) {
        self.read_only.lock().unwrap().insert(id.to_string());
    }

    pub fn record(&self, id: &str) -> Option<VideoRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn writes(&self) -> Vec<(String, VideoUpdate)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoStore for RecordingStore {
    fn stream_all<'a>(
        &'a self,
        _collection: &'a str,
    ) -> BoxStream<'a, Result<VideoRecord, StoreError>> {
        let snapshot: Vec<_> = self.records.lock().unwrap().values().cloned().collect();
        stream::iter(snapshot.into_iter().map(Ok)).boxed()
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        update: &VideoUpdate,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(id) else {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        };

        if self.read_only.lock().unwrap().contains(id) {
            return Err(StoreError::Firestore {
                source: FirestoreError::Api {
                    status: 403,
                    code: Some("PERMISSION_DENIED".to_string()),
                    message: "Missing or insufficient permissions.".to_string(),
                },
            });
        }

        record.views = Some(update.views);
        if let Some(likes) = update.likes {
            record.likes = Some(likes);
        }
        record.last_updated = Some(Utc::now());

        self.writes.lock().unwrap().push((id.to_string(), *update));
        Ok(())
    }
}

pub fn video(id: &str, link: Option<&str>) -> VideoRecord {
    VideoRecord {
        id: id.to_string(),
        link: link.map(str::to_string),
        title: Some(format!("Video {id}")),
        ..Default::default()
    }
}

pub fn server(store: StoreHandle, extractor: Arc<FakeExtractor>) -> TestServer {
    let refresher = Refresher::new(store, MetadataFetcher::new(extractor), "videos");
    let app = App::new(Arc::new(refresher), Arc::from("Mamba Scraper"));

    TestServer::new(create_router(app)).unwrap()
}
