use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{StreamExt as _, TryStreamExt as _};
use serde::Deserialize;
use snafu::{ensure, OptionExt as _, ResultExt as _, Snafu};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth;
use surrealdb::sql::{Datetime, Thing};
use surrealdb::Surreal;
use tracing::instrument;
use url::Url;

use super::{
    NotFoundSnafu, Result, StoreError, SurrealSnafu, VideoRecord, VideoStore, VideoUpdate,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConnectError {
    #[snafu(display("url `{url}` is missing a namespace parameter (ns)"))]
    NoNamespace { url: Url },

    #[snafu(display("url `{url}` is missing a database parameter (db)"))]
    NoDatabase { url: Url },

    #[snafu(display("cannot connect to the database `{address}`: {source}"))]
    Connection {
        address: String,
        source: surrealdb::Error,
    },
}

/// Where to connect and what to sign in as, read from a url such as
/// `ws://user:pass@localhost:8000?ns=mamba&db=scraper` or `mem://?ns=mamba&db=scraper`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub address: String,
    pub namespace: String,
    pub database: String,
    pub credentials: Option<(String, String)>,
}

impl TryFrom<&Url> for Target {
    type Error = ConnectError;

    fn try_from(url: &Url) -> std::result::Result<Self, Self::Error> {
        let mut query: HashMap<String, String> = url
            .query_pairs()
            .map(|(key, val)| (key.to_string(), val.to_string()))
            .collect();

        let namespace = query
            .remove("ns")
            .context(NoNamespaceSnafu { url: url.clone() })?;

        let database = query
            .remove("db")
            .context(NoDatabaseSnafu { url: url.clone() })?;

        let credentials = Some(url.username())
            .filter(|username| !username.is_empty())
            .map(|username| (username.to_string(), url.password().unwrap_or("").to_string()));

        // the engine only understands the bare endpoint
        let mut endpoint = url.clone();
        endpoint.set_query(None);
        let _ = endpoint.set_username("");
        let _ = endpoint.set_password(None);

        Ok(Target {
            address: endpoint.to_string(),
            namespace,
            database,
            credentials,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SurrealVideo {
    id: Thing,
    link: Option<String>,
    title: Option<String>,
    views: Option<u64>,
    likes: Option<u64>,
    last_updated: Option<Datetime>,
}

impl From<SurrealVideo> for VideoRecord {
    fn from(video: SurrealVideo) -> Self {
        VideoRecord {
            id: video.id.id.to_raw(),
            link: video.link,
            title: video.title,
            views: video.views,
            likes: video.likes,
            last_updated: video.last_updated.map(|timestamp| timestamp.0),
        }
    }
}

/// Records requested per listing page.
const PAGE_SIZE: usize = 300;

const SELECT_PAGE: &str = "SELECT * FROM type::table($table) ORDER BY id LIMIT $limit START $start";

/// Likes are coalesced with the stored value so an unknown count never erases a known one.
const UPDATE_VIDEO: &str = "UPDATE type::thing($table, $id) SET views = $views, likes = $likes ?? likes, last_updated = time::now() RETURN NONE";

/// A SurrealDB table used as the video store.
#[derive(Debug, Clone)]
pub struct SurrealStore {
    database: Surreal<Any>,
    page_size: usize,
}

impl SurrealStore {
    pub async fn connect(url: &Url) -> std::result::Result<Self, ConnectError> {
        let target = Target::try_from(url)?;
        let address = target.address.clone();

        let database = surrealdb::engine::any::connect(target.address.as_str())
            .await
            .context(ConnectionSnafu {
                address: address.clone(),
            })?;

        if let Some((username, password)) = &target.credentials {
            database
                .signin(auth::Root { username, password })
                .await
                .context(ConnectionSnafu {
                    address: address.clone(),
                })?;
        }

        database
            .use_ns(&target.namespace)
            .use_db(&target.database)
            .await
            .context(ConnectionSnafu { address })?;

        Ok(SurrealStore {
            database,
            page_size: PAGE_SIZE,
        })
    }

    #[instrument(skip(self))]
    async fn select_page(&self, collection: &str, start: usize) -> Result<Vec<SurrealVideo>> {
        let mut response = self
            .database
            .query(SELECT_PAGE)
            .bind(("table", collection))
            .bind(("limit", self.page_size))
            .bind(("start", start))
            .await
            .context(SurrealSnafu)?;

        let page: Vec<SurrealVideo> = response.take(0).context(SurrealSnafu)?;
        tracing::debug!(records = page.len(), "listed a page of records");
        Ok(page)
    }
}

#[async_trait]
impl VideoStore for SurrealStore {
    fn stream_all<'a>(&'a self, collection: &'a str) -> BoxStream<'a, Result<VideoRecord>> {
        // offset of the next page, `None` once a short page has been read
        let pages = stream::try_unfold(Some(0), move |cursor: Option<usize>| async move {
            let Some(start) = cursor else {
                return Ok::<_, StoreError>(None);
            };

            let page = self.select_page(collection, start).await?;
            let next = (page.len() == self.page_size).then_some(start + page.len());

            Ok(Some((page, next)))
        });

        pages
            .map_ok(|videos| stream::iter(videos.into_iter().map(Ok::<_, StoreError>)))
            .try_flatten()
            .map_ok(VideoRecord::from)
            .boxed()
    }

    #[instrument(skip(self))]
    async fn update(&self, collection: &str, id: &str, update: &VideoUpdate) -> Result<()> {
        let existing: Option<SurrealVideo> = self
            .database
            .select((collection, id))
            .await
            .context(SurrealSnafu)?;

        ensure!(existing.is_some(), NotFoundSnafu { collection, id });

        self.database
            .query(UPDATE_VIDEO)
            .bind(("table", collection))
            .bind(("id", id))
            .bind(("views", update.views))
            .bind(("likes", update.likes))
            .await
            .and_then(|response| response.check())
            .context(SurrealSnafu)?;

        Ok(())
    }
}
