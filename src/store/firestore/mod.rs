use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{StreamExt as _, TryStreamExt as _};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tracing::instrument;
use url::Url;

use super::{FirestoreSnafu, Result, StoreError, VideoRecord, VideoStore, VideoUpdate};

mod credentials;
mod document;

pub use credentials::{ServiceAccount, TokenSource};
pub use document::{CommitRequest, Document, ListDocumentsResponse, Value, Write};

const FIRESTORE_API: &str = "https://firestore.googleapis.com/v1/";

/// Documents requested per listing page.
const PAGE_SIZE: u32 = 300;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FirestoreError {
    #[snafu(display("credentials are not a valid service account key: {source}"))]
    CredentialsFormat { source: serde_json::Error },

    #[snafu(display("service account private key is not a valid RSA key: {source}"))]
    PrivateKey { source: jsonwebtoken::errors::Error },

    #[snafu(display("could not sign the token request: {source}"))]
    SignAssertion { source: jsonwebtoken::errors::Error },

    #[snafu(display("could not build the http client: {source}"))]
    HttpClient { source: reqwest::Error },

    #[snafu(display("invalid firestore endpoint `{endpoint}`: {source}"))]
    Endpoint {
        endpoint: String,
        source: url::ParseError,
    },

    #[snafu(display("could not reach the token endpoint: {source}"))]
    TokenRequest { source: reqwest::Error },

    #[snafu(display("malformed token response: {source}"))]
    TokenDecode { source: reqwest::Error },

    #[snafu(display("could not reach `{url}`: {source}"))]
    Request { url: Url, source: reqwest::Error },

    #[snafu(display("malformed response from `{url}`: {source}"))]
    Decode { url: Url, source: reqwest::Error },

    /// The server answered with a non-success status
    #[snafu(display("server answered {status}: {message}"))]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
}

impl FirestoreError {
    fn is_not_found(&self) -> bool {
        matches!(self, FirestoreError::Api { status: 404, .. })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorStatus,
}

#[derive(Debug, Deserialize)]
struct ErrorStatus {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Turn non-success responses into [FirestoreError::Api], keeping Google's error message when there is one.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, FirestoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(ErrorEnvelope { error }) => (error.status, error.message),
        Err(_) => (None, body),
    };

    ApiSnafu {
        status: status.as_u16(),
        code,
        message,
    }
    .fail()
}

/// Firestore accessed through its REST API with service account credentials.
#[derive(Debug)]
pub struct FirestoreStore {
    http: reqwest::Client,
    base: Url,
    project_id: String,
    database: String,
    tokens: TokenSource,
}

impl FirestoreStore {
    /// Build a store from a service account key blob. With `emulator_host` set, requests go to
    /// a local Firestore emulator and the key is never used for signing.
    pub fn from_credentials(
        blob: &str,
        database: &str,
        emulator_host: Option<&str>,
    ) -> Result<Self, FirestoreError> {
        let account = ServiceAccount::from_json(blob)?;
        let project_id = account.project_id.clone();

        let (endpoint, tokens) = match emulator_host {
            Some(host) => (format!("http://{host}/v1/"), TokenSource::Emulator),
            None => (
                FIRESTORE_API.to_string(),
                TokenSource::service_account(account.signer()?),
            ),
        };

        let base = Url::parse(&endpoint).context(EndpointSnafu { endpoint })?;

        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context(HttpClientSnafu)?;

        Ok(FirestoreStore {
            http,
            base,
            project_id,
            database: database.to_string(),
            tokens,
        })
    }

    fn documents_path(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database
        )
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{collection}/{id}", self.documents_path())
    }

    fn endpoint(&self, path: &str) -> Result<Url, FirestoreError> {
        self.base.join(path).context(EndpointSnafu { endpoint: path })
    }

    #[instrument(skip(self))]
    async fn list_page(
        &self,
        collection: &str,
        page_token: Option<&str>,
    ) -> Result<ListDocumentsResponse, FirestoreError> {
        let url = self.endpoint(&format!("{}/{collection}", self.documents_path()))?;
        let bearer = self.tokens.bearer(&self.http).await?;

        let mut query = vec![("pageSize", PAGE_SIZE.to_string())];
        for field in ["link", "title", "views", "likes", super::LAST_UPDATED] {
            query.push(("mask.fieldPaths", field.to_string()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let response = self
            .http
            .get(url.clone())
            .bearer_auth(bearer)
            .query(&query)
            .send()
            .await
            .context(RequestSnafu { url: url.clone() })?;

        let page: ListDocumentsResponse = check_status(response)
            .await?
            .json()
            .await
            .context(DecodeSnafu { url })?;

        tracing::debug!(documents = page.documents.len(), "listed a page of documents");
        Ok(page)
    }

    async fn commit(&self, request: &CommitRequest) -> Result<(), FirestoreError> {
        let url = self.endpoint(&format!("{}:commit", self.documents_path()))?;
        let bearer = self.tokens.bearer(&self.http).await?;

        let response = self
            .http
            .post(url.clone())
            .bearer_auth(bearer)
            .json(request)
            .send()
            .await
            .context(RequestSnafu { url })?;

        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl VideoStore for FirestoreStore {
    fn stream_all<'a>(&'a self, collection: &'a str) -> BoxStream<'a, Result<VideoRecord>> {
        // `None` once the last page has been read, `Some(token)` for the next page to fetch
        let pages = stream::try_unfold(Some(None), move |cursor: Option<Option<String>>| async move {
            let Some(page_token) = cursor else {
                return Ok::<_, StoreError>(None);
            };

            let page = self
                .list_page(collection, page_token.as_deref())
                .await
                .context(FirestoreSnafu)?;

            let next = page
                .next_page_token
                .filter(|token| !token.is_empty())
                .map(Some);

            Ok(Some((page.documents, next)))
        });

        pages
            .map_ok(|documents| stream::iter(documents.into_iter().map(Ok::<_, StoreError>)))
            .try_flatten()
            .map_ok(Document::into_record)
            .boxed()
    }

    #[instrument(skip(self))]
    async fn update(&self, collection: &str, id: &str, update: &VideoUpdate) -> Result<()> {
        let name = self.document_name(collection, id);
        let request = CommitRequest {
            writes: vec![Write::partial_update(name, update)],
        };

        match self.commit(&request).await {
            Ok(()) => Ok(()),
            Err(error) if error.is_not_found() => Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
            Err(source) => Err(StoreError::Firestore { source }),
        }
    }
}
