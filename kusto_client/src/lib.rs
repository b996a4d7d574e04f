//! HTTP client for the REST API of the analytical database service
//!
//! Covers the two endpoints the ingestion front-end talks to directly: the management endpoint,
//! used to list server-side ingestion mappings, and the streaming ingest endpoint.
pub mod format;
pub mod mgmt;

use std::string::FromUtf8Error;

use bytes::Bytes;
use reqwest::{Body, IntoUrl, Method, StatusCode, header::CONTENT_ENCODING};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use url::Url;
use uuid::Uuid;

pub use format::{DataFormat, ParseFormatError};
pub use mgmt::{MappingEntry, MgmtResponse, ResultTable};

/// Header carrying a caller-chosen id that the service logs against the request
pub const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// Primary error type for the [`Client`]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("base URL error: {0}")]
    BaseUrl(#[source] reqwest::Error),

    #[error("base URL '{0}' cannot carry a path")]
    CannotBeABase(String),

    #[error("request URL error: {0}")]
    RequestUrl(#[from] url::ParseError),

    #[error("failed to read the API response bytes: {0}")]
    Bytes(#[source] reqwest::Error),

    #[error("invalid UTF8 in response: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),

    #[error("failed to parse JSON response: {0}")]
    Json(#[source] reqwest::Error),

    #[error("failed to parse plaintext response: {0}")]
    Text(#[source] reqwest::Error),

    #[error("server responded with error [{code}]: {message}")]
    ApiError { code: StatusCode, message: String },

    #[error("failed to send {method} {url} request: {source}")]
    RequestSend {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("management command returned no result table")]
    NoResultTable,

    #[error("result table '{table}' has no column '{column}'")]
    MissingColumn { table: String, column: &'static str },

    #[error("row {row} has no string value in column '{column}'")]
    InvalidCell { row: usize, column: &'static str },
}

impl Error {
    fn request_send(method: Method, url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::RequestSend {
            method,
            url: url.into(),
            source,
        }
    }

    /// Whether sending the same request again could succeed
    ///
    /// Failures to reach the server, throttling and server-side errors are retryable; anything
    /// the server rejected as malformed, or that could not be decoded, is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestSend { .. } | Self::Bytes(_) => true,
            Self::ApiError { code, .. } => {
                *code == StatusCode::TOO_MANY_REQUESTS || code.is_server_error()
            }
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Client for the REST API of the service
///
/// Cheap to clone: clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct Client {
    /// The base URL of the service endpoint
    base_url: Url,
    /// The `Bearer` token to use for authenticating on each request to the server
    auth_token: Option<Secret<String>>,
    /// A [`reqwest::Client`] for handling HTTP requests
    http_client: reqwest::Client,
}

impl Client {
    /// Create a new [`Client`]
    pub fn new<U: IntoUrl>(base_url: U) -> Result<Self> {
        let base_url = base_url.into_url().map_err(Error::BaseUrl)?;
        if base_url.cannot_be_a_base() {
            return Err(Error::CannotBeABase(base_url.to_string()));
        }
        Ok(Self {
            base_url,
            auth_token: None,
            http_client: reqwest::Client::new(),
        })
    }

    /// Set the `Bearer` token that will be sent with each request to the server
    ///
    /// # Example
    /// ```
    /// # use kusto_client::Client;
    /// # fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    /// let token = "secret-token-string";
    /// let client = Client::new("https://cluster.example.net")?
    ///     .with_auth_token(token);
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_auth_token<S: Into<String>>(mut self, auth_token: S) -> Self {
        self.auth_token = Some(Secret::new(auth_token.into()));
        self
    }

    /// Use the given [`reqwest::Client`], e.g., one configured with a request timeout
    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// The service endpoint this client sends requests to
    pub fn endpoint(&self) -> &Url {
        &self.base_url
    }

    /// The authentication material sent with each request, if any
    pub fn auth_token(&self) -> Option<&Secret<String>> {
        self.auth_token.as_ref()
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token.expose_secret()),
            None => req,
        }
    }

    /// Compose a request to the `POST /v1/rest/mgmt` API
    ///
    /// # Example
    /// ```no_run
    /// # use kusto_client::Client;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    /// let client = Client::new("https://cluster.example.net")?;
    /// let response = client
    ///     .api_v1_rest_mgmt("db_name", ".show ingestion mappings")
    ///     .send()
    ///     .await
    ///     .expect("send mgmt request");
    /// # Ok(())
    /// # }
    /// ```
    pub fn api_v1_rest_mgmt<D: Into<String>, C: Into<String>>(
        &self,
        db: D,
        csl: C,
    ) -> MgmtRequestBuilder<'_> {
        MgmtRequestBuilder {
            client: self,
            db: db.into(),
            csl: csl.into(),
            client_request_id: None,
        }
    }

    /// Compose a request to the `POST /v1/rest/ingest/{db}/{table}` streaming API
    ///
    /// The body must already be gzip compressed.
    ///
    /// # Example
    /// ```no_run
    /// # use kusto_client::{Client, DataFormat};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    /// # let compressed: Vec<u8> = vec![];
    /// let client = Client::new("https://cluster.example.net")?;
    /// client
    ///     .api_v1_rest_ingest("db_name", "table_name")
    ///     .format(DataFormat::Json)
    ///     .mapping_name("json_mapping")
    ///     .gzip_body(compressed)
    ///     .send()
    ///     .await
    ///     .expect("send streaming ingest request");
    /// # Ok(())
    /// # }
    /// ```
    pub fn api_v1_rest_ingest<D: Into<String>, T: Into<String>>(
        &self,
        db: D,
        table: T,
    ) -> StreamIngestRequestBuilder<'_, NoBody> {
        StreamIngestRequestBuilder {
            client: self,
            db: db.into(),
            table: table.into(),
            format: DataFormat::Unknown,
            mapping_name: None,
            client_request_id: None,
            body: NoBody,
        }
    }

    /// List the ingestion mappings defined on `db`
    pub async fn show_ingestion_mappings(
        &self,
        db: impl Into<String> + Send,
    ) -> Result<Vec<MappingEntry>> {
        let resp = self
            .api_v1_rest_mgmt(db, ".show ingestion mappings")
            .send()
            .await?;
        let table = resp.primary_table().ok_or(Error::NoResultTable)?;
        MappingEntry::from_table(table)
    }
}

fn new_client_request_id(action: &str) -> String {
    format!("KIRS.{action};{}", Uuid::new_v4())
}

/// Body of a request to the `/v1/rest/mgmt` API
#[derive(Debug, Serialize)]
struct MgmtParams<'a> {
    db: &'a str,
    csl: &'a str,
}

/// Used to compose a request to the `/v1/rest/mgmt` API
///
/// Produced by [`Client::api_v1_rest_mgmt`]
#[derive(Debug)]
pub struct MgmtRequestBuilder<'c> {
    client: &'c Client,
    db: String,
    csl: String,
    client_request_id: Option<String>,
}

impl MgmtRequestBuilder<'_> {
    /// Set the client request id, otherwise one is generated
    pub fn client_request_id(mut self, id: impl Into<String>) -> Self {
        self.client_request_id = Some(id.into());
        self
    }

    /// Send the request to `/v1/rest/mgmt`
    pub async fn send(self) -> Result<MgmtResponse> {
        let api_path = "/v1/rest/mgmt";
        let url = self.client.base_url.join(api_path)?;
        let request_id = self
            .client_request_id
            .unwrap_or_else(|| new_client_request_id("execute"));
        let req = self
            .client
            .http_client
            .post(url)
            .header(CLIENT_REQUEST_ID_HEADER, request_id)
            .json(&MgmtParams {
                db: &self.db,
                csl: &self.csl,
            });
        let resp = self
            .client
            .authorize(req)
            .send()
            .await
            .map_err(|src| Error::request_send(Method::POST, api_path, src))?;

        match resp.status() {
            StatusCode::OK => resp.json().await.map_err(Error::Json),
            code => Err(Error::ApiError {
                code,
                message: resp.text().await.map_err(Error::Text)?,
            }),
        }
    }
}

/// Query parameters of a request to the `/v1/rest/ingest` API
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamIngestParams<'a> {
    stream_format: DataFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    mapping_name: Option<&'a str>,
}

/// Builder type for composing a request to `/v1/rest/ingest/{db}/{table}`
///
/// Produced by [`Client::api_v1_rest_ingest`]
#[derive(Debug)]
pub struct StreamIngestRequestBuilder<'c, B> {
    client: &'c Client,
    db: String,
    table: String,
    format: DataFormat,
    mapping_name: Option<String>,
    client_request_id: Option<String>,
    body: B,
}

impl<B> StreamIngestRequestBuilder<'_, B> {
    /// Set the format of the payload
    pub fn format(mut self, format: DataFormat) -> Self {
        self.format = format;
        self
    }

    /// Reference a mapping defined on the target table; an empty name is ignored
    pub fn mapping_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.mapping_name = (!name.is_empty()).then_some(name);
        self
    }

    /// Set the client request id, otherwise one is generated
    pub fn client_request_id(mut self, id: impl Into<String>) -> Self {
        self.client_request_id = Some(id.into());
        self
    }
}

impl<'c> StreamIngestRequestBuilder<'c, NoBody> {
    /// Set the gzip compressed payload of the request
    pub fn gzip_body<T: Into<Body>>(self, body: T) -> StreamIngestRequestBuilder<'c, Body> {
        StreamIngestRequestBuilder {
            client: self.client,
            db: self.db,
            table: self.table,
            format: self.format,
            mapping_name: self.mapping_name,
            client_request_id: self.client_request_id,
            body: body.into(),
        }
    }
}

impl StreamIngestRequestBuilder<'_, Body> {
    /// Send the request to the server
    pub async fn send(self) -> Result<()> {
        let api_path = "/v1/rest/ingest";
        let mut url = self.client.base_url.join(api_path)?;
        url.path_segments_mut()
            .map_err(|_| Error::CannotBeABase(self.client.base_url.to_string()))?
            .push(&self.db)
            .push(&self.table);
        let params = StreamIngestParams {
            stream_format: self.format,
            mapping_name: self.mapping_name.as_deref(),
        };
        let request_id = self
            .client_request_id
            .unwrap_or_else(|| new_client_request_id("stream"));
        let req = self
            .client
            .http_client
            .post(url)
            .query(&params)
            .header(CONTENT_ENCODING, "gzip")
            .header(CLIENT_REQUEST_ID_HEADER, request_id);
        let resp = self
            .client
            .authorize(req)
            .body(self.body)
            .send()
            .await
            .map_err(|src| Error::request_send(Method::POST, api_path, src))?;
        let status = resp.status();
        let content: Bytes = resp.bytes().await.map_err(Error::Bytes)?;
        match status {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            code => Err(Error::ApiError {
                code,
                message: String::from_utf8(content.to_vec())?,
            }),
        }
    }
}

#[doc(hidden)]
/// Typestate type for [`StreamIngestRequestBuilder`]
#[derive(Debug, Copy, Clone)]
pub struct NoBody;
