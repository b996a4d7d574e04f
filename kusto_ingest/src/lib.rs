//! Ingestion into a table of a hosted analytical database
//!
//! An [`Ingestion`] client is bound to one database table and offers three ways in:
//!
//! - [`Ingestion::from_file`] stages a local file or a blob for queued ingestion,
//! - [`Ingestion::from_reader`] compresses and stages the contents of a reader,
//! - [`Ingestion::stream`] sends a small payload through low-latency streaming ingestion.
//!
//! Everything that can be checked locally is checked before any data leaves the process,
//! including references to server-side ingestion mappings, which are looked up in a cache of
//! the mappings defined on the server.
use std::{io::Read, sync::Arc, time::Duration};

use flate2::{Compression, read::GzEncoder};
use iox_time::{SystemProvider, TimeProvider};
use observability_deps::tracing::{debug, warn};

pub mod config;
mod deadline;
pub mod error;
mod lazy;
pub mod manager;
pub mod mappings;
pub mod options;
pub mod properties;
pub mod source;
pub mod staging;
pub mod stream;

pub use error::{Error, ErrorKind, Op, Result};
pub use kusto_client::{Client, DataFormat, MappingEntry};
pub use manager::{ManagerRegistry, ResourceManager};
pub use options::{
    IngestOption, MappingValue, ValidationImplication, ValidationOption, ValidationPolicy,
};
pub use properties::{AuthContext, IngestionProperties};

use crate::{
    deadline::bounded,
    mappings::{MappingCache, MappingSource},
    options::fold_options,
    source::FileSource,
    staging::Stager,
    stream::{BufferPool, Connector, HttpConnector, StreamConnHolder},
};

/// The number of idle compression buffers an ingestion client keeps by default
pub const DEFAULT_STREAM_BUFFER_POOL: usize = 16;

/// Ingests data into one table
///
/// Safe to share between tasks; every entry point can be called concurrently.
#[derive(Debug)]
pub struct Ingestion {
    database: String,
    table: String,
    manager: Arc<dyn ResourceManager>,
    stager: Arc<dyn Stager>,
    mappings: MappingCache,
    stream_conn: StreamConnHolder,
    buffers: Arc<BufferPool>,
    request_timeout: Option<Duration>,
}

impl Ingestion {
    pub fn builder(
        client: Client,
        database: impl Into<String>,
        table: impl Into<String>,
        registry: Arc<ManagerRegistry>,
        stager: Arc<dyn Stager>,
    ) -> IngestionBuilder {
        IngestionBuilder::new(client, database, table, registry, stager)
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Stage a local file or a blob for queued ingestion
    ///
    /// `path` is a blob if it is an `http(s)` URI, otherwise a local file path or `file` URI.
    pub async fn from_file(&self, path: &str, options: &[IngestOption]) -> Result<()> {
        self.ingest_file(path, options)
            .await
            .map_err(|e| e.with_op(Op::FileIngest))
    }

    async fn ingest_file(&self, path: &str, options: &[IngestOption]) -> Result<()> {
        let props = fold_options(self.base_properties(), options)?;
        let source = FileSource::classify(path)?;
        if let FileSource::Local(local) = &source {
            FileSource::check_local(local).await?;
        }
        if let Some(reference) = props.mapping_ref() {
            self.mappings.ensure_known(reference).await?;
        }
        let props = self.authorize(props, Op::FileIngest).await?;

        let format = match (props.format(), &source) {
            (f, FileSource::Local(local)) if f.is_unknown() => DataFormat::from_path(local),
            (f, FileSource::Blob(uri)) if f.is_unknown() => DataFormat::from_path(uri.path()),
            (f, _) => f,
        };
        match source {
            FileSource::Local(local) => {
                debug!(
                    path = %local.display(),
                    %format,
                    table = %self.table,
                    "staging local file"
                );
                bounded(
                    self.request_timeout,
                    Op::FileIngest,
                    self.stager.upload_local(&local, &props),
                )
                .await
            }
            FileSource::Blob(uri) => {
                debug!(host = uri.host_str(), %format, table = %self.table, "queueing blob");
                bounded(
                    self.request_timeout,
                    Op::FileIngest,
                    self.stager.upload_blob(&uri, 0, &props),
                )
                .await
            }
        }
    }

    /// Compress and stage everything `reader` produces for queued ingestion
    ///
    /// The data must not be compressed already, and its format has to be given with
    /// [`IngestOption::FileFormat`] since there is no file name to infer it from.
    pub async fn from_reader<R>(&self, reader: R, options: &[IngestOption]) -> Result<()>
    where
        R: Read + Send + 'static,
    {
        self.ingest_reader(reader, options)
            .await
            .map_err(|e| e.with_op(Op::ReaderIngest))
    }

    async fn ingest_reader<R>(&self, reader: R, options: &[IngestOption]) -> Result<()>
    where
        R: Read + Send + 'static,
    {
        let props = fold_options(self.base_properties(), options)?;
        if props.format().is_unknown() {
            return Err(Error::new(Op::ReaderIngest, ErrorKind::MissingFormat));
        }
        if props.source.delete_local_source {
            return Err(Error::new(Op::ReaderIngest, ErrorKind::DeleteSourceWithReader));
        }
        if let Some(reference) = props.mapping_ref() {
            self.mappings.ensure_known(reference).await?;
        }
        let props = self.authorize(props, Op::ReaderIngest).await?;

        debug!(format = %props.format(), table = %self.table, "staging reader");
        let compressed = Box::new(GzEncoder::new(reader, Compression::default()));
        bounded(
            self.request_timeout,
            Op::ReaderIngest,
            self.stager.upload_stream(compressed, &props),
        )
        .await
    }

    /// Send one complete payload in `format` through streaming ingestion
    ///
    /// `mapping_name` references a mapping defined on the server and may be empty. The payload
    /// is compressed before sending and must come to at most
    /// [`MAX_STREAM_SIZE`](stream::MAX_STREAM_SIZE) bytes compressed.
    pub async fn stream(
        &self,
        payload: &[u8],
        format: DataFormat,
        mapping_name: &str,
    ) -> Result<()> {
        self.stream_payload(payload, format, mapping_name)
            .await
            .map_err(|e| e.with_op(Op::StreamIngest))
    }

    async fn stream_payload(
        &self,
        payload: &[u8],
        format: DataFormat,
        mapping_name: &str,
    ) -> Result<()> {
        if !format.is_streamable() {
            let kind = ErrorKind::UnsupportedStreamFormat(format);
            return Err(Error::new(Op::StreamIngest, kind));
        }
        self.mappings.ensure_known(mapping_name).await?;
        let conn = self.stream_conn.get()?;

        let mut buf = self.buffers.get();
        stream::compress_payload(payload, &mut buf)?;
        debug!(
            raw_bytes = payload.len(),
            compressed_bytes = buf.len(),
            %format,
            table = %self.table,
            "streaming payload"
        );
        if let Err(e) = stream::check_stream_size(buf.len()) {
            warn!(
                compressed_bytes = buf.len(),
                table = %self.table,
                "rejecting oversized stream payload"
            );
            return Err(e);
        }

        bounded(
            self.request_timeout,
            Op::StreamIngest,
            conn.write(&self.database, &self.table, &buf, format, mapping_name),
        )
        .await
    }

    fn base_properties(&self) -> IngestionProperties {
        IngestionProperties::new(&self.database, &self.table)
    }

    /// Stamp fresh authorization material from the resource manager onto `props`
    async fn authorize(&self, props: IngestionProperties, op: Op) -> Result<IngestionProperties> {
        let auth = bounded(self.request_timeout, op, self.manager.auth_context()).await?;
        Ok(props.with_auth_context(auth))
    }
}

/// Builds an [`Ingestion`] client
///
/// Collaborators that are not set explicitly talk to the service through the given [`Client`].
#[derive(Debug)]
pub struct IngestionBuilder {
    client: Client,
    database: String,
    table: String,
    registry: Arc<ManagerRegistry>,
    stager: Arc<dyn Stager>,
    mapping_source: Option<Arc<dyn MappingSource>>,
    connector: Option<Arc<dyn Connector>>,
    time_provider: Option<Arc<dyn TimeProvider>>,
    request_timeout: Option<Duration>,
    stream_buffer_pool: usize,
}

impl IngestionBuilder {
    pub fn new(
        client: Client,
        database: impl Into<String>,
        table: impl Into<String>,
        registry: Arc<ManagerRegistry>,
        stager: Arc<dyn Stager>,
    ) -> Self {
        Self {
            client,
            database: database.into(),
            table: table.into(),
            registry,
            stager,
            mapping_source: None,
            connector: None,
            time_provider: None,
            request_timeout: None,
            stream_buffer_pool: DEFAULT_STREAM_BUFFER_POOL,
        }
    }

    /// Where the mappings defined on the server are listed from
    pub fn mapping_source(mut self, source: Arc<dyn MappingSource>) -> Self {
        self.mapping_source = Some(source);
        self
    }

    /// How the streaming connection is created
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = Some(time_provider);
        self
    }

    /// Bound every remote call made by the client
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn stream_buffer_pool(mut self, max_idle: usize) -> Self {
        self.stream_buffer_pool = max_idle;
        self
    }

    /// Build the client, creating the resource manager for its endpoint if there is none yet
    pub fn build(self) -> Result<Ingestion> {
        let manager = self.registry.get_manager(&self.client)?;
        let mapping_source: Arc<dyn MappingSource> = match self.mapping_source {
            Some(source) => source,
            None => Arc::new(self.client.clone()),
        };
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(HttpConnector),
        };
        let time_provider: Arc<dyn TimeProvider> = match self.time_provider {
            Some(time_provider) => time_provider,
            None => Arc::new(SystemProvider::new()),
        };

        Ok(Ingestion {
            mappings: MappingCache::new(self.database.clone(), mapping_source, time_provider)
                .with_request_timeout(self.request_timeout),
            stream_conn: StreamConnHolder::new(self.client, connector),
            buffers: Arc::new(BufferPool::new(self.stream_buffer_pool)),
            database: self.database,
            table: self.table,
            manager,
            stager: self.stager,
            request_timeout: self.request_timeout,
        })
    }
}
