//! The streaming ingestion transport and the per-client connection that uses it
//!
//! Every streamed payload is gzip compressed into a pooled buffer and checked against
//! [`MAX_STREAM_SIZE`] before it is written; the limit applies to the compressed bytes.
use std::{
    fmt::Debug,
    io::Write,
    mem,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use flate2::{Compression, write::GzEncoder};
use kusto_client::{Client, DataFormat};
use observability_deps::tracing::info;
use parking_lot::Mutex;

use crate::{
    error::{Error, ErrorKind, Op, Result},
    lazy::LazyOnce,
};

pub const MIB: usize = 1024 * 1024;

/// The largest compressed payload the service accepts for streaming ingestion
pub const MAX_STREAM_SIZE: usize = 4 * MIB;

/// Buffers that grew beyond this are dropped instead of pooled
const MAX_POOLED_CAPACITY: usize = 2 * MAX_STREAM_SIZE;

/// Sends compressed payloads to the streaming ingestion endpoint
///
/// Shared by every concurrent streaming call of an ingestion client, so `write` must be safe
/// to call concurrently.
#[async_trait]
pub trait StreamConn: Debug + Send + Sync + 'static {
    async fn write(
        &self,
        database: &str,
        table: &str,
        payload: &[u8],
        format: DataFormat,
        mapping_name: &str,
    ) -> Result<()>;
}

/// Creates streaming connections
pub trait Connector: Debug + Send + Sync + 'static {
    /// Connect to the endpoint of `client`, using its credentials and HTTP settings
    fn connect(&self, client: &Client) -> Result<Arc<dyn StreamConn>>;
}

/// Connects to the service's REST streaming endpoint
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    fn connect(&self, client: &Client) -> Result<Arc<dyn StreamConn>> {
        Ok(Arc::new(HttpStreamConn::new(client.clone())))
    }
}

/// Writes through the streaming API of a [`Client`]
#[derive(Debug)]
pub struct HttpStreamConn {
    client: Client,
}

impl HttpStreamConn {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamConn for HttpStreamConn {
    async fn write(
        &self,
        database: &str,
        table: &str,
        payload: &[u8],
        format: DataFormat,
        mapping_name: &str,
    ) -> Result<()> {
        self.client
            .api_v1_rest_ingest(database, table)
            .format(format)
            .mapping_name(mapping_name)
            .gzip_body(Bytes::copy_from_slice(payload))
            .send()
            .await
            .map_err(|e| Error::from_client(Op::StreamIngest, e))
    }
}

/// The streaming connection of one ingestion client, created on first use
#[derive(Debug)]
pub struct StreamConnHolder {
    client: Client,
    connector: Arc<dyn Connector>,
    conn: LazyOnce<Arc<dyn StreamConn>>,
}

impl StreamConnHolder {
    pub fn new(client: Client, connector: Arc<dyn Connector>) -> Self {
        Self {
            client,
            connector,
            conn: LazyOnce::new(),
        }
    }

    /// The connection, connected through the client on first use
    pub fn get(&self) -> Result<Arc<dyn StreamConn>> {
        self.conn
            .get_or_try_init(|| {
                let endpoint = self.client.endpoint();
                info!(%endpoint, "creating streaming ingestion connection");
                self.connector
                    .connect(&self.client)
                    .map_err(|e| e.with_op(Op::StreamConnect))
            })
            .map(Arc::clone)
    }
}

/// A pool of compression buffers shared by the streaming calls of one client
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
}

impl BufferPool {
    /// Keep at most `max_pooled` idle buffers
    pub fn new(max_pooled: usize) -> Self {
        Self {
            buffers: Default::default(),
            max_pooled,
        }
    }

    /// An empty buffer, reused if one is idle
    pub fn get(self: &Arc<Self>) -> PooledBuffer {
        let buf = self.buffers.lock().pop().unwrap_or_default();
        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    pub fn idle(&self) -> usize {
        self.buffers.lock().len()
    }

    fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_pooled {
            buffers.push(buf);
        }
    }
}

/// A buffer that goes back to its [`BufferPool`] when dropped
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.put(mem::take(&mut self.buf));
    }
}

/// Gzip `payload` into `out`, replacing its contents
///
/// Failures are not retryable, the same payload would fail again.
pub fn compress_payload(payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
    out.clear();
    let compress_err = |e| Error::new(Op::StreamIngest, ErrorKind::Compress(e));
    let mut encoder = GzEncoder::new(out, Compression::default());
    encoder.write_all(payload).map_err(compress_err)?;
    encoder.finish().map_err(compress_err)?;
    Ok(())
}

/// Reject compressed payloads larger than [`MAX_STREAM_SIZE`]
pub fn check_stream_size(compressed_len: usize) -> Result<()> {
    if compressed_len > MAX_STREAM_SIZE {
        return Err(Error::new(
            Op::StreamIngest,
            ErrorKind::PayloadTooLarge {
                size: compressed_len,
                limit: MAX_STREAM_SIZE,
            },
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        io::Read,
        sync::{
            Arc, Barrier,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use async_trait::async_trait;
    use flate2::read::GzDecoder;
    use kusto_client::{Client, DataFormat};
    use mockito::{Matcher, Server};
    use reqwest::header::{HeaderMap, HeaderValue};
    use secrecy::ExposeSecret;

    use super::{
        BufferPool, Connector, HttpConnector, MAX_STREAM_SIZE, MIB, StreamConn, StreamConnHolder,
        check_stream_size, compress_payload,
    };
    use crate::error::{ErrorKind, Result};

    #[test]
    fn size_limit_is_inclusive() {
        assert_eq!(MAX_STREAM_SIZE, 4_194_304);
        check_stream_size(0).unwrap();
        check_stream_size(4 * MIB).unwrap();
        let err = check_stream_size(4 * MIB + 1).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::PayloadTooLarge {
                size: 4_194_305,
                limit: 4_194_304
            }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn compress_replaces_buffer_contents() {
        let mut out = b"left over from the previous payload".to_vec();
        compress_payload(br#"{"a":1}"#, &mut out).unwrap();
        let mut decoded = String::new();
        GzDecoder::new(out.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, r#"{"a":1}"#);
    }

    #[test]
    fn pool_reuses_buffers() {
        let pool = Arc::new(BufferPool::new(1));
        let mut first = pool.get();
        first.extend_from_slice(&[1; 1024]);
        let ptr = first.as_ptr();
        drop(first);
        assert_eq!(pool.idle(), 1);

        let second = pool.get();
        assert!(second.is_empty());
        assert!(second.capacity() >= 1024);
        assert_eq!(second.as_ptr(), ptr);

        // only one idle buffer is kept
        let third = pool.get();
        drop(second);
        drop(third);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn pool_drops_oversized_buffers() {
        let pool = Arc::new(BufferPool::new(4));
        let mut buf = pool.get();
        buf.reserve(3 * MAX_STREAM_SIZE);
        drop(buf);
        assert_eq!(pool.idle(), 0);
    }

    #[derive(Debug)]
    struct NoopConn;

    #[async_trait]
    impl StreamConn for NoopConn {
        async fn write(
            &self,
            _database: &str,
            _table: &str,
            _payload: &[u8],
            _format: DataFormat,
            _mapping_name: &str,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct CountingConnector {
        calls: AtomicUsize,
    }

    impl Connector for CountingConnector {
        fn connect(&self, client: &Client) -> Result<Arc<dyn StreamConn>> {
            assert_eq!(client.endpoint().as_str(), "https://cluster.example.net/");
            let token = client.auth_token().map(|t| t.expose_secret().as_str());
            assert_eq!(token, Some("token"));
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NoopConn))
        }
    }

    #[test]
    fn holder_connects_once() {
        const N: usize = 8;
        let connector = Arc::new(CountingConnector::default());
        let client = Client::new("https://cluster.example.net")
            .unwrap()
            .with_auth_token("token");
        let holder =
            Arc::new(StreamConnHolder::new(client, Arc::<CountingConnector>::clone(&connector)));
        let barrier = Arc::new(Barrier::new(N));

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let holder = Arc::clone(&holder);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    holder.get().unwrap()
                })
            })
            .collect();
        let conns: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
        for c in &conns {
            assert!(Arc::ptr_eq(c, &conns[0]));
        }
    }

    #[tokio::test]
    async fn http_conn_writes_to_streaming_endpoint() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/rest/ingest/db/events")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("streamFormat".into(), "json".into()),
                Matcher::UrlEncoded("mappingName".into(), "events_json".into()),
            ]))
            .match_header("authorization", "Bearer token")
            .match_header("content-encoding", "gzip")
            .with_status(200)
            .create_async()
            .await;

        let client = Client::new(server.url()).unwrap().with_auth_token("token");
        let conn = HttpConnector.connect(&client).unwrap();
        let mut payload = vec![];
        compress_payload(br#"{"a":1}"#, &mut payload).unwrap();
        conn.write("db", "events", &payload, DataFormat::Json, "events_json")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_conn_reports_throttling_as_retryable() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/rest/ingest/db/events")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let client = Client::new(server.url()).unwrap();
        let conn = HttpConnector.connect(&client).unwrap();
        let err = conn
            .write("db", "events", b"", DataFormat::Csv, "")
            .await
            .unwrap_err();
        mock.assert_async().await;
        assert!(matches!(err.kind(), ErrorKind::Remote(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn holder_writes_with_the_clients_http_settings() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/rest/ingest/db/events")
            .match_query(Matcher::Any)
            .match_header("x-ingest-tenant", "blue")
            .with_status(200)
            .create_async()
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("x-ingest-tenant", HeaderValue::from_static("blue"));
        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .unwrap();
        let client = Client::new(server.url())
            .unwrap()
            .with_http_client(http_client);
        let holder = StreamConnHolder::new(client, Arc::new(HttpConnector));

        let conn = holder.get().unwrap();
        conn.write("db", "events", b"", DataFormat::Json, "")
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
