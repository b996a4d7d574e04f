//! CLI config for an ingestion client
use std::time::Duration;

use kusto_client::Client;
use secrecy::{ExposeSecret, Secret};
use url::Url;

use crate::{
    DEFAULT_STREAM_BUFFER_POOL, IngestionBuilder,
    error::{Error, Op, Result},
};

#[derive(Debug, Clone, clap::Parser)]
pub struct IngestClientConfig {
    /// The URL of the service endpoint, e.g., `https://mycluster.westus.kusto.windows.net`
    #[clap(long = "kusto-endpoint", env = "KUSTO_ENDPOINT", action)]
    pub endpoint: Url,

    /// The `Bearer` token sent with every request to the service
    #[clap(long = "kusto-token", env = "KUSTO_AUTH_TOKEN", action)]
    pub auth_token: Option<Secret<String>>,

    /// Bound every call to the service, e.g., `30s`. Unbounded if not set.
    #[clap(
        long = "kusto-request-timeout",
        env = "KUSTO_REQUEST_TIMEOUT",
        value_parser = humantime::parse_duration
    )]
    pub request_timeout: Option<Duration>,

    /// The number of idle compression buffers kept for streaming ingestion
    #[clap(
        long = "kusto-stream-buffer-pool",
        env = "KUSTO_STREAM_BUFFER_POOL",
        default_value_t = DEFAULT_STREAM_BUFFER_POOL,
        action
    )]
    pub stream_buffer_pool: usize,
}

impl IngestClientConfig {
    /// A client for the configured endpoint
    pub fn client(&self) -> Result<Client> {
        let client =
            Client::new(self.endpoint.clone()).map_err(|e| Error::from_client(Op::Unknown, e))?;
        Ok(match &self.auth_token {
            Some(token) => client.with_auth_token(token.expose_secret()),
            None => client,
        })
    }

    /// Apply the tuning options to an ingestion client under construction
    pub fn configure(&self, builder: IngestionBuilder) -> IngestionBuilder {
        builder
            .request_timeout(self.request_timeout)
            .stream_buffer_pool(self.stream_buffer_pool)
    }
}
