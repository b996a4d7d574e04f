use std::{fmt::Debug, io::Read, path::Path};

use async_trait::async_trait;
use url::Url;

use crate::{error::Result, properties::IngestionProperties};

/// Stages data for queued ingestion
///
/// Implementations upload the data to intermediate storage and queue a work item carrying
/// the [`IngestionProperties`] for the service to pick up.
#[async_trait]
pub trait Stager: Debug + Send + Sync + 'static {
    /// Upload a local file, deleting it afterwards if the properties ask for it
    async fn upload_local(&self, path: &Path, props: &IngestionProperties) -> Result<()>;

    /// Queue a blob that is already in storage, starting at byte `offset`
    async fn upload_blob(&self, uri: &Url, offset: u64, props: &IngestionProperties) -> Result<()>;

    /// Upload the contents of `reader`, which is already gzip compressed
    async fn upload_stream(
        &self,
        reader: Box<dyn Read + Send>,
        props: &IngestionProperties,
    ) -> Result<()>;
}
