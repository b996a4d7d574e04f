//! The configuration record built for every ingestion call
use std::fmt::Debug;

use kusto_client::DataFormat;
use secrecy::{ExposeSecret, Secret};
use serde::{Serialize, Serializer};

use crate::error::{Error, ErrorKind, Op, Result};

/// Authorization material the service uses to access staged data
///
/// Never printed by `Debug`, only exposed when the record is serialized for the service.
#[derive(Clone)]
pub struct AuthContext(Secret<String>);

impl AuthContext {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Secret::new(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<Secret<String>> for AuthContext {
    fn from(secret: Secret<String>) -> Self {
        Self(secret)
    }
}

impl Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthContext([REDACTED])")
    }
}

impl PartialEq for AuthContext {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for AuthContext {}

impl Serialize for AuthContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

/// Everything the service needs to know about one ingestion
///
/// Serializes to the shape of the service's queued ingestion message, so a staging
/// implementation can embed it as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngestionProperties {
    pub database_name: String,
    pub table_name: String,
    pub retain_blob_on_success: bool,
    pub flush_immediately: bool,
    pub ignore_size_limit: bool,
    pub additional_properties: AdditionalProperties,
    /// Handling of the source by the client, never sent to the service
    #[serde(skip)]
    pub source: SourceOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalProperties {
    #[serde(
        rename = "authorizationContext",
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_context: Option<AuthContext>,
    #[serde(skip_serializing_if = "DataFormat::is_unknown")]
    pub format: DataFormat,
    /// JSON encoded inline mapping
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingestion_mapping: Option<String>,
    #[serde(
        rename = "ingestionMappingReference",
        skip_serializing_if = "Option::is_none"
    )]
    pub ingestion_mapping_ref: Option<String>,
    #[serde(
        serialize_with = "serialize_mapping_kind",
        skip_serializing_if = "Option::is_none"
    )]
    pub ingestion_mapping_type: Option<DataFormat>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(
        serialize_with = "serialize_ingest_by_tags",
        skip_serializing_if = "Option::is_none"
    )]
    pub ingest_if_not_exists: Option<String>,
    /// JSON encoded [`ValidationPolicy`][crate::options::ValidationPolicy]
    #[serde(rename = "ValidationPolicy", skip_serializing_if = "Option::is_none")]
    pub validation_policy: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceOptions {
    /// Remove the local file once it was staged
    pub delete_local_source: bool,
}

fn serialize_mapping_kind<S: Serializer>(
    kind: &Option<DataFormat>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match kind {
        Some(kind) => serializer.serialize_str(kind.kind_name()),
        None => serializer.serialize_none(),
    }
}

/// The service expects the ingest-by tags as a JSON encoded list inside a string
fn serialize_ingest_by_tags<S: Serializer>(
    tag: &Option<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match tag {
        Some(tag) => {
            let encoded = serde_json::to_string(&[tag]).map_err(serde::ser::Error::custom)?;
            serializer.serialize_str(&encoded)
        }
        None => serializer.serialize_none(),
    }
}

impl IngestionProperties {
    /// The base record for an ingestion into `database`.`table`
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database_name: database.into(),
            table_name: table.into(),
            retain_blob_on_success: true,
            flush_immediately: false,
            ignore_size_limit: false,
            additional_properties: Default::default(),
            source: Default::default(),
        }
    }

    pub fn with_auth_context(mut self, auth: AuthContext) -> Self {
        self.additional_properties.auth_context = Some(auth);
        self
    }

    /// The mapping reference to check against the server, if one was set
    pub fn mapping_ref(&self) -> Option<&str> {
        self.additional_properties
            .ingestion_mapping_ref
            .as_deref()
            .filter(|r| !r.is_empty())
    }

    pub fn format(&self) -> DataFormat {
        self.additional_properties.format
    }

    /// Consistency checks across options, run once every option was applied
    pub fn validate(&self) -> Result<()> {
        let additional = &self.additional_properties;
        if additional.ingestion_mapping.is_some() && self.mapping_ref().is_some() {
            return Err(Error::new(Op::Unknown, ErrorKind::ConflictingMappings));
        }
        if let (format, Some(kind)) = (additional.format, additional.ingestion_mapping_type) {
            if !format.is_unknown() && format.mapping_kind() != Some(kind) {
                return Err(Error::new(
                    Op::Unknown,
                    ErrorKind::MappingFormatMismatch { format, kind },
                ));
            }
        }
        Ok(())
    }

    /// Serialize for the service, as placed on the ingestion queue
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::internal(
                Op::Unknown,
                format!("ingestion properties would not JSON encode: {e}"),
            )
        })
    }
}
