//! Composable options for a single ingestion call
//!
//! Options are applied left to right over a base [`IngestionProperties`] by [`fold_options`].
//! Applying an option is all-or-nothing: an option validates its own payload before it touches
//! the record, so a failed option leaves the record exactly as the previous options left it.
//! Consistency between options is checked once, after every option was applied.
use kusto_client::DataFormat;
use serde::{Serialize, Serializer};

use crate::{
    error::{Error, ErrorKind, Op, Result},
    properties::IngestionProperties,
};

/// What to do with one ingestion call, beyond the target table
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOption {
    /// Ask the service to commit the data without waiting to aggregate it
    FlushImmediately,
    /// An inline mapping of source fields to table columns
    IngestionMapping {
        mapping: MappingValue,
        kind: DataFormat,
    },
    /// The name of a mapping created on the server ahead of time
    IngestionMappingRef { name: String, kind: DataFormat },
    /// Remove the local file once it was staged
    DeleteSource,
    IgnoreSizeLimit,
    /// Tags associated with the ingested data
    Tags(Vec<String>),
    /// Skip the ingestion if data with this ingest-by tag was already ingested
    IfNotExists(String),
    ValidationPolicy(ValidationPolicy),
    /// Overrides the format inferred from a file extension
    FileFormat(DataFormat),
}

impl IngestOption {
    /// `kind` must be one of CSV, JSON, AVRO, Parquet or ORC
    pub fn ingestion_mapping(mapping: impl Into<MappingValue>, kind: DataFormat) -> Self {
        Self::IngestionMapping {
            mapping: mapping.into(),
            kind,
        }
    }

    /// `kind` must be one of CSV, JSON, AVRO, Parquet or ORC
    pub fn ingestion_mapping_ref(name: impl Into<String>, kind: DataFormat) -> Self {
        Self::IngestionMappingRef {
            name: name.into(),
            kind,
        }
    }

    pub fn tags(tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Tags(tags.into_iter().map(Into::into).collect())
    }

    pub fn if_not_exists(ingest_by_tag: impl Into<String>) -> Self {
        Self::IfNotExists(ingest_by_tag.into())
    }

    /// Apply this option to `props`
    ///
    /// On error `props` is left untouched.
    pub fn apply(&self, props: &mut IngestionProperties) -> Result<()> {
        let additional = &mut props.additional_properties;
        match self {
            Self::FlushImmediately => props.flush_immediately = true,
            Self::IngestionMapping { mapping, kind } => {
                check_mapping_kind("IngestionMapping", *kind)?;
                let encoded = mapping.encode()?;
                additional.ingestion_mapping = Some(encoded);
                additional.ingestion_mapping_type = Some(*kind);
            }
            Self::IngestionMappingRef { name, kind } => {
                check_mapping_kind("IngestionMappingRef", *kind)?;
                additional.ingestion_mapping_ref = Some(name.clone());
                additional.ingestion_mapping_type = Some(*kind);
            }
            Self::DeleteSource => props.source.delete_local_source = true,
            Self::IgnoreSizeLimit => props.ignore_size_limit = true,
            Self::Tags(tags) => additional.tags = tags.clone(),
            Self::IfNotExists(tag) => additional.ingest_if_not_exists = Some(tag.clone()),
            Self::ValidationPolicy(policy) => {
                let encoded = serde_json::to_string(policy).map_err(|e| {
                    Error::internal(
                        Op::Unknown,
                        format!("the validation policy would not JSON encode: {e}"),
                    )
                })?;
                additional.validation_policy = Some(encoded);
            }
            Self::FileFormat(format) => additional.format = *format,
        }
        Ok(())
    }
}

fn check_mapping_kind(option: &'static str, kind: DataFormat) -> Result<()> {
    if kind.is_valid_mapping_kind() {
        Ok(())
    } else {
        let invalid = ErrorKind::InvalidMappingKind { option, kind };
        Err(Error::new(Op::Unknown, invalid))
    }
}

/// Apply `options` in order over `base`, then check the options agree with each other
///
/// Stops at the first failing option.
pub fn fold_options(
    mut base: IngestionProperties,
    options: &[IngestOption],
) -> Result<IngestionProperties> {
    for option in options {
        option.apply(&mut base)?;
    }
    base.validate()?;
    Ok(base)
}

/// An inline ingestion mapping
///
/// Strings and bytes are taken to be JSON already; anything else is JSON encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingValue {
    Encoded(String),
    Bytes(Vec<u8>),
    Structured(serde_json::Value),
}

impl MappingValue {
    /// JSON encode any serializable mapping description
    pub fn from_serialize<T: Serialize + ?Sized>(mapping: &T) -> Result<Self> {
        let value = serde_json::to_value(mapping).map_err(|e| {
            Error::new(
                Op::Unknown,
                ErrorKind::MalformedMapping(format!("could not be JSON encoded: {e}")),
            )
        })?;
        Ok(Self::Structured(value))
    }

    fn encode(&self) -> Result<String> {
        match self {
            Self::Encoded(s) => Ok(s.clone()),
            Self::Bytes(b) => String::from_utf8(b.clone()).map_err(|e| {
                Error::new(
                    Op::Unknown,
                    ErrorKind::MalformedMapping(format!("mapping bytes are not UTF-8: {e}")),
                )
            }),
            Self::Structured(v) => serde_json::to_string(v).map_err(|e| {
                let reason = e.to_string();
                Error::new(Op::Unknown, ErrorKind::MalformedMapping(reason))
            }),
        }
    }
}

impl From<&str> for MappingValue {
    fn from(s: &str) -> Self {
        Self::Encoded(s.to_string())
    }
}

impl From<String> for MappingValue {
    fn from(s: String) -> Self {
        Self::Encoded(s)
    }
}

impl From<Vec<u8>> for MappingValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<&[u8]> for MappingValue {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

impl From<serde_json::Value> for MappingValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Structured(v)
    }
}

/// Which records the service flags while validating the source data
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum ValidationOption {
    #[default]
    Unknown = 0,
    /// Every record must have the same number of fields
    SameNumberOfFields = 1,
    /// Fields that are not double quoted are ignored
    IgnoreNonDoubleQuotedFields = 2,
}

/// What a flagged record does to the ingestion
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum ValidationImplication {
    #[default]
    FailIngestion = 0,
    IgnoreFailures = 1,
}

impl Serialize for ValidationOption {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(*self as i8)
    }
}

impl Serialize for ValidationImplication {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(*self as i8)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ValidationPolicy {
    #[serde(rename = "ValidationOptions")]
    pub options: ValidationOption,
    #[serde(rename = "ValidationImplications")]
    pub implications: ValidationImplication,
}
