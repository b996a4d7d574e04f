//! Source data formats understood by the ingestion service
use std::{fmt::Display, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

/// The encoding of source data handed to the service.
///
/// Beyond the handful of membership checks below, a format is an opaque tag: nothing in this
/// crate parses the data it describes.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// The format was not set
    #[default]
    Unknown,
    /// Apache Avro
    Avro,
    /// Apache Avro, decoded with the avro2json conventions
    ApacheAvro,
    /// Comma separated values
    Csv,
    /// One JSON record per line
    Json,
    /// A JSON array of records, or records spanning multiple lines
    MultiJson,
    /// Apache Optimized Row Columnar
    Orc,
    /// Apache Parquet
    Parquet,
    /// Pipe (`|`) separated values
    Psv,
    /// A single string value for the whole source
    Raw,
    /// Semicolon (`;`) separated values
    Scsv,
    /// SOH (ASCII codepoint 1) separated values
    Sohsv,
    /// Microsoft Cosmos structured streams
    SStream,
    /// Tab separated values
    Tsv,
    /// Tab separated values with escaping
    Tsve,
    /// Lines delimited by `\n`
    Txt,
    /// W3C extended log file
    W3cLogFile,
}

impl DataFormat {
    /// Every format other than [`DataFormat::Unknown`]
    pub const ALL: [Self; 16] = [
        Self::Avro,
        Self::ApacheAvro,
        Self::Csv,
        Self::Json,
        Self::MultiJson,
        Self::Orc,
        Self::Parquet,
        Self::Psv,
        Self::Raw,
        Self::Scsv,
        Self::Sohsv,
        Self::SStream,
        Self::Tsv,
        Self::Tsve,
        Self::Txt,
        Self::W3cLogFile,
    ];

    /// The name used for this format on the wire, e.g., in the `streamFormat` parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Avro => "avro",
            Self::ApacheAvro => "apacheavro",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::MultiJson => "multijson",
            Self::Orc => "orc",
            Self::Parquet => "parquet",
            Self::Psv => "psv",
            Self::Raw => "raw",
            Self::Scsv => "scsv",
            Self::Sohsv => "sohsv",
            Self::SStream => "sstream",
            Self::Tsv => "tsv",
            Self::Tsve => "tsve",
            Self::Txt => "txt",
            Self::W3cLogFile => "w3clogfile",
        }
    }

    /// The name the service uses for this format when it is the kind of an ingestion mapping
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Avro => "Avro",
            Self::ApacheAvro => "ApacheAvro",
            Self::Csv => "Csv",
            Self::Json => "Json",
            Self::MultiJson => "MultiJson",
            Self::Orc => "Orc",
            Self::Parquet => "Parquet",
            Self::Psv => "Psv",
            Self::Raw => "Raw",
            Self::Scsv => "Scsv",
            Self::Sohsv => "Sohsv",
            Self::SStream => "SStream",
            Self::Tsv => "Tsv",
            Self::Tsve => "Tsve",
            Self::Txt => "Txt",
            Self::W3cLogFile => "W3CLogFile",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Only CSV, JSON, AVRO, Parquet and ORC may be used as the kind of an ingestion mapping
    pub fn is_valid_mapping_kind(&self) -> bool {
        matches!(
            self,
            Self::Csv | Self::Json | Self::Avro | Self::Parquet | Self::Orc
        )
    }

    /// The kind of ingestion mapping that applies to data in this format, if any
    pub fn mapping_kind(&self) -> Option<Self> {
        match self {
            Self::Csv | Self::Tsv | Self::Tsve | Self::Scsv | Self::Sohsv | Self::Psv => {
                Some(Self::Csv)
            }
            Self::Json | Self::MultiJson => Some(Self::Json),
            Self::Avro | Self::ApacheAvro => Some(Self::Avro),
            Self::Parquet => Some(Self::Parquet),
            Self::Orc => Some(Self::Orc),
            Self::Unknown | Self::Raw | Self::SStream | Self::Txt | Self::W3cLogFile => None,
        }
    }

    /// Whether a payload in this format can be sent through streaming ingestion
    pub fn is_streamable(&self) -> bool {
        matches!(
            self,
            Self::Csv
                | Self::Tsv
                | Self::Scsv
                | Self::Sohsv
                | Self::Psv
                | Self::Json
                | Self::MultiJson
                | Self::Avro
        )
    }

    /// Infer the format from a file name, looking through a trailing `.gz` or `.zip`
    ///
    /// Produces [`DataFormat::Unknown`] when there is no recognisable extension.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let path = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("zip") => {
                Path::new(path.file_stem().unwrap_or_default())
            }
            _ => path,
        };
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
            .unwrap_or_default()
    }
}

impl Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized data format: '{0}'")]
pub struct ParseFormatError(String);

impl FromStr for DataFormat {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseFormatError(s.to_string()))
    }
}
