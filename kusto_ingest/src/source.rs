use std::path::{Path, PathBuf};

use url::Url;

use crate::error::{Error, ErrorKind, Op, Result};

/// Where the data of a file ingestion comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// A file on the local filesystem
    Local(PathBuf),
    /// A blob already in storage
    Blob(Url),
}

impl FileSource {
    /// Decide whether `path` is a local file or a blob URI
    ///
    /// `http(s)` URIs are blobs, `file` URIs and anything that is not a URI are local paths.
    pub fn classify(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(invalid(path, "the path is empty"));
        }
        if is_windows_drive_path(path) {
            return Ok(Self::Local(PathBuf::from(path)));
        }

        match Url::parse(path) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(Self::Blob(url)),
                "file" => url
                    .to_file_path()
                    .map(Self::Local)
                    .map_err(|_| invalid(path, "not a local file URI")),
                scheme => Err(invalid(path, format!("unsupported URI scheme '{scheme}'"))),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Self::Local(PathBuf::from(path))),
            Err(e) => Err(invalid(path, e.to_string())),
        }
    }

    /// Check a local source can be uploaded: it has to exist and be a regular file
    pub async fn check_local(path: &Path) -> Result<()> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| invalid(&path.display().to_string(), e.to_string()))?;
        if !meta.is_file() {
            return Err(invalid(&path.display().to_string(), "not a regular file"));
        }
        Ok(())
    }
}

/// `C:\data\file.csv` parses as a URI with scheme `c`
fn is_windows_drive_path(path: &str) -> bool {
    let b = path.as_bytes();
    b.len() >= 3 && b[0].is_ascii_alphabetic() && b[1] == b':' && (b[2] == b'\\' || b[2] == b'/')
}

fn invalid(path: &str, reason: impl Into<String>) -> Error {
    Error::new(
        Op::FileIngest,
        ErrorKind::InvalidSource {
            path: path.to_string(),
            reason: reason.into(),
        },
    )
}
