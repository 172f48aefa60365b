//! File staging pipeline (spec.md §3, §4.4): stream a remote file through
//! the ESB into a per-request staging directory with incremental sha256
//! accounting, and push a JSON result back out the same bridge.

use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("invalid source url {0}: {1}")]
    InvalidUrl(String, &'static str),
    #[error("esb request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("esb responded with status {0}")]
    EsbStatus(reqwest::StatusCode),
    #[error("esb reported failure for {0}")]
    EsbFailure(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// `server_path`/`server_file` split used on every ESB call (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsbLocation {
    pub server_path: String,
    pub server_file: String,
}

/// Splits `scheme://netloc/a/b/c/file.ext` into
/// `server_path = scheme://netloc/a/b/c` and `server_file = file.ext`.
/// Rejects a missing scheme, missing netloc, or a trailing slash.
pub fn decompose_url(url: &str) -> Result<EsbLocation, StagingError> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or(StagingError::InvalidUrl(url.to_string(), "missing scheme"))?;
    if rest.is_empty() {
        return Err(StagingError::InvalidUrl(url.to_string(), "missing netloc"));
    }
    let (netloc, path) = rest.split_once('/').unwrap_or((rest, ""));
    if netloc.is_empty() {
        return Err(StagingError::InvalidUrl(url.to_string(), "missing netloc"));
    }
    if path.is_empty() || path.ends_with('/') {
        return Err(StagingError::InvalidUrl(url.to_string(), "missing trailing filename"));
    }
    let (dir, file) = path
        .rsplit_once('/')
        .map(|(d, f)| (d, f))
        .unwrap_or(("", path));
    if file.is_empty() {
        return Err(StagingError::InvalidUrl(url.to_string(), "missing trailing filename"));
    }
    let server_path = if dir.is_empty() {
        format!("{scheme}://{netloc}")
    } else {
        format!("{scheme}://{netloc}/{dir}")
    };
    Ok(EsbLocation {
        server_path,
        server_file: file.to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct StagedFile {
    pub request_id: String,
    pub source_url: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub sha256_hex: String,
}

#[derive(Serialize)]
struct DownloadRequest<'a> {
    server_path: &'a str,
    server_file: &'a str,
    local_file_path: Option<&'a str>,
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    server_path: &'a str,
    server_file: &'a str,
    local_file_path: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrIgnored {
    Bool(bool),
    #[allow(dead_code)]
    Other(serde_json::Value),
}

/// Client for the ESB's two HTTP endpoints (spec.md §4.4, §4.5). Staging
/// and upload both go through here rather than touching the external file
/// server directly.
#[derive(Clone)]
pub struct EsbClient {
    http: reqwest::Client,
    base_url: String,
}

impl EsbClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Streams a remote file through the ESB into
    /// `<staging_dir>/<request_id>/<filename>`, computing sha256 and size
    /// incrementally as bytes arrive.
    pub async fn download(
        &self,
        request_id: &str,
        url: &str,
        staging_dir: &Path,
        filename: &str,
        timeout: Duration,
    ) -> Result<StagedFile, StagingError> {
        let location = decompose_url(url)?;

        let dir = staging_dir.join(request_id);
        tokio::fs::create_dir_all(&dir).await?;
        let local_path = dir.join(filename);

        let response = self
            .http
            .post(format!("{}/esb-download", self.base_url))
            .timeout(timeout)
            .json(&DownloadRequest {
                server_path: &location.server_path,
                server_file: &location.server_file,
                local_file_path: None,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StagingError::EsbStatus(response.status()));
        }

        let mut file = File::create(&local_path).await?;
        let mut hasher = Sha256::new();
        let mut size_bytes: u64 = 0;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk?;
            hasher.update(&chunk);
            size_bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(StagedFile {
            request_id: request_id.to_string(),
            source_url: url.to_string(),
            local_path,
            size_bytes,
            sha256_hex: hex::encode(hasher.finalize()),
        })
    }

    /// Materialises `payload` as UTF-8 JSON at `local_file_path`, then asks
    /// the ESB to read that path and push it to the external file server.
    pub async fn upload_json(
        &self,
        server_path: &str,
        server_file: &str,
        payload: &serde_json::Value,
        local_file_path: &Path,
        timeout: Duration,
    ) -> Result<(), StagingError> {
        let encoded = serde_json::to_vec_pretty(payload)?;
        tokio::fs::write(local_file_path, &encoded).await?;

        let local_file_path = local_file_path
            .to_str()
            .ok_or_else(|| StagingError::EsbFailure(server_file.to_string()))?;

        let response = self
            .http
            .post(format!("{}/esb-upload", self.base_url))
            .timeout(timeout)
            .json(&UploadRequest {
                server_path,
                server_file,
                local_file_path,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StagingError::EsbStatus(response.status()));
        }

        let body: BoolOrIgnored = response.json().await.unwrap_or(BoolOrIgnored::Bool(true));
        match body {
            BoolOrIgnored::Bool(false) => Err(StagingError::EsbFailure(server_file.to_string())),
            _ => Ok(()),
        }
    }
}

/// Derives a unique local filename for a file ref: prefer the caller's
/// `filename`, else the URL's basename, deduplicated by appending `-index`
/// (spec.md §4.7 step 2).
pub fn derive_local_filename(filename: Option<&str>, url: &str, index: usize, seen: &mut Vec<String>) -> String {
    let base = filename
        .map(str::to_string)
        .or_else(|| url.rsplit('/').next().map(str::to_string))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("file-{index}"));

    if seen.contains(&base) {
        warn!(filename = %base, index, "duplicate staged filename, disambiguating");
        let deduped = format!("{base}-{index}");
        seen.push(deduped.clone());
        deduped
    } else {
        seen.push(base.clone());
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompose_splits_scheme_netloc_path_file() {
        let loc = decompose_url("http://fs/a/b/c/file.ext").unwrap();
        assert_eq!(loc.server_path, "http://fs/a/b/c");
        assert_eq!(loc.server_file, "file.ext");
    }

    #[test]
    fn decompose_handles_netloc_only_path() {
        let loc = decompose_url("http://fs/file.ext").unwrap();
        assert_eq!(loc.server_path, "http://fs");
        assert_eq!(loc.server_file, "file.ext");
    }

    #[test]
    fn decompose_rejects_missing_scheme() {
        assert!(decompose_url("fs/a/file.ext").is_err());
    }

    #[test]
    fn decompose_rejects_missing_netloc() {
        assert!(decompose_url("http:///file.ext").is_err());
    }

    #[test]
    fn decompose_rejects_trailing_slash() {
        assert!(decompose_url("http://fs/a/b/").is_err());
    }

    #[test]
    fn round_trip_compose_then_split() {
        let server_path = "http://fs/a/b";
        let server_file = "c.pdf";
        let composed = format!("{server_path}/{server_file}");
        let loc = decompose_url(&composed).unwrap();
        assert_eq!(loc.server_path, server_path);
        assert_eq!(loc.server_file, server_file);
    }

    #[test]
    fn derive_local_filename_prefers_explicit_name() {
        let mut seen = Vec::new();
        let name = derive_local_filename(Some("report.pdf"), "http://fs/other.pdf", 0, &mut seen);
        assert_eq!(name, "report.pdf");
    }

    #[test]
    fn derive_local_filename_falls_back_to_url_basename() {
        let mut seen = Vec::new();
        let name = derive_local_filename(None, "http://fs/a/b/report.pdf", 0, &mut seen);
        assert_eq!(name, "report.pdf");
    }

    #[test]
    fn derive_local_filename_deduplicates_collisions() {
        let mut seen = Vec::new();
        let first = derive_local_filename(Some("scan.pdf"), "http://fs/x/scan.pdf", 0, &mut seen);
        let second = derive_local_filename(Some("scan.pdf"), "http://fs/y/scan.pdf", 1, &mut seen);
        assert_eq!(first, "scan.pdf");
        assert_eq!(second, "scan.pdf-1");
    }
}
