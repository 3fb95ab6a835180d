//! Fetching artifacts from the configured servers into the cache.

use std::path::Path;
use std::time::SystemTime;

use chrono::DateTime;
use log::debug;
use tokio::io::AsyncWriteExt;

use crate::cache::Cache;
use crate::{CachedArtifact, ClientError};

/// Try the configured servers in order; the first success is published
/// into the cache and returned. On total failure, the last transport
/// error wins over a plain not-found.
pub(crate) async fn download(
    http: &reqwest::Client,
    cache: &Cache,
    servers: &[String],
    build_id: &str,
    kind: &str,
    source_path: Option<&str>,
    file_name: &str,
) -> Result<CachedArtifact, ClientError> {
    let target = cache.entry_path(build_id, file_name);
    let mut last_error = None;
    for server in servers {
        match download_one(
            http,
            cache,
            server,
            build_id,
            kind,
            source_path,
            &target,
        )
        .await
        {
            Ok(artifact) => return Ok(artifact),
            Err(e) => {
                debug!("download of {build_id}/{kind} from {server} failed: {e}");
                if !matches!(e, ClientError::NotFound) {
                    last_error = Some(e);
                }
            }
        }
    }
    Err(last_error.unwrap_or(ClientError::NotFound))
}

async fn download_one(
    http: &reqwest::Client,
    cache: &Cache,
    server: &str,
    build_id: &str,
    kind: &str,
    source_path: Option<&str>,
    target: &Path,
) -> Result<CachedArtifact, ClientError> {
    // Tolerate both http://host:8002 and http://host:8002/ forms.
    let base = server.trim_end_matches('/');
    let mut url = format!("{base}/buildid/{build_id}/{kind}");
    if let Some(path) = source_path {
        // The source path begins with / and is appended raw.
        url.push_str(path);
    }
    debug!("fetching {url}");

    let response = http
        .get(&url)
        .send()
        .await
        .map_err(ClientError::from_transport)?;
    if response.status() != reqwest::StatusCode::OK {
        return Err(ClientError::NotFound);
    }
    let mtime = response
        .headers()
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
        .map(SystemTime::from)
        // An absent or unparseable Last-Modified gets the current time.
        .unwrap_or_else(SystemTime::now);

    let temp = cache.begin_fill(build_id)?;
    match write_body(response, temp.path()).await {
        Ok(()) => {
            let file = cache.publish(temp, target, mtime)?;
            debug!("cached {}", target.display());
            Ok(CachedArtifact {
                path: target.to_path_buf(),
                file,
            })
        }
        Err(e) => {
            cache.abandon(temp, build_id);
            Err(e)
        }
    }
}

async fn write_body(mut response: reqwest::Response, path: &Path) -> Result<(), ClientError> {
    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(ClientError::from_transport)?
    {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}
