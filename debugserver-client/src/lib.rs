//! Client library for debugserver lookups.
//!
//! Given a build-id, fetches the corresponding debuginfo, executable or
//! source file from the servers listed in `$DEBUGSERVER_URLS`, keeping the
//! results in a local content-addressed cache. A cached artifact is
//! returned directly without touching the network.
//!
//! ```no_run
//! # async fn demo() -> Result<(), debugserver_client::ClientError> {
//! let client = debugserver_client::Client::from_env()?;
//! let artifact = client
//!     .find_debuginfo("deadbeef00112233445566778899aabbccddee40")
//!     .await?;
//! println!("{}", artifact.path.display());
//! # Ok(())
//! # }
//! ```

pub mod cache;
mod download;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use cache::{escape_path_suffix, Cache};

/// Whitespace-separated list of server base URLs. Unset or empty disables
/// upstream lookup entirely.
pub const URLS_ENV_VAR: &str = "DEBUGSERVER_URLS";
/// Per-server timeout in seconds; default 5.
pub const TIMEOUT_ENV_VAR: &str = "DEBUGSERVER_TIMEOUT";
/// Overrides the cache root directory.
pub const CACHE_PATH_ENV_VAR: &str = "DEBUGSERVER_CACHE_PATH";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid build-id, expected even-length lowercase hex")]
    InvalidBuildId,

    #[error("source file name must begin with /")]
    InvalidSourcePath,

    #[error("no server urls configured in $DEBUGSERVER_URLS")]
    NoServers,

    #[error("not found on any configured server")]
    NotFound,

    #[error("server timed out")]
    Timeout,

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("cannot reach server host")]
    HostUnreachable,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot initialize http client: {0}")]
    Init(String),
}

impl ClientError {
    /// Fold a transport failure into the conventional error kinds, the way
    /// curl-based clients map their failures onto errnos.
    pub(crate) fn from_transport(e: reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::Timeout
        } else if e.is_redirect() {
            ClientError::TooManyRedirects
        } else if e.is_connect() {
            match io_error_kind(&e) {
                Some(std::io::ErrorKind::ConnectionRefused) => ClientError::ConnectionRefused,
                _ => ClientError::HostUnreachable,
            }
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

fn io_error_kind(err: &(dyn std::error::Error + 'static)) -> Option<std::io::ErrorKind> {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = e.source();
    }
    None
}

/// A successfully resolved artifact: an open read-only handle on the cache
/// file, plus its path. The caller owns the handle.
pub struct CachedArtifact {
    pub path: PathBuf,
    pub file: std::fs::File,
}

/// A debugserver client. Owns its HTTP engine, whose lifetime thereby
/// strictly encloses all uses; construct once and share.
pub struct Client {
    servers: Vec<String>,
    cache: Cache,
    http: reqwest::Client,
}

impl Client {
    /// Configure from `$DEBUGSERVER_URLS`, `$DEBUGSERVER_TIMEOUT` and
    /// `$DEBUGSERVER_CACHE_PATH`.
    pub fn from_env() -> Result<Client, ClientError> {
        let servers = std::env::var(URLS_ENV_VAR)
            .unwrap_or_default()
            .split_ascii_whitespace()
            .map(str::to_string)
            .collect();
        let timeout = std::env::var(TIMEOUT_ENV_VAR)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        Client::new(servers, Cache::from_env(), timeout)
    }

    pub fn new(
        servers: Vec<String>,
        cache: Cache,
        timeout: Duration,
    ) -> Result<Client, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("debugserver-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Init(e.to_string()))?;
        Ok(Client {
            servers,
            cache,
            http,
        })
    }

    pub async fn find_debuginfo(&self, build_id: &str) -> Result<CachedArtifact, ClientError> {
        self.query(build_id, "debuginfo", None).await
    }

    pub async fn find_executable(&self, build_id: &str) -> Result<CachedArtifact, ClientError> {
        self.query(build_id, "executable", None).await
    }

    pub async fn find_source(
        &self,
        build_id: &str,
        source_path: &str,
    ) -> Result<CachedArtifact, ClientError> {
        self.query(build_id, "source", Some(source_path)).await
    }

    async fn query(
        &self,
        build_id: &str,
        kind: &str,
        source_path: Option<&str>,
    ) -> Result<CachedArtifact, ClientError> {
        validate_build_id(build_id)?;
        if let Some(path) = source_path {
            if !path.starts_with('/') {
                return Err(ClientError::InvalidSourcePath);
            }
        }

        let file_name = cache::cache_file_name(kind, source_path);
        if let Some(file) = self.cache.lookup(build_id, &file_name)? {
            return Ok(CachedArtifact {
                path: self.cache.entry_path(build_id, &file_name),
                file,
            });
        }

        if self.servers.is_empty() {
            return Err(ClientError::NoServers);
        }
        download::download(
            &self.http,
            &self.cache,
            &self.servers,
            build_id,
            kind,
            source_path,
            &file_name,
        )
        .await
    }
}

fn validate_build_id(build_id: &str) -> Result<(), ClientError> {
    let hex = build_id
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if build_id.len() < 2 || build_id.len() % 2 != 0 || !hex {
        return Err(ClientError::InvalidBuildId);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "deadbeef00112233445566778899aabbccddee40";

    fn client_with_servers(dir: &tempfile::TempDir, servers: Vec<String>) -> Client {
        Client::new(
            servers,
            Cache::at(dir.path().to_path_buf()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn rejects_bad_build_ids() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_with_servers(&dir, vec![]);
        for bad in ["", "a", "abc", "ABCD", "xyzw"] {
            assert!(matches!(
                client.find_debuginfo(bad).await,
                Err(ClientError::InvalidBuildId)
            ));
        }
    }

    #[tokio::test]
    async fn rejects_relative_source_paths() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_with_servers(&dir, vec![]);
        assert!(matches!(
            client.find_source(ID, "usr/src/main.c").await,
            Err(ClientError::InvalidSourcePath)
        ));
    }

    #[tokio::test]
    async fn miss_without_servers_is_no_servers() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_with_servers(&dir, vec![]);
        assert!(matches!(
            client.find_debuginfo(ID).await,
            Err(ClientError::NoServers)
        ));
    }

    #[tokio::test]
    async fn cached_entries_need_no_servers() {
        use std::io::Read;

        let dir = tempfile::tempdir().unwrap();
        let client = client_with_servers(&dir, vec![]);

        let entry_dir = dir.path().join(ID);
        std::fs::create_dir_all(&entry_dir).unwrap();
        std::fs::write(entry_dir.join("executable"), b"cached bytes").unwrap();

        let mut artifact = client.find_executable(ID).await.unwrap();
        assert_eq!(artifact.path, entry_dir.join("executable"));
        let mut contents = Vec::new();
        artifact.file.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"cached bytes");
    }

    #[tokio::test]
    async fn unreachable_server_maps_to_a_network_error() {
        let dir = tempfile::tempdir().unwrap();
        // Nothing listens on this port.
        let client = client_with_servers(&dir, vec!["http://127.0.0.1:1".to_string()]);
        let err = client.find_debuginfo(ID).await.unwrap_err();
        assert!(
            matches!(
                err,
                ClientError::ConnectionRefused
                    | ClientError::HostUnreachable
                    | ClientError::Timeout
            ),
            "unexpected error: {err}"
        );
    }
}
