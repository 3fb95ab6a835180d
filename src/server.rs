//! The HTTP front-end.
//!
//! ```text
//! /buildid/<hex-build-id>/debuginfo
//! /buildid/<hex-build-id>/executable
//! /buildid/<hex-build-id>/source/<absolute-source-path>
//! /metrics
//! ```
//!
//! A lookup probes the index newest-entry-first and serves the first
//! location that still checks out, extracting archive members on the fly.
//! Unknown build-ids are delegated to the upstream servers, if any are
//! configured. No error escapes a request: every failure becomes a status
//! code with a short diagnostic body.

use std::convert::Infallible;
use std::io::{Seek, SeekFrom};
use std::net::SocketAddr;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use hyper::service::{make_service_fn, service_fn};
use hyper::{header, Body, Method, Request, Response, Server, StatusCode};
use log::{debug, info};
use tokio_util::io::ReaderStream;

use crate::archive::{self, ArchiveError};
use crate::index::{ArtifactKind, IndexEntry, Locator};
use crate::ServiceContext;

/// Bind and serve until the interrupt flag is raised, then drain in-flight
/// requests and return.
pub async fn run(ctx: Arc<ServiceContext>) -> Result<(), hyper::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], ctx.config.port));
    let service_ctx = ctx.clone();
    let make_service = make_service_fn(move |_conn| {
        let ctx = service_ctx.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle_request(req, ctx.clone())))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_service);
    info!("started http server on port {}", ctx.config.port);
    server
        .with_graceful_shutdown(wait_for_interrupt(ctx))
        .await
}

async fn wait_for_interrupt(ctx: Arc<ServiceContext>) {
    while !ctx.interrupted.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

/// An error that is reported to the client as a status code plus a short
/// diagnostic body.
struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    fn bad_request(message: &str) -> HttpError {
        HttpError {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }

    fn not_found() -> HttpError {
        HttpError {
            status: StatusCode::NOT_FOUND,
            message: "not found".to_string(),
        }
    }

    fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.message));
        *response.status_mut() = self.status;
        response
    }
}

pub(crate) async fn handle_request(
    req: Request<Body>,
    ctx: Arc<ServiceContext>,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("{method} {path}");
    match route(&ctx, &method, &path).await {
        Ok(response) => Ok(response),
        Err(e) => {
            debug!("{method} {path} -> {}: {}", e.status, e.message);
            Ok(e.into_response())
        }
    }
}

async fn route(
    ctx: &ServiceContext,
    method: &Method,
    path: &str,
) -> Result<Response<Body>, HttpError> {
    if method != Method::GET {
        return Err(HttpError::bad_request("we support GET only"));
    }
    if let Some(rest) = path.strip_prefix("/buildid/") {
        let Some((build_id, operation)) = rest.split_once('/') else {
            return Err(HttpError::bad_request("webapi error, need buildid/operation"));
        };
        // The suffix keeps its leading slash; it names an absolute path.
        let (artifact_type, suffix) = match operation.split_once('/') {
            Some((artifact_type, suffix)) => (artifact_type, format!("/{suffix}")),
            None => (operation, String::new()),
        };
        handle_buildid(ctx, build_id, artifact_type, &suffix).await
    } else if path == "/metrics" {
        handle_metrics(ctx)
    } else {
        Err(HttpError::bad_request("webapi error, unrecognized operation"))
    }
}

async fn handle_buildid(
    ctx: &ServiceContext,
    build_id: &str,
    artifact_type: &str,
    suffix: &str,
) -> Result<Response<Body>, HttpError> {
    let kind = ArtifactKind::from_request(artifact_type)
        .ok_or_else(|| HttpError::bad_request("invalid artifacttype"))?;
    if kind == ArtifactKind::Source && suffix.is_empty() {
        return Err(HttpError::bad_request("invalid source suffix"));
    }
    if build_id.len() < 2
        || build_id.len() % 2 != 0
        || !build_id
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    {
        return Err(HttpError::bad_request("invalid buildid"));
    }

    info!("searching for buildid={build_id} artifacttype={artifact_type} suffix={suffix}");
    let source_path = (kind == ArtifactKind::Source).then_some(suffix);
    let entries = match ctx.store.probe(build_id, kind, source_path) {
        Ok(entries) => entries,
        // A store failure is recovered like any failed candidate row:
        // upstream may still have the artifact.
        Err(e) => {
            debug!("index probe for {build_id} failed: {e}");
            Vec::new()
        }
    };

    for entry in entries {
        if let Some(response) = try_serve_entry(&entry).await {
            return Ok(response);
        }
    }

    // Not known locally. Last ditch effort: defer to the upstream servers.
    fetch_upstream(ctx, kind, build_id, suffix)
        .await
        .ok_or_else(HttpError::not_found)
}

async fn try_serve_entry(entry: &IndexEntry) -> Option<Response<Body>> {
    match &entry.locator {
        Locator::File { path } => serve_file(path, entry.mtime).await,
        Locator::Archive { archive, member } => serve_archive_member(archive, member).await,
    }
}

async fn serve_file(path: &str, indexed_mtime: i64) -> Option<Response<Body>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            debug!("cannot open {path}: {e}");
            return None;
        }
    };
    let meta = match file.metadata() {
        Ok(meta) => meta,
        Err(e) => {
            debug!("cannot stat {path}: {e}");
            return None;
        }
    };
    if meta.mtime() != indexed_mtime {
        // The file was replaced since indexing; a rescan will notice.
        debug!("mtime mismatch for {path}");
        return None;
    }
    info!("serving file {path}");
    Some(file_response(file, meta.len(), meta.mtime()))
}

async fn serve_archive_member(archive_path: &str, member: &str) -> Option<Response<Body>> {
    let archive_path_owned = archive_path.to_string();
    let member_name = member.to_string();
    let extracted = tokio::task::spawn_blocking(move || {
        extract_member(&archive_path_owned, &member_name)
    })
    .await;
    match extracted {
        Ok(Ok(Some((file, size, mtime)))) => {
            info!("serving archive {archive_path} member {member}");
            Some(file_response(file, size, mtime))
        }
        Ok(Ok(None)) => {
            debug!("member {member} not present in {archive_path}");
            None
        }
        Ok(Err(e)) => {
            debug!("cannot extract {member} from {archive_path}: {e}");
            None
        }
        Err(_) => None,
    }
}

fn extract_member(
    archive_path: &str,
    member: &str,
) -> Result<Option<(std::fs::File, u64, i64)>, ArchiveError> {
    let mut reader = archive::open_archive(Path::new(archive_path))?;
    while let Some(entry) = reader.next_entry()? {
        if !entry.is_regular_file() || entry.name != member {
            continue;
        }
        let mut temp = tempfile::tempfile()?;
        let size = reader.extract_to(&entry, &mut temp)?;
        temp.seek(SeekFrom::Start(0))?;
        return Ok(Some((temp, size, entry.mtime)));
    }
    Ok(None)
}

async fn fetch_upstream(
    ctx: &ServiceContext,
    kind: ArtifactKind,
    build_id: &str,
    suffix: &str,
) -> Option<Response<Body>> {
    let found = match kind {
        ArtifactKind::Debuginfo => ctx.upstream.find_debuginfo(build_id).await,
        ArtifactKind::Executable => ctx.upstream.find_executable(build_id).await,
        ArtifactKind::Source => ctx.upstream.find_source(build_id, suffix).await,
    };
    match found {
        Ok(artifact) => {
            let meta = artifact.file.metadata().ok()?;
            info!("serving {} from upstream cache", artifact.path.display());
            Some(file_response(artifact.file, meta.len(), meta.mtime()))
        }
        Err(e) => {
            debug!("upstream lookup of {build_id} failed: {e}");
            None
        }
    }
}

fn handle_metrics(ctx: &ServiceContext) -> Result<Response<Body>, HttpError> {
    let stats = match ctx.store.stats() {
        Ok(stats) => stats,
        Err(e) => {
            debug!("cannot collect index statistics: {e}");
            return Err(HttpError::not_found());
        }
    };
    let mut body = String::new();
    for (sourcetype, artifacttype, count) in stats {
        body.push_str(&format!(
            "debugserver_index_entries{{sourcetype=\"{sourcetype}\",\
             artifacttype=\"{artifacttype}\"}} {count}\n"
        ));
    }
    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    Ok(response)
}

fn file_response(file: std::fs::File, len: u64, mtime: i64) -> Response<Body> {
    let stream = ReaderStream::new(tokio::fs::File::from_std(file));
    let mut response = Response::new(Body::wrap_stream(stream));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(len));
    if let Some(date) = http_date(mtime) {
        if let Ok(value) = header::HeaderValue::from_str(&date) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("public"),
    );
    response
}

/// RFC-1123 GMT form, e.g. `Mon, 02 Jan 2006 15:04:05 GMT`.
fn http_date(mtime: i64) -> Option<String> {
    let time = Utc.timestamp_opt(mtime, 0).single()?;
    Some(time.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::tests::{ElfFixture, BUILD_ID_HEX};
    use crate::index::IndexStore;
    use crate::Config;
    use std::sync::atomic::AtomicBool;

    fn test_context() -> (Arc<ServiceContext>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::open(&dir.path().join("index.sqlite")).unwrap();
        let upstream = debugserver_client::Client::new(
            vec![],
            debugserver_client::Cache::at(dir.path().join("client-cache")),
            Duration::from_secs(5),
        )
        .unwrap();
        let ctx = ServiceContext {
            config: Config {
                file_roots: vec![],
                archive_roots: vec![],
                db_path: dir.path().join("index.sqlite"),
                port: 0,
                rescan_seconds: 0,
            },
            store,
            interrupted: AtomicBool::new(false),
            upstream,
        };
        (Arc::new(ctx), dir)
    }

    async fn get(ctx: &Arc<ServiceContext>, path: &str) -> Response<Body> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .unwrap();
        handle_request(req, ctx.clone()).await.unwrap()
    }

    #[tokio::test]
    async fn rejects_bad_grammar() {
        let (ctx, _dir) = test_context();

        for path in [
            "/buildid",
            "/buildid/",
            "/buildid/abcd",
            "/buildid/abcd/frobnicate",
            "/buildid/abc/debuginfo",       // odd length
            "/buildid/ABCD/debuginfo",      // not lowercase hex
            "/buildid/zz/debuginfo",        // not hex
            "/buildid/abcd/source",         // missing source path
            "/somewhere/else",
        ] {
            let response = get(&ctx, path).await;
            assert_eq!(
                response.status(),
                StatusCode::BAD_REQUEST,
                "expected 400 for {path}"
            );
        }
    }

    #[tokio::test]
    async fn rejects_non_get() {
        let (ctx, _dir) = test_context();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/buildid/abcd/debuginfo")
            .body(Body::empty())
            .unwrap();
        let response = handle_request(req, ctx).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_buildid_is_not_found() {
        let (ctx, _dir) = test_context();
        let response = get(&ctx, "/buildid/abcd/debuginfo").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serves_an_indexed_file() {
        let (ctx, dir) = test_context();
        let exe_path = dir.path().join("hello");
        std::fs::write(&exe_path, ElfFixture::default().build()).unwrap();
        let mtime = std::fs::metadata(&exe_path).unwrap().mtime();
        ctx.store
            .upsert_file_artifact(
                BUILD_ID_HEX,
                ArtifactKind::Executable,
                &exe_path.to_string_lossy(),
                mtime,
            )
            .unwrap();

        let response = get(&ctx, &format!("/buildid/{BUILD_ID_HEX}/executable")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::LAST_MODIFIED));
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "public"
        );
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], &ElfFixture::default().build()[..]);
    }

    #[tokio::test]
    async fn skips_rows_with_stale_mtime() {
        let (ctx, dir) = test_context();
        let exe_path = dir.path().join("app");
        std::fs::write(&exe_path, b"new contents").unwrap();
        let mtime = std::fs::metadata(&exe_path).unwrap().mtime();
        ctx.store
            .upsert_file_artifact(
                BUILD_ID_HEX,
                ArtifactKind::Executable,
                &exe_path.to_string_lossy(),
                mtime - 100,
            )
            .unwrap();

        // No fallback: the row is left for the next rescan to overwrite.
        let response = get(&ctx, &format!("/buildid/{BUILD_ID_HEX}/executable")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_lists_index_counts() {
        let (ctx, _dir) = test_context();
        ctx.store
            .upsert_file_artifact(BUILD_ID_HEX, ArtifactKind::Debuginfo, "/srv/a.debug", 1)
            .unwrap();
        let response = get(&ctx, "/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body = std::str::from_utf8(&body).unwrap();
        assert!(body.contains("artifacttype=\"D\"} 1"));
    }

    #[test]
    fn http_date_is_rfc1123() {
        assert_eq!(
            http_date(1136214245).as_deref(),
            Some("Mon, 02 Jan 2006 15:04:05 GMT")
        );
    }
}
