//! Background scanners that populate the index.
//!
//! One long-lived thread per configured root, in two flavors: plain-file
//! roots, whose ELF/DWARF files are indexed in place, and archive roots,
//! whose `.rpm` files are unpacked member by member. Every per-file
//! problem is logged and negative-cached; only a store failure aborts a
//! pass (the next rescan retries).

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::archive::{self, ArchiveError};
use crate::classify::{classify_file, Classification};
use crate::index::{ArtifactKind, LocatorTag, StoreError};
use crate::ServiceContext;

const ARCHIVE_SUFFIX: &str = ".rpm";

/// Counters accumulated over one scan pass and logged at its end.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStats {
    pub scanned: u64,
    pub cached: u64,
    pub debuginfo: u64,
    pub executable: u64,
    pub sourcefiles: u64,
    pub archives: u64,
}

/// Spawn one scanner thread per configured root. The threads re-scan
/// every `rescan_seconds` and exit when the interrupt flag is set.
pub fn spawn_scanners(ctx: &Arc<ServiceContext>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    let roots = ctx
        .config
        .file_roots
        .iter()
        .map(|r| (r.clone(), false))
        .chain(ctx.config.archive_roots.iter().map(|r| (r.clone(), true)));
    for (root, archives) in roots {
        let ctx = ctx.clone();
        let name = format!(
            "scan-{}:{}",
            if archives { "rpms" } else { "files" },
            root.display()
        );
        let spawned = thread::Builder::new()
            .name(name.clone())
            .spawn(move || scanner_loop(&ctx, &root, archives));
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => warn!("cannot spawn scanner thread {name}: {e}"),
        }
    }
    handles
}

fn scanner_loop(ctx: &ServiceContext, root: &Path, archives: bool) {
    debug!("scanning {} for {}", root.display(), if archives { "archives" } else { "files" });
    let mut rescan_timer = 0u64;
    while !ctx.interrupted.load(Ordering::Relaxed) {
        if rescan_timer == 0 {
            let started = Instant::now();
            let result = if archives {
                scan_archive_root(ctx, root)
            } else {
                scan_file_root(ctx, root)
            };
            match result {
                Ok(stats) => info!(
                    "traversed {} in {:.3}s: scanned={} cached={} archives={} \
                     debuginfo={} executable={} source={}",
                    root.display(),
                    started.elapsed().as_secs_f64(),
                    stats.scanned,
                    stats.cached,
                    stats.archives,
                    stats.debuginfo,
                    stats.executable,
                    stats.sourcefiles,
                ),
                // A store error ends this pass only; retry at the next one.
                Err(e) => warn!("scan of {} aborted: {e}", root.display()),
            }
        }
        thread::sleep(Duration::from_secs(1));
        rescan_timer += 1;
        if ctx.config.rescan_seconds > 0 {
            rescan_timer %= ctx.config.rescan_seconds;
        }
    }
}

/// One pass of the plain-file scanner over `root`.
pub fn scan_file_root(ctx: &ServiceContext, root: &Path) -> Result<ScanStats, StoreError> {
    let mut scanner = FileScanner { ctx };
    walk_root(ctx, root, &mut scanner)
}

/// One pass of the archive scanner over `root`.
pub fn scan_archive_root(ctx: &ServiceContext, root: &Path) -> Result<ScanStats, StoreError> {
    let mut scanner = ArchiveScanner { ctx };
    walk_root(ctx, root, &mut scanner)
}

/// Per-entry hooks of a directory traversal. `leave_dir` fires post-order,
/// once all of a directory's descendants have been visited.
trait ScanVisitor {
    fn visit_file(
        &mut self,
        path: &Path,
        mtime: i64,
        dir: &str,
        stats: &mut ScanStats,
    ) -> Result<(), StoreError>;

    fn leave_dir(&mut self, dir: &str, stats: &mut ScanStats) -> Result<(), StoreError>;
}

/// Physical traversal: symlinks are not followed and mount points are not
/// crossed. All paths handed to the visitor are absolute; the database
/// must stay resolvable from a run in a different working directory.
fn walk_root<V: ScanVisitor>(
    ctx: &ServiceContext,
    root: &Path,
    visitor: &mut V,
) -> Result<ScanStats, StoreError> {
    let mut stats = ScanStats::default();
    let canonical = match fs::canonicalize(root) {
        Ok(canonical) => canonical,
        Err(e) => {
            warn!("cannot resolve scan root {}: {e}", root.display());
            return Ok(stats);
        }
    };
    let meta = match fs::symlink_metadata(&canonical) {
        Ok(meta) => meta,
        Err(e) => {
            warn!("cannot stat scan root {}: {e}", canonical.display());
            return Ok(stats);
        }
    };

    if meta.is_dir() {
        walk_dir(ctx, &canonical, meta.dev(), visitor, &mut stats)?;
    } else {
        // A root naming a single file still gets the post-order hook, with
        // "." standing in for the missing directory context.
        stats.scanned += 1;
        visitor.visit_file(&canonical, meta.mtime(), ".", &mut stats)?;
        visitor.leave_dir(".", &mut stats)?;
    }
    Ok(stats)
}

fn walk_dir<V: ScanVisitor>(
    ctx: &ServiceContext,
    dir: &Path,
    dev: u64,
    visitor: &mut V,
    stats: &mut ScanStats,
) -> Result<(), StoreError> {
    let dir_name = dir.to_string_lossy().into_owned();
    trace!("traversing {dir_name}");

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("cannot read directory {dir_name}: {e}");
            return Ok(());
        }
    };
    let mut names: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    names.sort();

    for path in names {
        if ctx.interrupted.load(Ordering::Relaxed) {
            break;
        }
        stats.scanned += 1;
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) => {
                debug!("cannot stat {}: {e}", path.display());
                continue;
            }
        };
        let file_type = meta.file_type();
        if file_type.is_symlink() {
            // Symbolic links do not enter the database.
            continue;
        }
        if file_type.is_dir() {
            if meta.dev() != dev {
                debug!("not crossing mount point at {}", path.display());
                continue;
            }
            walk_dir(ctx, &path, dev, visitor, stats)?;
        } else if file_type.is_file() {
            visitor.visit_file(&path, meta.mtime(), &dir_name, stats)?;
        }
    }

    // This directory hierarchy is finished; resolve whatever was waiting
    // for it.
    visitor.leave_dir(&dir_name, stats)
}

struct FileScanner<'a> {
    ctx: &'a ServiceContext,
}

impl ScanVisitor for FileScanner<'_> {
    fn visit_file(
        &mut self,
        path: &Path,
        mtime: i64,
        dir: &str,
        stats: &mut ScanStats,
    ) -> Result<(), StoreError> {
        let store = &self.ctx.store;
        let name = path.to_string_lossy().into_owned();
        if store.is_fresh(LocatorTag::File, &name, mtime)? {
            stats.cached += 1;
            return Ok(());
        }

        let classification = match fs::File::open(path) {
            Ok(file) => match classify_file(&file) {
                Ok(classification) => classification,
                Err(e) => {
                    debug!("cannot classify {name}: {e}");
                    Classification::negative()
                }
            },
            Err(e) => {
                debug!("cannot open {name}: {e}");
                Classification::negative()
            }
        };

        if classification.build_id.is_empty() || classification.is_negative() {
            store.upsert_negative(LocatorTag::File, &name, mtime)?;
        } else {
            let build_id = &classification.build_id;
            if classification.is_executable {
                stats.executable += 1;
                store.upsert_file_artifact(build_id, ArtifactKind::Executable, &name, mtime)?;
            }
            if classification.is_debuginfo {
                stats.debuginfo += 1;
                store.upsert_file_artifact(build_id, ArtifactKind::Debuginfo, &name, mtime)?;
            }
            for source in &classification.source_paths {
                stats.sourcefiles += 1;
                store.pending_source_insert(LocatorTag::File, build_id, source, dir)?;
            }
            trace!(
                "recorded buildid={build_id} file={name} mtime={mtime} as \
                 executable={} debuginfo={}",
                classification.is_executable,
                classification.is_debuginfo,
            );
        }

        // The file may have been replaced since an earlier pass.
        store.delete_stale(LocatorTag::File, &name, mtime)?;
        Ok(())
    }

    fn leave_dir(&mut self, dir: &str, _stats: &mut ScanStats) -> Result<(), StoreError> {
        let store = &self.ctx.store;
        for (build_id, srcname) in store.pending_sources(LocatorTag::File, dir)? {
            let candidate = if srcname.starts_with('/') {
                srcname.clone()
            } else {
                format!("{dir}/{srcname}")
            };
            // Unresolvable source files are not a serious problem.
            let Ok(resolved) = fs::canonicalize(&candidate) else {
                continue;
            };
            let Ok(meta) = fs::metadata(&resolved) else {
                continue;
            };
            let resolved = resolved.to_string_lossy();
            debug!("recorded buildid={build_id} file={resolved} as source {srcname}");
            store.upsert_file_source(&build_id, &srcname, &resolved, meta.mtime())?;
        }
        store.pending_sources_drop(LocatorTag::File, dir)
    }
}

struct ArchiveScanner<'a> {
    ctx: &'a ServiceContext,
}

#[derive(Debug, Error)]
enum ArchiveScanError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ScanVisitor for ArchiveScanner<'_> {
    fn visit_file(
        &mut self,
        path: &Path,
        mtime: i64,
        dir: &str,
        stats: &mut ScanStats,
    ) -> Result<(), StoreError> {
        let store = &self.ctx.store;
        let name = path.to_string_lossy().into_owned();
        if !name.ends_with(ARCHIVE_SUFFIX) {
            return Ok(());
        }
        stats.archives += 1;
        if store.is_fresh(LocatorTag::Archive, &name, mtime)? {
            stats.cached += 1;
            return Ok(());
        }

        let counts = match self.scan_archive(path, &name, mtime, dir, stats) {
            Ok(counts) => counts,
            Err(ArchiveScanError::Store(e)) => return Err(e),
            Err(e) => {
                // Unreadable or corrupt archive; treat like a file with no
                // indexable content.
                debug!("cannot scan archive {name}: {e}");
                (0, 0)
            }
        };

        if counts == (0, 0) {
            store.upsert_negative(LocatorTag::Archive, &name, mtime)?;
        }
        Ok(())
    }

    fn leave_dir(&mut self, dir: &str, _stats: &mut ScanStats) -> Result<(), StoreError> {
        let store = &self.ctx.store;
        let matched = store.source_archive_join(dir)?;
        if matched > 0 {
            debug!("source-archive join under {dir} matched {matched} files");
        }
        store.pending_sources_drop(LocatorTag::Archive, dir)?;
        store.archive_members_drop(dir)
    }
}

impl ArchiveScanner<'_> {
    /// Unpack one archive and index its members. Returns the number of
    /// (executable, debuginfo) rows recorded for it.
    fn scan_archive(
        &self,
        path: &Path,
        name: &str,
        mtime: i64,
        dir: &str,
        stats: &mut ScanStats,
    ) -> Result<(u64, u64), ArchiveScanError> {
        let store = &self.ctx.store;
        let mut reader = archive::open_archive(path)?;
        trace!("extract pipeline scanning {name}");

        let mut executables = 0;
        let mut debuginfos = 0;
        loop {
            if self.ctx.interrupted.load(Ordering::Relaxed) {
                break;
            }
            let Some(entry) = reader.next_entry()? else {
                break;
            };
            if !entry.is_regular_file() {
                continue;
            }
            store.archive_member_insert(name, mtime, &entry.name, dir)?;

            // mkstemp-and-unlink: the fd is the only handle, the OS
            // reclaims the bytes as soon as it is dropped.
            let mut temp = tempfile::tempfile()?;
            reader.extract_to(&entry, &mut temp)?;
            let classification = match classify_file(&temp) {
                Ok(classification) => classification,
                Err(e) => {
                    debug!("cannot classify member {} of {name}: {e}", entry.name);
                    continue;
                }
            };
            if classification.build_id.is_empty() {
                continue;
            }

            let build_id = &classification.build_id;
            if classification.is_executable {
                executables += 1;
                stats.executable += 1;
                store.upsert_archive_artifact(
                    build_id,
                    ArtifactKind::Executable,
                    name,
                    &entry.name,
                    mtime,
                )?;
            }
            if classification.is_debuginfo {
                debuginfos += 1;
                stats.debuginfo += 1;
                store.upsert_archive_artifact(
                    build_id,
                    ArtifactKind::Debuginfo,
                    name,
                    &entry.name,
                    mtime,
                )?;
            }
            for source in &classification.source_paths {
                stats.sourcefiles += 1;
                store.pending_source_insert(LocatorTag::Archive, build_id, source, dir)?;
            }
            if classification.is_executable || classification.is_debuginfo {
                trace!(
                    "recorded buildid={build_id} archive={name} member={} mtime={mtime}",
                    entry.name
                );
            }
        }
        Ok((executables, debuginfos))
    }
}
