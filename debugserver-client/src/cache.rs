//! The on-disk download cache.
//!
//! Layout: one directory per build-id under the cache root, one file per
//! (kind, suffix) pair inside it, plus a `cache_clean_interval_s` marker
//! file whose mtime records the last eviction sweep and whose contents is
//! the sweep interval in seconds.
//!
//! Entries are published by renaming a temporary file into place, so a
//! file at its final path is always complete. Concurrent fills of the same
//! key race benignly: both produce identical bytes and the loser's rename
//! overwrites the winner's.

use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use log::trace;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

pub(crate) const CLEAN_INTERVAL_FILENAME: &str = "cache_clean_interval_s";
const DEFAULT_CLEAN_INTERVAL: Duration = Duration::from_secs(600);

/// Escape a source path for use in a cache file name: every `/` and `.`
/// byte becomes `#`. This naming is part of the cache's on-disk contract.
pub fn escape_path_suffix(path: &str) -> String {
    path.chars()
        .map(|c| if c == '/' || c == '.' { '#' } else { c })
        .collect()
}

/// The file name a cached artifact is stored under within its build-id
/// directory: the kind, plus the escaped source path for source lookups.
pub(crate) fn cache_file_name(kind: &str, source_path: Option<&str>) -> String {
    match source_path {
        Some(path) => format!("{kind}{}", escape_path_suffix(path)),
        None => kind.to_string(),
    }
}

pub struct Cache {
    root: PathBuf,
}

impl Cache {
    /// Cache root from `$DEBUGSERVER_CACHE_PATH`, falling back to
    /// `~/.cache/debugserver` (with `/` standing in for a missing home).
    pub fn from_env() -> Cache {
        let root = match std::env::var_os(crate::CACHE_PATH_ENV_VAR) {
            Some(path) => PathBuf::from(path),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/"))
                .join(".cache")
                .join("debugserver"),
        };
        Cache { root }
    }

    pub fn at(root: PathBuf) -> Cache {
        Cache { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn entry_dir(&self, build_id: &str) -> PathBuf {
        self.root.join(build_id)
    }

    pub(crate) fn entry_path(&self, build_id: &str, file_name: &str) -> PathBuf {
        self.entry_dir(build_id).join(file_name)
    }

    /// Look up a cached entry, running the eviction sweep first if it is
    /// due. Returns an open read-only handle on a hit.
    pub fn lookup(&self, build_id: &str, file_name: &str) -> io::Result<Option<fs::File>> {
        self.maintain()?;
        match fs::File::open(self.entry_path(build_id, file_name)) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Start filling an entry: create the build-id directory (mode 0700)
    /// and a temporary file inside it. The caller writes the artifact into
    /// the temporary file and either [`publish`](Self::publish)es or
    /// [`abandon`](Self::abandon)s it.
    pub(crate) fn begin_fill(&self, build_id: &str) -> io::Result<NamedTempFile> {
        let dir = self.entry_dir(build_id);
        if !dir.is_dir() {
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700);
            match builder.create(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }
        }
        NamedTempFile::new_in(&dir)
    }

    /// Atomically publish a filled temporary file at `target`, stamping it
    /// with the upstream's modification time (best effort) first. Returns
    /// a fresh read-only handle on the published file.
    pub(crate) fn publish(
        &self,
        temp: NamedTempFile,
        target: &Path,
        mtime: SystemTime,
    ) -> io::Result<fs::File> {
        let _ = filetime::set_file_mtime(temp.path(), FileTime::from_system_time(mtime));
        temp.persist(target).map_err(|e| e.error)?;
        fs::File::open(target)
    }

    /// Drop a failed fill: unlink the temporary file and remove the
    /// build-id directory if that left it empty.
    pub(crate) fn abandon(&self, temp: NamedTempFile, build_id: &str) {
        drop(temp);
        let _ = fs::remove_dir(self.entry_dir(build_id));
    }

    /// Create the cache skeleton if missing; sweep out aged entries when
    /// the clean interval has elapsed since the last sweep.
    fn maintain(&self) -> io::Result<()> {
        let interval_path = self.root.join(CLEAN_INTERVAL_FILENAME);
        let meta = match fs::metadata(&interval_path) {
            Ok(meta) => meta,
            Err(_) => {
                fs::create_dir_all(&self.root)?;
                fs::write(
                    &interval_path,
                    format!("{}\n", DEFAULT_CLEAN_INTERVAL.as_secs()),
                )?;
                return Ok(());
            }
        };

        let interval = fs::read_to_string(&interval_path)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CLEAN_INTERVAL);
        let now = SystemTime::now();
        let elapsed = meta
            .modified()
            .ok()
            .and_then(|last| now.duration_since(last).ok())
            .unwrap_or_default();
        if elapsed < interval {
            return Ok(());
        }

        self.sweep(interval, now);
        filetime::set_file_mtime(&interval_path, FileTime::from_system_time(now))?;
        Ok(())
    }

    fn sweep(&self, max_age: Duration, now: SystemTime) {
        // The eviction clock is the file mtime, which was copied from the
        // upstream Last-Modified header; a popular but ancient artifact
        // will be evicted too.
        for entry in WalkDir::new(&self.root).min_depth(1).contents_first(true) {
            let Ok(entry) = entry else { continue };
            if entry.file_type().is_dir() {
                // Gone once its last file is evicted.
                let _ = fs::remove_dir(entry.path());
                continue;
            }
            if entry.depth() == 1 && entry.file_name() == CLEAN_INTERVAL_FILENAME {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age >= max_age {
                trace!("evicting {}", entry.path().display());
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ID: &str = "deadbeef00112233445566778899aabbccddee40";

    #[test]
    fn escaping_is_bit_exact() {
        assert_eq!(
            escape_path_suffix("/usr/src/foo/main.c"),
            "#usr#src#foo#main#c"
        );
        assert_eq!(escape_path_suffix("no-specials"), "no-specials");
        assert_eq!(cache_file_name("debuginfo", None), "debuginfo");
        assert_eq!(
            cache_file_name("source", Some("/usr/src/foo/main.c")),
            "source#usr#src#foo#main#c"
        );
    }

    #[test]
    fn first_lookup_creates_the_skeleton() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::at(dir.path().join("cache"));
        assert!(cache.lookup(ID, "debuginfo").unwrap().is_none());

        let interval = dir.path().join("cache").join(CLEAN_INTERVAL_FILENAME);
        let contents = fs::read_to_string(interval).unwrap();
        assert_eq!(contents.trim(), "600");
    }

    #[test]
    fn fill_publish_lookup_round_trip() {
        use std::io::Read;

        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::at(dir.path().to_path_buf());
        cache.lookup(ID, "debuginfo").unwrap();

        let mut temp = cache.begin_fill(ID).unwrap();
        temp.write_all(b"debug bytes").unwrap();
        let upstream_mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let target = cache.entry_path(ID, "debuginfo");
        cache.publish(temp, &target, upstream_mtime).unwrap();

        let mut file = cache.lookup(ID, "debuginfo").unwrap().unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"debug bytes");

        // The entry's mtime is the upstream mtime, the eviction clock.
        let meta = fs::metadata(&target).unwrap();
        assert_eq!(meta.modified().unwrap(), upstream_mtime);
    }

    #[test]
    fn abandoned_fill_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::at(dir.path().to_path_buf());
        cache.lookup(ID, "executable").unwrap();

        let mut temp = cache.begin_fill(ID).unwrap();
        temp.write_all(b"partial").unwrap();
        cache.abandon(temp, ID);

        assert!(!cache.entry_dir(ID).exists());
        assert!(cache.lookup(ID, "executable").unwrap().is_none());
    }

    #[test]
    fn sweep_evicts_aged_entries_and_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::at(dir.path().to_path_buf());
        cache.lookup(ID, "debuginfo").unwrap();

        // Fresh entry, old entry, in separate build-id directories.
        let fresh = cache.entry_path(ID, "debuginfo");
        fs::create_dir(cache.entry_dir(ID)).unwrap();
        fs::write(&fresh, b"fresh").unwrap();

        let old_id = "cafe0000000000000000000000000000000000ff";
        let old = cache.entry_path(old_id, "executable");
        fs::create_dir(cache.entry_dir(old_id)).unwrap();
        fs::write(&old, b"old").unwrap();
        let hour_ago = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(3600));
        filetime::set_file_mtime(&old, hour_ago).unwrap();

        // Interval 30s, last sweep two minutes ago: the next lookup sweeps.
        let interval_path = dir.path().join(CLEAN_INTERVAL_FILENAME);
        fs::write(&interval_path, "30").unwrap();
        let two_minutes_ago =
            FileTime::from_system_time(SystemTime::now() - Duration::from_secs(120));
        filetime::set_file_mtime(&interval_path, two_minutes_ago).unwrap();

        let before = SystemTime::now();
        cache.lookup(ID, "debuginfo").unwrap();

        assert!(fresh.exists());
        assert!(!old.exists());
        assert!(!cache.entry_dir(old_id).exists());
        // The sweep clock was pushed forward.
        assert!(fs::metadata(&interval_path).unwrap().modified().unwrap() >= before);
    }
}
