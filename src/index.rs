//! The persistent build-id index.
//!
//! A single sqlite file maps interned (build-id, artifact-kind) keys to the
//! physical location of an artifact: either a plain file on disk, or a
//! member of a packaged archive. Two scratch tables carry cross-references
//! that scanners can only resolve once a directory's traversal completes;
//! in steady state both are empty.
//!
//! The store is disposable. fsync is disabled, and a corrupt database file
//! is deleted and recreated on open; the scanners repopulate it.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use log::warn;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

// Roll this identifier for every schema incompatibility; older tables are
// dropped on open.
const SCHEMA: &str = "buildids2";

// Schema change history:
// buildids2: intern file names and build-ids into surrogate-key tables
// buildids1: original flat table
const SCHEMA_DDL: &str = "
create table if not exists buildids2_files (
        id integer primary key not null,
        name text unique not null);
create table if not exists buildids2_buildids (
        id integer primary key not null,
        hex text unique not null);
create table if not exists buildids2_norm (
        buildid integer,
        artifacttype text
            check (artifacttype is null or artifacttype in ('D', 'E', 'S')),
        artifactsrc integer
            check (artifacttype not in ('S') or artifactsrc is not null),
        mtime integer,
        sourcetype text(1) not null
            check (sourcetype in ('F', 'R')),
        source0 integer not null,
        source1 integer,
        foreign key (buildid) references buildids2_buildids(id) on update cascade on delete cascade,
        foreign key (artifactsrc) references buildids2_files(id) on update cascade on delete cascade,
        foreign key (source0) references buildids2_files(id) on update cascade on delete cascade,
        foreign key (source1) references buildids2_files(id) on update cascade on delete cascade,
        unique (buildid, artifacttype, artifactsrc, sourcetype, source0) on conflict replace);
create index if not exists buildids2_idx1 on buildids2_norm (buildid, artifacttype);
create index if not exists buildids2_idx2 on buildids2_norm (mtime, sourcetype, source0);

create table if not exists buildids2_bolo (
        buildid text not null,
        srcname text not null,
        sourcetype text(1) not null
            check (sourcetype in ('F', 'R')),
        dirname text not null,
        unique (buildid, srcname, sourcetype, dirname) on conflict ignore);
create index if not exists buildids2_bolo_idx1 on buildids2_bolo (sourcetype, dirname);

create table if not exists buildids2_rfolo (
        source0 text not null,
        mtime integer not null,
        source1 text not null,
        dirname text not null,
        unique (source0, source1, dirname) on conflict replace);
create index if not exists buildids2_rfolo_idx1 on buildids2_rfolo (source0, dirname);

drop table if exists buildids1;
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot reset corrupt database: {0}")]
    Io(#[from] io::Error),
}

/// The kind of artifact a lookup asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Debuginfo,
    Executable,
    Source,
}

impl ArtifactKind {
    fn code(self) -> &'static str {
        match self {
            ArtifactKind::Debuginfo => "D",
            ArtifactKind::Executable => "E",
            ArtifactKind::Source => "S",
        }
    }

    /// Parse the kind component of a lookup URL.
    pub fn from_request(s: &str) -> Option<Self> {
        match s {
            "debuginfo" => Some(ArtifactKind::Debuginfo),
            "executable" => Some(ArtifactKind::Executable),
            "source" => Some(ArtifactKind::Source),
            _ => None,
        }
    }
}

/// Distinguishes plain files from archive members at the store level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorTag {
    File,
    Archive,
}

impl LocatorTag {
    fn code(self) -> &'static str {
        match self {
            LocatorTag::File => "F",
            LocatorTag::Archive => "R",
        }
    }
}

/// Physical origin of an indexed artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    File { path: String },
    Archive { archive: String, member: String },
}

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub mtime: i64,
    pub locator: Locator,
}

/// Handle on the index database. Internally serializes all access; clones
/// of the `Arc` holding it can be used from any thread.
pub struct IndexStore {
    conn: Mutex<Connection>,
}

impl IndexStore {
    /// Open or create the database at `path`, migrating old schemas by
    /// dropping their tables. A corrupt database file is deleted and
    /// recreated; its contents will be repopulated by the next scan pass.
    pub fn open(path: &Path) -> Result<IndexStore, StoreError> {
        match Self::open_once(path) {
            Err(StoreError::Sqlite(e)) if is_corrupt(&e) => {
                warn!("database {} is corrupt ({e}), recreating", path.display());
                fs::remove_file(path)?;
                Self::open_once(path)
            }
            other => other,
        }
    }

    fn open_once(path: &Path) -> Result<IndexStore, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        // This index is disposable; don't pay for fsync.
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_DDL)?;
        Ok(IndexStore {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory store, for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<IndexStore, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_DDL)?;
        Ok(IndexStore {
            conn: Mutex::new(conn),
        })
    }

    /// Record a (build-id, kind) artifact located at a plain file.
    pub fn upsert_file_artifact(
        &self,
        build_id: &str,
        kind: ArtifactKind,
        path: &str,
        mtime: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        intern(&conn, build_id, path)?;
        conn.prepare_cached(&format!(
            "insert or replace into {SCHEMA}_norm \
             (buildid, artifacttype, artifactsrc, mtime, sourcetype, source0, source1) \
             values ((select id from {SCHEMA}_buildids where hex = ?1), ?2, null, ?3, 'F', \
                     (select id from {SCHEMA}_files where name = ?4), null)"
        ))?
        .execute(params![build_id, kind.code(), mtime, path])?;
        Ok(())
    }

    /// Record a (build-id, kind) artifact located inside an archive.
    pub fn upsert_archive_artifact(
        &self,
        build_id: &str,
        kind: ArtifactKind,
        archive: &str,
        member: &str,
        mtime: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        intern(&conn, build_id, archive)?;
        intern_file(&conn, member)?;
        conn.prepare_cached(&format!(
            "insert or replace into {SCHEMA}_norm \
             (buildid, artifacttype, artifactsrc, mtime, sourcetype, source0, source1) \
             values ((select id from {SCHEMA}_buildids where hex = ?1), ?2, null, ?3, 'R', \
                     (select id from {SCHEMA}_files where name = ?4), \
                     (select id from {SCHEMA}_files where name = ?5))"
        ))?
        .execute(params![build_id, kind.code(), mtime, archive, member])?;
        Ok(())
    }

    /// Record a source artifact: the file named `dwarf_name` by the debug
    /// info of `build_id` was found on disk at `resolved_path`.
    pub fn upsert_file_source(
        &self,
        build_id: &str,
        dwarf_name: &str,
        resolved_path: &str,
        mtime: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        intern(&conn, build_id, resolved_path)?;
        intern_file(&conn, dwarf_name)?;
        conn.prepare_cached(&format!(
            "insert or replace into {SCHEMA}_norm \
             (buildid, artifacttype, artifactsrc, mtime, sourcetype, source0, source1) \
             values ((select id from {SCHEMA}_buildids where hex = ?1), 'S', \
                     (select id from {SCHEMA}_files where name = ?2), ?3, 'F', \
                     (select id from {SCHEMA}_files where name = ?4), null)"
        ))?
        .execute(params![build_id, dwarf_name, mtime, resolved_path])?;
        Ok(())
    }

    /// Record that the file or archive at `path` contained nothing worth
    /// indexing at `mtime`, so rescans can skip it.
    pub fn upsert_negative(
        &self,
        tag: LocatorTag,
        path: &str,
        mtime: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        intern_file(&conn, path)?;
        conn.prepare_cached(&format!(
            "insert or replace into {SCHEMA}_norm \
             (buildid, artifacttype, artifactsrc, mtime, sourcetype, source0, source1) \
             values (null, null, null, ?1, ?2, \
                     (select id from {SCHEMA}_files where name = ?3), null)"
        ))?
        .execute(params![mtime, tag.code(), path])?;
        Ok(())
    }

    /// All locations known for a (build-id, kind, source-path) query,
    /// newest first. The caller attempts them in order.
    pub fn probe(
        &self,
        build_id: &str,
        kind: ArtifactKind,
        source_path: Option<&str>,
    ) -> Result<Vec<IndexEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let base = format!(
            "select n.mtime, n.sourcetype, f0.name, f1.name \
             from {SCHEMA}_norm n \
             join {SCHEMA}_buildids b on b.id = n.buildid \
             join {SCHEMA}_files f0 on f0.id = n.source0 \
             left join {SCHEMA}_files f1 on f1.id = n.source1 \
             where b.hex = ?1 and n.artifacttype = ?2"
        );
        let mut entries = Vec::new();
        let collect = |row: &rusqlite::Row| -> rusqlite::Result<IndexEntry> {
            let mtime: i64 = row.get(0)?;
            let tag: String = row.get(1)?;
            let source0: String = row.get(2)?;
            let source1: Option<String> = row.get(3)?;
            let locator = match (tag.as_str(), source1) {
                ("R", Some(member)) => Locator::Archive {
                    archive: source0,
                    member,
                },
                _ => Locator::File { path: source0 },
            };
            Ok(IndexEntry { mtime, locator })
        };
        match source_path {
            Some(src) => {
                let mut stmt = conn.prepare_cached(&format!(
                    "{base} and n.artifactsrc = \
                     (select id from {SCHEMA}_files where name = ?3) \
                     order by n.mtime desc"
                ))?;
                let rows = stmt.query_map(params![build_id, kind.code(), src], collect)?;
                for row in rows {
                    entries.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare_cached(&format!(
                    "{base} and n.artifactsrc is null order by n.mtime desc"
                ))?;
                let rows = stmt.query_map(params![build_id, kind.code()], collect)?;
                for row in rows {
                    entries.push(row?);
                }
            }
        }
        Ok(entries)
    }

    /// Is `path` already fully indexed at this mtime? Covers both positive
    /// and negative entries, so known-useless files short-circuit too.
    pub fn is_fresh(&self, tag: LocatorTag, path: &str, mtime: i64) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let found = conn
            .prepare_cached(&format!(
                "select 1 from {SCHEMA}_norm n \
                 join {SCHEMA}_files f0 on f0.id = n.source0 \
                 where n.sourcetype = ?1 and f0.name = ?2 and n.mtime = ?3 limit 1"
            ))?
            .query_row(params![tag.code(), path, mtime], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Delete entries for `path` older than `mtime`, after the file was
    /// replaced or recompiled under a new build-id.
    pub fn delete_stale(
        &self,
        tag: LocatorTag,
        path: &str,
        mtime: i64,
    ) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .prepare_cached(&format!(
                "delete from {SCHEMA}_norm where sourcetype = ?1 and mtime < ?2 \
                 and source0 = (select id from {SCHEMA}_files where name = ?3)"
            ))?
            .execute(params![tag.code(), mtime, path])?;
        Ok(deleted)
    }

    /// Note that build-id `build_id` wants a source file named `srcname`,
    /// to be looked for under the directory currently being traversed.
    ///
    /// For archive scans the name is also interned with a leading `.`,
    /// which is the form it will carry as a member of a -debuginfo/source
    /// archive and the form the source-archive join matches against.
    pub fn pending_source_insert(
        &self,
        tag: LocatorTag,
        build_id: &str,
        srcname: &str,
        dirname: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        if tag == LocatorTag::Archive {
            intern_file(&conn, srcname)?;
            if srcname.starts_with('/') {
                intern_file(&conn, &format!(".{srcname}"))?;
            }
        }
        conn.prepare_cached(&format!(
            "insert or ignore into {SCHEMA}_bolo (buildid, srcname, sourcetype, dirname) \
             values (?1, ?2, ?3, ?4)"
        ))?
        .execute(params![build_id, srcname, tag.code(), dirname])?;
        Ok(())
    }

    /// The (build-id, srcname) pairs still being looked for under `dirname`.
    pub fn pending_sources(
        &self,
        tag: LocatorTag,
        dirname: &str,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!(
            "select buildid, srcname from {SCHEMA}_bolo \
             where sourcetype = ?1 and dirname = ?2"
        ))?;
        let rows = stmt.query_map(params![tag.code(), dirname], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        let mut pending = Vec::new();
        for row in rows {
            pending.push(row?);
        }
        Ok(pending)
    }

    pub fn pending_sources_drop(&self, tag: LocatorTag, dirname: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.prepare_cached(&format!(
            "delete from {SCHEMA}_bolo where sourcetype = ?1 and dirname = ?2"
        ))?
        .execute(params![tag.code(), dirname])?;
        Ok(())
    }

    /// Note that `archive` (at `mtime`) contains a member named `member`,
    /// discovered while scanning under `dirname`.
    pub fn archive_member_insert(
        &self,
        archive: &str,
        mtime: i64,
        member: &str,
        dirname: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.prepare_cached(&format!(
            "insert or replace into {SCHEMA}_rfolo (source0, mtime, source1, dirname) \
             values (?1, ?2, ?3, ?4)"
        ))?
        .execute(params![archive, mtime, member, dirname])?;
        Ok(())
    }

    pub fn archive_members_drop(&self, dirname: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.prepare_cached(&format!("delete from {SCHEMA}_rfolo where dirname = ?1"))?
            .execute(params![dirname])?;
        Ok(())
    }

    /// Join pending source lookups against the archive members seen under
    /// `dirname`, emitting one source entry per match. Archive members
    /// carry a `.` name prefix, hence the concatenation in the match.
    pub fn source_archive_join(&self, dirname: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn
            .prepare_cached(&format!(
                "insert or replace into {SCHEMA}_norm \
                 (buildid, artifacttype, artifactsrc, mtime, sourcetype, source0, source1) \
                 select b.id, 'S', fb.id, rf.mtime, 'R', f0.id, f1.id \
                 from {SCHEMA}_buildids b, {SCHEMA}_bolo bolo, {SCHEMA}_rfolo rf, \
                      {SCHEMA}_files f0, {SCHEMA}_files f1, {SCHEMA}_files fb \
                 where b.hex = bolo.buildid \
                   and '.' || bolo.srcname = rf.source1 \
                   and bolo.sourcetype = 'R' \
                   and bolo.dirname = ?1 and rf.dirname = bolo.dirname \
                   and f0.name = rf.source0 and f1.name = rf.source1 \
                   and fb.name = bolo.srcname"
            ))?
            .execute(params![dirname])?;
        Ok(inserted)
    }

    /// Row counts grouped by (locator tag, artifact kind); negative-cache
    /// rows group under `-`.
    pub fn stats(&self) -> Result<Vec<(String, String, i64)>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!(
            "select n.sourcetype, coalesce(n.artifacttype, '-'), count(*) \
             from {SCHEMA}_norm n group by 1, 2 order by 1, 2"
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        let mut stats = Vec::new();
        for row in rows {
            stats.push(row?);
        }
        Ok(stats)
    }
}

fn intern_file(conn: &Connection, name: &str) -> rusqlite::Result<()> {
    conn.prepare_cached(&format!(
        "insert or ignore into {SCHEMA}_files (name) values (?1)"
    ))?
    .execute(params![name])?;
    Ok(())
}

fn intern(conn: &Connection, build_id: &str, file: &str) -> rusqlite::Result<()> {
    conn.prepare_cached(&format!(
        "insert or ignore into {SCHEMA}_buildids (hex) values (?1)"
    ))?
    .execute(params![build_id])?;
    intern_file(conn, file)
}

fn is_corrupt(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseCorrupt
                || err.code == rusqlite::ErrorCode::NotADatabase
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "deadbeef00112233445566778899aabbccddee40";

    #[test]
    fn file_artifact_round_trip() {
        let store = IndexStore::open_in_memory().unwrap();
        store
            .upsert_file_artifact(ID, ArtifactKind::Executable, "/srv/bin/hello", 1000)
            .unwrap();

        let entries = store.probe(ID, ArtifactKind::Executable, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mtime, 1000);
        assert_eq!(
            entries[0].locator,
            Locator::File {
                path: "/srv/bin/hello".into()
            }
        );
        assert!(store.probe(ID, ArtifactKind::Debuginfo, None).unwrap().is_empty());
    }

    #[test]
    fn replace_on_conflict_keeps_one_row() {
        let store = IndexStore::open_in_memory().unwrap();
        store
            .upsert_file_artifact(ID, ArtifactKind::Debuginfo, "/srv/a.debug", 1000)
            .unwrap();
        store
            .upsert_file_artifact(ID, ArtifactKind::Debuginfo, "/srv/a.debug", 2000)
            .unwrap();

        let entries = store.probe(ID, ArtifactKind::Debuginfo, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mtime, 2000);
    }

    #[test]
    fn probe_orders_newest_first() {
        let store = IndexStore::open_in_memory().unwrap();
        store
            .upsert_file_artifact(ID, ArtifactKind::Executable, "/old/hello", 100)
            .unwrap();
        store
            .upsert_file_artifact(ID, ArtifactKind::Executable, "/new/hello", 200)
            .unwrap();

        let entries = store.probe(ID, ArtifactKind::Executable, None).unwrap();
        let mtimes: Vec<i64> = entries.iter().map(|e| e.mtime).collect();
        assert_eq!(mtimes, [200, 100]);
    }

    #[test]
    fn freshness_and_stale_deletion() {
        let store = IndexStore::open_in_memory().unwrap();
        store
            .upsert_file_artifact(ID, ArtifactKind::Executable, "/srv/bin/hello", 1000)
            .unwrap();

        assert!(store.is_fresh(LocatorTag::File, "/srv/bin/hello", 1000).unwrap());
        assert!(!store.is_fresh(LocatorTag::File, "/srv/bin/hello", 2000).unwrap());
        assert!(!store.is_fresh(LocatorTag::Archive, "/srv/bin/hello", 1000).unwrap());

        // The file was replaced; rows at the old mtime go away.
        assert_eq!(store.delete_stale(LocatorTag::File, "/srv/bin/hello", 2000).unwrap(), 1);
        assert!(store.probe(ID, ArtifactKind::Executable, None).unwrap().is_empty());
    }

    #[test]
    fn negative_entries_are_fresh_but_unprobeable() {
        let store = IndexStore::open_in_memory().unwrap();
        store
            .upsert_negative(LocatorTag::File, "/srv/README", 500)
            .unwrap();
        assert!(store.is_fresh(LocatorTag::File, "/srv/README", 500).unwrap());
        let stats = store.stats().unwrap();
        assert_eq!(stats, vec![("F".to_string(), "-".to_string(), 1)]);
    }

    #[test]
    fn source_rows_require_the_source_path_key() {
        let store = IndexStore::open_in_memory().unwrap();
        store
            .upsert_file_source(ID, "/usr/src/foo/main.c", "/srv/src/foo/main.c", 1000)
            .unwrap();

        let entries = store
            .probe(ID, ArtifactKind::Source, Some("/usr/src/foo/main.c"))
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].locator,
            Locator::File {
                path: "/srv/src/foo/main.c".into()
            }
        );
        assert!(store
            .probe(ID, ArtifactKind::Source, Some("/usr/src/foo/other.c"))
            .unwrap()
            .is_empty());
        assert!(store.probe(ID, ArtifactKind::Source, None).unwrap().is_empty());
    }

    #[test]
    fn source_archive_join_emits_archive_source_rows() {
        let store = IndexStore::open_in_memory().unwrap();

        // The debuginfo archive's scan found a member that wants main.c...
        store
            .upsert_archive_artifact(
                ID,
                ArtifactKind::Debuginfo,
                "/pkgs/foo-debuginfo-1.rpm",
                "./usr/lib/debug/foo.debug",
                1000,
            )
            .unwrap();
        store
            .pending_source_insert(LocatorTag::Archive, ID, "/usr/src/foo/main.c", "/pkgs")
            .unwrap();

        // ...and a sibling archive carries it as a dot-prefixed member.
        store
            .archive_member_insert("/pkgs/foo-1.rpm", 900, "./usr/src/foo/main.c", "/pkgs")
            .unwrap();
        store
            .archive_member_insert("/pkgs/foo-1.rpm", 900, "./usr/bin/foo", "/pkgs")
            .unwrap();

        assert_eq!(store.source_archive_join("/pkgs").unwrap(), 1);
        store.pending_sources_drop(LocatorTag::Archive, "/pkgs").unwrap();
        store.archive_members_drop("/pkgs").unwrap();

        let entries = store
            .probe(ID, ArtifactKind::Source, Some("/usr/src/foo/main.c"))
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mtime, 900);
        assert_eq!(
            entries[0].locator,
            Locator::Archive {
                archive: "/pkgs/foo-1.rpm".into(),
                member: "./usr/src/foo/main.c".into()
            }
        );

        // Scratch tables drained.
        assert!(store
            .pending_sources(LocatorTag::Archive, "/pkgs")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn join_is_scoped_to_the_directory() {
        let store = IndexStore::open_in_memory().unwrap();
        store
            .pending_source_insert(LocatorTag::Archive, ID, "/usr/src/foo/main.c", "/pkgs")
            .unwrap();
        store
            .archive_member_insert("/other/foo-1.rpm", 900, "./usr/src/foo/main.c", "/other")
            .unwrap();
        assert_eq!(store.source_archive_join("/pkgs").unwrap(), 0);
    }

    #[test]
    fn corrupt_database_is_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.sqlite");
        std::fs::write(&db_path, b"definitely not a sqlite file, padded up\
                                   to look big enough to have a header")
            .unwrap();

        let store = IndexStore::open(&db_path).unwrap();
        store
            .upsert_file_artifact(ID, ArtifactKind::Executable, "/srv/bin/hello", 1)
            .unwrap();
        assert_eq!(store.probe(ID, ArtifactKind::Executable, None).unwrap().len(), 1);
    }
}
