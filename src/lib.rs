//! debugserver: index ELF build IDs found on disk and in archives, and
//! serve the corresponding debuginfo, executables and source files over
//! HTTP. Lookups that miss the local index are delegated to upstream
//! servers through [`debugserver_client`].

pub mod archive;
pub mod classify;
pub mod cli;
pub mod index;
pub mod scanner;
pub mod server;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use crate::index::IndexStore;

/// Process-wide configuration, fixed at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub file_roots: Vec<PathBuf>,
    pub archive_roots: Vec<PathBuf>,
    pub db_path: PathBuf,
    pub port: u16,
    pub rescan_seconds: u64,
}

/// Everything the scanners and the HTTP handlers share: the configuration,
/// the index store, the interrupt flag the signal handler raises, and the
/// upstream client. Constructed once in startup and handed around in an
/// `Arc`.
pub struct ServiceContext {
    pub config: Config,
    pub store: IndexStore,
    pub interrupted: AtomicBool,
    pub upstream: debugserver_client::Client,
}
