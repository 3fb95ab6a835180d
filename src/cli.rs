use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "debugserver",
    version,
    about = "Serve debuginfo-related content across HTTP."
)]
pub struct Opt {
    /// Scan ELF/DWARF files under the given directory. Repeatable.
    #[arg(short = 'F', long = "source-files", value_name = "PATH")]
    pub source_files: Vec<PathBuf>,

    /// Scan archive files under the given directory. Repeatable.
    #[arg(short = 'R', long = "source-rpms", value_name = "PATH")]
    pub source_rpms: Vec<PathBuf>,

    /// Path to the sqlite database.
    #[arg(short = 'd', long = "database", value_name = "FILE")]
    pub database: Option<PathBuf>,

    /// HTTP port to listen on.
    #[arg(short = 'p', long = "port", value_name = "NUM", default_value_t = 8002)]
    pub port: u16,

    /// Number of seconds to wait between rescans.
    #[arg(
        short = 't',
        long = "rescan-time",
        value_name = "SECONDS",
        default_value_t = 300
    )]
    pub rescan_time: u64,

    /// Increase verbosity. Repeatable.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Opt {
    pub fn config(&self) -> crate::Config {
        let db_path = self.database.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/"))
                .join(".debugserver.sqlite")
        });
        crate::Config {
            file_roots: self.source_files.clone(),
            archive_roots: self.source_rpms.clone(),
            db_path,
            port: self.port,
            rescan_seconds: self.rescan_time,
        }
    }
}
