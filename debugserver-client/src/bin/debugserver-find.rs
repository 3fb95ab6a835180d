//! Command-line front-end: resolve one artifact and print its cache path.

use clap::{Parser, ValueEnum};
use debugserver_client::Client;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FileType {
    Debuginfo,
    Executable,
    SourceFile,
}

#[derive(Debug, Parser)]
#[command(
    name = "debugserver-find",
    version,
    about = "Query the servers in $DEBUGSERVER_URLS for an artifact with the \
             given build ID and print the path of the cached result."
)]
struct Opt {
    /// What to fetch.
    #[arg(value_enum, value_name = "FILETYPE")]
    filetype: FileType,

    /// Build ID, as an even-length lowercase hex string.
    #[arg(value_name = "BUILDID")]
    buildid: String,

    /// Source file path (must begin with /); required for source-file.
    #[arg(value_name = "FILENAME")]
    filename: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let opt = Opt::parse();

    let client = match Client::from_env() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let result = match opt.filetype {
        FileType::Debuginfo => client.find_debuginfo(&opt.buildid).await,
        FileType::Executable => client.find_executable(&opt.buildid).await,
        FileType::SourceFile => match &opt.filename {
            Some(filename) => client.find_source(&opt.buildid, filename).await,
            None => {
                eprintln!("If FILETYPE is \"source-file\" then FILENAME must be given");
                std::process::exit(1);
            }
        },
    };

    match result {
        Ok(artifact) => println!("{}", artifact.path.display()),
        Err(e) => {
            eprintln!("Server query failed: {e}");
            std::process::exit(1);
        }
    }
}
