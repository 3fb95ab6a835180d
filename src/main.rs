use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::{info, warn, LevelFilter};

use debugserver::cli::Opt;
use debugserver::index::IndexStore;
use debugserver::{scanner, server, ServiceContext};

fn main() {
    let opt = Opt::parse();
    init_logging(opt.verbose);
    let config = opt.config();

    let store = match IndexStore::open(&config.db_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("cannot open database {}: {e}", config.db_path.display());
            std::process::exit(1);
        }
    };
    info!("opened database {}", config.db_path.display());
    match store.stats() {
        Ok(stats) => {
            for (sourcetype, artifacttype, count) in stats {
                info!("index: sourcetype={sourcetype} artifacttype={artifacttype} count={count}");
            }
        }
        Err(e) => warn!("cannot collect database statistics: {e}"),
    }

    let upstream = match debugserver_client::Client::from_env() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("cannot set up the upstream client: {e}");
            std::process::exit(1);
        }
    };
    if let Ok(urls) = std::env::var(debugserver_client::URLS_ENV_VAR) {
        if !urls.is_empty() {
            info!("upstream debugservers: {urls}");
        }
    }

    let ctx = Arc::new(ServiceContext {
        config,
        store,
        interrupted: AtomicBool::new(false),
        upstream,
    });

    // SIGINT/SIGHUP/SIGTERM raise the flag; scanners poll it between files
    // and the http server drains and stops once it is set.
    {
        let ctx = ctx.clone();
        if let Err(e) = ctrlc::set_handler(move || ctx.interrupted.store(true, Ordering::Relaxed))
        {
            eprintln!("cannot install signal handler: {e}");
            std::process::exit(1);
        }
    }

    let scanners = scanner::spawn_scanners(&ctx);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("cannot start async runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(server::run(ctx.clone())) {
        eprintln!("cannot run http server on port {}: {e}", ctx.config.port);
        ctx.interrupted.store(true, Ordering::Relaxed);
        for handle in scanners {
            let _ = handle.join();
        }
        std::process::exit(1);
    }

    info!("stopping");
    for handle in scanners {
        let _ = handle.join();
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            // One line per record, with the emitting thread; the writer
            // locks so lines from different threads don't interleave.
            let thread = std::thread::current();
            writeln!(
                buf,
                "[{}] ({}/{}) {}: {}",
                buf.timestamp(),
                std::process::id(),
                thread.name().unwrap_or("?"),
                record.level(),
                record.args()
            )
        })
        .init();
}
