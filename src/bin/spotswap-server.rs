//! Starts the spotswap store server.
//! To see the list of options, type: `spotswap-server --help`

use std::path::PathBuf;
use std::process::exit;

use clap::{crate_version, App, Arg};
use spotswap::config::{DEFAULT_ADDRESS, DEFAULT_LOG_LEVEL};
use spotswap::{
    EngineKind, KvsEngine, KvsServer, LogStore, MemoryStore, NaiveThreadPool, PoolKind,
    RayonThreadPool, Result, Settings, SharedQueueThreadPool, SledStore, SwapError, ThreadPool,
};
use tracing::info;

/// [`Opt`] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    settings: Settings,
    engine: EngineKind,
    data_dir: PathBuf,
    threads: u32,
    pool: PoolKind,
}

impl Opt {
    /// validates the raw options, checking the requested engine against the data directory
    fn build(
        addr: &str,
        log_level: &str,
        engine: Option<&str>,
        data_dir: Option<&str>,
        threads: Option<&str>,
        pool: Option<&str>,
    ) -> Result<Opt> {
        let settings = Settings::build(addr, log_level)?;
        let data_dir = match data_dir {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()?,
        };
        let requested: Option<EngineKind> = engine.map(str::parse).transpose()?;
        let engine = EngineKind::resolve(&data_dir, requested)?;
        let threads = match threads {
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                SwapError::Parsing(format!("--threads must be a whole number, got {}", raw))
            })?,
            None => num_cpus(),
        };
        if threads == 0 {
            return Err(SwapError::Parsing("--threads must be at least 1".to_string()));
        }
        let pool: Option<PoolKind> = pool.map(str::parse).transpose()?;
        Ok(Opt {
            settings,
            engine,
            data_dir,
            threads,
            pool: pool.unwrap_or_default(),
        })
    }
}

fn main() {
    let matches = App::new("spotswap-server")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("serves the spotswap key-value store")
        .arg(
            Arg::with_name("addr")
                .long("addr")
                .value_name("IP_ADDR:PORT")
                .env("SPOTSWAP_ADDR")
                .help("sets the IP_ADDR:PORT that the server listens on")
                .default_value(DEFAULT_ADDRESS),
        )
        .arg(
            Arg::with_name("engine")
                .long("engine")
                .value_name("ENGINE_NAME")
                .env("SPOTSWAP_ENGINE")
                .possible_values(&EngineKind::NAMES)
                .help("sets the storage engine, defaults to the one already in the data directory"),
        )
        .arg(
            Arg::with_name("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .env("SPOTSWAP_DATA_DIR")
                .help("where persistent engines keep their files, defaults to the current directory"),
        )
        .arg(
            Arg::with_name("threads")
                .long("threads")
                .value_name("N")
                .help("number of worker threads"),
        )
        .arg(
            Arg::with_name("pool")
                .long("pool")
                .value_name("POOL")
                .env("SPOTSWAP_POOL")
                .possible_values(&PoolKind::NAMES)
                .help("the thread pool serving connections, defaults to shared-queue"),
        )
        .arg(
            Arg::with_name("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .env("SPOTSWAP_LOG")
                .help("trace, debug, info, warn or error")
                .default_value(DEFAULT_LOG_LEVEL),
        )
        .get_matches();

    let opt = Opt::build(
        matches.value_of("addr").unwrap_or(DEFAULT_ADDRESS),
        matches.value_of("log-level").unwrap_or(DEFAULT_LOG_LEVEL),
        matches.value_of("engine"),
        matches.value_of("data-dir"),
        matches.value_of("threads"),
        matches.value_of("pool"),
    );
    let opt = match opt {
        Ok(opt) => opt,
        Err(e) => {
            eprintln!("error: {}", e);
            exit(1);
        }
    };
    opt.settings.init_logging();

    if let Err(e) = run(opt) {
        eprintln!("error: {}", e);
        exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    info!("spotswap-server {}", env!("CARGO_PKG_VERSION"));
    info!("Storage engine: {}", opt.engine);
    info!("Data directory: {}", opt.data_dir.display());
    info!("Worker threads: {} ({})", opt.threads, opt.pool);

    if opt.engine.is_persistent() {
        std::fs::create_dir_all(&opt.data_dir)?;
    }
    opt.engine.record(&opt.data_dir)?;
    match opt.engine {
        EngineKind::Kvs => run_with_engine(LogStore::open(&opt.data_dir)?, &opt),
        EngineKind::Sled => run_with_engine(SledStore::open(&opt.data_dir)?, &opt),
        EngineKind::Memory => run_with_engine(MemoryStore::new(), &opt),
    }
}

fn run_with_engine<E: KvsEngine>(engine: E, opt: &Opt) -> Result<()> {
    match opt.pool {
        PoolKind::Naive => serve(engine, NaiveThreadPool::new(opt.threads)?, opt),
        PoolKind::SharedQueue => serve(engine, SharedQueueThreadPool::new(opt.threads)?, opt),
        PoolKind::Rayon => serve(engine, RayonThreadPool::new(opt.threads)?, opt),
    }
}

fn serve<E: KvsEngine, P: ThreadPool>(engine: E, pool: P, opt: &Opt) -> Result<()> {
    KvsServer::new(engine, pool).run(opt.settings.addr)
}

fn num_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4)
}
