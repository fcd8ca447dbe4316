use clap::{ArgGroup, Parser, Subcommand};
use dtn_bundle_store::{
    AllSelector, BundleId, BundleStorage, Clock, DestinationSelector,
    DiskBundleStorage, DiskStorageConfigBuilder, DtnClock, Expirable, Lifecycle,
    MetaBundle, RedbBundleStorage, RedbStorageConfigBuilder, StoreError,
    common::{bytes2hr, relative_time},
};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("backend").required(true).args(["disk", "redb"])))]
struct Cli {
    /// Directory of a disk bundle store
    #[arg(long, global = true)]
    disk: Option<PathBuf>,

    /// Database file of a redb bundle store
    #[arg(long, global = true)]
    redb: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show counters of the store
    Info,

    /// List stored bundles in scheduling order
    List {
        /// Only bundles for this destination
        #[arg(short, long)]
        destination: Option<String>,

        /// Maximum number of entries, 0 for all
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },

    /// Show one bundle, e.g. `show "[1000.1] dtn://node-a/app"`
    Show { id: String },

    /// Remove one bundle
    Remove { id: String },

    /// Drop bundles whose lifetime ran out
    Expire {
        /// DTN time to expire against, defaults to now
        #[arg(long)]
        now: Option<u64>,
    },

    /// Remove every bundle (with confirmation)
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Compact the database file (redb only)
    Compact,
}

enum Store {
    Disk(DiskBundleStorage),
    Redb(RedbBundleStorage),
}

impl Store {
    fn open(cli: &Cli) -> Result<Self, StoreError> {
        if let Some(path) = &cli.disk {
            let config = DiskStorageConfigBuilder::default()
                .path(path.clone())
                .build()
                .map_err(|e| StoreError::Config(e.to_string()))?;
            return Ok(Store::Disk(DiskBundleStorage::open(config)?));
        }
        let path = cli
            .redb
            .clone()
            .ok_or_else(|| StoreError::Config("No store given".into()))?;
        let config = RedbStorageConfigBuilder::default()
            .db_path(path)
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;
        Ok(Store::Redb(RedbBundleStorage::open(config)?))
    }

    fn storage(&self) -> &dyn BundleStorage {
        match self {
            Store::Disk(storage) => storage,
            Store::Redb(storage) => storage,
        }
    }

    fn shutdown(&self) {
        match self {
            Store::Disk(storage) => storage.shutdown(),
            Store::Redb(storage) => storage.shutdown(),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let store = Store::open(&cli)?;
    let storage = store.storage();
    let now = DtnClock.now();

    match &cli.command {
        Commands::Info => {
            println!("Bundles: {}", storage.count());
            println!("Stored: {}", bytes2hr(storage.size()));
            println!("Destinations: {}", storage.distinct_destinations().len());
            match &store {
                Store::Disk(disk) => {
                    println!("Directory: {}", disk.path().display());
                    println!("Summary filter: {}", bytes2hr(disk.summary().size() as u64));
                }
                Store::Redb(redb) => {
                    println!("Database: {}", redb.path().display());
                    if let Some(config) = redb.stored_config()? {
                        let quota = match config.max_bytes {
                            0 => "unlimited".to_string(),
                            max => bytes2hr(max),
                        };
                        println!("Quota: {quota}");
                    }
                }
            }
        }
        Commands::List { destination, limit } => {
            let mut entries: Vec<MetaBundle> = Vec::new();
            let result = match destination {
                Some(destination) => storage.select(
                    &DestinationSelector::new(destination.as_str(), *limit),
                    &mut entries,
                ),
                None => storage.select(&AllSelector::new(*limit), &mut entries),
            };
            match result {
                Ok(_) => {
                    for meta in &entries {
                        print_meta(meta, now);
                    }
                }
                Err(StoreError::NoBundleFound) => println!("No bundles"),
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Show { id } => {
            let id: BundleId = id.parse()?;
            let bundle = storage.get(&id)?;
            print_meta(&MetaBundle::from(&bundle), now);
            println!("  report-to: {}", bundle.report_to);
            println!("  custodian: {}", bundle.custodian);
            for block in &bundle.blocks {
                println!(
                    "  block type {} flags {:#x}: {}",
                    block.block_type,
                    block.flags,
                    bytes2hr(block.data.len() as u64)
                );
            }
        }
        Commands::Remove { id } => {
            let id: BundleId = id.parse()?;
            storage.remove(&id)?;
            println!("Removed {id}");
        }
        Commands::Expire { now: at } => {
            let before = storage.count();
            storage.expire(at.unwrap_or(now));
            storage.wait();
            println!("Expired {} bundles", before.saturating_sub(storage.count()));
        }
        Commands::Clear { force } => {
            if *force
                || confirm_action("Are you sure you want to remove every bundle?")?
            {
                storage.clear()?;
                println!("Store cleared");
            } else {
                println!("Clear cancelled");
            }
        }
        Commands::Compact => match &store {
            Store::Redb(redb) => {
                let compacted = redb.compact()?;
                println!("Compaction {}", if compacted { "done" } else { "not needed" });
            }
            Store::Disk(_) => println!("Disk stores need no compaction"),
        },
    }

    storage.wait();
    store.shutdown();
    info!("Done");
    Ok(())
}

fn print_meta(meta: &MetaBundle, now: u64) {
    println!(
        "{} -> {} ({:?}, {} payload, expires {})",
        meta.id(),
        meta.destination(),
        meta.priority(),
        bytes2hr(meta.payload_length()),
        relative_time(meta.expiretime(), now)
    );
}

fn confirm_action(prompt: &str) -> io::Result<bool> {
    print!("{prompt} [y/N]: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().to_lowercase() == "y")
}
