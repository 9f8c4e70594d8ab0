//! shardstore Inspect Tool
//!
//! Read-only view of a shard's data directory and of snapshot files.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use shardstore::buffer::BufferPool;
use shardstore::config::{DEFAULT_HARD_STATE_RING_SIZE, DEFAULT_SEGMENT_CAPACITY};
use shardstore::error::{Result, StoreError};
use shardstore::protocol::{decode_command, Command};
use shardstore::store::decode_store;
use shardstore::wal::{
    decode_hard_state, hard_state_file_name, meta_region_size, read_meta, scan_log, EntryType,
    LogScan, SegmentMeta, SegmentReader, ENTRY_HEAD_SIZE,
};
use tracing_subscriber::{fmt, EnvFilter};

/// shardstore inspector
#[derive(Parser, Debug)]
#[command(name = "shardstore-inspect")]
#[command(about = "Inspect shardstore log directories and snapshots")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct ShardArgs {
    /// Data directory of the shard
    #[arg(short, long, default_value = "./shardstore_data")]
    data_dir: PathBuf,

    /// Shard id
    #[arg(short, long, default_value = "1")]
    shard: u64,

    /// Entries per segment the log was written with
    #[arg(short, long, default_value_t = DEFAULT_SEGMENT_CAPACITY)]
    capacity: u32,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the log directory and list its segments
    Segments {
        #[command(flatten)]
        shard: ShardArgs,
    },

    /// Print entries with index in [lo, hi)
    Entries {
        #[command(flatten)]
        shard: ShardArgs,

        /// First index to print
        #[arg(long, default_value = "1")]
        lo: u64,

        /// One past the last index to print (defaults to the end of the log)
        #[arg(long)]
        hi: Option<u64>,
    },

    /// Print every hard-state slot of the ring
    HardState {
        #[command(flatten)]
        shard: ShardArgs,

        /// Number of files in the ring
        #[arg(short, long, default_value_t = DEFAULT_HARD_STATE_RING_SIZE)]
        ring: u32,
    },

    /// Validate a snapshot file and summarize it
    Snapshot {
        /// Snapshot file
        path: PathBuf,

        /// Also print every key
        #[arg(short, long)]
        keys: bool,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,shardstore=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let result = match args.command {
        Commands::Segments { shard } => segments(&shard),
        Commands::Entries { shard, lo, hi } => entries(&shard, lo, hi),
        Commands::HardState { shard, ring } => hard_state(&shard, ring),
        Commands::Snapshot { path, keys } => snapshot(&path, keys),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let report = e.report();
            eprintln!("{}: {}", report.reason, report.message);
            if e.is_corruption() {
                eprintln!("persisted data failed validation; do not start a node on it");
            }
            ExitCode::FAILURE
        }
    }
}

fn segments(args: &ShardArgs) -> Result<()> {
    let scan = scan_log(&args.data_dir, args.shard, args.capacity)?;

    for info in &scan.sealed {
        println!(
            "{}  [{}, {}]  stored from {}",
            info.path.display(),
            info.range_first,
            info.range_last,
            info.first_stored
        );
    }
    match &scan.current {
        Some(current) => println!(
            "{}  [{}, {}]  {} entries, {} unsynced bytes",
            current.path.display(),
            current.range_first,
            current.range_last,
            current.meta.entries.len(),
            current.unsynced_tail()
        ),
        None => println!("no current segment"),
    }
    print_bounds(&scan);
    Ok(())
}

fn entries(args: &ShardArgs, lo: u64, hi: Option<u64>) -> Result<()> {
    let scan = scan_log(&args.data_dir, args.shard, args.capacity)?;
    let (Some(first), Some(last)) = (scan.first_index(), scan.last_index()) else {
        println!("log is empty");
        return Ok(());
    };
    let lo = lo.max(first);
    let hi = hi.unwrap_or(last + 1).min(last + 1);

    let meta_pool = BufferPool::with_max_idle(meta_region_size(args.capacity) as usize, 1);
    let head_pool = BufferPool::new(ENTRY_HEAD_SIZE);

    let mut segments: Vec<(PathBuf, SegmentMeta)> = Vec::new();
    for info in &scan.sealed {
        if info.range_last >= lo && info.first_stored < hi {
            segments.push((info.path.clone(), read_meta(&info.path, args.shard, &meta_pool)?));
        }
    }
    if let Some(current) = scan.current {
        segments.push((current.path, current.meta));
    }

    for (path, meta) in &segments {
        let mut reader = SegmentReader::open(path, args.shard)?;
        for row in meta.entries.iter().filter(|row| row.index >= lo && row.index < hi) {
            let entry = reader.read_entry(row, &head_pool)?;
            println!(
                "{:>10}  term {:<6} {:?}  {} bytes{}",
                entry.index,
                entry.term,
                entry.entry_type,
                entry.data.len(),
                describe(&entry.entry_type, &entry.data)
            );
        }
    }
    Ok(())
}

fn describe(entry_type: &EntryType, data: &[u8]) -> String {
    if *entry_type != EntryType::Normal || data.is_empty() {
        return String::new();
    }
    match decode_command(data) {
        Ok(Command::Set { key, value }) => {
            format!("  SET {} ({} bytes)", String::from_utf8_lossy(&key), value.len())
        }
        Ok(Command::Del { key }) => format!("  DEL {}", String::from_utf8_lossy(&key)),
        Err(e) => format!("  <{}>", e.reason()),
    }
}

fn hard_state(args: &ShardArgs, ring: u32) -> Result<()> {
    for slot in 0..ring as u64 {
        let path = args
            .data_dir
            .join(hard_state_file_name(args.shard, slot, ring));
        if !path.exists() {
            println!("{}  missing", path.display());
            continue;
        }
        let buf = fs::read(&path).map_err(|source| StoreError::File {
            path: path.clone(),
            shard_id: args.shard,
            source,
        })?;
        match decode_hard_state(&buf, &path) {
            Ok((shard_id, seq_id, state)) => println!(
                "{}  shard {} seq {}  term {} vote {} commit {}",
                path.display(),
                shard_id,
                seq_id,
                state.term,
                state.vote,
                state.commit
            ),
            Err(e) => println!("{}  invalid: {}", path.display(), e),
        }
    }
    Ok(())
}

fn snapshot(path: &Path, keys: bool) -> Result<()> {
    let buf = fs::read(path).map_err(|source| StoreError::File {
        path: path.to_path_buf(),
        shard_id: 0,
        source,
    })?;
    let decoded = decode_store(&buf)?;

    println!(
        "{}  {} records, {} payload bytes",
        path.display(),
        decoded.records.len(),
        decoded.payload_size
    );
    if keys {
        for record in &decoded.records {
            println!(
                "  {}  ({} bytes)",
                String::from_utf8_lossy(record.key()),
                record.value().len()
            );
        }
    }
    Ok(())
}

fn print_bounds(scan: &LogScan) {
    match (scan.first_index(), scan.last_index()) {
        (Some(first), Some(last)) => println!("entries [{}, {}]", first, last),
        _ => println!("log is empty"),
    }
}
