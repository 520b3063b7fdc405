use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use mmap_bplus_index::workload::{self, WorkloadKind};
use mmap_bplus_index::{
    BPlusTree, IndexConfig, DEFAULT_CAPACITY_PAGES, DEFAULT_INDEX_FILE, DEFAULT_MAX_SCAN_LEAVES,
};

#[derive(Parser)]
#[command(
    name = "bplus-bench",
    about = "Workload driver for the memory mapped B+Tree index"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a workload file against the index and report timings.
    Run {
        /// Workload file with one operation per line.
        #[arg(default_value = "input.txt")]
        input: PathBuf,
        /// Location of the index file.
        #[arg(long, default_value = DEFAULT_INDEX_FILE)]
        db: PathBuf,
        #[arg(long, default_value_t = DEFAULT_CAPACITY_PAGES)]
        capacity_pages: usize,
        #[arg(long, default_value_t = DEFAULT_MAX_SCAN_LEAVES)]
        max_scan_leaves: usize,
        /// Print the statistics as JSON instead of the text report.
        #[arg(long)]
        json: bool,
    },
    /// Write a generated workload file.
    Generate {
        #[arg(value_enum)]
        kind: Kind,
        #[arg(long, default_value_t = 100_000)]
        records: i32,
        #[arg(long, default_value = "input.txt")]
        output: PathBuf,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Sequential,
    Random,
}

impl From<Kind> for WorkloadKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Sequential => WorkloadKind::Sequential,
            Kind::Random => WorkloadKind::Random,
        }
    }
}

type BoxError = Box<dyn std::error::Error>;

fn run_workload(
    input: PathBuf,
    config: IndexConfig,
    json: bool,
) -> std::result::Result<(), BoxError> {
    let workload = File::open(&input)
        .map_err(|e| format!("could not open workload {}: {e}", input.display()))?;

    println!("Opening index {}", config.path.display());
    let mut tree = BPlusTree::open(&config)?;
    println!("Processing workload {}", input.display());
    let stats = workload::run(&mut tree, BufReader::new(workload))?;
    tree.close()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &stats)?;
        writeln!(out)?;
    } else {
        stats.write_report(&mut out)?;
    }
    Ok(())
}

fn generate_workload(
    kind: Kind,
    records: i32,
    output: PathBuf,
    seed: u64,
) -> std::result::Result<(), BoxError> {
    let mut out = BufWriter::new(File::create(&output)?);
    workload::generate(kind.into(), records, seed, &mut out)?;
    out.flush()?;
    println!("Wrote {records} records to {}", output.display());
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run {
            input,
            db,
            capacity_pages,
            max_scan_leaves,
            json,
        } => {
            let config = IndexConfig::default()
                .path(db)
                .capacity_pages(capacity_pages)
                .max_scan_leaves(max_scan_leaves);
            run_workload(input, config, json)
        }
        Command::Generate {
            kind,
            records,
            output,
            seed,
        } => generate_workload(kind, records, output, seed),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        process::exit(1);
    }
}
