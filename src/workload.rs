//! Line based workload format used to drive and benchmark an index.
//!
//! One operation per line, blank lines and lines starting with `#` are ignored:
//!
//! ```text
//! INSERT <key> <data...>
//! READ <key>
//! DELETE <key>
//! RANGE <low> <high>
//! ```

use std::io::{BufRead, Write};
use std::time::{Duration, Instant};

use rand::{rngs::SmallRng, seq::SliceRandom, Rng, SeedableRng};
use serde_derive::Serialize;
use tracing::{error, warn};

use crate::{
    btree::BPlusTree,
    error::{Error, Result},
    page::{Key, Tuple},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Insert { key: Key, value: Tuple },
    Read { key: Key },
    Delete { key: Key },
    Range { low: Key, high: Key },
}

fn parse_key(token: Option<&str>, name: &str) -> Result<Key> {
    let token = token.ok_or_else(|| Error::malformed(format!("missing {name}")))?;
    token
        .parse()
        .map_err(|_| Error::malformed(format!("invalid {name} '{token}'")))
}

/// Parse a single line of a workload.
///
/// Returns `None` for blank lines and comments.
pub fn parse_line(line: &str) -> Result<Option<Operation>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (keyword, arguments) = match line.split_once(char::is_whitespace) {
        Some((keyword, arguments)) => (keyword, arguments.trim_start()),
        None => (line, ""),
    };
    let mut tokens = arguments.split_whitespace();

    let op = match keyword.to_ascii_uppercase().as_str() {
        "INSERT" => {
            let (key, data) = match arguments.split_once(char::is_whitespace) {
                Some((key, data)) => (key, data.trim()),
                None => (arguments, ""),
            };
            let key = parse_key(Some(key).filter(|k| !k.is_empty()), "key")?;
            Operation::Insert {
                key,
                value: Tuple::from(data),
            }
        }
        "READ" => Operation::Read {
            key: parse_key(tokens.next(), "key")?,
        },
        "DELETE" => Operation::Delete {
            key: parse_key(tokens.next(), "key")?,
        },
        "RANGE" => Operation::Range {
            low: parse_key(tokens.next(), "lower key")?,
            high: parse_key(tokens.next(), "upper key")?,
        },
        other => return Err(Error::malformed(format!("unknown operation '{other}'"))),
    };
    Ok(Some(op))
}

/// Counters and cumulative durations of an executed workload.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct WorkloadStats {
    pub total_operations: usize,
    pub malformed_lines: usize,
    pub total_time: Duration,

    pub insert_count: usize,
    pub insert_success: usize,
    pub insert_fail: usize,
    pub insert_time: Duration,

    pub read_count: usize,
    pub read_found: usize,
    pub read_not_found: usize,
    pub read_time: Duration,

    pub delete_count: usize,
    pub delete_success: usize,
    pub delete_fail: usize,
    pub delete_time: Duration,

    pub range_count: usize,
    pub range_results: usize,
    pub range_aborted: usize,
    pub range_time: Duration,
}

fn average(total: Duration, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total.as_secs_f64() / count as f64
    }
}

impl WorkloadStats {
    /// Writes a human readable report of the statistics.
    pub fn write_report<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        writeln!(out, "OVERALL STATISTICS:")?;
        writeln!(out, "-------------------")?;
        writeln!(out, "Total Operations:    {}", self.total_operations)?;
        writeln!(out, "Malformed Lines:     {}", self.malformed_lines)?;
        writeln!(
            out,
            "Total Time:          {:.3} seconds",
            self.total_time.as_secs_f64()
        )?;
        writeln!(
            out,
            "Avg Time/Operation:  {:.6} seconds",
            average(self.total_time, self.total_operations)
        )?;
        writeln!(out)?;

        if self.insert_count > 0 {
            writeln!(out, "INSERT OPERATIONS:")?;
            writeln!(out, "  Total:      {}", self.insert_count)?;
            writeln!(out, "  Successful: {}", self.insert_success)?;
            writeln!(out, "  Failed:     {}", self.insert_fail)?;
            write_times(&mut out, self.insert_time, self.insert_count)?;
        }
        if self.read_count > 0 {
            writeln!(out, "READ OPERATIONS:")?;
            writeln!(out, "  Total:      {}", self.read_count)?;
            writeln!(out, "  Found:      {}", self.read_found)?;
            writeln!(out, "  Not Found:  {}", self.read_not_found)?;
            write_times(&mut out, self.read_time, self.read_count)?;
        }
        if self.delete_count > 0 {
            writeln!(out, "DELETE OPERATIONS:")?;
            writeln!(out, "  Total:      {}", self.delete_count)?;
            writeln!(out, "  Successful: {}", self.delete_success)?;
            writeln!(out, "  Failed:     {}", self.delete_fail)?;
            write_times(&mut out, self.delete_time, self.delete_count)?;
        }
        if self.range_count > 0 {
            writeln!(out, "RANGE OPERATIONS:")?;
            writeln!(out, "  Total:      {}", self.range_count)?;
            writeln!(out, "  Results:    {}", self.range_results)?;
            writeln!(out, "  Avg Results: {}", self.range_results / self.range_count)?;
            writeln!(out, "  Aborted:    {}", self.range_aborted)?;
            write_times(&mut out, self.range_time, self.range_count)?;
        }
        Ok(())
    }
}

fn write_times<W: Write>(out: &mut W, total: Duration, count: usize) -> std::io::Result<()> {
    writeln!(out, "  Total Time: {:.3} seconds", total.as_secs_f64())?;
    writeln!(out, "  Avg Time:   {:.6} seconds", average(total, count))?;
    writeln!(out)
}

/// Execute a single operation, timing it and updating the statistics.
pub fn execute(tree: &mut BPlusTree, op: Operation, stats: &mut WorkloadStats) -> Result<()> {
    let start = Instant::now();
    match op {
        Operation::Insert { key, value } => {
            let result = tree.insert(key, value);
            stats.insert_time += start.elapsed();
            stats.insert_count += 1;
            match result {
                Ok(true) => stats.insert_success += 1,
                Ok(false) => stats.insert_fail += 1,
                Err(e @ Error::StoreExhausted { .. }) => {
                    error!(key, error = %e, "rejected insert");
                    stats.insert_fail += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Operation::Read { key } => {
            let result = tree.get(key)?;
            stats.read_time += start.elapsed();
            stats.read_count += 1;
            if result.is_some() {
                stats.read_found += 1;
            } else {
                stats.read_not_found += 1;
            }
        }
        Operation::Delete { key } => {
            let result = tree.remove(key)?;
            stats.delete_time += start.elapsed();
            stats.delete_count += 1;
            if result {
                stats.delete_success += 1;
            } else {
                stats.delete_fail += 1;
            }
        }
        Operation::Range { low, high } => {
            let mut results = 0;
            let mut aborted = false;
            for e in tree.range(low, high)? {
                match e {
                    Ok(_) => results += 1,
                    Err(Error::ScanAborted { .. }) => aborted = true,
                    Err(e) => return Err(e),
                }
            }
            stats.range_time += start.elapsed();
            stats.range_count += 1;
            stats.range_results += results;
            if aborted {
                stats.range_aborted += 1;
            }
        }
    }
    stats.total_operations += 1;
    Ok(())
}

/// Execute all operations of a workload.
///
/// Malformed lines are logged and skipped. Errors of the index itself abort the run,
/// except an exhausted store which only lets the affected insert fail.
pub fn run<R: BufRead>(tree: &mut BPlusTree, input: R) -> Result<WorkloadStats> {
    let mut stats = WorkloadStats::default();
    let start = Instant::now();
    for (line_number, line) in input.lines().enumerate() {
        let line = line?;
        match parse_line(&line) {
            Ok(Some(op)) => execute(tree, op, &mut stats)?,
            Ok(None) => {}
            Err(e) => {
                warn!(line = line_number + 1, content = %line, error = %e, "skipping line");
                stats.malformed_lines += 1;
            }
        }
    }
    stats.total_time = start.elapsed();
    Ok(stats)
}

/// Shape of a generated workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    /// Insert all keys, read all keys, delete random keys, then one range over everything.
    Sequential,
    /// All inserts, reads and deletes in random order, then one range over everything.
    Random,
}

fn record_value(i: Key) -> String {
    let padding = 80usize.saturating_sub(i.to_string().len());
    format!("RND_DATA_{i}_{}", "R".repeat(padding))
}

/// Write a generated workload with the given number of records.
pub fn generate<W: Write>(kind: WorkloadKind, records: Key, seed: u64, mut out: W) -> Result<()> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let records = records.max(0);
    match kind {
        WorkloadKind::Sequential => {
            for i in 0..records {
                writeln!(out, "INSERT {i} {}", record_value(i))?;
            }
            for i in 0..records {
                writeln!(out, "READ {i}")?;
            }
            for _ in 0..records {
                writeln!(out, "DELETE {}", rng.gen_range(0..records))?;
            }
        }
        WorkloadKind::Random => {
            let mut operations = Vec::with_capacity(3 * records as usize);
            for i in 0..records {
                operations.push(format!("INSERT {i} {}", record_value(i)));
            }
            for i in 0..records {
                operations.push(format!("READ {i}"));
            }
            for i in 0..records {
                operations.push(format!("DELETE {i}"));
            }
            operations.shuffle(&mut rng);
            for op in operations {
                writeln!(out, "{op}")?;
            }
        }
    }
    writeln!(out, "RANGE 0 {records} {records}")?;
    Ok(())
}
