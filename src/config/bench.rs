use clap::{value_parser, Arg, ArgAction, Command};
use csv::Writer;
use rand::distributions::{Uniform, WeightedIndex};
use std::fmt;
use std::fs::{create_dir_all, File, OpenOptions};
use std::path::Path;
use std::time::Duration;

use super::DEFAULT_NODE_SIZE;
use crate::node::validate_capacity;

const DEFAULT_KEY_RANGE: usize = 256;
const DEFAULT_INTERVAL: u64 = 10;

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Op {
    Read,
    Insert,
    Upsert,
    Delete,
}

impl Op {
    pub const OPS: [Op; 4] = [Op::Read, Op::Insert, Op::Upsert, Op::Delete];
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum GetRate {
    WriteOnly = 0,
    ReadWrite = 1,
    ReadIntensive = 2,
    ReadOnly = 3,
}

pub struct Config {
    pub threads: usize,
    pub node_size: usize,

    pub get_rate: GetRate,
    pub op_dist: WeightedIndex<i32>,
    pub key_dist: Uniform<usize>,
    pub prefill: usize,
    pub key_range: usize,
    pub interval: u64,
    pub duration: Duration,
}

impl Config {
    /// Fixed-width key for `key`, so that byte order matches numeric order.
    pub fn key(&self, key: usize) -> Vec<u8> {
        format!("{:08}", key).into_bytes()
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "leaf {}: {} threads, g{}, r{}",
            readable_bytes(self.node_size),
            self.threads,
            self.get_rate as u8,
            self.key_range,
        )
    }
}

pub struct BenchWriter {
    output: Option<Writer<File>>,
}

#[derive(Clone, Default)]
pub struct Perf {
    pub ops_per_sec: u64,
    pub consolidations: u64,
    /// Writes rejected because the leaf stayed full after consolidation.
    pub rejected: u64,
}

impl fmt::Display for Perf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ops/s: {}, consolidations: {}, rejected: {}",
            self.ops_per_sec, self.consolidations, self.rejected
        )
    }
}

fn readable_bytes(num: usize) -> String {
    const UNITS: [&str; 3] = ["B", "KiB", "MiB"];
    for (i, unit) in UNITS.iter().enumerate() {
        if num / 2usize.pow(i as u32 * 10) < 1024 {
            return format!("{} {}", num / 2usize.pow(i as u32 * 10), unit);
        }
    }
    format!("{} MiB", num >> 20)
}

impl BenchWriter {
    pub fn write_record(self, config: &Config, perf: &Perf) -> csv::Result<()> {
        if let Some(mut output) = self.output {
            output.write_record(&[
                config.node_size.to_string(),
                config.threads.to_string(),
                (config.get_rate as u8).to_string(),
                config.key_range.to_string(),
                config.interval.to_string(),
                perf.ops_per_sec.to_string(),
                perf.consolidations.to_string(),
                perf.rejected.to_string(),
            ])?;
            output.flush()?;
        }
        Ok(())
    }
}

fn open_output(output_name: &str) -> csv::Result<Writer<File>> {
    let output_path = Path::new(output_name);
    if let Some(dir) = output_path.parent() {
        create_dir_all(dir)?;
    }
    if let Ok(f) = OpenOptions::new().read(true).append(true).open(output_path) {
        return Ok(Writer::from_writer(f));
    }
    let f = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(output_path)?;
    let mut output = Writer::from_writer(f);
    output.write_record([
        "node_size",
        "threads",
        "get_rate",
        "key_range",
        "interval",
        "throughput",
        "consolidations",
        "rejected",
    ])?;
    output.flush()?;
    Ok(output)
}

pub fn command(name: String) -> Command {
    Command::new(name)
        .arg(
            Arg::new("threads")
                .short('t')
                .value_parser(value_parser!(usize))
                .required(true)
                .help("Numbers of threads to run."),
        )
        .arg(
            Arg::new("get rate")
                .short('g')
                .help(
                    "The proportion of `read` operations. \
                     0: 0%, 1: 50%, 2: 90%, 3: 100%",
                )
                .value_parser(value_parser!(u8).range(0..4))
                .default_value("1"),
        )
        .arg(
            Arg::new("range")
                .short('r')
                .value_parser(value_parser!(usize))
                .help("Key range: [0..RANGE]")
                .default_value("256"),
        )
        .arg(
            Arg::new("node size")
                .short('s')
                .value_parser(value_parser!(usize))
                .help("Leaf capacity in bytes")
                .default_value("4096"),
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .value_parser(value_parser!(u64))
                .help("Time interval in seconds to run the benchmark")
                .default_value("10"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .help("Output CSV filename. Appends the data if the file already exists."),
        )
        .arg(
            Arg::new("dry run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Check whether the arguments are parsable, without running a benchmark"),
        )
}

pub fn setup(name: String) -> csv::Result<(Config, BenchWriter)> {
    let m = command(name).get_matches();

    let threads = m.get_one::<usize>("threads").copied().unwrap_or(1);
    let get_rate = match m.get_one::<u8>("get rate").copied().unwrap_or(1) {
        0 => GetRate::WriteOnly,
        1 => GetRate::ReadWrite,
        2 => GetRate::ReadIntensive,
        _ => GetRate::ReadOnly,
    };
    let key_range = m
        .get_one::<usize>("range")
        .copied()
        .unwrap_or(DEFAULT_KEY_RANGE)
        .max(1);
    let node_size = m
        .get_one::<usize>("node size")
        .copied()
        .unwrap_or(DEFAULT_NODE_SIZE);
    if let Err(e) = validate_capacity(node_size) {
        Command::new("node_bench")
            .error(clap::error::ErrorKind::ValueValidation, e)
            .exit();
    }
    let interval = m
        .get_one::<u64>("interval")
        .copied()
        .unwrap_or(DEFAULT_INTERVAL)
        .max(1);

    let op_weights: &[i32; 4] = match get_rate {
        GetRate::WriteOnly => &[0, 1, 1, 1],
        GetRate::ReadWrite => &[3, 1, 1, 1],
        GetRate::ReadIntensive => &[27, 1, 1, 1],
        GetRate::ReadOnly => &[1, 0, 0, 0],
    };
    let op_dist = WeightedIndex::new(op_weights)
        .map_err(|e| csv::Error::from(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

    let output = m
        .get_one::<String>("output")
        .map(|name| open_output(name))
        .transpose()?;

    let config = Config {
        threads: threads.max(1),
        node_size,

        get_rate,
        op_dist,
        key_dist: Uniform::from(0..key_range),
        prefill: key_range / 2,
        key_range,
        interval,
        duration: Duration::from_secs(interval),
    };

    if m.get_flag("dry run") {
        std::process::exit(0);
    }

    Ok((config, BenchWriter { output }))
}
