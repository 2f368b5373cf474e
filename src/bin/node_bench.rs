use crossbeam_ebr::{Atomic, Guard, Owned, Shared};
use crossbeam_utils::thread::scope;
use crossbeam_utils::Backoff;
use rand::prelude::*;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc, Barrier};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use bztree_node::config::bench::{setup, Config, Op, Perf};
use bztree_node::{epoch, LeafNode, NodeError};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (config, output) = setup(
        Path::new(file!())
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string())
            .unwrap(),
    )
    .unwrap();
    println!("{}", config);
    let perf = bench(&config);
    output.write_record(&config, &perf).unwrap();
    println!("{}", perf);
}

/// Outcome of a write that found the leaf full.
enum Relief {
    /// A consolidated image was published; the write can be retried.
    Consolidated,
    /// Another thread is restructuring the leaf.
    Busy,
    /// The leaf is full of live records.
    Exhausted,
}

/// Replaces a full leaf by its consolidated copy and retires the old image.
fn relieve(slot: &Atomic<LeafNode>, current: Shared<'_, LeafNode>, guard: &Guard) -> Relief {
    // SAFETY: `current` was loaded under `guard` and images are only freed through it.
    let leaf = unsafe { current.deref() };
    if leaf.wasted_bytes(guard) == 0 {
        return Relief::Exhausted;
    }
    let fresh = match leaf.consolidate(guard) {
        Ok(fresh) => fresh,
        Err(_) => return Relief::Busy,
    };
    match slot.compare_exchange(
        current,
        Owned::from(fresh),
        Ordering::AcqRel,
        Ordering::Acquire,
        guard,
    ) {
        Ok(_) => {
            // SAFETY: unreachable for threads pinning from now on; only the freezer swaps.
            unsafe { epoch::retire(current.as_raw(), guard) };
            Relief::Consolidated
        }
        Err(_) => Relief::Busy,
    }
}

fn apply(slot: &Atomic<LeafNode>, op: Op, key: &[u8], value: u64, perf: &mut Perf, guard: &Guard) {
    let backoff = Backoff::new();
    loop {
        let current = slot.load(Ordering::Acquire, guard);
        // SAFETY: the slot always holds a published image.
        let leaf = unsafe { current.deref() };
        let result = match op {
            Op::Read => {
                leaf.read(key, guard);
                return;
            }
            Op::Insert => leaf.insert(key, value, guard),
            Op::Upsert => leaf.upsert(key, value, guard),
            Op::Delete => leaf.delete(key, guard),
        };
        match result {
            Ok(()) | Err(NodeError::KeyExists) | Err(NodeError::NotFound) => return,
            Err(NodeError::Frozen) => backoff.snooze(),
            Err(NodeError::NodeFull) => match relieve(slot, current, guard) {
                Relief::Consolidated => perf.consolidations += 1,
                Relief::Busy => backoff.snooze(),
                Relief::Exhausted => {
                    perf.rejected += 1;
                    return;
                }
            },
            Err(e) => panic!("unexpected outcome: {}", e),
        }
    }
}

fn bench(config: &Config) -> Perf {
    let leaf = LeafNode::new(config.node_size).unwrap();
    let slot = &Atomic::from(Owned::from(leaf));

    let mut prefill = Perf::default();
    let rng = &mut rand::thread_rng();
    for _ in 0..config.prefill {
        let key = config.key_dist.sample(rng);
        let guard = &epoch::protect();
        apply(slot, Op::Upsert, &config.key(key), key as u64, &mut prefill, guard);
    }
    println!("prefilled... ");

    let barrier = &Arc::new(Barrier::new(config.threads));
    let (perf_sender, perf_receiver) = mpsc::channel();

    scope(|s| {
        for _ in 0..config.threads {
            let perf_sender = perf_sender.clone();
            s.spawn(move |_| {
                let mut perf = Perf::default();
                let mut ops: u64 = 0;
                let mut rng = &mut rand::thread_rng();
                barrier.clone().wait();
                let start = Instant::now();

                while start.elapsed() < config.duration {
                    let key = config.key_dist.sample(rng);
                    let op = Op::OPS[config.op_dist.sample(&mut rng)];
                    let guard = &epoch::protect();
                    apply(slot, op, &config.key(key), key as u64, &mut perf, guard);
                    ops += 1;
                }

                perf.ops_per_sec = ops;
                perf_sender.send(perf).unwrap();
            });
        }
    })
    .unwrap();
    println!("end");

    let mut total = Perf::default();
    for _ in 0..config.threads {
        let local = perf_receiver.recv().unwrap();
        total.ops_per_sec += local.ops_per_sec;
        total.consolidations += local.consolidations;
        total.rejected += local.rejected;
    }
    total.ops_per_sec /= config.interval;

    // SAFETY: every worker has joined.
    drop(unsafe { slot.load(Ordering::Relaxed, epoch::unprotected()).into_owned() });
    total
}
