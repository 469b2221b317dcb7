//! Replays a synthetic chunk workload against the metadata subsystem and
//! reports hit ratio and throughput, excluded from the core per spec but
//! shipped the way the teacher ships its own `src/bin/*` utilities.
//!
//! Ported from `original_source/src/benchmark/run_dedup.cc`: that binary
//! reads a binary trace of pre-fingerprinted `Chunk` records and a
//! `WorkloadConfiguration` header off disk. No trace format is specified
//! here (spec.md scopes the chunker/fingerprinter and the trace format out
//! entirely), so this binary generates an equivalent synthetic working set
//! in memory instead, with a configurable content-duplication ratio
//! standing in for a recorded trace's natural duplicate rate.

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use dedup_cache::chunk::Chunk;
use dedup_cache::compression::ZstdCompressionModule;
use dedup_cache::config::{CachePolicyKind, Config};
use dedup_cache::io::MemoryIoModule;
use dedup_cache::metadata::MetadataOrchestrator;

struct Args {
    working_set_chunks: usize,
    n_requests: usize,
    dup_ratio: f64,
    ca_bucket_no_len: Option<u32>,
    policy: CachePolicyKind,
    config_path: Option<String>,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            working_set_chunks: 4096,
            n_requests: 50_000,
            dup_ratio: 0.3,
            ca_bucket_no_len: None,
            policy: CachePolicyKind::Lru,
            config_path: None,
        }
    }
}

/// Loads a `Config` from a JSON file, standing in for
/// `original_source/src/benchmark/run_dedup.cc`'s on-disk
/// `WorkloadConfiguration` header (spec.md §6, "Configuration"). `--ca-bits`
/// and `--policy` are applied on top of whatever this file sets.
fn load_config(path: &str) -> Config {
    let raw = std::fs::read_to_string(path).unwrap_or_else(|e| panic!("failed to read --config {}: {}", path, e));
    serde_json::from_str(&raw).unwrap_or_else(|e| panic!("invalid --config {}: {}", path, e))
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let raw: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < raw.len() {
        let (param, value) = (raw[i].as_str(), raw.get(i + 1));
        match (param, value) {
            ("--working-set-chunks", Some(v)) => args.working_set_chunks = v.parse().expect("--working-set-chunks takes an integer"),
            ("--requests", Some(v)) => args.n_requests = v.parse().expect("--requests takes an integer"),
            ("--dup-ratio", Some(v)) => args.dup_ratio = v.parse().expect("--dup-ratio takes a float in [0,1]"),
            ("--ca-bits", Some(v)) => args.ca_bucket_no_len = Some(v.parse().expect("--ca-bits takes an integer")),
            ("--config", Some(v)) => args.config_path = Some(v.clone()),
            ("--policy", Some(v)) => {
                args.policy = match v.as_str() {
                    "lru" => CachePolicyKind::Lru,
                    "ca-clock" => CachePolicyKind::CaClock,
                    "garbage-aware" => CachePolicyKind::GarbageAware,
                    other => panic!("unknown --policy {}; expected lru|ca-clock|garbage-aware", other),
                }
            }
            (flag, None) => panic!("{} requires a value", flag),
            (other, _) => panic!("unrecognized argument {}", other),
        }
        i += 2;
    }
    args
}

/// Generates `n` chunks: a `dup_ratio` fraction reuse an earlier chunk's
/// fingerprint (simulating repeated content), the rest are unique.
fn synthetic_working_set(n: usize, dup_ratio: f64, rng: &mut StdRng) -> Vec<Chunk> {
    let mut fingerprints: Vec<[u8; 20]> = Vec::with_capacity(n);
    let mut chunks = Vec::with_capacity(n);
    for i in 0..n {
        let fingerprint = if i > 0 && rng.gen_bool(dup_ratio) {
            fingerprints[rng.gen_range(0..i)]
        } else {
            let mut fp = [0u8; 20];
            rng.fill(&mut fp);
            fp
        };
        fingerprints.push(fingerprint);
        let lba_hash: u32 = rng.gen();
        let ca_hash = u32::from_le_bytes(fingerprint[0..4].try_into().unwrap());
        chunks.push(Chunk::new(i as u64, 32 * 1024, lba_hash, ca_hash, fingerprint, 1));
    }
    chunks
}

fn main() {
    env_logger::init();
    let args = parse_args();

    let mut config = match &args.config_path {
        Some(path) => load_config(path),
        None => Config::default(),
    };
    config.cache_policy_for_fp_index = args.policy;
    if let Some(bits) = args.ca_bucket_no_len {
        config.ca_bucket_no_len = bits;
    }

    let io: Arc<dyn dedup_cache::io::IoModule> = Arc::new(MemoryIoModule::new(1 << 30, 1 << 30));
    let orchestrator = Arc::new(
        MetadataOrchestrator::new(config, io, Box::new(ZstdCompressionModule::new())).expect("valid configuration"),
    );

    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let working_set = synthetic_working_set(args.working_set_chunks, args.dup_ratio, &mut rng);

    log::info!("warming up {} chunks", working_set.len());
    for c in &working_set {
        let mut c = c.clone();
        orchestrator.dedup(&mut c).ok();
        orchestrator.update(&mut c).ok();
    }

    let mut n_hits = 0u64;
    let mut n_total = 0u64;
    let start = Instant::now();
    for _ in 0..args.n_requests {
        let idx = rng.gen_range(0..working_set.len());
        let mut c = working_set[idx].clone();
        c.lookup_result = None;
        c.cache_loc = None;
        orchestrator.lookup(&mut c).ok();
        n_total += 1;
        if c.lookup_result == Some(dedup_cache::chunk::LookupResult::Hit) {
            n_hits += 1;
        } else {
            orchestrator.dedup(&mut c).ok();
            orchestrator.update(&mut c).ok();
        }
    }
    let elapsed = start.elapsed();

    let total_bytes = n_total * 32 * 1024;
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    println!("{:.2} MiB working set traffic", total_bytes as f64 / (1024.0 * 1024.0));
    println!("{:.2} ms", elapsed_ms);
    println!("{:.2} Kops/s", n_total as f64 / elapsed_ms);
    println!("{:.2} MBytes/s", total_bytes as f64 / 1024.0 / 1024.0 / elapsed.as_secs_f64());
    println!("hit_ratio: {:.2}%", n_hits as f64 / n_total as f64 * 100.0);
    println!("total access: {}", n_total);
}
