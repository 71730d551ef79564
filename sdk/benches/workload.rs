//! Workload distribution benchmark for filesystem operations.
//!
//! Simulates mixed metadata/read/write traffic against the memory
//! backend and the whole-file cache wrapper over it.
//!
//! Run with: cargo bench --bench workload

use std::sync::Arc;

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use unifs::fs::{memory::MemoryFs, CachePolicy, Filesystem, WholeFileCacheFs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    PipeFile,
    CatFile,
    Info,
    Ls,
    Exists,
}

/// Relative operation weights; normalized by `WeightedIndex`.
#[derive(Debug, Clone)]
struct WorkloadConfig {
    pipe_weight: u32,
    cat_weight: u32,
    info_weight: u32,
    ls_weight: u32,
    exists_weight: u32,
    max_depth: usize,
    operations_per_iter: usize,
}

impl WorkloadConfig {
    /// Read-heavy mix: mostly stats and reads over a warm tree.
    fn read_heavy() -> Self {
        Self {
            pipe_weight: 5,
            cat_weight: 40,
            info_weight: 35,
            ls_weight: 10,
            exists_weight: 10,
            max_depth: 4,
            operations_per_iter: 500,
        }
    }

    /// Write-heavy mix: object-store ingestion shape.
    fn write_heavy() -> Self {
        Self {
            pipe_weight: 60,
            cat_weight: 15,
            info_weight: 15,
            ls_weight: 5,
            exists_weight: 5,
            max_depth: 4,
            operations_per_iter: 500,
        }
    }
}

fn random_path(rng: &mut StdRng, max_depth: usize) -> String {
    let depth = rng.gen_range(1..=max_depth);
    let mut p = String::new();
    for _ in 0..depth {
        p.push('/');
        p.push(char::from(b'a' + rng.gen_range(0..8u8)));
    }
    p
}

async fn run_workload(fs: &Arc<dyn Filesystem>, cfg: &WorkloadConfig, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let weights = [
        (Operation::PipeFile, cfg.pipe_weight),
        (Operation::CatFile, cfg.cat_weight),
        (Operation::Info, cfg.info_weight),
        (Operation::Ls, cfg.ls_weight),
        (Operation::Exists, cfg.exists_weight),
    ];
    let dist = WeightedIndex::new(weights.iter().map(|(_, w)| *w)).unwrap();

    for _ in 0..cfg.operations_per_iter {
        let p = random_path(&mut rng, cfg.max_depth);
        match weights[dist.sample(&mut rng)].0 {
            Operation::PipeFile => {
                let parent = unifs::path::parent(&p);
                let _ = fs.mkdir(&parent, true).await;
                let _ = fs.pipe_file(&p, Bytes::from(vec![0u8; 256])).await;
            }
            Operation::CatFile => {
                let _ = fs.cat_file(&p, None, None).await;
            }
            Operation::Info => {
                let _ = fs.info(&p).await;
            }
            Operation::Ls => {
                let _ = fs.ls(&unifs::path::parent(&p)).await;
            }
            Operation::Exists => {
                let _ = fs.exists(&p).await;
            }
        }
    }
}

async fn seeded_memory() -> Arc<dyn Filesystem> {
    let fs = MemoryFs::arc();
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let p = random_path(&mut rng, 4);
        let _ = fs.mkdir(&unifs::path::parent(&p), true).await;
        let _ = fs.pipe_file(&p, Bytes::from(vec![1u8; 512])).await;
    }
    fs
}

fn bench_workloads(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("workload");
    for (name, cfg) in [
        ("read_heavy", WorkloadConfig::read_heavy()),
        ("write_heavy", WorkloadConfig::write_heavy()),
    ] {
        group.throughput(Throughput::Elements(cfg.operations_per_iter as u64));

        group.bench_with_input(BenchmarkId::new("memory", name), &cfg, |b, cfg| {
            let fs = rt.block_on(seeded_memory());
            let mut seed = 0u64;
            b.iter(|| {
                seed += 1;
                rt.block_on(run_workload(&fs, cfg, seed));
            });
        });

        group.bench_with_input(BenchmarkId::new("filecache", name), &cfg, |b, cfg| {
            let fs = rt.block_on(seeded_memory());
            let cached: Arc<dyn Filesystem> = Arc::new(
                WholeFileCacheFs::new(fs, None, CachePolicy::NeverCheck).unwrap(),
            );
            let mut seed = 0u64;
            b.iter(|| {
                seed += 1;
                rt.block_on(run_workload(&cached, cfg, seed));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_workloads);
criterion_main!(benches);
