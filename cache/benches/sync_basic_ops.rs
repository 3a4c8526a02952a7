use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fibre_stash::{Cache, CacheBuilder};

const NUM_ITEMS: u64 = 10_000;

fn build_cache(max_size: usize, flush_to_size: Option<usize>) -> Cache<u64, u64> {
  let mut builder = CacheBuilder::new(format!("bench_{max_size}_{flush_to_size:?}")).max_size(max_size);
  if let Some(target) = flush_to_size {
    builder = builder.flush_to_size(target);
  }
  builder.build()
}

fn bench_get_hit(c: &mut Criterion) {
  let cache = build_cache(NUM_ITEMS as usize, None);
  for i in 0..NUM_ITEMS {
    cache.set(i, i);
  }

  let mut group = c.benchmark_group("get");
  group.throughput(Throughput::Elements(NUM_ITEMS));
  group.bench_function("hit", |b| {
    b.iter(|| {
      for i in 0..NUM_ITEMS {
        black_box(cache.get(&i));
      }
    })
  });
  group.finish();
}

fn bench_set_with_eviction(c: &mut Criterion) {
  let mut group = c.benchmark_group("set_with_eviction");
  group.throughput(Throughput::Elements(NUM_ITEMS));

  // Overflow-only eviction against batch eviction down to 75%.
  for flush_to_size in [None, Some(750)] {
    let label = flush_to_size.map_or("overflow".to_string(), |t| format!("flush_to_{t}"));
    group.bench_with_input(BenchmarkId::from_parameter(label), &flush_to_size, |b, &flush| {
      let cache = build_cache(1_000, flush);
      let mut next = 0u64;
      b.iter(|| {
        for _ in 0..NUM_ITEMS {
          cache.set(next, next);
          next = next.wrapping_add(1);
        }
      })
    });
  }
  group.finish();
}

criterion_group!(benches, bench_get_hit, bench_set_with_eviction);
criterion_main!(benches);
