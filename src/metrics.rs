use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn register_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap_or_else(|err| panic!("register {name}: {err}"));
    counter
}

static CACHE_LOOKUP_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_lookup_total", "Cache retrievals by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_lookup_total");
    vec
});

static CACHE_STORE_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| register_counter("cache_store_total", "Successful cache store and freshen calls"));

static CACHE_STORE_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "cache_store_errors_total",
        "Cache store and freshen calls that failed",
    )
});

static CACHE_INVALIDATIONS_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| register_counter("cache_invalidations_total", "Logical keys invalidated"));

static CACHE_SELF_HEAL_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "cache_self_heal_total",
        "Orphaned metadata or body blobs removed on retrieval",
    )
});

static CACHE_DECODE_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "cache_decode_errors_total",
        "Cache entries dropped because their metadata could not be decoded",
    )
});

static CACHE_EVICTIONS_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| register_counter("cache_evictions_total", "Blobs evicted by the disk engine"));

static CACHE_CLEANUP_DIRS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "cache_cleanup_dirs_total",
        "Old cache directories removed after a layout upgrade",
    )
});

pub fn record_cache_lookup(hit: bool) {
    let label = if hit { "hit" } else { "miss" };
    CACHE_LOOKUP_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_cache_store(ok: bool) {
    if ok {
        CACHE_STORE_TOTAL.inc();
    } else {
        CACHE_STORE_ERRORS_TOTAL.inc();
    }
}

pub fn record_cache_invalidations(keys: usize) {
    CACHE_INVALIDATIONS_TOTAL.inc_by(keys as u64);
}

pub fn record_cache_self_heal() {
    CACHE_SELF_HEAL_TOTAL.inc();
}

pub fn record_cache_decode_error() {
    CACHE_DECODE_ERRORS_TOTAL.inc();
}

pub fn record_cache_eviction() {
    CACHE_EVICTIONS_TOTAL.inc();
}

pub fn record_cache_cleanup_dir() {
    CACHE_CLEANUP_DIRS_TOTAL.inc();
}

/// Renders every registered metric in the Prometheus text format.
pub fn gather() -> Vec<u8> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("encode metrics");
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_cache_metrics() {
        record_cache_lookup(true);
        record_cache_lookup(false);
        record_cache_store(true);
        record_cache_store(false);
        record_cache_invalidations(2);
        record_cache_self_heal();
        record_cache_decode_error();
        record_cache_eviction();

        let text = String::from_utf8(gather()).expect("utf8");
        for name in [
            "cache_lookup_total{result=\"hit\"}",
            "cache_lookup_total{result=\"miss\"}",
            "cache_store_total",
            "cache_store_errors_total",
            "cache_invalidations_total",
            "cache_self_heal_total",
            "cache_decode_errors_total",
            "cache_evictions_total",
        ] {
            assert!(text.contains(name), "expected {name} in metrics output");
        }
    }
}
