//! Pipeline counters, exported by the daemon in Prometheus text format

use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

#[derive(Clone, Default)]
pub struct PipelineMetrics {
    pub chunks_downloaded: Counter,
    pub download_failures: Counter,
    pub verification_mismatches: Counter,
    pub cache_hits: Counter,
    pub chunks_uploaded: Counter,
    pub upload_failures: Counter,
}

impl PipelineMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = PipelineMetrics::default();
        metrics.register(registry);
        metrics
    }

    pub fn register(&self, registry: &mut Registry) {
        registry.register(
            "pstore_chunks_downloaded",
            "Chunks fetched from the ledger and verified",
            self.chunks_downloaded.clone(),
        );
        registry.register(
            "pstore_download_failures",
            "Chunk downloads that ended Failed",
            self.download_failures.clone(),
        );
        registry.register(
            "pstore_verification_mismatches",
            "Ledger candidates whose bytes did not hash to the requested id",
            self.verification_mismatches.clone(),
        );
        registry.register(
            "pstore_cache_hits",
            "Chunk reads served from the local cache",
            self.cache_hits.clone(),
        );
        registry.register(
            "pstore_chunks_uploaded",
            "Chunks published to the ledger",
            self.chunks_uploaded.clone(),
        );
        registry.register(
            "pstore_upload_failures",
            "Chunk uploads that ended Failed",
            self.upload_failures.clone(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn counters_are_exported() {
        let mut registry = Registry::default();
        let metrics = PipelineMetrics::new(&mut registry);
        metrics.cache_hits.inc();
        metrics.cache_hits.inc();

        let mut out = String::new();
        encode(&mut out, &registry).unwrap();
        assert!(out.contains("pstore_cache_hits_total 2"), "{out}");
        assert!(out.contains("pstore_chunks_uploaded_total 0"), "{out}");
    }
}
