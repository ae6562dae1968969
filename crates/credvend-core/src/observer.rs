//! Observability hooks for the vending path
//!
//! The cache and coordinator report events through a [`VendingObserver`].
//! [`MetricsObserver`] forwards them to the `metrics` facade; the server
//! installs a Prometheus recorder behind it.

use credvend_common::{CredentialType, MintFailureKind};
use std::time::Duration;

/// Receives vending events. Every method defaults to a no-op.
pub trait VendingObserver: Send + Sync {
    fn cache_hit(&self, _credential_type: &CredentialType) {}

    fn cache_miss(&self, _credential_type: &CredentialType) {}

    /// A caller joined a mint already in flight for the same key
    fn mint_coalesced(&self, _credential_type: &CredentialType) {}

    fn mint_completed(&self, _credential_type: &CredentialType, _elapsed: Duration) {}

    fn mint_failed(&self, _credential_type: &CredentialType, _kind: MintFailureKind) {}

    /// A refresh failed and the previous, still valid credential was served
    fn stale_served(&self, _credential_type: &CredentialType, _remaining_ms: u64) {}

    fn evicted(&self, _count: usize) {}
}

/// Observer that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl VendingObserver for NoopObserver {}

/// Observer publishing counters and histograms through the `metrics` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl VendingObserver for MetricsObserver {
    fn cache_hit(&self, credential_type: &CredentialType) {
        metrics::counter!("credvend_cache_hits_total", "credential_type" => credential_type.to_string())
            .increment(1);
    }

    fn cache_miss(&self, credential_type: &CredentialType) {
        metrics::counter!("credvend_cache_misses_total", "credential_type" => credential_type.to_string())
            .increment(1);
    }

    fn mint_coalesced(&self, credential_type: &CredentialType) {
        metrics::counter!("credvend_mints_coalesced_total", "credential_type" => credential_type.to_string())
            .increment(1);
    }

    fn mint_completed(&self, credential_type: &CredentialType, elapsed: Duration) {
        metrics::counter!(
            "credvend_mints_total",
            "credential_type" => credential_type.to_string(),
            "outcome" => "success"
        )
        .increment(1);
        metrics::histogram!("credvend_mint_duration_seconds", "credential_type" => credential_type.to_string())
            .record(elapsed.as_secs_f64());
    }

    fn mint_failed(&self, credential_type: &CredentialType, kind: MintFailureKind) {
        metrics::counter!(
            "credvend_mints_total",
            "credential_type" => credential_type.to_string(),
            "outcome" => "failure"
        )
        .increment(1);
        tracing::warn!(credential_type = %credential_type, reason = %kind, "credential mint failed");
    }

    fn stale_served(&self, credential_type: &CredentialType, remaining_ms: u64) {
        metrics::counter!("credvend_stale_served_total", "credential_type" => credential_type.to_string())
            .increment(1);
        tracing::warn!(
            credential_type = %credential_type,
            remaining_ms,
            "refresh failed, serving previous credential"
        );
    }

    fn evicted(&self, count: usize) {
        metrics::counter!("credvend_evictions_total").increment(count as u64);
    }
}
