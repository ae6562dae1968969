//! End-to-end vending tests against the in-memory catalog

use async_trait::async_trait;
use credvend_common::config::{CacheConfig, CatalogConfig, MetalakeConfig, ObjectConfig, SchemaConfig};
use credvend_common::{
    AccessContext, Credential, CredentialType, MetadataObjectRef, MintFailureKind, Permission,
    StorageScope, VendError, current_time_ms,
};
use credvend_core::{InMemoryCatalog, NoopObserver, VendingCoordinator};
use credvend_provider::{CredentialProvider, MintContext, ProviderError, ProviderRegistry};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Stand-in for `s3-token` that records every mint
struct FakeTokenProvider {
    credential_type: CredentialType,
    lifetime_ms: u64,
    delay: Duration,
    fail: AtomicBool,
    calls: AtomicUsize,
    scopes: Mutex<Vec<StorageScope>>,
}

impl FakeTokenProvider {
    fn new(lifetime_ms: u64, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            credential_type: CredentialType::new(CredentialType::S3_TOKEN),
            lifetime_ms,
            delay,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            scopes: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialProvider for FakeTokenProvider {
    fn credential_type(&self) -> &CredentialType {
        &self.credential_type
    }

    fn default_expiry_ms(&self) -> u64 {
        self.lifetime_ms
    }

    async fn mint(
        &self,
        scope: &StorageScope,
        _context: &MintContext,
    ) -> Result<Credential, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.scopes.lock().push(scope.clone());
        tokio::time::sleep(self.delay).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Upstream {
                status: 503,
                message: "sts.amazonaws.com: internal failure, request id 42".into(),
            });
        }
        Ok(Credential::new(
            self.credential_type.clone(),
            current_time_ms() + self.lifetime_ms,
            BTreeMap::from([
                ("s3-access-key-id".to_string(), format!("ASIA{n}")),
                ("s3-secret-access-key".to_string(), "secret".to_string()),
                ("s3-session-token".to_string(), format!("token-{n}")),
            ]),
        ))
    }
}

fn properties(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn metalake() -> MetalakeConfig {
    MetalakeConfig {
        name: "demo".into(),
        catalogs: vec![
            CatalogConfig {
                name: "hadoop".into(),
                location: Some("s3://bucket/warehouse".into()),
                properties: properties(&[
                    ("credential-providers", "s3-token,s3-secret-key"),
                    ("s3-access-key-id", "AKID"),
                    ("s3-secret-access-key", "SECRET"),
                ]),
                read_only: false,
                schemas: vec![SchemaConfig {
                    name: "schema".into(),
                    tables: vec![
                        ObjectConfig::new("table1"),
                        ObjectConfig::new("table2"),
                        ObjectConfig::new("archive").read_only(),
                    ],
                    topics: vec!["events".into()],
                    ..SchemaConfig::default()
                }],
            },
            CatalogConfig {
                name: "logical".into(),
                ..CatalogConfig::default()
            },
            CatalogConfig {
                name: "plain".into(),
                location: Some("s3://bucket/plain".into()),
                ..CatalogConfig::default()
            },
            CatalogConfig {
                name: "kerberos".into(),
                location: Some("hdfs://nn/warehouse".into()),
                properties: properties(&[("credential-providers", "hdfs-kerberos")]),
                ..CatalogConfig::default()
            },
        ],
    }
}

fn registry(provider: &Arc<FakeTokenProvider>) -> Arc<ProviderRegistry> {
    let registry = ProviderRegistry::with_builtin();
    let fake = provider.clone();
    registry.register(CredentialType::S3_TOKEN, move |_| {
        let provider: Arc<dyn CredentialProvider> = fake.clone();
        Ok(provider)
    });
    Arc::new(registry)
}

fn coordinator(provider: &Arc<FakeTokenProvider>, refresh_skew_ms: u64) -> Arc<VendingCoordinator> {
    Arc::new(VendingCoordinator::new(
        Arc::new(InMemoryCatalog::from_config(&[metalake()])),
        registry(provider),
        &CacheConfig {
            refresh_skew_ms,
            ..CacheConfig::default()
        },
        Arc::new(NoopObserver),
    ))
}

fn object(kind: &str, name: &str) -> MetadataObjectRef {
    MetadataObjectRef::parse("demo", kind, name).unwrap()
}

fn writer() -> AccessContext {
    AccessContext::new("alice", Permission::ReadWrite)
}

fn assert_not_expired(credentials: &[Credential]) {
    let now = current_time_ms();
    for credential in credentials {
        assert!(
            credential.expire_time_in_ms() == 0 || credential.expire_time_in_ms() > now,
            "{credential:?} is expired"
        );
    }
}

#[tokio::test]
async fn vends_every_declared_type_in_preference_order() {
    let provider = FakeTokenProvider::new(3_600_000, Duration::ZERO);
    let coordinator = coordinator(&provider, 0);

    let credentials = coordinator
        .vend(&object("table", "hadoop.schema.table1"), None, &writer())
        .await
        .unwrap();

    assert_eq!(credentials.len(), 2);
    assert_eq!(credentials[0].credential_type(), "s3-token");
    assert!(credentials[0].expire_time_in_ms() > current_time_ms());
    assert!(credentials[0].info("s3-session-token").is_some());
    assert_eq!(credentials[1].credential_type(), "s3-secret-key");
    assert_eq!(credentials[1].expire_time_in_ms(), 0);
    assert_eq!(credentials[1].info("s3-access-key-id"), Some("AKID"));
    assert_eq!(credentials[1].info("s3-secret-access-key"), Some("SECRET"));
    assert_not_expired(&credentials);

    let scopes = provider.scopes.lock();
    assert_eq!(scopes[0].locations(), &["s3://bucket/warehouse/schema/table1"]);
    assert_eq!(scopes[0].permission(), Permission::ReadWrite);
}

#[tokio::test]
async fn requested_type_filters_or_is_rejected() {
    let provider = FakeTokenProvider::new(3_600_000, Duration::ZERO);
    let coordinator = coordinator(&provider, 0);
    let table = object("table", "hadoop.schema.table1");

    let only = coordinator
        .vend(&table, Some(&CredentialType::new("S3-SECRET-KEY")), &writer())
        .await
        .unwrap();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].credential_type(), "s3-secret-key");
    assert_eq!(provider.calls(), 0);

    let err = coordinator
        .vend(&table, Some(&CredentialType::new("gcs-token")), &writer())
        .await
        .unwrap_err();
    assert!(matches!(err, VendError::UnsupportedCredentialType { .. }));
    assert_eq!(err.http_status_code(), 400);
}

#[tokio::test]
async fn unknown_objects_fail_and_storageless_objects_are_empty() {
    let provider = FakeTokenProvider::new(3_600_000, Duration::ZERO);
    let coordinator = coordinator(&provider, 0);

    let err = coordinator
        .vend(&object("table", "hadoop.schema.missing"), None, &writer())
        .await
        .unwrap_err();
    assert!(matches!(err, VendError::NotFound(_)));

    let missing_metalake = MetadataObjectRef::parse("nope", "catalog", "hadoop").unwrap();
    let err = coordinator
        .vend(&missing_metalake, None, &writer())
        .await
        .unwrap_err();
    assert!(matches!(err, VendError::NoSuchMetalake(_)));

    // Exists, but no location
    let empty = coordinator
        .vend(&object("catalog", "logical"), None, &writer())
        .await
        .unwrap();
    assert!(empty.is_empty());

    // Has a location, but declares no credential type
    let empty = coordinator
        .vend(&object("catalog", "plain"), None, &writer())
        .await
        .unwrap();
    assert!(empty.is_empty());

    let err = coordinator
        .vend(&object("topic", "hadoop.schema.events"), None, &writer())
        .await
        .unwrap_err();
    assert!(matches!(err, VendError::UnsupportedObjectType(_)));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn unregistered_type_is_no_provider() {
    let provider = FakeTokenProvider::new(3_600_000, Duration::ZERO);
    let coordinator = coordinator(&provider, 0);

    let err = coordinator
        .vend(&object("catalog", "kerberos"), None, &writer())
        .await
        .unwrap_err();
    assert!(matches!(err, VendError::NoProvider(ref t) if t == "hdfs-kerberos"));
    assert_eq!(err.http_status_code(), 500);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_mint() {
    let provider = FakeTokenProvider::new(3_600_000, Duration::from_millis(200));
    let coordinator = coordinator(&provider, 0);
    let token = CredentialType::new(CredentialType::S3_TOKEN);

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let coordinator = coordinator.clone();
            let token = token.clone();
            tokio::spawn(async move {
                coordinator
                    .vend(&object("table", "hadoop.schema.table1"), Some(&token), &writer())
                    .await
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(provider.calls(), 1);
    let first = &results[0][0];
    assert!(results.iter().all(|r| r.len() == 1 && &r[0] == first));
    assert_eq!(coordinator.stats().mints, 1);
}

#[tokio::test]
async fn expired_credential_is_minted_again() {
    let provider = FakeTokenProvider::new(1_000, Duration::ZERO);
    let coordinator = coordinator(&provider, 0);
    let table = object("table", "hadoop.schema.table1");
    let token = CredentialType::new(CredentialType::S3_TOKEN);

    let first = coordinator.vend(&table, Some(&token), &writer()).await.unwrap();
    let again = coordinator.vend(&table, Some(&token), &writer()).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(provider.calls(), 1);

    tokio::time::sleep(Duration::from_millis(1_001)).await;

    let renewed = coordinator.vend(&table, Some(&token), &writer()).await.unwrap();
    assert_eq!(provider.calls(), 2);
    assert_ne!(first, renewed);
    assert_not_expired(&renewed);
}

#[tokio::test]
async fn scopes_are_isolated() {
    let provider = FakeTokenProvider::new(3_600_000, Duration::ZERO);
    let coordinator = coordinator(&provider, 0);
    let token = CredentialType::new(CredentialType::S3_TOKEN);
    let reader = AccessContext::new("bob", Permission::Read);

    let t1_write = coordinator
        .vend(&object("table", "hadoop.schema.table1"), Some(&token), &writer())
        .await
        .unwrap();
    let t1_read = coordinator
        .vend(&object("table", "hadoop.schema.table1"), Some(&token), &reader)
        .await
        .unwrap();
    let t2_write = coordinator
        .vend(&object("table", "hadoop.schema.table2"), Some(&token), &writer())
        .await
        .unwrap();

    assert_eq!(provider.calls(), 3);
    assert_ne!(t1_write, t1_read);
    assert_ne!(t1_write, t2_write);

    let scopes = provider.scopes.lock();
    assert_eq!(scopes[1].permission(), Permission::Read);
    assert!(!scopes[2].covers("s3://bucket/warehouse/schema/table1/data/x.parquet"));
    assert!(scopes[2].covers("s3://bucket/warehouse/schema/table2/data/x.parquet"));
}

#[tokio::test]
async fn grant_never_widens_object_capability() {
    let provider = FakeTokenProvider::new(3_600_000, Duration::ZERO);
    let coordinator = coordinator(&provider, 0);

    coordinator
        .vend(
            &object("table", "hadoop.schema.archive"),
            Some(&CredentialType::new(CredentialType::S3_TOKEN)),
            &writer(),
        )
        .await
        .unwrap();
    assert_eq!(provider.scopes.lock()[0].permission(), Permission::Read);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_caller_does_not_cancel_the_mint() {
    let provider = FakeTokenProvider::new(3_600_000, Duration::from_millis(200));
    let coordinator = coordinator(&provider, 0);
    let table = object("table", "hadoop.schema.table1");
    let token = CredentialType::new(CredentialType::S3_TOKEN);

    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        coordinator.vend(&table, Some(&token), &writer()),
    )
    .await;
    assert!(timed_out.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;

    let credentials = coordinator.vend(&table, Some(&token), &writer()).await.unwrap();
    assert_eq!(credentials.len(), 1);
    assert_eq!(provider.calls(), 1);
    assert_eq!(coordinator.stats().hits, 1);
}

#[tokio::test]
async fn failed_refresh_serves_previous_credential_until_it_expires() {
    // 2s lifetime: the skew is capped at 1s, so a refresh is due after 1s
    let provider = FakeTokenProvider::new(2_000, Duration::ZERO);
    let coordinator = coordinator(&provider, 60_000);
    let table = object("table", "hadoop.schema.table1");
    let token = CredentialType::new(CredentialType::S3_TOKEN);

    let first = coordinator.vend(&table, Some(&token), &writer()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    provider.set_failing(true);

    let bridged = coordinator.vend(&table, Some(&token), &writer()).await.unwrap();
    assert_eq!(bridged, first);
    assert_eq!(provider.calls(), 2);
    assert_eq!(coordinator.stats().stale_served, 1);

    tokio::time::sleep(Duration::from_millis(1_000)).await;

    let err = coordinator
        .vend(&table, Some(&token), &writer())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VendError::CredentialUnavailable {
            reason: MintFailureKind::Upstream,
            ..
        }
    ));
    assert_eq!(err.http_status_code(), 503);
    assert!(!err.to_string().contains("request id"));

    provider.set_failing(false);
    let recovered = coordinator.vend(&table, Some(&token), &writer()).await.unwrap();
    assert_not_expired(&recovered);
}

#[tokio::test]
async fn invalidation_forces_a_new_mint() {
    let provider = FakeTokenProvider::new(3_600_000, Duration::ZERO);
    let coordinator = coordinator(&provider, 0);
    let table = object("table", "hadoop.schema.table1");
    let token = CredentialType::new(CredentialType::S3_TOKEN);

    coordinator.vend(&table, Some(&token), &writer()).await.unwrap();
    assert_eq!(coordinator.invalidate_object(&table), 1);
    coordinator.vend(&table, Some(&token), &writer()).await.unwrap();
    assert_eq!(provider.calls(), 2);

    assert_eq!(coordinator.invalidate_metalake("demo"), 1);
    assert!(coordinator.cache().is_empty());
}

#[tokio::test]
async fn rotated_static_key_is_served_after_config_change() {
    let provider = FakeTokenProvider::new(3_600_000, Duration::ZERO);
    let catalog = Arc::new(InMemoryCatalog::from_config(&[metalake()]));
    let coordinator = VendingCoordinator::new(
        catalog.clone(),
        registry(&provider),
        &CacheConfig::default(),
        Arc::new(NoopObserver),
    );
    let table = object("table", "hadoop.schema.table1");
    let secret_key = CredentialType::new(CredentialType::S3_SECRET_KEY);

    let before = coordinator
        .vend(&table, Some(&secret_key), &writer())
        .await
        .unwrap();
    assert_eq!(before[0].info("s3-secret-access-key"), Some("SECRET"));

    let mut rotated = metalake();
    rotated.catalogs[0]
        .properties
        .insert("s3-secret-access-key".into(), "ROTATED".into());
    catalog.insert_metalake(rotated);

    let after = coordinator
        .vend(&table, Some(&secret_key), &writer())
        .await
        .unwrap();
    assert_eq!(after[0].info("s3-secret-access-key"), Some("ROTATED"));
}
