use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use anyhow::anyhow;
use futures_util::future::BoxFuture;

use super::*;
use crate::channel::MemoryChannel;
use crate::consent::ConsentCategories;

struct ScriptedFingerprinter {
    delay: Duration,
    result: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedFingerprinter {
    fn ok(value: &str, delay_ms: u64) -> Arc<Self> {
        Arc::new(Self { delay: Duration::from_millis(delay_ms), result: Some(value.to_string()), calls: AtomicUsize::new(0) })
    }
    fn failing() -> Arc<Self> {
        Arc::new(Self { delay: Duration::ZERO, result: None, calls: AtomicUsize::new(0) })
    }
    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

impl Fingerprinter for ScriptedFingerprinter {
    fn fingerprint(&self) -> BoxFuture<'_, anyhow::Result<String>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.result.clone().ok_or_else(|| anyhow!("canvas access blocked"))
        })
    }
}

struct Fixture {
    channel: Arc<MemoryChannel>,
    ledger: Arc<ConsentLedger>,
    resolver: Arc<DeviceIdentityResolver>,
}

fn fixture(fp: Arc<ScriptedFingerprinter>) -> Fixture {
    let channel = Arc::new(MemoryChannel::new());
    let config = Arc::new(SessionConfig::default());
    let ledger = Arc::new(ConsentLedger::new(channel.clone(), config.clone()));
    let resolver = DeviceIdentityResolver::new(ledger.clone(), channel.clone(), config, fp);
    Fixture { channel, ledger, resolver }
}

#[tokio::test]
async fn no_consent_means_no_identity() {
    let fp = ScriptedFingerprinter::ok("fp-1", 0);
    let fx = fixture(fp.clone());
    for _ in 0..5 {
        assert!(fx.resolver.resolve().await.is_none());
    }
    assert!(fx.resolver.current().is_none());
    assert!(fx.channel.read(keys::DEVICE_ID).is_none());
    assert_eq!(fp.calls(), 0);
}

#[tokio::test]
async fn withdrawn_necessary_blocks_writes() {
    let fx = fixture(ScriptedFingerprinter::ok("fp-1", 0));
    let cfg = SessionConfig::default();
    fx.channel.write(keys::CONSENT, "accepted", &cfg.policy_for(keys::CONSENT)).unwrap();
    fx.channel.write(keys::CONSENT_SETTINGS, r#"{"necessary":false}"#, &cfg.policy_for(keys::CONSENT_SETTINGS)).unwrap();
    fx.ledger.load();
    assert!(fx.resolver.resolve().await.is_none());
    assert!(fx.channel.read(keys::DEVICE_ID).is_none());
}

#[tokio::test]
async fn repeated_resolve_is_stable() {
    let fx = fixture(ScriptedFingerprinter::ok("a1b2c3d4e5f6", 0));
    fx.ledger.grant(ConsentCategories::necessary_only()).unwrap();
    let first = fx.resolver.resolve().await.unwrap();
    let second = fx.resolver.resolve().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.origin, DeviceOrigin::Fingerprint);
    assert_eq!(fx.channel.read(keys::DEVICE_ID).as_deref(), Some("a1b2c3d4e5f6"));
    assert_eq!(fx.resolver.issued_count(), 1);
}

#[tokio::test]
async fn failing_fingerprint_falls_back() {
    let fx = fixture(ScriptedFingerprinter::failing());
    fx.ledger.reject_all().unwrap();
    let id = fx.resolver.resolve().await.unwrap();
    assert_eq!(id.origin, DeviceOrigin::Fallback);
    assert!(id.id.starts_with("device-"));
    assert_eq!(id.id.len(), "device-".len() + 8);
    assert!(id.id["device-".len()..].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    assert_eq!(fx.resolver.resolve().await.unwrap(), id);
    assert_eq!(DeviceIdentity::from_persisted(&id.id).origin, DeviceOrigin::Fallback);
}

#[tokio::test(start_paused = true)]
async fn slow_fingerprint_times_out_to_fallback() {
    let fp = ScriptedFingerprinter::ok("never-used", 5_000);
    let fx = fixture(fp.clone());
    fx.ledger.reject_all().unwrap();
    let id = fx.resolver.resolve().await.unwrap();
    assert_eq!(id.origin, DeviceOrigin::Fallback);
    assert_eq!(fp.calls(), 1);
}

#[tokio::test]
async fn concurrent_resolution_issues_one_identifier() {
    let fp = ScriptedFingerprinter::ok("fp-shared", 20);
    let fx = fixture(fp.clone());
    fx.ledger.accept_all().unwrap();

    let calls = (0..10).map(|_| fx.resolver.resolve());
    let results = futures::future::join_all(calls).await;

    let ids: Vec<String> = results.into_iter().map(|r| r.unwrap().id).collect();
    assert!(ids.iter().all(|id| id == "fp-shared"));
    assert_eq!(fp.calls(), 1);
    assert_eq!(fx.resolver.issued_count(), 1);
    assert_eq!(fx.channel.keys().iter().filter(|k| k.as_str() == keys::DEVICE_ID).count(), 1);
}

#[tokio::test]
async fn revoke_erases_and_blocks_regeneration() {
    let fx = fixture(ScriptedFingerprinter::ok("fp-9", 0));
    fx.ledger.reject_all().unwrap();
    fx.resolver.resolve().await.unwrap();
    let mut rx = fx.resolver.subscribe();
    assert!(rx.borrow_and_update().is_some());

    fx.ledger.revoke().unwrap();
    assert!(fx.channel.read(keys::DEVICE_ID).is_none());
    assert!(rx.has_changed().unwrap());
    assert!(rx.borrow_and_update().is_none());

    assert!(fx.resolver.resolve().await.is_none());
    assert!(fx.channel.read(keys::DEVICE_ID).is_none());
}

#[tokio::test]
async fn revoke_during_generation_discards_result() {
    let fx = fixture(ScriptedFingerprinter::ok("fp-late", 50));
    fx.ledger.reject_all().unwrap();
    let ledger = fx.ledger.clone();
    let (resolved, _) = tokio::join!(fx.resolver.resolve(), async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        ledger.revoke().unwrap();
    });
    assert!(resolved.is_none());
    assert!(fx.channel.read(keys::DEVICE_ID).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn revoke_racing_resolve_never_leaves_identity_behind() {
    for _ in 0..200 {
        let fx = fixture(ScriptedFingerprinter::ok("fp-race", 0));
        fx.ledger.reject_all().unwrap();
        let resolver = fx.resolver.clone();
        let ledger = fx.ledger.clone();
        let resolving = tokio::spawn(async move { resolver.resolve().await });
        let revoking = tokio::spawn(async move { ledger.revoke().unwrap() });
        let (resolved, revoked) = tokio::join!(resolving, revoking);
        resolved.unwrap();
        revoked.unwrap();

        assert!(fx.resolver.subscribe().borrow().is_none());
        assert!(fx.resolver.current().is_none());
        assert!(fx.channel.read(keys::DEVICE_ID).is_none());
    }
}

#[tokio::test]
async fn missing_persisted_value_is_restored_with_same_id() {
    let fp = ScriptedFingerprinter::ok("fp-keep", 0);
    let fx = fixture(fp.clone());
    fx.ledger.reject_all().unwrap();
    let first = fx.resolver.resolve().await.unwrap();
    // Storage cleared behind our back while consent still holds.
    fx.channel.erase(keys::DEVICE_ID).unwrap();
    let again = fx.resolver.resolve().await.unwrap();
    assert_eq!(first, again);
    assert_eq!(fx.channel.read(keys::DEVICE_ID).as_deref(), Some("fp-keep"));
    assert_eq!(fp.calls(), 1);
}

#[tokio::test]
async fn adopt_existing_erases_stray_id_without_consent() {
    let fx = fixture(ScriptedFingerprinter::ok("fp", 0));
    let cfg = SessionConfig::default();
    fx.channel.write(keys::DEVICE_ID, "stray", &cfg.policy_for(keys::DEVICE_ID)).unwrap();
    assert!(fx.resolver.adopt_existing().is_none());
    assert!(fx.channel.read(keys::DEVICE_ID).is_none());

    fx.channel.write(keys::DEVICE_ID, "device-abc12345", &cfg.policy_for(keys::DEVICE_ID)).unwrap();
    fx.ledger.reject_all().unwrap();
    let adopted = fx.resolver.adopt_existing().unwrap();
    assert_eq!(adopted.origin, DeviceOrigin::Fallback);
    assert_eq!(fx.resolver.current(), Some(adopted));
}

#[test]
fn short_id_is_bounded() {
    let id = DeviceIdentity::from_persisted("0123456789abcdef0123");
    assert_eq!(id.short(), "0123456789ab");
    assert_eq!(DeviceIdentity::from_persisted("abc").short(), "abc");
}
