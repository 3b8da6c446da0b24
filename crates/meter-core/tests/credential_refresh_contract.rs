//! Contract: cross-account credentials are refreshed before they expire

mod common;

use common::{RecordingShadow, ScriptedIssuer, ScriptedSource, lit_meter};
use meter_core::{
    CredentialManager, CredentialStatus, DesiredPatch, EngineConfig, Error, Meter,
};
use std::time::Duration;

const ACCOUNT: &str = "123456789012";

fn cross_account_meter(shadow: &RecordingShadow, issuer: &ScriptedIssuer) -> Meter {
    let mut config = EngineConfig::new("pico_w_meter");
    config.assume_role = Some(ACCOUNT.to_string());
    let credentials = CredentialManager::cross_account(ACCOUNT, Box::new(issuer.clone())).unwrap();
    Meter::new(config, Box::new(shadow.clone()), credentials).unwrap()
}

#[tokio::test]
async fn test_first_cycle_assumes_role_before_reading() {
    let shadow = RecordingShadow::new(lit_meter());
    let issuer = ScriptedIssuer::new(chrono::Duration::hours(12));
    let mut meter = cross_account_meter(&shadow, &issuer);
    let mut source = ScriptedSource::repeating(DesiredPatch::new());

    meter.cycle(&mut source).await.unwrap();

    assert_eq!(issuer.call_count(), 1);
    assert_eq!(
        issuer.requests(),
        vec![(
            "arn:aws:iam::123456789012:role/meter-update".to_string(),
            "meter".to_string(),
            Duration::from_secs(12 * 60 * 60),
        )]
    );
    assert_eq!(shadow.applied_credentials().len(), 1);
    assert_eq!(meter.credentials().status(), CredentialStatus::Valid);
}

#[tokio::test]
async fn test_valid_credentials_are_reused() {
    let shadow = RecordingShadow::new(lit_meter());
    let issuer = ScriptedIssuer::new(chrono::Duration::hours(12));
    let mut meter = cross_account_meter(&shadow, &issuer);
    let mut source = ScriptedSource::repeating(DesiredPatch::new());

    for _ in 0..5 {
        meter.cycle(&mut source).await.unwrap();
    }

    assert_eq!(issuer.call_count(), 1);
    assert_eq!(shadow.applied_credentials().len(), 1);
    assert_eq!(shadow.read_count(), 5);
}

#[tokio::test]
async fn test_short_lived_credentials_refresh_every_cycle() {
    let shadow = RecordingShadow::new(lit_meter());
    let issuer = ScriptedIssuer::new(chrono::Duration::minutes(30));
    let mut meter = cross_account_meter(&shadow, &issuer);
    let mut source = ScriptedSource::repeating(DesiredPatch::new());

    for _ in 0..3 {
        meter.cycle(&mut source).await.unwrap();
    }

    assert_eq!(issuer.call_count(), 3);
    let applied = shadow.applied_credentials();
    assert_eq!(applied.len(), 3);
    assert_eq!(applied[2].access_key_id, "ASIA2");
}

#[tokio::test]
async fn test_issuer_failure_precedes_device_io() {
    let shadow = RecordingShadow::new(lit_meter());
    let issuer = ScriptedIssuer::new(chrono::Duration::hours(12));
    issuer.fail();
    let mut meter = cross_account_meter(&shadow, &issuer);
    let mut source = ScriptedSource::repeating(DesiredPatch::new().with("meter", 1.0));
    let updates = source.update_counter();

    let err = meter.cycle(&mut source).await.unwrap_err();

    assert!(matches!(err, Error::Credential(_)), "{err:?}");
    assert_eq!(shadow.read_count(), 0);
    assert_eq!(shadow.write_count(), 0);
    assert_eq!(updates.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(meter.credentials().status(), CredentialStatus::Unset);
}

#[tokio::test]
async fn test_rejected_credentials_are_refreshed_next_cycle() {
    let shadow = RecordingShadow::new(lit_meter());
    shadow.reject_next_credentials(1);
    let issuer = ScriptedIssuer::new(chrono::Duration::hours(12));
    let mut meter = cross_account_meter(&shadow, &issuer);
    let mut source = ScriptedSource::repeating(DesiredPatch::new());

    let err = meter.cycle(&mut source).await.unwrap_err();
    assert!(matches!(err, Error::Credential(_)), "{err:?}");
    assert_eq!(shadow.read_count(), 0);
    assert_eq!(meter.credentials().status(), CredentialStatus::Unset);

    meter.cycle(&mut source).await.unwrap();

    assert_eq!(issuer.call_count(), 2);
    let applied = shadow.applied_credentials();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].access_key_id, "ASIA1");
    assert_eq!(meter.credentials().status(), CredentialStatus::Valid);
}

#[tokio::test]
async fn test_refresh_threshold_is_one_hour() {
    let issuer = ScriptedIssuer::new(chrono::Duration::hours(12));
    let mut manager = CredentialManager::cross_account(ACCOUNT, Box::new(issuer.clone())).unwrap();

    let first = manager
        .refresh_if_needed_at(chrono::Utc::now())
        .await
        .unwrap()
        .cloned()
        .unwrap();
    let expiration = first.expiration;

    // 61 minutes left: keep using the current set
    let early = expiration - chrono::Duration::minutes(61);
    assert_eq!(manager.status_at(early), CredentialStatus::Valid);
    assert!(manager.refresh_if_needed_at(early).await.unwrap().is_none());
    assert_eq!(issuer.call_count(), 1);

    // 59 minutes left: refresh
    let late = expiration - chrono::Duration::minutes(59);
    assert_eq!(manager.status_at(late), CredentialStatus::Expiring);
    assert!(manager.refresh_if_needed_at(late).await.unwrap().is_some());
    assert_eq!(issuer.call_count(), 2);
}

#[tokio::test]
async fn test_disabled_manager_never_refreshes() {
    let shadow = RecordingShadow::new(lit_meter());
    let mut meter = Meter::new(
        EngineConfig::new("pico_w_meter"),
        Box::new(shadow.clone()),
        CredentialManager::disabled(),
    )
    .unwrap();
    let mut source = ScriptedSource::repeating(DesiredPatch::new());

    meter.cycle(&mut source).await.unwrap();
    meter.clear().await.unwrap();

    assert_eq!(meter.credentials().status(), CredentialStatus::Disabled);
    assert!(shadow.applied_credentials().is_empty());
}

#[test]
fn test_malformed_role_rejected_before_io() {
    let issuer = ScriptedIssuer::new(chrono::Duration::hours(12));
    let err = CredentialManager::cross_account("not-an-account", Box::new(issuer.clone())).unwrap_err();

    assert!(err.is_configuration());
    assert_eq!(issuer.call_count(), 0);
}
