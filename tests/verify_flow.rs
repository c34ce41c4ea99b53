use std::sync::atomic::Ordering;

use geofence_shared::capabilities::testing::LocalBackends;
use geofence_shared::capabilities::LedgerRecord;
use geofence_shared::model::{AccountAddress, CiphertextHandle};
use geofence_shared::notifier::StatusPhase;
use geofence_shared::verify::VerificationState;
use geofence_shared::{get_current_time_secs, Dashboard, DashboardConfig, ErrorKind, RecordKey};

const LATITUDE: i64 = -33;

fn seed(backends: &LocalBackends, key: &str, verified: Option<i64>) -> RecordKey {
    let key = RecordKey::new(key);
    let handle = CiphertextHandle::new(format!("0x{}", hex_of(key.as_str())));
    backends.ledger.insert_record(
        key.clone(),
        LedgerRecord {
            name: "Harbour".into(),
            timestamp_secs: get_current_time_secs(),
            creator: AccountAddress::new(LocalBackends::ACCOUNT),
            public_value1: 250,
            public_value2: 0,
            is_verified: verified.is_some(),
            decrypted_value: verified.unwrap_or(0),
        },
        handle.clone(),
    );
    backends.fhe.register(handle, LATITUDE);
    key
}

fn hex_of(s: &str) -> String {
    s.bytes().map(|b| format!("{b:02x}")).collect()
}

async fn connected_dashboard(backends: &LocalBackends) -> Dashboard {
    let dashboard = Dashboard::new(backends.collaborators(), DashboardConfig::default()).unwrap();
    dashboard.session_changed().await.unwrap();
    dashboard
}

#[tokio::test]
async fn verify_reveals_and_confirms_location() {
    let backends = LocalBackends::connected();
    let key = seed(&backends, "fence-1700000000001", None);
    let dashboard = connected_dashboard(&backends).await;

    dashboard.open_detail(key.clone());
    let detail = dashboard.view().await.detail.unwrap();
    assert_eq!(detail.value_label, "FHE Encrypted Integer");
    assert_eq!(detail.action_label, "Verify Location");

    assert_eq!(dashboard.verify_selected().await.unwrap(), Some(LATITUDE));

    let view = dashboard.view().await;
    let detail = view.detail.unwrap();
    assert_eq!(detail.state, VerificationState::Verified(LATITUDE));
    assert_eq!(detail.value_label, "-33 (On-chain Verified)");
    assert_eq!(detail.action_label, "Verified");
    assert_eq!(view.fences[0].status_label, "Location Verified");
    assert_eq!(view.stats.active_fences, 1);
    assert!(view
        .history
        .iter()
        .any(|line| line.ends_with(": Decrypted and verified location data")));
    assert_eq!(backends.ledger.record(&key).unwrap().decrypted_value, LATITUDE);
}

#[tokio::test]
async fn verified_record_short_circuits() {
    let backends = LocalBackends::connected();
    let key = seed(&backends, "fence-1700000000002", Some(LATITUDE));
    let dashboard = connected_dashboard(&backends).await;
    dashboard.open_detail(key.clone());

    for _ in 0..2 {
        assert_eq!(dashboard.verify(&key).await.unwrap(), Some(LATITUDE));
    }

    assert_eq!(backends.fhe.calls.decryptions.load(Ordering::SeqCst), 0);
    assert_eq!(
        backends
            .ledger
            .calls
            .verification_submissions
            .load(Ordering::SeqCst),
        0
    );
    assert_eq!(backends.ledger.calls.handle_reads.load(Ordering::SeqCst), 0);
    assert_eq!(
        dashboard.view().await.status.unwrap().message,
        "Location data already verified on-chain"
    );
}

#[tokio::test]
async fn concurrent_verification_by_another_party_is_tolerated() {
    let backends = LocalBackends::connected();
    let key = seed(&backends, "fence-1700000000003", None);
    let dashboard = connected_dashboard(&backends).await;
    backends.ledger.set_race_verification(true);

    assert_eq!(dashboard.verify(&key).await.unwrap(), Some(LATITUDE));

    let view = dashboard.view().await;
    let status = view.status.unwrap();
    assert_eq!(status.phase, StatusPhase::Success);
    assert_eq!(status.message, "Location data is already verified on-chain");
    assert_eq!(view.fences[0].verified_value, Some(LATITUDE));
}

#[tokio::test]
async fn second_verify_for_same_fence_fails_fast() {
    let backends = LocalBackends::connected();
    let key = seed(&backends, "fence-1700000000004", None);
    let dashboard = connected_dashboard(&backends).await;
    dashboard.open_detail(key.clone());
    backends.fhe.set_hold_decryptions(true);

    let first = dashboard.verify(&key);
    let second = async {
        backends.fhe.decryption_started().await;
        assert_eq!(
            dashboard.view().await.detail.unwrap().action_label,
            "Verifying..."
        );
        let result = dashboard.verify(&key).await;
        let status = dashboard.view().await.status.unwrap();
        assert_eq!(status.phase, StatusPhase::Info);
        assert_eq!(
            status.message,
            "This operation is already in progress. Please wait."
        );
        backends.fhe.release_one();
        result
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap(), Some(LATITUDE));
    assert_eq!(second.unwrap_err().kind, ErrorKind::AlreadyInProgress);
    assert_eq!(backends.fhe.calls.decryptions.load(Ordering::SeqCst), 1);

    // Guard released; a further call short-circuits on the verified record
    assert_eq!(dashboard.verify(&key).await.unwrap(), Some(LATITUDE));
}

#[tokio::test]
async fn externally_verified_record_updates_stale_list() {
    let backends = LocalBackends::connected();
    let key = seed(&backends, "fence-1700000000008", None);
    let dashboard = connected_dashboard(&backends).await;
    assert_eq!(dashboard.view().await.stats.active_fences, 0);

    // Verified by someone else after our list was loaded
    backends.ledger.verify_externally(&key, LATITUDE);
    dashboard.open_detail(key.clone());
    assert_eq!(dashboard.verify(&key).await.unwrap(), Some(LATITUDE));

    let view = dashboard.view().await;
    let detail = view.detail.unwrap();
    assert_eq!(detail.state, VerificationState::Verified(LATITUDE));
    assert_eq!(detail.action_label, "Verified");
    assert!(!detail.action_enabled);
    assert_eq!(view.fences[0].status_label, "Location Verified");
    assert_eq!(view.stats.active_fences, 1);
    assert_eq!(backends.fhe.calls.decryptions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn refresh_during_decryption_does_not_hide_result() {
    let backends = LocalBackends::connected();
    let key = seed(&backends, "fence-1700000000009", None);
    let dashboard = connected_dashboard(&backends).await;
    dashboard.open_detail(key.clone());
    backends.fhe.set_hold_decryptions(true);

    let verify = dashboard.verify(&key);
    let refresh = async {
        backends.fhe.decryption_started().await;
        let outcome = dashboard.refresh().await.unwrap();
        assert!(outcome.applied);
        assert!(!outcome.fences[0].is_verified);
        backends.fhe.release_one();
    };
    let (value, ()) = tokio::join!(verify, refresh);

    assert_eq!(value.unwrap(), Some(LATITUDE));
    let view = dashboard.view().await;
    assert_eq!(view.fences[0].verified_value, Some(LATITUDE));
    assert_eq!(view.detail.unwrap().state, VerificationState::Verified(LATITUDE));
}

#[tokio::test]
async fn verify_again_hides_unconfirmed_local_value() {
    let backends = LocalBackends::connected();
    let key = seed(&backends, "fence-1700000000005", None);
    let dashboard = connected_dashboard(&backends).await;
    dashboard.open_detail(key.clone());

    // 1. Decrypt, but the list cannot be refreshed afterwards
    backends.fhe.set_hold_decryptions(true);
    let verify = dashboard.verify(&key);
    let break_list = async {
        backends.fhe.decryption_started().await;
        backends.ledger.set_fail_list(true);
        backends.fhe.release_one();
    };
    let (value, ()) = tokio::join!(verify, break_list);
    assert_eq!(value.unwrap(), Some(LATITUDE));

    let detail = dashboard.view().await.detail.unwrap();
    assert_eq!(detail.value_label, "-33 (Locally Decrypted)");
    assert_eq!(detail.action_label, "Re-verify");

    // 2. Clicking again hides the value without touching the ledger
    let handle_reads = backends.ledger.calls.handle_reads.load(Ordering::SeqCst);
    assert_eq!(dashboard.verify(&key).await.unwrap(), None);
    assert_eq!(backends.ledger.calls.handle_reads.load(Ordering::SeqCst), handle_reads);
    assert_eq!(backends.fhe.calls.decryptions.load(Ordering::SeqCst), 1);
    assert_eq!(
        dashboard.view().await.detail.unwrap().value_label,
        "FHE Encrypted Integer"
    );
}

#[tokio::test]
async fn closing_detail_discards_local_value() {
    let backends = LocalBackends::connected();
    let key = seed(&backends, "fence-1700000000006", None);
    let dashboard = connected_dashboard(&backends).await;
    dashboard.open_detail(key.clone());

    backends.fhe.set_hold_decryptions(true);
    let verify = dashboard.verify(&key);
    let break_list = async {
        backends.fhe.decryption_started().await;
        backends.ledger.set_fail_list(true);
        backends.fhe.release_one();
    };
    let (value, ()) = tokio::join!(verify, break_list);
    value.unwrap();

    dashboard.close_detail();
    assert!(dashboard.view().await.detail.is_none());

    dashboard.open_detail(key);
    let detail = dashboard.view().await.detail.unwrap();
    assert_eq!(detail.state, VerificationState::Encrypted);
}

#[tokio::test]
async fn failed_decryption_leaves_view_untouched() {
    let backends = LocalBackends::connected();
    let key = seed(&backends, "fence-1700000000007", None);
    let dashboard = connected_dashboard(&backends).await;
    dashboard.open_detail(key.clone());
    backends.fhe.set_fail_decrypt(true);

    let err = dashboard.verify_selected().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::DecryptionVerificationFailure);

    let view = dashboard.view().await;
    let status = view.status.unwrap();
    assert_eq!(status.phase, StatusPhase::Error);
    assert!(status.message.starts_with("Location decryption failed: "));
    assert_eq!(view.detail.unwrap().state, VerificationState::Encrypted);
    assert!(!backends.ledger.record(&key).unwrap().is_verified);
}

#[tokio::test]
async fn verify_selected_needs_open_detail() {
    let backends = LocalBackends::connected();
    let dashboard = connected_dashboard(&backends).await;

    let err = dashboard.verify_selected().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidState);
}
