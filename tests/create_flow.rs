use std::sync::atomic::Ordering;

use geofence_shared::capabilities::testing::LocalBackends;
use geofence_shared::model::FormField;
use geofence_shared::notifier::StatusPhase;
use geofence_shared::{Dashboard, DashboardConfig, ErrorKind};

fn dashboard(backends: &LocalBackends) -> Dashboard {
    Dashboard::new(backends.collaborators(), DashboardConfig::default()).unwrap()
}

fn fill_form(dashboard: &Dashboard, name: &str, latitude: &str, longitude: &str, radius: &str) {
    dashboard.set_form_field(FormField::Name, name);
    dashboard.set_form_field(FormField::Latitude, latitude);
    dashboard.set_form_field(FormField::Longitude, longitude);
    dashboard.set_form_field(FormField::Radius, radius);
}

#[tokio::test]
async fn create_round_trip() {
    let backends = LocalBackends::connected();
    let dashboard = dashboard(&backends);
    dashboard.session_changed().await.unwrap();

    // 1. Open the panel and fill in the form
    dashboard.open_create_panel();
    fill_form(&dashboard, "Home", "37", "-122", "50");
    let view = dashboard.view().await;
    assert!(view.form.open);
    assert!(view.form.can_submit);

    // 2. Submit
    let key = dashboard.submit_form().await.unwrap();
    assert!(key.as_str().starts_with("fence-"));
    assert_eq!(backends.fhe.calls.encryptions.load(Ordering::SeqCst), 1);

    // 3. Exactly one unverified record with the public radius
    let view = dashboard.view().await;
    assert_eq!(view.fences.len(), 1);
    assert_eq!(view.fences[0].name, "Home");
    assert_eq!(view.fences[0].radius, 50);
    assert_eq!(view.fences[0].status_label, "Ready for Verification");
    assert_eq!(view.stats.total_fences, 1);
    assert_eq!(view.stats.active_fences, 0);
    assert_eq!(view.stats.avg_radius, "50.0m");
    assert_eq!(view.stats.recent_activity, 1);

    // 4. Form reset and panel closed
    assert!(!view.form.open);
    assert!(view.form.name.is_empty());
    assert!(!view.form.has_latitude);

    let status = view.status.unwrap();
    assert_eq!(status.phase, StatusPhase::Success);
    assert_eq!(status.message, "Geofence created successfully!");
    assert!(view
        .history
        .iter()
        .any(|line| line.ends_with(": Created new encrypted geofence")));
}

#[tokio::test]
async fn empty_name_is_rejected_before_encryption() {
    let backends = LocalBackends::connected();
    let dashboard = dashboard(&backends);
    fill_form(&dashboard, "   ", "37", "", "50");

    let err = dashboard.submit_form().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(backends.fhe.calls.encryptions.load(Ordering::SeqCst), 0);
    assert_eq!(backends.ledger.calls.creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_latitude_is_rejected() {
    let backends = LocalBackends::connected();
    let dashboard = dashboard(&backends);

    // Keystroke sanitising strips letters, leaving nothing to parse
    fill_form(&dashboard, "Park", "abc", "", "50");
    let err = dashboard.submit_form().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(backends.fhe.calls.encryptions.load(Ordering::SeqCst), 0);
    assert_eq!(backends.ledger.record_count(), 0);
}

#[tokio::test]
async fn out_of_range_radius_is_rejected() {
    let backends = LocalBackends::connected();
    let dashboard = dashboard(&backends);
    fill_form(&dashboard, "Park", "10", "", "20000");

    let err = dashboard.submit_form().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(backends.ledger.record_count(), 0);
}

#[tokio::test]
async fn failed_submission_keeps_form() {
    let backends = LocalBackends::connected();
    backends.ledger.set_revert_creates(true);
    let dashboard = dashboard(&backends);
    dashboard.open_create_panel();
    fill_form(&dashboard, "Home", "37", "", "50");

    let err = dashboard.submit_form().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TransactionFailure);

    let view = dashboard.view().await;
    assert!(view.form.open);
    assert_eq!(view.form.name, "Home");
    assert!(view.fences.is_empty());
    let status = view.status.unwrap();
    assert_eq!(status.phase, StatusPhase::Error);
    assert!(status.message.starts_with("Submission failed: "));
}

#[tokio::test]
async fn disconnected_create_asks_for_wallet() {
    let backends = LocalBackends::disconnected();
    let dashboard = dashboard(&backends);
    fill_form(&dashboard, "Home", "37", "", "50");

    let err = dashboard.submit_form().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotConnected);
    assert_eq!(
        dashboard.view().await.status.unwrap().message,
        "Please connect wallet first"
    );
}
