use serde::{Deserialize, Serialize};

use crate::model::{FenceForm, FenceRecord, LocationStats};
use crate::notifier::{StatusPhase, TransactionStatus};
use crate::verify::{DetailState, VerificationState};
use crate::format_time_ago;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsView {
    pub total_fences: usize,
    pub active_fences: usize,
    pub avg_radius: String,
    pub recent_activity: usize,
}

impl From<&LocationStats> for StatsView {
    fn from(stats: &LocationStats) -> Self {
        Self {
            total_fences: stats.total_fences,
            active_fences: stats.active_fences,
            avg_radius: format!("{:.1}m", stats.avg_radius),
            recent_activity: stats.recent_activity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FenceListItem {
    pub key: String,
    pub name: String,
    pub radius: u32,
    pub creator: String,
    pub created: String,
    pub status_label: String,
    pub verified_value: Option<i64>,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FenceDetailView {
    pub key: String,
    pub name: String,
    pub label: String,
    pub radius: u32,
    pub secondary_value: u32,
    pub creator: String,
    pub created: String,
    pub state: VerificationState,
    pub value_label: String,
    pub action_label: String,
    pub action_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormView {
    pub open: bool,
    pub name: String,
    pub radius: String,
    pub has_latitude: bool,
    pub has_longitude: bool,
    pub can_submit: bool,
    pub submit_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    pub phase: StatusPhase,
    pub message: String,
}

impl From<&TransactionStatus> for StatusView {
    fn from(status: &TransactionStatus) -> Self {
        Self {
            phase: status.phase,
            message: status.message.clone(),
        }
    }
}

/// Everything a shell needs to render one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewModel {
    pub connected: bool,
    pub account: Option<String>,
    pub contract_address: Option<String>,
    pub fhe_ready: bool,
    pub refreshing: bool,
    pub stats: StatsView,
    pub fences: Vec<FenceListItem>,
    pub detail: Option<FenceDetailView>,
    pub form: FormView,
    pub status: Option<StatusView>,
    pub history: Vec<String>,
}

/// `0x1234...abcd` style.
#[must_use]
pub fn short_address(address: &str) -> String {
    match (address.get(..6), address.get(38..)) {
        (Some(head), Some(tail)) => format!("{head}...{tail}"),
        _ => address.to_string(),
    }
}

pub(crate) fn list_item(fence: &FenceRecord, selected: bool, now_ms: u64) -> FenceListItem {
    FenceListItem {
        key: fence.location_handle.to_string(),
        name: fence.name.clone(),
        radius: fence.public_radius,
        creator: short_address(fence.creator.as_str()),
        created: format_time_ago(fence.created_at_secs.saturating_mul(1000), now_ms),
        status_label: if fence.is_verified {
            "Location Verified".into()
        } else {
            "Ready for Verification".into()
        },
        verified_value: fence.verified_value(),
        selected,
    }
}

pub(crate) fn detail_view(
    fence: &FenceRecord,
    detail: &DetailState,
    label: &str,
    verifying: bool,
    now_ms: u64,
) -> FenceDetailView {
    let state = VerificationState::of(fence, Some(detail));
    let value_label = match state {
        VerificationState::Verified(v) => format!("{v} (On-chain Verified)"),
        VerificationState::LocallyDecrypted(v) => format!("{v} (Locally Decrypted)"),
        VerificationState::Encrypted => "FHE Encrypted Integer".into(),
    };
    let confirmed = matches!(state, VerificationState::Verified(_));
    let action_label = if verifying {
        "Verifying..."
    } else {
        match state {
            VerificationState::Verified(_) => "Verified",
            VerificationState::LocallyDecrypted(_) => "Re-verify",
            VerificationState::Encrypted => "Verify Location",
        }
    };

    FenceDetailView {
        key: fence.location_handle.to_string(),
        name: fence.name.clone(),
        label: label.to_string(),
        radius: fence.public_radius,
        secondary_value: fence.public_secondary_value,
        creator: short_address(fence.creator.as_str()),
        created: format_time_ago(fence.created_at_secs.saturating_mul(1000), now_ms),
        state,
        value_label,
        action_label: action_label.into(),
        action_enabled: !verifying && !confirmed,
    }
}

pub(crate) fn form_view(form: &FenceForm, open: bool, creating: bool, fhe_ready: bool) -> FormView {
    FormView {
        open,
        name: form.name.clone(),
        radius: form.radius.clone(),
        has_latitude: !form.latitude.is_empty(),
        has_longitude: !form.longitude.is_empty(),
        can_submit: !creating && fhe_ready && form.has_required_fields(),
        submit_label: if creating {
            "Encrypting and Creating...".into()
        } else {
            "Create Geofence".into()
        },
    }
}
