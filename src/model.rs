use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use crate::capabilities::LedgerRecord;
use crate::config::DashboardConfig;
use crate::{AppError, ErrorKind, RECORD_KEY_PREFIX};

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(RecordKey);
typed_id!(AccountAddress);
typed_id!(ContractAddress);
typed_id!(CiphertextHandle);
typed_id!(TxHash);

impl RecordKey {
    /// Ledger key for a record created at `now_ms`.
    #[must_use]
    pub fn generate(now_ms: u64) -> Self {
        Self(format!("{RECORD_KEY_PREFIX}{now_ms}"))
    }

    #[must_use]
    pub fn numeric_suffix(&self) -> Option<u64> {
        self.0
            .strip_prefix(RECORD_KEY_PREFIX)
            .unwrap_or(&self.0)
            .parse()
            .ok()
    }
}

/// Display id. Falls back to load time when the key carries no number,
/// so two such records loaded in the same millisecond collide.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FenceId(pub u64);

impl FenceId {
    #[must_use]
    pub fn derive(key: &RecordKey, fallback_ms: u64) -> Self {
        Self(key.numeric_suffix().filter(|n| *n != 0).unwrap_or(fallback_ms))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FenceRecord {
    pub id: FenceId,
    pub name: String,
    /// Ledger key; also the lookup key for the encrypted coordinate and radius.
    pub location_handle: RecordKey,
    pub created_at_secs: u64,
    pub creator: AccountAddress,
    pub public_radius: u32,
    pub public_secondary_value: u32,
    pub is_verified: bool,
    verified_value: Option<i64>,
}

impl FenceRecord {
    #[must_use]
    pub fn from_ledger(key: RecordKey, record: &LedgerRecord, now_ms: u64) -> Self {
        Self {
            id: FenceId::derive(&key, now_ms),
            name: record.name.clone(),
            location_handle: key,
            created_at_secs: record.timestamp_secs,
            creator: record.creator.clone(),
            public_radius: record.public_value1,
            public_secondary_value: record.public_value2,
            is_verified: record.is_verified,
            verified_value: record.is_verified.then_some(record.decrypted_value),
        }
    }

    /// Present iff the record is verified on-chain.
    #[must_use]
    pub const fn verified_value(&self) -> Option<i64> {
        if self.is_verified {
            self.verified_value
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_recent(&self, now_secs: u64, window_secs: u64) -> bool {
        now_secs.saturating_sub(self.created_at_secs) < window_secs
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationStats {
    pub total_fences: usize,
    pub active_fences: usize,
    pub avg_radius: f64,
    pub recent_activity: usize,
}

impl LocationStats {
    #[must_use]
    pub fn compute(fences: &[FenceRecord], now_secs: u64, window_secs: u64) -> Self {
        let total_fences = fences.len();
        let active_fences = fences.iter().filter(|f| f.is_verified).count();

        #[allow(clippy::cast_precision_loss)]
        let avg_radius = if total_fences == 0 {
            0.0
        } else {
            let sum: u64 = fences.iter().map(|f| u64::from(f.public_radius)).sum();
            sum as f64 / total_fences as f64
        };

        let recent_activity = fences
            .iter()
            .filter(|f| f.is_recent(now_secs, window_secs))
            .count();

        Self {
            total_fences,
            active_fences,
            avg_radius,
            recent_activity,
        }
    }
}

// --- Create form ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormField {
    Name,
    Latitude,
    Longitude,
    Radius,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Fence name is required")]
    MissingName,
    #[error("{field} is required")]
    Missing { field: &'static str },
    #[error("{field} must be a whole number")]
    NotAnInteger { field: &'static str },
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
    },
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

/// Raw form input as typed by the user.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FenceForm {
    pub name: String,
    pub latitude: String,
    pub longitude: String,
    pub radius: String,
}

// Coordinates are the confidential part of a fence.
impl fmt::Debug for FenceForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FenceForm")
            .field("name", &self.name)
            .field("latitude_present", &!self.latitude.is_empty())
            .field("longitude_present", &!self.longitude.is_empty())
            .field("radius", &self.radius)
            .finish()
    }
}

impl FenceForm {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        latitude: impl Into<String>,
        longitude: impl Into<String>,
        radius: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            latitude: latitude.into(),
            longitude: longitude.into(),
            radius: radius.into(),
        }
    }

    /// Applies one keystroke-level edit. Latitude keeps only digits and `-`.
    pub fn set_field(&mut self, field: FormField, value: &str) {
        match field {
            FormField::Name => self.name = value.to_string(),
            FormField::Latitude => {
                self.latitude.zeroize();
                self.latitude = sanitize_integer_input(value);
            }
            FormField::Longitude => {
                self.longitude.zeroize();
                self.longitude = value.to_string();
            }
            FormField::Radius => self.radius = value.to_string(),
        }
    }

    /// Mirrors the submit button gate: required fields present.
    #[must_use]
    pub fn has_required_fields(&self) -> bool {
        !self.name.trim().is_empty()
            && !self.latitude.trim().is_empty()
            && !self.radius.trim().is_empty()
    }

    pub fn reset(&mut self) {
        self.latitude.zeroize();
        self.longitude.zeroize();
        *self = Self::default();
    }

    pub fn validate(&self, config: &DashboardConfig) -> Result<ValidatedFence, ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingName);
        }

        let latitude = parse_bounded(
            "Latitude",
            &self.latitude,
            config.latitude_bounds.0,
            config.latitude_bounds.1,
        )?;

        let longitude = if self.longitude.trim().is_empty() {
            None
        } else {
            Some(parse_bounded(
                "Longitude",
                &self.longitude,
                config.longitude_bounds.0,
                config.longitude_bounds.1,
            )?)
        };

        let radius = parse_bounded(
            "Radius",
            &self.radius,
            i64::from(config.min_radius),
            i64::from(config.max_radius),
        )?;

        Ok(ValidatedFence {
            name: name.to_string(),
            latitude: Zeroizing::new(latitude),
            longitude: longitude.map(Zeroizing::new),
            radius: u32::try_from(radius).map_err(|_| ValidationError::OutOfRange {
                field: "Radius",
                min: i64::from(config.min_radius),
                max: i64::from(config.max_radius),
            })?,
        })
    }
}

fn parse_bounded(
    field: &'static str,
    raw: &str,
    min: i64,
    max: i64,
) -> Result<i64, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Missing { field });
    }
    let value: i64 = trimmed
        .parse()
        .map_err(|_| ValidationError::NotAnInteger { field })?;
    if !(min..=max).contains(&value) {
        return Err(ValidationError::OutOfRange { field, min, max });
    }
    Ok(value)
}

#[must_use]
pub fn sanitize_integer_input(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-')
        .collect()
}

/// Form contents after validation. Plaintext coordinates are wiped on drop.
pub struct ValidatedFence {
    pub name: String,
    pub latitude: Zeroizing<i64>,
    /// Validated but never submitted; the ledger stores one encrypted coordinate.
    pub longitude: Option<Zeroizing<i64>>,
    pub radius: u32,
}

impl fmt::Debug for ValidatedFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedFence")
            .field("name", &self.name)
            .field("radius", &self.radius)
            .finish_non_exhaustive()
    }
}
