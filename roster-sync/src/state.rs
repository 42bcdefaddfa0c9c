use crate::types::{ExternalCourseMapping, InstanceId, RoleId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Why an identifier is not (or no longer) kept in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorReason {
    /// No local account carries the external identifier.
    #[serde(rename = "notfind")]
    NotFound,
    /// Previously synced, absent from the latest roster.
    #[serde(rename = "exit")]
    Exit
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("no local account, ask the student to sign in once"),
            Self::Exit => f.write_str("withdrawn from the course")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(rename = "user")]
    pub identifier: String,
    #[serde(rename = "error")]
    pub reason: ErrorReason,
    #[serde(rename = "roleid")]
    pub role: RoleId
}

impl ErrorEntry {
    pub fn not_found(identifier: impl Into<String>, role: RoleId) -> Self {
        Self {
            identifier: identifier.into(),
            reason: ErrorReason::NotFound,
            role
        }
    }

    pub fn exit(identifier: impl Into<String>, role: RoleId) -> Self {
        Self {
            identifier: identifier.into(),
            reason: ErrorReason::Exit,
            role
        }
    }
}

/// The JSON document stored in the snapshot `data` column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub success: BTreeSet<String>,
    #[serde(default, deserialize_with = "error_map")]
    pub error: BTreeMap<String, ErrorEntry>
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// Older snapshots encode an empty error map as `[]`.
fn error_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, ErrorEntry>, D::Error>
where
    D: Deserializer<'de>
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Map(BTreeMap<String, ErrorEntry>),
        List(Vec<ErrorEntry>)
    }

    Ok(match Option::<Repr>::deserialize(deserializer)? {
        Some(Repr::Map(map)) => map,
        Some(Repr::List(list)) => list
            .into_iter()
            .map(|entry| (entry.identifier.clone(), entry))
            .collect(),
        None => BTreeMap::new()
    })
}

/// The engine's persisted memory for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub instance_id: InstanceId,
    pub mapping: ExternalCourseMapping,
    pub success: BTreeSet<String>,
    pub errors: BTreeMap<String, ErrorEntry>,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>
}

impl SyncState {
    pub fn new(instance_id: InstanceId, mapping: ExternalCourseMapping, now: DateTime<Utc>) -> Self {
        Self {
            instance_id,
            mapping,
            success: BTreeSet::new(),
            errors: BTreeMap::new(),
            created: now,
            last_modified: now
        }
    }

    pub fn data(&self) -> SnapshotData {
        SnapshotData {
            success: self.success.clone(),
            error: self.errors.clone()
        }
    }

    pub fn with_data(mut self, data: SnapshotData) -> Self {
        self.success = data.success;
        self.errors = data.error;
        self
    }

    pub fn error_for(&self, identifier: &str) -> Option<ErrorReason> {
        self.errors.get(identifier).map(|e| e.reason)
    }

    /// Rows of the operator-facing exceptions list.
    pub fn exceptions(&self) -> Vec<ExceptionRow> {
        self.errors
            .values()
            .map(|entry| ExceptionRow {
                identifier: entry.identifier.clone(),
                organisational_unit: self.mapping.college_name.clone(),
                role: entry.role,
                reason: entry.reason
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRow {
    pub identifier: String,
    pub organisational_unit: String,
    pub role: RoleId,
    pub reason: ErrorReason
}
