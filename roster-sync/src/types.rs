//! Domain records shared by the fetcher, the engine and the stores.

use crate::error::{RosterSyncError, RosterSyncResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type InstanceId = i64;
pub type CourseId = i64;
pub type AccountId = i64;
pub type RoleId = i64;
pub type GroupId = i64;
pub type CohortId = i64;

/// Role assigned to roster members when neither the upstream nor the
/// instance says otherwise (the host's student archetype).
pub const DEFAULT_STUDENT_ROLE: RoleId = 5;

const SELECTION_KEY_SEPARATOR: char = '~';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WelcomeMessagePolicy {
    #[default]
    Disabled,
    FromCourseContact,
    FromKeyHolder,
    FromNoReply
}

impl WelcomeMessagePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::FromCourseContact => "from_course_contact",
            Self::FromKeyHolder => "from_key_holder",
            Self::FromNoReply => "from_no_reply"
        }
    }

    /// Unknown values fall back to `Disabled`.
    pub fn parse(value: &str) -> Self {
        match value {
            "from_course_contact" => Self::FromCourseContact,
            "from_key_holder" => Self::FromKeyHolder,
            "from_no_reply" => Self::FromNoReply,
            _ => Self::Disabled
        }
    }
}

/// Where synced accounts are placed inside the course, chosen when the
/// instance is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum GroupTarget {
    #[default]
    None,
    Existing(GroupId),
    /// Create a group named after the external course.
    CreateNew
}

/// One configured sync target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationInstance {
    pub id: InstanceId,
    pub course_id: CourseId,
    pub name: String,
    pub enabled: bool,
    pub default_role: RoleId,
    pub group_id: Option<GroupId>,
    pub enrol_period_seconds: Option<i64>,
    pub max_enrolled: Option<u32>,
    pub cohort_id: Option<CohortId>,
    pub new_enrolments_allowed: bool,
    pub welcome_message: WelcomeMessagePolicy
}

impl ReconciliationInstance {
    /// Validity window for a membership activated at `now`. A missing or
    /// non-positive enrolment period means the membership never ends.
    pub fn validity_window(&self, now: DateTime<Utc>) -> ValidityWindow {
        let end = self
            .enrol_period_seconds
            .filter(|secs| *secs > 0)
            .map(|secs| now + Duration::seconds(secs));
        ValidityWindow { start: now, end }
    }
}

/// Instance settings as submitted by an administrator, before an id exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInstance {
    pub course_id: CourseId,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_role")]
    pub default_role: RoleId,
    #[serde(default)]
    pub group: GroupTarget,
    #[serde(default)]
    pub enrol_period_seconds: Option<i64>,
    #[serde(default)]
    pub max_enrolled: Option<u32>,
    #[serde(default)]
    pub cohort_id: Option<CohortId>,
    #[serde(default = "default_true")]
    pub new_enrolments_allowed: bool,
    #[serde(default)]
    pub welcome_message: WelcomeMessagePolicy
}

impl NewInstance {
    pub fn for_course(course_id: CourseId, name: impl Into<String>) -> Self {
        Self {
            course_id,
            name: name.into(),
            enabled: true,
            default_role: DEFAULT_STUDENT_ROLE,
            group: GroupTarget::None,
            enrol_period_seconds: None,
            max_enrolled: None,
            cohort_id: None,
            new_enrolments_allowed: true,
            welcome_message: WelcomeMessagePolicy::Disabled
        }
    }

    pub fn into_instance(self, id: InstanceId, group_id: Option<GroupId>) -> ReconciliationInstance {
        ReconciliationInstance {
            id,
            course_id: self.course_id,
            name: self.name,
            enabled: self.enabled,
            default_role: self.default_role,
            group_id,
            enrol_period_seconds: self.enrol_period_seconds,
            max_enrolled: self.max_enrolled,
            cohort_id: self.cohort_id,
            new_enrolments_allowed: self.new_enrolments_allowed,
            welcome_message: self.welcome_message
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_role() -> RoleId {
    DEFAULT_STUDENT_ROLE
}

/// Identifies the external roster that feeds an instance. Immutable once the
/// instance exists; capacity and name drift upstream is informational only.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExternalCourseMapping {
    pub term: String,
    pub external_course_id: String,
    pub college_name: String,
    pub course_name: String,
    pub student_capacity: u32
}

impl ExternalCourseMapping {
    /// Stable `term~idnumber~category~shortname~stunum` key used by the
    /// course picker.
    pub fn selection_key(&self) -> String {
        let sep = SELECTION_KEY_SEPARATOR;
        format!(
            "{}{sep}{}{sep}{}{sep}{}{sep}{}",
            self.term,
            self.external_course_id,
            self.college_name,
            self.course_name,
            self.student_capacity
        )
    }

    pub fn label(&self) -> String {
        format!(
            "{}-{}-{}",
            self.college_name, self.course_name, self.student_capacity
        )
    }

    pub fn from_selection_key(key: &str) -> RosterSyncResult<Self> {
        let parts: Vec<&str> = key.split(SELECTION_KEY_SEPARATOR).collect();
        let [term, course_id, college, course_name, capacity] = parts.as_slice() else {
            return Err(RosterSyncError::InvalidSelectionKey(key.to_string()));
        };

        if course_id.is_empty() {
            return Err(RosterSyncError::InvalidSelectionKey(key.to_string()));
        }

        let student_capacity = capacity
            .parse::<u32>()
            .map_err(|_| RosterSyncError::InvalidSelectionKey(key.to_string()))?;

        Ok(Self {
            term: (*term).to_string(),
            external_course_id: (*course_id).to_string(),
            college_name: (*college).to_string(),
            course_name: (*course_name).to_string(),
            student_capacity
        })
    }
}

/// One entry of the external roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalMember {
    pub identifier: String,
    /// `None` means the instance default role.
    pub role: Option<RoleId>
}

impl ExternalMember {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            role: None
        }
    }

    pub fn with_role(identifier: impl Into<String>, role: RoleId) -> Self {
        Self {
            identifier: identifier.into(),
            role: Some(role)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Suspended
}

impl MembershipStatus {
    /// Numeric encoding used by the host enrolment table.
    pub fn as_i16(self) -> i16 {
        match self {
            Self::Active => 0,
            Self::Suspended => 1
        }
    }

    pub fn from_i16(value: i16) -> Self {
        if value == 0 {
            Self::Active
        } else {
            Self::Suspended
        }
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Suspended => f.write_str("suspended")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>
}

/// Host-side membership of one account in one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub instance_id: InstanceId,
    pub account_id: AccountId,
    pub status: MembershipStatus,
    pub role: RoleId,
    pub window: ValidityWindow
}

impl MembershipRecord {
    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> ExternalCourseMapping {
        ExternalCourseMapping {
            term: "2026".to_string(),
            external_course_id: "CS101-02".to_string(),
            college_name: "Computer Science".to_string(),
            course_name: "Data Structures".to_string(),
            student_capacity: 120
        }
    }

    #[test]
    fn test_selection_key_layout() {
        let m = mapping();
        assert_eq!(
            m.selection_key(),
            "2026~CS101-02~Computer Science~Data Structures~120"
        );
        assert_eq!(m.label(), "Computer Science-Data Structures-120");
        assert_eq!(
            ExternalCourseMapping::from_selection_key(&m.selection_key()).unwrap(),
            m
        );
    }

    #[test]
    fn test_selection_key_rejects_malformed() {
        for key in [
            "",
            "2026~CS101",
            "2026~CS101~college~course~many",
            "2026~~college~course~10",
            "2026~a~b~c~10~extra"
        ] {
            assert!(
                ExternalCourseMapping::from_selection_key(key).is_err(),
                "accepted {key:?}"
            );
        }
    }

    #[test]
    fn test_validity_window() {
        let now = Utc::now();
        let mut instance = NewInstance::for_course(7, "jw").into_instance(1, None);
        assert_eq!(instance.validity_window(now).end, None);

        instance.enrol_period_seconds = Some(86400);
        let window = instance.validity_window(now);
        assert_eq!(window.start, now);
        assert_eq!(window.end, Some(now + Duration::days(1)));

        instance.enrol_period_seconds = Some(0);
        assert_eq!(instance.validity_window(now).end, None);
    }

    #[test]
    fn test_group_target_serialization() {
        let json = serde_json::to_string(&GroupTarget::Existing(9)).unwrap();
        assert_eq!(json, r#"{"type":"existing","id":9}"#);
        let parsed: GroupTarget = serde_json::from_str(r#"{"type":"create_new"}"#).unwrap();
        assert_eq!(parsed, GroupTarget::CreateNew);
    }

    #[test]
    fn test_membership_status_encoding() {
        assert_eq!(MembershipStatus::Active.as_i16(), 0);
        assert_eq!(MembershipStatus::from_i16(1), MembershipStatus::Suspended);
        assert_eq!(MembershipStatus::Suspended.to_string(), "suspended");
    }
}
