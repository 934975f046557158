use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

// ========== USER ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Researcher,
    Observer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Researcher => "researcher",
            Role::Observer => "observer",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub picture: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Fields a user may change on a profile. `role` is honoured for admins only.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

// ========== FIELD ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Field {
    pub id: String,
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub rice_variety: String,
    #[serde(default)]
    pub tentative_date: String,
    #[serde(default)]
    pub coordinates: Location,
    #[serde(default)]
    pub area: f64, // hectares
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateFieldRequest {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub rice_variety: String,
    #[serde(default)]
    pub tentative_date: String,
    #[serde(default)]
    pub coordinates: Location,
    #[serde(default)]
    pub area: f64,
}

impl CreateFieldRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        require_non_empty("name", &self.name)?;
        require_non_empty("location", &self.location)
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct FieldPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rice_variety: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tentative_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
}

// ========== SUBMISSION ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GrowthStage {
    #[serde(rename = "Seedling")]
    Seedling,
    #[serde(rename = "Tillering")]
    Tillering,
    #[serde(rename = "Stem Elongation")]
    StemElongation,
    #[serde(rename = "Panicle Initiation")]
    PanicleInitiation,
    #[serde(rename = "Booting")]
    Booting,
    #[serde(rename = "Heading")]
    Heading,
    #[serde(rename = "Flowering")]
    Flowering,
    #[serde(rename = "Milk")]
    Milk,
    #[serde(rename = "Dough")]
    Dough,
    #[serde(rename = "Mature")]
    Mature,
}

impl GrowthStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrowthStage::Seedling => "Seedling",
            GrowthStage::Tillering => "Tillering",
            GrowthStage::StemElongation => "Stem Elongation",
            GrowthStage::PanicleInitiation => "Panicle Initiation",
            GrowthStage::Booting => "Booting",
            GrowthStage::Heading => "Heading",
            GrowthStage::Flowering => "Flowering",
            GrowthStage::Milk => "Milk",
            GrowthStage::Dough => "Dough",
            GrowthStage::Mature => "Mature",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Submitted,
    UnderReview,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::UnderReview => "under_review",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }

    /// submitted -> under_review -> approved | rejected. Rewriting the
    /// current status is a no-op and always allowed.
    pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        self == next
            || matches!(
                (self, next),
                (Submitted, UnderReview) | (UnderReview, Approved) | (UnderReview, Rejected)
            )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct TraitMeasurements {
    #[serde(default)]
    pub culm_length: f64,
    #[serde(default)]
    pub panicle_length: f64,
    #[serde(default)]
    pub panicles_per_hill: u32,
    #[serde(default)]
    pub hills_observed: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Submission {
    pub id: String,
    pub user_id: String,
    pub field_id: String,
    pub date: DateTime<Utc>,
    pub growth_stage: GrowthStage,
    #[serde(default)]
    pub plant_conditions: Vec<String>,
    #[serde(default)]
    pub trait_measurements: TraitMeasurements,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub observer_name: String,
    #[serde(default)]
    pub images: Vec<String>, // public URLs
    pub status: SubmissionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A submission as returned by a single read, with its field resolved.
/// `field` is `None` when the referenced field no longer exists.
#[derive(Debug, Serialize)]
pub struct SubmissionView {
    #[serde(flatten)]
    pub submission: Submission,
    pub field: Option<Field>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSubmissionRequest {
    pub field_id: String,
    pub date: DateTime<Utc>,
    pub growth_stage: GrowthStage,
    #[serde(default)]
    pub plant_conditions: Vec<String>,
    #[serde(default)]
    pub trait_measurements: TraitMeasurements,
    #[serde(default)]
    pub notes: String,
    pub observer_name: String,
    #[serde(default)]
    pub images: Vec<String>,
}

impl CreateSubmissionRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        require_non_empty("field_id", &self.field_id)?;
        require_non_empty("observer_name", &self.observer_name)
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct SubmissionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub growth_stage: Option<GrowthStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plant_conditions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trait_measurements: Option<TraitMeasurements>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubmissionStatus>,
}

// ========== AUTH ==========
#[derive(Debug, Deserialize)]
pub struct GoogleTokenRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

fn require_non_empty(name: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::InvalidRequest(format!("{} is required", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use SubmissionStatus::*;

        assert!(Submitted.can_transition_to(UnderReview));
        assert!(UnderReview.can_transition_to(Approved));
        assert!(UnderReview.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Approved));

        assert!(!Submitted.can_transition_to(Approved));
        assert!(!Rejected.can_transition_to(Submitted));
        assert!(!Approved.can_transition_to(UnderReview));
    }

    #[test]
    fn test_growth_stage_uses_display_names() {
        let stage: GrowthStage = serde_json::from_str("\"Panicle Initiation\"").unwrap();
        assert_eq!(stage, GrowthStage::PanicleInitiation);
        assert_eq!(serde_json::to_string(&GrowthStage::Seedling).unwrap(), "\"Seedling\"");
        assert_eq!(GrowthStage::StemElongation.as_str(), "Stem Elongation");
    }

    #[test]
    fn test_patch_ignores_protected_fields() {
        let patch: SubmissionPatch = serde_json::from_str(
            r#"{"id": "x", "user_id": "someone", "created_at": "2020-01-01T00:00:00Z", "notes": "dry"}"#,
        )
        .unwrap();

        let doc = serde_json::to_value(&patch).unwrap();
        assert_eq!(doc, serde_json::json!({"notes": "dry"}));
    }

    #[test]
    fn test_create_submission_requires_observer() {
        let req: CreateSubmissionRequest = serde_json::from_str(
            r#"{"field_id": "f1", "date": "2024-06-01T08:00:00Z", "growth_stage": "Seedling", "observer_name": "  "}"#,
        )
        .unwrap();

        let err = req.validate().unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }
}
