use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;

use crate::error::ApiError;
use crate::policy::{self, Action, Resource};
use crate::store::{self, Collection, Filter};
use crate::types::{
    CreateSubmissionRequest, Field, Submission, SubmissionPatch, SubmissionStatus,
    SubmissionView, User,
};
use crate::AppState;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

const CSV_HEADER: [&str; 6] = ["ID", "Date", "Location", "Growth Stage", "Observer", "Status"];

/// Query parameters of the submission list
#[derive(Debug, Default, Clone)]
pub struct ListQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub status: Option<String>,
    pub field_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionPage {
    pub submissions: Vec<Submission>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
}

/// Every submission the caller may see that matches `filter`, newest first.
pub async fn accessible(
    state: &AppState,
    principal: &User,
    filter: Filter,
) -> Result<Vec<Submission>, ApiError> {
    let filter = match policy::list_scope(principal, None)? {
        Some(owner) => filter.eq("user_id", owner),
        None => filter,
    };
    query(state, &filter).await
}

pub async fn list_submissions(
    state: &AppState,
    principal: &User,
    params: ListQuery,
) -> Result<SubmissionPage, ApiError> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let mut filter = match policy::list_scope(principal, params.user_id.as_deref())? {
        Some(owner) => Filter::new().eq("user_id", owner),
        None => Filter::new(),
    };
    if let Some(status) = params.status.as_deref().filter(|s| !s.is_empty()) {
        filter = filter.eq("status", parse_status(status)?.as_str());
    }
    if let Some(field_id) = params.field_id.filter(|f| !f.is_empty()) {
        filter = filter.eq("field_id", field_id);
    }

    let all = query(state, &filter).await?;
    let total = all.len();
    let submissions = all
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .collect();

    Ok(SubmissionPage {
        submissions,
        page,
        limit,
        total,
    })
}

pub async fn create_submission(
    state: &AppState,
    principal: &User,
    request: CreateSubmissionRequest,
) -> Result<Submission, ApiError> {
    request.validate()?;
    require_field(state, &request.field_id).await?;

    let now = Utc::now();
    let submission = Submission {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: principal.id.clone(),
        field_id: request.field_id,
        date: request.date,
        growth_stage: request.growth_stage,
        plant_conditions: request.plant_conditions,
        trait_measurements: request.trait_measurements,
        notes: request.notes,
        observer_name: request.observer_name,
        images: request.images,
        status: SubmissionStatus::Submitted,
        created_at: now,
        updated_at: now,
    };

    store::save(
        state.store.as_ref(),
        Collection::Submissions,
        &submission.id,
        &submission,
    )
    .await?;
    tracing::info!("Submission {} created by {}", submission.id, principal.id);
    Ok(submission)
}

/// A single submission with its field resolved
pub async fn get_submission(
    state: &AppState,
    principal: &User,
    id: &str,
) -> Result<SubmissionView, ApiError> {
    let submission = find(state, id).await?;
    policy::authorize(principal, Resource::Submission, Action::Read, &submission.user_id)?;

    let field: Option<Field> =
        store::load(state.store.as_ref(), Collection::Fields, &submission.field_id).await?;
    if field.is_none() {
        tracing::warn!(
            "Submission {} references missing field {}",
            submission.id,
            submission.field_id
        );
    }

    Ok(SubmissionView { submission, field })
}

pub async fn update_submission(
    state: &AppState,
    principal: &User,
    id: &str,
    patch: SubmissionPatch,
) -> Result<Submission, ApiError> {
    let current = find(state, id).await?;
    policy::authorize(principal, Resource::Submission, Action::Write, &current.user_id)?;

    if let Some(next) = patch.status {
        if next != current.status {
            if !principal.is_admin() {
                return Err(ApiError::Forbidden(
                    "Only admins can change submission status".to_string(),
                ));
            }
            if !current.status.can_transition_to(next) {
                return Err(ApiError::InvalidRequest(format!(
                    "Cannot change status from {} to {}",
                    current.status.as_str(),
                    next.as_str()
                )));
            }
        }
    }
    if let Some(field_id) = patch.field_id.as_deref() {
        require_field(state, field_id).await?;
    }

    let mut fields = store::to_document(&patch)?;
    fields.insert("updated_at".to_string(), serde_json::to_value(Utc::now())?);
    state.store.update(Collection::Submissions, id, fields).await?;

    tracing::info!("Submission {} updated by {}", id, principal.id);
    find(state, id).await
}

pub async fn delete_submission(
    state: &AppState,
    principal: &User,
    id: &str,
) -> Result<(), ApiError> {
    let submission = find(state, id).await?;
    policy::authorize(principal, Resource::Submission, Action::Delete, &submission.user_id)?;

    state.store.delete(Collection::Submissions, id).await?;
    tracing::info!("Submission {} deleted by {}", id, principal.id);
    Ok(())
}

/// Accessible submissions as CSV, newest first
pub async fn export_csv(state: &AppState, principal: &User) -> Result<String, ApiError> {
    let submissions = accessible(state, principal, Filter::new()).await?;

    // field id -> location, None when the field is gone
    let mut locations: HashMap<String, Option<String>> = HashMap::new();
    for submission in &submissions {
        if !locations.contains_key(&submission.field_id) {
            let field: Option<Field> =
                store::load(state.store.as_ref(), Collection::Fields, &submission.field_id)
                    .await?;
            locations.insert(submission.field_id.clone(), field.map(|f| f.location));
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER).map_err(csv_error)?;
    for s in &submissions {
        let location = locations
            .get(&s.field_id)
            .and_then(|l| l.as_deref())
            .unwrap_or("");
        let date = s.date.format("%Y-%m-%d").to_string();
        writer
            .write_record([
                s.id.as_str(),
                date.as_str(),
                location,
                s.growth_stage.as_str(),
                s.observer_name.as_str(),
                s.status.as_str(),
            ])
            .map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| csv_error(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| ApiError::Internal(format!("Invalid CSV output: {}", e)))
}

async fn query(state: &AppState, filter: &Filter) -> Result<Vec<Submission>, ApiError> {
    let mut submissions: Vec<Submission> =
        store::load_all(state.store.as_ref(), Collection::Submissions, filter).await?;
    submissions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(submissions)
}

async fn find(state: &AppState, id: &str) -> Result<Submission, ApiError> {
    store::load(state.store.as_ref(), Collection::Submissions, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Submission not found".to_string()))
}

async fn require_field(state: &AppState, field_id: &str) -> Result<(), ApiError> {
    let field: Option<Field> = store::load(state.store.as_ref(), Collection::Fields, field_id).await?;
    match field {
        Some(_) => Ok(()),
        None => Err(ApiError::InvalidRequest(format!(
            "Field {} does not exist",
            field_id
        ))),
    }
}

fn parse_status(status: &str) -> Result<SubmissionStatus, ApiError> {
    serde_json::from_value(serde_json::Value::String(status.to_string()))
        .map_err(|_| ApiError::InvalidRequest(format!("Unknown status {}", status)))
}

fn csv_error(err: impl std::fmt::Display) -> ApiError {
    tracing::error!("CSV export failed: {}", err);
    ApiError::Internal("Failed to export submissions".to_string())
}
