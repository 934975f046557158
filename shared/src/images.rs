use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::policy::{self, Action, Resource};
use crate::store::{self, Collection, ListEdit, StoreError};
use crate::types::{Submission, User};
use crate::AppState;

/// Prefix of submission ids used by clients that upload before the
/// submission exists. Such uploads are stored but not attached.
pub const TEMP_PREFIX: &str = "temp_";

const ALLOWED_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".webp"];

/// Tries at removing a URL from a submission that keeps changing underneath
const DETACH_ATTEMPTS: usize = 3;

/// A decoded `multipart/form-data` upload
#[derive(Debug)]
pub struct ImageUpload {
    pub submission_id: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct UploadedImage {
    pub filename: String,
    pub url: String,
}

/// Read the `submission_id` and `image` parts of a multipart body.
pub async fn parse_upload(content_type: &str, body: Vec<u8>) -> Result<ImageUpload, ApiError> {
    let boundary = multer::parse_boundary(content_type).map_err(|_| {
        ApiError::InvalidRequest("Expected a multipart/form-data body".to_string())
    })?;
    let stream = futures::stream::once(async move { Ok::<Vec<u8>, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut submission_id = None;
    let mut image = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("submission_id") => {
                submission_id = Some(field.text().await.map_err(multipart_error)?);
            }
            Some("image") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                image = Some((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let submission_id = submission_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("submission_id is required".to_string()))?;
    let (file_name, bytes) =
        image.ok_or_else(|| ApiError::InvalidRequest("No image file provided".to_string()))?;

    Ok(ImageUpload {
        submission_id,
        file_name,
        bytes,
    })
}

/// Lower-cased extension, with its dot, if it is an accepted image type
pub fn image_extension(file_name: &str) -> Result<String, ApiError> {
    let ext = file_name
        .rfind('.')
        .map(|i| file_name[i..].to_ascii_lowercase())
        .unwrap_or_default();

    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(ApiError::InvalidFileType(
            "Only JPG, JPEG, PNG, and WebP files are allowed".to_string(),
        ))
    }
}

/// `{submission_id}/{uuid}_{YYYYMMDD_HHMMSS}{ext}`
pub fn image_key(submission_id: &str, ext: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}/{}_{}{}",
        submission_id,
        uuid::Uuid::new_v4(),
        now.format("%Y%m%d_%H%M%S"),
        ext
    )
}

fn content_type(ext: &str) -> &'static str {
    match ext {
        ".png" => "image/png",
        ".webp" => "image/webp",
        _ => "image/jpeg",
    }
}

pub async fn upload_image(
    state: &AppState,
    principal: &User,
    upload: ImageUpload,
) -> Result<UploadedImage, ApiError> {
    let ext = image_extension(&upload.file_name)?;
    if upload.submission_id.contains('/') {
        return Err(ApiError::InvalidRequest("Invalid submission_id".to_string()));
    }

    let attach = !upload.submission_id.starts_with(TEMP_PREFIX);
    if attach {
        let submission = find_submission(state, &upload.submission_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Submission not found".to_string()))?;
        policy::authorize(principal, Resource::Image, Action::Write, &submission.user_id)?;
    }

    let now = Utc::now();
    let key = image_key(&upload.submission_id, &ext, now);
    let url = state
        .blobs
        .put(&key, upload.bytes, content_type(&ext))
        .await?;

    if attach {
        let appended = state
            .store
            .edit_list(
                Collection::Submissions,
                &upload.submission_id,
                "images",
                ListEdit::Append(Value::String(url.clone())),
                now,
            )
            .await;
        if let Err(e) = appended {
            // the submission went away after the access check
            if let Err(cleanup) = state.blobs.delete(&key).await {
                tracing::warn!("Failed to remove orphaned image {}: {}", key, cleanup);
            }
            return Err(e.into());
        }
    }

    tracing::info!("Image {} uploaded by {}", key, principal.id);
    Ok(UploadedImage { filename: key, url })
}

/// Public URL of a stored image
pub fn image_url(state: &AppState, key: &str) -> String {
    state.blobs.public_url(key)
}

/// Remove the blob and, when it belongs to a submission, its URL from the
/// submission's image list.
pub async fn delete_image(state: &AppState, principal: &User, key: &str) -> Result<(), ApiError> {
    let submission_id = match key.split_once('/') {
        Some((id, name)) if !id.is_empty() && !name.is_empty() => id,
        _ => return Err(ApiError::InvalidRequest("Invalid image key".to_string())),
    };

    let submission = if submission_id.starts_with(TEMP_PREFIX) {
        None
    } else {
        find_submission(state, submission_id).await?
    };
    match &submission {
        Some(s) => policy::authorize(principal, Resource::Image, Action::Delete, &s.user_id)?,
        None => policy::require_admin(principal)?,
    }

    // Detach first so a failure never leaves a URL to a deleted object
    if let Some(submission) = submission {
        let url = state.blobs.public_url(key);
        if submission.images.contains(&url) {
            detach(state, &submission.id, url).await?;
        }
    }

    state.blobs.delete(key).await?;

    tracing::info!("Image {} deleted by {}", key, principal.id);
    Ok(())
}

async fn detach(state: &AppState, submission_id: &str, url: String) -> Result<(), ApiError> {
    let mut attempt = 1;
    loop {
        let removed = state
            .store
            .edit_list(
                Collection::Submissions,
                submission_id,
                "images",
                ListEdit::Remove(Value::String(url.clone())),
                Utc::now(),
            )
            .await;
        match removed {
            Err(StoreError::Conflict) if attempt < DETACH_ATTEMPTS => {
                tracing::warn!(
                    "Submission {} changed while removing an image, retrying",
                    submission_id
                );
                attempt += 1;
            }
            result => return result.map(|_| ()).map_err(ApiError::from),
        }
    }
}

async fn find_submission(state: &AppState, id: &str) -> Result<Option<Submission>, ApiError> {
    Ok(store::load(state.store.as_ref(), Collection::Submissions, id).await?)
}

fn multipart_error(err: multer::Error) -> ApiError {
    ApiError::InvalidRequest(format!("Invalid multipart body: {}", err))
}
