use chrono::Utc;

use crate::error::ApiError;
use crate::policy::{self, Action, Resource};
use crate::store::{self, Collection, Filter};
use crate::types::{CreateFieldRequest, Field, FieldPatch, User};
use crate::AppState;

/// Fields visible to the caller, newest first. `owner_id` narrows the list
/// for admins; others may only name themselves.
pub async fn list_fields(
    state: &AppState,
    principal: &User,
    owner_id: Option<&str>,
) -> Result<Vec<Field>, ApiError> {
    let filter = match policy::list_scope(principal, owner_id)? {
        Some(owner) => Filter::new().eq("owner_id", owner),
        None => Filter::new(),
    };

    let mut fields: Vec<Field> =
        store::load_all(state.store.as_ref(), Collection::Fields, &filter).await?;
    fields.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(fields)
}

pub async fn create_field(
    state: &AppState,
    principal: &User,
    request: CreateFieldRequest,
) -> Result<Field, ApiError> {
    request.validate()?;

    let now = Utc::now();
    let field = Field {
        id: uuid::Uuid::new_v4().to_string(),
        name: request.name,
        location: request.location,
        rice_variety: request.rice_variety,
        tentative_date: request.tentative_date,
        coordinates: request.coordinates,
        area: request.area,
        owner_id: principal.id.clone(),
        created_at: now,
        updated_at: now,
    };

    store::save(state.store.as_ref(), Collection::Fields, &field.id, &field).await?;
    tracing::info!("Field {} created by {}", field.id, principal.id);
    Ok(field)
}

pub async fn get_field(state: &AppState, principal: &User, id: &str) -> Result<Field, ApiError> {
    let field = find(state, id).await?;
    policy::authorize(principal, Resource::Field, Action::Read, &field.owner_id)?;
    Ok(field)
}

pub async fn update_field(
    state: &AppState,
    principal: &User,
    id: &str,
    patch: FieldPatch,
) -> Result<Field, ApiError> {
    let field = find(state, id).await?;
    policy::authorize(principal, Resource::Field, Action::Write, &field.owner_id)?;

    let mut fields = store::to_document(&patch)?;
    fields.insert("updated_at".to_string(), serde_json::to_value(Utc::now())?);
    state.store.update(Collection::Fields, id, fields).await?;

    find(state, id).await
}

pub async fn delete_field(state: &AppState, principal: &User, id: &str) -> Result<(), ApiError> {
    let field = find(state, id).await?;
    policy::authorize(principal, Resource::Field, Action::Delete, &field.owner_id)?;

    state.store.delete(Collection::Fields, id).await?;
    tracing::info!("Field {} deleted by {}", id, principal.id);
    Ok(())
}

async fn find(state: &AppState, id: &str) -> Result<Field, ApiError> {
    store::load(state.store.as_ref(), Collection::Fields, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Field not found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use crate::types::{Location, Role};

    fn plot(name: &str) -> CreateFieldRequest {
        CreateFieldRequest {
            name: name.to_string(),
            location: "North paddy".to_string(),
            rice_variety: "IR64".to_string(),
            tentative_date: "2024-06-01".to_string(),
            coordinates: Location {
                latitude: 14.1,
                longitude: 121.2,
            },
            area: 1.5,
        }
    }

    #[tokio::test]
    async fn test_created_fields_are_unique_and_readable() {
        let state = testing::state();
        let me = testing::user(&state, "u1", Role::Observer).await;

        let a = create_field(&state, &me, plot("Plot 1")).await.unwrap();
        let b = create_field(&state, &me, plot("Plot 2")).await.unwrap();
        assert_ne!(a.id, b.id);

        let read = get_field(&state, &me, &a.id).await.unwrap();
        assert_eq!(read, a);
        assert_eq!(read.owner_id, "u1");
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let state = testing::state();
        let me = testing::user(&state, "u1", Role::Observer).await;

        let err = create_field(&state, &me, plot("")).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    #[tokio::test]
    async fn test_update_keeps_protected_fields() {
        let state = testing::state();
        let me = testing::user(&state, "u1", Role::Observer).await;
        let field = create_field(&state, &me, plot("Plot 1")).await.unwrap();

        let patch: FieldPatch = serde_json::from_str(
            r#"{"name": "Plot 1b", "owner_id": "u2", "id": "other", "created_at": "2001-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let updated = update_field(&state, &me, &field.id, patch).await.unwrap();

        assert_eq!(updated.id, field.id);
        assert_eq!(updated.name, "Plot 1b");
        assert_eq!(updated.owner_id, "u1");
        assert_eq!(updated.created_at, field.created_at);
        assert_eq!(updated.location, field.location);
    }

    #[tokio::test]
    async fn test_ownership() {
        let state = testing::state();
        let owner = testing::user(&state, "u1", Role::Observer).await;
        let other = testing::user(&state, "u2", Role::Researcher).await;
        let admin = testing::user(&state, "root", Role::Admin).await;
        let field = create_field(&state, &owner, plot("Plot 1")).await.unwrap();

        assert_eq!(
            get_field(&state, &other, &field.id).await.unwrap_err().kind(),
            "forbidden"
        );
        assert_eq!(
            update_field(&state, &other, &field.id, FieldPatch::default())
                .await
                .unwrap_err()
                .kind(),
            "forbidden"
        );
        assert_eq!(
            delete_field(&state, &other, &field.id).await.unwrap_err().kind(),
            "forbidden"
        );
        assert_eq!(
            list_fields(&state, &other, Some("u1")).await.unwrap_err().kind(),
            "forbidden"
        );
        assert!(list_fields(&state, &other, None).await.unwrap().is_empty());

        assert_eq!(list_fields(&state, &admin, None).await.unwrap().len(), 1);
        assert!(get_field(&state, &admin, &field.id).await.is_ok());
        delete_field(&state, &admin, &field.id).await.unwrap();
        assert_eq!(
            get_field(&state, &owner, &field.id).await.unwrap_err().kind(),
            "not_found"
        );
    }
}
