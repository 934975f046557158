use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use rice_monitor_shared::{
    analytics, auth, fields, images,
    error::ApiError,
    response,
    submissions::{self, ListQuery},
    types::User,
    users, AppState,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;

const API_PREFIX: &str = "/api/v1";

type Routed = Result<Response<Body>, ApiError>;

/// Main Lambda handler - routes requests under /api/v1 plus /health
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method().clone();
    let path = event.uri().path().to_string();
    tracing::info!("Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == Method::OPTIONS {
        return response::preflight();
    }

    if path == "/health" && method == Method::GET {
        return response::json(
            StatusCode::OK,
            &serde_json::json!({
                "status": "healthy",
                "timestamp": chrono::Utc::now(),
                "version": env!("CARGO_PKG_VERSION"),
            }),
        );
    }

    let Some(route) = path.strip_prefix(API_PREFIX) else {
        tracing::warn!("No route for {} {}", method, path);
        return response::not_found();
    };
    let parts: Vec<&str> = route.split('/').filter(|s| !s.is_empty()).collect();

    match route_request(&event, &state, &method, &parts).await {
        Ok(resp) => Ok(resp),
        Err(err) => {
            if err.status().is_server_error() {
                tracing::error!("{} {} failed: {}", method, path, err);
            } else {
                tracing::info!("{} {} rejected: {} {}", method, path, err.kind(), err);
            }
            response::error(&err)
        }
    }
}

async fn route_request(
    event: &Request,
    state: &AppState,
    method: &Method,
    parts: &[&str],
) -> Routed {
    // Auth routes that do not need a session
    match (method, parts) {
        (&Method::POST, ["auth", "google"]) => {
            let session = auth::google_login(state, parse_body(event)?).await?;
            return respond(response::json(StatusCode::OK, &session));
        }
        (&Method::POST, ["auth", "refresh"]) => {
            let session = auth::refresh(state, parse_body(event)?).await?;
            return respond(response::json(StatusCode::OK, &session));
        }
        _ => {}
    }

    if !is_known_route(method, parts) {
        tracing::warn!("No route for {} {:?}", method, parts);
        return Err(ApiError::NotFound("Endpoint not found".to_string()));
    }

    let user = auth::authenticate(state, event.headers()).await?;
    protected(event, state, &user, method, parts).await
}

async fn protected(
    event: &Request,
    state: &AppState,
    user: &User,
    method: &Method,
    parts: &[&str],
) -> Routed {
    let query = event.query_string_parameters();

    match (method, parts) {
        // --- AUTH ---
        (&Method::POST, ["auth", "logout"]) => {
            respond(response::message(StatusCode::OK, auth::logout(user)))
        }
        (&Method::GET, ["auth", "me"]) => respond(response::success(StatusCode::OK, user)),

        // --- SUBMISSIONS ---
        (&Method::GET, ["submissions"]) => {
            let params = ListQuery {
                page: query.first("page").and_then(|v| v.parse().ok()),
                limit: query.first("limit").and_then(|v| v.parse().ok()),
                status: query.first("status").map(str::to_string),
                field_id: query.first("field_id").map(str::to_string),
                user_id: query.first("user_id").map(str::to_string),
            };
            let page = submissions::list_submissions(state, user, params).await?;
            respond(response::success(StatusCode::OK, &page))
        }
        (&Method::POST, ["submissions"]) => {
            let created = submissions::create_submission(state, user, parse_body(event)?).await?;
            respond(response::success_with_message(
                StatusCode::CREATED,
                &created,
                "Submission created successfully",
            ))
        }
        (&Method::GET, ["submissions", "export"]) => {
            let csv = submissions::export_csv(state, user).await?;
            respond(response::csv("submissions.csv", csv))
        }
        (&Method::GET, ["submissions", id]) => {
            let view = submissions::get_submission(state, user, id).await?;
            respond(response::success(StatusCode::OK, &view))
        }
        (&Method::PUT, ["submissions", id]) => {
            let updated =
                submissions::update_submission(state, user, id, parse_body(event)?).await?;
            respond(response::success_with_message(
                StatusCode::OK,
                &updated,
                "Submission updated successfully",
            ))
        }
        (&Method::DELETE, ["submissions", id]) => {
            submissions::delete_submission(state, user, id).await?;
            respond(response::message(StatusCode::OK, "Submission deleted successfully"))
        }

        // --- IMAGES ---
        (&Method::POST, ["images", "upload"]) => {
            let content_type = event
                .headers()
                .get("Content-Type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            let upload = images::parse_upload(content_type, event.body().to_vec()).await?;
            let uploaded = images::upload_image(state, user, upload).await?;
            respond(response::success_with_message(
                StatusCode::OK,
                &uploaded,
                "Image uploaded successfully",
            ))
        }
        (&Method::GET, ["images", key @ ..]) if !key.is_empty() => {
            respond(response::redirect(&images::image_url(state, &key.join("/"))))
        }
        (&Method::DELETE, ["images", key @ ..]) if !key.is_empty() => {
            images::delete_image(state, user, &key.join("/")).await?;
            respond(response::message(StatusCode::OK, "Image deleted successfully"))
        }

        // --- FIELDS ---
        (&Method::GET, ["fields"]) => {
            let list = fields::list_fields(state, user, query.first("owner_id")).await?;
            respond(response::success(StatusCode::OK, &list))
        }
        (&Method::POST, ["fields"]) => {
            let created = fields::create_field(state, user, parse_body(event)?).await?;
            respond(response::success_with_message(
                StatusCode::CREATED,
                &created,
                "Field created successfully",
            ))
        }
        (&Method::GET, ["fields", id]) => {
            let field = fields::get_field(state, user, id).await?;
            respond(response::success(StatusCode::OK, &field))
        }
        (&Method::PUT, ["fields", id]) => {
            let updated = fields::update_field(state, user, id, parse_body(event)?).await?;
            respond(response::success_with_message(
                StatusCode::OK,
                &updated,
                "Field updated successfully",
            ))
        }
        (&Method::DELETE, ["fields", id]) => {
            fields::delete_field(state, user, id).await?;
            respond(response::message(StatusCode::OK, "Field deleted successfully"))
        }

        // --- ANALYTICS ---
        (&Method::GET, ["analytics", "dashboard"]) => {
            let dashboard = analytics::get_dashboard(state, user).await?;
            respond(response::success(StatusCode::OK, &dashboard))
        }
        (&Method::GET, ["analytics", "trends"]) => {
            let days = query.first("days").and_then(|v| v.parse().ok());
            let trends = analytics::get_trends(state, user, days).await?;
            respond(response::success(StatusCode::OK, &trends))
        }
        (&Method::GET, ["analytics", "reports"]) => {
            let report = analytics::get_report(
                state,
                user,
                query.first("type"),
                query.first("start_date"),
                query.first("end_date"),
            )
            .await?;
            respond(response::success(StatusCode::OK, &report))
        }

        // --- USERS ---
        (&Method::GET, ["users"]) => {
            let list = users::list_users(state, user).await?;
            respond(response::success(StatusCode::OK, &list))
        }
        (&Method::GET, ["users", id]) => {
            let found = users::get_user(state, user, id).await?;
            respond(response::success(StatusCode::OK, &found))
        }
        (&Method::PUT, ["users", id]) => {
            let updated = users::update_user(state, user, id, parse_body(event)?).await?;
            respond(response::success_with_message(
                StatusCode::OK,
                &updated,
                "User updated successfully",
            ))
        }
        (&Method::DELETE, ["users", id]) => {
            users::delete_user(state, user, id).await?;
            respond(response::message(StatusCode::OK, "User deleted successfully"))
        }

        _ => Err(ApiError::NotFound("Endpoint not found".to_string())),
    }
}

/// Route table of the protected API, checked before authenticating so
/// unknown paths answer 404 rather than 401.
fn is_known_route(method: &Method, parts: &[&str]) -> bool {
    matches!(
        (method, parts),
        (&Method::POST, ["auth", "logout"])
            | (&Method::GET, ["auth", "me"])
            | (&Method::GET | &Method::POST, ["submissions"])
            | (&Method::GET, ["submissions", "export"])
            | (&Method::GET | &Method::PUT | &Method::DELETE, ["submissions", _])
            | (&Method::POST, ["images", "upload"])
            | (&Method::GET | &Method::DELETE, ["images", _, ..])
            | (&Method::GET | &Method::POST, ["fields"])
            | (&Method::GET | &Method::PUT | &Method::DELETE, ["fields", _])
            | (&Method::GET, ["analytics", "dashboard" | "trends" | "reports"])
            | (&Method::GET, ["users"])
            | (&Method::GET | &Method::PUT | &Method::DELETE, ["users", _])
    )
}

fn parse_body<T: DeserializeOwned>(event: &Request) -> Result<T, ApiError> {
    serde_json::from_slice(event.body().as_ref())
        .map_err(|e| ApiError::InvalidRequest(format!("Invalid request body: {}", e)))
}

fn respond(result: Result<Response<Body>, Error>) -> Routed {
    result.map_err(|e| {
        tracing::error!("Failed to build response: {}", e);
        ApiError::Internal("Failed to build response".to_string())
    })
}
