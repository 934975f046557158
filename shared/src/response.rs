use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::Serialize;

use crate::error::ApiError;

const ALLOWED_METHODS: &str = "GET,POST,PUT,DELETE,OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type,Authorization";

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

/// Plain JSON body, no envelope
pub fn json<T: Serialize>(status: StatusCode, body: &T) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(body)?.into())
        .map_err(Box::new)?)
}

/// `{success: true, data}`
pub fn success<T: Serialize>(status: StatusCode, data: &T) -> Result<Response<Body>, Error> {
    json(
        status,
        &Envelope {
            success: true,
            data: Some(data),
            message: None,
        },
    )
}

/// `{success: true, data, message}`
pub fn success_with_message<T: Serialize>(
    status: StatusCode,
    data: &T,
    message: &str,
) -> Result<Response<Body>, Error> {
    json(
        status,
        &Envelope {
            success: true,
            data: Some(data),
            message: Some(message),
        },
    )
}

/// `{success: true, message}`
pub fn message(status: StatusCode, message: &str) -> Result<Response<Body>, Error> {
    json(
        status,
        &Envelope::<()> {
            success: true,
            data: None,
            message: Some(message),
        },
    )
}

pub fn error(err: &ApiError) -> Result<Response<Body>, Error> {
    json(err.status(), &err.to_body())
}

pub fn not_found() -> Result<Response<Body>, Error> {
    error(&ApiError::NotFound("Endpoint not found".to_string()))
}

pub fn csv(filename: &str, body: String) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/csv")
        .header(
            "Content-Disposition",
            format!("attachment; filename={}", filename),
        )
        .header("Access-Control-Allow-Origin", "*")
        .body(body.into())
        .map_err(Box::new)?)
}

pub fn redirect(location: &str) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::PERMANENT_REDIRECT)
        .header("Location", location)
        .header("Access-Control-Allow-Origin", "*")
        .body(Body::Empty)
        .map_err(Box::new)?)
}

/// CORS preflight
pub fn preflight() -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", ALLOWED_METHODS)
        .header("Access-Control-Allow-Headers", ALLOWED_HEADERS)
        .body(Body::Empty)
        .map_err(Box::new)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn body_json(resp: &Response<Body>) -> Value {
        serde_json::from_slice(resp.body().as_ref()).unwrap()
    }

    #[test]
    fn test_success_envelope() {
        let resp = success(StatusCode::CREATED, &json!({"id": "f1"})).unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers()["Access-Control-Allow-Origin"], "*");
        assert_eq!(body_json(&resp), json!({"success": true, "data": {"id": "f1"}}));
    }

    #[test]
    fn test_message_envelope_has_no_data() {
        let resp = message(StatusCode::OK, "Logged out successfully").unwrap();
        assert_eq!(
            body_json(&resp),
            json!({"success": true, "message": "Logged out successfully"})
        );
    }

    #[test]
    fn test_error_body() {
        let resp = error(&ApiError::access_denied()).unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_json(&resp),
            json!({"error": "forbidden", "message": "Access denied"})
        );
    }

    #[test]
    fn test_csv_headers() {
        let resp = csv("submissions.csv", "ID\n".to_string()).unwrap();
        assert_eq!(resp.headers()["Content-Type"], "text/csv");
        assert_eq!(
            resp.headers()["Content-Disposition"],
            "attachment; filename=submissions.csv"
        );
    }
}
