use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    Form, Json, Router,
    extract::{ConnectInfo, DefaultBodyLimit, FromRequest, Multipart, Query, Request, State},
    extract::multipart::MultipartError,
    http::{Method, StatusCode, header},
    routing::get,
};
use parlor_types::api::Envelope;
use tower_http::services::ServeDir;
use tracing::warn;

use crate::actions::{self, ActionRequest};
use crate::attachments::{MAX_ATTACHMENT_BYTES, PUBLIC_PREFIX, Upload};
use crate::error::ChatError;
use crate::state::AppState;

/// Transport body cap. Kept well above the attachment limit so an oversize
/// file reaches validation and gets a proper error envelope.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Multipart field names accepted as the uploaded file.
const FILE_FIELDS: &[&str] = &["files[]", "files", "file"];

pub fn router(state: AppState) -> Router {
    let uploads = ServeDir::new(state.attachments.dir());

    Router::new()
        .route("/", get(api).post(api))
        .route("/api", get(api).post(api))
        .nest_service(&format!("/{}", PUBLIC_PREFIX), uploads)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

#[derive(Default)]
struct RequestBody {
    fields: HashMap<String, String>,
    file: Option<Upload>,
}

/// GET or POST /api — the single action endpoint. Always answers 200 with an
/// envelope; failures are reported inside it.
pub async fn api(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    request: Request,
) -> Json<Envelope> {
    let ip_address = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into());

    let body = match read_body(&state, request).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Unreadable request body from {}: {}", ip_address, e);
            return Json(e.to_envelope());
        }
    };

    // Query string wins over body fields.
    let mut fields = body.fields;
    fields.extend(query);

    Json(
        actions::dispatch(
            &state,
            ActionRequest {
                fields,
                file: body.file,
                ip_address,
            },
        )
        .await,
    )
}

async fn read_body(state: &AppState, request: Request) -> Result<RequestBody, ChatError> {
    if request.method() != Method::POST {
        return Ok(RequestBody::default());
    }

    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, state)
            .await
            .map_err(|e| ChatError::Validation(format!("malformed upload: {}", e)))?;
        read_multipart(multipart).await
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(fields) = Form::<HashMap<String, String>>::from_request(request, state)
            .await
            .map_err(|e| ChatError::Validation(format!("malformed form: {}", e)))?;
        Ok(RequestBody { fields, file: None })
    } else {
        Ok(RequestBody::default())
    }
}

/// Collect text fields and the first file part. A file part with neither a
/// name nor content is what browsers send for an empty file input.
async fn read_multipart(mut multipart: Multipart) -> Result<RequestBody, ChatError> {
    let mut body = RequestBody::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        match field.file_name().map(str::to_string) {
            Some(original_name) => {
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;

                let empty = original_name.is_empty() && bytes.is_empty();
                if body.file.is_none() && FILE_FIELDS.contains(&name.as_str()) && !empty {
                    body.file = Some(Upload {
                        declared_size: bytes.len() as u64,
                        bytes,
                        original_name,
                        mime_type,
                    });
                }
            }
            None => {
                let value = field.text().await.map_err(multipart_error)?;
                body.fields.insert(name, value);
            }
        }
    }

    Ok(body)
}

fn multipart_error(e: MultipartError) -> ChatError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ChatError::TooLarge {
            max: MAX_ATTACHMENT_BYTES,
        }
    } else {
        ChatError::Validation(format!("malformed upload: {}", e.body_text()))
    }
}
