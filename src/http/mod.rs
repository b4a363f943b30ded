//! HTTP endpoint adapters.
//!
//! The core consumes a normalized key→value-list parameter map and yields a
//! status code, header map, and flat data map; this module adapts that
//! contract onto axum extractors and responses. Routing beyond the two
//! protocol endpoints belongs to the embedding application.

use axum::Router;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json};
use base64::prelude::*;
use http::{HeaderMap, StatusCode, header};
use serde_json::json;
use std::sync::Arc;

use crate::errors::ProtocolError;
use crate::oidc::server::{AuthorizeOutcome, ClientAuthentication, OidcServer};
use crate::oidc::types::Params;

/// What the core hands back to the transport: a status, headers, and a flat
/// string-keyed data map
#[derive(Debug)]
pub struct EndpointResponse {
    pub status: StatusCode,
    pub headers: Vec<(&'static str, String)>,
    pub data: serde_json::Value,
}

impl IntoResponse for EndpointResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.data)).into_response();
        for (name, value) in self.headers {
            if let Ok(value) = value.parse() {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

fn error_response(err: &ProtocolError) -> EndpointResponse {
    let mut headers = Vec::new();
    if matches!(err, ProtocolError::InvalidClient(_)) {
        headers.push(("www-authenticate", "Basic realm=\"oidp\"".to_string()));
    }
    EndpointResponse {
        status: err.status(),
        headers,
        data: json!({
            "error": err.code(),
            "error_description": err.description(),
        }),
    }
}

fn redirect_response(location: String) -> EndpointResponse {
    EndpointResponse {
        status: StatusCode::SEE_OTHER,
        headers: vec![("location", location)],
        data: json!({}),
    }
}

/// Axum handler for the authorize endpoint (GET, form-encoded query)
pub async fn authorize_handler(
    State(server): State<Arc<OidcServer>>,
    Query(query): Query<Vec<(String, String)>>,
) -> EndpointResponse {
    let params = Params::from_pairs(query);
    match server.authorize(&params).await {
        Ok(AuthorizeOutcome::Redirect(location)) => redirect_response(location),
        Ok(AuthorizeOutcome::Interaction(signal)) => match signal.location() {
            Ok(location) => redirect_response(location),
            Err(err) => error_response(&err),
        },
        Err(err) => error_response(&err),
    }
}

/// Axum handler for the token endpoint (POST, form-encoded body)
pub async fn token_handler(
    State(server): State<Arc<OidcServer>>,
    headers: HeaderMap,
    Form(form): Form<Vec<(String, String)>>,
) -> EndpointResponse {
    let params = Params::from_pairs(form);
    let client_auth = extract_client_auth(&headers, &params);

    match server.token(&params, client_auth).await {
        Ok(response) => EndpointResponse {
            status: StatusCode::OK,
            headers: vec![
                ("cache-control", "no-store".to_string()),
                ("pragma", "no-cache".to_string()),
            ],
            data: response.to_json(),
        },
        Err(err) => error_response(&err),
    }
}

/// Extract client authentication from the Authorization header or the form
pub fn extract_client_auth(headers: &HeaderMap, params: &Params) -> Option<ClientAuthentication> {
    // HTTP Basic takes precedence
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(encoded) = auth_str.strip_prefix("Basic ") {
                if let Ok(decoded) = BASE64_STANDARD.decode(encoded) {
                    if let Ok(credentials) = String::from_utf8(decoded) {
                        if let Some((client_id, client_secret)) = credentials.split_once(':') {
                            return Some(ClientAuthentication {
                                client_id: client_id.to_string(),
                                client_secret: Some(client_secret.to_string()),
                            });
                        }
                    }
                }
            }
        }
    }

    params.get("client_id").map(|client_id| ClientAuthentication {
        client_id: client_id.to_string(),
        client_secret: params.get("client_secret").map(str::to_string),
    })
}

/// Router exposing the two protocol endpoints
pub fn router(server: Arc<OidcServer>) -> Router {
    Router::new()
        .route("/oauth/authorize", get(authorize_handler))
        .route("/oauth/token", post(token_handler))
        .with_state(server)
}
