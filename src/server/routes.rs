//! Request routing and VM handlers
//!
//! # Endpoints
//!
//! * `GET /health` - liveness, no authentication
//! * `GET /vms` - list VM names
//! * `POST /vms` - clone a VM from a template
//! * `GET /vms/{id}` - read one VM
//! * `PUT /vms/{id}` - rename / re-describe a VM
//! * `DELETE /vms/{id}` - destroy a VM
//!
//! Unknown paths get 404. On `/vms` paths the gate runs before anything else,
//! so an unauthenticated caller learns nothing about supported methods.

use super::AppState;
use crate::auth::AuthorizationContext;
use crate::authz::Operation;
use crate::gate::{authorize_operation, GateFailure};
use crate::platform::{NewVm, PlatformError, VmUpdate};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, ALLOW, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Upper bound for JSON request bodies
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route<'a> {
    Health,
    Collection,
    Item(&'a str),
    NotFound,
}

impl<'a> Route<'a> {
    fn parse(path: &'a str) -> Self {
        match path {
            "/health" => Route::Health,
            "/vms" | "/vms/" => Route::Collection,
            _ => match path.strip_prefix("/vms/") {
                Some(id) if !id.is_empty() && !id.contains('/') => Route::Item(id),
                _ => Route::NotFound,
            },
        }
    }

    fn allowed_methods(&self) -> &'static str {
        match self {
            Route::Health => "GET",
            Route::Collection => "GET, POST",
            Route::Item(_) => "GET, PUT, DELETE",
            Route::NotFound => "",
        }
    }
}

/// A protected call resolved from method and route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call<'a> {
    List,
    Create,
    Get(&'a str),
    Update(&'a str),
    Delete(&'a str),
}

impl<'a> Call<'a> {
    fn resolve(method: &Method, route: Route<'a>) -> Option<Self> {
        match (method, route) {
            (&Method::GET, Route::Collection) => Some(Call::List),
            (&Method::POST, Route::Collection) => Some(Call::Create),
            (&Method::GET, Route::Item(id)) => Some(Call::Get(id)),
            (&Method::PUT, Route::Item(id)) => Some(Call::Update(id)),
            (&Method::DELETE, Route::Item(id)) => Some(Call::Delete(id)),
            _ => None,
        }
    }

    fn operation(&self) -> Operation {
        match self {
            Call::List => Operation::ListVms,
            Call::Create => Operation::CreateVm,
            Call::Get(_) => Operation::GetVm,
            Call::Update(_) => Operation::UpdateVm,
            Call::Delete(_) => Operation::DeleteVm,
        }
    }
}

/// Handle HTTP request
pub(super) async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();
    debug!("Handling {} {}", method, path);

    let route = Route::parse(&path);
    match route {
        Route::Health if method == Method::GET => {
            return Ok(json_response(StatusCode::OK, &json!({"status": "ok"})));
        }
        Route::Health => return Ok(method_not_allowed(route)),
        Route::NotFound => {
            return Ok(error_response(StatusCode::NOT_FOUND, "Not Found"));
        }
        Route::Collection | Route::Item(_) => {}
    }

    // a non-UTF-8 header value is as good as no header
    let context = match state.gate.admit(
        req.headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok()),
    ) {
        Ok(context) => context,
        Err(failure) => return Ok(failure_response(failure)),
    };

    let Some(call) = Call::resolve(&method, route) else {
        return Ok(method_not_allowed(route));
    };

    if let Err(failure) = authorize_operation(&state.policy, call.operation(), Some(&context)) {
        return Ok(failure_response(failure));
    }

    Ok(dispatch(call, req, &state, &context).await)
}

/// Run an authorized call against the platform
async fn dispatch(
    call: Call<'_>,
    req: Request<Incoming>,
    state: &AppState,
    context: &AuthorizationContext,
) -> Response<Full<Bytes>> {
    let platform = &state.platform;

    match call {
        Call::List => match platform.list_vms().await {
            Ok(vms) => {
                let names: Vec<String> = vms.into_iter().map(|vm| vm.name_label).collect();
                json_response(StatusCode::OK, &json!({ "vms": names }))
            }
            Err(e) => platform_error(e),
        },
        Call::Create => {
            let request: NewVm = match read_json(req).await {
                Ok(request) if NewVm::is_valid(&request) => request,
                Ok(_) => return BodyRejection::Invalid.response(),
                Err(rejection) => return rejection.response(),
            };
            let name = request.name_label.clone();

            match platform.create_vm(request).await {
                Ok(vm_id) => {
                    info!(subject = %context.subject, vm_id = %vm_id, name = %name, "VM created");
                    json_response(StatusCode::CREATED, &json!({ "vm_id": vm_id }))
                }
                Err(e) => platform_error(e),
            }
        }
        Call::Get(id) => match platform.get_vm(id).await {
            Ok(vm) => json_response(
                StatusCode::OK,
                &json!({
                    "name_label": vm.name_label,
                    "description": vm.description,
                    "power_state": vm.power_state,
                }),
            ),
            Err(e) => platform_error(e),
        },
        Call::Update(id) => {
            let update = match read_json::<VmUpdate>(req).await {
                Ok(update) => update,
                Err(rejection) => return rejection.response(),
            };

            match platform.update_vm(id, update).await {
                Ok(()) => {
                    info!(subject = %context.subject, vm_id = %id, "VM updated");
                    json_response(StatusCode::OK, &json!({ "message": "VM updated" }))
                }
                Err(e) => platform_error(e),
            }
        }
        Call::Delete(id) => match platform.delete_vm(id).await {
            Ok(()) => {
                info!(subject = %context.subject, vm_id = %id, "VM deleted");
                json_response(StatusCode::OK, &json!({ "message": "VM deleted" }))
            }
            Err(e) => platform_error(e),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyRejection {
    TooLarge,
    Invalid,
}

impl BodyRejection {
    fn response(self) -> Response<Full<Bytes>> {
        match self {
            BodyRejection::TooLarge => {
                error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request payload too large")
            }
            BodyRejection::Invalid => {
                error_response(StatusCode::BAD_REQUEST, "Invalid request payload")
            }
        }
    }
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, BodyRejection> {
    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(limit = MAX_BODY_BYTES, "Request body over limit");
            return Err(BodyRejection::TooLarge);
        }
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return Err(BodyRejection::Invalid);
        }
    };

    serde_json::from_slice(&body).map_err(|e| {
        debug!("Rejected request body: {}", e);
        BodyRejection::Invalid
    })
}

fn platform_error(error: PlatformError) -> Response<Full<Bytes>> {
    match error {
        PlatformError::NotFound(_) => error_response(StatusCode::NOT_FOUND, "VM not found"),
        PlatformError::TemplateNotFound(_) => {
            error_response(StatusCode::BAD_REQUEST, "Template not found")
        }
        PlatformError::Backend(reason) => {
            error!(%reason, "Platform operation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Platform operation failed")
        }
    }
}

fn failure_response(failure: GateFailure) -> Response<Full<Bytes>> {
    let mut response = error_response(failure.status(), failure.public_message());
    if let Some(challenge) = failure.challenge() {
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
    }
    response
}

fn method_not_allowed(route: Route<'_>) -> Response<Full<Bytes>> {
    let mut response = error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static(route.allowed_methods()));
    response
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({ "error": message }))
}

fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_parse() {
        assert_eq!(Route::parse("/health"), Route::Health);
        assert_eq!(Route::parse("/vms"), Route::Collection);
        assert_eq!(Route::parse("/vms/"), Route::Collection);
        assert_eq!(Route::parse("/vms/OpaqueRef:1"), Route::Item("OpaqueRef:1"));
        assert_eq!(Route::parse("/vms/a/b"), Route::NotFound);
        assert_eq!(Route::parse("/other"), Route::NotFound);
    }

    #[test]
    fn test_call_resolve() {
        assert_eq!(Call::resolve(&Method::GET, Route::Collection), Some(Call::List));
        assert_eq!(Call::resolve(&Method::POST, Route::Collection), Some(Call::Create));
        assert_eq!(
            Call::resolve(&Method::DELETE, Route::Item("x")),
            Some(Call::Delete("x"))
        );
        assert_eq!(Call::resolve(&Method::DELETE, Route::Collection), None);
        assert_eq!(Call::resolve(&Method::POST, Route::Item("x")), None);
    }

    #[test]
    fn test_body_rejection_status() {
        assert_eq!(
            BodyRejection::TooLarge.response().status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(BodyRejection::Invalid.response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_failure_response_hides_details() {
        let response = failure_response(GateFailure::InvalidToken);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(WWW_AUTHENTICATE).unwrap(),
            "Bearer error=\"invalid_token\""
        );
    }
}
