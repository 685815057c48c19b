//! HTTP handlers for the bridge endpoints
//!
//! Every endpoint is a single round trip: the request flow hands the
//! browser a signed session token plus an IRMA session pointer, and the
//! assert flows trade that token (and the IRMA result) for a signed SAML
//! response. No state lives between the calls.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::keys::KeyMaterial;
use crate::models::{
    AssertParameters, AssertRequest, ClientError, ErrorAssertRequest, RedirectInstruction,
    RequestError, RequestPage,
};
use crate::saml::{policy, Condiscon, Disclosure};
use crate::services::binding::RedirectParams;
use crate::services::metadata::idp_metadata;
use crate::services::{IrmaClient, ResponseBuilder, SessionTokenCodec, TrustStore};
use axum::extract::{Query, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

/// Shared application state, cheap to clone per request.
#[derive(Clone)]
pub struct BridgeState {
    pub config: Arc<BridgeConfig>,
    pub keys: Arc<KeyMaterial>,
    pub trust_store: Arc<TrustStore>,
    pub tokens: Arc<SessionTokenCodec>,
    pub responses: Arc<ResponseBuilder>,
    pub irma: Arc<IrmaClient>,
}

impl BridgeState {
    /// Load keys and partner metadata and wire up the services.
    pub fn from_config(config: BridgeConfig) -> BridgeResult<Self> {
        let keys = KeyMaterial::load(&config)?;
        let trust_store = TrustStore::from_directory(&config.saml_metadata_path)?;
        let tokens = SessionTokenCodec::new(config.issuer_name());
        let responses = ResponseBuilder::new(config.issuer_name(), config.response_ttl_in_sec);
        Ok(Self {
            config: Arc::new(config),
            keys: Arc::new(keys),
            trust_store: Arc::new(trust_store),
            tokens: Arc::new(tokens),
            responses: Arc::new(responses),
            irma: Arc::new(IrmaClient::new(reqwest::Client::new())),
        })
    }
}

/// GET /request: decode and authenticate an AuthnRequest, start an IRMA
/// disclosure session, and hand the frontend everything it needs.
pub async fn request(
    State(state): State<BridgeState>,
    RawQuery(raw_query): RawQuery,
    Query(params): Query<RedirectParams>,
) -> Response {
    // The detached signature covers the query string as transmitted.
    let raw_query = raw_query.unwrap_or_default();
    match handle_request(&state, &params, &raw_query).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(action = "request-flow", warning = %e, "request flow failed");
            e.into_response()
        }
    }
}

async fn handle_request(
    state: &BridgeState,
    params: &RedirectParams,
    raw_query: &str,
) -> BridgeResult<Response> {
    let request = params.decode().map_err(|e| {
        tracing::warn!(action = "request-flow", warning = %e);
        BridgeError::Decoding("Failed to decode SAML request".to_string())
    })?;

    state
        .trust_store
        .authenticate(params, raw_query, &request.issuer)
        .map_err(|e| match e {
            BridgeError::Unauthenticated => BridgeError::Unauthenticated,
            other => {
                tracing::warn!(action = "request-flow", warning = %other);
                BridgeError::Signature("SAML request signature malformed".to_string())
            }
        })?;

    request.check_age(state.config.request_ttl_in_sec, chrono::Utc::now())?;

    let condiscon = policy::extract_condiscon(&request, state.config.default_condiscon())?;

    // The response destination comes from the request itself, with the
    // partner's advertised redirect endpoint as fallback.
    let return_url = request
        .assertion_consumer_service_url
        .clone()
        .filter(|url| !url.is_empty())
        .or_else(|| {
            state
                .trust_store
                .entity(&request.issuer)
                .and_then(|entity| entity.redirect_assertion_consumer_service())
                .map(String::from)
        })
        .ok_or_else(|| {
            BridgeError::Decoding(
                "Return URL is empty (AssertionConsumerServiceURL in SAML)".to_string(),
            )
        })?;

    let sp_name = request.sp_name();
    let resolved = state.config.resolve_irma_path(&sp_name);

    let disclosure_request = state
        .tokens
        .encode_disclosure_request(&state.keys.jwt_encoding, &condiscon)?;
    let session_data = state
        .irma
        .start_session(
            &disclosure_request,
            &format!("{}{}", resolved.irma_service_host, resolved.postfix),
        )
        .await?;
    // The session pointer carries the backend hostname; the browser must
    // see the public one.
    let session_data = session_data.replace(&resolved.irma_service_host, &resolved.host);

    let parameters = AssertParameters {
        sp_name: Some(sp_name),
        request_id: Some(request.id.clone()),
        service_url: Some(return_url),
        issuer: Some(request.issuer.clone()),
        condiscon: Some(condiscon.to_json()),
        relay_state: params.relay_state.clone(),
        request_error: None,
    };
    let assert_parameters = state
        .tokens
        .encode_session(&state.keys.jwt_encoding, &parameters)?;

    tracing::info!(
        action = "request-flow",
        issuer = %request.issuer,
        request_id = %request.id,
        "started disclosure session"
    );

    let page = RequestPage {
        irma_server: format!("{}{}", resolved.host, resolved.postfix),
        language: "nl".to_string(),
        session_data,
        assert_url: state.config.construct_url("/assert"),
        error_assert_url: state.config.construct_url("/errorassert"),
        error_url: state.config.construct_url("/report"),
        assert_parameters,
    };
    Ok((
        StatusCode::OK,
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, resolved.host)],
        Json(page),
    )
        .into_response())
}

/// POST /assert: verify the IRMA session result against the session's
/// policy and answer with a signed success response.
pub async fn assert(
    State(state): State<BridgeState>,
    Json(body): Json<AssertRequest>,
) -> Response {
    match handle_assert(&state, &body) {
        Ok(instruction) => Json(instruction).into_response(),
        Err(e) => {
            tracing::warn!(action = "assert-flow", warning = %e, "assert flow failed");
            e.into_response()
        }
    }
}

fn handle_assert(state: &BridgeState, body: &AssertRequest) -> BridgeResult<RedirectInstruction> {
    let parameters = state
        .tokens
        .decode_session(&state.keys.jwt_decoding, &body.parameters)?;
    let claims = state
        .tokens
        .decode_disclosure_result(&state.keys.irma_decoding, &body.token)?;
    let disclosure = Disclosure::from_claims(&claims)?;

    let condiscon = parameters
        .condiscon
        .as_deref()
        .ok_or_else(|| BridgeError::MalformedToken("session is missing a condiscon".to_string()))
        .and_then(|json| {
            Condiscon::from_json(json).map_err(|e| {
                BridgeError::MalformedToken(format!("session condiscon unreadable: {e}"))
            })
        })?;
    disclosure.accept(&condiscon)?;

    let service_url = parameters.service_url.clone().ok_or_else(|| {
        BridgeError::MalformedToken("session is missing a service URL".to_string())
    })?;

    let saml_response = state
        .responses
        .build_success(&state.keys, &parameters, &disclosure)?;

    tracing::info!(
        action = "disclosedsuccesfully",
        sp = parameters.sp_name.as_deref().unwrap_or(""),
        "disclosure accepted"
    );

    Ok(RedirectInstruction {
        saml_response,
        service_url,
        relay_state: parameters.relay_state,
    })
}

/// POST /errorassert: finish a failed session with a signed failure
/// response carrying the propagated error.
pub async fn error_assert(
    State(state): State<BridgeState>,
    Json(body): Json<ErrorAssertRequest>,
) -> Response {
    match handle_error_assert(&state, &body, None) {
        Ok(instruction) => Json(instruction).into_response(),
        Err(e) => {
            tracing::warn!(action = "error-assert-flow", warning = %e, "error assert failed");
            e.into_response()
        }
    }
}

/// POST /errorassert/abort: the user cancelled the IRMA session.
pub async fn error_assert_abort(
    State(state): State<BridgeState>,
    Json(body): Json<ErrorAssertRequest>,
) -> Response {
    let cancelled = RequestError {
        status_code: StatusCode::BAD_REQUEST.as_u16(),
        message: "The user cancelled.".to_string(),
    };
    match handle_error_assert(&state, &body, Some(cancelled)) {
        Ok(instruction) => Json(instruction).into_response(),
        Err(e) => {
            tracing::warn!(action = "error-assert-flow", warning = %e, "error assert failed");
            e.into_response()
        }
    }
}

fn handle_error_assert(
    state: &BridgeState,
    body: &ErrorAssertRequest,
    override_error: Option<RequestError>,
) -> BridgeResult<RedirectInstruction> {
    let mut parameters = state
        .tokens
        .decode_session(&state.keys.jwt_decoding, &body.parameters)?;

    let error = override_error
        .or_else(|| parameters.request_error.clone())
        .unwrap_or_else(|| RequestError {
            status_code: StatusCode::BAD_REQUEST.as_u16(),
            message: "Something went wrong in the frontend".to_string(),
        });
    parameters.request_error = Some(error);

    let service_url = parameters.service_url.clone().ok_or_else(|| {
        BridgeError::MalformedToken("session is missing a service URL".to_string())
    })?;

    let saml_response = state.responses.build_failure(&state.keys, &parameters)?;

    Ok(RedirectInstruction {
        saml_response,
        service_url,
        relay_state: parameters.relay_state,
    })
}

/// GET /metadata: this IdP's entity descriptor.
pub async fn metadata(State(state): State<BridgeState>) -> Response {
    let xml = idp_metadata(&state.config, &state.keys);
    ([(header::CONTENT_TYPE, "application/xml")], xml).into_response()
}

/// POST /report: log a client-side error. Always answers 200; the
/// frontend cannot do anything with a failure here.
pub async fn report(Json(error): Json<ClientError>) -> StatusCode {
    tracing::warn!(
        action = "clientsideerror",
        source = %limit(error.source.as_deref().unwrap_or(""), 50),
        lineno = error.lineno.unwrap_or(0),
        colno = error.colno.unwrap_or(0),
        message = %limit(error.message.as_deref().unwrap_or(""), 256),
        "client reported an error"
    );
    StatusCode::OK
}

/// Truncate untrusted report fields before they reach the log.
fn limit(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
