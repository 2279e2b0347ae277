//! End-to-end sign-in flows against a scripted identity provider.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{BridgeError, Clock, HttpClient, HttpRequest, HttpResponse, ManualClock};
use core_auth::{
    code_challenge, CallbackParams, FlowId, FlowStatus, ProviderEndpoints, SignInClient,
    SignInConfig, SignInError, SignInErrorKind, TokenStore,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, Receiver, SignInEvent};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SIGNING_KEY: &str = include_str!("fixtures/signing_key.pem");
const JWKS: &str = include_str!("fixtures/jwks.json");
const JWKS_WRONG_KEY: &str = include_str!("fixtures/jwks_wrong_key.json");

const ISSUER: &str = "https://issuer.example";
const TOKEN_ENDPOINT: &str = "https://issuer.example/token";
const JWKS_URI: &str = "https://issuer.example/jwks";

/// Scripted provider: serves a JWKS and a canned token endpoint response.
struct ProviderStub {
    jwks_bodies: Mutex<Vec<&'static str>>,
    jwks_down_from: Mutex<Option<usize>>,
    token_status: Mutex<u16>,
    token_body: Mutex<String>,
    token_delay: Mutex<Option<Duration>>,
    last_token_form: Mutex<Option<String>>,
    token_requests: AtomicUsize,
    jwks_requests: AtomicUsize,
}

impl ProviderStub {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            jwks_bodies: Mutex::new(vec![JWKS]),
            jwks_down_from: Mutex::new(None),
            token_status: Mutex::new(200),
            token_body: Mutex::new(String::new()),
            token_delay: Mutex::new(None),
            last_token_form: Mutex::new(None),
            token_requests: AtomicUsize::new(0),
            jwks_requests: AtomicUsize::new(0),
        })
    }

    /// JWKS bodies served in order; the last one repeats.
    fn serve_jwks(&self, bodies: Vec<&'static str>) {
        *self.jwks_bodies.lock().unwrap() = bodies;
    }

    /// JWKS requests from the `nth` one on fail at the transport.
    fn take_jwks_down_from(&self, nth: usize) {
        *self.jwks_down_from.lock().unwrap() = Some(nth);
    }

    fn respond_with_id_token(&self, id_token: &str) {
        *self.token_status.lock().unwrap() = 200;
        *self.token_body.lock().unwrap() = json!({
            "access_token": "ya29.access",
            "id_token": id_token,
            "expires_in": 3599,
            "token_type": "Bearer",
            "scope": "openid email"
        })
        .to_string();
    }

    fn respond_with(&self, status: u16, body: &str) {
        *self.token_status.lock().unwrap() = status;
        *self.token_body.lock().unwrap() = body.to_string();
    }

    fn delay_token_endpoint(&self, delay: Duration) {
        *self.token_delay.lock().unwrap() = Some(delay);
    }

    fn last_token_form(&self) -> String {
        self.last_token_form.lock().unwrap().clone().unwrap_or_default()
    }
}

#[async_trait]
impl HttpClient for ProviderStub {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        match request.url.as_str() {
            JWKS_URI => {
                let served = self.jwks_requests.fetch_add(1, Ordering::SeqCst);
                if self.jwks_down_from.lock().unwrap().is_some_and(|nth| served >= nth) {
                    return Err(BridgeError::Connection("jwks unreachable".to_string()));
                }
                let bodies = self.jwks_bodies.lock().unwrap();
                let body = bodies
                    .get(served)
                    .or_else(|| bodies.last())
                    .copied()
                    .unwrap_or(JWKS);
                Ok(HttpResponse::new(200, body))
            }
            TOKEN_ENDPOINT => {
                self.token_requests.fetch_add(1, Ordering::SeqCst);
                *self.last_token_form.lock().unwrap() = request
                    .body
                    .as_ref()
                    .map(|body| String::from_utf8_lossy(body).into_owned());

                let delay = *self.token_delay.lock().unwrap();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }

                let status = *self.token_status.lock().unwrap();
                let body = self.token_body.lock().unwrap().clone();
                Ok(HttpResponse::new(status, body))
            }
            other => Err(BridgeError::Connection(format!("no route to {}", other))),
        }
    }
}

struct Harness {
    client: SignInClient,
    provider: Arc<ProviderStub>,
    clock: Arc<ManualClock>,
    events: Receiver<CoreEvent>,
}

impl Harness {
    fn new() -> Self {
        let provider = ProviderStub::new();
        let clock = Arc::new(ManualClock::starting_now());
        let core = CoreConfig::builder()
            .http_client(provider.clone())
            .clock(clock.clone())
            .build()
            .unwrap();
        let client = SignInClient::new(&core);
        let events = client.subscribe();

        Self {
            client,
            provider,
            clock,
            events,
        }
    }

    fn store(&self) -> &TokenStore {
        self.client.token_store()
    }

    async fn begin(&self) -> FlowId {
        self.client.begin_sign_in(config()).await.unwrap().0
    }

    /// Claims for `flow_id` that pass every check.
    async fn claims(&self, flow_id: FlowId) -> Value {
        let flow = self.store().get(flow_id).await.unwrap();
        let now = self.clock.now().timestamp();
        json!({
            "iss": ISSUER,
            "sub": "110169484474386276334",
            "aud": "abc",
            "iat": now,
            "exp": now + 3600,
            "nonce": flow.nonce,
            "email": "user@example.com",
            "email_verified": true,
            "name": "Test User",
            "picture": "https://example.com/photo.png"
        })
    }

    async fn good_callback(&self, flow_id: FlowId) -> CallbackParams {
        let flow = self.store().get(flow_id).await.unwrap();
        CallbackParams::new(flow.state, "goodcode")
    }

    fn drain_events(&mut self) -> Vec<SignInEvent> {
        let mut events = Vec::new();
        while let Ok(CoreEvent::SignIn(event)) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn terminal_events(&mut self, flow_id: FlowId) -> Vec<SignInEvent> {
        let flow_id = flow_id.to_string();
        self.drain_events()
            .into_iter()
            .filter(|event| {
                matches!(
                    event,
                    SignInEvent::LoginSuccess { .. } | SignInEvent::LoginError { .. }
                ) && event.flow_id() == Some(flow_id.as_str())
            })
            .collect()
    }
}

fn config() -> SignInConfig {
    SignInConfig::builder("abc", "app://cb")
        .scopes(["openid", "email"])
        .provider(ProviderEndpoints::new(
            ISSUER,
            "https://issuer.example/authorize",
            TOKEN_ENDPOINT,
            JWKS_URI,
        ))
        .build()
        .unwrap()
}

fn sign(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("test-key-1".to_string());
    let key = EncodingKey::from_rsa_pem(SIGNING_KEY.as_bytes()).unwrap();
    encode(&header, claims, &key).unwrap()
}

#[tokio::test]
async fn scenario_a_authorization_url() {
    let h = Harness::new();

    let (flow_id, url) = h.client.begin_sign_in(config()).await.unwrap();

    assert!(url.as_str().starts_with("https://issuer.example/authorize?"));
    assert!(url.as_str().contains(
        "client_id=abc&redirect_uri=app%3A%2F%2Fcb&response_type=code&code_challenge_method=S256"
    ));

    let flow = h.store().get(flow_id).await.unwrap();
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let param = |name: &str| {
        pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    };

    assert_eq!(param("scope").as_deref(), Some("openid email"));
    assert_eq!(param("state"), Some(flow.state.clone()));
    assert_eq!(param("code_challenge"), Some(flow.code_challenge.clone()));
    assert_eq!(param("nonce"), flow.nonce.clone());
    assert!(param("code_verifier").is_none());
}

#[tokio::test]
async fn scenario_b_successful_sign_in() {
    let mut h = Harness::new();
    let flow_id = h.begin().await;
    h.provider
        .respond_with_id_token(&sign(&h.claims(flow_id).await));

    let identity = h
        .client
        .complete_sign_in(flow_id, h.good_callback(flow_id).await)
        .await
        .unwrap();

    assert_eq!(identity.subject, "110169484474386276334");
    assert_eq!(identity.email, "user@example.com");
    assert_eq!(identity.issuer, ISSUER);
    assert_eq!(identity.audience, "abc");
    assert_eq!(
        h.client.flow_status(flow_id).await.unwrap(),
        FlowStatus::Completed
    );

    let flow = h.store().get(flow_id).await.unwrap();
    let form = h.provider.last_token_form();
    assert!(form.contains("grant_type=authorization_code"));
    assert!(form.contains("code=goodcode"));
    assert!(form.contains(&format!("code_verifier={}", flow.code_verifier)));

    let terminal = h.terminal_events(flow_id);
    assert_eq!(terminal.len(), 1);
    match &terminal[0] {
        SignInEvent::LoginSuccess {
            subject,
            email,
            id_token,
            ..
        } => {
            assert_eq!(subject, "110169484474386276334");
            assert_eq!(email, "user@example.com");
            assert_eq!(id_token.expose(), identity.raw_id_token);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn scenario_c_expired_token() {
    let mut h = Harness::new();
    let flow_id = h.begin().await;
    let mut claims = h.claims(flow_id).await;
    claims["exp"] = json!(h.clock.now().timestamp() - 10);
    h.provider.respond_with_id_token(&sign(&claims));

    let err = h
        .client
        .complete_sign_in(flow_id, h.good_callback(flow_id).await)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SignInErrorKind::TokenExpired);
    assert_eq!(h.client.flow_status(flow_id).await.unwrap(), FlowStatus::Failed);

    let terminal = h.terminal_events(flow_id);
    assert_eq!(terminal.len(), 1);
    assert!(matches!(
        &terminal[0],
        SignInEvent::LoginError { kind, security_violation: false, .. } if kind == "TokenExpired"
    ));
}

#[tokio::test]
async fn scenario_d_state_mismatch() {
    let mut h = Harness::new();
    let flow_id = h.begin().await;

    let err = h
        .client
        .complete_sign_in(flow_id, CallbackParams::new("wrong", "x"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SignInErrorKind::StateMismatch);
    assert!(err.is_security_violation());
    assert_eq!(h.provider.token_requests.load(Ordering::SeqCst), 0);

    let terminal = h.terminal_events(flow_id);
    assert_eq!(terminal.len(), 1);
    assert!(matches!(
        &terminal[0],
        SignInEvent::LoginError { kind, security_violation: true, .. } if kind == "StateMismatch"
    ));
}

#[tokio::test]
async fn scenario_e_abandoned_flow_expires() {
    let mut h = Harness::new();
    let flow_id = h.begin().await;
    let callback = h.good_callback(flow_id).await;

    h.clock.advance(chrono::Duration::seconds(31));

    let err = h
        .client
        .complete_sign_in(flow_id, callback)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SignInErrorKind::FlowExpired);
    assert_eq!(h.client.flow_status(flow_id).await.unwrap(), FlowStatus::Expired);
    assert_eq!(h.provider.token_requests.load(Ordering::SeqCst), 0);
    assert_eq!(h.terminal_events(flow_id).len(), 1);
}

#[tokio::test]
async fn generated_flows_have_valid_pkce() {
    let h = Harness::new();

    for _ in 0..64 {
        let flow_id = h.begin().await;
        let flow = h.store().get(flow_id).await.unwrap();

        assert!((43..=128).contains(&flow.code_verifier.len()));
        assert_eq!(flow.code_challenge, code_challenge(&flow.code_verifier));
    }
}

#[tokio::test]
async fn state_mismatch_never_yields_identity() {
    let h = Harness::new();

    for received in ["", "wrong", "WRONG"] {
        let flow_id = h.begin().await;
        h.provider
            .respond_with_id_token(&sign(&h.claims(flow_id).await));
        let flow = h.store().get(flow_id).await.unwrap();
        let tampered = format!("{}x", flow.state);

        for state in [received, tampered.as_str()] {
            let result = h
                .client
                .complete_sign_in(flow_id, CallbackParams::new(state, "goodcode"))
                .await;
            assert!(result.is_err());
        }
    }

    assert_eq!(h.provider.token_requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn audience_mismatch_is_reported() {
    let mut h = Harness::new();
    let flow_id = h.begin().await;
    let mut claims = h.claims(flow_id).await;
    claims["aud"] = json!("someone-else");
    h.provider.respond_with_id_token(&sign(&claims));

    let err = h
        .client
        .complete_sign_in(flow_id, h.good_callback(flow_id).await)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SignInErrorKind::AudienceMismatch);
    assert!(err.is_security_violation());
    assert_eq!(h.terminal_events(flow_id).len(), 1);
}

#[tokio::test]
async fn completing_twice_is_unknown_flow() {
    let mut h = Harness::new();
    let flow_id = h.begin().await;
    h.provider
        .respond_with_id_token(&sign(&h.claims(flow_id).await));
    let callback = h.good_callback(flow_id).await;

    assert!(h
        .client
        .complete_sign_in(flow_id, callback.clone())
        .await
        .is_ok());
    let err = h
        .client
        .complete_sign_in(flow_id, callback)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SignInErrorKind::UnknownFlow);
    assert_eq!(h.provider.token_requests.load(Ordering::SeqCst), 1);

    let terminal = h.terminal_events(flow_id);
    assert_eq!(terminal.len(), 1);
    assert!(matches!(terminal[0], SignInEvent::LoginSuccess { .. }));
}

#[tokio::test]
async fn provider_denial_is_terminal() {
    let mut h = Harness::new();
    let flow_id = h.begin().await;
    let flow = h.store().get(flow_id).await.unwrap();

    let err = h
        .client
        .complete_sign_in(
            flow_id,
            CallbackParams::denied(flow.state, "access_denied", None),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SignInErrorKind::ProviderDenied);
    assert!(!err.is_security_violation());
    assert_eq!(h.client.flow_status(flow_id).await.unwrap(), FlowStatus::Failed);
    assert_eq!(h.terminal_events(flow_id).len(), 1);
}

#[tokio::test]
async fn rejected_code_is_provider_denied() {
    let h = Harness::new();
    let flow_id = h.begin().await;
    h.provider.respond_with(
        400,
        r#"{"error":"invalid_grant","error_description":"Malformed auth code."}"#,
    );

    let err = h
        .client
        .complete_sign_in(flow_id, h.good_callback(flow_id).await)
        .await
        .unwrap_err();

    match err {
        SignInError::ProviderDenied { error, description } => {
            assert_eq!(error, "invalid_grant");
            assert_eq!(description.as_deref(), Some("Malformed auth code."));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn signing_key_rotation_is_followed() {
    let h = Harness::new();
    h.provider.serve_jwks(vec![JWKS_WRONG_KEY, JWKS]);
    let flow_id = h.begin().await;
    h.provider
        .respond_with_id_token(&sign(&h.claims(flow_id).await));

    let identity = h
        .client
        .complete_sign_in(flow_id, h.good_callback(flow_id).await)
        .await
        .unwrap();

    assert_eq!(identity.email, "user@example.com");
    assert_eq!(h.provider.jwks_requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn signing_keys_are_cached_across_flows() {
    let h = Harness::new();

    for _ in 0..3 {
        let flow_id = h.begin().await;
        h.provider
            .respond_with_id_token(&sign(&h.claims(flow_id).await));
        h.client
            .complete_sign_in(flow_id, h.good_callback(flow_id).await)
            .await
            .unwrap();
    }

    assert_eq!(h.provider.jwks_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unrecognised_signature_fails_after_one_refresh() {
    let h = Harness::new();
    h.provider.serve_jwks(vec![JWKS_WRONG_KEY]);
    let flow_id = h.begin().await;
    h.provider
        .respond_with_id_token(&sign(&h.claims(flow_id).await));

    let err = h
        .client
        .complete_sign_in(flow_id, h.good_callback(flow_id).await)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SignInErrorKind::SignatureInvalid);
    assert_eq!(h.provider.jwks_requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_key_refresh_keeps_signature_rejection() {
    let mut h = Harness::new();
    h.provider.serve_jwks(vec![JWKS_WRONG_KEY]);
    h.provider.take_jwks_down_from(1);
    let flow_id = h.begin().await;
    h.provider
        .respond_with_id_token(&sign(&h.claims(flow_id).await));

    let err = h
        .client
        .complete_sign_in(flow_id, h.good_callback(flow_id).await)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SignInErrorKind::SignatureInvalid);
    assert!(err.is_security_violation());
    assert!(!err.is_transient());

    let terminal = h.terminal_events(flow_id);
    assert_eq!(terminal.len(), 1);
    assert!(matches!(
        &terminal[0],
        SignInEvent::LoginError { kind, security_violation: true, .. } if kind == "SignatureInvalid"
    ));
}

#[tokio::test]
async fn unreachable_key_set_is_key_fetch_failure() {
    let h = Harness::new();
    h.provider.take_jwks_down_from(0);
    let flow_id = h.begin().await;
    h.provider
        .respond_with_id_token(&sign(&h.claims(flow_id).await));

    let err = h
        .client
        .complete_sign_in(flow_id, h.good_callback(flow_id).await)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SignInErrorKind::KeyFetchFailure);
    assert!(err.is_transient());
    assert!(!err.is_security_violation());
}

#[tokio::test]
async fn nonce_from_another_flow_is_rejected() {
    let h = Harness::new();
    let first = h.begin().await;
    let second = h.begin().await;
    let replayed = h.claims(first).await;
    h.provider.respond_with_id_token(&sign(&replayed));

    let err = h
        .client
        .complete_sign_in(second, h.good_callback(second).await)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SignInErrorKind::NonceMismatch);
}

#[tokio::test]
async fn missing_id_token_is_malformed() {
    let h = Harness::new();
    let flow_id = h.begin().await;
    h.provider
        .respond_with(200, r#"{"access_token":"ya29.access","token_type":"Bearer"}"#);

    let err = h
        .client
        .complete_sign_in(flow_id, h.good_callback(flow_id).await)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SignInErrorKind::MalformedToken);
}

#[tokio::test(start_paused = true)]
async fn slow_token_endpoint_expires_flow() {
    let mut h = Harness::new();
    let flow_id = h.begin().await;
    h.provider
        .respond_with_id_token(&sign(&h.claims(flow_id).await));
    h.provider.delay_token_endpoint(Duration::from_secs(60));

    let err = h
        .client
        .complete_sign_in(flow_id, h.good_callback(flow_id).await)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SignInErrorKind::FlowExpired);
    assert_eq!(h.client.flow_status(flow_id).await.unwrap(), FlowStatus::Expired);
    assert_eq!(h.terminal_events(flow_id).len(), 1);
}

#[tokio::test]
async fn late_callback_after_cancel_emits_nothing() {
    let mut h = Harness::new();
    let flow_id = h.begin().await;
    let callback = h.good_callback(flow_id).await;

    assert!(h.client.cancel_sign_in(flow_id).await);
    let err = h
        .client
        .complete_sign_in(flow_id, callback)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SignInErrorKind::UnknownFlow);
    assert_eq!(h.terminal_events(flow_id).len(), 1);
}

#[tokio::test]
async fn callback_from_redirect_url() {
    let h = Harness::new();
    let flow_id = h.begin().await;
    h.provider
        .respond_with_id_token(&sign(&h.claims(flow_id).await));
    let flow = h.store().get(flow_id).await.unwrap();

    let redirect = format!("app://cb?state={}&code=goodcode&scope=openid+email", flow.state);
    let params = CallbackParams::from_redirect_url(&redirect).unwrap();

    assert!(h.client.complete_sign_in(flow_id, params).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_flows_are_independent() {
    let provider = ProviderStub::new();
    let clock = Arc::new(ManualClock::starting_now());
    let core = CoreConfig::builder()
        .http_client(provider.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    let client = Arc::new(SignInClient::new(&core));

    // Every flow gets the same token; only the flow whose nonce it carries
    // can accept it.
    let mut flows = Vec::new();
    for _ in 0..8 {
        flows.push(client.begin_sign_in(config()).await.unwrap().0);
    }
    let chosen = client.token_store().get(flows[3]).await.unwrap();
    let now = clock.now().timestamp();
    provider.respond_with_id_token(&sign(&json!({
        "iss": ISSUER,
        "sub": "1234",
        "aud": "abc",
        "exp": now + 3600,
        "nonce": chosen.nonce,
    })));

    let handles: Vec<_> = flows
        .iter()
        .map(|&flow_id| {
            let client = client.clone();
            tokio::spawn(async move {
                let flow = client.token_store().get(flow_id).await.unwrap();
                client
                    .complete_sign_in(flow_id, CallbackParams::new(flow.state, "goodcode"))
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert_eq!(e.kind(), SignInErrorKind::NonceMismatch),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(
        client.flow_status(flows[3]).await.unwrap(),
        FlowStatus::Completed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_callbacks_yield_one_outcome() {
    let provider = ProviderStub::new();
    let clock = Arc::new(ManualClock::starting_now());
    let core = CoreConfig::builder()
        .http_client(provider.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    let client = Arc::new(SignInClient::new(&core));
    let mut events = client.subscribe();

    let (flow_id, _) = client.begin_sign_in(config()).await.unwrap();
    let flow = client.token_store().get(flow_id).await.unwrap();
    provider.respond_with_id_token(&sign(&json!({
        "iss": ISSUER,
        "sub": "1234",
        "aud": "abc",
        "exp": clock.now().timestamp() + 3600,
        "nonce": flow.nonce,
    })));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            let params = CallbackParams::new(flow.state.clone(), "goodcode");
            tokio::spawn(async move { client.complete_sign_in(flow_id, params).await })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert_eq!(e.kind(), SignInErrorKind::UnknownFlow),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(provider.token_requests.load(Ordering::SeqCst), 1);

    let mut terminal = 0;
    while let Ok(event) = events.try_recv() {
        if event.is_terminal() {
            terminal += 1;
        }
    }
    assert_eq!(terminal, 1);
}

#[tokio::test]
async fn sweeper_expires_flows_in_background() {
    let mut h = Harness::new();
    let flow_id = h.begin().await;
    h.clock.advance(chrono::Duration::seconds(31));

    assert_eq!(h.client.sweep_expired().await, 1);
    assert_eq!(h.client.flow_status(flow_id).await.unwrap(), FlowStatus::Expired);

    // Terminal flows are evicted once the retention window has passed
    h.clock.advance(chrono::Duration::minutes(11));
    h.client.sweep_expired().await;
    assert!(h.client.flow_status(flow_id).await.is_err());

    let terminal = h.terminal_events(flow_id);
    assert_eq!(terminal.len(), 1);
    assert!(matches!(
        &terminal[0],
        SignInEvent::LoginError { kind, .. } if kind == "FlowExpired"
    ));
}
