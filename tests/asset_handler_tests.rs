use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use exo_gate::{
    AppConfig, AppState, MockStorageService, create_router,
    error::StoreError,
    models::{AssetKind, DecisionView, ExerciseRow, ProfileRow, RefusalBody, Visibility},
    repository::{Repository, RepositoryState},
};
use std::{collections::HashMap, sync::Arc};
use tower::util::ServiceExt;
use uuid::Uuid;

const MOCK_PDF: &[u8] = b"%PDF-1.4 mock body";

// --- Stub Repository ---

#[derive(Default)]
struct StubRepository {
    exercise: Option<ExerciseRow>,
    exercise_levels: Vec<Uuid>,
    profiles: HashMap<Uuid, ProfileRow>,
    profile_levels: HashMap<Uuid, Vec<Uuid>>,
    asset_key: Option<String>,
    fail: bool,
}

#[async_trait]
impl Repository for StubRepository {
    async fn get_profile(&self, id: Uuid) -> Result<Option<ProfileRow>, StoreError> {
        if self.fail {
            return Err(StoreError::Query(sqlx::Error::PoolTimedOut));
        }
        Ok(self.profiles.get(&id).cloned())
    }
    async fn get_profile_levels(&self, profile_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        if self.fail {
            return Err(StoreError::Query(sqlx::Error::PoolTimedOut));
        }
        Ok(self.profile_levels.get(&profile_id).cloned().unwrap_or_default())
    }
    async fn get_exercise(&self, _id: Uuid) -> Result<Option<ExerciseRow>, StoreError> {
        if self.fail {
            return Err(StoreError::Query(sqlx::Error::PoolTimedOut));
        }
        Ok(self.exercise.clone())
    }
    async fn get_exercise_levels(&self, _exercise_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        if self.fail {
            return Err(StoreError::Query(sqlx::Error::PoolTimedOut));
        }
        Ok(self.exercise_levels.clone())
    }
    async fn get_asset_key(
        &self,
        _exercise_id: Uuid,
        _kind: AssetKind,
        _index: i32,
    ) -> Result<Option<String>, StoreError> {
        if self.fail {
            return Err(StoreError::Query(sqlx::Error::PoolTimedOut));
        }
        Ok(self.asset_key.clone())
    }
}

// --- Scenario Builders ---

fn exercise(id: Uuid, visibility: Visibility) -> ExerciseRow {
    ExerciseRow {
        id,
        chapter_id: Uuid::new_v4(),
        visibility,
    }
}

fn profile(id: Uuid, role: &str, is_active: bool) -> ProfileRow {
    ProfileRow {
        id,
        email: format!("{}@test.com", role),
        role: role.to_string(),
        is_active,
        subscription_expires_at: None,
    }
}

fn app(repo: StubRepository, storage: MockStorageService) -> axum::Router {
    let state = AppState {
        repo: Arc::new(repo) as RepositoryState,
        storage: Arc::new(storage),
        // Default config runs Env::Local, enabling the x-user-id bypass the
        // tests authenticate with.
        config: AppConfig::default(),
    };
    create_router(state)
}

fn asset_uri(exercise_id: Uuid) -> String {
    format!("/exercises/{}/assets/statement/0", exercise_id)
}

fn get(uri: &str, user: Option<Uuid>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(id) = user {
        builder = builder.header("x-user-id", id.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn refusal(response: axum::response::Response) -> RefusalBody {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// --- Asset Endpoint: Grants ---

#[tokio::test]
async fn public_asset_streams_to_anonymous() {
    let exercise_id = Uuid::new_v4();
    let repo = StubRepository {
        exercise: Some(exercise(exercise_id, Visibility::Public)),
        asset_key: Some(format!("exercises/{}/statement-0.pdf", exercise_id)),
        ..Default::default()
    };

    let response = app(repo, MockStorageService::new())
        .oneshot(get(&asset_uri(exercise_id), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "private, max-age=300"
    );
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/pdf"
    );
    assert_eq!(body_bytes(response).await, MOCK_PDF);
}

#[tokio::test]
async fn signed_url_never_reaches_the_wire() {
    let exercise_id = Uuid::new_v4();
    let repo = StubRepository {
        exercise: Some(exercise(exercise_id, Visibility::Public)),
        asset_key: Some("exercises/key.pdf".to_string()),
        ..Default::default()
    };

    let response = app(repo, MockStorageService::new())
        .oneshot(get(&asset_uri(exercise_id), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // No redirect, and no header value leaks the store's native URL.
    assert!(response.headers().get("location").is_none());
    for value in response.headers().values() {
        let value = value.to_str().unwrap_or("");
        assert!(!value.contains("mock-bucket"));
        assert!(!value.contains("signature="));
    }
    let body = body_bytes(response).await;
    let body_text = String::from_utf8_lossy(&body);
    assert!(!body_text.contains("mock-bucket"));
    assert!(!body_text.contains("signature="));
}

#[tokio::test]
async fn restricted_asset_grants_matching_student() {
    let exercise_id = Uuid::new_v4();
    let student_id = Uuid::new_v4();
    let level = Uuid::new_v4();

    let repo = StubRepository {
        exercise: Some(exercise(exercise_id, Visibility::Restricted)),
        exercise_levels: vec![level, Uuid::new_v4()],
        profiles: HashMap::from([(student_id, profile(student_id, "student", true))]),
        profile_levels: HashMap::from([(student_id, vec![level])]),
        asset_key: Some("exercises/key.pdf".to_string()),
        ..Default::default()
    };

    let response = app(repo, MockStorageService::new())
        .oneshot(get(&asset_uri(exercise_id), Some(student_id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, MOCK_PDF);
}

// --- Asset Endpoint: Refusals ---

#[tokio::test]
async fn restricted_asset_denies_anonymous_with_401() {
    let exercise_id = Uuid::new_v4();
    let repo = StubRepository {
        exercise: Some(exercise(exercise_id, Visibility::Restricted)),
        asset_key: Some("exercises/key.pdf".to_string()),
        ..Default::default()
    };

    let response = app(repo, MockStorageService::new())
        .oneshot(get(&asset_uri(exercise_id), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = refusal(response).await;
    assert_eq!(body.error, "unauthorized");
    assert_eq!(body.reason, "authentication_required");
}

#[tokio::test]
async fn level_mismatch_collapses_to_404_for_students() {
    let exercise_id = Uuid::new_v4();
    let student_id = Uuid::new_v4();

    let repo = StubRepository {
        exercise: Some(exercise(exercise_id, Visibility::Restricted)),
        exercise_levels: vec![Uuid::new_v4()],
        profiles: HashMap::from([(student_id, profile(student_id, "student", true))]),
        profile_levels: HashMap::from([(student_id, vec![Uuid::new_v4()])]),
        asset_key: Some("exercises/key.pdf".to_string()),
        ..Default::default()
    };

    let response = app(repo, MockStorageService::new())
        .oneshot(get(&asset_uri(exercise_id), Some(student_id)))
        .await
        .unwrap();

    // The wire never says "level mismatch": denial and non-existence look
    // identical to a non-admin caller.
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = refusal(response).await;
    assert_eq!(body.error, "not_found");
    assert_eq!(body.reason, "not_found");
}

#[tokio::test]
async fn expired_subscription_collapses_to_404_for_students() {
    let exercise_id = Uuid::new_v4();
    let student_id = Uuid::new_v4();
    let level = Uuid::new_v4();

    let mut expired = profile(student_id, "student", true);
    expired.subscription_expires_at = Some(Utc::now() - Duration::days(1));

    let repo = StubRepository {
        exercise: Some(exercise(exercise_id, Visibility::Restricted)),
        exercise_levels: vec![level],
        profiles: HashMap::from([(student_id, expired)]),
        profile_levels: HashMap::from([(student_id, vec![level])]),
        asset_key: Some("exercises/key.pdf".to_string()),
        ..Default::default()
    };

    let response = app(repo, MockStorageService::new())
        .oneshot(get(&asset_uri(exercise_id), Some(student_id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(refusal(response).await.reason, "not_found");
}

#[tokio::test]
async fn unknown_exercise_is_indistinguishable_from_denial_for_students() {
    let student_id = Uuid::new_v4();
    let repo = StubRepository {
        exercise: None,
        profiles: HashMap::from([(student_id, profile(student_id, "student", true))]),
        ..Default::default()
    };

    let response = app(repo, MockStorageService::new())
        .oneshot(get(&asset_uri(Uuid::new_v4()), Some(student_id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = refusal(response).await;
    assert_eq!(body.error, "not_found");
    assert_eq!(body.reason, "not_found");
}

#[tokio::test]
async fn unknown_exercise_demands_authentication_from_anonymous() {
    let repo = StubRepository::default();

    let response = app(repo, MockStorageService::new())
        .oneshot(get(&asset_uri(Uuid::new_v4()), None))
        .await
        .unwrap();

    // Anonymous callers cannot probe existence: missing and restricted both
    // answer 401.
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_sees_which_link_was_missing() {
    let exercise_id = Uuid::new_v4();
    let admin_id = Uuid::new_v4();

    // Exercise exists but the requested attachment does not.
    let repo = StubRepository {
        exercise: Some(exercise(exercise_id, Visibility::Restricted)),
        profiles: HashMap::from([(admin_id, profile(admin_id, "admin", true))]),
        asset_key: None,
        ..Default::default()
    };

    let response = app(repo, MockStorageService::new())
        .oneshot(get(&asset_uri(exercise_id), Some(admin_id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(refusal(response).await.reason, "asset_not_found");
}

// --- Asset Endpoint: Faults ---

#[tokio::test]
async fn storage_failure_maps_to_503() {
    let exercise_id = Uuid::new_v4();
    let repo = StubRepository {
        exercise: Some(exercise(exercise_id, Visibility::Public)),
        asset_key: Some("exercises/key.pdf".to_string()),
        ..Default::default()
    };

    let response = app(repo, MockStorageService::new_failing())
        .oneshot(get(&asset_uri(exercise_id), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = refusal(response).await;
    assert_eq!(body.error, "unavailable");
    assert_eq!(body.reason, "transient");
}

#[tokio::test]
async fn store_fault_maps_to_503_not_404() {
    let repo = StubRepository {
        fail: true,
        ..Default::default()
    };

    let response = app(repo, MockStorageService::new())
        .oneshot(get(&asset_uri(Uuid::new_v4()), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// --- Admin Decision Probe ---

fn probe_uri(exercise_id: Uuid, principal: Option<Uuid>) -> String {
    match principal {
        Some(id) => format!("/admin/entitlements/{}?principal={}", exercise_id, id),
        None => format!("/admin/entitlements/{}", exercise_id),
    }
}

#[tokio::test]
async fn probe_rejects_students_with_403() {
    let student_id = Uuid::new_v4();
    let repo = StubRepository {
        profiles: HashMap::from([(student_id, profile(student_id, "student", true))]),
        ..Default::default()
    };

    let response = app(repo, MockStorageService::new())
        .oneshot(get(&probe_uri(Uuid::new_v4(), None), Some(student_id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(refusal(response).await.reason, "admin_required");
}

#[tokio::test]
async fn probe_rejects_anonymous_with_401() {
    let response = app(StubRepository::default(), MockStorageService::new())
        .oneshot(get(&probe_uri(Uuid::new_v4(), None), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn probe_reports_the_specific_reason_hidden_from_the_wire() {
    let exercise_id = Uuid::new_v4();
    let admin_id = Uuid::new_v4();
    let student_id = Uuid::new_v4();

    // Inactive student profile: the asset endpoint would answer a collapsed
    // 404, the probe names the real reason.
    let repo = StubRepository {
        exercise: Some(exercise(exercise_id, Visibility::Restricted)),
        exercise_levels: vec![Uuid::new_v4()],
        profiles: HashMap::from([
            (admin_id, profile(admin_id, "admin", true)),
            (student_id, profile(student_id, "student", false)),
        ]),
        ..Default::default()
    };

    let response = app(repo, MockStorageService::new())
        .oneshot(get(
            &probe_uri(exercise_id, Some(student_id)),
            Some(admin_id),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let view: DecisionView = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(!view.granted);
    assert_eq!(view.reason.as_deref(), Some("inactive_profile"));
    assert_eq!(view.principal_id, Some(student_id));
}

#[tokio::test]
async fn probe_names_missing_exercises_for_admins() {
    let admin_id = Uuid::new_v4();
    let repo = StubRepository {
        exercise: None,
        profiles: HashMap::from([(admin_id, profile(admin_id, "admin", true))]),
        ..Default::default()
    };

    let response = app(repo, MockStorageService::new())
        .oneshot(get(&probe_uri(Uuid::new_v4(), None), Some(admin_id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(refusal(response).await.reason, "exercise_not_found");
}
