mod common;

use axum::http::{Method, StatusCode};
use common::{bearer_for, TestApp};
use federation_service::models::{LocalOrganisationSettings, ProviderCredential};
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

struct Member {
    user_id: Uuid,
    org_id: Uuid,
}

/// Seed a user with a linked credential and an organisation membership.
fn seed_member(app: &TestApp) -> Member {
    let user_id = app.store.add_user("ada@example.com", Some("Ada"));
    let org_id = Uuid::new_v4();
    app.store.add_membership(org_id, user_id);
    app.store.put_settings(LocalOrganisationSettings::empty(org_id));
    app.store.put_credential(ProviderCredential::new(
        user_id,
        "oidc",
        "access-1".to_string(),
        Some("refresh-1".to_string()),
        chrono::Utc::now().timestamp() + 3600,
    ));
    Member { user_id, org_id }
}

async fn mount_profile(app: &TestApp, organisation: Value) {
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "provider-user-1",
            "email": "ada@example.com",
            "organisation": organisation
        })))
        .mount(app.provider())
        .await;
}

#[tokio::test]
async fn pull_fills_unset_fields_from_provider() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = seed_member(&app);
    let mut local = LocalOrganisationSettings::empty(member.org_id);
    local.document_timezone = Some("UTC".to_string());
    app.store.put_settings(local);

    mount_profile(&app, json!({ "id": "org-1", "name": "Acme Ltd" })).await;
    Mock::given(method("GET"))
        .and(path("/user-preferences"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "language": "de",
            "timezone": "Europe/Berlin"
        })))
        .mount(app.provider())
        .await;
    Mock::given(method("GET"))
        .and(path("/configs"))
        .and(query_param("identifier", "settings-bundle"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "id": "cfg-1",
                "organisationId": "org-1",
                "identifier": "settings-bundle",
                "payload": { "drawSignatureEnabled": false, "includeAuditLog": true }
            }]
        })))
        .mount(app.provider())
        .await;

    // Act
    let (status, body) = app
        .request(
            Method::POST,
            &format!("/federation/users/{}/settings/pull", member.user_id),
            Some(&bearer_for("ada@example.com")),
            None,
        )
        .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let settings = app.store.settings(member.org_id).expect("settings row");
    assert_eq!(settings.document_language.as_deref(), Some("de"));
    assert_eq!(settings.document_timezone.as_deref(), Some("UTC"));
    assert_eq!(settings.draw_signature_enabled, Some(false));
    assert_eq!(settings.include_audit_log, Some(true));
    assert_eq!(settings.branding_company_details.as_deref(), Some("Acme Ltd"));
}

#[tokio::test]
async fn pull_without_linked_account_reports_failure() {
    // Arrange
    let app = TestApp::spawn().await;
    let user_id = app.store.add_user("ada@example.com", None);

    // Act
    let (status, body) = app
        .request(
            Method::POST,
            &format!("/federation/users/{}/settings/pull", user_id),
            Some(&bearer_for("ada@example.com")),
            None,
        )
        .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["warning"].is_string());
}

#[tokio::test]
async fn non_root_push_creates_branding_only_record() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = seed_member(&app);
    mount_profile(
        &app,
        json!({ "id": "org-2", "name": "Acme EU", "parentId": "org-1" }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/configs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(app.provider())
        .await;
    Mock::given(method("POST"))
        .and(path("/configs"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(app.provider())
        .await;

    // Act
    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/federation/users/{}/settings", member.user_id),
            Some(&bearer_for("ada@example.com")),
            Some(json!({
                "documentLanguage": "fr",
                "brandingEnabled": true,
                "brandingCompanyDetails": "Acme EU GmbH"
            })),
        )
        .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let created = app.provider_bodies("/configs").await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["organisationId"], "org-2");
    assert_eq!(created[0]["identifier"], "settings-bundle");
    let payload = created[0]["payload"].as_object().expect("payload object");
    assert_eq!(payload["brandingEnabled"], true);
    assert_eq!(payload["brandingCompanyDetails"], "Acme EU GmbH");
    assert!(!payload.contains_key("documentLanguage"));

    let settings = app.store.settings(member.org_id).expect("settings row");
    assert_eq!(settings.document_language.as_deref(), Some("fr"));
}

#[tokio::test]
async fn root_push_updates_existing_record() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = seed_member(&app);
    mount_profile(&app, json!({ "id": "org-1", "name": "Acme Ltd" })).await;
    Mock::given(method("GET"))
        .and(path("/configs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "id": "cfg-1",
                "organisationId": "org-1",
                "identifier": "settings-bundle",
                "payload": {}
            }]
        })))
        .mount(app.provider())
        .await;
    Mock::given(method("PATCH"))
        .and(path("/configs/cfg-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(app.provider())
        .await;

    // Act
    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/federation/users/{}/settings", member.user_id),
            Some(&bearer_for("ada@example.com")),
            Some(json!({ "documentLanguage": "fr", "typedSignatureEnabled": false })),
        )
        .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let updates = app.provider_bodies("/configs/cfg-1").await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["payload"]["documentLanguage"], "fr");
    assert_eq!(updates[0]["payload"]["typedSignatureEnabled"], false);
}

#[tokio::test]
async fn failed_push_keeps_local_update() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = seed_member(&app);
    mount_profile(&app, json!({ "id": "org-1" })).await;
    Mock::given(method("GET"))
        .and(path("/configs"))
        .respond_with(ResponseTemplate::new(503))
        .mount(app.provider())
        .await;

    // Act
    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/federation/users/{}/settings", member.user_id),
            Some(&bearer_for("ada@example.com")),
            Some(json!({ "documentVisibility": "everyone" })),
        )
        .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["warning"].is_string());

    let settings = app.store.settings(member.org_id).expect("settings row");
    assert_eq!(settings.document_visibility.as_deref(), Some("everyone"));
}

#[tokio::test]
async fn update_rejects_invalid_reply_to() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = seed_member(&app);

    // Act
    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/federation/users/{}/settings", member.user_id),
            Some(&bearer_for("ada@example.com")),
            Some(json!({ "emailReplyTo": "not-an-email" })),
        )
        .await;

    // Assert
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(app.store.settings_writes(), 0);
}

#[tokio::test]
async fn update_without_membership_is_not_found() {
    // Arrange
    let app = TestApp::spawn().await;
    let user_id = app.store.add_user("ada@example.com", None);

    // Act
    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/federation/users/{}/settings", user_id),
            Some(&bearer_for("ada@example.com")),
            Some(json!({ "documentLanguage": "fr" })),
        )
        .await;

    // Assert
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn settings_routes_require_bearer_token() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = seed_member(&app);

    // Act
    let (put_status, _) = app
        .request(
            Method::PUT,
            &format!("/federation/users/{}/settings", member.user_id),
            None,
            Some(json!({ "documentLanguage": "fr" })),
        )
        .await;
    let (pull_status, _) = app
        .request(
            Method::POST,
            &format!("/federation/users/{}/settings/pull", member.user_id),
            Some("not-a-token"),
            None,
        )
        .await;

    // Assert
    assert_eq!(put_status, StatusCode::UNAUTHORIZED);
    assert_eq!(pull_status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.store.settings_writes(), 0);
    let requests = app.provider().received_requests().await.unwrap_or_default();
    assert!(requests.iter().all(|r| r.url.path() != "/auth/me"));
}

#[tokio::test]
async fn settings_of_another_user_are_forbidden() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = seed_member(&app);
    app.store.add_user("eve@example.com", None);

    // Act
    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/federation/users/{}/settings", member.user_id),
            Some(&bearer_for("eve@example.com")),
            Some(json!({ "documentLanguage": "fr" })),
        )
        .await;

    // Assert
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.store.settings_writes(), 0);
}

#[tokio::test]
async fn token_without_local_user_is_unauthorized() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = seed_member(&app);

    // Act
    let (status, _) = app
        .request(
            Method::POST,
            &format!("/federation/users/{}/settings/pull", member.user_id),
            Some(&bearer_for("stranger@example.com")),
            None,
        )
        .await;

    // Assert
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.store.user_count(), 1);
}
