mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use common::FakeClaims;
use free_packages::accounts::ExecutorConfig;
use free_packages::api::create_router;
use free_packages::db::Database;
use free_packages::host::FreePackages;
use free_packages::models::*;
use serde_json::{json, Value};

fn service() -> FreePackages {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    FreePackages::new(db, Arc::new(FakeClaims::default()), ExecutorConfig::default())
}

fn setup() -> TestServer {
    TestServer::new(create_router(service())).expect("Failed to create test server")
}

async fn enable(server: &TestServer, account: &str, config: Value) {
    server
        .put(&format!("/api/v1/accounts/{}/config", account))
        .json(&config)
        .await
        .assert_status_ok();
}

// ============================================================
// Health and status
// ============================================================

mod status {
    use super::*;

    #[tokio::test]
    async fn health_returns_ok() {
        let server = setup();

        let response = server.get("/api/v1/health").await;

        response.assert_status_ok();
        response.assert_json(&json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn fresh_service_reports_sequence_zero_and_no_accounts() {
        let server = setup();

        let response = server.get("/api/v1/status").await;

        response.assert_status_ok();
        let report: StatusReport = response.json();
        assert_eq!(report.cursor.last_sequence, 0);
        assert!(report.accounts.is_empty());
    }

    #[tokio::test]
    async fn cursor_reflects_committed_batches() {
        let service = service();
        service
            .db()
            .commit_cursor(31, &ClassificationDelta::default())
            .unwrap();
        let server = TestServer::new(create_router(service)).unwrap();

        let summary: CursorSummary = server.get("/api/v1/cursor").await.json();

        assert_eq!(summary.last_sequence, 31);
    }
}

// ============================================================
// Account configuration
// ============================================================

mod accounts {
    use super::*;

    #[tokio::test]
    async fn enabling_an_account_starts_claiming() {
        let server = setup();

        let response = server
            .put("/api/v1/accounts/alpha/config")
            .json(&json!({ "enabled": true, "hourlyLimit": 5 }))
            .await;

        response.assert_status_ok();
        response.assert_json(&json!({ "account_id": "alpha", "enabled": true }));

        let status: AccountStatus = server.get("/api/v1/accounts/alpha").await.json();
        assert_eq!(status.state, OrchestratorState::Active);
        assert_eq!(status.hourly_limit, Some(5));
    }

    #[tokio::test]
    async fn plugin_property_names_are_accepted() {
        let server = setup();

        enable(
            &server,
            "alpha",
            json!({
                "EnableFreePackages": true,
                "FreePackagesPerHour": 2,
                "FreePackagesFilters": [{ "Types": ["package"] }, { "Tags": ["co-op"] }],
            }),
        )
        .await;

        let status: AccountStatus = server.get("/api/v1/accounts/alpha").await.json();
        assert_eq!(status.rules, 2);
        assert_eq!(status.hourly_limit, Some(2));
    }

    #[tokio::test]
    async fn zero_hourly_limit_is_rejected() {
        let server = setup();

        let response = server
            .put("/api/v1/accounts/alpha/config")
            .json(&json!({ "enabled": true, "hourlyLimit": 0 }))
            .await;

        response.assert_status_bad_request();
        assert!(response.text().contains("hourlyLimit"));
        server
            .get("/api/v1/accounts/alpha")
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn disabled_config_stops_the_account() {
        let server = setup();
        enable(&server, "alpha", json!({ "enabled": true })).await;

        let response = server
            .put("/api/v1/accounts/alpha/config")
            .json(&json!({ "enabled": false }))
            .await;

        response.assert_json(&json!({ "account_id": "alpha", "enabled": false }));
        server
            .get("/api/v1/accounts/alpha")
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn delete_disables_the_account() {
        let server = setup();
        enable(&server, "alpha", json!({ "enabled": true })).await;

        server
            .delete("/api/v1/accounts/alpha")
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .delete("/api/v1/accounts/alpha")
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn lists_accounts_in_order() {
        let server = setup();
        enable(&server, "beta", json!({ "enabled": true })).await;
        enable(&server, "alpha", json!({ "enabled": true })).await;

        let statuses: Vec<AccountStatus> = server.get("/api/v1/accounts").await.json();

        let ids: Vec<_> = statuses.iter().map(|s| s.account_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
    }
}

// ============================================================
// Host notifications
// ============================================================

mod notifications {
    use super::*;

    #[tokio::test]
    async fn activity_pauses_accounts_that_opt_in() {
        let server = setup();
        enable(&server, "alpha", json!({ "enabled": true, "pauseOnActivity": true })).await;

        server
            .post("/api/v1/accounts/alpha/activity")
            .json(&json!({ "state": "busy" }))
            .await
            .assert_status(StatusCode::ACCEPTED);

        let status: AccountStatus = server.get("/api/v1/accounts/alpha").await.json();
        assert_eq!(status.state, OrchestratorState::Paused);
    }

    #[tokio::test]
    async fn license_list_replaces_owned_entries() {
        let server = setup();
        enable(&server, "alpha", json!({ "enabled": true })).await;

        server
            .put("/api/v1/accounts/alpha/licenses")
            .json(&json!({ "entries": [10, 11, 12] }))
            .await
            .assert_status(StatusCode::ACCEPTED);

        let status: AccountStatus = server.get("/api/v1/accounts/alpha").await.json();
        assert_eq!(status.owned, 3);
    }

    #[tokio::test]
    async fn license_list_for_unknown_account_is_not_found() {
        let server = setup();

        server
            .put("/api/v1/accounts/ghost/licenses")
            .json(&json!({ "entries": [1] }))
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn claims_start_empty() {
        let server = setup();

        let records: Vec<ClaimRecord> = server.get("/api/v1/accounts/alpha/claims").await.json();

        assert!(records.is_empty());
    }
}

// ============================================================
// Commands
// ============================================================

mod commands {
    use super::*;

    #[tokio::test]
    async fn cursor_command_reports_the_sequence() {
        let server = setup();

        let response = server
            .post("/api/v1/command")
            .json(&json!({ "message": "freepackages cursor" }))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert!(body["response"]
            .as_str()
            .unwrap()
            .starts_with("Cursor at sequence 0"));
    }

    #[tokio::test]
    async fn status_command_for_an_account() {
        let server = setup();
        enable(&server, "alpha", json!({ "enabled": true, "hourlyLimit": 3 })).await;

        let body: Value = server
            .post("/api/v1/command")
            .json(&json!({ "message": "status alpha" }))
            .await
            .json();

        assert!(body["response"]
            .as_str()
            .unwrap()
            .starts_with("alpha: active, 0/3 this hour"));
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let server = setup();

        server
            .post("/api/v1/command")
            .json(&json!({ "message": "reboot everything" }))
            .await
            .assert_status_bad_request();
    }
}

// ============================================================
// Security - API Key Authentication
// ============================================================

mod security_auth {
    use super::*;
    use free_packages::api::{create_router_with_config, SecurityConfig};

    fn setup_with_auth(api_key: &str) -> TestServer {
        let app = create_router_with_config(service(), SecurityConfig::with_api_key(api_key));
        TestServer::new(app).expect("Failed to create test server")
    }

    #[tokio::test]
    async fn health_endpoint_is_accessible_without_auth() {
        let server = setup_with_auth("test-secret-key");

        server.get("/api/v1/health").await.assert_status_ok();
    }

    #[tokio::test]
    async fn protected_endpoint_requires_auth() {
        let server = setup_with_auth("test-secret-key");

        let response = server.get("/api/v1/status").await;

        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_endpoint_accepts_valid_bearer_token() {
        let server = setup_with_auth("test-secret-key");

        let response = server
            .get("/api/v1/status")
            .add_header("Authorization", "Bearer test-secret-key")
            .await;

        response.assert_status_ok();
    }

    #[tokio::test]
    async fn protected_endpoint_rejects_invalid_bearer_token() {
        let server = setup_with_auth("test-secret-key");

        let response = server
            .get("/api/v1/status")
            .add_header("Authorization", "Bearer wrong-key")
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_endpoint_rejects_malformed_auth_header() {
        let server = setup_with_auth("test-secret-key");

        let response = server
            .put("/api/v1/accounts/alpha/config")
            .add_header("Authorization", "Basic dXNlcjpwYXNz")
            .json(&json!({ "enabled": true }))
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
    }
}
