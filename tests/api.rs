// End-to-end tests of the REST API against an in-memory database
#![cfg(feature = "server")]

use aaps_registry::api::{router, AppState};
use aaps_registry::entities::user;
use aaps_registry::{db, Policy};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    admin: String,
    analyst: String,
}

fn app_with(policy: Policy) -> TestApp {
    let conn = db::open_in_memory().unwrap();
    let (_, admin) = user::create(&conn, "admin", true).unwrap();
    let (_, analyst) = user::create(&conn, "analyst", false).unwrap();

    TestApp {
        router: router(AppState::new(conn, policy)),
        admin,
        analyst,
    }
}

fn app() -> TestApp {
    app_with(Policy::default())
}

impl TestApp {
    async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Token {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send("GET", uri, None, None).await
    }

    async fn post_as_admin(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send("POST", uri, Some(&self.admin), Some(body)).await
    }
}

fn coapat_poa() -> Value {
    json!({
        "epsa": "COAPAT",
        "year": 2023,
        "order": 1,
        "incomes": [{"income_type": "otros", "description": "x", "value": 100.0}]
    })
}

#[tokio::test]
async fn test_nested_poa_create_creates_epsa() {
    let app = app();

    let (status, poa) = app.post_as_admin("/api/poas", coapat_poa()).await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(poa["id"].as_i64().is_some());
    assert_eq!(poa["epsa"], "COAPAT");
    assert_eq!(poa["incomes"], json!([{"income_type": "otros", "description": "x", "value": 100.0}]));

    let (_, epsas) = app.get("/api/epsas").await;
    assert_eq!(epsas.as_array().unwrap().len(), 1);
    assert_eq!(epsas[0]["code"], "COAPAT");
}

#[tokio::test]
async fn test_duplicate_poa_is_bad_request() {
    let app = app();
    app.post_as_admin("/api/poas", coapat_poa()).await;

    let (status, body) = app.post_as_admin("/api/poas", coapat_poa()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({"non_field_errors": ["The fields epsa, year, order must make a unique set."]})
    );
    let (_, poas) = app.get("/api/poas").await;
    assert_eq!(poas.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_plan_goals_created() {
    let app = app();
    let goals: Vec<Value> = (2022..2027)
        .map(|year| json!({"year": year, "description": "Cobertura", "value": 90.0, "unit": "%"}))
        .collect();

    let (status, plan) = app
        .post_as_admin("/api/plans", json!({"epsa": "ELAPAS", "year": 2021, "plan_type": "pdq", "goals": goals}))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(plan["goals"].as_array().unwrap().len(), 5);

    let (status, fetched) = app.get(&format!("/api/plans/{}", plan["id"])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, plan);
}

#[tokio::test]
async fn test_permission_matrix() {
    let app = app();

    let (status, _) = app.get("/api/epsas").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.send("POST", "/api/poas", None, Some(coapat_poa())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Authentication credentials were not provided.");

    let (status, body) = app
        .send("POST", "/api/poas", Some(&app.analyst), Some(coapat_poa()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], "You do not have permission to perform this action.");

    let (status, poa) = app.post_as_admin("/api/poas", coapat_poa()).await;
    assert_eq!(status, StatusCode::CREATED);

    let uri = format!("/api/poas/{}", poa["id"]);
    let (status, _) = app.send("GET", &uri, Some(&app.analyst), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.send("DELETE", &uri, Some(&app.analyst), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.send("DELETE", &uri, Some(&app.admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = app.get(&uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"detail": "Not found."}));
}

#[tokio::test]
async fn test_closed_policy_requires_authentication_for_reads() {
    let app = app_with(Policy {
        anonymous_read: false,
    });

    let (status, _) = app.get("/api/epsas").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.send("GET", "/api/epsas", Some(&app.analyst), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, health) = app.get("/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
}

#[tokio::test]
async fn test_unknown_token_rejected() {
    let app = app();

    let (status, body) = app.send("GET", "/api/epsas", Some("not-a-key"), None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid token.");
}

#[tokio::test]
async fn test_nested_validation_errors() {
    let app = app();

    let (status, body) = app
        .post_as_admin(
            "/api/poas",
            json!({
                "year": 2023,
                "order": 7,
                "incomes": [{"description": "ok", "value": 1.0}, {"income_type": "bad", "description": "y"}]
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["epsa"], json!(["This field is required."]));
    assert_eq!(body["order"], json!(["Ensure this value is less than or equal to 5."]));
    assert_eq!(body["incomes"][0], json!({}));
    assert_eq!(body["incomes"][1]["income_type"], json!(["\"bad\" is not a valid choice."]));
    assert_eq!(body["incomes"][1]["value"], json!(["This field is required."]));
    assert_eq!(app.get("/api/epsas").await.1, json!([]));
}

#[tokio::test]
async fn test_malformed_json() {
    let app = app();
    let request = Request::builder()
        .method("POST")
        .uri("/api/epsas")
        .header(header::AUTHORIZATION, format!("Token {}", app.admin))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"code\": "))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["detail"].as_str().unwrap().starts_with("JSON parse error"));
}

#[tokio::test]
async fn test_deleting_epsa_cascades() {
    let app = app();
    app.post_as_admin("/api/poas", coapat_poa()).await;
    app.post_as_admin(
        "/api/plans",
        json!({"epsa": "COAPAT", "goals": [{"description": "Micromedición", "value": 80.0, "unit": "%"}]}),
    )
    .await;
    app.post_as_admin("/api/supply-areas", json!({"epsa": "COAPAT", "area": 12.5})).await;

    let (_, epsas) = app.get("/api/epsas").await;
    let uri = format!("/api/epsas/{}", epsas[0]["id"]);
    let (status, _) = app.send("DELETE", &uri, Some(&app.admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    for list in ["/api/poas", "/api/plans", "/api/supply-areas"] {
        assert_eq!(app.get(list).await.1, json!([]), "{list}");
    }
}

#[tokio::test]
async fn test_epsa_update_and_sparse_fields() {
    let app = app();
    let (_, created) = app
        .post_as_admin("/api/epsas", json!({"code": "SEMAPA", "name": "SEMAPA", "state": "CO"}))
        .await;
    let uri = format!("/api/epsas/{}", created["id"]);

    let (status, updated) = app
        .send(
            "PUT",
            &uri,
            Some(&app.admin),
            Some(json!({"code": "SEMAPA", "name": "SEMAPA Cochabamba", "category": "A", "state": "CO"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["category"], "A");

    let (_, only) = app.get("/api/epsas?fields=code,name").await;
    assert_eq!(only, json!([{"code": "SEMAPA", "name": "SEMAPA Cochabamba"}]));

    let (_, without) = app.get(&format!("{uri}?fields!=id,category,state")).await;
    assert_eq!(without, json!({"code": "SEMAPA", "name": "SEMAPA Cochabamba"}));
}

#[tokio::test]
async fn test_reports_filtered_by_epsa_and_year() {
    let app = app();
    app.post_as_admin("/api/variables", json!({"code": "V01", "name": "Conexiones"}))
        .await;
    for (epsa, year) in [("EPSAS", 2022), ("EPSAS", 2023), ("SAGUAPAC", 2023)] {
        let (status, _) = app
            .post_as_admin(
                "/api/variable-reports",
                json!({"epsa": epsa, "variable": "V01", "year": year, "value": 10.0}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, filtered) = app.get("/api/variable-reports?epsa=EPSAS&year=2023").await;
    assert_eq!(filtered.as_array().unwrap().len(), 1);
    assert_eq!(filtered[0]["variable"], "V01");

    let (status, body) = app.get("/api/variable-reports?year=latest").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["year"], json!(["A valid integer is required."]));
}

#[tokio::test]
async fn test_supply_area_area_from_geometry() {
    let app = app();
    app.post_as_admin("/api/epsas", json!({"code": "SAGUAPAC", "name": "SAGUAPAC"}))
        .await;

    let (status, area) = app
        .post_as_admin(
            "/api/supply-areas",
            json!({
                "epsa": "SAGUAPAC",
                "geom": {
                    "type": "MultiPolygon",
                    "coordinates": [[[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]]
                }
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    let km2 = area["area"].as_f64().unwrap();
    assert!((km2 - 12_391.0).abs() < 20.0, "area was {km2}");
    assert_eq!(area["geom"]["type"], "MultiPolygon");

    let (status, body) = app
        .post_as_admin("/api/supply-areas", json!({"epsa": "UNKNOWN"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["epsa"], json!(["Object with code=UNKNOWN does not exist."]));
}

#[tokio::test]
async fn test_back_office_is_superuser_only() {
    let app = app();
    app.post_as_admin("/api/poas", coapat_poa()).await;

    let (status, _) = app.get("/admin/poa").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.send("GET", "/admin/poa", Some(&app.analyst), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, list) = app
        .send("GET", "/admin/poa?q=coapat&year=2023", Some(&app.admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["title"], "AAPS - Planificación: POAs");
    assert_eq!(list["count"], 1);

    let (status, history) = app
        .send("GET", &format!("/admin/history/poa/{}", list["rows"][0]["id"]), Some(&app.admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history[0]["event_type"], "created");
    assert_eq!(history[0]["actor"], "admin");

    let (status, _) = app.send("GET", "/admin/unknown", Some(&app.admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_non_numeric_id_is_not_found() {
    let app = app();

    for uri in ["/api/poas/abc", "/api/epsas/1.5", "/api/sarhs/-x"] {
        let (status, body) = app.get(uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body, json!({"detail": "Not found."}), "{uri}");
    }

    let (status, body) = app.send("DELETE", "/api/poas/abc", Some(&app.admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Not found.");

    let (status, body) = app
        .send("GET", "/admin/history/poa/abc", Some(&app.admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Not found.");
}

#[tokio::test]
async fn test_explicit_null_rejected_for_defaulted_fields() {
    let app = app();

    let (status, body) = app
        .post_as_admin("/api/poas", json!({"epsa": "COAPAT", "year": null, "order": null}))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["year"], json!(["This field may not be null."]));
    assert_eq!(body["order"], json!(["This field may not be null."]));
    assert_eq!(app.get("/api/poas").await.1, json!([]));
}

#[tokio::test]
async fn test_body_without_json_content_type() {
    let app = app();
    let request = Request::builder()
        .method("POST")
        .uri("/api/epsas")
        .header(header::AUTHORIZATION, format!("Token {}", app.admin))
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(json!({"code": "SEMAPA", "name": "SEMAPA"}).to_string()))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["detail"].as_str().unwrap().starts_with("Unsupported media type"));
}

#[tokio::test]
async fn test_year_filter_only_where_records_have_a_year() {
    let app = app();
    app.post_as_admin("/api/epsas", json!({"code": "SAGUAPAC", "name": "SAGUAPAC"}))
        .await;
    app.post_as_admin("/api/supply-areas", json!({"epsa": "SAGUAPAC", "area": 3.5}))
        .await;

    for list in ["/api/supply-areas?year=1999", "/api/sarhs?year=1999"] {
        let (status, body) = app.get(list).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{list}");
        assert_eq!(body["year"], json!(["Filtering by year is not supported here."]), "{list}");
    }

    let (status, areas) = app.get("/api/supply-areas?epsa=SAGUAPAC").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(areas.as_array().unwrap().len(), 1);
    assert_eq!(app.get("/api/supply-areas?epsa=EPSAS").await.1, json!([]));
}
