//! Handlers for the hosted app endpoints: liveness probe, tenant listing and
//! the reverse-DNS resolve backend. Every reply is JSON, including errors,
//! so the UI side never has to parse an HTML error page.

use actix_web::web::{self, Data, Query};
use actix_web::{HttpResponse, Responder};
use serde::Deserialize;
use serde_json::json;
use tokio::task;

use super::AppState;
use crate::apic::SessionContext;
use crate::apic::filters::QueryFilters;
use crate::apic::types::class_attributes;
use crate::db::new_connection_result;
use crate::dns::resolver::{self, ResolveFailure};

/// Route table. A registered path hit with the wrong method answers 405;
/// everything else falls through to the app-level 404 default.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/appcenter/Cisco/CLUS/is_ready.json")
            .route(web::get().to(is_ready))
            .default_service(web::route().to(method_not_allowed)),
    )
    .service(
        web::resource("/appcenter/Cisco/CLUS/tenant.json")
            .route(web::get().to(tenants))
            .default_service(web::route().to(method_not_allowed)),
    )
    .service(
        web::resource("/appcenter/Cisco/CLUS/resolve.json")
            .route(web::get().to(resolve))
            .default_service(web::route().to(method_not_allowed)),
    );
}

/// Liveness probe used by the hosting side before it enables the app.
async fn is_ready() -> impl Responder {
    HttpResponse::Ok().json(json!({"status": "200", "text": "It's alive !"}))
}

/// Tenant names visible to the session, for the UI's scope selector.
async fn tenants(state: Data<AppState>) -> impl Responder {
    let session = restored_session(&state).await;
    match state
        .client
        .get_class(&session, "fvTenant", &QueryFilters::new(), None)
        .await
    {
        Ok(objects) => {
            let names: Vec<String> = objects
                .iter()
                .filter_map(|obj| {
                    let (_, attributes) = class_attributes(obj)?;
                    attributes
                        .get("name")
                        .and_then(|name| name.as_str())
                        .map(str::to_string)
                })
                .collect();
            HttpResponse::Ok().json(json!({"tenants": names}))
        }
        Err(e) => {
            log::error!("tenant listing failed: {}", e);
            HttpResponse::InternalServerError().json(json!({"error": e.to_string()}))
        }
    }
}

#[derive(Deserialize)]
struct ResolveQuery {
    ip: Option<String>,
}

/// Reverse-DNS resolve backend for the table's per-row resolve control.
async fn resolve(query: Query<ResolveQuery>) -> impl Responder {
    let Some(ip) = query.ip.clone().filter(|ip| !ip.is_empty()) else {
        return HttpResponse::BadRequest()
            .json(json!({"error": "ip parameter required for resolve"}));
    };

    match resolver::resolve_with_cache(&ip).await {
        Ok(resolution) => HttpResponse::Ok().json(json!({
            "ip": resolution.ip,
            "ptr": resolution.ptr,
            "cache": resolution.cache,
        })),
        Err(ResolveFailure::Internal) => {
            HttpResponse::InternalServerError().json(json!({"error": "Internal server error"}))
        }
        Err(e) => {
            log::error!("resolve failed for {}: {}", ip, e);
            HttpResponse::InternalServerError().json(json!({"error": e.to_string()}))
        }
    }
}

/// Fallback for every unregistered path.
pub async fn not_found() -> impl Responder {
    HttpResponse::NotFound().json(json!({"error": "URL not found"}))
}

/// Default for a registered path hit with a method it does not serve.
async fn method_not_allowed() -> impl Responder {
    HttpResponse::MethodNotAllowed().json(json!({"error": "Method not allowed"}))
}

/// Session for controller queries, restored from the persisted token pair.
async fn restored_session(state: &AppState) -> SessionContext {
    let mode = state.mode;
    let restored = task::spawn_blocking(move || {
        let mut session = SessionContext::new(mode);
        match new_connection_result() {
            Ok(conn) => {
                session.restore(&conn);
            }
            Err(e) => log::error!("Failed to open database: {}", e),
        }
        session
    })
    .await;

    match restored {
        Ok(session) => session,
        Err(e) => {
            log::error!("session restore task failed: {}", e);
            SessionContext::new(mode)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{App, test};

    #[actix_web::test]
    async fn test_is_ready_reply() {
        let app = test::init_service(App::new().configure(routes)).await;
        let req = test::TestRequest::get()
            .uri("/appcenter/Cisco/CLUS/is_ready.json")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "200");
        assert_eq!(body["text"], "It's alive !");
    }

    #[actix_web::test]
    async fn test_resolve_requires_ip() {
        let app = test::init_service(App::new().configure(routes)).await;

        for uri in [
            "/appcenter/Cisco/CLUS/resolve.json",
            "/appcenter/Cisco/CLUS/resolve.json?ip=",
        ] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: serde_json::Value = test::read_body_json(resp).await;
            assert_eq!(body["error"], "ip parameter required for resolve");
        }
    }

    #[actix_web::test]
    async fn test_wrong_method_on_registered_path() {
        let app = test::init_service(App::new().configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/appcenter/Cisco/CLUS/resolve.json?ip=10.0.0.5")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Method not allowed");
    }

    #[actix_web::test]
    async fn test_unknown_url_returns_json_not_found() {
        let app = test::init_service(
            App::new()
                .configure(routes)
                .default_service(web::route().to(not_found)),
        )
        .await;

        let req = test::TestRequest::get().uri("/nope").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "URL not found");
    }

    #[actix_web::test]
    async fn test_resolve_without_nameservers_is_500() {
        let db_path = std::env::temp_dir().join(format!("clus-test-{}.db", std::process::id()));
        // No other test resolves DATABASE_URL, so the path cached on first
        // connect is ours. Environment writes are unsafe in this edition.
        unsafe { std::env::set_var("DATABASE_URL", &db_path) };
        {
            let conn = rusqlite::Connection::open(&db_path).unwrap();
            crate::db::create_tables(&conn).unwrap();
        }

        let app = test::init_service(App::new().configure(routes)).await;
        let req = test::TestRequest::get()
            .uri("/appcenter/Cisco/CLUS/resolve.json?ip=10.0.0.5")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "no dnsProv configured on apic");

        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", db_path.display(), suffix));
        }
    }
}
