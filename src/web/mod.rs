//! Embedded web backend. When hosted on the controller, the app-center
//! infrastructure proxies `/appcenter/Cisco/CLUS/*` requests here, so the
//! handlers register the full proxied paths and reply with JSON only.

pub mod api;

use actix_web::web::{self, Data};
use actix_web::{App, HttpServer};
use tokio::task;

use crate::apic::{ApicClient, DeploymentMode};
use crate::config;

#[derive(Clone)]
pub struct AppState {
    pub client: ApicClient,
    pub mode: DeploymentMode,
}

pub fn start(state: AppState) {
    task::spawn_blocking(move || {
        let bind_address = config::get_bind_address();
        log::info!("Starting web server on {}", bind_address);
        let sys = actix_rt::System::new();
        let state = Data::new(state);
        sys.block_on(async {
            HttpServer::new(move || {
                App::new()
                    .app_data(state.clone())
                    .configure(api::routes)
                    .default_service(web::route().to(api::not_found))
            })
            .bind(bind_address.as_str())
            .unwrap()
            .run()
            .await
        })
        .expect("Failed to start Web server");
    });
}
