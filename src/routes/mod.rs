pub mod appointments;
pub mod cash;
pub mod clients;
pub mod daily_notes;
pub mod employees;
pub mod payments;
pub mod services;

use actix_web::{web, HttpResponse};

pub fn configure(cfg: &mut web::ServiceConfig) {
    employees::configure(cfg);
    services::configure(cfg);
    appointments::configure(cfg);
    clients::configure(cfg);
    payments::configure(cfg);
    cash::configure(cfg);
    daily_notes::configure(cfg);
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/health").route(web::get().to(health)));
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().body("💅 Turnero API OK")
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}
