use actix_web::{web, HttpResponse};

use crate::{
    error::{internal, ApiError},
    models::EmployeeRow,
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/employees").service(web::resource("").route(web::get().to(list))),
    );
}

async fn list(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let rows = sqlx::query_as::<_, EmployeeRow>(
        "SELECT * FROM employees WHERE active = 1 ORDER BY name",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|err| internal("Error al obtener empleadas", err))?;

    Ok(HttpResponse::Ok().json(rows))
}
