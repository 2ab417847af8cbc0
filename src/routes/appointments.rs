use actix_web::{web, HttpResponse};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    db::{now_str, TIMESTAMP_FORMAT},
    error::{internal, ApiError},
    models::{AppointmentDetailRow, AppointmentRow, STATUS_SCHEDULED},
    routes::clients,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ClientInfo {
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentCreate {
    pub employee_id: i64,
    pub client: Option<ClientInfo>,
    pub service_id: Option<i64>,
    pub final_price: Option<f64>,
    pub final_duration_minutes: Option<i64>,
    pub notes: Option<String>,
    pub starts_at: String,
    pub ends_at: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentUpdate {
    pub status: Option<String>,
    pub notes: Option<String>,
    pub final_price: Option<f64>,
    pub final_duration_minutes: Option<i64>,
    pub starts_at: Option<String>,
    pub ends_at: Option<String>,
    pub client: Option<ClientInfo>,
}

#[derive(Debug, Deserialize)]
struct DateRange {
    from: Option<String>,
    to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSearch {
    client: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/appointments")
            .service(
                web::resource("")
                    .route(web::get().to(list))
                    .route(web::post().to(create)),
            )
            .service(web::resource("/search").route(web::get().to(search)))
            .service(
                web::resource("/{id}")
                    .route(web::patch().to(update))
                    .route(web::delete().to(delete)),
            ),
    );
}

async fn list(
    state: web::Data<AppState>,
    query: web::Query<DateRange>,
) -> Result<HttpResponse, ApiError> {
    let from = parse_date_param(query.from.as_deref())?;
    let to = parse_date_param(query.to.as_deref())?;

    let rows = list_range(&state.db, from, to)
        .await
        .map_err(|err| internal("Error al obtener turnos", err))?;

    Ok(HttpResponse::Ok().json(rows))
}

async fn search(
    state: web::Data<AppState>,
    query: web::Query<ClientSearch>,
) -> Result<HttpResponse, ApiError> {
    let term = query.client.as_deref().map(str::trim).unwrap_or_default();
    if term.chars().count() < 2 {
        return Err(ApiError::Validation(
            "Debe proporcionar al menos 2 caracteres para buscar".to_string(),
        ));
    }

    let rows = search_by_client(&state.db, term)
        .await
        .map_err(|err| internal("Error al buscar turnos", err))?;

    Ok(HttpResponse::Ok().json(rows))
}

async fn create(
    state: web::Data<AppState>,
    payload: web::Json<AppointmentCreate>,
) -> Result<HttpResponse, ApiError> {
    let appointment = create_appointment(&state.db, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(appointment))
}

async fn update(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: web::Json<AppointmentUpdate>,
) -> Result<HttpResponse, ApiError> {
    let appointment =
        update_appointment(&state.db, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(appointment))
}

async fn delete(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    delete_appointment(&state.db, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Turno eliminado correctamente" })))
}

pub async fn create_appointment(
    pool: &SqlitePool,
    input: AppointmentCreate,
) -> Result<AppointmentRow, ApiError> {
    let starts_at = parse_timestamp(&input.starts_at)
        .ok_or_else(|| ApiError::Validation("Fecha u horario inválido (ISO-8601)".to_string()))?;
    let ends_at = parse_timestamp(&input.ends_at)
        .ok_or_else(|| ApiError::Validation("Fecha u horario inválido (ISO-8601)".to_string()))?;

    let client_id = resolve_client(pool, input.client.as_ref())
        .await
        .map_err(|err| internal("Error al crear turno", err))?;

    let now = now_str();
    let result = sqlx::query(
        r#"INSERT INTO appointments
               (employee_id, client_id, service_id, final_price, final_duration_minutes,
                notes, starts_at, ends_at, status, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(input.employee_id)
    .bind(client_id)
    .bind(input.service_id)
    .bind(input.final_price.unwrap_or(0.0))
    .bind(input.final_duration_minutes.unwrap_or(60))
    .bind(&input.notes)
    .bind(&starts_at)
    .bind(&ends_at)
    .bind(STATUS_SCHEDULED)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(|err| internal("Error al crear turno", err))?;

    fetch_appointment(pool, result.last_insert_rowid())
        .await
        .map_err(|err| internal("Error al crear turno", err))?
        .ok_or_else(|| ApiError::Internal("Error al crear turno".to_string()))
}

pub async fn update_appointment(
    pool: &SqlitePool,
    id: i64,
    input: AppointmentUpdate,
) -> Result<AppointmentRow, ApiError> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM appointments WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|err| internal("Error al actualizar turno", err))?;
    if exists.is_none() {
        return Err(ApiError::NotFound("Turno no encontrado".to_string()));
    }

    let starts_at = normalize_optional(input.starts_at.as_deref())?;
    let ends_at = normalize_optional(input.ends_at.as_deref())?;

    let client_id = resolve_client(pool, input.client.as_ref())
        .await
        .map_err(|err| internal("Error al actualizar turno", err))?;

    sqlx::query(
        r#"UPDATE appointments
           SET status = COALESCE(?, status),
               notes = COALESCE(?, notes),
               final_price = COALESCE(?, final_price),
               final_duration_minutes = COALESCE(?, final_duration_minutes),
               starts_at = COALESCE(?, starts_at),
               ends_at = COALESCE(?, ends_at),
               client_id = COALESCE(?, client_id),
               updated_at = ?
           WHERE id = ?"#,
    )
    .bind(&input.status)
    .bind(&input.notes)
    .bind(input.final_price)
    .bind(input.final_duration_minutes)
    .bind(&starts_at)
    .bind(&ends_at)
    .bind(client_id)
    .bind(now_str())
    .bind(id)
    .execute(pool)
    .await
    .map_err(|err| internal("Error al actualizar turno", err))?;

    fetch_appointment(pool, id)
        .await
        .map_err(|err| internal("Error al actualizar turno", err))?
        .ok_or_else(|| ApiError::NotFound("Turno no encontrado".to_string()))
}

pub async fn delete_appointment(pool: &SqlitePool, id: i64) -> Result<(), ApiError> {
    // Payments referencing the appointment are left in place; they drop out
    // of every report because the joins no longer reach them.
    let result = sqlx::query("DELETE FROM appointments WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|err| internal("Error al eliminar turno", err))?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("Turno no encontrado".to_string()));
    }
    Ok(())
}

pub async fn list_range(
    pool: &SqlitePool,
    from: Option<String>,
    to: Option<String>,
) -> Result<Vec<AppointmentDetailRow>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentDetailRow>(
        r#"SELECT a.id, a.employee_id, a.client_id, a.service_id, a.final_price,
                  a.final_duration_minutes, a.notes, a.starts_at, a.ends_at, a.status,
                  a.created_at, a.updated_at,
                  e.name AS employee_name, e.color AS employee_color,
                  s.name AS service_name,
                  c.full_name AS client_name, c.phone AS client_phone
           FROM appointments a
           LEFT JOIN employees e ON a.employee_id = e.id
           LEFT JOIN services s ON a.service_id = s.id
           LEFT JOIN clients c ON a.client_id = c.id
           WHERE (? IS NULL OR date(a.starts_at) >= ?)
             AND (? IS NULL OR date(a.ends_at) <= ?)
           ORDER BY a.starts_at ASC"#,
    )
    .bind(&from)
    .bind(&from)
    .bind(&to)
    .bind(&to)
    .fetch_all(pool)
    .await
}

pub async fn search_by_client(
    pool: &SqlitePool,
    term: &str,
) -> Result<Vec<AppointmentDetailRow>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentDetailRow>(
        r#"SELECT a.id, a.employee_id, a.client_id, a.service_id, a.final_price,
                  a.final_duration_minutes, a.notes, a.starts_at, a.ends_at, a.status,
                  a.created_at, a.updated_at,
                  e.name AS employee_name, e.color AS employee_color,
                  s.name AS service_name,
                  c.full_name AS client_name, c.phone AS client_phone
           FROM appointments a
           LEFT JOIN employees e ON a.employee_id = e.id
           LEFT JOIN services s ON a.service_id = s.id
           LEFT JOIN clients c ON a.client_id = c.id
           WHERE c.full_name LIKE ?
           ORDER BY a.starts_at DESC
           LIMIT 50"#,
    )
    .bind(format!("%{term}%"))
    .fetch_all(pool)
    .await
}

async fn resolve_client(
    pool: &SqlitePool,
    client: Option<&ClientInfo>,
) -> Result<Option<i64>, sqlx::Error> {
    let Some(info) = client else {
        return Ok(None);
    };
    let Some(name) = info
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
    else {
        return Ok(None);
    };
    let phone = info
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|phone| !phone.is_empty());

    let row = clients::upsert_client(pool, name, phone).await?;
    Ok(Some(row.id))
}

async fn fetch_appointment(
    pool: &SqlitePool,
    id: i64,
) -> Result<Option<AppointmentRow>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentRow>("SELECT * FROM appointments WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

fn parse_date_param(value: Option<&str>) -> Result<Option<String>, ApiError> {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if NaiveDate::parse_from_str(value, "%Y-%m-%d").is_err() {
        return Err(ApiError::Validation(
            "Fecha inválida (use YYYY-MM-DD)".to_string(),
        ));
    }
    Ok(Some(value.to_string()))
}

fn normalize_optional(value: Option<&str>) -> Result<Option<String>, ApiError> {
    match value {
        Some(value) => parse_timestamp(value)
            .map(Some)
            .ok_or_else(|| ApiError::Validation("Fecha u horario inválido (ISO-8601)".to_string())),
        None => Ok(None),
    }
}

/// Accepts the timestamp shapes the agenda sends (with or without seconds,
/// millis or a trailing offset) and normalizes them to the stored layout.
/// An offset suffix is dropped, not converted: the wall-clock reading in the
/// payload is already salon-local.
fn parse_timestamp(value: &str) -> Option<String> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_local().format(TIMESTAMP_FORMAT).to_string());
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.format(TIMESTAMP_FORMAT).to_string());
        }
    }
    None
}
