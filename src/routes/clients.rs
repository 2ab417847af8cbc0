use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    db::now_str,
    error::{internal, is_unique_violation, ApiError},
    models::{AppointmentStats, ClientRow},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ClientCreate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClientUpdate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ClientSearchRow {
    pub id: i64,
    pub full_name: String,
    pub phone: Option<String>,
    pub total_appointments: i64,
    pub last_appointment: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ServiceFrequency {
    pub name: String,
    pub frequency: i64,
}

#[derive(Debug, Serialize)]
pub struct ClientStats {
    #[serde(flatten)]
    pub stats: AppointmentStats,
    pub frequent_services: Vec<ServiceFrequency>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/clients")
            .service(
                web::resource("")
                    .route(web::get().to(list))
                    .route(web::post().to(create)),
            )
            .service(web::resource("/search").route(web::get().to(search)))
            .service(web::resource("/{id}/stats").route(web::get().to(stats)))
            .service(web::resource("/{id}").route(web::patch().to(update))),
    );
}

async fn list(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let rows = sqlx::query_as::<_, ClientRow>("SELECT * FROM clients ORDER BY full_name")
        .fetch_all(&state.db)
        .await
        .map_err(|err| internal("Error al obtener clientes", err))?;

    Ok(HttpResponse::Ok().json(rows))
}

async fn search(
    state: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let term = query.q.as_deref().map(str::trim).unwrap_or_default();
    if term.chars().count() < 2 {
        return Err(ApiError::Validation(
            "Debe proporcionar al menos 2 caracteres para buscar".to_string(),
        ));
    }

    let rows = search_clients(&state.db, term)
        .await
        .map_err(|err| internal("Error al buscar clientes", err))?;

    Ok(HttpResponse::Ok().json(rows))
}

async fn create(
    state: web::Data<AppState>,
    payload: web::Json<ClientCreate>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.into_inner();
    let full_name = payload.full_name.as_deref().map(str::trim).unwrap_or_default();
    if full_name.is_empty() {
        return Err(ApiError::Validation("El nombre es requerido".to_string()));
    }
    let phone = payload
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|phone| !phone.is_empty());

    let client = upsert_client(&state.db, full_name, phone)
        .await
        .map_err(|err| internal("Error al crear cliente", err))?;

    Ok(HttpResponse::Created().json(client))
}

async fn update(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: web::Json<ClientUpdate>,
) -> Result<HttpResponse, ApiError> {
    let client = update_client(&state.db, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(client))
}

async fn stats(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let stats = client_stats(&state.db, path.into_inner())
        .await
        .map_err(|err| internal("Error al obtener estadísticas del cliente", err))?;

    Ok(HttpResponse::Ok().json(stats))
}

/// One row per distinct name. A repeat visit under an existing name only
/// refreshes the phone, it never duplicates the client.
pub async fn upsert_client(
    pool: &SqlitePool,
    full_name: &str,
    phone: Option<&str>,
) -> Result<ClientRow, sqlx::Error> {
    let now = now_str();
    sqlx::query(
        r#"INSERT INTO clients (full_name, phone, created_at, updated_at)
           VALUES (?, ?, ?, ?)
           ON CONFLICT (full_name) DO UPDATE
           SET phone = excluded.phone, updated_at = excluded.updated_at"#,
    )
    .bind(full_name)
    .bind(phone)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, ClientRow>("SELECT * FROM clients WHERE full_name = ?")
        .bind(full_name)
        .fetch_one(pool)
        .await
}

pub async fn update_client(
    pool: &SqlitePool,
    id: i64,
    input: ClientUpdate,
) -> Result<ClientRow, ApiError> {
    let result = sqlx::query(
        r#"UPDATE clients
           SET full_name = COALESCE(?, full_name),
               phone = COALESCE(?, phone),
               updated_at = ?
           WHERE id = ?"#,
    )
    .bind(&input.full_name)
    .bind(&input.phone)
    .bind(now_str())
    .bind(id)
    .execute(pool)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            ApiError::Conflict("Ya existe un cliente con ese nombre".to_string())
        } else {
            internal("Error al actualizar cliente", err)
        }
    })?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("Cliente no encontrado".to_string()));
    }

    sqlx::query_as::<_, ClientRow>("SELECT * FROM clients WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(|err| internal("Error al actualizar cliente", err))
}

pub async fn search_clients(
    pool: &SqlitePool,
    term: &str,
) -> Result<Vec<ClientSearchRow>, sqlx::Error> {
    sqlx::query_as::<_, ClientSearchRow>(
        r#"SELECT c.id, c.full_name, c.phone,
                  COUNT(a.id) AS total_appointments,
                  MAX(a.starts_at) AS last_appointment
           FROM clients c
           LEFT JOIN appointments a ON c.id = a.client_id
           WHERE c.full_name LIKE ?
           GROUP BY c.id, c.full_name, c.phone
           ORDER BY total_appointments DESC, c.full_name ASC
           LIMIT 10"#,
    )
    .bind(format!("%{term}%"))
    .fetch_all(pool)
    .await
}

pub async fn client_stats(pool: &SqlitePool, id: i64) -> Result<ClientStats, sqlx::Error> {
    let stats = sqlx::query_as::<_, AppointmentStats>(
        r#"SELECT COUNT(*) AS total_appointments,
                  COUNT(CASE WHEN status = 'DONE' THEN 1 END) AS completed_appointments,
                  ROUND(AVG(final_price), 2) AS average_price,
                  ROUND(SUM(CASE WHEN status = 'DONE' THEN final_price ELSE 0 END), 2) AS total_revenue,
                  MAX(starts_at) AS last_appointment,
                  MIN(starts_at) AS first_appointment
           FROM appointments
           WHERE client_id = ?"#,
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    let frequent_services = sqlx::query_as::<_, ServiceFrequency>(
        r#"SELECT s.name, COUNT(*) AS frequency
           FROM appointments a
           JOIN services s ON a.service_id = s.id
           WHERE a.client_id = ?
           GROUP BY s.name
           ORDER BY frequency DESC
           LIMIT 5"#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(ClientStats {
        stats,
        frequent_services,
    })
}
