use actix_web::{web, HttpResponse};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    db::now_str,
    error::{internal, ApiError},
    models::DailyNoteRow,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct NoteUpsert {
    pub date: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotesRange {
    from: Option<String>,
    to: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/daily-notes")
            .service(
                web::resource("")
                    .route(web::get().to(list))
                    .route(web::post().to(upsert)),
            )
            .service(
                web::resource("/{date}")
                    .route(web::get().to(get_by_date))
                    .route(web::delete().to(delete)),
            ),
    );
}

async fn list(
    state: web::Data<AppState>,
    query: web::Query<NotesRange>,
) -> Result<HttpResponse, ApiError> {
    let range = match (query.from.as_deref(), query.to.as_deref()) {
        (Some(from), Some(to)) => Some((from.to_string(), to.to_string())),
        _ => None,
    };

    let rows = list_notes(&state.db, range)
        .await
        .map_err(|err| internal("Error al obtener anotaciones", err))?;

    Ok(HttpResponse::Ok().json(rows))
}

async fn get_by_date(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let date = path.into_inner();
    let note = fetch_note(&state.db, &date)
        .await
        .map_err(|err| internal("Error al obtener anotación", err))?;

    match note {
        Some(note) => Ok(HttpResponse::Ok().json(note)),
        // Days without a note read as blank instead of missing.
        None => Ok(HttpResponse::Ok().json(json!({ "date": date, "content": "" }))),
    }
}

async fn upsert(
    state: web::Data<AppState>,
    payload: web::Json<NoteUpsert>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.into_inner();
    let (Some(date), Some(content)) = (payload.date.as_deref(), payload.content.as_deref()) else {
        return Err(ApiError::Validation(
            "Fecha y contenido son requeridos".to_string(),
        ));
    };
    if date.trim().is_empty() || content.trim().is_empty() {
        return Err(ApiError::Validation(
            "Fecha y contenido son requeridos".to_string(),
        ));
    }
    let date = date.trim();
    if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
        return Err(ApiError::Validation(
            "Fecha inválida (use YYYY-MM-DD)".to_string(),
        ));
    }

    let note = upsert_note(&state.db, date, content)
        .await
        .map_err(|err| internal("Error al guardar anotación", err))?;

    Ok(HttpResponse::Ok().json(note))
}

async fn delete(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let removed = delete_note(&state.db, &path.into_inner())
        .await
        .map_err(|err| internal("Error al eliminar anotación", err))?;

    if !removed {
        return Err(ApiError::NotFound(
            "No se encontró anotación para esta fecha".to_string(),
        ));
    }
    Ok(HttpResponse::Ok().json(json!({ "message": "Anotación eliminada exitosamente" })))
}

pub async fn list_notes(
    pool: &SqlitePool,
    range: Option<(String, String)>,
) -> Result<Vec<DailyNoteRow>, sqlx::Error> {
    match range {
        Some((from, to)) => {
            sqlx::query_as::<_, DailyNoteRow>(
                "SELECT * FROM daily_notes WHERE date BETWEEN ? AND ? ORDER BY date ASC",
            )
            .bind(from)
            .bind(to)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, DailyNoteRow>("SELECT * FROM daily_notes ORDER BY date ASC")
                .fetch_all(pool)
                .await
        }
    }
}

pub async fn fetch_note(pool: &SqlitePool, date: &str) -> Result<Option<DailyNoteRow>, sqlx::Error> {
    sqlx::query_as::<_, DailyNoteRow>("SELECT * FROM daily_notes WHERE date = ?")
        .bind(date)
        .fetch_optional(pool)
        .await
}

pub async fn upsert_note(
    pool: &SqlitePool,
    date: &str,
    content: &str,
) -> Result<DailyNoteRow, sqlx::Error> {
    let now = now_str();
    sqlx::query(
        r#"INSERT INTO daily_notes (date, content, created_at, updated_at)
           VALUES (?, ?, ?, ?)
           ON CONFLICT (date) DO UPDATE
           SET content = excluded.content, updated_at = excluded.updated_at"#,
    )
    .bind(date)
    .bind(content)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, DailyNoteRow>("SELECT * FROM daily_notes WHERE date = ?")
        .bind(date)
        .fetch_one(pool)
        .await
}

pub async fn delete_note(pool: &SqlitePool, date: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM daily_notes WHERE date = ?")
        .bind(date)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
