use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    db::now_str,
    error::{internal, ApiError},
    models::{
        cents, round2, PaymentRow, LEGACY_PAYMENT_METHODS, PAYMENT_METHODS, STATUS_DONE,
        STATUS_SCHEDULED,
    },
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct PaymentLine {
    pub method: Option<String>,
    pub amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentsBody {
    pub appointment_id: Option<i64>,
    pub payments: Option<Vec<PaymentLine>>,
}

#[derive(Debug, Serialize)]
pub struct RecordedPayments {
    pub pagos: Vec<PaymentRow>,
    #[serde(rename = "totalPagado")]
    pub total_pagado: f64,
    pub status: String,
    #[serde(rename = "statusChanged")]
    pub status_changed: bool,
}

/// Result of re-deriving an appointment's status from its paid total.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub total_pagado: f64,
    pub status: String,
    pub status_changed: bool,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/payments")
            .service(web::resource("").route(web::post().to(record)))
            .service(web::resource("/payment/{id}").route(web::delete().to(remove)))
            .service(
                web::resource("/{appointment_id}")
                    .route(web::get().to(list))
                    .route(web::post().to(record_legacy)),
            ),
    );
}

async fn list(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let rows = sqlx::query_as::<_, PaymentRow>(
        r#"SELECT id, method, amount, created_at
           FROM payments
           WHERE appointment_id = ?
           ORDER BY created_at ASC, id ASC"#,
    )
    .bind(path.into_inner())
    .fetch_all(&state.db)
    .await
    .map_err(|err| internal("Error al obtener pagos", err))?;

    Ok(HttpResponse::Ok().json(rows))
}

async fn record(
    state: web::Data<AppState>,
    payload: web::Json<PaymentsBody>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.into_inner();
    let (Some(appointment_id), Some(lines)) = (payload.appointment_id, payload.payments) else {
        return Err(ApiError::Validation(
            "appointment_id y payments son requeridos".to_string(),
        ));
    };
    if lines.is_empty() {
        return Err(ApiError::Validation(
            "appointment_id y payments son requeridos".to_string(),
        ));
    }

    let recorded = record_payments(
        &state.db,
        appointment_id,
        &lines,
        &PAYMENT_METHODS,
        "Error al crear pagos",
    )
    .await?;
    Ok(HttpResponse::Created().json(recorded))
}

async fn record_legacy(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: web::Json<Vec<PaymentLine>>,
) -> Result<HttpResponse, ApiError> {
    let lines = payload.into_inner();
    if lines.is_empty() {
        return Err(ApiError::Validation(
            "Debe enviar al menos un pago".to_string(),
        ));
    }

    let recorded = record_payments(
        &state.db,
        path.into_inner(),
        &lines,
        &LEGACY_PAYMENT_METHODS,
        "Error al registrar pagos",
    )
    .await?;
    Ok(HttpResponse::Created().json(recorded))
}

async fn remove(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let outcome = delete_payment(&state.db, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Pago eliminado correctamente",
        "totalPagado": outcome.total_pagado,
        "status": outcome.status,
        "statusChanged": outcome.status_changed,
    })))
}

/// Inserts the valid lines of a batch, then reconciles the appointment.
/// A line without a method or a positive amount is skipped; a line with an
/// unknown method aborts the batch. Lines inserted before the abort stay
/// recorded, the next reconciliation picks them up.
pub async fn record_payments(
    pool: &SqlitePool,
    appointment_id: i64,
    lines: &[PaymentLine],
    allowed: &[&str],
    ctx: &'static str,
) -> Result<RecordedPayments, ApiError> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM appointments WHERE id = ?")
        .bind(appointment_id)
        .fetch_optional(pool)
        .await
        .map_err(|err| internal(ctx, err))?;
    if exists.is_none() {
        return Err(ApiError::NotFound("Turno no encontrado".to_string()));
    }

    let mut inserted = Vec::new();
    for line in lines {
        let method = line.method.as_deref().map(str::trim).unwrap_or_default();
        let amount = line.amount.unwrap_or(0.0);
        if method.is_empty() || amount <= 0.0 {
            continue;
        }
        if !allowed.contains(&method) {
            return Err(ApiError::Validation(format!(
                "Método de pago inválido: {method}"
            )));
        }

        let result = sqlx::query(
            "INSERT INTO payments (appointment_id, method, amount, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(appointment_id)
        .bind(method)
        .bind(amount)
        .bind(now_str())
        .execute(pool)
        .await
        .map_err(|err| internal(ctx, err))?;

        let row = sqlx::query_as::<_, PaymentRow>(
            "SELECT id, method, amount, created_at FROM payments WHERE id = ?",
        )
        .bind(result.last_insert_rowid())
        .fetch_one(pool)
        .await
        .map_err(|err| internal(ctx, err))?;
        inserted.push(row);
    }

    let outcome = reconcile(pool, appointment_id)
        .await
        .map_err(|err| internal(ctx, err))?;

    Ok(RecordedPayments {
        pagos: inserted,
        total_pagado: outcome.total_pagado,
        status: outcome.status,
        status_changed: outcome.status_changed,
    })
}

pub async fn delete_payment(pool: &SqlitePool, payment_id: i64) -> Result<Reconciliation, ApiError> {
    let appointment_id: Option<i64> =
        sqlx::query_scalar("SELECT appointment_id FROM payments WHERE id = ?")
            .bind(payment_id)
            .fetch_optional(pool)
            .await
            .map_err(|err| internal("Error al eliminar pago", err))?;
    let Some(appointment_id) = appointment_id else {
        return Err(ApiError::NotFound("Pago no encontrado".to_string()));
    };

    sqlx::query("DELETE FROM payments WHERE id = ?")
        .bind(payment_id)
        .execute(pool)
        .await
        .map_err(|err| internal("Error al eliminar pago", err))?;

    reconcile(pool, appointment_id)
        .await
        .map_err(|err| internal("Error al eliminar pago", err))
}

/// Recomputes the paid total and derives the status from it. Every payment
/// mutation funnels through here so recording and deleting cannot disagree:
/// a positive final price fully covered promotes the appointment to DONE,
/// and an appointment that was DONE but is no longer covered falls back to
/// SCHEDULED. Comparisons happen in cents.
pub async fn reconcile(pool: &SqlitePool, appointment_id: i64) -> Result<Reconciliation, sqlx::Error> {
    let total: Option<f64> = sqlx::query_scalar("SELECT SUM(amount) FROM payments WHERE appointment_id = ?")
        .bind(appointment_id)
        .fetch_one(pool)
        .await?;
    let total = round2(total.unwrap_or(0.0));

    let row: Option<(f64, String)> =
        sqlx::query_as("SELECT final_price, status FROM appointments WHERE id = ?")
            .bind(appointment_id)
            .fetch_optional(pool)
            .await?;
    let Some((final_price, status)) = row else {
        // The appointment is already gone; orphaned payments have no status
        // to maintain.
        return Ok(Reconciliation {
            total_pagado: total,
            status: String::new(),
            status_changed: false,
        });
    };

    let covered = cents(final_price) > 0 && cents(total) >= cents(final_price);
    let next_status = if covered {
        STATUS_DONE
    } else if status == STATUS_DONE {
        STATUS_SCHEDULED
    } else {
        return Ok(Reconciliation {
            total_pagado: total,
            status,
            status_changed: false,
        });
    };

    if next_status == status {
        return Ok(Reconciliation {
            total_pagado: total,
            status,
            status_changed: false,
        });
    }

    sqlx::query("UPDATE appointments SET status = ?, updated_at = ? WHERE id = ?")
        .bind(next_status)
        .bind(now_str())
        .bind(appointment_id)
        .execute(pool)
        .await?;

    Ok(Reconciliation {
        total_pagado: total,
        status: next_status.to_string(),
        status_changed: true,
    })
}
