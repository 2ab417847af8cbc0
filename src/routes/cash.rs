use std::collections::BTreeMap;

use actix_web::{web, HttpResponse};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    error::{internal, ApiError},
    models::{cents, round2},
    state::AppState,
};

#[derive(Debug, Deserialize)]
struct DailyQuery {
    date: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MethodTotal {
    pub employee_id: i64,
    pub employee_name: String,
    pub method: String,
    pub total_monto: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmployeeSummary {
    pub employee_id: i64,
    pub employee_name: String,
    pub total_bruto: f64,
    pub para_empleada: f64,
    pub para_local: f64,
}

#[derive(Debug, Serialize)]
pub struct DailyCash {
    pub fecha: String,
    pub totales_por_metodo: Vec<MethodTotal>,
    pub resumen_por_empleada: Vec<EmployeeSummary>,
    pub agrupado_por_empleada: BTreeMap<String, BTreeMap<String, f64>>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/cash").service(web::resource("/daily").route(web::get().to(daily))),
    );
}

async fn daily(
    state: web::Data<AppState>,
    query: web::Query<DailyQuery>,
) -> Result<HttpResponse, ApiError> {
    let Some(date) = query.date.as_deref().map(str::trim).filter(|date| !date.is_empty()) else {
        return Err(ApiError::Validation(
            "Debe especificar una fecha (YYYY-MM-DD)".to_string(),
        ));
    };
    if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
        return Err(ApiError::Validation(
            "Fecha inválida (use YYYY-MM-DD)".to_string(),
        ));
    }

    let report = daily_cash(&state.db, date)
        .await
        .map_err(|err| internal("Error al obtener caja diaria", err))?;

    Ok(HttpResponse::Ok().json(report))
}

/// Builds the day's cash report. Only payments of DONE appointments whose
/// start falls on the requested calendar day count. The summary and the
/// nested map are derived from the same grouped rows, so the three views
/// always agree.
pub async fn daily_cash(pool: &SqlitePool, date: &str) -> Result<DailyCash, sqlx::Error> {
    let rows: Vec<MethodTotal> = sqlx::query_as(
        r#"SELECT e.id AS employee_id, e.name AS employee_name, p.method AS method,
                  ROUND(SUM(p.amount), 2) AS total_monto
           FROM payments p
           JOIN appointments a ON a.id = p.appointment_id
           JOIN employees e ON e.id = a.employee_id
           WHERE a.status = 'DONE' AND date(a.starts_at) = ?
           GROUP BY e.id, e.name, p.method
           ORDER BY e.name, p.method"#,
    )
    .bind(date)
    .fetch_all(pool)
    .await?;

    let mut resumen: Vec<EmployeeSummary> = Vec::new();
    let mut agrupado: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();

    for row in &rows {
        match resumen
            .iter_mut()
            .find(|summary| summary.employee_id == row.employee_id)
        {
            Some(summary) => {
                summary.total_bruto = round2(summary.total_bruto + row.total_monto);
            }
            None => resumen.push(EmployeeSummary {
                employee_id: row.employee_id,
                employee_name: row.employee_name.clone(),
                total_bruto: row.total_monto,
                para_empleada: 0.0,
                para_local: 0.0,
            }),
        }

        agrupado
            .entry(row.employee_name.clone())
            .or_default()
            .insert(row.method.clone(), row.total_monto);
    }

    for summary in &mut resumen {
        let half = split_half(summary.total_bruto);
        summary.para_empleada = half;
        summary.para_local = half;
    }

    Ok(DailyCash {
        fecha: date.to_string(),
        totales_por_metodo: rows,
        resumen_por_empleada: resumen,
        agrupado_por_empleada: agrupado,
    })
}

/// Half of a gross total, rounded half-up at cent precision. Both sides of
/// the 50/50 split receive this value, so an odd-cent total hands out one
/// extra cent overall.
fn split_half(total: f64) -> f64 {
    (cents(total) as f64 / 2.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::now_str;

    #[test]
    fn split_half_rounds_odd_cents_up() {
        assert_eq!(split_half(100.0), 50.0);
        assert_eq!(split_half(100.01), 50.01);
        assert_eq!(split_half(33.33), 16.67);
        assert_eq!(split_half(0.0), 0.0);
    }

    #[sqlx::test]
    async fn views_are_derived_from_the_same_rows(pool: SqlitePool) {
        let romina = seed_employee(&pool, "Romina").await;
        let valeria = seed_employee(&pool, "Valeria").await;

        let a1 = seed_appointment(&pool, romina, "DONE", "2026-03-02").await;
        let a2 = seed_appointment(&pool, romina, "DONE", "2026-03-02").await;
        let a3 = seed_appointment(&pool, valeria, "DONE", "2026-03-02").await;

        seed_payment(&pool, a1, "CASH", 1000.0).await;
        seed_payment(&pool, a1, "CARD", 500.0).await;
        seed_payment(&pool, a2, "CASH", 700.0).await;
        seed_payment(&pool, a3, "MP", 2000.0).await;

        let report = daily_cash(&pool, "2026-03-02").await.unwrap();

        assert_eq!(report.fecha, "2026-03-02");
        assert_eq!(report.totales_por_metodo.len(), 3);

        // Method totals collapse both CASH payments into one row.
        let cash_row = report
            .totales_por_metodo
            .iter()
            .find(|row| row.employee_id == romina && row.method == "CASH")
            .unwrap();
        assert_eq!(cash_row.total_monto, 1700.0);

        // Per-employee gross equals the sum of that employee's method rows.
        assert_eq!(report.resumen_por_empleada.len(), 2);
        let romina_summary = &report.resumen_por_empleada[0];
        assert_eq!(romina_summary.employee_name, "Romina");
        assert_eq!(romina_summary.total_bruto, 2200.0);
        assert_eq!(romina_summary.para_empleada, 1100.0);
        assert_eq!(romina_summary.para_local, 1100.0);

        let valeria_summary = &report.resumen_por_empleada[1];
        assert_eq!(valeria_summary.total_bruto, 2000.0);

        // The nested map mirrors the method rows exactly.
        assert_eq!(report.agrupado_por_empleada["Romina"]["CASH"], 1700.0);
        assert_eq!(report.agrupado_por_empleada["Romina"]["CARD"], 500.0);
        assert_eq!(report.agrupado_por_empleada["Valeria"]["MP"], 2000.0);

        let method_sum: f64 = report
            .totales_por_metodo
            .iter()
            .map(|row| row.total_monto)
            .sum();
        let gross_sum: f64 = report
            .resumen_por_empleada
            .iter()
            .map(|summary| summary.total_bruto)
            .sum();
        assert_eq!(cents(method_sum), cents(gross_sum));
    }

    #[sqlx::test]
    async fn only_done_appointments_on_the_day_count(pool: SqlitePool) {
        let romina = seed_employee(&pool, "Romina").await;

        let done_today = seed_appointment(&pool, romina, "DONE", "2026-03-02").await;
        let scheduled_today = seed_appointment(&pool, romina, "SCHEDULED", "2026-03-02").await;
        let done_yesterday = seed_appointment(&pool, romina, "DONE", "2026-03-01").await;
        let deleted = seed_appointment(&pool, romina, "DONE", "2026-03-02").await;

        seed_payment(&pool, done_today, "CASH", 100.0).await;
        seed_payment(&pool, scheduled_today, "CASH", 200.0).await;
        seed_payment(&pool, done_yesterday, "CASH", 400.0).await;
        seed_payment(&pool, deleted, "CASH", 800.0).await;
        sqlx::query("DELETE FROM appointments WHERE id = ?")
            .bind(deleted)
            .execute(&pool)
            .await
            .unwrap();

        let report = daily_cash(&pool, "2026-03-02").await.unwrap();
        assert_eq!(report.totales_por_metodo.len(), 1);
        assert_eq!(report.totales_por_metodo[0].total_monto, 100.0);
    }

    #[sqlx::test]
    async fn empty_day_yields_empty_views(pool: SqlitePool) {
        let report = daily_cash(&pool, "2026-03-02").await.unwrap();
        assert!(report.totales_por_metodo.is_empty());
        assert!(report.resumen_por_empleada.is_empty());
        assert!(report.agrupado_por_empleada.is_empty());
    }

    #[sqlx::test]
    async fn odd_cent_gross_splits_half_up_on_both_sides(pool: SqlitePool) {
        let romina = seed_employee(&pool, "Romina").await;
        let appointment = seed_appointment(&pool, romina, "DONE", "2026-03-02").await;
        seed_payment(&pool, appointment, "CASH", 33.33).await;

        let report = daily_cash(&pool, "2026-03-02").await.unwrap();
        let summary = &report.resumen_por_empleada[0];
        assert_eq!(summary.total_bruto, 33.33);
        assert_eq!(summary.para_empleada, 16.67);
        assert_eq!(summary.para_local, 16.67);
    }

    async fn seed_employee(pool: &SqlitePool, name: &str) -> i64 {
        sqlx::query("INSERT INTO employees (name, active, created_at) VALUES (?, 1, ?)")
            .bind(name)
            .bind(now_str())
            .execute(pool)
            .await
            .unwrap()
            .last_insert_rowid()
    }

    async fn seed_appointment(pool: &SqlitePool, employee_id: i64, status: &str, day: &str) -> i64 {
        sqlx::query(
            r#"INSERT INTO appointments
                   (employee_id, final_price, final_duration_minutes,
                    starts_at, ends_at, status, created_at, updated_at)
               VALUES (?, 100, 60, ?, ?, ?, ?, ?)"#,
        )
        .bind(employee_id)
        .bind(format!("{day}T10:00:00"))
        .bind(format!("{day}T11:00:00"))
        .bind(status)
        .bind(now_str())
        .bind(now_str())
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    async fn seed_payment(pool: &SqlitePool, appointment_id: i64, method: &str, amount: f64) {
        sqlx::query(
            "INSERT INTO payments (appointment_id, method, amount, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(appointment_id)
        .bind(method)
        .bind(amount)
        .bind(now_str())
        .execute(pool)
        .await
        .unwrap();
    }
}
