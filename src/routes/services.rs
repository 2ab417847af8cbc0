use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    db::now_str,
    error::{internal, is_unique_violation, ApiError},
    models::{AppointmentStats, ServiceRow, PRIORITY_PARKED, PRIORITY_UNRANKED},
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct ServiceCreate {
    pub name: Option<String>,
    pub base_price: Option<f64>,
    pub base_duration_minutes: Option<i64>,
    pub category: Option<String>,
    pub orden_prioridad: Option<i64>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceUpdate {
    pub name: Option<String>,
    pub base_price: Option<f64>,
    pub base_duration_minutes: Option<i64>,
    pub category: Option<String>,
    pub orden_prioridad: Option<i64>,
    pub active: Option<bool>,
}

#[derive(Debug)]
pub enum ServiceDelete {
    Removed,
    Deactivated(ServiceRow),
}

#[derive(Debug)]
pub struct PriorityInfo {
    pub used: Vec<i64>,
    pub next_available: i64,
    pub max_used: i64,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/services")
            .service(
                web::resource("")
                    .route(web::get().to(list_active))
                    .route(web::post().to(create)),
            )
            .service(web::resource("/admin").route(web::get().to(list_all)))
            .service(web::resource("/priorities/info").route(web::get().to(priorities_info)))
            .service(web::resource("/{id}/stats").route(web::get().to(stats)))
            .service(
                web::resource("/{id}")
                    .route(web::patch().to(update))
                    .route(web::delete().to(delete)),
            ),
    );
}

async fn list_active(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let rows = sqlx::query_as::<_, ServiceRow>(
        "SELECT * FROM services WHERE active = 1 ORDER BY orden_prioridad ASC, category, name",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|err| internal("Error al obtener servicios", err))?;

    Ok(HttpResponse::Ok().json(rows))
}

async fn list_all(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let rows = sqlx::query_as::<_, ServiceRow>(
        "SELECT * FROM services ORDER BY orden_prioridad ASC, category, name",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|err| internal("Error al obtener servicios", err))?;

    Ok(HttpResponse::Ok().json(rows))
}

async fn create(
    state: web::Data<AppState>,
    payload: web::Json<ServiceCreate>,
) -> Result<HttpResponse, ApiError> {
    let service = create_service(&state.db, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(service))
}

async fn update(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: web::Json<ServiceUpdate>,
) -> Result<HttpResponse, ApiError> {
    let service = update_service(&state.db, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(service))
}

async fn delete(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    match delete_service(&state.db, path.into_inner()).await? {
        ServiceDelete::Removed => {
            Ok(HttpResponse::Ok().json(json!({ "message": "Servicio eliminado correctamente" })))
        }
        ServiceDelete::Deactivated(service) => Ok(HttpResponse::Ok().json(json!({
            "message": "Servicio desactivado (tiene turnos asociados)",
            "service": service,
        }))),
    }
}

async fn stats(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let row = sqlx::query_as::<_, AppointmentStats>(
        r#"SELECT COUNT(*) AS total_appointments,
                  COUNT(CASE WHEN status = 'DONE' THEN 1 END) AS completed_appointments,
                  ROUND(AVG(final_price), 2) AS average_price,
                  ROUND(SUM(CASE WHEN status = 'DONE' THEN final_price ELSE 0 END), 2) AS total_revenue,
                  MAX(starts_at) AS last_appointment,
                  MIN(starts_at) AS first_appointment
           FROM appointments
           WHERE service_id = ?"#,
    )
    .bind(path.into_inner())
    .fetch_one(&state.db)
    .await
    .map_err(|err| internal("Error al obtener estadísticas del servicio", err))?;

    Ok(HttpResponse::Ok().json(row))
}

async fn priorities_info(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let info = priority_info(&state.db)
        .await
        .map_err(|err| internal("Error al obtener información de prioridades", err))?;

    Ok(HttpResponse::Ok().json(json!({
        "usedPriorities": info.used,
        "nextAvailable": info.next_available,
        "maxUsedPriority": info.max_used,
    })))
}

pub async fn create_service(pool: &SqlitePool, input: ServiceCreate) -> Result<ServiceRow, ApiError> {
    let name = input.name.as_deref().map(str::trim).unwrap_or_default().to_string();
    if name.is_empty() {
        return Err(ApiError::Validation(
            "El nombre del servicio es requerido".to_string(),
        ));
    }
    let priority = input.orden_prioridad.unwrap_or(PRIORITY_UNRANKED);
    validate_priority(priority)?;
    let category = input
        .category
        .as_deref()
        .map(str::trim)
        .filter(|category| !category.is_empty())
        .map(str::to_string);

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| internal("Error al crear servicio", err))?;

    if priority != PRIORITY_UNRANKED {
        // Make room at the requested rank before inserting into it.
        sqlx::query(
            "UPDATE services SET orden_prioridad = orden_prioridad + 1
             WHERE orden_prioridad >= ? AND orden_prioridad != ?",
        )
        .bind(priority)
        .bind(PRIORITY_UNRANKED)
        .execute(&mut *tx)
        .await
        .map_err(|err| internal("Error al crear servicio", err))?;
    }

    let result = sqlx::query(
        r#"INSERT INTO services
               (name, base_price, base_duration_minutes, category, orden_prioridad, active, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&name)
    .bind(input.base_price.unwrap_or(0.0))
    .bind(input.base_duration_minutes.unwrap_or(60))
    .bind(&category)
    .bind(priority)
    .bind(input.active.unwrap_or(true))
    .bind(now_str())
    .execute(&mut *tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            ApiError::Conflict("Ya existe un servicio con ese nombre".to_string())
        } else {
            internal("Error al crear servicio", err)
        }
    })?;
    let id = result.last_insert_rowid();

    tx.commit()
        .await
        .map_err(|err| internal("Error al crear servicio", err))?;

    fetch_service(pool, id)
        .await
        .map_err(|err| internal("Error al crear servicio", err))?
        .ok_or_else(|| ApiError::Internal("Error al crear servicio".to_string()))
}

pub async fn update_service(
    pool: &SqlitePool,
    id: i64,
    input: ServiceUpdate,
) -> Result<ServiceRow, ApiError> {
    if let Some(priority) = input.orden_prioridad {
        validate_priority(priority)?;
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| internal("Error al actualizar servicio", err))?;

    if let Some(new_priority) = input.orden_prioridad {
        let current: Option<i64> =
            sqlx::query_scalar("SELECT orden_prioridad FROM services WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|err| internal("Error al actualizar servicio", err))?;
        let Some(current_priority) = current else {
            return Err(ApiError::NotFound("Servicio no encontrado".to_string()));
        };

        if new_priority != current_priority && new_priority != PRIORITY_UNRANKED {
            // Park the row outside the live range, close the gap it leaves,
            // then open a slot at the target rank. Closing before opening
            // keeps the ordered block dense for moves in both directions.
            sqlx::query("UPDATE services SET orden_prioridad = ? WHERE id = ?")
                .bind(PRIORITY_PARKED)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|err| internal("Error al actualizar servicio", err))?;

            if current_priority != PRIORITY_UNRANKED {
                sqlx::query(
                    "UPDATE services SET orden_prioridad = orden_prioridad - 1
                     WHERE orden_prioridad > ? AND orden_prioridad != ? AND orden_prioridad != ?",
                )
                .bind(current_priority)
                .bind(PRIORITY_UNRANKED)
                .bind(PRIORITY_PARKED)
                .execute(&mut *tx)
                .await
                .map_err(|err| internal("Error al actualizar servicio", err))?;
            }

            sqlx::query(
                "UPDATE services SET orden_prioridad = orden_prioridad + 1
                 WHERE orden_prioridad >= ? AND orden_prioridad != ? AND orden_prioridad != ?",
            )
            .bind(new_priority)
            .bind(PRIORITY_UNRANKED)
            .bind(PRIORITY_PARKED)
            .execute(&mut *tx)
            .await
            .map_err(|err| internal("Error al actualizar servicio", err))?;
        }
    }

    let name = input.name.as_deref().map(str::trim).map(str::to_string);
    let category = input.category.as_deref().map(str::trim).map(str::to_string);

    let result = sqlx::query(
        r#"UPDATE services
           SET name = COALESCE(?, name),
               base_price = COALESCE(?, base_price),
               base_duration_minutes = COALESCE(?, base_duration_minutes),
               category = COALESCE(?, category),
               orden_prioridad = COALESCE(?, orden_prioridad),
               active = COALESCE(?, active)
           WHERE id = ?"#,
    )
    .bind(&name)
    .bind(input.base_price)
    .bind(input.base_duration_minutes)
    .bind(&category)
    .bind(input.orden_prioridad)
    .bind(input.active)
    .bind(id)
    .execute(&mut *tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            ApiError::Conflict("Ya existe un servicio con ese nombre".to_string())
        } else {
            internal("Error al actualizar servicio", err)
        }
    })?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("Servicio no encontrado".to_string()));
    }

    tx.commit()
        .await
        .map_err(|err| internal("Error al actualizar servicio", err))?;

    fetch_service(pool, id)
        .await
        .map_err(|err| internal("Error al actualizar servicio", err))?
        .ok_or_else(|| ApiError::NotFound("Servicio no encontrado".to_string()))
}

pub async fn delete_service(pool: &SqlitePool, id: i64) -> Result<ServiceDelete, ApiError> {
    let referenced: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM appointments WHERE service_id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(|err| internal("Error al eliminar servicio", err))?;

    if referenced > 0 {
        // History references the service, so it only gets hidden from the menu.
        let result = sqlx::query("UPDATE services SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(|err| internal("Error al eliminar servicio", err))?;
        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("Servicio no encontrado".to_string()));
        }
        let service = fetch_service(pool, id)
            .await
            .map_err(|err| internal("Error al eliminar servicio", err))?
            .ok_or_else(|| ApiError::NotFound("Servicio no encontrado".to_string()))?;
        Ok(ServiceDelete::Deactivated(service))
    } else {
        let result = sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(|err| internal("Error al eliminar servicio", err))?;
        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("Servicio no encontrado".to_string()));
        }
        Ok(ServiceDelete::Removed)
    }
}

pub async fn priority_info(pool: &SqlitePool) -> Result<PriorityInfo, sqlx::Error> {
    let used: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT orden_prioridad FROM services
         WHERE orden_prioridad != ? AND active = 1
         ORDER BY orden_prioridad ASC",
    )
    .bind(PRIORITY_UNRANKED)
    .fetch_all(pool)
    .await?;

    let next_available = next_available_priority(&used);
    let max_used = used.iter().copied().max().unwrap_or(0);

    Ok(PriorityInfo {
        used,
        next_available,
        max_used,
    })
}

/// Lowest positive rank no active service currently holds.
pub fn next_available_priority(used: &[i64]) -> i64 {
    let mut candidate = 1;
    while used.contains(&candidate) {
        candidate += 1;
    }
    candidate
}

fn validate_priority(priority: i64) -> Result<(), ApiError> {
    if priority == PRIORITY_UNRANKED || (priority >= 1 && priority != PRIORITY_PARKED) {
        Ok(())
    } else {
        Err(ApiError::Validation("orden_prioridad inválido".to_string()))
    }
}

async fn fetch_service(pool: &SqlitePool, id: i64) -> Result<Option<ServiceRow>, sqlx::Error> {
    sqlx::query_as::<_, ServiceRow>("SELECT * FROM services WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> ServiceCreate {
        ServiceCreate {
            name: Some(name.to_string()),
            base_price: Some(1000.0),
            ..Default::default()
        }
    }

    fn ranked_at(name: &str, priority: i64) -> ServiceCreate {
        ServiceCreate {
            orden_prioridad: Some(priority),
            ..named(name)
        }
    }

    async fn ordered_block(pool: &SqlitePool) -> Vec<(String, i64)> {
        sqlx::query_as(
            "SELECT name, orden_prioridad FROM services
             WHERE active = 1 AND orden_prioridad != 999
             ORDER BY orden_prioridad ASC",
        )
        .fetch_all(pool)
        .await
        .unwrap()
    }

    #[sqlx::test]
    async fn create_applies_defaults(pool: SqlitePool) {
        let service = create_service(
            &pool,
            ServiceCreate {
                name: Some("  Manicura  ".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(service.name, "Manicura");
        assert_eq!(service.base_price, 0.0);
        assert_eq!(service.base_duration_minutes, 60);
        assert_eq!(service.orden_prioridad, PRIORITY_UNRANKED);
        assert!(service.active);
        assert_eq!(service.category, None);
    }

    #[sqlx::test]
    async fn create_requires_name(pool: SqlitePool) {
        let err = create_service(&pool, ServiceCreate::default()).await.unwrap_err();
        match err {
            ApiError::Validation(msg) => assert_eq!(msg, "El nombre del servicio es requerido"),
            other => panic!("expected validation error, got {other:?}"),
        }

        let err = create_service(
            &pool,
            ServiceCreate {
                name: Some("   ".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[sqlx::test]
    async fn create_at_taken_rank_shifts_the_block(pool: SqlitePool) {
        create_service(&pool, ranked_at("Corte", 1)).await.unwrap();
        create_service(&pool, ranked_at("Color", 2)).await.unwrap();
        create_service(&pool, ranked_at("Brushing", 1)).await.unwrap();

        assert_eq!(
            ordered_block(&pool).await,
            vec![
                ("Brushing".to_string(), 1),
                ("Corte".to_string(), 2),
                ("Color".to_string(), 3),
            ],
        );
    }

    #[sqlx::test]
    async fn duplicate_active_name_conflicts(pool: SqlitePool) {
        create_service(&pool, named("Corte")).await.unwrap();
        let err = create_service(&pool, named("Corte")).await.unwrap_err();
        match err {
            ApiError::Conflict(msg) => assert_eq!(msg, "Ya existe un servicio con ese nombre"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[sqlx::test]
    async fn deactivated_name_can_be_reused(pool: SqlitePool) {
        let first = create_service(&pool, named("Corte")).await.unwrap();
        update_service(
            &pool,
            first.id,
            ServiceUpdate {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let second = create_service(&pool, named("Corte")).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[sqlx::test]
    async fn move_toward_the_tail_keeps_ranks_dense(pool: SqlitePool) {
        create_service(&pool, ranked_at("Uno", 1)).await.unwrap();
        let a = create_service(&pool, ranked_at("Dos", 2)).await.unwrap();
        create_service(&pool, ranked_at("Tres", 3)).await.unwrap();
        create_service(&pool, named("Suelto")).await.unwrap();

        let moved = update_service(
            &pool,
            a.id,
            ServiceUpdate {
                orden_prioridad: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(moved.orden_prioridad, 3);
        assert_eq!(
            ordered_block(&pool).await,
            vec![
                ("Uno".to_string(), 1),
                ("Tres".to_string(), 2),
                ("Dos".to_string(), 3),
            ],
        );
    }

    #[sqlx::test]
    async fn move_toward_the_head_keeps_ranks_dense(pool: SqlitePool) {
        create_service(&pool, ranked_at("Uno", 1)).await.unwrap();
        create_service(&pool, ranked_at("Dos", 2)).await.unwrap();
        let c = create_service(&pool, ranked_at("Tres", 3)).await.unwrap();

        update_service(
            &pool,
            c.id,
            ServiceUpdate {
                orden_prioridad: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(
            ordered_block(&pool).await,
            vec![
                ("Tres".to_string(), 1),
                ("Uno".to_string(), 2),
                ("Dos".to_string(), 3),
            ],
        );
    }

    #[sqlx::test]
    async fn ranking_an_unranked_service_inserts_into_the_block(pool: SqlitePool) {
        create_service(&pool, ranked_at("Uno", 1)).await.unwrap();
        create_service(&pool, ranked_at("Dos", 2)).await.unwrap();
        let loose = create_service(&pool, named("Suelto")).await.unwrap();
        assert_eq!(loose.orden_prioridad, PRIORITY_UNRANKED);

        update_service(
            &pool,
            loose.id,
            ServiceUpdate {
                orden_prioridad: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(
            ordered_block(&pool).await,
            vec![
                ("Uno".to_string(), 1),
                ("Suelto".to_string(), 2),
                ("Dos".to_string(), 3),
            ],
        );
    }

    #[sqlx::test]
    async fn unranking_keeps_the_sentinel(pool: SqlitePool) {
        let a = create_service(&pool, ranked_at("Uno", 1)).await.unwrap();
        let unranked = update_service(
            &pool,
            a.id,
            ServiceUpdate {
                orden_prioridad: Some(PRIORITY_UNRANKED),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(unranked.orden_prioridad, PRIORITY_UNRANKED);
        assert!(ordered_block(&pool).await.is_empty());
    }

    #[sqlx::test]
    async fn park_value_is_rejected_as_a_rank(pool: SqlitePool) {
        let err = create_service(&pool, ranked_at("Uno", PRIORITY_PARKED))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = create_service(&pool, ranked_at("Uno", 0)).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[sqlx::test]
    async fn delete_without_history_removes_the_row(pool: SqlitePool) {
        let service = create_service(&pool, named("Corte")).await.unwrap();
        let outcome = delete_service(&pool, service.id).await.unwrap();
        assert!(matches!(outcome, ServiceDelete::Removed));
        assert!(fetch_service(&pool, service.id).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn delete_with_history_deactivates_instead(pool: SqlitePool) {
        let service = create_service(&pool, named("Corte")).await.unwrap();
        let employee_id = seed_employee(&pool).await;
        seed_appointment(&pool, employee_id, service.id, "DONE", 1000.0).await;

        let outcome = delete_service(&pool, service.id).await.unwrap();
        match outcome {
            ServiceDelete::Deactivated(row) => {
                assert_eq!(row.id, service.id);
                assert!(!row.active);
            }
            other => panic!("expected deactivation, got {other:?}"),
        }
        assert!(fetch_service(&pool, service.id).await.unwrap().is_some());
    }

    #[sqlx::test]
    async fn missing_service_is_not_found(pool: SqlitePool) {
        let err = update_service(
            &pool,
            4040,
            ServiceUpdate {
                base_price: Some(1.0),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err = delete_service(&pool, 4040).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[sqlx::test]
    async fn priority_info_reports_gaps(pool: SqlitePool) {
        create_service(&pool, ranked_at("Uno", 1)).await.unwrap();
        create_service(&pool, ranked_at("Dos", 2)).await.unwrap();
        create_service(&pool, ranked_at("Cuatro", 3)).await.unwrap();
        create_service(&pool, named("Suelto")).await.unwrap();

        // Hide rank 2 so the ledger shows a gap.
        sqlx::query("UPDATE services SET active = 0 WHERE name = 'Dos'")
            .execute(&pool)
            .await
            .unwrap();

        let info = priority_info(&pool).await.unwrap();
        assert_eq!(info.used, vec![1, 3]);
        assert_eq!(info.next_available, 2);
        assert_eq!(info.max_used, 3);
    }

    #[sqlx::test]
    async fn priority_info_on_empty_catalog(pool: SqlitePool) {
        let info = priority_info(&pool).await.unwrap();
        assert!(info.used.is_empty());
        assert_eq!(info.next_available, 1);
        assert_eq!(info.max_used, 0);
    }

    #[test]
    fn next_available_fills_the_lowest_hole() {
        assert_eq!(next_available_priority(&[]), 1);
        assert_eq!(next_available_priority(&[1, 2, 3]), 4);
        assert_eq!(next_available_priority(&[2, 3]), 1);
        assert_eq!(next_available_priority(&[1, 3, 4]), 2);
    }

    async fn seed_employee(pool: &SqlitePool) -> i64 {
        sqlx::query("INSERT INTO employees (name, active, created_at) VALUES ('Romina', 1, ?)")
            .bind(now_str())
            .execute(pool)
            .await
            .unwrap()
            .last_insert_rowid()
    }

    async fn seed_appointment(
        pool: &SqlitePool,
        employee_id: i64,
        service_id: i64,
        status: &str,
        final_price: f64,
    ) -> i64 {
        sqlx::query(
            r#"INSERT INTO appointments
                   (employee_id, service_id, final_price, final_duration_minutes,
                    starts_at, ends_at, status, created_at, updated_at)
               VALUES (?, ?, ?, 60, '2026-03-02T10:00:00', '2026-03-02T11:00:00', ?, ?, ?)"#,
        )
        .bind(employee_id)
        .bind(service_id)
        .bind(final_price)
        .bind(status)
        .bind(now_str())
        .bind(now_str())
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }
}
