use sqlx::SqlitePool;

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
}
