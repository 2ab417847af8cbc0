use serde::Serialize;

pub const STATUS_SCHEDULED: &str = "SCHEDULED";
pub const STATUS_DONE: &str = "DONE";
pub const STATUS_CANCELLED: &str = "CANCELLED";

pub const METHOD_CASH: &str = "CASH";
pub const METHOD_TRANSFER: &str = "TRANSFER";
pub const METHOD_CARD: &str = "CARD";
pub const METHOD_MP: &str = "MP";

/// Methods the legacy per-appointment endpoint accepts.
pub const LEGACY_PAYMENT_METHODS: [&str; 2] = [METHOD_CASH, METHOD_TRANSFER];
/// Methods the structured endpoint accepts.
pub const PAYMENT_METHODS: [&str; 4] = [METHOD_CASH, METHOD_TRANSFER, METHOD_CARD, METHOD_MP];

/// Rank meaning "no explicit position"; unranked services sort after the
/// ordered block.
pub const PRIORITY_UNRANKED: i64 = 999;
/// Transient rank a row is parked at while it moves inside the ordered
/// block. Always outside the live range, never visible after commit.
pub const PRIORITY_PARKED: i64 = 9999;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EmployeeRow {
    pub id: i64,
    pub name: String,
    pub color: Option<String>,
    pub active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ServiceRow {
    pub id: i64,
    pub name: String,
    pub base_price: f64,
    pub base_duration_minutes: i64,
    pub category: Option<String>,
    pub orden_prioridad: i64,
    pub active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ClientRow {
    pub id: i64,
    pub full_name: String,
    pub phone: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: i64,
    pub employee_id: i64,
    pub client_id: Option<i64>,
    pub service_id: Option<i64>,
    pub final_price: f64,
    pub final_duration_minutes: i64,
    pub notes: Option<String>,
    pub starts_at: String,
    pub ends_at: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Appointment plus the display fields the agenda views join in.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppointmentDetailRow {
    pub id: i64,
    pub employee_id: i64,
    pub client_id: Option<i64>,
    pub service_id: Option<i64>,
    pub final_price: f64,
    pub final_duration_minutes: i64,
    pub notes: Option<String>,
    pub starts_at: String,
    pub ends_at: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub employee_name: Option<String>,
    pub employee_color: Option<String>,
    pub service_name: Option<String>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PaymentRow {
    pub id: i64,
    pub method: String,
    pub amount: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DailyNoteRow {
    pub id: i64,
    pub date: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Aggregate block shared by the service and client stats views.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppointmentStats {
    pub total_appointments: i64,
    pub completed_appointments: i64,
    pub average_price: Option<f64>,
    pub total_revenue: Option<f64>,
    pub last_appointment: Option<String>,
    pub first_appointment: Option<String>,
}

/// Half-up rounding to 2 decimals. f64::round rounds halves away from zero,
/// which is half-up for the non-negative amounts handled here.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Money comparisons happen at cent precision so float noise from summing
/// REAL columns cannot flip a threshold.
pub fn cents(value: f64) -> i64 {
    (value * 100.0).round() as i64
}
