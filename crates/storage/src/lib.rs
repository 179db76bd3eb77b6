mod memory;
mod sqlite;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use fleetline_core::{
    DeliveryStatus, DriverStatus, NotificationKind, UserRole, VehicleType,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub email: String,
    pub phone: Option<String>,
    pub full_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub phone: Option<String>,
    pub full_name: String,
    pub password_hash: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub notification_id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub is_read: bool,
    pub created_at: String,
    pub read_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverRecord {
    pub driver_id: String,
    pub user_id: Option<String>,
    pub full_name: String,
    pub vehicle_type: VehicleType,
    pub status: DriverStatus,
    pub rating: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub delivery_id: String,
    pub driver_id: Option<String>,
    pub status: DeliveryStatus,
    pub distance_km: f64,
    pub fee: f64,
    pub created_at: String,
    pub delivered_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverPerformance {
    pub driver_id: String,
    pub full_name: String,
    pub vehicle_type: String,
    pub status: String,
    pub rating: f64,
    pub total_deliveries: i64,
    pub completed_deliveries: i64,
    pub cancelled_deliveries: i64,
    pub completion_rate: f64,
    pub total_distance_km: f64,
    pub total_earnings: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyDeliveryStat {
    pub day: String,
    pub total: i64,
    pub completed: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub total_deliveries: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub in_progress: i64,
    pub pending: i64,
    pub completion_rate: f64,
    pub total_distance_km: f64,
    pub total_revenue: f64,
    pub active_drivers: i64,
    pub daily: Vec<DailyDeliveryStat>,
}

/// Returned (inside `anyhow::Error`) when `create_user` hits an email or phone that is
/// already taken. Callers recover it with `downcast_ref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DuplicateUser {
    #[error("email already registered")]
    Email,
    #[error("phone already registered")]
    Phone,
}

pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>>;
    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserRecord>>;
    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserRecord>>;
    async fn create_user(&self, user: NewUser) -> Result<UserRecord>;
    async fn set_user_active(&self, user_id: &str, active: bool) -> Result<bool>;
}

pub trait NotificationRepository: Send + Sync {
    async fn create_notification(&self, input: NewNotification) -> Result<NotificationRecord>;
    async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>>;
    /// `None` when the notification does not exist or belongs to someone else.
    async fn mark_notification_read(
        &self,
        notification_id: &str,
        user_id: &str,
    ) -> Result<Option<NotificationRecord>>;
    async fn mark_all_notifications_read(&self, user_id: &str) -> Result<u64>;
    async fn unread_notification_count(&self, user_id: &str) -> Result<u64>;
}

pub trait AnalyticsRepository: Send + Sync {
    async fn driver_performance(
        &self,
        since: DateTime<Utc>,
        status: Option<DriverStatus>,
        limit: u32,
    ) -> Result<Vec<DriverPerformance>>;
    async fn delivery_stats(&self, since: DateTime<Utc>) -> Result<DeliveryStats>;
}

pub trait FleetRepository: Send + Sync {
    async fn upsert_driver(&self, driver: DriverRecord) -> Result<()>;
    async fn insert_delivery(&self, delivery: DeliveryRecord) -> Result<()>;
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        Ok(Self::Sqlite(sqlite))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Store::Memory(_) => "memory",
            Store::Sqlite(_) => "sqlite",
        }
    }
}

impl UserRepository for Store {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        match self {
            Store::Memory(store) => store.find_by_email(email).await,
            Store::Sqlite(store) => store.find_by_email(email).await,
        }
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserRecord>> {
        match self {
            Store::Memory(store) => store.find_by_phone(phone).await,
            Store::Sqlite(store) => store.find_by_phone(phone).await,
        }
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserRecord>> {
        match self {
            Store::Memory(store) => store.find_by_id(user_id).await,
            Store::Sqlite(store) => store.find_by_id(user_id).await,
        }
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord> {
        match self {
            Store::Memory(store) => store.create_user(user).await,
            Store::Sqlite(store) => store.create_user(user).await,
        }
    }

    async fn set_user_active(&self, user_id: &str, active: bool) -> Result<bool> {
        match self {
            Store::Memory(store) => store.set_user_active(user_id, active).await,
            Store::Sqlite(store) => store.set_user_active(user_id, active).await,
        }
    }
}

impl NotificationRepository for Store {
    async fn create_notification(&self, input: NewNotification) -> Result<NotificationRecord> {
        match self {
            Store::Memory(store) => store.create_notification(input).await,
            Store::Sqlite(store) => store.create_notification(input).await,
        }
    }

    async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>> {
        match self {
            Store::Memory(store) => store.list_notifications(user_id, unread_only, limit).await,
            Store::Sqlite(store) => store.list_notifications(user_id, unread_only, limit).await,
        }
    }

    async fn mark_notification_read(
        &self,
        notification_id: &str,
        user_id: &str,
    ) -> Result<Option<NotificationRecord>> {
        match self {
            Store::Memory(store) => store.mark_notification_read(notification_id, user_id).await,
            Store::Sqlite(store) => store.mark_notification_read(notification_id, user_id).await,
        }
    }

    async fn mark_all_notifications_read(&self, user_id: &str) -> Result<u64> {
        match self {
            Store::Memory(store) => store.mark_all_notifications_read(user_id).await,
            Store::Sqlite(store) => store.mark_all_notifications_read(user_id).await,
        }
    }

    async fn unread_notification_count(&self, user_id: &str) -> Result<u64> {
        match self {
            Store::Memory(store) => store.unread_notification_count(user_id).await,
            Store::Sqlite(store) => store.unread_notification_count(user_id).await,
        }
    }
}

impl AnalyticsRepository for Store {
    async fn driver_performance(
        &self,
        since: DateTime<Utc>,
        status: Option<DriverStatus>,
        limit: u32,
    ) -> Result<Vec<DriverPerformance>> {
        match self {
            Store::Memory(store) => store.driver_performance(since, status, limit).await,
            Store::Sqlite(store) => store.driver_performance(since, status, limit).await,
        }
    }

    async fn delivery_stats(&self, since: DateTime<Utc>) -> Result<DeliveryStats> {
        match self {
            Store::Memory(store) => store.delivery_stats(since).await,
            Store::Sqlite(store) => store.delivery_stats(since).await,
        }
    }
}

impl FleetRepository for Store {
    async fn upsert_driver(&self, driver: DriverRecord) -> Result<()> {
        match self {
            Store::Memory(store) => store.upsert_driver(driver).await,
            Store::Sqlite(store) => store.upsert_driver(driver).await,
        }
    }

    async fn insert_delivery(&self, delivery: DeliveryRecord) -> Result<()> {
        match self {
            Store::Memory(store) => store.insert_delivery(delivery).await,
            Store::Sqlite(store) => store.insert_delivery(delivery).await,
        }
    }
}

/// Stored timestamps are second-precision UTC so they compare correctly as text.
pub fn storage_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn completion_rate(completed: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(completed as f64 * 100.0 / total as f64)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
