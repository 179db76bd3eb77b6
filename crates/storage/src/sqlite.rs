use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fleetline_core::{DeliveryStatus, DriverStatus, NotificationKind, UserRole};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::{
    completion_rate, normalize_email, round2, storage_timestamp, AnalyticsRepository,
    DailyDeliveryStat, DeliveryRecord, DeliveryStats, DriverPerformance, DriverRecord, DuplicateUser,
    FleetRepository, NewNotification, NewUser, NotificationRecord, NotificationRepository,
    UserRecord, UserRepository,
};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid sqlite url {}", database_url))?
            .create_if_missing(true);

        // an in-memory database only lives as long as its single connection
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
              user_id TEXT PRIMARY KEY,
              email TEXT NOT NULL UNIQUE,
              phone TEXT UNIQUE,
              full_name TEXT NOT NULL,
              password_hash TEXT NOT NULL,
              role TEXT NOT NULL,
              is_active INTEGER NOT NULL DEFAULT 1,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS drivers (
              driver_id TEXT PRIMARY KEY,
              user_id TEXT,
              full_name TEXT NOT NULL,
              vehicle_type TEXT NOT NULL,
              status TEXT NOT NULL,
              rating REAL NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deliveries (
              delivery_id TEXT PRIMARY KEY,
              driver_id TEXT,
              status TEXT NOT NULL,
              distance_km REAL NOT NULL DEFAULT 0,
              fee REAL NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL,
              delivered_at TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_deliveries_created ON deliveries (created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
              notification_id TEXT PRIMARY KEY,
              user_id TEXT NOT NULL,
              title TEXT NOT NULL,
              message TEXT NOT NULL,
              kind TEXT NOT NULL,
              is_read INTEGER NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL,
              read_at TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications (user_id, is_read)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_user_where(&self, column: &str, value: &str) -> Result<Option<UserRecord>> {
        let sql = format!(
            r#"
            SELECT user_id, email, phone, full_name, password_hash, role, is_active,
                   created_at, updated_at
            FROM users
            WHERE {} = ?1
            "#,
            column
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| user_from_row(&row)))
    }
}

fn user_from_row(row: &SqliteRow) -> UserRecord {
    UserRecord {
        user_id: row.get("user_id"),
        email: row.get("email"),
        phone: row.get("phone"),
        full_name: row.get("full_name"),
        password_hash: row.get("password_hash"),
        role: UserRole::parse(row.get::<String, _>("role").as_str()).unwrap_or_default(),
        is_active: row.get::<i64, _>("is_active") != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn notification_from_row(row: &SqliteRow) -> NotificationRecord {
    NotificationRecord {
        notification_id: row.get("notification_id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        message: row.get("message"),
        kind: NotificationKind::parse(row.get::<String, _>("kind").as_str()).unwrap_or_default(),
        is_read: row.get::<i64, _>("is_read") != 0,
        created_at: row.get("created_at"),
        read_at: row.get("read_at"),
    }
}

const NOTIFICATION_COLUMNS: &str =
    "notification_id, user_id, title, message, kind, is_read, created_at, read_at";

impl UserRepository for SqliteStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        self.find_user_where("email", &normalize_email(email)).await
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserRecord>> {
        self.find_user_where("phone", phone.trim()).await
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserRecord>> {
        self.find_user_where("user_id", user_id).await
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord> {
        let now = storage_timestamp(Utc::now());
        let record = UserRecord {
            user_id: uuid::Uuid::new_v4().to_string(),
            email: normalize_email(&user.email),
            phone: user.phone.map(|value| value.trim().to_string()),
            full_name: user.full_name,
            password_hash: user.password_hash,
            role: user.role,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, phone, full_name, password_hash, role, is_active,
                               created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.email)
        .bind(&record.phone)
        .bind(&record.full_name)
        .bind(&record.password_hash)
        .bind(record.role.as_str())
        .bind(&record.created_at)
        .bind(&record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| match duplicate_user(&err) {
            Some(duplicate) => anyhow::Error::new(duplicate),
            None => anyhow::Error::new(err).context("failed inserting user"),
        })?;

        Ok(record)
    }

    async fn set_user_active(&self, user_id: &str, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET is_active = ?1, updated_at = ?2 WHERE user_id = ?3")
            .bind(if active { 1_i64 } else { 0_i64 })
            .bind(storage_timestamp(Utc::now()))
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl NotificationRepository for SqliteStore {
    async fn create_notification(&self, input: NewNotification) -> Result<NotificationRecord> {
        let record = NotificationRecord {
            notification_id: uuid::Uuid::new_v4().to_string(),
            user_id: input.user_id,
            title: input.title,
            message: input.message,
            kind: input.kind,
            is_read: false,
            created_at: storage_timestamp(Utc::now()),
            read_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO notifications (notification_id, user_id, title, message, kind, is_read,
                                       created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
            "#,
        )
        .bind(&record.notification_id)
        .bind(&record.user_id)
        .bind(&record.title)
        .bind(&record.message)
        .bind(record.kind.as_str())
        .bind(&record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM notifications
            WHERE user_id = ?1 AND (?2 = 0 OR is_read = 0)
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?3
            "#,
            NOTIFICATION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(if unread_only { 1_i64 } else { 0_i64 })
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(notification_from_row).collect())
    }

    async fn mark_notification_read(
        &self,
        notification_id: &str,
        user_id: &str,
    ) -> Result<Option<NotificationRecord>> {
        sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = 1, read_at = COALESCE(read_at, ?1)
            WHERE notification_id = ?2 AND user_id = ?3
            "#,
        )
        .bind(storage_timestamp(Utc::now()))
        .bind(notification_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {} FROM notifications WHERE notification_id = ?1 AND user_id = ?2",
            NOTIFICATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(notification_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| notification_from_row(&row)))
    }

    async fn mark_all_notifications_read(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1, read_at = ?1 WHERE user_id = ?2 AND is_read = 0",
        )
        .bind(storage_timestamp(Utc::now()))
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn unread_notification_count(&self, user_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }
}

impl AnalyticsRepository for SqliteStore {
    async fn driver_performance(
        &self,
        since: DateTime<Utc>,
        status: Option<DriverStatus>,
        limit: u32,
    ) -> Result<Vec<DriverPerformance>> {
        let rows = sqlx::query(
            r#"
            SELECT d.driver_id, d.full_name, d.vehicle_type, d.status, d.rating,
              CAST(COUNT(x.delivery_id) AS INTEGER) AS total_deliveries,
              CAST(COALESCE(SUM(CASE WHEN x.status = 'delivered' THEN 1 ELSE 0 END), 0) AS INTEGER)
                AS completed_deliveries,
              CAST(COALESCE(SUM(CASE WHEN x.status = 'cancelled' THEN 1 ELSE 0 END), 0) AS INTEGER)
                AS cancelled_deliveries,
              CAST(COALESCE(SUM(CASE WHEN x.status = 'delivered' THEN x.distance_km ELSE 0 END), 0) AS REAL)
                AS total_distance_km,
              CAST(COALESCE(SUM(CASE WHEN x.status = 'delivered' THEN x.fee ELSE 0 END), 0) AS REAL)
                AS total_earnings
            FROM drivers d
            LEFT JOIN deliveries x ON x.driver_id = d.driver_id AND x.created_at >= ?1
            WHERE (?2 IS NULL OR d.status = ?2)
            GROUP BY d.driver_id, d.full_name, d.vehicle_type, d.status, d.rating
            ORDER BY completed_deliveries DESC, total_deliveries DESC, d.driver_id ASC
            LIMIT ?3
            "#,
        )
        .bind(storage_timestamp(since))
        .bind(status.map(DriverStatus::as_str))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let report = rows
            .into_iter()
            .map(|row| {
                let total: i64 = row.get("total_deliveries");
                let completed: i64 = row.get("completed_deliveries");
                DriverPerformance {
                    driver_id: row.get("driver_id"),
                    full_name: row.get("full_name"),
                    vehicle_type: row.get("vehicle_type"),
                    status: row.get("status"),
                    rating: row.get("rating"),
                    total_deliveries: total,
                    completed_deliveries: completed,
                    cancelled_deliveries: row.get("cancelled_deliveries"),
                    completion_rate: completion_rate(completed, total),
                    total_distance_km: round2(row.get("total_distance_km")),
                    total_earnings: round2(row.get("total_earnings")),
                }
            })
            .collect();

        Ok(report)
    }

    async fn delivery_stats(&self, since: DateTime<Utc>) -> Result<DeliveryStats> {
        let since = storage_timestamp(since);

        let totals = sqlx::query(
            r#"
            SELECT
              CAST(COUNT(*) AS INTEGER) AS total_deliveries,
              CAST(COALESCE(SUM(CASE WHEN status = 'delivered' THEN 1 ELSE 0 END), 0) AS INTEGER) AS completed,
              CAST(COALESCE(SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END), 0) AS INTEGER) AS cancelled,
              CAST(COALESCE(SUM(CASE WHEN status IN ('assigned', 'in_transit') THEN 1 ELSE 0 END), 0) AS INTEGER)
                AS in_progress,
              CAST(COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS INTEGER) AS pending,
              CAST(COALESCE(SUM(CASE WHEN status = 'delivered' THEN distance_km ELSE 0 END), 0) AS REAL)
                AS total_distance_km,
              CAST(COALESCE(SUM(CASE WHEN status = 'delivered' THEN fee ELSE 0 END), 0) AS REAL)
                AS total_revenue,
              CAST(COUNT(DISTINCT driver_id) AS INTEGER) AS active_drivers
            FROM deliveries
            WHERE created_at >= ?1
            "#,
        )
        .bind(&since)
        .fetch_one(&self.pool)
        .await?;

        let daily_rows = sqlx::query(
            r#"
            SELECT substr(created_at, 1, 10) AS day,
              CAST(COUNT(*) AS INTEGER) AS total,
              CAST(COALESCE(SUM(CASE WHEN status = 'delivered' THEN 1 ELSE 0 END), 0) AS INTEGER) AS completed,
              CAST(COALESCE(SUM(CASE WHEN status = 'delivered' THEN fee ELSE 0 END), 0) AS REAL) AS revenue
            FROM deliveries
            WHERE created_at >= ?1
            GROUP BY day
            ORDER BY day ASC
            "#,
        )
        .bind(&since)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = totals.get("total_deliveries");
        let completed: i64 = totals.get("completed");

        Ok(DeliveryStats {
            total_deliveries: total,
            completed,
            cancelled: totals.get("cancelled"),
            in_progress: totals.get("in_progress"),
            pending: totals.get("pending"),
            completion_rate: completion_rate(completed, total),
            total_distance_km: round2(totals.get("total_distance_km")),
            total_revenue: round2(totals.get("total_revenue")),
            active_drivers: totals.get("active_drivers"),
            daily: daily_rows
                .into_iter()
                .map(|row| DailyDeliveryStat {
                    day: row.get("day"),
                    total: row.get("total"),
                    completed: row.get("completed"),
                    revenue: round2(row.get("revenue")),
                })
                .collect(),
        })
    }
}

impl FleetRepository for SqliteStore {
    async fn upsert_driver(&self, driver: DriverRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO drivers (driver_id, user_id, full_name, vehicle_type, status, rating, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(driver_id) DO UPDATE SET
              user_id=excluded.user_id,
              full_name=excluded.full_name,
              vehicle_type=excluded.vehicle_type,
              status=excluded.status,
              rating=excluded.rating
            "#,
        )
        .bind(&driver.driver_id)
        .bind(&driver.user_id)
        .bind(&driver.full_name)
        .bind(driver.vehicle_type.as_str())
        .bind(driver.status.as_str())
        .bind(driver.rating)
        .bind(&driver.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_delivery(&self, delivery: DeliveryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO deliveries (delivery_id, driver_id, status, distance_km, fee, created_at,
                                    delivered_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&delivery.delivery_id)
        .bind(&delivery.driver_id)
        .bind(delivery.status.as_str())
        .bind(delivery.distance_km)
        .bind(delivery.fee)
        .bind(&delivery.created_at)
        .bind(&delivery.delivered_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed inserting delivery {}", delivery.delivery_id))?;

        Ok(())
    }
}

// sqlite reports the offending column as "UNIQUE constraint failed: users.<column>"
fn duplicate_user(err: &sqlx::Error) -> Option<DuplicateUser> {
    let sqlx::Error::Database(db) = err else {
        return None;
    };
    if !db.is_unique_violation() {
        return None;
    }
    if db.message().contains("users.phone") {
        Some(DuplicateUser::Phone)
    } else {
        Some(DuplicateUser::Email)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use fleetline_core::VehicleType;

    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn analytics_sql_matches_in_memory_semantics() {
        let store = store().await;
        for (id, status) in [("d1", DriverStatus::Active), ("d2", DriverStatus::Busy)] {
            store
                .upsert_driver(DriverRecord {
                    driver_id: id.to_string(),
                    user_id: None,
                    full_name: format!("Driver {}", id),
                    vehicle_type: VehicleType::Motorcycle,
                    status,
                    rating: 4.5,
                    created_at: storage_timestamp(Utc::now()),
                })
                .await
                .unwrap();
        }

        let recent = storage_timestamp(Utc::now() - Duration::hours(2));
        for (id, driver, status, fee) in [
            ("a", "d1", DeliveryStatus::Delivered, 30_000.0),
            ("b", "d1", DeliveryStatus::Delivered, 20_000.0),
            ("c", "d1", DeliveryStatus::Cancelled, 0.0),
            ("e", "d2", DeliveryStatus::Pending, 15_000.0),
        ] {
            store
                .insert_delivery(DeliveryRecord {
                    delivery_id: id.to_string(),
                    driver_id: Some(driver.to_string()),
                    status,
                    distance_km: 3.25,
                    fee,
                    created_at: recent.clone(),
                    delivered_at: None,
                })
                .await
                .unwrap();
        }

        let since = Utc::now() - Duration::days(30);
        let report = store.driver_performance(since, None, 20).await.unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].driver_id, "d1");
        assert_eq!(report[0].completed_deliveries, 2);
        assert_eq!(report[0].completion_rate, 66.67);
        assert_eq!(report[0].total_distance_km, 6.5);
        assert_eq!(report[0].total_earnings, 50_000.0);
        assert_eq!(report[0].vehicle_type, "motorcycle");

        let busy = store
            .driver_performance(since, Some(DriverStatus::Busy), 20)
            .await
            .unwrap();
        assert_eq!(busy.len(), 1);
        assert_eq!(busy[0].driver_id, "d2");

        let stats = store.delivery_stats(since).await.unwrap();
        assert_eq!(stats.total_deliveries, 4);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.completion_rate, 50.0);
        assert_eq!(stats.active_drivers, 2);
        assert_eq!(stats.daily.len(), 1);
        assert_eq!(stats.daily[0].revenue, 50_000.0);
    }

    #[tokio::test]
    async fn users_and_notifications_round_trip_through_sqlite() {
        let store = store().await;
        let user = store
            .create_user(NewUser {
                email: " Minh@Example.com ".to_string(),
                phone: None,
                full_name: "Minh".to_string(),
                password_hash: "hash".to_string(),
                role: UserRole::Manager,
            })
            .await
            .unwrap();

        let found = store.find_by_email("minh@example.com").await.unwrap().unwrap();
        assert_eq!(found.user_id, user.user_id);
        assert_eq!(found.role, UserRole::Manager);
        assert!(found.is_active);

        assert!(store.set_user_active(&user.user_id, false).await.unwrap());
        let found = store.find_by_id(&user.user_id).await.unwrap().unwrap();
        assert!(!found.is_active);

        for title in ["first", "second"] {
            store
                .create_notification(NewNotification {
                    user_id: user.user_id.clone(),
                    title: title.to_string(),
                    message: "body".to_string(),
                    kind: NotificationKind::Alert,
                })
                .await
                .unwrap();
        }
        let listed = store
            .list_notifications(&user.user_id, false, 10)
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].title, "second");

        assert!(store
            .mark_notification_read(&listed[0].notification_id, "someone-else")
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.mark_all_notifications_read(&user.user_id).await.unwrap(), 2);
        assert_eq!(store.unread_notification_count(&user.user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unique_violations_surface_as_duplicate_user() {
        let store = store().await;
        let user = |email: &str, phone: Option<&str>| NewUser {
            email: email.to_string(),
            phone: phone.map(str::to_string),
            full_name: "Thu".to_string(),
            password_hash: "hash".to_string(),
            role: UserRole::Driver,
        };
        store
            .create_user(user("thu@example.com", Some("0912000111")))
            .await
            .unwrap();

        let email = store
            .create_user(user("THU@example.com", None))
            .await
            .unwrap_err();
        assert_eq!(email.downcast_ref::<DuplicateUser>(), Some(&DuplicateUser::Email));

        let phone = store
            .create_user(user("other@example.com", Some("0912000111")))
            .await
            .unwrap_err();
        assert_eq!(phone.downcast_ref::<DuplicateUser>(), Some(&DuplicateUser::Phone));
    }
}
