use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use fleetline_core::{DeliveryStatus, DriverStatus};
use parking_lot::RwLock;

use crate::{
    completion_rate, normalize_email, round2, storage_timestamp, AnalyticsRepository,
    DailyDeliveryStat, DeliveryRecord, DeliveryStats, DriverPerformance, DriverRecord, DuplicateUser,
    FleetRepository, NewNotification, NewUser, NotificationRecord, NotificationRepository,
    UserRecord, UserRepository,
};

#[derive(Clone, Default)]
pub struct MemoryStore {
    users: Arc<RwLock<HashMap<String, UserRecord>>>,
    notifications: Arc<RwLock<Vec<NotificationRecord>>>,
    drivers: Arc<RwLock<HashMap<String, DriverRecord>>>,
    deliveries: Arc<RwLock<Vec<DeliveryRecord>>>,
    analytics_queries: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of analytics queries served so far.
    pub fn analytics_query_count(&self) -> u64 {
        self.analytics_queries.load(Ordering::Relaxed)
    }

    fn deliveries_since(&self, since: &str) -> Vec<DeliveryRecord> {
        self.deliveries
            .read()
            .iter()
            .filter(|delivery| delivery.created_at.as_str() >= since)
            .cloned()
            .collect()
    }
}

impl UserRepository for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let email = normalize_email(email);
        Ok(self
            .users
            .read()
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserRecord>> {
        let phone = phone.trim();
        Ok(self
            .users
            .read()
            .values()
            .find(|user| user.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.read().get(user_id).cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord> {
        let email = normalize_email(&user.email);
        let phone = user.phone.map(|value| value.trim().to_string());

        let mut users = self.users.write();
        if users.values().any(|existing| existing.email == email) {
            return Err(DuplicateUser::Email.into());
        }
        if phone.is_some() && users.values().any(|existing| existing.phone == phone) {
            return Err(DuplicateUser::Phone.into());
        }

        let now = storage_timestamp(Utc::now());
        let record = UserRecord {
            user_id: uuid::Uuid::new_v4().to_string(),
            email,
            phone,
            full_name: user.full_name,
            password_hash: user.password_hash,
            role: user.role,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        };
        users.insert(record.user_id.clone(), record.clone());
        Ok(record)
    }

    async fn set_user_active(&self, user_id: &str, active: bool) -> Result<bool> {
        let mut users = self.users.write();
        let Some(user) = users.get_mut(user_id) else {
            return Ok(false);
        };
        user.is_active = active;
        user.updated_at = storage_timestamp(Utc::now());
        Ok(true)
    }
}

impl NotificationRepository for MemoryStore {
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
        self.notifications.write().push(record.clone());
        Ok(record)
    }

    async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>> {
        // newest first; insertion order breaks ties inside the same second
        Ok(self
            .notifications
            .read()
            .iter()
            .rev()
            .filter(|item| item.user_id == user_id && (!unread_only || !item.is_read))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_notification_read(
        &self,
        notification_id: &str,
        user_id: &str,
    ) -> Result<Option<NotificationRecord>> {
        let mut notifications = self.notifications.write();
        let Some(item) = notifications
            .iter_mut()
            .find(|item| item.notification_id == notification_id && item.user_id == user_id)
        else {
            return Ok(None);
        };
        if !item.is_read {
            item.is_read = true;
            item.read_at = Some(storage_timestamp(Utc::now()));
        }
        Ok(Some(item.clone()))
    }

    async fn mark_all_notifications_read(&self, user_id: &str) -> Result<u64> {
        let now = storage_timestamp(Utc::now());
        let mut updated = 0_u64;
        for item in self
            .notifications
            .write()
            .iter_mut()
            .filter(|item| item.user_id == user_id && !item.is_read)
        {
            item.is_read = true;
            item.read_at = Some(now.clone());
            updated += 1;
        }
        Ok(updated)
    }

    async fn unread_notification_count(&self, user_id: &str) -> Result<u64> {
        Ok(self
            .notifications
            .read()
            .iter()
            .filter(|item| item.user_id == user_id && !item.is_read)
            .count() as u64)
    }
}

impl AnalyticsRepository for MemoryStore {
    async fn driver_performance(
        &self,
        since: DateTime<Utc>,
        status: Option<DriverStatus>,
        limit: u32,
    ) -> Result<Vec<DriverPerformance>> {
        self.analytics_queries.fetch_add(1, Ordering::Relaxed);
        let deliveries = self.deliveries_since(&storage_timestamp(since));

        let mut rows = self
            .drivers
            .read()
            .values()
            .filter(|driver| status.map_or(true, |wanted| driver.status == wanted))
            .map(|driver| {
                let own = deliveries
                    .iter()
                    .filter(|delivery| delivery.driver_id.as_deref() == Some(&driver.driver_id));
                let mut total = 0_i64;
                let mut completed = 0_i64;
                let mut cancelled = 0_i64;
                let mut distance = 0.0_f64;
                let mut earnings = 0.0_f64;
                for delivery in own {
                    total += 1;
                    match delivery.status {
                        DeliveryStatus::Delivered => {
                            completed += 1;
                            distance += delivery.distance_km;
                            earnings += delivery.fee;
                        }
                        DeliveryStatus::Cancelled => cancelled += 1,
                        _ => {}
                    }
                }
                DriverPerformance {
                    driver_id: driver.driver_id.clone(),
                    full_name: driver.full_name.clone(),
                    vehicle_type: driver.vehicle_type.as_str().to_string(),
                    status: driver.status.as_str().to_string(),
                    rating: driver.rating,
                    total_deliveries: total,
                    completed_deliveries: completed,
                    cancelled_deliveries: cancelled,
                    completion_rate: completion_rate(completed, total),
                    total_distance_km: round2(distance),
                    total_earnings: round2(earnings),
                }
            })
            .collect::<Vec<_>>();

        rows.sort_by(|a, b| {
            b.completed_deliveries
                .cmp(&a.completed_deliveries)
                .then(b.total_deliveries.cmp(&a.total_deliveries))
                .then(a.driver_id.cmp(&b.driver_id))
        });
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn delivery_stats(&self, since: DateTime<Utc>) -> Result<DeliveryStats> {
        self.analytics_queries.fetch_add(1, Ordering::Relaxed);
        let deliveries = self.deliveries_since(&storage_timestamp(since));

        let mut stats = DeliveryStats {
            total_deliveries: 0,
            completed: 0,
            cancelled: 0,
            in_progress: 0,
            pending: 0,
            completion_rate: 0.0,
            total_distance_km: 0.0,
            total_revenue: 0.0,
            active_drivers: 0,
            daily: Vec::new(),
        };
        let mut drivers = HashSet::new();
        let mut daily: BTreeMap<String, DailyDeliveryStat> = BTreeMap::new();

        for delivery in &deliveries {
            stats.total_deliveries += 1;
            if let Some(driver_id) = delivery.driver_id.as_deref() {
                drivers.insert(driver_id.to_string());
            }
            let day = delivery.created_at.chars().take(10).collect::<String>();
            let bucket = daily.entry(day.clone()).or_insert_with(|| DailyDeliveryStat {
                day,
                total: 0,
                completed: 0,
                revenue: 0.0,
            });
            bucket.total += 1;

            match delivery.status {
                DeliveryStatus::Delivered => {
                    stats.completed += 1;
                    stats.total_distance_km += delivery.distance_km;
                    stats.total_revenue += delivery.fee;
                    bucket.completed += 1;
                    bucket.revenue += delivery.fee;
                }
                DeliveryStatus::Cancelled => stats.cancelled += 1,
                DeliveryStatus::Pending => stats.pending += 1,
                status if status.is_in_progress() => stats.in_progress += 1,
                _ => {}
            }
        }

        stats.completion_rate = completion_rate(stats.completed, stats.total_deliveries);
        stats.total_distance_km = round2(stats.total_distance_km);
        stats.total_revenue = round2(stats.total_revenue);
        stats.active_drivers = drivers.len() as i64;
        stats.daily = daily
            .into_values()
            .map(|mut bucket| {
                bucket.revenue = round2(bucket.revenue);
                bucket
            })
            .collect();
        Ok(stats)
    }
}

impl FleetRepository for MemoryStore {
    async fn upsert_driver(&self, driver: DriverRecord) -> Result<()> {
        self.drivers
            .write()
            .insert(driver.driver_id.clone(), driver);
        Ok(())
    }

    async fn insert_delivery(&self, delivery: DeliveryRecord) -> Result<()> {
        let mut deliveries = self.deliveries.write();
        if deliveries
            .iter()
            .any(|existing| existing.delivery_id == delivery.delivery_id)
        {
            bail!("delivery {} already exists", delivery.delivery_id);
        }
        deliveries.push(delivery);
        Ok(())
    }
}
