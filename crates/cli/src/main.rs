use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use fleetline_api::config::{map_provider_from_env, rate_limits_from_env};
use fleetline_core::validation::{parse_point, parse_vehicle, validate_coordinates, validate_text};
use fleetline_core::{
    DeliveryStatus, DriverStatus, Envelope, GeocodeQuery, ProxyRequestSpec, ReverseQuery,
    RouteQuery, VehicleType,
};
use fleetline_mapping::{MapClient, ReqwestTransport};
use fleetline_observability::{init_tracing, AppMetrics};
use fleetline_storage::{
    storage_timestamp, DeliveryRecord, DriverRecord, FleetRepository, SqliteStore, UserRepository,
};

#[derive(Debug, Parser)]
#[command(name = "fleetctl")]
#[command(about = "Fleetline operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the database schema.
    Migrate {
        #[arg(long, env = "FLEET_DATABASE_URL")]
        database_url: String,
    },
    /// Print the effective per-route rate limits.
    Limits,
    /// Insert demo drivers and deliveries for local dashboards.
    Seed {
        #[arg(long, env = "FLEET_DATABASE_URL")]
        database_url: String,
        #[arg(long, default_value_t = 5)]
        drivers: u32,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Block a user from logging in.
    DeactivateUser {
        #[arg(long, env = "FLEET_DATABASE_URL")]
        database_url: String,
        #[arg(long)]
        email: String,
    },
    Geocode {
        #[arg(long)]
        address: String,
    },
    Reverse {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
    },
    Route {
        /// Origin as `lat,lng`.
        #[arg(long)]
        from: String,
        /// Destination as `lat,lng`.
        #[arg(long)]
        to: String,
        #[arg(long, default_value = "car")]
        vehicle: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("fleetline_cli");
    let cli = Cli::parse();

    match cli.command {
        Command::Migrate { database_url } => {
            SqliteStore::connect(&database_url).await?;
            println!("schema ready at {}", database_url);
        }
        Command::Limits => {
            let settings = rate_limits_from_env()?;
            println!(
                "window: {}s, max keys per limiter: {}",
                settings.window.as_secs(),
                settings.max_keys
            );
            for (class, limit) in &settings.limits {
                println!("{:<16} {:>5} / window", class.as_str(), limit);
            }
        }
        Command::Seed {
            database_url,
            drivers,
            days,
        } => {
            let store = SqliteStore::connect(&database_url).await?;
            let inserted = seed_demo_data(&store, drivers, days).await?;
            println!("seeded {} drivers and {} deliveries", drivers, inserted);
        }
        Command::DeactivateUser {
            database_url,
            email,
        } => {
            let store = SqliteStore::connect(&database_url).await?;
            let Some(user) = store.find_by_email(&email).await? else {
                bail!("no user registered with {}", email);
            };
            store.set_user_active(&user.user_id, false).await?;
            println!("deactivated {} ({})", user.email, user.user_id);
        }
        Command::Geocode { address } => {
            let text = validate_text("address", &address)?;
            let spec = ProxyRequestSpec::Geocode(GeocodeQuery { text, focus: None });
            print_upstream(&spec).await?;
        }
        Command::Reverse { lat, lng } => {
            let point = validate_coordinates(lat, lng)?;
            print_upstream(&ProxyRequestSpec::ReverseGeocode(ReverseQuery { point })).await?;
        }
        Command::Route { from, to, vehicle } => {
            let spec = ProxyRequestSpec::Route(RouteQuery {
                origin: parse_point("from", &from)?,
                destination: parse_point("to", &to)?,
                vehicle: parse_vehicle(Some(&vehicle))?,
            });
            print_upstream(&spec).await?;
        }
    }

    Ok(())
}

async fn print_upstream(spec: &ProxyRequestSpec) -> Result<()> {
    let config = map_provider_from_env()?;
    let transport = ReqwestTransport::new(config.timeout, config.connect_timeout)
        .context("failed to build HTTP client")?;
    let client = MapClient::new(config, Arc::new(transport), AppMetrics::shared());

    let data = client.fetch(spec).await?;
    println!("{}", serde_json::to_string_pretty(&Envelope::upstream(data))?);
    Ok(())
}

async fn seed_demo_data(store: &SqliteStore, drivers: u32, days: u32) -> Result<u32> {
    let vehicles = [
        VehicleType::Motorcycle,
        VehicleType::Car,
        VehicleType::Bike,
        VehicleType::Truck,
    ];
    let statuses = [
        DeliveryStatus::Delivered,
        DeliveryStatus::Delivered,
        DeliveryStatus::Delivered,
        DeliveryStatus::InTransit,
        DeliveryStatus::Cancelled,
        DeliveryStatus::Pending,
    ];
    let now = Utc::now();
    let mut inserted = 0_u32;

    for index in 0..drivers {
        let driver_id = format!("demo-driver-{}", index + 1);
        store
            .upsert_driver(DriverRecord {
                driver_id: driver_id.clone(),
                user_id: None,
                full_name: format!("Demo Driver {}", index + 1),
                vehicle_type: vehicles[index as usize % vehicles.len()],
                status: if index % 4 == 3 {
                    DriverStatus::Offline
                } else {
                    DriverStatus::Active
                },
                rating: 4.0 + f64::from(index % 10) / 10.0,
                created_at: storage_timestamp(now),
            })
            .await?;

        for day in 0..days {
            let status = statuses[((index + day) as usize) % statuses.len()];
            let created = now - Duration::days(i64::from(day)) - Duration::hours(i64::from(index % 12));
            let distance_km = 2.0 + f64::from((index * 7 + day * 3) % 15);
            store
                .insert_delivery(DeliveryRecord {
                    delivery_id: format!("{}-{}", driver_id, day),
                    driver_id: Some(driver_id.clone()),
                    status,
                    distance_km,
                    fee: 15_000.0 + distance_km * 5_000.0,
                    created_at: storage_timestamp(created),
                    delivered_at: (status == DeliveryStatus::Delivered)
                        .then(|| storage_timestamp(created + Duration::minutes(35))),
                })
                .await?;
            inserted += 1;
        }
    }

    Ok(inserted)
}
