use std::fmt;

use serde::{Deserialize, Serialize};

pub const MIN_TEXT_LEN: usize = 3;
pub const MAX_TEXT_LEN: usize = 200;
pub const MIN_MATRIX_POINTS: usize = 2;
pub const MAX_MATRIX_POINTS: usize = 25;
pub const MIN_ISOCHRONE_SECONDS: u32 = 60;
pub const MAX_ISOCHRONE_SECONDS: u32 = 3_600;
pub const MIN_NEARBY_RADIUS_M: u32 = 100;
pub const MAX_NEARBY_RADIUS_M: u32 = 50_000;
pub const DEFAULT_NEARBY_RADIUS_M: u32 = 1_000;
pub const MAX_REF_ID_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// `lat,lng` as the upstream provider expects it in `point` parameters.
    pub fn as_point_param(&self) -> String {
        format!("{},{}", self.lat, self.lng)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    #[default]
    Car,
    Motorcycle,
    Bike,
    Truck,
}

impl VehicleType {
    pub const ALLOWED: [&'static str; 4] = ["car", "motorcycle", "bike", "truck"];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "car" => Some(Self::Car),
            // older dashboard builds still send `motorbike`
            "motorcycle" | "motorbike" => Some(Self::Motorcycle),
            "bike" => Some(Self::Bike),
            "truck" => Some(Self::Truck),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Motorcycle => "motorcycle",
            Self::Bike => "bike",
            Self::Truck => "truck",
        }
    }
}

/// One proxied upstream capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Geocode,
    Autocomplete,
    Place,
    ReverseGeocode,
    Route,
    Isochrone,
    Matrix,
    Nearby,
}

impl Capability {
    /// Human-readable name used in error messages (`"Routing failed: 503"`).
    pub fn label(self) -> &'static str {
        match self {
            Self::Geocode => "Geocoding",
            Self::Autocomplete => "Autocomplete",
            Self::Place => "Place lookup",
            Self::ReverseGeocode => "Reverse geocoding",
            Self::Route => "Routing",
            Self::Isochrone => "Isochrone",
            Self::Matrix => "Distance matrix",
            Self::Nearby => "Nearby search",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Geocode => "geocode",
            Self::Autocomplete => "autocomplete",
            Self::Place => "place",
            Self::ReverseGeocode => "reverse_geocode",
            Self::Route => "route",
            Self::Isochrone => "isochrone",
            Self::Matrix => "matrix",
            Self::Nearby => "nearby",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodeQuery {
    pub text: String,
    pub focus: Option<Coordinates>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceQuery {
    pub ref_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReverseQuery {
    pub point: Coordinates,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteQuery {
    pub origin: Coordinates,
    pub destination: Coordinates,
    pub vehicle: VehicleType,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IsochroneQuery {
    pub point: Coordinates,
    pub time_seconds: u32,
    pub vehicle: VehicleType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixQuery {
    pub points: Vec<Coordinates>,
    pub vehicle: VehicleType,
    pub sources: Option<Vec<usize>>,
    pub destinations: Option<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyQuery {
    pub point: Coordinates,
    pub radius_m: u32,
    pub category: Option<String>,
}

/// A validated request for one upstream capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "capability", rename_all = "snake_case")]
pub enum ProxyRequestSpec {
    Geocode(GeocodeQuery),
    Autocomplete(GeocodeQuery),
    Place(PlaceQuery),
    ReverseGeocode(ReverseQuery),
    Route(RouteQuery),
    Isochrone(IsochroneQuery),
    Matrix(MatrixQuery),
    Nearby(NearbyQuery),
}

impl ProxyRequestSpec {
    pub fn capability(&self) -> Capability {
        match self {
            Self::Geocode(_) => Capability::Geocode,
            Self::Autocomplete(_) => Capability::Autocomplete,
            Self::Place(_) => Capability::Place,
            Self::ReverseGeocode(_) => Capability::ReverseGeocode,
            Self::Route(_) => Capability::Route,
            Self::Isochrone(_) => Capability::Isochrone,
            Self::Matrix(_) => Capability::Matrix,
            Self::Nearby(_) => Capability::Nearby,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Driver,
    Manager,
}

impl UserRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "driver" => Some(Self::Driver),
            "manager" | "admin" => Some(Self::Manager),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Manager => "manager",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Active,
    Inactive,
    Busy,
    Offline,
}

impl DriverStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "busy" => Some(Self::Busy),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    #[default]
    Info,
    Delivery,
    Alert,
    System,
}

impl NotificationKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "info" => Some(Self::Info),
            "delivery" => Some(Self::Delivery),
            "alert" => Some(Self::Alert),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Delivery => "delivery",
            Self::Alert => "alert",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    InTransit,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "assigned" => Some(Self::Assigned),
            "in_transit" | "in-transit" => Some(Self::InTransit),
            "delivered" | "completed" => Some(Self::Delivered),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Assigned | Self::InTransit)
    }
}

/// Filters for the per-driver performance report.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverAnalyticsQuery {
    pub days: u32,
    pub status: Option<DriverStatus>,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsQuery {
    pub days: u32,
}
