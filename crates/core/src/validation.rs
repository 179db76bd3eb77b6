use thiserror::Error;

use crate::models::{
    Coordinates, DriverAnalyticsQuery, DriverStatus, GeocodeQuery, IsochroneQuery, MatrixQuery,
    NearbyQuery, PlaceQuery, ReverseQuery, RouteQuery, StatsQuery, VehicleType,
    DEFAULT_NEARBY_RADIUS_M, MAX_ISOCHRONE_SECONDS, MAX_MATRIX_POINTS, MAX_NEARBY_RADIUS_M,
    MAX_REF_ID_LEN, MAX_TEXT_LEN, MIN_ISOCHRONE_SECONDS, MIN_MATRIX_POINTS, MIN_NEARBY_RADIUS_M,
    MIN_TEXT_LEN,
};

const DEFAULT_ANALYTICS_DAYS: u32 = 30;
const MAX_ANALYTICS_DAYS: u32 = 365;
const DEFAULT_ANALYTICS_LIMIT: u32 = 20;
const MAX_ANALYTICS_LIMIT: u32 = 100;

/// Input rejected before any I/O. The `Display` text is returned to the client verbatim.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{0} must be a number")]
    NotANumber(&'static str),
    #[error("{0} must be a latitude between -90 and 90")]
    LatitudeOutOfRange(&'static str),
    #[error("{0} must be a longitude between -180 and 180")]
    LongitudeOutOfRange(&'static str),
    #[error("{field} must be in the form lat,lng")]
    MalformedPoint { field: &'static str },
    #[error("{0} must be between 3 and 200 characters")]
    TextLength(&'static str),
    #[error("vehicle must be one of: {}", VehicleType::ALLOWED.join(", "))]
    UnsupportedVehicle(String),
    #[error("matrix requires between 2 and 25 points, got {0}")]
    PointCount(usize),
    #[error("time must be an integer number of seconds between 60 and 3600")]
    TimeRange,
    #[error("radius must be an integer number of meters between 100 and 50000")]
    RadiusRange,
    #[error("{field} must be an integer between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: u32,
        max: u32,
    },
    #[error("{field} is invalid: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Decoded query-string pairs. Repeated keys are kept in order.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// First non-blank value for `key`, trimmed.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .filter(|(name, _)| name == key)
            .map(|(_, value)| value.trim())
            .find(|value| !value.is_empty())
    }

    pub fn all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(name, _)| name == key)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }
}

pub fn parse_latitude(field: &'static str, raw: &str) -> Result<f64, ValidationError> {
    let value = parse_finite(field, raw)?;
    if !(-90.0..=90.0).contains(&value) {
        return Err(ValidationError::LatitudeOutOfRange(field));
    }
    Ok(value)
}

pub fn parse_longitude(field: &'static str, raw: &str) -> Result<f64, ValidationError> {
    let value = parse_finite(field, raw)?;
    if !(-180.0..=180.0).contains(&value) {
        return Err(ValidationError::LongitudeOutOfRange(field));
    }
    Ok(value)
}

pub fn validate_coordinates(lat: f64, lng: f64) -> Result<Coordinates, ValidationError> {
    if !lat.is_finite() {
        return Err(ValidationError::NotANumber("lat"));
    }
    if !lng.is_finite() {
        return Err(ValidationError::NotANumber("lng"));
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(ValidationError::LatitudeOutOfRange("lat"));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(ValidationError::LongitudeOutOfRange("lng"));
    }
    Ok(Coordinates::new(lat, lng))
}

/// Parses a `lat,lng` pair such as `10.7769,106.7009`.
pub fn parse_point(field: &'static str, raw: &str) -> Result<Coordinates, ValidationError> {
    let mut parts = raw.split(',').map(str::trim);
    let (Some(lat), Some(lng), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ValidationError::MalformedPoint { field });
    };
    let lat = parse_latitude(field, lat)?;
    let lng = parse_longitude(field, lng)?;
    Ok(Coordinates::new(lat, lng))
}

pub fn validate_text(field: &'static str, raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if !(MIN_TEXT_LEN..=MAX_TEXT_LEN).contains(&len) {
        return Err(ValidationError::TextLength(field));
    }
    Ok(trimmed.to_string())
}

pub fn parse_vehicle(raw: Option<&str>) -> Result<VehicleType, ValidationError> {
    match raw {
        None => Ok(VehicleType::default()),
        Some(value) => VehicleType::parse(value)
            .ok_or_else(|| ValidationError::UnsupportedVehicle(value.to_string())),
    }
}

pub fn geocode_query(params: &QueryParams) -> Result<GeocodeQuery, ValidationError> {
    let raw = params
        .first_of(&["address", "text", "q"])
        .ok_or(ValidationError::Missing("address"))?;
    let text = validate_text("address", raw)?;
    let focus = optional_coordinates(params, "focus_lat", "focus_lng")?;
    Ok(GeocodeQuery { text, focus })
}

pub fn autocomplete_query(params: &QueryParams) -> Result<GeocodeQuery, ValidationError> {
    let raw = params
        .first_of(&["text", "q", "address"])
        .ok_or(ValidationError::Missing("text"))?;
    let text = validate_text("text", raw)?;
    let focus = optional_coordinates(params, "focus_lat", "focus_lng")?;
    Ok(GeocodeQuery { text, focus })
}

pub fn place_query(params: &QueryParams) -> Result<PlaceQuery, ValidationError> {
    let ref_id = params
        .first_of(&["ref_id", "refid"])
        .ok_or(ValidationError::Missing("ref_id"))?;
    if ref_id.chars().count() > MAX_REF_ID_LEN {
        return Err(ValidationError::Invalid {
            field: "ref_id",
            reason: format!("must be at most {} characters", MAX_REF_ID_LEN),
        });
    }
    Ok(PlaceQuery {
        ref_id: ref_id.to_string(),
    })
}

pub fn reverse_query(params: &QueryParams) -> Result<ReverseQuery, ValidationError> {
    let point = required_coordinates(params, "lat", "lng")?;
    Ok(ReverseQuery { point })
}

pub fn route_query(params: &QueryParams) -> Result<RouteQuery, ValidationError> {
    let origin = match params.get("origin") {
        Some(raw) => parse_point("origin", raw)?,
        None => required_coordinates(params, "origin_lat", "origin_lng")?,
    };
    let destination = match params.get("destination") {
        Some(raw) => parse_point("destination", raw)?,
        None => required_coordinates(params, "dest_lat", "dest_lng")?,
    };
    let vehicle = parse_vehicle(params.get("vehicle"))?;
    Ok(RouteQuery {
        origin,
        destination,
        vehicle,
    })
}

pub fn isochrone_query(params: &QueryParams) -> Result<IsochroneQuery, ValidationError> {
    let point = required_coordinates(params, "lat", "lng")?;
    let time_seconds = params
        .get("time")
        .ok_or(ValidationError::Missing("time"))?
        .parse::<u32>()
        .map_err(|_| ValidationError::TimeRange)?;
    if !(MIN_ISOCHRONE_SECONDS..=MAX_ISOCHRONE_SECONDS).contains(&time_seconds) {
        return Err(ValidationError::TimeRange);
    }
    let vehicle = parse_vehicle(params.get("vehicle"))?;
    Ok(IsochroneQuery {
        point,
        time_seconds,
        vehicle,
    })
}

/// Points come either as repeated `point=lat,lng` or one `points=lat,lng;lat,lng`.
pub fn matrix_query(params: &QueryParams) -> Result<MatrixQuery, ValidationError> {
    let mut raw_points: Vec<&str> = params.all("point").collect();
    if raw_points.is_empty() {
        if let Some(joined) = params.get("points") {
            raw_points = joined
                .split(|c: char| c == ';' || c == '|')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .collect();
        }
    }
    if !(MIN_MATRIX_POINTS..=MAX_MATRIX_POINTS).contains(&raw_points.len()) {
        return Err(ValidationError::PointCount(raw_points.len()));
    }
    let points = raw_points
        .into_iter()
        .map(|raw| parse_point("points", raw))
        .collect::<Result<Vec<_>, _>>()?;

    let vehicle = parse_vehicle(params.get("vehicle"))?;
    let sources = parse_index_list(params.get("sources"), "sources", points.len())?;
    let destinations = parse_index_list(params.get("destinations"), "destinations", points.len())?;

    Ok(MatrixQuery {
        points,
        vehicle,
        sources,
        destinations,
    })
}

pub fn nearby_query(params: &QueryParams) -> Result<NearbyQuery, ValidationError> {
    let point = required_coordinates(params, "lat", "lng")?;
    let radius_m = match params.get("radius") {
        None => DEFAULT_NEARBY_RADIUS_M,
        Some(raw) => raw.parse::<u32>().map_err(|_| ValidationError::RadiusRange)?,
    };
    if !(MIN_NEARBY_RADIUS_M..=MAX_NEARBY_RADIUS_M).contains(&radius_m) {
        return Err(ValidationError::RadiusRange);
    }
    let category = match params.get("category") {
        None => None,
        Some(raw) => {
            if raw.chars().count() > 64
                || !raw
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ',')
            {
                return Err(ValidationError::Invalid {
                    field: "category",
                    reason: "use letters, digits, '-', '_' or ','".to_string(),
                });
            }
            Some(raw.to_string())
        }
    };
    Ok(NearbyQuery {
        point,
        radius_m,
        category,
    })
}

pub fn driver_analytics_query(
    params: &QueryParams,
) -> Result<DriverAnalyticsQuery, ValidationError> {
    let days = bounded_u32(params, "days", 1, MAX_ANALYTICS_DAYS, DEFAULT_ANALYTICS_DAYS)?;
    let limit = bounded_u32(params, "limit", 1, MAX_ANALYTICS_LIMIT, DEFAULT_ANALYTICS_LIMIT)?;
    let status = match params.get("status") {
        None => None,
        Some(raw) => Some(DriverStatus::parse(raw).ok_or_else(|| ValidationError::Invalid {
            field: "status",
            reason: "expected one of active, inactive, busy, offline".to_string(),
        })?),
    };
    Ok(DriverAnalyticsQuery {
        days,
        status,
        limit,
    })
}

pub fn stats_query(params: &QueryParams) -> Result<StatsQuery, ValidationError> {
    let days = bounded_u32(params, "days", 1, MAX_ANALYTICS_DAYS, DEFAULT_ANALYTICS_DAYS)?;
    Ok(StatsQuery { days })
}

fn parse_finite(field: &'static str, raw: &str) -> Result<f64, ValidationError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or(ValidationError::NotANumber(field))
}

fn required_coordinates(
    params: &QueryParams,
    lat_key: &'static str,
    lng_key: &'static str,
) -> Result<Coordinates, ValidationError> {
    let lat = params.get(lat_key).ok_or(ValidationError::Missing(lat_key))?;
    let lng = params.get(lng_key).ok_or(ValidationError::Missing(lng_key))?;
    Ok(Coordinates::new(
        parse_latitude(lat_key, lat)?,
        parse_longitude(lng_key, lng)?,
    ))
}

fn optional_coordinates(
    params: &QueryParams,
    lat_key: &'static str,
    lng_key: &'static str,
) -> Result<Option<Coordinates>, ValidationError> {
    match (params.get(lat_key), params.get(lng_key)) {
        (None, None) => Ok(None),
        _ => required_coordinates(params, lat_key, lng_key).map(Some),
    }
}

fn parse_index_list(
    raw: Option<&str>,
    field: &'static str,
    point_count: usize,
) -> Result<Option<Vec<usize>>, ValidationError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let mut indices = Vec::new();
    for part in raw.split(|c: char| c == ';' || c == ',').map(str::trim) {
        if part.is_empty() {
            continue;
        }
        let index = part.parse::<usize>().map_err(|_| ValidationError::Invalid {
            field,
            reason: format!("'{}' is not a point index", part),
        })?;
        if index >= point_count {
            return Err(ValidationError::Invalid {
                field,
                reason: format!("index {} is out of range for {} points", index, point_count),
            });
        }
        indices.push(index);
    }
    Ok(if indices.is_empty() { None } else { Some(indices) })
}

fn bounded_u32(
    params: &QueryParams,
    field: &'static str,
    min: u32,
    max: u32,
    default_value: u32,
) -> Result<u32, ValidationError> {
    let Some(raw) = params.get(field) else {
        return Ok(default_value);
    };
    let value = raw
        .parse::<u32>()
        .map_err(|_| ValidationError::OutOfRange { field, min, max })?;
    if !(min..=max).contains(&value) {
        return Err(ValidationError::OutOfRange { field, min, max });
    }
    Ok(value)
}
