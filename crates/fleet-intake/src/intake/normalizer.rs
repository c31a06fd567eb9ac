use chrono::{DateTime, NaiveDate, NaiveTime};

use super::allowlist::{CanonicalField, SafeRow};
use super::domain::{GeoPoint, LevelOfService, NormalizedTrip};
use super::formats::{FormatCategory, FormatKind};

const CANCELLATION_STATUSES: &[&str] = &[
    "cancelled",
    "canceled",
    "cx",
    "no show",
    "noshow",
    "no-show",
    "late cancel",
];

pub(crate) fn normalize_header(value: &str) -> String {
    let cleaned = value.replace(['\u{feff}', '\u{200b}'], "");
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.to_ascii_lowercase()
}

pub(crate) fn parse_service_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive());
    }

    ["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%m-%d-%Y"]
        .iter()
        .find_map(|pattern| NaiveDate::parse_from_str(trimmed, pattern).ok())
}

pub(crate) fn parse_clock_time(value: &str) -> Option<NaiveTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    let upper = trimmed.to_ascii_uppercase();
    let patterns = ["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M:%S %p", "%I:%M%p"];
    if let Some(time) = patterns
        .iter()
        .find_map(|pattern| NaiveTime::parse_from_str(&upper, pattern).ok())
    {
        return Some(time);
    }

    if upper.len() == 4 && upper.chars().all(|c| c.is_ascii_digit()) {
        return NaiveTime::parse_from_str(&upper, "%H%M").ok();
    }

    None
}

pub(crate) fn is_cancellation_status(value: &str) -> bool {
    let normalized = normalize_header(value);
    CANCELLATION_STATUSES.contains(&normalized.as_str())
}

/// Turn an allowlist-filtered row into a trip, collecting every validation problem.
pub(crate) fn normalize_trip(format: FormatKind, row: &SafeRow) -> Result<NormalizedTrip, String> {
    let mut problems = Vec::new();

    let external_trip_id = row.get(CanonicalField::ExternalTripId).map(str::to_string);
    if external_trip_id.is_none() {
        problems.push("missing external trip id".to_string());
    }

    let service_date = match row.get(CanonicalField::ServiceDate) {
        Some(raw) => {
            let parsed = parse_service_date(raw);
            if parsed.is_none() {
                problems.push("service date is not a recognized date".to_string());
            }
            parsed
        }
        None => {
            problems.push("missing service date".to_string());
            None
        }
    };

    let appointment_time = optional_time(row, CanonicalField::AppointmentTime, &mut problems);
    let pickup_time = optional_time(row, CanonicalField::PickupTime, &mut problems);
    let dropoff_time = optional_time(row, CanonicalField::DropoffTime, &mut problems);

    let driver_id = text(row, CanonicalField::DriverId);
    if format.category() == FormatCategory::ActualTrip && driver_id.is_none() {
        problems.push("missing driver id".to_string());
    }

    let pickup_location = coordinates(
        row,
        CanonicalField::PickupLatitude,
        CanonicalField::PickupLongitude,
        "pickup",
        &mut problems,
    );
    let dropoff_location = coordinates(
        row,
        CanonicalField::DropoffLatitude,
        CanonicalField::DropoffLongitude,
        "dropoff",
        &mut problems,
    );

    let trip_miles = match row.get(CanonicalField::TripMiles) {
        Some(raw) => match raw.trim().parse::<f64>() {
            Ok(miles) if miles.is_finite() && miles >= 0.0 => Some(miles),
            _ => {
                problems.push("trip miles is not a non-negative number".to_string());
                None
            }
        },
        None => None,
    };

    let cancelled = row
        .get(CanonicalField::TripStatus)
        .is_some_and(is_cancellation_status);

    match (external_trip_id, service_date) {
        (Some(external_trip_id), Some(service_date)) if problems.is_empty() => Ok(NormalizedTrip {
            external_trip_id,
            service_date,
            appointment_time,
            pickup_time,
            dropoff_time,
            level_of_service: row
                .get(CanonicalField::LevelOfService)
                .map(LevelOfService::from_code),
            pickup_city: text(row, CanonicalField::PickupCity),
            dropoff_city: text(row, CanonicalField::DropoffCity),
            driver_id,
            driver_name: text(row, CanonicalField::DriverName),
            vehicle_unit: text(row, CanonicalField::VehicleUnit),
            pickup_location,
            dropoff_location,
            funding_source: text(row, CanonicalField::FundingSource),
            trip_miles,
            cancelled,
        }),
        _ => Err(problems.join("; ")),
    }
}

fn text(row: &SafeRow, field: CanonicalField) -> Option<String> {
    row.get(field).map(|value| value.trim().to_string())
}

fn optional_time(
    row: &SafeRow,
    field: CanonicalField,
    problems: &mut Vec<String>,
) -> Option<NaiveTime> {
    let raw = row.get(field)?;
    let parsed = parse_clock_time(raw);
    if parsed.is_none() {
        problems.push(format!("{} is not a recognized time", field.label()));
    }
    parsed
}

fn coordinates(
    row: &SafeRow,
    latitude: CanonicalField,
    longitude: CanonicalField,
    label: &str,
    problems: &mut Vec<String>,
) -> Option<GeoPoint> {
    match (row.get(latitude), row.get(longitude)) {
        (None, None) => None,
        (Some(lat), Some(lon)) => {
            match (lat.trim().parse::<f64>(), lon.trim().parse::<f64>()) {
                (Ok(latitude), Ok(longitude))
                    if (-90.0..=90.0).contains(&latitude)
                        && (-180.0..=180.0).contains(&longitude) =>
                {
                    Some(GeoPoint {
                        latitude,
                        longitude,
                    })
                }
                _ => {
                    problems.push(format!("{label} coordinates are out of range or unreadable"));
                    None
                }
            }
        }
        _ => {
            problems.push(format!("{label} coordinates are incomplete"));
            None
        }
    }
}
