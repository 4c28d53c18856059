use crate::errors::{Error, Result};
use crate::model::SenmlPayload;
use crate::pagination::{Direction, PageRequest};
use chrono::{DateTime, Utc};

const UUID_MAX_LEN: usize = 128;
const MAX_MEASURES: usize = 1024;
pub const PAGE_SIZE_MIN: u32 = 1;
pub const PAGE_SIZE_MAX: u32 = 1000;

/// Parses a raw MQTT payload and checks its minimal shape. The device uuid is
/// returned trimmed so that it keys one station regardless of padding.
pub fn parse_payload(payload: &[u8]) -> Result<SenmlPayload> {
    let mut parsed = serde_json::from_slice::<SenmlPayload>(payload)
        .map_err(|e| Error::validation("payload", format!("JSON parse error: {e}")))?;
    validate(&parsed)?;
    let uuid = parsed.device_info.uuid.trim();
    if uuid.len() != parsed.device_info.uuid.len() {
        parsed.device_info.uuid = uuid.to_string();
    }
    Ok(parsed)
}

/// Validates a SenML payload: a device identity plus a bounded list of
/// measurements. Individual measurements are not checked here; the normalizer
/// skips unnamed ones and resolves mixed value kinds by priority.
pub fn validate(payload: &SenmlPayload) -> Result<()> {
    let uuid = payload.device_info.uuid.trim();
    if uuid.is_empty() {
        return Err(Error::validation(
            "device_info.uuid",
            "device uuid cannot be empty",
        ));
    }
    if uuid.len() > UUID_MAX_LEN {
        return Err(Error::validation(
            "device_info.uuid",
            format!("longer than {UUID_MAX_LEN} characters"),
        ));
    }

    if payload.device_info.fw_ver.trim().is_empty() {
        return Err(Error::validation(
            "device_info.fw_ver",
            "firmware version cannot be empty",
        ));
    }

    if payload.measures.len() > MAX_MEASURES {
        return Err(Error::validation(
            "measures",
            format!("{} records exceed the limit of {MAX_MEASURES}", payload.measures.len()),
        ));
    }

    Ok(())
}

/// Rejects empty or inverted time ranges.
pub fn validate_time_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if start >= end {
        return Err(Error::validation(
            "start",
            format!("start ({}) must be before end ({})", start.to_rfc3339(), end.to_rfc3339()),
        ));
    }
    Ok(())
}

/// Clamps a requested page size into `[PAGE_SIZE_MIN, PAGE_SIZE_MAX]`.
pub fn clamp_limit(limit: i64) -> u32 {
    limit.clamp(PAGE_SIZE_MIN as i64, PAGE_SIZE_MAX as i64) as u32
}

/// Builds a page request from Relay-style arguments.
///
/// `first`/`after` page forward and `last`/`before` page backward; mixing the
/// two directions is rejected.
pub fn resolve_page(
    first: Option<i64>,
    after: Option<String>,
    last: Option<i64>,
    before: Option<String>,
    default_limit: u32,
) -> Result<PageRequest> {
    if after.is_some() && before.is_some() {
        return Err(Error::validation(
            "after",
            "cannot be combined with before",
        ));
    }
    if first.is_some() && last.is_some() {
        return Err(Error::validation("first", "cannot be combined with last"));
    }

    let backward = last.is_some() || before.is_some();
    if backward && (first.is_some() || after.is_some()) {
        return Err(Error::validation(
            if first.is_some() { "first" } else { "after" },
            "forward arguments cannot be combined with last/before",
        ));
    }

    let direction = if backward {
        Direction::Backward
    } else {
        Direction::Forward
    };
    let limit = clamp_limit(first.or(last).unwrap_or(default_limit as i64));

    Ok(PageRequest {
        limit,
        direction,
        after,
        before,
    })
}
