//! SenML measurement lists to wide telemetry rows.
//!
//! A device reports a sparse list of named measurements; the normalizer folds
//! them into one [`TelemetryDraft`] with a fixed column per known metric and an
//! overflow map for everything else.

use crate::errors::{Error, Result};
use crate::model::{DeviceInfo, Measure, Metrics, TelemetryDraft};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Canonical numeric value of a measurement.
///
/// Priority is `v`, then `vs` parsed as a float, then `vb` as 1/0. A literal
/// zero is data; `None` means the measurement carried nothing usable. Strings
/// that do not parse are dropped rather than rejected.
pub fn coerce_value(measure: &Measure) -> Option<f64> {
    if let Some(v) = measure.v {
        return Some(v);
    }
    if let Some(vs) = &measure.vs {
        return vs.trim().parse::<f64>().ok().filter(|v| v.is_finite());
    }
    measure.vb.map(|b| if b { 1.0 } else { 0.0 })
}

/// Converts fractional epoch seconds to a timestamp, at microsecond precision.
fn epoch_seconds(secs: f64, field: impl FnOnce() -> String) -> Result<DateTime<Utc>> {
    if !secs.is_finite() {
        return Err(Error::validation(field(), "must be a finite number of seconds"));
    }
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
        .ok_or_else(|| Error::validation(field(), format!("{secs} is out of range")))
}

fn offset_duration(secs: f64, field: impl FnOnce() -> String) -> Result<Duration> {
    if !secs.is_finite() {
        return Err(Error::validation(field(), "must be a finite number of seconds"));
    }
    Ok(Duration::microseconds((secs * 1_000_000.0).round() as i64))
}

/// Folds `measures` into one telemetry row for `device`.
///
/// The base time comes from the first measurement's `bt`, falling back to
/// `received_at`. Each measurement sits at `base + t`; the row's time is the
/// latest of those. Repeated names are last-write-wins. Unnamed or blank-named
/// measurements still count towards the row time but store nothing.
pub fn normalize(
    device: &DeviceInfo,
    measures: &[Measure],
    received_at: DateTime<Utc>,
) -> Result<TelemetryDraft> {
    let base = match measures.first().and_then(|m| m.bt) {
        Some(bt) => epoch_seconds(bt, || "measures[0].bt".to_string())?,
        None => received_at,
    };

    let mut time = base;
    let mut metrics = Metrics::default();
    let mut extras = BTreeMap::new();

    for (i, measure) in measures.iter().enumerate() {
        let at = match measure.t {
            Some(t) => base
                .checked_add_signed(offset_duration(t, || format!("measures[{i}].t"))?)
                .ok_or_else(|| Error::validation(format!("measures[{i}].t"), "out of range"))?,
            None => base,
        };
        time = time.max(at);

        let Some(name) = measure.n.as_deref().filter(|n| !n.trim().is_empty()) else {
            continue;
        };
        let kinds = [measure.v.is_some(), measure.vs.is_some(), measure.vb.is_some()];
        if kinds.iter().filter(|present| **present).count() > 1 {
            debug!(
                device_uuid = %device.uuid,
                metric = name,
                "Measurement carries several value kinds"
            );
        }
        let value = coerce_value(measure);
        if !metrics.set(name, value) {
            if let Some(value) = value {
                extras.insert(name.to_string(), value);
            }
        }
    }

    Ok(TelemetryDraft {
        time,
        device_uuid: device.uuid.clone(),
        firmware_version: device.fw_ver.clone(),
        model: device.model.clone(),
        ingested_at: received_at,
        metrics,
        extras,
    })
}
