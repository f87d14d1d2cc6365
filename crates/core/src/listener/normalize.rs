//! Validation of loosely typed messages into [`PassEvent`]s.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::pass::{PassEvent, Platform};

use super::config::ListenerConfig;
use super::types::{MessageKind, RawMessage, TriggerError};

/// Converts one message into one event per announced file.
///
/// Every check happens here; nothing past this point sees an untyped payload.
pub fn normalize(
    msg: &RawMessage,
    config: &ListenerConfig,
    received_at: DateTime<Utc>,
) -> Result<Vec<PassEvent>, TriggerError> {
    let kind = MessageKind::parse(&msg.kind)
        .ok_or_else(|| TriggerError::UnsupportedKind(msg.kind.clone()))?;
    if !config.accepts_topic(&msg.topic) {
        return Err(TriggerError::TopicNotSubscribed(msg.topic.clone()));
    }

    let data = &msg.data;
    let platform_name = data
        .get("platform_name")
        .and_then(Value::as_str)
        .ok_or(TriggerError::MissingField("platform_name"))?;
    let platform: Platform = platform_name
        .parse()
        .map_err(|_| TriggerError::UnsupportedPlatform(platform_name.to_string()))?;

    check_sensor(data.get("sensor"), &config.accepted_sensors)?;

    let start_time = parse_time(
        data.get("start_time")
            .ok_or(TriggerError::MissingField("start_time"))?,
        "start_time",
    )?;
    let end_time = data
        .get("end_time")
        .filter(|v| !v.is_null())
        .map(|v| parse_time(v, "end_time"))
        .transpose()?;
    let orbit_number = data
        .get("orbit_number")
        .filter(|v| !v.is_null())
        .map(|v| parse_u64(v, "orbit_number").and_then(to_orbit))
        .transpose()?;
    if config.require_orbit && orbit_number.is_none() {
        return Err(TriggerError::MissingField("orbit_number"));
    }
    let sequence_hint = data
        .get("sequence_hint")
        .filter(|v| !v.is_null())
        .map(|v| parse_u64(v, "sequence_hint"))
        .transpose()?;

    let uris = match kind {
        MessageKind::File => vec![uri_of(data)?],
        MessageKind::Dataset => dataset_uris(data)?,
        MessageKind::Collection => {
            let entries = data
                .get("collection")
                .and_then(Value::as_array)
                .ok_or(TriggerError::MissingField("collection"))?;
            let mut uris = Vec::new();
            for entry in entries {
                if entry.get("dataset").is_some() {
                    uris.extend(dataset_uris(entry)?);
                } else {
                    uris.push(uri_of(entry)?);
                }
            }
            uris
        }
    };
    if uris.is_empty() {
        return Err(TriggerError::MissingField("uri"));
    }

    uris.into_iter()
        .map(|uri| {
            let path = local_path(uri, &config.local_hosts)?;
            Ok(PassEvent {
                platform,
                start_time,
                uri: path,
                sequence_hint,
                orbit_number,
                end_time,
                topic: msg.topic.clone(),
                received_at,
            })
        })
        .collect()
}

fn uri_of(value: &Value) -> Result<&str, TriggerError> {
    value
        .get("uri")
        .and_then(Value::as_str)
        .ok_or(TriggerError::MissingField("uri"))
}

fn dataset_uris(value: &Value) -> Result<Vec<&str>, TriggerError> {
    value
        .get("dataset")
        .and_then(Value::as_array)
        .ok_or(TriggerError::MissingField("dataset"))?
        .iter()
        .map(uri_of)
        .collect()
}

/// Every listed sensor must be accepted; a missing sensor field is allowed.
fn check_sensor(value: Option<&Value>, accepted: &[String]) -> Result<(), TriggerError> {
    let sensors: Vec<String> = match value {
        None | Some(Value::Null) => return Ok(()),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| TriggerError::invalid("sensor", "expected string or list of strings"))?,
        Some(_) => return Err(TriggerError::invalid("sensor", "expected string or list of strings")),
    };

    let rejected: Vec<String> = sensors
        .into_iter()
        .filter(|s| !accepted.iter().any(|a| a.eq_ignore_ascii_case(s)))
        .collect();
    if rejected.is_empty() {
        Ok(())
    } else {
        Err(TriggerError::UnsupportedSensor(rejected))
    }
}

fn parse_time(value: &Value, field: &'static str) -> Result<DateTime<Utc>, TriggerError> {
    let s = value
        .as_str()
        .ok_or_else(|| TriggerError::invalid(field, "expected a timestamp string"))?;
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(t.and_utc());
        }
    }
    Err(TriggerError::invalid(field, format!("unparseable timestamp '{}'", s)))
}

fn parse_u64(value: &Value, field: &'static str) -> Result<u64, TriggerError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| TriggerError::invalid(field, "expected a non-negative integer")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| TriggerError::invalid(field, format!("'{}' is not an integer", s))),
        _ => Err(TriggerError::invalid(field, "expected an integer")),
    }
}

fn to_orbit(n: u64) -> Result<u32, TriggerError> {
    u32::try_from(n).map_err(|_| TriggerError::invalid("orbit_number", "out of range"))
}

/// Local filesystem path of a `file://` URI or plain path.
fn local_path(uri: &str, local_hosts: &[String]) -> Result<PathBuf, TriggerError> {
    let Some(rest) = uri.strip_prefix("file://") else {
        if uri.contains("://") {
            return Err(TriggerError::invalid("uri", format!("unsupported scheme in '{}'", uri)));
        }
        return Ok(PathBuf::from(uri));
    };

    let (host, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => return Err(TriggerError::invalid("uri", format!("no path in '{}'", uri))),
    };
    if !host.is_empty() && !local_hosts.iter().any(|h| h.eq_ignore_ascii_case(host)) {
        return Err(TriggerError::RemoteFile(host.to_string()));
    }

    let decoded = urlencoding::decode(path)
        .map_err(|e| TriggerError::invalid("uri", e.to_string()))?;
    Ok(PathBuf::from(decoded.into_owned()))
}
