//! Parsing helpers for the flat key-value settings form.
//!
//! Form values arrive loosely typed: booleans may be JSON booleans or strings,
//! numbers may be strings, lists are comma- or newline-joined strings. Every
//! helper treats `null`, absent and blank values as "unset".

use std::str::FromStr;

use serde_json::{Map, Value};
use torset_core::RateLimit;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{CronSchedule, RateRule};

const BYTES_PER_KIB: u64 = 1_024;

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Read the first present key among `keys`, so renamed form fields keep working.
pub(crate) fn lookup<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find(|value| !value.is_null())
}

/// Interpret a boolean toggle.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for values that are not recognisable booleans.
pub fn read_bool(map: &Map<String, Value>, keys: &[&str], default: bool) -> ConfigResult<bool> {
    let Some(value) = lookup(map, keys) else {
        return Ok(default);
    };
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) => Ok(number.as_i64().is_some_and(|n| n != 0)),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::invalid(
                keys[0],
                Some(text.clone()),
                "not_a_boolean",
            )),
        },
        other => Err(ConfigError::invalid(
            keys[0],
            Some(render(other)),
            "not_a_boolean",
        )),
    }
}

/// Read a trimmed string; blank values collapse to `None`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for arrays and objects.
pub fn read_string(map: &Map<String, Value>, keys: &[&str]) -> ConfigResult<Option<String>> {
    let Some(value) = lookup(map, keys) else {
        return Ok(None);
    };
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Value::Number(number) => Ok(Some(number.to_string())),
        other => Err(ConfigError::invalid(
            keys[0],
            Some(render(other)),
            "not_a_string",
        )),
    }
}

/// Read a non-negative integer; blank values yield `default`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for negative or non-numeric values.
pub fn read_u64(map: &Map<String, Value>, keys: &[&str], default: u64) -> ConfigResult<u64> {
    let Some(value) = lookup(map, keys) else {
        return Ok(default);
    };
    match value {
        Value::Number(number) => number.as_u64().ok_or_else(|| {
            ConfigError::invalid(keys[0], Some(number.to_string()), "not_a_positive_integer")
        }),
        Value::String(text) if text.trim().is_empty() => Ok(default),
        Value::String(text) => text.trim().parse::<u64>().map_err(|_| {
            ConfigError::invalid(keys[0], Some(text.clone()), "not_a_positive_integer")
        }),
        other => Err(ConfigError::invalid(
            keys[0],
            Some(render(other)),
            "not_a_positive_integer",
        )),
    }
}

/// Read a list split on any of `separators`, preserving order and dropping
/// blanks and repeats. JSON arrays of strings are accepted as well.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for values that are neither strings nor arrays.
pub fn read_list(
    map: &Map<String, Value>,
    keys: &[&str],
    separators: &[char],
) -> ConfigResult<Vec<String>> {
    let Some(value) = lookup(map, keys) else {
        return Ok(Vec::new());
    };
    let raw: Vec<String> = match value {
        Value::String(text) => text.split(separators).map(str::to_string).collect(),
        Value::Array(items) => items.iter().map(render).collect(),
        other => {
            return Err(ConfigError::invalid(
                keys[0],
                Some(render(other)),
                "not_a_list",
            ));
        }
    };
    Ok(split_unique(raw))
}

fn split_unique(raw: Vec<String>) -> Vec<String> {
    let mut items: Vec<String> = Vec::with_capacity(raw.len());
    for item in raw {
        let trimmed = item.trim();
        if !trimmed.is_empty() && !items.iter().any(|existing| existing == trimmed) {
            items.push(trimmed.to_string());
        }
    }
    items
}

/// Convert a KiB/s cap to bytes per second; zero means "no cap".
#[must_use]
pub const fn kib_to_bps(kib: u64) -> Option<u64> {
    if kib == 0 {
        None
    } else {
        Some(kib.saturating_mul(BYTES_PER_KIB))
    }
}

/// Parse `label|download|upload` rules, one per line (KiB/s, blank = no cap).
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for lines without a label or with
/// non-numeric limits.
pub fn parse_rate_rules(raw: &str) -> ConfigResult<Vec<RateRule>> {
    let mut rules = Vec::new();
    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let mut parts = line.split('|').map(str::trim);
        let label = parts.next().unwrap_or_default();
        if label.is_empty() {
            return Err(ConfigError::invalid(
                "rate_rules",
                Some(line.to_string()),
                "missing_label",
            ));
        }
        let download = parse_limit(parts.next(), line)?;
        let upload = parse_limit(parts.next(), line)?;
        if parts.next().is_some() {
            return Err(ConfigError::invalid(
                "rate_rules",
                Some(line.to_string()),
                "too_many_fields",
            ));
        }
        rules.push(RateRule {
            label: label.to_string(),
            limits: RateLimit {
                upload_bps: upload,
                download_bps: download,
            },
        });
    }
    Ok(rules)
}

fn parse_limit(part: Option<&str>, line: &str) -> ConfigResult<Option<u64>> {
    match part {
        None | Some("") => Ok(None),
        Some(text) => text
            .parse::<u64>()
            .map(kib_to_bps)
            .map_err(|_| ConfigError::invalid("rate_rules", Some(line.to_string()), "bad_limit")),
    }
}

/// Parse a crontab expression.
///
/// Classic five-field expressions (minute first) are accepted by pinning the
/// seconds field to zero; six- and seven-field expressions are passed through.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when the expression does not parse.
pub fn parse_cron(expression: &str) -> ConfigResult<CronSchedule> {
    let trimmed = expression.trim();
    let normalised = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    let schedule = cron::Schedule::from_str(&normalised)
        .map_err(|_| ConfigError::invalid("cron", Some(trimmed.to_string()), "invalid_cron"))?;
    Ok(CronSchedule::new(trimmed, schedule))
}
