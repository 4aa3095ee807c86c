//! Serde helpers for human-readable durations such as `"30s"` or `"5m"`

use std::time::Duration;

use serde::{Deserialize, Deserializer};

fn parse<E: serde::de::Error>(raw: &str) -> Result<Duration, E> {
    duration_str::parse(raw).map_err(|e| E::custom(format!("invalid duration '{raw}': {e}")))
}

pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw)
}

pub(crate) fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|raw| parse(&raw))
        .transpose()
}
