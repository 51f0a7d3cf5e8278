//! Decoding helpers for the authority's JSON encoding.
//!
//! The authority writes absent lists and maps as `null` and unset timestamps
//! as the zero time (`0001-01-01T00:00:00Z`).

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serializer, de};

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: Default + Deserialize<'de>,
{
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) mod opt_time {
  use super::*;

  pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    match value {
      Some(t) => serializer.serialize_str(&t.to_rfc3339()),
      None => serializer.serialize_none(),
    }
  }

  pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
  where
    D: Deserializer<'de>,
  {
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
      return Ok(None);
    };
    if raw.is_empty() {
      return Ok(None);
    }

    let parsed = DateTime::parse_from_rfc3339(&raw)
      .map_err(de::Error::custom)?
      .with_timezone(&Utc);

    if parsed.year() <= 1 {
      Ok(None)
    } else {
      Ok(Some(parsed))
    }
  }
}
