//! Serde helpers for flexible deserialization of live events.
//!
//! When the `tracing` feature is enabled, payloads that carry fields this crate does not model
//! are logged, which makes server-side schema drift visible without failing delivery.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// A `serde_as` type that deserializes strings or integers as `String`.
///
/// Entity ids are strings in most payloads, but some producers emit numeric ids. Use with
/// `#[serde_as(as = "StringFromAny")]` for `String` fields or
/// `#[serde_as(as = "Option<StringFromAny>")]` for `Option<String>`.
pub struct StringFromAny;

impl<'de> serde_with::DeserializeAs<'de, String> for StringFromAny {
    fn deserialize_as<D>(deserializer: D) -> std::result::Result<String, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use std::fmt;

        use serde::de::{self, Visitor};

        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = String;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an id given as string or integer")
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_owned())
            }

            fn visit_string<E>(self, v: String) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v)
            }

            fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_string())
            }

            fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_string())
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

impl serde_with::SerializeAs<String> for StringFromAny {
    fn serialize_as<S>(source: &String, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(source)
    }
}

/// Deserialize an event payload, logging fields the target type does not capture.
///
/// Unknown fields never fail deserialization. On failure the offending path and its value
/// are logged before the error is returned.
///
/// ```ignore
/// let json = serde_json::json!({
///     "event": "sensor:data",
///     "data": { "sensorId": "S1", "value": 1.0, "battery": 87 }
/// });
/// let event: InboundEvent = deserialize_with_warnings(json)?;
/// // Logs: WARN unknown field in live event field=data.battery value=87
/// ```
#[cfg(feature = "tracing")]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    tracing::trace!(
        type_name = %type_name::<T>(),
        json = %value,
        "deserializing live event"
    );

    let original = value.clone();
    let mut unknown_paths: Vec<String> = Vec::new();

    let result: T = serde_ignored::deserialize(value, |path| {
        unknown_paths.push(path.to_string());
    })
    .inspect_err(|_| {
        // serde_ignored loses the failing path, so run the payload through serde_path_to_error
        let json_str = original.to_string();
        let jd = &mut serde_json::Deserializer::from_str(&json_str);
        let path_result: Result<T, _> = serde_path_to_error::deserialize(jd);
        if let Err(path_err) = path_result {
            let path = path_err.path().to_string();
            let value_display = format_value(lookup_value(&original, &path));

            tracing::error!(
                type_name = %type_name::<T>(),
                path = %path,
                value = %value_display,
                error = %path_err.inner(),
                "live event deserialization failed"
            );
        }
    })?;

    for path in unknown_paths {
        let value_display = format_value(lookup_value(&original, &path));

        tracing::warn!(
            type_name = %type_name::<T>(),
            field = %path,
            value = %value_display,
            "unknown field in live event"
        );
    }

    Ok(result)
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Look up a value by a `serde_ignored` or `serde_path_to_error` path.
///
/// `?` segments mark Option wrappers and are skipped. Array indices may be written as
/// `items.0` or `items[0]`.
#[cfg(feature = "tracing")]
fn lookup_value<'value>(value: &'value Value, path: &str) -> Option<&'value Value> {
    let mut current = value;

    for segment in parse_path_segments(path) {
        if segment == "?" {
            continue;
        }

        current = match current {
            Value::Object(map) => map.get(&segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Split `data.readings[2].value` into `["data", "readings", "2", "value"]`.
#[cfg(feature = "tracing")]
fn parse_path_segments(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();

    let mut chars = path.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '.' | '[' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                if ch == '[' {
                    for inner in chars.by_ref() {
                        if inner == ']' {
                            break;
                        }
                        current.push(inner);
                    }
                    if !current.is_empty() {
                        segments.push(std::mem::take(&mut current));
                    }
                }
            }
            ']' => {}
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }

    segments
}

#[cfg(feature = "tracing")]
fn format_value(value: Option<&Value>) -> String {
    value.map_or_else(|| "<unable to retrieve>".to_owned(), Value::to_string)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_with::serde_as;

    use super::*;

    #[serde_as]
    #[derive(Debug, PartialEq, Deserialize, Serialize)]
    struct Reading {
        #[serde_as(as = "StringFromAny")]
        sensor_id: String,
        #[serde_as(as = "Option<StringFromAny>")]
        #[serde(default)]
        company_id: Option<String>,
    }

    #[test]
    fn ids_accept_strings_and_integers() {
        let from_string: Reading =
            serde_json::from_value(serde_json::json!({ "sensor_id": "S1" })).unwrap();
        let from_int: Reading =
            serde_json::from_value(serde_json::json!({ "sensor_id": 42, "company_id": -7 }))
                .unwrap();

        assert_eq!(from_string.sensor_id, "S1");
        assert_eq!(from_string.company_id, None);
        assert_eq!(from_int.sensor_id, "42");
        assert_eq!(from_int.company_id.as_deref(), Some("-7"));
    }

    #[test]
    fn ids_serialize_as_strings() {
        let reading: Reading =
            serde_json::from_value(serde_json::json!({ "sensor_id": u64::MAX })).unwrap();

        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "sensor_id": u64::MAX.to_string(), "company_id": null })
        );
    }

    #[test]
    fn ids_reject_other_types() {
        let result: Result<Reading, _> =
            serde_json::from_value(serde_json::json!({ "sensor_id": 1.5 }));
        result.unwrap_err();
    }

    #[test]
    fn unknown_fields_do_not_fail() {
        let reading: Reading = deserialize_with_warnings(serde_json::json!({
            "sensor_id": "S1",
            "battery": 87
        }))
        .unwrap();

        assert_eq!(reading.sensor_id, "S1");
    }

    #[test]
    fn missing_required_field_fails() {
        let result: crate::Result<Reading> =
            deserialize_with_warnings(serde_json::json!({ "company_id": "acme" }));

        assert_eq!(result.unwrap_err().kind(), crate::error::Kind::Internal);
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn warning_is_emitted_for_unknown_fields() {
        use std::sync::{Arc, Mutex};

        use tracing_subscriber::layer::SubscriberExt as _;

        struct CaptureWriter(Arc<Mutex<Vec<String>>>);

        impl std::io::Write for CaptureWriter {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                if let Ok(s) = std::str::from_utf8(buf) {
                    self.0.lock().expect("lock").push(s.to_owned());
                }
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let captured: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let writer_target = Arc::clone(&captured);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(move || CaptureWriter(Arc::clone(&writer_target)))
            .with_ansi(false);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let reading: Reading = deserialize_with_warnings(serde_json::json!({
                "sensor_id": "S1",
                "firmware_rev": "2.4.1"
            }))
            .expect("deserialization should succeed");
            assert_eq!(reading.sensor_id, "S1");
        });

        let output = captured.lock().expect("lock").join("");
        assert!(output.contains("unknown field in live event"), "got: {output}");
        assert!(output.contains("firmware_rev"), "got: {output}");
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn lookup_follows_dots_and_brackets() {
        let json = serde_json::json!({
            "data": { "readings": [{ "value": 1 }, { "value": 2 }] }
        });

        assert_eq!(
            lookup_value(&json, "data.readings[1].value"),
            Some(&serde_json::json!(2))
        );
        assert_eq!(
            lookup_value(&json, "data.readings.0.value"),
            Some(&serde_json::json!(1))
        );
        assert_eq!(lookup_value(&json, "?.data.?.readings.0.value"), Some(&serde_json::json!(1)));
        assert_eq!(lookup_value(&json, ""), Some(&json));
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn lookup_misses_return_none() {
        let json = serde_json::json!({ "data": { "readings": [1, 2, 3] }, "event": "x" });

        assert_eq!(lookup_value(&json, "data.readings.abc"), None);
        assert_eq!(lookup_value(&json, "data.readings.100"), None);
        assert_eq!(lookup_value(&json, "event.inner"), None);
        assert_eq!(format_value(None), "<unable to retrieve>");
    }
}
