//! Payload decoding helpers.
//!
//! With the `tracing` feature enabled, decoding logs any field the target type
//! does not capture, which is how changes in a mint's payloads show up.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decode a notification payload, warning about fields the type ignores.
///
/// Unknown fields never fail decoding. A failure logs the path of the
/// offending field together with its value.
///
/// ```ignore
/// let update: MintQuoteUpdate = deserialize_with_warnings(json!({
///     "quote": "q1",
///     "state": "PAID",
///     "amount": 100
/// }))?;
/// // Logs: WARN unknown field in payload field=amount value=100
/// ```
#[cfg(feature = "tracing")]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    tracing::trace!(type_name = %type_name::<T>(), json = %value, "decoding payload");

    let original = value.clone();
    let mut unknown_paths: Vec<String> = Vec::new();

    let result: T = serde_ignored::deserialize(value, |path| {
        unknown_paths.push(path.to_string());
    })
    .inspect_err(|_| {
        // Decode again to learn where it failed
        let path_result: Result<T, _> = serde_path_to_error::deserialize(original.clone());
        if let Err(path_err) = path_result {
            let path = path_err.path().to_string();
            tracing::error!(
                type_name = %type_name::<T>(),
                path = %path,
                value = %format_value(lookup_value(&original, &path)),
                error = %path_err.inner(),
                "payload decoding failed"
            );
        }
    })?;

    for path in unknown_paths {
        tracing::warn!(
            type_name = %type_name::<T>(),
            field = %path,
            value = %format_value(lookup_value(&original, &path)),
            "unknown field in payload"
        );
    }

    Ok(result)
}

/// Pass-through decoding when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Follow a dotted path such as `witness.signatures.0` through objects and arrays.
///
/// `?` segments (Option wrappers in `serde_ignored` paths) are skipped.
#[cfg(feature = "tracing")]
fn lookup_value<'value>(value: &'value Value, path: &str) -> Option<&'value Value> {
    let mut current = value;

    for segment in path.split(['.', '[', ']']) {
        if segment.is_empty() || segment == "?" {
            continue;
        }

        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

#[cfg(feature = "tracing")]
fn format_value(value: Option<&Value>) -> String {
    value.map_or_else(|| "<unable to retrieve>".to_owned(), Value::to_string)
}
