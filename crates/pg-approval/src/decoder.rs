//! Decoder for the gateway's plain-text `key=value&key=value` responses.

use std::collections::BTreeMap;

/// Decode an approval or cancel response body.
///
/// Each `&`-separated segment is split on its first `=` only, so values may
/// themselves contain `=`. A key without `=` maps to the empty string.
/// Segments with an empty key are dropped. Decoding never fails; a body with
/// nothing usable yields an empty map and the caller decides what a missing
/// status field means.
pub fn decode(raw_body: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();

    for segment in raw_body.trim().split('&') {
        if segment.is_empty() {
            continue;
        }
        let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
        let key = key.trim();
        if key.is_empty() {
            tracing::warn!(segment = %segment, "dropping response segment without a key");
            continue;
        }
        if fields.insert(key.to_string(), value.to_string()).is_some() {
            tracing::debug!(key = %key, "duplicate response key, keeping the last value");
        }
    }

    fields
}
