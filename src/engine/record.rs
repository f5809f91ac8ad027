use chrono::{SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};

/// A stored document. Always carries [`ID_FIELD`], [`CREATED_AT`] and [`UPDATED_AT`].
pub type Record = Map<String, Value>;

pub const ID_FIELD: &str = "id";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

const ID_SUFFIX_LEN: usize = 9;

/// Generates a record id: base-36 millisecond clock followed by a random suffix.
///
/// Unique enough within one collection; never checked against existing ids.
pub fn generate_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("{}{}", to_base36(millis), suffix)
}

/// Current UTC time in the format stored on records.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Stamps a freshly inserted row with an id (unless supplied) and both timestamps.
pub(crate) fn stamp_new(mut row: Record) -> Record {
    let now = timestamp();
    let has_id = matches!(row.get(ID_FIELD), Some(v) if !v.is_null());
    if !has_id {
        row.insert(ID_FIELD.to_string(), Value::String(generate_id()));
    }
    row.insert(CREATED_AT.to_string(), Value::String(now.clone()));
    row.insert(UPDATED_AT.to_string(), Value::String(now));
    row
}

/// Merges `patch` into `row`. The row keeps its id and creation time.
pub(crate) fn apply_patch(row: &Record, patch: &Record) -> Record {
    let mut next = row.clone();
    for (k, v) in patch {
        if k == ID_FIELD || k == CREATED_AT {
            continue;
        }
        next.insert(k.clone(), v.clone());
    }
    next.insert(UPDATED_AT.to_string(), Value::String(timestamp()));
    next
}

/// Returns the record id as a string slice, if present.
pub fn record_id(row: &Record) -> Option<&str> {
    row.get(ID_FIELD).and_then(Value::as_str)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generated_ids_differ() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert!(a.len() > ID_SUFFIX_LEN);
        assert!(a.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_stamp_keeps_caller_id() {
        let row = json!({"id": "ord-1", "total": 12}).as_object().unwrap().clone();
        let stamped = stamp_new(row);
        assert_eq!(stamped["id"], json!("ord-1"));
        assert!(stamped.contains_key(CREATED_AT));
        assert_eq!(stamped[CREATED_AT], stamped[UPDATED_AT]);
    }

    #[test]
    fn test_patch_preserves_identity() {
        let row = stamp_new(json!({"id": "d1", "status": "idle"}).as_object().unwrap().clone());
        let patch = json!({"id": "other", "status": "busy", "created_at": "never"})
            .as_object()
            .unwrap()
            .clone();
        let next = apply_patch(&row, &patch);
        assert_eq!(next["id"], json!("d1"));
        assert_eq!(next["status"], json!("busy"));
        assert_eq!(next[CREATED_AT], row[CREATED_AT]);
    }
}
