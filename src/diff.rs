use serde_json::{Map, Value};

pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = join(path_prefix, key);
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => {
                        if curr_val.is_object() {
                            diff_json(&Value::Object(Map::new()), curr_val, &path, changes);
                        } else {
                            changes.push((path, Value::Null, curr_val.clone()));
                        }
                    }
                }
            }
            for (key, prev_val) in prev_map {
                if !curr_map.contains_key(key) {
                    changes.push((join(path_prefix, key), prev_val.clone(), Value::Null));
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Catalog endpoints return arrays of records with an `id`. Keying them by id
/// lets `diff_json` report per-record field changes instead of replacing the
/// whole array whenever one record moves.
pub(crate) fn index_by_id(list: &Value) -> Value {
    let Value::Array(items) = list else {
        return list.clone();
    };
    let mut map = Map::new();
    for (pos, item) in items.iter().enumerate() {
        let key = item
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{pos}"));
        map.insert(key, item.clone());
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_detects_leaf_change() {
        let prev = json!({"newest_events": {"te": {"val": 24.0}}});
        let curr = json!({"newest_events": {"te": {"val": 24.5}}});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "newest_events.te.val");
        assert_eq!(changes[0].1, json!(24.0));
        assert_eq!(changes[0].2, json!(24.5));
    }

    #[test]
    fn diff_ignores_unchanged() {
        let val = json!({"settings": {"temp": "26", "mode": "cool"}});
        let mut changes = vec![];
        diff_json(&val, &val, "", &mut changes);
        assert!(changes.is_empty());
    }

    #[test]
    fn diff_detects_new_key() {
        let prev = json!({"settings": {}});
        let curr = json!({"settings": {"temp": "26"}});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "settings.temp");
    }

    #[test]
    fn diff_detects_removed_key() {
        let prev = json!({"ac-1": {"id": "ac-1"}, "ac-2": {"id": "ac-2"}});
        let curr = json!({"ac-1": {"id": "ac-1"}});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "ac-2");
        assert_eq!(changes[0].2, Value::Null);
    }

    #[test]
    fn indexed_lists_diff_per_record() {
        let prev = index_by_id(&json!([
            {"id": "ac-1", "settings": {"temp": "26"}},
            {"id": "tv-1", "type": "TV"}
        ]));
        let curr = index_by_id(&json!([
            {"id": "tv-1", "type": "TV"},
            {"id": "ac-1", "settings": {"temp": "25"}}
        ]));
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "ac-1.settings.temp");
    }

    #[test]
    fn index_falls_back_to_position() {
        let indexed = index_by_id(&json!([{"name": "anonymous"}]));
        assert!(indexed.get("#0").is_some());
    }
}
