//! Owned-subset comparison and merging on JSON trees
//!
//! Lists whose entries carry a merge key are matched entry by entry the way
//! server-side apply matches them; other lists are atomic.

use serde_json::Value;

/// Merge keys in lookup order. `mountPath` wins for volume mounts, which
/// carry both.
const MERGE_KEYS: [&str; 2] = ["mountPath", "name"];

fn merge_key(value: &Value) -> Option<(&'static str, &Value)> {
    let obj = value.as_object()?;
    MERGE_KEYS
        .iter()
        .find_map(|k| obj.get(*k).map(|v| (*k, v)))
}

fn is_keyed(list: &[Value]) -> bool {
    list.first().and_then(merge_key).is_some()
}

/// True when every field of `desired` is present in `live` with an equal
/// value. Extra fields in `live` are ignored.
pub(crate) fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(d), Value::Object(l)) => d
            .iter()
            .all(|(k, dv)| l.get(k).is_some_and(|lv| is_subset(dv, lv))),
        (Value::Array(d), Value::Array(l)) if is_keyed(d) => d.iter().all(|dv| {
            let Some((key, id)) = merge_key(dv) else {
                return false;
            };
            l.iter()
                .find(|lv| lv.get(key) == Some(id))
                .is_some_and(|lv| is_subset(dv, lv))
        }),
        (Value::Array(d), Value::Array(l)) => {
            d.len() == l.len() && d.iter().zip(l).all(|(dv, lv)| is_subset(dv, lv))
        }
        (d, l) => d == l,
    }
}

/// Set every field of `overlay` on `target`, keeping everything else.
pub(crate) fn merge(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(t), Value::Object(o)) => {
            for (k, ov) in o {
                match t.get_mut(k) {
                    Some(tv) => merge(tv, ov),
                    None => {
                        t.insert(k.clone(), ov.clone());
                    }
                }
            }
        }
        (Value::Array(t), Value::Array(o)) if is_keyed(o) => {
            for ov in o {
                let existing = merge_key(ov)
                    .and_then(|(key, id)| t.iter_mut().find(|tv| tv.get(key) == Some(id)));
                match existing {
                    Some(tv) => merge(tv, ov),
                    None => t.push(ov.clone()),
                }
            }
        }
        (t, o) => *t = o.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extra_live_fields_do_not_break_subset() {
        let desired = json!({"name": "cfg", "configMap": {"name": "cfg"}});
        let live = json!({"name": "cfg", "configMap": {"name": "cfg", "defaultMode": 420}});
        assert!(is_subset(&desired, &live));
    }

    #[test]
    fn changed_owned_value_is_drift() {
        let desired = json!({"env": [{"name": "A", "value": "1"}]});
        let live = json!({"env": [{"name": "A", "value": "2"}]});
        assert!(!is_subset(&desired, &live));
    }

    #[test]
    fn keyed_lists_match_regardless_of_order() {
        let desired = json!([{"name": "b", "x": 1}, {"name": "a", "x": 2}]);
        let live = json!([{"name": "a", "x": 2}, {"name": "z"}, {"name": "b", "x": 1}]);
        assert!(is_subset(&desired, &live));
    }

    #[test]
    fn mounts_are_keyed_by_path() {
        let desired = json!([{"name": "vol", "mountPath": "/a", "readOnly": true}]);
        let live = json!([
            {"name": "vol", "mountPath": "/b"},
            {"name": "vol", "mountPath": "/a", "readOnly": true}
        ]);
        assert!(is_subset(&desired, &live));
    }

    #[test]
    fn atomic_lists_compare_positionally() {
        let desired = json!([{"serviceAccountToken": {"path": "token"}}]);
        let same = json!([{"serviceAccountToken": {"path": "token"}}]);
        let longer = json!([{"serviceAccountToken": {"path": "token"}}, {"secret": {}}]);
        assert!(is_subset(&desired, &same));
        assert!(!is_subset(&desired, &longer));
    }

    #[test]
    fn merge_upserts_keyed_entries_and_keeps_foreign_fields() {
        let mut target = json!({
            "containers": [{"name": "app", "image": "nginx", "env": [{"name": "X", "value": "1"}]}]
        });
        let overlay = json!({
            "containers": [{"name": "app", "env": [{"name": "Y", "value": "2"}]}]
        });
        merge(&mut target, &overlay);

        assert_eq!(target["containers"][0]["image"], "nginx");
        assert_eq!(
            target["containers"][0]["env"],
            json!([{"name": "X", "value": "1"}, {"name": "Y", "value": "2"}])
        );
        assert!(is_subset(&overlay, &target));
    }

    #[test]
    fn merge_replaces_atomic_lists() {
        let mut target = json!({"sources": [{"secret": {"name": "s"}}]});
        let overlay = json!({"sources": [{"serviceAccountToken": {"path": "token"}}]});
        merge(&mut target, &overlay);
        assert_eq!(target, overlay);
    }
}
