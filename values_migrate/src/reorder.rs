//! Key ordering after a blueprint document.
//!
//! Migrations rebuild mappings and so lose the order a user wrote their keys
//! in. [`reorder`] puts them back: keys the blueprint has come first, in the
//! blueprint's order, and the rest follow sorted. Only mappings the blueprint
//! also has at the same key are reordered recursively.

use serde_yaml::{Mapping, Value};

/// Order the keys of `value` after `blueprint`.
#[must_use]
pub fn reorder(value: Value, blueprint: &Value) -> Value {
    match (value, blueprint) {
        (Value::Mapping(mapping), Value::Mapping(shape)) => {
            Value::Mapping(reorder_mapping(mapping, shape))
        }
        (value, _) => value,
    }
}

fn reorder_mapping(mut mapping: Mapping, shape: &Mapping) -> Mapping {
    let mut ordered = Mapping::with_capacity(mapping.len());
    for (key, nested) in shape {
        if let Some(value) = mapping.remove(key) {
            ordered.insert(key.clone(), reorder(value, nested));
        }
    }
    let mut remaining: Vec<(Value, Value)> = mapping.into_iter().collect();
    remaining.sort_by_cached_key(|(key, _)| key_text(key));
    for (key, value) in remaining {
        ordered.insert(key, value);
    }
    ordered
}

/// Sort text of a key. Scalars read as written, anything else by its
/// structure.
fn key_text(key: &Value) -> String {
    match key {
        Value::String(key) => key.clone(),
        Value::Number(key) => key.to_string(),
        Value::Bool(key) => key.to_string(),
        Value::Null => "null".to_string(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod test {
    use proptest::{collection, prelude::*};
    use serde_yaml::{Mapping, Value};

    use super::reorder;

    fn keys(value: &Value) -> Vec<&str> {
        value
            .as_mapping()
            .unwrap()
            .keys()
            .map(|k| k.as_str().unwrap())
            .collect()
    }

    #[test]
    fn non_string_keys_sort_by_text() {
        let value = yaml("true: y\nb: 1\n~: n\n10: x\na: 2\n");
        let ordered = reorder(value, &yaml("{}"));
        let keys: Vec<&Value> = ordered.as_mapping().unwrap().keys().collect();
        assert_eq!(
            keys,
            vec![
                &Value::from(10),
                &Value::from("a"),
                &Value::from("b"),
                &Value::Null,
                &Value::Bool(true),
            ]
        );
    }

    fn yaml(contents: &str) -> Value {
        serde_yaml::from_str(contents).unwrap()
    }

    #[test]
    fn blueprint_order_wins() {
        let output = reorder(yaml("{a: b, c: d}"), &yaml("{c: d, a: b}"));
        assert_eq!(keys(&output), vec!["c", "a"]);
    }

    #[test]
    fn unknown_keys_are_sorted() {
        let output = reorder(yaml("{g: h, e: f}"), &yaml("{c: d, a: b}"));
        assert_eq!(keys(&output), vec!["e", "g"]);
    }

    #[test]
    fn unknown_keys_follow_known_keys() {
        let output = reorder(yaml("{z: 1, b: 2, a: 3, y: 4}"), &yaml("{y: 0, z: 0}"));
        assert_eq!(keys(&output), vec!["y", "z", "a", "b"]);
    }

    #[test]
    fn nested_mappings_follow_nested_blueprint() {
        let output = reorder(
            yaml("{outer: {b: 1, a: 2}, other: {d: 1, c: 2}}"),
            &yaml("{outer: {a: 0, b: 0}, other: 7}"),
        );
        assert_eq!(keys(&output), vec!["outer", "other"]);
        assert_eq!(keys(&output["outer"]), vec!["a", "b"]);
        // No blueprint mapping at `other`, left as is.
        assert_eq!(keys(&output["other"]), vec!["d", "c"]);
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(reorder(yaml("3"), &yaml("{a: b}")), yaml("3"));
        assert_eq!(reorder(yaml("{a: b}"), &yaml("[1, 2]")), yaml("{a: b}"));
    }

    fn mapping(depth: u32) -> impl Strategy<Value = Value> {
        let leaf = any::<u8>().prop_map(|n| Value::from(u64::from(n)));
        leaf.prop_recursive(depth, 64, 6, |inner| {
            collection::vec(("[a-f]{1,2}", inner), 0..6).prop_map(|entries| {
                let mut mapping = Mapping::new();
                for (key, value) in entries {
                    mapping.insert(Value::from(key), value);
                }
                Value::Mapping(mapping)
            })
        })
    }

    proptest! {
        #[test]
        fn idempotent_against_itself(value in mapping(3)) {
            prop_assert_eq!(
                serde_yaml::to_string(&reorder(value.clone(), &value)).unwrap(),
                serde_yaml::to_string(&value).unwrap()
            );
        }

        #[test]
        fn blueprint_keys_keep_relative_order(value in mapping(2), blueprint in mapping(2)) {
            let output = reorder(value.clone(), &blueprint);
            prop_assert_eq!(&output, &value);
            if let (Some(output), Some(shape)) = (output.as_mapping(), blueprint.as_mapping()) {
                let expected: Vec<&Value> =
                    shape.keys().filter(|k| output.contains_key(*k)).collect();
                let known = expected.len();
                let actual: Vec<&Value> = output.keys().take(known).collect();
                prop_assert_eq!(actual, expected);

                let tail: Vec<&str> =
                    output.keys().skip(known).filter_map(Value::as_str).collect();
                let mut sorted = tail.clone();
                sorted.sort_unstable();
                prop_assert_eq!(tail, sorted);
            }
        }
    }
}
