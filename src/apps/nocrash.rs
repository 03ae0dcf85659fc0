use crate::util::KeyValue;

// the crash app's workload without the fault injection

pub fn map(filename: &str, contents: &str) -> Vec<KeyValue> {
    vec![
        KeyValue::new("a", filename),
        KeyValue::new("b", filename.len().to_string()),
        KeyValue::new("c", contents.len().to_string()),
        KeyValue::new("d", "xyzzy"),
    ]
}

pub fn reduce(_key: &str, mut values: Vec<&str>) -> String {
    values.sort();
    values.join(" ")
}
