use crate::util::KeyValue;

use std::collections::BTreeSet;

// inverted index: word -> the files it appears in

pub fn map(filename: &str, contents: &str) -> Vec<KeyValue> {
    let unique: BTreeSet<&str> = contents
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|word| !word.is_empty())
        .collect();

    unique
        .into_iter()
        .map(|word| KeyValue::new(word, filename))
        .collect()
}

pub fn reduce(_key: &str, mut values: Vec<&str>) -> String {
    values.sort();
    format!("{} {}", values.len(), values.join(","))
}
