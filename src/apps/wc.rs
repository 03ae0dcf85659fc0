use crate::util::KeyValue;

// word count

pub fn map(_filename: &str, contents: &str) -> Vec<KeyValue> {
    contents
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|word| !word.is_empty())
        .map(|word| KeyValue::new(word, "1"))
        .collect()
}

pub fn reduce(_key: &str, values: Vec<&str>) -> String {
    values.len().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_splits_on_non_letters() {
        let kva = map("_", "one,two!two\n3three one");
        let words: Vec<&str> = kva.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(words, vec!["one", "two", "two", "three", "one"]);
        assert!(kva.iter().all(|kv| kv.value == "1"));
    }

    #[test]
    fn reduce_counts_occurrences() {
        assert_eq!(reduce("one", vec!["1", "1", "1"]), "3");
        assert_eq!(reduce("three", vec!["1"]), "1");
    }
}
