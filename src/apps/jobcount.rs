use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::thread::sleep;
use std::time::Duration;

use rand::Rng;

use crate::util::KeyValue;

// drops a marker file per map invocation; reduce counts the markers.
// Shows whether any task was dispatched more than once.

static INVOCATIONS: AtomicUsize = AtomicUsize::new(0);

pub fn map(_filename: &str, _contents: &str) -> Vec<KeyValue> {
    let n = INVOCATIONS.fetch_add(1, SeqCst);
    let marker = format!("mr-worker-jobcount-{}-{}", std::process::id(), n);
    fs::write(&marker, b"x").expect("cannot write jobcount marker");

    sleep(Duration::from_millis(2000 + rand::thread_rng().gen_range(0..3000)));

    vec![KeyValue::new("a", "x")]
}

pub fn reduce(_key: &str, _values: Vec<&str>) -> String {
    let markers = fs::read_dir(".")
        .expect("cannot scan working directory")
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with("mr-worker-jobcount"))
        })
        .count();
    markers.to_string()
}
