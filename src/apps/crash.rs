use rand::Rng;

use std::thread::sleep;
use std::time::Duration;

use crate::util::KeyValue;

// nocrash's workload, except the worker sometimes dies or stalls
// mid-task. Exercises the timeout and reissue path end to end.

fn maybe_crash() {
    let roll = rand::thread_rng().gen_range(0..1000);
    if roll < 330 {
        std::process::exit(1);
    }
    if roll < 660 {
        let ms = rand::thread_rng().gen_range(0..10_000);
        sleep(Duration::from_millis(ms));
    }
}

pub fn map(filename: &str, contents: &str) -> Vec<KeyValue> {
    maybe_crash();
    crate::apps::nocrash::map(filename, contents)
}

pub fn reduce(key: &str, values: Vec<&str>) -> String {
    maybe_crash();
    crate::apps::nocrash::reduce(key, values)
}
