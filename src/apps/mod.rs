//! Built-in map/reduce applications, selected by name on the command
//! line.

pub mod crash;
pub mod indexer;
pub mod jobcount;
pub mod nocrash;
pub mod wc;

use crate::util::KeyValue;

pub type MapFn = fn(&str, &str) -> Vec<KeyValue>;
pub type ReduceFn = fn(&str, Vec<&str>) -> String;

pub fn lookup(name: &str) -> Option<(MapFn, ReduceFn)> {
    match name {
        "wc" => Some((wc::map, wc::reduce)),
        "indexer" => Some((indexer::map, indexer::reduce)),
        "crash" => Some((crash::map, crash::reduce)),
        "nocrash" => Some((nocrash::map, nocrash::reduce)),
        "jobcount" => Some((jobcount::map, jobcount::reduce)),
        _ => None,
    }
}
