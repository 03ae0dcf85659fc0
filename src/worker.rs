//! Worker process. Pulls one task at a time from the coordinator, runs
//! the map or reduce function over it, publishes results by rename so a
//! crash never leaves a partial file visible, and reports back.

mod apps;
mod rpc;
mod util;

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use glob::glob;
use tempfile::NamedTempFile;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use apps::{MapFn, ReduceFn};
use rpc::pb::coordinator_client::CoordinatorClient;
use rpc::pb::{Phase, ReportTaskArgs, RequestTaskArgs, RequestTaskReply};
use util::KeyValue;

/// Backoff while the coordinator has nothing to hand out.
const IDLE_BACKOFF: Duration = Duration::from_secs(1);

/// Partition hash. Every worker runs the same binary, so the assignment
/// of keys to reduce tasks is consistent across processes.
fn ihash(key: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() as usize
}

/// Dials the coordinator's unix socket. The URI is required by the
/// endpoint builder but never resolved.
async fn connect() -> Result<CoordinatorClient<Channel>> {
    let channel = Endpoint::try_from("http://[::]:50051")?
        .connect_with_connector(service_fn(|_: Uri| {
            UnixStream::connect(rpc::coordinator_socket_path())
        }))
        .await
        .context("cannot reach coordinator socket")?;
    Ok(CoordinatorClient::new(channel))
}

/// Reports a finished task and returns the coordinator's terminate
/// signal. A failed call also means it is time to go: the job finished
/// and the coordinator went away.
async fn report(
    client: &mut CoordinatorClient<Channel>,
    worker_id: i32,
    task: &RequestTaskReply,
) -> bool {
    let args = ReportTaskArgs {
        worker_id,
        phase: task.phase,
        task_id: task.task_id,
    };
    match client.report_task_completion(args).await {
        Ok(reply) => reply.into_inner().terminate,
        Err(status) => {
            warn!(%status, "completion report failed, assuming coordinator is gone");
            true
        }
    }
}

/// The pull loop: request, execute, report, until told to exit.
async fn run(map_fn: MapFn, reduce_fn: ReduceFn) -> Result<()> {
    let mut client = connect().await?;
    let worker_id = std::process::id() as i32;
    info!(worker_id, "worker started");

    loop {
        let task = match client.request_task(RequestTaskArgs { worker_id }).await {
            Ok(reply) => reply.into_inner(),
            Err(status) => {
                warn!(%status, "task request failed, assuming coordinator is gone");
                break;
            }
        };

        match task.phase() {
            Phase::Map => {
                debug!(task_id = task.task_id, input = %task.input_path, "running map task");
                do_map(&task, map_fn, Path::new("."))?;
                if report(&mut client, worker_id, &task).await {
                    break;
                }
            }
            Phase::Reduce => {
                debug!(task_id = task.task_id, "running reduce task");
                do_reduce(&task, reduce_fn, Path::new("."))?;
                if report(&mut client, worker_id, &task).await {
                    break;
                }
            }
            Phase::Void => tokio::time::sleep(IDLE_BACKOFF).await,
            Phase::Exit => break,
        }
    }

    info!(worker_id, "exiting");
    Ok(())
}

/// Runs the map function over the task's input file and spills every
/// partition `p` to `mr-<task_id>-<p>` in `dir`, one JSON record per
/// line. Each file is written to a temp name and renamed into place.
fn do_map(task: &RequestTaskReply, map_fn: MapFn, dir: &Path) -> Result<()> {
    let contents = fs::read_to_string(&task.input_path)
        .with_context(|| format!("cannot read {}", task.input_path))?;
    let kva = map_fn(&task.input_path, &contents);

    let n_reduce = task.total_reduce as usize;
    let mut buckets: Vec<Vec<KeyValue>> = (0..n_reduce).map(|_| Vec::new()).collect();
    for kv in kva {
        buckets[ihash(&kv.key) % n_reduce].push(kv);
    }

    for (partition, bucket) in buckets.iter().enumerate() {
        let name = format!("mr-{}-{}", task.task_id, partition);
        let mut spill = NamedTempFile::new_in(dir)
            .with_context(|| format!("cannot create temporary file for {name}"))?;
        for kv in bucket {
            serde_json::to_writer(&mut spill, kv)
                .with_context(|| format!("cannot write record to {name}"))?;
            spill.write_all(b"\n")?;
        }
        spill
            .persist(dir.join(&name))
            .with_context(|| format!("cannot publish {name}"))?;
    }
    Ok(())
}

/// Collects every map task's spill for this partition, groups values by
/// key, and writes one `<key> <value>` line per key, keys sorted, to
/// `mr-out-<task_id>`. Published by rename like the spills.
fn do_reduce(task: &RequestTaskReply, reduce_fn: ReduceFn, dir: &Path) -> Result<()> {
    // The character class keeps already-published mr-out-* files out of
    // the scan.
    let pattern = dir.join(format!("mr-[0-9]*-{}", task.task_id));
    let pattern = pattern.to_str().context("working directory is not valid UTF-8")?;

    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for entry in glob(pattern)? {
        let path = entry?;
        let file =
            File::open(&path).with_context(|| format!("cannot open {}", path.display()))?;
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| format!("cannot read {}", path.display()))?;
            let kv: KeyValue = serde_json::from_str(&line)
                .with_context(|| format!("corrupted record in {}", path.display()))?;
            grouped.entry(kv.key).or_default().push(kv.value);
        }
    }

    let mut keys: Vec<String> = grouped.keys().cloned().collect();
    keys.sort();

    let name = format!("mr-out-{}", task.task_id);
    let mut out = NamedTempFile::new_in(dir)
        .with_context(|| format!("cannot create temporary file for {name}"))?;
    for key in &keys {
        let values: Vec<&str> = grouped[key].iter().map(String::as_str).collect();
        writeln!(out, "{} {}", key, reduce_fn(key, values))?;
    }
    out.persist(dir.join(&name))
        .with_context(|| format!("cannot publish {name}"))?;
    Ok(())
}

#[derive(Parser)]
#[command(name = "mrworker", about = "MapReduce worker process")]
struct Cli {
    /// Built-in application to run (wc, indexer, crash, nocrash,
    /// jobcount).
    app: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let (map_fn, reduce_fn) = apps::lookup(&cli.app)
        .with_context(|| format!("unknown application {:?}", cli.app))?;
    run(map_fn, reduce_fn).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_task(input_path: &Path, task_id: i32, total_reduce: i32) -> RequestTaskReply {
        RequestTaskReply {
            phase: Phase::Map as i32,
            task_id,
            input_path: input_path.display().to_string(),
            total_map: 1,
            total_reduce,
        }
    }

    fn reduce_task(task_id: i32, total_map: i32) -> RequestTaskReply {
        RequestTaskReply {
            phase: Phase::Reduce as i32,
            task_id,
            input_path: String::new(),
            total_map,
            total_reduce: 0,
        }
    }

    #[test]
    fn ihash_is_stable_per_key() {
        assert_eq!(ihash("abc"), ihash("abc"));
        for key in ["a", "b", "squirrel"] {
            assert!(ihash(key) % 5 < 5);
        }
    }

    #[test]
    fn map_spills_every_partition_and_reduce_collects_them() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        fs::write(&input, "the quick fox and the lazy fox and the dog").unwrap();

        do_map(&map_task(&input, 0, 3), apps::wc::map, dir.path()).unwrap();

        // Every partition file exists, populated or not.
        for partition in 0..3 {
            assert!(dir.path().join(format!("mr-0-{partition}")).exists());
        }

        for partition in 0..3 {
            do_reduce(&reduce_task(partition, 1), apps::wc::reduce, dir.path()).unwrap();
        }

        let mut lines = Vec::new();
        for partition in 0..3 {
            let out = fs::read_to_string(dir.path().join(format!("mr-out-{partition}"))).unwrap();
            lines.extend(out.lines().map(str::to_string));
        }
        lines.sort();
        assert_eq!(
            lines,
            vec!["and 2", "dog 1", "fox 2", "lazy 1", "quick 1", "the 3"]
        );
    }

    #[test]
    fn reduce_output_keys_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut spill = File::create(dir.path().join("mr-0-4")).unwrap();
        for key in ["zebra", "ant", "mole"] {
            serde_json::to_writer(&mut spill, &KeyValue::new(key, "1")).unwrap();
            spill.write_all(b"\n").unwrap();
        }
        drop(spill);

        do_reduce(&reduce_task(4, 1), apps::wc::reduce, dir.path()).unwrap();

        let out = fs::read_to_string(dir.path().join("mr-out-4")).unwrap();
        assert_eq!(out, "ant 1\nmole 1\nzebra 1\n");
    }

    #[test]
    fn reduce_scan_skips_published_outputs() {
        let dir = tempfile::tempdir().unwrap();

        // A straggler's earlier publish must not be re-read as input.
        fs::write(dir.path().join("mr-out-7"), "not json\n").unwrap();

        let mut spill = File::create(dir.path().join("mr-3-7")).unwrap();
        serde_json::to_writer(&mut spill, &KeyValue::new("k", "1")).unwrap();
        spill.write_all(b"\n").unwrap();
        drop(spill);

        do_reduce(&reduce_task(7, 4), apps::wc::reduce, dir.path()).unwrap();

        let out = fs::read_to_string(dir.path().join("mr-out-7")).unwrap();
        assert_eq!(out, "k 1\n");
    }

    #[test]
    fn reduce_partitions_do_not_cross() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("words.txt");
        fs::write(&input, "alpha beta gamma delta epsilon").unwrap();

        do_map(&map_task(&input, 0, 2), apps::wc::map, dir.path()).unwrap();
        do_reduce(&reduce_task(0, 1), apps::wc::reduce, dir.path()).unwrap();
        do_reduce(&reduce_task(1, 1), apps::wc::reduce, dir.path()).unwrap();

        let out_0 = fs::read_to_string(dir.path().join("mr-out-0")).unwrap();
        let out_1 = fs::read_to_string(dir.path().join("mr-out-1")).unwrap();
        let mut all: Vec<&str> = out_0.lines().chain(out_1.lines()).collect();
        all.sort();
        assert_eq!(
            all,
            vec!["alpha 1", "beta 1", "delta 1", "epsilon 1", "gamma 1"]
        );
        // No word may appear in both partitions.
        assert_eq!(out_0.lines().count() + out_1.lines().count(), 5);
    }
}
