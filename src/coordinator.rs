//! Single-master task dispatcher. Owns all task state, hands work out to
//! polling workers over a local socket, and reclaims tasks from workers
//! that go silent.

mod rpc;
mod tasks;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use tokio::net::UnixListener;
use tokio::sync::Mutex;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use rpc::pb::coordinator_server::{Coordinator as CoordinatorRpc, CoordinatorServer};
use rpc::pb::{Phase, ReportTaskArgs, ReportTaskReply, RequestTaskArgs, RequestTaskReply};
use tasks::{generate, Progression, TaskSet, UNASSIGNED};

/// How long a dispatched task may run before it is offered to someone
/// else. There is no heartbeat; this timeout is the only failure
/// detector.
const TASK_TIMEOUT: Duration = Duration::from_secs(10);

/// Both phases' tasks. One coarse mutex guards the whole thing: every
/// handler and every watchdog does pure in-memory bookkeeping under it,
/// and the lock is never held across I/O or a timer.
struct JobState {
    map_tasks: TaskSet,
    reduce_tasks: TaskSet,
}

impl JobState {
    fn new(files: &[String], n_reduce: usize) -> Self {
        let (map_tasks, reduce_tasks) = generate(files, n_reduce);
        JobState {
            map_tasks,
            reduce_tasks,
        }
    }

    /// The task set a wire phase names. `None` for the reply-only
    /// sentinels, which never identify a task.
    fn set_mut(&mut self, phase: Phase) -> Option<&mut TaskSet> {
        match phase {
            Phase::Map => Some(&mut self.map_tasks),
            Phase::Reduce => Some(&mut self.reduce_tasks),
            Phase::Void | Phase::Exit => None,
        }
    }

    fn done(&self) -> bool {
        self.map_tasks.done() && self.reduce_tasks.done()
    }

    /// Picks the next assignment for `worker_id`. Map tasks drain to
    /// completion before any reduce task is served; a phase whose
    /// remaining tasks are all running yields Void, and a finished job
    /// yields Exit.
    fn assign(&mut self, worker_id: i32) -> RequestTaskReply {
        let mut reply = RequestTaskReply {
            phase: Phase::Exit as i32,
            task_id: 0,
            input_path: String::new(),
            total_map: self.map_tasks.capacity() as i32,
            total_reduce: self.reduce_tasks.capacity() as i32,
        };

        let (set, phase) = if !self.map_tasks.done() {
            (&mut self.map_tasks, Phase::Map)
        } else if !self.reduce_tasks.done() {
            (&mut self.reduce_tasks, Phase::Reduce)
        } else {
            return reply;
        };

        match set.poll_idle() {
            Some(task) => {
                task.worker_id = worker_id;
                reply.phase = phase as i32;
                reply.task_id = task.id;
                reply.input_path = task.input_path.clone();
            }
            None => reply.phase = Phase::Void as i32,
        }
        reply
    }

    /// Applies a completion report. `None` when the phase does not name
    /// a real task set (a sentinel or out-of-range tag); the reply then
    /// carries `terminate=false` without consulting overall progress.
    /// Otherwise `Some(accepted)`: the task moves to Completed only when
    /// the id is known and the reporting worker is still the recorded
    /// assignee, and a stale or unknown-id report falls through with
    /// `Some(false)` so the caller still answers with the job's state.
    fn record_completion(&mut self, args: &ReportTaskArgs) -> Option<bool> {
        let set = Phase::try_from(args.phase)
            .ok()
            .and_then(|phase| self.set_mut(phase))?;
        match set.get_worker(args.task_id) {
            Some(expected) if expected == args.worker_id => {
                set.transition(args.task_id, Progression::Completed);
                Some(true)
            }
            _ => Some(false),
        }
    }

    /// The watchdog's wake-side action: if the task is still running,
    /// push it to the back of the idle queue and drop its assignee so
    /// another worker can pick it up. A completed task is left alone.
    fn reclaim_if_running(&mut self, phase: Phase, task_id: i32) -> bool {
        let Some(set) = self.set_mut(phase) else {
            return false;
        };
        if set.state(task_id) != Some(Progression::InProgress) {
            return false;
        }
        set.transition(task_id, Progression::Idle);
        set.set_worker(task_id, UNASSIGNED);
        true
    }
}

/// Armed for every dispatched task. Sleeps out the timeout with no lock
/// held, then re-acquires it and reclaims the task if nobody finished
/// it. Late firings are harmless: Completed is terminal.
async fn wait_task(job: Arc<Mutex<JobState>>, phase: Phase, task_id: i32, worker_id: i32) {
    tokio::time::sleep(TASK_TIMEOUT).await;
    let mut job = job.lock().await;
    if job.reclaim_if_running(phase, task_id) {
        warn!(?phase, task_id, worker_id, "task timed out, requeued");
    }
}

/// gRPC surface. Handlers run concurrently and serialize on the job
/// mutex.
#[derive(Clone)]
struct Dispatcher {
    job: Arc<Mutex<JobState>>,
}

#[tonic::async_trait]
impl CoordinatorRpc for Dispatcher {
    async fn request_task(
        &self,
        request: Request<RequestTaskArgs>,
    ) -> Result<Response<RequestTaskReply>, Status> {
        let worker_id = request.get_ref().worker_id;
        let reply = {
            let mut job = self.job.lock().await;
            job.assign(worker_id)
        };
        match reply.phase() {
            Phase::Map | Phase::Reduce => {
                debug!(worker_id, task_id = reply.task_id, phase = ?reply.phase(), "dispatched");
                tokio::spawn(wait_task(
                    self.job.clone(),
                    reply.phase(),
                    reply.task_id,
                    worker_id,
                ));
            }
            Phase::Void => debug!(worker_id, "nothing idle, worker told to stand by"),
            Phase::Exit => debug!(worker_id, "job finished, worker told to exit"),
        }
        Ok(Response::new(reply))
    }

    async fn report_task_completion(
        &self,
        request: Request<ReportTaskArgs>,
    ) -> Result<Response<ReportTaskReply>, Status> {
        let args = request.get_ref();
        let outcome = {
            let mut job = self.job.lock().await;
            job.record_completion(args).map(|accepted| (accepted, job.done()))
        };
        let Some((accepted, terminate)) = outcome else {
            debug!(
                worker_id = args.worker_id,
                phase = args.phase,
                "report with sentinel phase dropped"
            );
            return Ok(Response::new(ReportTaskReply { terminate: false }));
        };
        if accepted {
            info!(
                worker_id = args.worker_id,
                task_id = args.task_id,
                phase = args.phase,
                "task completed"
            );
        } else {
            debug!(
                worker_id = args.worker_id,
                task_id = args.task_id,
                phase = args.phase,
                "stale or malformed completion report dropped"
            );
        }
        Ok(Response::new(ReportTaskReply { terminate }))
    }
}

/// The running coordinator process: task state plus the spawned
/// listener.
pub struct Coordinator {
    job: Arc<Mutex<JobState>>,
}

impl Coordinator {
    /// Creates the task sets for `files` and `n_reduce`, binds the
    /// rendezvous socket, and starts serving workers. A bind failure is
    /// fatal.
    pub fn new(files: Vec<String>, n_reduce: usize) -> Result<Self> {
        let job = Arc::new(Mutex::new(JobState::new(&files, n_reduce)));

        let path = rpc::coordinator_socket_path();
        // A previous run may have left its socket file behind.
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)
            .with_context(|| format!("cannot bind {}", path.display()))?;
        info!(socket = %path.display(), n_map = files.len(), n_reduce, "coordinator listening");

        let dispatcher = Dispatcher { job: job.clone() };
        tokio::spawn(
            Server::builder()
                .add_service(CoordinatorServer::new(dispatcher))
                .serve_with_incoming(UnixListenerStream::new(listener)),
        );

        Ok(Coordinator { job })
    }

    /// Whether every map and reduce task has completed. Polled by the
    /// supervising loop.
    pub async fn done(&self) -> bool {
        self.job.lock().await.done()
    }
}

#[derive(Parser)]
#[command(name = "mrcoordinator", about = "MapReduce coordinator process")]
struct Cli {
    /// Input files, one map task per file.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Number of reduce tasks, i.e. the output fan-out.
    #[arg(short = 'r', long, default_value_t = 10)]
    n_reduce: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    ensure!(cli.n_reduce >= 1, "need at least one reduce task");

    let files: Vec<String> = cli.files.iter().map(|p| p.display().to_string()).collect();
    let coordinator = Coordinator::new(files, cli.n_reduce)?;

    while !coordinator.done().await {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    info!("all tasks complete, shutting down");
    Ok(())
}
