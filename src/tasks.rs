//! Per-phase task bookkeeping for the coordinator.

/// Worker id recorded on a task nobody is running.
pub const UNASSIGNED: i32 = -1;

const TOTAL_STATES: usize = 3;

/// Scheduling states a task moves through. `Completed` is terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Progression {
    Idle = 0,
    InProgress = 1,
    Completed = 2,
}

/// One unit of work. `input_path` is populated for map tasks only; the
/// phase of a task at rest is the identity of the [`TaskSet`] holding it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Task {
    pub id: i32,
    pub input_path: String,
    pub worker_id: i32,
}

/// Arena node, threaded into one of the three progression queues.
struct Node {
    task: Task,
    state: Progression,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Clone, Copy, Default)]
struct Queue {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

/// A phase's tasks, held in an arena indexed by task id (ids are dense
/// from 0) and threaded through three doubly-linked queues, one per
/// [`Progression`]. Idle polls, state transitions, and id lookups are
/// all O(1). Not thread-safe; the coordinator serializes access behind
/// its mutex.
pub struct TaskSet {
    nodes: Vec<Node>,
    queues: [Queue; TOTAL_STATES],
    capacity: usize,
}

impl TaskSet {
    /// Builds the set with one Idle task per input, in input order.
    pub fn new<I>(inputs: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut set = TaskSet {
            nodes: Vec::new(),
            queues: [Queue::default(); TOTAL_STATES],
            capacity: 0,
        };
        for (i, input_path) in inputs.into_iter().enumerate() {
            set.nodes.push(Node {
                task: Task {
                    id: i as i32,
                    input_path,
                    worker_id: UNASSIGNED,
                },
                state: Progression::Idle,
                prev: None,
                next: None,
            });
            set.push_back(Progression::Idle, i);
        }
        set.capacity = set.nodes.len();
        set
    }

    /// Total number of tasks. Constant after construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self, state: Progression) -> usize {
        self.queues[state as usize].len
    }

    pub fn state(&self, task_id: i32) -> Option<Progression> {
        self.slot(task_id).map(|idx| self.nodes[idx].state)
    }

    /// Takes the task at the front of the Idle queue, moves it to the
    /// back of InProgress, and hands it out for assignment. `None` when
    /// nothing is idle.
    pub fn poll_idle(&mut self) -> Option<&mut Task> {
        let idx = self.queues[Progression::Idle as usize].head?;
        self.unlink(idx);
        self.push_back(Progression::InProgress, idx);
        Some(&mut self.nodes[idx].task)
    }

    /// Moves a task to the back of the `new_state` queue. Unknown ids
    /// are ignored, and a Completed task never moves again.
    pub fn transition(&mut self, task_id: i32, new_state: Progression) {
        let Some(idx) = self.slot(task_id) else {
            return;
        };
        if self.nodes[idx].state == Progression::Completed {
            return;
        }
        self.unlink(idx);
        self.push_back(new_state, idx);
    }

    pub fn get_worker(&self, task_id: i32) -> Option<i32> {
        self.slot(task_id).map(|idx| self.nodes[idx].task.worker_id)
    }

    /// No-op on unknown ids.
    pub fn set_worker(&mut self, task_id: i32, worker_id: i32) {
        if let Some(idx) = self.slot(task_id) {
            self.nodes[idx].task.worker_id = worker_id;
        }
    }

    /// Whether every task in the set has reached Completed.
    pub fn done(&self) -> bool {
        self.queues[Progression::Completed as usize].len == self.capacity
    }

    fn slot(&self, task_id: i32) -> Option<usize> {
        usize::try_from(task_id).ok().filter(|&i| i < self.nodes.len())
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next, state) = {
            let node = &self.nodes[idx];
            (node.prev, node.next, node.state)
        };
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.queues[state as usize].head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.queues[state as usize].tail = prev,
        }
        self.queues[state as usize].len -= 1;
        self.nodes[idx].prev = None;
        self.nodes[idx].next = None;
    }

    fn push_back(&mut self, state: Progression, idx: usize) {
        let tail = self.queues[state as usize].tail;
        self.nodes[idx].prev = tail;
        self.nodes[idx].next = None;
        self.nodes[idx].state = state;
        match tail {
            Some(t) => self.nodes[t].next = Some(idx),
            None => self.queues[state as usize].head = Some(idx),
        }
        self.queues[state as usize].tail = Some(idx);
        self.queues[state as usize].len += 1;
    }

    /// Task ids in a queue, front to back.
    #[cfg(test)]
    fn ids_in(&self, state: Progression) -> Vec<i32> {
        let mut ids = Vec::new();
        let mut cursor = self.queues[state as usize].head;
        while let Some(idx) = cursor {
            ids.push(self.nodes[idx].task.id);
            cursor = self.nodes[idx].next;
        }
        ids
    }
}

/// Builds the map and reduce task sets for a job: one map task per input
/// file, `n_reduce` reduce tasks with no input path.
pub fn generate(files: &[String], n_reduce: usize) -> (TaskSet, TaskSet) {
    let map_tasks = TaskSet::new(files.iter().cloned());
    let reduce_tasks = TaskSet::new((0..n_reduce).map(|_| String::new()));
    (map_tasks, reduce_tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> TaskSet {
        TaskSet::new(names.iter().map(|s| s.to_string()))
    }

    fn total(tasks: &TaskSet) -> usize {
        tasks.len(Progression::Idle)
            + tasks.len(Progression::InProgress)
            + tasks.len(Progression::Completed)
    }

    #[test]
    fn generate_builds_both_sets() {
        let files: Vec<String> = ["pg-1.txt", "pg-2.txt", "pg-3.txt", "pg-4.txt", "pg-5.txt"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for n_reduce in [1, 3] {
            let (map_tasks, reduce_tasks) = generate(&files, n_reduce);
            assert_eq!(map_tasks.capacity(), 5);
            assert_eq!(map_tasks.len(Progression::Idle), 5);
            assert_eq!(reduce_tasks.capacity(), n_reduce);
            assert_eq!(reduce_tasks.len(Progression::Idle), n_reduce);
            assert_eq!(reduce_tasks.get_worker(0), Some(UNASSIGNED));
        }
    }

    #[test]
    fn poll_serves_idle_in_fifo_order() {
        let mut tasks = set(&["a", "b", "c"]);
        for (want_id, want_input) in [(0, "a"), (1, "b"), (2, "c")] {
            let task = tasks.poll_idle().unwrap();
            assert_eq!(task.id, want_id);
            assert_eq!(task.input_path, want_input);
        }
        assert!(tasks.poll_idle().is_none());
    }

    #[test]
    fn poll_moves_task_to_in_progress() {
        let mut tasks = set(&["a", "b"]);
        tasks.poll_idle().unwrap().worker_id = 7;

        assert_eq!(tasks.state(0), Some(Progression::InProgress));
        assert_eq!(tasks.get_worker(0), Some(7));
        assert_eq!(tasks.len(Progression::Idle), 1);
        assert_eq!(tasks.len(Progression::InProgress), 1);
        assert_eq!(total(&tasks), tasks.capacity());
    }

    #[test]
    fn queues_and_state_map_agree() {
        let mut tasks = set(&["a", "b", "c"]);
        tasks.poll_idle().unwrap();
        tasks.transition(0, Progression::Completed);
        tasks.poll_idle().unwrap();

        assert_eq!(tasks.ids_in(Progression::Idle), vec![2]);
        assert_eq!(tasks.ids_in(Progression::InProgress), vec![1]);
        assert_eq!(tasks.ids_in(Progression::Completed), vec![0]);
        for id in 0..3 {
            let state = tasks.state(id).unwrap();
            assert!(tasks.ids_in(state).contains(&id));
        }
    }

    #[test]
    fn requeued_task_joins_the_back_of_idle() {
        let mut tasks = set(&["a", "b", "c"]);
        tasks.poll_idle().unwrap();

        // A timed-out task must wait behind its peers on the next round.
        tasks.transition(0, Progression::Idle);
        tasks.set_worker(0, UNASSIGNED);

        assert_eq!(tasks.ids_in(Progression::Idle), vec![1, 2, 0]);
        assert_eq!(tasks.poll_idle().unwrap().id, 1);
        assert_eq!(tasks.poll_idle().unwrap().id, 2);
        assert_eq!(tasks.poll_idle().unwrap().id, 0);
    }

    #[test]
    fn completed_is_terminal() {
        let mut tasks = set(&["a"]);
        tasks.poll_idle().unwrap();
        tasks.transition(0, Progression::Completed);

        tasks.transition(0, Progression::Idle);
        assert_eq!(tasks.state(0), Some(Progression::Completed));
        assert_eq!(tasks.len(Progression::Completed), 1);
        assert_eq!(tasks.len(Progression::Idle), 0);

        // A duplicate completion must not grow any queue either.
        tasks.transition(0, Progression::Completed);
        assert_eq!(tasks.ids_in(Progression::Completed), vec![0]);
        assert_eq!(total(&tasks), 1);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut tasks = set(&["a"]);
        tasks.transition(3, Progression::Completed);
        tasks.transition(-1, Progression::Completed);
        tasks.set_worker(3, 9);

        assert_eq!(tasks.get_worker(3), None);
        assert_eq!(tasks.state(3), None);
        assert_eq!(tasks.len(Progression::Idle), 1);
        assert!(!tasks.done());
    }

    #[test]
    fn done_iff_every_task_completed() {
        let mut tasks = set(&["a", "b"]);
        assert!(!tasks.done());

        tasks.poll_idle().unwrap();
        tasks.transition(0, Progression::Completed);
        assert!(!tasks.done());

        tasks.poll_idle().unwrap();
        tasks.transition(1, Progression::Completed);
        assert!(tasks.done());
    }

    #[test]
    fn empty_set_is_done_immediately() {
        let tasks = TaskSet::new(std::iter::empty());
        assert_eq!(tasks.capacity(), 0);
        assert!(tasks.done());
    }
}
