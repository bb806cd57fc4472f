//! Cooperative function scheduler and watchdog.
//!
//! Asynchronous script functions run as resumable tasks: each call is
//! one step, identified by an integer checkpoint, and ends by either
//! requesting a wait before a next checkpoint or completing. The
//! scheduler owns the task table and its state machine; the update
//! thread asks it which task to step next and reports the outcome.
//!
//! Every entry point that depends on time takes an explicit `now` so
//! the state machine is testable with simulated instants.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::script::ProgramId;

/// What a task step asked for.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    /// Sleep, then resume at the given checkpoint.
    Wait { seconds: f64, next_step: i64 },
    /// The task is finished.
    Done,
}

#[derive(Clone, Debug, PartialEq)]
enum TaskState {
    /// Eligible to be stepped.
    Running,
    /// Sleeping until `resume_at`.
    Waiting { resume_at: Instant },
    /// Suspended by the user. `remaining` holds the unexpired part of a
    /// wait, so resuming re-arms the sleep instead of restarting it.
    Paused { remaining: Option<Duration> },
}

#[derive(Debug)]
struct Task {
    program: ProgramId,
    symbol: String,
    state: TaskState,
    checkpoint: i64,
}

/// A task the update thread should step now.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadyTask {
    pub program: ProgramId,
    pub symbol: String,
    pub checkpoint: i64,
}

/// Observable phase of a task, for display.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskPhase {
    Running,
    /// Time left until the next step.
    Waiting { remaining: Duration },
    Paused,
}

/// One row in a task listing.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskView {
    pub program: ProgramId,
    pub symbol: String,
    pub phase: TaskPhase,
}

#[derive(Default)]
pub struct FunctionScheduler {
    tasks: Vec<Task>,
    /// Round-robin cursor into `tasks`.
    cursor: usize,
}

impl FunctionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_of(&self, program: ProgramId, symbol: &str) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| t.program == program && t.symbol == symbol)
    }

    pub fn is_active(&self, program: ProgramId, symbol: &str) -> bool {
        self.index_of(program, symbol).is_some()
    }

    /// Begin a task at checkpoint 0.
    ///
    /// Returns false without touching anything when the same function
    /// of the same program is already active, in any phase.
    pub fn start(&mut self, program: ProgramId, symbol: &str) -> bool {
        if self.is_active(program, symbol) {
            return false;
        }
        self.tasks.push(Task {
            program,
            symbol: symbol.to_string(),
            state: TaskState::Running,
            checkpoint: 0,
        });
        true
    }

    /// Suspend a task. Returns true when the task transitioned and the
    /// pause callback should fire.
    pub fn pause(&mut self, program: ProgramId, symbol: &str, now: Instant) -> bool {
        let Some(index) = self.index_of(program, symbol) else {
            return false;
        };
        let task = &mut self.tasks[index];
        match task.state {
            TaskState::Running => {
                task.state = TaskState::Paused { remaining: None };
                true
            }
            TaskState::Waiting { resume_at } => {
                task.state = TaskState::Paused {
                    remaining: Some(resume_at.saturating_duration_since(now)),
                };
                true
            }
            TaskState::Paused { .. } => false,
        }
    }

    /// Resume a paused task, re-arming any interrupted wait. Returns
    /// true when the resume callback should fire.
    pub fn resume(&mut self, program: ProgramId, symbol: &str, now: Instant) -> bool {
        let Some(index) = self.index_of(program, symbol) else {
            return false;
        };
        let task = &mut self.tasks[index];
        match task.state {
            TaskState::Paused { remaining } => {
                task.state = match remaining {
                    Some(remaining) => TaskState::Waiting {
                        resume_at: now + remaining,
                    },
                    None => TaskState::Running,
                };
                true
            }
            _ => false,
        }
    }

    /// Remove a task. Returns true exactly once per active task, so the
    /// stop callback fires once no matter how often stop is requested.
    pub fn stop(&mut self, program: ProgramId, symbol: &str) -> bool {
        match self.index_of(program, symbol) {
            Some(index) => {
                self.tasks.remove(index);
                true
            }
            None => false,
        }
    }

    /// Pick the next task due for a step, round-robin over the table.
    ///
    /// A waiting task whose deadline has passed becomes running and is
    /// eligible immediately.
    pub fn next_ready(&mut self, now: Instant) -> Option<ReadyTask> {
        if self.tasks.is_empty() {
            return None;
        }
        for task in &mut self.tasks {
            if let TaskState::Waiting { resume_at } = task.state {
                if resume_at <= now {
                    task.state = TaskState::Running;
                }
            }
        }
        let len = self.tasks.len();
        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            if self.tasks[index].state == TaskState::Running {
                self.cursor = (index + 1) % len;
                let task = &self.tasks[index];
                return Some(ReadyTask {
                    program: task.program,
                    symbol: task.symbol.clone(),
                    checkpoint: task.checkpoint,
                });
            }
        }
        None
    }

    /// Apply the outcome of a step.
    pub fn record_outcome(
        &mut self,
        program: ProgramId,
        symbol: &str,
        outcome: StepOutcome,
        now: Instant,
    ) {
        let Some(index) = self.index_of(program, symbol) else {
            return;
        };
        match outcome {
            StepOutcome::Wait { seconds, next_step } => {
                let task = &mut self.tasks[index];
                task.checkpoint = next_step;
                task.state = TaskState::Waiting {
                    resume_at: now + Duration::from_secs_f64(seconds.max(0.0)),
                };
            }
            StepOutcome::Done => {
                self.tasks.remove(index);
            }
        }
    }

    /// Remove every task of one program. Returns the symbols removed.
    pub fn stop_program(&mut self, program: ProgramId) -> Vec<String> {
        let mut removed = Vec::new();
        self.tasks.retain(|task| {
            if task.program == program {
                removed.push(task.symbol.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Current table, for display.
    pub fn snapshot(&self, now: Instant) -> Vec<TaskView> {
        self.tasks
            .iter()
            .map(|task| TaskView {
                program: task.program,
                symbol: task.symbol.clone(),
                phase: match task.state {
                    TaskState::Running => TaskPhase::Running,
                    TaskState::Waiting { resume_at } => TaskPhase::Waiting {
                        remaining: resume_at.saturating_duration_since(now),
                    },
                    TaskState::Paused { .. } => TaskPhase::Paused,
                },
            })
            .collect()
    }
}

/// The function currently being stepped by the update thread.
#[derive(Clone, Debug)]
pub struct InFlight {
    pub program: ProgramId,
    /// Program display name, captured at step start so the report
    /// makes sense even if the program is renamed meanwhile.
    pub program_name: String,
    pub symbol: String,
    pub started: Instant,
}

/// Detects a step that has run far past the cooperative budget.
///
/// The update thread records every step through [`Watchdog::begin`] and
/// [`Watchdog::clear`]; any other thread may ask [`Watchdog::is_stuck`].
/// The threshold is independent of the scheduler tick.
#[derive(Clone)]
pub struct Watchdog {
    threshold: Duration,
    in_flight: Arc<Mutex<Option<InFlight>>>,
}

impl Watchdog {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<InFlight>> {
        match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn begin(&self, program: ProgramId, program_name: &str, symbol: &str, now: Instant) {
        *self.slot() = Some(InFlight {
            program,
            program_name: program_name.to_string(),
            symbol: symbol.to_string(),
            started: now,
        });
    }

    pub fn clear(&self) {
        *self.slot() = None;
    }

    pub fn is_stuck(&self, now: Instant) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|f| now.saturating_duration_since(f.started) >= self.threshold)
    }

    /// The function to blame when stuck.
    pub fn suspect(&self, now: Instant) -> Option<InFlight> {
        self.slot()
            .as_ref()
            .filter(|f| now.saturating_duration_since(f.started) >= self.threshold)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait(seconds: f64, next_step: i64) -> StepOutcome {
        StepOutcome::Wait { seconds, next_step }
    }

    #[test]
    fn test_start_is_idempotent_per_function() {
        let mut scheduler = FunctionScheduler::new();
        assert!(scheduler.start(1, "run"));
        assert!(!scheduler.start(1, "run"));
        // A different function of the same program is independent.
        assert!(scheduler.start(1, "prime"));
        assert!(scheduler.start(2, "run"));
    }

    #[test]
    fn test_wait_and_wake() {
        let mut scheduler = FunctionScheduler::new();
        let t0 = Instant::now();
        scheduler.start(1, "run");

        let ready = scheduler.next_ready(t0).unwrap();
        assert_eq!(ready.checkpoint, 0);
        scheduler.record_outcome(1, "run", wait(10.0, 1), t0);

        // Not due yet.
        assert!(scheduler.next_ready(t0 + Duration::from_secs(5)).is_none());

        // Due: resumes at the requested checkpoint.
        let ready = scheduler.next_ready(t0 + Duration::from_secs(10)).unwrap();
        assert_eq!(ready.checkpoint, 1);

        scheduler.record_outcome(1, "run", StepOutcome::Done, t0);
        assert!(!scheduler.is_active(1, "run"));
    }

    #[test]
    fn test_pause_preserves_remaining_wait() {
        let mut scheduler = FunctionScheduler::new();
        let t0 = Instant::now();
        scheduler.start(1, "run");
        scheduler.next_ready(t0);
        scheduler.record_outcome(1, "run", wait(10.0, 1), t0);

        // Pause 4 seconds in: 6 seconds remain.
        assert!(scheduler.pause(1, "run", t0 + Duration::from_secs(4)));
        // Long after the original deadline, still asleep.
        assert!(scheduler
            .next_ready(t0 + Duration::from_secs(60))
            .is_none());

        // Resume at t0+100: wait re-arms for the remaining 6 seconds.
        let t1 = t0 + Duration::from_secs(100);
        assert!(scheduler.resume(1, "run", t1));
        assert!(scheduler.next_ready(t1 + Duration::from_secs(5)).is_none());
        let ready = scheduler.next_ready(t1 + Duration::from_secs(6)).unwrap();
        assert_eq!(ready.checkpoint, 1);
    }

    #[test]
    fn test_pause_while_running_resumes_immediately() {
        let mut scheduler = FunctionScheduler::new();
        let t0 = Instant::now();
        scheduler.start(1, "run");

        assert!(scheduler.pause(1, "run", t0));
        // Pausing twice reports no transition.
        assert!(!scheduler.pause(1, "run", t0));
        assert!(scheduler.next_ready(t0).is_none());

        assert!(scheduler.resume(1, "run", t0));
        assert!(!scheduler.resume(1, "run", t0));
        assert!(scheduler.next_ready(t0).is_some());
    }

    #[test]
    fn test_stop_reports_exactly_once() {
        let mut scheduler = FunctionScheduler::new();
        scheduler.start(1, "run");
        assert!(scheduler.stop(1, "run"));
        assert!(!scheduler.stop(1, "run"));
        assert!(!scheduler.stop(1, "run"));
    }

    #[test]
    fn test_round_robin_between_ready_tasks() {
        let mut scheduler = FunctionScheduler::new();
        let t0 = Instant::now();
        scheduler.start(1, "a");
        scheduler.start(2, "b");

        let first = scheduler.next_ready(t0).unwrap();
        let second = scheduler.next_ready(t0).unwrap();
        assert_ne!(first.program, second.program);
        let third = scheduler.next_ready(t0).unwrap();
        assert_eq!(third.program, first.program);
    }

    #[test]
    fn test_stop_program_removes_all_its_tasks() {
        let mut scheduler = FunctionScheduler::new();
        scheduler.start(1, "a");
        scheduler.start(1, "b");
        scheduler.start(2, "a");

        let removed = scheduler.stop_program(1);
        assert_eq!(removed, ["a", "b"]);
        assert!(!scheduler.is_active(1, "a"));
        assert!(scheduler.is_active(2, "a"));
    }

    #[test]
    fn test_snapshot_phases() {
        let mut scheduler = FunctionScheduler::new();
        let t0 = Instant::now();
        scheduler.start(1, "a");
        scheduler.start(1, "b");
        scheduler.next_ready(t0);
        scheduler.record_outcome(1, "a", wait(30.0, 2), t0);
        scheduler.pause(1, "b", t0);

        let views = scheduler.snapshot(t0 + Duration::from_secs(10));
        assert_eq!(
            views[0].phase,
            TaskPhase::Waiting {
                remaining: Duration::from_secs(20)
            }
        );
        assert_eq!(views[1].phase, TaskPhase::Paused);
    }

    #[test]
    fn test_watchdog_threshold() {
        let watchdog = Watchdog::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(!watchdog.is_stuck(t0));

        watchdog.begin(1, "My program", "run", t0);
        assert!(!watchdog.is_stuck(t0 + Duration::from_secs(4)));
        assert!(watchdog.is_stuck(t0 + Duration::from_secs(5)));

        let suspect = watchdog.suspect(t0 + Duration::from_secs(6)).unwrap();
        assert_eq!(suspect.program, 1);
        assert_eq!(suspect.program_name, "My program");
        assert_eq!(suspect.symbol, "run");

        watchdog.clear();
        assert!(!watchdog.is_stuck(t0 + Duration::from_secs(60)));
    }
}
