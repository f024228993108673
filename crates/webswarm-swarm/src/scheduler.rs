//! # Repeating-task scheduler
//!
//! Each task waits for its delay, runs its job, and repeats until destroyed.
//! The job decides the next delay: `Ok(Some(d))` re-arms with `d`,
//! `Ok(None)` reverts to the task's initial delay. Job errors are logged and
//! the task keeps going.
//!
//! Destroying a task cuts a pending delay short; a job that is already
//! running is allowed to finish before the loop exits.

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

use webswarm_core::Result;

type Job<K> = Box<dyn Fn(Arc<Task<K>>) -> BoxFuture<'static, Result<Option<Duration>>> + Send + Sync>;

/// A scheduled unit of work with a mutable re-arm delay.
pub struct Task<K> {
    id: K,
    initial_delay: Duration,
    delay: Mutex<Duration>,
    job: Job<K>,
    started: AtomicBool,
    destroyed: AtomicBool,
    wake: Notify,
}

impl<K: Debug> Debug for Task<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("delay", &self.delay())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl<K> Task<K> {
    pub fn id(&self) -> &K {
        &self.id
    }

    /// The delay before the next run.
    pub fn delay(&self) -> Duration {
        *self.delay.lock()
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Skip the rest of the current delay and run the job now. A trigger that
    /// arrives while the job is running causes one more run right after it.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Stop future runs.
    pub fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.wake.notify_one();
        }
    }

}

impl<K> Task<K>
where
    K: Clone + Debug + Send + Sync + 'static,
{
    fn start(self: &Arc<Self>) -> bool {
        if self.is_destroyed() || self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        tokio::spawn(Self::run(self.clone()));
        true
    }

    async fn run(task: Arc<Self>) {
        debug!(task = ?task.id, "scheduled task started");
        loop {
            let delay = task.delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = task.wake.notified() => {}
            }
            if task.is_destroyed() {
                break;
            }

            match (task.job)(task.clone()).await {
                Ok(Some(next)) => task.set_delay(next),
                Ok(None) => task.set_delay(task.initial_delay),
                Err(e) => warn!(task = ?task.id, error = %e, "scheduled job failed"),
            }
            if task.is_destroyed() {
                break;
            }
        }
        debug!(task = ?task.id, "scheduled task stopped");
    }
}

/// Keyed collection of repeating tasks.
pub struct Scheduler<K> {
    tasks: Mutex<HashMap<K, Arc<Task<K>>>>,
}

impl<K> Default for Scheduler<K> {
    fn default() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> Scheduler<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task without starting it. Replaces (and destroys) any
    /// task already registered under `id`.
    pub fn add_task<F, Fut>(&self, id: K, job: F, initial_delay: Duration) -> Arc<Task<K>>
    where
        F: Fn(Arc<Task<K>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Duration>>> + Send + 'static,
    {
        let task = Arc::new(Task {
            id: id.clone(),
            initial_delay,
            delay: Mutex::new(initial_delay),
            job: Box::new(move |task| job(task).boxed()),
            started: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            wake: Notify::new(),
        });
        if let Some(previous) = self.tasks.lock().insert(id, task.clone()) {
            previous.destroy();
        }
        task
    }

    /// Start the task registered under `id`. False if unknown or already started.
    pub fn start(&self, id: &K) -> bool {
        let task = self.get(id);
        task.is_some_and(|task| task.start())
    }

    pub fn get(&self, id: &K) -> Option<Arc<Task<K>>> {
        self.tasks.lock().get(id).cloned()
    }

    /// Destroy and forget the task registered under `id`.
    pub fn destroy(&self, id: &K) -> bool {
        let task = self.tasks.lock().remove(id);
        match task {
            Some(task) => {
                task.destroy();
                true
            }
            None => false,
        }
    }

    /// Destroy every task.
    pub fn clear(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain().map(|(_, t)| t).collect();
        for task in tasks {
            task.destroy();
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(
        runs: Arc<AtomicUsize>,
        next: Option<Duration>,
    ) -> impl Fn(Arc<Task<&'static str>>) -> BoxFuture<'static, Result<Option<Duration>>>
    + Send
    + Sync
    + 'static {
        move |_task| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(next)
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_waits_for_delay_before_running() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let task = scheduler.add_task("a", counting(runs.clone(), None), Duration::from_secs(10));

        // Not running until started.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        assert!(scheduler.start(&"a"));
        assert!(!scheduler.start(&"a"));
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(task.delay(), Duration::from_secs(10));
        scheduler.clear();
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_result_sets_next_delay() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let task = scheduler.add_task(
            "relaxed",
            counting(runs.clone(), Some(Duration::from_secs(60))),
            Duration::from_secs(10),
        );
        scheduler.start(&"relaxed");

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(task.delay(), Duration::from_secs(60));

        // The relaxed delay now applies.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        scheduler.clear();
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_do_not_stop_the_loop() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler.add_task(
            "flaky",
            move |_task| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<Option<Duration>, _>(webswarm_core::WebswarmError::Transport("boom".into()))
                }
            },
            Duration::from_secs(1),
        );
        scheduler.start(&"flaky");
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        scheduler.clear();
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_cuts_delay_short() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let task = scheduler.add_task("a", counting(runs.clone(), None), Duration::from_secs(10));
        scheduler.start(&"a");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(scheduler.destroy(&"a"));
        assert!(!scheduler.destroy(&"a"));
        assert!(task.is_destroyed());
        assert!(scheduler.get(&"a").is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_lets_running_job_finish() {
        let scheduler = Scheduler::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let task = scheduler.add_task(
            "slow",
            move |task: Arc<Task<&'static str>>| {
                let flag = flag.clone();
                async move {
                    task.destroy();
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok::<_, webswarm_core::WebswarmError>(None::<Duration>)
                }
            },
            Duration::from_secs(1),
        );
        scheduler.start(&"slow");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(task.is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_runs_immediately() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let task = scheduler.add_task("a", counting(runs.clone(), None), Duration::from_secs(10));
        scheduler.start(&"a");
        tokio::task::yield_now().await;

        task.trigger();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        scheduler.clear();
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_add_task_replaces_previous() {
        let scheduler: Scheduler<&'static str> = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let first = scheduler.add_task("a", counting(runs.clone(), None), Duration::from_secs(1));
        let second = scheduler.add_task("a", counting(runs, None), Duration::from_secs(2));
        assert!(first.is_destroyed());
        assert!(!second.is_destroyed());
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.get(&"a").unwrap().initial_delay(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_task_debug_shows_delay_and_state() {
        let scheduler: Scheduler<&'static str> = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let task = scheduler.add_task("repair", counting(runs, None), Duration::from_secs(3));
        let rendered = format!("{task:?}");
        assert!(rendered.contains("\"repair\""));
        assert!(rendered.contains("3s"));
        assert!(rendered.contains("destroyed: false"));
        task.destroy();
        assert!(format!("{task:?}").contains("destroyed: true"));
    }
}
