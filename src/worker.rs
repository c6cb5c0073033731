//! Worker lifecycle - creating and destroying isolated execution contexts.
//!
//! A [`WorkerSpawner`] turns a locator into a running worker plus the
//! controller's end of its channel. The locator is opaque to everything
//! except the spawner that interprets it.
//!
//! Implementations:
//! - [`TaskSpawner`] - the locator names a registered module; each worker is
//!   a fresh [`Dispatcher`] on its own tokio task over a local channel
//! - [`ProcessSpawner`] - the locator is an executable; each worker is a
//!   child process speaking framed messages on stdin/stdout

use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::process::{Child, Command};
use tokio::task::AbortHandle;

use crate::channel::{local, stream, Channel, StreamConfig};
use crate::dispatch::Dispatcher;
use crate::error::{Result, WorkwireError};

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique worker id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl WorkerId {
    /// Allocate the next id.
    pub fn next() -> Self {
        Self(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Lifecycle operations a spawner provides for its workers.
pub trait WorkerControl: Send + Sync + 'static {
    /// Stop the worker. Calling it again is a no-op.
    fn terminate(&self) -> Result<()>;

    /// Check if the worker is still running.
    fn is_running(&self) -> bool;
}

/// Handle to a spawned worker.
///
/// Cloning is cheap; every clone controls the same worker.
#[derive(Clone)]
pub struct WorkerHandle {
    id: WorkerId,
    locator: Arc<str>,
    control: Arc<dyn WorkerControl>,
}

impl WorkerHandle {
    /// Wrap a spawner's control object.
    pub fn new(locator: &str, control: impl WorkerControl) -> Self {
        Self {
            id: WorkerId::next(),
            locator: locator.into(),
            control: Arc::new(control),
        }
    }

    /// The worker's id.
    #[inline]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// The locator it was spawned from.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Stop the worker.
    ///
    /// Calls still pending on its channel are rejected with
    /// `ChannelClosed` once the channel notices.
    pub fn terminate(&self) -> Result<()> {
        tracing::debug!("Terminating {} ({})", self.id, self.locator);
        self.control.terminate()
    }

    /// Check if the worker is still running.
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("locator", &self.locator)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Creates workers from locators.
pub trait WorkerSpawner: Send + Sync {
    /// Start a worker; returns the controller's channel endpoint and the
    /// worker's handle.
    fn spawn(&self, locator: &str) -> Result<(Channel, WorkerHandle)>;
}

/// Builds the dispatcher a task worker runs.
pub type ModuleFactory = Arc<dyn Fn() -> Result<Dispatcher> + Send + Sync>;

/// Spawns workers as tokio tasks in this process.
///
/// # Example
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> workwire::Result<()> {
/// use workwire::dispatch::{Dispatcher, HandlerError};
/// use workwire::worker::{TaskSpawner, WorkerSpawner};
///
/// let spawner = TaskSpawner::new().module("calc", || {
///     Dispatcher::builder()
///         .handle("add", |(a, b): (i64, i64), _ctx| async move { Ok::<_, HandlerError>(a + b) })
///         .build()
/// });
///
/// let (_channel, handle) = spawner.spawn("calc")?;
/// assert!(handle.is_running());
/// handle.terminate()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct TaskSpawner {
    modules: HashMap<String, ModuleFactory>,
}

impl TaskSpawner {
    /// Create a spawner with no modules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under `locator`.
    pub fn module<F>(mut self, locator: &str, factory: F) -> Self
    where
        F: Fn() -> Result<Dispatcher> + Send + Sync + 'static,
    {
        self.modules.insert(locator.to_string(), Arc::new(factory));
        self
    }

    /// Check if a module is registered.
    pub fn has_module(&self, locator: &str) -> bool {
        self.modules.contains_key(locator)
    }
}

impl WorkerSpawner for TaskSpawner {
    fn spawn(&self, locator: &str) -> Result<(Channel, WorkerHandle)> {
        let factory = self
            .modules
            .get(locator)
            .ok_or_else(|| WorkwireError::Config(format!("Unknown worker module: {}", locator)))?;
        let dispatcher = factory()?;

        let (controller, worker) = local::pair();
        let task = tokio::spawn(async move {
            if let Err(e) = dispatcher.serve(worker).await {
                tracing::error!("Task worker error: {}", e);
            }
        });

        let handle = WorkerHandle::new(
            locator,
            TaskControl {
                task: task.abort_handle(),
            },
        );
        Ok((controller, handle))
    }
}

struct TaskControl {
    task: AbortHandle,
}

impl WorkerControl for TaskControl {
    fn terminate(&self) -> Result<()> {
        // Aborting the serve loop aborts its running calls too, which
        // drops every sender into the controller's inbox.
        self.task.abort();
        Ok(())
    }

    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Spawns workers as child processes.
///
/// The child must serve calls on its stdin/stdout, for example with
/// [`Dispatcher::serve_stdio`]. Its stderr is inherited. The child is
/// killed when its handle is terminated or the last handle clone drops.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpawner {
    args: Vec<String>,
    envs: Vec<(String, String)>,
    config: StreamConfig,
}

impl ProcessSpawner {
    /// Create a spawner that runs the locator with no arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument passed to every child.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable for every child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Set the stream configuration for child channels.
    pub fn stream_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, locator: &str) -> Result<(Channel, WorkerHandle)> {
        let mut child = Command::new(locator)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(WorkwireError::Protocol(format!(
                "Child stdio not captured for {}",
                locator
            )));
        };
        tracing::debug!("Started {} (pid {:?})", locator, child.id());

        let channel = stream::connect(stdout, stdin, self.config.clone());
        let handle = WorkerHandle::new(
            locator,
            ProcessControl {
                child: Mutex::new(child),
            },
        );
        Ok((channel, handle))
    }
}

struct ProcessControl {
    child: Mutex<Child>,
}

impl WorkerControl for ProcessControl {
    fn terminate(&self) -> Result<()> {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        child.start_kill()?;
        Ok(())
    }

    fn is_running(&self) -> bool {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(child.try_wait(), Ok(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::HandlerError;
    use std::time::Duration;

    fn calc_spawner() -> TaskSpawner {
        TaskSpawner::new().module("calc", || {
            Dispatcher::builder()
                .handle("add", |(a, b): (i64, i64), _ctx| async move {
                    Ok::<_, HandlerError>(a + b)
                })
                .build()
        })
    }

    #[test]
    fn test_worker_ids_are_unique() {
        let a = WorkerId::next();
        let b = WorkerId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("worker-"));
    }

    #[tokio::test]
    async fn test_unknown_module() {
        let result = calc_spawner().spawn("nope");
        assert!(matches!(result, Err(WorkwireError::Config(_))));
    }

    #[tokio::test]
    async fn test_task_worker_terminate_closes_channel() {
        let spawner = calc_spawner();
        assert!(spawner.has_module("calc"));

        let (mut channel, handle) = spawner.spawn("calc").unwrap();
        assert_eq!(handle.locator(), "calc");
        assert!(handle.is_running());

        handle.terminate().unwrap();
        assert!(channel.inbox.recv().await.is_none());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_running());
        assert!(handle.terminate().is_ok());
    }

    #[tokio::test]
    async fn test_each_spawn_builds_a_fresh_worker() {
        let spawner = calc_spawner();
        let (_a, first) = spawner.spawn("calc").unwrap();
        let (_b, second) = spawner.spawn("calc").unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let result = ProcessSpawner::new().spawn("/nonexistent/workwire-worker");
        assert!(matches!(result, Err(WorkwireError::Io(_))));
    }
}
