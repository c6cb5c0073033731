//! Pool router - one call surface over several workers.
//!
//! Each call goes to the member under the rotation cursor, and the cursor
//! then moves to `(cursor + 1) % size`. Routing happens per call, whatever
//! the method, so a batch of calls spreads evenly over the members.
//!
//! # Example
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> workwire::Result<()> {
//! use workwire::dispatch::{Dispatcher, HandlerError};
//! use workwire::proxy::{Invoke, ProxyConfig};
//! use workwire::worker::TaskSpawner;
//! use workwire::Pool;
//!
//! let spawner = TaskSpawner::new().module("calc", || {
//!     Dispatcher::builder()
//!         .handle("square", |(x,): (i64,), _ctx| async move { Ok::<_, HandlerError>(x * x) })
//!         .build()
//! });
//!
//! let pool = Pool::spawn(&spawner, "calc", 4, ProxyConfig::default())?;
//! let replies: Vec<_> = (1..=8).map(|x| pool.invoke::<_, i64>("square", &(x,))).collect();
//! for (x, reply) in (1..=8).zip(replies) {
//!     assert_eq!(reply.await?, x * x);
//! }
//! pool.terminate_all()?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;

use crate::error::{Result, WorkwireError};
use crate::protocol::validate_method_name;
use crate::proxy::{Invoke, PendingReply, ProxyConfig, RemoteProxy, Reply};
use crate::transfer::TransferList;
use crate::worker::{WorkerHandle, WorkerSpawner};

/// Fixed-size set of proxies behind one call surface.
pub struct Pool {
    members: Vec<RemoteProxy>,
    cursor: AtomicUsize,
}

impl Pool {
    /// Spawn `size` workers from `locator` and bind a proxy to each.
    ///
    /// # Errors
    ///
    /// `Config` if `size` is 0; otherwise the first spawn error. Workers
    /// already started are terminated before the error is returned.
    pub fn spawn<S>(spawner: &S, locator: &str, size: usize, config: ProxyConfig) -> Result<Self>
    where
        S: WorkerSpawner + ?Sized,
    {
        if size == 0 {
            return Err(WorkwireError::Config("Pool size must be at least 1".into()));
        }

        let mut members = Vec::with_capacity(size);
        for _ in 0..size {
            match RemoteProxy::spawn(spawner, locator, config.clone()) {
                Ok(proxy) => members.push(proxy),
                Err(e) => {
                    terminate(&members);
                    return Err(e);
                }
            }
        }

        tracing::debug!("Pool of {} started for {}", size, locator);
        Self::from_proxies(members)
    }

    /// Build a pool over existing proxies.
    ///
    /// # Errors
    ///
    /// `Config` if `proxies` is empty.
    pub fn from_proxies(proxies: Vec<RemoteProxy>) -> Result<Self> {
        if proxies.is_empty() {
            return Err(WorkwireError::Config("Pool size must be at least 1".into()));
        }
        Ok(Self {
            members: proxies,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// The members, in rotation order.
    pub fn members(&self) -> &[RemoteProxy] {
        &self.members
    }

    /// Worker handles of members that spawned their worker.
    pub fn handles(&self) -> Vec<&WorkerHandle> {
        self.members.iter().filter_map(RemoteProxy::worker).collect()
    }

    /// Index of the member that serves the next call.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Calls awaiting a reply across all members.
    pub fn pending_calls(&self) -> usize {
        self.members.iter().map(RemoteProxy::pending_calls).sum()
    }

    /// Terminate every member's worker.
    ///
    /// Every worker is asked to stop even if one fails; the first error is
    /// returned.
    pub fn terminate_all(&self) -> Result<()> {
        let mut first_err = None;
        for handle in self.handles() {
            if let Err(e) = handle.terminate() {
                tracing::warn!("Failed to terminate {}: {}", handle.id(), e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Take the member under the cursor and advance the cursor.
    fn next_member(&self) -> &RemoteProxy {
        let size = self.members.len();
        let current = self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some((c + 1) % size))
            .unwrap_or_else(|c| c);
        &self.members[current % size]
    }
}

fn terminate(members: &[RemoteProxy]) {
    for handle in members.iter().filter_map(RemoteProxy::worker) {
        if let Err(e) = handle.terminate() {
            tracing::warn!("Failed to terminate {}: {}", handle.id(), e);
        }
    }
}

impl Invoke for Pool {
    fn invoke_raw(&self, method: &str, args: Bytes, transfer: TransferList) -> PendingReply<Reply> {
        // Refused names do not consume a turn.
        if let Err(e) = validate_method_name(method) {
            return PendingReply::failed(e);
        }
        self.next_member().invoke_raw(method, args, transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::local;
    use crate::protocol::Message;

    fn bare_pool(size: usize) -> (Pool, Vec<crate::channel::Channel>) {
        let (proxies, workers): (Vec<_>, Vec<_>) = (0..size)
            .map(|_| {
                let (controller, worker) = local::pair();
                (RemoteProxy::connect(controller, ProxyConfig::default()), worker)
            })
            .unzip();
        (Pool::from_proxies(proxies).unwrap(), workers)
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(matches!(Pool::from_proxies(Vec::new()), Err(WorkwireError::Config(_))));
    }

    #[tokio::test]
    async fn test_zero_size_spawn_rejected() {
        let spawner = crate::worker::TaskSpawner::new();
        let result = Pool::spawn(&spawner, "calc", 0, ProxyConfig::default());
        assert!(matches!(result, Err(WorkwireError::Config(_))));
    }

    #[tokio::test]
    async fn test_round_robin_regardless_of_method() {
        let (pool, mut workers) = bare_pool(3);
        let methods = ["a", "b", "a", "c", "a", "b", "c"];

        let _replies: Vec<_> = methods
            .iter()
            .map(|m| pool.call(m).send_raw())
            .collect();

        let mut seen = vec![Vec::new(); 3];
        for (i, worker) in workers.iter_mut().enumerate() {
            while let Some(env) = worker.inbox.try_recv() {
                if let Message::Call(call) = env.message {
                    seen[i].push(call.method);
                }
            }
        }

        assert_eq!(seen[0], vec!["a", "c", "c"]);
        assert_eq!(seen[1], vec!["b", "a"]);
        assert_eq!(seen[2], vec!["a", "b"]);
        assert_eq!(pool.cursor(), 7 % 3);
        assert_eq!(pool.pending_calls(), 7);
    }

    #[tokio::test]
    async fn test_reserved_name_does_not_rotate() {
        let (pool, _workers) = bare_pool(2);

        let result = pool.invoke::<_, ()>("worker", &()).await;
        assert!(matches!(result, Err(WorkwireError::ReservedMethod(_))));
        assert_eq!(pool.cursor(), 0);
    }

    #[tokio::test]
    async fn test_bare_pool_has_no_handles() {
        let (pool, _workers) = bare_pool(2);
        assert_eq!(pool.size(), 2);
        assert!(pool.handles().is_empty());
        assert!(pool.terminate_all().is_ok());
    }
}
