// Copyright 2025 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The connection pool.
//!
//! The pool keeps at most `max_size` idle connections. When every connection is lent out it may
//! grow up to `burst_limit` to absorb a short spike, and sheds the extra connections again as they
//! are returned while nobody is waiting.

use std::collections::VecDeque;
use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;

use futures::channel::oneshot;

use crate::ConfigError;
use crate::ConnectionStatus;
use crate::ConnectionStrategy;
use crate::PoolError;

/// The configuration of [`Pool`].
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Steady-state capacity of the [`Pool`].
    ///
    /// This is also the capacity of the idle queue.
    pub max_size: usize,

    /// Hard ceiling on the number of connections while absorbing a burst.
    ///
    /// When unset, `max_size` is the hard ceiling.
    pub burst_limit: Option<usize>,
}

impl PoolConfig {
    /// Creates a new [`PoolConfig`] without burst capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            burst_limit: None,
        }
    }

    /// Returns a new [`PoolConfig`] with the specified burst limit.
    pub fn with_burst_limit(mut self, burst_limit: usize) -> Self {
        self.burst_limit = Some(burst_limit);
        self
    }

    /// Checks that `max_size` is positive and `burst_limit` is not below it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        match self.burst_limit {
            Some(burst_limit) if burst_limit < self.max_size => {
                Err(ConfigError::BurstBelowMaxSize {
                    max_size: self.max_size,
                    burst_limit,
                })
            }
            _ => Ok(()),
        }
    }

    fn hard_limit(&self) -> usize {
        self.burst_limit.unwrap_or(self.max_size)
    }
}

/// The current pool status.
///
/// See [`Pool::status`].
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct PoolStatus {
    /// The steady-state capacity of the pool.
    pub max_size: usize,

    /// The burst limit of the pool, if any.
    pub burst_limit: Option<usize>,

    /// The number of connections owned by the pool: lent out, being created, or idle.
    pub current_size: usize,

    /// The number of connections lent out, including those being released.
    pub in_use: usize,

    /// The number of idle connections in the pool.
    pub idle_count: usize,

    /// The number of connections being created.
    pub allocating: usize,

    /// The number of connections being released.
    pub deallocating: usize,

    /// The number of futures waiting for a connection.
    pub wait_count: usize,
}

#[derive(Debug)]
struct Slot<T> {
    conn: T,
    status: ConnectionStatus,
}

impl<T> Slot<T> {
    fn new(conn: T) -> Self {
        Self {
            conn,
            status: ConnectionStatus::opened_now(),
        }
    }

    fn reused(mut self) -> Self {
        self.status.mark_reused();
        self
    }
}

/// What a releaser sends to a waiter.
enum Handoff<T> {
    /// A connection, already counted as in use on behalf of the waiter.
    Ready(Slot<T>),
    /// Capacity was freed and already counted as allocating on behalf of the waiter, which
    /// creates the connection itself.
    Create,
}

struct PoolState<T> {
    idle: VecDeque<Slot<T>>,
    waiters: VecDeque<oneshot::Sender<Handoff<T>>>,
    in_use: usize,
    allocating: usize,
    deallocating: usize,
    closed: bool,
}

impl<T> PoolState<T> {
    fn total(&self) -> usize {
        self.in_use + self.allocating + self.idle.len()
    }

    fn wait_count(&self) -> usize {
        self.waiters.iter().filter(|w| !w.is_canceled()).count()
    }

    fn give_back(&mut self) {
        assert!(
            self.in_use > 0,
            "invariant broken: more connections returned than lent out"
        );
        self.in_use -= 1;
    }

    /// Hands capacity freed below `hard_limit` to the waiters at the front of the queue.
    fn hand_over_capacity(&mut self, hard_limit: usize) {
        while self.total() < hard_limit {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            self.allocating += 1;
            if waiter.send(Handoff::Create).is_err() {
                self.allocating -= 1;
            }
        }
    }
}

enum Step<T> {
    Reuse(Slot<T>),
    Create,
    Wait(oneshot::Receiver<Handoff<T>>),
}

/// Generic connection pool with a steady-state size and an optional burst limit.
///
/// See the [module level documentation](self) for more.
pub struct Pool<S: ConnectionStrategy> {
    config: PoolConfig,
    strategy: S,
    state: Mutex<PoolState<S::Connection>>,
}

impl<S: ConnectionStrategy> std::fmt::Debug for Pool<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}

impl<S: ConnectionStrategy> Pool<S> {
    /// Creates a new [`Pool`].
    ///
    /// Fails if the configuration is invalid; see [`PoolConfig::validate`].
    pub fn new(config: PoolConfig, strategy: S) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;

        let state = Mutex::new(PoolState {
            idle: VecDeque::with_capacity(config.max_size),
            waiters: VecDeque::new(),
            in_use: 0,
            allocating: 0,
            deallocating: 0,
            closed: false,
        });

        Ok(Arc::new(Self {
            config,
            strategy,
            state,
        }))
    }

    /// Returns the configuration of the pool.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Retrieves a live connection from this [`Pool`].
    ///
    /// An idle connection is reused if there is one. Otherwise a new connection is created if the
    /// pool is below its burst limit, or the call waits for another caller to release one. Every
    /// connection is checked with [`ConnectionStrategy::is_dead`] before it is returned; dead
    /// connections are discarded and the acquisition starts over.
    ///
    /// The connection goes back to the pool when the returned [`PooledConnection`] is dropped.
    pub async fn get(self: &Arc<Self>) -> Result<PooledConnection<S>, PoolError<S::Error>> {
        loop {
            let mut conn = self.checkout().await?;
            match self.strategy.is_dead(&mut *conn).await {
                Ok(false) => return Ok(conn),
                Ok(true) => {
                    tracing::debug!("discarding dead connection");
                    conn.discard();
                }
                Err(err) => {
                    conn.discard();
                    return Err(PoolError::Check(err));
                }
            }
        }
    }

    /// Closes every idle connection and stops handing out connections.
    ///
    /// Pending and later [`Pool::get`] calls fail with [`PoolError::Closed`]. Connections still
    /// lent out are closed when they are released. Returns the number of idle connections closed.
    pub async fn shutdown(&self) -> usize {
        let (idle, waiters) = {
            let mut state = self.lock_state();
            state.closed = true;
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.waiters),
            )
        };

        // dropping the senders fails every waiter
        drop(waiters);

        let closed = idle.len();
        for slot in idle {
            if let Err(err) = self.strategy.close(slot.conn).await {
                tracing::warn!(?err, "failed to close idle connection on shutdown");
            }
        }

        tracing::debug!(closed, "pool shut down");
        closed
    }

    /// Whether [`Pool::shutdown`] has been called.
    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Returns the current status of the pool.
    ///
    /// The numbers are a snapshot; they may be stale by the time they are read under load.
    pub fn status(&self) -> PoolStatus {
        let state = self.lock_state();
        PoolStatus {
            max_size: self.config.max_size,
            burst_limit: self.config.burst_limit,
            current_size: state.total(),
            in_use: state.in_use,
            idle_count: state.idle.len(),
            allocating: state.allocating,
            deallocating: state.deallocating,
            wait_count: state.wait_count(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<S::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Obtains a connection that has not been checked for liveness yet.
    async fn checkout(self: &Arc<Self>) -> Result<PooledConnection<S>, PoolError<S::Error>> {
        let step = {
            let mut state = self.lock_state();
            if state.closed {
                return Err(PoolError::Closed);
            }

            if let Some(slot) = state.idle.pop_front() {
                state.in_use += 1;
                Step::Reuse(slot)
            } else if state.total() < self.config.hard_limit() {
                state.allocating += 1;
                Step::Create
            } else {
                state.waiters.retain(|w| !w.is_canceled());
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Step::Wait(rx)
            }
        };

        match step {
            Step::Reuse(slot) => Ok(PooledConnection::new(slot.reused(), self)),
            Step::Create => self.create().await,
            Step::Wait(rx) => {
                let mut waiter = Waiter {
                    rx,
                    pool: Arc::downgrade(self),
                };
                let handoff = (&mut waiter.rx).await;
                drop(waiter);
                match handoff {
                    Ok(Handoff::Ready(slot)) => Ok(PooledConnection::new(slot.reused(), self)),
                    // capacity was reserved for this waiter, so its place in line is kept
                    Ok(Handoff::Create) => self.create().await,
                    Err(oneshot::Canceled) => Err(PoolError::Closed),
                }
            }
        }
    }

    /// Opens a connection; the caller has already counted it as allocating.
    async fn create(self: &Arc<Self>) -> Result<PooledConnection<S>, PoolError<S::Error>> {
        let guard = scopeguard::guard((), |()| {
            let mut state = self.lock_state();
            state.allocating -= 1;
            state.hand_over_capacity(self.config.hard_limit());
        });

        let conn = self.strategy.connect().await.map_err(PoolError::Create)?;

        scopeguard::ScopeGuard::into_inner(guard);
        let (closed, total) = {
            let mut state = self.lock_state();
            state.allocating -= 1;
            state.in_use += 1;
            (state.closed, state.total())
        };

        let conn = PooledConnection::new(Slot::new(conn), self);
        if closed {
            // released right away, which closes it
            drop(conn);
            return Err(PoolError::Closed);
        }

        tracing::debug!(total, "created connection");
        Ok(conn)
    }

    /// Decides the fate of a returned connection.
    ///
    /// Returns the connection back if it has to be closed. The caller must then call
    /// [`Pool::close_shed`] or [`Pool::close_in_background`].
    fn recycle(&self, slot: Slot<S::Connection>) -> Option<Slot<S::Connection>> {
        let mut state = self.lock_state();
        state.deallocating += 1;

        let over_capacity = state.total() - state.deallocating >= self.config.max_size;
        if state.closed || (over_capacity && state.wait_count() == 0) {
            tracing::debug!(total = state.total(), "shedding connection");
            return Some(slot);
        }

        let mut slot = slot;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(Handoff::Ready(slot)) {
                Ok(()) => {
                    // `in_use` now counts the connection on behalf of the waiter
                    state.deallocating -= 1;
                    return None;
                }
                Err(Handoff::Ready(returned)) => slot = returned,
                Err(Handoff::Create) => unreachable!("a rejected handoff is returned as sent"),
            }
        }

        if state.idle.len() < self.config.max_size {
            state.idle.push_back(slot);
            state.deallocating -= 1;
            state.give_back();
            None
        } else {
            Some(slot)
        }
    }

    /// Closes a shed connection and settles the counters whatever happens to the close.
    async fn close_shed(&self, slot: Slot<S::Connection>) {
        let _guard = scopeguard::guard((), |()| self.settle_shed());

        if let Err(err) = self.strategy.close(slot.conn).await {
            tracing::warn!(?err, "failed to close connection");
        }
    }

    /// Spawns the close on the current runtime.
    ///
    /// A runtime that is shutting down accepts the task but may drop it unpolled, which leaves the
    /// counters unsettled.
    fn close_in_background(self: Arc<Self>, slot: Slot<S::Connection>) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { self.close_shed(slot).await });
            }
            Err(_) => {
                tracing::warn!("no async runtime to close a released connection; dropping it");
                drop(slot);
                self.settle_shed();
            }
        }
    }

    fn settle_shed(&self) {
        let mut state = self.lock_state();
        state.deallocating -= 1;
        state.give_back();
        state.hand_over_capacity(self.config.hard_limit());
    }

    /// Forgets a lent out connection without closing it.
    fn forget(&self) {
        let mut state = self.lock_state();
        state.give_back();
        state.hand_over_capacity(self.config.hard_limit());
    }
}

/// A pending [`Pool::get`] waiting in the queue.
///
/// If the future is dropped after a releaser already handed a connection over, the connection is
/// released again instead of being lost. Reserved capacity is passed on to the next waiter.
struct Waiter<S: ConnectionStrategy> {
    rx: oneshot::Receiver<Handoff<S::Connection>>,
    pool: Weak<Pool<S>>,
}

impl<S: ConnectionStrategy> Drop for Waiter<S> {
    fn drop(&mut self) {
        self.rx.close();
        match self.rx.try_recv() {
            Ok(Some(Handoff::Ready(slot))) => drop(PooledConnection {
                slot: Some(slot),
                pool: self.pool.clone(),
            }),
            Ok(Some(Handoff::Create)) => {
                // pass the reserved capacity on to the next waiter
                if let Some(pool) = self.pool.upgrade() {
                    let mut state = pool.lock_state();
                    state.allocating -= 1;
                    state.hand_over_capacity(pool.config.hard_limit());
                }
            }
            Ok(None) | Err(oneshot::Canceled) => {}
        }
    }
}

/// A connection borrowed from a [`Pool`].
///
/// This handle implements [`Deref`] and [`DerefMut`]. You can use it as if it was of type
/// `S::Connection`.
///
/// This handle implements [`Drop`] that releases the connection to the pool. When the release
/// decides to close the connection, the close runs as a task on the current tokio runtime. Call
/// [`PooledConnection::release`] to wait for the close instead.
///
/// Dropped outside of a runtime, a connection that has to be closed is dropped without calling
/// [`ConnectionStrategy::close`]. Dropped while the runtime is shutting down, the close task may
/// never run; the connection then stays counted as in use and being released. Release
/// connections with [`PooledConnection::release`] before shutting the runtime down.
pub struct PooledConnection<S: ConnectionStrategy> {
    slot: Option<Slot<S::Connection>>,
    pool: Weak<Pool<S>>,
}

impl<S> std::fmt::Debug for PooledConnection<S>
where
    S: ConnectionStrategy,
    S::Connection: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("slot", &self.slot)
            .finish()
    }
}

impl<S: ConnectionStrategy> Drop for PooledConnection<S> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            if let Some(pool) = self.pool.upgrade() {
                if let Some(slot) = pool.recycle(slot) {
                    pool.close_in_background(slot);
                }
            }
        }
    }
}

impl<S: ConnectionStrategy> Deref for PooledConnection<S> {
    type Target = S::Connection;
    fn deref(&self) -> &S::Connection {
        // SAFETY: `slot` is always `Some` when `PooledConnection` is owned.
        &self.slot.as_ref().unwrap().conn
    }
}

impl<S: ConnectionStrategy> DerefMut for PooledConnection<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: `slot` is always `Some` when `PooledConnection` is owned.
        &mut self.slot.as_mut().unwrap().conn
    }
}

impl<S: ConnectionStrategy> AsRef<S::Connection> for PooledConnection<S> {
    fn as_ref(&self) -> &S::Connection {
        self
    }
}

impl<S: ConnectionStrategy> AsMut<S::Connection> for PooledConnection<S> {
    fn as_mut(&mut self) -> &mut S::Connection {
        self
    }
}

impl<S: ConnectionStrategy> PooledConnection<S> {
    fn new(slot: Slot<S::Connection>, pool: &Arc<Pool<S>>) -> Self {
        Self {
            slot: Some(slot),
            pool: Arc::downgrade(pool),
        }
    }

    /// Returns the status of the connection.
    pub fn status(&self) -> ConnectionStatus {
        // SAFETY: `slot` is always `Some` when `PooledConnection` is owned.
        self.slot.as_ref().unwrap().status
    }

    /// Releases the connection to the pool, waiting for it to be closed if the pool sheds it.
    ///
    /// Dropping the handle has the same effect except that the close runs in the background.
    pub async fn release(mut self) {
        if let Some(slot) = self.slot.take() {
            if let Some(pool) = self.pool.upgrade() {
                if let Some(slot) = pool.recycle(slot) {
                    pool.close_shed(slot).await;
                }
            }
        }
    }

    /// Drops the connection without closing it or returning it to the pool.
    fn discard(mut self) {
        if let Some(slot) = self.slot.take() {
            if let Some(pool) = self.pool.upgrade() {
                pool.forget();
            }
            drop(slot);
        }
    }
}
