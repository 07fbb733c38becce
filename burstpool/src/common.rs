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

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Age and reuse history of a pooled connection, see [`PooledConnection::status`].
///
/// [`PooledConnection::status`]: crate::PooledConnection::status
#[derive(Debug, Clone, Copy)]
pub struct ConnectionStatus {
    opened_at: Instant,
    last_lent_at: Option<Instant>,
    reuse_count: usize,
}

impl ConnectionStatus {
    pub(crate) fn opened_now() -> Self {
        Self {
            opened_at: Instant::now(),
            last_lent_at: None,
            reuse_count: 0,
        }
    }

    pub(crate) fn mark_reused(&mut self) {
        self.reuse_count += 1;
        self.last_lent_at = Some(Instant::now());
    }

    /// When [`ConnectionStrategy::connect`] produced this connection.
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// When the pool last handed this connection out again, or when it was opened if it has only
    /// been lent out once.
    pub fn last_lent_at(&self) -> Instant {
        self.last_lent_at.unwrap_or(self.opened_at)
    }

    /// How many times the connection came back from the pool instead of being opened afresh.
    ///
    /// Zero for a connection fresh from [`ConnectionStrategy::connect`].
    pub fn reuse_count(&self) -> usize {
        self.reuse_count
    }
}

/// A trait whose instance opens, probes and closes connections for the pool.
///
/// The pool never looks inside a connection. Everything it knows about the resource comes from
/// these three operations.
pub trait ConnectionStrategy: Send + Sync + 'static {
    /// The type of connections that this instance manages.
    type Connection: Send + 'static;

    /// The type of errors that this instance can return.
    type Error: fmt::Debug + Send + 'static;

    /// Opens a new connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// Whether the connection `conn` is no longer usable.
    ///
    /// This is called every time a connection is handed out, so it should be cheap. Returns
    /// `Ok(true)` if the connection is dead and must be discarded.
    fn is_dead(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Closes the connection and releases its underlying resources.
    ///
    /// Closing is best effort: the pool logs a returned error and otherwise ignores it.
    fn close(&self, conn: Self::Connection) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl<S: ConnectionStrategy> ConnectionStrategy for Arc<S> {
    type Connection = S::Connection;
    type Error = S::Error;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        (**self).connect()
    }

    fn is_dead(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        (**self).is_dead(conn)
    }

    fn close(&self, conn: Self::Connection) -> impl Future<Output = Result<(), Self::Error>> + Send {
        (**self).close(conn)
    }
}
