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

/// Errors rejecting a [`PoolConfig`](crate::PoolConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The pool must be able to hold at least one connection.
    #[error("max_size must be greater than zero")]
    ZeroMaxSize,

    /// The burst limit is below the steady-state capacity.
    #[error("burst_limit ({burst_limit}) must be greater than or equal to max_size ({max_size})")]
    BurstBelowMaxSize {
        /// The configured steady-state capacity.
        max_size: usize,
        /// The configured burst limit.
        burst_limit: usize,
    },
}

/// Errors returned by [`Pool::get`](crate::Pool::get).
///
/// `E` is the error type of the [`ConnectionStrategy`](crate::ConnectionStrategy).
#[derive(Debug, thiserror::Error)]
pub enum PoolError<E> {
    /// The strategy failed to open a new connection.
    #[error("failed to create a connection")]
    Create(#[source] E),

    /// The strategy failed to tell whether a connection is still alive.
    #[error("failed to check whether a connection is alive")]
    Check(#[source] E),

    /// The pool has been shut down.
    #[error("pool is shut down")]
    Closed,
}
