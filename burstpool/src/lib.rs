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

//! An async connection pool for expensive, long-lived resources.
//!
//! The pool lends out connections created by a [`ConnectionStrategy`]. It keeps up to `max_size`
//! of them, grows up to an optional `burst_limit` under load, and closes the surplus again once
//! the load goes away. Every connection is checked for liveness before it is handed out.
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//!
//! use burstpool::ConnectionStrategy;
//! use burstpool::Pool;
//! use burstpool::PoolConfig;
//!
//! struct Session;
//! impl Session {
//!     async fn render(&self) -> &'static str {
//!         "<html></html>"
//!     }
//! }
//!
//! struct Sessions;
//! impl ConnectionStrategy for Sessions {
//!     type Connection = Session;
//!     type Error = Infallible;
//!
//!     async fn connect(&self) -> Result<Self::Connection, Self::Error> {
//!         Ok(Session)
//!     }
//!
//!     async fn is_dead(&self, _conn: &mut Self::Connection) -> Result<bool, Self::Error> {
//!         Ok(false)
//!     }
//!
//!     async fn close(&self, _conn: Self::Connection) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = PoolConfig::new(4).with_burst_limit(8);
//! let pool = Pool::new(config, Sessions).unwrap();
//! let session = pool.get().await.unwrap();
//! assert_eq!(session.render().await, "<html></html>");
//! # }
//! ```

mod common;
mod error;
mod pool;

pub use common::ConnectionStatus;
pub use common::ConnectionStrategy;
pub use error::ConfigError;
pub use error::PoolError;
pub use pool::Pool;
pub use pool::PoolConfig;
pub use pool::PoolStatus;
pub use pool::PooledConnection;
