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

#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use burstpool::ConnectionStrategy;
use burstpool::Pool;
use burstpool::PoolConfig;

#[derive(Debug, PartialEq, Eq)]
pub struct Conn {
    pub id: usize,
}

/// A strategy that counts every call and can be told to misbehave.
#[derive(Default)]
pub struct TestStrategy {
    next_id: AtomicUsize,
    pub connect_delay: Option<Duration>,
    pub check_delay: Option<Duration>,
    pub failing_connects: AtomicUsize,
    pub failing_checks: AtomicBool,
    pub failing_closes: AtomicBool,
    dead: Mutex<HashSet<usize>>,
    closed: Mutex<Vec<usize>>,
}

impl TestStrategy {
    pub fn with_connect_delay(delay: Duration) -> Self {
        Self {
            connect_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn with_check_delay(delay: Duration) -> Self {
        Self {
            check_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> Vec<usize> {
        self.closed.lock().unwrap().clone()
    }

    pub fn kill(&self, id: usize) {
        self.dead.lock().unwrap().insert(id);
    }

    pub fn fail_next_connects(&self, n: usize) {
        self.failing_connects.store(n, Ordering::SeqCst);
    }
}

impl ConnectionStrategy for TestStrategy {
    type Connection = Conn;
    type Error = io::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Conn { id })
    }

    async fn is_dead(&self, conn: &mut Self::Connection) -> Result<bool, Self::Error> {
        if let Some(delay) = self.check_delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing_checks.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "probe failed"));
        }
        Ok(self.dead.lock().unwrap().contains(&conn.id))
    }

    async fn close(&self, conn: Self::Connection) -> Result<(), Self::Error> {
        self.closed.lock().unwrap().push(conn.id);
        if self.failing_closes.load(Ordering::SeqCst) {
            return Err(io::Error::other("close failed"));
        }
        Ok(())
    }
}

pub type TestPool = Arc<Pool<Arc<TestStrategy>>>;

pub fn make_pool(config: PoolConfig) -> (TestPool, Arc<TestStrategy>) {
    make_pool_with(config, TestStrategy::default())
}

pub fn make_pool_with(config: PoolConfig, strategy: TestStrategy) -> (TestPool, Arc<TestStrategy>) {
    let strategy = Arc::new(strategy);
    let pool = Pool::new(config, strategy.clone()).unwrap();
    (pool, strategy)
}

/// Gives spawned tasks, including background closes, a chance to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
