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

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use burstpool::PoolConfig;
use burstpool::PoolError;
use common::TestStrategy;
use common::make_pool;
use common::make_pool_with;
use common::settle;

#[tokio::test]
async fn test_shutdown_closes_idle_connections() {
    let (pool, strategy) = make_pool(PoolConfig::new(2));

    let c0 = pool.get().await.unwrap();
    let c1 = pool.get().await.unwrap();
    drop((c0, c1));
    assert_eq!(pool.status().idle_count, 2);

    assert_eq!(pool.shutdown().await, 2);
    assert!(pool.is_closed());
    assert_eq!(strategy.closed(), vec![0, 1]);
    assert_eq!(pool.status().current_size, 0);

    assert!(matches!(pool.get().await, Err(PoolError::Closed)));
    assert_eq!(strategy.created(), 2);
}

#[tokio::test]
async fn test_shutdown_fails_waiters() {
    let (pool, strategy) = make_pool(PoolConfig::new(1));

    let conn = pool.get().await.unwrap();
    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.get().await.map(|conn| conn.id) }
    });
    settle().await;
    assert_eq!(pool.status().wait_count, 1);

    assert_eq!(pool.shutdown().await, 0);
    assert!(matches!(waiter.await.unwrap(), Err(PoolError::Closed)));

    // lent out connections are closed once they come back
    drop(conn);
    settle().await;
    assert_eq!(strategy.closed(), vec![0]);
    assert_eq!(pool.status().current_size, 0);
}

#[tokio::test]
async fn test_release_after_shutdown_closes_connection() {
    let (pool, strategy) = make_pool(PoolConfig::new(2));

    let conn = pool.get().await.unwrap();
    pool.shutdown().await;
    conn.release().await;

    assert_eq!(strategy.closed(), vec![0]);
    let status = pool.status();
    assert_eq!(status.current_size, 0);
    assert_eq!(status.in_use, 0);
}

#[tokio::test]
async fn test_connection_created_during_shutdown_is_closed() {
    let (pool, strategy) = make_pool_with(
        PoolConfig::new(1),
        TestStrategy::with_connect_delay(Duration::from_millis(50)),
    );

    let creating = tokio::spawn({
        let pool = pool.clone();
        async move { pool.get().await.map(|conn| conn.id) }
    });
    settle().await;
    assert_eq!(pool.status().allocating, 1);

    pool.shutdown().await;
    assert!(matches!(creating.await.unwrap(), Err(PoolError::Closed)));
    settle().await;

    assert_eq!(strategy.created(), 1);
    assert_eq!(strategy.closed(), vec![0]);
    assert_eq!(pool.status().current_size, 0);
}

#[tokio::test]
async fn test_shutdown_tolerates_close_errors() {
    let (pool, strategy) = make_pool(PoolConfig::new(3));
    strategy.failing_closes.store(true, Ordering::SeqCst);

    let conns = vec![
        pool.get().await.unwrap(),
        pool.get().await.unwrap(),
        pool.get().await.unwrap(),
    ];
    drop(conns);

    assert_eq!(pool.shutdown().await, 3);
    assert_eq!(strategy.closed().len(), 3);
    assert_eq!(pool.status().current_size, 0);
}
