//! Async usage examples

use generic_objectpool::{ObjectPool, PoolConfiguration};
use std::time::Duration;
use tokio::time::{sleep, timeout};

#[tokio::main]
async fn main() {
    println!("=== generic_objectpool - Async Examples ===\n");

    // Example 1: Async borrow
    async_borrow().await;

    // Example 2: Async with timeout
    async_with_timeout().await;

    // Example 3: Concurrent access
    concurrent_access().await;

    // Example 4: Background eviction
    background_eviction().await;
}

async fn async_borrow() {
    println!("1. Async Borrow:");
    let pool = ObjectPool::from_fn(|| Ok(42u32), PoolConfiguration::default()).unwrap();

    let obj = pool.borrow_async().await.unwrap();
    println!("   Got object asynchronously: {}", *obj);
    pool.return_object(obj).unwrap();

    println!();
}

async fn async_with_timeout() {
    println!("2. Async with Timeout:");
    let pool = ObjectPool::from_fn(|| Ok(42u32), PoolConfiguration::new().with_max_total(1)).unwrap();

    // Hold the only object
    let held = pool.borrow().unwrap();

    // Dropping the borrow future on timeout cancels the wait
    match timeout(Duration::from_millis(100), pool.borrow_async()).await {
        Ok(Ok(obj)) => {
            println!("   Got object");
            pool.return_object(obj).unwrap();
        }
        Ok(Err(e)) => println!("   Error: {e}"),
        Err(_) => println!("   Timed out waiting"),
    }

    pool.return_object(held).unwrap();
    println!();
}

async fn concurrent_access() {
    println!("3. Concurrent Access:");
    let pool = ObjectPool::from_fn(
        || Ok(Vec::<u8>::new()),
        PoolConfiguration::new().with_max_total(3),
    )
    .unwrap();

    let mut handles = vec![];

    for i in 0..10 {
        let pool = pool.clone();
        let handle = tokio::spawn(async move {
            match pool.borrow_async().await {
                Ok(obj) => {
                    println!("   Task {} got object {}", i, obj.id());
                    sleep(Duration::from_millis(20)).await;
                    pool.return_object(obj).unwrap();
                }
                Err(e) => println!("   Task {} failed: {}", i, e),
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let metrics = pool.metrics();
    println!(
        "   Created {} objects for {} borrows\n",
        metrics.total_created, metrics.total_borrowed
    );
}

async fn background_eviction() {
    println!("4. Background Eviction:");
    let config = PoolConfiguration::new()
        .with_min_idle(1)
        .with_eviction(Duration::from_millis(50), 10)
        .with_min_evictable_idle_time(Duration::from_millis(100));
    let pool = ObjectPool::from_fn(|| Ok(0u8), config).unwrap();

    pool.warmup(5).unwrap();
    println!("   Idle after warmup: {}", pool.num_idle());

    sleep(Duration::from_millis(300)).await;
    println!("   Idle after eviction: {}", pool.num_idle());
    println!("   Evicted: {}", pool.metrics().total_evicted);

    pool.close();
}
