//! Basic usage examples for ObjectPool

use generic_objectpool::{
    ExhaustionPolicy, FactoryError, ObjectFactory, ObjectPool, PoolConfiguration, PoolError,
    TrackingPolicy,
};
use std::time::Duration;

/// Hands out cleared byte buffers
struct BufferFactory {
    capacity: usize,
}

impl ObjectFactory<Vec<u8>> for BufferFactory {
    fn create(&self) -> Result<Vec<u8>, FactoryError> {
        Ok(Vec::with_capacity(self.capacity))
    }

    fn passivate(&self, buf: &mut Vec<u8>) -> Result<(), FactoryError> {
        buf.clear();
        Ok(())
    }

    fn validate(&self, buf: &Vec<u8>) -> bool {
        buf.capacity() >= self.capacity
    }
}

fn main() {
    println!("=== generic_objectpool - Basic Examples ===\n");

    // Example 1: Borrow and return
    borrow_and_return();

    // Example 2: Exhaustion policies
    exhaustion_policies();

    // Example 3: Guards and warmup
    guards_and_warmup();

    // Example 4: Lost object detection
    lost_objects();

    // Example 5: Metrics
    metrics();
}

fn borrow_and_return() {
    println!("1. Borrow and Return:");
    let pool = ObjectPool::new(BufferFactory { capacity: 1024 }, PoolConfiguration::default()).unwrap();

    let mut buf = pool.borrow().unwrap();
    buf.extend_from_slice(b"hello");
    println!("   Borrowed object {} holding {} bytes", buf.id(), buf.len());
    pool.return_object(buf).unwrap();

    let buf = pool.borrow().unwrap();
    println!("   Reused object {} holding {} bytes", buf.id(), buf.len());
    pool.return_object(buf).unwrap();

    println!("   Idle after return: {}\n", pool.num_idle());
}

fn exhaustion_policies() {
    println!("2. Exhaustion Policies:");

    for policy in [ExhaustionPolicy::Fail, ExhaustionPolicy::Block, ExhaustionPolicy::Grow] {
        let config = PoolConfiguration::new()
            .with_max_total(1)
            .with_exhaustion_policy(policy)
            .with_max_wait(Duration::from_millis(50));
        let pool = ObjectPool::from_fn(|| Ok(0u64), config).unwrap();

        let held = pool.borrow().unwrap();
        match pool.borrow() {
            Ok(extra) => {
                println!("   {policy:?}: got a second object, {} active", pool.num_active());
                pool.return_object(extra).unwrap();
            }
            Err(e) => println!("   {policy:?}: {e}"),
        }
        pool.return_object(held).unwrap();
    }

    println!();
}

fn guards_and_warmup() {
    println!("3. Guards and Warmup:");
    let pool = ObjectPool::from_fn(
        || Ok(String::with_capacity(32)),
        PoolConfiguration::new().with_max_total(4),
    )
    .unwrap();

    pool.warmup(3).unwrap();
    println!("   Idle after warmup: {}", pool.num_idle());

    {
        let mut s = pool.borrow_guarded().unwrap();
        s.push_str("scratch");
        println!("   Active while guarded: {}", pool.num_active());
    }

    println!("   Active after guard dropped: {}\n", pool.num_active());
}

fn lost_objects() {
    println!("4. Lost Object Detection:");
    let config = PoolConfiguration::new()
        .with_max_total(1)
        .with_exhaustion_policy(ExhaustionPolicy::Fail)
        .with_tracking_policy(TrackingPolicy::Reference);
    let pool = ObjectPool::from_fn(|| Ok(7u32), config).unwrap();

    // Dropped instead of returned
    drop(pool.borrow().unwrap());

    match pool.borrow() {
        Ok(obj) => {
            println!("   Slot reclaimed, lost so far: {}", pool.metrics().total_lost);
            pool.return_object(obj).unwrap();
        }
        Err(PoolError::Exhausted) => println!("   Slot still taken"),
        Err(e) => println!("   Error: {e}"),
    }

    println!();
}

fn metrics() {
    println!("5. Metrics:");
    let pool = ObjectPool::new(BufferFactory { capacity: 64 }, PoolConfiguration::default()).unwrap();

    let a = pool.borrow().unwrap();
    let b = pool.borrow().unwrap();
    pool.return_object(a).unwrap();
    pool.invalidate(b).unwrap();

    let metrics = pool.metrics();
    println!("   Created: {}", metrics.total_created);
    println!("   Destroyed: {}", metrics.total_destroyed);
    println!("   Borrowed: {}", metrics.total_borrowed);
    println!("   Active: {}, Idle: {}", metrics.active_objects, metrics.idle_objects);

    pool.close();
}
