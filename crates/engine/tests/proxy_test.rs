// Integration tests for the proxy pool under concurrent checkout

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use multirun_engine::proxy::{
    Checkout, ListProxySource, Proxy, ProxyPool, ProxyPoolConfig, ProxySource, ProxyType,
    ProxyWorkingStatus,
};
use parking_lot::Mutex;

fn pool(config: ProxyPoolConfig, count: usize) -> Arc<ProxyPool> {
    let proxies = (0..count)
        .map(|i| Proxy::new(format!("172.16.0.{i}"), 1080, ProxyType::Socks5))
        .collect();
    Arc::new(ProxyPool::with_proxies(config, proxies))
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_exclusive_checkout_under_contention() {
    let pool = pool(ProxyPoolConfig::default(), 5);
    let in_use = Arc::new(Mutex::new(HashSet::new()));
    let duplicates = Arc::new(AtomicUsize::new(0));
    let leases = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let pool = Arc::clone(&pool);
        let in_use = Arc::clone(&in_use);
        let duplicates = Arc::clone(&duplicates);
        let leases = Arc::clone(&leases);

        tasks.push(tokio::spawn(async move {
            let mut done = 0;
            while done < 20 {
                let lease = match pool.checkout() {
                    Checkout::Leased(lease) => lease,
                    Checkout::Busy => {
                        tokio::task::yield_now().await;
                        continue;
                    }
                    Checkout::Exhausted => panic!("pool exhausted with nothing banned"),
                };

                if !in_use.lock().insert(lease.id()) {
                    duplicates.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
                in_use.lock().remove(&lease.id());

                pool.release(lease, ProxyWorkingStatus::Working);
                leases.fetch_add(1, Ordering::SeqCst);
                done += 1;
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(duplicates.load(Ordering::SeqCst), 0);
    assert_eq!(leases.load(Ordering::SeqCst), 400);

    let stats = pool.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.working, 5);
    let uses: u32 = pool.snapshot().iter().map(|p| p.uses).sum();
    assert_eq!(uses, 400);
}

#[test_log::test(tokio::test)]
async fn test_success_returns_proxy_to_rotation() {
    let pool = pool(ProxyPoolConfig::default(), 1);

    let Checkout::Leased(lease) = pool.checkout() else {
        panic!("expected a lease");
    };
    assert!(matches!(pool.checkout(), Checkout::Busy));

    pool.release(lease, ProxyWorkingStatus::Working);
    let Checkout::Leased(again) = pool.checkout() else {
        panic!("released proxy should be eligible again");
    };
    assert_eq!(again.proxy.working_status, ProxyWorkingStatus::Working);
    assert_eq!(again.proxy.uses, 2);
}

#[test_log::test(tokio::test)]
async fn test_waiter_wakes_on_release() {
    let pool = pool(ProxyPoolConfig::default(), 1);
    let Checkout::Leased(lease) = pool.checkout() else {
        panic!("expected a lease");
    };

    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            loop {
                let changed = pool.changed().notified();
                tokio::pin!(changed);
                changed.as_mut().enable();
                if let Checkout::Leased(lease) = pool.checkout() {
                    return lease;
                }
                changed.await;
            }
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    pool.release(lease, ProxyWorkingStatus::Working);
    let lease = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lease.proxy.host, "172.16.0.0");
}

#[test_log::test(tokio::test)]
async fn test_reload_while_leased_keeps_lease_valid() {
    let pool = pool(ProxyPoolConfig::default(), 2);
    let Checkout::Leased(lease) = pool.checkout() else {
        panic!("expected a lease");
    };

    let source: Arc<dyn ProxySource> = Arc::new(ListProxySource::new(
        ["(socks5)172.16.0.0:1080", "(socks5)172.16.0.9:1080"],
        ProxyType::Http,
    ));
    assert_eq!(pool.reload(&[source]).await.unwrap(), 2);

    // Still checked out after the reload
    let stats = pool.stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.in_flight, 1);

    pool.release(lease, ProxyWorkingStatus::Banned);
    assert_eq!(pool.stats().banned, 1);
    assert_eq!(pool.stats().in_flight, 0);
}
