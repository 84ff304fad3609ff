//! Connection pool acquire/release throughput against an in-process echo
//! transport, bypassing any real network provider.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;

use toolmesh_engine::config::PoolConfig;
use toolmesh_engine::error::EngineError;
use toolmesh_engine::prelude::{ClientKind, ClientRegistry, ConnectionPool, TransportFactory};
use toolmesh_engine::transport::{TransportClient, TransportConfig};

struct LocalFactory;

impl TransportFactory for LocalFactory {
    fn create(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<TransportClient>, EngineError>> + Send>> {
        Box::pin(async {
            Ok(Arc::new(TransportClient::new(TransportConfig::new(
                "ws://bench.local",
            ))))
        })
    }
}

fn bench_acquire_release(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let pool = rt.block_on(async {
        let mut registry = ClientRegistry::new();
        registry.register(ClientKind::Filesystem, 1, Arc::new(LocalFactory));
        ConnectionPool::new(PoolConfig::default(), Arc::new(registry))
    });

    c.bench_function("pool_acquire_release_cycle", |b| {
        b.to_async(&rt).iter(|| {
            let pool = pool.clone();
            async move {
                let lease = pool.acquire(ClientKind::Filesystem).await.unwrap();
                lease.release();
            }
        });
    });
}

criterion_group!(benches, bench_acquire_release);
criterion_main!(benches);
