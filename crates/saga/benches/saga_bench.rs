use criterion::{Criterion, criterion_group, criterion_main};
use domain::OrderInput;
use history::InMemoryHistoryStore;
use saga::{InMemoryActivities, SagaCoordinator, SagaOptions};

fn bench_options() -> SagaOptions {
    SagaOptions {
        checkpoint_pauses: false,
        ..SagaOptions::default()
    }
}

fn bench_execute_saga(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("saga/execute_order_fulfillment", |b| {
        b.iter(|| {
            rt.block_on(async {
                let services = InMemoryActivities::new();
                let coordinator =
                    SagaCoordinator::new(InMemoryHistoryStore::new(), services.activities())
                        .with_options(bench_options());
                coordinator
                    .execute_saga(OrderInput::new("A1", "1 Main St"))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_replay_completed_saga(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryHistoryStore::new();
    let id = rt.block_on(async {
        let coordinator =
            SagaCoordinator::new(store.clone(), InMemoryActivities::new().activities())
                .with_options(bench_options());
        let id = coordinator
            .start_saga(OrderInput::new("A1", "1 Main St"))
            .await
            .unwrap();
        coordinator.wait_for_result(id).await.unwrap();
        id
    });

    c.bench_function("saga/replay_completed_history", |b| {
        b.iter(|| {
            rt.block_on(async {
                let coordinator =
                    SagaCoordinator::new(store.clone(), InMemoryActivities::new().activities());
                coordinator.resume(id).await.unwrap();
                coordinator.wait_for_result(id).await.unwrap();
            });
        });
    });
}

fn bench_fold_saga_view(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryHistoryStore::new();
    let coordinator = SagaCoordinator::new(store, InMemoryActivities::new().activities())
        .with_options(bench_options());
    let id = rt.block_on(async {
        let id = coordinator
            .start_saga(OrderInput::new("A1", "1 Main St"))
            .await
            .unwrap();
        coordinator.wait_for_result(id).await.unwrap();
        id
    });

    c.bench_function("saga/fold_saga_view", |b| {
        b.iter(|| {
            rt.block_on(async {
                coordinator.get_saga(id).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_execute_saga,
    bench_replay_completed_saga,
    bench_fold_saga_view
);
criterion_main!(benches);
