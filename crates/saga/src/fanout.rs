//! Parallel child steps with join-all semantics.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::context::SagaContext;
use crate::error::{Result, SagaError, StepError, StepFailure};
use crate::executor;
use crate::options::StepOptions;

/// Runs `step` once per item, concurrently, and waits for every child.
///
/// Sequence numbers are taken in item order before any child starts, so
/// replay matches each child to its own recorded attempts regardless of
/// completion order. A failing child never cancels its siblings. Returns the
/// outputs in item order, or the first failure in item order once all
/// children have finished.
#[tracing::instrument(skip(ctx, items, options, factory), fields(execution_id = %ctx.execution_id(), children = items.len()))]
pub async fn run_all<I, T, F, Fut>(
    ctx: &Arc<SagaContext>,
    step: &'static str,
    items: Vec<I>,
    options: StepOptions,
    limit: Option<usize>,
    factory: F,
) -> Result<Vec<T>>
where
    I: Serialize + Clone + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, StepError>> + Send + 'static,
{
    let count = items.len();
    let seqs: Vec<u64> = items.iter().map(|_| ctx.next_seq()).collect();
    let permits = limit.map(|n| Arc::new(Semaphore::new(n.max(1))));
    let factory = Arc::new(factory);
    let options = Arc::new(options);

    let mut children = JoinSet::new();
    for (index, (seq, item)) in seqs.into_iter().zip(items).enumerate() {
        let ctx = ctx.clone();
        let factory = factory.clone();
        let options = options.clone();
        let permits = permits.clone();

        children.spawn(async move {
            let _permit = match permits {
                Some(permits) => Some(
                    permits
                        .acquire_owned()
                        .await
                        .map_err(|e| SagaError::TaskFailed(e.to_string()))?,
                ),
                None => None,
            };
            let result = executor::execute(&ctx, seq, step, &item, &options, || {
                factory(item.clone())
            })
            .await;
            Ok::<_, SagaError>((index, result))
        });
    }

    let mut results: Vec<Option<Result<T>>> = (0..count).map(|_| None).collect();
    let mut crashed: Option<SagaError> = None;
    while let Some(joined) = children.join_next().await {
        match joined {
            Ok(Ok((index, result))) => results[index] = Some(result),
            Ok(Err(err)) => {
                crashed.get_or_insert(err);
            }
            Err(err) => {
                crashed.get_or_insert(SagaError::TaskFailed(err.to_string()));
            }
        }
    }

    let mut outputs = Vec::with_capacity(count);
    let mut first_failure: Option<StepFailure> = None;
    for result in results.into_iter().flatten() {
        match result {
            Ok(output) => outputs.push(output),
            Err(SagaError::Step(failure)) => {
                first_failure.get_or_insert(failure);
            }
            Err(other) => {
                crashed.get_or_insert(other);
            }
        }
    }

    if let Some(err) = crashed {
        return Err(err);
    }
    if let Some(failure) = first_failure {
        return Err(failure.into());
    }
    tracing::info!(step, children = count, "all children completed");
    Ok(outputs)
}
