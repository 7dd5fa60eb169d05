use super::context::LockContext;
use super::runner::CriticalSectionRunner;
use crate::domain::lock::{ResourceKey, ServiceNamespace};
use crate::error::LockError;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Runs guarded work on a bounded pool of blocking workers.
///
/// At most `max_workers` tasks run at once and at most `queue_capacity` more
/// may wait; anything beyond is rejected with [`LockError::PoolSaturated`].
/// The pool adds no ordering of its own: tasks on different keys run in
/// parallel, tasks on the same key take turns through the lock store.
#[derive(Clone)]
pub struct TaskSubmitter {
    runner: CriticalSectionRunner,
    runtime: Handle,
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    capacity: usize,
}

impl TaskSubmitter {
    pub fn new(ctx: &LockContext, runtime: Handle) -> Self {
        let pool = &ctx.config.pool;
        let capacity = pool.capacity();
        Self {
            runner: CriticalSectionRunner::new(ctx),
            runtime,
            admission: Arc::new(Semaphore::new(capacity)),
            workers: Arc::new(Semaphore::new(pool.max_workers)),
            capacity,
        }
    }

    pub fn runner(&self) -> &CriticalSectionRunner {
        &self.runner
    }

    /// Tasks admitted and not yet finished, running or waiting.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.admission.available_permits()
    }

    /// Queues `work` to run under the lease for `key` and returns a handle
    /// resolving to its outcome.
    pub fn submit<T, E, F>(
        &self,
        namespace: ServiceNamespace,
        key: ResourceKey,
        work: F,
    ) -> Result<TaskHandle<T, E>, E>
    where
        T: Send + 'static,
        E: From<LockError> + Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let admitted = self
            .admission
            .clone()
            .try_acquire_owned()
            .map_err(|_| {
                E::from(LockError::PoolSaturated {
                    capacity: self.capacity,
                })
            })?;

        let workers = self.workers.clone();
        let runner = self.runner.clone();
        let task_key = key.to_string();

        let join = self.runtime.spawn(async move {
            let _admitted = admitted;
            let Ok(_worker) = workers.acquire_owned().await else {
                return Err(E::from(LockError::TaskCancelled {
                    key: key.to_string(),
                }));
            };

            let blocking_key = key.clone();
            match tokio::task::spawn_blocking(move || runner.run(namespace, &blocking_key, work))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => Err(E::from(join_failure(key.to_string(), e.is_panic()))),
            }
        });

        Ok(TaskHandle {
            key: task_key,
            join,
            _result: PhantomData,
        })
    }
}

fn join_failure(key: String, panicked: bool) -> LockError {
    if panicked {
        LockError::TaskPanicked { key }
    } else {
        LockError::TaskCancelled { key }
    }
}

/// Deferred result of a submitted task. Await it to get the work's outcome.
pub struct TaskHandle<T, E> {
    key: String,
    join: JoinHandle<Result<T, E>>,
    _result: PhantomData<fn() -> (T, E)>,
}

impl<T, E> TaskHandle<T, E> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn join(self) -> Result<T, E>
    where
        E: From<LockError>,
    {
        self.await
    }
}

impl<T, E> Future for TaskHandle<T, E>
where
    E: From<LockError>,
{
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.join).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(e)) => {
                Poll::Ready(Err(E::from(join_failure(self.key.clone(), e.is_panic()))))
            }
        }
    }
}
