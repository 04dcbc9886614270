//! Generic asynchronous task pipeline.
//!
//! A [`Task`] is one unit of work against the store engine: it receives
//! an input and a [`TaskContext`] and resolves exactly once with either
//! an output or an error — the returned single-resolution future *is*
//! the step's continuation. Tasks compose sequentially with
//! [`Pipeline::pipe`] and fan out with [`parallel`]; a composed
//! pipeline behaves as one task whose continuation fires only after the
//! whole chain has settled.
//!
//! "Parallel" means concurrently issued, not ordered relative to each
//! other: the engine still serializes the actual storage operations of
//! one transaction. A parallel group collects results in declaration
//! order regardless of completion order, and the first error observed
//! becomes the group's error while already-launched siblings settle in
//! the background.
//!
//! # Example
//!
//! ```ignore
//! use evostore::pipeline::{Pipeline, task_fn};
//!
//! let count = task_fn(|_: (), ctx| async move {
//!     let store = ctx.trx.store("events")?;
//!     store.count(None).await
//! });
//! let doubled = task_fn(|n: u64, _ctx| async move { Ok(n * 2) });
//!
//! let pipeline = Pipeline::from_task(count).pipe(doubled);
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};

use crate::engine::TransactionHandle;
use crate::error::{EvoError, EvoResult};
use crate::key::RangeFactory;

/// Context shared by every task of one execution: the live transaction
/// handle and a key-range constructor.
#[derive(Clone)]
pub struct TaskContext {
    pub trx: Arc<dyn TransactionHandle>,
    pub range: RangeFactory,
}

impl TaskContext {
    pub fn new(trx: Arc<dyn TransactionHandle>) -> Self {
        Self {
            trx,
            range: RangeFactory,
        }
    }
}

/// A pipeline step.
///
/// `call` must resolve exactly once — with the output on success or the
/// error otherwise — after any number of suspensions on the engine.
pub trait Task<I, O>: Send + Sync + 'static {
    fn call(&self, input: I, ctx: TaskContext) -> BoxFuture<'static, EvoResult<O>>;
}

/// A step shared between pipelines. Steps are stateless per run, so the
/// same task can appear in any number of concurrently running
/// pipelines.
pub type ArcTask<I, O> = Arc<dyn Task<I, O>>;

impl<I, O> Task<I, O> for ArcTask<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn call(&self, input: I, ctx: TaskContext) -> BoxFuture<'static, EvoResult<O>> {
        (**self).call(input, ctx)
    }
}

/// Adapt an async closure into a [`Task`].
pub fn task_fn<I, O, F, Fut>(f: F) -> FnTask<F, I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EvoResult<O>> + Send + 'static,
{
    FnTask {
        f,
        _marker: PhantomData,
    }
}

/// Adapt an async closure into a shareable [`ArcTask`].
pub fn shared_task<I, O, F, Fut>(f: F) -> ArcTask<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EvoResult<O>> + Send + 'static,
{
    Arc::new(task_fn(f))
}

pub struct FnTask<F, I, O> {
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O, F, Fut> Task<I, O> for FnTask<F, I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EvoResult<O>> + Send + 'static,
{
    fn call(&self, input: I, ctx: TaskContext) -> BoxFuture<'static, EvoResult<O>> {
        (self.f)(input, ctx).boxed()
    }
}

/// Sequential composition of two steps.
struct Sequence<I, M, O> {
    first: ArcTask<I, M>,
    second: ArcTask<M, O>,
}

impl<I, M, O> Task<I, O> for Sequence<I, M, O>
where
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
{
    fn call(&self, input: I, ctx: TaskContext) -> BoxFuture<'static, EvoResult<O>> {
        let first = self.first.clone();
        let second = self.second.clone();
        Box::pin(async move {
            let mid = first.call(input, ctx.clone()).await?;
            second.call(mid, ctx).await
        })
    }
}

/// Run `steps` concurrently against copies of one input.
///
/// Results come back in the order the steps were declared, independent
/// of completion order. The first error observed becomes the group's
/// error; siblings that were already launched still run to completion,
/// since issued engine requests cannot be retracted.
pub fn parallel<I, O>(steps: Vec<ArcTask<I, O>>) -> ParallelGroup<I, O> {
    ParallelGroup { steps }
}

pub struct ParallelGroup<I, O> {
    steps: Vec<ArcTask<I, O>>,
}

impl<I, O> Clone for ParallelGroup<I, O> {
    fn clone(&self) -> Self {
        Self {
            steps: self.steps.clone(),
        }
    }
}

impl<I, O> Task<I, Vec<O>> for ParallelGroup<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    fn call(&self, input: I, ctx: TaskContext) -> BoxFuture<'static, EvoResult<Vec<O>>> {
        let steps = self.steps.clone();
        Box::pin(async move {
            let mut in_flight = FuturesUnordered::new();
            for (index, step) in steps.iter().enumerate() {
                let fut = step.call(input.clone(), ctx.clone());
                in_flight.push(async move { (index, fut.await) });
            }

            let mut settled: Vec<(usize, O)> = Vec::with_capacity(steps.len());
            let mut first_error: Option<EvoError> = None;
            while let Some((index, result)) = in_flight.next().await {
                match result {
                    Ok(value) => settled.push((index, value)),
                    Err(err) => {
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
            }

            if let Some(err) = first_error {
                return Err(err);
            }
            settled.sort_by_key(|(index, _)| *index);
            Ok(settled.into_iter().map(|(_, value)| value).collect())
        })
    }
}

/// An ordered chain of steps, runnable any number of times.
///
/// Cloning shares the (stateless) steps but no per-run state, so one
/// declared pipeline can serve as a reusable template for concurrent or
/// repeated executions.
pub struct Pipeline<I, O> {
    head: ArcTask<I, O>,
}

impl<I, O> Clone for Pipeline<I, O> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
        }
    }
}

impl<I, O> Pipeline<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn from_task(task: impl Task<I, O>) -> Self {
        Self {
            head: Arc::new(task),
        }
    }

    /// Sequential composition: `next` consumes this pipeline's output.
    pub fn pipe<R>(self, next: impl Task<O, R>) -> Pipeline<I, R>
    where
        R: Send + 'static,
    {
        Pipeline {
            head: Arc::new(Sequence {
                first: self.head,
                second: Arc::new(next),
            }),
        }
    }

    /// Drive the pipeline to completion.
    pub async fn run(&self, input: I, ctx: &TaskContext) -> EvoResult<O> {
        self.head.call(input, ctx.clone()).await
    }

    /// Drive the pipeline, failing with a timeout error if it has not
    /// resolved within `timeout`. Engine requests already issued are
    /// not retracted; they settle against an already-rejected caller.
    pub async fn run_timeout(&self, input: I, ctx: &TaskContext, timeout: Duration) -> EvoResult<O> {
        match tokio::time::timeout(timeout, self.head.call(input, ctx.clone())).await {
            Ok(result) => result,
            Err(_) => Err(EvoError::Timeout {
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

impl<I, O> Task<I, O> for Pipeline<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn call(&self, input: I, ctx: TaskContext) -> BoxFuture<'static, EvoResult<O>> {
        self.head.call(input, ctx)
    }
}
