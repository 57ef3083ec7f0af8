//! Shared scaffolding for topology tests.
//!
//! The emitter source releases one tuple per granted credit, so tests
//! control exactly how far a pipeline has progressed before they stop or
//! rewire it; the blocking operator holds tuples until released the same
//! way.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::{watch, Semaphore};

use crate::config::Context;
use crate::error::{Error, Result};
use crate::node::{Operator, Sink, Source};
use crate::pipe::Writer;
use crate::tuple::Tuple;
use crate::value::{Map, Value};

/// Produces `n` tuples with sequential payloads.
pub(crate) fn fresh_tuples(n: usize) -> Vec<Tuple> {
  (1..=n)
    .map(|i| {
      let mut data = Map::new();
      data.insert("seq".to_string(), Value::Int(i as i64));
      Tuple::new(data).with_batch_id(i as i64)
    })
    .collect()
}

/// A source that writes one queued tuple per granted credit.
pub(crate) struct EmitterSource {
  tuples: Mutex<VecDeque<Tuple>>,
  total: usize,
  credits: Arc<Semaphore>,
  emitted: watch::Sender<usize>,
  halted: watch::Sender<bool>,
}

impl EmitterSource {
  pub(crate) fn new(tuples: Vec<Tuple>) -> Arc<Self> {
    let total = tuples.len();
    let (emitted, _) = watch::channel(0usize);
    let (halted, _) = watch::channel(false);
    Arc::new(Self {
      tuples: Mutex::new(tuples.into()),
      total,
      credits: Arc::new(Semaphore::new(0)),
      emitted,
      halted,
    })
  }

  /// Grants credits without waiting for the writes to happen.
  pub(crate) fn emit_nb(&self, n: usize) {
    self.credits.add_permits(n);
  }

  /// Grants credits and waits until the corresponding tuples have been
  /// written (or the source ran out of tuples, or was halted).
  pub(crate) async fn emit(&self, n: usize) {
    let target = (*self.emitted.borrow() + n).min(self.total);
    self.credits.add_permits(n);
    let mut emitted = self.emitted.subscribe();
    let mut halted = self.halted.subscribe();
    tokio::select! {
      _ = emitted.wait_for(|e| *e >= target) => {}
      _ = halted.wait_for(|h| *h) => {}
    }
  }
}

#[async_trait]
impl Source for EmitterSource {
  async fn generate_stream(&self, ctx: &Context, writer: &dyn Writer) -> Result<()> {
    let mut halted = self.halted.subscribe();
    loop {
      tokio::select! {
        permit = self.credits.acquire() => match permit {
          Ok(p) => p.forget(),
          Err(_) => break,
        },
        _ = halted.wait_for(|h| *h) => break,
      }
      let next = self.tuples.lock().unwrap().pop_front();
      let Some(tuple) = next else { break };
      if writer.write(ctx, tuple).await.is_err() {
        break;
      }
      self.emitted.send_modify(|e| *e += 1);
    }
    Ok(())
  }

  async fn stop(&self, _ctx: &Context) -> Result<()> {
    self.halted.send_replace(true);
    Ok(())
  }
}

/// A source that writes its whole list and returns. Used by the static
/// topology tests, which run to natural completion.
pub(crate) struct ListSource {
  tuples: Mutex<Vec<Tuple>>,
}

impl ListSource {
  pub(crate) fn new(tuples: Vec<Tuple>) -> Arc<Self> {
    Arc::new(Self {
      tuples: Mutex::new(tuples),
    })
  }
}

#[async_trait]
impl Source for ListSource {
  async fn generate_stream(&self, ctx: &Context, writer: &dyn Writer) -> Result<()> {
    let tuples: Vec<Tuple> = self.tuples.lock().unwrap().drain(..).collect();
    for tuple in tuples {
      writer.write(ctx, tuple).await?;
    }
    Ok(())
  }
}

/// Forwards tuples unchanged. Plugs into [`crate::node::OperatorFunc`].
pub(crate) fn forward<'a>(
  ctx: &'a Context,
  tuple: Tuple,
  writer: &'a dyn Writer,
) -> BoxFuture<'a, Result<()>> {
  Box::pin(async move { writer.write(ctx, tuple).await })
}

/// An operator that forwards one tuple per released permit and blocks
/// otherwise.
pub(crate) struct BlockingForwardOperator {
  allow: Semaphore,
}

impl BlockingForwardOperator {
  pub(crate) fn new(initial_permits: usize) -> Arc<Self> {
    Arc::new(Self {
      allow: Semaphore::new(initial_permits),
    })
  }

  /// Lets `n` more tuples through.
  pub(crate) fn release(&self, n: usize) {
    self.allow.add_permits(n);
  }
}

#[async_trait]
impl Operator for BlockingForwardOperator {
  async fn process(&self, ctx: &Context, tuple: Tuple, writer: &dyn Writer) -> Result<()> {
    match self.allow.acquire().await {
      Ok(permit) => permit.forget(),
      Err(_) => return Err(Error::custom("permit semaphore closed")),
    }
    writer.write(ctx, tuple).await
  }
}

/// Wraps an operator and counts `terminate` invocations.
pub(crate) struct TerminateCounter {
  inner: Arc<dyn Operator>,
  count: AtomicUsize,
}

impl TerminateCounter {
  pub(crate) fn new(inner: Arc<dyn Operator>) -> Arc<Self> {
    Arc::new(Self {
      inner,
      count: AtomicUsize::new(0),
    })
  }

  pub(crate) fn terminate_count(&self) -> usize {
    self.count.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Operator for TerminateCounter {
  async fn init(&self, ctx: &Context) -> Result<()> {
    self.inner.init(ctx).await
  }

  async fn process(&self, ctx: &Context, tuple: Tuple, writer: &dyn Writer) -> Result<()> {
    self.inner.process(ctx, tuple, writer).await
  }

  async fn terminate(&self, ctx: &Context) -> Result<()> {
    self.count.fetch_add(1, Ordering::SeqCst);
    self.inner.terminate(ctx).await
  }
}

/// A sink that stores every received tuple and counts `close` calls.
pub(crate) struct CollectingSink {
  tuples: Mutex<Vec<Tuple>>,
  len: watch::Sender<usize>,
  closed: AtomicUsize,
}

impl CollectingSink {
  pub(crate) fn new() -> Arc<Self> {
    let (len, _) = watch::channel(0usize);
    Arc::new(Self {
      tuples: Mutex::new(Vec::new()),
      len,
      closed: AtomicUsize::new(0),
    })
  }

  pub(crate) fn len(&self) -> usize {
    self.tuples.lock().unwrap().len()
  }

  pub(crate) fn tuples(&self) -> Vec<Tuple> {
    self.tuples.lock().unwrap().clone()
  }

  pub(crate) fn close_count(&self) -> usize {
    self.closed.load(Ordering::SeqCst)
  }

  /// Waits until at least `n` tuples have arrived.
  pub(crate) async fn wait(&self, n: usize) {
    let mut len = self.len.subscribe();
    let _ = len.wait_for(|l| *l >= n).await;
  }
}

#[async_trait]
impl Sink for CollectingSink {
  async fn write(&self, _ctx: &Context, tuple: Tuple) -> Result<()> {
    self.tuples.lock().unwrap().push(tuple);
    self.len.send_modify(|l| *l += 1);
    Ok(())
  }

  async fn close(&self, _ctx: &Context) -> Result<()> {
    self.closed.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}
