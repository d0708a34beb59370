//! The host adapter.
//!
//! An [`Engine`] wraps one worker instance and walks it through the
//! handshake state machine:
//!
//! ```text
//! Uninitialized ──start()──▶ AwaitingReady ──heartbeat reply──▶ Ready
//!                                  │                              │
//!                                  └──── worker gone ───▶ Failed ◀┘
//! ```
//!
//! `Failed` is terminal. Once ready, replies are routed through a
//! pending-request table keyed by correlation id; every id resolves at most
//! once, and replies nobody is waiting for are logged and dropped.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use bytes::Bytes;
use ptimer_asset::{AssetResolver, ByteStream, FileSource, stream_from_bytes};
use ptimer_document::{CONTAINER_MIME, Document};
use ptimer_worker::{
  CorrelationId, Kind, Request, RequestMessage, Response, ResponseMessage, Worker, WorkerChannels,
  WorkerConfig,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{EngineError, ProtocolError};

/// Configuration for an engine and the worker it spawns.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Capacity of the request and response channels.
  pub request_buffer: usize,
  /// Name of the worker's OS thread.
  pub worker_thread_name: String,
}

impl Default for EngineConfig {
  fn default() -> Self {
    let worker = WorkerConfig::default();
    Self {
      request_buffer: worker.buffer_size,
      worker_thread_name: worker.thread_name,
    }
  }
}

impl EngineConfig {
  fn worker_config(&self) -> WorkerConfig {
    WorkerConfig {
      buffer_size: self.request_buffer,
      thread_name: self.worker_thread_name.clone(),
    }
  }
}

/// Handshake state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
  Uninitialized,
  AwaitingReady,
  Ready,
  Failed,
}

/// A successfully compiled container.
#[derive(Debug, Clone)]
pub struct Compiled {
  /// Suggested file name, derived from the document title.
  pub file_name: String,
  pub mime: &'static str,
  pub data: Bytes,
}

/// A caller waiting for a reply. Parse requests remember the resolver the
/// worker registers decoded assets with.
struct Waiter {
  reply: oneshot::Sender<Response>,
  scope: Option<AssetResolver>,
}

type PendingTable = HashMap<CorrelationId, Waiter>;

/// Revoke the assets of a parse result nobody received.
fn release_undelivered(response: Response, scope: Option<&AssetResolver>) {
  if let Response::Parse(Ok(document)) = response
    && let Some(resolver) = scope
  {
    let mut revoked = 0;
    for reference in document.asset_refs() {
      resolver.revoke(reference);
      revoked += 1;
    }
    debug!(revoked, title = %document.metadata.title, "released abandoned parse");
  }
}

/// Receiving end of a pending request. A reply that arrived but was never
/// taken (the caller stopped waiting) is released on drop.
struct ReplyGuard {
  reply: oneshot::Receiver<Response>,
  scope: Option<AssetResolver>,
}

impl Drop for ReplyGuard {
  fn drop(&mut self) {
    if let Ok(response) = self.reply.try_recv() {
      release_undelivered(response, self.scope.as_ref());
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
  state: Mutex<EngineState>,
  pending: Mutex<PendingTable>,
}

impl Shared {
  fn state(&self) -> EngineState {
    *lock(&self.state)
  }

  fn set_state(&self, state: EngineState) {
    *lock(&self.state) = state;
  }

  /// Enter the terminal state and drop every waiter, which resolves their
  /// receivers with an error.
  fn fail(&self) {
    self.set_state(EngineState::Failed);
    let abandoned = {
      let mut pending = lock(&self.pending);
      let count = pending.len();
      pending.clear();
      count
    };

    if abandoned > 0 {
      warn!(abandoned, "failed pending requests");
    }
  }
}

/// Async facade over one worker instance.
pub struct Engine {
  requests: mpsc::Sender<RequestMessage>,
  responses: Mutex<Option<mpsc::Receiver<ResponseMessage>>>,
  shared: Arc<Shared>,
  sqlite_version: OnceLock<String>,
}

impl Engine {
  /// Spawn a worker on its own thread and complete the handshake.
  pub async fn spawn(config: EngineConfig) -> Result<Self, EngineError> {
    let channels = Worker::new()
      .spawn(&config.worker_config())
      .map_err(|e| ProtocolError::transport(format!("failed to start worker: {}", e)))?;

    let engine = Self::new(channels);
    engine.start().await?;
    Ok(engine)
  }

  /// Wrap an already running worker. The engine starts `Uninitialized`;
  /// call [`start`](Engine::start) before issuing requests.
  pub fn new(channels: WorkerChannels) -> Self {
    Self {
      requests: channels.requests,
      responses: Mutex::new(Some(channels.responses)),
      shared: Arc::new(Shared {
        state: Mutex::new(EngineState::Uninitialized),
        pending: Mutex::new(HashMap::new()),
      }),
      sqlite_version: OnceLock::new(),
    }
  }

  pub fn state(&self) -> EngineState {
    self.shared.state()
  }

  /// Version of the worker's embedded store, known once ready.
  pub fn sqlite_version(&self) -> Option<&str> {
    self.sqlite_version.get().map(String::as_str)
  }

  /// Perform the readiness handshake.
  ///
  /// Replies that do not carry the heartbeat's correlation id are ignored.
  /// If the worker goes away first, the engine is `Failed` for good.
  #[instrument(name = "engine_start", skip(self))]
  pub async fn start(&self) -> Result<(), ProtocolError> {
    let Some(mut responses) = lock(&self.responses).take() else {
      return match self.state() {
        EngineState::Ready => Ok(()),
        EngineState::Failed => Err(ProtocolError::transport("engine has failed")),
        EngineState::Uninitialized | EngineState::AwaitingReady => Err(ProtocolError::Unready),
      };
    };

    self.shared.set_state(EngineState::AwaitingReady);

    let heartbeat = RequestMessage::new(Request::Heartbeat);
    let heartbeat_id = heartbeat.id.clone();

    if self.requests.send(heartbeat).await.is_err() {
      self.shared.fail();
      return Err(ProtocolError::transport(
        "worker exited before the heartbeat was sent",
      ));
    }

    loop {
      let Some(message) = responses.recv().await else {
        self.shared.fail();
        error!("worker exited during handshake");
        return Err(ProtocolError::transport(
          "worker exited before answering the heartbeat",
        ));
      };

      if message.id != heartbeat_id {
        warn!(id = %message.id, kind = %message.kind(), "ignoring reply while awaiting heartbeat");
        continue;
      }

      match message.response {
        Response::Heartbeat { sqlite_version } => {
          info!(sqlite_version = %sqlite_version, "engine_ready");
          let _ = self.sqlite_version.set(sqlite_version);
          break;
        }
        other => {
          self.shared.fail();
          return Err(ProtocolError::UnexpectedResponse {
            expected: Kind::Heartbeat,
            actual: other.kind(),
          });
        }
      }
    }

    self.shared.set_state(EngineState::Ready);
    tokio::spawn(dispatch(responses, self.shared.clone()));

    Ok(())
  }

  /// Send one request and wait for the reply with the same correlation id.
  async fn request(&self, request: Request) -> Result<Response, ProtocolError> {
    match self.state() {
      EngineState::Ready => {}
      EngineState::Failed => return Err(ProtocolError::transport("engine has failed")),
      EngineState::Uninitialized | EngineState::AwaitingReady => {
        return Err(ProtocolError::Unready);
      }
    }

    let scope = match &request {
      Request::Parse { resolver, .. } => Some(resolver.clone()),
      Request::Heartbeat | Request::Compile { .. } => None,
    };

    let message = RequestMessage::new(request);
    let id = message.id.clone();
    let (reply_tx, reply_rx) = oneshot::channel();
    let mut guard = ReplyGuard {
      reply: reply_rx,
      scope: scope.clone(),
    };
    lock(&self.shared.pending).insert(
      id.clone(),
      Waiter {
        reply: reply_tx,
        scope,
      },
    );

    // A failure between the state check and the insert would leave this
    // entry behind forever.
    if self.state() == EngineState::Failed {
      lock(&self.shared.pending).remove(&id);
      return Err(ProtocolError::transport("engine has failed"));
    }

    if self.requests.send(message).await.is_err() {
      lock(&self.shared.pending).remove(&id);
      self.shared.fail();
      return Err(ProtocolError::transport("worker is gone"));
    }

    debug!(id = %id, "request sent");

    (&mut guard.reply)
      .await
      .map_err(|_| ProtocolError::transport(format!("worker exited before replying to {}", id)))
  }

  /// Decode a container supplied as a stream. The stream is moved into the
  /// worker; decoded assets are registered with `resolver`.
  #[instrument(name = "engine_parse", skip(self, source, resolver))]
  pub async fn parse(
    &self,
    source: ByteStream,
    resolver: &AssetResolver,
  ) -> Result<Document, EngineError> {
    let request = Request::Parse {
      data: source,
      resolver: resolver.clone(),
    };

    match self.request(request).await? {
      Response::Parse(result) => {
        let document = result?;
        info!(
          title = %document.metadata.title,
          steps = document.steps.len(),
          assets = document.assets.len(),
          "parsed"
        );
        Ok(document)
      }
      other => Err(unexpected(Kind::Parse, &other).into()),
    }
  }

  /// Decode a container held in memory.
  pub async fn parse_bytes(
    &self,
    data: impl Into<Bytes>,
    resolver: &AssetResolver,
  ) -> Result<Document, EngineError> {
    self.parse(stream_from_bytes(data), resolver).await
  }

  /// Decode a container file, streaming it into the worker.
  pub async fn parse_file(
    &self,
    path: impl AsRef<Path>,
    resolver: &AssetResolver,
  ) -> Result<Document, EngineError> {
    let stream = FileSource::new(path.as_ref()).open().await?;
    self.parse(stream, resolver).await
  }

  /// Encode a document, dereferencing its assets through `resolver`.
  ///
  /// The document is checked with [`Document::is_encodable`] first, so an
  /// obviously broken document never reaches the worker.
  #[instrument(
    name = "engine_compile",
    skip(self, document, resolver),
    fields(title = %document.metadata.title)
  )]
  pub async fn compile(
    &self,
    document: &Document,
    resolver: &AssetResolver,
  ) -> Result<Compiled, EngineError> {
    document.is_encodable()?;

    let request = Request::Compile {
      document: document.clone(),
      resolver: resolver.clone(),
    };

    match self.request(request).await? {
      Response::Compile(result) => {
        let data = result?;
        info!(size = data.len(), "compiled");
        Ok(Compiled {
          file_name: document.file_name(),
          mime: CONTAINER_MIME,
          data,
        })
      }
      other => Err(unexpected(Kind::Compile, &other).into()),
    }
  }
}

fn unexpected(expected: Kind, response: &Response) -> ProtocolError {
  ProtocolError::UnexpectedResponse {
    expected,
    actual: response.kind(),
  }
}

/// Route replies to their waiters until the worker goes away.
async fn dispatch(mut responses: mpsc::Receiver<ResponseMessage>, shared: Arc<Shared>) {
  while let Some(message) = responses.recv().await {
    let waiter = lock(&shared.pending).remove(&message.id);

    match waiter {
      Some(waiter) => {
        if let Err(response) = waiter.reply.send(message.response) {
          debug!(id = %message.id, "caller stopped listening");
          release_undelivered(response, waiter.scope.as_ref());
        }
      }
      None => {
        warn!(id = %message.id, kind = %message.kind(), "ignoring reply with no pending request");
      }
    }
  }

  error!("worker channel closed");
  shared.fail();
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use futures::FutureExt;
  use ptimer_document::{Asset, Step};

  use super::*;

  struct FakeWorker {
    requests: mpsc::Receiver<RequestMessage>,
    responses: mpsc::Sender<ResponseMessage>,
  }

  impl FakeWorker {
    async fn answer_heartbeat(&mut self) {
      let message = self.requests.recv().await.unwrap();
      assert_eq!(message.kind(), Kind::Heartbeat);
      self
        .responses
        .send(ResponseMessage::reply(
          message.id,
          Response::Heartbeat {
            sqlite_version: "3.45.0".to_string(),
          },
        ))
        .await
        .unwrap();
    }
  }

  fn fake() -> (Engine, FakeWorker) {
    let (request_tx, request_rx) = mpsc::channel(8);
    let (response_tx, response_rx) = mpsc::channel(8);
    let engine = Engine::new(WorkerChannels {
      requests: request_tx,
      responses: response_rx,
    });

    (
      engine,
      FakeWorker {
        requests: request_rx,
        responses: response_tx,
      },
    )
  }

  fn document(title: &str) -> Document {
    let mut doc = Document::new(title, "en");
    doc.steps.push(Step {
      id: 0,
      title: "Only".to_string(),
      description: None,
      sound: None,
      duration_seconds: None,
    });
    doc
  }

  #[tokio::test]
  async fn test_request_before_start_is_unready() {
    let (engine, _worker) = fake();

    assert_eq!(engine.state(), EngineState::Uninitialized);
    let result = engine.parse_bytes(Bytes::new(), &AssetResolver::new()).await;
    assert!(matches!(
      result,
      Err(EngineError::Protocol(ProtocolError::Unready))
    ));
  }

  #[tokio::test]
  async fn test_handshake_ignores_stray_replies() {
    let (engine, mut worker) = fake();

    let worker_task = tokio::spawn(async move {
      worker
        .responses
        .send(ResponseMessage::reply(
          CorrelationId::from("heartbeat_stale"),
          Response::Heartbeat {
            sqlite_version: "0".to_string(),
          },
        ))
        .await
        .unwrap();
      worker.answer_heartbeat().await;
      worker
    });

    engine.start().await.unwrap();
    let _worker = worker_task.await.unwrap();

    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(engine.sqlite_version(), Some("3.45.0"));
  }

  #[tokio::test]
  async fn test_handshake_transport_fault() {
    let (engine, worker) = fake();
    drop(worker);

    let result = engine.start().await;

    assert!(matches!(result, Err(ProtocolError::TransportFault { .. })));
    assert_eq!(engine.state(), EngineState::Failed);
    assert!(matches!(
      engine
        .compile(&document("After"), &AssetResolver::new())
        .await,
      Err(EngineError::Protocol(ProtocolError::TransportFault { .. }))
    ));
  }

  #[tokio::test]
  async fn test_start_is_idempotent_once_ready() {
    let (engine, mut worker) = fake();

    let (result, _) = tokio::join!(engine.start(), worker.answer_heartbeat());
    result.unwrap();

    engine.start().await.unwrap();
    assert_eq!(engine.state(), EngineState::Ready);
  }

  #[tokio::test]
  async fn test_out_of_order_replies_reach_their_callers() {
    let (engine, mut worker) = fake();
    let (result, _) = tokio::join!(engine.start(), worker.answer_heartbeat());
    result.unwrap();

    let worker_task = tokio::spawn(async move {
      let first = worker.requests.recv().await.unwrap();
      let second = worker.requests.recv().await.unwrap();

      for message in [second, first] {
        let title = match &message.request {
          Request::Compile { document, .. } => document.metadata.title.clone(),
          other => panic!("unexpected request: {:?}", other),
        };

        // Noise with an unknown id in between real replies
        worker
          .responses
          .send(ResponseMessage::reply(
            CorrelationId::from("compile_unknown"),
            Response::Compile(Ok(Bytes::from_static(b"noise"))),
          ))
          .await
          .unwrap();
        worker
          .responses
          .send(ResponseMessage::reply(
            message.id,
            Response::Compile(Ok(Bytes::from(title))),
          ))
          .await
          .unwrap();
      }
      worker
    });

    let resolver = AssetResolver::new();
    let doc_a = document("A");
    let doc_b = document("B");
    let (a, b) = tokio::join!(
      engine.compile(&doc_a, &resolver),
      engine.compile(&doc_b, &resolver)
    );
    let _worker = worker_task.await.unwrap();

    assert_eq!(&a.unwrap().data[..], b"A");
    let b = b.unwrap();
    assert_eq!(&b.data[..], b"B");
    assert_eq!(b.file_name, "B.ptimer");
    assert_eq!(b.mime, CONTAINER_MIME);
  }

  #[tokio::test]
  async fn test_worker_crash_fails_pending_request() {
    let (engine, mut worker) = fake();
    let (result, _) = tokio::join!(engine.start(), worker.answer_heartbeat());
    result.unwrap();

    let worker_task = tokio::spawn(async move {
      let _request = worker.requests.recv().await.unwrap();
      drop(worker);
    });

    let result = engine
      .compile(&document("Crash"), &AssetResolver::new())
      .await;
    worker_task.await.unwrap();

    assert!(matches!(
      result,
      Err(EngineError::Protocol(ProtocolError::TransportFault { .. }))
    ));
    assert_eq!(engine.state(), EngineState::Failed);
  }

  #[tokio::test]
  async fn test_wrong_reply_kind_is_unexpected() {
    let (engine, mut worker) = fake();
    let (result, _) = tokio::join!(engine.start(), worker.answer_heartbeat());
    result.unwrap();

    let worker_task = tokio::spawn(async move {
      let message = worker.requests.recv().await.unwrap();
      worker
        .responses
        .send(ResponseMessage::reply(
          message.id,
          Response::Compile(Ok(Bytes::new())),
        ))
        .await
        .unwrap();
      worker
    });

    let result = engine.parse_bytes(Bytes::new(), &AssetResolver::new()).await;
    let _worker = worker_task.await.unwrap();

    assert!(matches!(
      result,
      Err(EngineError::Protocol(ProtocolError::UnexpectedResponse {
        expected: Kind::Parse,
        actual: Kind::Compile,
      }))
    ));
  }

  #[tokio::test]
  async fn test_not_encodable_never_reaches_worker() {
    let (engine, mut worker) = fake();
    let (result, _) = tokio::join!(engine.start(), worker.answer_heartbeat());
    result.unwrap();

    let result = engine
      .compile(&Document::new("Empty", "en"), &AssetResolver::new())
      .await;

    assert!(matches!(result, Err(EngineError::NotEncodable(_))));
    assert!(worker.requests.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_abandoned_parse_releases_its_assets() {
    let (engine, mut worker) = fake();
    let (result, _) = tokio::join!(engine.start(), worker.answer_heartbeat());
    result.unwrap();

    let resolver = AssetResolver::new();
    // A single poll sends the request, then the caller gives up
    assert!(
      engine
        .parse_bytes(Bytes::new(), &resolver)
        .now_or_never()
        .is_none()
    );

    let message = worker.requests.recv().await.unwrap();
    let Request::Parse { resolver: scope, .. } = message.request else {
      panic!("expected a parse request");
    };

    let mut doc = document("Abandoned");
    doc.steps[0].sound = Some(1);
    doc.assets.push(Asset {
      id: 1,
      name: "bell.wav".to_string(),
      mime: "audio/wav".to_string(),
      notice: None,
      data: scope.materialize(1, &b"RIFF"[..], "audio/wav"),
    });
    assert_eq!(resolver.len(), 1);

    worker
      .responses
      .send(ResponseMessage::reply(message.id, Response::Parse(Ok(doc))))
      .await
      .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
      while !resolver.is_empty() {
        tokio::task::yield_now().await;
      }
    })
    .await
    .unwrap();
    assert_eq!(engine.state(), EngineState::Ready);
  }
}
