//! The execution context.

use std::io;

use ptimer_asset::{AssetResolver, ByteStream, collect_stream};
use ptimer_codec::DecodeError;
use ptimer_document::Document;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::message::{Request, RequestMessage, Response, ResponseMessage};

/// Configuration for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  /// Capacity of the request and response channels.
  pub buffer_size: usize,
  /// Name of the worker's OS thread.
  pub thread_name: String,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      buffer_size: 32,
      thread_name: "ptimer-worker".to_string(),
    }
  }
}

/// The caller's ends of a running worker's channels.
///
/// When the worker stops (or crashes), `responses` yields `None`.
pub struct WorkerChannels {
  pub requests: mpsc::Sender<RequestMessage>,
  pub responses: mpsc::Receiver<ResponseMessage>,
}

/// Runs codec requests in an isolated context.
///
/// The worker keeps no asset state of its own; every parse or compile works
/// against the resolver its request carries.
#[derive(Debug, Default)]
pub struct Worker;

impl Worker {
  pub fn new() -> Self {
    Self
  }

  /// Start the worker on a dedicated OS thread with its own single-threaded
  /// runtime.
  pub fn spawn(self, config: &WorkerConfig) -> io::Result<WorkerChannels> {
    let (request_tx, request_rx) = mpsc::channel(config.buffer_size);
    let (response_tx, response_rx) = mpsc::channel(config.buffer_size);

    std::thread::Builder::new()
      .name(config.thread_name.clone())
      .spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
          .enable_all()
          .build()
        {
          Ok(runtime) => runtime,
          Err(e) => {
            error!(error = %e, "failed to build worker runtime");
            return;
          }
        };

        runtime.block_on(self.run(request_rx, response_tx));
      })?;

    Ok(WorkerChannels {
      requests: request_tx,
      responses: response_rx,
    })
  }

  /// Serve requests until the request channel closes.
  ///
  /// A panicking handler takes the whole worker down: the response channel
  /// is dropped, which the caller observes as a transport fault.
  pub async fn run(
    self,
    mut requests: mpsc::Receiver<RequestMessage>,
    responses: mpsc::Sender<ResponseMessage>,
  ) {
    let mut tasks = JoinSet::new();
    info!("worker started");

    loop {
      tokio::select! {
        message = requests.recv() => {
          let Some(message) = message else {
            break;
          };

          let responses = responses.clone();
          tasks.spawn(async move {
            let reply = handle(message).await;
            if responses.send(reply).await.is_err() {
              debug!("caller went away before the reply was sent");
            }
          });
        }
        Some(joined) = tasks.join_next() => {
          if let Err(e) = joined
            && e.is_panic()
          {
            error!(error = %e, "request handler panicked, stopping worker");
            return;
          }
        }
      }
    }

    // Finish in-flight requests before dropping the response channel
    while let Some(joined) = tasks.join_next().await {
      if let Err(e) = joined {
        warn!(error = %e, "request handler did not complete");
      }
    }

    info!("worker stopped");
  }
}

#[instrument(
  name = "worker_handle",
  skip(message),
  fields(id = %message.id, kind = %message.kind())
)]
async fn handle(message: RequestMessage) -> ResponseMessage {
  let RequestMessage { id, request } = message;

  let response = match request {
    Request::Heartbeat => Response::Heartbeat {
      sqlite_version: heartbeat().await,
    },
    Request::Parse { data, resolver } => {
      let result = parse(data, &resolver).await;
      if let Err(e) = &result {
        error!(error = %e, "parse failed");
      }
      Response::Parse(result)
    }
    Request::Compile { document, resolver } => {
      let result = ptimer_codec::encode(&document, &resolver).await;
      if let Err(e) = &result {
        error!(error = %e, "compile failed");
      }
      Response::Compile(result)
    }
  };

  ResponseMessage::reply(id, response)
}

async fn heartbeat() -> String {
  match ptimer_codec::store_version().await {
    Ok(version) => version,
    Err(e) => {
      warn!(error = %e, "could not query store version");
      "unknown".to_string()
    }
  }
}

async fn parse(data: ByteStream, resolver: &AssetResolver) -> Result<Document, DecodeError> {
  let bytes = collect_stream(data).await?;
  ptimer_codec::decode(&bytes, resolver).await
}
