//! A scripted in-process `FunctionRpc` server used to drive the channel end to end without a
//! real worker process. Tests supply a handler closure that reacts to each inbound
//! `StreamingMessage`; the fake worker takes care of the `StartStream` greeting and the plumbing
//! to turn a `tonic` bidirectional stream into something a closure can push responses into.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status, Streaming};

use worker_channel::wire::{
    streaming_message::Content, FunctionRpc, FunctionRpcServer, StartStream, StreamingMessage,
};

/// Installs a `tracing` subscriber reading `RUST_LOG`, so a failing test can be re-run with
/// `RUST_LOG=debug` to see the channel's own log traffic alongside the fake worker's. Safe to
/// call from more than one test in the same binary — `try_init` swallows the "already set" error.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub type Outbound = mpsc::UnboundedSender<Result<StreamingMessage, Status>>;

pub fn reply(outbound: &Outbound, content: Content) {
    let _ = outbound.send(Ok(StreamingMessage {
        request_id: uuid::Uuid::new_v4().to_string(),
        content: Some(content),
    }));
}

pub struct FakeWorker {
    send_start_stream: bool,
    handler: Arc<dyn Fn(StreamingMessage, Outbound) + Send + Sync>,
}

impl FakeWorker {
    pub fn new(handler: impl Fn(StreamingMessage, Outbound) + Send + Sync + 'static) -> Self {
        Self {
            send_start_stream: true,
            handler: Arc::new(handler),
        }
    }

    /// Never sends `StartStream` — used by the startup-timeout scenario.
    pub fn silent() -> Self {
        Self {
            send_start_stream: false,
            handler: Arc::new(|_, _| {}),
        }
    }
}

#[tonic::async_trait]
impl FunctionRpc for FakeWorker {
    type EventStreamStream = Pin<Box<dyn Stream<Item = Result<StreamingMessage, Status>> + Send>>;

    async fn event_stream(
        &self,
        request: Request<Streaming<StreamingMessage>>,
    ) -> Result<Response<Self::EventStreamStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::unbounded_channel::<Result<StreamingMessage, Status>>();

        if self.send_start_stream {
            reply(
                &tx,
                Content::StartStream(StartStream {
                    worker_id: "fake-worker".to_string(),
                }),
            );
        }

        let handler = self.handler.clone();
        let loop_tx = tx.clone();
        tokio::spawn(async move {
            while let Some(message) = inbound.next().await {
                match message {
                    Ok(message) => handler(message, loop_tx.clone()),
                    Err(_) => break,
                }
            }
        });

        Ok(Response::new(
            Box::pin(UnboundedReceiverStream::new(rx)) as Self::EventStreamStream
        ))
    }
}

/// Starts `worker` on an ephemeral localhost port and returns the address it's listening on. The
/// server runs for the lifetime of the test process; there's no shutdown handle because nothing
/// in this crate's test suite needs one.
///
/// The port is picked by binding a throwaway `std` listener and immediately dropping it, then
/// handing the same address to `tonic`'s own bind — a small, accepted race in exchange for not
/// needing `tokio-stream`'s `net` feature just for tests.
pub async fn spawn_fake_worker(worker: FakeWorker) -> SocketAddr {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
        listener.local_addr().expect("local addr")
    };

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(FunctionRpcServer::new(worker))
            .serve(addr)
            .await
            .expect("fake worker server");
    });

    // Give the listener a moment to come up before the caller dials it.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    addr
}
