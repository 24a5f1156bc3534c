// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{ChannelError, ChannelResult};
use crate::events::{Event, EventBus, WorkerErrorEvent};
use crate::wire::{FunctionRpcClient, StreamingMessage};

/// The long-lived bidirectional streaming RPC to one worker process.
///
/// Per the design decision recorded in `DESIGN.md` (open question (a) in the reference spec), this
/// dials `EventStream` exactly once for the lifetime of the channel: an unbounded channel feeds the
/// outbound half as a `Stream`, and a background task drains the inbound `Streaming<StreamingMessage>`
/// for as long as the worker keeps the call open. The reference behavior of opening a fresh call per
/// outbound message is not reproduced — it would defeat the point of a "stream".
pub struct Transport {
    worker_id: String,
    outbound: mpsc::UnboundedSender<StreamingMessage>,
    receive_task: tokio::task::JoinHandle<()>,
}

impl Transport {
    /// Dials `endpoint` and establishes the single long-lived `EventStream` call. The receive loop
    /// is spawned before this returns; every inbound message is published on `bus` as
    /// `Event::Inbound` tagged with `worker_id`.
    pub async fn connect(
        endpoint: SocketAddr,
        worker_id: impl Into<String>,
        language: impl Into<String>,
        bus: EventBus,
    ) -> ChannelResult<Self> {
        let worker_id = worker_id.into();
        let language = language.into();
        let uri = format!("http://{endpoint}");
        let channel = tonic::transport::Channel::from_shared(uri)
            .map_err(|e| ChannelError::Transport {
                worker_id: worker_id.clone(),
                message: format!("invalid endpoint: {e}"),
            })?
            .connect()
            .await
            .map_err(|e| ChannelError::Transport {
                worker_id: worker_id.clone(),
                message: format!("failed to connect to worker: {e}"),
            })?;

        let mut client = FunctionRpcClient::new(channel);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<StreamingMessage>();
        let outbound_stream = UnboundedReceiverStream::new(outbound_rx);

        let response = client
            .event_stream(outbound_stream)
            .await
            .map_err(|status| ChannelError::Transport {
                worker_id: worker_id.clone(),
                message: format!("failed to open event stream: {status}"),
            })?;
        let mut inbound = response.into_inner();

        let recv_worker_id = worker_id.clone();
        let recv_language = language.clone();
        let recv_bus = bus.clone();
        let receive_task = tokio::spawn(async move {
            loop {
                match inbound.message().await {
                    Ok(Some(message)) => {
                        recv_bus.publish(Event::Inbound {
                            worker_id: recv_worker_id.clone(),
                            message,
                        });
                    }
                    Ok(None) => {
                        recv_bus.publish(Event::WorkerError(WorkerErrorEvent {
                            language: recv_language.clone(),
                            worker_id: recv_worker_id.clone(),
                            error: "worker closed the event stream".to_string(),
                        }));
                        break;
                    }
                    Err(status) => {
                        recv_bus.publish(Event::WorkerError(WorkerErrorEvent {
                            language: recv_language.clone(),
                            worker_id: recv_worker_id.clone(),
                            error: status.to_string(),
                        }));
                        break;
                    }
                }
            }
        });

        Ok(Self {
            worker_id,
            outbound: outbound_tx,
            receive_task,
        })
    }

    /// Hands `message` to the outbound stream. Returns once the bytes are enqueued for the
    /// writer, not once the peer has acknowledged them — the transport has no acknowledgment
    /// concept beyond whatever message-level responses the protocol itself defines.
    pub fn send(&self, message: StreamingMessage) -> ChannelResult<()> {
        self.outbound
            .send(message)
            .map_err(|_| ChannelError::Transport {
                worker_id: self.worker_id.clone(),
                message: "outbound stream is closed".to_string(),
            })
    }

    /// Closes the client-to-server half of the call and stops the receive loop. Idempotent.
    pub fn close(&self) {
        self.receive_task.abort();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.receive_task.abort();
    }
}
