// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{convert::Infallible, io};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

/// Transport a delivery loop writes encoded frames to.
#[async_trait]
pub trait EventSink: Send {
    /// Writes and flushes one complete frame.
    async fn write_frame(&mut self, frame: Bytes) -> io::Result<()>;

    /// Resolves once the peer is known to be gone. Sinks that can only detect
    /// disconnection on write never resolve.
    async fn closed(&mut self) { std::future::pending::<()>().await }
}

/// Sink over any byte writer, e.g. a socket or a duplex pipe.
#[derive(Debug)]
pub struct WriterSink<W>(W);

impl<W> WriterSink<W> {
    pub const fn new(writer: W) -> Self { Self(writer) }

    pub fn into_inner(self) -> W { self.0 }
}

#[async_trait]
impl<W> EventSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_frame(&mut self, frame: Bytes) -> io::Result<()> {
        self.0.write_all(&frame).await?;
        self.0.flush().await
    }
}

/// Sink feeding a streaming HTTP response body.
#[derive(Debug, Clone)]
pub struct ChannelSink(mpsc::Sender<Result<Bytes, Infallible>>);

impl ChannelSink {
    pub const fn new(tx: mpsc::Sender<Result<Bytes, Infallible>>) -> Self { Self(tx) }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn write_frame(&mut self, frame: Bytes) -> io::Result<()> {
        self.0
            .send(Ok(frame))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "stream body dropped"))
    }

    async fn closed(&mut self) { self.0.closed().await }
}
