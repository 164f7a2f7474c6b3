use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::PacketCodec;
use crate::error::{NetError, NetResult};
use crate::packet::Packet;

/// Receives batches arriving from the peer.
pub trait PacketSink: Send + Sync {
    fn deliver(&self, batch: Vec<Packet>);

    /// The connection is gone; nothing more will be delivered.
    fn disconnected(&self);
}

/// A duplex carrier of packet batches.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Install the sink for inbound batches. Batches that arrived earlier
    /// are delivered at once.
    fn bind(&self, sink: Arc<dyn PacketSink>);

    /// Hand one batch to the peer.
    async fn send(&self, batch: Vec<Packet>) -> NetResult<()>;

    async fn close(&self);
}

#[derive(Default)]
struct Mailbox {
    sink: Option<Arc<dyn PacketSink>>,
    backlog: Vec<Vec<Packet>>,
    closed: bool,
}

fn lock(mailbox: &Mutex<Mailbox>) -> std::sync::MutexGuard<'_, Mailbox> {
    mailbox.lock().expect("loopback lock poisoned")
}

/// In-process transport joining two channels.
///
/// [`pair`](Self::pair) hands packets over as they are;
/// [`pair_encoded`](Self::pair_encoded) pushes every batch through the
/// [`PacketCodec`], so only what survives the wire arrives.
pub struct LoopbackTransport {
    local: Arc<Mutex<Mailbox>>,
    remote: Arc<Mutex<Mailbox>>,
    encoded: bool,
}

impl LoopbackTransport {
    pub fn pair() -> (Self, Self) {
        Self::build(false)
    }

    pub fn pair_encoded() -> (Self, Self) {
        Self::build(true)
    }

    fn build(encoded: bool) -> (Self, Self) {
        let a = Arc::new(Mutex::new(Mailbox::default()));
        let b = Arc::new(Mutex::new(Mailbox::default()));
        (
            Self {
                local: Arc::clone(&a),
                remote: Arc::clone(&b),
                encoded,
            },
            Self {
                local: b,
                remote: a,
                encoded,
            },
        )
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn bind(&self, sink: Arc<dyn PacketSink>) {
        let backlog = {
            let mut mailbox = lock(&self.local);
            mailbox.sink = Some(Arc::clone(&sink));
            std::mem::take(&mut mailbox.backlog)
        };
        for batch in backlog {
            sink.deliver(batch);
        }
    }

    async fn send(&self, batch: Vec<Packet>) -> NetResult<()> {
        if lock(&self.local).closed {
            return Err(NetError::Disconnected);
        }
        let batch = if self.encoded {
            let frame = PacketCodec::encode(&batch)?;
            PacketCodec::decode(&frame)?.0
        } else {
            batch
        };
        let sink = {
            let mut remote = lock(&self.remote);
            if remote.closed {
                return Err(NetError::Disconnected);
            }
            match &remote.sink {
                Some(sink) => Arc::clone(sink),
                None => {
                    remote.backlog.push(batch);
                    return Ok(());
                }
            }
        };
        sink.deliver(batch);
        Ok(())
    }

    async fn close(&self) {
        lock(&self.local).closed = true;
        let sink = {
            let mut remote = lock(&self.remote);
            if remote.closed {
                return;
            }
            remote.closed = true;
            remote.sink.clone()
        };
        if let Some(sink) = sink {
            sink.disconnected();
        }
    }
}

/// Transport over a pair of byte streams (a socket, a pipe, a duplex).
///
/// Frames are written by a dedicated task; a reader task spawned on
/// [`bind`](Transport::bind) decodes inbound frames and reports end of
/// stream as a disconnect.
pub struct StreamTransport {
    reader: Mutex<Option<Box<dyn AsyncRead + Send + Unpin>>>,
    writer: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamTransport {
    /// Must be called within a Tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_frames(writer, rx));
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
            writer: Mutex::new(Some(tx)),
            reader_task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    fn bind(&self, sink: Arc<dyn PacketSink>) {
        let Some(reader) = self.reader.lock().expect("stream lock poisoned").take() else {
            warn!("stream transport already bound");
            return;
        };
        let task = tokio::spawn(read_frames(reader, sink));
        *self.reader_task.lock().expect("stream lock poisoned") = Some(task);
    }

    async fn send(&self, batch: Vec<Packet>) -> NetResult<()> {
        let frame = PacketCodec::encode(&batch)?;
        let writer = self.writer.lock().expect("stream lock poisoned");
        match writer.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| NetError::Disconnected),
            None => Err(NetError::Disconnected),
        }
    }

    async fn close(&self) {
        self.writer.lock().expect("stream lock poisoned").take();
        if let Some(task) = self.reader_task.lock().expect("stream lock poisoned").take() {
            task.abort();
        }
    }
}

async fn write_frames<W>(mut writer: W, mut frames: mpsc::UnboundedReceiver<Bytes>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            warn!(error = %e, "stream write failed");
            break;
        }
        if let Err(e) = writer.flush().await {
            warn!(error = %e, "stream flush failed");
            break;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "stream shutdown failed");
    }
}

async fn read_frames(mut reader: Box<dyn AsyncRead + Send + Unpin>, sink: Arc<dyn PacketSink>) {
    let mut buf = BytesMut::with_capacity(8 * 1024);
    'read: loop {
        loop {
            match PacketCodec::decode_frame(&mut buf) {
                Ok(Some(batch)) => sink.deliver(batch),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "undecodable frame, dropping connection");
                    break 'read;
                }
            }
        }
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                debug!("stream ended");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "stream read failed");
                break;
            }
        }
    }
    sink.disconnected();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketBody;

    #[derive(Default)]
    struct Collect {
        batches: Mutex<Vec<Vec<Packet>>>,
        disconnected: Mutex<bool>,
    }

    impl PacketSink for Collect {
        fn deliver(&self, batch: Vec<Packet>) {
            self.batches.lock().unwrap().push(batch);
        }

        fn disconnected(&self) {
            *self.disconnected.lock().unwrap() = true;
        }
    }

    fn close_packet() -> Vec<Packet> {
        vec![Packet::new(PacketBody::Close)]
    }

    #[tokio::test]
    async fn loopback_buffers_until_bound() {
        let (a, b) = LoopbackTransport::pair();
        a.send(close_packet()).await.unwrap();
        let sink = Arc::new(Collect::default());
        b.bind(sink.clone());
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
        a.send(close_packet()).await.unwrap();
        assert_eq!(sink.batches.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn loopback_close_disconnects_the_peer() {
        let (a, b) = LoopbackTransport::pair_encoded();
        let sink = Arc::new(Collect::default());
        b.bind(sink.clone());
        a.close().await;
        assert!(*sink.disconnected.lock().unwrap());
        assert!(matches!(
            a.send(close_packet()).await.unwrap_err(),
            NetError::Disconnected
        ));
        assert!(matches!(
            b.send(close_packet()).await.unwrap_err(),
            NetError::Disconnected
        ));
    }

    #[tokio::test]
    async fn stream_transport_carries_frames() {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);
        let a = StreamTransport::new(left_read, left_write);
        let b = StreamTransport::new(right_read, right_write);
        let sink = Arc::new(Collect::default());
        b.bind(sink.clone());
        a.bind(Arc::new(Collect::default()));

        a.send(close_packet()).await.unwrap();
        for _ in 0..100 {
            if !sink.batches.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(sink.batches.lock().unwrap().len(), 1);

        a.close().await;
        for _ in 0..100 {
            if *sink.disconnected.lock().unwrap() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(*sink.disconnected.lock().unwrap());
    }
}
