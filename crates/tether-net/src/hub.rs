use std::sync::{Arc, Mutex};

use tether_channel::ChannelConfig;
use tether_model::ObjectHandle;
use tether_registry::IdentityRegistry;
use tether_serial::SerializerCache;
use tether_types::ObjectUuid;
use tether_watch::FanoutChangeWatcher;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{info, warn};

use crate::channel::{NetworkChannel, NetworkShared};
use crate::config::{NetworkConfig, Role};
use crate::error::NetResult;
use crate::transport::{StreamTransport, Transport};
use crate::uri::UriDirectory;

/// Owns the state shared by every network channel of one process: the
/// fan-out watcher, the published URIs, and the instance hash.
pub struct NetworkHub {
    shared: NetworkShared,
    channel_config: ChannelConfig,
    config: NetworkConfig,
    channels: Mutex<Vec<Arc<NetworkChannel>>>,
}

impl NetworkHub {
    pub fn new(
        registry: Arc<IdentityRegistry>,
        serializers: Arc<SerializerCache>,
        channel_config: ChannelConfig,
        config: NetworkConfig,
    ) -> Self {
        let shared = NetworkShared {
            registry,
            watcher: Arc::new(FanoutChangeWatcher::new(Arc::clone(&serializers))),
            serializers,
            uris: Arc::new(UriDirectory::new()),
            instance_hash: ObjectUuid::new().to_string(),
        };
        Self {
            shared,
            channel_config,
            config,
            channels: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<NetworkChannel>>> {
        self.channels.lock().expect("hub lock poisoned")
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.shared.registry
    }

    pub fn watcher(&self) -> &Arc<FanoutChangeWatcher> {
        &self.shared.watcher
    }

    pub fn uris(&self) -> &Arc<UriDirectory> {
        &self.shared.uris
    }

    pub fn instance_hash(&self) -> &str {
        &self.shared.instance_hash
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Create a channel over `transport`. The channel is not opened; a
    /// client calls [`NetworkChannel::open`], a server waits for the peer.
    pub fn connect(&self, transport: Arc<dyn Transport>) -> Arc<NetworkChannel> {
        let channel = NetworkChannel::new(
            self.shared.clone(),
            transport,
            self.channel_config.clone(),
            self.config.clone(),
        );
        self.lock().push(Arc::clone(&channel));
        channel
    }

    /// Dial a peer over TCP and open the session.
    pub async fn connect_tcp(&self, addr: impl ToSocketAddrs) -> NetResult<Arc<NetworkChannel>> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        let channel = self.connect(Arc::new(StreamTransport::new(reader, writer)));
        channel.open().await?;
        Ok(channel)
    }

    /// Accept peers until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> NetResult<()> {
        if self.config.role != Role::Server {
            warn!("serving with a client configuration, published objects will not be pushed");
        }
        info!(addr = ?listener.local_addr().ok(), "accepting peers");
        loop {
            let (stream, peer) = listener.accept().await?;
            let (reader, writer) = stream.into_split();
            let channel = self.connect(Arc::new(StreamTransport::new(reader, writer)));
            info!(%peer, channel = %channel.id(), "peer connected");
        }
    }

    /// Publish `object` under `uri` and push it to every open server
    /// channel.
    pub async fn publish(&self, uri: &str, object: ObjectHandle) -> NetResult<()> {
        self.shared.uris.publish(uri, object.clone());
        if self.config.role != Role::Server {
            return Ok(());
        }
        for channel in self.channels() {
            if channel.is_open() {
                channel.push_uri(uri, &object).await?;
            }
        }
        Ok(())
    }

    pub fn unpublish(&self, uri: &str) -> Option<ObjectHandle> {
        self.shared.uris.unpublish(uri)
    }

    /// Live channels. Channels that have shut down are dropped.
    pub fn channels(&self) -> Vec<Arc<NetworkChannel>> {
        let mut channels = self.lock();
        channels.retain(|c| !c.is_shut_down());
        channels.clone()
    }

    pub async fn close_all(&self) {
        let channels = std::mem::take(&mut *self.lock());
        for channel in channels {
            channel.close().await;
        }
    }
}
