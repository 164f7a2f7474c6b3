#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tether_channel::ChannelConfig;
use tether_model::{
    ClassRegistry, MethodError, PropertyDescriptor, PropertyType, TypeBuilder, Value, ValueShape,
};
use tether_net::{
    LoopbackTransport, NetResult, NetworkChannel, NetworkConfig, NetworkHub, Packet, PacketBody,
    PacketSink, Transport,
};
use tether_registry::IdentityRegistry;
use tether_serial::SerializerCache;

pub fn classes() -> Arc<ClassRegistry> {
    let classes = Arc::new(ClassRegistry::new());
    classes
        .register(
            TypeBuilder::new("Greeter")
                .property(PropertyDescriptor::new("name", ValueShape::text()).persistent())
                .property(
                    PropertyDescriptor::new("items", PropertyType::list(ValueShape::text()))
                        .persistent(),
                )
                .remote_method("greet", |object, args| async move {
                    let name = object
                        .get("name")
                        .map_err(|e| MethodError::Failed(e.to_string()))?;
                    let whom = args.first().and_then(Value::as_str).unwrap_or("nobody");
                    Ok(Value::from(format!(
                        "{} greets {whom}",
                        name.as_str().unwrap_or("?")
                    )))
                })
                .remote_method("rename", |object, args| async move {
                    let name = args.into_iter().next().unwrap_or(Value::Null);
                    object
                        .set("name", name)
                        .map_err(|e| MethodError::Failed(e.to_string()))?;
                    Ok(Value::from(object))
                })
                .remote_method("stall", |_, _| async {
                    std::future::pending::<()>().await;
                    Ok(Value::Null)
                })
                .method("local_only", |_, _| async { Ok(Value::from("local")) })
                .proxied(),
        )
        .unwrap();
    classes
        .register(
            TypeBuilder::new("Note")
                .property(PropertyDescriptor::new("name", ValueShape::text()).persistent())
                .property(
                    PropertyDescriptor::new("child", ValueShape::reference("Note")).persistent(),
                ),
        )
        .unwrap();
    classes
}

pub fn hub(config: NetworkConfig) -> NetworkHub {
    let classes = classes();
    let registry = IdentityRegistry::new(Arc::clone(&classes));
    NetworkHub::new(
        registry,
        Arc::new(SerializerCache::new(classes)),
        ChannelConfig::default(),
        config,
    )
}

/// Records every batch a transport sends.
pub struct Tap {
    inner: Box<dyn Transport>,
    sent: Mutex<Vec<Packet>>,
}

impl Tap {
    pub fn new(inner: impl Transport + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<Packet> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_of(&self, type_name: &str) -> Vec<Packet> {
        self.sent()
            .into_iter()
            .filter(|p| p.body.type_name() == type_name)
            .collect()
    }
}

#[async_trait]
impl Transport for Tap {
    fn bind(&self, sink: Arc<dyn PacketSink>) {
        self.inner.bind(sink);
    }

    async fn send(&self, batch: Vec<Packet>) -> NetResult<()> {
        self.sent.lock().unwrap().extend(batch.iter().cloned());
        self.inner.send(batch).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

pub struct Session {
    pub client: NetworkHub,
    pub server: NetworkHub,
    pub client_channel: Arc<NetworkChannel>,
    pub server_channel: Arc<NetworkChannel>,
    /// Packets sent by the client.
    pub client_tap: Arc<Tap>,
    /// Packets sent by the server.
    pub server_tap: Arc<Tap>,
}

/// A client and a server joined by an encoded loopback. Nothing is opened.
pub fn session() -> Session {
    let client = hub(NetworkConfig::default());
    let server = hub(NetworkConfig::server());
    let (a, b) = LoopbackTransport::pair_encoded();
    let client_tap = Arc::new(Tap::new(a));
    let server_tap = Arc::new(Tap::new(b));
    let client_channel = client.connect(client_tap.clone());
    let server_channel = server.connect(server_tap.clone());
    Session {
        client,
        server,
        client_channel,
        server_channel,
        client_tap,
        server_tap,
    }
}

/// Poll `check` until it holds, failing after two seconds.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}

pub fn is_type(packet: &Packet, type_name: &str) -> bool {
    packet.body.type_name() == type_name
}

pub fn returns_to(packets: &[Packet], origin: u64) -> Option<&Packet> {
    packets
        .iter()
        .find(|p| matches!(p.body, PacketBody::Return { .. }) && p.origin_packet_id == Some(origin))
}
