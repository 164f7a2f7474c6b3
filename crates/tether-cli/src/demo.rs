use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use tether_model::{MethodError, PropertyType};
use tether_net::{LoopbackTransport, Role};
use tether_sdk::{ClassRegistry, PropertyDescriptor, Tether, TetherConfig, TypeBuilder, Value, ValueShape};
use tracing::debug;

const GREETER_URI: &str = "demo/greeter";

fn classes() -> anyhow::Result<Arc<ClassRegistry>> {
    let classes = Arc::new(ClassRegistry::new());
    classes.register(
        TypeBuilder::new("Greeter")
            .property(PropertyDescriptor::new("name", ValueShape::text()).persistent())
            .property(PropertyDescriptor::new("visitors", PropertyType::list(ValueShape::text())).persistent())
            .remote_method("greet", |greeter, args| async move {
                let whom = args.first().and_then(Value::as_str).unwrap_or("stranger").to_string();
                let visitors = greeter.list("visitors").map_err(|e| MethodError::Failed(e.to_string()))?;
                visitors.push(Value::from(whom.as_str()));
                let name = greeter.get("name").map_err(|e| MethodError::Failed(e.to_string()))?;
                Ok(Value::from(format!("hello {whom}, this is {}", name.as_str().unwrap_or("?"))))
            })
            .proxied(),
    )?;
    Ok(classes)
}

/// Run a server and a client in this process, joined by a loopback.
pub async fn run(config: TetherConfig, encoded: bool) -> anyhow::Result<()> {
    let classes = classes()?;
    let mut server_config = config.clone();
    server_config.network.role = Role::Server;
    let mut client_config = config;
    client_config.network.role = Role::Client;
    let server = Tether::new(Arc::clone(&classes), server_config);
    let client = Tether::new(classes, client_config);

    let (near, far) = if encoded {
        LoopbackTransport::pair_encoded()
    } else {
        LoopbackTransport::pair()
    };
    server.connect(Arc::new(far));
    let channel = client.connect(Arc::new(near));

    let greeter = server.new_object("Greeter")?;
    greeter.set("name", "tether")?;
    server.publish(GREETER_URI, greeter.clone()).await?;

    channel.open().await?;
    println!("{} Session open ({})", "✓".green().bold(), if encoded { "encoded" } else { "in memory" });

    let mirror = channel
        .get_by_uri(GREETER_URI)
        .await?
        .context("greeter was not pushed")?;
    println!("  Resolved {} -> {}", GREETER_URI.bold(), mirror.uuid().to_string().cyan());

    let reply = mirror.invoke("greet", vec![Value::from("cli")]).await?;
    println!("  greet(\"cli\") -> {}", reply.as_str().unwrap_or_default().yellow());

    let visitors = mirror.list("visitors")?;
    tokio::time::timeout(Duration::from_secs(2), async {
        while visitors.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .context("change never reached the client")?;
    debug!(count = visitors.len(), "visitors mirrored");
    let names: Vec<String> = visitors
        .to_vec()
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    println!("  Mirrored visitors: {}", names.join(", ").green());

    client.shutdown().await?;
    server.shutdown().await?;
    println!("{} Session closed", "✓".green().bold());
    Ok(())
}
