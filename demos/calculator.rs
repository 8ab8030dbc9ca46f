use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, Level};

use signal_rpc::{ExposeTarget, InMemorySignalChannel, PartialRpcConfig, Procedure, RpcEndpoint, RpcError};

fn init_logging() {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_thread_ids(true)
        .try_init()
        .ok();
}

fn calculator() -> ExposeTarget {
    ExposeTarget::procedures([
        ("add", Procedure::typed(|(a, b): (f64, f64)| Ok::<_, String>(a + b))),
        ("div", Procedure::typed(|(a, b): (f64, f64)| {
            if b == 0.0 {
                Err("division by zero")
            }
            else {
                Ok(a / b)
            }
        })),
        ("slow_square", Procedure::deferred(|args| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            match args.first().and_then(|v| v.as_f64()) {
                Some(x) => Ok(json!(x * x)),
                None => Err(json!("expected a number")),
            }
        })),
    ])
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    init_logging();

    let channel = InMemorySignalChannel::new();
    let server = RpcEndpoint::new(Arc::new(channel.join_as("server".into())?));
    let client = RpcEndpoint::new(Arc::new(channel.join_as("client".into())?));
    server.expose(calculator())?;
    client.configure(PartialRpcConfig::new().with_timeout(Duration::from_secs(1)));

    tokio::select!(
        r = server.recv() => r?,
        r = client.recv() => r?,
        r = async {
            info!("2 + 3 = {:?}", client.call("add", vec![json!(2), json!(3)])?.await);
            info!("1 / 0 = {:?}", client.call("div", vec![json!(1), json!(0)])?.await);
            info!("7 ^ 2 = {:?}", client.call("slow_square", vec![json!(7)])?.await);
            info!("sqrt(2) = {:?}", client.call("sqrt", vec![json!(2)])?.await);

            let impatient = PartialRpcConfig::new().with_timeout(Duration::from_millis(50)).with_debug(true);
            info!("impatient 7 ^ 2 = {:?}", client.call_with(impatient, "slow_square", vec![json!(7)])?.await);
            Ok::<_, RpcError>(())
        } => {
            server.stop();
            client.stop();
            r?
        }
    );

    Ok(())
}
