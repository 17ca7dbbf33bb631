//! # cbpp Sample
//!
//! Walks through the client surface against an in-memory cluster: single
//! operations, a batch, durability, a batch of gets, and cleanup.
//!
//! Usage: `cbpp-sample [connstr]` (default from `CBPP_CONNSTR`).

use anyhow::{Context as _, bail};
use tracing::{Level, info};

use cbpp_client::logging::init_tracing;
use cbpp_client::{
    Client, ClientConfig, DurabilityOptions, EndureCommand, GetCommand, MemoryCluster,
    RemoveCommand, ResponseKind, StoreCommand,
};

fn main() -> anyhow::Result<()> {
    init_tracing(Level::INFO)?;

    let mut config = ClientConfig::from_env();
    if let Some(connstr) = std::env::args().nth(1) {
        config.connstr = connstr;
    }

    let cluster = MemoryCluster::new();
    let mut client = Client::open(&config, &cluster).context("opening client")?;
    let rc = client.connect();
    if !rc.success() {
        bail!("could not connect to '{}': {}", config.connstr, rc);
    }

    let doc = r#"{ "v": 100.1, "list": [1,2,3,4,5,6,7], "talk": "About Foo." }"#;
    let stored = client.upsert(&StoreCommand::new("foo", doc));
    info!(cas = format_args!("{:#x}", stored.cas()), "stored foo");

    let got = client.get(&GetCommand::new("foo"));
    info!(value = got.value_str().unwrap_or("<binary>"), "got foo");

    let missing = client.get(&GetCommand::new("non-exist-key"));
    info!(status = %missing.status(), "status for non-existent key");

    {
        let mut ctx = client.context();
        let cmd = StoreCommand::new("foo", doc);
        for _ in 0..10 {
            ctx.add_detached(&cmd)?;
        }
        ctx.submit();
        ctx.wait();
    }

    client.upsert(&StoreCommand::new("foo", "FOOVALUE"));
    client.upsert(&StoreCommand::new("bar", "BARVALUE"));
    client.upsert(&StoreCommand::new("baz", "BAZVALUE"));

    let endured = client.upsert(&StoreCommand::new("toEndure", "toEndure"));
    let durability = client.endure(
        &EndureCommand::new("toEndure").cas(endured.cas()),
        &DurabilityOptions::default(),
    );
    info!(status = %durability.status(), "endure status");

    {
        let mut ctx = client.context();
        for key in ["foo", "bar", "baz"] {
            let _ = ctx.get(key)?;
        }
        ctx.submit();
        ctx.wait();
        for key in ["foo", "bar", "baz"] {
            info!(key, value = ctx[key].value_str().unwrap_or("<binary>"), "batched get");
        }
    }

    for key in ["foo", "bar", "baz"] {
        client.remove(&RemoveCommand::new(key));
    }

    println!("{}", serde_json::to_string_pretty(&client.metrics())?);
    Ok(())
}
