use std::sync::Arc;

use tokio::time::Duration;

use sluice::admin::client::AdminClient;
use sluice::admin::config::AdminConfig;
use sluice::admin::lifecycle::LocalDataStore;
use sluice::admin::rpc::{ResponseBody, TopicSpec};
use sluice::admin::server::Server;
use sluice::admin::state::worker::Heartbeat;
use sluice::admin::SluiceAdmin;
use sluice::error::ErrorCode;
use sluice::registry::MemoryRegistry;
use sluice::util::Shutdown;

async fn start_admin() -> anyhow::Result<(AdminClient, Shutdown)> {
    let mut config = AdminConfig {
        port: 0,
        schedule_interval_ms: 50,
        schedule_delay_ms: 0,
        leader_lease_ms: 1_000,
        ..Default::default()
    };
    let server = Server::bind(config.clone()).await?;
    let addr = server.local_addr()?;
    config.advertised_address = Some(addr.to_string());

    let shutdown = Shutdown::new();
    let admin = SluiceAdmin::with_config(config);
    tokio::spawn(admin.serve(
        server,
        Arc::new(MemoryRegistry::new()),
        Arc::new(LocalDataStore),
        shutdown.clone(),
    ));

    let mut client = AdminClient::connect(addr).await?;
    for _ in 0..100 {
        if client.leader_info().await?.is_some() {
            return Ok((client, shutdown));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("admin never became master")
}

#[tokio::test(flavor = "multi_thread")]
#[tracing_test::traced_test]
async fn topic_round_trip() -> anyhow::Result<()> {
    let (mut client, shutdown) = start_admin().await?;

    let res = client.create_topic(TopicSpec::new("t1", 6)).await?;
    assert!(res.error.is_ok(), "{:?}", res.error);
    match client.topic_info("t1").await?.body {
        ResponseBody::Topic(view) => assert_eq!(6, view.partitions.len()),
        other => panic!("unexpected body {:?}", other),
    }

    let res = client.create_topic(TopicSpec::new("t1", 6)).await?;
    assert_eq!(ErrorCode::TopicAlreadyExists, res.code());

    let res = client.delete_topic("t1", true).await?;
    assert!(res.error.is_ok());
    assert_eq!(ErrorCode::TopicNotExists, client.topic_info("t1").await?.code());

    shutdown.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[tracing_test::traced_test]
async fn broker_receives_assignments() -> anyhow::Result<()> {
    let (mut client, shutdown) = start_admin().await?;
    client.create_topic(TopicSpec::new("t1", 3)).await?;

    let hb = Heartbeat::broker("b1", "127.0.0.1:9092", "default");
    let mut assigned = vec![];
    for _ in 0..100 {
        match client.heartbeat(hb.clone()).await?.body {
            ResponseBody::Assignments(a) if a.len() == 3 => {
                assigned = a;
                break;
            }
            _ => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    assert_eq!(3, assigned.len());
    assert!(assigned.iter().all(|a| a.id.topic == "t1"));

    shutdown.shutdown();
    Ok(())
}
