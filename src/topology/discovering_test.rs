use std::sync::Arc;
use std::time::Duration;

use tracing_test::traced_test;

use crate::test_utils::replica_member_reply;
use crate::test_utils::router_reply;
use crate::test_utils::standalone_reply;
use crate::test_utils::test_config;
use crate::test_utils::unreachable;
use crate::test_utils::StubConnector;
use crate::ConnectError;
use crate::ConnectionState;
use crate::DiscoveringProxy;
use crate::DiscoveryError;
use crate::Error;
use crate::HandshakeReply;
use crate::InstanceRole;
use crate::ReadPreference;
use crate::ServerProxy;
use crate::TopologyType;

const TIMEOUT: Duration = Duration::from_secs(5);

fn unknown_role_reply() -> HandshakeReply {
    HandshakeReply {
        role: InstanceRole::Unknown,
        ..standalone_reply()
    }
}

#[tokio::test]
#[traced_test]
async fn test_standalone_winner_promotes_to_direct() {
    let connector = Arc::new(StubConnector::new());
    connector.succeed("http://a:27017", standalone_reply(), Duration::ZERO);
    connector.fail("http://b:27017", unreachable("http://b:27017"), Duration::ZERO);

    let proxy = DiscoveringProxy::new(test_config(&["http://a:27017", "http://b:27017"]), connector);
    let resolved = proxy.ensure_resolved(TIMEOUT).await.expect("discovery");

    assert_eq!(resolved.topology(), TopologyType::Standalone);
    assert!(proxy.is_resolved());
    assert_eq!(proxy.topology(), TopologyType::Standalone);
    assert_eq!(proxy.state(), ConnectionState::Connected);
    assert_eq!(resolved.instances().len(), 1);
    assert_eq!(resolved.instances()[0].address(), "http://a:27017");
    assert_eq!(format!("{:?}", resolved), "ResolvedProxy::Direct");
}

#[tokio::test]
#[traced_test]
async fn test_replica_member_winner_promotes_to_replica_set() {
    let connector = Arc::new(StubConnector::new());
    connector.succeed(
        "http://a:27017",
        replica_member_reply("rs0", &["http://a:27017", "http://b:27017"], true),
        Duration::ZERO,
    );
    connector.fail("http://b:27017", unreachable("http://b:27017"), Duration::ZERO);

    let proxy = DiscoveringProxy::new(test_config(&["http://a:27017", "http://b:27017"]), connector);
    let resolved = proxy.ensure_resolved(TIMEOUT).await.expect("discovery");

    assert_eq!(resolved.topology(), TopologyType::ReplicaSet);
    assert_eq!(proxy.replica_set_name(), Some("rs0".to_string()));
}

#[tokio::test]
#[traced_test]
async fn test_router_winner_promotes_to_sharded() {
    let connector = Arc::new(StubConnector::new());
    connector.succeed("http://r1:27017", router_reply(), Duration::ZERO);

    let proxy = DiscoveringProxy::new(test_config(&["http://r1:27017"]), connector);
    let resolved = proxy.ensure_resolved(TIMEOUT).await.expect("discovery");

    assert_eq!(resolved.topology(), TopologyType::Sharded);
    assert_eq!(resolved.replica_set_name(), None);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_first_successful_probe_wins() {
    let connector = Arc::new(StubConnector::new());
    connector.succeed(
        "http://slow:27017",
        replica_member_reply("rs0", &[], true),
        Duration::from_millis(500),
    );
    connector.succeed(
        "http://fast:27017",
        replica_member_reply("rs0", &[], false),
        Duration::from_millis(20),
    );

    let proxy = DiscoveringProxy::new(
        test_config(&["http://slow:27017", "http://fast:27017"]),
        connector,
    );
    proxy.ensure_resolved(TIMEOUT).await.expect("discovery");

    let fast = proxy
        .instances()
        .into_iter()
        .find(|i| i.address() == "http://fast:27017")
        .expect("fast seed present");
    assert_eq!(fast.state(), ConnectionState::Connected);

    // The slower probe is absorbed, not thrown away.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let slow = proxy
        .instances()
        .into_iter()
        .find(|i| i.address() == "http://slow:27017")
        .expect("slow seed present");
    assert_eq!(slow.state(), ConnectionState::Connected);
}

#[tokio::test]
#[traced_test]
async fn test_unknown_role_fails_promotion() {
    let connector = Arc::new(StubConnector::new());
    connector.succeed("http://a:27017", unknown_role_reply(), Duration::ZERO);

    let proxy = DiscoveringProxy::new(test_config(&["http://a:27017"]), connector);
    let err = proxy.ensure_resolved(TIMEOUT).await.expect_err("no topology fits");

    assert!(matches!(
        err,
        Error::Discovery(DiscoveryError::IndeterminateTopology { .. })
    ));
    assert!(!proxy.is_resolved());
    assert_eq!(proxy.state(), ConnectionState::Disconnected);
}

#[tokio::test]
#[traced_test]
async fn test_all_seeds_failing_aggregates_failures() {
    let connector = Arc::new(StubConnector::new());
    connector.fail("http://a:27017", unreachable("http://a:27017"), Duration::ZERO);
    connector.fail("http://b:27017", unreachable("http://b:27017"), Duration::ZERO);

    let proxy = DiscoveringProxy::new(test_config(&["http://a:27017", "http://b:27017"]), connector);
    let err = proxy.ensure_resolved(TIMEOUT).await.expect_err("no seed reachable");

    match err {
        Error::Discovery(DiscoveryError::AllSeedsFailed { failures }) => {
            assert_eq!(failures.len(), 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!proxy.is_resolved());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_discovery_deadline_is_enforced() {
    let connector = Arc::new(StubConnector::new());
    connector.succeed("http://a:27017", standalone_reply(), Duration::from_secs(30));

    let proxy = DiscoveringProxy::new(test_config(&["http://a:27017"]), connector);
    let started = tokio::time::Instant::now();
    let err = proxy
        .ensure_resolved(Duration::from_secs(1))
        .await
        .expect_err("probe outlives the deadline");

    assert!(started.elapsed() <= Duration::from_millis(1100));
    assert!(matches!(err, Error::Discovery(DiscoveryError::Timeout { .. })));
    assert!(!proxy.is_resolved());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_failed_discovery_can_be_retried() {
    let connector = Arc::new(StubConnector::new());
    connector.fail(
        "http://a:27017",
        unreachable("http://a:27017"),
        Duration::from_secs(30),
    );

    let proxy = DiscoveringProxy::new(test_config(&["http://a:27017"]), connector.clone());
    proxy
        .ensure_resolved(Duration::from_secs(1))
        .await
        .expect_err("first cycle times out");
    assert!(!proxy.is_resolved());

    // Let the abandoned probe settle, then the address recovers.
    tokio::time::sleep(Duration::from_secs(31)).await;
    connector.succeed("http://a:27017", standalone_reply(), Duration::from_millis(10));

    let resolved = proxy.ensure_resolved(Duration::from_secs(1)).await.expect("retry");
    assert_eq!(resolved.topology(), TopologyType::Standalone);
    assert_eq!(proxy.connection_attempt(), 2);
}

#[tokio::test]
#[traced_test]
async fn test_concurrent_callers_share_one_discovery() {
    let connector = Arc::new(StubConnector::new());
    connector.succeed(
        "http://a:27017",
        standalone_reply(),
        Duration::from_millis(20),
    );

    let proxy = Arc::new(DiscoveringProxy::new(test_config(&["http://a:27017"]), connector.clone()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let proxy = proxy.clone();
        handles.push(tokio::spawn(async move { proxy.ensure_resolved(TIMEOUT).await }));
    }

    let mut resolved = Vec::new();
    for handle in handles {
        resolved.push(handle.await.expect("task").expect("discovery"));
    }

    // Exactly one race ran; everyone observes the same inner proxy.
    assert!(resolved.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(proxy.connection_attempt(), 1);
    assert_eq!(connector.handshake_count(), 1);
}

#[tokio::test]
#[traced_test]
async fn test_required_set_name_rejects_foreign_winner() {
    let connector = Arc::new(StubConnector::new());
    connector.succeed(
        "http://a:27017",
        replica_member_reply("rs-other", &["http://a:27017"], true),
        Duration::ZERO,
    );

    let mut config = test_config(&["http://a:27017"]);
    config.replica_set = Some("rs0".to_string());

    let proxy = DiscoveringProxy::new(config, connector);
    let err = proxy
        .ensure_resolved(TIMEOUT)
        .await
        .expect_err("the only probe belongs to a different set");

    match err {
        Error::Discovery(DiscoveryError::AllSeedsFailed { failures }) => {
            assert_eq!(failures.len(), 1);
            assert!(matches!(
                failures[0].error,
                ConnectError::SetNameMismatch { .. }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!proxy.is_resolved());
    assert_eq!(proxy.replica_set_name(), None);
    assert_eq!(proxy.instances()[0].state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_required_set_name_keeps_racing_past_foreign_probes() {
    let connector = Arc::new(StubConnector::new());
    // The foreign member answers first but cannot win.
    connector.succeed(
        "http://foreign:27017",
        replica_member_reply("rs-other", &[], true),
        Duration::from_millis(10),
    );
    connector.succeed(
        "http://member:27017",
        replica_member_reply("rs0", &["http://member:27017"], true),
        Duration::from_millis(50),
    );

    let mut config = test_config(&["http://foreign:27017", "http://member:27017"]);
    config.replica_set = Some("rs0".to_string());

    let proxy = DiscoveringProxy::new(config, connector);
    let resolved = proxy.ensure_resolved(TIMEOUT).await.expect("the matching member wins");

    assert_eq!(resolved.topology(), TopologyType::ReplicaSet);
    assert_eq!(proxy.replica_set_name(), Some("rs0".to_string()));

    let foreign = proxy
        .instances()
        .into_iter()
        .find(|i| i.address() == "http://foreign:27017")
        .expect("foreign seed present");
    assert_eq!(foreign.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_connect_spends_one_budget_across_resolution() {
    let connector = Arc::new(StubConnector::new());
    connector.succeed("http://a:27017", standalone_reply(), Duration::from_millis(900));

    let proxy = DiscoveringProxy::new(test_config(&["http://a:27017"]), connector);
    let started = tokio::time::Instant::now();
    proxy
        .connect(Duration::from_secs(1), ReadPreference::Primary)
        .await
        .expect("resolution and connect fit the budget");

    assert!(started.elapsed() <= Duration::from_millis(1100));
    assert_eq!(proxy.state(), ConnectionState::Connected);
}

#[tokio::test]
#[traced_test]
async fn test_advisory_accessors_before_resolution() {
    let connector = Arc::new(StubConnector::new());
    let proxy = DiscoveringProxy::new(test_config(&["http://a:27017", "http://b:27017"]), connector.clone());

    assert_eq!(proxy.topology(), TopologyType::Unknown);
    assert_eq!(proxy.state(), ConnectionState::Disconnected);
    assert_eq!(proxy.instances().len(), 2);
    assert_eq!(proxy.build_info(), None);
    assert_eq!(proxy.replica_set_name(), None);
    assert_eq!(proxy.connection_attempt(), 0);

    proxy.ping().await.expect_err("nothing to ping yet");
    proxy.verify_state().await.expect("nothing to verify yet");

    // None of the advisory reads triggered a probe.
    assert_eq!(connector.handshake_count(), 0);
}

#[tokio::test]
#[traced_test]
async fn test_disconnect_forwards_once_resolved() {
    let connector = Arc::new(StubConnector::new());
    connector.succeed("http://a:27017", standalone_reply(), Duration::ZERO);

    let proxy = DiscoveringProxy::new(test_config(&["http://a:27017"]), connector);
    proxy.ensure_resolved(TIMEOUT).await.expect("discovery");
    proxy.disconnect().await.expect("disconnect");

    assert_eq!(proxy.instances()[0].state(), ConnectionState::Disconnected);
}

#[tokio::test]
#[traced_test]
async fn test_choose_instance_drives_resolution() {
    let connector = Arc::new(StubConnector::new());
    connector.succeed("http://a:27017", standalone_reply(), Duration::ZERO);

    let proxy = DiscoveringProxy::new(test_config(&["http://a:27017"]), connector);
    let instance = proxy
        .choose_instance(ReadPreference::Primary)
        .await
        .expect("lazy discovery");

    assert_eq!(instance.address(), "http://a:27017");
    assert!(proxy.is_resolved());
}
