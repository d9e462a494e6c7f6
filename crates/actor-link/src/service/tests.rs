//! Tests for LinkFlow

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;

use super::*;
use crate::domain::{
    ApiError, ApplicationProperties, ConnectStage, Endpoint, FlowError, LinkError, LinkRole,
    PropertyValue, ProvisionError, ResourceKind, ResourceStatus,
};
use crate::test_utils::{descriptor, text_message, LinkEvent, RecordingConnector, ScriptedControlPlane};

/// Settings with fast pacing and no polling deadline.
fn fast_settings() -> FlowSettings {
    FlowSettings {
        poll: PollSettings {
            interval: Duration::from_secs(2),
            timeout: None,
        },
        exchange: ExchangeSettings {
            send_interval: Duration::from_secs(1),
            receive_retry_delay: Duration::from_millis(100),
        },
        ..FlowSettings::default()
    }
}

/// Trigger a stop after `delay` of (possibly paused) time.
fn stop_after(delay: Duration) -> Shutdown {
    let (trigger, listener) = shutdown::channel();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trigger.trigger();
    });
    listener
}

fn close_steps(events: &[LinkEvent]) -> Vec<LinkEvent> {
    events
        .iter()
        .filter(|e| {
            matches!(
                e,
                LinkEvent::CloseLink | LinkEvent::EndSession | LinkEvent::CloseConnection
            )
        })
        .cloned()
        .collect()
}

fn expected_close() -> Vec<LinkEvent> {
    vec![
        LinkEvent::CloseLink,
        LinkEvent::EndSession,
        LinkEvent::CloseConnection,
    ]
}

#[tokio::test(start_paused = true)]
async fn test_delivery_flow_sends_to_advertised_target() {
    let api = ScriptedControlPlane::new(ResourceKind::Delivery)
        .respond(Ok(descriptor("d1", "REQUESTED")))
        .respond(Ok(descriptor("d1", "CREATED").with_target("h", 5671, "/t1")));
    let connector = RecordingConnector::new();
    let flow = LinkFlow::new(&connector, fast_settings());

    let summary = flow
        .run_provisioned(&api, "sel", stop_after(Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(summary.resource_id.as_deref(), Some("d1"));
    assert_eq!(summary.endpoint.uri(), "amqps://h:5671");

    let events = connector.events();
    assert_eq!(events[0], LinkEvent::Connect("amqps://h:5671".into()));
    assert_eq!(
        events[2],
        LinkEvent::AttachSender {
            name: "actor-link-sender".into(),
            address: "/t1".into()
        }
    );
    match summary.exchange {
        ExchangeSummary::Sent(report) => assert!(report.settled >= 1),
        other => panic!("unexpected summary: {other:?}"),
    }
    assert!(!connector.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_resource_never_opens_a_link() {
    let api = ScriptedControlPlane::new(ResourceKind::Delivery)
        .respond(Ok(descriptor("d1", "REQUESTED")))
        .respond(Ok(descriptor("d1", "FAILED")));
    let connector = RecordingConnector::new();
    let flow = LinkFlow::new(&connector, fast_settings());

    let err = flow
        .run_provisioned(&api, "sel", Shutdown::never())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        FlowError::Provision(ProvisionError::ResourceFailed {
            kind: ResourceKind::Delivery,
            id: "d1".into(),
            status: ResourceStatus::Failed,
        })
    );
    assert!(connector.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_created_without_endpoint_fails() {
    let api = ScriptedControlPlane::new(ResourceKind::Subscription)
        .respond(Ok(descriptor("s1", "CREATED")));
    let connector = RecordingConnector::new();
    let flow = LinkFlow::new(&connector, fast_settings());

    let err = flow
        .run_provisioned(&api, "sel", Shutdown::never())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FlowError::Provision(ProvisionError::NoEndpoint { .. })
    ));
    assert!(connector.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_subscription_round_trip_preserves_body_and_properties() {
    let mut props = ApplicationProperties::new();
    props.insert("k", PropertyValue::String("v".into()));

    let api = ScriptedControlPlane::new(ResourceKind::Subscription)
        .respond(Ok(descriptor("s1", "CREATED").with_source("h", 5671, "/s1")));
    let connector = RecordingConnector::new().deliver(Ok(text_message(1, "hello", props.clone())));
    let (inbox, mut decoded) = tokio::sync::mpsc::unbounded_channel();
    let flow = LinkFlow::new(&connector, fast_settings()).with_inbox(inbox);

    let summary = flow
        .run_provisioned(&api, "sel", stop_after(Duration::from_secs(1)))
        .await
        .unwrap();

    let message = decoded.recv().await.unwrap();
    assert_eq!(message.body, "hello");
    assert_eq!(
        message.properties.get("k"),
        Some(&PropertyValue::String("v".into()))
    );
    assert_eq!(message.properties, props);
    drop(flow);
    assert!(decoded.recv().await.is_none());

    match summary.exchange {
        ExchangeSummary::Received(report) => {
            assert_eq!(report.received, 1);
            assert_eq!(report.accepted, 1);
            assert_eq!(report.decode_failures, 0);
        }
        other => panic!("unexpected summary: {other:?}"),
    }
    assert_eq!(connector.accepted(), vec![1]);
    assert!(connector.events().contains(&LinkEvent::AttachReceiver {
        name: "actor-link-receiver".into(),
        address: "/s1".into()
    }));
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_once_on_normal_stop() {
    let connector = RecordingConnector::new();
    let flow = LinkFlow::new(&connector, fast_settings());
    let endpoint = Endpoint::new("h", 5671, "/t1").unwrap();

    let summary = flow
        .run_direct(&endpoint, LinkRole::Sender, stop_after(Duration::from_millis(2500)))
        .await
        .unwrap();

    assert!(summary.close.is_clean());
    assert_eq!(close_steps(&connector.events()), expected_close());
    assert_eq!(summary.resource_id, None);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_once_on_fatal_receive_error() {
    let connector = RecordingConnector::new()
        .deliver(Err(LinkError::Detached("amqp:link:detach-forced".into())));
    let flow = LinkFlow::new(&connector, fast_settings());
    let endpoint = Endpoint::new("h", 5671, "/s1").unwrap();

    let err = flow
        .run_direct(&endpoint, LinkRole::Receiver, Shutdown::never())
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::Link(LinkError::Detached(_))));
    assert_eq!(close_steps(&connector.events()), expected_close());
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_once_on_panic_in_loop() {
    let connector = RecordingConnector::new().panic_on_send(2);
    let flow = LinkFlow::new(&connector, fast_settings());
    let endpoint = Endpoint::new("h", 5671, "/t1").unwrap();

    let outcome = AssertUnwindSafe(flow.run_direct(&endpoint, LinkRole::Sender, Shutdown::never()))
        .catch_unwind()
        .await;

    assert!(outcome.is_err());
    assert_eq!(close_steps(&connector.events()), expected_close());
}

#[tokio::test]
async fn test_connect_failure_touches_nothing_else() {
    let connector = RecordingConnector::new().fail_connect();
    let flow = LinkFlow::new(&connector, fast_settings());
    let endpoint = Endpoint::new("h", 5671, "/t1").unwrap();

    let err = flow
        .run_direct(&endpoint, LinkRole::Sender, Shutdown::never())
        .await
        .unwrap_err();

    match err {
        FlowError::Connect(e) => assert_eq!(e.stage, ConnectStage::Connection),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(connector.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_failures_do_not_stop_the_flow() {
    let connector = RecordingConnector::new().reject_send(1).reject_send(2);
    let flow = LinkFlow::new(&connector, fast_settings());
    let endpoint = Endpoint::new("h", 5671, "/t1").unwrap();

    let summary = flow
        .run_direct(&endpoint, LinkRole::Sender, stop_after(Duration::from_millis(3500)))
        .await
        .unwrap();

    assert_eq!(
        summary.exchange,
        ExchangeSummary::Sent(SenderReport {
            attempted: 4,
            settled: 2,
            failed: 2,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_delete_on_exit() {
    let api = ScriptedControlPlane::new(ResourceKind::Delivery)
        .respond(Ok(descriptor("d1", "CREATED").with_target("h", 5671, "/t1")));
    let connector = RecordingConnector::new();
    let flow = LinkFlow::new(
        &connector,
        FlowSettings {
            delete_on_exit: true,
            ..fast_settings()
        },
    );

    flow.run_provisioned(&api, "sel", stop_after(Duration::from_millis(500)))
        .await
        .unwrap();

    assert_eq!(api.deleted(), vec!["d1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_delete_failure_is_not_fatal() {
    let api = ScriptedControlPlane::new(ResourceKind::Delivery)
        .respond(Ok(descriptor("d1", "CREATED").with_target("h", 5671, "/t1")))
        .fail_delete(ApiError::Status {
            operation: "delete delivery".into(),
            status: 404,
            body: String::new(),
        });
    let connector = RecordingConnector::new();
    let flow = LinkFlow::new(
        &connector,
        FlowSettings {
            delete_on_exit: true,
            ..fast_settings()
        },
    );

    let result = flow
        .run_provisioned(&api, "sel", stop_after(Duration::from_millis(500)))
        .await;

    assert!(result.is_ok());
    assert_eq!(api.deleted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_delete_by_default() {
    let api = ScriptedControlPlane::new(ResourceKind::Delivery)
        .respond(Ok(descriptor("d1", "CREATED").with_target("h", 5671, "/t1")));
    let connector = RecordingConnector::new();
    let flow = LinkFlow::new(&connector, fast_settings());

    flow.run_provisioned(&api, "sel", stop_after(Duration::from_millis(500)))
        .await
        .unwrap();

    assert!(api.deleted().is_empty());
}
