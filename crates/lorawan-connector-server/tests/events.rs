mod support;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lorawan_connector_core::control_plane::{APPLICATION_NAME, Device};
use lorawan_connector_core::{ConnectorError, ConnectorResult};
use lorawan_connector_server::events::{
    ChangeEventDispatcher, ChangeEventSource, Delivery, DispatchOutcome,
};
use serde_json::json;
use support::{Harness, device, identity, managed_type, unmanaged_type};
use tokio_util::sync::CancellationToken;

const EUI: &str = "0102030405060708";

fn harness() -> Harness {
    let h = Harness::new(vec![identity("u1", "x@example.com")]);
    h.registry.add_type(managed_type("dt1", "p-otaa"));
    h.registry.add_type(unmanaged_type("dt2"));
    h.registry
        .add_device(device("urn:device:42", EUI, "sensor-42", "u1", "dt1"));
    h.registry
        .add_device(device("urn:device:43", "0A0B0C0D0E0F0001", "thermostat", "u1", "dt2"));
    h
}

fn dispatcher(h: &Harness) -> ChangeEventDispatcher {
    ChangeEventDispatcher::new(
        h.registry.clone(),
        h.control_plane.clone(),
        h.controller.devices().clone(),
    )
}

fn put(id: &str) -> Vec<u8> {
    json!({ "command": "PUT", "id": id, "owner": "u1" })
        .to_string()
        .into_bytes()
}

fn delete(id: &str, local_id: &str) -> Vec<u8> {
    json!({
        "command": "DELETE",
        "id": id,
        "owner": "u1",
        "device": { "id": id, "local_id": local_id, "name": "sensor-42" }
    })
    .to_string()
    .into_bytes()
}

fn seed_control_plane_device(h: &Harness) {
    let tenant = h.control_plane.add_tenant("x@example.com");
    let app = h.control_plane.add_application(&tenant, APPLICATION_NAME);
    h.control_plane.add_device(Device {
        dev_eui: EUI.into(),
        application_id: app,
        ..Default::default()
    });
}

#[tokio::test]
async fn put_of_managed_device_reconciles_it() {
    let h = harness();
    let outcome = dispatcher(&h).handle(&put("urn:device:42")).await.unwrap();

    match outcome {
        DispatchOutcome::Reconciled(plan) => assert!(plan.create && plan.create_keys),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(h.control_plane.device(EUI).unwrap().name, "sensor-42");
}

#[tokio::test]
async fn put_of_unmanaged_device_is_ignored() {
    let h = harness();
    let outcome = dispatcher(&h).handle(&put("urn:device:43")).await.unwrap();

    assert!(matches!(outcome, DispatchOutcome::Ignored(_)));
    assert!(h.control_plane.calls().is_empty());
}

#[tokio::test]
async fn put_of_unknown_device_fails() {
    let h = harness();
    let err = dispatcher(&h).handle(&put("urn:device:404")).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn delete_removes_device_and_tolerates_absence() {
    let h = harness();
    seed_control_plane_device(&h);
    let d = dispatcher(&h);

    let outcome = d.handle(&delete("urn:device:42", EUI)).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Deleted);
    assert!(h.control_plane.device(EUI).is_none());

    let again = d.handle(&delete("urn:device:42", EUI)).await.unwrap();
    assert_eq!(again, DispatchOutcome::Deleted);
    assert_eq!(h.control_plane.calls(), vec![format!("delete_device:{EUI}")]);
}

#[tokio::test]
async fn delete_matches_device_regardless_of_local_id_case() {
    let h = harness();
    let tenant = h.control_plane.add_tenant("x@example.com");
    let app = h.control_plane.add_application(&tenant, APPLICATION_NAME);
    h.control_plane.add_device(Device {
        dev_eui: "aabbccddeeff0011".into(),
        application_id: app,
        ..Default::default()
    });

    let outcome = dispatcher(&h)
        .handle(&delete("urn:device:44", "AABBCCDDEEFF0011"))
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Deleted);
    assert_eq!(
        h.control_plane.calls(),
        vec!["delete_device:aabbccddeeff0011".to_string()]
    );
}

#[tokio::test]
async fn delete_without_local_id_is_bad_input() {
    let h = harness();
    let payload = json!({ "command": "DELETE", "id": "urn:device:42" }).to_string();
    let err = dispatcher(&h).handle(payload.as_bytes()).await.unwrap_err();
    assert!(matches!(err, ConnectorError::BadInput(_)));
}

#[tokio::test]
async fn rights_and_unknown_commands_are_ignored() {
    let h = harness();
    let d = dispatcher(&h);
    for command in ["RIGHTS", "PATCH"] {
        let payload = json!({ "command": command, "id": "urn:device:42" }).to_string();
        let outcome = d.handle(payload.as_bytes()).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Ignored(_)), "{command}");
    }
    assert!(h.control_plane.calls().is_empty());
}

#[tokio::test]
async fn malformed_payload_is_bad_input() {
    let h = harness();
    let err = dispatcher(&h).handle(b"not json").await.unwrap_err();
    assert!(matches!(err, ConnectorError::BadInput(_)));
}

/// Source replaying a fixed list of messages and recording commits.
struct ReplaySource {
    pending: VecDeque<Delivery>,
    committed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ChangeEventSource for ReplaySource {
    async fn recv(&mut self) -> ConnectorResult<Option<Delivery>> {
        Ok(self.pending.pop_front())
    }

    async fn commit(&mut self, delivery: &Delivery) -> ConnectorResult<()> {
        self.committed.lock().unwrap().push(delivery.id.clone());
        Ok(())
    }
}

#[tokio::test]
async fn run_commits_every_message_and_reports_failures() {
    let h = harness();
    let failed = Arc::new(Mutex::new(Vec::<String>::new()));
    let failed_sink = failed.clone();
    let d = dispatcher(&h).with_error_handler(Arc::new(move |delivery: &Delivery, _e: &ConnectorError| {
        failed_sink.lock().unwrap().push(delivery.id.clone());
    }));

    let committed = Arc::new(Mutex::new(Vec::new()));
    let source = ReplaySource {
        pending: VecDeque::from([
            Delivery {
                id: "1-0".into(),
                payload: put("urn:device:42"),
            },
            Delivery {
                id: "2-0".into(),
                payload: b"{broken".to_vec(),
            },
            Delivery {
                id: "3-0".into(),
                payload: put("urn:device:404"),
            },
            Delivery {
                id: "4-0".into(),
                payload: delete("urn:device:42", EUI),
            },
        ]),
        committed: committed.clone(),
    };

    d.run(source, CancellationToken::new()).await;

    assert_eq!(*committed.lock().unwrap(), vec!["1-0", "2-0", "3-0", "4-0"]);
    assert_eq!(*failed.lock().unwrap(), vec!["2-0", "3-0"]);
    assert!(h.control_plane.device(EUI).is_none(), "created then deleted");
}

#[tokio::test]
async fn run_stops_when_cancelled() {
    struct Idle;

    #[async_trait]
    impl ChangeEventSource for Idle {
        async fn recv(&mut self) -> ConnectorResult<Option<Delivery>> {
            std::future::pending().await
        }

        async fn commit(&mut self, _delivery: &Delivery) -> ConnectorResult<()> {
            Ok(())
        }
    }

    let h = harness();
    let cancel = CancellationToken::new();
    cancel.cancel();
    tokio::time::timeout(
        std::time::Duration::from_secs(1),
        dispatcher(&h).run(Idle, cancel),
    )
    .await
    .expect("consumer stops on cancel");
}
