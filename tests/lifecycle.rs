use ship::annotation::{Annotation, LIFECYCLE};
use ship::config::Registration;
use ship::credentials::Credentials;
use ship::inventory::{HttpInventory, Inventory, InventoryError};
use ship::lifecycle::{
    self, AnnotationSettings, LifecycleController, LifecycleError, LifecycleState, Teardown,
};
use ship::sensor::{Discovery, SensorError, SensorIdentity};

use crossbeam_channel::bounded;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

#[derive(Default)]
struct Calls {
    annotations: Mutex<Vec<Annotation>>,
    deletions: Mutex<Vec<String>>,
}

struct FakeInventory {
    calls: Arc<Calls>,
    delete_status: Option<u16>,
}

impl Inventory for FakeInventory {
    fn probe(&self) -> Result<(), InventoryError> {
        Ok(())
    }

    fn annotate(&self, _: &str, annotation: &Annotation) -> Result<(), InventoryError> {
        self.calls
            .annotations
            .lock()
            .unwrap()
            .push(annotation.clone());
        Ok(())
    }

    fn delete_sensor(&self, id: &str) -> Result<(), InventoryError> {
        // widen the window between concurrent teardowns
        thread::sleep(Duration::from_millis(20));
        self.calls.deletions.lock().unwrap().push(id.to_string());
        match self.delete_status {
            None => Ok(()),
            Some(204) => Err(InventoryError::NoContent),
            Some(status) => Err(InventoryError::Status {
                status,
                body: "boom".into(),
            }),
        }
    }
}

fn addresses() -> Vec<Ipv4Addr> {
    vec![Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 1, 5)]
}

fn active_controller(delete_status: Option<u16>) -> (Arc<LifecycleController>, Arc<Calls>) {
    let calls = Arc::new(Calls::default());
    let controller = Arc::new(LifecycleController::new(
        AnnotationSettings {
            scope: "Default".into(),
            scenario: "demo".into(),
            ship: "ship-A".into(),
            tags: vec![],
        },
        Box::new(addresses),
    ));
    controller.begin_registration().unwrap();
    controller
        .bind(
            Some(SensorIdentity::new("abc", "https://inventory")),
            Box::new(FakeInventory {
                calls: Arc::clone(&calls),
                delete_status,
            }),
        )
        .unwrap();
    assert_eq!(controller.activate().unwrap(), 2);
    (controller, calls)
}

fn terminated(calls: &Calls) -> Vec<String> {
    calls
        .annotations
        .lock()
        .unwrap()
        .iter()
        .filter(|a| a.get(LIFECYCLE) == Some("terminated"))
        .map(|a| a.ip.clone())
        .collect()
}

#[test]
fn concurrent_teardown_runs_once() {
    let (controller, calls) = active_controller(None);
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let controller = Arc::clone(&controller);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                controller.terminate().unwrap()
            })
        })
        .collect();
    let outcomes: Vec<Teardown> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(
        outcomes.iter().filter(|o| **o == Teardown::Completed).count(),
        1
    );
    assert_eq!(*calls.deletions.lock().unwrap(), vec!["abc".to_string()]);
    assert_eq!(terminated(&calls), vec!["10.0.0.5", "10.0.1.5"]);
    assert_eq!(controller.state(), LifecycleState::Deregistered);
}

#[test]
fn two_signals_one_teardown() {
    let (controller, calls) = active_controller(Some(204));
    let (tx, rx) = bounded::<()>(1);
    tx.try_send(()).unwrap();
    // the second signal finds the channel full
    assert!(tx.try_send(()).is_err());

    assert_eq!(lifecycle::wait_for_teardown(&rx, &controller), 0);
    assert_eq!(controller.terminate().unwrap(), Teardown::Skipped);
    assert_eq!(calls.deletions.lock().unwrap().len(), 1);
    assert_eq!(terminated(&calls).len(), 2);
}

#[test]
fn failed_deregistration_exits_with_error() {
    let (controller, calls) = active_controller(Some(500));
    let (tx, rx) = bounded::<()>(1);
    tx.send(()).unwrap();
    assert_eq!(lifecycle::wait_for_teardown(&rx, &controller), 1);
    // annotations were still posted before the failure
    assert_eq!(terminated(&calls).len(), 2);
}

#[test]
fn missing_sensor_id_aborts_registration() {
    let dir = tempdir().unwrap();
    let controller = LifecycleController::new(AnnotationSettings::default(), Box::new(addresses));
    let registration = Registration::Sensor {
        sensor_id_path: dir.path().join("sensor_id"),
        site_config_path: dir.path().join("site.cfg"),
    };
    let discovery = Discovery {
        attempts: 3,
        delay: Duration::from_millis(1),
    };
    let result = lifecycle::register(
        &controller,
        &registration,
        &discovery,
        Credentials::new("key", "secret"),
    );
    assert!(matches!(
        result,
        Err(LifecycleError::Sensor(SensorError::NotFound { attempts: 3, .. }))
    ));
}

/// A minimal HTTP service answering every request with the next status of `statuses`.
/// Returns its URL and the received request lines.
fn fake_service(statuses: Vec<u16>) -> (String, thread::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let mut requests = Vec::new();
        for status in statuses {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut content_length = 0;
            let mut has_signature = false;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                let header = header.trim_end();
                if header.is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    match name.to_ascii_lowercase().as_str() {
                        "content-length" => content_length = value.trim().parse().unwrap(),
                        "authorization" => has_signature = !value.trim().is_empty(),
                        _ => (),
                    }
                }
            }
            assert!(has_signature, "unsigned request: {request_line}");
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();
            let response = match status {
                204 => "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".to_string(),
                s => format!(
                    "HTTP/1.1 {s} Status\r\nContent-Length: 2\r\nConnection: close\r\n\r\n[]"
                ),
            };
            reader.get_mut().write_all(response.as_bytes()).unwrap();
            requests.push(request_line.trim_end().to_string());
        }
        requests
    });
    (url, handle)
}

#[test]
fn external_registration_over_http() {
    // probe, one annotation per address, then the teardown annotations
    let (url, service) = fake_service(vec![200, 200, 200, 200, 200]);
    let controller = LifecycleController::new(
        AnnotationSettings {
            scope: "Default".into(),
            ..Default::default()
        },
        Box::new(addresses),
    );
    lifecycle::register(
        &controller,
        &Registration::External { url },
        &Discovery::default(),
        Credentials::new("key", "secret"),
    )
    .unwrap();
    assert_eq!(controller.activate().unwrap(), 2);
    assert_eq!(controller.terminate().unwrap(), Teardown::Completed);

    let requests = service.join().unwrap();
    assert_eq!(requests[0], "GET /openapi/v1/sensors HTTP/1.1");
    assert!(requests[1..]
        .iter()
        .all(|r| r == "POST /openapi/v1/inventory/tags/Default HTTP/1.1"));
    assert_eq!(requests.len(), 5);
}

#[test]
fn deleted_sensor_answering_no_content() {
    let (url, service) = fake_service(vec![204]);
    let inventory = HttpInventory::new(&url, Credentials::new("key", "secret")).unwrap();
    let err = inventory.delete_sensor("abc").unwrap_err();
    assert!(err.is_already_removed());
    assert_eq!(service.join().unwrap(), vec!["DELETE /openapi/v1/sensors/abc HTTP/1.1"]);
}
