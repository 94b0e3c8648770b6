//! Registration of this process with the inventory service, for its whole lifetime.
//!
//! ```text
//! Unregistered -> Registering -> Active -> Terminating -> Deregistered
//! ```
//!
//! The state can be read by any thread. Teardown is guarded by a single compare-and-swap, so
//! that it runs at most once whatever the number of termination signals.

use crate::annotation::Annotation;
use crate::config::{Registration, Tag};
use crate::credentials::Credentials;
use crate::inventory::{HttpInventory, Inventory, InventoryError};
use crate::netif::AddressSource;
use crate::sensor::{Discovery, SensorError, SensorIdentity};

use crossbeam_channel::{bounded, Receiver};
use std::io;
use std::process;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use thiserror::Error;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unregistered = 0,
    Registering = 1,
    Active = 2,
    Terminating = 3,
    /// Final state, once the teardown completed
    Deregistered = 4,
}

impl From<u8> for LifecycleState {
    fn from(value: u8) -> Self {
        match value {
            0 => LifecycleState::Unregistered,
            1 => LifecycleState::Registering,
            2 => LifecycleState::Active,
            3 => LifecycleState::Terminating,
            _ => LifecycleState::Deregistered,
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error("could not create the inventory client: {0}")]
    Client(#[source] InventoryError),
    #[error("failed reading sw agents (check provided API key has correct privilege) error={0}")]
    Probe(#[source] InventoryError),
    #[error("failed to unregister sensor {id}, error={source}")]
    Deregister { id: String, source: InventoryError },
    #[error("could not install the signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("could not start the teardown thread: {0}")]
    Spawn(#[from] io::Error),
    #[error("invalid lifecycle transition from {from:?} to {to:?}")]
    Transition {
        from: LifecycleState,
        to: LifecycleState,
    },
    #[error("the inventory service is not bound yet")]
    Unbound,
    /// A teardown started while the addresses were being annotated
    #[error("activation interrupted by a termination signal")]
    Interrupted,
}

/// What a call to [`LifecycleController::terminate`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    Completed,
    /// Another teardown already started, or there was nothing registered
    Skipped,
}

/// Values put in the annotations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationSettings {
    pub scope: String,
    pub scenario: String,
    pub ship: String,
    pub tags: Vec<Tag>,
}

pub struct LifecycleController {
    state: AtomicU8,
    settings: AnnotationSettings,
    addresses: Box<dyn AddressSource>,
    identity: OnceLock<Option<SensorIdentity>>,
    inventory: OnceLock<Box<dyn Inventory>>,
}

impl LifecycleController {
    pub fn new(settings: AnnotationSettings, addresses: Box<dyn AddressSource>) -> Self {
        LifecycleController {
            state: AtomicU8::new(LifecycleState::Unregistered as u8),
            settings,
            addresses,
            identity: OnceLock::new(),
            inventory: OnceLock::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<(), LifecycleError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|current| LifecycleError::Transition {
                from: LifecycleState::from(current),
                to,
            })
    }

    pub fn identity(&self) -> Option<&SensorIdentity> {
        self.identity.get().and_then(Option::as_ref)
    }

    pub fn begin_registration(&self) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::Unregistered, LifecycleState::Registering)
    }

    /// Attaches the sensor identity (none when there is no local sensor) and the inventory
    /// client, after checking the client can reach the service.
    pub fn bind(
        &self,
        identity: Option<SensorIdentity>,
        inventory: Box<dyn Inventory>,
    ) -> Result<(), LifecycleError> {
        let state = self.state();
        if state != LifecycleState::Registering {
            return Err(LifecycleError::Transition {
                from: state,
                to: LifecycleState::Registering,
            });
        }
        inventory.probe().map_err(LifecycleError::Probe)?;
        self.identity
            .set(identity)
            .map_err(|_| LifecycleError::Transition {
                from: state,
                to: LifecycleState::Registering,
            })?;
        let _ = self.inventory.set(inventory);
        Ok(())
    }

    /// Annotates every local address as active. Failures for a single address are only logged.
    /// Returns the number of annotated addresses, or `Interrupted` when a teardown started in the
    /// meantime: nothing else may start then.
    pub fn activate(&self) -> Result<usize, LifecycleError> {
        let state = self.state();
        if state != LifecycleState::Registering {
            return Err(LifecycleError::Transition {
                from: state,
                to: LifecycleState::Active,
            });
        }
        if self.inventory.get().is_none() {
            return Err(LifecycleError::Unbound);
        }
        let s = &self.settings;
        let annotated = self.annotate_all(&Annotation::on_setup(&s.scenario, &s.ship, &s.tags));
        if let Err(e) = self.transition(LifecycleState::Registering, LifecycleState::Active) {
            log::warn!("activation interrupted: {e}");
            return Err(LifecycleError::Interrupted);
        }
        Ok(annotated)
    }

    /// Annotates every local address as terminated, then deregisters the sensor. Only the first
    /// call does anything.
    pub fn terminate(&self) -> Result<Teardown, LifecycleError> {
        let started = self
            .transition(LifecycleState::Active, LifecycleState::Terminating)
            .or_else(|_| self.transition(LifecycleState::Registering, LifecycleState::Terminating));
        if started.is_err() {
            log::info!("teardown skipped in state {:?}", self.state());
            return Ok(Teardown::Skipped);
        }

        log::info!("finishing!");
        let annotated = self.annotate_all(&Annotation::on_teardown());
        log::info!("removed annotations ({annotated} addresses)");

        if let (Some(identity), Some(inventory)) = (self.identity(), self.inventory.get()) {
            match inventory.delete_sensor(identity.id()) {
                Ok(()) => log::info!("sensor unregistered"),
                Err(e) if e.is_already_removed() => {
                    log::info!("sensor {} was already unregistered", identity.id())
                }
                Err(source) => {
                    return Err(LifecycleError::Deregister {
                        id: identity.id().to_string(),
                        source,
                    })
                }
            }
        }
        self.state
            .store(LifecycleState::Deregistered as u8, Ordering::Release);
        Ok(Teardown::Completed)
    }

    fn annotate_all(&self, document: &Annotation) -> usize {
        let Some(inventory) = self.inventory.get() else {
            return 0;
        };
        let addresses = self.addresses.addresses();
        if addresses.is_empty() {
            log::warn!("no local IPv4 address to annotate");
        }
        let mut saved = 0;
        for ip in addresses {
            match inventory.annotate(&self.settings.scope, &document.for_ip(ip)) {
                Ok(()) => {
                    saved += 1;
                    log::info!("annotations saved to cluster (ip={ip})");
                }
                Err(e) => log::warn!("could not post annotation (ip={ip}) error={e}"),
            }
        }
        saved
    }
}

/// Finds the inventory service (and the sensor identity in sensor mode), then binds the
/// controller to it.
pub fn register(
    controller: &LifecycleController,
    registration: &Registration,
    discovery: &Discovery,
    credentials: Credentials,
) -> Result<(), LifecycleError> {
    controller.begin_registration()?;
    let (identity, url) = match registration {
        Registration::Sensor {
            sensor_id_path,
            site_config_path,
        } => {
            let identity = SensorIdentity::discover(sensor_id_path, site_config_path, discovery)?;
            let url = identity.base_url().to_string();
            (Some(identity), url)
        }
        Registration::External { url } => {
            log::info!("no sensor will be utilised");
            (None, url.clone())
        }
    };
    log::info!("inventory service at {url}");
    let inventory = HttpInventory::new(&url, credentials).map_err(LifecycleError::Client)?;
    controller.bind(identity, Box::new(inventory))
}

/// Installs the process signal handler (interrupt and termination) and starts the thread that
/// performs the teardown on the first signal, then exits the process.
/// Can only succeed once per process.
pub fn install_signal_handler(
    controller: Arc<LifecycleController>,
) -> Result<thread::JoinHandle<()>, LifecycleError> {
    let (tx, rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        log::warn!("termination signal received");
        // a full channel means a teardown is already pending
        let _ = tx.try_send(());
    })?;
    let handle = thread::Builder::new()
        .name("teardown".into())
        .spawn(move || {
            log::info!("sensor cleanup function registered");
            let code = wait_for_teardown(&rx, &controller);
            log::info!("process will terminate now");
            process::exit(code);
        })?;
    Ok(handle)
}

/// Waits for the first signal and tears down. Returns the exit code of the process.
pub fn wait_for_teardown(signals: &Receiver<()>, controller: &LifecycleController) -> i32 {
    if signals.recv().is_err() {
        log::warn!("signal channel closed, no teardown");
        return 1;
    }
    match controller.terminate() {
        Ok(_) => 0,
        Err(e) => {
            log::error!("{e}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::LIFECYCLE;
    use crossbeam_channel::Sender;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

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
            self.calls.annotations.lock().unwrap().push(annotation.clone());
            Ok(())
        }

        fn delete_sensor(&self, id: &str) -> Result<(), InventoryError> {
            self.calls.deletions.lock().unwrap().push(id.to_string());
            match self.delete_status {
                None => Ok(()),
                Some(204) => Err(InventoryError::NoContent),
                Some(status) => Err(InventoryError::Status {
                    status,
                    body: String::new(),
                }),
            }
        }
    }

    fn controller(delete_status: Option<u16>) -> (LifecycleController, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let c = LifecycleController::new(
            AnnotationSettings::default(),
            Box::new(|| vec![Ipv4Addr::new(10, 0, 0, 5)]),
        );
        c.begin_registration().unwrap();
        c.bind(
            Some(SensorIdentity::new("abc", "https://inventory")),
            Box::new(FakeInventory {
                calls: Arc::clone(&calls),
                delete_status,
            }),
        )
        .unwrap();
        (c, calls)
    }

    #[test]
    fn test_state_sequence() {
        let (c, calls) = controller(None);
        assert_eq!(c.state(), LifecycleState::Registering);
        assert_eq!(c.activate().unwrap(), 1);
        assert_eq!(c.state(), LifecycleState::Active);
        assert_eq!(c.terminate().unwrap(), Teardown::Completed);
        assert_eq!(c.state(), LifecycleState::Deregistered);
        assert_eq!(c.terminate().unwrap(), Teardown::Skipped);
        let annotations = calls.annotations.lock().unwrap();
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].get(LIFECYCLE), Some("active"));
        assert_eq!(annotations[1].get(LIFECYCLE), Some("terminated"));
        assert_eq!(*calls.deletions.lock().unwrap(), vec!["abc".to_string()]);
    }

    #[test]
    fn test_invalid_transitions() {
        let c = LifecycleController::new(AnnotationSettings::default(), Box::new(Vec::<Ipv4Addr>::new));
        assert!(matches!(
            c.activate(),
            Err(LifecycleError::Transition { .. })
        ));
        assert_eq!(c.terminate().unwrap(), Teardown::Skipped);
        c.begin_registration().unwrap();
        assert!(matches!(c.activate(), Err(LifecycleError::Unbound)));
        assert!(c.begin_registration().is_err());
    }

    /// Blocks the first annotation until released
    struct GatedInventory {
        gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
    }

    impl Inventory for GatedInventory {
        fn probe(&self) -> Result<(), InventoryError> {
            Ok(())
        }

        fn annotate(&self, _: &str, _: &Annotation) -> Result<(), InventoryError> {
            let gate = self.gate.lock().unwrap().take();
            if let Some((entered, release)) = gate {
                entered.send(()).unwrap();
                release.recv().unwrap();
            }
            Ok(())
        }

        fn delete_sensor(&self, _: &str) -> Result<(), InventoryError> {
            Ok(())
        }
    }

    #[test]
    fn test_teardown_during_activation() {
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let c = Arc::new(LifecycleController::new(
            AnnotationSettings::default(),
            Box::new(|| vec![Ipv4Addr::new(10, 0, 0, 5)]),
        ));
        c.begin_registration().unwrap();
        c.bind(
            None,
            Box::new(GatedInventory {
                gate: Mutex::new(Some((entered_tx, release_rx))),
            }),
        )
        .unwrap();

        let activating = {
            let c = Arc::clone(&c);
            thread::spawn(move || c.activate())
        };
        entered_rx.recv().unwrap();
        assert_eq!(c.terminate().unwrap(), Teardown::Completed);
        release_tx.send(()).unwrap();

        assert!(matches!(
            activating.join().unwrap(),
            Err(LifecycleError::Interrupted)
        ));
        assert_eq!(c.state(), LifecycleState::Deregistered);
    }

    #[test]
    fn test_already_removed_is_success() {
        let (c, _) = controller(Some(204));
        c.activate().unwrap();
        assert_eq!(c.terminate().unwrap(), Teardown::Completed);
        assert_eq!(c.state(), LifecycleState::Deregistered);
    }

    #[test]
    fn test_deregistration_failure() {
        let (c, _) = controller(Some(500));
        c.activate().unwrap();
        assert!(matches!(
            c.terminate(),
            Err(LifecycleError::Deregister { .. })
        ));
        assert_eq!(c.state(), LifecycleState::Terminating);
    }

    #[test]
    fn test_state_from_u8() {
        for s in [
            LifecycleState::Unregistered,
            LifecycleState::Registering,
            LifecycleState::Active,
            LifecycleState::Terminating,
            LifecycleState::Deregistered,
        ] {
            assert_eq!(LifecycleState::from(s as u8), s);
        }
    }
}
