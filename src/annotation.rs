use crate::config::Tag;

use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

pub const BOTTLE: &str = "bottle";
pub const LIFECYCLE: &str = "bottle_lifecycle";
pub const SCENARIO: &str = "bottle_scenario";
pub const SHIP: &str = "bottle_ship";

/// Custom tags cannot override these keys.
const RESERVED: [&str; 2] = [BOTTLE, LIFECYCLE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Active,
    Terminated,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Active => "active",
            Phase::Terminated => "terminated",
        }
    }
}

/// Attributes attached to one IP address in the inventory.
/// Only ever built to be sent: nothing is kept locally.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Annotation {
    pub ip: String,
    pub attributes: BTreeMap<String, String>,
}

impl Annotation {
    fn with_phase(phase: Phase) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(LIFECYCLE.to_string(), phase.as_str().to_string());
        Annotation {
            ip: String::new(),
            attributes,
        }
    }

    /// Document posted once the process is registered.
    pub fn on_setup(scenario: &str, ship: &str, tags: &[Tag]) -> Self {
        let mut annotation = Annotation::with_phase(Phase::Active);
        let attributes = &mut annotation.attributes;
        attributes.insert(BOTTLE.to_string(), "true".to_string());
        attributes.insert(SCENARIO.to_string(), scenario.to_string());
        attributes.insert(SHIP.to_string(), ship.to_string());
        for tag in tags {
            if RESERVED.contains(&tag.key.as_str()) {
                log::warn!("custom tag {} would override a lifecycle tag, ignored", tag.key);
                continue;
            }
            log::info!("creating custom tag({}={})", tag.key, tag.value);
            attributes.insert(tag.key.clone(), tag.value.clone());
        }
        annotation
    }

    /// Document posted during teardown.
    pub fn on_teardown() -> Self {
        Annotation::with_phase(Phase::Terminated)
    }

    pub fn for_ip(&self, ip: Ipv4Addr) -> Self {
        Annotation {
            ip: ip.to_string(),
            attributes: self.attributes.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }
}
