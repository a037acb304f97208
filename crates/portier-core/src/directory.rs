// ── Device directory ──
//
// Static lookup tables built once from the registry configuration:
// controller id -> transport target, door name <-> (controller, door).

use std::collections::{BTreeMap, BTreeSet};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use portier_api::{Controller, DEFAULT_PORT, Protocol};

use crate::config::{ControllerConfig, RegistryConfig};
use crate::error::CoreError;

/// A door resolved to its physical location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DoorRef {
    pub controller: u32,
    pub door: u8,
}

/// Immutable view of the configured fleet.
#[derive(Debug, Clone)]
pub struct Directory {
    controllers: BTreeMap<u32, ControllerConfig>,
    doors: BTreeMap<String, DoorRef>,
    door_names: BTreeMap<DoorRef, String>,
    cards: BTreeSet<u32>,
    default_timeout: Duration,
}

impl Directory {
    /// Build and validate the directory.
    ///
    /// Rejects door numbers outside 1-4, duplicate door names, two names
    /// for the same relay, and doors on unconfigured controllers.
    pub fn new(config: &RegistryConfig) -> Result<Self, CoreError> {
        let controllers: BTreeMap<u32, ControllerConfig> = config
            .controllers
            .iter()
            .map(|c| (c.id, c.clone()))
            .collect();

        let mut doors = BTreeMap::new();
        let mut door_names = BTreeMap::new();
        for door in &config.doors {
            if !(1..=4).contains(&door.door) {
                return Err(CoreError::InvalidDoor {
                    controller: door.controller,
                    door: door.door,
                });
            }
            if !controllers.contains_key(&door.controller) {
                return Err(CoreError::Config {
                    message: format!(
                        "door '{}' references unknown controller {}",
                        door.name, door.controller
                    ),
                });
            }
            let location = DoorRef {
                controller: door.controller,
                door: door.door,
            };
            if doors.insert(door.name.clone(), location).is_some() {
                return Err(CoreError::Config {
                    message: format!("duplicate door name '{}'", door.name),
                });
            }
            if let Some(other) = door_names.insert(location, door.name.clone()) {
                return Err(CoreError::Config {
                    message: format!(
                        "doors '{other}' and '{}' both map to controller {} door {}",
                        door.name, door.controller, door.door
                    ),
                });
            }
        }

        Ok(Self {
            controllers,
            doors,
            door_names,
            cards: config.cards.iter().copied().collect(),
            default_timeout: config.default_timeout,
        })
    }

    /// Transport target for `id`. Unconfigured controllers are reached by
    /// broadcast.
    pub fn resolve(&self, id: u32) -> Controller {
        match self.controllers.get(&id) {
            Some(c) => Controller {
                id,
                address: c
                    .address
                    .unwrap_or_else(|| SocketAddrV4::new(Ipv4Addr::BROADCAST, DEFAULT_PORT)),
                protocol: if c.address.is_some() {
                    c.protocol
                } else {
                    Protocol::Udp
                },
                timeout: c.timeout.unwrap_or(self.default_timeout),
            },
            None => Controller {
                timeout: self.default_timeout,
                ..Controller::broadcast(id)
            },
        }
    }

    pub fn controller_ids(&self) -> Vec<u32> {
        self.controllers.keys().copied().collect()
    }

    pub fn door(&self, name: &str) -> Option<DoorRef> {
        self.doors.get(name).copied()
    }

    pub fn door_name(&self, controller: u32, door: u8) -> Option<&str> {
        self.door_names
            .get(&DoorRef { controller, door })
            .map(String::as_str)
    }

    pub fn door_names(&self) -> Vec<String> {
        self.doors.keys().cloned().collect()
    }

    /// Doors configured on one controller, in door order.
    pub fn doors_on(&self, controller: u32) -> Vec<(u8, &str)> {
        self.door_names
            .range(
                DoorRef {
                    controller,
                    door: 0,
                }..=DoorRef {
                    controller,
                    door: u8::MAX,
                },
            )
            .map(|(r, name)| (r.door, name.as_str()))
            .collect()
    }

    pub fn cards(&self) -> Vec<u32> {
        self.cards.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DoorConfig;
    use pretty_assertions::assert_eq;

    fn config() -> RegistryConfig {
        RegistryConfig {
            controllers: vec![
                ControllerConfig {
                    id: 405_419_896,
                    address: Some("192.168.1.100:60000".parse().expect("address")),
                    protocol: Protocol::Tcp,
                    timeout: Some(Duration::from_millis(750)),
                },
                ControllerConfig::new(303_986_753),
            ],
            doors: vec![
                DoorConfig {
                    name: "Great Hall".into(),
                    controller: 405_419_896,
                    door: 1,
                },
                DoorConfig {
                    name: "Kitchen".into(),
                    controller: 405_419_896,
                    door: 3,
                },
                DoorConfig {
                    name: "Gryffindor".into(),
                    controller: 303_986_753,
                    door: 2,
                },
            ],
            cards: vec![10_058_400, 10_058_400, 10_058_401],
            ..RegistryConfig::default()
        }
    }

    #[test]
    fn resolves_configured_controller() {
        let dir = Directory::new(&config()).expect("valid config");
        let c = dir.resolve(405_419_896);
        assert_eq!(c.address.to_string(), "192.168.1.100:60000");
        assert_eq!(c.protocol, Protocol::Tcp);
        assert_eq!(c.timeout, Duration::from_millis(750));
    }

    #[test]
    fn unaddressed_controller_falls_back_to_broadcast() {
        let dir = Directory::new(&config()).expect("valid config");
        let c = dir.resolve(303_986_753);
        assert!(c.is_broadcast());
        assert_eq!(c.protocol, Protocol::Udp);

        let unknown = dir.resolve(1);
        assert!(unknown.is_broadcast());
        assert_eq!(unknown.timeout, portier_api::DEFAULT_TIMEOUT);
    }

    #[test]
    fn door_lookups_work_both_ways() {
        let dir = Directory::new(&config()).expect("valid config");
        assert_eq!(
            dir.door("Kitchen"),
            Some(DoorRef {
                controller: 405_419_896,
                door: 3
            })
        );
        assert_eq!(dir.door_name(303_986_753, 2), Some("Gryffindor"));
        assert_eq!(dir.door_name(303_986_753, 1), None);
        assert_eq!(dir.doors_on(405_419_896), vec![(1, "Great Hall"), (3, "Kitchen")]);
        assert_eq!(dir.cards(), vec![10_058_400, 10_058_401]);
    }

    #[test]
    fn rejects_door_out_of_range() {
        let mut cfg = config();
        cfg.doors[0].door = 5;
        assert!(matches!(
            Directory::new(&cfg),
            Err(CoreError::InvalidDoor { door: 5, .. })
        ));
    }

    #[test]
    fn rejects_duplicate_names_and_unknown_controllers() {
        let mut dup = config();
        dup.doors[1].name = "Great Hall".into();
        assert!(matches!(Directory::new(&dup), Err(CoreError::Config { .. })));

        let mut orphan = config();
        orphan.doors[2].controller = 1;
        assert!(matches!(Directory::new(&orphan), Err(CoreError::Config { .. })));
    }
}
