//! Entities of one connection, keyed by their numeric key, and the
//! dispatcher that routes push updates to them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, Weak};

use espapi_frame::Message;
use serde::Serialize;
use tracing::{debug, trace};

use crate::connection::Shared;
use crate::entity::{Entity, EntityInfo, EntityKind};
use crate::error::{ClientError, Result};
use crate::kinds::{BinarySensor, Camera, Climate, Cover, Fan, Light, Sensor, Switch, TextSensor};
use crate::sync::{read, write};

type KeyMap<K> = HashMap<u32, Arc<Entity<K>>>;

/// Entity maps built during enumeration.
#[derive(Default)]
pub(crate) struct Maps {
    binary_sensors: KeyMap<BinarySensor>,
    cameras: KeyMap<Camera>,
    climates: KeyMap<Climate>,
    covers: KeyMap<Cover>,
    fans: KeyMap<Fan>,
    lights: KeyMap<Light>,
    sensors: KeyMap<Sensor>,
    switches: KeyMap<Switch>,
    text_sensors: KeyMap<TextSensor>,
}

fn add<K, D>(map: &mut KeyMap<K>, description: &D, link: &Weak<Shared>)
where
    K: EntityKind,
    for<'a> &'a D: Into<EntityInfo> + Into<K::Capabilities>,
{
    let info = Into::<EntityInfo>::into(description);
    let capabilities = Into::<K::Capabilities>::into(description);
    debug!(kind = K::LABEL, key = info.key, object_id = %info.object_id, "entity");
    let entity = Entity::<K>::new(info, capabilities, Weak::clone(link));
    map.insert(entity.key(), Arc::new(entity));
}

impl Maps {
    /// Build an entity from an enumeration description.
    ///
    /// Returns `false` for messages that do not describe an entity this
    /// client models.
    pub(crate) fn insert(&mut self, description: &Message, link: &Weak<Shared>) -> bool {
        match description {
            Message::ListEntitiesBinarySensorResponse(d) => add(&mut self.binary_sensors, d, link),
            Message::ListEntitiesCoverResponse(d) => add(&mut self.covers, d, link),
            Message::ListEntitiesFanResponse(d) => add(&mut self.fans, d, link),
            Message::ListEntitiesLightResponse(d) => add(&mut self.lights, d, link),
            Message::ListEntitiesSensorResponse(d) => add(&mut self.sensors, d, link),
            Message::ListEntitiesSwitchResponse(d) => add(&mut self.switches, d, link),
            Message::ListEntitiesTextSensorResponse(d) => add(&mut self.text_sensors, d, link),
            Message::ListEntitiesClimateResponse(d) => add(&mut self.climates, d, link),
            Message::ListEntitiesCameraResponse(d) => {
                let entity = Entity::new(d.into(), (), Weak::clone(link));
                debug!(kind = Camera::LABEL, key = d.key, object_id = %d.object_id, "entity");
                self.cameras.insert(d.key, Arc::new(entity));
            }
            _ => return false,
        }
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.binary_sensors.len()
            + self.cameras.len()
            + self.climates.len()
            + self.covers.len()
            + self.fans.len()
            + self.lights.len()
            + self.sensors.len()
            + self.switches.len()
            + self.text_sensors.len()
    }
}

/// All entities of a connection.
#[derive(Default)]
pub(crate) struct Registry {
    maps: RwLock<Maps>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Swap in a freshly enumerated set of entities.
    pub(crate) fn replace(&self, maps: Maps) {
        *write(&self.maps) = maps;
    }

    pub(crate) fn snapshot(&self) -> Entities {
        fn by_unique_id<K: EntityKind>(map: &KeyMap<K>) -> BTreeMap<String, Arc<Entity<K>>> {
            map.values()
                .map(|entity| (entity.unique_id().to_string(), Arc::clone(entity)))
                .collect()
        }

        let maps = read(&self.maps);
        Entities {
            binary_sensors: by_unique_id(&maps.binary_sensors),
            cameras: by_unique_id(&maps.cameras),
            climates: by_unique_id(&maps.climates),
            covers: by_unique_id(&maps.covers),
            fans: by_unique_id(&maps.fans),
            lights: by_unique_id(&maps.lights),
            sensors: by_unique_id(&maps.sensors),
            switches: by_unique_id(&maps.switches),
            text_sensors: by_unique_id(&maps.text_sensors),
        }
    }

    /// Route a state update to its entity. Returns `false` when the key is
    /// unknown or the message is not a state update.
    pub(crate) fn dispatch(&self, message: &Message) -> bool {
        match message {
            Message::BinarySensorStateResponse(m) => {
                let entity = read(&self.maps).binary_sensors.get(&m.key).cloned();
                apply(entity, m.into(), m.missing_state)
            }
            Message::CoverStateResponse(m) => {
                let entity = read(&self.maps).covers.get(&m.key).cloned();
                apply(entity, m.into(), false)
            }
            Message::FanStateResponse(m) => {
                let entity = read(&self.maps).fans.get(&m.key).cloned();
                apply(entity, m.into(), false)
            }
            Message::LightStateResponse(m) => {
                let entity = read(&self.maps).lights.get(&m.key).cloned();
                apply(entity, m.into(), false)
            }
            Message::SensorStateResponse(m) => {
                let entity = read(&self.maps).sensors.get(&m.key).cloned();
                apply(entity, m.into(), m.missing_state)
            }
            Message::SwitchStateResponse(m) => {
                let entity = read(&self.maps).switches.get(&m.key).cloned();
                apply(entity, m.into(), false)
            }
            Message::TextSensorStateResponse(m) => {
                let entity = read(&self.maps).text_sensors.get(&m.key).cloned();
                apply(entity, m.into(), m.missing_state)
            }
            Message::ClimateStateResponse(m) => {
                let entity = read(&self.maps).climates.get(&m.key).cloned();
                apply(entity, m.into(), false)
            }
            _ => false,
        }
    }
}

fn apply<K: EntityKind>(entity: Option<Arc<Entity<K>>>, next: K::State, missing: bool) -> bool {
    match entity {
        Some(entity) => {
            trace!(kind = K::LABEL, key = entity.key(), missing, "state update");
            entity.apply(next, missing);
            true
        }
        None => false,
    }
}

/// Snapshot of a connection's entities, keyed by `unique_id`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Entities {
    pub binary_sensors: BTreeMap<String, Arc<Entity<BinarySensor>>>,
    pub cameras: BTreeMap<String, Arc<Entity<Camera>>>,
    pub climates: BTreeMap<String, Arc<Entity<Climate>>>,
    pub covers: BTreeMap<String, Arc<Entity<Cover>>>,
    pub fans: BTreeMap<String, Arc<Entity<Fan>>>,
    pub lights: BTreeMap<String, Arc<Entity<Light>>>,
    pub sensors: BTreeMap<String, Arc<Entity<Sensor>>>,
    pub switches: BTreeMap<String, Arc<Entity<Switch>>>,
    pub text_sensors: BTreeMap<String, Arc<Entity<TextSensor>>>,
}

fn by_object_id<K: EntityKind>(
    map: &BTreeMap<String, Arc<Entity<K>>>,
    object_id: &str,
) -> Result<Arc<Entity<K>>> {
    map.values()
        .find(|entity| entity.object_id() == object_id)
        .cloned()
        .ok_or_else(|| ClientError::NotFound(format!("{} '{object_id}'", K::LABEL)))
}

impl Entities {
    /// The first camera the device exposes.
    pub fn camera(&self) -> Result<Arc<Entity<Camera>>> {
        self.cameras
            .values()
            .next()
            .cloned()
            .ok_or_else(|| ClientError::NotFound("camera".to_string()))
    }

    pub fn binary_sensor(&self, object_id: &str) -> Result<Arc<Entity<BinarySensor>>> {
        by_object_id(&self.binary_sensors, object_id)
    }

    pub fn climate(&self, object_id: &str) -> Result<Arc<Entity<Climate>>> {
        by_object_id(&self.climates, object_id)
    }

    pub fn cover(&self, object_id: &str) -> Result<Arc<Entity<Cover>>> {
        by_object_id(&self.covers, object_id)
    }

    pub fn fan(&self, object_id: &str) -> Result<Arc<Entity<Fan>>> {
        by_object_id(&self.fans, object_id)
    }

    pub fn light(&self, object_id: &str) -> Result<Arc<Entity<Light>>> {
        by_object_id(&self.lights, object_id)
    }

    pub fn sensor(&self, object_id: &str) -> Result<Arc<Entity<Sensor>>> {
        by_object_id(&self.sensors, object_id)
    }

    pub fn switch(&self, object_id: &str) -> Result<Arc<Entity<Switch>>> {
        by_object_id(&self.switches, object_id)
    }

    pub fn text_sensor(&self, object_id: &str) -> Result<Arc<Entity<TextSensor>>> {
        by_object_id(&self.text_sensors, object_id)
    }

    pub fn len(&self) -> usize {
        self.binary_sensors.len()
            + self.cameras.len()
            + self.climates.len()
            + self.covers.len()
            + self.fans.len()
            + self.lights.len()
            + self.sensors.len()
            + self.switches.len()
            + self.text_sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use espapi_frame::proto;

    use super::*;
    use crate::kinds::SensorChange;

    fn sensor(key: u32, object_id: &str) -> Message {
        proto::ListEntitiesSensorResponse {
            object_id: object_id.into(),
            key,
            name: object_id.to_uppercase(),
            unique_id: format!("node-{object_id}"),
            unit_of_measurement: "°C".into(),
            ..Default::default()
        }
        .into()
    }

    fn registry_with(descriptions: &[Message]) -> Registry {
        let mut maps = Maps::default();
        for description in descriptions {
            maps.insert(description, &Weak::new());
        }
        let registry = Registry::new();
        registry.replace(maps);
        registry
    }

    #[test]
    fn insert_builds_sensors_and_ignores_services() {
        let mut maps = Maps::default();
        assert!(maps.insert(&sensor(1, "a"), &Weak::new()));
        assert!(maps.insert(&sensor(2, "b"), &Weak::new()));
        assert!(!maps.insert(
            &proto::ListEntitiesServicesResponse {
                name: "reboot".into(),
                key: 9,
                args: vec![],
            }
            .into(),
            &Weak::new()
        ));
        assert_eq!(maps.len(), 2);
    }

    #[test]
    fn snapshot_is_keyed_by_unique_id() {
        let registry = registry_with(&[sensor(1, "a"), sensor(2, "b"), sensor(3, "c")]);
        let entities = registry.snapshot();

        assert_eq!(entities.sensors.len(), 3);
        assert!(entities.sensors.contains_key("node-b"));
        assert_eq!(
            entities.sensors["node-a"].capabilities().unit_of_measurement,
            "°C"
        );
    }

    #[test]
    fn dispatch_routes_by_key_and_drops_unknown() {
        let registry = registry_with(&[sensor(1, "a")]);
        let entity = registry.snapshot().sensor("a").expect("sensor a should exist");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = entity.subscribe(move |change| sink.lock().unwrap().push(change.clone()));

        let update = |key, state| -> Message {
            proto::SensorStateResponse {
                key,
                state,
                missing_state: false,
            }
            .into()
        };

        assert!(registry.dispatch(&update(1, 0.25)));
        assert!(!registry.dispatch(&update(99, 1.0)));
        assert!(registry.dispatch(&update(1, 0.25 + 5e-7)));

        assert_eq!(*seen.lock().unwrap(), vec![SensorChange::Value(0.25)]);
        assert!(entity.is_valid());
    }

    #[test]
    fn lookups_report_not_found() {
        let registry = registry_with(&[sensor(1, "a")]);
        let entities = registry.snapshot();

        let err = entities.light("kitchen").expect_err("no lights");
        assert!(matches!(err, ClientError::NotFound(what) if what == "light 'kitchen'"));
        assert!(matches!(entities.camera(), Err(ClientError::NotFound(_))));
    }

    #[test]
    fn camera_returns_first_camera() {
        let registry = registry_with(&[proto::ListEntitiesCameraResponse {
            object_id: "cam".into(),
            key: 5,
            name: "Cam".into(),
            unique_id: "node-cam".into(),
        }
        .into()]);
        let camera = registry.snapshot().camera().expect("camera should exist");
        assert_eq!(camera.key(), 5);
    }

    #[test]
    fn snapshot_serializes() {
        let registry = registry_with(&[sensor(1, "a")]);
        let json = serde_json::to_value(registry.snapshot()).expect("snapshot should serialize");
        assert_eq!(json["sensors"]["node-a"]["name"], "A");
    }
}
