//! Process-wide container registry: id to record, name to id, plus the
//! id/name reservations taken before a record exists and the set of
//! containers currently owned by the garbage collector.
//!
//! Every map sits behind its own mutex; none of them is ever taken while
//! holding a record lock.

use super::Container;
use crate::error::{EngineError, Result};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

#[derive(Default)]
pub struct ContainerStore {
    containers: Mutex<HashMap<String, Arc<Container>>>,
    names: Mutex<HashMap<String, String>>,
    reserved: Mutex<HashSet<String>>,
    gc: Mutex<HashSet<String>>,
}

impl ContainerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an id and a name before the record exists, guaranteeing global
    /// uniqueness for both.
    pub fn reserve_id_name(&self, id: &str, name: &str) -> Result<()> {
        let mut reserved = self.reserved.lock().expect("reserved lock");
        if reserved.contains(id) || self.containers.lock().expect("store lock").contains_key(id) {
            return Err(EngineError::AlreadyExists(format!("container id {}", id)));
        }
        if reserved.contains(name) || self.names.lock().expect("name lock").contains_key(name) {
            return Err(EngineError::AlreadyExists(format!("container name {}", name)));
        }
        reserved.insert(id.to_string());
        reserved.insert(name.to_string());
        Ok(())
    }

    /// Release a previously reserved id and name.
    pub fn release_id_name(&self, id: &str, name: &str) -> bool {
        let mut reserved = self.reserved.lock().expect("reserved lock");
        let had_id = reserved.remove(id);
        let had_name = reserved.remove(name);
        had_id && had_name
    }

    /// Insert a record into the store and the name index.
    pub fn add(&self, container: Arc<Container>) -> Result<()> {
        let mut containers = self.containers.lock().expect("store lock");
        let mut names = self.names.lock().expect("name lock");
        if containers.contains_key(container.id()) {
            return Err(EngineError::AlreadyExists(format!(
                "container id {}",
                container.id()
            )));
        }
        if names.contains_key(container.name()) {
            return Err(EngineError::AlreadyExists(format!(
                "container name {}",
                container.name()
            )));
        }
        names.insert(container.name().to_string(), container.id().to_string());
        containers.insert(container.id().to_string(), container);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Container>> {
        self.containers.lock().expect("store lock").get(id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Container>> {
        let id = self.names.lock().expect("name lock").get(name).cloned()?;
        self.get(&id)
    }

    /// Resolve an exact id first, then a name.
    pub fn resolve(&self, id_or_name: &str) -> Option<Arc<Container>> {
        self.get(id_or_name).or_else(|| self.get_by_name(id_or_name))
    }

    pub fn list(&self) -> Vec<Arc<Container>> {
        self.containers
            .lock()
            .expect("store lock")
            .values()
            .cloned()
            .collect()
    }

    /// Evict a record. The name index entry is removed separately so the
    /// delete pipeline controls the order of deregistration.
    pub fn remove(&self, id: &str) -> bool {
        self.containers
            .lock()
            .expect("store lock")
            .remove(id)
            .is_some()
    }

    pub fn name_index_remove(&self, name: &str) -> bool {
        self.names.lock().expect("name lock").remove(name).is_some()
    }

    /// Mark a container as owned by the garbage collector.
    pub fn set_gc_in_progress(&self, id: &str) {
        self.gc.lock().expect("gc lock").insert(id.to_string());
    }

    pub fn clear_gc_in_progress(&self, id: &str) {
        self.gc.lock().expect("gc lock").remove(id);
    }

    pub fn is_in_gc_progress(&self, id: &str) -> bool {
        self.gc.lock().expect("gc lock").contains(id)
    }
}
