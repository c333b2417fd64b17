use std::collections::HashSet;

use anyhow::{bail, Result};
use store_api::is_valid_key;

use crate::model::Room;

/// Fixed set of rooms users can join, supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomCatalog {
    rooms: Vec<Room>,
}

impl RoomCatalog {
    /// Catalog from configured rooms. Ids must be unique usable store keys.
    pub fn new(rooms: Vec<Room>) -> Result<Self> {
        if rooms.is_empty() {
            bail!("empty_catalog");
        }
        let mut seen = HashSet::new();
        for r in &rooms {
            if !is_valid_key(&r.id) {
                bail!("invalid_room_id: {:?}", r.id);
            }
            if !seen.insert(r.id.as_str()) {
                bail!("duplicate_room_id: {}", r.id);
            }
        }
        Ok(Self { rooms })
    }

    pub fn get(&self, id: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.iter()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
