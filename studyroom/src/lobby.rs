use std::sync::Arc;

use tokio::sync::watch;

use crate::catalog::RoomCatalog;
use crate::model::{PresenceEntry, Room};
use crate::panel::{Panel, PanelTx};
use crate::presence::PresenceRegistry;
use crate::subscription::Subscription;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomOccupancy {
    pub room: Room,
    pub online: usize,
}

/// Online count for every catalog room, in catalog order.
pub fn occupancy(catalog: &RoomCatalog, all: &[PresenceEntry]) -> Vec<RoomOccupancy> {
    catalog
        .iter()
        .map(|room| RoomOccupancy {
            room: room.clone(),
            online: all.iter().filter(|e| e.room_id == room.id).count(),
        })
        .collect()
}

/// Room overview shown before entering a room.
pub struct Lobby {
    panel: watch::Receiver<Panel<RoomOccupancy>>,
    sub: Subscription,
}

impl Lobby {
    pub fn open(registry: &PresenceRegistry, catalog: Arc<RoomCatalog>) -> Self {
        let (tx, panel) = PanelTx::channel();
        let on_error = tx.clone();
        let sub = registry.subscribe_all(
            move |all| tx.items(occupancy(&catalog, &all)),
            move |err| on_error.error(err),
        );
        Self { panel, sub }
    }

    pub fn panel(&self) -> watch::Receiver<Panel<RoomOccupancy>> {
        self.panel.clone()
    }

    pub fn snapshot(&self) -> Panel<RoomOccupancy> {
        self.panel.borrow().clone()
    }

    pub fn close(&self) -> bool {
        self.sub.unsubscribe()
    }
}
