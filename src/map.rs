//! Client-side store of live protocol objects.
//!
//! Ids are allocated client-side from the low namespace; the compositor
//! owns the range above [`SERVER_ID_BASE`], which this client never
//! populates. A destroyed object stays in the store as a dead entry
//! until the display confirms the destruction with `delete_id`, so that
//! events already in flight toward it can still be sized and discarded.

use crate::protocol::Interface;

/// First object id in the compositor-allocated range.
pub const SERVER_ID_BASE: u32 = 0xFF00_0000;

/// Id of the display object, implicitly bound at connect time.
pub const DISPLAY_ID: u32 = 1;

/// Dispatch tag: which handler set an object's events are routed to.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Role {
    Display,
    SyncCallback,
    Registry,
    Compositor,
    Surface,
    WmBase,
    XdgSurface,
    Toplevel,
    Seat,
    Pointer,
    Shm,
    ShmPool,
    Buffer,
}

/// A live (or dying) protocol object.
#[derive(Copy, Clone, Debug)]
pub struct ObjectSlot {
    pub interface: &'static Interface,
    pub version: u32,
    pub role: Role,
    /// Cleared once a destructor request has been sent; the slot then
    /// lingers until the display's `delete_id`.
    pub alive: bool,
}

/// Object id → slot store with first-free-slot id reuse.
#[derive(Debug, Default)]
pub struct ObjectMap {
    slots: Vec<Option<ObjectSlot>>,
}

impl ObjectMap {
    pub fn new() -> ObjectMap {
        ObjectMap { slots: Vec::new() }
    }

    pub fn find(&self, id: u32) -> Option<&ObjectSlot> {
        if id == 0 || id >= SERVER_ID_BASE {
            return None;
        }
        self.slots.get((id - 1) as usize).and_then(|slot| slot.as_ref())
    }

    pub fn find_mut(&mut self, id: u32) -> Option<&mut ObjectSlot> {
        if id == 0 || id >= SERVER_ID_BASE {
            return None;
        }
        self.slots.get_mut((id - 1) as usize).and_then(|slot| slot.as_mut())
    }

    /// Insert a new object at the lowest free id and return that id.
    pub fn insert_new(&mut self, interface: &'static Interface, version: u32, role: Role) -> u32 {
        let slot = ObjectSlot { interface, version, role, alive: true };
        match self.slots.iter().position(|s| s.is_none()) {
            Some(index) => {
                self.slots[index] = Some(slot);
                index as u32 + 1
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() as u32
            }
        }
    }

    /// Flag an object as locally destroyed, keeping the slot resolvable.
    pub fn mark_dead(&mut self, id: u32) {
        if let Some(slot) = self.find_mut(id) {
            slot.alive = false;
        }
    }

    /// Drop an object slot, freeing the id for reuse.
    pub fn remove(&mut self, id: u32) {
        if id == 0 || id >= SERVER_ID_BASE {
            return;
        }
        if let Some(slot) = self.slots.get_mut((id - 1) as usize) {
            *slot = None;
        }
    }

    /// Signature of event `opcode` on object `id`, for the decoder.
    pub fn event_signature(&self, id: u32, opcode: u16) -> Option<&'static [crate::wire::ArgKind]> {
        self.find(id)
            .and_then(|slot| slot.interface.events.get(opcode as usize))
            .map(|desc| desc.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{wl_callback, wl_display};

    #[test]
    fn ids_start_at_one_and_are_reused() {
        let mut map = ObjectMap::new();
        let display = map.insert_new(&wl_display::INTERFACE, 1, Role::Display);
        assert_eq!(display, DISPLAY_ID);
        let cb = map.insert_new(&wl_callback::INTERFACE, 1, Role::SyncCallback);
        assert_eq!(cb, 2);
        map.remove(cb);
        assert!(map.find(cb).is_none());
        let cb2 = map.insert_new(&wl_callback::INTERFACE, 1, Role::SyncCallback);
        assert_eq!(cb2, 2);
    }

    #[test]
    fn dead_objects_stay_resolvable_until_removed() {
        let mut map = ObjectMap::new();
        let id = map.insert_new(&wl_callback::INTERFACE, 1, Role::SyncCallback);
        map.mark_dead(id);
        let slot = map.find(id).expect("dead slot should resolve");
        assert!(!slot.alive);
        assert!(map.event_signature(id, 0).is_some());
        map.remove(id);
        assert!(map.event_signature(id, 0).is_none());
    }

    #[test]
    fn foreign_ranges_resolve_to_nothing() {
        let map = ObjectMap::new();
        assert!(map.find(0).is_none());
        assert!(map.find(SERVER_ID_BASE + 4).is_none());
    }
}
