//! Identity table: id -> (live object, remembered unjournaled state).

use std::collections::BTreeMap;

use vireo_types::{Entry, LogId};

use crate::error::JournalError;
use crate::loggable::Loggable;

/// Per-id slot. `live` is absent once the object has been destroyed, but
/// the slot stays in the table so the last unjournaled state survives for
/// a future re-creation under the same id (undo of a destroy).
///
/// `old_state`/`nest` are the edit-scope bookkeeping for the object
/// currently living in the slot.
#[derive(Default)]
pub(crate) struct Slot {
    pub live: Option<Box<dyn Loggable>>,
    pub unjournaled: Option<Entry>,
    pub old_state: Option<Entry>,
    pub nest: u32,
}

/// Ordered map of every id this session has seen, plus the id allocator
/// and the relative-id import offset. Iteration order is ascending id,
/// which fixes the side-file and snapshot-walk ordering.
pub(crate) struct IdentityTable {
    slots: BTreeMap<LogId, Slot>,
    last_id: u32,
    relative_base: u32,
}

impl IdentityTable {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            last_id: 0,
            relative_base: 0,
        }
    }

    fn next_id(&mut self) -> LogId {
        self.last_id = match self.last_id.checked_add(1) {
            Some(v) => v,
            None => panic!("journal id space exhausted (2^32 - 1 ids used)"),
        };
        LogId::new(self.last_id)
    }

    /// Highest id handed out or observed so far.
    pub fn last_id(&self) -> LogId {
        LogId::new(self.last_id)
    }

    /// Map a stored id through the relative-id offset. Identity while the
    /// mode is inactive.
    pub fn resolve(&self, id: LogId) -> LogId {
        if self.relative_base == 0 {
            return id;
        }
        match id.raw().checked_add(self.relative_base) {
            Some(v) => LogId::new(v),
            None => panic!("relative id {} overflows the id space", id),
        }
    }

    /// Enter relative-id mode: consume one id and use it as the offset
    /// base, so every id in the imported stream lands above the current
    /// maximum.
    pub fn begin_relative(&mut self) {
        let base = self.next_id();
        self.relative_base = base.raw();
    }

    pub fn end_relative(&mut self) {
        self.relative_base = 0;
    }

    /// Take ownership of a new object: assign the next id, rebind, claim
    /// the slot.
    pub fn adopt(&mut self, mut obj: Box<dyn Loggable>) -> LogId {
        let id = self.next_id();
        obj.set_id(id);
        let slot = self.slots.entry(id).or_default();
        debug_assert!(slot.live.is_none());
        slot.live = Some(obj);
        id
    }

    /// Claim the slot at a replayed id. Raises the allocator so later
    /// objects never collide; an occupied slot means a corrupt journal.
    pub fn claim(&mut self, id: LogId, obj: Box<dyn Loggable>) -> Result<(), JournalError> {
        let slot = self.slots.entry(id).or_default();
        if let Some(existing) = &slot.live {
            return Err(JournalError::IdCollision {
                id,
                existing: existing.class_name(),
                incoming: obj.class_name(),
            });
        }
        self.last_id = self.last_id.max(id.raw());
        slot.live = Some(obj);
        Ok(())
    }

    /// Slot access without relative-id resolution.
    pub fn slot_mut(&mut self, id: LogId) -> Option<&mut Slot> {
        self.slots.get_mut(&id)
    }

    /// Slot access, inserting an empty slot if absent (side-file loading
    /// remembers state for ids nothing live carries yet).
    pub fn slot_entry(&mut self, id: LogId) -> &mut Slot {
        self.slots.entry(id).or_default()
    }

    pub fn live(&self, id: LogId) -> Option<&dyn Loggable> {
        self.slots.get(&id).and_then(|s| s.live.as_deref())
    }

    pub fn live_mut(&mut self, id: LogId) -> Option<&mut (dyn Loggable + 'static)> {
        self.slots.get_mut(&id).and_then(|s| s.live.as_deref_mut())
    }

    /// Lookup through the relative-id offset; what hosts and replayed
    /// records use.
    pub fn find(&self, id: LogId) -> Option<&dyn Loggable> {
        self.live(self.resolve(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (LogId, &Slot)> {
        self.slots.iter().map(|(id, s)| (*id, s))
    }

    pub fn live_ids(&self) -> Vec<LogId> {
        self.slots
            .iter()
            .filter(|(_, s)| s.live.is_some())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Refresh every live object's remembered unjournaled state.
    pub fn refresh_unjournaled(&mut self) {
        for slot in self.slots.values_mut() {
            if let Some(obj) = &slot.live {
                let mut e = Entry::new();
                obj.get_unjournaled(&mut e);
                slot.unjournaled = if e.is_empty() { None } else { Some(e) };
            }
        }
    }

    /// Drop every object and every slot. The allocator is deliberately not
    /// reset: ids are never reused within a session.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.relative_base = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    #[derive(Default)]
    struct Blob {
        id: LogId,
    }

    impl Loggable for Blob {
        fn class_name(&self) -> &'static str {
            "Blob"
        }
        fn id(&self) -> LogId {
            self.id
        }
        fn set_id(&mut self, id: LogId) {
            self.id = id;
        }
        fn get(&self, _e: &mut Entry) {}
        fn set(&mut self, _e: &Entry) {}
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn adopt_assigns_monotonic_ids() {
        let mut t = IdentityTable::new();
        let a = t.adopt(Box::new(Blob::default()));
        let b = t.adopt(Box::new(Blob::default()));
        assert_eq!(a, LogId::new(1));
        assert_eq!(b, LogId::new(2));
        assert_eq!(t.live(a).map(|o| o.id()), Some(a));
    }

    #[test]
    fn claim_raises_the_allocator() {
        let mut t = IdentityTable::new();
        t.claim(LogId::new(0x10), Box::new(Blob::default())).unwrap();
        assert_eq!(t.last_id(), LogId::new(0x10));
        let next = t.adopt(Box::new(Blob::default()));
        assert_eq!(next, LogId::new(0x11));
    }

    #[test]
    fn duplicate_claim_is_a_collision() {
        let mut t = IdentityTable::new();
        t.claim(LogId::new(3), Box::new(Blob::default())).unwrap();
        let err = t.claim(LogId::new(3), Box::new(Blob::default()));
        assert!(matches!(err, Err(JournalError::IdCollision { .. })));
    }

    #[test]
    fn claiming_a_dead_slot_is_allowed() {
        let mut t = IdentityTable::new();
        let id = t.adopt(Box::new(Blob::default()));
        t.slot_mut(id).unwrap().live = None;
        t.claim(id, Box::new(Blob::default())).unwrap();
        assert!(t.live(id).is_some());
    }

    #[test]
    fn relative_mode_offsets_lookups() {
        let mut t = IdentityTable::new();
        let a = t.adopt(Box::new(Blob::default())); // 0x1
        t.begin_relative(); // base = 0x2
        assert_eq!(t.resolve(LogId::new(1)), LogId::new(3));
        assert!(t.find(LogId::new(1)).is_none());
        t.end_relative();
        assert_eq!(t.resolve(LogId::new(1)), LogId::new(1));
        assert!(t.find(a).is_some());
    }

    #[test]
    fn clear_keeps_the_allocator_high_water_mark() {
        let mut t = IdentityTable::new();
        t.adopt(Box::new(Blob::default()));
        t.adopt(Box::new(Blob::default()));
        t.clear();
        assert_eq!(t.adopt(Box::new(Blob::default())), LogId::new(3));
    }
}
