//! The capability interface journaled objects implement.

use std::any::Any;

use vireo_types::{Entry, LogId};

/// A journaled object: anything whose lifecycle and mutations are persisted
/// through the journal.
///
/// Implementations store their own [`LogId`] and expose two projections:
/// the *journaled* projection ([`get`](Loggable::get)) covers fields that
/// affect observable state and are therefore undoable; the *unjournaled*
/// projection ([`get_unjournaled`](Loggable::get_unjournaled)) covers
/// preference-like fields that survive across sessions via the side-file
/// but never participate in undo. [`set`](Loggable::set) applies fields
/// from either projection and must ignore names it does not recognize.
///
/// Serialized references between objects are always ids, never pointers;
/// resolve them through [`Journal::find`](crate::Journal::find) at read
/// time.
pub trait Loggable: Any + Send {
    /// Class name as written in journal records. Must be stable across
    /// sessions and registered with
    /// [`Journal::register_create`](crate::Journal::register_create).
    fn class_name(&self) -> &'static str;

    fn id(&self) -> LogId;

    /// Rebind this object's identity. Called by the engine when adopting a
    /// new object and by factories when reconstructing a replayed one; not
    /// meant for host code.
    fn set_id(&mut self, id: LogId);

    /// Append the journaled projection to `e`.
    fn get(&self, e: &mut Entry);

    /// Append the unjournaled projection to `e`. Optional; the default
    /// contributes nothing.
    fn get_unjournaled(&self, _e: &mut Entry) {}

    /// Apply fields from a projection. Unknown names must be ignored.
    fn set(&mut self, e: &Entry);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Factory signature for reconstructing an instance from a replayed
/// `create` record.
///
/// The factory constructs the object, rebinds its id to `id` and applies
/// `e` via [`Loggable::set`]. The engine then claims the identity-table
/// slot (fatal on collision) and applies any unjournaled state remembered
/// for that id.
pub type CreateFn = Box<dyn Fn(&Entry, LogId) -> Box<dyn Loggable> + Send>;

/// Ready-made factory for classes that can start from `Default` and absorb
/// their state through `set`:
///
/// ```ignore
/// journal.register_create("Widget", create_from_entry::<Widget>);
/// ```
pub fn create_from_entry<T>(e: &Entry, id: LogId) -> Box<dyn Loggable>
where
    T: Loggable + Default,
{
    let mut obj = T::default();
    obj.set_id(id);
    obj.set(e);
    Box::new(obj)
}
