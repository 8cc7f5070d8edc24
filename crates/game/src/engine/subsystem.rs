use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use super::arena::ArenaState;
use super::player::{Player, PlayerDelta};
use super::types::{Action, ArenaMode, Pid, TimeDiff};

pub type SubsystemId = u8;

/// Upcast helper so boxed listeners can be downcast to their concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Lifecycle hooks an arena calls on every attached subsystem, in ascending
/// subsystem ID order. Every hook defaults to doing nothing.
///
/// `register_player`/`unregister_player` are where a subsystem creates and
/// destroys its per-player data (see [`Subsystem`]). The remaining hooks get
/// an [`ArenaContext`] with read access to the arena and the other
/// subsystems.
#[allow(unused_variables)]
pub trait SubsystemListener: AsAny + Send {
    fn register_player(&mut self, player: &mut Player) {}
    fn unregister_player(&mut self, player: &mut Player) {}

    /// Once per rendered frame, client side.
    fn on_poll(&mut self, ctx: &mut ArenaContext<'_>, delta: TimeDiff) {}
    /// Once per simulation step.
    fn on_tick(&mut self, ctx: &mut ArenaContext<'_>, delta: TimeDiff) {}

    fn on_join(&mut self, ctx: &mut ArenaContext<'_>, player: &Player) {}
    /// Called while the player is still present in the arena.
    fn on_quit(&mut self, ctx: &mut ArenaContext<'_>, player: &Player) {}
    fn on_mode(&mut self, ctx: &mut ArenaContext<'_>, mode: ArenaMode) {}
    fn on_map_change(&mut self, ctx: &mut ArenaContext<'_>, map: &str) {}
    /// After `delta` has been applied to `player`.
    fn on_delta(&mut self, ctx: &mut ArenaContext<'_>, player: &Player, delta: &PlayerDelta) {}
    fn on_action(&mut self, ctx: &mut ArenaContext<'_>, player: &Player, action: Action, state: bool) {}
    fn on_spawn(&mut self, ctx: &mut ArenaContext<'_>, player: &Player) {}
    fn on_kill(&mut self, ctx: &mut ArenaContext<'_>, player: &Player) {}
}

/// Gameplay notices raised from inside a hook; the arena delivers them to
/// every subsystem once the raising hook has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Notice {
    Spawn(Pid),
    Kill(Pid),
}

/// What a hook can see while it runs: the arena's state, every other
/// subsystem, and an outbox for notices.
pub struct ArenaContext<'a> {
    arena: &'a ArenaState,
    subsystems: &'a SubsystemTable,
    notices: &'a mut Vec<Notice>,
}

impl<'a> ArenaContext<'a> {
    pub(crate) fn new(
        arena: &'a ArenaState,
        subsystems: &'a SubsystemTable,
        notices: &'a mut Vec<Notice>,
    ) -> Self {
        Self {
            arena,
            subsystems,
            notices,
        }
    }

    pub fn arena(&self) -> &'a ArenaState {
        self.arena
    }

    pub fn player(&self, pid: Pid) -> Option<&'a Player> {
        self.arena.player(pid)
    }

    /// Another subsystem, by handle. The subsystem currently running its hook
    /// is not reachable through its own context.
    pub fn subsystem<S: SubsystemListener>(&self, handle: SubsystemHandle<S>) -> Option<&'a S> {
        self.subsystems.get(handle)
    }

    pub fn notify_spawn(&mut self, pid: Pid) {
        self.notices.push(Notice::Spawn(pid));
    }

    pub fn notify_kill(&mut self, pid: Pid) {
        self.notices.push(Notice::Kill(pid));
    }
}

/// Typed reference to a subsystem attached to an arena.
pub struct SubsystemHandle<S> {
    id: SubsystemId,
    _marker: PhantomData<fn() -> S>,
}

impl<S> SubsystemHandle<S> {
    pub(crate) fn new(id: SubsystemId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> SubsystemId {
        self.id
    }
}

impl<S> Clone for SubsystemHandle<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for SubsystemHandle<S> {}

impl<S> PartialEq for SubsystemHandle<S> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<S> fmt::Debug for SubsystemHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsystemHandle").field("id", &self.id).finish()
    }
}

#[derive(Default)]
pub(crate) struct SubsystemTable {
    slots: BTreeMap<SubsystemId, Box<dyn SubsystemListener>>,
}

impl SubsystemTable {
    pub fn ids(&self) -> Vec<SubsystemId> {
        self.slots.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn insert(&mut self, id: SubsystemId, subsystem: Box<dyn SubsystemListener>) {
        self.slots.insert(id, subsystem);
    }

    /// Every listener, in ascending ID order.
    pub fn listeners_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn SubsystemListener>> {
        self.slots.values_mut()
    }

    pub fn take(&mut self, id: SubsystemId) -> Option<Box<dyn SubsystemListener>> {
        self.slots.remove(&id)
    }

    pub fn contains(&self, id: SubsystemId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn get<S: SubsystemListener>(&self, handle: SubsystemHandle<S>) -> Option<&S> {
        let subsystem = self.slots.get(&handle.id)?;
        (**subsystem).as_any().downcast_ref::<S>()
    }

    pub fn get_mut<S: SubsystemListener>(&mut self, handle: SubsystemHandle<S>) -> Option<&mut S> {
        let subsystem = self.slots.get_mut(&handle.id)?;
        (**subsystem).as_any_mut().downcast_mut::<S>()
    }
}

impl fmt::Debug for SubsystemTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.slots.keys()).finish()
    }
}

/// Per-player storage for one subsystem.
///
/// The data is owned here, never by the player: attaching only records this
/// subsystem's ID on the player, and lookups require that mark to be present.
#[derive(Debug)]
pub struct Subsystem<D> {
    id: SubsystemId,
    data: BTreeMap<Pid, D>,
}

impl<D> Subsystem<D> {
    pub fn new(id: SubsystemId) -> Self {
        Self {
            id,
            data: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> SubsystemId {
        self.id
    }

    pub fn attach(&mut self, player: &mut Player, data: D) {
        player.attach(self.id);
        self.data.insert(player.pid(), data);
    }

    pub fn detach(&mut self, player: &mut Player) -> Option<D> {
        player.detach(self.id);
        self.data.remove(&player.pid())
    }

    pub fn get(&self, player: &Player) -> Option<&D> {
        if !player.is_attached(self.id) {
            return None;
        }
        self.data.get(&player.pid())
    }

    pub fn get_mut(&mut self, player: &Player) -> Option<&mut D> {
        if !player.is_attached(self.id) {
            return None;
        }
        self.data.get_mut(&player.pid())
    }

    /// Lookup by PID alone, for subsystems that hold no `Player` borrow.
    /// Skips the attachment check; entries exist only between `attach` and
    /// `detach`, which keep the player's mark in step.
    pub(crate) fn by_pid(&self, pid: Pid) -> Option<&D> {
        self.data.get(&pid)
    }

    pub(crate) fn by_pid_mut(&mut self, pid: Pid) -> Option<&mut D> {
        self.data.get_mut(&pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Pid, &D)> {
        self.data.iter().map(|(&pid, data)| (pid, data))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Pid, &mut D)> {
        self.data.iter_mut().map(|(&pid, data)| (pid, data))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PlayerInit;

    #[test]
    fn lookups_follow_the_attachment_mark() {
        let mut player = Player::new(&PlayerInit::new(3, "kestrel"));
        let mut other = Player::new(&PlayerInit::new(4, "osprey"));
        let mut subsystem = Subsystem::new(SubsystemId::default());

        subsystem.attach(&mut player, 7u32);
        assert_eq!(subsystem.get(&player), Some(&7));
        assert_eq!(subsystem.by_pid(3), Some(&7));
        assert_eq!(subsystem.get(&other), None);

        // a mark without data, and data without a mark
        other.attach(subsystem.id());
        assert_eq!(subsystem.get(&other), None);
        player.detach(subsystem.id());
        assert_eq!(subsystem.get_mut(&player), None);

        player.attach(subsystem.id());
        assert_eq!(subsystem.detach(&mut player), Some(7));
        assert!(!player.is_attached(subsystem.id()));
        assert_eq!(subsystem.by_pid(3), None);
    }
}
