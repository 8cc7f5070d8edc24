use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::telegraph::{ClassPack, Pack, byte_pack, list_pack, map_pack, optional_pack, string_pack};

use super::networked::{AutoNetworked, Networked, VerifyStructure};
use super::player::Player;
use super::subsystem::{ArenaContext, Subsystem, SubsystemId, SubsystemListener};
use super::types::{Pid, Role, TimeDiff, pid_pack};

pub const SPAWNS: &str = "spawns";
pub const DEATHS: &str = "deaths";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecordInit {
    pub values: Vec<i32>,
}

impl ScoreRecordInit {
    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(list_pack(byte_pack()), |r| &r.values, |r| &mut r.values)
            .build()
    }
}

/// Changed values, by field index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecordDelta {
    pub values: BTreeMap<u8, i32>,
}

impl ScoreRecordDelta {
    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(
                map_pack(byte_pack(), byte_pack()),
                |r| &r.values,
                |r| &mut r.values,
            )
            .build()
    }
}

/// One player's row on the scoreboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreRecord {
    values: Vec<i32>,
    dirty: BTreeSet<usize>,
}

impl ScoreRecord {
    pub fn new(init: &ScoreRecordInit) -> Self {
        Self {
            values: init.values.clone(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<i32> {
        self.values.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: i32) {
        if let Some(slot) = self.values.get_mut(index)
            && *slot != value
        {
            *slot = value;
            self.dirty.insert(index);
        }
    }

    fn resize(&mut self, len: usize) {
        self.values.resize(len, 0);
        self.dirty.retain(|&index| index < len);
    }
}

impl Networked for ScoreRecord {
    type Init = ScoreRecordInit;
    type Delta = ScoreRecordDelta;

    fn apply_delta(&mut self, delta: &ScoreRecordDelta) {
        for (&index, &value) in &delta.values {
            if let Some(slot) = self.values.get_mut(usize::from(index)) {
                *slot = value;
            }
        }
    }

    fn capture_initializer(&self) -> ScoreRecordInit {
        ScoreRecordInit {
            values: self.values.clone(),
        }
    }
}

impl AutoNetworked for ScoreRecord {
    fn collect_delta(&mut self) -> Option<ScoreRecordDelta> {
        if self.dirty.is_empty() {
            return None;
        }
        let values = std::mem::take(&mut self.dirty)
            .into_iter()
            .filter_map(|index| Some((u8::try_from(index).ok()?, self.values[index])))
            .collect();
        Some(ScoreRecordDelta { values })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreboardInit {
    pub fields: Vec<String>,
    pub records: BTreeMap<Pid, ScoreRecordInit>,
}

impl Default for ScoreboardInit {
    fn default() -> Self {
        Self {
            fields: vec![SPAWNS.into(), DEATHS.into()],
            records: BTreeMap::new(),
        }
    }
}

impl ScoreboardInit {
    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(list_pack(string_pack()), |s| &s.fields, |s| &mut s.fields)
            .member(
                map_pack(pid_pack(), ScoreRecordInit::pack()),
                |s| &s.records,
                |s| &mut s.records,
            )
            .build()
    }
}

impl VerifyStructure for ScoreboardInit {
    fn verify_structure(&self) -> bool {
        self.fields.len() <= usize::from(u8::MAX)
            && self
                .records
                .values()
                .all(|record| record.values.len() == self.fields.len())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreboardDelta {
    pub fields: Option<Vec<String>>,
    pub records: BTreeMap<Pid, ScoreRecordDelta>,
}

impl ScoreboardDelta {
    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(
                optional_pack(list_pack(string_pack())),
                |s| &s.fields,
                |s| &mut s.fields,
            )
            .member(
                map_pack(pid_pack(), ScoreRecordDelta::pack()),
                |s| &s.records,
                |s| &mut s.records,
            )
            .build()
    }
}

impl VerifyStructure for ScoreboardDelta {
    fn verify_structure(&self) -> bool {
        (self.fields.is_some() || !self.records.is_empty())
            && self
                .fields
                .as_ref()
                .is_none_or(|fields| fields.len() <= usize::from(u8::MAX))
    }
}

/// Per-player tallies under a shared list of named fields. The server counts
/// spawns and deaths; clients follow through deltas.
#[derive(Debug)]
pub struct Scoreboard {
    role: Role,
    fields: Vec<String>,
    fields_dirty: bool,
    records: Subsystem<ScoreRecord>,
    /// Records from the initializer, waiting for their player to register.
    pending: BTreeMap<Pid, ScoreRecordInit>,
}

impl Scoreboard {
    pub fn new(id: SubsystemId, role: Role, init: &ScoreboardInit) -> Self {
        Self {
            role,
            fields: init.fields.clone(),
            fields_dirty: false,
            records: Subsystem::new(id),
            pending: init.records.clone(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == field)
    }

    /// Replaces the field list. Values of fields that keep their position
    /// are kept; new positions start at zero.
    pub fn set_fields(&mut self, fields: Vec<String>) {
        if fields == self.fields {
            return;
        }
        for (_, record) in self.records.iter_mut() {
            record.resize(fields.len());
        }
        self.fields = fields;
        self.fields_dirty = true;
    }

    pub fn record(&self, player: &Player) -> Option<&ScoreRecord> {
        self.records.get(player)
    }

    pub fn value(&self, pid: Pid, field: &str) -> Option<i32> {
        let index = self.field_index(field)?;
        self.records.by_pid(pid)?.get(index)
    }

    pub fn set(&mut self, pid: Pid, field: &str, value: i32) {
        if let Some(index) = self.field_index(field)
            && let Some(record) = self.records.by_pid_mut(pid)
        {
            record.set(index, value);
        }
    }

    pub fn add(&mut self, pid: Pid, field: &str, amount: i32) {
        if let Some(value) = self.value(pid, field) {
            self.set(pid, field, value.saturating_add(amount));
        }
    }
}

impl SubsystemListener for Scoreboard {
    fn register_player(&mut self, player: &mut Player) {
        let init = self
            .pending
            .remove(&player.pid())
            .filter(|init| init.values.len() == self.fields.len())
            .unwrap_or_else(|| ScoreRecordInit {
                values: vec![0; self.fields.len()],
            });
        self.records.attach(player, ScoreRecord::new(&init));
    }

    fn unregister_player(&mut self, player: &mut Player) {
        self.pending.remove(&player.pid());
        self.records.detach(player);
    }

    fn on_tick(&mut self, _ctx: &mut ArenaContext<'_>, _delta: TimeDiff) {
        // every player present at attach time has registered by now
        self.pending.clear();
    }

    fn on_quit(&mut self, _ctx: &mut ArenaContext<'_>, player: &Player) {
        self.pending.remove(&player.pid());
    }

    fn on_spawn(&mut self, _ctx: &mut ArenaContext<'_>, player: &Player) {
        if self.role.is_server() {
            self.add(player.pid(), SPAWNS, 1);
        }
    }

    fn on_kill(&mut self, _ctx: &mut ArenaContext<'_>, player: &Player) {
        if self.role.is_server() {
            self.add(player.pid(), DEATHS, 1);
        }
    }
}

impl Networked for Scoreboard {
    type Init = ScoreboardInit;
    type Delta = ScoreboardDelta;

    fn apply_delta(&mut self, delta: &ScoreboardDelta) {
        if let Some(fields) = &delta.fields {
            self.set_fields(fields.clone());
            self.fields_dirty = false;
        }
        for (&pid, record_delta) in &delta.records {
            if let Some(record) = self.records.by_pid_mut(pid) {
                record.apply_delta(record_delta);
            }
        }
    }

    fn capture_initializer(&self) -> ScoreboardInit {
        ScoreboardInit {
            fields: self.fields.clone(),
            records: self
                .records
                .iter()
                .map(|(pid, record)| (pid, record.capture_initializer()))
                .collect(),
        }
    }
}

impl AutoNetworked for Scoreboard {
    fn collect_delta(&mut self) -> Option<ScoreboardDelta> {
        let fields = self.fields_dirty.then(|| self.fields.clone());
        self.fields_dirty = false;
        let records: BTreeMap<Pid, ScoreRecordDelta> = self
            .records
            .iter_mut()
            .filter_map(|(pid, record)| Some((pid, record.collect_delta()?)))
            .collect();

        if fields.is_none() && records.is_empty() {
            return None;
        }
        Some(ScoreboardDelta { fields, records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::arena::{Arena, ArenaDelta, ArenaInit};

    #[test]
    fn records_follow_registration() {
        let mut arena = Arena::new(&ArenaInit::default());
        arena.connect_player("kestrel").unwrap();
        let handle = arena
            .attach(|id| Scoreboard::new(id, Role::Server, &ScoreboardInit::default()))
            .unwrap();
        arena.connect_player("osprey").unwrap();

        let scoreboard = arena.subsystem_mut(handle).unwrap();
        assert_eq!(scoreboard.value(0, DEATHS), Some(0));
        assert_eq!(scoreboard.value(1, DEATHS), Some(0));
        scoreboard.add(1, DEATHS, 2);
        assert_eq!(scoreboard.value(1, DEATHS), Some(2));
        assert_eq!(scoreboard.value(1, "style"), None);

        arena.apply_delta(&ArenaDelta::Quit(1));
        assert_eq!(arena.subsystem(handle).unwrap().value(1, DEATHS), None);
    }

    #[test]
    fn mirror_converges_with_field_changes() {
        let mut source = Arena::new(&ArenaInit::default());
        source.connect_player("a").unwrap();
        source.connect_player("b").unwrap();
        let source_handle = source
            .attach(|id| Scoreboard::new(id, Role::Server, &ScoreboardInit::default()))
            .unwrap();

        let scoreboard = source.subsystem_mut(source_handle).unwrap();
        scoreboard.add(0, SPAWNS, 3);
        scoreboard.collect_delta();

        let mut mirror = Arena::new(&source.capture_initializer());
        let init = source.subsystem(source_handle).unwrap().capture_initializer();
        let mirror_handle = mirror
            .attach(|id| Scoreboard::new(id, Role::Client, &init))
            .unwrap();

        let scoreboard = source.subsystem_mut(source_handle).unwrap();
        scoreboard.add(1, DEATHS, 1);
        scoreboard.set_fields(vec![SPAWNS.into(), DEATHS.into(), "kills".into()]);
        scoreboard.set(0, "kills", 5);
        let delta = scoreboard.collect_delta().unwrap();
        assert!(delta.verify_structure());
        mirror.subsystem_mut(mirror_handle).unwrap().apply_delta(&delta);

        assert_eq!(
            mirror.subsystem(mirror_handle).unwrap().capture_initializer(),
            source.subsystem(source_handle).unwrap().capture_initializer()
        );
        assert_eq!(mirror.subsystem(mirror_handle).unwrap().value(0, SPAWNS), Some(3));
    }

    #[test]
    fn unclaimed_records_do_not_reach_later_players() {
        let mut arena = Arena::new(&ArenaInit::default());
        arena.connect_player("kestrel").unwrap();
        let mut init = ScoreboardInit::default();
        init.records.insert(0, ScoreRecordInit { values: vec![1, 2] });
        init.records.insert(1, ScoreRecordInit { values: vec![9, 9] });
        let handle = arena
            .attach(|id| Scoreboard::new(id, Role::Client, &init))
            .unwrap();
        assert_eq!(arena.subsystem(handle).unwrap().pending.len(), 1);

        arena.tick(0.1);
        assert!(arena.subsystem(handle).unwrap().pending.is_empty());

        arena.connect_player("osprey").unwrap();
        let scoreboard = arena.subsystem(handle).unwrap();
        assert_eq!(scoreboard.value(0, DEATHS), Some(2));
        assert_eq!(scoreboard.value(1, SPAWNS), Some(0));
        assert_eq!(scoreboard.value(1, DEATHS), Some(0));
    }

    #[test]
    fn mismatched_record_lengths_are_rejected() {
        let mut init = ScoreboardInit::default();
        init.records.insert(0, ScoreRecordInit { values: vec![1] });
        assert!(!init.verify_structure());
        assert!(!ScoreboardDelta::default().verify_structure());
    }
}
