//! Channel storage.
//!
//! Channels live in a slot map so tracks and the visualizer can refer to
//! them by key. Each hardware list keeps its keys in creation order, which
//! is also the mixing order.

use slotmap::{new_key_type, SlotMap};

use super::{Channel, ChannelKind, TrackId};

new_key_type! {
    pub struct ChannelId;
}

#[derive(Clone, Debug, Default)]
pub struct ChannelPool {
    slots: SlotMap<ChannelId, Channel>,
    lists: [Vec<ChannelId>; 5],
    next_serial: u64,
}

impl ChannelPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: ChannelKind, mut channel: Channel) -> ChannelId {
        channel.serial = self.next_serial;
        self.next_serial += 1;
        let id = self.slots.insert(channel);
        self.lists[kind.index()].push(id);
        id
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.slots.get(id)
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.slots.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Keys of one hardware list in creation order.
    pub fn ids(&self, kind: ChannelKind) -> &[ChannelId] {
        &self.lists[kind.index()]
    }

    pub fn iter(&self, kind: ChannelKind) -> impl Iterator<Item = &Channel> + '_ {
        self.lists[kind.index()].iter().filter_map(|&id| self.slots.get(id))
    }

    pub fn all(&self) -> impl Iterator<Item = &Channel> + '_ {
        self.slots.values()
    }

    pub fn all_mut(&mut self) -> impl Iterator<Item = &mut Channel> + '_ {
        self.slots.values_mut()
    }

    /// Channels held by `track`, in no particular order.
    pub fn of_track(&self, track: TrackId) -> impl Iterator<Item = &Channel> + '_ {
        self.slots.values().filter(move |c| c.track == Some(track))
    }

    pub fn of_track_mut(&mut self, track: TrackId) -> impl Iterator<Item = &mut Channel> + '_ {
        self.slots.values_mut().filter(move |c| c.track == Some(track))
    }

    /// The most recently started channel of `track` matching `pred`.
    pub fn newest_of_track_mut(
        &mut self,
        track: TrackId,
        mut pred: impl FnMut(&Channel) -> bool,
    ) -> Option<&mut Channel> {
        self.of_track_mut(track)
            .filter(|c| pred(c))
            .max_by_key(|c| c.serial)
    }

    /// Remove every channel of one list.
    pub fn clear_kind(&mut self, kind: ChannelKind) {
        for id in self.lists[kind.index()].drain(..) {
            self.slots.remove(id);
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        for list in &mut self.lists {
            list.clear();
        }
    }

    /// Drop channels whose envelope has finished.
    pub fn purge_dead(&mut self) {
        let slots = &mut self.slots;
        for list in &mut self.lists {
            list.retain(|&id| {
                let dead = slots.get(id).map_or(true, Channel::is_dead);
                if dead {
                    slots.remove(id);
                }
                !dead
            });
        }
    }

    /// Mutable access to one list's channels, for mixing.
    pub(crate) fn for_each_mut(&mut self, kind: ChannelKind, mut f: impl FnMut(&mut Channel)) {
        let slots = &mut self.slots;
        for &id in &self.lists[kind.index()] {
            if let Some(chn) = slots.get_mut(id) {
                f(chn);
            }
        }
    }
}
