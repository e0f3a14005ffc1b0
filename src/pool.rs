//! Fixed set of voices and the indices over the active ones.
//!
//! Every voice is either in the free list or in the active list, except for
//! the short window inside an allocation where it has been taken but not yet
//! registered. Index queues are ordered by registration, so their front is
//! always the oldest voice.

use crate::backend::AudioBackend;
use crate::error::Result;
use crate::sound::{AssetId, GroupId, LocationId};
use crate::voice::{Voice, VoiceId};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

pub struct VoicePool {
    voices: Vec<Voice>,
    free: VecDeque<VoiceId>,
    active: Vec<VoiceId>,
    by_group: HashMap<GroupId, VecDeque<VoiceId>>,
    by_location: HashMap<LocationId, VecDeque<VoiceId>>,
    by_asset: HashMap<AssetId, VecDeque<VoiceId>>,
}

impl VoicePool {
    /// Creates `capacity` voices. Any backend failure releases the voices made so far.
    pub fn new(capacity: usize, backend: &mut dyn AudioBackend) -> Result<Self> {
        let mut voices = Vec::with_capacity(capacity);
        for index in 0..capacity {
            match Voice::create(VoiceId::new(index), backend) {
                Ok(voice) => voices.push(voice),
                Err(e) => {
                    for voice in voices {
                        voice.destroy(backend);
                    }
                    return Err(e);
                }
            }
        }
        let free = voices.iter().map(Voice::id).collect();

        Ok(Self {
            voices,
            free,
            active: Vec::new(),
            by_group: HashMap::new(),
            by_location: HashMap::new(),
            by_asset: HashMap::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn voice(&self, id: VoiceId) -> &Voice {
        &self.voices[id.index()]
    }

    pub fn voice_mut(&mut self, id: VoiceId) -> &mut Voice {
        &mut self.voices[id.index()]
    }

    /// Active voices, oldest first.
    pub fn active(&self) -> &[VoiceId] {
        &self.active
    }

    pub fn is_active(&self, id: VoiceId) -> bool {
        self.active.contains(&id)
    }

    pub fn take_free(&mut self) -> Option<VoiceId> {
        self.free.pop_front()
    }

    /// Returns a voice to the free list. Its assignment must already be cleared.
    pub fn return_free(&mut self, id: VoiceId) {
        debug_assert!(self.voice(id).assignment.is_none());
        if !self.free.contains(&id) {
            self.free.push_back(id);
        }
    }

    /// Adds a taken voice to the active list and to every index its assignment qualifies for.
    pub fn register(&mut self, id: VoiceId) {
        let Some(assignment) = self.voices[id.index()].assignment.as_ref() else {
            return;
        };
        if let Some(group) = &assignment.group {
            self.by_group.entry(group.id()).or_default().push_back(id);
        }
        if let Some(location) = &assignment.location {
            self.by_location
                .entry(location.id())
                .or_default()
                .push_back(id);
        }
        self.by_asset
            .entry(assignment.asset.id())
            .or_default()
            .push_back(id);
        self.active.push(id);
    }

    /// Removes an active voice from the active list and every index. Returns
    /// `false` if the voice was not active.
    pub fn deregister(&mut self, id: VoiceId) -> bool {
        let Some(position) = self.active.iter().position(|v| *v == id) else {
            return false;
        };
        self.active.remove(position);

        if let Some(assignment) = self.voices[id.index()].assignment.as_ref() {
            if let Some(group) = &assignment.group {
                remove_from_index(&mut self.by_group, group.id(), id);
            }
            if let Some(location) = &assignment.location {
                remove_from_index(&mut self.by_location, location.id(), id);
            }
            remove_from_index(&mut self.by_asset, assignment.asset.id(), id);
        }
        true
    }

    /// The active voice bound to `(location, channel)`.
    pub fn find_channel(&self, location: LocationId, channel: u32) -> Option<VoiceId> {
        self.at_location(location).into_iter().find(|id| {
            self.voice(*id)
                .assignment()
                .is_some_and(|a| a.channel == Some(channel))
        })
    }

    pub fn at_location(&self, location: LocationId) -> Vec<VoiceId> {
        index_members(&self.by_location, location)
    }

    pub fn in_group(&self, group: GroupId) -> Vec<VoiceId> {
        index_members(&self.by_group, group)
    }

    pub fn of_asset(&self, asset: AssetId) -> Vec<VoiceId> {
        index_members(&self.by_asset, asset)
    }

    pub fn group_count(&self, group: GroupId) -> usize {
        self.by_group.get(&group).map_or(0, VecDeque::len)
    }

    pub fn asset_count(&self, asset: AssetId) -> usize {
        self.by_asset.get(&asset).map_or(0, VecDeque::len)
    }

    pub fn oldest_in_group(&self, group: GroupId) -> Option<VoiceId> {
        self.by_group.get(&group).and_then(|q| q.front().copied())
    }

    pub fn oldest_of_asset(&self, asset: AssetId) -> Option<VoiceId> {
        self.by_asset.get(&asset).and_then(|q| q.front().copied())
    }

    /// Destroys every voice's backend objects. The pool is empty afterwards.
    pub fn destroy(&mut self, backend: &mut dyn AudioBackend) {
        self.free.clear();
        self.active.clear();
        self.by_group.clear();
        self.by_location.clear();
        self.by_asset.clear();
        for voice in self.voices.drain(..) {
            voice.destroy(backend);
        }
    }
}

fn index_members<K: Eq + Hash>(index: &HashMap<K, VecDeque<VoiceId>>, key: K) -> Vec<VoiceId> {
    index
        .get(&key)
        .map(|q| q.iter().copied().collect())
        .unwrap_or_default()
}

fn remove_from_index<K: Eq + Hash>(index: &mut HashMap<K, VecDeque<VoiceId>>, key: K, id: VoiceId) {
    if let Some(queue) = index.get_mut(&key) {
        queue.retain(|v| *v != id);
        if queue.is_empty() {
            index.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ObjectCounts, SoftwareBackend};
    use crate::sound::{SoundAsset, SoundGroup, SoundLocation};
    use crate::voice::{Assignment, VoiceAudio};
    use std::sync::Arc;

    fn assign(
        pool: &mut VoicePool,
        asset: &Arc<SoundAsset>,
        group: Option<&Arc<SoundGroup>>,
        location: Option<&Arc<SoundLocation>>,
        channel: Option<u32>,
    ) -> VoiceId {
        let id = pool.take_free().unwrap();
        pool.voice_mut(id).assignment = Some(Assignment {
            asset: asset.clone(),
            category: None,
            group: group.cloned(),
            location: location.cloned(),
            channel,
            gain: 1.0,
            pitch: 1.0,
            pitch_offset: 0.0,
            pan: 0.0,
            looping: false,
            audio: VoiceAudio::None,
            soundscape_generation: None,
        });
        pool.register(id);
        id
    }

    fn release(pool: &mut VoicePool, id: VoiceId) {
        assert!(pool.deregister(id));
        pool.voice_mut(id).assignment = None;
        pool.return_free(id);
    }

    #[test]
    fn test_conservation_across_register_and_release() {
        let mut backend = SoftwareBackend::default();
        let mut pool = VoicePool::new(4, &mut backend).unwrap();
        let asset = SoundAsset::new("a.wav").into_shared();

        let a = assign(&mut pool, &asset, None, None, None);
        let b = assign(&mut pool, &asset, None, None, None);
        assert_eq!(pool.free_count() + pool.active_count(), pool.capacity());

        release(&mut pool, a);
        assert!(!pool.deregister(a));
        assert_eq!(pool.free_count() + pool.active_count(), 4);
        assert_eq!(pool.active(), &[b]);
        assert_eq!(pool.asset_count(asset.id()), 1);
    }

    #[test]
    fn test_indices_keep_oldest_first() {
        let mut backend = SoftwareBackend::default();
        let mut pool = VoicePool::new(4, &mut backend).unwrap();
        let asset = SoundAsset::new("a.wav").into_shared();
        let group = SoundGroup::new("fx").into_shared();
        let location = Arc::new(SoundLocation::at(1.0, 0.0, 0.0));

        let first = assign(&mut pool, &asset, Some(&group), Some(&location), Some(1));
        let second = assign(&mut pool, &asset, Some(&group), Some(&location), Some(2));

        assert_eq!(pool.oldest_in_group(group.id()), Some(first));
        assert_eq!(pool.oldest_of_asset(asset.id()), Some(first));
        assert_eq!(pool.find_channel(location.id(), 2), Some(second));
        assert_eq!(pool.find_channel(location.id(), 3), None);

        release(&mut pool, first);
        assert_eq!(pool.oldest_in_group(group.id()), Some(second));
        assert_eq!(pool.at_location(location.id()), vec![second]);
        assert_eq!(pool.group_count(group.id()), 1);
    }

    #[test]
    fn test_destroy_releases_backend_objects() {
        let mut backend = SoftwareBackend::default();
        let mut pool = VoicePool::new(3, &mut backend).unwrap();
        assert_eq!(backend.object_counts().sources, 3);
        pool.destroy(&mut backend);
        assert_eq!(pool.capacity(), 0);
        assert_eq!(backend.object_counts(), ObjectCounts::default());
    }

    #[test]
    fn test_creation_failure_releases_partial_pool() {
        let mut backend = SoftwareBackend::default().with_source_limit(2);
        assert!(VoicePool::new(3, &mut backend).is_err());
        assert_eq!(backend.object_counts(), ObjectCounts::default());
    }
}
