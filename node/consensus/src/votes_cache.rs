use std::{
	collections::{HashMap, VecDeque},
	sync::Mutex,
};

use crate::{primitives::BlockHash, vote::Vote};

struct Inner {
	by_hash: HashMap<BlockHash, Vec<Vote>>,
	order: VecDeque<BlockHash>,
}

/// Bounded store of recently observed votes per block hash, used to seed
/// newly created elections with votes that arrived before their block.
pub struct VotesCache {
	max_size: usize,
	inner: Mutex<Inner>,
}

impl VotesCache {
	pub fn new(max_size: usize) -> Self {
		VotesCache {
			max_size,
			inner: Mutex::new(Inner { by_hash: HashMap::new(), order: VecDeque::new() }),
		}
	}

	pub fn add(&self, vote: &Vote) {
		let mut inner = self.inner.lock().unwrap();
		for hash in &vote.hashes {
			if !inner.by_hash.contains_key(hash) {
				if inner.order.len() >= self.max_size {
					if let Some(oldest) = inner.order.pop_front() {
						inner.by_hash.remove(&oldest);
					}
				}
				inner.order.push_back(*hash);
				inner.by_hash.insert(*hash, Vec::new());
			}
			let votes = inner.by_hash.get_mut(hash).expect("bucket inserted above");
			match votes.iter_mut().find(|existing| existing.account == vote.account) {
				Some(existing) =>
					if vote.sequence > existing.sequence {
						*existing = vote.clone();
					},
				None => votes.push(vote.clone()),
			}
		}
	}

	/// Votes observed for `hash`, for seeding a new election
	pub fn find(&self, hash: &BlockHash) -> Vec<Vote> {
		self.inner.lock().unwrap().by_hash.get(hash).cloned().unwrap_or_default()
	}

	/// Called when the election for `hash` terminates
	pub fn remove(&self, hash: &BlockHash) {
		let mut inner = self.inner.lock().unwrap();
		if inner.by_hash.remove(hash).is_some() {
			inner.order.retain(|entry| entry != hash);
		}
	}

	pub fn size(&self) -> usize {
		self.inner.lock().unwrap().by_hash.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::primitives::KeyPair;

	#[test]
	fn added_votes_are_found_under_every_hash() {
		let cache = VotesCache::new(16);
		let key = KeyPair::generate();
		let hashes = vec![BlockHash([1u8; 32]), BlockHash([2u8; 32])];
		let vote = Vote::new_signed(&key, 1, hashes.clone());
		cache.add(&vote);

		for hash in &hashes {
			assert_eq!(cache.find(hash), vec![vote.clone()]);
		}
	}

	#[test]
	fn newer_sequence_replaces_older_from_same_voter() {
		let cache = VotesCache::new(16);
		let key = KeyPair::generate();
		let hash = BlockHash([1u8; 32]);

		cache.add(&Vote::new_signed(&key, 1, vec![hash]));
		let newer = Vote::new_signed(&key, 2, vec![hash]);
		cache.add(&newer);
		// Stale sequences do not displace the newer vote
		cache.add(&Vote::new_signed(&key, 1, vec![hash]));

		assert_eq!(cache.find(&hash), vec![newer]);
	}

	#[test]
	fn oldest_bucket_is_evicted_at_capacity() {
		let cache = VotesCache::new(2);
		let key = KeyPair::generate();
		let first = BlockHash([1u8; 32]);
		cache.add(&Vote::new_signed(&key, 1, vec![first]));
		cache.add(&Vote::new_signed(&key, 2, vec![BlockHash([2u8; 32])]));
		cache.add(&Vote::new_signed(&key, 3, vec![BlockHash([3u8; 32])]));

		assert_eq!(cache.size(), 2);
		assert!(cache.find(&first).is_empty());
	}

	#[test]
	fn removed_entries_stop_being_found() {
		let cache = VotesCache::new(16);
		let key = KeyPair::generate();
		let hash = BlockHash([1u8; 32]);
		cache.add(&Vote::new_signed(&key, 1, vec![hash]));
		cache.remove(&hash);
		assert!(cache.find(&hash).is_empty());
		assert_eq!(cache.size(), 0);
	}
}
