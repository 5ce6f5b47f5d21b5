use std::{collections::HashSet, sync::Mutex};

use crate::{
	block::Block,
	primitives::{Account, Amount, BlockHash, Root},
	vote::Vote,
};

/// Opaque handle to a peer channel owned by the transport layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u64);

/// Messages the core exchanges with peers. The wire encoding is owned by the
/// transport layer.
#[derive(Clone, Debug)]
pub enum Message {
	Publish(Block),
	ConfirmReq { roots_hashes: Vec<(BlockHash, Root)> },
	/// Legacy request form carrying the full block instead of root/hash pairs
	ConfirmReqBlock(Block),
	ConfirmAck(Vote),
}

/// A voting representative as reported by the rep crawler: account, current
/// weight and the channel it is reachable on.
#[derive(Clone, Debug)]
pub struct Representative {
	pub account: Account,
	pub weight: Amount,
	pub channel: ChannelId,
}

/// Message bus provided by the transport layer. Implementations are expected
/// to count outgoing messages in stats.
pub trait Network: Send + Sync {
	fn send(&self, channel: ChannelId, message: Message);
	/// Send to a random `scale` fraction of peers
	fn flood(&self, message: Message, scale: f32);
	/// Number of peers a flood at `scale` reaches
	fn fanout(&self, scale: f32) -> usize;
}

/// Source of the current representative list, refreshed by the rep crawler.
pub trait RepresentativeRegistry: Send + Sync {
	fn representatives(&self) -> Vec<Representative>;
}

/// Hook into the bootstrap subsystem; the core only initiates pulls.
pub trait BootstrapInitiator: Send + Sync {
	fn bootstrap_lazy(&self, hash: BlockHash);
	fn in_progress(&self) -> bool;
}

const FILTER_CAPACITY: usize = 256 * 1024;

/// Duplicate-suppression filter over recently seen publish digests. Digests of
/// an election's losing blocks are cleared when the election ends so the
/// blocks can be observed again.
pub struct NetworkFilter {
	digests: Mutex<HashSet<u128>>,
}

impl Default for NetworkFilter {
	fn default() -> Self {
		NetworkFilter { digests: Mutex::new(HashSet::new()) }
	}
}

impl NetworkFilter {
	pub fn digest(hash: &BlockHash) -> u128 {
		u128::from_be_bytes(hash.as_bytes()[..16].try_into().expect("hash is 32 bytes"))
	}

	/// Record `digest`, returning whether it was already present
	pub fn apply(&self, digest: u128) -> bool {
		let mut digests = self.digests.lock().unwrap();
		if digests.len() >= FILTER_CAPACITY {
			digests.clear();
		}
		!digests.insert(digest)
	}

	pub fn clear(&self, digest: u128) {
		self.digests.lock().unwrap().remove(&digest);
	}

	pub fn clear_blocks<'a>(&self, hashes: impl IntoIterator<Item = &'a BlockHash>) {
		let mut digests = self.digests.lock().unwrap();
		for hash in hashes {
			digests.remove(&Self::digest(hash));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn filter_reports_duplicates_until_cleared() {
		let filter = NetworkFilter::default();
		let digest = NetworkFilter::digest(&BlockHash([3u8; 32]));

		assert!(!filter.apply(digest));
		assert!(filter.apply(digest));

		filter.clear(digest);
		assert!(!filter.apply(digest));
	}
}
