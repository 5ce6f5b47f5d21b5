use serde::{Deserialize, Serialize};

use crate::primitives::{Account, Link};

/// Protocol upgrade generations. An account's epoch is raised by dedicated
/// epoch blocks whose link field carries a well-known marker value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Epoch {
	#[default]
	Epoch0,
	Epoch1,
	Epoch2,
}

impl Epoch {
	fn index(self) -> u8 {
		match self {
			Epoch::Epoch0 => 0,
			Epoch::Epoch1 => 1,
			Epoch::Epoch2 => 2,
		}
	}

	/// Epoch upgrades must not skip a generation
	pub fn is_sequential(from: Epoch, to: Epoch) -> bool {
		to.index() == from.index() + 1
	}
}

struct EpochEntry {
	epoch: Epoch,
	signer: Account,
	link: Link,
}

/// Registry of epoch upgrade markers and the accounts allowed to sign them.
#[derive(Default)]
pub struct Epochs {
	entries: Vec<EpochEntry>,
}

impl Epochs {
	pub fn add(&mut self, epoch: Epoch, signer: Account, link: Link) {
		debug_assert!(!self.entries.iter().any(|entry| entry.epoch == epoch));
		self.entries.push(EpochEntry { epoch, signer, link });
	}

	pub fn is_epoch_link(&self, link: &Link) -> bool {
		self.entries.iter().any(|entry| entry.link == *link)
	}

	pub fn epoch(&self, link: &Link) -> Option<Epoch> {
		self.entries.iter().find(|entry| entry.link == *link).map(|entry| entry.epoch)
	}

	pub fn signer(&self, link: &Link) -> Option<Account> {
		self.entries.iter().find(|entry| entry.link == *link).map(|entry| entry.signer)
	}

	pub fn link(&self, epoch: Epoch) -> Option<Link> {
		self.entries.iter().find(|entry| entry.epoch == epoch).map(|entry| entry.link)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::primitives::KeyPair;

	#[test]
	fn epoch_links_resolve_to_their_signer() {
		let signer = KeyPair::generate();
		let link = Link([0xfe; 32]);
		let mut epochs = Epochs::default();
		epochs.add(Epoch::Epoch1, signer.account(), link);

		assert!(epochs.is_epoch_link(&link));
		assert!(!epochs.is_epoch_link(&Link([0xfd; 32])));
		assert_eq!(epochs.epoch(&link), Some(Epoch::Epoch1));
		assert_eq!(epochs.signer(&link), Some(signer.account()));
		assert_eq!(epochs.link(Epoch::Epoch1), Some(link));
	}

	#[test]
	fn epochs_are_sequential() {
		assert!(Epoch::is_sequential(Epoch::Epoch0, Epoch::Epoch1));
		assert!(Epoch::is_sequential(Epoch::Epoch1, Epoch::Epoch2));
		assert!(!Epoch::is_sequential(Epoch::Epoch0, Epoch::Epoch2));
		assert!(!Epoch::is_sequential(Epoch::Epoch1, Epoch::Epoch1));
	}
}
