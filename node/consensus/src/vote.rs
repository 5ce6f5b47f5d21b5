use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use typenum::U32;

use crate::primitives::{validate_message, Account, BlockHash, KeyPair, Signature};

/// Largest number of block hashes a single vote may endorse
pub const MAX_VOTE_HASHES: usize = 12;

const VOTE_DOMAIN_PREFIX: &[u8] = b"quill_vote";

/// A representative's endorsement of up to [MAX_VOTE_HASHES] blocks.
/// `sequence` increases monotonically per voter; stale sequences are replays.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
	pub account: Account,
	pub sequence: u64,
	pub hashes: Vec<BlockHash>,
	pub signature: Signature,
}

impl Vote {
	pub fn new_signed(key: &KeyPair, sequence: u64, hashes: Vec<BlockHash>) -> Self {
		debug_assert!(!hashes.is_empty() && hashes.len() <= MAX_VOTE_HASHES);
		let mut vote =
			Vote { account: key.account(), sequence, hashes, signature: Signature::default() };
		vote.signature = key.sign(vote.digest().as_bytes());
		vote
	}

	/// The signed message: a domain-separated digest of sequence and hashes
	pub fn digest(&self) -> BlockHash {
		let mut hasher = Blake2b::<U32>::new();
		hasher.update(VOTE_DOMAIN_PREFIX);
		hasher.update(self.sequence.to_be_bytes());
		for hash in &self.hashes {
			hasher.update(hash.as_bytes());
		}
		BlockHash(hasher.finalize().into())
	}

	pub fn validate(&self) -> bool {
		!self.hashes.is_empty() &&
			self.hashes.len() <= MAX_VOTE_HASHES &&
			validate_message(&self.account, self.digest().as_bytes(), &self.signature)
	}
}

impl std::fmt::Display for Vote {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "vote from {} sequence {} for {} block(s)", self.account, self.sequence, self.hashes.len())
	}
}

/// Outcome of ingesting a single vote
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum VoteCode {
	/// Bad signature
	Invalid,
	/// Sequence not newer for any referenced election
	Replay,
	/// At least one election processed the vote
	Vote,
	/// No election references any of the hashes
	Indeterminate,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn signed_votes_validate() {
		let key = KeyPair::generate();
		let vote = Vote::new_signed(&key, 1, vec![BlockHash([1u8; 32]), BlockHash([2u8; 32])]);
		assert!(vote.validate());
	}

	#[test]
	fn tampered_votes_do_not_validate() {
		let key = KeyPair::generate();
		let mut vote = Vote::new_signed(&key, 1, vec![BlockHash([1u8; 32])]);
		vote.sequence = 2;
		assert!(!vote.validate());

		let mut vote = Vote::new_signed(&key, 1, vec![BlockHash([1u8; 32])]);
		vote.hashes.push(BlockHash([2u8; 32]));
		assert!(!vote.validate());

		let mut vote = Vote::new_signed(&key, 1, vec![BlockHash([1u8; 32])]);
		vote.account = KeyPair::generate().account();
		assert!(!vote.validate());
	}

	#[test]
	fn digest_depends_on_sequence() {
		let key = KeyPair::generate();
		let one = Vote::new_signed(&key, 1, vec![BlockHash([1u8; 32])]);
		let two = Vote::new_signed(&key, 2, vec![BlockHash([1u8; 32])]);
		assert_ne!(one.digest(), two.digest());
	}
}
