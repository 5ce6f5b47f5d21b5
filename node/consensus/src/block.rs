use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use typenum::U32;

use crate::{
	epochs::Epoch,
	primitives::{Account, Amount, BlockHash, Link, QualifiedRoot, Root, Signature},
};

/// Blocks are identified by the blake2b-256 digest of their canonical
/// encoding. Signature and work are attestations over the digest and are
/// excluded from it.
type BlockHasher = Blake2b<U32>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
pub enum BlockType {
	Send,
	Receive,
	Open,
	Change,
	State,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendBlock {
	pub previous: BlockHash,
	pub destination: Account,
	/// Balance remaining on the account after the send
	pub balance: Amount,
	pub signature: Signature,
	pub work: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveBlock {
	pub previous: BlockHash,
	pub source: BlockHash,
	pub signature: Signature,
	pub work: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenBlock {
	pub source: BlockHash,
	pub representative: Account,
	pub account: Account,
	pub signature: Signature,
	pub work: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBlock {
	pub previous: BlockHash,
	pub representative: Account,
	pub signature: Signature,
	pub work: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBlock {
	pub account: Account,
	/// Zero for the first block of an account
	pub previous: BlockHash,
	pub representative: Account,
	/// Absolute balance after this block
	pub balance: Amount,
	/// Destination account, source hash or epoch marker depending on the
	/// balance delta
	pub link: Link,
	pub signature: Signature,
	pub work: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
	Send(SendBlock),
	Receive(ReceiveBlock),
	Open(OpenBlock),
	Change(ChangeBlock),
	State(StateBlock),
}

impl Block {
	pub fn block_type(&self) -> BlockType {
		match self {
			Block::Send(_) => BlockType::Send,
			Block::Receive(_) => BlockType::Receive,
			Block::Open(_) => BlockType::Open,
			Block::Change(_) => BlockType::Change,
			Block::State(_) => BlockType::State,
		}
	}

	pub fn hash(&self) -> BlockHash {
		let mut hasher = BlockHasher::new();
		match self {
			Block::Send(block) => {
				hasher.update([0u8]);
				hasher.update(block.previous.as_bytes());
				hasher.update(block.destination.as_bytes());
				hasher.update(block.balance.to_be_bytes());
			},
			Block::Receive(block) => {
				hasher.update([1u8]);
				hasher.update(block.previous.as_bytes());
				hasher.update(block.source.as_bytes());
			},
			Block::Open(block) => {
				hasher.update([2u8]);
				hasher.update(block.source.as_bytes());
				hasher.update(block.representative.as_bytes());
				hasher.update(block.account.as_bytes());
			},
			Block::Change(block) => {
				hasher.update([3u8]);
				hasher.update(block.previous.as_bytes());
				hasher.update(block.representative.as_bytes());
			},
			Block::State(block) => {
				hasher.update([4u8]);
				hasher.update(block.account.as_bytes());
				hasher.update(block.previous.as_bytes());
				hasher.update(block.representative.as_bytes());
				hasher.update(block.balance.to_be_bytes());
				hasher.update(block.link.as_bytes());
			},
		}
		BlockHash(hasher.finalize().into())
	}

	/// Hash of the previous block on the account chain, zero for first blocks
	pub fn previous(&self) -> BlockHash {
		match self {
			Block::Send(block) => block.previous,
			Block::Receive(block) => block.previous,
			Block::Open(_) => BlockHash::ZERO,
			Block::Change(block) => block.previous,
			Block::State(block) => block.previous,
		}
	}

	/// The root this block contests in an election: `previous`, or the
	/// account for first blocks
	pub fn root(&self) -> Root {
		match self {
			Block::Open(block) => block.account.into(),
			Block::State(block) if block.previous.is_zero() => block.account.into(),
			_ => self.previous().into(),
		}
	}

	pub fn qualified_root(&self) -> QualifiedRoot {
		QualifiedRoot { previous: self.previous(), root: self.root() }
	}

	/// The account field, carried only by open and state blocks
	pub fn account_field(&self) -> Option<Account> {
		match self {
			Block::Open(block) => Some(block.account),
			Block::State(block) => Some(block.account),
			_ => None,
		}
	}

	pub fn representative_field(&self) -> Option<Account> {
		match self {
			Block::Open(block) => Some(block.representative),
			Block::Change(block) => Some(block.representative),
			Block::State(block) => Some(block.representative),
			_ => None,
		}
	}

	pub fn balance_field(&self) -> Option<Amount> {
		match self {
			Block::Send(block) => Some(block.balance),
			Block::State(block) => Some(block.balance),
			_ => None,
		}
	}

	pub fn link_field(&self) -> Option<Link> {
		match self {
			Block::State(block) => Some(block.link),
			_ => None,
		}
	}

	/// Source hash for explicit receive and open blocks. State block sources
	/// are context dependent (see the sideband's `is_receive`).
	pub fn source_field(&self) -> Option<BlockHash> {
		match self {
			Block::Receive(block) => Some(block.source),
			Block::Open(block) => Some(block.source),
			_ => None,
		}
	}

	pub fn destination_field(&self) -> Option<Account> {
		match self {
			Block::Send(block) => Some(block.destination),
			_ => None,
		}
	}

	pub fn signature(&self) -> &Signature {
		match self {
			Block::Send(block) => &block.signature,
			Block::Receive(block) => &block.signature,
			Block::Open(block) => &block.signature,
			Block::Change(block) => &block.signature,
			Block::State(block) => &block.signature,
		}
	}

	pub fn set_signature(&mut self, signature: Signature) {
		match self {
			Block::Send(block) => block.signature = signature,
			Block::Receive(block) => block.signature = signature,
			Block::Open(block) => block.signature = signature,
			Block::Change(block) => block.signature = signature,
			Block::State(block) => block.signature = signature,
		}
	}

	pub fn work(&self) -> u64 {
		match self {
			Block::Send(block) => block.work,
			Block::Receive(block) => block.work,
			Block::Open(block) => block.work,
			Block::Change(block) => block.work,
			Block::State(block) => block.work,
		}
	}

	pub fn set_work(&mut self, work: u64) {
		match self {
			Block::Send(block) => block.work = work,
			Block::Receive(block) => block.work = work,
			Block::Open(block) => block.work = work,
			Block::Change(block) => block.work = work,
			Block::State(block) => block.work = work,
		}
	}
}

/// Metadata derived at persist time and stored alongside the block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSideband {
	/// Next block on the account chain, zero while this is the frontier
	pub successor: BlockHash,
	pub account: Account,
	pub balance: Amount,
	pub height: u64,
	/// Seconds since the unix epoch at local persist time
	pub timestamp: u64,
	pub epoch: Epoch,
	pub is_send: bool,
	pub is_receive: bool,
	pub is_epoch: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlock {
	pub block: Block,
	pub sideband: BlockSideband,
}

impl StoredBlock {
	pub fn hash(&self) -> BlockHash {
		self.block.hash()
	}

	/// Source hash of the funds received by this block, if it receives any
	pub fn source(&self) -> Option<BlockHash> {
		match &self.block {
			Block::State(state) if self.sideband.is_receive => Some(state.link.as_hash()),
			block => block.source_field(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn send_block(previous: BlockHash) -> Block {
		Block::Send(SendBlock {
			previous,
			destination: Account([7u8; 32]),
			balance: 1000,
			signature: Signature::default(),
			work: 0,
		})
	}

	#[test]
	fn hash_ignores_signature_and_work() {
		let mut block = send_block(BlockHash([1u8; 32]));
		let hash = block.hash();
		block.set_signature(Signature::from_bytes([9u8; 64]));
		block.set_work(12345);
		assert_eq!(hash, block.hash());
	}

	#[test]
	fn hash_covers_every_field() {
		let base = send_block(BlockHash([1u8; 32]));
		let other_previous = send_block(BlockHash([2u8; 32]));
		assert_ne!(base.hash(), other_previous.hash());

		let mut other_balance = base.clone();
		if let Block::Send(send) = &mut other_balance {
			send.balance = 999;
		}
		assert_ne!(base.hash(), other_balance.hash());
	}

	#[test]
	fn root_of_first_blocks_is_the_account() {
		let open = Block::Open(OpenBlock {
			source: BlockHash([3u8; 32]),
			representative: Account([4u8; 32]),
			account: Account([5u8; 32]),
			signature: Signature::default(),
			work: 0,
		});
		assert_eq!(open.root(), Account([5u8; 32]).into());
		assert_eq!(open.qualified_root().previous, BlockHash::ZERO);

		let send = send_block(BlockHash([1u8; 32]));
		assert_eq!(send.root(), BlockHash([1u8; 32]).into());
	}
}
