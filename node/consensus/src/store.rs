use serde::{Deserialize, Serialize};

use crate::{
	block::{Block, StoredBlock},
	epochs::Epoch,
	primitives::{Account, Amount, BlockHash},
};

/// Failure writing to the backing store. Fatal for the batch that hit it.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
	#[error("store io error: {0}")]
	Io(String),
	#[error("store serialization error: {0}")]
	Serialization(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
	pub head: BlockHash,
	pub representative: Account,
	pub open_block: BlockHash,
	pub balance: Amount,
	/// Seconds since the unix epoch of the last modification
	pub modified: u64,
	pub block_count: u64,
	pub epoch: Epoch,
}

/// All blocks on the account up to `height` are cemented. Monotonically
/// non-decreasing, written only by the confirmation height processor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationHeightInfo {
	pub height: u64,
	pub frontier: BlockHash,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PendingKey {
	pub account: Account,
	pub hash: BlockHash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInfo {
	pub source: Account,
	pub amount: Amount,
	pub epoch: Epoch,
}

/// Blocks parked behind a missing dependency, keyed by the dependency so they
/// can be released when it arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UncheckedKey {
	pub dependency: BlockHash,
	pub hash: BlockHash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncheckedInfo {
	pub block: Block,
	pub modified: u64,
	/// Signature already checked by the verification stage
	pub verified: bool,
}

/// Read operations shared by read and write transactions.
pub trait ReadOps {
	fn block_get(&self, hash: &BlockHash) -> Option<StoredBlock>;
	fn block_exists(&self, hash: &BlockHash) -> bool {
		self.block_get(hash).is_some()
	}
	fn block_count(&self) -> u64;
	fn account_get(&self, account: &Account) -> Option<AccountInfo>;
	fn pending_get(&self, key: &PendingKey) -> Option<PendingInfo>;
	/// Whether any pending entry exists for the account
	fn pending_any(&self, account: &Account) -> bool;
	fn confirmation_height_get(&self, account: &Account) -> Option<ConfirmationHeightInfo>;
	fn confirmation_heights(&self) -> Vec<(Account, ConfirmationHeightInfo)>;
	fn frontier_get(&self, hash: &BlockHash) -> Option<Account>;
	fn unchecked_get(&self, dependency: &BlockHash) -> Vec<(UncheckedKey, UncheckedInfo)>;
	fn unchecked_count(&self) -> u64;
	/// Online weight samples sorted by sample timestamp
	fn online_weight(&self) -> Vec<(u64, Amount)>;
	fn rep_weights(&self) -> Vec<(Account, Amount)>;
}

pub trait ReadTransaction: ReadOps {
	/// Release and re-acquire the underlying snapshot so long-lived readers
	/// do not pin old store state
	fn refresh(&mut self);
}

/// Exclusive mutator. Only one write transaction is live at a time; exclusivity
/// is arbitrated by the write queue, not by the store.
pub trait WriteTransaction: ReadOps {
	fn block_put(&mut self, hash: BlockHash, block: StoredBlock);
	fn block_del(&mut self, hash: &BlockHash);
	fn block_successor_set(&mut self, hash: &BlockHash, successor: BlockHash);
	fn account_put(&mut self, account: Account, info: AccountInfo);
	fn account_del(&mut self, account: &Account);
	fn pending_put(&mut self, key: PendingKey, info: PendingInfo);
	fn pending_del(&mut self, key: &PendingKey);
	fn confirmation_height_put(&mut self, account: Account, info: ConfirmationHeightInfo);
	fn frontier_put(&mut self, hash: BlockHash, account: Account);
	fn frontier_del(&mut self, hash: &BlockHash);
	fn unchecked_put(&mut self, key: UncheckedKey, info: UncheckedInfo);
	fn unchecked_del(&mut self, key: &UncheckedKey);
	fn online_weight_put(&mut self, timestamp: u64, amount: Amount);
	fn online_weight_del(&mut self, timestamp: u64);
	fn rep_weight_put(&mut self, account: Account, amount: Amount);
	fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Transactional interface over the persistent tables. Implemented by the
/// node's rocksdb store and by the in-memory store used in tests.
pub trait Store: Send + Sync {
	fn tx_begin_read(&self) -> Box<dyn ReadTransaction + '_>;
	fn tx_begin_write(&self) -> Box<dyn WriteTransaction + '_>;
}
