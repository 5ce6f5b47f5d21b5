#[cfg(test)]
mod tests;

use std::sync::{
	atomic::{AtomicU64, Ordering},
	Arc,
};

use anyhow::{anyhow, bail, Result};
use tracing::debug;

use crate::{
	block::{Block, BlockSideband, ChangeBlock, OpenBlock, ReceiveBlock, SendBlock, StateBlock, StoredBlock},
	config::NetworkConstants,
	epochs::{Epoch, Epochs},
	primitives::{validate_message, Account, Amount, BlockHash, Link, QualifiedRoot},
	rep_weights::RepWeights,
	store::{AccountInfo, ConfirmationHeightInfo, PendingInfo, PendingKey, ReadOps, Store, WriteTransaction},
	work::{WorkPool, WorkVersion},
};

/// Outcome of applying one block to the ledger. Only `Progress` mutates the
/// store; every other result leaves it untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum ProcessResult {
	Progress,
	BadSignature,
	Old,
	NegativeSpend,
	Fork,
	Unreceivable,
	GapPrevious,
	GapSource,
	GapEpochOpenPending,
	OpenedBurnAccount,
	BalanceMismatch,
	RepresentativeMismatch,
	BlockPosition,
	InsufficientWork,
}

#[derive(Default)]
pub struct LedgerCache {
	pub block_count: AtomicU64,
	pub cemented_count: AtomicU64,
}

pub fn seconds_since_epoch() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.expect("system clock before unix epoch")
		.as_secs()
}

/// The account no key can sign for; funds sent to it are destroyed.
pub const BURN_ACCOUNT: Account = Account([0u8; 32]);

/// Validated view over the block store plus the state transition function.
/// Representative weights are maintained incrementally and are authoritative
/// after a successful `process`.
pub struct Ledger {
	pub store: Arc<dyn Store>,
	pub rep_weights: RepWeights,
	pub epochs: Epochs,
	pub constants: NetworkConstants,
	pub cache: LedgerCache,
	work: Arc<dyn WorkPool>,
}

impl Ledger {
	pub fn new(
		store: Arc<dyn Store>,
		constants: NetworkConstants,
		epochs: Epochs,
		work: Arc<dyn WorkPool>,
	) -> Self {
		let ledger = Ledger {
			store,
			rep_weights: RepWeights::default(),
			epochs,
			constants,
			cache: LedgerCache::default(),
			work,
		};
		{
			let txn = ledger.store.tx_begin_read();
			ledger.rep_weights.load(txn.rep_weights());
			ledger.cache.block_count.store(txn.block_count(), Ordering::Relaxed);
			let cemented =
				txn.confirmation_heights().iter().map(|(_, info)| info.height).sum::<u64>();
			ledger.cache.cemented_count.store(cemented, Ordering::Relaxed);
		}
		ledger
	}

	// ==== Read view ====

	pub fn latest(&self, txn: &dyn ReadOps, account: &Account) -> Option<BlockHash> {
		txn.account_get(account).map(|info| info.head)
	}

	pub fn account_info(&self, txn: &dyn ReadOps, account: &Account) -> Option<AccountInfo> {
		txn.account_get(account)
	}

	pub fn block_get(&self, txn: &dyn ReadOps, hash: &BlockHash) -> Option<StoredBlock> {
		txn.block_get(hash)
	}

	pub fn block_exists(&self, txn: &dyn ReadOps, hash: &BlockHash) -> bool {
		txn.block_exists(hash)
	}

	/// Balance of the account as of `hash`
	pub fn balance(&self, txn: &dyn ReadOps, hash: &BlockHash) -> Option<Amount> {
		txn.block_get(hash).map(|block| block.sideband.balance)
	}

	pub fn account_balance(&self, txn: &dyn ReadOps, account: &Account) -> Amount {
		txn.account_get(account).map(|info| info.balance).unwrap_or_default()
	}

	/// Account owning the block
	pub fn account(&self, txn: &dyn ReadOps, hash: &BlockHash) -> Option<Account> {
		txn.block_get(hash).map(|block| block.sideband.account)
	}

	/// Value moved by the block relative to its predecessor
	pub fn amount(&self, txn: &dyn ReadOps, hash: &BlockHash) -> Option<Amount> {
		let block = txn.block_get(hash)?;
		let previous = block.block.previous();
		if previous.is_zero() {
			return Some(block.sideband.balance)
		}
		let previous_balance = self.balance(txn, &previous)?;
		Some(block.sideband.balance.abs_diff(previous_balance))
	}

	pub fn weight(&self, account: &Account) -> Amount {
		self.rep_weights.representation_get(account)
	}

	pub fn confirmation_height(&self, txn: &dyn ReadOps, account: &Account) -> ConfirmationHeightInfo {
		txn.confirmation_height_get(account).unwrap_or_default()
	}

	pub fn block_confirmed(&self, txn: &dyn ReadOps, hash: &BlockHash) -> bool {
		match txn.block_get(hash) {
			Some(block) =>
				self.confirmation_height(txn, &block.sideband.account).height >=
					block.sideband.height,
			None => false,
		}
	}

	pub fn successor(&self, txn: &dyn ReadOps, hash: &BlockHash) -> Option<BlockHash> {
		txn.block_get(hash)
			.map(|block| block.sideband.successor)
			.filter(|successor| !successor.is_zero())
	}

	/// The ledger's block occupying `root`, if any: the successor of
	/// `previous`, or the open block of the account for first-block roots.
	pub fn block_at_root(&self, txn: &dyn ReadOps, root: &QualifiedRoot) -> Option<BlockHash> {
		if !root.previous.is_zero() {
			self.successor(txn, &root.previous)
		} else {
			txn.account_get(&Account(root.root.0)).map(|info| info.open_block)
		}
	}

	/// Walk `steps` predecessors down the account chain
	pub fn backtrack(
		&self,
		txn: &dyn ReadOps,
		block: &StoredBlock,
		steps: u64,
	) -> Option<StoredBlock> {
		let mut current = block.clone();
		for _ in 0..steps {
			let previous = current.block.previous();
			if previous.is_zero() {
				return None
			}
			current = txn.block_get(&previous)?;
		}
		Some(current)
	}

	/// Hashes this block cannot be confirmed without: its predecessor and,
	/// for receives, its source
	pub fn dependent_blocks(&self, block: &StoredBlock) -> [Option<BlockHash>; 2] {
		let previous = Some(block.block.previous()).filter(|previous| !previous.is_zero());
		[previous, block.source()]
	}

	pub fn is_epoch_link(&self, link: &Link) -> bool {
		self.epochs.is_epoch_link(link)
	}

	pub fn epoch_signer(&self, link: &Link) -> Option<Account> {
		self.epochs.signer(link)
	}

	/// Representative as of `hash`: the nearest block at or below it carrying
	/// a representative field
	pub fn representative_calculated(&self, txn: &dyn ReadOps, hash: &BlockHash) -> Account {
		let mut current = *hash;
		while !current.is_zero() {
			match txn.block_get(&current) {
				Some(block) => match block.block.representative_field() {
					Some(representative) => return representative,
					None => current = block.block.previous(),
				},
				None => break,
			}
		}
		Account::ZERO
	}

	// ==== State transition ====

	pub fn process(&self, txn: &mut dyn WriteTransaction, block: &Block) -> ProcessResult {
		let hash = block.hash();
		if txn.block_exists(&hash) {
			return ProcessResult::Old
		}
		let difficulty = self.work.difficulty(WorkVersion::Work1, &block.root(), block.work());
		if difficulty < self.constants.work_threshold {
			return ProcessResult::InsufficientWork
		}
		let result = match block {
			Block::State(state) => self.process_state(txn, state, hash),
			Block::Send(send) => self.process_send(txn, send, hash),
			Block::Receive(receive) => self.process_receive(txn, receive, hash),
			Block::Open(open) => self.process_open(txn, open, hash),
			Block::Change(change) => self.process_change(txn, change, hash),
		};
		if result == ProcessResult::Progress {
			self.cache.block_count.fetch_add(1, Ordering::Relaxed);
		}
		result
	}

	fn process_state(
		&self,
		txn: &mut dyn WriteTransaction,
		state: &StateBlock,
		hash: BlockHash,
	) -> ProcessResult {
		let is_first = state.previous.is_zero();
		let existing = txn.account_get(&state.account);

		if !is_first {
			if !txn.block_exists(&state.previous) {
				return ProcessResult::GapPrevious
			}
			match &existing {
				Some(info) =>
					if state.previous != info.head {
						return ProcessResult::Fork
					},
				// The named previous exists but this account has no chain
				// yet; the account chain has not caught up
				None => return ProcessResult::GapPrevious,
			}
		} else if existing.is_some() {
			return ProcessResult::Fork
		}
		if is_first && state.account == BURN_ACCOUNT {
			return ProcessResult::OpenedBurnAccount
		}

		let is_epoch = !state.link.is_zero() && self.epochs.is_epoch_link(&state.link);
		let signer = if is_epoch {
			self.epochs.signer(&state.link).unwrap_or(state.account)
		} else {
			state.account
		};
		if !validate_message(&signer, hash.as_bytes(), &state.signature) {
			return ProcessResult::BadSignature
		}

		let previous_balance = existing.as_ref().map(|info| info.balance).unwrap_or_default();
		let previous_epoch = existing.as_ref().map(|info| info.epoch).unwrap_or_default();
		let height = existing.as_ref().map(|info| info.block_count).unwrap_or_default() + 1;

		if is_epoch {
			let target = self.epochs.epoch(&state.link).expect("epoch link resolves");
			if !Epoch::is_sequential(previous_epoch, target) {
				return ProcessResult::BlockPosition
			}
			if state.balance != previous_balance {
				return ProcessResult::BalanceMismatch
			}
			match &existing {
				Some(info) =>
					if state.representative != info.representative {
						return ProcessResult::RepresentativeMismatch
					},
				None => {
					// Epoch-open: an upgrade block for an account that is not
					// open yet. Valid only while funds are waiting for it.
					if state.representative != Account::ZERO {
						return ProcessResult::RepresentativeMismatch
					}
					if !txn.pending_any(&state.account) {
						return ProcessResult::GapEpochOpenPending
					}
				},
			}
			let sideband = BlockSideband {
				successor: BlockHash::ZERO,
				account: state.account,
				balance: previous_balance,
				height,
				timestamp: seconds_since_epoch(),
				epoch: target,
				is_send: false,
				is_receive: false,
				is_epoch: true,
			};
			// Weight is untouched: balance and representative are unchanged
			self.apply(txn, hash, Block::State(state.clone()), sideband, &existing, None);
			return ProcessResult::Progress
		}

		let mut epoch = previous_epoch;
		let mut pending_op = None;
		let is_send = state.balance < previous_balance;
		let is_receive = state.balance > previous_balance;

		if is_send {
			let amount = previous_balance - state.balance;
			pending_op = Some(PendingOp::Put(
				PendingKey { account: state.link.as_account(), hash },
				PendingInfo { source: state.account, amount, epoch },
			));
		} else if is_receive || is_first {
			if state.link.is_zero() {
				// Nothing to receive; a first block must receive something
				return ProcessResult::GapSource
			}
			let source = state.link.as_hash();
			if !txn.block_exists(&source) {
				return ProcessResult::GapSource
			}
			let key = PendingKey { account: state.account, hash: source };
			let pending = match txn.pending_get(&key) {
				Some(pending) => pending,
				None => return ProcessResult::Unreceivable,
			};
			if state.balance - previous_balance != pending.amount {
				return ProcessResult::BalanceMismatch
			}
			epoch = epoch.max(pending.epoch);
			pending_op = Some(PendingOp::Del(key));
		} else {
			// Balance unchanged: a representative change; a non-zero link
			// would claim a source that transfers nothing
			if !state.link.is_zero() {
				return ProcessResult::BalanceMismatch
			}
		}

		let sideband = BlockSideband {
			successor: BlockHash::ZERO,
			account: state.account,
			balance: state.balance,
			height,
			timestamp: seconds_since_epoch(),
			epoch,
			is_send,
			is_receive: is_receive || (is_first && !is_send),
			is_epoch: false,
		};
		if let Some(info) = &existing {
			self.rep_weights.representation_subtract(info.representative, info.balance);
		}
		self.rep_weights.representation_add(state.representative, state.balance);
		self.apply(txn, hash, Block::State(state.clone()), sideband, &existing, pending_op);
		ProcessResult::Progress
	}

	fn legacy_head(
		&self,
		txn: &dyn ReadOps,
		previous: &BlockHash,
	) -> Result<(StoredBlock, AccountInfo), ProcessResult> {
		let previous_block = txn.block_get(previous).ok_or(ProcessResult::GapPrevious)?;
		// Accounts upgraded to state blocks no longer accept legacy blocks
		if matches!(previous_block.block, Block::State(_)) {
			return Err(ProcessResult::BlockPosition)
		}
		let info =
			txn.account_get(&previous_block.sideband.account).ok_or(ProcessResult::GapPrevious)?;
		if info.head != *previous {
			return Err(ProcessResult::Fork)
		}
		Ok((previous_block, info))
	}

	fn process_send(
		&self,
		txn: &mut dyn WriteTransaction,
		send: &SendBlock,
		hash: BlockHash,
	) -> ProcessResult {
		let (previous_block, info) = match self.legacy_head(&*txn, &send.previous) {
			Ok(found) => found,
			Err(result) => return result,
		};
		let account = previous_block.sideband.account;
		if !validate_message(&account, hash.as_bytes(), &send.signature) {
			return ProcessResult::BadSignature
		}
		if send.balance > info.balance {
			return ProcessResult::NegativeSpend
		}
		let amount = info.balance - send.balance;
		let sideband = BlockSideband {
			successor: BlockHash::ZERO,
			account,
			balance: send.balance,
			height: info.block_count + 1,
			timestamp: seconds_since_epoch(),
			epoch: Epoch::Epoch0,
			is_send: true,
			is_receive: false,
			is_epoch: false,
		};
		self.rep_weights.representation_subtract(info.representative, amount);
		self.apply(
			txn,
			hash,
			Block::Send(send.clone()),
			sideband,
			&Some(info),
			Some(PendingOp::Put(
				PendingKey { account: send.destination, hash },
				PendingInfo { source: account, amount, epoch: Epoch::Epoch0 },
			)),
		);
		ProcessResult::Progress
	}

	fn process_receive(
		&self,
		txn: &mut dyn WriteTransaction,
		receive: &ReceiveBlock,
		hash: BlockHash,
	) -> ProcessResult {
		let (previous_block, info) = match self.legacy_head(&*txn, &receive.previous) {
			Ok(found) => found,
			Err(result) => return result,
		};
		let account = previous_block.sideband.account;
		if !validate_message(&account, hash.as_bytes(), &receive.signature) {
			return ProcessResult::BadSignature
		}
		if !txn.block_exists(&receive.source) {
			return ProcessResult::GapSource
		}
		let key = PendingKey { account, hash: receive.source };
		let pending = match txn.pending_get(&key) {
			Some(pending) => pending,
			None => return ProcessResult::Unreceivable,
		};
		let sideband = BlockSideband {
			successor: BlockHash::ZERO,
			account,
			balance: info.balance + pending.amount,
			height: info.block_count + 1,
			timestamp: seconds_since_epoch(),
			epoch: Epoch::Epoch0,
			is_send: false,
			is_receive: true,
			is_epoch: false,
		};
		self.rep_weights.representation_add(info.representative, pending.amount);
		self.apply(
			txn,
			hash,
			Block::Receive(receive.clone()),
			sideband,
			&Some(info),
			Some(PendingOp::Del(key)),
		);
		ProcessResult::Progress
	}

	fn process_open(
		&self,
		txn: &mut dyn WriteTransaction,
		open: &OpenBlock,
		hash: BlockHash,
	) -> ProcessResult {
		if txn.account_get(&open.account).is_some() {
			return ProcessResult::Fork
		}
		if open.account == BURN_ACCOUNT {
			return ProcessResult::OpenedBurnAccount
		}
		if !validate_message(&open.account, hash.as_bytes(), &open.signature) {
			return ProcessResult::BadSignature
		}
		if !txn.block_exists(&open.source) {
			return ProcessResult::GapSource
		}
		let key = PendingKey { account: open.account, hash: open.source };
		let pending = match txn.pending_get(&key) {
			Some(pending) => pending,
			None => return ProcessResult::Unreceivable,
		};
		let sideband = BlockSideband {
			successor: BlockHash::ZERO,
			account: open.account,
			balance: pending.amount,
			height: 1,
			timestamp: seconds_since_epoch(),
			epoch: Epoch::Epoch0,
			is_send: false,
			is_receive: true,
			is_epoch: false,
		};
		self.rep_weights.representation_add(open.representative, pending.amount);
		self.apply(txn, hash, Block::Open(open.clone()), sideband, &None, Some(PendingOp::Del(key)));
		ProcessResult::Progress
	}

	fn process_change(
		&self,
		txn: &mut dyn WriteTransaction,
		change: &ChangeBlock,
		hash: BlockHash,
	) -> ProcessResult {
		let (previous_block, info) = match self.legacy_head(&*txn, &change.previous) {
			Ok(found) => found,
			Err(result) => return result,
		};
		let account = previous_block.sideband.account;
		if !validate_message(&account, hash.as_bytes(), &change.signature) {
			return ProcessResult::BadSignature
		}
		let sideband = BlockSideband {
			successor: BlockHash::ZERO,
			account,
			balance: info.balance,
			height: info.block_count + 1,
			timestamp: seconds_since_epoch(),
			epoch: Epoch::Epoch0,
			is_send: false,
			is_receive: false,
			is_epoch: false,
		};
		self.rep_weights.representation_subtract(info.representative, info.balance);
		self.rep_weights.representation_add(change.representative, info.balance);
		self.apply(txn, hash, Block::Change(change.clone()), sideband, &Some(info), None);
		ProcessResult::Progress
	}

	/// Persist a validated block: store it, link the predecessor's successor,
	/// advance the account head and apply the pending-table change.
	fn apply(
		&self,
		txn: &mut dyn WriteTransaction,
		hash: BlockHash,
		block: Block,
		sideband: BlockSideband,
		existing: &Option<AccountInfo>,
		pending_op: Option<PendingOp>,
	) {
		let previous = block.previous();
		let is_legacy = !matches!(block, Block::State(_));
		let representative =
			block.representative_field().or_else(|| existing.as_ref().map(|info| info.representative)).unwrap_or(Account::ZERO);

		txn.block_put(hash, StoredBlock { block, sideband: sideband.clone() });
		if !previous.is_zero() {
			txn.block_successor_set(&previous, hash);
			if is_legacy {
				txn.frontier_del(&previous);
			}
		}
		if is_legacy {
			txn.frontier_put(hash, sideband.account);
		}
		match pending_op {
			Some(PendingOp::Put(key, info)) => txn.pending_put(key, info),
			Some(PendingOp::Del(key)) => txn.pending_del(&key),
			None => {},
		}
		txn.account_put(
			sideband.account,
			AccountInfo {
				head: hash,
				representative,
				open_block: existing.as_ref().map(|info| info.open_block).unwrap_or(hash),
				balance: sideband.balance,
				modified: sideband.timestamp,
				block_count: sideband.height,
				epoch: sideband.epoch,
			},
		);
	}

	// ==== Rollback ====

	/// Remove blocks from the account frontier down to and including `hash`,
	/// restoring account state, pending entries and representative weights.
	/// Returns the removed blocks, newest first, for requeueing.
	///
	/// Sends whose funds were already received cannot be rolled back here;
	/// resolving those requires rolling back the receiving account first.
	pub fn rollback(
		&self,
		txn: &mut dyn WriteTransaction,
		hash: &BlockHash,
	) -> Result<Vec<Block>> {
		let target = txn.block_get(hash).ok_or_else(|| anyhow!("rollback target not found"))?;
		let account = target.sideband.account;
		if self.confirmation_height(&*txn, &account).height >= target.sideband.height {
			bail!("rollback target {} is cemented", hash);
		}

		let mut rolled_back = Vec::new();
		loop {
			let info = txn
				.account_get(&account)
				.ok_or_else(|| anyhow!("account vanished during rollback"))?;
			let head_hash = info.head;
			let head = txn
				.block_get(&head_hash)
				.ok_or_else(|| anyhow!("head block missing during rollback"))?;

			if head.sideband.is_send {
				let destination = match &head.block {
					Block::Send(send) => send.destination,
					Block::State(state) => state.link.as_account(),
					_ => unreachable!("sideband marks only sends"),
				};
				let key = PendingKey { account: destination, hash: head_hash };
				if txn.pending_get(&key).is_none() {
					bail!("cannot roll back {}: sent funds already received", head_hash);
				}
				txn.pending_del(&key);
			}
			if let Some(source) = head.source() {
				let source_block = txn
					.block_get(&source)
					.ok_or_else(|| anyhow!("source block missing during rollback"))?;
				let amount = self
					.amount(txn, &head_hash)
					.ok_or_else(|| anyhow!("no amount for receive during rollback"))?;
				txn.pending_put(
					PendingKey { account, hash: source },
					PendingInfo {
						source: source_block.sideband.account,
						amount,
						epoch: source_block.sideband.epoch,
					},
				);
			}

			self.rep_weights.representation_subtract(info.representative, info.balance);
			txn.block_del(&head_hash);
			let is_legacy = !matches!(head.block, Block::State(_));
			if is_legacy {
				txn.frontier_del(&head_hash);
			}
			self.cache.block_count.fetch_sub(1, Ordering::Relaxed);

			let previous = head.block.previous();
			if previous.is_zero() {
				txn.account_del(&account);
			} else {
				let previous_block = txn
					.block_get(&previous)
					.ok_or_else(|| anyhow!("previous block missing during rollback"))?;
				txn.block_successor_set(&previous, BlockHash::ZERO);
				if is_legacy {
					txn.frontier_put(previous, account);
				}
				let representative = self.representative_calculated(&*txn, &previous);
				self.rep_weights
					.representation_add(representative, previous_block.sideband.balance);
				txn.account_put(
					account,
					AccountInfo {
						head: previous,
						representative,
						open_block: info.open_block,
						balance: previous_block.sideband.balance,
						modified: seconds_since_epoch(),
						block_count: previous_block.sideband.height,
						epoch: previous_block.sideband.epoch,
					},
				);
			}

			rolled_back.push(head.block);
			if head_hash == *hash {
				break
			}
		}
		debug!("rolled back {} block(s) from account {}", rolled_back.len(), account);
		Ok(rolled_back)
	}
}

enum PendingOp {
	Put(PendingKey, PendingInfo),
	Del(PendingKey),
}
