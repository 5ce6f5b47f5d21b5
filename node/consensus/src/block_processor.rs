#[cfg(test)]
mod tests;

use std::{
	collections::VecDeque,
	pin::pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex,
	},
	time::Instant,
};

use tokio::sync::{watch, Notify};
use tracing::{debug, error, info_span, trace, Instrument};

use crate::{
	block::Block,
	config::NetworkConstants,
	elections::ActiveElections,
	gap_cache::GapCache,
	ledger::{seconds_since_epoch, Ledger, ProcessResult},
	network::{Message, Network},
	observers::Observers,
	primitives::BlockHash,
	signature_checker::{SignatureCheckSet, SignatureChecker, BATCH_SIZE},
	stats::{Direction, StatDetail, StatType, Stats},
	store::{UncheckedInfo, UncheckedKey, WriteTransaction},
	vote_generator::VoteGenerator,
	write_queue::{WriteQueue, Writer},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOrigin {
	Local,
	Remote,
}

struct BlockContext {
	block: Block,
	origin: BlockOrigin,
	verified: bool,
}

#[derive(Default)]
struct Queues {
	blocks: VecDeque<BlockContext>,
	/// Drained before `blocks`; local and rollback-replay blocks
	forced: VecDeque<Block>,
}

struct VerificationQueue {
	queue: Mutex<VecDeque<BlockContext>>,
	added: Notify,
	space: Notify,
	active: AtomicBool,
	max_size: usize,
}

/// Ingests candidate blocks: state blocks pass through an asynchronous
/// signature-verification stage, everything is then applied to the ledger in
/// batches under the write queue, gaps are parked in the unchecked set, and
/// successfully processed blocks are handed to the election engine.
pub struct BlockProcessor {
	ledger: Arc<Ledger>,
	constants: NetworkConstants,
	write_queue: Arc<WriteQueue>,
	active: Arc<ActiveElections>,
	gap_cache: Arc<GapCache>,
	vote_generator: Arc<VoteGenerator>,
	network: Arc<dyn Network>,
	checker: Arc<SignatureChecker>,
	observers: Arc<Observers>,
	stats: Arc<Stats>,
	queues: Mutex<Queues>,
	added: Notify,
	drained: Notify,
	batch_active: AtomicBool,
	verification: VerificationQueue,
}

impl BlockProcessor {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		ledger: Arc<Ledger>,
		constants: NetworkConstants,
		write_queue: Arc<WriteQueue>,
		active: Arc<ActiveElections>,
		gap_cache: Arc<GapCache>,
		vote_generator: Arc<VoteGenerator>,
		network: Arc<dyn Network>,
		checker: Arc<SignatureChecker>,
		observers: Arc<Observers>,
		stats: Arc<Stats>,
	) -> Self {
		let verification_size = if constants.block_processor_verification_size != 0 {
			constants.block_processor_verification_size
		} else {
			BATCH_SIZE * 16
		};
		BlockProcessor {
			ledger,
			constants,
			write_queue,
			active,
			gap_cache,
			vote_generator,
			network,
			checker,
			observers,
			stats,
			queues: Mutex::new(Queues::default()),
			added: Notify::new(),
			drained: Notify::new(),
			batch_active: AtomicBool::new(false),
			verification: VerificationQueue {
				queue: Mutex::new(VecDeque::new()),
				added: Notify::new(),
				space: Notify::new(),
				active: AtomicBool::new(false),
				max_size: verification_size,
			},
		}
	}

	/// Queue a block for processing. State blocks go through the
	/// signature-verification stage first, which applies backpressure when
	/// saturated. Duplicate suppression belongs to the transport's network
	/// filter, upstream of this call.
	pub async fn add(&self, block: Block, origin: BlockOrigin) {
		match &block {
			Block::State(_) => {
				let context = BlockContext { block, origin, verified: false };
				loop {
					let mut space = pin!(self.verification.space.notified());
					space.as_mut().enable();
					{
						let mut queue = self.verification.queue.lock().unwrap();
						if queue.len() < self.verification.max_size {
							queue.push_back(context);
							break
						}
					}
					space.await;
				}
				self.verification.added.notify_one();
			},
			_ => {
				self.queues
					.lock()
					.unwrap()
					.blocks
					.push_back(BlockContext { block, origin, verified: false });
				self.added.notify_one();
			},
		}
	}

	/// Queue into the high-priority lane, ahead of everything in `add`'s
	pub fn force(&self, block: Block) {
		self.queues.lock().unwrap().forced.push_back(block);
		self.added.notify_one();
	}

	fn queue_len(&self) -> usize {
		let queues = self.queues.lock().unwrap();
		queues.blocks.len() + queues.forced.len() + self.verification.queue.lock().unwrap().len()
	}

	pub fn full(&self) -> bool {
		self.queue_len() >= self.constants.block_processor_full_size
	}

	pub fn half_full(&self) -> bool {
		self.queue_len() >= self.constants.block_processor_full_size / 2
	}

	pub fn size(&self) -> usize {
		self.queue_len()
	}

	/// Wait until both queues are drained and no batch is in flight
	pub async fn flush(&self) {
		loop {
			let mut drained = pin!(self.drained.notified());
			drained.as_mut().enable();
			if self.queue_len() == 0 &&
				!self.batch_active.load(Ordering::SeqCst) &&
				!self.verification.active.load(Ordering::SeqCst)
			{
				return
			}
			drained.await;
		}
	}

	/// Main processing loop, one batch per write-queue slot
	pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
		let span = info_span!("BlockProcessor");
		loop {
			let has_blocks = {
				let queues = self.queues.lock().unwrap();
				!queues.blocks.is_empty() || !queues.forced.is_empty()
			};
			if has_blocks {
				self.process_batch().instrument(span.clone()).await;
			} else {
				self.drained.notify_waiters();
				let mut added = pin!(self.added.notified());
				added.as_mut().enable();
				{
					let queues = self.queues.lock().unwrap();
					if !queues.blocks.is_empty() || !queues.forced.is_empty() {
						continue
					}
				}
				tokio::select! {
					_ = added => {},
					_ = stop.changed() => break,
				}
			}
		}
	}

	/// Signature-verification stage loop: batches state blocks through the
	/// checker and feeds the valid ones into the main queue
	pub async fn run_verification(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
		let span = info_span!("StateBlockVerification");
		let max_batch = BATCH_SIZE * 4;
		loop {
			let items: Vec<BlockContext> = {
				let mut queue = self.verification.queue.lock().unwrap();
				let take = queue.len().min(max_batch);
				if take > 0 {
					self.verification.active.store(true, Ordering::SeqCst);
				}
				queue.drain(..take).collect()
			};
			if items.is_empty() {
				let mut added = pin!(self.verification.added.notified());
				added.as_mut().enable();
				if !self.verification.queue.lock().unwrap().is_empty() {
					continue
				}
				tokio::select! {
					_ = added => {},
					_ = stop.changed() => break,
				}
				continue
			}
			{
				let _entered = span.enter();
				self.verify_state_blocks(items);
			}
			self.verification.active.store(false, Ordering::SeqCst);
			self.verification.space.notify_waiters();
		}
	}

	fn verify_state_blocks(&self, items: Vec<BlockContext>) {
		let mut check = SignatureCheckSet::new(
			items.iter().map(|item| item.block.hash().as_bytes().to_vec()).collect(),
			items
				.iter()
				.map(|item| {
					// Epoch blocks are signed by the epoch signer rather than
					// the account
					let block = &item.block;
					match block.link_field() {
						Some(link) if self.ledger.is_epoch_link(&link) =>
							self.ledger.epoch_signer(&link).expect("epoch link has a signer"),
						_ => block.account_field().expect("state blocks carry an account"),
					}
				})
				.collect(),
			items.iter().map(|item| *item.block.signature()).collect(),
		);
		self.checker.verify(&mut check);

		let mut queued = 0usize;
		for (mut item, verification) in items.into_iter().zip(check.verifications) {
			if verification == 1 {
				item.verified = true;
				self.queues.lock().unwrap().blocks.push_back(item);
				queued += 1;
			} else {
				self.stats.inc(StatType::Block, StatDetail::BadSignature, Direction::In);
				if item.origin == BlockOrigin::Local {
					self.observers.notify_block_invalid(&item.block);
				}
			}
		}
		if queued > 0 {
			self.added.notify_one();
		}
	}

	async fn process_batch(&self) {
		self.batch_active.store(true, Ordering::SeqCst);
		let guard = self.write_queue.wait(Writer::BlockProcessor).await;
		let mut txn = self.ledger.store.tx_begin_write();
		// Events that must run after the write transaction commits
		let mut post_events: Vec<Box<dyn FnOnce() + Send>> = Vec::new();

		let deadline = Instant::now() + self.constants.block_processor_batch_max_time;
		let mut number = 0usize;
		while number < self.constants.block_processor_batch_size && Instant::now() < deadline {
			let (context, forced) = {
				let mut queues = self.queues.lock().unwrap();
				match queues.forced.pop_front() {
					Some(block) =>
						(Some(BlockContext { block, origin: BlockOrigin::Local, verified: false }), true),
					None => (queues.blocks.pop_front(), false),
				}
			};
			let Some(context) = context else { break };
			self.process_one(&mut *txn, &mut post_events, context, forced);
			number += 1;
		}

		match txn.commit() {
			Ok(()) => {
				drop(guard);
				for event in post_events {
					event();
				}
			},
			Err(err) => {
				// The batch is abandoned; committed state is unchanged so the
				// post events must not run
				error!("store failure while committing block batch: {err}");
			},
		}
		self.batch_active.store(false, Ordering::SeqCst);
		if self.queue_len() == 0 {
			self.drained.notify_waiters();
		}
	}

	fn process_one(
		&self,
		txn: &mut dyn WriteTransaction,
		post_events: &mut Vec<Box<dyn FnOnce() + Send>>,
		context: BlockContext,
		forced: bool,
	) {
		let block = context.block;
		let hash = block.hash();

		if forced {
			// A forced block replaces whatever currently occupies its root
			if let Some(successor) = self.ledger.block_at_root(&*txn, &block.qualified_root()) {
				if successor != hash {
					debug!("forced block {hash} rolling back {successor}");
					match self.ledger.rollback(txn, &successor) {
						Ok(rolled_back) => {
							let mut queues = self.queues.lock().unwrap();
							for rolled in rolled_back {
								queues.blocks.push_back(BlockContext {
									block: rolled,
									origin: BlockOrigin::Local,
									verified: false,
								});
							}
						},
						Err(err) => {
							error!("rollback of {successor} failed: {err:#}");
							return
						},
					}
				}
			}
		}

		let result = self.ledger.process(txn, &block);
		trace!("block {hash} processed: {result}");
		match result {
			ProcessResult::Progress => {
				self.stats.inc(StatType::Block, StatDetail::Progress, Direction::In);
				self.gap_cache.erase(&hash);
				self.queue_unchecked(txn, &hash);
				if let Some(destination) = block.destination_field().or_else(|| {
					block
						.link_field()
						.filter(|_| {
							txn.block_get(&hash).is_some_and(|stored| stored.sideband.is_send)
						})
						.map(|link| link.as_account())
				}) {
					// A new pending entry may unpark an epoch-open waiting on it
					self.queue_unchecked(txn, &BlockHash(destination.0));
				}
				post_events.push(self.live_event(hash, context.origin));
			},
			ProcessResult::GapPrevious => {
				self.stats.inc(StatType::Block, StatDetail::GapPrevious, Direction::In);
				self.park_unchecked(txn, block.previous(), block, context.verified);
				self.gap_cache.add(hash, Instant::now());
			},
			ProcessResult::GapSource => {
				self.stats.inc(StatType::Block, StatDetail::GapSource, Direction::In);
				let dependency = block
					.source_field()
					.or_else(|| block.link_field().map(|link| link.as_hash()))
					.unwrap_or(BlockHash::ZERO);
				self.park_unchecked(txn, dependency, block, context.verified);
				self.gap_cache.add(hash, Instant::now());
			},
			ProcessResult::GapEpochOpenPending => {
				// Parked under the account until funds for it arrive
				let dependency =
					block.account_field().map(|account| BlockHash(account.0)).unwrap_or_default();
				self.park_unchecked(txn, dependency, block, context.verified);
			},
			ProcessResult::Old => {
				self.stats.inc(StatType::Block, StatDetail::Old, Direction::In);
			},
			ProcessResult::Fork => {
				self.stats.inc(StatType::Block, StatDetail::Fork, Direction::In);
				post_events.push(self.fork_event(block));
			},
			ProcessResult::BadSignature |
			ProcessResult::NegativeSpend |
			ProcessResult::Unreceivable |
			ProcessResult::OpenedBurnAccount |
			ProcessResult::BalanceMismatch |
			ProcessResult::RepresentativeMismatch |
			ProcessResult::BlockPosition |
			ProcessResult::InsufficientWork => {
				self.stats.inc(StatType::Block, StatDetail::Invalid, Direction::In);
				debug!("block {hash} rejected: {result}");
				if context.origin == BlockOrigin::Local {
					let observers = self.observers.clone();
					post_events.push(Box::new(move || observers.notify_block_invalid(&block)));
				}
			},
		}
	}

	fn park_unchecked(
		&self,
		txn: &mut dyn WriteTransaction,
		dependency: BlockHash,
		block: Block,
		verified: bool,
	) {
		let key = UncheckedKey { dependency, hash: block.hash() };
		txn.unchecked_put(key, UncheckedInfo { block, modified: seconds_since_epoch(), verified });
	}

	/// Release blocks parked behind `dependency` back into the queue
	fn queue_unchecked(&self, txn: &mut dyn WriteTransaction, dependency: &BlockHash) {
		let children = txn.unchecked_get(dependency);
		if children.is_empty() {
			return
		}
		let mut queues = self.queues.lock().unwrap();
		for (key, info) in children {
			txn.unchecked_del(&key);
			queues.blocks.push_back(BlockContext {
				block: info.block,
				origin: BlockOrigin::Remote,
				verified: info.verified,
			});
		}
		drop(queues);
		self.added.notify_one();
	}

	/// Post-commit event for a successfully processed block: start or join
	/// its election, propagate it, and arm the vote generator
	fn live_event(&self, hash: BlockHash, origin: BlockOrigin) -> Box<dyn FnOnce() + Send> {
		let ledger = self.ledger.clone();
		let active = self.active.clone();
		let network = self.network.clone();
		let vote_generator = self.vote_generator.clone();
		Box::new(move || {
			let stored = {
				let txn = ledger.store.tx_begin_read();
				txn.block_get(&hash)
			};
			let Some(stored) = stored else { return };
			let block = stored.block.clone();
			let inserted = active.insert(&stored, None);
			if inserted && origin == BlockOrigin::Remote {
				network.flood(Message::Publish(block), 0.5);
			}
			vote_generator.add(hash);
		})
	}

	/// Post-commit event for a fork: make sure an election is running for the
	/// root and submit the arriving block as a candidate
	fn fork_event(&self, block: Block) -> Box<dyn FnOnce() + Send> {
		let ledger = self.ledger.clone();
		let active = self.active.clone();
		Box::new(move || {
			let existing = {
				let txn = ledger.store.tx_begin_read();
				ledger
					.block_at_root(&*txn, &block.qualified_root())
					.and_then(|existing| txn.block_get(&existing))
			};
			if let Some(existing) = existing {
				active.insert(&existing, None);
				active.publish(&block);
			}
		})
	}
}
