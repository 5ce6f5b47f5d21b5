mod bounded;
mod unbounded;

#[cfg(test)]
mod tests;

use std::{
	collections::{HashMap, VecDeque},
	pin::pin,
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc, Mutex,
	},
};

use tokio::sync::{watch, Notify};
use tracing::{debug, info_span, warn, Instrument};

use crate::{
	block::StoredBlock,
	config::NetworkConstants,
	ledger::Ledger,
	primitives::{Account, BlockHash},
	stats::{Direction, StatDetail, StatType, Stats},
	store::{ConfirmationHeightInfo, ReadOps, WriteTransaction},
	write_queue::WriteQueue,
};

/// Bounds and target latency for the adaptive write batch
const BATCH_WRITE_MIN: u64 = 16384;
const BATCH_WRITE_MAX: u64 = 65536;
const BATCH_WRITE_TARGET: std::time::Duration = std::time::Duration::from_millis(250);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationHeightMode {
	Automatic,
	Bounded,
	Unbounded,
}

/// One contiguous run of blocks to cement on a single account,
/// dependencies-first ordered by the planner.
#[derive(Clone, Debug)]
struct WriteDetails {
	account: Account,
	bottom_height: u64,
	bottom_hash: BlockHash,
	top_height: u64,
	top_hash: BlockHash,
}

type CementedFn = Box<dyn Fn(&StoredBlock) + Send + Sync>;
type AlreadyCementedFn = Box<dyn Fn(&BlockHash) + Send + Sync>;

/// Cements confirmed blocks: walks account chains from the confirmation
/// height up to each confirmed frontier, cementing cross-account receive
/// dependencies within the same batch, and advances
/// `confirmation_height_info` atomically per account.
pub struct ConfirmationHeightProcessor {
	ledger: Arc<Ledger>,
	write_queue: Arc<WriteQueue>,
	constants: NetworkConstants,
	stats: Arc<Stats>,
	mode: ConfirmationHeightMode,
	awaiting: Mutex<VecDeque<BlockHash>>,
	current: Mutex<BlockHash>,
	paused: AtomicBool,
	added: Notify,
	resumed: Notify,
	batch_write_size: AtomicU64,
	cemented_observers: Vec<CementedFn>,
	already_cemented_observers: Vec<AlreadyCementedFn>,
}

impl ConfirmationHeightProcessor {
	pub fn new(
		ledger: Arc<Ledger>,
		write_queue: Arc<WriteQueue>,
		constants: NetworkConstants,
		stats: Arc<Stats>,
		mode: ConfirmationHeightMode,
	) -> Self {
		ConfirmationHeightProcessor {
			ledger,
			write_queue,
			constants,
			stats,
			mode,
			awaiting: Mutex::new(VecDeque::new()),
			current: Mutex::new(BlockHash::ZERO),
			paused: AtomicBool::new(false),
			added: Notify::new(),
			resumed: Notify::new(),
			batch_write_size: AtomicU64::new(BATCH_WRITE_MIN),
			cemented_observers: Vec::new(),
			already_cemented_observers: Vec::new(),
		}
	}

	/// Register before the processor task starts; not synchronized afterwards
	pub fn add_cemented_observer(&mut self, observer: impl Fn(&StoredBlock) + Send + Sync + 'static) {
		self.cemented_observers.push(Box::new(observer));
	}

	pub fn add_already_cemented_observer(
		&mut self,
		observer: impl Fn(&BlockHash) + Send + Sync + 'static,
	) {
		self.already_cemented_observers.push(Box::new(observer));
	}

	/// Queue the hash of a confirmed block for cementing
	pub fn add(&self, hash: BlockHash) {
		self.awaiting.lock().unwrap().push_back(hash);
		self.added.notify_one();
	}

	pub fn awaiting_processing_size(&self) -> usize {
		self.awaiting.lock().unwrap().len()
	}

	pub fn is_processing_block(&self, hash: &BlockHash) -> bool {
		*self.current.lock().unwrap() == *hash ||
			self.awaiting.lock().unwrap().contains(hash)
	}

	pub fn current(&self) -> BlockHash {
		*self.current.lock().unwrap()
	}

	/// Stop picking up new work; in-flight cementing is not interrupted
	pub fn pause(&self) {
		self.paused.store(true, Ordering::SeqCst);
	}

	pub fn unpause(&self) {
		self.paused.store(false, Ordering::SeqCst);
		self.resumed.notify_waiters();
	}

	pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
		let span = info_span!("ConfirmationHeightProcessor");
		loop {
			if self.paused.load(Ordering::SeqCst) {
				let mut resumed = pin!(self.resumed.notified());
				resumed.as_mut().enable();
				if self.paused.load(Ordering::SeqCst) {
					tokio::select! {
						_ = resumed => {},
						_ = stop.changed() => break,
					}
				}
				continue
			}
			let next = self.awaiting.lock().unwrap().pop_front();
			match next {
				Some(hash) => {
					*self.current.lock().unwrap() = hash;
					self.process(hash).instrument(span.clone()).await;
					*self.current.lock().unwrap() = BlockHash::ZERO;
				},
				None => {
					let mut added = pin!(self.added.notified());
					added.as_mut().enable();
					if !self.awaiting.lock().unwrap().is_empty() {
						continue
					}
					tokio::select! {
						_ = added => {},
						_ = stop.changed() => break,
					}
				},
			}
		}
	}

	async fn process(&self, target: BlockHash) {
		let (plan, blocks_to_cement) = {
			let txn = self.ledger.store.tx_begin_read();
			let Some(block) = txn.block_get(&target) else {
				warn!("confirmation target {target} not found in ledger");
				return
			};
			let confirmed =
				self.ledger.confirmation_height(&*txn, &block.sideband.account).height;
			let blocks_to_cement = block.sideband.height.saturating_sub(confirmed);
			let mut planned: HashMap<Account, (u64, BlockHash)> = HashMap::new();
			(plan_cement(&*txn, target, &mut planned), blocks_to_cement)
		};

		if plan.is_empty() {
			// Cementing at or below the current confirmation height is a no-op
			self.stats.inc(StatType::ConfirmationHeight, StatDetail::AlreadyCemented, Direction::In);
			for observer in &self.already_cemented_observers {
				observer(&target);
			}
			return
		}

		let use_unbounded = match self.mode {
			ConfirmationHeightMode::Unbounded => true,
			ConfirmationHeightMode::Bounded => false,
			ConfirmationHeightMode::Automatic =>
				blocks_to_cement > self.constants.unbounded_cutoff,
		};
		let cemented = if use_unbounded {
			unbounded::cement(self, plan).await
		} else {
			bounded::cement(self, plan).await
		};

		match cemented {
			Ok(cemented) => {
				for block in &cemented {
					for observer in &self.cemented_observers {
						observer(block);
					}
				}
				debug!("cemented {} block(s) for {target}", cemented.len());
			},
			Err(err) => {
				warn!("cementing batch for {target} failed: {err}");
			},
		}
	}

	/// Cement as much of `details` as `max_blocks` allows. Returns the
	/// cemented blocks and the remainder of the segment, if any.
	fn cement_segment(
		&self,
		txn: &mut dyn WriteTransaction,
		details: &WriteDetails,
		max_blocks: u64,
	) -> (Vec<StoredBlock>, Option<WriteDetails>) {
		let current = txn.confirmation_height_get(&details.account).unwrap_or_default();
		if details.top_height <= current.height {
			// Another path already cemented past this segment
			return (Vec::new(), None)
		}

		// Resume above whatever is already cemented
		let (mut hash, bottom) = if current.height < details.bottom_height {
			(details.bottom_hash, details.bottom_height)
		} else {
			let frontier = txn
				.block_get(&current.frontier)
				.expect("cemented frontier exists");
			(frontier.sideband.successor, current.height + 1)
		};

		let top = details.top_height.min(bottom + max_blocks.saturating_sub(1));
		let mut cemented = Vec::with_capacity((top - bottom + 1) as usize);
		let mut new_frontier = details.top_hash;
		for height in bottom..=top {
			let block = txn.block_get(&hash).expect("cementing an existing chain");
			debug_assert_eq!(block.sideband.height, height);
			new_frontier = hash;
			hash = block.sideband.successor;
			cemented.push(block);
		}

		txn.confirmation_height_put(
			details.account,
			ConfirmationHeightInfo { height: top, frontier: new_frontier },
		);
		self.ledger.cache.cemented_count.fetch_add(cemented.len() as u64, Ordering::Relaxed);
		self.stats.add(
			StatType::ConfirmationHeight,
			StatDetail::Cemented,
			Direction::In,
			cemented.len() as u64,
		);

		let remainder = (top < details.top_height).then(|| WriteDetails {
			account: details.account,
			bottom_height: top + 1,
			bottom_hash: hash,
			top_height: details.top_height,
			top_hash: details.top_hash,
		});
		(cemented, remainder)
	}

	/// Grow the batch when writes are comfortably fast, shrink it when they
	/// drag
	fn adapt_batch_size(&self, write_duration: std::time::Duration) {
		let current = self.batch_write_size.load(Ordering::Relaxed);
		let next = if write_duration < BATCH_WRITE_TARGET / 2 {
			(current * 2).min(BATCH_WRITE_MAX)
		} else if write_duration > BATCH_WRITE_TARGET {
			(current / 2).max(BATCH_WRITE_MIN)
		} else {
			current
		};
		if next != current {
			self.batch_write_size.store(next, Ordering::Relaxed);
		}
	}

	fn batch_write_size(&self) -> u64 {
		self.batch_write_size.load(Ordering::Relaxed)
	}
}

/// Plan the segments needed to cement `target`, dependencies first: for every
/// receive between the confirmation height and the target, its source
/// account's segment is emitted before (or together with) the receiving one.
/// `planned` carries heights already scheduled in this run so shared sources
/// are not planned twice.
fn plan_cement(
	txn: &dyn ReadOps,
	target: BlockHash,
	planned: &mut HashMap<Account, (u64, BlockHash)>,
) -> Vec<WriteDetails> {
	let mut out = Vec::new();
	let mut stack: Vec<BlockHash> = vec![target];

	while let Some(&hash) = stack.last() {
		let Some(block) = txn.block_get(&hash) else {
			stack.pop();
			continue
		};
		let account = block.sideband.account;
		let (confirmed, confirmed_frontier) = planned.get(&account).copied().unwrap_or_else(|| {
			let info = txn.confirmation_height_get(&account).unwrap_or_default();
			(info.height, info.frontier)
		});
		if block.sideband.height <= confirmed {
			stack.pop();
			continue
		}

		let bottom_hash = if confirmed == 0 {
			txn.account_get(&account).map(|info| info.open_block).unwrap_or_default()
		} else {
			txn.block_get(&confirmed_frontier)
				.map(|frontier| frontier.sideband.successor)
				.unwrap_or_default()
		};

		// Scan the segment for the first receive whose source is not cemented
		// yet; that source must be planned first
		let mut dependency = None;
		let mut current_hash = bottom_hash;
		for _ in (confirmed + 1)..=block.sideband.height {
			let Some(current) = txn.block_get(&current_hash) else { break };
			if let Some(source) = current.source() {
				if let Some(source_block) = txn.block_get(&source) {
					let source_account = source_block.sideband.account;
					let source_confirmed = planned
						.get(&source_account)
						.map(|(height, _)| *height)
						.unwrap_or_else(|| {
							txn.confirmation_height_get(&source_account)
								.unwrap_or_default()
								.height
						});
					if source_block.sideband.height > source_confirmed {
						dependency = Some(source);
						break
					}
				}
			}
			current_hash = current.sideband.successor;
		}

		if let Some(dependency) = dependency {
			if !stack.contains(&dependency) {
				stack.push(dependency);
				continue
			}
		}

		out.push(WriteDetails {
			account,
			bottom_height: confirmed + 1,
			bottom_hash,
			top_height: block.sideband.height,
			top_hash: hash,
		});
		planned.insert(account, (block.sideband.height, hash));
		stack.pop();
	}
	out
}
