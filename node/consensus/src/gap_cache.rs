
use std::{
	collections::{HashMap, VecDeque},
	sync::{Arc, Mutex},
	time::Instant,
};

use tracing::debug;

use crate::{
	config::{NetworkConstants, GAP_CACHE_MAX},
	ledger::Ledger,
	network::BootstrapInitiator,
	online_reps::OnlineReps,
	primitives::{Account, Amount, BlockHash},
	stats::{Direction, StatDetail, StatType, Stats},
	vote::Vote,
};

#[derive(Clone)]
pub struct GapInformation {
	pub arrival: Instant,
	pub voters: Vec<Account>,
	pub bootstrap_started: bool,
}

struct Inner {
	by_hash: HashMap<BlockHash, GapInformation>,
	by_arrival: VecDeque<BlockHash>,
}

/// Arrival-ordered cache of blocks that could not be ingested because a
/// dependency is missing. Votes observed for a cached hash accumulate voter
/// weight; once enough of the online stake is seen endorsing a hash that is
/// still absent, a lazy bootstrap for it is started after a grace period.
pub struct GapCache {
	ledger: Arc<Ledger>,
	online_reps: Arc<OnlineReps>,
	bootstrap: Arc<dyn BootstrapInitiator>,
	stats: Arc<Stats>,
	constants: NetworkConstants,
	inner: Mutex<Inner>,
}

impl GapCache {
	pub fn new(
		ledger: Arc<Ledger>,
		online_reps: Arc<OnlineReps>,
		bootstrap: Arc<dyn BootstrapInitiator>,
		stats: Arc<Stats>,
		constants: NetworkConstants,
	) -> Self {
		GapCache {
			ledger,
			online_reps,
			bootstrap,
			stats,
			constants,
			inner: Mutex::new(Inner { by_hash: HashMap::new(), by_arrival: VecDeque::new() }),
		}
	}

	pub fn add(&self, hash: BlockHash, arrival: Instant) {
		let mut inner = self.inner.lock().unwrap();
		match inner.by_hash.get_mut(&hash) {
			Some(existing) => {
				existing.arrival = arrival;
				inner.by_arrival.retain(|entry| entry != &hash);
				inner.by_arrival.push_back(hash);
			},
			None => {
				inner.by_hash.insert(
					hash,
					GapInformation { arrival, voters: Vec::new(), bootstrap_started: false },
				);
				inner.by_arrival.push_back(hash);
				if inner.by_arrival.len() > GAP_CACHE_MAX {
					if let Some(oldest) = inner.by_arrival.pop_front() {
						inner.by_hash.remove(&oldest);
					}
				}
			},
		}
	}

	pub fn erase(&self, hash: &BlockHash) {
		let mut inner = self.inner.lock().unwrap();
		if inner.by_hash.remove(hash).is_some() {
			inner.by_arrival.retain(|entry| entry != hash);
		}
	}

	/// Tally the voter behind `vote` against any cached hashes it endorses
	pub fn vote(&self, vote: &Vote) {
		for hash in &vote.hashes {
			let tally = {
				let mut inner = self.inner.lock().unwrap();
				let Some(info) = inner.by_hash.get_mut(hash) else { continue };
				if info.bootstrap_started || info.voters.contains(&vote.account) {
					continue
				}
				info.voters.push(vote.account);
				info.voters
					.iter()
					.map(|voter| self.ledger.weight(voter))
					.fold(0, Amount::saturating_add)
			};

			if tally >= self.bootstrap_threshold() {
				let mut inner = self.inner.lock().unwrap();
				if let Some(info) = inner.by_hash.get_mut(hash) {
					info.bootstrap_started = true;
				}
				drop(inner);
				self.start_bootstrap(*hash);
			}
		}
	}

	/// Voted weight needed before a missing block is worth bootstrapping
	pub fn bootstrap_threshold(&self) -> Amount {
		(self.online_reps.online_stake() / 256) *
			Amount::from(self.constants.bootstrap_fraction_numerator)
	}

	/// Give the block a grace period to arrive naturally, then pull it
	fn start_bootstrap(&self, hash: BlockHash) {
		let ledger = self.ledger.clone();
		let bootstrap = self.bootstrap.clone();
		let stats = self.stats.clone();
		let delay = self.constants.gap_cache_bootstrap_start_interval;
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			let missing = {
				let txn = ledger.store.tx_begin_read();
				!txn.block_exists(&hash)
			};
			if missing {
				if !bootstrap.in_progress() {
					debug!("missing block {hash} has enough votes to warrant lazily bootstrapping it");
				}
				stats.inc(StatType::Bootstrap, StatDetail::LazyStarted, Direction::In);
				bootstrap.bootstrap_lazy(hash);
			}
		});
	}

	pub fn size(&self) -> usize {
		self.inner.lock().unwrap().by_hash.len()
	}

	pub fn get(&self, hash: &BlockHash) -> Option<GapInformation> {
		self.inner.lock().unwrap().by_hash.get(hash).cloned()
	}
}
