use std::{
	collections::VecDeque,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex,
	},
};

use tokio::sync::{watch, Notify};
use tracing::{info_span, trace};

use crate::{
	config::NetworkConstants,
	network::{ChannelId, Message, Network},
	primitives::{BlockHash, KeyPair},
	stats::{Direction, StatDetail, StatType, Stats},
	vote::{Vote, MAX_VOTE_HASHES},
	vote_processor::VoteProcessor,
	votes_cache::VotesCache,
};

/// Channel id votes generated by this node arrive back on
pub const LOOPBACK_CHANNEL: ChannelId = ChannelId(0);

/// Batches hashes of locally winning blocks and emits signed votes for the
/// representative keys this node holds. Votes are flooded to peers and looped
/// back through the local vote processor.
pub struct VoteGenerator {
	constants: NetworkConstants,
	network: Arc<dyn Network>,
	votes_cache: Arc<VotesCache>,
	vote_processor: Arc<VoteProcessor>,
	stats: Arc<Stats>,
	local_reps: Vec<KeyPair>,
	sequence: AtomicU64,
	hashes: Mutex<VecDeque<BlockHash>>,
	added: Notify,
}

impl VoteGenerator {
	pub fn new(
		constants: NetworkConstants,
		network: Arc<dyn Network>,
		votes_cache: Arc<VotesCache>,
		vote_processor: Arc<VoteProcessor>,
		stats: Arc<Stats>,
		local_reps: Vec<KeyPair>,
	) -> Self {
		VoteGenerator {
			constants,
			network,
			votes_cache,
			vote_processor,
			stats,
			local_reps,
			sequence: AtomicU64::new(0),
			hashes: Mutex::new(VecDeque::new()),
			added: Notify::new(),
		}
	}

	/// Queue a hash to vote on
	pub fn add(&self, hash: BlockHash) {
		if self.local_reps.is_empty() {
			return
		}
		let len = {
			let mut hashes = self.hashes.lock().unwrap();
			hashes.push_back(hash);
			hashes.len()
		};
		// A full vote's worth of hashes is sent without waiting for the delay
		if len >= MAX_VOTE_HASHES {
			self.added.notify_one();
		}
	}

	pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
		let span = info_span!("VoteGenerator");
		loop {
			tokio::select! {
				_ = tokio::time::sleep(self.constants.vote_generator_delay) => {},
				_ = self.added.notified() => {},
				_ = stop.changed() => break,
			}
			let _entered = span.enter();
			loop {
				let batch: Vec<BlockHash> = {
					let mut hashes = self.hashes.lock().unwrap();
					let take = hashes.len().min(MAX_VOTE_HASHES);
					hashes.drain(..take).collect()
				};
				if batch.is_empty() {
					break
				}
				self.send(batch);
			}
		}
	}

	fn send(&self, hashes: Vec<BlockHash>) {
		let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
		for key in &self.local_reps {
			let vote = Vote::new_signed(key, sequence, hashes.clone());
			trace!("generated {vote}");
			self.votes_cache.add(&vote);
			self.network.flood(Message::ConfirmAck(vote.clone()), 0.5);
			self.vote_processor.vote(vote, LOOPBACK_CHANNEL);
			self.stats.inc(StatType::Vote, StatDetail::VoteGenerated, Direction::Out);
		}
	}

	pub fn size(&self) -> usize {
		self.hashes.lock().unwrap().len()
	}
}
