#[cfg(test)]
mod tests;

use std::{
	collections::{HashSet, VecDeque},
	pin::pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex,
	},
};

use tokio::sync::{watch, Notify};
use tracing::{debug, info_span, trace};

use crate::{
	elections::ActiveElections,
	ledger::Ledger,
	network::ChannelId,
	observers::Observers,
	online_reps::OnlineReps,
	primitives::Account,
	signature_checker::{SignatureCheckSet, SignatureChecker, BATCH_SIZE},
	stats::{Direction, StatDetail, StatType, Stats},
	vote::{Vote, VoteCode},
};

#[derive(Default)]
struct RepresentativeTiers {
	/// Weight above 0.1% of online stake
	representatives_1: HashSet<Account>,
	/// Weight above 1%
	representatives_2: HashSet<Account>,
	/// Weight above 5%
	representatives_3: HashSet<Account>,
}

/// Ingests votes from the network with weight-tiered admission control,
/// batch-verifies their signatures and dispatches the valid ones to the
/// active elections.
pub struct VoteProcessor {
	checker: Arc<SignatureChecker>,
	active: Arc<ActiveElections>,
	observers: Arc<Observers>,
	stats: Arc<Stats>,
	online_reps: Arc<OnlineReps>,
	ledger: Arc<Ledger>,
	max_votes: usize,
	votes: Mutex<VecDeque<(Vote, ChannelId)>>,
	tiers: Mutex<RepresentativeTiers>,
	is_active: AtomicBool,
	added: Notify,
	idle: Notify,
}

impl VoteProcessor {
	pub fn new(
		checker: Arc<SignatureChecker>,
		active: Arc<ActiveElections>,
		observers: Arc<Observers>,
		stats: Arc<Stats>,
		online_reps: Arc<OnlineReps>,
		ledger: Arc<Ledger>,
		max_votes: usize,
	) -> Self {
		VoteProcessor {
			checker,
			active,
			observers,
			stats,
			online_reps,
			ledger,
			max_votes,
			votes: Mutex::new(VecDeque::new()),
			tiers: Mutex::new(RepresentativeTiers::default()),
			is_active: AtomicBool::new(false),
			added: Notify::new(),
			idle: Notify::new(),
		}
	}

	/// Queue a vote for verification. Admission tightens as the queue fills:
	/// under 6/9 everyone is admitted, then only representatives above 0.1%,
	/// 1% and finally 5% of online stake. Returns true if the vote was
	/// dropped.
	pub fn vote(&self, vote: Vote, channel: ChannelId) -> bool {
		let process = {
			let votes = self.votes.lock().unwrap();
			let fill = votes.len();
			let process = if fill < self.max_votes * 6 / 9 {
				true
			} else {
				let tiers = self.tiers.lock().unwrap();
				if fill < self.max_votes * 7 / 9 {
					tiers.representatives_1.contains(&vote.account)
				} else if fill < self.max_votes * 8 / 9 {
					tiers.representatives_2.contains(&vote.account)
				} else if fill < self.max_votes {
					tiers.representatives_3.contains(&vote.account)
				} else {
					false
				}
			};
			drop(votes);
			process
		};
		if process {
			self.votes.lock().unwrap().push_back((vote, channel));
			self.added.notify_one();
		} else {
			self.stats.inc(StatType::Vote, StatDetail::VoteOverflow, Direction::In);
		}
		!process
	}

	pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
		let span = info_span!("VoteProcessor");
		loop {
			let batch = {
				let mut votes = self.votes.lock().unwrap();
				if votes.is_empty() {
					None
				} else {
					self.is_active.store(true, Ordering::SeqCst);
					Some(std::mem::take(&mut *votes))
				}
			};
			match batch {
				Some(batch) => {
					let _entered = span.enter();
					let len = batch.len();
					let started = std::time::Instant::now();
					self.verify_votes(batch);
					if len > 50 {
						debug!(
							"processed {} votes in {} milliseconds",
							len,
							started.elapsed().as_millis()
						);
					}
					self.is_active.store(false, Ordering::SeqCst);
					self.idle.notify_waiters();
				},
				None => {
					let mut added = pin!(self.added.notified());
					added.as_mut().enable();
					{
						if !self.votes.lock().unwrap().is_empty() {
							continue
						}
					}
					tokio::select! {
						_ = added => {},
						_ = stop.changed() => break,
					}
				},
			}
		}
	}

	/// Batch-verify signatures, at most one checker batch at a time, and
	/// dispatch the valid votes
	fn verify_votes(&self, votes: VecDeque<(Vote, ChannelId)>) {
		let votes: Vec<(Vote, ChannelId)> = votes.into();
		for chunk in votes.chunks(BATCH_SIZE) {
			let mut check = SignatureCheckSet::new(
				chunk.iter().map(|(vote, _)| vote.digest().as_bytes().to_vec()).collect(),
				chunk.iter().map(|(vote, _)| vote.account).collect(),
				chunk.iter().map(|(vote, _)| vote.signature).collect(),
			);
			self.checker.verify(&mut check);
			for ((vote, channel), verification) in chunk.iter().zip(&check.verifications) {
				if *verification == 1 {
					self.vote_blocking(vote, *channel, true);
				} else {
					self.stats.inc(StatType::Vote, StatDetail::VoteInvalid, Direction::In);
				}
			}
		}
	}

	/// Apply one vote to the election set, bypassing the queue. `validated`
	/// skips the signature check when the batch stage already ran it.
	pub fn vote_blocking(&self, vote: &Vote, channel: ChannelId, validated: bool) -> VoteCode {
		let code = if validated || vote.validate() {
			let code = self.active.vote(vote);
			self.online_reps.observe(vote.account);
			self.observers.notify_vote(vote, channel, code);
			code
		} else {
			VoteCode::Invalid
		};
		let detail = match code {
			VoteCode::Invalid => StatDetail::VoteInvalid,
			VoteCode::Replay => StatDetail::VoteReplay,
			VoteCode::Vote => StatDetail::VoteValid,
			VoteCode::Indeterminate => StatDetail::VoteIndeterminate,
		};
		self.stats.inc(StatType::Vote, detail, Direction::In);
		trace!("{vote}: {code}");
		code
	}

	/// Wait until every queued vote has been dispatched
	pub async fn flush(&self) {
		loop {
			let mut idle = pin!(self.idle.notified());
			idle.as_mut().enable();
			if self.votes.lock().unwrap().is_empty() && !self.is_active.load(Ordering::SeqCst) {
				return
			}
			idle.await;
		}
	}

	/// Rebuild the admission tiers from current weights. Run periodically by
	/// the integrator.
	pub fn calculate_weights(&self) {
		let supply = self.online_reps.online_stake();
		let mut tiers = RepresentativeTiers::default();
		for (representative, _) in self.ledger.rep_weights.get_rep_amounts() {
			let weight = self.ledger.weight(&representative);
			if weight > supply / 1000 {
				tiers.representatives_1.insert(representative);
				if weight > supply / 100 {
					tiers.representatives_2.insert(representative);
					if weight > supply / 20 {
						tiers.representatives_3.insert(representative);
					}
				}
			}
		}
		*self.tiers.lock().unwrap() = tiers;
	}

	pub fn size(&self) -> usize {
		self.votes.lock().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.size() == 0
	}
}
