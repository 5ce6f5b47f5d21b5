use std::{
	collections::{HashMap, HashSet},
	time::{Duration, Instant},
};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

use crate::{
	block::{Block, StoredBlock},
	config::NetworkConstants,
	ledger::Ledger,
	primitives::{Account, Amount, BlockHash, QualifiedRoot},
	stats::{Direction, StatDetail, StatType, Stats},
};

/// Most block candidates a single election will track
const MAX_ELECTION_BLOCKS: usize = 10;

const PASSIVE_DURATION_FACTOR: u32 = 5;
const ACTIVE_REQUEST_COUNT_MIN: u32 = 2;
const ACTIVE_BROADCASTING_DURATION_FACTOR: u32 = 30;
const CONFIRMED_DURATION_FACTOR: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum ElectionState {
	Idle,
	/// Only listening for incoming votes
	Passive,
	/// Actively requesting confirmations
	Active,
	/// Requesting confirmations and broadcasting the winner
	Broadcasting,
	/// Starting elections for unconfirmed dependent blocks
	Backtracking,
	/// Confirmed but still listening for votes
	Confirmed,
	ExpiredConfirmed,
	ExpiredUnconfirmed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectionStatusType {
	Ongoing,
	ActiveConfirmedQuorum,
	ActiveConfirmationHeight,
	Stopped,
}

#[derive(Clone, Debug)]
pub struct ElectionStatus {
	pub winner: BlockHash,
	pub tally: Amount,
	pub confirmation_request_count: u32,
	pub status_type: ElectionStatusType,
}

#[derive(Clone, Debug)]
pub struct VoteInfo {
	pub time: Instant,
	pub sequence: u64,
	pub hash: BlockHash,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ElectionVoteResult {
	pub replay: bool,
	pub processed: bool,
}

pub type ConfirmationAction = Box<dyn Fn(&Block) + Send + Sync>;

/// Everything an election needs from its surroundings for one operation.
/// Elections are plain values owned by the active-elections map; they never
/// hold references to other subsystems.
pub(crate) struct ElectionCtx<'a> {
	pub ledger: &'a Ledger,
	pub constants: &'a NetworkConstants,
	pub stats: &'a Stats,
	pub online_stake: Amount,
	pub cementing_sender: &'a UnboundedSender<BlockHash>,
}

impl ElectionCtx<'_> {
	fn quorum_delta(&self) -> Amount {
		self.online_stake / 100 * Amount::from(self.constants.quorum_percent)
	}

	fn base_latency(&self) -> Duration {
		self.constants.base_latency
	}
}

/// Per-root consensus state machine. Collects votes for competing blocks at
/// one `QualifiedRoot` and decides the canonical one.
pub struct Election {
	pub root: QualifiedRoot,
	pub(crate) state: ElectionState,
	state_start: Instant,
	pub(crate) election_start: Instant,
	pub(crate) blocks: HashMap<BlockHash, Block>,
	/// Insertion order; the earliest-seen block wins tally ties
	block_order: Vec<BlockHash>,
	pub(crate) last_votes: HashMap<Account, VoteInfo>,
	pub(crate) last_tally: HashMap<BlockHash, Amount>,
	pub(crate) status: ElectionStatus,
	pub(crate) confirmation_request_count: u32,
	/// Blocks observed to depend on this election's root
	pub(crate) dependent_blocks: HashSet<BlockHash>,
	/// Height of the first block this election was created for
	pub height: u64,
	pub(crate) prioritized: bool,
	/// Set when backtracking wants new elections for dependents; consumed by
	/// the active-elections dependency activation pass
	pub(crate) activation_requested: bool,
	confirmation_action: Option<ConfirmationAction>,
}

impl Election {
	pub fn new(block: &StoredBlock, confirmation_action: Option<ConfirmationAction>) -> Self {
		let hash = block.hash();
		let now = Instant::now();
		Election {
			root: block.block.qualified_root(),
			state: ElectionState::Idle,
			state_start: now,
			election_start: now,
			blocks: HashMap::from([(hash, block.block.clone())]),
			block_order: vec![hash],
			last_votes: HashMap::new(),
			last_tally: HashMap::new(),
			status: ElectionStatus {
				winner: hash,
				tally: 0,
				confirmation_request_count: 0,
				status_type: ElectionStatusType::Ongoing,
			},
			confirmation_request_count: 0,
			dependent_blocks: HashSet::new(),
			height: block.sideband.height,
			prioritized: false,
			activation_requested: false,
			confirmation_action,
		}
	}

	pub fn idle(&self) -> bool {
		self.state == ElectionState::Idle
	}

	pub fn confirmed(&self) -> bool {
		matches!(self.state, ElectionState::Confirmed | ElectionState::ExpiredConfirmed)
	}

	pub fn winner_hash(&self) -> BlockHash {
		self.status.winner
	}

	pub(crate) fn winner_block(&self) -> Option<&Block> {
		self.blocks.get(&self.status.winner)
	}

	pub fn prioritized(&self) -> bool {
		self.prioritized
	}

	fn valid_change(from: ElectionState, to: ElectionState) -> bool {
		use ElectionState::*;
		match (from, to) {
			(Idle, Passive) | (Idle, Active) => true,
			(Passive, Active) => true,
			(Active, Broadcasting) => true,
			(Broadcasting, Backtracking) => true,
			// Quorum can arrive in any non-terminal state
			(Idle | Passive | Active | Broadcasting | Backtracking, Confirmed) => true,
			(Confirmed, ExpiredConfirmed) => true,
			(Idle | Passive | Active | Broadcasting | Backtracking, ExpiredUnconfirmed) => true,
			_ => false,
		}
	}

	fn state_change(&mut self, from: ElectionState, to: ElectionState) -> bool {
		if self.state == from && Self::valid_change(from, to) {
			trace!(root = %self.root, "election transitions from {from} to {to}");
			self.state = to;
			self.state_start = Instant::now();
			true
		} else {
			false
		}
	}

	pub fn transition_passive(&mut self) {
		self.state_change(ElectionState::Idle, ElectionState::Passive);
	}

	pub fn transition_active(&mut self) {
		self.state_change(ElectionState::Idle, ElectionState::Active);
	}

	/// Advance the state machine by one request-loop tick, queueing requests
	/// and broadcasts into `solicitor`. Returns true when the election has
	/// expired and should be removed.
	pub(crate) fn transition_time(
		&mut self,
		solicitor: &mut crate::confirmation_solicitor::ConfirmationSolicitor<'_>,
		ctx: &ElectionCtx<'_>,
	) -> bool {
		match self.state {
			ElectionState::Idle => {
				self.state_change(ElectionState::Idle, ElectionState::Passive);
			},
			ElectionState::Passive => {
				if self.state_start.elapsed() > ctx.base_latency() * PASSIVE_DURATION_FACTOR {
					self.state_change(ElectionState::Passive, ElectionState::Active);
				}
			},
			ElectionState::Active => {
				self.send_confirm_req(solicitor);
				if self.confirmation_request_count >= ACTIVE_REQUEST_COUNT_MIN || self.prioritized {
					self.state_change(ElectionState::Active, ElectionState::Broadcasting);
				}
			},
			ElectionState::Broadcasting => {
				self.broadcast_block(solicitor);
				self.send_confirm_req(solicitor);
				if self.state_start.elapsed() >
					ctx.base_latency() * ACTIVE_BROADCASTING_DURATION_FACTOR
				{
					self.state_change(ElectionState::Broadcasting, ElectionState::Backtracking);
					self.activation_requested = true;
				}
			},
			ElectionState::Backtracking => {
				self.send_confirm_req(solicitor);
				// Backtracking shares the broadcasting dwell before giving up
				if self.state_start.elapsed() >
					ctx.base_latency() * ACTIVE_BROADCASTING_DURATION_FACTOR
				{
					self.state_change(ElectionState::Backtracking, ElectionState::ExpiredUnconfirmed);
					ctx.stats.inc(
						StatType::Election,
						StatDetail::ElectionDropExpired,
						Direction::In,
					);
				}
			},
			ElectionState::Confirmed => {
				if self.state_start.elapsed() > ctx.base_latency() * CONFIRMED_DURATION_FACTOR {
					self.state_change(ElectionState::Confirmed, ElectionState::ExpiredConfirmed);
				}
			},
			ElectionState::ExpiredConfirmed | ElectionState::ExpiredUnconfirmed => {},
		}
		matches!(self.state, ElectionState::ExpiredConfirmed | ElectionState::ExpiredUnconfirmed)
	}

	fn broadcast_block(
		&mut self,
		solicitor: &mut crate::confirmation_solicitor::ConfirmationSolicitor<'_>,
	) {
		solicitor.broadcast(self);
	}

	fn send_confirm_req(
		&mut self,
		solicitor: &mut crate::confirmation_solicitor::ConfirmationSolicitor<'_>,
	) {
		if !solicitor.add(self) {
			self.confirmation_request_count += 1;
			self.status.confirmation_request_count = self.confirmation_request_count;
		}
	}

	/// Add a competing block for this root. Returns false if the candidate
	/// was accepted (or already present).
	pub(crate) fn publish(&mut self, block: &Block) -> bool {
		let hash = block.hash();
		if self.blocks.contains_key(&hash) {
			return false
		}
		if self.blocks.len() >= MAX_ELECTION_BLOCKS {
			return true
		}
		self.blocks.insert(hash, block.clone());
		self.block_order.push(hash);
		false
	}

	/// Apply one voter's endorsement of `hash`. A vote is processed when it is
	/// the voter's first, carries a newer sequence, or switches the hash at
	/// the same sequence; anything else is a replay.
	pub(crate) fn vote(
		&mut self,
		voter: Account,
		sequence: u64,
		hash: BlockHash,
		ctx: &ElectionCtx<'_>,
	) -> ElectionVoteResult {
		let should_process = match self.last_votes.get(&voter) {
			None => true,
			Some(last) =>
				sequence > last.sequence || (sequence == last.sequence && hash != last.hash),
		};
		if !should_process {
			return ElectionVoteResult { replay: true, processed: false }
		}
		self.last_votes
			.insert(voter, VoteInfo { time: Instant::now(), sequence, hash });
		if !self.confirmed() {
			self.confirm_if_quorum(ctx);
		}
		ElectionVoteResult { replay: false, processed: true }
	}

	/// Weight behind each candidate, from the latest vote of every voter
	pub(crate) fn tally(&self, ledger: &Ledger) -> HashMap<BlockHash, Amount> {
		let mut tally: HashMap<BlockHash, Amount> = HashMap::new();
		for (voter, info) in &self.last_votes {
			*tally.entry(info.hash).or_default() += ledger.weight(voter);
		}
		tally
	}

	/// Re-tally, pick the winner and confirm if it reached quorum
	pub(crate) fn confirm_if_quorum(&mut self, ctx: &ElectionCtx<'_>) {
		let tally = self.tally(ctx.ledger);

		// Winner: the candidate block with the largest tally; on a tie the
		// earliest-seen block wins
		let mut winner = self.status.winner;
		let mut winner_weight = tally.get(&winner).copied().unwrap_or_default();
		for hash in &self.block_order {
			let weight = tally.get(hash).copied().unwrap_or_default();
			if weight > winner_weight {
				winner = *hash;
				winner_weight = weight;
			}
		}
		if winner != self.status.winner {
			debug!(root = %self.root, "election winner changed to {winner}");
			self.status.winner = winner;
		}
		self.last_tally = tally;
		self.status.tally = winner_weight;

		if winner_weight >= ctx.quorum_delta() {
			self.confirm_once(ElectionStatusType::ActiveConfirmedQuorum, ctx);
		}
	}

	/// Transition to confirmed and hand the winner to the cementing pipeline.
	/// Idempotent; only the first call confirms.
	pub(crate) fn confirm_once(&mut self, status_type: ElectionStatusType, ctx: &ElectionCtx<'_>) {
		if self.confirmed() {
			return
		}
		let from = self.state;
		if !self.state_change(from, ElectionState::Confirmed) {
			return
		}
		self.status.status_type = status_type;
		ctx.stats.inc(StatType::Election, StatDetail::ElectionConfirmed, Direction::In);
		debug!(
			root = %self.root,
			winner = %self.status.winner,
			"election confirmed after {}ms with tally {}",
			self.election_start.elapsed().as_millis(),
			self.last_tally.get(&self.status.winner).copied().unwrap_or_default(),
		);

		let _ = ctx.cementing_sender.send(self.status.winner);
		if let Some(action) = &self.confirmation_action {
			if let Some(winner) = self.blocks.get(&self.status.winner) {
				action(winner);
			}
		}
	}

	pub fn last_votes_size(&self) -> usize {
		self.last_votes.len()
	}

	pub(crate) fn block_hashes(&self) -> Vec<BlockHash> {
		self.block_order.clone()
	}
}
