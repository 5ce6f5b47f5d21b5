pub mod election;


use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
};

use tokio::sync::{mpsc::UnboundedSender, watch};
use tracing::{debug, info_span, trace};

use election::{ConfirmationAction, Election, ElectionCtx, ElectionState, ElectionStatusType};

use crate::{
	block::{Block, StoredBlock},
	config::NetworkConstants,
	confirmation_solicitor::ConfirmationSolicitor,
	ledger::Ledger,
	network::{Network, NetworkFilter, RepresentativeRegistry},
	observers::Observers,
	online_reps::OnlineReps,
	primitives::{BlockHash, QualifiedRoot},
	stats::{Direction, StatDetail, StatType, Stats},
	vote::{Vote, VoteCode},
	votes_cache::VotesCache,
	work::{WorkPool, WorkVersion},
};

/// Longest dependency jump a single backtracking activation will make
const DEPENDENCY_JUMP_MAX: u64 = 128;

struct ActiveState {
	roots: HashMap<QualifiedRoot, Election>,
	/// Secondary index for vote routing
	blocks: HashMap<BlockHash, QualifiedRoot>,
}

/// Deferred teardown of a finished election, executed outside the state lock
struct ElectionCleanup {
	hashes: Vec<BlockHash>,
	winner: BlockHash,
	confirmed: bool,
}

/// Owns every running election, keyed by qualified root. One mutex protects
/// the maps and all election vote state; network sends are staged through the
/// per-tick solicitor and flushed outside the lock where possible.
pub struct ActiveElections {
	ledger: Arc<Ledger>,
	constants: NetworkConstants,
	stats: Arc<Stats>,
	network: Arc<dyn Network>,
	filter: Arc<NetworkFilter>,
	votes_cache: Arc<VotesCache>,
	online_reps: Arc<OnlineReps>,
	representatives: Arc<dyn RepresentativeRegistry>,
	work: Arc<dyn WorkPool>,
	observers: Arc<Observers>,
	/// Winners confirmed by quorum, consumed by the confirmation height
	/// processor
	cementing_sender: UnboundedSender<BlockHash>,
	state: Mutex<ActiveState>,
}

impl ActiveElections {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		ledger: Arc<Ledger>,
		constants: NetworkConstants,
		stats: Arc<Stats>,
		network: Arc<dyn Network>,
		filter: Arc<NetworkFilter>,
		votes_cache: Arc<VotesCache>,
		online_reps: Arc<OnlineReps>,
		representatives: Arc<dyn RepresentativeRegistry>,
		work: Arc<dyn WorkPool>,
		observers: Arc<Observers>,
		cementing_sender: UnboundedSender<BlockHash>,
	) -> Self {
		ActiveElections {
			ledger,
			constants,
			stats,
			network,
			filter,
			votes_cache,
			online_reps,
			representatives,
			work,
			observers,
			cementing_sender,
			state: Mutex::new(ActiveState { roots: HashMap::new(), blocks: HashMap::new() }),
		}
	}

	fn ctx(&self) -> ElectionCtx<'_> {
		ElectionCtx {
			ledger: &self.ledger,
			constants: &self.constants,
			stats: &self.stats,
			online_stake: self.online_reps.online_stake(),
			cementing_sender: &self.cementing_sender,
		}
	}

	/// Start an election for the block's root, or add the block as a
	/// candidate to the existing one. Returns whether a new election was
	/// created.
	pub fn insert(&self, block: &StoredBlock, action: Option<ConfirmationAction>) -> bool {
		let root = block.block.qualified_root();
		let hash = block.hash();
		// Cached votes that arrived before the block seed the new election
		let cached_votes = self.votes_cache.find(&hash);

		let ctx = self.ctx();
		let mut state = self.state.lock().unwrap();
		if let Some(election) = state.roots.get_mut(&root) {
			election.publish(&block.block);
			state.blocks.insert(hash, root);
			return false
		}

		let mut election = Election::new(block, action);
		for vote in &cached_votes {
			if vote.hashes.contains(&hash) {
				election.vote(vote.account, vote.sequence, hash, &ctx);
			}
		}

		// Track this block as a dependent of any election its dependencies
		// are contested in
		for dependency in self.ledger.dependent_blocks(block).into_iter().flatten() {
			if let Some(parent_root) = state.blocks.get(&dependency).copied() {
				if let Some(parent) = state.roots.get_mut(&parent_root) {
					parent.dependent_blocks.insert(hash);
				}
			}
		}

		state.blocks.insert(hash, root);
		state.roots.insert(root, election);
		self.stats.inc(StatType::Election, StatDetail::ElectionStart, Direction::In);
		trace!(%root, "election started");
		true
	}

	/// Add a competing block to the election already running for its root.
	/// Returns true if no election exists or the candidate was rejected.
	pub fn publish(&self, block: &Block) -> bool {
		let root = block.qualified_root();
		let ctx = self.ctx();
		let mut state = self.state.lock().unwrap();
		match state.roots.get_mut(&root) {
			Some(election) => {
				let error = election.publish(block);
				if !error {
					let hash = block.hash();
					state.blocks.insert(hash, root);
					let election = state.roots.get_mut(&root).expect("present above");
					election.confirm_if_quorum(&ctx);
				}
				error
			},
			None => true,
		}
	}

	/// Route a verified vote to the elections referencing its hashes
	pub fn vote(&self, vote: &Vote) -> VoteCode {
		let ctx = self.ctx();
		let mut processed = false;
		let mut replay = false;
		let mut unknown = false;
		{
			let mut state = self.state.lock().unwrap();
			for hash in &vote.hashes {
				match state.blocks.get(hash).copied() {
					Some(root) => {
						let election =
							state.roots.get_mut(&root).expect("block index is consistent");
						let result = election.vote(vote.account, vote.sequence, *hash, &ctx);
						processed |= result.processed;
						replay |= result.replay;
					},
					None => unknown = true,
				}
			}
		}
		// Lock order: the votes cache must not be taken under the state lock
		if unknown {
			self.votes_cache.add(vote);
		}
		if processed {
			VoteCode::Vote
		} else if replay {
			VoteCode::Replay
		} else {
			VoteCode::Indeterminate
		}
	}

	/// Remove the election contesting the block's root
	pub fn erase(&self, block: &Block) {
		let cleanup = {
			let mut state = self.state.lock().unwrap();
			self.remove_election(&mut state, block.qualified_root())
		};
		if let Some(cleanup) = cleanup {
			self.finish_cleanup(cleanup);
		}
	}

	pub fn size(&self) -> usize {
		self.state.lock().unwrap().roots.len()
	}

	pub fn is_empty(&self) -> bool {
		self.size() == 0
	}

	/// Number of entries in the block index; equals the sum of candidate
	/// blocks across elections
	pub fn blocks_len(&self) -> usize {
		self.state.lock().unwrap().blocks.len()
	}

	pub fn active_root(&self, root: &QualifiedRoot) -> bool {
		self.state.lock().unwrap().roots.contains_key(root)
	}

	pub fn active_block(&self, hash: &BlockHash) -> bool {
		self.state.lock().unwrap().blocks.contains_key(hash)
	}

	pub fn election_state(&self, root: &QualifiedRoot) -> Option<ElectionState> {
		self.state.lock().unwrap().roots.get(root).map(|election| election.state)
	}

	pub fn election_winner(&self, root: &QualifiedRoot) -> Option<BlockHash> {
		self.state.lock().unwrap().roots.get(root).map(|election| election.winner_hash())
	}

	pub fn election_height(&self, root: &QualifiedRoot) -> Option<u64> {
		self.state.lock().unwrap().roots.get(root).map(|election| election.height)
	}

	pub fn election_confirmed(&self, root: &QualifiedRoot) -> bool {
		self.state.lock().unwrap().roots.get(root).is_some_and(|election| election.confirmed())
	}

	/// Confirm the election regardless of tally. Test and cementing-feedback
	/// paths only.
	pub fn force_confirm(&self, root: &QualifiedRoot) {
		let ctx = self.ctx();
		let mut state = self.state.lock().unwrap();
		if let Some(election) = state.roots.get_mut(root) {
			election.confirm_once(ElectionStatusType::ActiveConfirmationHeight, &ctx);
		}
	}

	/// Flag the election for a dependency activation pass
	pub fn request_activation(&self, root: &QualifiedRoot) -> bool {
		let mut state = self.state.lock().unwrap();
		match state.roots.get_mut(root) {
			Some(election) => {
				election.activation_requested = true;
				true
			},
			None => false,
		}
	}

	/// Raise the election's priority: it skips ahead to broadcasting and its
	/// winner gets stronger work regenerated for future rebroadcasts.
	pub fn prioritize_election(self: &Arc<Self>, root: &QualifiedRoot) {
		let (winner_hash, winner_root, work_value, dependents) = {
			let mut state = self.state.lock().unwrap();
			let Some(election) = state.roots.get_mut(root) else { return };
			election.prioritized = true;
			let Some(winner) = election.winner_block() else { return };
			(
				election.winner_hash(),
				winner.root(),
				winner.work(),
				election.dependent_blocks.len(),
			)
		};

		let base = self.work.difficulty(WorkVersion::Work1, &winner_root, work_value);
		let target = self.work.higher_difficulty(base, dependents);
		let this = self.clone();
		let root = *root;
		tokio::spawn(async move {
			let work = this.work.clone();
			let generated = tokio::task::spawn_blocking(move || {
				work.generate(
					WorkVersion::Work1,
					&winner_root,
					target,
					Arc::new(std::sync::atomic::AtomicBool::new(false)),
				)
			})
			.await
			.unwrap_or(None);

			if let Some(new_work) = generated {
				let updated = {
					let mut state = this.state.lock().unwrap();
					state.roots.get_mut(&root).and_then(|election| {
						election.blocks.get_mut(&winner_hash).map(|block| {
							block.set_work(new_work);
							block.clone()
						})
					})
				};
				if let Some(block) = updated {
					debug!(hash = %winner_hash, "rebroadcasting prioritized block with stronger work");
					this.network.flood(crate::network::Message::Publish(block), 0.5);
				}
			}
		});
	}

	/// Periodic ticker: builds a solicitor, steps every election's state
	/// machine, runs dependency activation and flushes the batched requests.
	pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
		let span = info_span!("ActiveElections");
		loop {
			tokio::select! {
				_ = tokio::time::sleep(self.constants.request_loop_interval) => {
					let _entered = span.enter();
					self.request_confirm();
				},
				_ = stop.changed() => break,
			}
		}
	}

	pub fn request_confirm(&self) {
		let representatives = self.representatives.representatives();
		let mut solicitor = ConfirmationSolicitor::new(&*self.network, &self.constants);
		solicitor.prepare(&representatives);

		let mut cleanups = Vec::new();
		{
			let ctx = self.ctx();
			let mut state = self.state.lock().unwrap();
			let roots: Vec<QualifiedRoot> =
				state.roots.keys().take(self.constants.max_active_elections).copied().collect();
			for root in roots {
				let election = state.roots.get_mut(&root).expect("collected above");
				if election.transition_time(&mut solicitor, &ctx) {
					if let Some(cleanup) = self.remove_election(&mut state, root) {
						cleanups.push(cleanup);
					}
				}
			}
		}
		for cleanup in cleanups {
			self.finish_cleanup(cleanup);
		}

		self.activate_dependencies();
		solicitor.flush();
	}

	/// Start elections for unconfirmed dependents of every election that
	/// entered backtracking. Jump-back heights are chosen by repeated
	/// bisection towards the confirmation height, capped per step, so a chain
	/// of depth H activates O(log H) elections rather than H.
	pub fn activate_dependencies(&self) {
		let requested: Vec<BlockHash> = {
			let mut state = self.state.lock().unwrap();
			state
				.roots
				.values_mut()
				.filter(|election| election.activation_requested)
				.map(|election| {
					election.activation_requested = false;
					election.winner_hash()
				})
				.collect()
		};
		if requested.is_empty() {
			return
		}

		let mut to_activate: Vec<StoredBlock> = Vec::new();
		{
			let txn = self.ledger.store.tx_begin_read();
			for winner in requested {
				// The winner may not have been ingested yet (fork candidates)
				let Some(block) = txn.block_get(&winner) else { continue };
				let account = block.sideband.account;
				let height = block.sideband.height;
				let confirmed = self.ledger.confirmation_height(&*txn, &account).height;

				let mut targets = Vec::new();
				if height > confirmed + 1 {
					let ladder = (confirmed + 1)
						.max(height.saturating_sub(DEPENDENCY_JUMP_MAX))
						.max((height + confirmed + 1) / 2);
					targets.push(ladder);
					// The lowest unconfirmed block is always worth contesting
					if confirmed + 1 != ladder {
						targets.push(confirmed + 1);
					}
				}
				for target in targets {
					if target < height {
						if let Some(candidate) =
							self.ledger.backtrack(&*txn, &block, height - target)
						{
							to_activate.push(candidate);
						}
					}
				}
				// Receives additionally depend on their source chain
				if let Some(source) = block.source() {
					if let Some(source_block) = txn.block_get(&source) {
						if !self.ledger.block_confirmed(&*txn, &source) {
							to_activate.push(source_block);
						}
					}
				}
			}
		}
		for candidate in to_activate {
			self.insert(&candidate, None);
		}
	}

	fn remove_election(
		&self,
		state: &mut ActiveState,
		root: QualifiedRoot,
	) -> Option<ElectionCleanup> {
		let election = state.roots.remove(&root)?;
		let hashes = election.block_hashes();
		for hash in &hashes {
			state.blocks.remove(hash);
		}
		Some(ElectionCleanup {
			hashes,
			winner: election.winner_hash(),
			confirmed: election.confirmed(),
		})
	}

	fn finish_cleanup(&self, cleanup: ElectionCleanup) {
		for hash in &cleanup.hashes {
			self.votes_cache.remove(hash);
		}
		if !cleanup.confirmed {
			// Allow the losing blocks to be observed again
			self.filter.clear_blocks(cleanup.hashes.iter());
			self.observers.notify_active_stopped(cleanup.winner);
		}
	}
}
