
use std::collections::HashMap;

use itertools::Itertools;

use crate::{
	config::{NetworkConstants, CONFIRM_REQ_HASHES_MAX},
	elections::election::Election,
	network::{ChannelId, Message, Network, Representative},
	primitives::{BlockHash, Root},
};

/// Accepts elections that need further votes and bundles their roots into
/// batched confirm_req messages, at most one batch run per request-loop tick.
/// Also meters winner broadcasts across the tick.
pub struct ConfirmationSolicitor<'a> {
	network: &'a dyn Network,
	/// Maximum amount of confirmation request batches to be sent to each channel
	pub max_confirm_req_batches: usize,
	/// Global maximum amount of block broadcasts
	pub max_block_broadcasts: usize,
	/// Maximum amount of requests to be sent per election
	pub max_election_requests: usize,
	/// Maximum amount of directed broadcasts to be sent per election
	pub max_election_broadcasts: usize,
	rebroadcasted: usize,
	/// Two copies are required as representatives can be erased from
	/// `representatives_requests`
	representatives_requests: Vec<Representative>,
	representatives_broadcasts: Vec<Representative>,
	requests: HashMap<ChannelId, Vec<(BlockHash, Root)>>,
	prepared: bool,
}

impl<'a> ConfirmationSolicitor<'a> {
	pub fn new(network: &'a dyn Network, constants: &NetworkConstants) -> Self {
		ConfirmationSolicitor {
			network,
			max_confirm_req_batches: constants.max_confirm_req_batches,
			max_block_broadcasts: constants.max_block_broadcasts,
			max_election_requests: constants.max_election_requests,
			max_election_broadcasts: (network.fanout(1.0) / 2).max(1),
			rebroadcasted: 0,
			representatives_requests: Vec::new(),
			representatives_broadcasts: Vec::new(),
			requests: HashMap::new(),
			prepared: false,
		}
	}

	/// Prepare for batching election confirmation requests for one tick
	pub fn prepare(&mut self, representatives: &[Representative]) {
		debug_assert!(!self.prepared);
		self.requests.clear();
		self.rebroadcasted = 0;
		self.representatives_requests = representatives.to_vec();
		self.representatives_broadcasts = representatives.to_vec();
		self.prepared = true;
	}

	/// Broadcast the winner of an election if the broadcast limit has not
	/// been reached. Returns false if the broadcast was performed.
	pub fn broadcast(&mut self, election: &Election) -> bool {
		debug_assert!(self.prepared);
		self.rebroadcasted += 1;
		if self.rebroadcasted > self.max_block_broadcasts {
			return true
		}
		let hash = election.winner_hash();
		let Some(winner) = election.winner_block() else { return true };
		let winner = winner.clone();

		// Directed broadcasting to representatives that have not yet voted
		// for the winner
		let mut count = 0;
		for representative in &self.representatives_broadcasts {
			if count >= self.max_election_broadcasts {
				break
			}
			let voted_for_winner = election
				.last_votes
				.get(&representative.account)
				.is_some_and(|existing| existing.hash == hash);
			if !voted_for_winner {
				self.network.send(representative.channel, Message::Publish(winner.clone()));
				count += 1;
			}
		}
		// Random flood for block propagation
		self.network.flood(Message::Publish(winner), 0.5);
		false
	}

	/// Add an election that needs to be confirmed. Returns true if no request
	/// could be queued because every representative's channel is full.
	pub fn add(&mut self, election: &Election) -> bool {
		debug_assert!(self.prepared);
		let max_channel_requests = self.max_confirm_req_batches * CONFIRM_REQ_HASHES_MAX;
		let hash = election.winner_hash();
		let root = election.root.root;
		let mut count = 0;
		let mut index = 0;
		while index < self.representatives_requests.len() && count < self.max_election_requests {
			let representative = &self.representatives_requests[index];
			let voted_for_winner = election
				.last_votes
				.get(&representative.account)
				.is_some_and(|existing| existing.hash == hash);
			let mut full_queue = false;
			if !voted_for_winner {
				let queue = self.requests.entry(representative.channel).or_default();
				if queue.len() < max_channel_requests {
					queue.push((hash, root));
					count += 1;
				} else {
					full_queue = true;
				}
			}
			if full_queue {
				self.representatives_requests.remove(index);
			} else {
				index += 1;
			}
		}
		count == 0
	}

	/// Dispatch the bundled requests to each channel, at most
	/// [CONFIRM_REQ_HASHES_MAX] pairs per message
	pub fn flush(&mut self) {
		debug_assert!(self.prepared);
		for (channel, queue) in &self.requests {
			for chunk in &queue.iter().chunks(CONFIRM_REQ_HASHES_MAX) {
				let roots_hashes = chunk.copied().collect();
				self.network.send(*channel, Message::ConfirmReq { roots_hashes });
			}
		}
		self.prepared = false;
	}
}
