use crate::{
	block::Block,
	network::ChannelId,
	primitives::{Account, Amount, BlockHash},
	vote::{Vote, VoteCode},
};

type BlockConfirmedFn = Box<dyn Fn(&Block, &Account, Amount, bool) + Send + Sync>;
type VoteFn = Box<dyn Fn(&Vote, ChannelId, VoteCode) + Send + Sync>;
type ActiveStoppedFn = Box<dyn Fn(BlockHash) + Send + Sync>;
type BlockInvalidFn = Box<dyn Fn(&Block) + Send + Sync>;

/// Integrator callbacks. Registration happens during wiring, before any
/// component task starts; emission later iterates the plain vectors without
/// further synchronization.
#[derive(Default)]
pub struct Observers {
	block_confirmed: Vec<BlockConfirmedFn>,
	vote: Vec<VoteFn>,
	active_stopped: Vec<ActiveStoppedFn>,
	block_invalid: Vec<BlockInvalidFn>,
}

impl Observers {
	pub fn add_block_confirmed(
		&mut self,
		observer: impl Fn(&Block, &Account, Amount, bool) + Send + Sync + 'static,
	) {
		self.block_confirmed.push(Box::new(observer));
	}

	pub fn add_vote(
		&mut self,
		observer: impl Fn(&Vote, ChannelId, VoteCode) + Send + Sync + 'static,
	) {
		self.vote.push(Box::new(observer));
	}

	pub fn add_active_stopped(&mut self, observer: impl Fn(BlockHash) + Send + Sync + 'static) {
		self.active_stopped.push(Box::new(observer));
	}

	/// Invoked for locally originated blocks that failed validation, e.g. to
	/// regenerate their work
	pub fn add_block_invalid(&mut self, observer: impl Fn(&Block) + Send + Sync + 'static) {
		self.block_invalid.push(Box::new(observer));
	}

	pub fn notify_block_confirmed(
		&self,
		block: &Block,
		account: &Account,
		amount: Amount,
		is_state_send: bool,
	) {
		for observer in &self.block_confirmed {
			observer(block, account, amount, is_state_send);
		}
	}

	pub fn notify_vote(&self, vote: &Vote, channel: ChannelId, code: VoteCode) {
		for observer in &self.vote {
			observer(vote, channel, code);
		}
	}

	pub fn notify_active_stopped(&self, hash: BlockHash) {
		for observer in &self.active_stopped {
			observer(hash);
		}
	}

	pub fn notify_block_invalid(&self, block: &Block) {
		for observer in &self.block_invalid {
			observer(block);
		}
	}
}
