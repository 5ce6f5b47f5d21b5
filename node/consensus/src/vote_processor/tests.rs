use std::time::Duration;

use super::*;
use crate::{
	block_processor::BlockOrigin,
	primitives::{BlockHash, KeyPair, Link},
	signature_checker::SignatureChecker,
	stats::{Direction, StatDetail, StatType},
	testing::{
		dev_genesis_key, genesis_hash, poll_until, state_block, test_node, test_system,
		GENESIS_AMOUNT,
	},
	vote::Vote,
};

fn standalone_processor(max_votes: usize) -> (crate::testing::TestNode, Arc<VoteProcessor>) {
	let node = test_node();
	let processor = Arc::new(VoteProcessor::new(
		Arc::new(SignatureChecker::new(1)),
		node.active.clone(),
		node.observers.clone(),
		node.stats.clone(),
		node.online_reps.clone(),
		node.ledger.clone(),
		max_votes,
	));
	(node, processor)
}

#[tokio::test]
async fn everyone_is_admitted_while_the_queue_is_shallow() {
	let (_node, processor) = standalone_processor(9);
	let nobody = KeyPair::generate();
	for sequence in 1..=6 {
		let vote = Vote::new_signed(&nobody, sequence, vec![BlockHash([1u8; 32])]);
		assert!(!processor.vote(vote, ChannelId(7)), "admitted at fill {}", sequence - 1);
	}
	assert_eq!(processor.size(), 6);
}

#[tokio::test]
async fn deep_queues_only_admit_representatives() {
	let (node, processor) = standalone_processor(9);
	processor.calculate_weights();
	let nobody = KeyPair::generate();
	let genesis = dev_genesis_key();

	// Fill to 6/9 with anyone's votes
	for sequence in 1..=6 {
		processor.vote(Vote::new_signed(&nobody, sequence, vec![BlockHash([1u8; 32])]), ChannelId(7));
	}
	// Past 6/9 an unknown voter is dropped, the genesis representative
	// (above every tier threshold) still gets in
	assert!(processor.vote(Vote::new_signed(&nobody, 7, vec![BlockHash([1u8; 32])]), ChannelId(7)));
	assert_eq!(node.stats.count(StatType::Vote, StatDetail::VoteOverflow, Direction::In), 1);
	for sequence in 1..=3 {
		assert!(!processor
			.vote(Vote::new_signed(&genesis, sequence, vec![BlockHash([1u8; 32])]), ChannelId(7)));
	}
	// The queue is at capacity now; even the representative is dropped
	assert!(processor.vote(Vote::new_signed(&genesis, 4, vec![BlockHash([1u8; 32])]), ChannelId(7)));
	assert_eq!(processor.size(), 9);
	assert_eq!(node.stats.count(StatType::Vote, StatDetail::VoteOverflow, Direction::In), 2);
}

#[tokio::test]
async fn queued_votes_are_verified_and_dispatched() {
	let system = test_system();
	let key = dev_genesis_key();
	let send = state_block(
		&key,
		genesis_hash(),
		key.account(),
		GENESIS_AMOUNT - 100,
		Link([0x42; 32]),
	);
	system.block_processor.add(send.clone(), BlockOrigin::Remote).await;
	system.block_processor.flush().await;
	assert!(
		poll_until(Duration::from_secs(1), || system
			.active
			.active_root(&send.qualified_root()))
		.await
	);

	assert!(!system.vote_processor.vote(Vote::new_signed(&key, 1, vec![send.hash()]), ChannelId(7)));
	system.vote_processor.flush().await;
	assert_eq!(system.stats.count(StatType::Vote, StatDetail::VoteValid, Direction::In), 1);
	assert!(system.active.election_confirmed(&send.qualified_root()));
}

#[tokio::test]
async fn forged_votes_are_rejected_by_the_batch_check() {
	let system = test_system();
	let mut vote = Vote::new_signed(&dev_genesis_key(), 1, vec![BlockHash([1u8; 32])]);
	// Re-target the vote without re-signing
	vote.hashes = vec![BlockHash([2u8; 32])];
	system.vote_processor.vote(vote, ChannelId(7));
	system.vote_processor.flush().await;

	assert_eq!(system.stats.count(StatType::Vote, StatDetail::VoteInvalid, Direction::In), 1);
	assert_eq!(system.stats.count(StatType::Vote, StatDetail::VoteValid, Direction::In), 0);
}

#[tokio::test]
async fn observed_voters_feed_the_online_set() {
	let system = test_system();
	let key = dev_genesis_key();
	system.vote_processor.vote(Vote::new_signed(&key, 1, vec![BlockHash([1u8; 32])]), ChannelId(7));
	system.vote_processor.flush().await;
	assert_eq!(system.online_reps.list(), vec![key.account()]);
}
