use std::time::Duration;

use super::*;
use crate::{
	primitives::{KeyPair, Link},
	stats::{Direction, StatDetail, StatType},
	testing::{
		dev_genesis_key, genesis_hash, open_block, poll_until, send_block, state_block,
		test_system, test_system_with_reps, GENESIS_AMOUNT,
	},
};

#[tokio::test]
async fn remote_state_block_is_verified_and_applied() {
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

	assert!(system.block_exists(&send.hash()));
	assert_eq!(system.stats.count(StatType::Block, StatDetail::Progress, Direction::In), 1);
	// The block is now contested by an election
	assert!(
		poll_until(Duration::from_secs(1), || system
			.active
			.active_root(&send.qualified_root()))
		.await
	);
}

#[tokio::test]
async fn adding_twice_yields_one_progress_and_one_old() {
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
	system.block_processor.add(send.clone(), BlockOrigin::Remote).await;
	system.block_processor.flush().await;

	assert_eq!(system.stats.count(StatType::Block, StatDetail::Progress, Direction::In), 1);
	assert!(
		poll_until(Duration::from_secs(1), || system
			.stats
			.count(StatType::Block, StatDetail::Old, Direction::In) ==
			1)
		.await
	);
}

#[tokio::test]
async fn tampered_state_block_is_dropped_by_the_verification_stage() {
	let system = test_system();
	let key = dev_genesis_key();
	let mut send = state_block(
		&key,
		genesis_hash(),
		key.account(),
		GENESIS_AMOUNT - 100,
		Link([0x42; 32]),
	);
	send.set_signature(crate::primitives::Signature::from_bytes([7u8; 64]));
	system.block_processor.add(send.clone(), BlockOrigin::Remote).await;
	system.block_processor.flush().await;

	assert!(!system.block_exists(&send.hash()));
	assert_eq!(system.stats.count(StatType::Block, StatDetail::BadSignature, Direction::In), 1);
}

// Two blocks gapped on the same missing dependency each get their own gap
// entry, and both are released when the dependency arrives
#[tokio::test]
async fn two_dependencies() {
	let system = test_system();
	let genesis_key = dev_genesis_key();
	let key = KeyPair::generate();
	let send1 = send_block(&genesis_key, genesis_hash(), key.account(), 1);
	let send2 = send_block(&genesis_key, send1.hash(), key.account(), 0);
	let open = open_block(&key, send1.hash(), key.account());

	assert_eq!(system.gap_cache.size(), 0);
	system.block_processor.add(send2.clone(), BlockOrigin::Remote).await;
	system.block_processor.flush().await;
	assert_eq!(system.gap_cache.size(), 1);
	system.block_processor.add(open.clone(), BlockOrigin::Remote).await;
	system.block_processor.flush().await;
	assert_eq!(system.gap_cache.size(), 2);
	system.block_processor.add(send1.clone(), BlockOrigin::Remote).await;
	system.block_processor.flush().await;
	assert!(
		poll_until(Duration::from_secs(1), || system.gap_cache.size() == 0 &&
			system.block_exists(&send1.hash()) &&
			system.block_exists(&send2.hash()) &&
			system.block_exists(&open.hash()))
		.await
	);
}

#[tokio::test]
async fn forced_block_rolls_back_the_fork() {
	let system = test_system();
	let key = dev_genesis_key();
	let send1 = state_block(
		&key,
		genesis_hash(),
		key.account(),
		GENESIS_AMOUNT - 100,
		Link([0x42; 32]),
	);
	let send2 = state_block(
		&key,
		genesis_hash(),
		key.account(),
		GENESIS_AMOUNT - 200,
		Link([0x43; 32]),
	);
	system.block_processor.add(send1.clone(), BlockOrigin::Remote).await;
	system.block_processor.flush().await;
	assert!(system.block_exists(&send1.hash()));

	system.block_processor.force(send2.clone());
	system.block_processor.flush().await;
	assert!(system.block_exists(&send2.hash()));
	assert!(
		poll_until(Duration::from_secs(1), || !system.block_exists(&send1.hash())).await,
		"the forked block was rolled back"
	);
	assert_eq!(system.latest(&key.account()), send2.hash());
	// The rolled back block was requeued and now lands as a fork candidate in
	// the election
	assert!(
		poll_until(Duration::from_secs(1), || system.active.active_block(&send1.hash())).await
	);
}

#[tokio::test]
async fn fork_starts_an_election_for_the_incumbent() {
	let system = test_system();
	let key = dev_genesis_key();
	let send1 = state_block(
		&key,
		genesis_hash(),
		key.account(),
		GENESIS_AMOUNT - 100,
		Link([0x42; 32]),
	);
	let send2 = state_block(
		&key,
		genesis_hash(),
		key.account(),
		GENESIS_AMOUNT - 200,
		Link([0x43; 32]),
	);
	system.block_processor.add(send1.clone(), BlockOrigin::Remote).await;
	system.block_processor.flush().await;
	system.block_processor.add(send2.clone(), BlockOrigin::Remote).await;
	system.block_processor.flush().await;

	assert_eq!(system.stats.count(StatType::Block, StatDetail::Fork, Direction::In), 1);
	// One election for the shared root, holding both candidates
	assert!(
		poll_until(Duration::from_secs(1), || system
			.active
			.active_block(&send1.hash()) &&
			system.active.active_block(&send2.hash()))
		.await
	);
	assert_eq!(system.active.size(), 1);
}

// A block processed with `progress` is confirmed and cemented within bounded
// time when a quorum representative runs locally
#[tokio::test]
async fn local_representative_confirms_and_cements() {
	let system = test_system_with_reps(vec![dev_genesis_key()]);
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
		poll_until(Duration::from_secs(5), || {
			let txn = system.ledger.store.tx_begin_read();
			system.ledger.block_confirmed(&*txn, &send.hash())
		})
		.await,
		"the block was voted on, confirmed and cemented"
	);
	assert!(system.stats.count(StatType::Vote, StatDetail::VoteGenerated, Direction::Out) >= 1);
	assert_eq!(
		system.stats.count(StatType::Election, StatDetail::ElectionConfirmed, Direction::In),
		1
	);
}
