use super::*;
use crate::{
	block::StateBlock,
	primitives::{KeyPair, Link, Signature},
	testing::{
		change_block, dev_epochs, dev_epoch_1_link, dev_genesis_key, genesis_hash, open_block,
		receive_block, seed_genesis, send_block, state_block, test_node, MemoryStore, StubWorkPool,
		TestNode, GENESIS_AMOUNT,
	},
};

fn genesis_send(node: &TestNode, destination: Account, amount: Amount) -> Block {
	let key = dev_genesis_key();
	let previous = node.latest(&key.account());
	let balance = node.balance(&key.account()) - amount;
	state_block(&key, previous, key.account(), balance, Link(destination.0))
}

#[test]
fn genesis_is_loaded() {
	let node = test_node();
	let genesis_account = dev_genesis_key().account();
	assert_eq!(node.ledger.weight(&genesis_account), GENESIS_AMOUNT);
	assert_eq!(node.balance(&genesis_account), GENESIS_AMOUNT);
	assert_eq!(node.ledger.cache.block_count.load(std::sync::atomic::Ordering::Relaxed), 1);
	assert_eq!(node.ledger.cache.cemented_count.load(std::sync::atomic::Ordering::Relaxed), 1);
	assert!(node.block_confirmed(&genesis_hash()));
}

#[test]
fn processing_is_idempotent_on_old() {
	let node = test_node();
	let send = genesis_send(&node, KeyPair::generate().account(), 100);
	assert_eq!(node.process(&send), ProcessResult::Progress);
	assert_eq!(node.process(&send), ProcessResult::Old);
	assert_eq!(node.ledger.cache.block_count.load(std::sync::atomic::Ordering::Relaxed), 2);
}

#[test]
fn state_send_moves_weight_and_creates_pending() {
	let node = test_node();
	let genesis_account = dev_genesis_key().account();
	let key = KeyPair::generate();
	let send = genesis_send(&node, key.account(), 100);
	assert_eq!(node.process(&send), ProcessResult::Progress);

	assert_eq!(node.balance(&genesis_account), GENESIS_AMOUNT - 100);
	assert_eq!(node.ledger.weight(&genesis_account), GENESIS_AMOUNT - 100);
	let txn = node.store.tx_begin_read();
	let pending = txn
		.pending_get(&PendingKey { account: key.account(), hash: send.hash() })
		.expect("pending entry created");
	assert_eq!(pending.amount, 100);
	assert_eq!(pending.source, genesis_account);
	// The genesis frontier now links forward to the send
	assert_eq!(node.ledger.successor(&*txn, &genesis_hash()), Some(send.hash()));
}

#[test]
fn state_open_receives_pending() {
	let node = test_node();
	let key = KeyPair::generate();
	let send = genesis_send(&node, key.account(), 100);
	node.process(&send);

	let open = state_block(&key, BlockHash::ZERO, key.account(), 100, Link(send.hash().0));
	assert_eq!(node.process(&open), ProcessResult::Progress);
	assert_eq!(node.balance(&key.account()), 100);
	assert_eq!(node.ledger.weight(&key.account()), 100);
	let txn = node.store.tx_begin_read();
	assert!(txn.pending_get(&PendingKey { account: key.account(), hash: send.hash() }).is_none());
	let stored = txn.block_get(&open.hash()).unwrap();
	assert!(stored.sideband.is_receive);
	assert_eq!(stored.sideband.height, 1);
}

#[test]
fn receiving_twice_is_unreceivable() {
	let node = test_node();
	let key = KeyPair::generate();
	let send = genesis_send(&node, key.account(), 100);
	node.process(&send);
	let open = state_block(&key, BlockHash::ZERO, key.account(), 100, Link(send.hash().0));
	node.process(&open);

	let again = state_block(&key, open.hash(), key.account(), 200, Link(send.hash().0));
	assert_eq!(node.process(&again), ProcessResult::Unreceivable);
}

#[test]
fn receive_amount_must_match_pending() {
	let node = test_node();
	let key = KeyPair::generate();
	let send = genesis_send(&node, key.account(), 100);
	node.process(&send);

	let open = state_block(&key, BlockHash::ZERO, key.account(), 99, Link(send.hash().0));
	assert_eq!(node.process(&open), ProcessResult::BalanceMismatch);
}

#[test]
fn missing_previous_is_a_gap() {
	let node = test_node();
	let key = dev_genesis_key();
	let send1 = genesis_send(&node, KeyPair::generate().account(), 100);
	let send2 = state_block(
		&key,
		send1.hash(),
		key.account(),
		GENESIS_AMOUNT - 200,
		Link([0x42; 32]),
	);
	assert_eq!(node.process(&send2), ProcessResult::GapPrevious);
	// Errors are pure: nothing was written
	let txn = node.store.tx_begin_read();
	assert!(!txn.block_exists(&send2.hash()));
	assert_eq!(node.balance(&key.account()), GENESIS_AMOUNT);
}

#[test]
fn missing_source_is_a_gap() {
	let node = test_node();
	let key = KeyPair::generate();
	let phantom_send = BlockHash([0x77; 32]);
	let open = state_block(&key, BlockHash::ZERO, key.account(), 100, Link(phantom_send.0));
	assert_eq!(node.process(&open), ProcessResult::GapSource);
}

#[test]
fn competing_blocks_fork() {
	let node = test_node();
	let send1 = genesis_send(&node, KeyPair::generate().account(), 100);
	let send2 = genesis_send(&node, KeyPair::generate().account(), 200);
	assert_eq!(node.process(&send1), ProcessResult::Progress);
	assert_eq!(node.process(&send2), ProcessResult::Fork);
}

#[test]
fn tampered_signature_is_rejected() {
	let node = test_node();
	let mut send = genesis_send(&node, KeyPair::generate().account(), 100);
	send.set_signature(Signature::from_bytes([5u8; 64]));
	assert_eq!(node.process(&send), ProcessResult::BadSignature);
}

#[test]
fn burn_account_cannot_be_opened() {
	let node = test_node();
	let send = genesis_send(&node, BURN_ACCOUNT, 100);
	assert_eq!(node.process(&send), ProcessResult::Progress);

	let open = Block::State(StateBlock {
		account: BURN_ACCOUNT,
		previous: BlockHash::ZERO,
		representative: BURN_ACCOUNT,
		balance: 100,
		link: Link(send.hash().0),
		signature: Signature::default(),
		work: 0,
	});
	assert_eq!(node.process(&open), ProcessResult::OpenedBurnAccount);
}

#[test]
fn representative_change_only() {
	let node = test_node();
	let key = dev_genesis_key();
	let new_rep = KeyPair::generate().account();
	let change =
		state_block(&key, genesis_hash(), new_rep, GENESIS_AMOUNT, Link::ZERO);
	assert_eq!(node.process(&change), ProcessResult::Progress);
	assert_eq!(node.ledger.weight(&key.account()), 0);
	assert_eq!(node.ledger.weight(&new_rep), GENESIS_AMOUNT);
}

#[test]
fn legacy_chain_round_trip() {
	let node = test_node();
	let genesis_key = dev_genesis_key();
	let key = KeyPair::generate();

	let send = send_block(&genesis_key, genesis_hash(), key.account(), GENESIS_AMOUNT - 50);
	assert_eq!(node.process(&send), ProcessResult::Progress);

	let open = open_block(&key, send.hash(), key.account());
	assert_eq!(node.process(&open), ProcessResult::Progress);
	assert_eq!(node.balance(&key.account()), 50);
	assert_eq!(node.ledger.weight(&key.account()), 50);

	let send_back = send_block(&key, open.hash(), genesis_key.account(), 20);
	assert_eq!(node.process(&send_back), ProcessResult::Progress);

	let receive = receive_block(&genesis_key, send.hash(), send_back.hash());
	assert_eq!(node.process(&receive), ProcessResult::Progress);
	assert_eq!(node.balance(&genesis_key.account()), GENESIS_AMOUNT - 20);

	let change = change_block(&key, send_back.hash(), genesis_key.account());
	assert_eq!(node.process(&change), ProcessResult::Progress);
	assert_eq!(node.ledger.weight(&key.account()), 0);
	assert_eq!(node.ledger.weight(&genesis_key.account()), GENESIS_AMOUNT);

	// Frontier table follows the legacy heads
	let txn = node.store.tx_begin_read();
	assert_eq!(txn.frontier_get(&change.hash()), Some(key.account()));
	assert!(txn.frontier_get(&open.hash()).is_none());
}

#[test]
fn legacy_overspend_is_negative_spend() {
	let node = test_node();
	let send = send_block(
		&dev_genesis_key(),
		genesis_hash(),
		KeyPair::generate().account(),
		GENESIS_AMOUNT - 50,
	);
	assert_eq!(node.process(&send), ProcessResult::Progress);
	// A send that raises the balance is spending money that is not there
	let overspend = send_block(
		&dev_genesis_key(),
		send.hash(),
		KeyPair::generate().account(),
		GENESIS_AMOUNT - 10,
	);
	assert_eq!(node.process(&overspend), ProcessResult::NegativeSpend);
}

#[test]
fn legacy_block_after_state_block_is_positional() {
	let node = test_node();
	let key = dev_genesis_key();
	let state = genesis_send(&node, KeyPair::generate().account(), 100);
	node.process(&state);

	let legacy = send_block(&key, state.hash(), KeyPair::generate().account(), 1);
	assert_eq!(node.process(&legacy), ProcessResult::BlockPosition);
}

#[test]
fn epoch_upgrade() {
	let node = test_node();
	let genesis_key = dev_genesis_key();
	let key = KeyPair::generate();
	let send = genesis_send(&node, key.account(), 100);
	node.process(&send);
	let open = state_block(&key, BlockHash::ZERO, key.account(), 100, Link(send.hash().0));
	node.process(&open);

	// Epoch blocks are signed by the epoch signer and change nothing but the
	// account epoch
	let epoch = crate::testing::epoch_block(
		&genesis_key,
		key.account(),
		open.hash(),
		key.account(),
		100,
		dev_epoch_1_link(),
	);
	assert_eq!(node.process(&epoch), ProcessResult::Progress);
	let txn = node.store.tx_begin_read();
	let info = txn.account_get(&key.account()).unwrap();
	assert_eq!(info.epoch, Epoch::Epoch1);
	assert_eq!(info.balance, 100);
	let stored = txn.block_get(&epoch.hash()).unwrap();
	assert!(stored.sideband.is_epoch);
	drop(txn);

	// Weight is untouched by the upgrade
	assert_eq!(node.ledger.weight(&key.account()), 100);

	let wrong_rep = crate::testing::epoch_block(
		&genesis_key,
		genesis_key.account(),
		node.latest(&genesis_key.account()),
		key.account(),
		GENESIS_AMOUNT - 100,
		dev_epoch_1_link(),
	);
	assert_eq!(node.process(&wrong_rep), ProcessResult::RepresentativeMismatch);
}

#[test]
fn epoch_open_requires_pending_funds() {
	let node = test_node();
	let genesis_key = dev_genesis_key();
	let key = KeyPair::generate();

	// No funds waiting for the account yet
	let premature = crate::testing::epoch_block(
		&genesis_key,
		key.account(),
		BlockHash::ZERO,
		Account::ZERO,
		0,
		dev_epoch_1_link(),
	);
	assert_eq!(node.process(&premature), ProcessResult::GapEpochOpenPending);

	let send = genesis_send(&node, key.account(), 100);
	node.process(&send);
	assert_eq!(node.process(&premature), ProcessResult::Progress);
	let txn = node.store.tx_begin_read();
	let info = txn.account_get(&key.account()).unwrap();
	assert_eq!(info.epoch, Epoch::Epoch1);
	assert_eq!(info.balance, 0);
	// The pending entry is untouched; the real receive comes later
	assert!(txn.pending_get(&PendingKey { account: key.account(), hash: send.hash() }).is_some());
}

#[test]
fn insufficient_work_is_rejected() {
	let constants = {
		let mut constants = crate::config::NetworkConstants::test();
		constants.work_threshold = 1;
		constants
	};
	let store = Arc::new(MemoryStore::default());
	seed_genesis(&*store);
	let ledger = Ledger::new(store, constants, dev_epochs(), Arc::new(StubWorkPool));

	let send = state_block(
		&dev_genesis_key(),
		genesis_hash(),
		dev_genesis_key().account(),
		GENESIS_AMOUNT - 1,
		Link([0x42; 32]),
	);
	// The stub work pool reports the work value as the difficulty; zero work
	// is now below threshold
	let mut txn = ledger.store.tx_begin_write();
	assert_eq!(ledger.process(&mut *txn, &send), ProcessResult::InsufficientWork);
	let mut passing = send.clone();
	passing.set_work(1);
	assert_eq!(ledger.process(&mut *txn, &passing), ProcessResult::Progress);
	txn.commit().unwrap();
}

#[test]
fn rollback_restores_account_state() {
	let node = test_node();
	let genesis_account = dev_genesis_key().account();
	let key = KeyPair::generate();
	let send = genesis_send(&node, key.account(), 100);
	node.process(&send);

	let mut txn = node.store.tx_begin_write();
	let rolled_back = node.ledger.rollback(&mut *txn, &send.hash()).unwrap();
	txn.commit().unwrap();

	assert_eq!(rolled_back.len(), 1);
	assert_eq!(rolled_back[0].hash(), send.hash());
	assert_eq!(node.balance(&genesis_account), GENESIS_AMOUNT);
	assert_eq!(node.ledger.weight(&genesis_account), GENESIS_AMOUNT);
	let txn = node.store.tx_begin_read();
	assert!(!txn.block_exists(&send.hash()));
	assert!(txn
		.pending_get(&PendingKey { account: key.account(), hash: send.hash() })
		.is_none());
	assert_eq!(node.ledger.successor(&*txn, &genesis_hash()), None);
}

#[test]
fn rollback_of_receive_restores_pending() {
	let node = test_node();
	let key = KeyPair::generate();
	let send = genesis_send(&node, key.account(), 100);
	node.process(&send);
	let open = state_block(&key, BlockHash::ZERO, key.account(), 100, Link(send.hash().0));
	node.process(&open);

	let mut txn = node.store.tx_begin_write();
	node.ledger.rollback(&mut *txn, &open.hash()).unwrap();
	txn.commit().unwrap();

	let txn = node.store.tx_begin_read();
	assert!(txn.account_get(&key.account()).is_none());
	let pending = txn
		.pending_get(&PendingKey { account: key.account(), hash: send.hash() })
		.expect("pending restored");
	assert_eq!(pending.amount, 100);
	assert_eq!(node.ledger.weight(&key.account()), 0);
}

#[test]
fn rollback_of_received_send_is_refused() {
	let node = test_node();
	let key = KeyPair::generate();
	let send = genesis_send(&node, key.account(), 100);
	node.process(&send);
	let open = state_block(&key, BlockHash::ZERO, key.account(), 100, Link(send.hash().0));
	node.process(&open);

	let mut txn = node.store.tx_begin_write();
	assert!(node.ledger.rollback(&mut *txn, &send.hash()).is_err());
}

#[test]
fn rollback_refuses_cemented_blocks() {
	let node = test_node();
	let mut txn = node.store.tx_begin_write();
	assert!(node.ledger.rollback(&mut *txn, &genesis_hash()).is_err());
}

#[test]
fn backtrack_walks_the_chain() {
	let node = test_node();
	let send1 = genesis_send(&node, KeyPair::generate().account(), 1);
	node.process(&send1);
	let send2 = genesis_send(&node, KeyPair::generate().account(), 1);
	node.process(&send2);

	let txn = node.store.tx_begin_read();
	let frontier = txn.block_get(&send2.hash()).unwrap();
	assert_eq!(
		node.ledger.backtrack(&*txn, &frontier, 2).map(|block| block.hash()),
		Some(genesis_hash())
	);
	assert_eq!(node.ledger.backtrack(&*txn, &frontier, 3), None);
}
