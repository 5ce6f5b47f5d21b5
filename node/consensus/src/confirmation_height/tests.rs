use std::{
	sync::atomic::{AtomicUsize, Ordering as AtomicOrdering},
	time::Duration,
};

use super::*;
use crate::{
	config::NetworkConstants,
	primitives::KeyPair,
	testing::{
		dev_epochs, dev_genesis_key, genesis_hash, poll_until, seed_genesis, state_block,
		MemoryStore, StubWorkPool, GENESIS_AMOUNT,
	},
};

struct Fixture {
	ledger: Arc<Ledger>,
	stats: Arc<Stats>,
	cemented: Arc<Mutex<Vec<BlockHash>>>,
	already_cemented: Arc<AtomicUsize>,
	processor: Arc<ConfirmationHeightProcessor>,
	stop: tokio::sync::watch::Sender<bool>,
}

fn fixture(mode: ConfirmationHeightMode) -> Fixture {
	let constants = NetworkConstants::test();
	let stats = Arc::new(Stats::default());
	let store = Arc::new(MemoryStore::default());
	seed_genesis(&*store);
	let ledger =
		Arc::new(Ledger::new(store, constants.clone(), dev_epochs(), Arc::new(StubWorkPool)));
	let write_queue = Arc::new(WriteQueue::new());

	let cemented = Arc::new(Mutex::new(Vec::new()));
	let already_cemented = Arc::new(AtomicUsize::new(0));
	let mut processor = ConfirmationHeightProcessor::new(
		ledger.clone(),
		write_queue.clone(),
		constants.clone(),
		stats.clone(),
		mode,
	);
	{
		let cemented = cemented.clone();
		processor.add_cemented_observer(move |block| {
			cemented.lock().unwrap().push(block.hash());
		});
	}
	{
		let already_cemented = already_cemented.clone();
		processor.add_already_cemented_observer(move |_hash| {
			already_cemented.fetch_add(1, AtomicOrdering::SeqCst);
		});
	}
	let processor = Arc::new(processor);
	let (stop, stop_receiver) = tokio::sync::watch::channel(false);
	tokio::spawn(processor.clone().run(stop_receiver));

	Fixture { ledger, stats, cemented, already_cemented, processor, stop }
}

impl Drop for Fixture {
	fn drop(&mut self) {
		let _ = self.stop.send(true);
	}
}

impl Fixture {
	fn process(&self, block: &crate::block::Block) {
		let mut txn = self.ledger.store.tx_begin_write();
		assert_eq!(self.ledger.process(&mut *txn, block), crate::ledger::ProcessResult::Progress);
		txn.commit().unwrap();
	}

	fn confirmation_height(&self, account: &crate::primitives::Account) -> u64 {
		let txn = self.ledger.store.tx_begin_read();
		self.ledger.confirmation_height(&*txn, account).height
	}
}

#[tokio::test]
async fn cement_advances_height_and_notifies() {
	let fixture = fixture(ConfirmationHeightMode::Automatic);
	let key = dev_genesis_key();
	let send1 = state_block(
		&key,
		genesis_hash(),
		key.account(),
		GENESIS_AMOUNT - 1,
		crate::primitives::Link([0x42; 32]),
	);
	let send2 = state_block(
		&key,
		send1.hash(),
		key.account(),
		GENESIS_AMOUNT - 2,
		crate::primitives::Link([0x43; 32]),
	);
	fixture.process(&send1);
	fixture.process(&send2);

	fixture.processor.add(send2.hash());
	assert!(
		poll_until(Duration::from_secs(1), || fixture.confirmation_height(&key.account()) == 3)
			.await
	);
	// Ancestors first, the target last, genesis untouched
	assert_eq!(*fixture.cemented.lock().unwrap(), vec![send1.hash(), send2.hash()]);
	assert_eq!(
		fixture.ledger.cache.cemented_count.load(std::sync::atomic::Ordering::Relaxed),
		3
	);
	assert_eq!(
		fixture.stats.count(StatType::ConfirmationHeight, StatDetail::Cemented, Direction::In),
		2
	);
}

// Cementing a block at or below the confirmation height leaves it unchanged
// and emits one already-cemented event per call
#[tokio::test]
async fn recementing_is_idempotent() {
	let fixture = fixture(ConfirmationHeightMode::Automatic);
	let key = dev_genesis_key();
	let send1 = state_block(
		&key,
		genesis_hash(),
		key.account(),
		GENESIS_AMOUNT - 1,
		crate::primitives::Link([0x42; 32]),
	);
	let send2 = state_block(
		&key,
		send1.hash(),
		key.account(),
		GENESIS_AMOUNT - 2,
		crate::primitives::Link([0x43; 32]),
	);
	fixture.process(&send1);
	fixture.process(&send2);
	fixture.processor.add(send2.hash());
	assert!(
		poll_until(Duration::from_secs(1), || fixture.confirmation_height(&key.account()) == 3)
			.await
	);

	fixture.processor.add(send1.hash());
	fixture.processor.add(send2.hash());
	assert!(
		poll_until(Duration::from_secs(1), || {
			fixture.already_cemented.load(AtomicOrdering::SeqCst) == 2
		})
		.await
	);
	// Still monotonic: the height did not move
	assert_eq!(fixture.confirmation_height(&key.account()), 3);
	assert_eq!(*fixture.cemented.lock().unwrap(), vec![send1.hash(), send2.hash()]);
}

// A receive is cemented in the same batch as its source chain
#[tokio::test]
async fn receive_and_source_cement_together() {
	let fixture = fixture(ConfirmationHeightMode::Automatic);
	let genesis_key = dev_genesis_key();
	let key = KeyPair::generate();
	let send = state_block(
		&genesis_key,
		genesis_hash(),
		genesis_key.account(),
		GENESIS_AMOUNT - 10,
		crate::primitives::Link(key.account().0),
	);
	let open = state_block(
		&key,
		BlockHash::ZERO,
		key.account(),
		10,
		crate::primitives::Link(send.hash().0),
	);
	fixture.process(&send);
	fixture.process(&open);

	fixture.processor.add(open.hash());
	assert!(
		poll_until(Duration::from_secs(1), || fixture.confirmation_height(&key.account()) == 1)
			.await
	);
	assert_eq!(fixture.confirmation_height(&genesis_key.account()), 2);
	// The source is observed before the receive that depends on it
	assert_eq!(*fixture.cemented.lock().unwrap(), vec![send.hash(), open.hash()]);
}

#[tokio::test]
async fn unbounded_strategy_cements_the_same_chain() {
	let fixture = fixture(ConfirmationHeightMode::Unbounded);
	let key = dev_genesis_key();
	let mut previous = genesis_hash();
	let mut amount = GENESIS_AMOUNT;
	let mut hashes = Vec::new();
	for _ in 0..10 {
		amount -= 1;
		let block =
			state_block(&key, previous, key.account(), amount, crate::primitives::Link(key.account().0));
		fixture.process(&block);
		previous = block.hash();
		hashes.push(block.hash());
	}

	fixture.processor.add(previous);
	assert!(
		poll_until(Duration::from_secs(1), || fixture.confirmation_height(&key.account()) == 11)
			.await
	);
	assert_eq!(*fixture.cemented.lock().unwrap(), hashes);
}

#[tokio::test]
async fn pause_holds_back_new_work() {
	let fixture = fixture(ConfirmationHeightMode::Automatic);
	let key = dev_genesis_key();
	let send = state_block(
		&key,
		genesis_hash(),
		key.account(),
		GENESIS_AMOUNT - 1,
		crate::primitives::Link([0x42; 32]),
	);
	fixture.process(&send);

	fixture.processor.pause();
	fixture.processor.add(send.hash());
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert_eq!(fixture.confirmation_height(&key.account()), 1);
	assert_eq!(fixture.processor.awaiting_processing_size(), 1);

	fixture.processor.unpause();
	assert!(
		poll_until(Duration::from_secs(1), || fixture.confirmation_height(&key.account()) == 2)
			.await
	);
}

#[tokio::test]
async fn processing_status_is_reported() {
	let fixture = fixture(ConfirmationHeightMode::Automatic);
	let key = dev_genesis_key();
	let send = state_block(
		&key,
		genesis_hash(),
		key.account(),
		GENESIS_AMOUNT - 1,
		crate::primitives::Link([0x42; 32]),
	);
	fixture.process(&send);

	fixture.processor.pause();
	fixture.processor.add(send.hash());
	assert!(fixture.processor.is_processing_block(&send.hash()));
	fixture.processor.unpause();
	assert!(
		poll_until(Duration::from_secs(1), || !fixture.processor.is_processing_block(&send.hash()))
			.await
	);
}
