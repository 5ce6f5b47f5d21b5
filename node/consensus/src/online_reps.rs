use std::{
	collections::BTreeSet,
	sync::{Arc, Mutex},
};

use crate::{
	config::NetworkConstants,
	ledger::Ledger,
	primitives::{Account, Amount},
	store::{ReadOps, WriteTransaction},
};

/// Sample keys need sub-second resolution so consecutive samples never collide
fn nanoseconds_since_epoch() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.expect("system clock before unix epoch")
		.as_nanos() as u64
}

/// Tracks which representatives have been seen voting recently and maintains
/// a trended estimate of the online stake, sampled periodically into the
/// `online_weight` table.
pub struct OnlineReps {
	ledger: Arc<Ledger>,
	constants: NetworkConstants,
	online: Mutex<Amount>,
	reps: Mutex<BTreeSet<Account>>,
}

impl OnlineReps {
	pub fn new(ledger: Arc<Ledger>, constants: NetworkConstants) -> Self {
		let online = {
			let txn = ledger.store.tx_begin_read();
			Self::trend_of(&*txn, &constants)
		};
		OnlineReps { ledger, constants, online: Mutex::new(online), reps: Mutex::new(BTreeSet::new()) }
	}

	/// Record that `rep` was seen voting
	pub fn observe(&self, rep: Account) {
		if self.ledger.weight(&rep) > 0 {
			self.reps.lock().unwrap().insert(rep);
		}
	}

	/// Fold the observed representatives into a new weight sample and refresh
	/// the trend. Runs under the `OnlineWeight` writer token.
	pub fn sample(&self, txn: &mut dyn WriteTransaction) {
		// Discard oldest samples beyond the window
		let samples = txn.online_weight();
		let excess = samples.len().saturating_sub(self.constants.max_weight_samples as usize - 1);
		for (timestamp, _) in samples.iter().take(excess) {
			txn.online_weight_del(*timestamp);
		}

		let observed = std::mem::take(&mut *self.reps.lock().unwrap());
		let current: Amount =
			observed.iter().map(|rep| self.ledger.weight(rep)).fold(0, Amount::saturating_add);
		txn.online_weight_put(nanoseconds_since_epoch(), current);

		*self.online.lock().unwrap() = Self::trend_of(&*txn, &self.constants);
	}

	fn trend_of(txn: &dyn ReadOps, constants: &NetworkConstants) -> Amount {
		let mut items = vec![constants.online_weight_minimum];
		items.extend(txn.online_weight().iter().map(|(_, amount)| *amount));
		// The median keeps brief participation dips from moving the target
		let median_idx = items.len() / 2;
		items.select_nth_unstable(median_idx);
		items[median_idx]
	}

	pub fn online_stake(&self) -> Amount {
		(*self.online.lock().unwrap()).max(self.constants.online_weight_minimum)
	}

	pub fn list(&self) -> Vec<Account> {
		self.reps.lock().unwrap().iter().copied().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		primitives::KeyPair,
		store::Store,
		testing::{dev_epochs, dev_genesis_key, seed_genesis, test_node, MemoryStore, StubWorkPool},
	};

	#[test]
	fn only_weighted_accounts_are_observed() {
		let node = test_node();
		node.online_reps.observe(dev_genesis_key().account());
		node.online_reps.observe(KeyPair::generate().account());
		assert_eq!(node.online_reps.list(), vec![dev_genesis_key().account()]);
	}

	#[test]
	fn sampling_trends_the_observed_weight() {
		let constants = {
			let mut constants = NetworkConstants::test();
			constants.online_weight_minimum = 100;
			constants
		};
		let store = Arc::new(MemoryStore::default());
		seed_genesis(&*store);
		let ledger = Arc::new(crate::ledger::Ledger::new(
			store,
			constants.clone(),
			dev_epochs(),
			Arc::new(StubWorkPool),
		));
		let online_reps = OnlineReps::new(ledger.clone(), constants);

		online_reps.observe(dev_genesis_key().account());
		{
			let mut txn = ledger.store.tx_begin_write();
			online_reps.sample(&mut *txn);
			txn.commit().unwrap();
		}
		// Median of [minimum, genesis weight]
		assert_eq!(online_reps.online_stake(), crate::testing::GENESIS_AMOUNT);

		// A sample with nobody observed drags the trend back to the floor
		{
			let mut txn = ledger.store.tx_begin_write();
			online_reps.sample(&mut *txn);
			txn.commit().unwrap();
		}
		assert_eq!(online_reps.online_stake(), 100);
	}

	#[test]
	fn sample_window_is_bounded() {
		let node = test_node();
		for _ in 0..node.constants.max_weight_samples + 20 {
			let mut txn = node.store.tx_begin_write();
			node.online_reps.sample(&mut *txn);
			txn.commit().unwrap();
		}
		let txn = node.store.tx_begin_read();
		assert!(txn.online_weight().len() as u64 <= node.constants.max_weight_samples);
	}
}
