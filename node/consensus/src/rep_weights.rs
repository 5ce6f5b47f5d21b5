use std::{
	collections::HashMap,
	sync::{Mutex, MutexGuard},
};

use crate::{
	primitives::{Account, Amount},
	store::WriteTransaction,
};

/// In-memory cache of per-representative voting weight, adjusted incrementally
/// as the ledger processes and rolls back blocks. Authoritative once loaded;
/// the `rep_weights` table is a snapshot for fast startup.
#[derive(Default)]
pub struct RepWeights {
	weights: Mutex<HashMap<Account, Amount>>,
}

impl RepWeights {
	pub fn load(&self, snapshot: Vec<(Account, Amount)>) {
		let mut weights = self.weights.lock().unwrap();
		for (account, amount) in snapshot {
			weights.insert(account, amount);
		}
	}

	pub fn representation_get(&self, account: &Account) -> Amount {
		self.weights.lock().unwrap().get(account).copied().unwrap_or_default()
	}

	pub fn representation_add(&self, account: Account, delta: Amount) {
		let mut weights = self.weights.lock().unwrap();
		let entry = weights.entry(account).or_default();
		*entry = entry.saturating_add(delta);
	}

	pub fn representation_subtract(&self, account: Account, delta: Amount) {
		let mut weights = self.weights.lock().unwrap();
		if let Some(entry) = weights.get_mut(&account) {
			*entry = entry.saturating_sub(delta);
			if *entry == 0 {
				weights.remove(&account);
			}
		}
	}

	pub fn representation_put(&self, account: Account, amount: Amount) {
		self.weights.lock().unwrap().insert(account, amount);
	}

	pub fn get_rep_amounts(&self) -> Vec<(Account, Amount)> {
		self.weights.lock().unwrap().iter().map(|(account, amount)| (*account, *amount)).collect()
	}

	/// Persist the cache into the store snapshot table
	pub fn snapshot_to(&self, txn: &mut dyn WriteTransaction) {
		for (account, amount) in self.get_rep_amounts() {
			txn.rep_weight_put(account, amount);
		}
	}

	pub(crate) fn guard(&self) -> MutexGuard<'_, HashMap<Account, Amount>> {
		self.weights.lock().unwrap()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn weights_adjust_incrementally() {
		let weights = RepWeights::default();
		let rep = Account([1u8; 32]);
		weights.representation_add(rep, 100);
		weights.representation_add(rep, 50);
		assert_eq!(weights.representation_get(&rep), 150);

		weights.representation_subtract(rep, 150);
		assert_eq!(weights.representation_get(&rep), 0);
		// Fully drained reps are dropped from the map
		assert!(weights.get_rep_amounts().is_empty());
	}

	#[test]
	fn subtract_saturates() {
		let weights = RepWeights::default();
		let rep = Account([1u8; 32]);
		weights.representation_add(rep, 10);
		weights.representation_subtract(rep, 100);
		assert_eq!(weights.representation_get(&rep), 0);
	}
}
