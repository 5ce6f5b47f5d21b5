use rayon::prelude::*;

use crate::primitives::{validate_message, Account, Signature};

/// Batches at or below this size verify synchronously on the caller; larger
/// batches partition across the worker pool.
pub const BATCH_SIZE: usize = 256;

/// One batch of signatures to verify. `verifications` receives 1 for valid and
/// 0 for invalid, index-aligned with the inputs.
pub struct SignatureCheckSet {
	pub messages: Vec<Vec<u8>>,
	pub pub_keys: Vec<Account>,
	pub signatures: Vec<Signature>,
	pub verifications: Vec<i32>,
}

impl SignatureCheckSet {
	pub fn new(messages: Vec<Vec<u8>>, pub_keys: Vec<Account>, signatures: Vec<Signature>) -> Self {
		let size = messages.len();
		assert_eq!(size, pub_keys.len());
		assert_eq!(size, signatures.len());
		SignatureCheckSet { messages, pub_keys, signatures, verifications: vec![-1; size] }
	}

	pub fn size(&self) -> usize {
		self.messages.len()
	}
}

/// Batch ed25519 verifier over a bounded worker pool. A panicking worker is
/// not caught; signature verification failing to run at all is fatal to the
/// process by design.
pub struct SignatureChecker {
	pool: rayon::ThreadPool,
}

impl SignatureChecker {
	/// `num_threads` zero sizes the pool to half the hardware threads; the
	/// calling thread always participates as well.
	pub fn new(num_threads: usize) -> Self {
		let num_threads = if num_threads == 0 {
			std::thread::available_parallelism().map(|n| n.get() / 2).unwrap_or(1).max(1)
		} else {
			num_threads
		};
		let pool = rayon::ThreadPoolBuilder::new()
			.num_threads(num_threads)
			.thread_name(|i| format!("signature checker {i}"))
			.build()
			.expect("failed to build signature checker pool");
		SignatureChecker { pool }
	}

	pub fn verify(&self, check: &mut SignatureCheckSet) {
		if check.size() <= BATCH_SIZE {
			verify_batch(
				&check.messages,
				&check.pub_keys,
				&check.signatures,
				&mut check.verifications,
			);
		} else {
			let messages = &check.messages;
			let pub_keys = &check.pub_keys;
			let signatures = &check.signatures;
			self.pool.install(|| {
				check
					.verifications
					.par_chunks_mut(BATCH_SIZE)
					.zip(messages.par_chunks(BATCH_SIZE))
					.zip(pub_keys.par_chunks(BATCH_SIZE))
					.zip(signatures.par_chunks(BATCH_SIZE))
					.for_each(|(((verifications, messages), pub_keys), signatures)| {
						verify_batch(messages, pub_keys, signatures, verifications);
					});
			});
		}
		debug_assert!(check.verifications.iter().all(|&v| v == 0 || v == 1));
	}
}

fn verify_batch(
	messages: &[Vec<u8>],
	pub_keys: &[Account],
	signatures: &[Signature],
	verifications: &mut [i32],
) {
	for (i, verification) in verifications.iter_mut().enumerate() {
		*verification = validate_message(&pub_keys[i], &messages[i], &signatures[i]) as i32;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::primitives::KeyPair;

	fn check_set_with_one_bad_entry(size: usize, bad_index: usize) -> SignatureCheckSet {
		let mut messages = Vec::with_capacity(size);
		let mut pub_keys = Vec::with_capacity(size);
		let mut signatures = Vec::with_capacity(size);
		let key = KeyPair::generate();
		for i in 0..size {
			let message = format!("message {i}").into_bytes();
			let mut signature = key.sign(&message);
			if i == bad_index {
				signature = key.sign(b"wrong message");
			}
			messages.push(message);
			pub_keys.push(key.account());
			signatures.push(signature);
		}
		SignatureCheckSet::new(messages, pub_keys, signatures)
	}

	#[test]
	fn small_batch_verifies_on_caller() {
		let mut check = check_set_with_one_bad_entry(32, 7);
		SignatureChecker::new(1).verify(&mut check);
		for (i, verification) in check.verifications.iter().enumerate() {
			assert_eq!(*verification, (i != 7) as i32, "entry {i}");
		}
	}

	#[test]
	fn large_batch_partitions_across_workers() {
		// Above BATCH_SIZE so the rayon path runs; every partition must be
		// verified, none skipped
		let size = BATCH_SIZE * 3 + 17;
		let mut check = check_set_with_one_bad_entry(size, BATCH_SIZE + 3);
		SignatureChecker::new(2).verify(&mut check);
		assert_eq!(check.verifications.iter().filter(|&&v| v == 0).count(), 1);
		assert_eq!(check.verifications[BATCH_SIZE + 3], 0);
	}
}
