use std::{collections::VecDeque, time::Instant};

use super::{ConfirmationHeightProcessor, WriteDetails};
use crate::{block::StoredBlock, store::StoreError, write_queue::Writer};

/// Cement the planned segments in write batches of at most the adaptive
/// batch size, committing and releasing the write slot between batches so
/// other writers are not starved by a deep chain.
pub(super) async fn cement(
	processor: &ConfirmationHeightProcessor,
	plan: Vec<WriteDetails>,
) -> Result<Vec<StoredBlock>, StoreError> {
	let mut remaining: VecDeque<WriteDetails> = plan.into();
	let mut all_cemented = Vec::new();

	while !remaining.is_empty() {
		let guard = processor.write_queue.wait(Writer::ConfirmationHeight).await;
		let mut txn = processor.ledger.store.tx_begin_write();
		let mut budget = processor.batch_write_size();
		let mut batch = Vec::new();
		let started = Instant::now();

		while budget > 0 {
			let Some(details) = remaining.pop_front() else { break };
			let (cemented, remainder) = processor.cement_segment(&mut *txn, &details, budget);
			budget = budget.saturating_sub(cemented.len() as u64);
			batch.extend(cemented);
			if let Some(remainder) = remainder {
				remaining.push_front(remainder);
				break
			}
		}

		txn.commit()?;
		drop(guard);
		processor.adapt_batch_size(started.elapsed());
		all_cemented.extend(batch);
	}
	Ok(all_cemented)
}
