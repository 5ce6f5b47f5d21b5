use super::{ConfirmationHeightProcessor, WriteDetails};
use crate::{block::StoredBlock, store::StoreError, write_queue::Writer};

/// Cement the planned segments in a single write at the end. Used for deep
/// chains where the bounded strategy's per-batch bookkeeping dominates; the
/// whole plan is already in memory, so one write commits it atomically.
pub(super) async fn cement(
	processor: &ConfirmationHeightProcessor,
	plan: Vec<WriteDetails>,
) -> Result<Vec<StoredBlock>, StoreError> {
	// Let a burst of independent confirmations coalesce into the same write
	tokio::time::sleep(processor.constants.batch_separate_pending_min_time).await;

	let guard = processor.write_queue.wait(Writer::ConfirmationHeight).await;
	let mut txn = processor.ledger.store.tx_begin_write();
	let mut all_cemented = Vec::new();
	for details in &plan {
		let (cemented, remainder) = processor.cement_segment(&mut *txn, details, u64::MAX);
		debug_assert!(remainder.is_none());
		all_cemented.extend(cemented);
	}
	txn.commit()?;
	drop(guard);
	Ok(all_cemented)
}
