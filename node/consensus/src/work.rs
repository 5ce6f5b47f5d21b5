use std::sync::{atomic::AtomicBool, Arc};

use crate::primitives::Root;

/// Proof-of-work algorithm revision carried by blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkVersion {
	Work1,
}

/// Proof-of-work validation and generation, provided by the integrator. The
/// core never schedules work; it only validates difficulty on ingest and
/// requests regeneration when an election is prioritized.
pub trait WorkPool: Send + Sync {
	/// Difficulty achieved by `work` over `root`
	fn difficulty(&self, version: WorkVersion, root: &Root, work: u64) -> u64;

	/// Generate work over `root` meeting `target_difficulty`. Returns `None`
	/// when cancelled.
	fn generate(
		&self,
		version: WorkVersion,
		root: &Root,
		target_difficulty: u64,
		cancel: Arc<AtomicBool>,
	) -> Option<u64>;

	/// Escalated difficulty target for a block whose election has
	/// `dependents` unconfirmed dependents. The escalation formula is owned
	/// by the work pool.
	fn higher_difficulty(&self, base_difficulty: u64, dependents: usize) -> u64;
}
