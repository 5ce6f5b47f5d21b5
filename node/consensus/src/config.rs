use std::time::Duration;

use crate::primitives::Amount;

/// Largest number of root/hash pairs carried by a single confirm_req
pub const CONFIRM_REQ_HASHES_MAX: usize = 7;

/// Gap cache entry bound
pub const GAP_CACHE_MAX: usize = 256;

/// Tuning constants that differ between the live and test networks. All
/// consensus components read these from one shared value; nothing here is
/// process-global.
#[derive(Clone, Debug)]
pub struct NetworkConstants {
	is_test: bool,

	/// Half of the average network round trip; the unit for election dwell
	/// times
	pub base_latency: Duration,
	/// Share of online stake an election winner needs for confirmation
	pub quorum_percent: u8,
	/// Floor for the online stake estimate
	pub online_weight_minimum: Amount,
	/// Online weight samples retained in the store
	pub max_weight_samples: u64,
	/// Cadence of online weight sampling and admission tier refresh
	pub weight_sample_interval: Duration,

	/// Upper bound on concurrently active elections considered per tick
	pub max_active_elections: usize,
	pub request_loop_interval: Duration,
	pub vote_generator_delay: Duration,
	pub votes_cache_size: usize,

	/// Confirmation request batches allowed per channel per tick
	pub max_confirm_req_batches: usize,
	/// Winner broadcasts allowed per tick
	pub max_block_broadcasts: usize,
	/// Confirmation requests allowed per election per tick
	pub max_election_requests: usize,

	pub bootstrap_fraction_numerator: u32,
	/// Grace period for a gapped block to arrive naturally before a lazy
	/// bootstrap is started
	pub gap_cache_bootstrap_start_interval: Duration,

	pub block_processor_batch_size: usize,
	pub block_processor_batch_max_time: Duration,
	pub block_processor_full_size: usize,
	/// Bound on state blocks queued for signature verification; zero derives
	/// the bound from the checker batch size
	pub block_processor_verification_size: usize,

	pub vote_processor_capacity: usize,

	/// Chain depth beyond which cementing switches to the unbounded strategy
	pub unbounded_cutoff: u64,
	pub batch_separate_pending_min_time: Duration,

	/// Minimum work difficulty for any block
	pub work_threshold: u64,
}

impl NetworkConstants {
	pub fn live() -> Self {
		Self {
			is_test: false,
			base_latency: Duration::from_millis(500),
			quorum_percent: 50,
			online_weight_minimum: 60_000_000_000_000_000_000_000_000_000_000_000,
			max_weight_samples: 4032,
			weight_sample_interval: Duration::from_secs(5 * 60),
			max_active_elections: 50_000,
			request_loop_interval: Duration::from_millis(500),
			vote_generator_delay: Duration::from_millis(100),
			votes_cache_size: 64 * 1024,
			max_confirm_req_batches: 20,
			max_block_broadcasts: 30,
			max_election_requests: 30,
			bootstrap_fraction_numerator: 4,
			gap_cache_bootstrap_start_interval: Duration::from_secs(30),
			block_processor_batch_size: 2048,
			block_processor_batch_max_time: Duration::from_millis(500),
			block_processor_full_size: 65536,
			block_processor_verification_size: 0,
			vote_processor_capacity: 144 * 1024,
			unbounded_cutoff: 524_288,
			batch_separate_pending_min_time: Duration::from_millis(50),
			work_threshold: 0xffffffc000000000,
		}
	}

	pub fn test() -> Self {
		Self {
			is_test: true,
			base_latency: Duration::from_millis(50),
			// The test genesis holds the entire supply, so a single
			// representative can reach quorum
			online_weight_minimum: Amount::MAX,
			max_weight_samples: 288,
			weight_sample_interval: Duration::from_secs(1),
			max_active_elections: 5000,
			request_loop_interval: Duration::from_millis(20),
			vote_generator_delay: Duration::from_millis(10),
			votes_cache_size: 256,
			max_confirm_req_batches: 1,
			max_block_broadcasts: 4,
			gap_cache_bootstrap_start_interval: Duration::from_millis(5),
			block_processor_batch_size: 256,
			block_processor_batch_max_time: Duration::from_millis(50),
			work_threshold: 0,
			..Self::live()
		}
	}

	pub fn is_test_network(&self) -> bool {
		self.is_test
	}
}
