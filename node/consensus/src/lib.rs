//! Consensus core of the Quill node.
//!
//! Each account maintains its own chain of blocks; global agreement is
//! reached by weighted voting among representative accounts. Blocks enter
//! through the [block_processor], create per-root elections in [elections],
//! elections solicit votes through the [confirmation_solicitor], the
//! [vote_processor] feeds verified votes back into the tallies, and winners
//! that reach quorum are cemented by the [confirmation_height] processor.
//!
//! The persistent store, wire transports, proof of work and bootstrap
//! protocols are external collaborators consumed through the interfaces in
//! [store], [network] and [work].

pub mod block;
pub mod block_processor;
pub mod config;
pub mod confirmation_height;
pub mod confirmation_solicitor;
pub mod elections;
pub mod epochs;
pub mod gap_cache;
pub mod ledger;
pub mod network;
pub mod observers;
pub mod online_reps;
pub mod primitives;
pub mod rep_weights;
pub mod signature_checker;
pub mod stats;
pub mod store;
pub mod vote;
pub mod vote_generator;
pub mod vote_processor;
pub mod votes_cache;
pub mod work;
pub mod write_queue;

#[cfg(any(test, feature = "test"))]
pub mod testing;

pub use block::{Block, BlockSideband, StoredBlock};
pub use ledger::{Ledger, ProcessResult};
pub use primitives::{Account, Amount, BlockHash, KeyPair, QualifiedRoot, Root, Signature};
pub use vote::{Vote, VoteCode};
