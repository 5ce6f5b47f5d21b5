//! Quill node: assembles the consensus core over the rocksdb store, wires the
//! component tasks together and adapts inbound network traffic onto them.
//!
//! The transports themselves, the representative crawler, proof of work and
//! the bootstrap protocol are supplied by the embedder through the interface
//! handles in [NodeDependencies].

pub mod db;
pub mod settings;

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use consensus::{
	block_processor::{BlockOrigin, BlockProcessor},
	confirmation_height::{ConfirmationHeightMode, ConfirmationHeightProcessor},
	elections::ActiveElections,
	gap_cache::GapCache,
	ledger::Ledger,
	network::{
		BootstrapInitiator, ChannelId, Message, Network, NetworkFilter, RepresentativeRegistry,
	},
	observers::Observers,
	online_reps::OnlineReps,
	signature_checker::SignatureChecker,
	stats::{Direction, StatDetail, StatType, Stats},
	store::Store,
	vote_generator::VoteGenerator,
	vote_processor::VoteProcessor,
	votes_cache::VotesCache,
	work::WorkPool,
	write_queue::{WriteQueue, Writer},
	KeyPair,
};

use db::RocksdbStore;
use settings::{ConfirmationHeightModeSetting, Settings};

/// External collaborators the embedder supplies: transports, rep crawler,
/// proof of work, bootstrap, and any locally held representative keys.
pub struct NodeDependencies {
	pub network: Arc<dyn Network>,
	pub representatives: Arc<dyn RepresentativeRegistry>,
	pub work: Arc<dyn WorkPool>,
	pub bootstrap: Arc<dyn BootstrapInitiator>,
	pub local_reps: Vec<KeyPair>,
	/// Epoch upgrade markers for this network
	pub epochs: consensus::epochs::Epochs,
}

/// A running node core. Dropping does not stop the tasks; call [Node::stop].
pub struct Node {
	pub stats: Arc<Stats>,
	pub ledger: Arc<Ledger>,
	pub filter: Arc<NetworkFilter>,
	pub online_reps: Arc<OnlineReps>,
	pub votes_cache: Arc<VotesCache>,
	pub gap_cache: Arc<GapCache>,
	pub active: Arc<ActiveElections>,
	pub vote_processor: Arc<VoteProcessor>,
	pub vote_generator: Arc<VoteGenerator>,
	pub block_processor: Arc<BlockProcessor>,
	pub confirmation_height: Arc<ConfirmationHeightProcessor>,
	pub write_queue: Arc<WriteQueue>,
	stop: watch::Sender<bool>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Install the process-wide tracing subscriber. The consensus crate only
/// emits; subscriber ownership lives here.
pub fn init_logging() {
	use tracing_subscriber::EnvFilter;
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();
}

impl Node {
	/// Open the store and wire every consensus component, spawning their
	/// tasks on the current runtime. Observer registration must be complete:
	/// `observers` is frozen here, before anything can emit.
	pub fn start(
		settings: &Settings,
		dependencies: NodeDependencies,
		mut observers: Observers,
	) -> Result<Arc<Node>> {
		let constants = settings.node.network.constants();
		let store: Arc<dyn Store> = Arc::new(
			RocksdbStore::open(&settings.node.data_dir.join("ledger"))
				.context("Failed to open ledger store")?,
		);
		let stats = Arc::new(Stats::default());
		let ledger = Arc::new(Ledger::new(
			store,
			constants.clone(),
			dependencies.epochs,
			dependencies.work.clone(),
		));
		info!(
			blocks = ledger.cache.block_count.load(std::sync::atomic::Ordering::Relaxed),
			cemented = ledger.cache.cemented_count.load(std::sync::atomic::Ordering::Relaxed),
			"ledger loaded"
		);

		let online_reps = Arc::new(OnlineReps::new(ledger.clone(), constants.clone()));
		let votes_cache = Arc::new(VotesCache::new(constants.votes_cache_size));
		let filter = Arc::new(NetworkFilter::default());
		let write_queue = Arc::new(WriteQueue::new());
		let checker = Arc::new(SignatureChecker::new(settings.node.signature_checker_threads));
		let bootstrap = dependencies.bootstrap.clone();
		let gap_cache = Arc::new(GapCache::new(
			ledger.clone(),
			online_reps.clone(),
			bootstrap,
			stats.clone(),
			constants.clone(),
		));

		{
			// Votes feed the gap cache's bootstrap tallies
			let gap_cache = gap_cache.clone();
			observers.add_vote(move |vote, _channel, _code| gap_cache.vote(vote));
		}
		let observers = Arc::new(observers);

		let (cementing_sender, mut cementing_receiver) = tokio::sync::mpsc::unbounded_channel();
		let active = Arc::new(ActiveElections::new(
			ledger.clone(),
			constants.clone(),
			stats.clone(),
			dependencies.network.clone(),
			filter.clone(),
			votes_cache.clone(),
			online_reps.clone(),
			dependencies.representatives.clone(),
			dependencies.work.clone(),
			observers.clone(),
			cementing_sender,
		));
		let vote_processor = Arc::new(VoteProcessor::new(
			checker.clone(),
			active.clone(),
			observers.clone(),
			stats.clone(),
			online_reps.clone(),
			ledger.clone(),
			constants.vote_processor_capacity,
		));
		let vote_generator = Arc::new(VoteGenerator::new(
			constants.clone(),
			dependencies.network.clone(),
			votes_cache.clone(),
			vote_processor.clone(),
			stats.clone(),
			dependencies.local_reps,
		));
		let block_processor = Arc::new(BlockProcessor::new(
			ledger.clone(),
			constants.clone(),
			write_queue.clone(),
			active.clone(),
			gap_cache.clone(),
			vote_generator.clone(),
			dependencies.network.clone(),
			checker.clone(),
			observers.clone(),
			stats.clone(),
		));

		let mode = match settings.node.confirmation_height_mode {
			ConfirmationHeightModeSetting::Automatic => ConfirmationHeightMode::Automatic,
			ConfirmationHeightModeSetting::Bounded => ConfirmationHeightMode::Bounded,
			ConfirmationHeightModeSetting::Unbounded => ConfirmationHeightMode::Unbounded,
		};
		let mut confirmation_height = ConfirmationHeightProcessor::new(
			ledger.clone(),
			write_queue.clone(),
			constants.clone(),
			stats.clone(),
			mode,
		);
		{
			// Cemented blocks surface to the embedder's block observers
			let ledger = ledger.clone();
			let observers = observers.clone();
			confirmation_height.add_cemented_observer(move |block| {
				let amount = {
					let txn = ledger.store.tx_begin_read();
					ledger.amount(&*txn, &block.hash()).unwrap_or_default()
				};
				let is_state_send =
					matches!(block.block, consensus::Block::State(_)) && block.sideband.is_send;
				observers.notify_block_confirmed(
					&block.block,
					&block.sideband.account,
					amount,
					is_state_send,
				);
			});
		}
		let confirmation_height = Arc::new(confirmation_height);

		let (stop, stop_receiver) = watch::channel(false);
		let mut handles = Vec::new();
		handles.push(tokio::spawn(block_processor.clone().run(stop_receiver.clone())));
		handles.push(tokio::spawn(block_processor.clone().run_verification(stop_receiver.clone())));
		handles.push(tokio::spawn(vote_processor.clone().run(stop_receiver.clone())));
		handles.push(tokio::spawn(vote_generator.clone().run(stop_receiver.clone())));
		handles.push(tokio::spawn(active.clone().run(stop_receiver.clone())));
		handles.push(tokio::spawn(confirmation_height.clone().run(stop_receiver.clone())));
		{
			// Quorum winners flow into the cementing queue
			let confirmation_height = confirmation_height.clone();
			let mut stop_receiver = stop_receiver.clone();
			handles.push(tokio::spawn(async move {
				loop {
					tokio::select! {
						Some(hash) = cementing_receiver.recv() => confirmation_height.add(hash),
						_ = stop_receiver.changed() => break,
						else => break,
					}
				}
			}));
		}
		{
			// Housekeeping: refresh vote admission tiers and sample the
			// online weight
			let vote_processor = vote_processor.clone();
			let online_reps = online_reps.clone();
			let ledger = ledger.clone();
			let write_queue = write_queue.clone();
			let interval = constants.weight_sample_interval;
			let mut stop_receiver = stop_receiver.clone();
			handles.push(tokio::spawn(async move {
				loop {
					tokio::select! {
						_ = tokio::time::sleep(interval) => {},
						_ = stop_receiver.changed() => break,
					}
					vote_processor.calculate_weights();
					let guard = write_queue.wait(Writer::OnlineWeight).await;
					let mut txn = ledger.store.tx_begin_write();
					online_reps.sample(&mut *txn);
					if let Err(err) = txn.commit() {
						warn!("online weight sample failed to commit: {err}");
					}
					drop(guard);
				}
			}));
		}

		Ok(Arc::new(Node {
			stats,
			ledger,
			filter,
			online_reps,
			votes_cache,
			gap_cache,
			active,
			vote_processor,
			vote_generator,
			block_processor,
			confirmation_height,
			write_queue,
			stop,
			handles: Mutex::new(handles),
		}))
	}

	/// Route one inbound message from the transport layer
	pub async fn handle_message(&self, from: ChannelId, message: Message) {
		match message {
			Message::Publish(block) => {
				self.stats.inc(StatType::Message, StatDetail::Publish, Direction::In);
				// Drop duplicates and apply backpressure before queueing
				if self.filter.apply(NetworkFilter::digest(&block.hash())) {
					return
				}
				if self.block_processor.full() {
					self.stats.inc(StatType::Drop, StatDetail::Publish, Direction::In);
					debug!("block processor full, dropping publish");
					return
				}
				self.block_processor.add(block, BlockOrigin::Remote).await;
			},
			Message::ConfirmReq { roots_hashes } => {
				self.stats.inc(StatType::Message, StatDetail::ConfirmReq, Direction::In);
				for (hash, _root) in roots_hashes {
					// Answer with a vote for the current winner of the root
					// if an election is running, otherwise for the ledger
					// block itself
					let root = {
						let txn = self.ledger.store.tx_begin_read();
						match self.ledger.block_get(&*txn, &hash) {
							Some(block) => block.block.qualified_root(),
							None => continue,
						}
					};
					let target = self.active.election_winner(&root).unwrap_or(hash);
					self.vote_generator.add(target);
				}
			},
			Message::ConfirmReqBlock(block) => {
				self.stats.inc(StatType::Message, StatDetail::ConfirmReq, Direction::In);
				// The legacy form doubles as a publish: ingest the block and
				// vote on whatever occupies its root
				let hash = block.hash();
				if !self.block_processor.full() {
					self.block_processor.add(block, BlockOrigin::Remote).await;
				}
				self.vote_generator.add(hash);
			},
			Message::ConfirmAck(vote) => {
				self.stats.inc(StatType::Message, StatDetail::ConfirmAck, Direction::In);
				self.vote_processor.vote(vote, from);
			},
		}
	}

	/// Signal every component task to stop and wait for them to finish.
	/// In-flight batches complete first.
	pub async fn stop(&self) {
		let _ = self.stop.send(true);
		let handles = std::mem::take(&mut *self.handles.lock().unwrap());
		for handle in handles {
			let _ = handle.await;
		}
	}
}
