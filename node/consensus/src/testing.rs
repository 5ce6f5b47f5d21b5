//! Fixtures shared by the crate's tests and by dependent crates' test suites
//! (feature `test`): an in-memory store, a recording mock network, stub work
//! and bootstrap providers, and a dev genesis.

use std::{
	collections::{BTreeMap, HashMap},
	sync::{atomic::AtomicBool, Arc, Mutex},
};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::{
	block::{Block, BlockSideband, ChangeBlock, OpenBlock, ReceiveBlock, SendBlock, StateBlock, StoredBlock},
	config::NetworkConstants,
	elections::ActiveElections,
	epochs::{Epoch, Epochs},
	ledger::{seconds_since_epoch, Ledger, ProcessResult},
	network::{
		BootstrapInitiator, ChannelId, Message, Network, NetworkFilter, Representative,
		RepresentativeRegistry,
	},
	observers::Observers,
	online_reps::OnlineReps,
	primitives::{Account, Amount, BlockHash, KeyPair, Link, Root, Signature},
	stats::{Direction, StatDetail, StatType, Stats},
	store::{
		AccountInfo, ConfirmationHeightInfo, PendingInfo, PendingKey, ReadOps, ReadTransaction,
		Store, StoreError, UncheckedInfo, UncheckedKey, WriteTransaction,
	},
	work::{WorkPool, WorkVersion},
};

// ==== Genesis ====

pub const GENESIS_AMOUNT: Amount = Amount::MAX;

const DEV_GENESIS_SEED: [u8; 32] = [0x37; 32];
const DEV_EPOCH_1_LINK: Link = Link([0xe1; 32]);

pub fn dev_genesis_key() -> KeyPair {
	KeyPair::from_seed(DEV_GENESIS_SEED)
}

/// The genesis open block: the entire supply, self-represented
pub fn dev_genesis_block() -> Block {
	let key = dev_genesis_key();
	let mut block = Block::Open(OpenBlock {
		source: BlockHash(key.account().0),
		representative: key.account(),
		account: key.account(),
		signature: Signature::default(),
		work: 0,
	});
	sign(&mut block, &key);
	block
}

pub fn dev_epochs() -> Epochs {
	let mut epochs = Epochs::default();
	epochs.add(Epoch::Epoch1, dev_genesis_key().account(), DEV_EPOCH_1_LINK);
	epochs
}

pub fn dev_epoch_1_link() -> Link {
	DEV_EPOCH_1_LINK
}

fn sign(block: &mut Block, key: &KeyPair) {
	let hash = block.hash();
	block.set_signature(key.sign(hash.as_bytes()));
}

// ==== Block constructors ====

pub fn state_block(
	key: &KeyPair,
	previous: BlockHash,
	representative: Account,
	balance: Amount,
	link: Link,
) -> Block {
	let mut block = Block::State(StateBlock {
		account: key.account(),
		previous,
		representative,
		balance,
		link,
		signature: Signature::default(),
		work: 0,
	});
	sign(&mut block, key);
	block
}

/// An epoch upgrade block, signed by the epoch signer
pub fn epoch_block(
	signer: &KeyPair,
	account: Account,
	previous: BlockHash,
	representative: Account,
	balance: Amount,
	link: Link,
) -> Block {
	let mut block = Block::State(StateBlock {
		account,
		previous,
		representative,
		balance,
		link,
		signature: Signature::default(),
		work: 0,
	});
	sign(&mut block, signer);
	block
}

pub fn send_block(key: &KeyPair, previous: BlockHash, destination: Account, balance: Amount) -> Block {
	let mut block = Block::Send(SendBlock {
		previous,
		destination,
		balance,
		signature: Signature::default(),
		work: 0,
	});
	sign(&mut block, key);
	block
}

pub fn receive_block(key: &KeyPair, previous: BlockHash, source: BlockHash) -> Block {
	let mut block =
		Block::Receive(ReceiveBlock { previous, source, signature: Signature::default(), work: 0 });
	sign(&mut block, key);
	block
}

pub fn open_block(key: &KeyPair, source: BlockHash, representative: Account) -> Block {
	let mut block = Block::Open(OpenBlock {
		source,
		representative,
		account: key.account(),
		signature: Signature::default(),
		work: 0,
	});
	sign(&mut block, key);
	block
}

pub fn change_block(key: &KeyPair, previous: BlockHash, representative: Account) -> Block {
	let mut block =
		Block::Change(ChangeBlock { previous, representative, signature: Signature::default(), work: 0 });
	sign(&mut block, key);
	block
}

// ==== In-memory store ====

#[derive(Default)]
struct Tables {
	blocks: HashMap<BlockHash, StoredBlock>,
	accounts: HashMap<Account, AccountInfo>,
	pending: BTreeMap<PendingKey, PendingInfo>,
	confirmation_height: HashMap<Account, ConfirmationHeightInfo>,
	frontiers: HashMap<BlockHash, Account>,
	unchecked: BTreeMap<UncheckedKey, UncheckedInfo>,
	online_weight: BTreeMap<u64, Amount>,
	rep_weights: HashMap<Account, Amount>,
}

/// Hash-table-backed [Store] with the same transactional surface as the
/// rocksdb store
#[derive(Default)]
pub struct MemoryStore {
	tables: Mutex<Tables>,
}

struct MemoryTransaction<'a> {
	store: &'a MemoryStore,
}

impl MemoryStore {
	fn with_tables<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
		f(&self.tables.lock().unwrap())
	}
}

impl ReadOps for MemoryTransaction<'_> {
	fn block_get(&self, hash: &BlockHash) -> Option<StoredBlock> {
		self.store.with_tables(|tables| tables.blocks.get(hash).cloned())
	}

	fn block_count(&self) -> u64 {
		self.store.with_tables(|tables| tables.blocks.len() as u64)
	}

	fn account_get(&self, account: &Account) -> Option<AccountInfo> {
		self.store.with_tables(|tables| tables.accounts.get(account).cloned())
	}

	fn pending_get(&self, key: &PendingKey) -> Option<PendingInfo> {
		self.store.with_tables(|tables| tables.pending.get(key).cloned())
	}

	fn pending_any(&self, account: &Account) -> bool {
		let range_start = PendingKey { account: *account, hash: BlockHash::ZERO };
		self.store.with_tables(|tables| {
			tables
				.pending
				.range(range_start..)
				.next()
				.is_some_and(|(key, _)| key.account == *account)
		})
	}

	fn confirmation_height_get(&self, account: &Account) -> Option<ConfirmationHeightInfo> {
		self.store.with_tables(|tables| tables.confirmation_height.get(account).cloned())
	}

	fn confirmation_heights(&self) -> Vec<(Account, ConfirmationHeightInfo)> {
		self.store.with_tables(|tables| {
			tables
				.confirmation_height
				.iter()
				.map(|(account, info)| (*account, info.clone()))
				.collect()
		})
	}

	fn frontier_get(&self, hash: &BlockHash) -> Option<Account> {
		self.store.with_tables(|tables| tables.frontiers.get(hash).copied())
	}

	fn unchecked_get(&self, dependency: &BlockHash) -> Vec<(UncheckedKey, UncheckedInfo)> {
		let range_start = UncheckedKey { dependency: *dependency, hash: BlockHash::ZERO };
		self.store.with_tables(|tables| {
			tables
				.unchecked
				.range(range_start..)
				.take_while(|(key, _)| key.dependency == *dependency)
				.map(|(key, info)| (*key, info.clone()))
				.collect()
		})
	}

	fn unchecked_count(&self) -> u64 {
		self.store.with_tables(|tables| tables.unchecked.len() as u64)
	}

	fn online_weight(&self) -> Vec<(u64, Amount)> {
		self.store
			.with_tables(|tables| tables.online_weight.iter().map(|(k, v)| (*k, *v)).collect())
	}

	fn rep_weights(&self) -> Vec<(Account, Amount)> {
		self.store
			.with_tables(|tables| tables.rep_weights.iter().map(|(k, v)| (*k, *v)).collect())
	}
}

impl ReadTransaction for MemoryTransaction<'_> {
	fn refresh(&mut self) {}
}

impl WriteTransaction for MemoryTransaction<'_> {
	fn block_put(&mut self, hash: BlockHash, block: StoredBlock) {
		self.store.tables.lock().unwrap().blocks.insert(hash, block);
	}

	fn block_del(&mut self, hash: &BlockHash) {
		self.store.tables.lock().unwrap().blocks.remove(hash);
	}

	fn block_successor_set(&mut self, hash: &BlockHash, successor: BlockHash) {
		if let Some(block) = self.store.tables.lock().unwrap().blocks.get_mut(hash) {
			block.sideband.successor = successor;
		}
	}

	fn account_put(&mut self, account: Account, info: AccountInfo) {
		self.store.tables.lock().unwrap().accounts.insert(account, info);
	}

	fn account_del(&mut self, account: &Account) {
		self.store.tables.lock().unwrap().accounts.remove(account);
	}

	fn pending_put(&mut self, key: PendingKey, info: PendingInfo) {
		self.store.tables.lock().unwrap().pending.insert(key, info);
	}

	fn pending_del(&mut self, key: &PendingKey) {
		self.store.tables.lock().unwrap().pending.remove(key);
	}

	fn confirmation_height_put(&mut self, account: Account, info: ConfirmationHeightInfo) {
		self.store.tables.lock().unwrap().confirmation_height.insert(account, info);
	}

	fn frontier_put(&mut self, hash: BlockHash, account: Account) {
		self.store.tables.lock().unwrap().frontiers.insert(hash, account);
	}

	fn frontier_del(&mut self, hash: &BlockHash) {
		self.store.tables.lock().unwrap().frontiers.remove(hash);
	}

	fn unchecked_put(&mut self, key: UncheckedKey, info: UncheckedInfo) {
		self.store.tables.lock().unwrap().unchecked.insert(key, info);
	}

	fn unchecked_del(&mut self, key: &UncheckedKey) {
		self.store.tables.lock().unwrap().unchecked.remove(key);
	}

	fn online_weight_put(&mut self, timestamp: u64, amount: Amount) {
		self.store.tables.lock().unwrap().online_weight.insert(timestamp, amount);
	}

	fn online_weight_del(&mut self, timestamp: u64) {
		self.store.tables.lock().unwrap().online_weight.remove(&timestamp);
	}

	fn rep_weight_put(&mut self, account: Account, amount: Amount) {
		self.store.tables.lock().unwrap().rep_weights.insert(account, amount);
	}

	fn commit(self: Box<Self>) -> Result<(), StoreError> {
		Ok(())
	}
}

impl Store for MemoryStore {
	fn tx_begin_read(&self) -> Box<dyn ReadTransaction + '_> {
		Box::new(MemoryTransaction { store: self })
	}

	fn tx_begin_write(&self) -> Box<dyn WriteTransaction + '_> {
		Box::new(MemoryTransaction { store: self })
	}
}

// ==== Stubs ====

/// Difficulty equals the work value itself; generation always succeeds
pub struct StubWorkPool;

impl WorkPool for StubWorkPool {
	fn difficulty(&self, _version: WorkVersion, _root: &Root, work: u64) -> u64 {
		work
	}

	fn generate(
		&self,
		_version: WorkVersion,
		_root: &Root,
		target_difficulty: u64,
		_cancel: Arc<AtomicBool>,
	) -> Option<u64> {
		Some(target_difficulty)
	}

	fn higher_difficulty(&self, base_difficulty: u64, dependents: usize) -> u64 {
		base_difficulty.saturating_add(dependents as u64 + 1)
	}
}

#[derive(Default)]
pub struct RecordingBootstrap {
	pub lazy_starts: Mutex<Vec<BlockHash>>,
}

impl BootstrapInitiator for RecordingBootstrap {
	fn bootstrap_lazy(&self, hash: BlockHash) {
		self.lazy_starts.lock().unwrap().push(hash);
	}

	fn in_progress(&self) -> bool {
		false
	}
}

#[derive(Default)]
pub struct FixedReps {
	representatives: Mutex<Vec<Representative>>,
}

impl FixedReps {
	pub fn set(&self, representatives: Vec<Representative>) {
		*self.representatives.lock().unwrap() = representatives;
	}
}

impl RepresentativeRegistry for FixedReps {
	fn representatives(&self) -> Vec<Representative> {
		self.representatives.lock().unwrap().clone()
	}
}

/// Records every outgoing message and mirrors the stats a real transport
/// would emit. Floods reach every registered peer scaled by the fraction,
/// rounded up.
pub struct MockNetwork {
	stats: Arc<Stats>,
	peers: Mutex<Vec<ChannelId>>,
	pub sent: Mutex<Vec<(ChannelId, Message)>>,
}

impl MockNetwork {
	pub fn new(stats: Arc<Stats>) -> Self {
		MockNetwork { stats, peers: Mutex::new(Vec::new()), sent: Mutex::new(Vec::new()) }
	}

	pub fn register_peer(&self, channel: ChannelId) {
		self.peers.lock().unwrap().push(channel);
	}

	pub fn sent_to(&self, channel: ChannelId) -> Vec<Message> {
		self.sent
			.lock()
			.unwrap()
			.iter()
			.filter(|(to, _)| *to == channel)
			.map(|(_, message)| message.clone())
			.collect()
	}

	fn record(&self, channel: ChannelId, message: Message) {
		let detail = match &message {
			Message::Publish(_) => StatDetail::Publish,
			Message::ConfirmReq { .. } | Message::ConfirmReqBlock(_) => StatDetail::ConfirmReq,
			Message::ConfirmAck(_) => StatDetail::ConfirmAck,
		};
		self.stats.inc(StatType::Message, detail, Direction::Out);
		self.sent.lock().unwrap().push((channel, message));
	}
}

impl Network for MockNetwork {
	fn send(&self, channel: ChannelId, message: Message) {
		self.record(channel, message);
	}

	fn flood(&self, message: Message, scale: f32) {
		let peers = self.peers.lock().unwrap().clone();
		for channel in peers.iter().take(self.fanout(scale)) {
			self.record(*channel, message.clone());
		}
	}

	fn fanout(&self, scale: f32) -> usize {
		let peers = self.peers.lock().unwrap().len();
		((peers as f32 * scale).ceil() as usize).min(peers)
	}
}

// ==== Assembled fixture ====

/// A wired consensus core over the in-memory store with a dev genesis,
/// mirroring what the node crate assembles in production.
pub struct TestNode {
	pub constants: NetworkConstants,
	pub stats: Arc<Stats>,
	pub store: Arc<MemoryStore>,
	pub ledger: Arc<Ledger>,
	pub online_reps: Arc<OnlineReps>,
	pub votes_cache: Arc<crate::votes_cache::VotesCache>,
	pub filter: Arc<NetworkFilter>,
	pub network: Arc<MockNetwork>,
	pub reps: Arc<FixedReps>,
	pub work: Arc<StubWorkPool>,
	pub observers: Arc<Observers>,
	pub active: Arc<ActiveElections>,
	pub cementing_receiver: Mutex<Option<UnboundedReceiver<BlockHash>>>,
}

impl TestNode {
	/// Apply a block straight to the ledger, panicking unless it progresses
	pub fn process(&self, block: &Block) -> ProcessResult {
		let mut txn = self.ledger.store.tx_begin_write();
		let result = self.ledger.process(&mut *txn, block);
		txn.commit().expect("memory store commit");
		result
	}

	pub fn latest(&self, account: &Account) -> BlockHash {
		let txn = self.ledger.store.tx_begin_read();
		self.ledger.latest(&*txn, account).expect("account exists")
	}

	pub fn balance(&self, account: &Account) -> Amount {
		let txn = self.ledger.store.tx_begin_read();
		self.ledger.account_balance(&*txn, account)
	}

	pub fn block_confirmed(&self, hash: &BlockHash) -> bool {
		let txn = self.ledger.store.tx_begin_read();
		self.ledger.block_confirmed(&*txn, hash)
	}

	pub fn stored(&self, hash: &BlockHash) -> StoredBlock {
		let txn = self.ledger.store.tx_begin_read();
		self.ledger.block_get(&*txn, hash).expect("block exists")
	}
}

pub fn test_node() -> TestNode {
	let constants = NetworkConstants::test();
	let stats = Arc::new(Stats::default());
	let store = Arc::new(MemoryStore::default());
	seed_genesis(&*store);
	let work = Arc::new(StubWorkPool);
	let ledger = Arc::new(Ledger::new(
		store.clone(),
		constants.clone(),
		dev_epochs(),
		work.clone(),
	));
	let online_reps = Arc::new(OnlineReps::new(ledger.clone(), constants.clone()));
	let votes_cache = Arc::new(crate::votes_cache::VotesCache::new(constants.votes_cache_size));
	let filter = Arc::new(NetworkFilter::default());
	let network = Arc::new(MockNetwork::new(stats.clone()));
	let reps = Arc::new(FixedReps::default());
	let observers = Arc::new(Observers::default());
	let (cementing_sender, cementing_receiver) = unbounded_channel();
	let active = Arc::new(ActiveElections::new(
		ledger.clone(),
		constants.clone(),
		stats.clone(),
		network.clone(),
		filter.clone(),
		votes_cache.clone(),
		online_reps.clone(),
		reps.clone(),
		work.clone(),
		observers.clone(),
		cementing_sender,
	));
	TestNode {
		constants,
		stats,
		store,
		ledger,
		online_reps,
		votes_cache,
		filter,
		network,
		reps,
		work,
		observers,
		active,
		cementing_receiver: Mutex::new(Some(cementing_receiver)),
	}
}

impl TestNode {
	/// Winner hashes handed to the cementing pipeline so far
	pub fn take_cementing_request(&self) -> Option<BlockHash> {
		self.cementing_receiver
			.lock()
			.unwrap()
			.as_mut()
			.and_then(|receiver| receiver.try_recv().ok())
	}
}

// ==== Full pipeline fixture ====

/// The whole consensus pipeline wired over the in-memory store, with every
/// component task spawned, the way the node crate assembles it in production.
pub struct TestSystem {
	pub constants: NetworkConstants,
	pub stats: Arc<Stats>,
	pub store: Arc<MemoryStore>,
	pub ledger: Arc<Ledger>,
	pub online_reps: Arc<OnlineReps>,
	pub votes_cache: Arc<crate::votes_cache::VotesCache>,
	pub filter: Arc<NetworkFilter>,
	pub network: Arc<MockNetwork>,
	pub reps: Arc<FixedReps>,
	pub observers: Arc<Observers>,
	pub active: Arc<ActiveElections>,
	pub write_queue: Arc<crate::write_queue::WriteQueue>,
	pub checker: Arc<crate::signature_checker::SignatureChecker>,
	pub bootstrap: Arc<RecordingBootstrap>,
	pub gap_cache: Arc<crate::gap_cache::GapCache>,
	pub vote_processor: Arc<crate::vote_processor::VoteProcessor>,
	pub vote_generator: Arc<crate::vote_generator::VoteGenerator>,
	pub block_processor: Arc<crate::block_processor::BlockProcessor>,
	pub confirmation_height: Arc<crate::confirmation_height::ConfirmationHeightProcessor>,
	stop: tokio::sync::watch::Sender<bool>,
}

impl Drop for TestSystem {
	fn drop(&mut self) {
		let _ = self.stop.send(true);
	}
}

impl TestSystem {
	pub fn latest(&self, account: &Account) -> BlockHash {
		let txn = self.ledger.store.tx_begin_read();
		self.ledger.latest(&*txn, account).expect("account exists")
	}

	pub fn balance(&self, account: &Account) -> Amount {
		let txn = self.ledger.store.tx_begin_read();
		self.ledger.account_balance(&*txn, account)
	}

	pub fn block_exists(&self, hash: &BlockHash) -> bool {
		let txn = self.ledger.store.tx_begin_read();
		txn.block_exists(hash)
	}
}

pub fn test_system() -> TestSystem {
	test_system_with_reps(Vec::new())
}

/// As [test_system], with representative keys held locally for vote
/// generation
pub fn test_system_with_reps(local_reps: Vec<KeyPair>) -> TestSystem {
	let constants = NetworkConstants::test();
	let stats = Arc::new(Stats::default());
	let store = Arc::new(MemoryStore::default());
	seed_genesis(&*store);
	let work = Arc::new(StubWorkPool);
	let ledger = Arc::new(Ledger::new(
		store.clone(),
		constants.clone(),
		dev_epochs(),
		work.clone(),
	));
	let online_reps = Arc::new(OnlineReps::new(ledger.clone(), constants.clone()));
	let votes_cache = Arc::new(crate::votes_cache::VotesCache::new(constants.votes_cache_size));
	let filter = Arc::new(NetworkFilter::default());
	let network = Arc::new(MockNetwork::new(stats.clone()));
	let reps = Arc::new(FixedReps::default());
	let bootstrap = Arc::new(RecordingBootstrap::default());
	let gap_cache = Arc::new(crate::gap_cache::GapCache::new(
		ledger.clone(),
		online_reps.clone(),
		bootstrap.clone(),
		stats.clone(),
		constants.clone(),
	));
	let write_queue = Arc::new(crate::write_queue::WriteQueue::new());
	let checker = Arc::new(crate::signature_checker::SignatureChecker::new(1));

	let mut observers = Observers::default();
	{
		// Gap voters are tallied from every processed vote
		let gap_cache = gap_cache.clone();
		observers.add_vote(move |vote, _channel, _code| gap_cache.vote(vote));
	}
	let observers = Arc::new(observers);

	let (cementing_sender, mut cementing_receiver) = unbounded_channel();
	let active = Arc::new(ActiveElections::new(
		ledger.clone(),
		constants.clone(),
		stats.clone(),
		network.clone(),
		filter.clone(),
		votes_cache.clone(),
		online_reps.clone(),
		reps.clone(),
		work.clone(),
		observers.clone(),
		cementing_sender,
	));
	let vote_processor = Arc::new(crate::vote_processor::VoteProcessor::new(
		checker.clone(),
		active.clone(),
		observers.clone(),
		stats.clone(),
		online_reps.clone(),
		ledger.clone(),
		constants.vote_processor_capacity,
	));
	let vote_generator = Arc::new(crate::vote_generator::VoteGenerator::new(
		constants.clone(),
		network.clone(),
		votes_cache.clone(),
		vote_processor.clone(),
		stats.clone(),
		local_reps,
	));
	let block_processor = Arc::new(crate::block_processor::BlockProcessor::new(
		ledger.clone(),
		constants.clone(),
		write_queue.clone(),
		active.clone(),
		gap_cache.clone(),
		vote_generator.clone(),
		network.clone(),
		checker.clone(),
		observers.clone(),
		stats.clone(),
	));
	let confirmation_height = Arc::new(crate::confirmation_height::ConfirmationHeightProcessor::new(
		ledger.clone(),
		write_queue.clone(),
		constants.clone(),
		stats.clone(),
		crate::confirmation_height::ConfirmationHeightMode::Automatic,
	));

	let (stop, stop_receiver) = tokio::sync::watch::channel(false);
	tokio::spawn(block_processor.clone().run(stop_receiver.clone()));
	tokio::spawn(block_processor.clone().run_verification(stop_receiver.clone()));
	tokio::spawn(vote_processor.clone().run(stop_receiver.clone()));
	tokio::spawn(vote_generator.clone().run(stop_receiver.clone()));
	tokio::spawn(confirmation_height.clone().run(stop_receiver.clone()));
	{
		// Quorum winners flow from the elections into the cementing queue
		let confirmation_height = confirmation_height.clone();
		let mut stop_receiver = stop_receiver;
		tokio::spawn(async move {
			loop {
				tokio::select! {
					Some(hash) = cementing_receiver.recv() => confirmation_height.add(hash),
					_ = stop_receiver.changed() => break,
					else => break,
				}
			}
		});
	}

	TestSystem {
		constants,
		stats,
		store,
		ledger,
		online_reps,
		votes_cache,
		filter,
		network,
		reps,
		observers,
		active,
		write_queue,
		checker,
		bootstrap,
		gap_cache,
		vote_processor,
		vote_generator,
		block_processor,
		confirmation_height,
		stop,
	}
}

/// Write the genesis open block directly: full supply, confirmed at height 1
pub fn seed_genesis(store: &dyn Store) {
	let key = dev_genesis_key();
	let account = key.account();
	let genesis = dev_genesis_block();
	let hash = genesis.hash();
	let mut txn = store.tx_begin_write();
	if txn.account_get(&account).is_some() {
		return
	}
	txn.block_put(
		hash,
		StoredBlock {
			block: genesis,
			sideband: BlockSideband {
				successor: BlockHash::ZERO,
				account,
				balance: GENESIS_AMOUNT,
				height: 1,
				timestamp: seconds_since_epoch(),
				epoch: Epoch::Epoch0,
				is_send: false,
				is_receive: true,
				is_epoch: false,
			},
		},
	);
	txn.account_put(
		account,
		AccountInfo {
			head: hash,
			representative: account,
			open_block: hash,
			balance: GENESIS_AMOUNT,
			modified: seconds_since_epoch(),
			block_count: 1,
			epoch: Epoch::Epoch0,
		},
	);
	txn.confirmation_height_put(account, ConfirmationHeightInfo { height: 1, frontier: hash });
	txn.frontier_put(hash, account);
	txn.rep_weight_put(account, GENESIS_AMOUNT);
	txn.commit().expect("seed genesis");
}

pub fn genesis_hash() -> BlockHash {
	dev_genesis_block().hash()
}

/// Poll `condition` until it holds or `timeout` elapses; returns the final
/// evaluation
pub async fn poll_until(
	timeout: std::time::Duration,
	mut condition: impl FnMut() -> bool,
) -> bool {
	let deadline = std::time::Instant::now() + timeout;
	while std::time::Instant::now() < deadline {
		if condition() {
			return true
		}
		tokio::time::sleep(std::time::Duration::from_millis(2)).await;
	}
	condition()
}
