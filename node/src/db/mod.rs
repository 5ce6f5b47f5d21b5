
use std::{cmp::Ordering, collections::HashMap, path::Path};

use anyhow::{bail, Context, Result};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use tracing::info;

use consensus::{
	primitives::{Account, Amount, BlockHash},
	store::{
		AccountInfo, ConfirmationHeightInfo, PendingInfo, PendingKey, ReadOps, ReadTransaction,
		Store, StoreError, UncheckedInfo, UncheckedKey, WriteTransaction,
	},
	StoredBlock,
};

/// This is the version of the data on this current branch. It must be bumped,
/// and a migration written, on any change to the persisted format.
const LATEST_SCHEMA_VERSION: u32 = 1;

const DB_SCHEMA_VERSION_KEY: &[u8] = b"db_schema_version";

const BLOCKS_COLUMN: &str = "blocks";
const ACCOUNTS_COLUMN: &str = "accounts";
const PENDING_COLUMN: &str = "pending";
const CONFIRMATION_HEIGHT_COLUMN: &str = "confirmation_height";
const FRONTIERS_COLUMN: &str = "frontiers";
const UNCHECKED_COLUMN: &str = "unchecked";
const ONLINE_WEIGHT_COLUMN: &str = "online_weight";
const REP_WEIGHTS_COLUMN: &str = "rep_weights";
const META_COLUMN: &str = "meta";

const ALL_COLUMNS: [&str; 9] = [
	BLOCKS_COLUMN,
	ACCOUNTS_COLUMN,
	PENDING_COLUMN,
	CONFIRMATION_HEIGHT_COLUMN,
	FRONTIERS_COLUMN,
	UNCHECKED_COLUMN,
	ONLINE_WEIGHT_COLUMN,
	REP_WEIGHTS_COLUMN,
	META_COLUMN,
];

/// Rocksdb-backed implementation of the consensus store interface: one column
/// family per table, bincode values, schema version in the meta column.
pub struct RocksdbStore {
	db: DB,
}

impl RocksdbStore {
	pub fn open(db_path: &Path) -> Result<Self> {
		let descriptors: Vec<ColumnFamilyDescriptor> = ALL_COLUMNS
			.iter()
			.map(|&name| {
				let mut cf_options = Options::default();
				// Composite-keyed tables are scanned by their leading
				// 32-byte component
				if name == PENDING_COLUMN || name == UNCHECKED_COLUMN {
					cf_options.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(32));
				}
				ColumnFamilyDescriptor::new(name, cf_options)
			})
			.collect();

		let mut db_options = Options::default();
		db_options.create_missing_column_families(true);
		db_options.create_if_missing(true);

		let db = DB::open_cf_descriptors(&db_options, db_path, descriptors)
			.map_err(anyhow::Error::msg)
			.with_context(|| format!("Failed to open database at: {}", db_path.display()))?;

		let store = RocksdbStore { db };
		store.check_or_set_schema_version()?;
		Ok(store)
	}

	fn check_or_set_schema_version(&self) -> Result<()> {
		match self.read_schema_version()? {
			None => {
				self.db
					.put_cf(
						self.cf(META_COLUMN),
						DB_SCHEMA_VERSION_KEY,
						LATEST_SCHEMA_VERSION.to_be_bytes(),
					)
					.context("Failed to write schema version to new db")?;
				Ok(())
			},
			Some(version) => match version.cmp(&LATEST_SCHEMA_VERSION) {
				Ordering::Equal => Ok(()),
				Ordering::Greater => {
					// We do not support backwards migrations
					bail!(
						"Database schema version {version} is ahead of the current schema version {LATEST_SCHEMA_VERSION}. Is your node up to date?"
					)
				},
				Ordering::Less => {
					info!("Database is migrating from version {version} to {LATEST_SCHEMA_VERSION}");
					bail!("No migration path from schema version {version}")
				},
			},
		}
	}

	fn read_schema_version(&self) -> Result<Option<u32>> {
		Ok(self
			.db
			.get_cf(self.cf(META_COLUMN), DB_SCHEMA_VERSION_KEY)
			.context("Failed to read meta column")?
			.map(|bytes| {
				let bytes: [u8; 4] = bytes.as_slice().try_into().expect("version is a u32");
				u32::from_be_bytes(bytes)
			}))
	}

	fn cf(&self, name: &str) -> &ColumnFamily {
		self.db.cf_handle(name).unwrap_or_else(|| panic!("missing column family {name}"))
	}
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> T {
	bincode::deserialize(bytes).expect("failed to deserialize stored value")
}

fn encode<T: serde::Serialize>(value: &T) -> Vec<u8> {
	bincode::serialize(value).expect("serialization is not expected to fail")
}

fn pending_key_bytes(key: &PendingKey) -> [u8; 64] {
	let mut bytes = [0u8; 64];
	bytes[..32].copy_from_slice(key.account.as_bytes());
	bytes[32..].copy_from_slice(key.hash.as_bytes());
	bytes
}

fn unchecked_key_bytes(key: &UncheckedKey) -> [u8; 64] {
	let mut bytes = [0u8; 64];
	bytes[..32].copy_from_slice(key.dependency.as_bytes());
	bytes[32..].copy_from_slice(key.hash.as_bytes());
	bytes
}

/// Uncommitted writes of an open write transaction, keyed per column, so the
/// transaction reads its own writes. `None` marks a pending delete.
type Overlay = HashMap<&'static str, HashMap<Vec<u8>, Option<Vec<u8>>>>;

fn get_raw(
	store: &RocksdbStore,
	overlay: Option<&Overlay>,
	column: &'static str,
	key: &[u8],
) -> Option<Vec<u8>> {
	if let Some(pending) = overlay.and_then(|overlay| overlay.get(column)?.get(key)) {
		return pending.clone()
	}
	store.db.get_cf(store.cf(column), key).expect("store read failure").map(Vec::from)
}

/// Key-sorted prefix scan merging committed state with the overlay
fn prefix_scan(
	store: &RocksdbStore,
	overlay: Option<&Overlay>,
	column: &'static str,
	prefix: &[u8],
) -> Vec<(Vec<u8>, Vec<u8>)> {
	let mut merged: std::collections::BTreeMap<Vec<u8>, Option<Vec<u8>>> = store
		.db
		.prefix_iterator_cf(store.cf(column), prefix)
		.map(|result| result.expect("store iterator failure"))
		.take_while(|(key, _)| key.starts_with(prefix))
		.map(|(key, value)| (Vec::from(key), Some(Vec::from(value))))
		.collect();
	if let Some(pending) = overlay.and_then(|overlay| overlay.get(column)) {
		for (key, value) in pending {
			if key.starts_with(prefix) {
				merged.insert(key.clone(), value.clone());
			}
		}
	}
	merged
		.into_iter()
		.filter_map(|(key, value)| value.map(|value| (key, value)))
		.collect()
}

fn full_scan(
	store: &RocksdbStore,
	overlay: Option<&Overlay>,
	column: &'static str,
) -> Vec<(Vec<u8>, Vec<u8>)> {
	prefix_scan(store, overlay, column, &[])
}

/// Shared [ReadOps] over a store plus the transaction's overlay, if any
macro_rules! impl_read_ops {
	($type:ty) => {
		impl ReadOps for $type {
			fn block_get(&self, hash: &BlockHash) -> Option<StoredBlock> {
				get_raw(self.store, self.overlay_ref(), BLOCKS_COLUMN, hash.as_bytes())
					.map(|bytes| decode(&bytes))
			}

			fn block_count(&self) -> u64 {
				full_scan(self.store, self.overlay_ref(), BLOCKS_COLUMN).len() as u64
			}

			fn account_get(&self, account: &Account) -> Option<AccountInfo> {
				get_raw(self.store, self.overlay_ref(), ACCOUNTS_COLUMN, account.as_bytes())
					.map(|bytes| decode(&bytes))
			}

			fn pending_get(&self, key: &PendingKey) -> Option<PendingInfo> {
				get_raw(self.store, self.overlay_ref(), PENDING_COLUMN, &pending_key_bytes(key))
					.map(|bytes| decode(&bytes))
			}

			fn pending_any(&self, account: &Account) -> bool {
				!prefix_scan(self.store, self.overlay_ref(), PENDING_COLUMN, account.as_bytes())
					.is_empty()
			}

			fn confirmation_height_get(&self, account: &Account) -> Option<ConfirmationHeightInfo> {
				get_raw(self.store, self.overlay_ref(), CONFIRMATION_HEIGHT_COLUMN, account.as_bytes())
					.map(|bytes| decode(&bytes))
			}

			fn confirmation_heights(&self) -> Vec<(Account, ConfirmationHeightInfo)> {
				full_scan(self.store, self.overlay_ref(), CONFIRMATION_HEIGHT_COLUMN)
					.into_iter()
					.map(|(key, value)| {
						(Account(key.try_into().expect("account key is 32 bytes")), decode(&value))
					})
					.collect()
			}

			fn frontier_get(&self, hash: &BlockHash) -> Option<Account> {
				get_raw(self.store, self.overlay_ref(), FRONTIERS_COLUMN, hash.as_bytes())
					.map(|bytes| decode(&bytes))
			}

			fn unchecked_get(&self, dependency: &BlockHash) -> Vec<(UncheckedKey, UncheckedInfo)> {
				prefix_scan(self.store, self.overlay_ref(), UNCHECKED_COLUMN, dependency.as_bytes())
					.into_iter()
					.map(|(key, value)| {
						let mut hash = [0u8; 32];
						hash.copy_from_slice(&key[32..]);
						(
							UncheckedKey { dependency: *dependency, hash: BlockHash(hash) },
							decode(&value),
						)
					})
					.collect()
			}

			fn unchecked_count(&self) -> u64 {
				full_scan(self.store, self.overlay_ref(), UNCHECKED_COLUMN).len() as u64
			}

			fn online_weight(&self) -> Vec<(u64, Amount)> {
				full_scan(self.store, self.overlay_ref(), ONLINE_WEIGHT_COLUMN)
					.into_iter()
					.map(|(key, value)| {
						let timestamp =
							u64::from_be_bytes(key.try_into().expect("timestamp key is a u64"));
						(timestamp, decode(&value))
					})
					.collect()
			}

			fn rep_weights(&self) -> Vec<(Account, Amount)> {
				full_scan(self.store, self.overlay_ref(), REP_WEIGHTS_COLUMN)
					.into_iter()
					.map(|(key, value)| {
						(Account(key.try_into().expect("account key is 32 bytes")), decode(&value))
					})
					.collect()
			}
		}
	};
}

pub struct RocksdbReadTransaction<'a> {
	store: &'a RocksdbStore,
}

impl RocksdbReadTransaction<'_> {
	fn overlay_ref(&self) -> Option<&Overlay> {
		None
	}
}

impl_read_ops!(RocksdbReadTransaction<'_>);

impl ReadTransaction for RocksdbReadTransaction<'_> {
	fn refresh(&mut self) {
		// Reads go straight to the live db; there is no pinned snapshot to
		// renew
	}
}

pub struct RocksdbWriteTransaction<'a> {
	store: &'a RocksdbStore,
	batch: WriteBatch,
	overlay: Overlay,
}

impl_read_ops!(RocksdbWriteTransaction<'_>);

impl RocksdbWriteTransaction<'_> {
	fn overlay_ref(&self) -> Option<&Overlay> {
		Some(&self.overlay)
	}

	fn put(&mut self, column: &'static str, key: Vec<u8>, value: Vec<u8>) {
		self.batch.put_cf(self.store.cf(column), &key, &value);
		self.overlay.entry(column).or_default().insert(key, Some(value));
	}

	fn delete(&mut self, column: &'static str, key: Vec<u8>) {
		self.batch.delete_cf(self.store.cf(column), &key);
		self.overlay.entry(column).or_default().insert(key, None);
	}
}

impl WriteTransaction for RocksdbWriteTransaction<'_> {
	fn block_put(&mut self, hash: BlockHash, block: StoredBlock) {
		self.put(BLOCKS_COLUMN, hash.as_bytes().to_vec(), encode(&block));
	}

	fn block_del(&mut self, hash: &BlockHash) {
		self.delete(BLOCKS_COLUMN, hash.as_bytes().to_vec());
	}

	fn block_successor_set(&mut self, hash: &BlockHash, successor: BlockHash) {
		if let Some(mut block) = self.block_get(hash) {
			block.sideband.successor = successor;
			self.block_put(*hash, block);
		}
	}

	fn account_put(&mut self, account: Account, info: AccountInfo) {
		self.put(ACCOUNTS_COLUMN, account.as_bytes().to_vec(), encode(&info));
	}

	fn account_del(&mut self, account: &Account) {
		self.delete(ACCOUNTS_COLUMN, account.as_bytes().to_vec());
	}

	fn pending_put(&mut self, key: PendingKey, info: PendingInfo) {
		self.put(PENDING_COLUMN, pending_key_bytes(&key).to_vec(), encode(&info));
	}

	fn pending_del(&mut self, key: &PendingKey) {
		self.delete(PENDING_COLUMN, pending_key_bytes(key).to_vec());
	}

	fn confirmation_height_put(&mut self, account: Account, info: ConfirmationHeightInfo) {
		self.put(CONFIRMATION_HEIGHT_COLUMN, account.as_bytes().to_vec(), encode(&info));
	}

	fn frontier_put(&mut self, hash: BlockHash, account: Account) {
		self.put(FRONTIERS_COLUMN, hash.as_bytes().to_vec(), encode(&account));
	}

	fn frontier_del(&mut self, hash: &BlockHash) {
		self.delete(FRONTIERS_COLUMN, hash.as_bytes().to_vec());
	}

	fn unchecked_put(&mut self, key: UncheckedKey, info: UncheckedInfo) {
		self.put(UNCHECKED_COLUMN, unchecked_key_bytes(&key).to_vec(), encode(&info));
	}

	fn unchecked_del(&mut self, key: &UncheckedKey) {
		self.delete(UNCHECKED_COLUMN, unchecked_key_bytes(key).to_vec());
	}

	fn online_weight_put(&mut self, timestamp: u64, amount: Amount) {
		self.put(ONLINE_WEIGHT_COLUMN, timestamp.to_be_bytes().to_vec(), encode(&amount));
	}

	fn online_weight_del(&mut self, timestamp: u64) {
		self.delete(ONLINE_WEIGHT_COLUMN, timestamp.to_be_bytes().to_vec());
	}

	fn rep_weight_put(&mut self, account: Account, amount: Amount) {
		self.put(REP_WEIGHTS_COLUMN, account.as_bytes().to_vec(), encode(&amount));
	}

	fn commit(self: Box<Self>) -> Result<(), StoreError> {
		self.store.db.write(self.batch).map_err(|err| StoreError::Io(err.to_string()))
	}
}

impl Store for RocksdbStore {
	fn tx_begin_read(&self) -> Box<dyn ReadTransaction + '_> {
		Box::new(RocksdbReadTransaction { store: self })
	}

	fn tx_begin_write(&self) -> Box<dyn WriteTransaction + '_> {
		Box::new(RocksdbWriteTransaction {
			store: self,
			batch: WriteBatch::default(),
			overlay: Overlay::default(),
		})
	}
}
