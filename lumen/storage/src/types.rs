#![warn(clippy::missing_docs_in_private_items)]

use serde::{
	Deserialize,
	Serialize,
};
use thiserror::Error;
use ulid::Ulid;

#[derive(Error, Debug)]
pub enum StorageError {
	#[error("Cannot lock database connection")]
	CannotLock,
	#[error("Field unknown: `{0}`")]
	FieldUnknown(String),
	#[error("Cannot serialize record: `{0}`")]
	Serialization(#[from] serde_json::Error),
	#[error("SQL error: `{0}`")]
	Sql(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Identifier of a stored record, sortable by creation time.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct StorageID {
	pub inner: Ulid,
}

impl StorageID {
	pub fn max() -> Self {
		Self { inner: Ulid::from(u128::MAX) }
	}
}

impl From<Ulid> for StorageID {
	fn from(inner: Ulid) -> Self {
		Self { inner }
	}
}

impl ToString for StorageID {
	fn to_string(&self) -> String {
		self.inner.to_string()
	}
}

/// One stored state change.
#[derive(Clone, Debug)]
pub struct StateChangeRecord {
	pub identifier: StorageID,
	pub data: String,
}

/// One stored event together with the state change that produced it.
#[derive(Clone, Debug)]
pub struct EventRecord {
	pub identifier: StorageID,
	pub state_change_identifier: StorageID,
	pub data: String,
}

/// A snapshot of the full chain state.
#[derive(Clone, Debug)]
pub struct SnapshotRecord {
	pub identifier: StorageID,
	pub state_change_identifier: StorageID,
	pub data: String,
}

/// Status of a tracked on-chain transaction.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Eq, PartialEq)]
pub enum TxStatus {
	Pending,
	Success,
	Failed,
}

/// A tracked on-chain transaction record.
#[derive(Clone, Debug)]
pub struct PendingTxRecord {
	pub identifier: StorageID,
	pub description: String,
	pub transaction_hash: Option<String>,
	pub status: TxStatus,
	pub error: Option<String>,
}
