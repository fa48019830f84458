#![warn(clippy::missing_docs_in_private_items)]

/// Key/value settings: `chain_id`, `last_processed_block`, ...
pub const DB_CREATE_SETTINGS: &str = "
CREATE TABLE IF NOT EXISTS settings (
	name VARCHAR[24] NOT NULL PRIMARY KEY,
	value TEXT
);
";

pub const DB_CREATE_STATE_CHANGES: &str = "
CREATE TABLE IF NOT EXISTS state_changes (
	identifier ULID PRIMARY KEY NOT NULL,
	data JSON,
	timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP NOT NULL
);
";

pub const DB_CREATE_SNAPSHOT: &str = "
CREATE TABLE IF NOT EXISTS state_snapshot (
	identifier ULID PRIMARY KEY NOT NULL,
	statechange_id ULID,
	data JSON,
	timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP NOT NULL
);
";

pub const DB_CREATE_STATE_EVENTS: &str = "
CREATE TABLE IF NOT EXISTS state_events (
	identifier ULID PRIMARY KEY NOT NULL,
	source_statechange_id ULID NOT NULL,
	data JSON,
	timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP NOT NULL
);
";

/// Locks removed from a channel tree, kept for the punish path.
pub const DB_CREATE_REMOVED_LOCKS: &str = "
CREATE TABLE IF NOT EXISTS removed_locks (
	channel_identifier TEXT NOT NULL,
	participant TEXT NOT NULL,
	secrethash TEXT NOT NULL,
	timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP NOT NULL
);
";

/// Message identifiers already acknowledged, for receive-side dedupe.
pub const DB_CREATE_ACKS: &str = "
CREATE TABLE IF NOT EXISTS message_acks (
	message_identifier TEXT NOT NULL PRIMARY KEY,
	timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP NOT NULL
);
";

/// On-chain transactions submitted by the TX watcher.
pub const DB_CREATE_PENDING_TXS: &str = "
CREATE TABLE IF NOT EXISTS pending_txs (
	identifier ULID PRIMARY KEY NOT NULL,
	description TEXT NOT NULL,
	transaction_hash TEXT,
	status VARCHAR[16] NOT NULL,
	error TEXT,
	timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP NOT NULL
);
";
