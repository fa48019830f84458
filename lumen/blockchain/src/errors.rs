use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContractDefError {
	#[error("ABI parsing error: `{0}`")]
	Abi(#[from] ethabi::Error),
	#[error("Event `{0}` is not part of the contract definitions")]
	EventNotFound(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
	#[error("Ledger RPC error: `{0}`")]
	Rpc(#[from] web3::Error),
	#[error("Ledger RPC call timed out")]
	Timeout,
	#[error("State change channel closed")]
	ChannelClosed,
}
