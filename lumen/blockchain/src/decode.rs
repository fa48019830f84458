#![warn(clippy::missing_docs_in_private_items)]

use lumen_primitives::{
	hashing::{
		channel_identifier_from_participants,
		hash_secret,
	},
	types::{
		Address,
		CanonicalIdentifier,
		H256,
		U256,
	},
};
use lumen_state_machine::types::{
	ContractReceiveBalanceProofUpdated,
	ContractReceiveChannelClosed,
	ContractReceiveChannelCooperativeSettled,
	ContractReceiveChannelDeposit,
	ContractReceiveChannelOpened,
	ContractReceiveChannelPunished,
	ContractReceiveChannelSettled,
	ContractReceiveChannelUnlocked,
	ContractReceiveChannelWithdraw,
	ContractReceiveSecretReveal,
	ContractReceiveTokenNetworkCreated,
	StateChange,
};
use thiserror::Error;

use crate::{
	contracts::{
		EVENT_BALANCE_PROOF_UPDATED,
		EVENT_CHANNEL_CLOSED,
		EVENT_CHANNEL_COOPERATIVE_SETTLED,
		EVENT_CHANNEL_NEW_DEPOSIT,
		EVENT_CHANNEL_OPENED_AND_DEPOSIT,
		EVENT_CHANNEL_PUNISHED,
		EVENT_CHANNEL_SETTLED,
		EVENT_CHANNEL_UNLOCKED,
		EVENT_CHANNEL_WITHDRAW,
		EVENT_SECRET_REVEALED,
		EVENT_TOKEN_NETWORK_CREATED,
	},
	events::{
		DecodedEvent,
		OrderedStateChange,
	},
};

#[derive(Error, Debug)]
pub enum DecodeError {
	#[error("Event `{0}` is missing field `{1}`")]
	MissingField(String, &'static str),
	#[error("Event `{0}` field `{1}` has an unexpected type")]
	WrongType(String, &'static str),
	#[error("Unknown event `{0}`")]
	UnknownEvent(String),
}

/// Translates decoded ledger events into contract state changes.
pub struct EventDecoder;

impl EventDecoder {
	/// Field as an address.
	fn address(event: &DecodedEvent, field: &'static str) -> Result<Address, DecodeError> {
		match event.data.get(field) {
			Some(ethabi::Token::Address(address)) => Ok(*address),
			Some(_) => Err(DecodeError::WrongType(event.name.clone(), field)),
			None => Err(DecodeError::MissingField(event.name.clone(), field)),
		}
	}

	/// Field as a 256-bit unsigned integer.
	fn uint(event: &DecodedEvent, field: &'static str) -> Result<U256, DecodeError> {
		match event.data.get(field) {
			Some(ethabi::Token::Uint(value)) => Ok(*value),
			Some(_) => Err(DecodeError::WrongType(event.name.clone(), field)),
			None => Err(DecodeError::MissingField(event.name.clone(), field)),
		}
	}

	/// Field as a 32-byte word.
	fn word(event: &DecodedEvent, field: &'static str) -> Result<H256, DecodeError> {
		match event.data.get(field) {
			Some(ethabi::Token::FixedBytes(bytes)) if bytes.len() == 32 =>
				Ok(H256::from_slice(bytes)),
			Some(_) => Err(DecodeError::WrongType(event.name.clone(), field)),
			None => Err(DecodeError::MissingField(event.name.clone(), field)),
		}
	}

	/// Translate one ledger event. Some events expand to more than one
	/// state change; they share the event's on-chain position.
	pub fn as_state_changes(
		&self,
		event: DecodedEvent,
	) -> Result<Vec<OrderedStateChange>, DecodeError> {
		let block_number = event.block_number;
		let state_changes: Vec<StateChange> = match event.name.as_str() {
			EVENT_TOKEN_NETWORK_CREATED => vec![ContractReceiveTokenNetworkCreated {
				token_address: Self::address(&event, "token_address")?,
				block_number,
			}
			.into()],

			EVENT_CHANNEL_OPENED_AND_DEPOSIT => {
				let token = Self::address(&event, "token")?;
				let participant = Self::address(&event, "participant")?;
				let partner = Self::address(&event, "partner")?;
				let channel_identifier = channel_identifier_from_participants(
					participant,
					partner,
					token,
					event.address,
				);
				vec![
					ContractReceiveChannelOpened {
						canonical_identifier: CanonicalIdentifier::new(
							channel_identifier,
							block_number,
						),
						participant1: participant,
						participant2: partner,
						token_address: token,
						settle_timeout: Self::uint(&event, "settle_timeout")?.as_u64().into(),
						block_number,
					}
					.into(),
					ContractReceiveChannelDeposit {
						channel_identifier,
						participant,
						total_deposit: Self::uint(&event, "participant_deposit")?,
						block_number,
					}
					.into(),
				]
			},

			EVENT_CHANNEL_NEW_DEPOSIT => vec![ContractReceiveChannelDeposit {
				channel_identifier: Self::word(&event, "channel_identifier")?,
				participant: Self::address(&event, "participant")?,
				total_deposit: Self::uint(&event, "total_deposit")?,
				block_number,
			}
			.into()],

			EVENT_CHANNEL_WITHDRAW => vec![ContractReceiveChannelWithdraw {
				channel_identifier: Self::word(&event, "channel_identifier")?,
				new_open_block_number: block_number,
				participant1: Self::address(&event, "participant1")?,
				participant2: Self::address(&event, "participant2")?,
				participant1_balance: Self::uint(&event, "participant1_balance")?,
				participant2_balance: Self::uint(&event, "participant2_balance")?,
				block_number,
			}
			.into()],

			EVENT_CHANNEL_CLOSED => vec![ContractReceiveChannelClosed {
				channel_identifier: Self::word(&event, "channel_identifier")?,
				closing_participant: Self::address(&event, "closing_participant")?,
				transferred_amount: Self::uint(&event, "transferred_amount")?,
				locksroot: Self::word(&event, "locksroot")?,
				block_number,
			}
			.into()],

			EVENT_BALANCE_PROOF_UPDATED => vec![ContractReceiveBalanceProofUpdated {
				channel_identifier: Self::word(&event, "channel_identifier")?,
				participant: Self::address(&event, "participant")?,
				transferred_amount: Self::uint(&event, "transferred_amount")?,
				locksroot: Self::word(&event, "locksroot")?,
				block_number,
			}
			.into()],

			EVENT_CHANNEL_PUNISHED => vec![ContractReceiveChannelPunished {
				channel_identifier: Self::word(&event, "channel_identifier")?,
				beneficiary: Self::address(&event, "beneficiary")?,
				block_number,
			}
			.into()],

			EVENT_CHANNEL_UNLOCKED => vec![ContractReceiveChannelUnlocked {
				channel_identifier: Self::word(&event, "channel_identifier")?,
				payer_participant: Self::address(&event, "payer_participant")?,
				transferred_amount: Self::uint(&event, "transferred_amount")?,
				lockhash: Self::word(&event, "lockhash")?,
				block_number,
			}
			.into()],

			EVENT_CHANNEL_SETTLED => vec![ContractReceiveChannelSettled {
				channel_identifier: Self::word(&event, "channel_identifier")?,
				block_number,
			}
			.into()],

			EVENT_CHANNEL_COOPERATIVE_SETTLED =>
				vec![ContractReceiveChannelCooperativeSettled {
					channel_identifier: Self::word(&event, "channel_identifier")?,
					block_number,
				}
				.into()],

			EVENT_SECRET_REVEALED => {
				let secret = Self::word(&event, "secret")?;
				vec![ContractReceiveSecretReveal {
					secret,
					secrethash: hash_secret(secret.as_bytes()),
					block_number,
				}
				.into()]
			},

			_ => return Err(DecodeError::UnknownEvent(event.name)),
		};

		Ok(state_changes
			.into_iter()
			.map(|state_change| OrderedStateChange {
				block_number,
				transaction_index: event.transaction_index,
				log_index: event.log_index,
				state_change,
			})
			.collect())
	}
}
