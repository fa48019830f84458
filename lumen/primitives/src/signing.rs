use web3::{
	signing::{
		keccak256,
		recover,
	},
	types::Recovery,
};

use crate::types::{
	Address,
	Signature,
};

/// Hash applied to a packed message before signing.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
	keccak256(data)
}

/// Recover the signer of a packed message from its 65-byte recoverable
/// signature.
pub fn recover_address(data: &[u8], signature: &Signature) -> Result<Address, String> {
	let recovery = Recovery::from_raw_signature(hash_data(data), signature.0.as_slice())
		.map_err(|e| e.to_string())?;
	let recovery_id = recovery.recovery_id().ok_or("Found invalid recovery ID".to_owned())?;
	recover(&hash_data(data), &signature.0[..64], recovery_id)
		.map_err(|e| format!("Error recovering signature {:?}", e))
}

/// Verify that `signature` over `data` was produced by `sender_address`.
pub fn is_valid_signature(
	data: &[u8],
	signature: &Signature,
	sender_address: Address,
) -> Result<(), String> {
	let signer_address = recover_address(data, signature)?;
	if signer_address == sender_address {
		return Ok(())
	}
	Err("Signature was valid but the expected address does not match".to_owned())
}

#[cfg(test)]
mod tests {
	use ethsign::SecretKey;

	use super::*;

	#[test]
	fn test_recover_matches_signer() {
		let key = SecretKey::from_raw(&[7u8; 32]).expect("Valid test key");
		let data = b"envelope head";

		let parts = key.sign(&hash_data(data)).expect("Data should be signed");
		let mut raw = parts.r.to_vec();
		raw.extend_from_slice(&parts.s);
		raw.push(parts.v);
		let signature = Signature::from(raw);

		let recovered = recover_address(data, &signature).expect("Should recover");
		assert_eq!(recovered.as_bytes(), &key.public().address()[..]);
		assert!(is_valid_signature(data, &signature, recovered).is_ok());
	}

	#[test]
	fn test_wrong_signer_is_rejected() {
		let key = SecretKey::from_raw(&[7u8; 32]).expect("Valid test key");
		let other = SecretKey::from_raw(&[8u8; 32]).expect("Valid test key");
		let data = b"envelope head";

		let parts = key.sign(&hash_data(data)).expect("Data should be signed");
		let mut raw = parts.r.to_vec();
		raw.extend_from_slice(&parts.s);
		raw.push(parts.v);
		let signature = Signature::from(raw);

		let other_address = crate::types::Address::from_slice(&other.public().address()[..]);
		assert!(is_valid_signature(data, &signature, other_address).is_err());
	}
}
