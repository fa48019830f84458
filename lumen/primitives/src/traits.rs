use crate::types::{
	U256,
	U64,
};

/// Big-endian byte serialization used by every authenticating hash.
pub trait ToBytes {
	fn to_bytes(&self) -> Vec<u8>;
}

impl ToBytes for U256 {
	fn to_bytes(&self) -> Vec<u8> {
		let mut bytes = [0u8; 32];
		self.to_big_endian(&mut bytes);
		bytes.to_vec()
	}
}

impl ToBytes for U64 {
	fn to_bytes(&self) -> Vec<u8> {
		self.as_u64().to_be_bytes().to_vec()
	}
}

impl ToBytes for u64 {
	fn to_bytes(&self) -> Vec<u8> {
		self.to_be_bytes().to_vec()
	}
}
