
use std::fmt;
use std::str::FromStr;

use bitcoin::bech32::{self, ByteIterExt, Fe32IterExt};
use bitcoin::bech32::primitives::decode::CheckedHrpstring;
use bitcoin::secp256k1::PublicKey;


/// The human-readable part for mainnet addresses.
const HRP_MAINNET: bech32::Hrp = bech32::Hrp::parse_unchecked("ark");

/// The human-readable part for test addresses.
const HRP_TESTNET: bech32::Hrp = bech32::Hrp::parse_unchecked("tark");

#[derive(Debug, thiserror::Error)]
pub enum AddressError {
	#[error("invalid address format: {0}")]
	Format(String),
	#[error("unknown address prefix: {0}")]
	UnknownPrefix(String),
	#[error("invalid address payload length: {0} bytes")]
	InvalidLength(usize),
	#[error("invalid pubkey in address: {0}")]
	InvalidPubkey(bitcoin::secp256k1::Error),
}

/// An Ark address: the server pubkey of the Ark the user is part of,
/// plus the user's own pubkey, bech32m-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArkAddress {
	testnet: bool,
	asp_pubkey: PublicKey,
	user_pubkey: PublicKey,
}

impl ArkAddress {
	pub fn new(asp_pubkey: PublicKey, user_pubkey: PublicKey) -> ArkAddress {
		ArkAddress { testnet: false, asp_pubkey, user_pubkey }
	}

	pub fn new_testnet(asp_pubkey: PublicKey, user_pubkey: PublicKey) -> ArkAddress {
		ArkAddress { testnet: true, asp_pubkey, user_pubkey }
	}

	pub fn is_testnet(&self) -> bool {
		self.testnet
	}

	pub fn asp_pubkey(&self) -> PublicKey {
		self.asp_pubkey
	}

	pub fn user_pubkey(&self) -> PublicKey {
		self.user_pubkey
	}
}

impl fmt::Display for ArkAddress {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let hrp = if self.testnet {
			HRP_TESTNET
		} else {
			HRP_MAINNET
		};

		let payload = self.asp_pubkey.serialize().into_iter()
			.chain(self.user_pubkey.serialize().into_iter());

		for c in payload.bytes_to_fes().with_checksum::<bech32::Bech32m>(&hrp).chars() {
			fmt::Write::write_char(f, c)?;
		}
		Ok(())
	}
}

impl FromStr for ArkAddress {
	type Err = AddressError;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let checked = CheckedHrpstring::new::<bech32::Bech32m>(s)
			.map_err(|e| AddressError::Format(e.to_string()))?;

		let hrp = checked.hrp();
		let testnet = if hrp == HRP_MAINNET {
			false
		} else if hrp == HRP_TESTNET {
			true
		} else {
			return Err(AddressError::UnknownPrefix(hrp.to_string()));
		};

		let bytes = checked.byte_iter().collect::<Vec<_>>();
		if bytes.len() != 66 {
			return Err(AddressError::InvalidLength(bytes.len()));
		}
		let asp_pubkey = PublicKey::from_slice(&bytes[0..33])
			.map_err(AddressError::InvalidPubkey)?;
		let user_pubkey = PublicKey::from_slice(&bytes[33..66])
			.map_err(AddressError::InvalidPubkey)?;

		Ok(ArkAddress { testnet, asp_pubkey, user_pubkey })
	}
}

impl serde::Serialize for ArkAddress {
	fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
		s.collect_str(self)
	}
}

impl<'de> serde::Deserialize<'de> for ArkAddress {
	fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
		let s = <String as serde::Deserialize>::deserialize(d)?;
		ArkAddress::from_str(&s).map_err(serde::de::Error::custom)
	}
}
