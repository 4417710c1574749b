
pub extern crate bitcoin;

#[macro_use] extern crate serde;
#[macro_use] extern crate lazy_static;

pub mod address;
pub mod connectors;
pub mod exit;
pub mod fee;
pub mod forfeit;
pub mod rounds;
pub mod tree;
pub mod util;
pub mod vtxo;

use std::fmt;
use std::str::FromStr;

use bitcoin::Amount;
use bitcoin::hex::{DisplayHex, FromHex};
use bitcoin::secp256k1::{rand, PublicKey};

pub use crate::address::ArkAddress;
pub use crate::vtxo::{Vtxo, VtxoId};


/// Dust value for p2tr outputs, 330 satoshis.
pub const P2TR_DUST_SAT: u64 = 330;
pub const P2TR_DUST: Amount = Amount::from_sat(P2TR_DUST_SAT);

/// Witness weight of a taproot keyspend.
pub const TAPROOT_KEYSPEND_WEIGHT: usize = 66;


/// Identifier of a payment intent within a round window.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntentId([u8; 16]);

impl IntentId {
	/// Size in bytes of an encoded [IntentId].
	pub const ENCODE_SIZE: usize = 16;

	/// Generate a fresh random intent id.
	pub fn generate() -> IntentId {
		IntentId(rand::random())
	}

	pub fn from_slice(b: &[u8]) -> Result<IntentId, &'static str> {
		if b.len() == Self::ENCODE_SIZE {
			let mut ret = [0u8; Self::ENCODE_SIZE];
			ret[..].copy_from_slice(b);
			Ok(IntentId(ret))
		} else {
			Err("invalid intent id length; must be 16 bytes")
		}
	}

	pub fn to_bytes(self) -> [u8; 16] {
		self.0
	}
}

impl AsRef<[u8]> for IntentId {
	fn as_ref(&self) -> &[u8] {
		&self.0
	}
}

impl fmt::Display for IntentId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.0.as_hex())
	}
}

impl fmt::Debug for IntentId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

impl FromStr for IntentId {
	type Err = bitcoin::hex::HexToArrayError;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(IntentId(<[u8; 16]>::from_hex(s)?))
	}
}

impl serde::Serialize for IntentId {
	fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
		if s.is_human_readable() {
			s.collect_str(self)
		} else {
			s.serialize_bytes(self.as_ref())
		}
	}
}

impl<'de> serde::Deserialize<'de> for IntentId {
	fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
		struct Visitor;
		impl<'de> serde::de::Visitor<'de> for Visitor {
			type Value = IntentId;
			fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "an IntentId")
			}
			fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
				IntentId::from_slice(v).map_err(serde::de::Error::custom)
			}
			fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
				IntentId::from_str(v).map_err(serde::de::Error::custom)
			}
		}
		if d.is_human_readable() {
			d.deserialize_str(Visitor)
		} else {
			d.deserialize_bytes(Visitor)
		}
	}
}

/// Where the money of a [Receiver] goes.
///
/// Exactly one destination kind exists per receiver; an address string that
/// decodes as an Ark address is an off-chain destination, anything else is
/// treated as a raw on-chain address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum Destination {
	/// A new vtxo for this pubkey, minted as a leaf of the round's tree.
	Pubkey(PublicKey),
	/// An on-chain address string, paid directly from the pool tx.
	Onchain(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct Receiver {
	pub destination: Destination,
	#[serde(with = "bitcoin::amount::serde::as_sat")]
	pub amount: Amount,
}

impl Receiver {
	pub fn is_offchain(&self) -> bool {
		matches!(self.destination, Destination::Pubkey(_))
	}

	/// The destination pubkey, for off-chain receivers.
	pub fn pubkey(&self) -> Option<PublicKey> {
		match self.destination {
			Destination::Pubkey(pk) => Some(pk),
			Destination::Onchain(_) => None,
		}
	}
}

/// A request to spend input vtxos into a set of receivers.
///
/// Intents are ephemeral; they live between submission and the end of the
/// round window that accepted them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PaymentIntent {
	pub id: IntentId,
	/// The pubkey owning all input vtxos.
	pub owner: PublicKey,
	pub inputs: Vec<VtxoId>,
	pub receivers: Vec<Receiver>,
}

impl PaymentIntent {
	pub fn new(owner: PublicKey, inputs: Vec<VtxoId>, receivers: Vec<Receiver>) -> PaymentIntent {
		PaymentIntent {
			id: IntentId::generate(),
			owner, inputs, receivers,
		}
	}

	pub fn total_output(&self) -> Amount {
		self.receivers.iter().map(|r| r.amount).sum()
	}

	pub fn offchain_receivers(&self) -> impl Iterator<Item = &Receiver> {
		self.receivers.iter().filter(|r| r.is_offchain())
	}
}
