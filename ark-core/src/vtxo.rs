
use std::fmt;
use std::str::FromStr;

use bitcoin::{taproot, Amount, OutPoint, ScriptBuf, Txid};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::PublicKey;

use crate::util;


#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VtxoId([u8; 36]);

impl VtxoId {
	/// Size in bytes of an encoded [VtxoId].
	pub const ENCODE_SIZE: usize = 36;

	pub fn from_slice(b: &[u8]) -> Result<VtxoId, &'static str> {
		if b.len() == 36 {
			let mut ret = [0u8; 36];
			ret[..].copy_from_slice(&b[0..36]);
			Ok(Self(ret))
		} else {
			Err("invalid vtxo id length; must be 36 bytes")
		}
	}

	pub fn utxo(self) -> OutPoint {
		let vout = [self.0[32], self.0[33], self.0[34], self.0[35]];
		OutPoint::new(Txid::from_slice(&self.0[0..32]).unwrap(), u32::from_le_bytes(vout))
	}

	pub fn txid(self) -> Txid {
		Txid::from_slice(&self.0[0..32]).unwrap()
	}

	pub fn to_bytes(self) -> [u8; 36] {
		self.0
	}
}

impl From<OutPoint> for VtxoId {
	fn from(p: OutPoint) -> VtxoId {
		let mut ret = [0u8; 36];
		ret[0..32].copy_from_slice(&p.txid[..]);
		ret[32..].copy_from_slice(&p.vout.to_le_bytes());
		VtxoId(ret)
	}
}

impl AsRef<[u8]> for VtxoId {
	fn as_ref(&self) -> &[u8] {
		&self.0
	}
}

impl fmt::Display for VtxoId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(&self.utxo(), f)
	}
}

impl fmt::Debug for VtxoId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

impl FromStr for VtxoId {
	type Err = <OutPoint as FromStr>::Err;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(OutPoint::from_str(s)?.into())
	}
}

impl serde::Serialize for VtxoId {
	fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
		if s.is_human_readable() {
			s.collect_str(self)
		} else {
			s.serialize_bytes(self.as_ref())
		}
	}
}

impl<'de> serde::Deserialize<'de> for VtxoId {
	fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
		struct Visitor;
		impl<'de> serde::de::Visitor<'de> for Visitor {
			type Value = VtxoId;
			fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "a VtxoId")
			}
			fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
				VtxoId::from_slice(v).map_err(serde::de::Error::custom)
			}
			fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
				VtxoId::from_str(v).map_err(serde::de::Error::custom)
			}
		}
		if d.is_human_readable() {
			d.deserialize_str(Visitor)
		} else {
			d.deserialize_bytes(Visitor)
		}
	}
}

/// The script path that lets the owner exit unilaterally after the delay.
pub fn exit_clause(owner_pubkey: PublicKey, exit_delay_secs: u32) -> ScriptBuf {
	util::delayed_sign_seconds(exit_delay_secs, owner_pubkey.x_only_public_key().0)
}

pub fn exit_taproot(
	owner_pubkey: PublicKey,
	asp_pubkey: PublicKey,
	exit_delay_secs: u32,
) -> taproot::TaprootSpendInfo {
	bitcoin::taproot::TaprootBuilder::new()
		.add_leaf(0, exit_clause(owner_pubkey, exit_delay_secs)).unwrap()
		.finalize(&util::SECP, asp_pubkey.x_only_public_key().0).unwrap()
}

pub fn exit_spk(
	owner_pubkey: PublicKey,
	asp_pubkey: PublicKey,
	exit_delay_secs: u32,
) -> ScriptBuf {
	let taproot = exit_taproot(owner_pubkey, asp_pubkey, exit_delay_secs);
	ScriptBuf::new_p2tr_tweaked(taproot.output_key())
}

/// An off-chain tx output recognized by the protocol.
///
/// A vtxo is spendable without on-chain action while the congestion tree
/// anchoring it remains unswept. It is created only by round finalization
/// and destroyed only by a sweep or by being consumed as input to a later
/// confirmed round.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Vtxo {
	pub id: VtxoId,
	pub owner: PublicKey,
	#[serde(with = "bitcoin::amount::serde::as_sat")]
	pub amount: Amount,
	/// The on-chain anchor of the round that minted this vtxo.
	pub pool_txid: Txid,
	/// CSV lifetime inherited from the sweep closure of the tree root.
	pub expiry_secs: u64,
}

impl Vtxo {
	pub fn point(&self) -> OutPoint {
		self.id.utxo()
	}

	pub fn script_pubkey(&self, asp_pubkey: PublicKey, exit_delay_secs: u32) -> ScriptBuf {
		exit_spk(self.owner, asp_pubkey, exit_delay_secs)
	}
}

impl crate::util::Encodable for Vtxo {}
impl crate::util::Decodable for Vtxo {}
