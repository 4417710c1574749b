
use std::io;

use bitcoin::{opcodes, ScriptBuf, Sequence};
use bitcoin::secp256k1::{self, XOnlyPublicKey};
use serde::de::DeserializeOwned;
use serde::Serialize;

lazy_static! {
	/// Global secp context.
	pub static ref SECP: secp256k1::Secp256k1<secp256k1::All> = secp256k1::Secp256k1::new();
}

/// Create a tapscript that is a checksig behind a relative timelock
/// expressed in seconds.
///
/// Seconds-based relative locktimes tick in units of 512 seconds, so the
/// effective delay is `delay_secs` rounded down to a multiple of 512.
pub fn delayed_sign_seconds(delay_secs: u32, pubkey: XOnlyPublicKey) -> ScriptBuf {
	let csv = Sequence::from_seconds_floor(delay_secs).expect("delay in range");
	bitcoin::Script::builder()
		.push_int(csv.to_consensus_u32() as i64)
		.push_opcode(opcodes::all::OP_CSV)
		.push_opcode(opcodes::all::OP_DROP)
		.push_x_only_key(&pubkey)
		.push_opcode(opcodes::all::OP_CHECKSIG)
		.into_script()
}

/// Parse a minimally-encoded script integer of at most 5 bytes.
pub(crate) fn read_scriptint(bytes: &[u8]) -> Option<i64> {
	if bytes.is_empty() {
		return Some(0);
	}
	if bytes.len() > 5 {
		return None;
	}
	let last = bytes[bytes.len() - 1];
	let mut ret = 0i64;
	for (i, &b) in bytes.iter().enumerate() {
		let v = if i == bytes.len() - 1 {
			(b & 0x7f) as i64
		} else {
			b as i64
		};
		ret += v << (8 * i);
	}
	if last & 0x80 != 0 {
		ret = -ret;
	}
	Some(ret)
}

pub trait Encodable: Serialize {
	fn encode(&self) -> Vec<u8> {
		let mut buf = Vec::new();
		ciborium::into_writer(self, &mut buf).unwrap();
		buf
	}
}

pub trait Decodable: DeserializeOwned {
	fn decode(bytes: &[u8]) -> Result<Self, ciborium::de::Error<io::Error>> {
		ciborium::from_reader(bytes)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use bitcoin::script::Instruction;

	#[test]
	fn scriptint_roundtrip() {
		// values small enough for OP_N encoding never hit the parser
		for v in [17i64, 127, 128, 255, 256, 0x7fffffff, 4194873, -17, -255] {
			let script = bitcoin::Script::builder().push_int(v).into_script();
			let parsed = match script.instructions().next().unwrap().unwrap() {
				Instruction::PushBytes(pb) => read_scriptint(pb.as_bytes()).unwrap(),
				other => panic!("unexpected encoding for {}: {:?}", v, other),
			};
			assert_eq!(v, parsed, "value {}", v);
		}
		assert_eq!(read_scriptint(&[]), Some(0));
		assert_eq!(read_scriptint(&[0; 6]), None);
	}
}
