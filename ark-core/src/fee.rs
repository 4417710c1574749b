
use bitcoin::{Amount, Script, ScriptBuf, TxOut, Witness};

/// Dust value used for connector and fee anchor outputs.
pub const DUST: Amount = Amount::from_sat(crate::P2TR_DUST_SAT);

/// The script holding only the OP_TRUE opcode.
fn op_true_script() -> &'static Script {
	Script::from_bytes(&[0x51])
}

/// A p2wsh OP_TRUE output carrying the dust amount.
///
/// Anyone, the server included, can spend it with [dust_anchor_witness]
/// to attach fees to the presigned tx it sits on.
pub fn dust_anchor() -> TxOut {
	TxOut {
		script_pubkey: ScriptBuf::new_p2wsh(&op_true_script().wscript_hash()),
		value: DUST,
	}
}

/// The witness spending a [dust_anchor] output.
pub fn dust_anchor_witness() -> Witness {
	let mut ret = Witness::new();
	ret.push(&op_true_script()[..]);
	ret
}

#[cfg(test)]
mod test {
	use super::*;
	use bitcoin::opcodes;

	#[test]
	fn anchor_is_spendable_op_true() {
		assert_eq!(
			op_true_script(),
			&ScriptBuf::from_bytes(vec![opcodes::OP_TRUE.to_u8()]),
		);

		let anchor = dust_anchor();
		assert_eq!(anchor.value, DUST);
		assert!(anchor.script_pubkey.is_p2wsh());
		// the witness reveals exactly the committed script
		let witness = dust_anchor_witness();
		assert_eq!(witness.len(), 1);
		assert_eq!(
			ScriptBuf::new_p2wsh(&Script::from_bytes(&witness[0]).wscript_hash()),
			anchor.script_pubkey,
		);
	}
}
