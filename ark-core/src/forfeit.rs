
use bitcoin::{OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{schnorr, Keypair, Message, PublicKey};
use bitcoin::sighash::{self, SighashCache, TapSighash, TapSighashType};

use crate::{fee, vtxo, Vtxo};
use crate::connectors::ConnectorChain;
use crate::util::SECP;


/// Construct the forfeit tx surrendering the given vtxo to the server,
/// bound to the round through `connector`.
pub fn create_forfeit_tx(
	vtxo: &Vtxo,
	connector: OutPoint,
	asp_pubkey: PublicKey,
	forfeit_sig: Option<&schnorr::Signature>,
	connector_sig: Option<&schnorr::Signature>,
) -> Transaction {
	Transaction {
		version: bitcoin::transaction::Version(3),
		lock_time: bitcoin::absolute::LockTime::ZERO,
		input: vec![
			TxIn {
				previous_output: vtxo.point(),
				sequence: Sequence::MAX,
				script_sig: ScriptBuf::new(),
				witness: forfeit_sig.map(|s| Witness::from_slice(&[&s[..]])).unwrap_or_default(),
			},
			TxIn {
				previous_output: connector,
				sequence: Sequence::MAX,
				script_sig: ScriptBuf::new(),
				witness: connector_sig.map(|s| Witness::from_slice(&[&s[..]])).unwrap_or_default(),
			},
		],
		output: vec![
			TxOut {
				value: vtxo.amount,
				script_pubkey: ScriptBuf::new_p2tr(&SECP, asp_pubkey.x_only_public_key().0, None),
			},
			// funded by the connector's dust; fees ride in through here
			fee::dust_anchor(),
		],
	}
}

/// The sighash of the vtxo input of a forfeit tx.
///
/// This is what the participant signs to surrender the vtxo.
pub fn forfeit_sighash(
	vtxo: &Vtxo,
	connector: OutPoint,
	asp_pubkey: PublicKey,
	exit_delay_secs: u32,
	connector_pk: PublicKey,
) -> (TapSighash, Transaction) {
	let vtxo_prevout = TxOut {
		script_pubkey: vtxo::exit_spk(vtxo.owner, asp_pubkey, exit_delay_secs),
		value: vtxo.amount,
	};
	let connector_prevout = TxOut {
		script_pubkey: ConnectorChain::output_script(connector_pk),
		value: fee::DUST,
	};
	let tx = create_forfeit_tx(vtxo, connector, asp_pubkey, None, None);
	let sighash = SighashCache::new(&tx).taproot_key_spend_signature_hash(
		0,
		&sighash::Prevouts::All(&[vtxo_prevout, connector_prevout]),
		TapSighashType::Default,
	).expect("sighash error");
	(sighash, tx)
}

/// Sign the vtxo input of the forfeit tx with the owner's keypair.
pub fn sign_forfeit(
	vtxo: &Vtxo,
	connector: OutPoint,
	asp_pubkey: PublicKey,
	exit_delay_secs: u32,
	connector_pk: PublicKey,
	keypair: &Keypair,
) -> schnorr::Signature {
	let (sighash, _) = forfeit_sighash(vtxo, connector, asp_pubkey, exit_delay_secs, connector_pk);
	SECP.sign_schnorr(&Message::from_digest(sighash.to_byte_array()), keypair)
}

/// Verify a participant's forfeit signature against the canonical spend of
/// the vtxo bound to the given connector.
pub fn verify_forfeit_sig(
	vtxo: &Vtxo,
	connector: OutPoint,
	asp_pubkey: PublicKey,
	exit_delay_secs: u32,
	connector_pk: PublicKey,
	sig: &schnorr::Signature,
) -> Result<(), bitcoin::secp256k1::Error> {
	let (sighash, _) = forfeit_sighash(vtxo, connector, asp_pubkey, exit_delay_secs, connector_pk);
	SECP.verify_schnorr(
		sig,
		&Message::from_digest(sighash.to_byte_array()),
		&vtxo.owner.x_only_public_key().0,
	)
}
