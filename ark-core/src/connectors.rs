
use std::iter;

use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use bitcoin::secp256k1::PublicKey;

use crate::{fee, util};


/// A chain of connector outputs.
///
/// Connectors are small outputs chained off the pool tx that bind forfeit
/// transactions to the round's on-chain commit: a forfeit can only confirm
/// if its connector exists, and the connector only exists if the round's
/// pool tx confirmed. Each connector is a p2tr keyspend output for the
/// provided key, carrying the dust value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorChain {
	len: usize,
	spk: ScriptBuf,
	utxo: OutPoint,
}

impl ConnectorChain {
	/// The budget needed for a chain of length `len`: dust per connector.
	pub fn required_budget(len: usize) -> Amount {
		assert_ne!(len, 0);
		fee::DUST * len as u64
	}

	/// The scriptPubkey anchoring a connector chain for the given key.
	pub fn output_script(pubkey: PublicKey) -> ScriptBuf {
		ScriptBuf::new_p2tr(&util::SECP, pubkey.x_only_public_key().0, None)
	}

	/// The pool tx output from which a chain of length `len` is spent.
	pub fn output(len: usize, pubkey: PublicKey) -> TxOut {
		TxOut {
			script_pubkey: Self::output_script(pubkey),
			value: Self::required_budget(len),
		}
	}

	/// Create a new connector chain rooted at `utxo`.
	///
	/// The utxo is expected to carry [ConnectorChain::output_script] with
	/// exactly [ConnectorChain::required_budget] in value.
	pub fn new(len: usize, utxo: OutPoint, pubkey: PublicKey) -> ConnectorChain {
		assert_ne!(len, 0);
		let spk = Self::output_script(pubkey);

		ConnectorChain { len, spk, utxo }
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn utxo(&self) -> OutPoint {
		self.utxo
	}

	fn tx(&self, prev: OutPoint, idx: usize) -> Transaction {
		Transaction {
			version: bitcoin::transaction::Version(3),
			lock_time: bitcoin::absolute::LockTime::ZERO,
			input: vec![TxIn {
				previous_output: prev,
				script_sig: ScriptBuf::new(),
				sequence: Sequence::MAX,
				witness: Witness::new(),
			}],
			output: vec![
				TxOut {
					script_pubkey: self.spk.clone(),
					value: ConnectorChain::required_budget(self.len - idx - 1),
				},
				TxOut {
					script_pubkey: self.spk.clone(),
					value: fee::DUST,
				},
			],
		}
	}

	/// Iterator over the transactions in this chain.
	pub fn iter_unsigned_txs(&self) -> ConnectorTxIter {
		ConnectorTxIter {
			chain: self,
			prev: self.utxo,
			idx: 0,
		}
	}

	/// Iterator over the connector outpoints in this chain.
	pub fn connectors(&self) -> ConnectorIter {
		ConnectorIter {
			txs: self.iter_unsigned_txs(),
			maybe_last: Some(self.utxo),
		}
	}
}

pub struct ConnectorTxIter<'a> {
	chain: &'a ConnectorChain,

	prev: OutPoint,
	idx: usize,
}

impl<'a> iter::Iterator for ConnectorTxIter<'a> {
	type Item = Transaction;

	fn next(&mut self) -> Option<Self::Item> {
		if self.idx >= self.chain.len - 1 {
			return None;
		}

		let ret = self.chain.tx(self.prev, self.idx);
		self.idx += 1;
		self.prev = OutPoint::new(ret.compute_txid(), 0);
		Some(ret)
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		let s = self.chain.len - 1;
		(s, Some(s))
	}
}

pub struct ConnectorIter<'a> {
	txs: ConnectorTxIter<'a>,
	// On intermediate txs only the second output is a connector, the first
	// continues the chain. On the very last tx both outputs are connectors.
	// This keeps the first output of the last tx seen so it can be yielded
	// once the tx iterator runs out.
	maybe_last: Option<OutPoint>,
}

impl<'a> iter::Iterator for ConnectorIter<'a> {
	type Item = OutPoint;

	fn next(&mut self) -> Option<Self::Item> {
		if self.maybe_last.is_none() {
			return None;
		}

		if let Some(tx) = self.txs.next() {
			let txid = tx.compute_txid();
			self.maybe_last = Some(OutPoint::new(txid, 0));
			Some(OutPoint::new(txid, 1))
		} else {
			Some(self.maybe_last.take().expect("broken"))
		}
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		(self.txs.chain.len, Some(self.txs.chain.len))
	}
}

impl<'a> iter::ExactSizeIterator for ConnectorTxIter<'a> {}
impl<'a> iter::FusedIterator for ConnectorTxIter<'a> {}


#[cfg(test)]
mod test {
	use super::*;
	use bitcoin::Txid;
	use bitcoin::hashes::Hash;
	use bitcoin::secp256k1::{rand, Keypair};

	#[test]
	fn test_chain_shape() {
		let key = Keypair::new(&util::SECP, &mut rand::thread_rng());
		let utxo = OutPoint::new(Txid::all_zeros(), 0);

		let chain = ConnectorChain::new(1, utxo, key.public_key());
		assert_eq!(chain.connectors().count(), 1);
		assert_eq!(chain.iter_unsigned_txs().count(), 0);
		assert_eq!(chain.connectors().next().unwrap(), utxo);

		let chain = ConnectorChain::new(2, utxo, key.public_key());
		assert_eq!(chain.connectors().count(), 2);
		assert_eq!(chain.iter_unsigned_txs().count(), 1);

		let chain = ConnectorChain::new(10, utxo, key.public_key());
		assert_eq!(chain.connectors().count(), 10);
		assert_eq!(chain.iter_unsigned_txs().count(), 9);
		chain.iter_unsigned_txs().for_each(|t| assert_eq!(t.output[1].value, fee::DUST));
		assert_eq!(fee::DUST, chain.iter_unsigned_txs().last().unwrap().output[0].value);

		// all connector value is accounted for by the budget
		let total_value = chain.iter_unsigned_txs().map(|t| t.output[1].value).sum::<Amount>()
			+ chain.iter_unsigned_txs().last().unwrap().output[0].value;
		assert_eq!(ConnectorChain::required_budget(10), total_value);
	}

	#[test]
	fn test_connectors_unique() {
		let key = Keypair::new(&util::SECP, &mut rand::thread_rng());
		let utxo = OutPoint::new(Txid::all_zeros(), 1);

		let chain = ConnectorChain::new(7, utxo, key.public_key());
		let conns = chain.connectors().collect::<Vec<_>>();
		assert_eq!(conns.len(), 7);
		let dedup = conns.iter().collect::<std::collections::HashSet<_>>();
		assert_eq!(dedup.len(), 7);
	}
}
