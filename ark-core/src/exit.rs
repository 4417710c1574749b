//!
//! The unilateral exit path.
//!
//! When the server is unresponsive, a client can get its vtxo confirmed
//! on-chain without cooperation by broadcasting the branch of the
//! congestion tree that anchors it. This module reconstructs that branch
//! from a cached tree and figures out which part of it is still off-chain.
//!

use std::time::{Duration, SystemTime};

use bitcoin::{Psbt, Txid, Witness};
use bitcoin::consensus::encode::serialize_hex;

use crate::tree::{CongestionTree, TreeError};
use crate::vtxo::Vtxo;


/// Chain access needed by the exit path.
///
/// Implementations answer from whatever chain source the client has; a tx
/// unknown to the source counts as not on-chain.
pub trait Explorer {
	/// The raw tx hex, if the tx is known on-chain.
	fn get_tx_hex(&self, txid: Txid) -> Option<String>;
	/// The unix block time, if the tx is confirmed.
	fn get_tx_blocktime(&self, txid: Txid) -> Option<u64>;
}

#[derive(Debug, thiserror::Error)]
pub enum ExitError {
	#[error("missing taproot key spend signature on {0}")]
	MissingKeySpendSig(Txid),
	#[error("tree error: {0}")]
	Tree(#[from] TreeError),
}

/// The branch of a congestion tree anchoring one vtxo, ready for
/// unilateral redemption.
pub struct RedeemBranch {
	vtxo: Vtxo,
	/// The presigned txs from the root down to the vtxo's leaf.
	branch: Vec<Psbt>,
	branch_txids: Vec<Txid>,
	lifetime: Duration,
}

impl RedeemBranch {
	pub fn new(tree: &CongestionTree, vtxo: &Vtxo) -> Result<RedeemBranch, ExitError> {
		let (_script, seconds) = tree.find_sweep_closure()?;

		let nodes = tree.branch(vtxo.id.txid())?;
		let branch = nodes.iter().map(|n| n.tx.clone()).collect::<Vec<_>>();
		let branch_txids = nodes.iter().map(|n| n.txid).collect();

		Ok(RedeemBranch {
			vtxo: vtxo.clone(),
			branch,
			branch_txids,
			lifetime: Duration::from_secs(seconds),
		})
	}

	/// The lifetime encoded in the tree's sweep closure.
	pub fn lifetime(&self) -> Duration {
		self.lifetime
	}

	/// The serialized transactions to broadcast, in order, to get the
	/// vtxo's output confirmed on-chain.
	pub fn redeem_path(&self, explorer: &impl Explorer) -> Result<Vec<String>, ExitError> {
		let offchain = self.offchain_path(explorer);

		let mut txs = Vec::with_capacity(offchain.len());
		for ptx in offchain {
			let sig = ptx.inputs.first()
				.and_then(|i| i.tap_key_sig)
				.ok_or_else(|| ExitError::MissingKeySpendSig(ptx.unsigned_tx.compute_txid()))?;

			let mut ptx = ptx.clone();
			ptx.inputs[0].final_script_witness = Some(Witness::from_slice(&[&sig.to_vec()]));
			let tx = ptx.extract_tx_unchecked_fee_rate();
			txs.push(serialize_hex(&tx));
		}

		Ok(txs)
	}

	/// The part of the branch that is not yet on-chain, root-most first.
	///
	/// Walks from the leaf back to the root; the first node already
	/// on-chain determines the cut, dropping it and all its ancestors. If
	/// the leaf itself is on-chain the path is empty.
	pub fn offchain_path(&self, explorer: &impl Explorer) -> &[Psbt] {
		for i in (0..self.branch.len()).rev() {
			if explorer.get_tx_hex(self.branch_txids[i]).is_some() {
				return &self.branch[i + 1..];
			}
		}
		&self.branch[..]
	}

	/// Estimate when the vtxo expires and becomes sweepable by the server.
	///
	/// If the pool tx is unconfirmed this is a conservative guess of one
	/// minute from now plus the lifetime; otherwise the lifetime counts
	/// from the block time of the deepest confirmed node of the branch.
	pub fn expire_at(&self, explorer: &impl Explorer, now: SystemTime) -> SystemTime {
		let mut last_known = match explorer.get_tx_blocktime(self.vtxo.pool_txid) {
			Some(t) => t,
			None => return now + Duration::from_secs(60) + self.lifetime,
		};

		for txid in &self.branch_txids {
			match explorer.get_tx_blocktime(*txid) {
				Some(t) => last_known = t,
				None => break,
			}
		}

		SystemTime::UNIX_EPOCH + Duration::from_secs(last_known) + self.lifetime
	}
}
