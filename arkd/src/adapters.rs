//!
//! Contracts for the external collaborators of the coordinator.
//!
//! The core never talks to the base chain itself: broadcasting,
//! confirmation observation, fee estimation and concrete script assembly
//! all happen behind these traits. Implementations are selected at
//! startup; the in-tree test doubles live with the integration tests.
//!

use bitcoin::{Amount, FeeRate, OutPoint, Transaction, TxOut, Txid};
use bitcoin::secp256k1::{Keypair, PublicKey};
use tokio::sync::oneshot;

use ark_core::PaymentIntent;
use ark_core::connectors::ConnectorChain;
use ark_core::tree::CongestionTree;

use crate::database::StoredRound;


/// Server-held keys the wallet can derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerRole {
	/// The key participants' forfeits pay out to.
	Forfeit,
	/// The key used to spend sweep closures.
	Sweep,
}

/// A confirmation observed on-chain.
#[derive(Debug, Clone, Copy)]
pub struct TxConfirmation {
	pub txid: Txid,
	pub height: u64,
	/// Unix seconds of the confirming block.
	pub block_time: u64,
}

#[async_trait]
pub trait Wallet: Send + Sync + 'static {
	async fn broadcast(&self, tx: &Transaction) -> anyhow::Result<Txid>;
	async fn estimate_fee_rate(&self) -> anyhow::Result<FeeRate>;
	fn derive_signer(&self, role: SignerRole) -> anyhow::Result<Keypair>;
	/// The tx, if the wallet knows it (mempool or chain).
	async fn get_tx(&self, txid: Txid) -> anyhow::Result<Option<Transaction>>;
	/// Unix block time, if the tx is confirmed.
	async fn get_tx_blocktime(&self, txid: Txid) -> anyhow::Result<Option<u64>>;
}

#[async_trait]
pub trait BlockchainScanner: Send + Sync + 'static {
	/// Watch for the confirmation of the given txid.
	///
	/// The sender side is dropped if the scanner stops watching without
	/// observing a confirmation.
	fn watch_tx(&self, txid: Txid) -> oneshot::Receiver<TxConfirmation>;
	/// The raw tx hex, if the tx is known on-chain.
	async fn get_tx_hex(&self, txid: Txid) -> anyhow::Result<Option<String>>;
}

/// Everything the tx builder produces for one round.
pub struct RoundPackage {
	pub pool_tx: Transaction,
	pub tree: CongestionTree,
	pub connectors: ConnectorChain,
	/// The key the connector outputs were built for.
	pub connector_pubkey: PublicKey,
}

#[async_trait]
pub trait TxBuilder: Send + Sync + 'static {
	/// Build the pool tx, congestion tree and connector chain for a round.
	///
	/// The tree must carry a sweep closure of `lifetime_secs` on its root,
	/// anchor its root in the pool tx's first output, and mint one leaf
	/// per off-chain receiver of `intents`, in intent order. The connector
	/// chain must have one connector per input vtxo, in intent order.
	/// The pool tx pays at least `min_relay_fee` at the given feerate.
	async fn build_pool_tx(
		&self,
		intents: &[PaymentIntent],
		fee_rate: FeeRate,
		min_relay_fee: Amount,
		lifetime_secs: u64,
		exit_delay_secs: u64,
	) -> anyhow::Result<RoundPackage>;

	/// Build the tx spending the given expired tree outputs through their
	/// sweep closures back to the server.
	fn build_sweep_tx(
		&self,
		round: &StoredRound,
		inputs: &[(OutPoint, TxOut)],
	) -> anyhow::Result<Transaction>;
}

/// The chain-facing adapters handed to the server at startup.
pub struct Adapters {
	pub wallet: std::sync::Arc<dyn Wallet>,
	pub scanner: std::sync::Arc<dyn BlockchainScanner>,
	pub tx_builder: std::sync::Arc<dyn TxBuilder>,
}
