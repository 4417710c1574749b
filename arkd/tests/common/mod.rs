//!
//! In-memory chain doubles for driving the coordinator end to end.
//!

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use bitcoin::{
	Amount, FeeRate, OutPoint, Psbt, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
	Witness,
};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{rand, schnorr, Keypair, PublicKey, Secp256k1};
use bitcoin::sighash::TapSighashType;
use bitcoin::taproot::{self, LeafVersion, TaprootBuilder};
use tokio::sync::oneshot;

use ark_core::{PaymentIntent, Vtxo};
use ark_core::connectors::ConnectorChain;
use ark_core::tree::{CongestionTree, CsvSigClosure, Node};
use ark_core::vtxo::exit_spk;

use arkd::adapters::{
	Adapters, BlockchainScanner, RoundPackage, SignerRole, TxBuilder, TxConfirmation, Wallet,
};
use arkd::database::StoredRound;

lazy_static::lazy_static! {
	pub static ref SECP: Secp256k1<bitcoin::secp256k1::All> = Secp256k1::new();

	pub static ref TEST_SIG: schnorr::Signature = schnorr::Signature::from_str(
		"d1c14325e2fe4c44466be57376c4ea093e2d6524503d13be7511e57ec29e13508b507db59dfa9aede12e3e20d120013c268c3af0c7776e0e1e326ae6c9bbc171"
	).unwrap();
}

pub fn keypair() -> Keypair {
	Keypair::new(&SECP, &mut rand::thread_rng())
}

pub fn txid(byte: u8) -> Txid {
	Txid::from_slice(&[byte; 32]).unwrap()
}

pub fn test_vtxo(owner: PublicKey, n: u8, amount: u64) -> Vtxo {
	Vtxo {
		id: OutPoint::new(txid(n), 0).into(),
		owner,
		amount: Amount::from_sat(amount),
		pool_txid: txid(0xee),
		expiry_secs: 604672,
	}
}

#[derive(Default)]
struct MockWalletState {
	broadcast: Vec<Transaction>,
	blocktimes: HashMap<Txid, u64>,
}

pub struct MockWallet {
	forfeit_key: Keypair,
	sweep_key: Keypair,
	/// Whether broadcast txs show up in getters, simulating mempool
	/// visibility.
	pub mempool_visible: bool,
	/// Whether broadcasting fails outright.
	pub broadcast_fails: bool,
	/// Whether fee estimation fails, forcing the fallback feerate.
	pub fee_estimation_fails: bool,
	state: Mutex<MockWalletState>,
}

impl MockWallet {
	pub fn new() -> MockWallet {
		MockWallet {
			forfeit_key: keypair(),
			sweep_key: keypair(),
			mempool_visible: true,
			broadcast_fails: false,
			fee_estimation_fails: false,
			state: Mutex::new(MockWalletState::default()),
		}
	}

	pub fn broadcast_txids(&self) -> Vec<Txid> {
		self.state.lock().unwrap().broadcast.iter().map(|tx| tx.compute_txid()).collect()
	}
}

#[async_trait::async_trait]
impl Wallet for MockWallet {
	async fn broadcast(&self, tx: &Transaction) -> anyhow::Result<Txid> {
		if self.broadcast_fails {
			anyhow::bail!("wallet rejected the tx");
		}
		self.state.lock().unwrap().broadcast.push(tx.clone());
		Ok(tx.compute_txid())
	}

	async fn estimate_fee_rate(&self) -> anyhow::Result<FeeRate> {
		if self.fee_estimation_fails {
			anyhow::bail!("fee endpoint returned non-200");
		}
		Ok(FeeRate::from_sat_per_vb_unchecked(10))
	}

	fn derive_signer(&self, role: SignerRole) -> anyhow::Result<Keypair> {
		Ok(match role {
			SignerRole::Forfeit => self.forfeit_key,
			SignerRole::Sweep => self.sweep_key,
		})
	}

	async fn get_tx(&self, wanted: Txid) -> anyhow::Result<Option<Transaction>> {
		if !self.mempool_visible {
			return Ok(None);
		}
		let state = self.state.lock().unwrap();
		Ok(state.broadcast.iter().find(|tx| tx.compute_txid() == wanted).cloned())
	}

	async fn get_tx_blocktime(&self, wanted: Txid) -> anyhow::Result<Option<u64>> {
		Ok(self.state.lock().unwrap().blocktimes.get(&wanted).copied())
	}
}

#[derive(Default)]
struct MockScannerState {
	confirmed: HashMap<Txid, TxConfirmation>,
	watchers: HashMap<Txid, Vec<oneshot::Sender<TxConfirmation>>>,
	onchain: HashMap<Txid, String>,
}

#[derive(Default)]
pub struct MockScanner {
	state: Mutex<MockScannerState>,
}

impl MockScanner {
	pub fn new() -> MockScanner {
		MockScanner::default()
	}

	/// Mark a tx confirmed, waking any watcher.
	pub fn confirm(&self, txid: Txid, height: u64, block_time: u64) {
		let mut state = self.state.lock().unwrap();
		let conf = TxConfirmation { txid, height, block_time };
		state.confirmed.insert(txid, conf);
		state.onchain.insert(txid, "00".into());
		for tx in state.watchers.remove(&txid).unwrap_or_default() {
			let _ = tx.send(conf);
		}
	}

	/// Mark a tx as present on-chain without an active confirmation watch.
	pub fn set_onchain(&self, txid: Txid) {
		self.state.lock().unwrap().onchain.insert(txid, "00".into());
	}
}

#[async_trait::async_trait]
impl BlockchainScanner for MockScanner {
	fn watch_tx(&self, txid: Txid) -> oneshot::Receiver<TxConfirmation> {
		let (tx, rx) = oneshot::channel();
		let mut state = self.state.lock().unwrap();
		if let Some(conf) = state.confirmed.get(&txid) {
			let _ = tx.send(*conf);
		} else {
			state.watchers.entry(txid).or_default().push(tx);
		}
		rx
	}

	async fn get_tx_hex(&self, txid: Txid) -> anyhow::Result<Option<String>> {
		Ok(self.state.lock().unwrap().onchain.get(&txid).cloned())
	}
}

fn signed_node_psbt(tx: Transaction) -> Psbt {
	let mut psbt = Psbt::from_unsigned_tx(tx).unwrap();
	psbt.inputs[0].tap_key_sig = Some(taproot::Signature {
		signature: *TEST_SIG,
		sighash_type: TapSighashType::Default,
	});
	psbt
}

/// Builds a two-level tree: a root spending the pool tx's first output
/// and one leaf per off-chain receiver, each spending its own root
/// output. Leaves carry the receiver's vtxo output at vout 0.
pub struct MockTxBuilder {
	asp_pubkey: PublicKey,
	sweep_pubkey: PublicKey,
	connector_key: Keypair,
	/// Built to fail, simulating a builder error.
	pub build_fails: bool,
	sweep_txs: Mutex<Vec<Transaction>>,
}

impl MockTxBuilder {
	pub fn new(asp_pubkey: PublicKey, sweep_pubkey: PublicKey) -> MockTxBuilder {
		MockTxBuilder {
			asp_pubkey,
			sweep_pubkey,
			connector_key: keypair(),
			build_fails: false,
			sweep_txs: Mutex::new(Vec::new()),
		}
	}

	pub fn nb_sweep_txs(&self) -> usize {
		self.sweep_txs.lock().unwrap().len()
	}
}

fn node_tx(prev: OutPoint, outputs: Vec<TxOut>) -> Transaction {
	Transaction {
		version: bitcoin::transaction::Version(3),
		lock_time: bitcoin::absolute::LockTime::ZERO,
		input: vec![TxIn {
			previous_output: prev,
			sequence: Sequence::MAX,
			script_sig: ScriptBuf::new(),
			witness: Witness::new(),
		}],
		output: outputs,
	}
}

#[async_trait::async_trait]
impl TxBuilder for MockTxBuilder {
	async fn build_pool_tx(
		&self,
		intents: &[PaymentIntent],
		_fee_rate: FeeRate,
		_min_relay_fee: Amount,
		lifetime_secs: u64,
		exit_delay_secs: u64,
	) -> anyhow::Result<RoundPackage> {
		if self.build_fails {
			anyhow::bail!("no spendable utxos for the pool tx");
		}

		let receivers = intents.iter()
			.flat_map(|i| i.offchain_receivers())
			.collect::<Vec<_>>();
		let nb_inputs = intents.iter().map(|i| i.inputs.len()).sum::<usize>();

		let sweep = CsvSigClosure {
			pubkey: self.sweep_pubkey.x_only_public_key().0,
			seconds: lifetime_secs,
		}.encode();
		let taproot = TaprootBuilder::new()
			.add_leaf(0, sweep.clone()).unwrap()
			.finalize(&SECP, self.sweep_pubkey.x_only_public_key().0).unwrap();

		let tree_value = receivers.iter().map(|r| r.amount).sum::<Amount>();
		let mut pool_outputs = vec![
			TxOut {
				value: tree_value,
				script_pubkey: ScriptBuf::new_p2tr_tweaked(taproot.output_key()),
			},
			ConnectorChain::output(nb_inputs, self.connector_key.public_key()),
		];
		for intent in intents {
			for receiver in intent.receivers.iter().filter(|r| !r.is_offchain()) {
				pool_outputs.push(TxOut {
					value: receiver.amount,
					// a fixed placeholder spk for raw on-chain addresses
					script_pubkey: ScriptBuf::new_p2tr(
						&SECP, self.asp_pubkey.x_only_public_key().0, None,
					),
				});
			}
		}
		let pool_tx = node_tx(OutPoint::new(txid(0xf0), 0), pool_outputs);
		let pool_txid = pool_tx.compute_txid();

		let root_tx = node_tx(
			OutPoint::new(pool_txid, 0),
			receivers.iter().map(|r| TxOut {
				value: r.amount,
				script_pubkey: ScriptBuf::new_p2tr_tweaked(taproot.output_key()),
			}).collect(),
		);
		let root_txid = root_tx.compute_txid();
		let mut root_psbt = signed_node_psbt(root_tx);
		let cb = taproot.control_block(&(sweep.clone(), LeafVersion::TapScript)).unwrap();
		root_psbt.inputs[0].tap_scripts.insert(cb, (sweep, LeafVersion::TapScript));

		let mut nodes = vec![Node {
			txid: root_txid,
			parent_txid: None,
			tx: root_psbt,
			is_leaf: false,
		}];
		for (i, receiver) in receivers.iter().enumerate() {
			let leaf_tx = node_tx(
				OutPoint::new(root_txid, i as u32),
				vec![TxOut {
					value: receiver.amount,
					script_pubkey: exit_spk(
						receiver.pubkey().unwrap(),
						self.asp_pubkey,
						exit_delay_secs as u32,
					),
				}],
			);
			nodes.push(Node {
				txid: leaf_tx.compute_txid(),
				parent_txid: Some(root_txid),
				tx: signed_node_psbt(leaf_tx),
				is_leaf: true,
			});
		}

		Ok(RoundPackage {
			pool_tx,
			tree: CongestionTree::new(nodes)?,
			connectors: ConnectorChain::new(
				nb_inputs,
				OutPoint::new(pool_txid, 1),
				self.connector_key.public_key(),
			),
			connector_pubkey: self.connector_key.public_key(),
		})
	}

	fn build_sweep_tx(
		&self,
		_round: &StoredRound,
		inputs: &[(OutPoint, TxOut)],
	) -> anyhow::Result<Transaction> {
		let total = inputs.iter().map(|(_, utxo)| utxo.value).sum::<Amount>();
		let tx = Transaction {
			version: bitcoin::transaction::Version(3),
			lock_time: bitcoin::absolute::LockTime::ZERO,
			input: inputs.iter().map(|(point, _)| TxIn {
				previous_output: *point,
				sequence: Sequence::from_consensus(0),
				script_sig: ScriptBuf::new(),
				witness: Witness::new(),
			}).collect(),
			output: vec![TxOut {
				value: total,
				script_pubkey: ScriptBuf::new_p2tr(
					&SECP, self.sweep_pubkey.x_only_public_key().0, None,
				),
			}],
		};
		self.sweep_txs.lock().unwrap().push(tx.clone());
		Ok(tx)
	}
}

/// The full set of doubles wired into a server.
pub struct TestRig {
	pub wallet: Arc<MockWallet>,
	pub scanner: Arc<MockScanner>,
	pub tx_builder: Arc<MockTxBuilder>,
}

impl TestRig {
	pub fn new() -> TestRig {
		Self::with_wallet(MockWallet::new())
	}

	pub fn with_wallet(wallet: MockWallet) -> TestRig {
		let asp_pubkey = wallet.forfeit_key.public_key();
		let sweep_pubkey = wallet.sweep_key.public_key();
		TestRig {
			wallet: Arc::new(wallet),
			scanner: Arc::new(MockScanner::new()),
			tx_builder: Arc::new(MockTxBuilder::new(asp_pubkey, sweep_pubkey)),
		}
	}

	pub fn with_builder(wallet: MockWallet, f: impl FnOnce(&mut MockTxBuilder)) -> TestRig {
		let asp_pubkey = wallet.forfeit_key.public_key();
		let sweep_pubkey = wallet.sweep_key.public_key();
		let mut builder = MockTxBuilder::new(asp_pubkey, sweep_pubkey);
		f(&mut builder);
		TestRig {
			wallet: Arc::new(wallet),
			scanner: Arc::new(MockScanner::new()),
			tx_builder: Arc::new(builder),
		}
	}

	pub fn adapters(&self) -> Adapters {
		Adapters {
			wallet: self.wallet.clone(),
			scanner: self.scanner.clone(),
			tx_builder: self.tx_builder.clone(),
		}
	}
}
