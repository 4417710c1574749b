//!
//! Persistence contracts and the in-memory reference store.
//!
//! The append-only event log is the system of record: one stream per
//! round plus a global round index. The round and vtxo stores are
//! materialized views that can be rebuilt from it. Real storage engines
//! live outside this crate; they implement [Repo] and are selected by the
//! `db_type` config tag.
//!

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use bitcoin::Transaction;
use bitcoin::secp256k1::{schnorr, PublicKey};

use ark_core::{Vtxo, VtxoId};
use ark_core::connectors::ConnectorChain;
use ark_core::rounds::{RoundFailureReason, RoundSeq};
use ark_core::tree::CongestionTree;
use ark_core::util::{Decodable, Encodable};

use crate::config::Config;
use crate::ledger::VtxoState;


/// A finalized round as kept in the round store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoredRound {
	pub round_seq: RoundSeq,
	pub pool_tx: Transaction,
	pub tree: CongestionTree,
	pub connectors: ConnectorChain,
	pub connector_pubkey: PublicKey,
	pub lifetime_secs: u64,
	pub exit_delay_secs: u64,
	/// Unix seconds of the pool tx's confirming block.
	pub confirmed_at: u64,
	pub nb_input_vtxos: usize,
}

impl Encodable for StoredRound {}
impl Decodable for StoredRound {}

/// Domain events, the append-only system of record.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum DomainEvent {
	RoundStarted {
		round_seq: RoundSeq,
	},
	RoundPublished {
		round_seq: RoundSeq,
		pool_txid: bitcoin::Txid,
	},
	RoundFinalized {
		round_seq: RoundSeq,
		pool_txid: bitcoin::Txid,
		nb_new_vtxos: usize,
	},
	RoundFailed {
		round_seq: RoundSeq,
		reason: RoundFailureReason,
	},
	VtxosSwept {
		round_seq: RoundSeq,
		vtxos: Vec<VtxoId>,
	},
}

impl Encodable for DomainEvent {}
impl Decodable for DomainEvent {}

/// The mutation bundle of a successful round, committed atomically.
pub struct RoundCommit {
	pub round: StoredRound,
	/// The forfeit signature surrendering each consumed input.
	pub forfeits: Vec<(VtxoId, schnorr::Signature)>,
	pub new_vtxos: Vec<Vtxo>,
}

#[async_trait]
pub trait Repo: Send + Sync + std::fmt::Debug + 'static {
	/// Append an event to the given round's stream.
	async fn append_event(&self, round_seq: RoundSeq, event: &DomainEvent) -> anyhow::Result<()>;

	/// All events of the given round's stream, in append order.
	async fn round_events(&self, round_seq: RoundSeq) -> anyhow::Result<Vec<DomainEvent>>;

	/// The global index of all rounds that ever appended an event.
	async fn round_index(&self) -> anyhow::Result<Vec<RoundSeq>>;

	async fn get_round(&self, round_seq: RoundSeq) -> anyhow::Result<Option<StoredRound>>;

	/// Insert spendable vtxos, ignoring ones already present.
	async fn upsert_vtxos(&self, vtxos: &[Vtxo]) -> anyhow::Result<()>;

	/// All vtxos currently spendable, to seed the ledger at startup.
	async fn spendable_vtxos(&self) -> anyhow::Result<Vec<Vtxo>>;

	async fn mark_swept(&self, vtxos: &[VtxoId]) -> anyhow::Result<()>;

	/// Atomically persist the round-finalization mutation bundle: the
	/// finalized event, the stored round, the consumed inputs with their
	/// forfeits, and the minted vtxos.
	async fn commit_round(&self, commit: &RoundCommit) -> anyhow::Result<()>;
}

/// Select the repo implementation by the `db_type` config tag.
pub fn repo_from_config(cfg: &Config) -> anyhow::Result<Arc<dyn Repo>> {
	match cfg.db_type.as_str() {
		"memory" => Ok(Arc::new(MemoryRepo::new())),
		other => bail!("unsupported db_type: {}", other),
	}
}


#[derive(Debug, Default)]
struct MemoryInner {
	/// Encoded event streams, one per round.
	events: HashMap<RoundSeq, Vec<Vec<u8>>>,
	round_index: Vec<RoundSeq>,
	/// Encoded stored rounds.
	rounds: HashMap<RoundSeq, Vec<u8>>,
	/// Encoded vtxos with their view state and forfeit, if consumed.
	vtxos: HashMap<VtxoId, VtxoRecord>,
}

#[derive(Debug)]
struct VtxoRecord {
	raw: Vec<u8>,
	state: VtxoState,
	forfeit: Option<schnorr::Signature>,
}

/// In-memory [Repo], the reference implementation backing tests and
/// regtest setups.
#[derive(Debug)]
pub struct MemoryRepo {
	inner: Mutex<MemoryInner>,
}

impl MemoryRepo {
	pub fn new() -> MemoryRepo {
		MemoryRepo {
			inner: Mutex::new(MemoryInner::default()),
		}
	}

	fn inner_append(inner: &mut MemoryInner, round_seq: RoundSeq, event: &DomainEvent) {
		if !inner.events.contains_key(&round_seq) {
			inner.round_index.push(round_seq);
		}
		inner.events.entry(round_seq).or_default().push(event.encode());
	}
}

#[async_trait]
impl Repo for MemoryRepo {
	async fn append_event(&self, round_seq: RoundSeq, event: &DomainEvent) -> anyhow::Result<()> {
		let mut inner = self.inner.lock().unwrap();
		Self::inner_append(&mut inner, round_seq, event);
		Ok(())
	}

	async fn round_events(&self, round_seq: RoundSeq) -> anyhow::Result<Vec<DomainEvent>> {
		let inner = self.inner.lock().unwrap();
		inner.events.get(&round_seq).map(|s| s.as_slice()).unwrap_or_default().iter()
			.map(|raw| DomainEvent::decode(raw).context("corrupt event stream"))
			.collect()
	}

	async fn round_index(&self) -> anyhow::Result<Vec<RoundSeq>> {
		Ok(self.inner.lock().unwrap().round_index.clone())
	}

	async fn get_round(&self, round_seq: RoundSeq) -> anyhow::Result<Option<StoredRound>> {
		let inner = self.inner.lock().unwrap();
		inner.rounds.get(&round_seq)
			.map(|raw| StoredRound::decode(raw).context("corrupt round store"))
			.transpose()
	}

	async fn upsert_vtxos(&self, vtxos: &[Vtxo]) -> anyhow::Result<()> {
		let mut inner = self.inner.lock().unwrap();
		for vtxo in vtxos {
			inner.vtxos.entry(vtxo.id).or_insert(VtxoRecord {
				raw: vtxo.encode(),
				state: VtxoState::Spendable,
				forfeit: None,
			});
		}
		Ok(())
	}

	async fn spendable_vtxos(&self) -> anyhow::Result<Vec<Vtxo>> {
		let inner = self.inner.lock().unwrap();
		inner.vtxos.values()
			.filter(|r| r.state == VtxoState::Spendable)
			.map(|r| Vtxo::decode(&r.raw).context("corrupt vtxo store"))
			.collect()
	}

	async fn mark_swept(&self, vtxos: &[VtxoId]) -> anyhow::Result<()> {
		let mut inner = self.inner.lock().unwrap();
		for id in vtxos {
			if let Some(r) = inner.vtxos.get_mut(id) {
				r.state = VtxoState::Swept;
			}
		}
		Ok(())
	}

	async fn commit_round(&self, commit: &RoundCommit) -> anyhow::Result<()> {
		let round_seq = commit.round.round_seq;
		let mut inner = self.inner.lock().unwrap();

		Self::inner_append(&mut inner, round_seq, &DomainEvent::RoundFinalized {
			round_seq,
			pool_txid: commit.round.pool_tx.compute_txid(),
			nb_new_vtxos: commit.new_vtxos.len(),
		});
		inner.rounds.insert(round_seq, commit.round.encode());

		for (id, forfeit) in &commit.forfeits {
			if let Some(r) = inner.vtxos.get_mut(id) {
				r.state = VtxoState::Consumed;
				r.forfeit = Some(*forfeit);
			}
		}
		for vtxo in &commit.new_vtxos {
			inner.vtxos.insert(vtxo.id, VtxoRecord {
				raw: vtxo.encode(),
				state: VtxoState::Spendable,
				forfeit: None,
			});
		}
		Ok(())
	}
}
