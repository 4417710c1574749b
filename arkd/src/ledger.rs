//!
//! The vtxo ledger: the authoritative in-memory state of which vtxos are
//! spendable, reserved by a round, consumed or swept.
//!
//! This is the only mutable store shared across tasks; every operation is
//! atomic with respect to all others and the lock is never held across an
//! await point.
//!

use std::collections::HashMap;
use std::sync::Mutex;

use bitcoin::Amount;
use bitcoin::secp256k1::PublicKey;

use ark_core::{Vtxo, VtxoId};
use ark_core::rounds::RoundSeq;


/// The lifecycle state of a vtxo. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum VtxoState {
	/// Spendable in a future round.
	Spendable,
	/// Reserved as input by an in-flight round.
	Spent { round_seq: RoundSeq },
	/// Consumed by a confirmed round.
	Consumed,
	/// Reclaimed on-chain by the server after expiry.
	Swept,
}

#[derive(Debug)]
struct Entry {
	vtxo: Vtxo,
	state: VtxoState,
}

#[derive(Debug)]
pub struct VtxoLedger {
	inner: Mutex<HashMap<VtxoId, Entry>>,
}

impl VtxoLedger {
	pub fn new() -> VtxoLedger {
		VtxoLedger {
			inner: Mutex::new(HashMap::new()),
		}
	}

	/// Insert new spendable vtxos. Existing entries are left untouched.
	pub fn insert_spendable(&self, vtxos: impl IntoIterator<Item = Vtxo>) {
		let mut inner = self.inner.lock().unwrap();
		for vtxo in vtxos {
			inner.entry(vtxo.id).or_insert(Entry {
				vtxo,
				state: VtxoState::Spendable,
			});
		}
	}

	pub fn get(&self, id: VtxoId) -> Option<Vtxo> {
		self.inner.lock().unwrap().get(&id).map(|e| e.vtxo.clone())
	}

	pub fn state(&self, id: VtxoId) -> Option<VtxoState> {
		self.inner.lock().unwrap().get(&id).map(|e| e.state)
	}

	/// All spendable vtxos owned by the given pubkey.
	pub fn spendable(&self, owner: PublicKey) -> Vec<Vtxo> {
		self.inner.lock().unwrap().values()
			.filter(|e| e.state == VtxoState::Spendable && e.vtxo.owner == owner)
			.map(|e| e.vtxo.clone())
			.collect()
	}

	/// Atomically move all given vtxos from spendable to spent under the
	/// given round.
	///
	/// On the first vtxo that is unknown or not spendable, the partial
	/// reservation is undone and the offending id returned. On success the
	/// reserved vtxo records are returned in the order of `ids`.
	pub fn reserve(&self, ids: &[VtxoId], round_seq: RoundSeq) -> Result<Vec<Vtxo>, VtxoId> {
		let mut inner = self.inner.lock().unwrap();
		let mut done = Vec::with_capacity(ids.len());
		let mut ret = Vec::with_capacity(ids.len());
		for id in ids {
			let conflict = match inner.get_mut(id) {
				Some(e) if e.state == VtxoState::Spendable => {
					e.state = VtxoState::Spent { round_seq };
					done.push(*id);
					ret.push(e.vtxo.clone());
					continue;
				},
				_ => *id,
			};
			for undo in &done {
				inner.get_mut(undo).unwrap().state = VtxoState::Spendable;
			}
			return Err(conflict);
		}
		Ok(ret)
	}

	/// Atomically mark the round's reservations consumed and insert the
	/// newly minted vtxos as spendable.
	///
	/// Every id in `spent` must currently be spent under `round_seq`.
	pub fn commit(&self, round_seq: RoundSeq, spent: &[VtxoId], new: Vec<Vtxo>) {
		let mut inner = self.inner.lock().unwrap();
		for id in spent {
			let entry = inner.get_mut(id).expect("committing unknown vtxo");
			assert_eq!(entry.state, VtxoState::Spent { round_seq },
				"committing vtxo {} not reserved by round {}", id, round_seq,
			);
			entry.state = VtxoState::Consumed;
		}
		for vtxo in new {
			inner.entry(vtxo.id).or_insert(Entry {
				vtxo,
				state: VtxoState::Spendable,
			});
		}
	}

	/// Atomically restore all vtxos spent under the given round back to
	/// spendable. A no-op for rounds without reservations.
	pub fn rollback(&self, round_seq: RoundSeq) {
		let mut inner = self.inner.lock().unwrap();
		for entry in inner.values_mut() {
			if entry.state == (VtxoState::Spent { round_seq }) {
				entry.state = VtxoState::Spendable;
			}
		}
	}

	/// Mark expired vtxos as swept. Only spendable vtxos transition;
	/// the ids actually swept are returned.
	pub fn sweep(&self, ids: &[VtxoId]) -> Vec<VtxoId> {
		let mut inner = self.inner.lock().unwrap();
		let mut ret = Vec::new();
		for id in ids {
			if let Some(e) = inner.get_mut(id) {
				if e.state == VtxoState::Spendable {
					e.state = VtxoState::Swept;
					ret.push(*id);
				}
			}
		}
		ret
	}

	/// The sum of all spendable vtxo amounts.
	pub fn total_spendable(&self) -> Amount {
		self.inner.lock().unwrap().values()
			.filter(|e| e.state == VtxoState::Spendable)
			.map(|e| e.vtxo.amount)
			.sum()
	}
}
