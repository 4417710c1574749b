//!
//! The round aggregator: collects payment intents into the current
//! window until the round state machine freezes it.
//!
//! Registration validates against the ledger, but the ledger can still
//! change before the round reserves; the reserve step at freeze time is
//! authoritative.
//!

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use bitcoin::Amount;

use ark_core::{IntentId, PaymentIntent, VtxoId};

use crate::ledger::{VtxoLedger, VtxoState};


#[derive(Default)]
struct Window {
	order: Vec<IntentId>,
	intents: HashMap<IntentId, PaymentIntent>,
	/// All input vtxos referenced in this window.
	inputs: HashSet<VtxoId>,
}

pub struct RoundAggregator {
	ledger: Arc<VtxoLedger>,
	window: Mutex<Window>,
}

impl RoundAggregator {
	pub fn new(ledger: Arc<VtxoLedger>) -> RoundAggregator {
		RoundAggregator {
			ledger,
			window: Mutex::new(Window::default()),
		}
	}

	/// Validate and admit an intent into the current window.
	pub fn register(&self, intent: PaymentIntent) -> anyhow::Result<IntentId> {
		if let Err(e) = self.validate(&intent) {
			slog!(IntentRegistrationFailed, error: e.to_string());
			return Err(e);
		}

		let mut window = self.window.lock().unwrap();
		for id in &intent.inputs {
			if window.inputs.contains(id) {
				slog!(IntentInputAlreadyReserved, vtxo: *id);
				return invalid_request!("input {} already reserved in this round", id);
			}
		}

		slog!(IntentRegistered, intent: intent.id,
			nb_inputs: intent.inputs.len(), nb_receivers: intent.receivers.len(),
		);
		let id = intent.id;
		window.inputs.extend(intent.inputs.iter().copied());
		window.order.push(id);
		window.intents.insert(id, intent);
		Ok(id)
	}

	fn validate(&self, intent: &PaymentIntent) -> anyhow::Result<()> {
		if intent.receivers.is_empty() {
			return invalid_request!("missing receivers");
		}
		for receiver in &intent.receivers {
			if receiver.amount == Amount::ZERO {
				return invalid_request!("receiver amount must be positive");
			}
		}

		let mut unique = HashSet::with_capacity(intent.inputs.len());
		let mut in_sum = Amount::ZERO;
		for id in &intent.inputs {
			if !unique.insert(*id) {
				return invalid_request!("duplicate input {}", id);
			}
			let vtxo = match self.ledger.get(*id) {
				Some(v) => v,
				None => return not_found!([*id], "input vtxo {} does not exist", id),
			};
			if self.ledger.state(*id) != Some(VtxoState::Spendable) {
				return invalid_request!("input vtxo {} is not spendable", id);
			}
			if vtxo.owner != intent.owner {
				return invalid_request!("input vtxo {} is not owned by the submitter", id);
			}
			in_sum += vtxo.amount;
		}

		// pure on-chain funded intents carry no off-chain balance to check
		if !intent.inputs.is_empty() && intent.total_output() > in_sum {
			return invalid_request!("total output amount {} exceeds total input amount {}",
				intent.total_output(), in_sum,
			);
		}

		Ok(())
	}

	/// Snapshot the current window in arrival order and atomically replace
	/// it with a fresh empty one.
	pub fn freeze(&self) -> Vec<PaymentIntent> {
		let mut window = self.window.lock().unwrap();
		let Window { order, mut intents, .. } = std::mem::take(&mut *window);
		order.into_iter()
			.map(|id| intents.remove(&id).expect("window invariant"))
			.collect()
	}

	/// Number of intents waiting in the current window.
	pub fn pending(&self) -> usize {
		self.window.lock().unwrap().order.len()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	use bitcoin::{OutPoint, Txid};
	use bitcoin::hashes::Hash;
	use bitcoin::secp256k1::{rand, PublicKey, Secp256k1};

	use ark_core::{Destination, Receiver, Vtxo};

	use crate::error::{request_kind, RequestErrorKind};

	fn pubkey() -> PublicKey {
		Secp256k1::new().generate_keypair(&mut rand::thread_rng()).1
	}

	fn vtxo(owner: PublicKey, n: u8, amount: u64) -> Vtxo {
		Vtxo {
			id: OutPoint::new(Txid::from_slice(&[n; 32]).unwrap(), 0).into(),
			owner,
			amount: Amount::from_sat(amount),
			pool_txid: Txid::from_slice(&[0xcc; 32]).unwrap(),
			expiry_secs: 604672,
		}
	}

	fn receiver(amount: u64) -> Receiver {
		Receiver {
			destination: Destination::Pubkey(pubkey()),
			amount: Amount::from_sat(amount),
		}
	}

	fn setup(owner: PublicKey) -> (Arc<VtxoLedger>, RoundAggregator) {
		let ledger = Arc::new(VtxoLedger::new());
		let aggregator = RoundAggregator::new(ledger.clone());
		ledger.insert_spendable([vtxo(owner, 1, 1000), vtxo(owner, 2, 2000)]);
		(ledger, aggregator)
	}

	#[test]
	fn register_and_freeze() {
		let owner = pubkey();
		let (_, aggregator) = setup(owner);

		let intent = PaymentIntent::new(
			owner, vec![vtxo(owner, 1, 1000).id], vec![receiver(900)],
		);
		aggregator.register(intent.clone()).unwrap();
		assert_eq!(aggregator.pending(), 1);

		let frozen = aggregator.freeze();
		assert_eq!(frozen.len(), 1);
		assert_eq!(frozen[0].id, intent.id);
		// the window is fresh again
		assert_eq!(aggregator.pending(), 0);
		assert!(aggregator.freeze().is_empty());
	}

	#[test]
	fn rejects_input_reuse_within_window() {
		let owner = pubkey();
		let (_, aggregator) = setup(owner);
		let input = vtxo(owner, 1, 1000).id;

		aggregator.register(PaymentIntent::new(owner, vec![input], vec![receiver(500)]))
			.unwrap();
		let err = aggregator
			.register(PaymentIntent::new(owner, vec![input], vec![receiver(400)]))
			.unwrap_err();
		assert_eq!(request_kind(&err), Some(RequestErrorKind::Invalid));
		assert!(err.to_string().contains("already reserved"));
	}

	#[test]
	fn rejects_invalid_intents() {
		let owner = pubkey();
		let (ledger, aggregator) = setup(owner);
		let input = vtxo(owner, 1, 1000).id;

		// unknown input
		let ghost = vtxo(owner, 9, 1).id;
		let err = aggregator
			.register(PaymentIntent::new(owner, vec![ghost], vec![receiver(1)]))
			.unwrap_err();
		assert_eq!(request_kind(&err), Some(RequestErrorKind::NotFound));

		// foreign input
		let thief = pubkey();
		let err = aggregator
			.register(PaymentIntent::new(thief, vec![input], vec![receiver(1)]))
			.unwrap_err();
		assert!(err.to_string().contains("not owned"));

		// output exceeding input
		let err = aggregator
			.register(PaymentIntent::new(owner, vec![input], vec![receiver(1001)]))
			.unwrap_err();
		assert!(err.to_string().contains("exceeds"));

		// zero amount
		let err = aggregator
			.register(PaymentIntent::new(owner, vec![input], vec![receiver(0)]))
			.unwrap_err();
		assert!(err.to_string().contains("positive"));

		// duplicate inputs in one intent
		let err = aggregator
			.register(PaymentIntent::new(owner, vec![input, input], vec![receiver(1)]))
			.unwrap_err();
		assert!(err.to_string().contains("duplicate"));

		// non-spendable input
		ledger.reserve(&[input], 1).unwrap();
		let err = aggregator
			.register(PaymentIntent::new(owner, vec![input], vec![receiver(1)]))
			.unwrap_err();
		assert!(err.to_string().contains("not spendable"));
	}
}
