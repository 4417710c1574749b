//!
//! The round state machine.
//!
//! Each round moves registration -> finalization -> finalized, or fails
//! along the way. The coordinator loop owns the single active round;
//! participants interact through the aggregator (registration) and the
//! round input channel (forfeit signatures). Consumers observe immutable
//! snapshots and the round event stream, never the live state.
//!

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use bitcoin::consensus::encode::serialize;
use bitcoin::{FeeRate, OutPoint, Txid};
use bitcoin::secp256k1::{schnorr, PublicKey};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use ark_core::{forfeit, IntentId, PaymentIntent, Vtxo, VtxoId};
use ark_core::rounds::{
	RoundEvent, RoundFailureReason, RoundSeq, RoundSnapshot, RoundStage,
};

use crate::Server;
use crate::adapters::RoundPackage;
use crate::database::{DomainEvent, RoundCommit, StoredRound};
use crate::error::RequestError;
use crate::sweeper;


/// Feerate used when the wallet cannot provide an estimate.
pub const FALLBACK_FEE_RATE: FeeRate = FeeRate::from_sat_per_vb_unchecked(2);

/// Messages participants send into the active round.
#[derive(Debug)]
pub enum RoundInput {
	ForfeitSignatures {
		intent: IntentId,
		signatures: Vec<(VtxoId, schnorr::Signature)>,
	},
}

pub type RoundInputSender = mpsc::UnboundedSender<(RoundInput, oneshot::Sender<anyhow::Error>)>;
type RoundInputReceiver = mpsc::UnboundedReceiver<(RoundInput, oneshot::Sender<anyhow::Error>)>;

/// Registry of published round snapshots, current and past.
pub struct RoundRegistry {
	rounds: Mutex<HashMap<RoundSeq, RoundSnapshot>>,
}

impl RoundRegistry {
	pub fn new() -> RoundRegistry {
		RoundRegistry {
			rounds: Mutex::new(HashMap::new()),
		}
	}

	fn publish(&self, snapshot: RoundSnapshot) {
		self.rounds.lock().unwrap().insert(snapshot.round_seq, snapshot);
	}

	pub fn get(&self, round_seq: RoundSeq) -> Option<RoundSnapshot> {
		self.rounds.lock().unwrap().get(&round_seq).cloned()
	}
}

/// Per-round bookkeeping needed to publish snapshots and fail cleanly.
struct RoundCtx {
	round_seq: RoundSeq,
	started_at: u64,
	nb_intents: usize,
	pool_txid: Option<Txid>,
}

impl RoundCtx {
	fn publish(&self, srv: &Server, stage: RoundStage) {
		srv.registry.publish(RoundSnapshot {
			round_seq: self.round_seq,
			stage,
			started_at: self.started_at,
			pool_txid: self.pool_txid,
			nb_intents: self.nb_intents,
		});
	}

	/// Fail the round: roll back reservations if asked, notify everyone,
	/// record the failure. Only an event-store write failure is fatal.
	async fn fail(
		&self,
		srv: &Server,
		stage: RoundStage,
		reason: RoundFailureReason,
		rollback: bool,
	) -> RoundResult {
		slog!(RoundFailed, round_seq: self.round_seq, reason);
		if rollback {
			srv.ledger.rollback(self.round_seq);
		}
		let _ = srv.rounds().round_event_tx.send(RoundEvent::Failed {
			round_seq: self.round_seq,
			reason,
		});
		self.publish(srv, stage.failed(reason));
		let res = srv.repo.append_event(self.round_seq, &DomainEvent::RoundFailed {
			round_seq: self.round_seq,
			reason,
		}).await;
		if let Err(e) = res {
			return RoundResult::Fatal(e.context("event store write failed"));
		}
		RoundResult::Failed(reason)
	}
}

/// The finalization-stage state: waiting for one valid forfeit signature
/// per reserved input.
struct CollectingForfeits {
	round_seq: RoundSeq,
	intents: HashMap<IntentId, PaymentIntent>,
	all_inputs: HashMap<VtxoId, Vtxo>,
	connectors_by_input: HashMap<VtxoId, OutPoint>,
	connector_pubkey: PublicKey,
	asp_pubkey: PublicKey,
	exit_delay_secs: u32,
	forfeit_sigs: HashMap<VtxoId, schnorr::Signature>,
	proceed: bool,
}

impl CollectingForfeits {
	fn new(
		round_seq: RoundSeq,
		intents: &[PaymentIntent],
		reserved: Vec<Vtxo>,
		package: &RoundPackage,
		asp_pubkey: PublicKey,
		exit_delay_secs: u32,
	) -> CollectingForfeits {
		// one connector per input, in intent order
		let connectors_by_input = reserved.iter().map(|v| v.id)
			.zip(package.connectors.connectors())
			.collect();
		CollectingForfeits {
			round_seq,
			intents: intents.iter().map(|i| (i.id, i.clone())).collect(),
			all_inputs: reserved.into_iter().map(|v| (v.id, v)).collect(),
			connectors_by_input,
			connector_pubkey: package.connector_pubkey,
			asp_pubkey,
			exit_delay_secs,
			forfeit_sigs: HashMap::new(),
			proceed: false,
		}
	}

	fn register_forfeits(
		&mut self,
		intent: IntentId,
		signatures: Vec<(VtxoId, schnorr::Signature)>,
	) -> anyhow::Result<()> {
		slog!(ReceivedForfeitSignatures, round_seq: self.round_seq,
			nb_signatures: signatures.len(), vtxos: signatures.iter().map(|s| s.0).collect(),
		);

		let inputs = match self.intents.get(&intent) {
			Some(i) => i.inputs.clone(),
			None => return not_found!([intent], "unknown intent {}", intent),
		};

		for (id, sig) in signatures {
			if !inputs.contains(&id) {
				slog!(UnknownForfeitSignature, round_seq: self.round_seq, vtxo: id);
				continue;
			}
			let vtxo = self.all_inputs.get(&id).expect("intent inputs are reserved");
			let connector = *self.connectors_by_input.get(&id).expect("one connector per input");
			let res = forfeit::verify_forfeit_sig(
				vtxo, connector, self.asp_pubkey, self.exit_delay_secs,
				self.connector_pubkey, &sig,
			);
			if let Err(e) = res {
				slog!(InvalidForfeitSignature, round_seq: self.round_seq, vtxo: id,
					error: e.to_string(),
				);
				return invalid_request!("invalid forfeit signature for vtxo {}", id);
			}
			// duplicates silently replace
			self.forfeit_sigs.insert(id, sig);
		}

		if self.forfeit_sigs.len() == self.all_inputs.len() {
			self.proceed = true;
		}
		Ok(())
	}

	fn complete(&self) -> bool {
		self.forfeit_sigs.len() == self.all_inputs.len()
	}

	fn missing(&self) -> Vec<VtxoId> {
		self.all_inputs.keys()
			.filter(|id| !self.forfeit_sigs.contains_key(id))
			.copied()
			.collect()
	}

	fn into_forfeits(self) -> Vec<(VtxoId, schnorr::Signature)> {
		self.forfeit_sigs.into_iter().collect()
	}
}

/// Check the builder's output against what the round needs.
fn validate_round_package(
	package: &RoundPackage,
	nb_inputs: usize,
	nb_leaves: usize,
	lifetime_secs: u64,
) -> anyhow::Result<()> {
	let pool_txid = package.pool_tx.compute_txid();
	let root = package.tree.root();
	let root_input = root.tx.unsigned_tx.input.first()
		.context("tree root has no input")?;
	if root_input.previous_output != OutPoint::new(pool_txid, 0) {
		bail!("tree root does not spend the pool tx");
	}

	let (_, seconds) = package.tree.find_sweep_closure()
		.context("tree root carries no sweep closure")?;
	if seconds != lifetime_secs {
		bail!("sweep closure encodes {}s, configured lifetime is {}s", seconds, lifetime_secs);
	}

	if package.tree.nb_leaves() != nb_leaves {
		bail!("tree has {} leaves for {} off-chain receivers",
			package.tree.nb_leaves(), nb_leaves,
		);
	}
	if package.connectors.len() != nb_inputs {
		bail!("connector chain has {} connectors for {} inputs",
			package.connectors.len(), nb_inputs,
		);
	}
	Ok(())
}

/// The vtxos minted by the round: one per off-chain receiver, in the
/// order the builder laid out the leaves.
fn leaf_vtxos(
	intents: &[PaymentIntent],
	package: &RoundPackage,
	pool_txid: Txid,
	lifetime_secs: u64,
) -> Vec<Vtxo> {
	let receivers = intents.iter().flat_map(|i| i.offchain_receivers());
	package.tree.leaves().zip(receivers).map(|(leaf, receiver)| Vtxo {
		id: OutPoint::new(leaf.txid, 0).into(),
		owner: receiver.pubkey().expect("offchain receiver"),
		amount: receiver.amount,
		pool_txid,
		expiry_secs: lifetime_secs,
	}).collect()
}

enum RoundResult {
	/// Round finished with success.
	Success,
	/// Round failed; reservations are rolled back and the next tick proceeds.
	Failed(RoundFailureReason),
	/// A fatal error we can't recover from. Halt operations.
	Fatal(anyhow::Error),
}

async fn perform_round(
	srv: &Arc<Server>,
	round_input_rx: &mut RoundInputReceiver,
	round_seq: RoundSeq,
) -> RoundResult {
	let attempt_start = Instant::now();
	let started_at = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();

	slog!(RoundStarted, round_seq);
	let _ = srv.rounds().round_event_tx.send(RoundEvent::Started { round_seq });

	let mut ctx = RoundCtx {
		round_seq,
		started_at,
		nb_intents: 0,
		pool_txid: None,
	};
	ctx.publish(srv, RoundStage::registration());
	let res = srv.repo.append_event(round_seq, &DomainEvent::RoundStarted { round_seq }).await;
	if let Err(e) = res {
		return RoundResult::Fatal(e.context("event store write failed"));
	}

	// ****************************************************************
	// * Registration
	// ****************************************************************

	// Intents land in the aggregator window; forfeits can't arrive yet.
	tokio::pin! { let timeout = tokio::time::sleep(srv.config.round_interval); }
	'registration: loop {
		tokio::select! {
			() = &mut timeout => break 'registration,
			input = round_input_rx.recv() => {
				let (_, tx) = input.expect("broken channel");
				let _ = tx.send(RequestError::late(
					"round is still in registration; no forfeit signatures expected yet",
				).into());
			},
		}
	}

	let intents = srv.aggregator.freeze();
	ctx.nb_intents = intents.len();
	if intents.is_empty() {
		slog!(NoRoundIntents, round_seq, max_registration_time: srv.config.round_interval);
		return ctx.fail(srv, RoundStage::registration(), RoundFailureReason::NoIntents, false).await;
	}
	slog!(ReceivedRoundIntents, round_seq,
		nb_intents: intents.len(),
		nb_inputs: intents.iter().map(|i| i.inputs.len()).sum(),
		nb_receivers: intents.iter().map(|i| i.receivers.len()).sum(),
	);

	// ****************************************************************
	// * Reserve
	// ****************************************************************

	let input_ids = intents.iter()
		.flat_map(|i| i.inputs.iter().copied())
		.collect::<Vec<_>>();
	let reserved = match srv.ledger.reserve(&input_ids, round_seq) {
		Ok(vtxos) => vtxos,
		Err(conflict) => {
			slog!(RoundInputConflict, round_seq, vtxo: conflict);
			return ctx.fail(
				srv, RoundStage::registration(), RoundFailureReason::InputConflict, false,
			).await;
		},
	};

	// ****************************************************************
	// * Build the pool tx, tree and connectors
	// ****************************************************************

	let lifetime_secs = srv.config.effective_round_lifetime();
	let exit_delay_secs = srv.config.unilateral_exit_delay_secs;
	let nb_leaves = intents.iter().map(|i| i.offchain_receivers().count()).sum::<usize>();

	let fee_rate = match srv.wallet.estimate_fee_rate().await {
		Ok(f) => f,
		Err(e) => {
			slog!(FallbackFeeRate, error: e.to_string());
			FALLBACK_FEE_RATE
		},
	};

	slog!(ConstructingCongestionTree, round_seq, nb_leaves, lifetime_secs);
	let min_relay_fee = bitcoin::Amount::from_sat(srv.config.min_relay_fee_sats);
	let build = srv.tx_builder
		.build_pool_tx(&intents, fee_rate, min_relay_fee, lifetime_secs, exit_delay_secs).await
		.and_then(|p| {
			validate_round_package(&p, input_ids.len(), nb_leaves, lifetime_secs)?;
			Ok(p)
		});
	let package = match build {
		Ok(p) => p,
		Err(e) => {
			warn!("Tx builder failed for round {}: {:?}", round_seq, e);
			return ctx.fail(
				srv, RoundStage::finalization(), RoundFailureReason::BuildError, true,
			).await;
		},
	};
	let pool_txid = package.pool_tx.compute_txid();
	ctx.pool_txid = Some(pool_txid);

	// ****************************************************************
	// * Publish and gather forfeit signatures
	// ****************************************************************

	let _ = srv.rounds().round_event_tx.send(RoundEvent::Published {
		round_seq,
		pool_txid,
		tree: package.tree.clone(),
		connectors: package.connectors.clone(),
		connector_pubkey: package.connector_pubkey,
	});
	ctx.publish(srv, RoundStage::finalization());
	let res = srv.repo.append_event(round_seq, &DomainEvent::RoundPublished {
		round_seq, pool_txid,
	}).await;
	if let Err(e) = res {
		return RoundResult::Fatal(e.context("event store write failed"));
	}
	slog!(RoundPublished, round_seq, pool_txid,
		nb_nodes: package.tree.nb_nodes(), nb_connectors: package.connectors.len(),
	);

	let mut state = CollectingForfeits::new(
		round_seq, &intents, reserved, &package,
		srv.asp_key.public_key(), exit_delay_secs as u32,
	);
	slog!(AwaitingForfeitSignatures, round_seq, nb_inputs: state.all_inputs.len(),
		max_finalization_time: srv.config.finalization_timeout,
	);

	tokio::pin! { let timeout = tokio::time::sleep(srv.config.finalization_timeout); }
	'receive: loop {
		tokio::select! {
			() = &mut timeout => break 'receive,
			input = round_input_rx.recv() => {
				let (input, tx) = input.expect("broken channel");
				let res = match input {
					RoundInput::ForfeitSignatures { intent, signatures } => {
						state.register_forfeits(intent, signatures)
					},
				};
				if let Err(e) = res {
					let _ = tx.send(e);
					continue 'receive;
				}
				if state.proceed {
					break 'receive;
				}
			},
		}
	}

	if !state.complete() {
		slog!(MissingForfeits, round_seq, missing: state.missing());
		return ctx.fail(
			srv, RoundStage::finalization(), RoundFailureReason::IncompleteForfeits, true,
		).await;
	}

	// ****************************************************************
	// * Broadcast
	// ****************************************************************

	// Transient broadcast errors are not retried inside the round; the
	// inputs are released and the next round may re-include them.
	if let Err(e) = srv.wallet.broadcast(&package.pool_tx).await {
		warn!("Failed to broadcast pool tx {} for round {}: {:?}", pool_txid, round_seq, e);
		return ctx.fail(
			srv, RoundStage::finalization(), RoundFailureReason::BroadcastError, true,
		).await;
	}
	slog!(BroadcastedPoolTx, round_seq, txid: pool_txid);

	// ****************************************************************
	// * Await confirmation
	// ****************************************************************

	let confirmation = {
		let mut conf_rx = srv.scanner.watch_tx(pool_txid);
		tokio::pin! {
			let deadline = tokio::time::sleep(srv.config.confirmation_timeout);
		}
		loop {
			// The round only dies if the pool tx is gone from the mempool
			// too; while it is still there we keep waiting.
			let timed_out = tokio::select! {
				conf = &mut conf_rx => match conf {
					Ok(conf) => break conf,
					// the scanner dropped the watch without a confirmation
					Err(_) => false,
				},
				() = &mut deadline => true,
				input = round_input_rx.recv() => {
					let (_, tx) = input.expect("broken channel");
					let _ = tx.send(RequestError::late(
						"forfeit signatures arrived too late; round is completing",
					).into());
					continue;
				},
			};

			match srv.wallet.get_tx(pool_txid).await {
				Ok(Some(_)) => {
					slog!(PoolTxAwaitingConfirmation, round_seq, txid: pool_txid);
					if !timed_out {
						tokio::time::sleep(Duration::from_secs(1)).await;
					}
					conf_rx = srv.scanner.watch_tx(pool_txid);
					deadline.as_mut().reset(
						tokio::time::Instant::now() + srv.config.confirmation_timeout,
					);
				},
				_ => {
					return ctx.fail(
						srv, RoundStage::finalization(),
						RoundFailureReason::ConfirmationTimeout, true,
					).await;
				},
			}
		}
	};

	// ****************************************************************
	// * Commit
	// ****************************************************************

	let new_vtxos = leaf_vtxos(&intents, &package, pool_txid, lifetime_secs);
	let nb_new_vtxos = new_vtxos.len();
	let stored = StoredRound {
		round_seq,
		pool_tx: package.pool_tx.clone(),
		tree: package.tree.clone(),
		connectors: package.connectors.clone(),
		connector_pubkey: package.connector_pubkey,
		lifetime_secs,
		exit_delay_secs,
		confirmed_at: confirmation.block_time,
		nb_input_vtxos: input_ids.len(),
	};
	let commit = RoundCommit {
		round: stored,
		forfeits: state.into_forfeits(),
		new_vtxos: new_vtxos.clone(),
	};

	if let Err(e) = srv.repo.commit_round(&commit).await {
		// Committing failed after the pool tx went out. The ledger must
		// not move; log everything needed to replay the commit by hand
		// and halt.
		slog!(FatalStoringRound, round_seq, error: format!("{:?}", e),
			signed_tx: serialize(&package.pool_tx), forfeit_vtxos: input_ids,
		);
		return RoundResult::Fatal(e.context("failed to store finished round"));
	}
	srv.ledger.commit(round_seq, &input_ids, new_vtxos);

	let _ = srv.rounds().round_event_tx.send(RoundEvent::Finalized { round_seq, pool_txid });
	ctx.publish(srv, RoundStage::finalized());

	// Schedule the sweep of whatever this tree leaves behind at expiry.
	let sweep_at = confirmation.block_time + lifetime_secs;
	let srv2 = srv.clone();
	srv.scheduler.schedule_once(
		UNIX_EPOCH + Duration::from_secs(sweep_at),
		Box::pin(async move {
			sweeper::sweep_round(srv2, round_seq).await;
		}),
	);
	slog!(SweepScheduled, round_seq, at: sweep_at);

	slog!(RoundFinished, round_seq, txid: pool_txid,
		nb_input_vtxos: commit.forfeits.len(), nb_new_vtxos,
		duration: Instant::now().duration_since(attempt_start),
	);
	RoundResult::Success
}

/// The round coordinator loop; owns the single active round.
///
/// Round ticks arrive on the trigger channel from the scheduler (or the
/// admin trigger); the tick itself never performs round work.
pub async fn run_round_coordinator(
	srv: &Arc<Server>,
	mut round_input_rx: RoundInputReceiver,
	mut round_trigger_rx: mpsc::Receiver<()>,
) -> anyhow::Result<()> {
	let _guard = srv.shutdown.critical_guard("RoundCoordinator");

	loop {
		// Wait for the next tick, answering stray inputs meanwhile.
		'wait: loop {
			tokio::select! {
				Some(()) = round_trigger_rx.recv() => break 'wait,
				input = round_input_rx.recv() => {
					let (_, tx) = input.expect("broken channel");
					let _ = tx.send(RequestError::late(
						"no round in progress; request arrived late",
					).into());
				},
				() = srv.shutdown.signal() => {
					info!("Shutdown signal received. Exiting round coordinator loop...");
					return Ok(());
				},
			}
		}

		let round_seq = (SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis()
			/ srv.config.round_interval.as_millis()) as RoundSeq;

		match perform_round(srv, &mut round_input_rx, round_seq).await {
			RoundResult::Success => {},
			RoundResult::Failed(_) => {},
			RoundResult::Fatal(e) => {
				error!("Fatal round error: {:?}", e);
				srv.shutdown.begin();
				return Err(e);
			},
		}

		// Ticks that queued up while the round ran don't start new rounds.
		while round_trigger_rx.try_recv().is_ok() {}
	}
}
