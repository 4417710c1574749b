//!
//! The payment RPC surface, shape only; transports live outside this
//! crate and call into these handlers.
//!

use std::str::FromStr;

use bitcoin::Amount;
use bitcoin::secp256k1::schnorr;
use tokio::sync::{broadcast, oneshot};

use ark_core::{ArkAddress, Destination, IntentId, PaymentIntent, Receiver, VtxoId};
use ark_core::rounds::{RoundEvent, RoundSeq, RoundSnapshot};

use crate::Server;
use crate::error::RequestErrorExt;
use crate::round::RoundInput;


/// A requested output as it arrives on the wire.
#[derive(Debug, Clone)]
pub struct Output {
	pub address: String,
	pub amount: Amount,
}

impl Server {
	/// Register a payment into the current round window.
	///
	/// Outputs whose address decodes as an Ark address become off-chain
	/// receivers; anything else is treated as a raw on-chain address.
	pub fn register_payment(
		&self,
		inputs: Vec<VtxoId>,
		outputs: Vec<Output>,
		submitter: &str,
	) -> anyhow::Result<IntentId> {
		if inputs.is_empty() {
			return invalid_request!("missing inputs");
		}
		if outputs.is_empty() {
			return invalid_request!("missing outputs");
		}
		let owner = ArkAddress::from_str(submitter)
			.invalid_request("invalid submitter address")?
			.user_pubkey();

		let mut receivers = Vec::with_capacity(outputs.len());
		for out in outputs {
			if out.address.is_empty() {
				return invalid_request!("missing output address");
			}
			if out.amount == Amount::ZERO {
				return invalid_request!("missing output amount");
			}
			let destination = match ArkAddress::from_str(&out.address) {
				Ok(addr) => Destination::Pubkey(addr.user_pubkey()),
				Err(_) => Destination::Onchain(out.address),
			};
			receivers.push(Receiver { destination, amount: out.amount });
		}

		self.aggregator.register(PaymentIntent::new(owner, inputs, receivers))
	}

	/// Submit the forfeit signatures finishing a registered payment.
	pub async fn claim_payment(
		&self,
		intent: IntentId,
		signatures: Vec<(VtxoId, schnorr::Signature)>,
	) -> anyhow::Result<()> {
		if signatures.is_empty() {
			return invalid_request!("missing forfeit signatures");
		}

		let (tx, rx) = oneshot::channel();
		self.rounds().round_input_tx
			.send((RoundInput::ForfeitSignatures { intent, signatures }, tx))
			.map_err(|_| anyhow!("round coordinator not running"))?;

		// The round replies with an error, or just drops the sender on
		// success.
		match rx.await {
			Ok(e) => Err(e),
			Err(_) => Ok(()),
		}
	}

	/// The latest published snapshot of the given round.
	pub fn get_round(&self, round_seq: RoundSeq) -> anyhow::Result<RoundSnapshot> {
		match self.registry.get(round_seq) {
			Some(snapshot) => Ok(snapshot),
			None => not_found!([round_seq], "unknown round {}", round_seq),
		}
	}

	/// Subscribe to the round event stream.
	pub fn subscribe_events(&self) -> broadcast::Receiver<RoundEvent> {
		self.rounds().round_event_tx.subscribe()
	}

	/// Start a round on the next free slot, without waiting for the tick.
	pub fn trigger_round(&self) {
		let _ = self.rounds().round_trigger_tx.try_send(());
	}
}
