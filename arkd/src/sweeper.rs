//!
//! Sweeping expired trees.
//!
//! A sweep job fires once a round's lifetime has elapsed since its pool
//! tx confirmed. Whatever part of the tree never made it on-chain is
//! reclaimed in one tx through the root's sweep closure: for every node
//! still off-chain whose funding output sits on a confirmed tx, that
//! output is spendable by the server and covers the node's whole subtree.
//!

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use bitcoin::{OutPoint, Txid};

use ark_core::VtxoId;
use ark_core::rounds::RoundSeq;

use crate::Server;
use crate::database::DomainEvent;


/// Entry point of a scheduled sweep job.
pub async fn sweep_round(srv: Arc<Server>, round_seq: RoundSeq) {
	if let Err(e) = perform_sweep(&srv, round_seq).await {
		slog!(SweepError, round_seq, error: format!("{:?}", e));
	}
}

async fn perform_sweep(srv: &Server, round_seq: RoundSeq) -> anyhow::Result<()> {
	let round = srv.repo.get_round(round_seq).await?
		.with_context(|| format!("sweep fired for unknown round {}", round_seq))?;
	let pool_txid = round.pool_tx.compute_txid();

	// Query each relevant txid once.
	let mut onchain = HashMap::<Txid, bool>::new();
	for txid in round.tree.iter().map(|n| n.txid).chain([pool_txid]) {
		let known = srv.scanner.get_tx_hex(txid).await?.is_some();
		onchain.insert(txid, known);
	}

	// An off-chain node whose funding output is on a confirmed tx marks
	// the frontier: sweeping that output reclaims its whole subtree.
	let mut seen = HashSet::new();
	let mut inputs = Vec::new();
	for node in round.tree.iter() {
		if onchain[&node.txid] {
			continue;
		}
		let prev = node.tx.unsigned_tx.input[0].previous_output;
		if !onchain.get(&prev.txid).copied().unwrap_or(false) {
			continue;
		}
		if !seen.insert(prev) {
			continue;
		}
		let utxo = if prev.txid == pool_txid {
			round.pool_tx.output.get(prev.vout as usize).cloned()
		} else {
			round.tree.get(prev.txid)
				.and_then(|n| n.tx.unsigned_tx.output.get(prev.vout as usize).cloned())
		};
		inputs.push((prev, utxo.context("frontier output missing from tree")?));
	}

	if inputs.is_empty() {
		slog!(RoundFullySpent, round_seq);
	} else {
		slog!(SweepingRound, round_seq, nb_sweep_outputs: inputs.len());
		let tx = srv.tx_builder.build_sweep_tx(&round, &inputs)
			.context("failed to build sweep tx")?;
		let txid = srv.wallet.broadcast(&tx).await.context("failed to broadcast sweep tx")?;
		slog!(SweepBroadcast, round_seq, txid);
	}

	// Leaves that were exited on-chain by their owner are no longer ours
	// to reclaim; the ledger sweep skips everything not spendable anyway.
	let leaf_ids = round.tree.leaves()
		.map(|l| OutPoint::new(l.txid, 0).into())
		.collect::<Vec<VtxoId>>();
	let swept = srv.ledger.sweep(&leaf_ids);
	if !swept.is_empty() {
		srv.repo.mark_swept(&swept).await?;
		srv.repo.append_event(round_seq, &DomainEvent::VtxosSwept {
			round_seq,
			vtxos: swept.clone(),
		}).await?;
	}
	slog!(SweptVtxos, round_seq, nb_vtxos: swept.len());

	Ok(())
}
