
use std::fmt;

use bitcoin::Txid;
use bitcoin::secp256k1::PublicKey;

use crate::connectors::ConnectorChain;
use crate::tree::CongestionTree;


/// Sequence number identifying a round.
pub type RoundSeq = u64;

/// Why a round ended without committing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum RoundFailureReason {
	/// The registration window closed without any intents.
	NoIntents,
	/// An input vtxo was no longer spendable at reservation time.
	InputConflict,
	/// The tx builder failed to produce the pool tx or tree.
	BuildError,
	/// Not every reserved input had a valid forfeit at the deadline.
	IncompleteForfeits,
	/// The wallet failed to broadcast the pool tx.
	BroadcastError,
	/// The pool tx did not confirm nor show up in the mempool in time.
	ConfirmationTimeout,
}

impl fmt::Display for RoundFailureReason {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let s = match self {
			Self::NoIntents => "no-intents",
			Self::InputConflict => "input-conflict",
			Self::BuildError => "build-error",
			Self::IncompleteForfeits => "incomplete-forfeits",
			Self::BroadcastError => "broadcast-error",
			Self::ConfirmationTimeout => "confirmation-timeout",
		};
		f.write_str(s)
	}
}

/// Events published to all round subscribers.
#[derive(Debug, Clone)]
pub enum RoundEvent {
	Started {
		round_seq: RoundSeq,
	},
	Published {
		round_seq: RoundSeq,
		pool_txid: Txid,
		tree: CongestionTree,
		connectors: ConnectorChain,
		/// The key the connector outputs pay to; forfeit sighashes
		/// commit to it.
		connector_pubkey: PublicKey,
	},
	Finalized {
		round_seq: RoundSeq,
		pool_txid: Txid,
	},
	Failed {
		round_seq: RoundSeq,
		reason: RoundFailureReason,
	},
}

/// A more concise way to display [RoundEvent].
impl fmt::Display for RoundEvent {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Started { round_seq } => {
				f.debug_struct("Started")
					.field("round_seq", round_seq)
					.finish()
			},
			Self::Published { round_seq, pool_txid, tree, .. } => {
				f.debug_struct("Published")
					.field("round_seq", round_seq)
					.field("pool_txid", pool_txid)
					.field("nb_leaves", &tree.nb_leaves())
					.finish()
			},
			Self::Finalized { round_seq, pool_txid } => {
				f.debug_struct("Finalized")
					.field("round_seq", round_seq)
					.field("pool_txid", pool_txid)
					.finish()
			},
			Self::Failed { round_seq, reason } => {
				f.debug_struct("Failed")
					.field("round_seq", round_seq)
					.field("reason", &reason.to_string())
					.finish()
			},
		}
	}
}

/// The two internal stages a round passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum StageKind {
	Registration,
	Finalization,
}

/// Stage of a round's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoundStage {
	pub kind: StageKind,
	pub ended: bool,
	pub failed: Option<RoundFailureReason>,
}

impl RoundStage {
	pub fn registration() -> RoundStage {
		RoundStage { kind: StageKind::Registration, ended: false, failed: None }
	}

	pub fn finalization() -> RoundStage {
		RoundStage { kind: StageKind::Finalization, ended: false, failed: None }
	}

	pub fn finalized() -> RoundStage {
		RoundStage { kind: StageKind::Finalization, ended: true, failed: None }
	}

	pub fn failed(self, reason: RoundFailureReason) -> RoundStage {
		RoundStage { failed: Some(reason), ..self }
	}

	/// The stage code as visible on the wire.
	pub fn code(&self) -> RoundStageCode {
		if self.failed.is_some() {
			return RoundStageCode::Failed;
		}
		match self.kind {
			StageKind::Registration => RoundStageCode::Registration,
			StageKind::Finalization => {
				if self.ended {
					RoundStageCode::Finalized
				} else {
					RoundStageCode::Finalization
				}
			},
		}
	}
}

/// Externally visible round stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum RoundStageCode {
	Unspecified,
	Registration,
	Finalization,
	Finalized,
	Failed,
}

/// An immutable published view of a round.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoundSnapshot {
	pub round_seq: RoundSeq,
	pub stage: RoundStage,
	/// Unix seconds at which the round opened registration.
	pub started_at: u64,
	pub pool_txid: Option<Txid>,
	pub nb_intents: usize,
}
