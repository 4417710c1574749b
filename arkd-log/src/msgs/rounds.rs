
use std::time::Duration;

use bitcoin::Txid;

use ark_core::{IntentId, VtxoId};
use ark_core::rounds::{RoundFailureReason, RoundSeq};

// ****************************************************************************
// * Registration
// ****************************************************************************

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundStarted {
	pub round_seq: RoundSeq,
}
impl_slog!(RoundStarted, Info, "Round started");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRegistered {
	pub intent: IntentId,
	pub nb_inputs: usize,
	pub nb_receivers: usize,
}
impl_slog!(IntentRegistered, Trace, "Registered a payment intent into the current window");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRegistrationFailed {
	pub error: String,
}
impl_slog!(IntentRegistrationFailed, Trace, "Participant failed to register a payment intent");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentInputAlreadyReserved {
	pub vtxo: VtxoId,
}
impl_slog!(IntentInputAlreadyReserved, Trace, "Input vtxo is already referenced in this window");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoRoundIntents {
	pub round_seq: RoundSeq,
	pub max_registration_time: Duration,
}
impl_slog!(NoRoundIntents, Info, "Nothing to do this round, sitting it out...");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivedRoundIntents {
	pub round_seq: RoundSeq,
	pub nb_intents: usize,
	pub nb_inputs: usize,
	pub nb_receivers: usize,
}
impl_slog!(ReceivedRoundIntents, Info, "Finished collecting round intents");

// ****************************************************************************
// * Finalization
// ****************************************************************************

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundInputConflict {
	pub round_seq: RoundSeq,
	pub vtxo: VtxoId,
}
impl_slog!(RoundInputConflict, Debug, "An input vtxo was no longer spendable at reservation");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstructingCongestionTree {
	pub round_seq: RoundSeq,
	pub nb_leaves: usize,
	pub lifetime_secs: u64,
}
impl_slog!(ConstructingCongestionTree, Debug, "Building the pool tx and congestion tree");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackFeeRate {
	pub error: String,
}
impl_slog!(FallbackFeeRate, Warn, "Wallet fee estimation failed, falling back to the default feerate");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundPublished {
	pub round_seq: RoundSeq,
	pub pool_txid: Txid,
	pub nb_nodes: usize,
	pub nb_connectors: usize,
}
impl_slog!(RoundPublished, Info, "Published the round proposal to participants");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwaitingForfeitSignatures {
	pub round_seq: RoundSeq,
	pub nb_inputs: usize,
	pub max_finalization_time: Duration,
}
impl_slog!(AwaitingForfeitSignatures, Debug, "Waiting for forfeit signatures to be received");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivedForfeitSignatures {
	pub round_seq: RoundSeq,
	pub nb_signatures: usize,
	pub vtxos: Vec<VtxoId>,
}
impl_slog!(ReceivedForfeitSignatures, Trace, "Received forfeit signatures from a participant");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidForfeitSignature {
	pub round_seq: RoundSeq,
	pub vtxo: VtxoId,
	pub error: String,
}
impl_slog!(InvalidForfeitSignature, Trace, "Rejected an invalid forfeit signature");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnknownForfeitSignature {
	pub round_seq: RoundSeq,
	pub vtxo: VtxoId,
}
impl_slog!(UnknownForfeitSignature, Trace, "Received a forfeit signature for a vtxo not in this round");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingForfeits {
	pub round_seq: RoundSeq,
	pub missing: Vec<VtxoId>,
}
impl_slog!(MissingForfeits, Debug, "Forfeit deadline hit with signatures still missing");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastedPoolTx {
	pub round_seq: RoundSeq,
	pub txid: Txid,
}
impl_slog!(BroadcastedPoolTx, Info, "Broadcasted the round's pool transaction");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolTxAwaitingConfirmation {
	pub round_seq: RoundSeq,
	pub txid: Txid,
}
impl_slog!(PoolTxAwaitingConfirmation, Warn,
	"Pool tx still in mempool past the confirmation deadline, waiting indefinitely");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundFinished {
	pub round_seq: RoundSeq,
	pub txid: Txid,
	pub nb_input_vtxos: usize,
	pub nb_new_vtxos: usize,
	pub duration: Duration,
}
impl_slog!(RoundFinished, Info, "Round finished");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundFailed {
	pub round_seq: RoundSeq,
	pub reason: RoundFailureReason,
}
impl_slog!(RoundFailed, Warn, "Round failed, reservations rolled back");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundError {
	pub round_seq: RoundSeq,
	pub error: String,
}
impl_slog!(RoundError, Error, "Recoverable round error, retrying on next tick");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatalStoringRound {
	pub round_seq: RoundSeq,
	pub error: String,
	/// Recovery payload: the broadcast pool tx and everything needed to
	/// replay the commit by hand.
	pub signed_tx: Vec<u8>,
	pub forfeit_vtxos: Vec<VtxoId>,
}
impl_slog!(FatalStoringRound, Error,
	"FATAL: failed to store a round after broadcasting its pool tx; refusing further rounds");
