
use bitcoin::Txid;

use ark_core::rounds::RoundSeq;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepScheduled {
	pub round_seq: RoundSeq,
	/// Unix seconds at which the sweep job fires.
	pub at: u64,
}
impl_slog!(SweepScheduled, Debug, "Scheduled a sweep job for an expiring tree");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepingRound {
	pub round_seq: RoundSeq,
	pub nb_sweep_outputs: usize,
}
impl_slog!(SweepingRound, Info, "Sweeping the expired remainder of a round's tree");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundFullySpent {
	pub round_seq: RoundSeq,
}
impl_slog!(RoundFullySpent, Debug, "Expired tree fully on-chain, nothing left to sweep");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepBroadcast {
	pub round_seq: RoundSeq,
	pub txid: Txid,
}
impl_slog!(SweepBroadcast, Info, "Broadcasted a sweep transaction");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweptVtxos {
	pub round_seq: RoundSeq,
	pub nb_vtxos: usize,
}
impl_slog!(SweptVtxos, Info, "Marked expired vtxos as swept");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepError {
	pub round_seq: RoundSeq,
	pub error: String,
}
impl_slog!(SweepError, Error, "Error during sweep, leaving for next attempt");
