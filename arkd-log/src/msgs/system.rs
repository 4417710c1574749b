
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStarted {
	pub name: String,
}
impl_slog!(WorkerStarted, Debug, "Worker started");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStopped {
	pub name: String,
}
impl_slog!(WorkerStopped, Debug, "Worker stopped");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalWorkerStopped {
	pub name: String,
}
impl_slog!(CriticalWorkerStopped, Warn, "Critical worker stopped, initiating shutdown");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArkdTerminated {}
impl_slog!(ArkdTerminated, Info, "arkd terminated");
