//!
//! Shutdown coordination.
//!
//! One [Shutdown] handle is shared by the coordinator, the scheduler and
//! every scheduled job. Each long-running task holds a guard; beginning
//! shutdown wakes all signal listeners and [Shutdown::drained] resolves
//! once the last guard is gone. This gives the drain order the server
//! promises: stop feeding work, let the in-flight round reach a terminal
//! state, then release resources.
//!

use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::{TaskTracker, TaskTrackerToken};


/// Shared handle coordinating shutdown across the server's tasks.
#[derive(Debug, Clone)]
pub struct Shutdown {
	token: CancellationToken,
	tracker: TaskTracker,
}

impl Shutdown {
	pub fn new() -> Shutdown {
		Shutdown {
			token: CancellationToken::new(),
			tracker: TaskTracker::new(),
		}
	}

	/// Register a long-running task. Drop the guard when the task ends.
	pub fn guard(&self, name: &'static str) -> TaskGuard {
		slog!(WorkerStarted, name: name.into());
		TaskGuard {
			shutdown: self.clone(),
			name,
			critical: false,
			_token: self.tracker.token(),
		}
	}

	/// Like [Shutdown::guard], but the task ending on its own begins
	/// shutdown: the server cannot operate without it.
	pub fn critical_guard(&self, name: &'static str) -> TaskGuard {
		slog!(WorkerStarted, name: name.into());
		TaskGuard {
			shutdown: self.clone(),
			name,
			critical: true,
			_token: self.tracker.token(),
		}
	}

	/// Begin shutdown.
	pub fn begin(&self) {
		self.token.cancel();
		self.tracker.close();
	}

	pub fn begun(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Resolves when shutdown begins.
	pub fn signal(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
		self.token.cancelled()
	}

	/// Resolves once every guarded task has finished.
	pub async fn drained(&self) {
		self.tracker.close();
		self.tracker.wait().await;
	}
}

/// Registration of one task with the [Shutdown] handle.
pub struct TaskGuard {
	shutdown: Shutdown,
	name: &'static str,
	critical: bool,
	_token: TaskTrackerToken,
}

impl Drop for TaskGuard {
	fn drop(&mut self) {
		if self.critical && !self.shutdown.begun() {
			slog!(CriticalWorkerStopped, name: self.name.into());
			self.shutdown.begin();
		} else {
			slog!(WorkerStopped, name: self.name.into());
		}
	}
}
