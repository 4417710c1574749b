//!
//! Job scheduling: the periodic round tick and one-shot sweep jobs.
//!
//! The capability set is deliberately small so implementations can be
//! swapped by the `scheduler_type` config tag. Jobs scheduled for time
//! `t` fire at or after `t`, never before, and one-shot jobs fire at
//! most once.
//!

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::system::Shutdown;


pub type Job = BoxFuture<'static, ()>;
pub type JobFactory = Box<dyn Fn() -> Job + Send + Sync + 'static>;

pub trait Scheduler: Send + Sync + std::fmt::Debug + 'static {
	/// Run the job once at or after the given wall-clock time.
	fn schedule_once(&self, at: SystemTime, job: Job);
	/// Run a fresh job every interval until the scheduler is stopped.
	fn schedule_every(&self, interval: Duration, make_job: JobFactory);
	/// Cancel all scheduled jobs.
	fn stop(&self);
}

/// Select the scheduler implementation by the `scheduler_type` config tag.
pub fn scheduler_from_config(tag: &str, shutdown: Shutdown) -> anyhow::Result<Arc<dyn Scheduler>> {
	match tag {
		"tokio" => Ok(Arc::new(TokioScheduler::new(shutdown))),
		other => bail!("unsupported scheduler_type: {}", other),
	}
}

/// [Scheduler] running jobs as tokio tasks.
#[derive(Debug)]
pub struct TokioScheduler {
	shutdown: Shutdown,
	stop: CancellationToken,
}

impl TokioScheduler {
	pub fn new(shutdown: Shutdown) -> TokioScheduler {
		TokioScheduler {
			shutdown,
			stop: CancellationToken::new(),
		}
	}
}

impl Scheduler for TokioScheduler {
	fn schedule_once(&self, at: SystemTime, job: Job) {
		let stop = self.stop.clone();
		let guard = self.shutdown.guard("OneShotJob");
		tokio::spawn(async move {
			let _guard = guard;
			// sleeping on the wall-clock distance never fires early
			let delay = at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO);
			tokio::select! {
				() = tokio::time::sleep(delay) => job.await,
				() = stop.cancelled() => {},
			}
		});
	}

	fn schedule_every(&self, interval: Duration, make_job: JobFactory) {
		let stop = self.stop.clone();
		let guard = self.shutdown.guard("PeriodicJob");
		tokio::spawn(async move {
			let _guard = guard;
			loop {
				tokio::select! {
					() = tokio::time::sleep(interval) => make_job().await,
					() = stop.cancelled() => return,
				}
			}
		});
	}

	fn stop(&self) {
		self.stop.cancel();
	}
}
