

#[macro_use] extern crate anyhow;
#[macro_use] extern crate async_trait;
#[macro_use] extern crate log;
#[macro_use] extern crate serde;
#[macro_use] extern crate arkd_log;

#[macro_use]
pub mod error;

pub mod adapters;
pub mod aggregator;
pub mod database;
pub mod ledger;
pub mod round;
pub mod rpc;
pub mod scheduler;
mod serde_util;
pub mod sweeper;
pub mod system;
pub mod config;
pub use crate::config::Config;

use std::sync::Arc;

use anyhow::Context;
use bitcoin::secp256k1::{self, Keypair};
use tokio::sync::{broadcast, mpsc};

use ark_core::Vtxo;
use ark_core::rounds::RoundEvent;

use crate::adapters::{Adapters, BlockchainScanner, SignerRole, TxBuilder, Wallet};
use crate::aggregator::RoundAggregator;
use crate::database::Repo;
use crate::ledger::VtxoLedger;
use crate::round::RoundRegistry;
use crate::scheduler::Scheduler;
use crate::system::Shutdown;

pub struct RoundHandle {
	round_event_tx: broadcast::Sender<RoundEvent>,
	round_input_tx: round::RoundInputSender,
	round_trigger_tx: mpsc::Sender<()>,
}

pub struct Server {
	pub config: Config,
	pub(crate) repo: Arc<dyn Repo>,
	pub(crate) wallet: Arc<dyn Wallet>,
	pub(crate) scanner: Arc<dyn BlockchainScanner>,
	pub(crate) tx_builder: Arc<dyn TxBuilder>,
	pub(crate) scheduler: Arc<dyn Scheduler>,

	pub(crate) ledger: Arc<VtxoLedger>,
	pub(crate) aggregator: RoundAggregator,
	pub(crate) registry: RoundRegistry,
	pub(crate) asp_key: Keypair,

	pub(crate) shutdown: Shutdown,
	rounds: RoundHandle,
}

impl Server {
	/// Start the coordinator.
	///
	/// The repo and scheduler are selected by their config tags; the
	/// chain-facing adapters are handed in by the embedding binary.
	pub async fn start(config: Config, adapters: Adapters) -> anyhow::Result<Arc<Self>> {
		config.validate().context("invalid configuration")?;
		info!("Starting arkd on {} with round interval {:?}",
			config.network, config.round_interval,
		);

		let repo = database::repo_from_config(&config)?;
		let shutdown = Shutdown::new();
		let scheduler = scheduler::scheduler_from_config(&config.scheduler_type, shutdown.clone())?;

		let asp_key = adapters.wallet.derive_signer(SignerRole::Forfeit)
			.context("wallet failed to derive the forfeit signer")?;

		// Seed the ledger from the vtxo store.
		let ledger = Arc::new(VtxoLedger::new());
		ledger.insert_spendable(repo.spendable_vtxos().await?);

		let (round_event_tx, _) = broadcast::channel(256);
		let (round_input_tx, round_input_rx) = mpsc::unbounded_channel();
		let (round_trigger_tx, round_trigger_rx) = mpsc::channel(1);

		let srv = Arc::new(Server {
			aggregator: RoundAggregator::new(ledger.clone()),
			registry: RoundRegistry::new(),
			rounds: RoundHandle { round_event_tx, round_input_tx, round_trigger_tx },
			wallet: adapters.wallet,
			scanner: adapters.scanner,
			tx_builder: adapters.tx_builder,
			config, repo, scheduler, ledger, asp_key, shutdown,
		});

		let srv2 = srv.clone();
		tokio::spawn(async move {
			let res = round::run_round_coordinator(&srv2, round_input_rx, round_trigger_rx)
				.await.context("error from round coordinator");
			info!("Round coordinator exited with {:?}", res);
		});

		// The tick only enqueues a trigger; round work happens on the
		// coordinator. A tick arriving while a round runs is dropped.
		let trigger = srv.rounds.round_trigger_tx.clone();
		srv.scheduler.schedule_every(srv.config.round_interval, Box::new(move || {
			let trigger = trigger.clone();
			Box::pin(async move {
				let _ = trigger.try_send(());
			})
		}));

		// Stop feeding jobs once shutdown starts.
		let srv2 = srv.clone();
		tokio::spawn(async move {
			srv2.shutdown.signal().await;
			srv2.scheduler.stop();
		});

		Ok(srv)
	}

	/// Waits for arkd to terminate.
	pub async fn wait(&self) {
		self.shutdown.drained().await;
		slog!(ArkdTerminated);
	}

	/// Starts the server and waits until it terminates.
	pub async fn run(config: Config, adapters: Adapters) -> anyhow::Result<()> {
		let srv = Server::start(config, adapters).await?;
		srv.wait().await;
		Ok(())
	}

	/// Begin shutdown: drain the in-flight round and stop all workers.
	pub fn shutdown(&self) {
		self.shutdown.begin();
	}

	pub(crate) fn rounds(&self) -> &RoundHandle {
		&self.rounds
	}

	/// The pubkey identifying this server in addresses and vtxo scripts.
	pub fn asp_pubkey(&self) -> secp256k1::PublicKey {
		self.asp_key.public_key()
	}

	/// Admit vtxos funded outside the round pipeline (boarding flows)
	/// as spendable.
	pub async fn add_spendable_vtxos(&self, vtxos: &[Vtxo]) -> anyhow::Result<()> {
		self.repo.upsert_vtxos(vtxos).await.context("db error")?;
		self.ledger.insert_spendable(vtxos.iter().cloned());
		Ok(())
	}

	/// Read access to the vtxo ledger.
	pub fn ledger(&self) -> &VtxoLedger {
		&self.ledger
	}
}
