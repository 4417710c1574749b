
use std::{fmt, io};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use config::{Environment, File};
use serde::Deserialize;

use crate::serde_util;


/// Granularity of seconds-based relative timelocks; lifetimes are encoded
/// in units of this value.
const CSV_SECONDS_UNIT: u64 = ark_core::tree::CSV_SECONDS_UNIT;

/// The lowest relay fee we allow to be configured.
const MIN_RELAY_FEE_FLOOR: u64 = 30;

/// The chain this coordinator settles on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
	Bitcoin,
	Testnet,
	Signet,
	Regtest,
	Liquid,
}

impl Network {
	/// Whether addresses for this network use the test prefix.
	pub fn is_test(&self) -> bool {
		!matches!(self, Network::Bitcoin | Network::Liquid)
	}
}

impl fmt::Display for Network {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let s = match self {
			Network::Bitcoin => "bitcoin",
			Network::Testnet => "testnet",
			Network::Signet => "signet",
			Network::Regtest => "regtest",
			Network::Liquid => "liquid",
		};
		f.write_str(s)
	}
}

impl FromStr for Network {
	type Err = anyhow::Error;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"bitcoin" => Ok(Network::Bitcoin),
			"testnet" => Ok(Network::Testnet),
			"signet" => Ok(Network::Signet),
			"regtest" => Ok(Network::Regtest),
			"liquid" => Ok(Network::Liquid),
			other => bail!("unknown network {}", other),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub data_dir: PathBuf,
	pub network: Network,

	/// The period of the round tick.
	#[serde(with = "serde_util::duration")]
	pub round_interval: Duration,
	/// The CSV lifetime, in seconds, of the sweep closure on every tree
	/// root, and thereby of every vtxo. Values are rounded down to a
	/// multiple of 512 when used.
	pub round_lifetime_secs: u64,
	/// The CSV delay, in seconds, on the unilateral exit path of vtxos.
	pub unilateral_exit_delay_secs: u64,
	/// Lower bound on the fee of the pool tx, in satoshis.
	pub min_relay_fee_sats: u64,

	/// How long after registration end forfeit signatures are accepted.
	#[serde(with = "serde_util::duration")]
	pub finalization_timeout: Duration,
	/// How long to wait for pool tx confirmation before consulting the
	/// mempool and possibly failing the round.
	#[serde(with = "serde_util::duration")]
	pub confirmation_timeout: Duration,

	// backend selectors
	pub scheduler_type: String,
	pub db_type: String,
	pub tx_builder_type: String,
	pub scanner_type: String,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			data_dir: "./arkd".into(),
			network: Network::Regtest,

			round_interval: Duration::from_secs(5),
			round_lifetime_secs: 604672,
			unilateral_exit_delay_secs: 1024,
			min_relay_fee_sats: 30,

			finalization_timeout: Duration::from_secs(30),
			confirmation_timeout: Duration::from_secs(120),

			scheduler_type: "tokio".into(),
			db_type: "memory".into(),
			tx_builder_type: "taproot".into(),
			scanner_type: "wallet".into(),
		}
	}
}

impl Config {
	fn load_with_custom_env(
		config_file: Option<&Path>,
		#[cfg(test)]
		custom_env: Option<std::collections::HashMap<String, String>>,
	) -> anyhow::Result<Self> {
		let default = config::Config::try_from(&Self::default())
			.expect("default config failed to deconstruct");

		// Three layers of config:
		// - the defaults defined in Config's Default impl
		// - the config file passed in this function, if any
		// - environment variables (prefixed with `ARKD__`)

		let mut builder = config::Config::builder()
			.add_source(default);
		if let Some(file) = config_file {
			builder = builder.add_source(File::from(file));
		}

		let env = Environment::with_prefix("ARKD")
			.separator("__");
		#[cfg(test)]
		let env = env.source(custom_env);
		builder = builder.add_source(env);

		let cfg = builder.build().context("error building config")?;
		let cfg: Config = cfg.try_deserialize().context("error parsing config")?;

		Ok(cfg)
	}

	pub fn load(config_file: Option<&Path>) -> anyhow::Result<Self> {
		Self::load_with_custom_env(config_file, #[cfg(test)] None)
	}

	/// The round lifetime as actually encoded in sweep closures: rounded
	/// down to the nearest multiple of 512 and clamped to at least 512.
	pub fn effective_round_lifetime(&self) -> u64 {
		let floored = self.round_lifetime_secs - self.round_lifetime_secs % CSV_SECONDS_UNIT;
		floored.max(CSV_SECONDS_UNIT)
	}

	/// Verifies if the specified configuration is valid.
	pub fn validate(&self) -> anyhow::Result<()> {
		if self.round_interval < Duration::from_secs(2) {
			bail!("round_interval must be at least 2 seconds");
		}
		if self.round_lifetime_secs < CSV_SECONDS_UNIT {
			bail!("round_lifetime_secs must be at least {}", CSV_SECONDS_UNIT);
		}
		if self.unilateral_exit_delay_secs < CSV_SECONDS_UNIT
			|| self.unilateral_exit_delay_secs % CSV_SECONDS_UNIT != 0
		{
			bail!("unilateral_exit_delay_secs must be a multiple of {} of at least {}",
				CSV_SECONDS_UNIT, CSV_SECONDS_UNIT,
			);
		}
		if self.min_relay_fee_sats < MIN_RELAY_FEE_FLOOR {
			bail!("min_relay_fee_sats must be at least {}", MIN_RELAY_FEE_FLOOR);
		}
		Ok(())
	}

	/// Write the config into the writer.
	pub fn write_into(&self, writer: &mut dyn io::Write) -> anyhow::Result<()> {
		let s = toml::to_string_pretty(self).expect("config serialization error");
		writer.write_all(s.as_bytes()).context("error writing config to writer")?;
		Ok(())
	}
}
