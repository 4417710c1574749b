
#[macro_use] extern crate serde;

#[macro_use]
mod macros;

mod msgs;
pub use crate::msgs::*;


use serde::de::DeserializeOwned;
use serde::Serialize;


/// The "target" field used for structured logging.
pub const SLOG_TARGET: &str = "arkd-slog";

/// The kv field carrying the structured message id.
pub const LOGID_FIELD: &str = "logid";

pub trait LogMsg: Sized + Send + Serialize + DeserializeOwned + 'static {
	const LOGID: &'static str;
	const LEVEL: log::Level;
	const MSG: &'static str;
}

/// A [log::kv::Source] yielding the log id and the message's fields.
pub struct MsgSource {
	logid: &'static str,
	kv: serde_json::Map<String, serde_json::Value>,
}

impl log::kv::Source for MsgSource {
	fn visit<'kvs>(
		&'kvs self,
		visitor: &mut dyn log::kv::VisitSource<'kvs>,
	) -> Result<(), log::kv::Error> {
		visitor.visit_pair(
			log::kv::Key::from_str(LOGID_FIELD),
			log::kv::Value::from(self.logid),
		)?;
		for (key, value) in &self.kv {
			visitor.visit_pair(
				log::kv::Key::from_str(key),
				log::kv::Value::from_serde(value),
			)?;
		}
		Ok(())
	}
}

pub fn log<T: LogMsg>(obj: &T, file: &str, line: u32) {
	let kv = match serde_json::to_value(obj) {
		Ok(serde_json::Value::Object(map)) => map,
		// unit structs serialize to null
		_ => serde_json::Map::new(),
	};
	let source = MsgSource {
		logid: T::LOGID,
		kv,
	};
	log::logger().log(&log::Record::builder()
		.args(format_args!("{}", T::MSG))
		.level(T::LEVEL)
		.target(SLOG_TARGET)
		.file(Some(file))
		.line(Some(line))
		.key_values(&source)
		.build());
}
