use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use consensus::config::NetworkConstants;
use serde::Deserialize;

pub const DEFAULT_CONFIG_ROOT: &str = "/etc/quill";

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkChoice {
	Live,
	Test,
}

impl NetworkChoice {
	pub fn constants(&self) -> NetworkConstants {
		match self {
			NetworkChoice::Live => NetworkConstants::live(),
			NetworkChoice::Test => NetworkConstants::test(),
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct NodeSettings {
	/// Directory holding the ledger database
	pub data_dir: PathBuf,
	pub network: NetworkChoice,
	/// Worker threads for the signature checker pool; zero sizes it to half
	/// the hardware threads
	pub signature_checker_threads: usize,
	pub confirmation_height_mode: ConfirmationHeightModeSetting,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationHeightModeSetting {
	Automatic,
	Bounded,
	Unbounded,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
	pub node: NodeSettings,
}

impl Settings {
	/// Layered settings: defaults, then `settings.toml` under the config
	/// root if present, then `QUILL__`-prefixed environment variables.
	pub fn new(config_root: &Path) -> Result<Self, ConfigError> {
		Config::builder()
			.set_default("node.data_dir", config_root.join("data").to_string_lossy().as_ref())?
			.set_default("node.network", "live")?
			.set_default("node.signature_checker_threads", 0i64)?
			.set_default("node.confirmation_height_mode", "automatic")?
			.add_source(File::from(config_root.join("settings")).required(false))
			.add_source(Environment::with_prefix("QUILL").separator("__"))
			.build()?
			.try_deserialize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_apply_without_a_settings_file() {
		let settings = Settings::new(Path::new("/nonexistent/quill")).unwrap();
		assert_eq!(settings.node.network, NetworkChoice::Live);
		assert_eq!(settings.node.signature_checker_threads, 0);
		assert_eq!(settings.node.confirmation_height_mode, ConfirmationHeightModeSetting::Automatic);
		assert_eq!(settings.node.data_dir, PathBuf::from("/nonexistent/quill/data"));
	}

	#[test]
	fn settings_file_overrides_defaults() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(
			dir.path().join("settings.toml"),
			"[node]\nnetwork = \"test\"\nsignature_checker_threads = 2\n",
		)
		.unwrap();
		let settings = Settings::new(dir.path()).unwrap();
		assert_eq!(settings.node.network, NetworkChoice::Test);
		assert_eq!(settings.node.signature_checker_threads, 2);
		assert!(settings.node.network.constants().is_test_network());
	}
}
