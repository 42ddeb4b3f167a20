use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::allocation::Settings;
use crate::allocation::controller::{MAX_INTERVAL_MINUTES, MAX_WINNERS_PER_ROUND};
use crate::platform::{ChannelId, RoleId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub discord: DiscordSection,
    pub allocation: AllocationSection,
    pub ledger: LedgerSection,
    pub verification: VerificationSection,
    pub keepalive: KeepaliveSection,
    pub ipc: IpcSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordSection {
    pub api_base: String,
    pub token_env: String,
    pub guild_id: u64,
    pub announce_channel_id: Option<u64>,
    pub logs_channel_id: Option<u64>,
    pub verification_channel_id: Option<u64>,
    pub ping_role_id: Option<u64>,
}

impl Default for DiscordSection {
    fn default() -> Self {
        Self {
            api_base: crate::platform::discord::DISCORD_API_URL.to_string(),
            token_env: "DISCORD_TOKEN".to_string(),
            guild_id: 0,
            announce_channel_id: None,
            logs_channel_id: None,
            verification_channel_id: None,
            ping_role_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationSection {
    pub interval_minutes: u64,
    pub reaction_seconds: u64,
    pub role_removal_hours: u64,
    pub winners_per_round: u32,
    pub task_role_name: String,
    pub selection_emoji: String,
    pub reaction_poll_ms: u64,
    pub member_fetch_timeout_seconds: u64,
    pub sweep_pause_ms: u64,
}

impl Default for AllocationSection {
    fn default() -> Self {
        Self {
            interval_minutes: 1,
            reaction_seconds: 10,
            role_removal_hours: 6,
            winners_per_round: 1,
            task_role_name: std::env::var("TASK_ROLE_NAME").unwrap_or_else(|_| "TaskHolder".to_string()),
            selection_emoji: "✅".to_string(),
            reaction_poll_ms: 250,
            member_fetch_timeout_seconds: 5,
            sweep_pause_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    pub sheet_url: Option<String>,
    pub api_base: String,
    pub token_env: String,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            sheet_url: None,
            api_base: crate::platform::sheets::SHEETS_API_URL.to_string(),
            token_env: "GOOGLE_SHEETS_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSection {
    pub verified_role_name: String,
    pub minimum_karma: i64,
    pub blocked_ids: Vec<String>,
    pub client_id_env: String,
    pub client_secret_env: String,
    pub user_agent_env: String,
}

impl Default for VerificationSection {
    fn default() -> Self {
        Self {
            verified_role_name: "Verified".to_string(),
            minimum_karma: 100,
            blocked_ids: Vec::new(),
            client_id_env: "REDDIT_CLIENT_ID".to_string(),
            client_secret_env: "REDDIT_CLIENT_SECRET".to_string(),
            user_agent_env: "REDDIT_USER_AGENT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveSection {
    pub enabled: bool,
    pub port: u16,
}

impl Default for KeepaliveSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcSection {
    pub socket_path: PathBuf,
}

impl Default for IpcSection {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

/// Default admin socket location under the local data directory
pub fn default_socket_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskbot")
        .join("taskbot.sock")
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Initial runtime settings for the allocation controller
    pub fn settings(&self) -> Settings {
        let alloc = &self.allocation;
        Settings {
            interval: Duration::from_secs(alloc.interval_minutes.max(1) * 60),
            reaction_window: Duration::from_secs(alloc.reaction_seconds),
            role_removal: Duration::from_secs(alloc.role_removal_hours * 3600),
            default_winners: alloc.winners_per_round.clamp(1, MAX_WINNERS_PER_ROUND),
            announce_channel: self.discord.announce_channel_id.map(ChannelId),
            logs_channel: self.discord.logs_channel_id.map(ChannelId),
            verification_channel: self.discord.verification_channel_id.map(ChannelId),
            sheet_url: self.ledger.sheet_url.clone(),
            ping_role: self.discord.ping_role_id.map(RoleId),
            task_role_name: alloc.task_role_name.clone(),
            selection_emoji: alloc.selection_emoji.clone(),
            reaction_poll: Duration::from_millis(alloc.reaction_poll_ms.clamp(50, 5000)),
            member_fetch_timeout: Duration::from_secs(alloc.member_fetch_timeout_seconds.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.allocation.interval_minutes, 1);
        assert_eq!(config.allocation.reaction_seconds, 10);
        assert_eq!(config.allocation.role_removal_hours, 6);
        assert_eq!(config.allocation.winners_per_round, 1);
        assert_eq!(config.verification.minimum_karma, 100);
        assert_eq!(config.allocation.selection_emoji, "✅");
    }

    #[test]
    fn test_load_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("taskbot.yml");
        fs::write(
            &path,
            r#"
discord:
  guild_id: 99
  announce_channel_id: 1418471239504101487
  logs_channel_id: 1418601049471848488
allocation:
  reaction_seconds: 30
  winners_per_round: 2
ledger:
  sheet_url: "https://docs.google.com/spreadsheets/d/abc/edit"
verification:
  blocked_ids: ["crazy_guy_12"]
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.discord.guild_id, 99);
        assert_eq!(config.allocation.reaction_seconds, 30);
        assert_eq!(config.allocation.role_removal_hours, 6);
        assert_eq!(config.verification.blocked_ids, vec!["crazy_guy_12".to_string()]);

        let settings = config.settings();
        assert_eq!(settings.reaction_window, Duration::from_secs(30));
        assert_eq!(settings.default_winners, 2);
        assert_eq!(settings.announce_channel, Some(ChannelId(1418471239504101487)));
        assert!(settings.is_configured());
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_settings_without_channels_not_configured() {
        let settings = Config::default().settings();
        assert!(!settings.is_configured());
        assert_eq!(settings.interval, Duration::from_secs(60));
        assert_eq!(settings.role_removal, Duration::from_secs(6 * 3600));
    }
}
