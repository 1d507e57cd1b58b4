use std::process::Stdio;

use anyhow::Context;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::channels::Channel;

#[derive(Debug, Deserialize, Clone)]
pub struct PlayerConfig {
    #[serde(default = "default_player_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_player_command() -> String {
    "vlc".to_string()
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: default_player_command(),
            args: Vec::new(),
        }
    }
}

/// Hands stream URLs to an external media player.
#[derive(Debug, Clone)]
pub struct Player {
    config: PlayerConfig,
}

impl Player {
    pub fn new(config: PlayerConfig) -> Self {
        Self { config }
    }

    /// Spawns the player with the channel URL as its last argument and
    /// returns once the process started. The player is not waited on.
    pub fn launch(&self, channel: &Channel) -> anyhow::Result<()> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .arg(&channel.url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start player '{}'", self.config.command))?;

        info!(
            "Player spawned: pid={} channel=\"{}\" url={}",
            child.id().unwrap_or_default(),
            channel.name,
            channel.url
        );

        let command = self.config.command.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => warn!("Player {} exited with {}", command, status),
                Ok(_) => {}
                Err(e) => warn!("Failed to wait for player {}: {}", command, e),
            }
        });
        Ok(())
    }
}
