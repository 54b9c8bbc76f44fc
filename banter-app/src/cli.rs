//! Command-line interface for banter.

use clap::{Args, Parser, Subcommand};

use crate::settings::AppSettings;

/// Banter - full-duplex voice client
#[derive(Parser, Debug)]
#[command(name = "banter")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub talk: TalkArgs,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a conversation (default)
    Talk(TalkArgs),
    /// List audio input and output devices
    Devices,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TalkArgs {
    /// Deployment preset: voice_ai_platform or local_relay
    #[arg(long)]
    pub profile: Option<String>,

    /// WebSocket endpoint URL
    #[arg(long)]
    pub endpoint: Option<String>,

    /// HTTP login URL
    #[arg(long)]
    pub login_url: Option<String>,

    /// Login email
    #[arg(long, env = "BANTER_EMAIL")]
    pub email: Option<String>,

    /// Login password
    #[arg(long, env = "BANTER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Samples per captured block (rounded to a power of two)
    #[arg(long)]
    pub block_size: Option<usize>,

    /// Preferred microphone name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Preferred speaker name
    #[arg(long)]
    pub output_device: Option<String>,

    /// Write the effective settings back to the settings file
    #[arg(long)]
    pub save: bool,
}

impl TalkArgs {
    /// Flags win over the settings file and environment.
    pub fn apply(&self, settings: &mut AppSettings) {
        if let Some(profile) = &self.profile {
            settings.profile = profile.clone();
        }
        if let Some(url) = &self.endpoint {
            settings.endpoint_url = Some(url.clone());
        }
        if let Some(url) = &self.login_url {
            settings.login_url = Some(url.clone());
        }
        if let Some(email) = &self.email {
            settings.email = Some(email.clone());
        }
        if let Some(block_size) = self.block_size {
            settings.block_size = Some(block_size);
        }
        if let Some(device) = &self.input_device {
            settings.preferred_input_device = Some(device.clone());
        }
        if let Some(device) = &self.output_device {
            settings.preferred_output_device = Some(device.clone());
        }
        settings.normalize();
    }
}
