//! banter: command-line host for a `banter-core` voice session.

mod auth;
mod cli;
mod settings;

use anyhow::Context;
use banter_core::{
    audio::device::{list_input_devices, list_output_devices, DeviceInfo},
    AuthToken, CpalCapture, CpalSink, SessionStatus, VoiceSession,
};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli::{Cli, Command, TalkArgs};
use crate::settings::{apply_env_overrides, default_settings_path, load_settings, save_settings};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("banter=info,banter_core=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Devices) => {
            print_devices("Input devices", &list_input_devices());
            print_devices("Output devices", &list_output_devices());
            Ok(())
        }
        Some(Command::Talk(args)) => talk(args).await,
        None => talk(cli.talk).await,
    }
}

async fn talk(args: TalkArgs) -> anyhow::Result<()> {
    let settings_path = default_settings_path();
    let mut app_settings = load_settings(&settings_path);
    apply_env_overrides(&mut app_settings);
    args.apply(&mut app_settings);
    if args.save {
        save_settings(&settings_path, &app_settings)
            .with_context(|| format!("writing {}", settings_path.display()))?;
    }

    let config = app_settings.session_config();

    let token = match (app_settings.email.as_deref(), args.password.as_deref()) {
        (Some(email), Some(password)) => {
            let login_url = app_settings
                .login_url
                .as_deref()
                .context("credentials supplied but no login URL configured")?;
            Some(auth::login(login_url, email, password).await.context("login failed")?)
        }
        _ => {
            info!("no credentials supplied; connecting without a token");
            None::<AuthToken>
        }
    };

    let sink = CpalSink::new(config.preferred_output_device.clone());
    let mut session = VoiceSession::new(config, Box::new(CpalCapture::new()), Box::new(sink));
    info!(
        settings_path = ?settings_path,
        profile = %app_settings.profile,
        endpoint = %session.config().endpoint_url,
        block_size = session.config().block_size,
        "runtime settings loaded"
    );

    let mut status = session.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status.recv().await {
                Ok(event) => info!(status = ?event.status, detail = ?event.detail, "session status"),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    session.start(token).context("could not start voice session")?;
    info!("conversation running; press Ctrl-C to stop");

    let mut ended = session.subscribe_status();
    let shutdown = async move {
        let ended_on_its_own = async {
            loop {
                match ended.recv().await {
                    Ok(event) if matches!(event.status, SessionStatus::Error | SessionStatus::Idle) => {
                        break
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupt received; stopping"),
            _ = ended_on_its_own => warn!("session ended"),
        }
    };
    session.run(shutdown).await;

    let snapshot = session.diagnostics().snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn print_devices(title: &str, devices: &[DeviceInfo]) {
    println!("{title}:");
    if devices.is_empty() {
        println!("  (none)");
    }
    for device in devices {
        let mut tags = Vec::new();
        if device.is_default {
            tags.push("default");
        }
        if device.is_recommended {
            tags.push("recommended");
        }
        if device.is_loopback_like {
            tags.push("loopback");
        }
        if tags.is_empty() {
            println!("  {}", device.name);
        } else {
            println!("  {} [{}]", device.name, tags.join(", "));
        }
    }
}
