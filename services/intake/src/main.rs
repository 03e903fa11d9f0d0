use anyhow::{Context, Result};
use clap::Parser;
use intake_core::{
    Capabilities, DialogueManager, Phase, Script, SessionHandle, SessionSnapshot, TurnController,
};
use intake_service::config::Config;
use intake_service::console::{
    ConsolePermission, ConsoleRecognizer, ConsoleSynthesizer, LogConnector,
};
use intake_service::script_loader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Voice intake session in the terminal")]
struct Cli {
    /// JSON conversation script; overrides INTAKE_SCRIPT
    #[arg(long)]
    script: Option<PathBuf>,
    /// Seconds to wait for a typed answer before treating it as silence
    #[arg(long, default_value_t = 8)]
    listen_window: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Configuration loaded successfully. Starting intake service...");

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();

    // --- 4. Load the Script ---
    let script = match args.script.as_ref().or(config.script_path.as_ref()) {
        Some(path) => {
            let script = script_loader::load_script(path)?;
            tracing::info!("Loaded script from {}", path.display());
            script
        }
        None => Script::default(),
    };
    let dialogue = DialogueManager::new(script).context("Failed to compile the script")?;

    // --- 5. Wire the Console Capabilities ---
    let session_config = config.session_config();
    let (speech_tx, speech_rx) = mpsc::channel::<String>(16);
    let capabilities = Capabilities {
        permission: Arc::new(ConsolePermission),
        synthesizer: Arc::new(ConsoleSynthesizer::new(
            session_config.output.chars_per_second,
        )),
        recognizer: Arc::new(ConsoleRecognizer::new(
            speech_rx,
            Duration::from_secs(args.listen_window.max(1)),
        )),
        connector: Arc::new(LogConnector),
    };

    // --- 6. Start the Session ---
    let handle = TurnController::spawn(session_config, dialogue, capabilities);
    let reporter = tokio::spawn(report_progress(handle.subscribe()));
    let router = tokio::spawn(route_stdin(handle.clone(), speech_tx));

    println!("Type your answers. Commands: /pause, /resume, /end");
    handle.start().await.context("Failed to start the session")?;

    let mut snapshots = handle.subscribe();
    tokio::select! {
        _ = snapshots.wait_for(|snapshot| snapshot.phase == Phase::Ended) => {
            tracing::info!("Session finished.");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down...");
            if let Err(e) = handle.end().await {
                tracing::warn!("Failed to end the session cleanly: {}", e);
            }
        }
    }

    router.abort();
    if let Err(e) = reporter.await {
        tracing::warn!("Progress reporter stopped abnormally: {:?}", e);
    }
    print_summary(&handle.snapshot());
    tracing::info!("Shutting down...");
    Ok(())
}

/// Splits stdin into lifecycle commands and caller speech.
async fn route_stdin(handle: SessionHandle, speech: mpsc::Sender<String>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        let result = match line {
            "" => continue,
            "/pause" => handle.stop().await,
            "/resume" => handle.resume().await,
            "/end" => {
                handle.end().await?;
                return Ok(());
            }
            _ => {
                speech
                    .send(line.to_string())
                    .await
                    .context("Speech input is no longer read")?;
                Ok(())
            }
        };
        if let Err(e) = result {
            println!("!! {e}");
        }
    }

    tracing::info!("stdin closed, ending the session");
    handle.end().await?;
    Ok(())
}

/// Logs phase changes and surfaces alerts until the session ends.
async fn report_progress(mut snapshots: watch::Receiver<SessionSnapshot>) {
    let mut phase = snapshots.borrow().phase;
    let mut alert = None;
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        if snapshot.phase != phase {
            tracing::debug!("Phase {:?} -> {:?}", phase, snapshot.phase);
            phase = snapshot.phase;
        }
        if snapshot.alert.is_some() && snapshot.alert != alert {
            alert = snapshot.alert.clone();
            println!("!! {}", alert.as_deref().unwrap_or_default());
        }
        if phase == Phase::Ended {
            break;
        }
    }
}

fn print_summary(snapshot: &SessionSnapshot) {
    println!("--- transcript ({} utterances) ---", snapshot.log.len());
    for utterance in &snapshot.log {
        println!(
            "[{}] {:?}: {}",
            utterance.timestamp.format("%H:%M:%S"),
            utterance.speaker,
            utterance.text
        );
    }
}
