use clap::{Parser, Subcommand};
use hark::config::Config;
use hark::confirm::{
    ConfirmController, ConfirmInput, ConfirmSettings, ExecutionResult, ResolvedCommand,
    SurfaceEvent, run_confirm_loop,
};
use hark::generator::FallbackGenerator;
use hark::history::{self, SharedLog};
use hark::pipeline::{self, Resolution};
use hark::runner::{CommandRunner, ShellRunner};
use hark::tui::{Surface, SurfaceAction};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hark", about = "Voice command confirmation and execution surface")]
struct Cli {
    /// Path to the config file (defaults to hark.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve an utterance and print the outcome without executing
    Resolve { text: String },
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Some(Command::Resolve { text }) => {
            run_resolve_once(&config, &text);
            Ok(())
        }
        None => run_surface(config).await,
    }
}

/// One-shot resolution for scripting and debugging; nothing is executed
fn run_resolve_once(config: &Config, text: &str) {
    let generator = build_generator(config);
    match pipeline::resolve(text, config, generator.as_deref()) {
        Resolution::Resolved(cmd) => {
            println!("{:?}: {}", cmd.source, cmd.command_text);
        }
        Resolution::NoMatch { spoken_text } => {
            println!("No matching command for \"{}\"", spoken_text);
        }
        Resolution::Rejected(reason) => {
            println!("Fallback declined: {}", reason);
        }
        Resolution::Failed(message) => {
            println!("Failed to generate a command: {}", message);
        }
    }
}

fn build_generator(config: &Config) -> Option<Arc<FallbackGenerator>> {
    if !config.fallback.enabled {
        return None;
    }
    match FallbackGenerator::from_config(&config.fallback) {
        Ok(generator) => Some(Arc::new(generator)),
        Err(e) => {
            warn!("fallback unavailable: {}", e);
            None
        }
    }
}

async fn run_surface(config: Config) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = Arc::new(config);
    let generator = build_generator(&config);

    // One channel per event kind, with one producer side each:
    // resolved commands, surface gestures, surface events, execution results.
    let (show_tx, show_rx) = flume::unbounded::<ResolvedCommand>();
    let (input_tx, input_rx) = flume::unbounded::<ConfirmInput>();
    let (surface_tx, surface_rx) = flume::unbounded::<SurfaceEvent>();
    let (result_tx, result_rx) = flume::unbounded::<ExecutionResult>();
    let (resolution_tx, resolution_rx) = flume::unbounded::<Resolution>();

    // History consumer thread
    let log: SharedLog = history::new_shared();
    let log_handle = {
        let log = Arc::clone(&log);
        thread::spawn(move || history::run_log_consumer(result_rx, log))
    };

    // Confirmation state machine
    let controller = ConfirmController::new(
        ConfirmSettings {
            auto_run: config.confirm.auto_run,
            auto_run_seconds: config.confirm.auto_run_seconds,
        },
        surface_tx,
        result_tx,
    );
    let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner);
    let confirm_handle = tokio::spawn(run_confirm_loop(controller, show_rx, input_rx, runner));

    // Terminal event thread
    let (raw_tx, raw_rx) = flume::unbounded::<crossterm::event::Event>();
    thread::spawn(move || {
        loop {
            match crossterm::event::poll(std::time::Duration::from_millis(100)) {
                Ok(true) => match crossterm::event::read() {
                    Ok(event) => {
                        if raw_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                Ok(false) => {
                    if raw_tx.is_disconnected() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut surface = Surface::new()?;
    let mut redraw = tokio::time::interval(std::time::Duration::from_millis(100));

    loop {
        tokio::select! {
            Ok(event) = raw_rx.recv_async() => {
                match surface.handle_event(event) {
                    Some(SurfaceAction::Quit) => break,
                    Some(SurfaceAction::Submit(text)) => {
                        let config = Arc::clone(&config);
                        let generator = generator.clone();
                        let resolution_tx = resolution_tx.clone();
                        tokio::task::spawn_blocking(move || {
                            let resolution =
                                pipeline::resolve(&text, &config, generator.as_deref());
                            let _ = resolution_tx.send(resolution);
                        });
                    }
                    Some(SurfaceAction::Input(input)) => {
                        let _ = input_tx.send(input);
                    }
                    Some(SurfaceAction::ShowHistory) => {
                        let text = log.lock().map(|l| l.export()).unwrap_or_default();
                        surface.show_message(&text);
                    }
                    Some(SurfaceAction::ClearHistory) => {
                        if let Ok(mut log) = log.lock() {
                            log.clear();
                        }
                        surface.show_notice("History cleared");
                    }
                    None => {}
                }
            }

            Ok(resolution) = resolution_rx.recv_async() => {
                match resolution {
                    Resolution::Resolved(cmd) => {
                        surface.set_resolving(false);
                        let _ = show_tx.send(cmd);
                    }
                    Resolution::NoMatch { spoken_text } => {
                        surface.show_notice(format!(
                            "No matching command for \"{}\"",
                            spoken_text
                        ));
                    }
                    Resolution::Rejected(reason) => {
                        surface.show_notice(format!("Fallback declined: {}", reason));
                    }
                    Resolution::Failed(message) => {
                        surface.show_notice(format!(
                            "Failed to generate a command: {}",
                            message
                        ));
                    }
                }
            }

            Ok(event) = surface_rx.recv_async() => {
                surface.apply(event);
            }

            _ = redraw.tick() => {}
        }

        surface.draw()?;
    }

    surface.restore()?;

    // closing the gesture channels ends the confirm loop, which drops the
    // result sender and lets the history thread finish
    drop(show_tx);
    drop(input_tx);
    let _ = confirm_handle.await;
    let _ = log_handle.join();

    Ok(())
}
