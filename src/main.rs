use anyhow::{Context, Result};
use clap::Parser;
use homeconnect_meet::audio::{AudioBackendFactory, AudioOutput, AudioSource};
use homeconnect_meet::config::DEFAULT_CONFIG_PATH;
use homeconnect_meet::recommendations::RecommendationSource;
use homeconnect_meet::{Config, ConnectionState, HttpRecommendationSource, MeetSession};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "homeconnect-meet")]
#[command(about = "Talk to the HomeConnect property assistant")]
struct Args {
    /// Config file (any format the config crate reads)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// WebSocket base of the live endpoint
    #[arg(long)]
    live_url: Option<String>,

    /// HTTP base for recommendations
    #[arg(long)]
    server_url: Option<String>,

    /// Assistant voice
    #[arg(long)]
    voice: Option<String>,

    /// BCP 47 language tag
    #[arg(long)]
    language: Option<String>,

    #[arg(long)]
    role: Option<String>,

    /// Disable web search grounding
    #[arg(long)]
    no_search: bool,

    /// Let the user talk over the assistant
    #[arg(long)]
    allow_interruptions: bool,

    /// `mic` or a path to an audio file
    #[arg(long, default_value = "mic")]
    input: AudioSource,

    /// `device`, `null` or a path to a WAV file
    #[arg(long, default_value = "device")]
    output: AudioOutput,

    /// Run the voice chat without property recommendations
    #[arg(long)]
    no_recommendations: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.live_url {
            config.endpoints.live_url = url.clone();
        }
        if let Some(url) = &self.server_url {
            config.endpoints.server_url = url.clone();
        }
        if let Some(voice) = &self.voice {
            config.stream.voice = voice.clone();
        }
        if let Some(language) = &self.language {
            config.stream.language = language.clone();
        }
        if let Some(role) = &self.role {
            config.stream.role = role.clone();
        }
        if self.no_search {
            config.stream.google_search = false;
        }
        if self.allow_interruptions {
            config.stream.allow_interruptions = true;
        }
        if self.no_recommendations {
            config.recommendations.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate()?;

    info!("HomeConnect Meet v{}", env!("CARGO_PKG_VERSION"));
    info!("Live endpoint: {}", config.endpoints.live_url);

    let backend = AudioBackendFactory::create(args.input.clone(), config.backend_config())?;
    info!("Capture backend: {}", backend.name());

    let output = args.output.clone();
    let playback_rate = config.audio.playback_sample_rate;
    let sink_factory = Box::new(move || output.create_sink(playback_rate));

    let source: Option<Arc<dyn RecommendationSource>> = if config.recommendations.enabled {
        info!("Recommendations from {}", config.endpoints.server_url);
        Some(Arc::new(HttpRecommendationSource::new(
            config.endpoints.server_url.clone(),
        )))
    } else {
        None
    };

    let session = MeetSession::new(config.session_config(), backend, sink_factory, source);
    info!("Session ID: {}", session.session_id());

    spawn_printers(&session);

    session.start().await?;
    println!("Connected. Speak, or type a message and press Enter. Ctrl+C to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let ended = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break None;
            }
            state = session.wait_until_ended() => break Some(state),
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    if let Err(e) = session.send_text(line.trim()).await {
                        warn!("Failed to send message: {}", e);
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    };

    let stats = session.stop().await?;

    info!("Session ended");
    info!("  Duration: {:.1}s", stats.duration_secs);
    info!("  Blocks sent: {} (dropped {})", stats.blocks_sent, stats.blocks_dropped);
    info!(
        "  Speech chunks: {} received, {} played",
        stats.chunks_received, stats.chunks_played
    );
    info!("  Turns completed: {}", stats.turns_completed);
    info!("  Transcript messages: {}", stats.transcript_messages);
    info!("  Recommendations: {}", stats.recommendations);

    if ended == Some(ConnectionState::Error) {
        if let Some(err) = session.last_error() {
            anyhow::bail!(err);
        }
    }

    Ok(())
}

/// Print transcript lines, indicator changes and recommendation cards
fn spawn_printers(session: &MeetSession) {
    let mut transcript = session.subscribe_transcript();
    tokio::spawn(async move {
        while let Ok(message) = transcript.recv().await {
            println!("{}", message);
        }
    });

    let mut indicators = session.subscribe_indicators();
    tokio::spawn(async move {
        while indicators.changed().await.is_ok() {
            let current = *indicators.borrow_and_update();
            let mark = |on: bool| if on { "speaking" } else { "-" };
            println!(
                "[you: {} | assistant: {}]",
                mark(current.user_speaking),
                mark(current.remote_speaking)
            );
        }
    });

    if let Some(poller) = session.recommendations() {
        let mut snapshots = poller.subscribe_snapshot();
        let mut errors = poller.subscribe_errors();

        tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                if let Some(snapshot) = snapshot {
                    println!("Recommended properties ({}):", snapshot.properties.len());
                    for property in &snapshot.properties {
                        println!("  {}", property);
                    }
                }
            }
        });

        tokio::spawn(async move {
            while errors.changed().await.is_ok() {
                if let Some(err) = errors.borrow_and_update().clone() {
                    warn!("{}", err);
                }
            }
        });
    }
}
