mod console;
mod input;

use anyhow::{bail, Context, Result};
use apollolytics_audio::{
    get_default_device, list_devices, list_output_devices, AudioSink, CpalSink,
    MicrophoneCapture, SilentSink, VoiceCapture,
};
use apollolytics_dialogue::{
    DialogueConfig, DialogueMode, DialogueRunner, DialogueSession, FileJournal, JournalRef,
    MemoryJournal, TurnState, VoiceCapability, VoicePreference, ENDPOINT_ENV,
};
use apollolytics_events::EventBusRef;
use apollolytics_http::{FallbackConversation, HttpConversationApi};
use apollolytics_transport::WsConnector;
use clap::Parser;
use console::ConsoleEventBus;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apollolytics")]
#[command(about = "Discuss a news article with a propaganda-aware conversation partner", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend WebSocket endpoint
    #[arg(long, env = ENDPOINT_ENV)]
    endpoint: Option<String>,

    /// critical, supportive, positive, negative, socratic or negative-socratic
    #[arg(long)]
    mode: Option<DialogueMode>,

    /// Article text
    #[arg(long, conflicts_with = "article_file")]
    article: Option<String>,

    /// Read the article from a file ("-" for stdin)
    #[arg(long)]
    article_file: Option<PathBuf>,

    #[arg(long)]
    prolific_id: Option<String>,

    #[arg(long)]
    origin_url: Option<String>,

    /// Input device name
    #[arg(long)]
    device: Option<String>,

    /// Type replies instead of recording them
    #[arg(long)]
    text: bool,

    /// Use the request/response HTTP backend instead of the realtime channel
    #[arg(long)]
    http: bool,

    /// Base URL of the HTTP backend
    #[arg(long, default_value = "http://localhost:8000")]
    base_url: String,

    /// Ask the HTTP backend for canned analysis
    #[arg(long)]
    fake: bool,

    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,apollolytics=info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        return print_devices();
    }

    let config = load_config(&cli)?;
    let article = read_article(&cli).await?;

    if cli.http {
        return run_http(&cli, &config, &article).await;
    }
    run_realtime(config, &article).await
}

fn load_config(cli: &Cli) -> Result<DialogueConfig> {
    let config = match &cli.config {
        Some(path) => DialogueConfig::load(path)?,
        None => DialogueConfig::default(),
    };
    let mut config = config.with_env_overrides()?;

    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if cli.prolific_id.is_some() {
        config.prolific_id = cli.prolific_id.clone();
    }
    if cli.origin_url.is_some() {
        config.origin_url = cli.origin_url.clone();
    }
    if cli.device.is_some() {
        config.input_device = cli.device.clone();
    }
    if cli.text {
        config.voice = VoicePreference::Text;
    }
    config.validate()?;
    Ok(config)
}

async fn read_article(cli: &Cli) -> Result<String> {
    let article = match (&cli.article, &cli.article_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) if path.as_os_str() == "-" => {
            let mut text = String::new();
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                text.push_str(&line);
                text.push('\n');
            }
            text
        }
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => bail!("provide the article with --article or --article-file"),
    };
    if article.trim().is_empty() {
        bail!("{}", apollolytics_dialogue::messages::EMPTY_ARTICLE);
    }
    Ok(article)
}

fn print_devices() -> Result<()> {
    println!("Input devices:");
    for device in list_devices()? {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  {}{marker}", device.name);
    }
    println!("Output devices:");
    for device in list_output_devices()? {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  {}{marker}", device.name);
    }
    Ok(())
}

fn detect_microphone(config: &DialogueConfig) -> Option<Box<dyn VoiceCapture>> {
    if config.input_device.is_none() {
        match get_default_device() {
            Ok(Some(_)) => {}
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to query input devices");
                return None;
            }
        }
    }
    Some(Box::new(MicrophoneCapture::new(
        config.input_device.clone(),
        config.capture,
    )))
}

fn open_output() -> Box<dyn AudioSink> {
    match CpalSink::open_default() {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            tracing::warn!(error = %e, "no audio output, responses will be text only");
            Box::new(SilentSink::new())
        }
    }
}

fn open_journal(config: &DialogueConfig) -> JournalRef {
    match config.journal_path() {
        Some(path) => Arc::new(FileJournal::open(path, config.journal_max_entries)),
        None => Arc::new(MemoryJournal::new()),
    }
}

async fn run_realtime(config: DialogueConfig, article: &str) -> Result<()> {
    let voice = VoiceCapability::select(&config, || detect_microphone(&config));
    if !voice.is_audio() {
        println!("  Voice input unavailable; type your replies.");
    }
    let bus: EventBusRef = Arc::new(ConsoleEventBus::new());
    let journal = open_journal(&config);
    let session = DialogueSession::new(config, voice, open_output(), bus, journal);

    let (commands, command_rx) = mpsc::unbounded_channel();
    input::spawn_stdin_reader(commands);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let runner = DialogueRunner::new(session, command_rx, cancel);
    let outcome = runner.run(article, &WsConnector).await;
    match outcome {
        Ok(outcome) if outcome.state == TurnState::Error => {
            bail!("conversation stopped after a connection failure")
        }
        Ok(outcome) => {
            tracing::info!(state = %outcome.state, turns = outcome.transcript.len(), "done");
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            Err(e.into())
        }
    }
}

async fn run_http(cli: &Cli, config: &DialogueConfig, article: &str) -> Result<()> {
    let api = HttpConversationApi::new(&cli.base_url)?.with_fake_data(cli.fake);
    let mut conversation = FallbackConversation::new(api, Some(config.mode.as_str().to_string()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    converse(&mut conversation, article, &mut lines).await
}

/// Analyze `article`, then exchange one message per input line. All input,
/// retries included, comes from the one `lines` reader.
async fn converse<A, R>(
    conversation: &mut FallbackConversation<A>,
    article: &str,
    lines: &mut Lines<R>,
) -> Result<()>
where
    A: apollolytics_http::ConversationApi,
    R: AsyncBufRead + Unpin,
{
    let mut printed = 0;

    println!("  ... {}", apollolytics_dialogue::messages::ANALYZING_ARTICLE);
    while conversation.analyze(article).await.is_err() {
        printed = print_new(conversation, printed);
        println!("  Press Enter to retry, or /quit.");
        match lines.next_line().await? {
            Some(line) if line.trim() != "/quit" && line.trim() != "/q" => {}
            _ => return Ok(()),
        }
    }
    printed = print_new(conversation, printed);

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "/quit" || line == "/q" {
            break;
        }
        if let Err(e) = conversation.send(line).await {
            tracing::debug!(error = %e, "message failed");
        }
        printed = print_new(conversation, printed);
    }
    Ok(())
}

fn print_new<A>(conversation: &FallbackConversation<A>, from: usize) -> usize
where
    A: apollolytics_http::ConversationApi,
{
    let entries = conversation.transcript().entries();
    for entry in entries.iter().skip(from) {
        match (entry.is_notice, entry.role) {
            (true, _) => println!("   !  {}", entry.content),
            (false, apollolytics_transcript::Role::User) => {}
            (false, apollolytics_transcript::Role::Assistant) => {
                println!(" bot: {}", entry.content)
            }
        }
    }
    entries.len()
}
