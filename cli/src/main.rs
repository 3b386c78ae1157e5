use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Args, Parser, Subcommand, ValueEnum};
use frames::{
    ChatCodec, ChatMessage, Codec, DataMessage, EventMessage, JsonCodec, MessageData,
    ProtobufCodec,
};
use reliable_pubsub::{
    AckDeadline, AckError, Acked, ClientConfig, ClientError, ClientEvent, HttpNegotiator, Negotiator,
    ReliableClient, StaticNegotiator,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing endpoint; pass --negotiate-url or --url")]
    MissingEndpoint,
    #[error("client error: {0}")]
    Client(#[from] ClientError),
    #[error("{0} events not acknowledged")]
    Unacked(usize),
    #[error("session ended: {0}")]
    Disconnected(String),
    #[error("timed out waiting for the session to connect")]
    Timeout,
    #[error("stdin read failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "pubsub-cli", about = "Reliable pubsub websocket client")]
struct Cli {
    /// Negotiation endpoint returning the websocket URL and access token.
    #[arg(long, env = "PUBSUB_NEGOTIATE_URL")]
    negotiate_url: Option<String>,

    /// Websocket URL to connect to directly, skipping negotiation.
    #[arg(long, env = "PUBSUB_URL")]
    url: Option<String>,

    /// Bearer token for negotiation, or the credential for `--url`.
    #[arg(long, env = "PUBSUB_TOKEN")]
    token: Option<String>,

    #[arg(long, env = "PUBSUB_VARIANT", value_enum, default_value_t = Variant::Json)]
    variant: Variant,

    /// Reset the transport when an event goes unacknowledged this long.
    /// `0` disables the deadline; unset keeps the variant's own.
    #[arg(long)]
    ack_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Variant {
    Json,
    Protobuf,
    Chat,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print server messages until interrupted.
    Listen,
    /// Send events and report each ack outcome.
    Send(SendArgs),
    /// Interactive session: each stdin line is sent as an event.
    Chat(ChatArgs),
}

#[derive(Args, Debug)]
struct SendArgs {
    #[arg(long, default_value = "message")]
    event: String,

    #[arg(long, default_value_t = 1)]
    count: usize,

    body: String,
}

#[derive(Args, Debug)]
struct ChatArgs {
    #[arg(long, default_value = "message")]
    event: String,
}

/// What the CLI needs from a protocol variant beyond the codec itself.
trait CliVariant: Codec + Default {
    fn event(name: &str, body: &str) -> Self::Event;
    fn render(payload: &Self::Payload) -> String;
    fn parse_ack_id(raw: &str) -> Option<Self::AckId>;
}

impl CliVariant for JsonCodec {
    fn event(name: &str, body: &str) -> EventMessage {
        pubsub_event(name, body)
    }

    fn render(payload: &DataMessage) -> String {
        render_data(payload)
    }

    fn parse_ack_id(raw: &str) -> Option<u64> {
        raw.parse().ok()
    }
}

impl CliVariant for ProtobufCodec {
    fn event(name: &str, body: &str) -> EventMessage {
        pubsub_event(name, body)
    }

    fn render(payload: &DataMessage) -> String {
        render_data(payload)
    }

    fn parse_ack_id(raw: &str) -> Option<u64> {
        raw.parse().ok()
    }
}

impl CliVariant for ChatCodec {
    fn event(_name: &str, body: &str) -> ChatMessage {
        ChatMessage::text(body, now_ms())
    }

    fn render(payload: &ChatMessage) -> String {
        if payload.from.is_empty() {
            payload.content.clone()
        } else {
            format!("{}: {}", payload.from, payload.content)
        }
    }

    fn parse_ack_id(raw: &str) -> Option<String> {
        (!raw.is_empty()).then(|| raw.to_owned())
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let negotiator = negotiator(&cli)?;
    let mut config = ClientConfig::from_env();
    if cli.ack_timeout_ms.is_some() {
        config.ack_timeout = AckDeadline::from_millis(cli.ack_timeout_ms);
    }

    match cli.variant {
        Variant::Json => run::<JsonCodec>(negotiator, config, cli.command).await,
        Variant::Protobuf => run::<ProtobufCodec>(negotiator, config, cli.command).await,
        Variant::Chat => run::<ChatCodec>(negotiator, config, cli.command).await,
    }
}

fn negotiator(cli: &Cli) -> Result<Arc<dyn Negotiator>, CliError> {
    if let Some(url) = &cli.negotiate_url {
        let mut negotiator = HttpNegotiator::new(url.clone());
        if let Some(token) = &cli.token {
            negotiator = negotiator.with_bearer(token.clone());
        }
        return Ok(Arc::new(negotiator));
    }
    let url = cli.url.clone().ok_or(CliError::MissingEndpoint)?;
    Ok(Arc::new(StaticNegotiator::new(url, cli.token.clone())))
}

async fn run<C: CliVariant>(
    negotiator: Arc<dyn Negotiator>,
    config: ClientConfig,
    command: Command,
) -> Result<(), CliError> {
    let (client, mut events) = ReliableClient::new(C::default(), negotiator, config);
    client.connect().await?;
    let result = match command {
        Command::Listen => run_listen::<C>(&mut events).await,
        Command::Send(args) => run_send(&client, &mut events, args).await,
        Command::Chat(args) => run_chat(&client, &mut events, args).await,
    };
    client.close();
    result
}

async fn run_listen<C: CliVariant>(
    events: &mut mpsc::UnboundedReceiver<ClientEvent<C::Payload>>,
) -> Result<(), CliError> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event::<C>(&event)?,
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn run_send<C: CliVariant>(
    client: &ReliableClient<C>,
    events: &mut mpsc::UnboundedReceiver<ClientEvent<C::Payload>>,
    args: SendArgs,
) -> Result<(), CliError> {
    wait_for_connected::<C>(events, Duration::from_secs(15)).await?;

    let mut pending = Vec::with_capacity(args.count);
    for _ in 0..args.count {
        let ack_id = client.next_ack_id();
        let ack = client.send_event(ack_id.clone(), C::event(&args.event, &args.body))?;
        pending.push((ack_id, ack));
    }

    let mut failed = 0;
    for (ack_id, ack) in pending {
        match ack.await {
            Ok(acked) => println!("{acked}"),
            Err(error) => {
                failed += 1;
                println!("ack {ack_id} failed: {error}");
            }
        }
    }
    if failed > 0 {
        return Err(CliError::Unacked(failed));
    }
    Ok(())
}

async fn wait_for_connected<C: CliVariant>(
    events: &mut mpsc::UnboundedReceiver<ClientEvent<C::Payload>>,
    timeout: Duration,
) -> Result<(), CliError> {
    let wait = async {
        loop {
            match events.recv().await {
                Some(ClientEvent::Connected { connection_id, .. }) => {
                    info!(%connection_id, "cli: session connected");
                    return Ok(());
                }
                Some(ClientEvent::Disconnected { reason }) => {
                    return Err(CliError::Disconnected(reason));
                }
                Some(ClientEvent::Message(payload)) => println!("{}", C::render(&payload)),
                None => return Err(CliError::Disconnected("client dropped".to_owned())),
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| CliError::Timeout)?
}

/// Outcome of one send, reported back to the chat loop.
struct Outcome<A> {
    ack_id: A,
    body: String,
    result: Result<Acked<A>, AckError>,
}

async fn run_chat<C: CliVariant>(
    client: &ReliableClient<C>,
    events: &mut mpsc::UnboundedReceiver<ClientEvent<C::Payload>>,
    args: ChatArgs,
) -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let (outcomes_tx, mut outcomes) = mpsc::unbounded_channel::<Outcome<C::AckId>>();
    // Bodies of failed sends, by displayed ack id, for `/retry`.
    let mut failed: HashMap<String, String> = HashMap::new();

    eprintln!("commands: /status /reconnect /retry <ack-id> /quit");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { return Ok(()) };
                let line = line.trim();
                match line.split_once(' ').unwrap_or((line, "")) {
                    ("", _) => {}
                    ("/quit", _) => return Ok(()),
                    ("/status", _) => eprintln!(
                        "status={} connection={} last_sequence={:?} pending={}",
                        client.status(),
                        client.connection_id().as_deref().unwrap_or("-"),
                        client.last_sequence_id(),
                        client.pending_acks(),
                    ),
                    ("/reconnect", _) => client.reconnect().await?,
                    ("/retry", raw) => {
                        let raw = raw.trim();
                        match (C::parse_ack_id(raw), failed.remove(raw)) {
                            (Some(ack_id), Some(body)) => {
                                send_line(client, ack_id, &args.event, body, &outcomes_tx)?;
                            }
                            _ => eprintln!("no failed send with ack id `{raw}`"),
                        }
                    }
                    _ => {
                        let ack_id = client.next_ack_id();
                        send_line(client, ack_id, &args.event, line.to_owned(), &outcomes_tx)?;
                    }
                }
            }
            Some(outcome) = outcomes.recv() => match outcome.result {
                Ok(acked) => eprintln!("{acked}"),
                Err(error) => {
                    eprintln!("ack {} failed: {error}", outcome.ack_id);
                    failed.insert(outcome.ack_id.to_string(), outcome.body);
                }
            },
            event = events.recv() => match event {
                Some(event) => print_event::<C>(&event)?,
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn send_line<C: CliVariant>(
    client: &ReliableClient<C>,
    ack_id: C::AckId,
    event: &str,
    body: String,
    outcomes: &mpsc::UnboundedSender<Outcome<C::AckId>>,
) -> Result<(), CliError> {
    let ack = client.send_event(ack_id.clone(), C::event(event, &body))?;
    debug!(%ack_id, "cli: event queued");
    let outcomes = outcomes.clone();
    tokio::spawn(async move {
        let result = ack.await;
        let _ = outcomes.send(Outcome {
            ack_id,
            body,
            result,
        });
    });
    Ok(())
}

fn print_event<C: CliVariant>(event: &ClientEvent<C::Payload>) -> Result<(), CliError> {
    match event {
        ClientEvent::Connected {
            connection_id,
            user_id,
        } => eprintln!(
            "connected: {connection_id} as {}",
            user_id.as_deref().unwrap_or("anonymous")
        ),
        ClientEvent::Disconnected { reason } => {
            return Err(CliError::Disconnected(reason.clone()));
        }
        ClientEvent::Message(payload) => println!("{}", C::render(payload)),
    }
    Ok(())
}

/// JSON bodies travel as JSON data, anything else as text.
fn pubsub_event(name: &str, body: &str) -> EventMessage {
    let data = match serde_json::from_str::<Value>(body) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => MessageData::Json(value),
        _ => MessageData::Text(body.to_owned()),
    };
    EventMessage::new(name, data)
}

fn render_data(message: &DataMessage) -> String {
    let source = message.group.as_deref().unwrap_or(&message.from);
    let body = match &message.data {
        MessageData::Text(text) => text.clone(),
        MessageData::Json(value) => value.to_string(),
        MessageData::Binary(bytes) => format!("<{} bytes>", bytes.len()),
        MessageData::Protobuf(any) => format!("<{}>", any.type_url),
    };
    format!("[{source}] {body}")
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}
