use clap::Parser;
use peercall_lib::config::{self, ClientConfig, DEFAULT_PORT, DEFAULT_SERVER};
use peercall_lib::{Event, UiEvent, UserCommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "peercall", version, about = "Call a peer through a HELLO/SESSION relay")]
struct Cli {
    /// Relay host
    #[arg(long, env = "PEERCALL_SERVER", default_value = DEFAULT_SERVER)]
    server: String,

    #[arg(long, env = "PEERCALL_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Use ws:// instead of wss://
    #[arg(long)]
    no_tls: bool,

    /// Accept self-signed relay certificates
    #[arg(long)]
    insecure: bool,

    /// Fixed peer id instead of a random one
    #[arg(long)]
    peer_id: Option<String>,

    /// Ask the remote peer to send the offer
    #[arg(long)]
    remote_offerer: bool,

    /// Peer to call once registered
    #[arg(long)]
    call: Option<String>,

    /// ICE configuration as JSON, e.g. '{"iceServers":[{"urls":"stun:..."}]}'
    #[arg(long)]
    rtc_config: Option<String>,

    /// Media constraints as JSON, e.g. '{"audio":true,"video":false}'
    #[arg(long)]
    constraints: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

impl Cli {
    /// Folds the flags into a config, collecting the fallbacks to report.
    fn into_config(self) -> (ClientConfig, Vec<String>) {
        let mut warnings = Vec::new();
        let (rtc, err) = config::parse_rtc_settings(self.rtc_config.as_deref().unwrap_or_default());
        warnings.extend(err.map(|e| e.to_string()));
        let (constraints, err) =
            config::parse_constraints(self.constraints.as_deref().unwrap_or_default());
        warnings.extend(err.map(|e| e.to_string()));
        let config = ClientConfig {
            server: self.server,
            port: self.port,
            secure: !self.no_tls,
            insecure_tls: self.insecure,
            peer_id: self.peer_id,
            remote_offerer: self.remote_offerer,
            call: self.call,
            rtc,
            constraints,
            ..ClientConfig::default()
        };
        (config, warnings)
    }
}

fn parse_command(line: &str) -> Option<UserCommand> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    match word {
        "call" => Some(UserCommand::Call(rest.trim().to_string())),
        "send" => Some(UserCommand::SendText(rest.to_string())),
        "disconnect" => Some(UserCommand::Disconnect),
        "quit" | "exit" => Some(UserCommand::Shutdown),
        _ => None,
    }
}

async fn read_commands(commands: mpsc::UnboundedSender<Event>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Some(command) => {
                if commands.send(Event::User(command)).is_err() {
                    return;
                }
            }
            None => eprintln!("commands: call <peer> | send <text> | disconnect | quit"),
        }
    }
    let _ = commands.send(Event::User(UserCommand::Shutdown));
}

async fn print_ui(mut ui: mpsc::UnboundedReceiver<UiEvent>) {
    while let Some(event) = ui.recv().await {
        match event {
            UiEvent::Status(text) => println!("[status] {text}"),
            UiEvent::Error(text) => println!("[error] {text}"),
            UiEvent::PeerId(id) => println!("[peer id] {id}"),
            UiEvent::Transcript(line) => println!("{line}"),
            UiEvent::CallActive(true) => println!("[call] active"),
            UiEvent::CallActive(false) => println!("[call] ended"),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = peercall_lib::logger::init(cli.log_level) {
        eprintln!("{err}");
    }
    let (config, warnings) = cli.into_config();
    for warning in warnings {
        println!("[error] {warning}");
    }

    let (commands, ui, client) = match peercall_lib::build(config) {
        Ok(parts) => parts,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };
    tokio::spawn(print_ui(ui));
    tokio::spawn(read_commands(commands));
    client.await;
}
