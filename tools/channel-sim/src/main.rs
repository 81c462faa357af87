use std::path::PathBuf;

use anyhow::{Context, Result};
use channel_engine::{
    ChannelConfig, ChannelService, ChannelStateMachine, FileSink, Network, ParticipantId, SettlementSink,
};
use clap::Parser;
use state_boc::WireEncoding;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod script;

#[derive(Parser, Debug)]
#[command(name = "channel-sim", about = "Replay a payment-channel script and log every state root")]
struct Cli {
    /// JSON channel config; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    network: Option<Network>,
    #[arg(long)]
    security_bits: Option<u32>,
    #[arg(long)]
    proof_timeout_ms: Option<u64>,
    /// Participant 0 name; its id is derived from the name.
    #[arg(long, default_value = "alice")]
    party_a: String,
    #[arg(long, default_value = "bob")]
    party_b: String,
    /// Participant 0 deposit. Defaults to the config's initial balance.
    #[arg(long)]
    deposit_a: Option<u64>,
    #[arg(long)]
    deposit_b: Option<u64>,
    /// JSON list of steps. Runs a built-in demo when omitted.
    #[arg(long)]
    script: Option<PathBuf>,
    /// Directory receiving the final snapshot on settlement.
    #[arg(long)]
    settle_dir: Option<PathBuf>,
    #[arg(long, default_value = "binary")]
    encoding: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ChannelConfig::load(path).context("failed to load channel config")?,
        None => ChannelConfig::default(),
    };
    if let Some(network) = cli.network {
        config.network = network;
    }
    if let Some(bits) = cli.security_bits {
        config.security_bits = bits;
    }
    if let Some(timeout) = cli.proof_timeout_ms {
        config.proof_timeout_ms = timeout;
    }
    config.validate().context("invalid channel config")?;
    let encoding = parse_encoding(&cli.encoding)?;

    let deposit_a = cli.deposit_a.unwrap_or(config.initial_balance);
    let deposit_b = cli.deposit_b.unwrap_or(config.initial_balance);
    let parties = [
        ParticipantId::from_label(&cli.party_a),
        ParticipantId::from_label(&cli.party_b),
    ];
    let machine = ChannelStateMachine::open(config, parties, [deposit_a, deposit_b])
        .context("failed to open channel")?;
    info!(root = %hex::encode(machine.root()), "channel ready");
    let service = ChannelService::new(machine);

    let steps = match &cli.script {
        Some(path) => script::load(path)?,
        None => script::demo(),
    };
    let mut file_sink = cli.settle_dir.map(FileSink::new);
    let sink = file_sink.as_mut().map(|sink| sink as &mut dyn SettlementSink);
    let report = script::run(&service, &steps, sink, encoding).await?;

    let state = service.state();
    info!(
        committed = report.committed,
        rejected = report.rejected,
        nonce = state.nonce,
        root = %state.root_hex(),
        "script finished"
    );
    println!("{}", serde_json::to_string_pretty(&state).context("rendering final state")?);
    Ok(())
}

fn parse_encoding(value: &str) -> Result<WireEncoding> {
    match value {
        "binary" => Ok(WireEncoding::Binary),
        "json" => Ok(WireEncoding::Json),
        other => anyhow::bail!("unknown encoding {other:?}, expected binary or json"),
    }
}
