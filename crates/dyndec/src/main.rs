//! dyndec - dynamic protobuf decoder
//!
//! ## Usage
//!
//! ```bash
//! # Run the decoder (UDP data plane + HTTP control plane)
//! dyndec run --data-port 20788 --api-port 20789
//!
//! # Also forward control messages to the agent
//! dyndec run --enable-control --control-port 20787
//!
//! # Register packages and bind streams listed in loader files
//! dyndec load -c codelets.yaml
//!
//! # Unbind them again
//! dyndec unload -c codelets.yaml
//!
//! # Send a control message
//! dyndec control --stream-id 00112233-4455-6677-8899-aabbccddeeff --inline-json '{"code": 7}'
//!
//! # Send it straight to the agent, resolving the type from loader files
//! dyndec forward -c codelets.yaml --stream-id 00112233-4455-6677-8899-aabbccddeeff -j '{"code": 7}'
//! ```

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use dyndec::{
    load_plan_from_files, unload_plan_from_files, ControlPlaneClient, DecoderConfig,
    DispatchClient, DispatchConfig, PacketSink, StreamId, Supervisor,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dyndec")]
#[command(
    author,
    version,
    about = "Dynamic protobuf decoder and control dispatcher for telemetry agents"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the decoder
    Run(RunArgs),

    /// Register packages and bind the streams listed in loader files
    Load {
        /// Control-plane API URL
        #[arg(long, default_value = "http://localhost:20789", env = "DYNDEC_URL")]
        url: String,

        /// Loader file(s)
        #[arg(short, long = "config", required = true)]
        configs: Vec<PathBuf>,
    },

    /// Unbind the streams listed in loader files
    Unload {
        /// Control-plane API URL
        #[arg(long, default_value = "http://localhost:20789", env = "DYNDEC_URL")]
        url: String,

        /// Loader file(s)
        #[arg(short, long = "config", required = true)]
        configs: Vec<PathBuf>,
    },

    /// Send a JSON control message to the agent through the decoder
    #[command(group(ArgGroup::new("payload").required(true).args(["file", "inline_json"])))]
    Control {
        /// Control-plane API URL
        #[arg(long, default_value = "http://localhost:20789", env = "DYNDEC_URL")]
        url: String,

        /// Target stream
        #[arg(long)]
        stream_id: StreamId,

        /// File holding the JSON payload
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// JSON payload
        #[arg(long)]
        inline_json: Option<String>,
    },

    /// Send a JSON control message directly to the agent, no decoder needed
    #[command(group(ArgGroup::new("payload").required(true).args(["file", "inline_json"])))]
    Forward {
        /// Loader file(s) binding the stream to its message type
        #[arg(short, long = "config", required = true)]
        configs: Vec<PathBuf>,

        /// Target stream
        #[arg(long)]
        stream_id: StreamId,

        /// File holding the JSON payload
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// JSON payload
        #[arg(short = 'j', long)]
        inline_json: Option<String>,

        /// Agent control host
        #[arg(long, default_value = "localhost")]
        control_host: String,

        /// Agent control TCP port
        #[arg(long, default_value_t = 20787)]
        control_port: u16,

        /// TCP keep-alive idle time, in seconds
        #[arg(long)]
        keep_alive_secs: Option<u64>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// YAML decoder configuration; flags override its values
    #[arg(long, env = "DYNDEC_CONFIG")]
    config: Option<PathBuf>,

    /// Control-plane API bind host
    #[arg(long)]
    api_host: Option<IpAddr>,

    /// Control-plane API port
    #[arg(long)]
    api_port: Option<u16>,

    /// Data-plane UDP bind host
    #[arg(long)]
    data_host: Option<IpAddr>,

    /// Data-plane UDP port
    #[arg(long)]
    data_port: Option<u16>,

    /// Receive buffer size in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Forward `/control` requests to the agent
    #[arg(long)]
    enable_control: bool,

    /// Agent control host
    #[arg(long)]
    control_host: Option<String>,

    /// Agent control TCP port
    #[arg(long)]
    control_port: Option<u16>,

    /// TCP keep-alive idle time for the control connection, in seconds
    #[arg(long)]
    keep_alive_secs: Option<u64>,
}

impl RunArgs {
    fn into_config(self) -> anyhow::Result<DecoderConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_yaml::from_str(&content)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            None => DecoderConfig::default(),
        };

        if let Some(host) = self.api_host {
            config.api.host = host;
        }
        if let Some(port) = self.api_port {
            config.api.port = port;
        }
        if let Some(host) = self.data_host {
            config.data.host = host;
        }
        if let Some(port) = self.data_port {
            config.data.port = port;
        }
        if let Some(size) = self.buffer_size {
            config.data.buffer_size = size;
        }
        if self.enable_control {
            config.dispatch.enabled = true;
        }
        if let Some(host) = self.control_host {
            config.dispatch.host = host;
        }
        if let Some(port) = self.control_port {
            config.dispatch.port = port;
        }
        if let Some(secs) = self.keep_alive_secs {
            config.dispatch = config.dispatch.with_keep_alive(Duration::from_secs(secs));
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with configured log level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Load { url, configs } => {
            let plan = load_plan_from_files(&configs)?;
            info!(
                packages = plan.packages.len(),
                streams = plan.stream_count(),
                "Loading decoder configuration"
            );
            ControlPlaneClient::new(url).load(&plan).await?;
            Ok(())
        }
        Commands::Unload { url, configs } => {
            let plan = unload_plan_from_files(&configs)?;
            info!(streams = plan.streams.len(), "Unloading decoder configuration");
            ControlPlaneClient::new(url).unload(&plan).await?;
            Ok(())
        }
        Commands::Control {
            url,
            stream_id,
            file,
            inline_json,
        } => {
            let payload = read_payload(file, inline_json)?;
            ControlPlaneClient::new(url)
                .send_control(stream_id, &payload)
                .await?;
            info!(stream_id = %stream_id, "Control message sent");
            Ok(())
        }
        Commands::Forward {
            configs,
            stream_id,
            file,
            inline_json,
            control_host,
            control_port,
            keep_alive_secs,
        } => {
            let payload = read_payload(file, inline_json)?;
            let plan = load_plan_from_files(&configs)?;

            let mut config = DispatchConfig::enabled(control_host, control_port);
            if let Some(secs) = keep_alive_secs {
                config = config.with_keep_alive(Duration::from_secs(secs));
            }
            DispatchClient::new(config)
                .forward(&plan, stream_id, &payload)
                .await?;
            info!(stream_id = %stream_id, "Control message forwarded");
            Ok(())
        }
    }
}

/// JSON control payload from `--file` or `--inline-json`
fn read_payload(file: Option<PathBuf>, inline_json: Option<String>) -> anyhow::Result<String> {
    let payload = match (file, inline_json) {
        (Some(path), _) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, Some(json)) => json,
        (None, None) => anyhow::bail!("either --file or --inline-json is required"),
    };
    serde_json::from_str::<serde_json::Value>(&payload)
        .context("control payload is not valid JSON")?;
    Ok(payload)
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = args.into_config()?;
    let supervisor = Supervisor::bind(config).await?;

    info!("Data plane listening on udp://{}", supervisor.data_addr()?);
    info!("Control plane listening on http://{}", supervisor.api_addr()?);

    let sink: Arc<dyn PacketSink> = Arc::new(|stream: StreamId, json: Vec<u8>| {
        info!(stream_id = %stream, "{}", String::from_utf8_lossy(&json));
    });

    supervisor.run(sink).await?;
    info!("Goodbye!");
    Ok(())
}
