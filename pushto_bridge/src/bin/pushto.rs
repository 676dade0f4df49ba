use clap::Parser;
use log::{info, warn};
use pushto_bridge::config::{default_config_path, Config};
use pushto_bridge::host::{self, Host};
use pushto_bridge::model::{BridgeError, BridgeResult};
use pushto_core::link::available_ports;
use pushto_core::SystemPorts;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "pushto")]
#[command(about = "Bridge between a push-to telescope mount and a sky view")]
struct Args {
    /// Serial port to open (e.g., /dev/ttyUSB0, COM3)
    #[arg(short, long)]
    port: Option<String>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Update period in milliseconds
    #[arg(long, default_value = "50")]
    tick_ms: u64,

    /// Reconnect to --port on the next start
    #[arg(long, requires = "port")]
    remember: bool,
}

fn main() -> BridgeResult<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_ports {
        for port in available_ports()? {
            println!("{port}");
        }
        return Ok(());
    }

    let config_path = args.config.unwrap_or_else(default_config_path);
    let mut config = Config::load_from(&config_path)?;
    if args.remember {
        config.set_reconnect_port(args.port.clone());
        config.save_to(&config_path)?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| BridgeError::ConfigError(format!("Failed to start runtime: {e}")))?;

    let result = runtime.block_on(async {
        let mut host = Host::new(SystemPorts, config, config_path, chrono::Utc::now());
        match &args.port {
            Some(port) => {
                if let Err(e) = host.connect(port) {
                    warn!("{e}");
                }
            }
            None => {
                host.auto_reconnect();
            }
        }
        println!("{}", host.status());

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();

        let printer = tokio::spawn(async move {
            while let Some(reply) = reply_rx.recv().await {
                println!("{reply}");
            }
        });
        let stdin_replies = reply_tx.clone();
        let reader = tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if let Err(e) = host::forward_commands(stdin, command_tx, stdin_replies).await {
                warn!("{e}");
            }
        });

        let tick = Duration::from_millis(args.tick_ms.max(1));
        let result = host::run(host, command_rx, reply_tx, tick).await;
        reader.abort();
        let _ = printer.await;
        result.map(|_| ())
    });

    // A pending stdin read would otherwise hold the runtime open.
    runtime.shutdown_background();
    info!("Exiting");
    result
}
