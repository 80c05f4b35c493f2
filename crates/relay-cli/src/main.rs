use std::process::ExitCode;

use clap::{Parser, Subcommand};
use relay_core::app::{PUBLISH_TIMEOUT, publish_user};
use relay_core::domain::User;
use relay_core::impls::{AmqpConnector, AmqpPublisher, TcpForwarder};
use relay_core::observability::init_logging;
use relay_core::{DeliveryLoop, Relay, RelayConfig};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Relay messages from a broker queue to a newline-delimited TCP sink.
///
/// Configuration is read from `RELAY_*` environment variables; the flags
/// below override the matching variable.
#[derive(Debug, Parser)]
#[command(name = "relay", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Consume the queue and forward every message (default).
    Run {
        /// Queue to consume from (RELAY_QUEUE).
        #[arg(long)]
        queue: Option<String>,

        /// Downstream sink as host:port (RELAY_SINK_ADDR).
        #[arg(long)]
        sink: Option<String>,
    },

    /// Publish one sample user record to the queue and exit.
    Publish {
        /// Address to publish to (RELAY_QUEUE).
        #[arg(long)]
        queue: Option<String>,

        #[arg(long, default_value = "Alice")]
        name: String,

        #[arg(long, default_value_t = 30)]
        age: u32,

        #[arg(long, default_value = "alice@example.com")]
        email: String,

        /// Kept on the record but never sent.
        #[arg(long, default_value = "xyz-123")]
        internal_id: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(config.log_format) {
        eprintln!("FATAL: failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command.unwrap_or(Command::Run { queue: None, sink: None }) {
        Command::Run { queue, sink } => {
            if let Some(queue) = queue {
                config.queue = queue;
            }
            if let Some(sink) = sink {
                config.sink_addr = sink;
            }
            run(config).await
        }
        Command::Publish {
            queue,
            name,
            age,
            email,
            internal_id,
        } => {
            if let Some(queue) = queue {
                config.queue = queue;
            }
            let user = User {
                name,
                age,
                email,
                internal_id,
            };
            publish(config, user).await
        }
    }
}

async fn run(config: RelayConfig) -> ExitCode {
    let url = config.broker_url();
    info!(
        broker = %url,
        queue = %config.queue,
        sink = %config.sink_addr,
        ack_policy = ?config.ack_mode,
        reconnect_max_attempts = config.reconnect_max_attempts,
        "starting relay"
    );

    let connector = AmqpConnector::new(url, config.queue.clone());
    let forwarder =
        TcpForwarder::new(config.sink_addr.clone(), config.connect_timeout).with_write_timeout(config.write_timeout);
    let delivery = DeliveryLoop::new(forwarder).with_policy(config.ack_policy());
    let mut relay = Relay::new(connector, delivery).with_reconnect(config.reconnect_policy());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_interrupt(shutdown_tx));

    match relay.run(shutdown_rx).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "relay terminated");
            ExitCode::FAILURE
        }
    }
}

/// Request shutdown on ctrl-c. Without a signal handler the sender is kept
/// alive, so the relay keeps running until it fails or is killed.
async fn wait_for_interrupt(shutdown: watch::Sender<bool>) {
    wait_for_signal(tokio::signal::ctrl_c(), shutdown).await
}

async fn wait_for_signal<S>(signal: S, shutdown: watch::Sender<bool>)
where
    S: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("interrupt received, shutting down");
            let _ = shutdown.send(true);
        }
        Err(e) => {
            warn!(error = %e, "failed to listen for interrupt, ctrl-c will not stop the relay");
            std::future::pending::<()>().await;
        }
    }
}

async fn publish(config: RelayConfig, user: User) -> ExitCode {
    let publisher = AmqpPublisher::new(config.broker_url(), config.queue.clone());
    match publish_user(&publisher, &user, PUBLISH_TIMEOUT).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "failed to publish message");
            ExitCode::FAILURE
        }
    }
}
