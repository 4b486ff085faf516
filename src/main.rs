//! Raw Panel toolkit binary.
//!
//! One executable, one subcommand per runtime topology: TCP bridges, the
//! console inspector, the burn-in tester and the WebSocket relay modes.
//! See the library crate for the protocol runtime itself.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tokio::sync::watch;

use panelhub::bridge::{run_bridge, run_link_mode, BridgeDialects};
use panelhub::burnin::{run_burnin, BurninOptions};
use panelhub::constants::DEFAULT_PORT;
use panelhub::inspect::{run_inspect, InspectOptions};
use panelhub::wsrelay::{run_ws_bridge, run_ws_server, AuthCredentials, WsBridgeOptions};
use panelhub::DialectPreference;

/// The runtime juggles several connections per process; mimalloc behaves
/// better than the system allocator under that kind of churn.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "panelhub", version, about = "Raw Panel protocol toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Dial a panel, accept one system connection on a TCP port, and
    /// translate between them.
    Bridge {
        /// Panel endpoint, `host[:port]` (default port 9923).
        panel: String,
        /// Port to accept the system connection on.
        #[arg(default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Treat the panel as binary regardless of the probe.
        #[arg(long = "binPanel")]
        bin_panel: bool,
        /// Speak binary toward the system (default is ASCII).
        #[arg(long = "binSystem")]
        bin_system: bool,
    },

    /// Dial both a panel and a system, synthesizing the greeting a
    /// dialing panel would send to the system.
    Link {
        /// Panel endpoint, `host[:port]`.
        panel: String,
        /// System endpoint, `host[:port]`.
        system: String,
        /// Treat the panel as binary regardless of the probe.
        #[arg(long = "binPanel")]
        bin_panel: bool,
        /// Speak binary toward the system (default is ASCII).
        #[arg(long = "binSystem")]
        bin_system: bool,
    },

    /// Dial a panel and print everything it says.
    Inspect {
        /// Panel endpoint, `host[:port]`.
        panel: String,
        /// Treat the panel as binary regardless of the probe.
        #[arg(long = "binPanel")]
        bin_panel: bool,
        /// Panel LED/OLED brightness at startup (0-8).
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..=8))]
        brightness: Option<u32>,
        /// Ask for raw ADC values from every available component.
        #[arg(long = "analogProfiling")]
        analog_profiling: bool,
        /// Ask for system statistics every N seconds.
        #[arg(long = "cpuProfiling", value_name = "SECONDS")]
        cpu_profiling: Option<u32>,
    },

    /// Drive a burn-in test from a profile, or record one.
    Burnin {
        /// Panel endpoint, `host[:port]`.
        panel: String,
        /// Burn-in profile path.
        #[arg(long = "file", value_name = "PATH")]
        file: PathBuf,
        /// Capture events into the profile instead of replaying it.
        #[arg(long)]
        record: bool,
        /// Treat the panel as binary regardless of the probe.
        #[arg(long = "binPanel")]
        bin_panel: bool,
        /// Panel LED/OLED brightness at startup (0-8).
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..=8))]
        brightness: Option<u32>,
    },

    /// Dial a panel and relay it to a WebSocket endpoint.
    WsBridge {
        /// Panel endpoint, `host[:port]`.
        panel: String,
        /// Relay endpoint, `ws://` or `wss://`.
        url: String,
        /// Treat the panel as binary regardless of the probe.
        #[arg(long = "binPanel")]
        bin_panel: bool,
        /// Relay client id.
        #[arg(long = "client_id", requires = "client_secret")]
        client_id: Option<String>,
        /// Relay client secret.
        #[arg(long = "client_secret", requires = "client_id")]
        client_secret: Option<String>,
        /// Permit credentials over unencrypted `ws://`.
        #[arg(long = "allow_insecure_auth")]
        allow_insecure_auth: bool,
    },

    /// Serve the WebSocket relay envelope to clients.
    WsServer {
        /// Listen address.
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: String,
        /// Required client id; leave unset to disable authentication.
        #[arg(long = "client_id", requires = "client_secret")]
        client_id: Option<String>,
        /// Required client secret.
        #[arg(long = "client_secret", requires = "client_id")]
        client_secret: Option<String>,
    },
}

/// Validate `host[:port]`, filling in the default port. Fatal before any
/// task starts.
fn normalize_endpoint(endpoint: &str) -> Result<String> {
    let (host, port) = match endpoint.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .with_context(|| format!("invalid port in endpoint {endpoint:?}"))?;
            (host, port)
        }
        None => (endpoint, DEFAULT_PORT),
    };
    if host.is_empty() {
        bail!("invalid endpoint {endpoint:?}: empty host");
    }
    Ok(format!("{host}:{port}"))
}

fn credentials(id: Option<String>, secret: Option<String>) -> Option<AuthCredentials> {
    Some(AuthCredentials {
        client_id: id?,
        client_secret: secret?,
    })
}

fn preference(bin: bool) -> DialectPreference {
    if bin {
        DialectPreference::Binary
    } else {
        DialectPreference::Auto
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    // One cancel signal for the whole process; SIGINT raises it and the
    // active mode completes its shutdown before we return.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received, shutting down");
            let _ = cancel_tx.send(true);
        }
    });

    match cli.command {
        Mode::Bridge {
            panel,
            port,
            bin_panel,
            bin_system,
        } => {
            let panel = normalize_endpoint(&panel)?;
            run_bridge(
                panel,
                port,
                BridgeDialects {
                    panel: preference(bin_panel),
                    system_binary: bin_system,
                },
                cancel_rx,
            )
            .await
        }

        Mode::Link {
            panel,
            system,
            bin_panel,
            bin_system,
        } => {
            let panel = normalize_endpoint(&panel)?;
            let system = normalize_endpoint(&system)?;
            run_link_mode(
                panel,
                system,
                BridgeDialects {
                    panel: preference(bin_panel),
                    system_binary: bin_system,
                },
                cancel_rx,
            )
            .await
        }

        Mode::Inspect {
            panel,
            bin_panel,
            brightness,
            analog_profiling,
            cpu_profiling,
        } => {
            let panel = normalize_endpoint(&panel)?;
            run_inspect(
                panel,
                InspectOptions {
                    dialect: preference(bin_panel),
                    brightness,
                    analog_profiling,
                    cpu_profiling_sec: cpu_profiling,
                },
                cancel_rx,
            )
            .await
        }

        Mode::Burnin {
            panel,
            file,
            record,
            bin_panel,
            brightness,
        } => {
            let panel = normalize_endpoint(&panel)?;
            run_burnin(
                panel,
                BurninOptions {
                    dialect: preference(bin_panel),
                    file,
                    record,
                    brightness,
                },
                cancel_rx,
            )
            .await
        }

        Mode::WsBridge {
            panel,
            url,
            bin_panel,
            client_id,
            client_secret,
            allow_insecure_auth,
        } => {
            let panel = normalize_endpoint(&panel)?;
            run_ws_bridge(
                panel,
                url,
                WsBridgeOptions {
                    panel_dialect: preference(bin_panel),
                    credentials: credentials(client_id, client_secret),
                    allow_insecure_auth,
                },
                cancel_rx,
            )
            .await
        }

        Mode::WsServer {
            listen,
            client_id,
            client_secret,
        } => run_ws_server(listen, credentials(client_id, client_secret), cancel_rx).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("10.0.0.9").unwrap(), "10.0.0.9:9923");
        assert_eq!(normalize_endpoint("panel:4000").unwrap(), "panel:4000");
        assert!(normalize_endpoint(":4000").is_err());
        assert!(normalize_endpoint("panel:notaport").is_err());
    }

    #[test]
    fn test_cli_parses_bridge_flags() {
        let cli = Cli::try_parse_from([
            "panelhub", "bridge", "10.0.0.9", "9923", "--binPanel", "--binSystem",
        ])
        .unwrap();
        match cli.command {
            Mode::Bridge {
                bin_panel,
                bin_system,
                port,
                ..
            } => {
                assert!(bin_panel);
                assert!(bin_system);
                assert_eq!(port, 9923);
            }
            _ => panic!("expected bridge mode"),
        }
    }

    #[test]
    fn test_cli_rejects_out_of_range_brightness() {
        assert!(Cli::try_parse_from([
            "panelhub",
            "inspect",
            "10.0.0.9",
            "--brightness",
            "9"
        ])
        .is_err());
    }

    #[test]
    fn test_cli_requires_paired_credentials() {
        assert!(Cli::try_parse_from([
            "panelhub",
            "ws-server",
            "--client_id",
            "admin"
        ])
        .is_err());
    }
}
