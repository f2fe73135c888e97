//! Manual exercising tool for the MQTT core (§2.1 addendum): connects over
//! either transport, optionally subscribes and publishes once, and prints
//! status transitions and inbound messages to stdout until interrupted.

use std::fs;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;

use iot_mqtt_core::config::{ClientIdentity, TransportSpec};
use iot_mqtt_core::credentials::EnvCredentialsProvider;
use iot_mqtt_core::registry::Dispatch;
use iot_mqtt_core::{ClientConfig, LifecycleController, QoS};

#[derive(Parser, Debug)]
#[command(name = "mqtt-probe", about = "Exercise the MQTT client core against a live broker")]
struct Args {
    /// Path to a TOML config file describing the transport and client identity.
    #[arg(short, long)]
    config: PathBuf,

    /// Topic filter to subscribe to on connect.
    #[arg(short, long)]
    subscribe: Option<String>,

    /// If set, publish this payload to `--publish-topic` once connected.
    #[arg(long)]
    publish: Option<String>,

    #[arg(long, default_value = "probe/out")]
    publish_topic: String,

    /// Seconds to stay connected before exiting.
    #[arg(long, default_value_t = 30)]
    run_secs: u64,
}

#[derive(Deserialize)]
struct ProbeConfig {
    client_id: String,
    #[serde(default = "default_keep_alive")]
    keep_alive_secs: u16,
    #[serde(default = "default_true")]
    clean_session: bool,
    transport: TransportConfig,
}

fn default_keep_alive() -> u16 {
    30
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TransportConfig {
    DirectTls {
        host: String,
        port: u16,
        cert_chain_path: Option<PathBuf>,
        private_key_path: Option<PathBuf>,
    },
    SignedWebsocket {
        endpoint_host: String,
        region: String,
    },
}

fn load_client_identity(cert_chain_path: &PathBuf, private_key_path: &PathBuf) -> Result<ClientIdentity> {
    let cert_file = fs::File::open(cert_chain_path)
        .with_context(|| format!("opening {}", cert_chain_path.display()))?;
    let certificate_chain_der = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .context("parsing client certificate chain")?;

    let key_file = fs::File::open(private_key_path)
        .with_context(|| format!("opening {}", private_key_path.display()))?;
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(key_file))
        .context("parsing client private key")?;
    let private_key_der = keys.pop().context("no private key found in PEM file")?;

    Ok(ClientIdentity {
        certificate_chain_der,
        private_key_der,
    })
}

fn build_transport_spec(config: TransportConfig) -> Result<TransportSpec> {
    match config {
        TransportConfig::DirectTls {
            host,
            port,
            cert_chain_path,
            private_key_path,
        } => {
            let client_identity = match (cert_chain_path, private_key_path) {
                (Some(chain), Some(key)) => Some(load_client_identity(&chain, &key)?),
                (None, None) => None,
                _ => bail!("cert_chain_path and private_key_path must be set together"),
            };
            Ok(TransportSpec::DirectTls {
                host,
                port,
                client_identity,
            })
        }
        TransportConfig::SignedWebsocket { endpoint_host, region } => Ok(TransportSpec::SignedWebSocket {
            endpoint_host,
            region,
            credentials_provider: Arc::new(EnvCredentialsProvider),
        }),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let raw = fs::read_to_string(&args.config).with_context(|| format!("reading {}", args.config.display()))?;
    let probe_config: ProbeConfig = toml::from_str(&raw).context("parsing config file")?;

    let mut client_config = ClientConfig::new(probe_config.client_id);
    client_config.keep_alive_secs = probe_config.keep_alive_secs;
    client_config.clean_session = probe_config.clean_session;

    let transport_spec = build_transport_spec(probe_config.transport)?;

    let controller = LifecycleController::new(client_config, transport_spec, |status| {
        println!("status: {:?}", status);
    });

    controller.connect()?;

    if let Some(filter) = args.subscribe {
        controller.subscribe(
            filter,
            QoS::AtLeastOnce,
            Dispatch::Extended(Arc::new(|topic, payload| {
                println!("message on {}: {} bytes", topic, payload.len());
                if let Ok(text) = std::str::from_utf8(payload) {
                    println!("  {}", text);
                }
            })),
            None,
        )?;
    }

    if let Some(payload) = args.publish {
        std::thread::sleep(Duration::from_millis(500));
        controller.publish(
            args.publish_topic,
            payload.into_bytes(),
            QoS::AtLeastOnce,
            false,
            Some(Box::new(|| println!("publish acked"))),
        )?;
    }

    std::thread::sleep(Duration::from_secs(args.run_secs));
    controller.disconnect();
    println!("final status: {:?}", controller.status());

    Ok(())
}
