//! `ztpd`: the provisioning daemon. Loads configuration, wires the Device
//! Store, Driver registry, Commander, Adopter, Ingest Listener, Bootstrap
//! File Server, Command RPC, and (optionally) the ephemeral-blob HTTP
//! server, then runs until terminated.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use ztp_controller::adopters::{CdpAdopter, Opt82Adopter, ReqwestInventoryClient};
use ztp_controller::config::{AdopterMode, Config};
use ztp_controller::domain::driver::TcpTelnetTransportFactory;
use ztp_controller::domain::{
    BootstrapParams, CiscoIosDriver, Commander, DriverRegistry, EphemeralStore, InMemoryDeviceStore,
};
use ztp_controller::{bootstrap, http_blob, ingest, rpc};

#[derive(Parser, Debug)]
#[command(name = "ztpd", about = "Zero-touch provisioning controller daemon")]
struct Args {
    /// Path to the controller's TOML configuration file.
    #[arg(short, long, default_value = "ztpd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    let store = InMemoryDeviceStore::new();
    let ephemeral_store = EphemeralStore::new();
    ephemeral_store.spawn_sweeper();

    let base_config_template = std::fs::read_to_string(&config.base_config_template_path).map_err(|e| {
        format!(
            "failed to read base config template {}: {e}",
            config.base_config_template_path.display()
        )
    })?;

    let mut registry = DriverRegistry::new();
    registry.register(
        config.default_device_class.clone(),
        Arc::new(CiscoIosDriver::new(
            Arc::new(TcpTelnetTransportFactory),
            base_config_template,
        )),
    );
    let driver_registry = Arc::new(registry);

    let commander = Commander::new(store.clone() as Arc<dyn ztp_controller::domain::DeviceStore>);
    commander.spawn_supervisor();

    let bootstrap_params = BootstrapParams {
        adopt_dn: config.liscain_adopt_dn.clone(),
        init_username: config.liscain_init_username.clone(),
        init_password: config.liscain_init_password.clone(),
    };

    let adopter: Option<Arc<dyn ztp_controller::adopters::Adopter>> = if config.autoconf.enabled {
        let autoconf_path = config
            .autoconf
            .path
            .clone()
            .ok_or("autoconf_enabled is true but autoconf_path is not set")?;
        let whitelist = config.autoconf.whitelist_prefixes();
        match config.autoconf.mode {
            Some(AdopterMode::Opt82) => Some(Arc::new(Opt82Adopter::new(
                store.clone() as Arc<dyn ztp_controller::domain::DeviceStore>,
                Arc::clone(&commander),
                Arc::clone(&driver_registry),
                Arc::clone(&ephemeral_store),
                autoconf_path,
                whitelist,
            ))),
            Some(AdopterMode::Cdp) => {
                let inventory_url = config
                    .autoconf
                    .cdp_jaspy_api
                    .clone()
                    .ok_or("autoconf_mode is cdp but autoconf_cdp_jaspy_api is not set")?;
                Some(Arc::new(CdpAdopter::new(
                    Arc::clone(&commander),
                    Arc::clone(&driver_registry),
                    Arc::clone(&ephemeral_store),
                    Arc::new(ReqwestInventoryClient::new(inventory_url)),
                    autoconf_path,
                    whitelist,
                )))
            }
            None => return Err("autoconf_enabled is true but autoconf_mode is not set".into()),
        }
    } else {
        None
    };

    let bootstrap_server = Arc::new(bootstrap::BootstrapFileServer::new(
        store.clone() as Arc<dyn ztp_controller::domain::DeviceStore>,
        Arc::clone(&commander),
        Arc::clone(&driver_registry),
        Arc::clone(&ephemeral_store),
        bootstrap_params.clone(),
        config.default_device_class.clone(),
        adopter.clone(),
    ));

    let command_rpc = rpc::CommandRpc::new(
        store.clone() as Arc<dyn ztp_controller::domain::DeviceStore>,
        Arc::clone(&commander),
        Arc::clone(&driver_registry),
        Arc::clone(&ephemeral_store),
        bootstrap_params,
        adopter,
    );

    let ingest_listener = ingest::IngestListener::new(store as Arc<dyn ztp_controller::domain::DeviceStore>);

    let bootstrap_bind = config.bootstrap_listener.clone();
    let bootstrap_handle = tokio::spawn(async move {
        if let Err(e) = bootstrap_server.serve(&bootstrap_bind).await {
            tracing::error!(error = %e, "bootstrap file server exited");
        }
    });

    let rpc_bind = config.command_socket.clone();
    let rpc_handle = tokio::spawn(async move {
        if let Err(e) = command_rpc.serve(&rpc_bind).await {
            tracing::error!(error = %e, "command rpc exited");
        }
    });

    let nats_url = config.nats_url.clone();
    let subject = config.opt82_zmq_listener.clone();
    let ingest_handle = tokio::spawn(async move {
        if let Err(e) = ingest_listener.run(&nats_url, &subject).await {
            tracing::error!(error = %e, "ingest listener exited");
        }
    });

    let http_handle = if config.serve_http.unwrap_or(false) {
        let port = config.http_port.ok_or("serve_http is true but http_port is not set")?;
        let bind = format!("0.0.0.0:{port}");
        Some(tokio::spawn(async move {
            if let Err(e) = http_blob::serve(ephemeral_store, &bind).await {
                tracing::error!(error = %e, "ephemeral blob http server exited");
            }
        }))
    } else {
        None
    };

    tracing::info!("ztpd started");

    tokio::select! {
        _ = bootstrap_handle => {},
        _ = rpc_handle => {},
        _ = ingest_handle => {},
        _ = async {
            if let Some(h) = http_handle {
                let _ = h.await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {},
    }

    Ok(())
}
