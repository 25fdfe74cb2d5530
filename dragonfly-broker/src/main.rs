use std::env;
use std::path::Path;

use dragonfly_broker::broker::Broker;
use dragonfly_broker::config::BrokerConfig;
use dragonfly_broker::logger::BrokerLogger;

const DEFAULT_CONFIG_PATH: &str = "dragonfly.conf";

#[tokio::main]
async fn main() {
    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| String::from(DEFAULT_CONFIG_PATH));

    let (config, config_found) = if Path::new(&path).exists() {
        let config =
            BrokerConfig::try_from(Path::new(&path)).expect("Could not load the configuration");
        (config, true)
    } else {
        (BrokerConfig::default(), false)
    };

    BrokerLogger::new(&config)
        .init(config.log_level())
        .expect("Could not install the logger");

    if !config_found {
        log::warn!("Configuration file {path} not found, starting with defaults.");
    }

    let broker = Broker::bind(config).await.expect("Could not bind the listener");
    let handle = broker.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, shutting down.");
            handle.stop();
        }
    });

    if let Err(err) = broker.run().await {
        log::error!("{err}");
    }
}
