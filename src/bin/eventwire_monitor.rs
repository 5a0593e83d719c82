//! eventwire-monitor: Remote event monitor
//!
//! Joins the event fabric and logs every remote event it receives.
//! Useful for debugging and watching event flow.
//!
//! ## Usage
//! ```text
//! eventwire-monitor [EVENT ...]
//! ```
//! With no arguments the monitor subscribes to `CONNECT` and `DISCONNECT`.
//!
//! ## Configuration
//! - EVENTWIRE_CONFIG: Path to the YAML config file (default: eventwire.yaml)
//! - EVENTWIRE_LOG: Log filter (default: info)
//! - EVENTWIRE__MESSAGING__TYPE etc.: Overrides for individual settings

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::info;

use eventwire::bus::{init_transport, ChannelBroker};
use eventwire::config::Config;
use eventwire::dispatcher::{
    EventDispatcher, GlobalEventDispatcher, LocalEventDispatcher, CONNECT_EVENT, DISCONNECT_EVENT,
};
use eventwire::utils::bootstrap::init_tracing;

const DEFAULT_APP_NAME: &str = "eventwire-monitor";

/// Logs every event handed to it.
#[derive(Default)]
struct LoggingDispatcher {
    global: Mutex<Option<Arc<dyn EventDispatcher>>>,
}

impl LocalEventDispatcher for LoggingDispatcher {
    fn set_global_event_dispatcher(&self, dispatcher: Arc<dyn EventDispatcher>) {
        let info = dispatcher.publisher_info();
        info!(endpoint_id = ?info.endpoint_id(), node_id = ?info.node_id(), "Monitor joined");
        *self.global.lock().unwrap_or_else(|e| e.into_inner()) = Some(dispatcher);
    }

    fn clear_global_event_dispatcher(&self) {
        self.global.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn fire_local_event(
        &self,
        event_name: &str,
        payload: &Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(event = %event_name, payload = %payload, "Event received");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let config = Config::load(None).map_err(|e| e.to_string())?;
    let mut events: Vec<String> = std::env::args().skip(1).collect();
    if events.is_empty() {
        events = vec![CONNECT_EVENT.to_string(), DISCONNECT_EVENT.to_string()];
    }

    let broker = ChannelBroker::new();
    let transport = init_transport(&config.messaging, &broker).await?;

    let mut dispatcher_config = config.dispatcher.clone();
    if dispatcher_config.app_name.is_none() {
        dispatcher_config.app_name = Some(DEFAULT_APP_NAME.to_string());
    }

    let local = Arc::new(LoggingDispatcher::default());
    let dispatcher = Arc::new(GlobalEventDispatcher::new(dispatcher_config, transport, local));
    dispatcher.init().await?;

    for event in &events {
        dispatcher.subscribe_remote_event(event, true).await;
    }
    info!(events = ?events, "eventwire-monitor started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    dispatcher.destroy().await;

    Ok(())
}
