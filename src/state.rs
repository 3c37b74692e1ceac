use crate::config::BridgeConfig;
use crate::services::influx::InfluxWriter;
use crate::services::poller::Poller;
use crate::services::tado::TadoClient;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: BridgeConfig,
    pub tado: Arc<TadoClient>,
    pub influx: Arc<InfluxWriter>,
    pub poller: Arc<Poller>,
}
