use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::trace;

/// Port of the scrape endpoint when no address is configured.
const DEFAULT_METRICS_PORT: u16 = 9000;

const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

// The recorder is global and can be installed only once per process, while tests call
// `init_metrics_handle` repeatedly.
static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Installs the Prometheus recorder and serves `/metrics` on `bind`.
///
/// `bind` defaults to `[::]:9000`. An unparsable address is reported as
/// [`BuildError::FailedToCreateHTTPListener`].
pub fn init_metrics(bind: Option<&str>, app_name: &str) -> Result<(), BuildError> {
    let address = match bind {
        Some(bind) => bind
            .parse::<SocketAddr>()
            .map_err(|err| BuildError::FailedToCreateHTTPListener(err.to_string()))?,
        None => SocketAddr::new(
            std::net::IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
            DEFAULT_METRICS_PORT,
        ),
    };

    PrometheusBuilder::new()
        .with_http_listener(address)
        .add_global_label("app", app_name)
        .install()
}

/// Installs the recorder without an HTTP listener and returns a handle rendering the metrics.
///
/// Must be called inside a tokio runtime, the upkeep task is spawned on it.
pub fn init_metrics_handle() -> Result<PrometheusHandle, BuildError> {
    let mut cached = PROMETHEUS_HANDLE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(handle) = &*cached {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *cached = Some(handle.clone());

    let upkeep_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(UPKEEP_INTERVAL).await;
            trace!("running metrics upkeep");
            upkeep_handle.run_upkeep();
        }
    });

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_bind_address_is_rejected() {
        let err = init_metrics(Some("not an address"), "test").unwrap_err();
        assert!(matches!(err, BuildError::FailedToCreateHTTPListener(_)));
    }

    #[tokio::test]
    async fn handle_is_cached() {
        let first = init_metrics_handle().unwrap();
        let second = init_metrics_handle().unwrap();
        assert_eq!(first.render(), second.render());
    }
}
