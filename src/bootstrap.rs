//! Lazy storage-client bootstrap
//!
//! The storage client and the backing table are constructed on first use, not
//! at startup, so the gateway can start before the cluster is reachable. A
//! failed attempt is not remembered: the next command tries again.

use crate::client::{ClientFactory, ClientOptions, StorageClient, Table};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::metrics::MetricRegistry;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// The connected client and its opened table.
pub struct Bootstrapped {
    pub client: Arc<dyn StorageClient>,
    pub table: Arc<Table>,
}

/// Shared handle to the lazily constructed storage client.
///
/// Once ready it is read without locking; the mutex only serializes the
/// construction attempts that race on first use.
pub struct StorageHandle {
    factory: Arc<dyn ClientFactory>,
    options: ClientOptions,
    table_name: String,
    ready: OnceLock<Bootstrapped>,
    lock: Mutex<()>,
}

impl StorageHandle {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        options: ClientOptions,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            factory,
            options,
            table_name: table_name.into(),
            ready: OnceLock::new(),
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(
        config: &GatewayConfig,
        factory: Arc<dyn ClientFactory>,
        metrics: Arc<MetricRegistry>,
    ) -> Self {
        let options = ClientOptions {
            client_name: config.client_name.clone(),
            master_addresses: config.master_addresses.clone(),
            default_rpc_timeout: config.rpc_timeout,
            session_buffer_bytes: config.session_buffer_bytes,
            metrics,
        };
        Self::new(factory, options, config.table_name.clone())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get().is_some()
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Returns the connected client, constructing it if no attempt succeeded yet.
    ///
    /// Callers racing a construction block on the bootstrap lock until it ends.
    pub fn ensure_ready(&self) -> Result<&Bootstrapped, GatewayError> {
        if let Some(ready) = self.ready.get() {
            return Ok(ready);
        }

        let _guard = self.lock.lock();
        if let Some(ready) = self.ready.get() {
            return Ok(ready);
        }

        debug!(
            masters = ?self.options.master_addresses,
            table = %self.table_name,
            "Bootstrapping storage client"
        );
        let bootstrapped = self.connect().inspect_err(|e| {
            warn!(error = %e, "Storage client bootstrap failed");
        })?;
        info!(
            client = %self.options.client_name,
            table = %self.table_name,
            "Storage client ready"
        );
        Ok(self.ready.get_or_init(|| bootstrapped))
    }

    fn connect(&self) -> Result<Bootstrapped, GatewayError> {
        let bootstrap_error = |source| GatewayError::Bootstrap {
            table: self.table_name.clone(),
            source,
        };
        let client = self
            .factory
            .build(&self.options)
            .map_err(bootstrap_error)?;
        let table = client
            .open_table(&self.table_name)
            .map_err(bootstrap_error)?;
        Ok(Bootstrapped { client, table })
    }
}

impl fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageHandle")
            .field("table", &self.table_name)
            .field("masters", &self.options.master_addresses)
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{redis_schema, Session};
    use crate::error::{StorageError, StorageResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubClient {
        table: Arc<Table>,
    }

    impl StorageClient for StubClient {
        fn open_table(&self, name: &str) -> StorageResult<Arc<Table>> {
            if name == self.table.name() {
                Ok(Arc::clone(&self.table))
            } else {
                Err(StorageError::NotFound(name.to_string()))
            }
        }

        fn new_session(&self, _read_only: bool) -> Arc<dyn Session> {
            unreachable!("bootstrap never opens sessions")
        }
    }

    /// Counts constructions; fails the first `failures` of them.
    #[derive(Default)]
    struct CountingFactory {
        builds: AtomicUsize,
        failures: usize,
    }

    impl ClientFactory for CountingFactory {
        fn build(&self, _options: &ClientOptions) -> StorageResult<Arc<dyn StorageClient>> {
            let n = self.builds.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            if n < self.failures {
                return Err(StorageError::Unavailable("masters down".into()));
            }
            Ok(Arc::new(StubClient {
                table: Arc::new(Table::new(".redis", redis_schema().unwrap(), 1)),
            }))
        }
    }

    fn handle(factory: Arc<CountingFactory>, table: &str) -> StorageHandle {
        let config = GatewayConfig::default();
        let mut handle =
            StorageHandle::from_config(&config, factory, Arc::new(MetricRegistry::new()));
        handle.table_name = table.to_string();
        handle
    }

    #[test]
    fn test_concurrent_first_use_builds_once() {
        let factory = Arc::new(CountingFactory::default());
        let handle = handle(Arc::clone(&factory), ".redis");

        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    let ready = handle.ensure_ready().unwrap();
                    assert_eq!(ready.table.name(), ".redis");
                });
            }
        });

        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        assert!(handle.is_ready());
    }

    #[test]
    fn test_failure_is_not_cached() {
        let factory = Arc::new(CountingFactory {
            failures: 1,
            ..Default::default()
        });
        let handle = handle(Arc::clone(&factory), ".redis");

        let err = handle.ensure_ready().err().unwrap();
        assert!(matches!(
            err,
            GatewayError::Bootstrap {
                source: StorageError::Unavailable(_),
                ..
            }
        ));
        assert!(!handle.is_ready());

        assert!(handle.ensure_ready().is_ok());
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_first_use_all_see_failure() {
        let factory = Arc::new(CountingFactory {
            failures: usize::MAX,
            ..Default::default()
        });
        let handle = handle(Arc::clone(&factory), ".redis");

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let err = handle.ensure_ready().err().unwrap();
                    assert!(matches!(
                        err,
                        GatewayError::Bootstrap {
                            source: StorageError::Unavailable(_),
                            ..
                        }
                    ));
                });
            }
        });

        assert!(!handle.is_ready());
        assert_eq!(factory.builds.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_missing_table_fails_bootstrap() {
        let factory = Arc::new(CountingFactory::default());
        let handle = handle(Arc::clone(&factory), "missing");
        let err = handle.ensure_ready().err().unwrap();
        assert_eq!(
            err.to_string(),
            "could not open table missing: Not found: missing"
        );
        assert!(!handle.is_ready());
    }
}
