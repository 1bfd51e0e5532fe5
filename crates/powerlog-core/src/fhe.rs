//! FHE client initialization state machine
//!
//! An [`FheInitializer`] owns the process-wide FHE client for the active
//! `(rpc endpoint, chain id)` pair. Each refresh bumps a generation counter;
//! a creation that finishes after a newer refresh started is dropped instead
//! of overwriting the newer state.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::traits::FheInstance;
use crate::PowerLogError;

/// Where an FHE instance should be created
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FheEndpoint {
    pub rpc_url: String,
    pub chain_id: u64,
}

/// Inputs of a refresh; a missing endpoint or `enabled == false` means idle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FheRequest {
    pub rpc_url: Option<String>,
    pub chain_id: Option<u64>,
    pub enabled: bool,
}

impl FheRequest {
    pub fn new(rpc_url: impl Into<String>, chain_id: u64) -> Self {
        Self {
            rpc_url: Some(rpc_url.into()),
            chain_id: Some(chain_id),
            enabled: true,
        }
    }

    fn endpoint(&self) -> Option<FheEndpoint> {
        if !self.enabled {
            return None;
        }
        match (&self.rpc_url, self.chain_id) {
            (Some(rpc_url), Some(chain_id)) => Some(FheEndpoint {
                rpc_url: rpc_url.clone(),
                chain_id,
            }),
            _ => None,
        }
    }
}

/// Lifecycle of the FHE client
#[derive(Debug)]
pub enum FheStatus<I> {
    Idle,
    Loading,
    Ready(Arc<I>),
    Error(String),
}

impl<I> Clone for FheStatus<I> {
    fn clone(&self) -> Self {
        match self {
            FheStatus::Idle => FheStatus::Idle,
            FheStatus::Loading => FheStatus::Loading,
            FheStatus::Ready(instance) => FheStatus::Ready(Arc::clone(instance)),
            FheStatus::Error(cause) => FheStatus::Error(cause.clone()),
        }
    }
}

impl<I> FheStatus<I> {
    pub fn instance(&self) -> Option<Arc<I>> {
        match self {
            FheStatus::Ready(instance) => Some(Arc::clone(instance)),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, FheStatus::Ready(_))
    }

    /// Short label for display
    pub fn label(&self) -> &'static str {
        match self {
            FheStatus::Idle => "idle",
            FheStatus::Loading => "loading",
            FheStatus::Ready(_) => "ready",
            FheStatus::Error(_) => "error",
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            FheStatus::Error(cause) => Some(cause),
            _ => None,
        }
    }
}

/// Creates FHE instances for an endpoint
#[allow(async_fn_in_trait)]
pub trait FheFactory {
    type Instance: FheInstance;

    async fn create(&self, endpoint: &FheEndpoint) -> Result<Self::Instance, PowerLogError>;
}

#[derive(Debug, Default)]
struct InitState {
    generation: u64,
    endpoint: Option<FheEndpoint>,
}

/// Lazily (re)creates the FHE client when its endpoint changes
pub struct FheInitializer<F: FheFactory> {
    factory: F,
    state: Mutex<InitState>,
    status: watch::Sender<FheStatus<F::Instance>>,
}

impl<F: FheFactory> FheInitializer<F> {
    pub fn new(factory: F) -> Self {
        let (status, _) = watch::channel(FheStatus::Idle);
        Self {
            factory,
            state: Mutex::new(InitState::default()),
            status,
        }
    }

    /// Receiver that observes every status transition
    pub fn subscribe(&self) -> watch::Receiver<FheStatus<F::Instance>> {
        self.status.subscribe()
    }

    pub fn status(&self) -> FheStatus<F::Instance> {
        self.status.borrow().clone()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Bring the FHE client in line with `request`
    ///
    /// Returns the status this call committed, or the current status when
    /// nothing needed to change or the result went stale.
    pub async fn refresh(&self, request: &FheRequest) -> FheStatus<F::Instance> {
        let (generation, endpoint) = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(_) => {
                    let cause = "FHE initializer state poisoned".to_string();
                    self.status.send_replace(FheStatus::Error(cause.clone()));
                    return FheStatus::Error(cause);
                }
            };

            let Some(endpoint) = request.endpoint() else {
                state.generation += 1;
                state.endpoint = None;
                self.status.send_replace(FheStatus::Idle);
                return FheStatus::Idle;
            };

            let unchanged = state.endpoint.as_ref() == Some(&endpoint)
                && matches!(*self.status.borrow(), FheStatus::Loading | FheStatus::Ready(_));
            if unchanged {
                return self.status();
            }

            state.generation += 1;
            state.endpoint = Some(endpoint.clone());
            self.status.send_replace(FheStatus::Loading);
            (state.generation, endpoint)
        };

        info!(
            "Initializing FHE client for chain {} via {}",
            endpoint.chain_id, endpoint.rpc_url
        );
        let result = self.factory.create(&endpoint).await;

        let state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return self.status(),
        };
        if state.generation != generation {
            debug!(
                "Discarding stale FHE initialization for chain {}",
                endpoint.chain_id
            );
            return self.status();
        }

        let next = match result {
            Ok(instance) => {
                info!("FHE client ready for chain {}", endpoint.chain_id);
                FheStatus::Ready(Arc::new(instance))
            }
            Err(err) => {
                warn!("FHE client initialization failed: {}", err);
                FheStatus::Error(err.to_string())
            }
        };
        self.status.send_replace(next.clone());
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCoprocessor, MockFheInstance};
    use crate::protocol::FhevmMetadata;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Factory whose creations for chain 1 wait until released
    struct GatedFactory {
        gate: Notify,
        created: AtomicUsize,
    }

    impl GatedFactory {
        fn new() -> Self {
            Self {
                gate: Notify::new(),
                created: AtomicUsize::new(0),
            }
        }
    }

    impl FheFactory for GatedFactory {
        type Instance = MockFheInstance;

        async fn create(&self, endpoint: &FheEndpoint) -> Result<MockFheInstance, PowerLogError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            if endpoint.chain_id == 1 {
                self.gate.notified().await;
            }
            if endpoint.chain_id == 999 {
                return Err(PowerLogError::fhe("unsupported chain 999"));
            }
            Ok(MockFheInstance::new(
                endpoint.chain_id,
                FhevmMetadata::default(),
                MockCoprocessor::new(),
            ))
        }
    }

    #[tokio::test]
    async fn test_disabled_request_is_idle() {
        let init = FheInitializer::new(GatedFactory::new());
        let mut request = FheRequest::new("http://localhost:8545", 31337);
        request.enabled = false;
        assert!(matches!(init.refresh(&request).await, FheStatus::Idle));
        assert!(matches!(init.refresh(&FheRequest::default()).await, FheStatus::Idle));
        assert_eq!(init.factory().created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ready_then_unchanged_refresh_is_noop() {
        let init = FheInitializer::new(GatedFactory::new());
        let request = FheRequest::new("http://localhost:8545", 31337);
        let status = init.refresh(&request).await;
        assert_eq!(status.instance().unwrap().chain_id(), 31337);
        init.refresh(&request).await;
        assert_eq!(init.factory().created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_becomes_error_state() {
        let init = FheInitializer::new(GatedFactory::new());
        let status = init.refresh(&FheRequest::new("http://rpc", 999)).await;
        assert_eq!(status.label(), "error");
        assert!(init.status().error().unwrap().contains("unsupported chain"));
    }

    #[tokio::test]
    async fn test_stale_initialization_is_discarded() {
        let init = FheInitializer::new(GatedFactory::new());
        let mut rx = init.subscribe();

        let mainnet = FheRequest::new("http://mainnet", 1);
        let slow = init.refresh(&mainnet);
        let fast = async {
            // Wait for the slow refresh to publish Loading before switching chains
            rx.changed().await.unwrap();
            let status = init.refresh(&FheRequest::new("http://localhost:8545", 31337)).await;
            init.factory().gate.notify_one();
            status
        };
        let (slow_status, fast_status) = tokio::join!(slow, fast);

        assert_eq!(fast_status.instance().unwrap().chain_id(), 31337);
        assert_eq!(slow_status.instance().unwrap().chain_id(), 31337);
        assert_eq!(init.status().instance().unwrap().chain_id(), 31337);
    }

    #[tokio::test]
    async fn test_watch_observes_transitions() {
        let init = FheInitializer::new(GatedFactory::new());
        let rx = init.subscribe();
        assert_eq!(rx.borrow().label(), "idle");
        init.refresh(&FheRequest::new("http://localhost:8545", 31337)).await;
        assert!(rx.borrow().is_ready());
    }
}
