//! At most one outstanding operation per key.
//!
//! Concurrent callers asking for the same key await one shared future
//! instead of starting their own. The entry is dropped as soon as the
//! operation finishes, so a later caller starts a fresh one.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

use reelup_protocol::messages::RecoverSessionResponse;

use crate::credentials::CredentialError;
use crate::transport::TransportError;

type Flights<K, V> = Arc<Mutex<HashMap<K, Shared<BoxFuture<'static, V>>>>>;

/// Guarded cache of in-flight futures keyed by operation.
pub struct SingleFlight<K, V: Clone> {
    flights: Flights<K, V>,
}

impl<K, V: Clone> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the flight for `key`, or starts one with `start`.
    ///
    /// `start` is only called when no flight for `key` is outstanding.
    pub async fn run<F>(&self, key: K, start: F) -> V
    where
        F: FnOnce() -> BoxFuture<'static, V>,
    {
        let flight = {
            let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
            match flights.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let registry = Arc::clone(&self.flights);
                    let done_key = key.clone();
                    let work = start();
                    let shared = async move {
                        let value = work.await;
                        registry
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .remove(&done_key);
                        value
                    }
                    .boxed()
                    .shared();
                    flights.insert(key, shared.clone());
                    shared
                }
            }
        };
        flight.await
    }

    /// Number of outstanding flights.
    pub fn in_flight(&self) -> usize {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub(crate) type RecoveryResult = Result<RecoverSessionResponse, TransportError>;
pub(crate) type RefreshResult = Result<(), CredentialError>;

/// Shared coordination for session recovery and credential refresh.
///
/// One coordinator may be shared by several orchestrators (for example all
/// uploads using the same credential provider) so that a refresh storm
/// collapses into one call.
#[derive(Default)]
pub struct FlightCoordinator {
    /// Keyed by the expired session id.
    pub(crate) recoveries: SingleFlight<String, RecoveryResult>,
    pub(crate) refreshes: SingleFlight<(), RefreshResult>,
}

impl FlightCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}
