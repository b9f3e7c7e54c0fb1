//! Binding token sources.
//!
//! Before activation the device needs a short token that the app hands
//! out when the user binds it. [`TokenProvider`] abstracts where it comes
//! from: the default [`MqttBind`](super::bind::MqttBind) waits for it on
//! the broker, and with the `std` feature [`TokenChannel`] lets another
//! thread (a BLE or AP provisioning task) post it.

use heapless::String;

use crate::config::{MAX_LENGTH_REGION, MAX_LENGTH_REGIST, MAX_LENGTH_TOKEN};
use crate::error::Error;
use crate::iot::{Core, Platform};

/// The token and where to activate with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    /// Token handed out by the app.
    pub token: String<MAX_LENGTH_TOKEN>,
    /// Cloud region code, for example `eu`.
    pub region: String<MAX_LENGTH_REGION>,
    /// Registration environment, `pro` unless stated.
    pub regist_key: String<MAX_LENGTH_REGIST>,
}

impl Binding {
    /// Builds a binding, failing with [`Error::InvalidParam`] when a field
    /// is empty (token) or too long.
    pub fn new(token: &str, region: &str, regist_key: &str) -> Result<Self, Error> {
        if token.is_empty() {
            return Err(Error::InvalidParam);
        }
        Ok(Self {
            token: String::try_from(token).map_err(|_| Error::InvalidParam)?,
            region: String::try_from(region).map_err(|_| Error::InvalidParam)?,
            regist_key: String::try_from(regist_key).map_err(|_| Error::InvalidParam)?,
        })
    }
}

/// Supplies the binding token.
pub trait TokenProvider<P: Platform> {
    /// Blocks until a token is available.
    ///
    /// [`Error::Canceled`] sends the lifecycle to reset; any other error is
    /// retried on the next yield.
    fn token_get(&mut self, core: &mut Core<P>) -> Result<Binding, Error>;

    /// Aborts the [`token_get`](Self::token_get) in progress.
    fn cancel(&mut self) {}

    /// Drops a cancel that no wait consumed. Called once a reset completes.
    fn rearm(&mut self) {}
}

#[cfg(feature = "std")]
pub use channel::{TokenChannel, TokenPoster};

#[cfg(feature = "std")]
mod channel {
    use std::sync::{Arc, Condvar, Mutex};

    use super::{Binding, TokenProvider};
    use crate::error::Error;
    use crate::iot::{Core, Platform};

    #[derive(Default)]
    struct Slot {
        binding: Option<Binding>,
        aborted: bool,
    }

    type Shared = Arc<(Mutex<Slot>, Condvar)>;

    fn signal(shared: &Shared, update: impl FnOnce(&mut Slot)) {
        let (lock, ready) = &**shared;
        let mut slot = match lock.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut *slot);
        ready.notify_all();
    }

    /// Receiving side: blocks the lifecycle until a token is posted.
    pub struct TokenChannel {
        shared: Shared,
    }

    /// Sending side, handed to the provisioning task.
    #[derive(Clone)]
    pub struct TokenPoster {
        shared: Shared,
    }

    impl TokenChannel {
        /// Creates a connected pair.
        pub fn new() -> (TokenChannel, TokenPoster) {
            let shared: Shared = Arc::new((Mutex::new(Slot::default()), Condvar::new()));
            (
                TokenChannel {
                    shared: shared.clone(),
                },
                TokenPoster { shared },
            )
        }

        /// Waits for a posted binding or an abort.
        pub fn wait(&self) -> Result<Binding, Error> {
            let (lock, ready) = &*self.shared;
            let mut slot = match lock.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            loop {
                if slot.aborted {
                    slot.aborted = false;
                    return Err(Error::Canceled);
                }
                if let Some(binding) = slot.binding.take() {
                    return Ok(binding);
                }
                slot = match ready.wait(slot) {
                    Ok(slot) => slot,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        }
    }

    impl TokenPoster {
        /// Hands a binding to the waiting lifecycle.
        pub fn post(&self, binding: Binding) {
            signal(&self.shared, |slot| slot.binding = Some(binding));
        }

        /// Wakes the waiting lifecycle with [`Error::Canceled`].
        pub fn abort(&self) {
            signal(&self.shared, |slot| slot.aborted = true);
        }
    }

    impl<P: Platform> TokenProvider<P> for TokenChannel {
        fn token_get(&mut self, _core: &mut Core<P>) -> Result<Binding, Error> {
            info!("token: waiting for a posted token");
            self.wait()
        }

        fn cancel(&mut self) {
            signal(&self.shared, |slot| slot.aborted = true);
        }

        fn rearm(&mut self) {
            signal(&self.shared, |slot| slot.aborted = false);
        }
    }
}
