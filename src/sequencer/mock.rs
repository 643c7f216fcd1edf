//! In-memory discovery subsystem
//!
//! Stands in for the radio stack in the daemon and in tests. In
//! converging mode a request moves the state to its target immediately;
//! otherwise requests are only recorded and the state changes only
//! through [`MockDiscovery::set_state`].

use parking_lot::Mutex;
use tracing::debug;

use super::operation::OperationRequest;
use super::subsystem::{DiscoverySubsystem, SubsystemState};

#[derive(Debug, Default)]
struct MockInner {
    state: SubsystemState,
    converge: bool,
    refuse: Option<String>,
    requests: Vec<OperationRequest>,
}

/// Scriptable [`DiscoverySubsystem`]
#[derive(Debug, Default)]
pub struct MockDiscovery {
    inner: Mutex<MockInner>,
}

impl MockDiscovery {
    /// A subsystem that reaches every requested state at once
    #[must_use]
    pub fn immediate() -> Self {
        let mock = Self::default();
        mock.set_converge(true);
        mock
    }

    /// A subsystem that accepts requests but never changes state on its own
    #[must_use]
    pub fn never_converging() -> Self {
        Self::default()
    }

    /// Switch between converging and non-converging behaviour
    pub fn set_converge(&self, converge: bool) {
        self.inner.lock().converge = converge;
    }

    /// Refuse every further request with `reason`
    pub fn refuse_with(&self, reason: impl Into<String>) {
        self.inner.lock().refuse = Some(reason.into());
    }

    /// Accept requests again
    pub fn accept_requests(&self) {
        self.inner.lock().refuse = None;
    }

    /// Overwrite the reported state
    pub fn set_state(&self, state: SubsystemState) {
        self.inner.lock().state = state;
    }

    /// Requests received so far, refused ones included
    #[must_use]
    pub fn requests(&self) -> Vec<OperationRequest> {
        self.inner.lock().requests.clone()
    }

    fn handle(&self, request: OperationRequest) -> Result<(), String> {
        let mut inner = self.inner.lock();
        inner.requests.push(request);
        if let Some(reason) = &inner.refuse {
            return Err(reason.clone());
        }
        if !inner.converge {
            return Ok(());
        }

        match request {
            OperationRequest::Start { advertise } => {
                inner.state.is_discovering = true;
                inner.state.is_advertising |= advertise;
            }
            OperationRequest::Stop {
                stop_only_listening,
            } => {
                inner.state.is_discovering = false;
                if !stop_only_listening {
                    inner.state.is_advertising = false;
                }
            }
        }
        debug!("Mock discovery now {:?}", inner.state);
        Ok(())
    }
}

impl DiscoverySubsystem for MockDiscovery {
    fn start(&self, advertise: bool) -> Result<(), String> {
        self.handle(OperationRequest::Start { advertise })
    }

    fn stop(&self, stop_only_listening: bool) -> Result<(), String> {
        self.handle(OperationRequest::Stop {
            stop_only_listening,
        })
    }

    fn state(&self) -> SubsystemState {
        self.inner.lock().state
    }
}
