//! The federate handle.
//!
//! A [`Federate`] is the application-facing side of one simulation
//! participant. Every method turns into a request to the core service
//! thread and waits for the reply; the blocking calls
//! ([`enter_executing_mode`](Federate::enter_executing_mode),
//! [`request_time`](Federate::request_time)) park on the reply channel
//! until the federation lets this federate proceed. The `_async` /
//! `_complete` pairs split that wait so a federate can compute while
//! its request is outstanding.
//!
//! The handle caches the lifecycle state and granted time from the
//! core's replies, so the cheap getters never cross the channel.

use crossbeam_channel::{bounded, Receiver, Sender};

use concord_core::{
    EndpointHandle, FederateError, FederateId, FederateLifecycle, FilterHandle, InputHandle,
    IterationRequest, IterationResult, Message, PublicationHandle, Time, Value, ValueKind,
};

use crate::core::{CoreRequest, FilterAttach, FilterSpec, Reply, TimeGrant};

/// Handle to one federate registered with a [`Core`](crate::service::Core).
pub struct Federate {
    id: FederateId,
    name: String,
    tx: Sender<CoreRequest>,
    state: FederateLifecycle,
    granted: Time,
    pending_time: Option<Receiver<Result<TimeGrant, FederateError>>>,
    pending_exec: Option<Receiver<Result<IterationResult, FederateError>>>,
}

impl Federate {
    pub(crate) fn new(id: FederateId, name: String, tx: Sender<CoreRequest>) -> Self {
        Self {
            id,
            name,
            tx,
            state: FederateLifecycle::Created,
            granted: Time::MINTIME,
            pending_time: None,
            pending_exec: None,
        }
    }

    /// The federate's id within its core.
    pub fn id(&self) -> FederateId {
        self.id
    }

    /// The federate's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The lifecycle state as of the last reply from the core.
    pub fn state(&self) -> FederateLifecycle {
        self.state
    }

    /// The current granted time; zero before execution starts.
    pub fn granted_time(&self) -> Time {
        self.granted.max(Time::ZERO)
    }

    fn call<T>(&self, build: impl FnOnce(Reply<T>) -> CoreRequest) -> Result<T, FederateError> {
        let (tx, rx) = bounded(1);
        self.tx
            .send(build(tx))
            .map_err(|_| FederateError::ConnectionLost)?;
        rx.recv().map_err(|_| FederateError::ConnectionLost)?
    }

    /// Fatal failures move the federate to `Errored` on the core side;
    /// mirror that in the cached state.
    fn note_failure(&mut self, err: &FederateError) {
        if matches!(
            err,
            FederateError::ConnectionLost | FederateError::GrantTimeout
        ) {
            self.state = FederateLifecycle::Errored;
        }
    }

    fn no_async_outstanding(&self) -> Result<(), FederateError> {
        if self.pending_time.is_some() || self.pending_exec.is_some() {
            return Err(FederateError::AsyncOutstanding);
        }
        Ok(())
    }

    // ── Registration ────────────────────────────────────────────

    /// Register a publication named under this federate
    /// (`<federate>/<name>`).
    pub fn register_publication(
        &self,
        name: &str,
        kind: ValueKind,
        units: Option<&str>,
    ) -> Result<PublicationHandle, FederateError> {
        self.register_publication_inner(name, kind, units, false)
    }

    /// Register a publication under a federation-wide name.
    pub fn register_global_publication(
        &self,
        name: &str,
        kind: ValueKind,
        units: Option<&str>,
    ) -> Result<PublicationHandle, FederateError> {
        self.register_publication_inner(name, kind, units, true)
    }

    fn register_publication_inner(
        &self,
        name: &str,
        kind: ValueKind,
        units: Option<&str>,
        global: bool,
    ) -> Result<PublicationHandle, FederateError> {
        let fed = self.id;
        let name = name.to_string();
        let units = units.map(str::to_string);
        self.call(|reply| CoreRequest::RegisterPublication {
            fed,
            name,
            kind,
            units,
            global,
            reply,
        })
    }

    /// Subscribe to the publication with the fully-qualified key
    /// `target`. The publication may not exist yet; the binding resolves
    /// when it appears.
    pub fn register_input(
        &self,
        target: &str,
        kind: ValueKind,
    ) -> Result<InputHandle, FederateError> {
        let fed = self.id;
        let target = target.to_string();
        self.call(|reply| CoreRequest::RegisterInput {
            fed,
            target,
            kind,
            reply,
        })
    }

    /// Register an endpoint named under this federate.
    pub fn register_endpoint(&self, name: &str) -> Result<EndpointHandle, FederateError> {
        self.register_endpoint_inner(name, false)
    }

    /// Register an endpoint under a federation-wide name.
    pub fn register_global_endpoint(&self, name: &str) -> Result<EndpointHandle, FederateError> {
        self.register_endpoint_inner(name, true)
    }

    fn register_endpoint_inner(
        &self,
        name: &str,
        global: bool,
    ) -> Result<EndpointHandle, FederateError> {
        let fed = self.id;
        let name = name.to_string();
        self.call(|reply| CoreRequest::RegisterEndpoint {
            fed,
            name,
            global,
            reply,
        })
    }

    /// Register a filter on an endpoint of this core.
    pub fn register_filter(
        &self,
        name: &str,
        spec: FilterSpec,
        attach: FilterAttach,
    ) -> Result<FilterHandle, FederateError> {
        let fed = self.id;
        let name = name.to_string();
        self.call(|reply| CoreRequest::RegisterFilter {
            fed,
            name,
            spec,
            attach,
            reply,
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Move from `Created` to `Initializing`.
    pub fn enter_initializing_mode(&mut self) -> Result<(), FederateError> {
        let fed = self.id;
        self.call(|reply| CoreRequest::EnterInitializing { fed, reply })?;
        self.state = FederateLifecycle::Initializing;
        Ok(())
    }

    /// Enter execution at time zero. Blocks until every federate of the
    /// federation is ready.
    pub fn enter_executing_mode(&mut self) -> Result<(), FederateError> {
        self.enter_executing_mode_iterative(IterationRequest::NoIteration)
            .map(|_| ())
    }

    /// Enter execution, possibly looping once more through
    /// initialization when `iterate` asks for it and new values arrived.
    pub fn enter_executing_mode_iterative(
        &mut self,
        iterate: IterationRequest,
    ) -> Result<IterationResult, FederateError> {
        self.no_async_outstanding()?;
        let fed = self.id;
        let result = self
            .call(|reply| CoreRequest::EnterExecuting {
                fed,
                iterate,
                reply,
            })
            .inspect_err(|err| self.note_failure(err))?;
        self.apply_exec_result(result);
        Ok(result)
    }

    /// Start entering execution without blocking; finish with
    /// [`enter_executing_mode_complete`](Self::enter_executing_mode_complete).
    pub fn enter_executing_mode_async(&mut self) -> Result<(), FederateError> {
        self.no_async_outstanding()?;
        let (tx, rx) = bounded(1);
        self.tx
            .send(CoreRequest::EnterExecuting {
                fed: self.id,
                iterate: IterationRequest::NoIteration,
                reply: tx,
            })
            .map_err(|_| FederateError::ConnectionLost)?;
        self.pending_exec = Some(rx);
        Ok(())
    }

    /// Block until the execution entry started by
    /// [`enter_executing_mode_async`](Self::enter_executing_mode_async)
    /// resolves.
    pub fn enter_executing_mode_complete(&mut self) -> Result<IterationResult, FederateError> {
        let Some(rx) = self.pending_exec.take() else {
            return Err(FederateError::NoAsyncPending);
        };
        let result = rx
            .recv()
            .map_err(|_| FederateError::ConnectionLost)
            .and_then(|reply| reply)
            .inspect_err(|err| self.note_failure(err))?;
        self.apply_exec_result(result);
        Ok(result)
    }

    fn apply_exec_result(&mut self, result: IterationResult) {
        match result {
            IterationResult::NextStep => {
                self.state = FederateLifecycle::Executing;
                self.granted = Time::ZERO;
            }
            IterationResult::Iterating => {}
            IterationResult::Halted => self.state = FederateLifecycle::Finalized,
        }
    }

    /// Finalize: leave the federation permanently. Idempotent once the
    /// federate is in a terminal state.
    pub fn finalize(&mut self) -> Result<(), FederateError> {
        let fed = self.id;
        self.call(|reply| CoreRequest::Finalize { fed, reply })?;
        self.state = FederateLifecycle::Finalized;
        // An outstanding async request resolved with `Halted`; drain it.
        if let Some(rx) = self.pending_time.take() {
            let _ = rx.recv();
        }
        if let Some(rx) = self.pending_exec.take() {
            let _ = rx.recv();
        }
        Ok(())
    }

    // ── Time ────────────────────────────────────────────────────

    /// Request an advance to `desired` and block until granted. The
    /// grant may be earlier than `desired` when an event is waiting.
    pub fn request_time(&mut self, desired: Time) -> Result<Time, FederateError> {
        self.request_time_iterative(desired, IterationRequest::NoIteration)
            .map(|(time, _)| time)
    }

    /// Request an advance with explicit iteration control.
    pub fn request_time_iterative(
        &mut self,
        desired: Time,
        iterate: IterationRequest,
    ) -> Result<(Time, IterationResult), FederateError> {
        self.no_async_outstanding()?;
        let fed = self.id;
        let grant = self
            .call(|reply| CoreRequest::RequestTime {
                fed,
                desired,
                iterate,
                reply,
            })
            .inspect_err(|err| self.note_failure(err))?;
        Ok(self.apply_grant(grant))
    }

    /// Start a time request without blocking; finish with
    /// [`request_time_complete`](Self::request_time_complete).
    pub fn request_time_async(&mut self, desired: Time) -> Result<(), FederateError> {
        self.request_time_iterative_async(desired, IterationRequest::NoIteration)
    }

    /// Start an iterative time request without blocking.
    pub fn request_time_iterative_async(
        &mut self,
        desired: Time,
        iterate: IterationRequest,
    ) -> Result<(), FederateError> {
        self.no_async_outstanding()?;
        let (tx, rx) = bounded(1);
        self.tx
            .send(CoreRequest::RequestTime {
                fed: self.id,
                desired,
                iterate,
                reply: tx,
            })
            .map_err(|_| FederateError::ConnectionLost)?;
        self.pending_time = Some(rx);
        Ok(())
    }

    /// Block until the outstanding async time request resolves.
    pub fn request_time_complete(&mut self) -> Result<(Time, IterationResult), FederateError> {
        let Some(rx) = self.pending_time.take() else {
            return Err(FederateError::NoAsyncPending);
        };
        let grant = rx
            .recv()
            .map_err(|_| FederateError::ConnectionLost)
            .and_then(|reply| reply)
            .inspect_err(|err| self.note_failure(err))?;
        Ok(self.apply_grant(grant))
    }

    /// Whether an async time request or execution entry is outstanding.
    pub fn async_pending(&self) -> bool {
        self.pending_time.is_some() || self.pending_exec.is_some()
    }

    fn apply_grant(&mut self, grant: TimeGrant) -> (Time, IterationResult) {
        self.granted = grant.time;
        if grant.result == IterationResult::Halted {
            self.state = FederateLifecycle::Finalized;
        }
        (grant.time, grant.result)
    }

    // ── Data exchange ───────────────────────────────────────────

    /// Publish a value at the current granted time. The value is
    /// converted to the publication's declared kind.
    pub fn publish(&self, handle: PublicationHandle, value: Value) -> Result<(), FederateError> {
        let fed = self.id;
        self.call(|reply| CoreRequest::Publish {
            fed,
            handle,
            value,
            reply,
        })
    }

    /// The value currently visible at an input, converted to the
    /// input's declared kind; `None` before the first delivery.
    pub fn input_value(&self, handle: InputHandle) -> Result<Option<Value>, FederateError> {
        let fed = self.id;
        self.call(|reply| CoreRequest::ReadInput { fed, handle, reply })
    }

    /// Whether the input changed since this was last called.
    pub fn check_update(&self, handle: InputHandle) -> Result<bool, FederateError> {
        let fed = self.id;
        self.call(|reply| CoreRequest::CheckUpdate { fed, handle, reply })
    }

    /// Send a message from `handle` to the endpoint keyed `dest`,
    /// stamped with the current granted time.
    pub fn send_message(
        &self,
        handle: EndpointHandle,
        dest: &str,
        payload: Vec<u8>,
    ) -> Result<(), FederateError> {
        let fed = self.id;
        let dest = dest.to_string();
        self.call(|reply| CoreRequest::SendMessage {
            fed,
            handle,
            dest,
            payload,
            reply,
        })
    }

    /// Pop the next message due at the endpoint, in delivery order;
    /// `None` when nothing has reached the current granted time.
    pub fn next_message(&self, handle: EndpointHandle) -> Result<Option<Message>, FederateError> {
        let fed = self.id;
        self.call(|reply| CoreRequest::NextMessage { fed, handle, reply })
    }
}
