//! The core state machine.
//!
//! [`CoreState`] owns every mutable structure of one core — federate
//! records, the interface registry, filter pipelines, and the upstream
//! link — and is driven from exactly one thread (the service loop in
//! [`service`](crate::service)). All federate-facing calls arrive as
//! [`CoreRequest`]s carrying oneshot reply senders; calls that cannot
//! resolve immediately (time requests, the execution barrier) park the
//! reply and are resolved by a later event.
//!
//! The granting pass (`reevaluate`) runs to a fixed point after every
//! state change: a grant raises the grantee's contribution, which may
//! unblock someone else, and so on.

use std::time::Instant;

use crossbeam_channel::Sender;
use indexmap::IndexMap;
use smallvec::{smallvec, SmallVec};

use concord_broker::transport::Conduit;
use concord_broker::wire::{self, AckOutcome, WireMsg};
use concord_core::{
    EndpointHandle, FederateError, FederateId, FederateLifecycle, FilterHandle, InputHandle,
    IterationRequest, IterationResult, Message, PublicationHandle, RegistrationError, Time,
    TypeMismatch, Value, ValueKind,
};
use concord_filter::{
    CloneFilter, DelayDistribution, DelayFilter, FilterOp, FilterPipeline, RandomDelayFilter,
    RerouteFilter,
};

use crate::config::{ConfigError, CoreConfig, FederateConfig};
use crate::coordinator::TimeCoordinator;
use crate::metrics::CoreMetrics;
use crate::registry::{InterfaceRegistry, PendingValue};

/// Maximum reroute hops a message may take inside one core before it
/// is declared unroutable.
const MAX_REROUTE_DEPTH: u8 = 4;

/// A resolved time request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeGrant {
    /// The granted time; never below the previous grant.
    pub time: Time,
    /// Whether the federation advanced, iterated, or halted.
    pub result: IterationResult,
}

/// Specification of a filter to register.
pub enum FilterSpec {
    /// Push delivery later by a fixed amount.
    Delay {
        /// The delay; negative values clamp to zero.
        delay: Time,
    },
    /// Push delivery later by a seeded random amount.
    RandomDelay {
        /// Distribution to sample from.
        distribution: DelayDistribution,
        /// RNG seed; identical seeds reproduce identical delays.
        seed: u64,
    },
    /// Rewrite the destination endpoint.
    Reroute {
        /// Fully-qualified key of the new destination.
        new_dest: String,
    },
    /// Deliver independent copies to additional endpoints.
    Clone {
        /// Fully-qualified keys of the extra destinations.
        extra_dests: Vec<String>,
    },
    /// A user-supplied filter operation.
    Custom(Box<dyn FilterOp>),
}

impl FilterSpec {
    fn build(self, name: &str) -> Box<dyn FilterOp> {
        match self {
            FilterSpec::Delay { delay } => Box::new(DelayFilter::new(name, delay)),
            FilterSpec::RandomDelay { distribution, seed } => {
                Box::new(RandomDelayFilter::new(name, distribution, seed))
            }
            FilterSpec::Reroute { new_dest } => Box::new(RerouteFilter::new(name, &new_dest)),
            FilterSpec::Clone { extra_dests } => Box::new(CloneFilter::new(name, extra_dests)),
            FilterSpec::Custom(op) => op,
        }
    }
}

/// Where a filter attaches: messages leaving an endpoint, or messages
/// arriving at one. Both sides name the endpoint by fully-qualified key.
pub enum FilterAttach {
    /// Applied to everything the named endpoint sends.
    Source(String),
    /// Applied to everything arriving at the named endpoint.
    Destination(String),
}

// ── Requests ────────────────────────────────────────────────────

pub(crate) type Reply<T> = Sender<Result<T, FederateError>>;

pub(crate) enum CoreRequest {
    RegisterFederate {
        config: FederateConfig,
        reply: Sender<Result<FederateId, ConfigError>>,
    },
    RegisterPublication {
        fed: FederateId,
        name: String,
        kind: ValueKind,
        units: Option<String>,
        global: bool,
        reply: Reply<PublicationHandle>,
    },
    RegisterInput {
        fed: FederateId,
        target: String,
        kind: ValueKind,
        reply: Reply<InputHandle>,
    },
    RegisterEndpoint {
        fed: FederateId,
        name: String,
        global: bool,
        reply: Reply<EndpointHandle>,
    },
    RegisterFilter {
        fed: FederateId,
        name: String,
        spec: FilterSpec,
        attach: FilterAttach,
        reply: Reply<FilterHandle>,
    },
    EnterInitializing {
        fed: FederateId,
        reply: Reply<()>,
    },
    EnterExecuting {
        fed: FederateId,
        iterate: IterationRequest,
        reply: Reply<IterationResult>,
    },
    RequestTime {
        fed: FederateId,
        desired: Time,
        iterate: IterationRequest,
        reply: Reply<TimeGrant>,
    },
    Publish {
        fed: FederateId,
        handle: PublicationHandle,
        value: Value,
        reply: Reply<()>,
    },
    SendMessage {
        fed: FederateId,
        handle: EndpointHandle,
        dest: String,
        payload: Vec<u8>,
        reply: Reply<()>,
    },
    ReadInput {
        fed: FederateId,
        handle: InputHandle,
        reply: Reply<Option<Value>>,
    },
    CheckUpdate {
        fed: FederateId,
        handle: InputHandle,
        reply: Reply<bool>,
    },
    NextMessage {
        fed: FederateId,
        handle: EndpointHandle,
        reply: Reply<Option<Message>>,
    },
    Finalize {
        fed: FederateId,
        reply: Reply<()>,
    },
    Metrics {
        reply: Sender<CoreMetrics>,
    },
    Shutdown,
}

// ── Internal records ────────────────────────────────────────────

struct PendingGrant {
    desired: Time,
    iterate: IterationRequest,
    reply: Reply<TimeGrant>,
    since: Instant,
}

struct PendingExec {
    iterate: IterationRequest,
    reply: Reply<IterationResult>,
    since: Instant,
}

struct FederateRecord {
    name: String,
    lifecycle: FederateLifecycle,
    coordinator: TimeCoordinator,
    pending_grant: Option<PendingGrant>,
    pending_exec: Option<PendingExec>,
    /// A value arrived while the federate was in `Initializing`.
    init_updates: bool,
    warnings: Vec<TypeMismatch>,
}

enum PendingUpReg {
    Publication {
        key: String,
        handle: PublicationHandle,
        reply: Reply<PublicationHandle>,
    },
    Input {
        fed: FederateId,
        index: usize,
        target: String,
        handle: InputHandle,
        reply: Reply<InputHandle>,
    },
    Endpoint {
        key: String,
        handle: EndpointHandle,
        reply: Reply<EndpointHandle>,
    },
}

impl PendingUpReg {
    fn fail(self, err: FederateError) {
        match self {
            PendingUpReg::Publication { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            PendingUpReg::Input { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            PendingUpReg::Endpoint { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

struct Upstream {
    tx: Box<dyn Conduit>,
    connected: bool,
    /// Latest bound from the broker; monotone.
    bound: Time,
    last_report: Option<Time>,
    next_req: u32,
    pending: IndexMap<u32, PendingUpReg>,
    exec_requested: bool,
}

#[derive(Default)]
struct EndpointFilters {
    source: FilterPipeline,
    dest: FilterPipeline,
}

// ── The state machine ───────────────────────────────────────────

pub(crate) struct CoreState {
    config: CoreConfig,
    federates: Vec<FederateRecord>,
    registry: InterfaceRegistry,
    filters: IndexMap<String, EndpointFilters>,
    filter_names: Vec<String>,
    per_fed_filters: Vec<Vec<String>>,
    upstream: Option<Upstream>,
    send_seq: u64,
    metrics: CoreMetrics,
}

impl CoreState {
    pub(crate) fn new(config: CoreConfig, upstream: Option<Box<dyn Conduit>>) -> Self {
        Self {
            config,
            federates: Vec::new(),
            registry: InterfaceRegistry::new(),
            filters: IndexMap::new(),
            filter_names: Vec::new(),
            per_fed_filters: Vec::new(),
            upstream: upstream.map(|tx| Upstream {
                tx,
                connected: true,
                bound: Time::ZERO,
                last_report: None,
                next_req: 0,
                pending: IndexMap::new(),
                exec_requested: false,
            }),
            send_seq: 0,
            metrics: CoreMetrics::default(),
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.send_seq += 1;
        self.send_seq
    }

    fn upstream_connected(&self) -> bool {
        self.upstream.as_ref().is_some_and(|u| u.connected)
    }

    pub(crate) fn send_hello(&mut self) {
        let name = self.config.name.clone();
        self.send_frame(&WireMsg::Hello {
            name,
            version: wire::WIRE_VERSION,
        });
    }

    fn send_frame(&mut self, msg: &WireMsg) {
        let sent = match &self.upstream {
            Some(u) if u.connected => u.tx.send(wire::encode(msg)).is_ok(),
            _ => return,
        };
        if sent {
            self.metrics.frames_sent += 1;
        } else {
            self.upstream_lost();
        }
    }

    // ── Request dispatch ────────────────────────────────────────

    pub(crate) fn handle_request(&mut self, req: CoreRequest) {
        match req {
            CoreRequest::RegisterFederate { config, reply } => {
                let _ = reply.send(self.register_federate(config));
            }
            CoreRequest::RegisterPublication {
                fed,
                name,
                kind,
                units,
                global,
                reply,
            } => self.register_publication(fed, name, kind, units, global, reply),
            CoreRequest::RegisterInput {
                fed,
                target,
                kind,
                reply,
            } => self.register_input(fed, target, kind, reply),
            CoreRequest::RegisterEndpoint {
                fed,
                name,
                global,
                reply,
            } => self.register_endpoint(fed, name, global, reply),
            CoreRequest::RegisterFilter {
                fed,
                name,
                spec,
                attach,
                reply,
            } => self.register_filter(fed, name, spec, attach, reply),
            CoreRequest::EnterInitializing { fed, reply } => {
                let _ = reply.send(self.enter_initializing(fed));
            }
            CoreRequest::EnterExecuting {
                fed,
                iterate,
                reply,
            } => self.enter_executing(fed, iterate, reply),
            CoreRequest::RequestTime {
                fed,
                desired,
                iterate,
                reply,
            } => self.request_time(fed, desired, iterate, reply),
            CoreRequest::Publish {
                fed,
                handle,
                value,
                reply,
            } => self.publish(fed, handle, value, reply),
            CoreRequest::SendMessage {
                fed,
                handle,
                dest,
                payload,
                reply,
            } => self.send_message(fed, handle, dest, payload, reply),
            CoreRequest::ReadInput { fed, handle, reply } => {
                let _ = reply.send(self.read_input(fed, handle));
            }
            CoreRequest::CheckUpdate { fed, handle, reply } => {
                let _ = reply.send(self.check_update(fed, handle));
            }
            CoreRequest::NextMessage { fed, handle, reply } => {
                let _ = reply.send(self.next_message(fed, handle));
            }
            CoreRequest::Finalize { fed, reply } => {
                let _ = reply.send(self.finalize(fed));
            }
            CoreRequest::Metrics { reply } => {
                let _ = reply.send(self.metrics.clone());
            }
            CoreRequest::Shutdown => self.shutdown(),
        }
    }

    // ── Federate registration ───────────────────────────────────

    fn register_federate(&mut self, config: FederateConfig) -> Result<FederateId, ConfigError> {
        config.validate()?;
        if self.federates.iter().any(|f| f.name == config.name) {
            return Err(ConfigError::DuplicateFederate { name: config.name });
        }
        let id = FederateId(self.federates.len() as u32);
        self.registry.add_federate();
        self.per_fed_filters.push(Vec::new());
        self.federates.push(FederateRecord {
            name: config.name,
            lifecycle: FederateLifecycle::Created,
            coordinator: TimeCoordinator::new(config.properties),
            pending_grant: None,
            pending_exec: None,
            init_updates: false,
            warnings: Vec::new(),
        });
        Ok(id)
    }

    // ── Interface registration ──────────────────────────────────

    /// Registration stays open through `Created` and `Initializing` and
    /// closes at `Executing`.
    fn registration_open(&self, fed: FederateId) -> Result<(), FederateError> {
        let state = self.federates[fed.0 as usize].lifecycle;
        match state {
            FederateLifecycle::Created | FederateLifecycle::Initializing => Ok(()),
            FederateLifecycle::Executing => {
                Err(RegistrationError::RegistrationClosed { state }.into())
            }
            _ => Err(FederateError::NotActive { state }),
        }
    }

    fn park_upstream(&mut self, reg: PendingUpReg) -> Option<u32> {
        match &mut self.upstream {
            Some(u) if u.connected => {
                let id = u.next_req;
                u.next_req = u.next_req.wrapping_add(1);
                u.pending.insert(id, reg);
                Some(id)
            }
            _ => None,
        }
    }

    fn register_publication(
        &mut self,
        fed: FederateId,
        name: String,
        kind: ValueKind,
        units: Option<String>,
        global: bool,
        reply: Reply<PublicationHandle>,
    ) {
        if let Err(e) = self.registration_open(fed) {
            let _ = reply.send(Err(e));
            return;
        }
        let fed_name = self.federates[fed.0 as usize].name.clone();
        let new_pub = match self
            .registry
            .register_publication(fed, &fed_name, &name, kind, units.clone(), global)
        {
            Ok(p) => p,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        if !new_pub.mismatches.is_empty() {
            if self.config.strict_type_checking {
                self.registry.remove_publication(&new_pub.key);
                if let Some((_, tm)) = new_pub.mismatches.into_iter().next() {
                    let _ = reply.send(Err(FederateError::TypeMismatch(tm)));
                }
                return;
            }
            for (owner, tm) in &new_pub.mismatches {
                self.metrics.type_mismatch_warnings += 1;
                self.federates[owner.0 as usize].warnings.push(tm.clone());
            }
        }
        if self.upstream_connected() {
            let key = new_pub.key.clone();
            let req = self.park_upstream(PendingUpReg::Publication {
                key: new_pub.key,
                handle: new_pub.handle,
                reply,
            });
            if let Some(req_id) = req {
                self.send_frame(&WireMsg::RegisterPublication {
                    req_id,
                    key,
                    kind,
                    units,
                });
            }
        } else {
            let _ = reply.send(Ok(new_pub.handle));
        }
    }

    fn register_input(
        &mut self,
        fed: FederateId,
        target: String,
        kind: ValueKind,
        reply: Reply<InputHandle>,
    ) {
        if let Err(e) = self.registration_open(fed) {
            let _ = reply.send(Err(e));
            return;
        }
        let (handle, index, mismatch) = match self.registry.register_input(fed, &target, kind) {
            Ok(r) => r,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        if let Some(tm) = mismatch {
            if self.config.strict_type_checking {
                self.registry.retire_input(index);
                let _ = reply.send(Err(FederateError::TypeMismatch(tm)));
                return;
            }
            self.metrics.type_mismatch_warnings += 1;
            self.federates[fed.0 as usize].warnings.push(tm);
        }
        if self.upstream_connected() {
            let req = self.park_upstream(PendingUpReg::Input {
                fed,
                index,
                target: target.clone(),
                handle,
                reply,
            });
            if let Some(req_id) = req {
                self.send_frame(&WireMsg::RegisterInput {
                    req_id,
                    target,
                    kind,
                });
            }
        } else {
            let _ = reply.send(Ok(handle));
        }
    }

    fn register_endpoint(
        &mut self,
        fed: FederateId,
        name: String,
        global: bool,
        reply: Reply<EndpointHandle>,
    ) {
        if let Err(e) = self.registration_open(fed) {
            let _ = reply.send(Err(e));
            return;
        }
        let fed_name = self.federates[fed.0 as usize].name.clone();
        let (handle, key) = match self.registry.register_endpoint(fed, &fed_name, &name, global) {
            Ok(r) => r,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        if self.upstream_connected() {
            let req = self.park_upstream(PendingUpReg::Endpoint {
                key: key.clone(),
                handle,
                reply,
            });
            if let Some(req_id) = req {
                self.send_frame(&WireMsg::RegisterEndpoint { req_id, key });
            }
        } else {
            let _ = reply.send(Ok(handle));
        }
    }

    /// Filters attach to endpoints owned by this core; there is no
    /// cross-core filter placement.
    fn register_filter(
        &mut self,
        fed: FederateId,
        name: String,
        spec: FilterSpec,
        attach: FilterAttach,
        reply: Reply<FilterHandle>,
    ) {
        if let Err(e) = self.registration_open(fed) {
            let _ = reply.send(Err(e));
            return;
        }
        let key = match &attach {
            FilterAttach::Source(k) | FilterAttach::Destination(k) => k.clone(),
        };
        if !self.registry.has_endpoint(&key) {
            let _ = reply.send(Err(RegistrationError::UnknownTarget { key }.into()));
            return;
        }
        if self.filter_names.contains(&name) {
            let _ = reply.send(Err(RegistrationError::DuplicateName { key: name }.into()));
            return;
        }
        let op = spec.build(&name);
        let entry = self.filters.entry(key).or_default();
        match attach {
            FilterAttach::Source(_) => entry.source.push(op),
            FilterAttach::Destination(_) => entry.dest.push(op),
        }
        let slot = &mut self.per_fed_filters[fed.0 as usize];
        let handle = FilterHandle(slot.len() as u32);
        slot.push(name.clone());
        self.filter_names.push(name);
        let _ = reply.send(Ok(handle));
    }

    // ── Lifecycle ───────────────────────────────────────────────

    fn enter_initializing(&mut self, fed: FederateId) -> Result<(), FederateError> {
        let rec = &mut self.federates[fed.0 as usize];
        match rec.lifecycle {
            FederateLifecycle::Created => {
                rec.lifecycle = FederateLifecycle::Initializing;
                Ok(())
            }
            state if state.is_terminal() => Err(FederateError::NotActive { state }),
            from => Err(FederateError::InvalidTransition {
                from,
                operation: "enter initializing mode",
            }),
        }
    }

    fn enter_executing(
        &mut self,
        fed: FederateId,
        iterate: IterationRequest,
        reply: Reply<IterationResult>,
    ) {
        let rec = &mut self.federates[fed.0 as usize];
        match rec.lifecycle {
            FederateLifecycle::Initializing => {
                rec.pending_exec = Some(PendingExec {
                    iterate,
                    reply,
                    since: Instant::now(),
                });
                self.check_exec_barrier();
            }
            state if state.is_terminal() => {
                let _ = reply.send(Err(FederateError::NotActive { state }));
            }
            from => {
                let _ = reply.send(Err(FederateError::InvalidTransition {
                    from,
                    operation: "enter executing mode",
                }));
            }
        }
    }

    /// The execution barrier: once every non-terminal federate has
    /// asked to enter execution, either the whole core iterates once
    /// more in `Initializing` or the whole core enters `Executing` at
    /// time zero. With an upstream broker the decision is federation
    /// wide; the core forwards an aggregate request and waits for the
    /// grant.
    fn check_exec_barrier(&mut self) {
        let participants: Vec<usize> = (0..self.federates.len())
            .filter(|&i| !self.federates[i].lifecycle.is_terminal())
            .collect();
        if participants.is_empty() {
            return;
        }
        if !participants
            .iter()
            .all(|&i| self.federates[i].pending_exec.is_some())
        {
            return;
        }
        let iterating = participants.iter().any(|&i| {
            let rec = &self.federates[i];
            match rec.pending_exec.as_ref().map(|p| p.iterate) {
                Some(IterationRequest::ForceIteration) => true,
                Some(IterationRequest::IterateIfNeeded) => rec.init_updates,
                _ => false,
            }
        });
        if self.upstream_connected() {
            let already = self.upstream.as_ref().is_some_and(|u| u.exec_requested);
            if !already {
                if let Some(u) = &mut self.upstream {
                    u.exec_requested = true;
                }
                self.send_frame(&WireMsg::ExecRequest { iterating });
            }
        } else {
            self.resolve_exec(iterating);
        }
    }

    fn resolve_exec(&mut self, iterating: bool) {
        if let Some(u) = &mut self.upstream {
            u.exec_requested = false;
        }
        for idx in 0..self.federates.len() {
            let Some(pe) = self.federates[idx].pending_exec.take() else {
                continue;
            };
            let fed = FederateId(idx as u32);
            if iterating {
                self.registry.apply_deliveries(fed, Time::ZERO);
                self.federates[idx].init_updates = false;
                let _ = pe.reply.send(Ok(IterationResult::Iterating));
            } else {
                self.federates[idx].lifecycle = FederateLifecycle::Executing;
                self.federates[idx].coordinator.start_executing();
                self.registry.apply_deliveries(fed, Time::ZERO);
                let _ = pe.reply.send(Ok(IterationResult::NextStep));
            }
        }
        if !iterating {
            self.reevaluate();
        }
    }

    fn finalize(&mut self, fed: FederateId) -> Result<(), FederateError> {
        let idx = fed.0 as usize;
        match self.federates[idx].lifecycle {
            // Finalizing twice is a no-op, not an error.
            FederateLifecycle::Finalized | FederateLifecycle::Errored => return Ok(()),
            FederateLifecycle::Created => {
                return Err(FederateError::InvalidTransition {
                    from: FederateLifecycle::Created,
                    operation: "finalize",
                });
            }
            FederateLifecycle::Initializing | FederateLifecycle::Executing => {}
        }
        let rec = &mut self.federates[idx];
        rec.lifecycle = FederateLifecycle::Finalized;
        let granted = rec.coordinator.granted().max(Time::ZERO);
        rec.coordinator.retire();
        // Finalize answers any outstanding async request with `Halted`.
        if let Some(pg) = rec.pending_grant.take() {
            let _ = pg.reply.send(Ok(TimeGrant {
                time: granted,
                result: IterationResult::Halted,
            }));
        }
        if let Some(pe) = rec.pending_exec.take() {
            let _ = pe.reply.send(Ok(IterationResult::Halted));
        }
        self.check_exec_barrier();
        self.reevaluate();
        if self
            .federates
            .iter()
            .all(|f| f.lifecycle.is_terminal())
        {
            self.send_frame(&WireMsg::Disconnect);
        }
        Ok(())
    }

    pub(crate) fn shutdown(&mut self) {
        self.send_frame(&WireMsg::Disconnect);
        for rec in &mut self.federates {
            if rec.lifecycle.is_terminal() {
                continue;
            }
            rec.lifecycle = FederateLifecycle::Errored;
            rec.coordinator.retire();
            if let Some(pg) = rec.pending_grant.take() {
                let _ = pg.reply.send(Err(FederateError::ConnectionLost));
            }
            if let Some(pe) = rec.pending_exec.take() {
                let _ = pe.reply.send(Err(FederateError::ConnectionLost));
            }
        }
    }

    // ── Time requests and granting ──────────────────────────────

    fn request_time(
        &mut self,
        fed: FederateId,
        desired: Time,
        iterate: IterationRequest,
        reply: Reply<TimeGrant>,
    ) {
        let rec = &mut self.federates[fed.0 as usize];
        match rec.lifecycle {
            FederateLifecycle::Executing => {}
            state if state.is_terminal() => {
                let _ = reply.send(Err(FederateError::NotActive { state }));
                return;
            }
            from => {
                let _ = reply.send(Err(FederateError::InvalidTransition {
                    from,
                    operation: "request time",
                }));
                return;
            }
        }
        if rec.pending_grant.is_some() {
            let _ = reply.send(Err(FederateError::AsyncOutstanding));
            return;
        }
        rec.coordinator.begin_request(desired);
        rec.pending_grant = Some(PendingGrant {
            desired,
            iterate,
            reply,
            since: Instant::now(),
        });
        self.reevaluate();
    }

    /// Run the granting pass to a fixed point, then refresh the
    /// upstream report.
    fn reevaluate(&mut self) {
        loop {
            let mut progressed = false;
            for idx in 0..self.federates.len() {
                if self.try_grant(idx) {
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        self.maybe_report();
    }

    /// The earliest time at which anyone other than `idx` — another
    /// local federate or the rest of the federation — may still send an
    /// event toward `idx`.
    fn dependency_bound(&self, idx: usize) -> Time {
        let mut bound = match &self.upstream {
            Some(u) if u.connected => u.bound,
            _ => Time::MAXTIME,
        };
        for j in 0..self.federates.len() {
            if j == idx {
                continue;
            }
            let ev = self.registry.earliest_event(FederateId(j as u32));
            bound = bound.min(self.federates[j].coordinator.contribution(ev));
        }
        bound
    }

    fn try_grant(&mut self, idx: usize) -> bool {
        let fed = FederateId(idx as u32);
        let (desired, iterate) = match &self.federates[idx].pending_grant {
            Some(pg) => (pg.desired, pg.iterate),
            None => return false,
        };
        let earliest = self.registry.earliest_event(fed);
        let granted = self.federates[idx].coordinator.granted();
        match iterate {
            IterationRequest::ForceIteration => {
                self.issue_grant(idx, granted, IterationResult::Iterating);
                return true;
            }
            IterationRequest::IterateIfNeeded => {
                let refreshed = earliest.is_some_and(|ev| {
                    self.federates[idx].coordinator.event_grant_time(ev) <= granted
                });
                if refreshed {
                    self.issue_grant(idx, granted, IterationResult::Iterating);
                    return true;
                }
            }
            IterationRequest::NoIteration => {}
        }
        let coord = &self.federates[idx].coordinator;
        let mut candidate = coord.next_allowed(desired);
        let mut interrupted = false;
        if !coord.props().uninterruptible {
            if let Some(ev) = earliest {
                let event_time = coord.event_grant_time(ev);
                if event_time < candidate {
                    candidate = event_time;
                    interrupted = true;
                }
            }
        }
        let wait_for_update = coord.props().wait_for_current_time_update;
        let bound = self.dependency_bound(idx);
        let grantable = if wait_for_update {
            candidate < bound
        } else {
            candidate <= bound
        };
        if !grantable {
            return false;
        }
        if interrupted {
            self.metrics.event_interrupts += 1;
        }
        self.issue_grant(idx, candidate, IterationResult::NextStep);
        true
    }

    fn issue_grant(&mut self, idx: usize, time: Time, result: IterationResult) {
        let fed = FederateId(idx as u32);
        self.federates[idx].coordinator.complete_grant(time);
        self.registry.apply_deliveries(fed, time);
        if let Some(pg) = self.federates[idx].pending_grant.take() {
            let _ = pg.reply.send(Ok(TimeGrant { time, result }));
        }
        self.metrics.grants_issued += 1;
        if result == IterationResult::Iterating {
            self.metrics.iterations_granted += 1;
        }
    }

    /// Send an upstream time report when the local minimum moved up.
    /// Reports never move backward; the monotone clamp keeps the
    /// federation-wide bound computation safe.
    fn maybe_report(&mut self) {
        if !self.upstream_connected() {
            return;
        }
        let mut report = Time::MAXTIME;
        for idx in 0..self.federates.len() {
            let ev = self.registry.earliest_event(FederateId(idx as u32));
            report = report.min(self.federates[idx].coordinator.contribution(ev));
        }
        let stale = self
            .upstream
            .as_ref()
            .is_some_and(|u| u.last_report.is_none_or(|last| report > last));
        if stale {
            if let Some(u) = &mut self.upstream {
                u.last_report = Some(report);
            }
            self.send_frame(&WireMsg::TimeReport { minimum: report });
        }
    }

    /// Fail federates blocked longer than the configured grant timeout.
    pub(crate) fn check_timeouts(&mut self, now: Instant) {
        let Some(limit) = self.config.grant_timeout else {
            return;
        };
        let mut failed = false;
        for idx in 0..self.federates.len() {
            let rec = &mut self.federates[idx];
            let grant_expired = rec
                .pending_grant
                .as_ref()
                .is_some_and(|pg| now.duration_since(pg.since) >= limit);
            let exec_expired = rec
                .pending_exec
                .as_ref()
                .is_some_and(|pe| now.duration_since(pe.since) >= limit);
            if !grant_expired && !exec_expired {
                continue;
            }
            if let Some(pg) = rec.pending_grant.take() {
                let _ = pg.reply.send(Err(FederateError::GrantTimeout));
            }
            if let Some(pe) = rec.pending_exec.take() {
                let _ = pe.reply.send(Err(FederateError::GrantTimeout));
            }
            rec.lifecycle = FederateLifecycle::Errored;
            rec.coordinator.retire();
            self.metrics.grant_timeouts += 1;
            failed = true;
        }
        if failed {
            self.check_exec_barrier();
            self.reevaluate();
        }
    }

    // ── Values ──────────────────────────────────────────────────

    fn publish(
        &mut self,
        fed: FederateId,
        handle: PublicationHandle,
        value: Value,
        reply: Reply<()>,
    ) {
        let idx = fed.0 as usize;
        let publish_time = match self.federates[idx].lifecycle {
            FederateLifecycle::Executing => self.federates[idx].coordinator.granted(),
            FederateLifecycle::Initializing => Time::ZERO,
            state if state.is_terminal() => {
                let _ = reply.send(Err(FederateError::NotActive { state }));
                return;
            }
            from => {
                let _ = reply.send(Err(FederateError::InvalidTransition {
                    from,
                    operation: "publish",
                }));
                return;
            }
        };
        let Some(key) = self.registry.publication_key(fed, handle).map(str::to_string) else {
            let _ = reply.send(Err(FederateError::UnknownHandle));
            return;
        };
        let stored = {
            let Some(publication) = self.registry.publication_mut(&key) else {
                let _ = reply.send(Err(FederateError::UnknownHandle));
                return;
            };
            if publication.owner != fed {
                let _ = reply.send(Err(FederateError::UnknownHandle));
                return;
            }
            let stored = value.convert_to(publication.kind);
            publication.last = Some((publish_time, stored.clone()));
            stored
        };
        self.metrics.values_published += 1;
        let event_time = publish_time + self.federates[idx].coordinator.props().output_delay;
        self.fan_value_local(&key, event_time, &stored);
        let source = self.config.name.clone();
        self.send_frame(&WireMsg::ValueData {
            key,
            time: event_time,
            value: stored,
            source,
        });
        let _ = reply.send(Ok(()));
        self.reevaluate();
    }

    /// Queue a value for every local subscriber of `key`, adding each
    /// destination's input delay.
    fn fan_value_local(&mut self, key: &str, event_time: Time, value: &Value) {
        for index in self.registry.subscribers(key) {
            let owner = self.registry.input(index).owner;
            let owner_idx = owner.0 as usize;
            let delivery =
                event_time + self.federates[owner_idx].coordinator.props().input_delay;
            let seq = self.next_seq();
            self.registry.push_pending(
                index,
                PendingValue {
                    time: delivery,
                    seq,
                    value: value.clone(),
                },
            );
            self.metrics.values_delivered += 1;
            if self.federates[owner_idx].lifecycle == FederateLifecycle::Initializing {
                self.federates[owner_idx].init_updates = true;
            }
        }
    }

    fn read_input(
        &mut self,
        fed: FederateId,
        handle: InputHandle,
    ) -> Result<Option<Value>, FederateError> {
        let Some(index) = self.registry.input_index(fed, handle) else {
            return Err(FederateError::UnknownHandle);
        };
        let input = self.registry.input(index);
        Ok(input
            .current
            .as_ref()
            .map(|(_, value)| value.convert_to(input.kind)))
    }

    fn check_update(
        &mut self,
        fed: FederateId,
        handle: InputHandle,
    ) -> Result<bool, FederateError> {
        let Some(index) = self.registry.input_index(fed, handle) else {
            return Err(FederateError::UnknownHandle);
        };
        let input = self.registry.input_mut(index);
        let updated = input.updated;
        input.updated = false;
        Ok(updated)
    }

    // ── Messages ────────────────────────────────────────────────

    fn send_message(
        &mut self,
        fed: FederateId,
        handle: EndpointHandle,
        dest: String,
        payload: Vec<u8>,
        reply: Reply<()>,
    ) {
        let idx = fed.0 as usize;
        match self.federates[idx].lifecycle {
            FederateLifecycle::Executing => {}
            state if state.is_terminal() => {
                let _ = reply.send(Err(FederateError::NotActive { state }));
                return;
            }
            from => {
                let _ = reply.send(Err(FederateError::InvalidTransition {
                    from,
                    operation: "send message",
                }));
                return;
            }
        }
        let Some(source) = self.registry.endpoint_key(fed, handle).map(str::to_string) else {
            let _ = reply.send(Err(FederateError::UnknownHandle));
            return;
        };
        if self.registry.endpoint_owner(&source) != Some(fed) {
            let _ = reply.send(Err(FederateError::UnknownHandle));
            return;
        }
        let granted = self.federates[idx].coordinator.granted();
        let mut msg = Message::new(&source, &dest, payload, granted);
        msg.arrival_seq = self.next_seq();
        let msg = msg.delayed_by(self.federates[idx].coordinator.props().output_delay);
        self.metrics.messages_sent += 1;
        let outputs = self.run_source_filters(&source, msg);
        for out in outputs {
            self.route_message(out, 0);
        }
        let _ = reply.send(Ok(()));
        self.reevaluate();
    }

    fn run_source_filters(&mut self, key: &str, msg: Message) -> SmallVec<[Message; 1]> {
        match self.filters.get_mut(key) {
            Some(f) if !f.source.is_empty() => {
                let out = f.source.run(msg);
                if out.is_empty() {
                    self.metrics.messages_dropped += 1;
                }
                out
            }
            _ => smallvec![msg],
        }
    }

    fn run_dest_filters(&mut self, key: &str, msg: Message) -> SmallVec<[Message; 1]> {
        match self.filters.get_mut(key) {
            Some(f) if !f.dest.is_empty() => {
                let out = f.dest.run(msg);
                if out.is_empty() {
                    self.metrics.messages_dropped += 1;
                }
                out
            }
            _ => smallvec![msg],
        }
    }

    /// Route one in-flight message: locally if the destination endpoint
    /// lives here (running its destination-side filters first), upstream
    /// otherwise.
    fn route_message(&mut self, msg: Message, depth: u8) {
        if depth >= MAX_REROUTE_DEPTH {
            self.metrics.unroutable_messages += 1;
            return;
        }
        if !self.registry.has_endpoint(&msg.dest) {
            if self.upstream_connected() {
                self.send_frame(&WireMsg::MessageData { message: msg });
            } else {
                self.metrics.unroutable_messages += 1;
            }
            return;
        }
        let dest_key = msg.dest.clone();
        let outputs = self.run_dest_filters(&dest_key, msg);
        for out in outputs {
            if out.dest == dest_key {
                self.deliver_message(out);
            } else {
                // A destination filter rerouted; resolve again.
                self.route_message(out, depth + 1);
            }
        }
    }

    fn deliver_message(&mut self, msg: Message) {
        let Some(owner) = self.registry.endpoint_owner(&msg.dest) else {
            self.metrics.unroutable_messages += 1;
            return;
        };
        let delay = self.federates[owner.0 as usize].coordinator.props().input_delay;
        let mut msg = msg.delayed_by(delay);
        // Local arrival order breaks same-instant ties deterministically.
        msg.arrival_seq = self.next_seq();
        if self.registry.queue_message(msg).is_some() {
            self.metrics.messages_delivered += 1;
        }
    }

    fn next_message(
        &mut self,
        fed: FederateId,
        handle: EndpointHandle,
    ) -> Result<Option<Message>, FederateError> {
        if self.registry.endpoint_key(fed, handle).is_none() {
            return Err(FederateError::UnknownHandle);
        }
        let granted = self.federates[fed.0 as usize]
            .coordinator
            .granted()
            .max(Time::ZERO);
        Ok(self.registry.next_message(fed, handle, granted))
    }

    // ── Upstream frames ─────────────────────────────────────────

    pub(crate) fn handle_frame(&mut self, bytes: &[u8]) {
        let Ok(msg) = wire::decode(bytes) else {
            return;
        };
        self.metrics.frames_received += 1;
        match msg {
            WireMsg::Welcome { .. } => {}
            WireMsg::Ack { req_id, outcome } => self.handle_ack(req_id, outcome),
            WireMsg::ExecGrant { iterating } => self.resolve_exec(iterating),
            WireMsg::TimeBound { bound } => {
                if let Some(u) = &mut self.upstream {
                    if bound > u.bound {
                        u.bound = bound;
                    }
                }
                self.reevaluate();
            }
            WireMsg::ValueData {
                key,
                time,
                value,
                source,
            } => {
                // The broker fans values to every subscribed subtree,
                // including the publisher's own; drop the echo.
                if source != self.config.name {
                    self.fan_value_local(&key, time, &value);
                    self.reevaluate();
                }
            }
            WireMsg::MessageData { message } => {
                self.route_message(message, 0);
                self.reevaluate();
            }
            WireMsg::ErrorNotice { .. } => {
                self.metrics.error_notices += 1;
            }
            WireMsg::Disconnect => self.upstream_lost(),
            _ => {}
        }
    }

    fn handle_ack(&mut self, req_id: u32, outcome: AckOutcome) {
        let reg = match &mut self.upstream {
            Some(u) => u.pending.shift_remove(&req_id),
            None => None,
        };
        let Some(reg) = reg else { return };
        match reg {
            PendingUpReg::Publication { key, handle, reply } => match outcome {
                AckOutcome::Accepted | AckOutcome::Mismatch { .. } => {
                    let _ = reply.send(Ok(handle));
                }
                AckOutcome::Duplicate => {
                    self.registry.remove_publication(&key);
                    let _ = reply.send(Err(RegistrationError::DuplicateName { key }.into()));
                }
            },
            PendingUpReg::Input {
                fed,
                index,
                target,
                handle,
                reply,
            } => match outcome {
                AckOutcome::Accepted | AckOutcome::Duplicate => {
                    self.registry.input_mut(index).resolved = true;
                    let _ = reply.send(Ok(handle));
                }
                AckOutcome::Mismatch { declared, found } => {
                    let tm = TypeMismatch {
                        target,
                        declared,
                        found,
                    };
                    if self.config.strict_type_checking {
                        self.registry.retire_input(index);
                        let _ = reply.send(Err(FederateError::TypeMismatch(tm)));
                    } else {
                        self.registry.input_mut(index).resolved = true;
                        self.metrics.type_mismatch_warnings += 1;
                        self.federates[fed.0 as usize].warnings.push(tm);
                        let _ = reply.send(Ok(handle));
                    }
                }
            },
            PendingUpReg::Endpoint { key, handle, reply } => match outcome {
                AckOutcome::Accepted | AckOutcome::Mismatch { .. } => {
                    let _ = reply.send(Ok(handle));
                }
                AckOutcome::Duplicate => {
                    self.registry.remove_endpoint(&key);
                    let _ = reply.send(Err(RegistrationError::DuplicateName { key }.into()));
                }
            },
        }
    }

    /// The upstream link is gone; every non-terminal federate fails.
    pub(crate) fn upstream_lost(&mut self) {
        match &mut self.upstream {
            Some(u) if u.connected => u.connected = false,
            _ => return,
        }
        let pending = match &mut self.upstream {
            Some(u) => std::mem::take(&mut u.pending),
            None => IndexMap::new(),
        };
        for (_, reg) in pending {
            reg.fail(FederateError::ConnectionLost);
        }
        for rec in &mut self.federates {
            if rec.lifecycle.is_terminal() {
                continue;
            }
            rec.lifecycle = FederateLifecycle::Errored;
            rec.coordinator.retire();
            if let Some(pg) = rec.pending_grant.take() {
                let _ = pg.reply.send(Err(FederateError::ConnectionLost));
            }
            if let Some(pe) = rec.pending_exec.take() {
                let _ = pe.reply.send(Err(FederateError::ConnectionLost));
            }
        }
    }

    #[cfg(test)]
    fn lifecycle(&self, fed: FederateId) -> FederateLifecycle {
        self.federates[fed.0 as usize].lifecycle
    }

    #[cfg(test)]
    fn warnings(&self, fed: FederateId) -> &[TypeMismatch] {
        &self.federates[fed.0 as usize].warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, Receiver};

    fn new_core() -> CoreState {
        CoreState::new(CoreConfig::default(), None)
    }

    fn add_fed(state: &mut CoreState, name: &str) -> FederateId {
        add_fed_with(state, FederateConfig::new(name))
    }

    fn add_fed_with(state: &mut CoreState, config: FederateConfig) -> FederateId {
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::RegisterFederate { config, reply: tx });
        rx.try_recv().unwrap().unwrap()
    }

    fn register_pub(state: &mut CoreState, fed: FederateId, name: &str) -> PublicationHandle {
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::RegisterPublication {
            fed,
            name: name.into(),
            kind: ValueKind::Double,
            units: None,
            global: false,
            reply: tx,
        });
        rx.try_recv().unwrap().unwrap()
    }

    fn register_input(state: &mut CoreState, fed: FederateId, target: &str) -> InputHandle {
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::RegisterInput {
            fed,
            target: target.into(),
            kind: ValueKind::Double,
            reply: tx,
        });
        rx.try_recv().unwrap().unwrap()
    }

    fn register_endpoint(state: &mut CoreState, fed: FederateId, name: &str) -> EndpointHandle {
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::RegisterEndpoint {
            fed,
            name: name.into(),
            global: false,
            reply: tx,
        });
        rx.try_recv().unwrap().unwrap()
    }

    fn enter_init(state: &mut CoreState, fed: FederateId) {
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::EnterInitializing { fed, reply: tx });
        rx.try_recv().unwrap().unwrap();
    }

    fn enter_exec_pending(
        state: &mut CoreState,
        fed: FederateId,
        iterate: IterationRequest,
    ) -> Receiver<Result<IterationResult, FederateError>> {
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::EnterExecuting {
            fed,
            iterate,
            reply: tx,
        });
        rx
    }

    /// Register, initialize, and move every given federate to Executing.
    fn start_executing(state: &mut CoreState, feds: &[FederateId]) {
        for &fed in feds {
            enter_init(state, fed);
        }
        let rxs: Vec<_> = feds
            .iter()
            .map(|&fed| enter_exec_pending(state, fed, IterationRequest::NoIteration))
            .collect();
        for rx in rxs {
            assert_eq!(rx.try_recv().unwrap().unwrap(), IterationResult::NextStep);
        }
    }

    fn request_time_pending(
        state: &mut CoreState,
        fed: FederateId,
        desired: f64,
    ) -> Receiver<Result<TimeGrant, FederateError>> {
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::RequestTime {
            fed,
            desired: Time::from_seconds(desired),
            iterate: IterationRequest::NoIteration,
            reply: tx,
        });
        rx
    }

    fn publish(state: &mut CoreState, fed: FederateId, handle: PublicationHandle, v: f64) {
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::Publish {
            fed,
            handle,
            value: Value::Double(v),
            reply: tx,
        });
        rx.try_recv().unwrap().unwrap();
    }

    fn send_message(
        state: &mut CoreState,
        fed: FederateId,
        handle: EndpointHandle,
        dest: &str,
        payload: &[u8],
    ) {
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::SendMessage {
            fed,
            handle,
            dest: dest.into(),
            payload: payload.to_vec(),
            reply: tx,
        });
        rx.try_recv().unwrap().unwrap();
    }

    fn finalize(state: &mut CoreState, fed: FederateId) {
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::Finalize { fed, reply: tx });
        rx.try_recv().unwrap().unwrap();
    }

    fn read_input(state: &mut CoreState, fed: FederateId, handle: InputHandle) -> Option<Value> {
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::ReadInput {
            fed,
            handle,
            reply: tx,
        });
        rx.try_recv().unwrap().unwrap()
    }

    fn check_update(state: &mut CoreState, fed: FederateId, handle: InputHandle) -> bool {
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::CheckUpdate {
            fed,
            handle,
            reply: tx,
        });
        rx.try_recv().unwrap().unwrap()
    }

    fn next_message(
        state: &mut CoreState,
        fed: FederateId,
        handle: EndpointHandle,
    ) -> Option<Message> {
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::NextMessage {
            fed,
            handle,
            reply: tx,
        });
        rx.try_recv().unwrap().unwrap()
    }

    fn grant_of(rx: &Receiver<Result<TimeGrant, FederateError>>) -> TimeGrant {
        rx.try_recv().expect("grant pending").expect("grant ok")
    }

    // ── Execution barrier ───────────────────────────────────────

    #[test]
    fn exec_barrier_waits_for_all_federates() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        let b = add_fed(&mut state, "b");
        enter_init(&mut state, a);
        enter_init(&mut state, b);
        let rx_a = enter_exec_pending(&mut state, a, IterationRequest::NoIteration);
        assert!(rx_a.try_recv().is_err());
        let rx_b = enter_exec_pending(&mut state, b, IterationRequest::NoIteration);
        assert_eq!(rx_a.try_recv().unwrap().unwrap(), IterationResult::NextStep);
        assert_eq!(rx_b.try_recv().unwrap().unwrap(), IterationResult::NextStep);
        assert_eq!(state.lifecycle(a), FederateLifecycle::Executing);
    }

    #[test]
    fn init_iteration_is_all_or_nothing() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        let b = add_fed(&mut state, "b");
        let pub_a = register_pub(&mut state, a, "x");
        let in_b = register_input(&mut state, b, "a/x");
        enter_init(&mut state, a);
        enter_init(&mut state, b);
        // A publishes during initialization; B asks to iterate if there
        // is anything new.
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::Publish {
            fed: a,
            handle: pub_a,
            value: Value::Double(1.0),
            reply: tx,
        });
        rx.try_recv().unwrap().unwrap();
        let rx_a = enter_exec_pending(&mut state, a, IterationRequest::NoIteration);
        let rx_b = enter_exec_pending(&mut state, b, IterationRequest::IterateIfNeeded);
        // Everyone iterates together.
        assert_eq!(rx_a.try_recv().unwrap().unwrap(), IterationResult::Iterating);
        assert_eq!(rx_b.try_recv().unwrap().unwrap(), IterationResult::Iterating);
        assert_eq!(state.lifecycle(b), FederateLifecycle::Initializing);
        // The iterated value is visible during initialization.
        assert_eq!(read_input(&mut state, b, in_b), Some(Value::Double(1.0)));
        // Second round: nothing new, the federation enters execution.
        let rx_a = enter_exec_pending(&mut state, a, IterationRequest::NoIteration);
        let rx_b = enter_exec_pending(&mut state, b, IterationRequest::IterateIfNeeded);
        assert_eq!(rx_a.try_recv().unwrap().unwrap(), IterationResult::NextStep);
        assert_eq!(rx_b.try_recv().unwrap().unwrap(), IterationResult::NextStep);
    }

    // ── Granting ────────────────────────────────────────────────

    #[test]
    fn request_blocks_until_dependencies_catch_up() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        let b = add_fed(&mut state, "b");
        register_pub(&mut state, a, "x");
        register_input(&mut state, b, "a/x");
        start_executing(&mut state, &[a, b]);
        let rx_b = request_time_pending(&mut state, b, 10.0);
        // A sits at time zero; B cannot advance past it.
        assert!(rx_b.try_recv().is_err());
        let rx_a = request_time_pending(&mut state, a, 10.0);
        assert_eq!(grant_of(&rx_a).time, Time::from_seconds(10.0));
        assert_eq!(grant_of(&rx_b).time, Time::from_seconds(10.0));
    }

    #[test]
    fn pending_value_interrupts_request() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        let b = add_fed(&mut state, "b");
        let pub_a = register_pub(&mut state, a, "x");
        let in_b = register_input(&mut state, b, "a/x");
        start_executing(&mut state, &[a, b]);
        // A publishes at time zero, then B asks for 10.
        publish(&mut state, a, pub_a, 3.14);
        let rx_b = request_time_pending(&mut state, b, 10.0);
        let grant = grant_of(&rx_b);
        assert_eq!(grant.time, Time::ZERO);
        assert_eq!(grant.result, IterationResult::NextStep);
        assert_eq!(read_input(&mut state, b, in_b), Some(Value::Double(3.14)));
        assert!(check_update(&mut state, b, in_b));
        assert!(!check_update(&mut state, b, in_b));
        assert_eq!(state.metrics.event_interrupts, 1);
    }

    #[test]
    fn uninterruptible_federate_waits_for_requested_time() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        let mut cfg = FederateConfig::new("b");
        cfg.properties.uninterruptible = true;
        let b = add_fed_with(&mut state, cfg);
        let pub_a = register_pub(&mut state, a, "x");
        let in_b = register_input(&mut state, b, "a/x");
        start_executing(&mut state, &[a, b]);
        publish(&mut state, a, pub_a, 1.0);
        let rx_b = request_time_pending(&mut state, b, 10.0);
        assert!(rx_b.try_recv().is_err());
        let _rx_a = request_time_pending(&mut state, a, 20.0);
        // B jumps straight to its requested time; the value is applied
        // there rather than waking B early.
        assert_eq!(grant_of(&rx_b).time, Time::from_seconds(10.0));
        assert_eq!(read_input(&mut state, b, in_b), Some(Value::Double(1.0)));
    }

    #[test]
    fn finalize_releases_blocked_dependents() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        let b = add_fed(&mut state, "b");
        register_pub(&mut state, a, "x");
        register_input(&mut state, b, "a/x");
        start_executing(&mut state, &[a, b]);
        let rx_b = request_time_pending(&mut state, b, 10.0);
        assert!(rx_b.try_recv().is_err());
        finalize(&mut state, a);
        assert_eq!(grant_of(&rx_b).time, Time::from_seconds(10.0));
    }

    #[test]
    fn force_iteration_regrants_current_time() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        start_executing(&mut state, &[a]);
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::RequestTime {
            fed: a,
            desired: Time::from_seconds(5.0),
            iterate: IterationRequest::ForceIteration,
            reply: tx,
        });
        let grant = grant_of(&rx);
        assert_eq!(grant.time, Time::ZERO);
        assert_eq!(grant.result, IterationResult::Iterating);
    }

    #[test]
    fn wait_for_current_time_update_is_strict() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        let mut cfg = FederateConfig::new("b");
        cfg.properties.wait_for_current_time_update = true;
        let b = add_fed_with(&mut state, cfg);
        register_pub(&mut state, a, "x");
        register_input(&mut state, b, "a/x");
        start_executing(&mut state, &[a, b]);
        let rx_b = request_time_pending(&mut state, b, 10.0);
        let rx_a = request_time_pending(&mut state, a, 10.0);
        // A advances to 10, but B waits until A can no longer emit at
        // exactly 10.
        assert_eq!(grant_of(&rx_a).time, Time::from_seconds(10.0));
        assert!(rx_b.try_recv().is_err());
        let _rx_a2 = request_time_pending(&mut state, a, 20.0);
        assert_eq!(grant_of(&rx_b).time, Time::from_seconds(10.0));
    }

    #[test]
    fn period_snaps_grants_to_the_grid() {
        let mut state = new_core();
        let mut cfg = FederateConfig::new("p");
        cfg.properties.period = Time::from_seconds(1.0);
        let p = add_fed_with(&mut state, cfg);
        start_executing(&mut state, &[p]);
        let rx = request_time_pending(&mut state, p, 0.3);
        assert_eq!(grant_of(&rx).time, Time::from_seconds(1.0));
    }

    #[test]
    fn grant_timeout_fails_only_blocked_federates() {
        let mut state = CoreState::new(
            CoreConfig {
                grant_timeout: Some(std::time::Duration::from_millis(5)),
                ..CoreConfig::default()
            },
            None,
        );
        let a = add_fed(&mut state, "a");
        let b = add_fed(&mut state, "b");
        register_pub(&mut state, a, "x");
        register_input(&mut state, b, "a/x");
        start_executing(&mut state, &[a, b]);
        let rx_b = request_time_pending(&mut state, b, 10.0);
        assert!(rx_b.try_recv().is_err());
        state.check_timeouts(Instant::now() + std::time::Duration::from_millis(50));
        assert_eq!(rx_b.try_recv().unwrap(), Err(FederateError::GrantTimeout));
        assert_eq!(state.lifecycle(b), FederateLifecycle::Errored);
        assert_eq!(state.lifecycle(a), FederateLifecycle::Executing);
        assert_eq!(state.metrics.grant_timeouts, 1);
    }

    // ── Messages and filters ────────────────────────────────────

    #[test]
    fn message_round_trip_between_federates() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        let b = add_fed(&mut state, "b");
        let ep_a = register_endpoint(&mut state, a, "out");
        let ep_b = register_endpoint(&mut state, b, "in");
        start_executing(&mut state, &[a, b]);
        send_message(&mut state, a, ep_a, "b/in", b"hello");
        let rx_b = request_time_pending(&mut state, b, 10.0);
        // Immediate delivery: B wakes at the message's delivery time.
        let grant = grant_of(&rx_b);
        assert_eq!(grant.time, Time::ZERO);
        let msg = next_message(&mut state, b, ep_b).expect("message due");
        assert_eq!(msg.payload, b"hello");
        assert_eq!(msg.source, "a/out");
        assert!(next_message(&mut state, b, ep_b).is_none());
    }

    #[test]
    fn delay_filter_defers_delivery_and_grant() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        let b = add_fed(&mut state, "b");
        let ep_a = register_endpoint(&mut state, a, "out");
        let ep_b = register_endpoint(&mut state, b, "in");
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::RegisterFilter {
            fed: a,
            name: "wire_delay".into(),
            spec: FilterSpec::Delay {
                delay: Time::from_seconds(2.5),
            },
            attach: FilterAttach::Source("a/out".into()),
            reply: tx,
        });
        rx.try_recv().unwrap().unwrap();
        start_executing(&mut state, &[a, b]);
        send_message(&mut state, a, ep_a, "b/in", b"late");
        let _rx_a = request_time_pending(&mut state, a, 10.0);
        let rx_b = request_time_pending(&mut state, b, 10.0);
        assert_eq!(grant_of(&rx_b).time, Time::from_seconds(2.5));
        let msg = next_message(&mut state, b, ep_b).expect("message due");
        assert_eq!(msg.delivery_time, Time::from_seconds(2.5));
        assert_eq!(msg.send_time, Time::ZERO);
    }

    #[test]
    fn reroute_filter_redirects_to_other_endpoint() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        let b = add_fed(&mut state, "b");
        let c = add_fed(&mut state, "c");
        let ep_a = register_endpoint(&mut state, a, "out");
        let _ep_b = register_endpoint(&mut state, b, "in");
        let ep_c = register_endpoint(&mut state, c, "in");
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::RegisterFilter {
            fed: a,
            name: "detour".into(),
            spec: FilterSpec::Reroute {
                new_dest: "c/in".into(),
            },
            attach: FilterAttach::Source("a/out".into()),
            reply: tx,
        });
        rx.try_recv().unwrap().unwrap();
        start_executing(&mut state, &[a, b, c]);
        send_message(&mut state, a, ep_a, "b/in", b"x");
        let msg = next_message(&mut state, c, ep_c).expect("rerouted message");
        assert_eq!(msg.dest, "c/in");
        assert_eq!(msg.original_dest, "b/in");
    }

    #[test]
    fn unroutable_message_is_counted() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        let ep_a = register_endpoint(&mut state, a, "out");
        start_executing(&mut state, &[a]);
        send_message(&mut state, a, ep_a, "ghost/in", b"x");
        assert_eq!(state.metrics.unroutable_messages, 1);
    }

    // ── Registration rules ──────────────────────────────────────

    #[test]
    fn duplicate_publication_name_rejected() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        register_pub(&mut state, a, "x");
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::RegisterPublication {
            fed: a,
            name: "x".into(),
            kind: ValueKind::Double,
            units: None,
            global: false,
            reply: tx,
        });
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(FederateError::Registration(
                RegistrationError::DuplicateName { .. }
            ))
        ));
    }

    #[test]
    fn registration_closes_at_executing() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        start_executing(&mut state, &[a]);
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::RegisterEndpoint {
            fed: a,
            name: "late".into(),
            global: false,
            reply: tx,
        });
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(FederateError::Registration(
                RegistrationError::RegistrationClosed { .. }
            ))
        ));
    }

    #[test]
    fn strict_mode_rejects_mismatched_input() {
        let mut state = CoreState::new(
            CoreConfig {
                strict_type_checking: true,
                ..CoreConfig::default()
            },
            None,
        );
        let a = add_fed(&mut state, "a");
        let b = add_fed(&mut state, "b");
        register_pub(&mut state, a, "x"); // Double
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::RegisterInput {
            fed: b,
            target: "a/x".into(),
            kind: ValueKind::Text,
            reply: tx,
        });
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(FederateError::TypeMismatch(_))
        ));
    }

    #[test]
    fn lenient_mode_records_mismatch_warning() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        let b = add_fed(&mut state, "b");
        register_pub(&mut state, a, "x");
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::RegisterInput {
            fed: b,
            target: "a/x".into(),
            kind: ValueKind::Text,
            reply: tx,
        });
        assert!(rx.try_recv().unwrap().is_ok());
        assert_eq!(state.warnings(b).len(), 1);
        assert_eq!(state.metrics.type_mismatch_warnings, 1);
    }

    #[test]
    fn input_coerces_to_declared_kind() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        let b = add_fed(&mut state, "b");
        let pub_a = register_pub(&mut state, a, "x"); // Double
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::RegisterInput {
            fed: b,
            target: "a/x".into(),
            kind: ValueKind::Integer,
            reply: tx,
        });
        let in_b = rx.try_recv().unwrap().unwrap();
        start_executing(&mut state, &[a, b]);
        publish(&mut state, a, pub_a, 2.6);
        let rx_b = request_time_pending(&mut state, b, 1.0);
        grant_of(&rx_b);
        assert_eq!(read_input(&mut state, b, in_b), Some(Value::Integer(3)));
    }

    #[test]
    fn finalize_from_created_is_invalid() {
        let mut state = new_core();
        let a = add_fed(&mut state, "a");
        let (tx, rx) = bounded(1);
        state.handle_request(CoreRequest::Finalize { fed: a, reply: tx });
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(FederateError::InvalidTransition { .. })
        ));
        // And finalizing twice from Executing is a no-op.
        start_executing(&mut state, &[a]);
        finalize(&mut state, a);
        finalize(&mut state, a);
    }
}
