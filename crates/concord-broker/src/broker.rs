//! The hierarchical broker.
//!
//! A broker serves a set of child links (cores or sub-brokers) and
//! optionally a parent link. The root broker — the one with no parent —
//! owns the global name table and arbitrates registrations; every
//! broker on the path records enough routing state (endpoint owners,
//! value subscriptions) to move data frames without consulting the
//! root again.
//!
//! All broker state lives on one service thread; the public [`Broker`]
//! handle talks to it over a control channel. The state machine itself
//! ([`BrokerState`]) is synchronous and deterministic: frames in,
//! frames out, which is what the unit tests drive directly.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Select, Sender};
use indexmap::IndexMap;

use concord_core::{CoreId, Time, ValueKind};

use crate::error::LinkError;
use crate::transport::{memory_link, Link};
use crate::wire::{decode, encode, AckOutcome, WireMsg, WIRE_VERSION};

// ── Configuration and metrics ───────────────────────────────────

/// Broker configuration.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Broker name, used in thread names and diagnostics.
    pub name: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            name: "broker".to_string(),
        }
    }
}

/// Counters accumulated by a broker service thread.
#[derive(Clone, Debug, Default)]
pub struct BrokerMetrics {
    /// Registration frames processed.
    pub registrations: u64,
    /// Registrations rejected as duplicates.
    pub duplicates_rejected: u64,
    /// Time reports received from children.
    pub reports_received: u64,
    /// Time bounds pushed to children.
    pub bounds_sent: u64,
    /// Value frames accepted for routing.
    pub values_routed: u64,
    /// Value frames fanned out to subscribed children.
    pub values_fanned_out: u64,
    /// Message frames routed (down or up).
    pub messages_routed: u64,
    /// Message frames with no known destination.
    pub unroutable_messages: u64,
    /// Execution barrier rounds completed (root only).
    pub exec_rounds: u64,
    /// Frames that failed to decode.
    pub decode_errors: u64,
    /// Frames of a type not expected on that link direction.
    pub unexpected_frames: u64,
}

// ── State ───────────────────────────────────────────────────────

struct ChildSlot {
    link: Link,
    name: Option<String>,
    /// Monotone minimum-time report from this subtree.
    report: Time,
    last_bound: Option<Time>,
    exec_requested: bool,
    exec_iterating: bool,
    disconnected: bool,
}

enum PendingKind {
    Publication,
    Input,
    Endpoint { key: String },
}

struct PendingReg {
    child: usize,
    child_req: u32,
    kind: PendingKind,
}

struct ParentSlot {
    link: Link,
    next_req: u32,
    pending: IndexMap<u32, PendingReg>,
    last_report: Option<Time>,
    bound: Time,
    exec_forwarded: bool,
}

struct BrokerState {
    name: String,
    parent: Option<ParentSlot>,
    children: Vec<ChildSlot>,
    next_core_id: u16,
    /// Root only: federation-wide publication keys and their kinds.
    publications: IndexMap<String, ValueKind>,
    /// Root only: inputs whose target key has not been registered yet.
    parked_inputs: Vec<(String, ValueKind, usize)>,
    /// Endpoint key to owning child, for downward message routing.
    endpoint_routes: IndexMap<String, usize>,
    /// Publication key to subscribed children, for downward fanout.
    value_subs: IndexMap<String, Vec<usize>>,
    metrics: BrokerMetrics,
    shutting_down: bool,
}

impl BrokerState {
    fn new(name: String, parent: Option<Link>) -> Self {
        Self {
            name,
            parent: parent.map(|link| ParentSlot {
                link,
                next_req: 0,
                pending: IndexMap::new(),
                last_report: None,
                bound: Time::ZERO,
                exec_forwarded: false,
            }),
            children: Vec::new(),
            next_core_id: 0,
            publications: IndexMap::new(),
            parked_inputs: Vec::new(),
            endpoint_routes: IndexMap::new(),
            value_subs: IndexMap::new(),
            metrics: BrokerMetrics::default(),
            shutting_down: false,
        }
    }

    fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    fn attach(&mut self, link: Link) -> usize {
        self.children.push(ChildSlot {
            link,
            name: None,
            report: Time::ZERO,
            last_bound: None,
            exec_requested: false,
            exec_iterating: false,
            disconnected: false,
        });
        self.children.len() - 1
    }

    fn send_hello(&mut self) {
        let msg = WireMsg::Hello {
            name: self.name.clone(),
            version: WIRE_VERSION,
        };
        self.send_parent(&msg);
    }

    fn send_child(&mut self, idx: usize, msg: &WireMsg) {
        let child = &mut self.children[idx];
        if child.disconnected {
            return;
        }
        if child.link.tx.send(encode(msg)).is_err() {
            child.disconnected = true;
        }
    }

    fn send_parent(&mut self, msg: &WireMsg) {
        let lost = match &self.parent {
            Some(p) => p.link.tx.send(encode(msg)).is_err(),
            None => false,
        };
        if lost {
            self.shutting_down = true;
        }
    }

    // ── Frames from children ────────────────────────────────────

    fn handle_child_frame(&mut self, idx: usize, msg: WireMsg) {
        match msg {
            WireMsg::Hello { name, version } => self.child_hello(idx, name, version),
            WireMsg::RegisterPublication {
                req_id,
                key,
                kind,
                units,
            } => self.child_register_publication(idx, req_id, key, kind, units),
            WireMsg::RegisterInput {
                req_id,
                target,
                kind,
            } => self.child_register_input(idx, req_id, target, kind),
            WireMsg::RegisterEndpoint { req_id, key } => {
                self.child_register_endpoint(idx, req_id, key)
            }
            WireMsg::ExecRequest { iterating } => {
                self.children[idx].exec_requested = true;
                self.children[idx].exec_iterating = iterating;
                self.check_exec_barrier();
            }
            WireMsg::TimeReport { minimum } => {
                self.metrics.reports_received += 1;
                let child = &mut self.children[idx];
                if minimum > child.report {
                    child.report = minimum;
                }
                self.recompute_time();
            }
            WireMsg::ValueData {
                key,
                time,
                value,
                source,
            } => {
                self.metrics.values_routed += 1;
                let frame = WireMsg::ValueData {
                    key,
                    time,
                    value,
                    source,
                };
                if self.is_root() {
                    self.fanout_value(&frame);
                } else {
                    self.send_parent(&frame);
                }
            }
            WireMsg::MessageData { message } => self.route_message(Some(idx), message),
            WireMsg::Disconnect => self.child_disconnected(idx),
            _ => self.metrics.unexpected_frames += 1,
        }
    }

    fn child_hello(&mut self, idx: usize, name: String, version: u8) {
        if version != WIRE_VERSION {
            self.send_child(
                idx,
                &WireMsg::ErrorNotice {
                    detail: format!(
                        "protocol version {version} not supported (this broker speaks {WIRE_VERSION})"
                    ),
                },
            );
            self.child_disconnected(idx);
            return;
        }
        if self
            .children
            .iter()
            .any(|c| c.name.as_deref() == Some(name.as_str()))
        {
            self.send_child(
                idx,
                &WireMsg::ErrorNotice {
                    detail: format!("child name '{name}' already attached"),
                },
            );
        }
        let core_id = CoreId(self.next_core_id);
        self.next_core_id += 1;
        self.children[idx].name = Some(name);
        self.send_child(idx, &WireMsg::Welcome { core_id });
    }

    fn child_register_publication(
        &mut self,
        idx: usize,
        req_id: u32,
        key: String,
        kind: ValueKind,
        units: Option<String>,
    ) {
        self.metrics.registrations += 1;
        if self.is_root() {
            if self.publications.contains_key(&key) {
                self.metrics.duplicates_rejected += 1;
                self.send_child(
                    idx,
                    &WireMsg::Ack {
                        req_id,
                        outcome: AckOutcome::Duplicate,
                    },
                );
                return;
            }
            self.publications.insert(key.clone(), kind);
            // Late binding: inputs parked on this key resolve now, and a
            // kind clash surfaces as a notice to the subscriber's link.
            let mut notices = Vec::new();
            self.parked_inputs.retain(|(target, in_kind, child)| {
                if *target == key {
                    if !kind.compatible_with(*in_kind) {
                        notices.push((
                            *child,
                            format!(
                                "input for '{key}' declared {in_kind} but publication is {kind}"
                            ),
                        ));
                    }
                    false
                } else {
                    true
                }
            });
            for (child, detail) in notices {
                self.send_child(child, &WireMsg::ErrorNotice { detail });
            }
            self.send_child(
                idx,
                &WireMsg::Ack {
                    req_id,
                    outcome: AckOutcome::Accepted,
                },
            );
        } else {
            self.forward_registration(
                idx,
                req_id,
                PendingKind::Publication,
                |up_req| WireMsg::RegisterPublication {
                    req_id: up_req,
                    key,
                    kind,
                    units,
                },
            );
        }
    }

    fn child_register_input(&mut self, idx: usize, req_id: u32, target: String, kind: ValueKind) {
        self.metrics.registrations += 1;
        let subs = self.value_subs.entry(target.clone()).or_default();
        if !subs.contains(&idx) {
            subs.push(idx);
        }
        if self.is_root() {
            let outcome = match self.publications.get(&target) {
                Some(found) if !found.compatible_with(kind) => AckOutcome::Mismatch {
                    declared: kind,
                    found: *found,
                },
                Some(_) => AckOutcome::Accepted,
                None => {
                    self.parked_inputs.push((target, kind, idx));
                    AckOutcome::Accepted
                }
            };
            self.send_child(idx, &WireMsg::Ack { req_id, outcome });
        } else {
            self.forward_registration(idx, req_id, PendingKind::Input, |up_req| {
                WireMsg::RegisterInput {
                    req_id: up_req,
                    target,
                    kind,
                }
            });
        }
    }

    fn child_register_endpoint(&mut self, idx: usize, req_id: u32, key: String) {
        self.metrics.registrations += 1;
        if self.endpoint_routes.contains_key(&key) {
            // A locally known key is a federation-wide duplicate; no
            // need to consult the root.
            self.metrics.duplicates_rejected += 1;
            self.send_child(
                idx,
                &WireMsg::Ack {
                    req_id,
                    outcome: AckOutcome::Duplicate,
                },
            );
            return;
        }
        self.endpoint_routes.insert(key.clone(), idx);
        if self.is_root() {
            self.send_child(
                idx,
                &WireMsg::Ack {
                    req_id,
                    outcome: AckOutcome::Accepted,
                },
            );
        } else {
            self.forward_registration(idx, req_id, PendingKind::Endpoint { key: key.clone() }, |up_req| {
                WireMsg::RegisterEndpoint { req_id: up_req, key }
            });
        }
    }

    /// Forward a registration to the parent under a fresh request id,
    /// remembering how to translate the eventual `Ack` back down.
    fn forward_registration(
        &mut self,
        child: usize,
        child_req: u32,
        kind: PendingKind,
        build: impl FnOnce(u32) -> WireMsg,
    ) {
        let up_req = match &mut self.parent {
            Some(p) => {
                let id = p.next_req;
                p.next_req = p.next_req.wrapping_add(1);
                p.pending.insert(
                    id,
                    PendingReg {
                        child,
                        child_req,
                        kind,
                    },
                );
                id
            }
            None => return,
        };
        let frame = build(up_req);
        self.send_parent(&frame);
    }

    // ── Frames from the parent ──────────────────────────────────

    fn handle_parent_frame(&mut self, msg: WireMsg) {
        match msg {
            WireMsg::Welcome { .. } => {}
            WireMsg::Ack { req_id, outcome } => self.parent_ack(req_id, outcome),
            WireMsg::ExecGrant { iterating } => {
                self.broadcast_exec_grant(iterating);
                if let Some(p) = &mut self.parent {
                    p.exec_forwarded = false;
                }
            }
            WireMsg::TimeBound { bound } => {
                if let Some(p) = &mut self.parent {
                    if bound > p.bound {
                        p.bound = bound;
                    }
                }
                self.recompute_time();
            }
            frame @ WireMsg::ValueData { .. } => {
                self.metrics.values_routed += 1;
                self.fanout_value(&frame);
            }
            WireMsg::MessageData { message } => self.route_message(None, message),
            WireMsg::ErrorNotice { detail } => {
                // Notices from above cannot be routed more precisely;
                // every child records them.
                for idx in 0..self.children.len() {
                    self.send_child(idx, &WireMsg::ErrorNotice {
                        detail: detail.clone(),
                    });
                }
            }
            WireMsg::Disconnect => {
                self.broadcast_disconnect();
                self.shutting_down = true;
            }
            _ => self.metrics.unexpected_frames += 1,
        }
    }

    fn parent_ack(&mut self, req_id: u32, outcome: AckOutcome) {
        let pending = match &mut self.parent {
            Some(p) => p.pending.shift_remove(&req_id),
            None => None,
        };
        let Some(pending) = pending else {
            self.metrics.unexpected_frames += 1;
            return;
        };
        if let (AckOutcome::Duplicate, PendingKind::Endpoint { key }) = (&outcome, &pending.kind) {
            // The optimistic local route loses to an earlier owner
            // elsewhere in the federation.
            if self.endpoint_routes.get(key) == Some(&pending.child) {
                self.endpoint_routes.shift_remove(key);
            }
        }
        if matches!(outcome, AckOutcome::Duplicate) {
            self.metrics.duplicates_rejected += 1;
        }
        self.send_child(
            pending.child,
            &WireMsg::Ack {
                req_id: pending.child_req,
                outcome,
            },
        );
    }

    // ── Data routing ────────────────────────────────────────────

    fn fanout_value(&mut self, frame: &WireMsg) {
        let key = match frame {
            WireMsg::ValueData { key, .. } => key,
            _ => return,
        };
        let targets: Vec<usize> = self
            .value_subs
            .get(key)
            .map(|subs| subs.clone())
            .unwrap_or_default();
        for idx in targets {
            self.send_child(idx, frame);
            self.metrics.values_fanned_out += 1;
        }
    }

    fn route_message(&mut self, origin: Option<usize>, message: concord_core::Message) {
        if let Some(&owner) = self.endpoint_routes.get(&message.dest) {
            self.metrics.messages_routed += 1;
            self.send_child(owner, &WireMsg::MessageData { message });
            return;
        }
        if origin.is_some() && self.parent.is_some() {
            self.metrics.messages_routed += 1;
            self.send_parent(&WireMsg::MessageData { message });
            return;
        }
        self.metrics.unroutable_messages += 1;
        if let Some(origin) = origin {
            self.send_child(
                origin,
                &WireMsg::ErrorNotice {
                    detail: format!("no route to endpoint '{}'", message.dest),
                },
            );
        }
    }

    // ── Execution barrier ───────────────────────────────────────

    fn check_exec_barrier(&mut self) {
        let live: Vec<usize> = (0..self.children.len())
            .filter(|&i| !self.children[i].disconnected)
            .collect();
        if live.is_empty() || !live.iter().all(|&i| self.children[i].exec_requested) {
            return;
        }
        let iterating = live.iter().any(|&i| self.children[i].exec_iterating);
        if self.is_root() {
            self.broadcast_exec_grant(iterating);
            self.metrics.exec_rounds += 1;
        } else {
            let already = self.parent.as_ref().is_some_and(|p| p.exec_forwarded);
            if !already {
                self.send_parent(&WireMsg::ExecRequest { iterating });
                if let Some(p) = &mut self.parent {
                    p.exec_forwarded = true;
                }
            }
        }
    }

    fn broadcast_exec_grant(&mut self, iterating: bool) {
        for idx in 0..self.children.len() {
            self.children[idx].exec_requested = false;
            self.children[idx].exec_iterating = false;
            self.send_child(idx, &WireMsg::ExecGrant { iterating });
        }
    }

    // ── Time aggregation ────────────────────────────────────────

    fn effective_report(&self, idx: usize) -> Time {
        if self.children[idx].disconnected {
            Time::MAXTIME
        } else {
            self.children[idx].report
        }
    }

    /// Push updated bounds down and an updated report up.
    ///
    /// The bound for child `j` excludes `j`'s own report: it is the
    /// earliest time anyone *else* in the federation may still send
    /// into `j`'s subtree. The upward report includes everyone.
    fn recompute_time(&mut self) {
        let parent_bound = match &self.parent {
            Some(p) => p.bound,
            None => Time::MAXTIME,
        };
        let n = self.children.len();
        let mut updates = Vec::new();
        for j in 0..n {
            if self.children[j].disconnected {
                continue;
            }
            let mut bound = parent_bound;
            for i in 0..n {
                if i != j {
                    bound = bound.min(self.effective_report(i));
                }
            }
            if self.children[j].last_bound != Some(bound) {
                updates.push((j, bound));
            }
        }
        for (j, bound) in updates {
            self.children[j].last_bound = Some(bound);
            self.send_child(j, &WireMsg::TimeBound { bound });
            self.metrics.bounds_sent += 1;
        }
        if self.parent.is_some() {
            let report = (0..n)
                .map(|i| self.effective_report(i))
                .min()
                .unwrap_or(Time::MAXTIME);
            let stale = self
                .parent
                .as_ref()
                .is_some_and(|p| p.last_report.is_none_or(|last| report > last));
            if stale {
                if let Some(p) = &mut self.parent {
                    p.last_report = Some(report);
                }
                self.send_parent(&WireMsg::TimeReport { minimum: report });
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────

    fn child_disconnected(&mut self, idx: usize) {
        if self.children[idx].disconnected {
            return;
        }
        self.children[idx].disconnected = true;
        self.recompute_time();
        self.check_exec_barrier();
        let all_gone = self.children.iter().all(|c| c.disconnected);
        if all_gone && self.parent.is_some() {
            self.send_parent(&WireMsg::Disconnect);
        }
    }

    fn broadcast_disconnect(&mut self) {
        for idx in 0..self.children.len() {
            self.send_child(idx, &WireMsg::Disconnect);
            self.children[idx].disconnected = true;
        }
    }
}

// ── Service thread ──────────────────────────────────────────────

enum Ctrl {
    Attach { link: Link },
    Metrics { reply: Sender<BrokerMetrics> },
    Shutdown,
}

enum Event {
    Ctrl(Ctrl),
    CtrlClosed,
    Parent(Option<Vec<u8>>),
    Child(usize, Option<Vec<u8>>),
    Idle,
}

fn next_event(state: &BrokerState, ctrl_rx: &Receiver<Ctrl>) -> Event {
    let mut sel = Select::new();
    let ctrl_i = sel.recv(ctrl_rx);
    let parent_rx = state.parent.as_ref().map(|p| &p.link.rx);
    let parent_i = parent_rx.map(|rx| sel.recv(rx));
    let mut child_map = Vec::new();
    for (i, c) in state.children.iter().enumerate() {
        if !c.disconnected {
            child_map.push((sel.recv(&c.link.rx), i));
        }
    }
    let oper = match sel.select_timeout(Duration::from_millis(25)) {
        Ok(oper) => oper,
        Err(_) => return Event::Idle,
    };
    let idx = oper.index();
    if idx == ctrl_i {
        return match oper.recv(ctrl_rx) {
            Ok(c) => Event::Ctrl(c),
            Err(_) => Event::CtrlClosed,
        };
    }
    if let (Some(pi), Some(rx)) = (parent_i, parent_rx) {
        if idx == pi {
            return Event::Parent(oper.recv(rx).ok());
        }
    }
    for (op_i, child) in child_map {
        if op_i == idx {
            return Event::Child(child, oper.recv(&state.children[child].link.rx).ok());
        }
    }
    Event::Idle
}

fn run(config: BrokerConfig, parent: Option<Link>, ctrl_rx: Receiver<Ctrl>) {
    let mut state = BrokerState::new(config.name, parent);
    if state.parent.is_some() {
        state.send_hello();
    }
    loop {
        match next_event(&state, &ctrl_rx) {
            Event::Ctrl(Ctrl::Attach { link }) => {
                state.attach(link);
            }
            Event::Ctrl(Ctrl::Metrics { reply }) => {
                let _ = reply.send(state.metrics.clone());
            }
            Event::Ctrl(Ctrl::Shutdown) | Event::CtrlClosed => {
                state.broadcast_disconnect();
                if state.parent.is_some() {
                    state.send_parent(&WireMsg::Disconnect);
                }
                break;
            }
            Event::Parent(Some(frame)) => match decode(&frame) {
                Ok(msg) => state.handle_parent_frame(msg),
                Err(_) => state.metrics.decode_errors += 1,
            },
            Event::Parent(None) => {
                state.broadcast_disconnect();
                break;
            }
            Event::Child(idx, Some(frame)) => match decode(&frame) {
                Ok(msg) => state.handle_child_frame(idx, msg),
                Err(e) => {
                    state.metrics.decode_errors += 1;
                    state.send_child(
                        idx,
                        &WireMsg::ErrorNotice {
                            detail: e.to_string(),
                        },
                    );
                }
            },
            Event::Child(idx, None) => state.handle_child_frame(idx, WireMsg::Disconnect),
            Event::Idle => {}
        }
        if state.shutting_down {
            state.broadcast_disconnect();
            break;
        }
    }
}

// ── Public handle ───────────────────────────────────────────────

/// Handle to a running broker service thread.
///
/// Dropping the handle shuts the broker down: children receive a
/// `Disconnect` and the thread is joined.
pub struct Broker {
    ctrl: Sender<Ctrl>,
    thread: Option<JoinHandle<()>>,
    name: String,
}

impl Broker {
    /// Spawn a root broker.
    pub fn spawn(config: BrokerConfig) -> Broker {
        Self::spawn_inner(config, None)
    }

    /// Spawn a sub-broker attached to a parent link (obtained from the
    /// parent's [`attach_child`](Broker::attach_child)).
    pub fn spawn_with_parent(config: BrokerConfig, parent: Link) -> Broker {
        Self::spawn_inner(config, Some(parent))
    }

    fn spawn_inner(config: BrokerConfig, parent: Option<Link>) -> Broker {
        let (ctrl, ctrl_rx) = unbounded();
        let name = config.name.clone();
        let thread = thread::spawn(move || run(config, parent, ctrl_rx));
        Broker {
            ctrl,
            thread: Some(thread),
            name,
        }
    }

    /// Create a new child link. The returned end goes to the core (or
    /// sub-broker) being attached; the broker keeps the other end.
    pub fn attach_child(&self) -> Result<Link, LinkError> {
        let (near, far) = memory_link();
        self.ctrl
            .send(Ctrl::Attach { link: near })
            .map_err(|_| LinkError::Disconnected)?;
        Ok(far)
    }

    /// Snapshot of the broker's counters.
    pub fn metrics(&self) -> Result<BrokerMetrics, LinkError> {
        let (tx, rx) = bounded(1);
        self.ctrl
            .send(Ctrl::Metrics { reply: tx })
            .map_err(|_| LinkError::Disconnected)?;
        rx.recv().map_err(|_| LinkError::Disconnected)
    }

    /// The broker's configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the service thread, disconnecting all children.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.ctrl.send(Ctrl::Shutdown);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.stop();
    }
}
