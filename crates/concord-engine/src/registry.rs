//! Interface bookkeeping for one core: publications, inputs, endpoints,
//! their handles, and the pending event queues that drive granting.
//!
//! The registry is pure data. Delivery-time computation (delays,
//! filters) happens in the core; the registry stores already-resolved
//! pending values and queued messages and answers "what is the earliest
//! thing waiting for this federate".

use indexmap::IndexMap;

use concord_core::{
    qualified_name, EndpointHandle, FederateId, InputHandle, Message, PublicationHandle,
    RegistrationError, Time, TypeMismatch, Value, ValueKind, NAME_SEPARATOR,
};

/// A value waiting to be applied to an input at its delivery time.
#[derive(Clone, Debug)]
pub(crate) struct PendingValue {
    pub time: Time,
    pub seq: u64,
    pub value: Value,
}

pub(crate) struct PublicationRecord {
    pub owner: FederateId,
    pub kind: ValueKind,
    #[allow(dead_code)]
    pub units: Option<String>,
    /// Most recent published (time, value), retained until overwritten.
    pub last: Option<(Time, Value)>,
}

pub(crate) struct InputRecord {
    pub owner: FederateId,
    pub target: String,
    pub kind: ValueKind,
    /// Bound to a known publication (locally or via the federation).
    pub resolved: bool,
    /// Rolled back after a strict-mode rejection; inert but keeps
    /// sibling indices stable.
    pub retired: bool,
    /// The value visible at the current granted time.
    pub current: Option<(Time, Value)>,
    /// Set when `current` changes, cleared by `check_update`.
    pub updated: bool,
    /// Undelivered values, sorted by `(time, seq)`.
    pub pending: Vec<PendingValue>,
}

pub(crate) struct QueuedMessage {
    pub message: Message,
    /// The owning federate has been granted past the delivery time.
    pub seen: bool,
}

pub(crate) struct EndpointRecord {
    pub owner: FederateId,
    /// Undelivered and unread messages, sorted by
    /// `(delivery_time, arrival_seq)`.
    pub queue: Vec<QueuedMessage>,
}

/// All interfaces registered with one core.
#[derive(Default)]
pub struct InterfaceRegistry {
    publications: IndexMap<String, PublicationRecord>,
    endpoints: IndexMap<String, EndpointRecord>,
    inputs: Vec<InputRecord>,
    /// Target key to input indices, local and remote targets alike.
    subscriptions: IndexMap<String, Vec<usize>>,
    per_fed_pubs: Vec<Vec<String>>,
    per_fed_inputs: Vec<Vec<usize>>,
    per_fed_endpoints: Vec<Vec<String>>,
}

#[derive(Debug)]
pub(crate) struct NewPublication {
    pub handle: PublicationHandle,
    pub key: String,
    /// Inputs that bound to this publication with an incompatible kind.
    pub mismatches: Vec<(FederateId, TypeMismatch)>,
}

impl InterfaceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_federate(&mut self) {
        self.per_fed_pubs.push(Vec::new());
        self.per_fed_inputs.push(Vec::new());
        self.per_fed_endpoints.push(Vec::new());
    }

    fn validate_local_name(name: &str) -> Result<(), RegistrationError> {
        if name.is_empty() || name.contains(NAME_SEPARATOR) {
            return Err(RegistrationError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    // ── Publications ────────────────────────────────────────────

    pub(crate) fn register_publication(
        &mut self,
        fed: FederateId,
        fed_name: &str,
        name: &str,
        kind: ValueKind,
        units: Option<String>,
        global: bool,
    ) -> Result<NewPublication, RegistrationError> {
        Self::validate_local_name(name)?;
        let key = if global {
            name.to_string()
        } else {
            qualified_name(fed_name, name)
        };
        if self.publications.contains_key(&key) {
            return Err(RegistrationError::DuplicateName { key });
        }
        self.publications.insert(
            key.clone(),
            PublicationRecord {
                owner: fed,
                kind,
                units,
                last: None,
            },
        );
        // Inputs registered before this publication resolve now.
        let mut mismatches = Vec::new();
        if let Some(subs) = self.subscriptions.get(&key) {
            for &idx in subs {
                let input = &mut self.inputs[idx];
                if input.retired {
                    continue;
                }
                input.resolved = true;
                if !kind.compatible_with(input.kind) {
                    mismatches.push((
                        input.owner,
                        TypeMismatch {
                            target: key.clone(),
                            declared: input.kind,
                            found: kind,
                        },
                    ));
                }
            }
        }
        let handle = PublicationHandle(self.per_fed_pubs[fed.0 as usize].len() as u32);
        self.per_fed_pubs[fed.0 as usize].push(key.clone());
        Ok(NewPublication {
            handle,
            key,
            mismatches,
        })
    }

    /// Undo a publication registration (upstream rejected it).
    pub(crate) fn remove_publication(&mut self, key: &str) {
        self.publications.shift_remove(key);
        if let Some(subs) = self.subscriptions.get(key) {
            for &idx in subs {
                self.inputs[idx].resolved = false;
            }
        }
    }

    pub(crate) fn publication_key(&self, fed: FederateId, handle: PublicationHandle) -> Option<&str> {
        self.per_fed_pubs
            .get(fed.0 as usize)?
            .get(handle.0 as usize)
            .map(String::as_str)
    }

    pub(crate) fn publication_mut(&mut self, key: &str) -> Option<&mut PublicationRecord> {
        self.publications.get_mut(key)
    }

    pub(crate) fn has_publication(&self, key: &str) -> bool {
        self.publications.contains_key(key)
    }

    // ── Inputs ──────────────────────────────────────────────────

    pub(crate) fn register_input(
        &mut self,
        fed: FederateId,
        target: &str,
        kind: ValueKind,
    ) -> Result<(InputHandle, usize, Option<TypeMismatch>), RegistrationError> {
        if target.is_empty() {
            return Err(RegistrationError::InvalidName {
                name: target.to_string(),
            });
        }
        let mut resolved = false;
        let mut mismatch = None;
        if let Some(publication) = self.publications.get(target) {
            resolved = true;
            if !publication.kind.compatible_with(kind) {
                mismatch = Some(TypeMismatch {
                    target: target.to_string(),
                    declared: kind,
                    found: publication.kind,
                });
            }
        }
        let index = self.inputs.len();
        self.inputs.push(InputRecord {
            owner: fed,
            target: target.to_string(),
            kind,
            resolved,
            retired: false,
            current: None,
            updated: false,
            pending: Vec::new(),
        });
        self.subscriptions
            .entry(target.to_string())
            .or_default()
            .push(index);
        let handle = InputHandle(self.per_fed_inputs[fed.0 as usize].len() as u32);
        self.per_fed_inputs[fed.0 as usize].push(index);
        Ok((handle, index, mismatch))
    }

    /// Retire an input (strict-mode rejection). The slot stays so other
    /// indices remain valid, but delivery skips it.
    pub(crate) fn retire_input(&mut self, index: usize) {
        self.inputs[index].retired = true;
    }

    pub(crate) fn input_index(&self, fed: FederateId, handle: InputHandle) -> Option<usize> {
        self.per_fed_inputs
            .get(fed.0 as usize)?
            .get(handle.0 as usize)
            .copied()
    }

    pub(crate) fn input(&self, index: usize) -> &InputRecord {
        &self.inputs[index]
    }

    pub(crate) fn input_mut(&mut self, index: usize) -> &mut InputRecord {
        &mut self.inputs[index]
    }

    /// Indices of live inputs subscribed to `key`.
    pub(crate) fn subscribers(&self, key: &str) -> Vec<usize> {
        self.subscriptions
            .get(key)
            .map(|subs| {
                subs.iter()
                    .copied()
                    .filter(|&idx| !self.inputs[idx].retired)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Queue a value delivery for one input.
    pub(crate) fn push_pending(&mut self, index: usize, pending: PendingValue) {
        let input = &mut self.inputs[index];
        let at = input
            .pending
            .partition_point(|p| (p.time, p.seq) <= (pending.time, pending.seq));
        input.pending.insert(at, pending);
    }

    // ── Endpoints ───────────────────────────────────────────────

    pub(crate) fn register_endpoint(
        &mut self,
        fed: FederateId,
        fed_name: &str,
        name: &str,
        global: bool,
    ) -> Result<(EndpointHandle, String), RegistrationError> {
        Self::validate_local_name(name)?;
        let key = if global {
            name.to_string()
        } else {
            qualified_name(fed_name, name)
        };
        if self.endpoints.contains_key(&key) {
            return Err(RegistrationError::DuplicateName { key });
        }
        self.endpoints.insert(
            key.clone(),
            EndpointRecord {
                owner: fed,
                queue: Vec::new(),
            },
        );
        let handle = EndpointHandle(self.per_fed_endpoints[fed.0 as usize].len() as u32);
        self.per_fed_endpoints[fed.0 as usize].push(key.clone());
        Ok((handle, key))
    }

    /// Undo an endpoint registration (upstream rejected it).
    pub(crate) fn remove_endpoint(&mut self, key: &str) {
        self.endpoints.shift_remove(key);
    }

    pub(crate) fn endpoint_key(&self, fed: FederateId, handle: EndpointHandle) -> Option<&str> {
        self.per_fed_endpoints
            .get(fed.0 as usize)?
            .get(handle.0 as usize)
            .map(String::as_str)
    }

    pub(crate) fn has_endpoint(&self, key: &str) -> bool {
        self.endpoints.contains_key(key)
    }

    pub(crate) fn endpoint_owner(&self, key: &str) -> Option<FederateId> {
        self.endpoints.get(key).map(|e| e.owner)
    }

    /// Queue a message at its destination endpoint. Returns the owning
    /// federate, or `None` if the endpoint is not local.
    pub(crate) fn queue_message(&mut self, message: Message) -> Option<FederateId> {
        let endpoint = self.endpoints.get_mut(&message.dest)?;
        let owner = endpoint.owner;
        let sort_key = (message.delivery_time, message.arrival_seq);
        let at = endpoint
            .queue
            .partition_point(|q| (q.message.delivery_time, q.message.arrival_seq) <= sort_key);
        endpoint.queue.insert(
            at,
            QueuedMessage {
                message,
                seen: false,
            },
        );
        Some(owner)
    }

    // ── Event scheduling ────────────────────────────────────────

    /// The earliest undelivered event (value or message) destined for
    /// `fed`, or `None` if nothing is waiting.
    pub(crate) fn earliest_event(&self, fed: FederateId) -> Option<Time> {
        let mut earliest: Option<Time> = None;
        let mut consider = |t: Time| {
            earliest = Some(match earliest {
                Some(e) => e.min(t),
                None => t,
            });
        };
        for &idx in &self.per_fed_inputs[fed.0 as usize] {
            let input = &self.inputs[idx];
            if input.retired {
                continue;
            }
            if let Some(p) = input.pending.first() {
                consider(p.time);
            }
        }
        for key in &self.per_fed_endpoints[fed.0 as usize] {
            if let Some(endpoint) = self.endpoints.get(key) {
                if let Some(q) = endpoint.queue.iter().find(|q| !q.seen) {
                    consider(q.message.delivery_time);
                }
            }
        }
        earliest
    }

    /// Apply everything due at or before `time` to `fed`'s interfaces:
    /// pending values become current (latest wins) and due messages are
    /// marked readable.
    pub(crate) fn apply_deliveries(&mut self, fed: FederateId, time: Time) {
        for &idx in &self.per_fed_inputs[fed.0 as usize] {
            let input = &mut self.inputs[idx];
            if input.retired {
                continue;
            }
            let due = input.pending.partition_point(|p| p.time <= time);
            if due > 0 {
                let latest = input.pending.drain(..due).next_back();
                if let Some(latest) = latest {
                    input.current = Some((latest.time, latest.value));
                    input.updated = true;
                }
            }
        }
        for key in &self.per_fed_endpoints[fed.0 as usize] {
            if let Some(endpoint) = self.endpoints.get_mut(key) {
                for q in &mut endpoint.queue {
                    if q.message.delivery_time <= time {
                        q.seen = true;
                    } else {
                        break;
                    }
                }
            }
        }
    }

    /// Pop the earliest readable message at `fed`'s endpoint, if its
    /// delivery time has been reached.
    pub(crate) fn next_message(
        &mut self,
        fed: FederateId,
        handle: EndpointHandle,
        granted: Time,
    ) -> Option<Message> {
        let key = self
            .per_fed_endpoints
            .get(fed.0 as usize)?
            .get(handle.0 as usize)?
            .clone();
        let endpoint = self.endpoints.get_mut(&key)?;
        match endpoint.queue.first() {
            Some(q) if q.message.delivery_time <= granted => {
                Some(endpoint.queue.remove(0).message)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_feds(n: usize) -> InterfaceRegistry {
        let mut r = InterfaceRegistry::new();
        for _ in 0..n {
            r.add_federate();
        }
        r
    }

    #[test]
    fn qualified_and_global_keys() {
        let mut r = registry_with_feds(1);
        let p = r
            .register_publication(
                FederateId(0),
                "fed_a",
                "voltage",
                ValueKind::Double,
                None,
                false,
            )
            .unwrap();
        assert_eq!(p.key, "fed_a/voltage");
        let g = r
            .register_publication(
                FederateId(0),
                "fed_a",
                "shared",
                ValueKind::Double,
                None,
                true,
            )
            .unwrap();
        assert_eq!(g.key, "shared");
    }

    #[test]
    fn duplicate_publication_key_rejected() {
        let mut r = registry_with_feds(2);
        r.register_publication(FederateId(0), "a", "k", ValueKind::Double, None, true)
            .unwrap();
        let err = r
            .register_publication(FederateId(1), "b", "k", ValueKind::Double, None, true)
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateName { .. }));
    }

    #[test]
    fn separator_in_local_name_rejected() {
        let mut r = registry_with_feds(1);
        let err = r
            .register_publication(
                FederateId(0),
                "a",
                "bad/name",
                ValueKind::Double,
                None,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidName { .. }));
    }

    #[test]
    fn input_before_publication_binds_late() {
        let mut r = registry_with_feds(2);
        let (_, idx, mismatch) = r
            .register_input(FederateId(1), "a/voltage", ValueKind::Double)
            .unwrap();
        assert!(mismatch.is_none());
        assert!(!r.input(idx).resolved);
        let p = r
            .register_publication(
                FederateId(0),
                "a",
                "voltage",
                ValueKind::Double,
                None,
                false,
            )
            .unwrap();
        assert!(p.mismatches.is_empty());
        assert!(r.input(idx).resolved);
    }

    #[test]
    fn late_binding_reports_kind_mismatch() {
        let mut r = registry_with_feds(2);
        let (_, _, _) = r
            .register_input(FederateId(1), "a/flag", ValueKind::Text)
            .unwrap();
        let p = r
            .register_publication(FederateId(0), "a", "flag", ValueKind::Boolean, None, false)
            .unwrap();
        assert_eq!(p.mismatches.len(), 1);
        assert_eq!(p.mismatches[0].0, FederateId(1));
        assert_eq!(p.mismatches[0].1.declared, ValueKind::Text);
    }

    #[test]
    fn pending_values_apply_latest_at_or_before_time() {
        let mut r = registry_with_feds(1);
        let (_, idx, _) = r
            .register_input(FederateId(0), "k", ValueKind::Double)
            .unwrap();
        for (i, t) in [1.0, 2.0, 3.0].into_iter().enumerate() {
            r.push_pending(
                idx,
                PendingValue {
                    time: Time::from_seconds(t),
                    seq: i as u64,
                    value: Value::Double(t),
                },
            );
        }
        r.apply_deliveries(FederateId(0), Time::from_seconds(2.0));
        let input = r.input(idx);
        assert_eq!(input.current, Some((Time::from_seconds(2.0), Value::Double(2.0))));
        assert!(input.updated);
        assert_eq!(input.pending.len(), 1);
    }

    #[test]
    fn same_instant_values_resolve_by_sequence() {
        let mut r = registry_with_feds(1);
        let (_, idx, _) = r
            .register_input(FederateId(0), "k", ValueKind::Double)
            .unwrap();
        // Out-of-order insertion; sequence decides who wins.
        r.push_pending(
            idx,
            PendingValue {
                time: Time::from_seconds(1.0),
                seq: 5,
                value: Value::Double(5.0),
            },
        );
        r.push_pending(
            idx,
            PendingValue {
                time: Time::from_seconds(1.0),
                seq: 2,
                value: Value::Double(2.0),
            },
        );
        r.apply_deliveries(FederateId(0), Time::from_seconds(1.0));
        assert_eq!(
            r.input(idx).current,
            Some((Time::from_seconds(1.0), Value::Double(5.0)))
        );
    }

    #[test]
    fn earliest_event_spans_values_and_messages() {
        let mut r = registry_with_feds(1);
        let (_, idx, _) = r
            .register_input(FederateId(0), "k", ValueKind::Double)
            .unwrap();
        r.register_endpoint(FederateId(0), "fed", "in", false).unwrap();
        assert_eq!(r.earliest_event(FederateId(0)), None);
        let mut m = Message::new("x/out", "fed/in", vec![], Time::ZERO);
        m.delivery_time = Time::from_seconds(3.0);
        r.queue_message(m).unwrap();
        assert_eq!(r.earliest_event(FederateId(0)), Some(Time::from_seconds(3.0)));
        r.push_pending(
            idx,
            PendingValue {
                time: Time::from_seconds(1.5),
                seq: 0,
                value: Value::Double(1.0),
            },
        );
        assert_eq!(r.earliest_event(FederateId(0)), Some(Time::from_seconds(1.5)));
    }

    #[test]
    fn messages_pop_in_delivery_order_once_due() {
        let mut r = registry_with_feds(1);
        r.register_endpoint(FederateId(0), "fed", "in", false).unwrap();
        let mut first = Message::new("x/out", "fed/in", b"1".to_vec(), Time::ZERO);
        first.delivery_time = Time::from_seconds(1.0);
        first.arrival_seq = 1;
        let mut second = Message::new("x/out", "fed/in", b"2".to_vec(), Time::ZERO);
        second.delivery_time = Time::from_seconds(1.0);
        second.arrival_seq = 2;
        r.queue_message(second).unwrap();
        r.queue_message(first).unwrap();
        // Not due yet.
        assert!(r
            .next_message(FederateId(0), EndpointHandle(0), Time::ZERO)
            .is_none());
        let m = r
            .next_message(FederateId(0), EndpointHandle(0), Time::from_seconds(1.0))
            .unwrap();
        assert_eq!(m.payload, b"1");
        let m = r
            .next_message(FederateId(0), EndpointHandle(0), Time::from_seconds(1.0))
            .unwrap();
        assert_eq!(m.payload, b"2");
    }

    #[test]
    fn seen_messages_stop_counting_as_events() {
        let mut r = registry_with_feds(1);
        r.register_endpoint(FederateId(0), "fed", "in", false).unwrap();
        let mut m = Message::new("x/out", "fed/in", vec![], Time::ZERO);
        m.delivery_time = Time::from_seconds(1.0);
        r.queue_message(m).unwrap();
        r.apply_deliveries(FederateId(0), Time::from_seconds(1.0));
        // Still readable, but no longer a wake-up reason.
        assert_eq!(r.earliest_event(FederateId(0)), None);
        assert!(r
            .next_message(FederateId(0), EndpointHandle(0), Time::from_seconds(1.0))
            .is_some());
    }

    #[test]
    fn retired_inputs_are_skipped() {
        let mut r = registry_with_feds(1);
        let (_, idx, _) = r
            .register_input(FederateId(0), "k", ValueKind::Double)
            .unwrap();
        r.retire_input(idx);
        assert!(r.subscribers("k").is_empty());
        assert_eq!(r.earliest_event(FederateId(0)), None);
    }
}
