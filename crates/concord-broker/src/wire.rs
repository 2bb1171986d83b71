//! Binary encode/decode for fabric frames.
//!
//! All integers are little-endian. Strings and byte arrays are
//! length-prefixed with a `u32` length. Each frame is one tag byte
//! followed by the frame body; framing (one frame per transport unit)
//! is the transport's job, so there is no length header or magic here.
//! The protocol version travels in the `Hello` handshake.

use std::io::Read;

use concord_core::{CoreId, Message, Time, Value, ValueKind};

use crate::error::WireError;

/// Protocol version announced in `Hello` and checked by the broker.
pub const WIRE_VERSION: u8 = 1;

/// Outcome of a forwarded registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// Registered.
    Accepted,
    /// The fully-qualified key is already taken federation-wide.
    Duplicate,
    /// The target exists but its declared kind is incompatible.
    Mismatch {
        /// Kind declared by the registering side.
        declared: ValueKind,
        /// Kind found on the existing interface.
        found: ValueKind,
    },
}

/// A frame exchanged between a core and its broker, or between brokers.
#[derive(Clone, Debug, PartialEq)]
pub enum WireMsg {
    /// First frame on a link: the child announces itself.
    Hello {
        /// Child's core or broker name.
        name: String,
        /// Protocol version the child speaks.
        version: u8,
    },
    /// Parent's reply to `Hello`.
    Welcome {
        /// Identifier assigned to the child.
        core_id: CoreId,
    },
    /// Register a publication key federation-wide.
    RegisterPublication {
        /// Request id, scoped to this link, echoed in the `Ack`.
        req_id: u32,
        /// Fully-qualified key.
        key: String,
        /// Declared value kind.
        kind: ValueKind,
        /// Optional units string.
        units: Option<String>,
    },
    /// Register interest in a publication key.
    RegisterInput {
        /// Request id, scoped to this link, echoed in the `Ack`.
        req_id: u32,
        /// Target publication key.
        target: String,
        /// Declared value kind of the input.
        kind: ValueKind,
    },
    /// Register an endpoint key federation-wide.
    RegisterEndpoint {
        /// Request id, scoped to this link, echoed in the `Ack`.
        req_id: u32,
        /// Fully-qualified key.
        key: String,
    },
    /// Reply to a registration frame.
    Ack {
        /// Echo of the request id.
        req_id: u32,
        /// What happened.
        outcome: AckOutcome,
    },
    /// All federates under the sender are ready to enter execution.
    ExecRequest {
        /// Whether any of them asked for an initialization iteration.
        iterating: bool,
    },
    /// The federation may enter execution (or iterate once more).
    ExecGrant {
        /// Whether this is another initialization round.
        iterating: bool,
    },
    /// Lower bound on times at which the sending subtree may still emit.
    TimeReport {
        /// The bound; monotonically non-decreasing per link.
        minimum: Time,
    },
    /// Lower bound on event times the rest of the federation may still
    /// send into the receiving subtree.
    TimeBound {
        /// The bound.
        bound: Time,
    },
    /// A published value in flight.
    ValueData {
        /// Publication key.
        key: String,
        /// Publication time plus the source's output delay.
        time: Time,
        /// The value.
        value: Value,
        /// Name of the origin core, for echo suppression.
        source: String,
    },
    /// A point-to-point message in flight.
    MessageData {
        /// The full envelope.
        message: Message,
    },
    /// The sender is leaving the federation.
    Disconnect,
    /// A routing or validation failure the receiver should record.
    ErrorNotice {
        /// Human-readable description.
        detail: String,
    },
}

// ── Frame tags ──────────────────────────────────────────────────

const TAG_HELLO: u8 = 1;
const TAG_WELCOME: u8 = 2;
const TAG_REGISTER_PUBLICATION: u8 = 3;
const TAG_REGISTER_INPUT: u8 = 4;
const TAG_REGISTER_ENDPOINT: u8 = 5;
const TAG_ACK: u8 = 6;
const TAG_EXEC_REQUEST: u8 = 7;
const TAG_EXEC_GRANT: u8 = 8;
const TAG_TIME_REPORT: u8 = 9;
const TAG_TIME_BOUND: u8 = 10;
const TAG_VALUE_DATA: u8 = 11;
const TAG_MESSAGE_DATA: u8 = 12;
const TAG_DISCONNECT: u8 = 13;
const TAG_ERROR_NOTICE: u8 = 14;

const ACK_ACCEPTED: u8 = 0;
const ACK_DUPLICATE: u8 = 1;
const ACK_MISMATCH: u8 = 2;

// ── Primitive writers ───────────────────────────────────────────

fn put_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

fn put_u16_le(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32_le(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u64_le(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_i64_le(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_f64_le(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_bool(buf: &mut Vec<u8>, v: bool) {
    buf.push(u8::from(v));
}

fn put_time(buf: &mut Vec<u8>, t: Time) {
    put_i64_le(buf, t.as_nanos());
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_u32_le(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, b: &[u8]) {
    put_u32_le(buf, b.len() as u32);
    buf.extend_from_slice(b);
}

fn put_opt_str(buf: &mut Vec<u8>, s: &Option<String>) {
    match s {
        Some(s) => {
            put_u8(buf, 1);
            put_str(buf, s);
        }
        None => put_u8(buf, 0),
    }
}

fn put_kind(buf: &mut Vec<u8>, kind: ValueKind) {
    put_u8(buf, kind_code(kind));
}

fn kind_code(kind: ValueKind) -> u8 {
    match kind {
        ValueKind::Double => 0,
        ValueKind::Integer => 1,
        ValueKind::Boolean => 2,
        ValueKind::Text => 3,
        ValueKind::Complex => 4,
        ValueKind::Vector => 5,
        ValueKind::NamedPoint => 6,
    }
}

fn put_value(buf: &mut Vec<u8>, value: &Value) {
    put_kind(buf, value.kind());
    match value {
        Value::Double(v) => put_f64_le(buf, *v),
        Value::Integer(v) => put_i64_le(buf, *v),
        Value::Boolean(b) => put_bool(buf, *b),
        Value::Text(s) => put_str(buf, s),
        Value::Complex { re, im } => {
            put_f64_le(buf, *re);
            put_f64_le(buf, *im);
        }
        Value::Vector(v) => {
            put_u32_le(buf, v.len() as u32);
            for x in v {
                put_f64_le(buf, *x);
            }
        }
        Value::NamedPoint { name, value } => {
            put_str(buf, name);
            put_f64_le(buf, *value);
        }
    }
}

fn put_message(buf: &mut Vec<u8>, msg: &Message) {
    put_str(buf, &msg.source);
    put_str(buf, &msg.dest);
    put_str(buf, &msg.original_source);
    put_str(buf, &msg.original_dest);
    put_bytes(buf, &msg.payload);
    put_time(buf, msg.send_time);
    put_time(buf, msg.delivery_time);
    put_u64_le(buf, msg.arrival_seq);
}

// ── Primitive readers ───────────────────────────────────────────

fn get_u8(r: &mut dyn Read) -> Result<u8, WireError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn get_u16_le(r: &mut dyn Read) -> Result<u16, WireError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn get_u32_le(r: &mut dyn Read) -> Result<u32, WireError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn get_u64_le(r: &mut dyn Read) -> Result<u64, WireError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn get_i64_le(r: &mut dyn Read) -> Result<i64, WireError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn get_f64_le(r: &mut dyn Read) -> Result<f64, WireError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn get_bool(r: &mut dyn Read) -> Result<bool, WireError> {
    match get_u8(r)? {
        0 => Ok(false),
        1 => Ok(true),
        flag => Err(WireError::MalformedFrame {
            detail: format!("invalid bool flag: {flag}"),
        }),
    }
}

fn get_time(r: &mut dyn Read) -> Result<Time, WireError> {
    Ok(Time::from_nanos(get_i64_le(r)?))
}

fn get_str(r: &mut dyn Read) -> Result<String, WireError> {
    let len = get_u32_le(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| WireError::MalformedFrame {
        detail: format!("invalid UTF-8 string: {e}"),
    })
}

fn get_bytes(r: &mut dyn Read) -> Result<Vec<u8>, WireError> {
    let len = get_u32_le(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn get_opt_str(r: &mut dyn Read) -> Result<Option<String>, WireError> {
    match get_u8(r)? {
        0 => Ok(None),
        1 => Ok(Some(get_str(r)?)),
        flag => Err(WireError::MalformedFrame {
            detail: format!("invalid presence flag: {flag}"),
        }),
    }
}

fn get_kind(r: &mut dyn Read) -> Result<ValueKind, WireError> {
    match get_u8(r)? {
        0 => Ok(ValueKind::Double),
        1 => Ok(ValueKind::Integer),
        2 => Ok(ValueKind::Boolean),
        3 => Ok(ValueKind::Text),
        4 => Ok(ValueKind::Complex),
        5 => Ok(ValueKind::Vector),
        6 => Ok(ValueKind::NamedPoint),
        code => Err(WireError::UnknownValueKind { code }),
    }
}

fn get_value(r: &mut dyn Read) -> Result<Value, WireError> {
    let value = match get_kind(r)? {
        ValueKind::Double => Value::Double(get_f64_le(r)?),
        ValueKind::Integer => Value::Integer(get_i64_le(r)?),
        ValueKind::Boolean => Value::Boolean(get_bool(r)?),
        ValueKind::Text => Value::Text(get_str(r)?),
        ValueKind::Complex => Value::Complex {
            re: get_f64_le(r)?,
            im: get_f64_le(r)?,
        },
        ValueKind::Vector => {
            let len = get_u32_le(r)? as usize;
            let mut v = Vec::with_capacity(len.min(4096));
            for _ in 0..len {
                v.push(get_f64_le(r)?);
            }
            Value::Vector(v)
        }
        ValueKind::NamedPoint => Value::NamedPoint {
            name: get_str(r)?,
            value: get_f64_le(r)?,
        },
    };
    Ok(value)
}

fn get_message(r: &mut dyn Read) -> Result<Message, WireError> {
    Ok(Message {
        source: get_str(r)?,
        dest: get_str(r)?,
        original_source: get_str(r)?,
        original_dest: get_str(r)?,
        payload: get_bytes(r)?,
        send_time: get_time(r)?,
        delivery_time: get_time(r)?,
        arrival_seq: get_u64_le(r)?,
    })
}

// ── Frame encode/decode ─────────────────────────────────────────

/// Encode one frame as a standalone byte vector.
pub fn encode(msg: &WireMsg) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    match msg {
        WireMsg::Hello { name, version } => {
            put_u8(&mut buf, TAG_HELLO);
            put_str(&mut buf, name);
            put_u8(&mut buf, *version);
        }
        WireMsg::Welcome { core_id } => {
            put_u8(&mut buf, TAG_WELCOME);
            put_u16_le(&mut buf, core_id.0);
        }
        WireMsg::RegisterPublication {
            req_id,
            key,
            kind,
            units,
        } => {
            put_u8(&mut buf, TAG_REGISTER_PUBLICATION);
            put_u32_le(&mut buf, *req_id);
            put_str(&mut buf, key);
            put_kind(&mut buf, *kind);
            put_opt_str(&mut buf, units);
        }
        WireMsg::RegisterInput {
            req_id,
            target,
            kind,
        } => {
            put_u8(&mut buf, TAG_REGISTER_INPUT);
            put_u32_le(&mut buf, *req_id);
            put_str(&mut buf, target);
            put_kind(&mut buf, *kind);
        }
        WireMsg::RegisterEndpoint { req_id, key } => {
            put_u8(&mut buf, TAG_REGISTER_ENDPOINT);
            put_u32_le(&mut buf, *req_id);
            put_str(&mut buf, key);
        }
        WireMsg::Ack { req_id, outcome } => {
            put_u8(&mut buf, TAG_ACK);
            put_u32_le(&mut buf, *req_id);
            match outcome {
                AckOutcome::Accepted => put_u8(&mut buf, ACK_ACCEPTED),
                AckOutcome::Duplicate => put_u8(&mut buf, ACK_DUPLICATE),
                AckOutcome::Mismatch { declared, found } => {
                    put_u8(&mut buf, ACK_MISMATCH);
                    put_kind(&mut buf, *declared);
                    put_kind(&mut buf, *found);
                }
            }
        }
        WireMsg::ExecRequest { iterating } => {
            put_u8(&mut buf, TAG_EXEC_REQUEST);
            put_bool(&mut buf, *iterating);
        }
        WireMsg::ExecGrant { iterating } => {
            put_u8(&mut buf, TAG_EXEC_GRANT);
            put_bool(&mut buf, *iterating);
        }
        WireMsg::TimeReport { minimum } => {
            put_u8(&mut buf, TAG_TIME_REPORT);
            put_time(&mut buf, *minimum);
        }
        WireMsg::TimeBound { bound } => {
            put_u8(&mut buf, TAG_TIME_BOUND);
            put_time(&mut buf, *bound);
        }
        WireMsg::ValueData {
            key,
            time,
            value,
            source,
        } => {
            put_u8(&mut buf, TAG_VALUE_DATA);
            put_str(&mut buf, key);
            put_time(&mut buf, *time);
            put_value(&mut buf, value);
            put_str(&mut buf, source);
        }
        WireMsg::MessageData { message } => {
            put_u8(&mut buf, TAG_MESSAGE_DATA);
            put_message(&mut buf, message);
        }
        WireMsg::Disconnect => {
            put_u8(&mut buf, TAG_DISCONNECT);
        }
        WireMsg::ErrorNotice { detail } => {
            put_u8(&mut buf, TAG_ERROR_NOTICE);
            put_str(&mut buf, detail);
        }
    }
    buf
}

/// Decode one frame from a standalone byte vector.
///
/// Trailing bytes after the frame body are rejected: each transport
/// unit carries exactly one frame.
pub fn decode(bytes: &[u8]) -> Result<WireMsg, WireError> {
    let mut r = bytes;
    let msg = match get_u8(&mut r)? {
        TAG_HELLO => WireMsg::Hello {
            name: get_str(&mut r)?,
            version: get_u8(&mut r)?,
        },
        TAG_WELCOME => WireMsg::Welcome {
            core_id: CoreId(get_u16_le(&mut r)?),
        },
        TAG_REGISTER_PUBLICATION => WireMsg::RegisterPublication {
            req_id: get_u32_le(&mut r)?,
            key: get_str(&mut r)?,
            kind: get_kind(&mut r)?,
            units: get_opt_str(&mut r)?,
        },
        TAG_REGISTER_INPUT => WireMsg::RegisterInput {
            req_id: get_u32_le(&mut r)?,
            target: get_str(&mut r)?,
            kind: get_kind(&mut r)?,
        },
        TAG_REGISTER_ENDPOINT => WireMsg::RegisterEndpoint {
            req_id: get_u32_le(&mut r)?,
            key: get_str(&mut r)?,
        },
        TAG_ACK => {
            let req_id = get_u32_le(&mut r)?;
            let outcome = match get_u8(&mut r)? {
                ACK_ACCEPTED => AckOutcome::Accepted,
                ACK_DUPLICATE => AckOutcome::Duplicate,
                ACK_MISMATCH => AckOutcome::Mismatch {
                    declared: get_kind(&mut r)?,
                    found: get_kind(&mut r)?,
                },
                code => {
                    return Err(WireError::MalformedFrame {
                        detail: format!("invalid ack outcome code: {code}"),
                    })
                }
            };
            WireMsg::Ack { req_id, outcome }
        }
        TAG_EXEC_REQUEST => WireMsg::ExecRequest {
            iterating: get_bool(&mut r)?,
        },
        TAG_EXEC_GRANT => WireMsg::ExecGrant {
            iterating: get_bool(&mut r)?,
        },
        TAG_TIME_REPORT => WireMsg::TimeReport {
            minimum: get_time(&mut r)?,
        },
        TAG_TIME_BOUND => WireMsg::TimeBound {
            bound: get_time(&mut r)?,
        },
        TAG_VALUE_DATA => WireMsg::ValueData {
            key: get_str(&mut r)?,
            time: get_time(&mut r)?,
            value: get_value(&mut r)?,
            source: get_str(&mut r)?,
        },
        TAG_MESSAGE_DATA => WireMsg::MessageData {
            message: get_message(&mut r)?,
        },
        TAG_DISCONNECT => WireMsg::Disconnect,
        TAG_ERROR_NOTICE => WireMsg::ErrorNotice {
            detail: get_str(&mut r)?,
        },
        tag => return Err(WireError::UnknownTag { tag }),
    };
    if !r.is_empty() {
        return Err(WireError::MalformedFrame {
            detail: format!("{} trailing bytes after frame", r.len()),
        });
    }
    Ok(msg)
}
