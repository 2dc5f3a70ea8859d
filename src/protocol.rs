//! TEXT TCP 1.0 wire codec.
//!
//! Every message is a single `\n`-terminated line of ASCII text:
//!
//! ```text
//! server -> client   TEXT TCP 1.0\n\n       greeting
//! client -> server   OK\n                   acknowledgment
//! server -> client   <kind> <a> <b>\n       assignment
//! client -> server   <number>\n             answer
//! server -> client   OK\n | ERROR\n | ERROR TO\n
//! ```
//!
//! Each message type has an `encode`/`decode` pair so the wire contract can be
//! exercised without a socket.

use bytes::BytesMut;
use std::fmt;
use std::str::FromStr;

/// Greeting announcing the only supported protocol version.
pub const GREETING: &[u8] = b"TEXT TCP 1.0\n\n";

/// The exact acknowledgment line a client must send after the greeting.
pub const ACK: &[u8] = b"OK\n";

/// Longest line accepted from a client, including the terminating `\n`.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Significant digits used when rendering real operands.
pub const REAL_SIGNIFICANT_DIGITS: usize = 8;

/// Wire decoding errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown operation kind: {0:?}")]
    UnknownKind(String),
    #[error("expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),
    #[error("invalid real: {0:?}")]
    InvalidReal(String),
    #[error("unknown verdict: {0:?}")]
    UnknownVerdict(String),
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error(transparent)]
    Assignment(#[from] AssignmentError),
}

/// The arithmetic operation requested by an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Add,
    Sub,
    Mul,
    Div,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

/// The arithmetic operator shared by an integer kind and its real twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
}

impl OperationKind {
    pub const ALL: [OperationKind; 8] = [
        OperationKind::Add,
        OperationKind::Div,
        OperationKind::Mul,
        OperationKind::Sub,
        OperationKind::FAdd,
        OperationKind::FDiv,
        OperationKind::FMul,
        OperationKind::FSub,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Add => "add",
            OperationKind::Sub => "sub",
            OperationKind::Mul => "mul",
            OperationKind::Div => "div",
            OperationKind::FAdd => "fadd",
            OperationKind::FSub => "fsub",
            OperationKind::FMul => "fmul",
            OperationKind::FDiv => "fdiv",
        }
    }

    /// Real-valued kinds are tagged with a leading `f`.
    pub fn is_real(self) -> bool {
        self.as_str().starts_with('f')
    }

    pub fn operator(self) -> Operator {
        match self {
            OperationKind::Add | OperationKind::FAdd => Operator::Add,
            OperationKind::Sub | OperationKind::FSub => Operator::Sub,
            OperationKind::Mul | OperationKind::FMul => Operator::Mul,
            OperationKind::Div | OperationKind::FDiv => Operator::Div,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownKind(s.to_string()))
    }
}

/// Operand pair, homogeneous in type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operands {
    Integer(i32, i32),
    Real(f64, f64),
}

/// Reasons an assignment cannot be constructed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssignmentError {
    #[error("{kind} requires {expected} operands")]
    OperandMismatch {
        kind: OperationKind,
        expected: &'static str,
    },
    #[error("{0} with a zero divisor")]
    ZeroDivisor(OperationKind),
}

/// One generated arithmetic problem. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment {
    kind: OperationKind,
    operands: Operands,
}

impl Assignment {
    /// Build an assignment, rejecting operands of the wrong type and zero
    /// divisors.
    pub fn new(kind: OperationKind, operands: Operands) -> Result<Self, AssignmentError> {
        let zero_divisor = match operands {
            Operands::Integer(_, b) if !kind.is_real() => b == 0,
            Operands::Real(_, b) if kind.is_real() => b == 0.0,
            _ => {
                return Err(AssignmentError::OperandMismatch {
                    kind,
                    expected: if kind.is_real() { "real" } else { "integer" },
                })
            }
        };

        if zero_divisor && kind.operator() == Operator::Div {
            return Err(AssignmentError::ZeroDivisor(kind));
        }

        Ok(Self { kind, operands })
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn operands(&self) -> Operands {
        self.operands
    }

    /// Append `<kind> <a> <b>\n` to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        let line = match self.operands {
            Operands::Integer(a, b) => format!("{} {a} {b}\n", self.kind),
            Operands::Real(a, b) => {
                format!("{} {} {}\n", self.kind, format_real(a), format_real(b))
            }
        };
        dst.extend_from_slice(line.as_bytes());
    }

    /// Parse an assignment line as a client would.
    #[allow(dead_code)] // client-side half of the codec, exercised by tests
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let fields: Vec<&str> = line.split_ascii_whitespace().collect();
        if fields.len() != 3 {
            return Err(ProtocolError::FieldCount {
                expected: 3,
                actual: fields.len(),
            });
        }

        let kind: OperationKind = fields[0].parse()?;
        let operands = if kind.is_real() {
            Operands::Real(parse_real(fields[1])?, parse_real(fields[2])?)
        } else {
            Operands::Integer(parse_i32(fields[1])?, parse_i32(fields[2])?)
        };

        Ok(Assignment::new(kind, operands)?)
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operands {
            Operands::Integer(a, b) => write!(f, "{} {a} {b}", self.kind),
            Operands::Real(a, b) => {
                write!(f, "{} {} {}", self.kind, format_real(a), format_real(b))
            }
        }
    }
}

/// A client's numeric answer, typed by the assignment it answers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Answer {
    Integer(i64),
    Real(f64),
}

impl Answer {
    /// Parse an answer line for an assignment of the given kind.
    ///
    /// Surrounding whitespace (including `\r\n`) is ignored.
    pub fn decode(line: &[u8], kind: OperationKind) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(line)
            .map_err(|_| ProtocolError::InvalidUtf8)?
            .trim();

        if kind.is_real() {
            parse_real(text).map(Answer::Real)
        } else {
            text.parse()
                .map(Answer::Integer)
                .map_err(|_| ProtocolError::InvalidInteger(text.to_string()))
        }
    }

    #[allow(dead_code)] // client-side half of the codec, exercised by tests
    pub fn encode(&self, dst: &mut BytesMut) {
        let line = match self {
            Answer::Integer(value) => format!("{value}\n"),
            Answer::Real(value) => format!("{}\n", format_real(*value)),
        };
        dst.extend_from_slice(line.as_bytes());
    }
}

/// Grading outcome sent to the client. Computed exactly once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    Error,
    Timeout,
}

impl Verdict {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Verdict::Ok => b"OK\n",
            Verdict::Error => b"ERROR\n",
            Verdict::Timeout => b"ERROR TO\n",
        }
    }

    pub fn encode(self, dst: &mut BytesMut) {
        dst.extend_from_slice(self.as_bytes());
    }

    #[allow(dead_code)] // client-side half of the codec, exercised by tests
    pub fn decode(line: &[u8]) -> Result<Self, ProtocolError> {
        match line {
            b"OK\n" => Ok(Verdict::Ok),
            b"ERROR\n" => Ok(Verdict::Error),
            b"ERROR TO\n" => Ok(Verdict::Timeout),
            other => Err(ProtocolError::UnknownVerdict(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

/// True when `line` is exactly the acknowledgment literal.
pub fn is_ack(line: &[u8]) -> bool {
    line == ACK
}

fn parse_i32(text: &str) -> Result<i32, ProtocolError> {
    text.parse()
        .map_err(|_| ProtocolError::InvalidInteger(text.to_string()))
}

fn parse_real(text: &str) -> Result<f64, ProtocolError> {
    text.parse()
        .map_err(|_| ProtocolError::InvalidReal(text.to_string()))
}

/// Render a real the way C's `%.8g` does: 8 significant digits, trailing
/// zeros removed, scientific notation outside `1e-4 <= |x| < 1e8`.
pub fn format_real(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let precision = REAL_SIGNIFICANT_DIGITS as i32;
    let scientific = format!("{:.*e}", REAL_SIGNIFICANT_DIGITS - 1, value);
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= precision {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{sign}{:02}",
            trim_fraction(mantissa),
            exponent.unsigned_abs()
        )
    } else {
        let decimals = (precision - 1 - exponent) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(digits: &str) -> &str {
    if digits.contains('.') {
        digits.trim_end_matches('0').trim_end_matches('.')
    } else {
        digits
    }
}

/// Convert a real to the value a client reads back from its wire form.
pub fn wire_real(value: f64) -> f64 {
    format_real(value).parse().unwrap_or(value)
}
