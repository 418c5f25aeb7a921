//! Prefixed, time-sortable identifiers (`ses_…`, `msg_…`).

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Kind of object an identifier names
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdKind {
    Session,
    Message,
    Part,
    Tool,
    Question,
}

impl IdKind {
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Session => "ses",
            Self::Message => "msg",
            Self::Part => "prt",
            Self::Tool => "tol",
            Self::Question => "qst",
        }
    }
}

static LAST: AtomicU64 = AtomicU64::new(0);

/// Generate an identifier that sorts after every identifier generated before it
/// in this process.
pub fn ascending(kind: IdKind) -> String {
    // millisecond timestamp in the high bits, a 12-bit counter below
    let millis = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
    let candidate = millis << 12;

    let mut prev = LAST.load(Ordering::Relaxed);
    let value = loop {
        let next = candidate.max(prev + 1);
        match LAST.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => break next,
            Err(actual) => prev = actual,
        }
    };

    let random = Uuid::new_v4().simple().to_string();
    format!("{}_{value:016x}{}", kind.prefix(), &random[..10])
}
