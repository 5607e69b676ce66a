//! Correlation ID sequences.
//!
//! An [`IdSequence`] produces identifiers of the form
//! `<prefix><root><sep><counter>`. The root is a random plain identifier
//! generated once per sequence; the counter increases monotonically. Once
//! the counter passes the rollover ceiling, a fresh root is drawn and the
//! counter restarts at 1, which bounds the length of generated IDs.
//!
//! IDs are unique within one counter epoch of one sequence. Nothing here
//! guarantees uniqueness across epochs or across sequences, so IDs must only
//! be used to correlate replies with requests that are still outstanding.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of the random root identifier.
pub const ROOT_ID_LEN: usize = 20;

/// Default counter ceiling before the root identifier is regenerated.
pub const DEFAULT_ROLLOVER: u64 = 1_000_000;

/// Generate a random lowercase alphanumeric identifier.
pub fn plain_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ROOT_ID_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

#[derive(Debug)]
struct SequenceState {
    root: String,
    counter: u64,
}

/// Monotonic ID generator with a regenerating root.
#[derive(Debug)]
pub struct IdSequence {
    prefix: String,
    separator: char,
    rollover: u64,
    state: Mutex<SequenceState>,
}

static PROCESS_SEQUENCE: OnceLock<Arc<IdSequence>> = OnceLock::new();

impl IdSequence {
    /// Sequence producing `<root>-<n>` with the default rollover.
    pub fn new() -> Self {
        Self::with_rollover(DEFAULT_ROLLOVER)
    }

    /// Sequence producing `<root>-<n>`, rolling over after `rollover` IDs.
    ///
    /// A ceiling of zero is treated as one.
    pub fn with_rollover(rollover: u64) -> Self {
        Self {
            prefix: String::new(),
            separator: '-',
            rollover: rollover.max(1),
            state: Mutex::new(SequenceState {
                root: plain_id(),
                counter: 0,
            }),
        }
    }

    /// Sequence producing `<prefix><sep><root><sep><n>` (e.g. `call_abc_1`).
    pub fn prefixed(prefix: &str, separator: char) -> Self {
        let mut seq = Self::new();
        seq.prefix = format!("{prefix}{separator}");
        seq.separator = separator;
        seq
    }

    /// The process-wide call sequence (`call_<root>_<n>`).
    ///
    /// Created on first access and shared for the lifetime of the process.
    pub fn process() -> Arc<Self> {
        PROCESS_SEQUENCE
            .get_or_init(|| Arc::new(Self::prefixed("call", '_')))
            .clone()
    }

    /// Produce the next identifier.
    pub fn next_id(&self) -> String {
        let mut state = self.state.lock();
        state.counter += 1;
        if state.counter > self.rollover {
            state.root = plain_id();
            state.counter = 1;
            tracing::debug!(root = %state.root, "id sequence rolled over");
        }
        format!(
            "{}{}{}{}",
            self.prefix, state.root, self.separator, state.counter
        )
    }

    /// Current root identifier.
    pub fn root(&self) -> String {
        self.state.lock().root.clone()
    }

    /// Number of IDs issued in the current epoch.
    pub fn issued(&self) -> u64 {
        self.state.lock().counter
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}
