use sha2::{Digest, Sha256};

/// Rendered text of a session's visible buffer plus its content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub text: String,
    /// Lowercase hex SHA-256 of `text`
    pub hash: String,
}

impl Snapshot {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let hash = hex_digest(&text);
        Self { text, hash }
    }
}

fn hex_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Result of observing one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// The hash differs from the previous snapshot (or there was none)
    pub changed: bool,
    /// Whether a previous snapshot existed to compare against
    pub had_previous: bool,
    /// The output has settled and this run has not triggered yet
    pub stable: bool,
}

/// Counts consecutive unchanged polls of one session
///
/// `stable` is reported once per stabilization run: after it fires, further
/// identical snapshots keep counting (the counter saturates) but report
/// `stable = false` until the output changes and settles again.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
    threshold: u32,
    last_hash: Option<String>,
    count: u32,
    fired: bool,
}

impl StabilityTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            last_hash: None,
            count: 0,
            fired: false,
        }
    }

    pub fn set_threshold(&mut self, threshold: u32) {
        self.threshold = threshold.max(1);
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Consecutive unchanged polls so far
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    pub fn observe(&mut self, snapshot: &Snapshot) -> Observation {
        if self.last_hash.as_deref() != Some(snapshot.hash.as_str()) {
            let had_previous = self.last_hash.is_some();
            self.last_hash = Some(snapshot.hash.clone());
            self.count = 0;
            self.fired = false;
            return Observation {
                changed: true,
                had_previous,
                stable: false,
            };
        }

        self.count = self.count.saturating_add(1);
        let stable = self.count >= self.threshold && !self.fired;
        if stable {
            self.fired = true;
        }
        Observation {
            changed: false,
            had_previous: true,
            stable,
        }
    }
}
