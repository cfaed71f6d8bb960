//! Span featurization.
//!
//! Feature vector layout, for a category width `L`:
//!
//! ```text
//! [ service code (L bits) | operation code (L bits) | duration ]
//! ```
//!
//! Service and operation ids are assigned in first-seen order and written
//! as the binary code `id + 1`, least significant bit first, so each block
//! tells apart `2^L - 1` categories. Duration is clamped to
//! `max_duration_ms` and scaled to `[0, 1]`.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

/// Operation-name rewrites that strip per-request identity.
static SANITIZE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(GET .*)\?.*", r"(GET /api/products)/[A-Z0-9]+"]
        .iter()
        .map(|p| Regex::new(p).expect("sanitize pattern compiles"))
        .collect()
});

/// Collapse query strings and product ids out of an operation name.
pub fn sanitize_operation(operation: &str) -> Cow<'_, str> {
    let mut out = Cow::Borrowed(operation);
    for pattern in SANITIZE_PATTERNS.iter() {
        let rewritten = match pattern.replace_all(&out, "$1") {
            Cow::Owned(s) => Some(s),
            Cow::Borrowed(_) => None,
        };
        if let Some(s) = rewritten {
            out = Cow::Owned(s);
        }
    }
    out
}

/// Maps `(service, operation, duration)` to a fixed-width feature vector.
#[derive(Debug, Clone)]
pub struct Featurizer {
    services: HashMap<String, usize>,
    operations: HashMap<String, usize>,
    category_len: usize,
    max_duration_ms: f64,
}

impl Featurizer {
    pub fn new(category_len: usize, max_duration_ms: f64) -> Self {
        Self {
            services: HashMap::new(),
            operations: HashMap::new(),
            category_len: category_len.max(1),
            max_duration_ms,
        }
    }

    /// Width of every vector [`Featurizer::featurize`] returns.
    pub fn n_features(&self) -> usize {
        2 * self.category_len + 1
    }

    /// Stable id for `service`, assigning the next one on first sight.
    pub fn service_id(&mut self, service: &str) -> usize {
        encode(&mut self.services, service)
    }

    pub fn operation_id(&mut self, operation: &str) -> usize {
        encode(&mut self.operations, operation)
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Build the feature vector. `operation` must already be sanitized.
    pub fn featurize(&mut self, service: &str, operation: &str, duration_ms: f64) -> Vec<f64> {
        let service_id = self.service_id(service);
        let operation_id = self.operation_id(operation);

        let len = self.category_len;
        let mut features = vec![0.0; self.n_features()];
        write_code(&mut features[..len], service_id, "service", service);
        write_code(&mut features[len..2 * len], operation_id, "operation", operation);
        features[2 * len] = self.scale_duration(duration_ms);
        features
    }

    fn scale_duration(&self, duration_ms: f64) -> f64 {
        if self.max_duration_ms <= 0.0 || !duration_ms.is_finite() {
            return 0.0;
        }
        duration_ms.clamp(0.0, self.max_duration_ms) / self.max_duration_ms
    }
}

/// Write `id + 1` in binary into `block`, one bit per slot.
fn write_code(block: &mut [f64], id: usize, kind: &str, name: &str) {
    let code = id as u64 + 1;
    let bits = block.len().min(u64::BITS as usize);
    if bits < u64::BITS as usize && code >> bits != 0 {
        warn!(kind, name, id, bits, "category id exceeds feature width, code truncated");
    }
    for (bit, slot) in block.iter_mut().take(bits).enumerate() {
        if (code >> bit) & 1 == 1 {
            *slot = 1.0;
        }
    }
}

fn encode(map: &mut HashMap<String, usize>, key: &str) -> usize {
    if let Some(id) = map.get(key) {
        return *id;
    }
    let id = map.len();
    map.insert(key.to_string(), id);
    id
}
