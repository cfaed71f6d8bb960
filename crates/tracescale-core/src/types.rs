//! Shared enums selected by configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A configuration value did not name a known variant.
#[derive(Debug, Clone, Error)]
#[error("unknown {kind} '{value}' (expected one of: {expected})")]
pub struct ParseVariantError {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseVariantError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(ParseVariantError {
                        kind: $kind,
                        value: s.to_string(),
                        expected: concat!($($text, " "),+),
                    }),
                }
            }
        }
    };
}

string_enum!(
    /// Whether scaling decisions are only logged or also applied.
    ScalingMode, "scaling mode", {
        /// Log decisions, never call the orchestrator.
        Observe => "observe",
        /// Apply decisions through the orchestrator.
        Enforce => "enforce",
    }
);

string_enum!(
    /// Which decision policy evaluates a service.
    PolicyKind, "policy", {
        /// Adaptive EWMA bounds with CUSUM diagnostics.
        Hybrid => "hybrid",
        /// Per-deployment bounds from the configuration store.
        Static => "static",
    }
);

string_enum!(
    /// Which sampler stream the consumer subscribes to.
    SubscriptionKind, "subscription", {
        /// One message per accepted span carrying its trace id.
        Ids => "ids",
        /// Accepted batches in resource/scope/span nesting.
        Data => "data",
    }
);

string_enum!(
    /// How the consumer treats stream errors other than "unavailable".
    ErrorPolicy, "error policy", {
        /// Stop consuming on a terminal error.
        FailStop => "fail_stop",
        /// Treat every stream error as transient and reconnect.
        RetryAll => "retry_all",
    }
);

string_enum!(
    /// What the processor worker does with queued traces at shutdown.
    DrainPolicy, "drain policy", {
        /// Analyze everything still queued before exiting.
        Drain => "drain",
        /// Exit immediately, dropping queued traces.
        Abandon => "abandon",
    }
);
