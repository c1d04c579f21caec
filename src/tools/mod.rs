// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool registry for Troupe.
//!
//! Tools are declared in configuration as [`ToolSpec`]s listing which tiers
//! can serve them (native handler, CLI subprocess, tool server). The
//! [`ToolRegistry`] resolves a call into an ordered strategy plan; the
//! [`crate::bridge::ToolBridge`] executes it.
//!
//! ```rust,ignore
//! use troupe::tools::{ToolRegistry, ToolSpec, CliSpec};
//!
//! let registry = ToolRegistry::builder()
//!     .spec("word_count", ToolSpec::native("Count words"))
//!     .native(WordCount)
//!     .spec("git_log", ToolSpec::cli("Recent commits", CliSpec::new("git").with_args(["log", "-n", "{count}"])))
//!     .build();
//! ```

pub mod registry;
pub mod spec;

pub use registry::{NativeTool, Strategy, ToolRegistry, ToolRegistryBuilder};
pub use spec::{CalibrationHints, CliSpec, OutputFormat, Phrasing, ProtocolSpec, ToolSpec};

use serde::Deserialize;

use crate::error::BridgeError;

/// Parse JSON parameters into a typed struct.
///
/// Helper for native tools to deserialize their input.
pub fn parse_arguments<T>(arguments: &serde_json::Value) -> Result<T, BridgeError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(arguments.clone())
        .map_err(|err| BridgeError::InvalidInput(format!("Failed to parse arguments: {err}")))
}

/// Default per-attempt timeout for tool calls in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000; // 2 minutes

/// Maximum bytes of stderr kept in error messages.
pub const MAX_STDERR_BYTES: usize = 2 * 1024;

/// Truncate text to a maximum byte length, respecting UTF-8 boundaries.
pub fn truncate_text(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}... [truncated]", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 100), "short");
        let truncated = truncate_text("Hello, world!", 5);
        assert!(truncated.starts_with("Hello"));
        assert!(truncated.contains("truncated"));
    }

    #[test]
    fn test_truncate_text_utf8() {
        let truncated = truncate_text("こんにちは", 7);
        assert!(truncated.starts_with("こん"));
    }

    #[test]
    fn test_parse_arguments_invalid() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        struct Args {
            path: String,
        }

        let result: Result<Args, _> = parse_arguments(&serde_json::json!({"other": 1}));
        assert!(matches!(result, Err(BridgeError::InvalidInput(_))));
    }
}
