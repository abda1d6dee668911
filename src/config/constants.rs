// Project-wide constants
//
// Centralised here so ports, file names and training defaults have one
// source of truth. Import via `use crate::config::constants::*;`.

/// Default bind address for the detoxifier HTTP server (localhost only).
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:5000";

/// Directory (under `$HOME`) holding the optional config file.
pub const CONFIG_DIR_NAME: &str = ".detoxifier";

/// Config file name inside [`CONFIG_DIR_NAME`].
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default fine-tuned checkpoint directory.
pub const DEFAULT_CHECKPOINT_DIR: &str = "t5-small-detox-finetuned";

/// Default rating store (append-only JSON Lines).
pub const DEFAULT_FEEDBACK_STORE: &str = "user_ratings.jsonl";

/// Default preference store (append-only JSON Lines).
pub const DEFAULT_PREFERENCE_STORE: &str = "user_preferences.jsonl";

/// Default metrics log (`Step <n> - Loss: <float>` lines).
pub const DEFAULT_METRICS_LOG: &str = "metrics_log.txt";

/// Base model used by `detoxifier train` when `--base` is omitted.
pub const DEFAULT_BASE_MODEL: &str = "t5-small";

/// Prompt prefix the T5 detoxifier was trained with.
pub const DEFAULT_PROMPT_PREFIX: &str = "detoxify: ";

/// Marker a user picks when an input cannot be rewritten politely.
pub const UNFIXABLE_MARKER: &str = "UNTOXIFIABLE";

/// Target text substituted for a chosen [`UNFIXABLE_MARKER`].
pub const UNFIXABLE_CHOSEN: &str = "detoxify: UNTOXIFIABLE";

/// Rejected text substituted for a chosen [`UNFIXABLE_MARKER`].
pub const UNFIXABLE_REJECTED: &str = "detoxify: UNTOXIFIABLE";

/// Target text used for corpus rows that cannot be rewritten.
pub const CANNOT_REWRITE_TARGET: &str = "none";

/// Hard cap on generated tokens per candidate.
pub const MAX_NEW_TOKENS_CAP: usize = 100;

/// Retraining child process timeout (one hour).
pub const DEFAULT_RETRAIN_TIMEOUT_SECS: u64 = 3600;

/// Label value that excludes a target position from the loss.
pub const IGNORE_INDEX: i64 = -100;
