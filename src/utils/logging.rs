//! Structured stderr logging for the signing pipeline
//!
//! Each entry carries the emitting module and `key=value` fields. Field
//! values are masked according to what their key names:
//! - token credentials (PIN, PUK, management key) are never printed
//! - destination addresses keep a short prefix and suffix
//! - UTXO hashes, digests and txids are shortened
//!
//! Debug entries are dropped unless [`enable_debug`] was called (the CLI's
//! `--verbose`). Device open and close are logged at debug level.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn enable_debug() {
    DEBUG_ENABLED.store(true, Ordering::Relaxed);
}

pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn label(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a field value is masked, decided from its key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Credential,
    Destination,
    Hash,
    Plain,
}

const CREDENTIAL_KEYS: &[&str] = &["pin", "puk", "management_key", "mgm", "private", "secret"];
const DESTINATION_KEYS: &[&str] = &["address", "recipient", "destination"];
const HASH_KEYS: &[&str] = &["txid", "hash", "digest", "utxo"];

impl FieldKind {
    fn of(key: &str) -> Self {
        let key = key.to_ascii_lowercase();
        // "tries_left" and "pin_policy" style keys describe the PIN, they are not it
        let is_word = |words: &[&str]| key.split('_').any(|part| words.contains(&part)) || words.contains(&key.as_str());

        if is_word(CREDENTIAL_KEYS) {
            FieldKind::Credential
        } else if is_word(DESTINATION_KEYS) {
            FieldKind::Destination
        } else if is_word(HASH_KEYS) {
            FieldKind::Hash
        } else {
            FieldKind::Plain
        }
    }

    fn mask(self, value: &str) -> String {
        match self {
            FieldKind::Credential => "[REDACTED]".to_string(),
            FieldKind::Destination => keep_ends(value, 6, 4),
            FieldKind::Hash => keep_ends(value, 10, 6),
            FieldKind::Plain => value.to_string(),
        }
    }
}

/// `prefix...suffix`, or the value fully masked when it is too short to
/// hide anything or not plain ASCII.
fn keep_ends(value: &str, prefix: usize, suffix: usize) -> String {
    let value = value.trim();
    if value.is_empty() {
        return "[EMPTY]".to_string();
    }
    if !value.is_ascii() || value.len() <= prefix + suffix + 3 {
        return format!("[REDACTED:{}chars]", value.chars().count());
    }
    format!("{}...{}", &value[..prefix], &value[value.len() - suffix..])
}

/// One log line under construction
#[derive(Debug)]
pub struct LogEntry {
    level: LogLevel,
    module: &'static str,
    message: String,
    fields: Vec<(&'static str, String)>,
}

impl LogEntry {
    pub fn new(level: LogLevel, module: &'static str, message: impl Into<String>) -> Self {
        Self {
            level,
            module,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Append `key=value`, masked according to `key`.
    pub fn field(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        let masked = FieldKind::of(key).mask(&value.to_string());
        self.fields.push((key, masked));
        self
    }

    fn render(&self, timestamp: impl fmt::Display) -> String {
        let mut line = format!("[{}] {} [{}] {}", timestamp, self.level, self.module, self.message);
        for (i, (key, value)) in self.fields.iter().enumerate() {
            line.push_str(if i == 0 { " | " } else { " " });
            line.push_str(key);
            line.push('=');
            line.push_str(value);
        }
        line
    }

    pub fn log(self) {
        if self.level == LogLevel::Debug && !is_debug_enabled() {
            return;
        }
        let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        eprintln!("{}", self.render(now));
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_at {
    ($level:ident, $module:expr, $msg:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::utils::logging::LogEntry::new($crate::utils::logging::LogLevel::$level, $module, $msg)
            $(.field(stringify!($key), &$value))*
            .log()
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($args:tt)+) => { $crate::__log_at!(Debug, $($args)+) };
}

#[macro_export]
macro_rules! log_info {
    ($($args:tt)+) => { $crate::__log_at!(Info, $($args)+) };
}

#[macro_export]
macro_rules! log_warn {
    ($($args:tt)+) => { $crate::__log_at!(Warn, $($args)+) };
}

#[macro_export]
macro_rules! log_error {
    ($($args:tt)+) => { $crate::__log_at!(Error, $($args)+) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SigningDigest, Slot};

    const DIGEST_HEX: &str = "be0220769dddb83bd8284f39c7c68be9cea3eb31b2681c07876065f8d7603639";

    fn fields(entry: &LogEntry) -> Vec<(&'static str, &str)> {
        entry.fields.iter().map(|(k, v)| (*k, v.as_str())).collect()
    }

    #[test]
    fn test_credentials_never_printed() {
        let entry = LogEntry::new(LogLevel::Info, "device::yubikey", "Authenticating")
            .field("pin", "87654321")
            .field("management_key", "010203040506070801020304050607080102030405060708");

        let line = entry.render("t");
        assert!(!line.contains("87654321"));
        assert!(!line.contains("01020304"));
        assert_eq!(fields(&entry), vec![("pin", "[REDACTED]"), ("management_key", "[REDACTED]")]);
    }

    #[test]
    fn test_pin_metadata_is_not_a_credential() {
        assert_eq!(FieldKind::of("tries_left"), FieldKind::Plain);
        assert_eq!(FieldKind::of("pin_policy"), FieldKind::Credential);
        assert_eq!(FieldKind::of("spin"), FieldKind::Plain);
        assert_eq!(FieldKind::of("output_amount"), FieldKind::Plain);
    }

    #[test]
    fn test_destination_keeps_ends() {
        let entry = LogEntry::new(LogLevel::Info, "tx::builder", "Built")
            .field("destination", "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa")
            .field("recipient", "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq");

        assert_eq!(
            fields(&entry),
            vec![("destination", "1A1zP1...vfNa"), ("recipient", "bc1qar...5mdq")]
        );
    }

    #[test]
    fn test_digest_and_slot_fields() {
        let digest = SigningDigest::from_bytes(hex::decode(DIGEST_HEX).unwrap().try_into().unwrap());
        let entry = LogEntry::new(LogLevel::Debug, "device::memory", "Signing")
            .field("digest", &digest)
            .field("slot", Slot::Signature);

        assert_eq!(fields(&entry), vec![("digest", "be0220769d...603639"), ("slot", "9c")]);
    }

    #[test]
    fn test_short_or_odd_values_fully_masked() {
        assert_eq!(keep_ends("", 6, 4), "[EMPTY]");
        assert_eq!(keep_ends("1A1zP1eP5Q", 6, 4), "[REDACTED:10chars]");
        assert_eq!(keep_ends("ünïcödé-äddrëss-välüe", 6, 4), "[REDACTED:21chars]");
    }

    #[test]
    fn test_render_layout() {
        let bare = LogEntry::new(LogLevel::Warn, "lib", "Device signing failed");
        assert_eq!(bare.render("T"), "[T] WARN [lib] Device signing failed");

        let entry = bare.field("code", "UserPresenceTimeout").field("slot", Slot::Authentication);
        assert_eq!(
            entry.render("T"),
            "[T] WARN [lib] Device signing failed | code=UserPresenceTimeout slot=9a"
        );
    }
}
