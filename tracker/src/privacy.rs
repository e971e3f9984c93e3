//! Credential handling for collector invocations.
//!
//! The collector accepts an opaque API key. The key is passed through to the
//! collector untouched but must never reach the logs: [`ApiKey`] keeps the
//! secret in zeroizing memory and only ever formats an obfuscated form, and
//! [`redact_args`] masks the key inside command lines before they are logged.
//!
//! # Example
//!
//! ```
//! use heartbeat_tracker::privacy::{redact_args, ApiKey};
//!
//! let key = ApiKey::new("waka_0123456789abcdef");
//! let args = vec!["--key".to_string(), key.expose().to_string()];
//!
//! let logged = redact_args(&args, Some(&key));
//! assert!(!logged.join(" ").contains(key.expose()));
//! assert!(logged[1].ends_with("cdef"));
//! ```

use std::fmt;

use zeroize::Zeroizing;

/// Flag that precedes the key on collector command lines.
pub const KEY_FLAG: &str = "--key";

/// Mask used in place of everything but the last characters of a key.
const KEY_MASK: &str = "XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXX";

/// Number of trailing characters left visible when obfuscating.
const VISIBLE_SUFFIX_LEN: usize = 4;

/// An opaque collector API key.
///
/// The inner string is wiped from memory on drop. `Debug` output is
/// obfuscated so a key embedded in a config struct is safe to log.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(Zeroizing<String>);

impl ApiKey {
    /// Wraps a raw key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(Zeroizing::new(key.into()))
    }

    /// Returns the raw key for passing to the collector.
    ///
    /// Never log the returned value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns the obfuscated form used in logs.
    #[must_use]
    pub fn obfuscated(&self) -> String {
        obfuscate_key(&self.0)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiKey").field(&self.obfuscated()).finish()
    }
}

/// Obfuscates a key, keeping only its last four characters.
///
/// Keys too short to reveal anything safely are masked completely.
///
/// # Examples
///
/// ```
/// use heartbeat_tracker::privacy::obfuscate_key;
///
/// assert_eq!(
///     obfuscate_key("12345678-aaaa-bbbb-cccc-0123456789ab"),
///     "XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXX89ab"
/// );
/// assert_eq!(obfuscate_key("abc"), "XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXX");
/// ```
#[must_use]
pub fn obfuscate_key(key: &str) -> String {
    let len = key.chars().count();
    if len <= VISIBLE_SUFFIX_LEN * 2 {
        return KEY_MASK.to_string();
    }

    let suffix: String = key.chars().skip(len - VISIBLE_SUFFIX_LEN).collect();
    format!("{KEY_MASK}{suffix}")
}

/// Returns a copy of `args` safe for logging.
///
/// The value following [`KEY_FLAG`] is obfuscated, as is any argument that
/// contains the raw key.
#[must_use]
pub fn redact_args(args: &[String], key: Option<&ApiKey>) -> Vec<String> {
    let mut redacted = Vec::with_capacity(args.len());
    let mut after_key_flag = false;

    for arg in args {
        let leaks_key = key.is_some_and(|k| !k.expose().is_empty() && arg.contains(k.expose()));

        if after_key_flag || leaks_key {
            redacted.push(obfuscate_key(arg));
        } else {
            redacted.push(arg.clone());
        }

        after_key_flag = arg == KEY_FLAG;
    }

    redacted
}
