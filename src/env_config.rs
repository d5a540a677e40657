//! Environment-variable knobs.
//!
//! Every override the crate honours is parsed here so the truthy/falsey
//! rules are the same for all of them.

pub(crate) const DISABLE_RAW_OFFSET_VAR: &str = "DECKLINK_FRAME_DISABLE_RAW_OFFSET";
pub(crate) const RAW_OFFSET_VAR: &str = "DECKLINK_FRAME_RAW_OFFSET";
pub(crate) const CHUNK_SIZE_VAR: &str = "DECKLINK_FRAME_CHUNK_SIZE";
pub(crate) const QUIET_VAR: &str = "DECKLINK_FRAME_QUIET";
pub(crate) const LOG_FILTER_VAR: &str = "DECKLINK_FRAME_LOG";

/// `1`, `true`, `yes` or `on` (trimmed, case-insensitive).
#[inline]
pub(crate) fn is_truthy(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes" || normalized == "on"
}

#[inline]
pub(crate) fn env_var_truthy(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|raw| is_truthy(&raw))
        .unwrap_or(false)
}

/// Parses a strictly positive integer; decimal or `0x`-prefixed hex.
#[inline]
pub(crate) fn parse_positive_u64(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse::<u64>().ok(),
    };
    parsed.filter(|value| *value > 0)
}

#[inline]
pub(crate) fn env_var_positive_u64(var_name: &str) -> Option<u64> {
    std::env::var(var_name)
        .ok()
        .and_then(|raw| parse_positive_u64(&raw))
}

#[inline]
pub(crate) fn env_var_positive_usize(var_name: &str) -> Option<usize> {
    env_var_positive_u64(var_name).and_then(|value| usize::try_from(value).ok())
}

/// Declares a cached flag that is on unless `$var` is truthy.
macro_rules! define_env_flag {
    (enabled_unless($fn_name:ident, $var:expr)) => {
        #[inline]
        pub(crate) fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| !$crate::env_config::env_var_truthy($var))
        }
    };
}

define_env_flag!(enabled_unless(raw_offset_enabled, DISABLE_RAW_OFFSET_VAR));
define_env_flag!(enabled_unless(diagnostics_enabled, QUIET_VAR));
