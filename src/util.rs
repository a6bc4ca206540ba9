//! Small string helpers used across modules.

/// Build `prefix + name + suffix`, shortening `name` with "..." so the whole
/// label fits in `max` characters. Prefix and suffix are never cut.
pub fn truncate_label(prefix: &str, name: &str, suffix: &str, max: usize) -> String {
  let fixed = prefix.chars().count() + suffix.chars().count();
  if fixed + name.chars().count() <= max {
    return format!("{prefix}{name}{suffix}");
  }
  let keep = max.saturating_sub(fixed + 3);
  let short: String = name.chars().take(keep).collect();
  format!("{prefix}{}...{suffix}", short.trim_end())
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with whole submission texts.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.chars().count() <= max {
    s.to_string()
  } else {
    let head: String = s.chars().take(max).collect();
    format!("{head}… ({} bytes total)", s.len())
  }
}
