//! User agent selection for portal requests.

pub const USER_AGENT: &str = "atacquire/0.1 (public procurement archive)";

/// Desktop browser user agents used in impersonate mode.
pub const IMPERSONATE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:133.0) Gecko/20100101 Firefox/133.0",
];

/// Pick one impersonation user agent, varying with the clock.
fn impersonated_user_agent() -> &'static str {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as usize)
        .unwrap_or(0);
    IMPERSONATE_USER_AGENTS[nanos % IMPERSONATE_USER_AGENTS.len()]
}

/// Resolve the configured user agent.
/// - None or empty => default atacquire user agent
/// - "impersonate" => a real browser user agent
/// - other => used verbatim
pub fn resolve_user_agent(config: Option<&str>) -> String {
    match config.map(str::trim) {
        None | Some("") => USER_AGENT.to_string(),
        Some(value) if value.eq_ignore_ascii_case("impersonate") => {
            impersonated_user_agent().to_string()
        }
        Some(custom) => custom.to_string(),
    }
}
