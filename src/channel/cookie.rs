use crate::config::CookiePolicy;

/// Split an inbound `Cookie` header into decoded `(name, value)` pairs.
/// Pairs without `=` or with an empty name are skipped; values are percent-decoded
/// when possible and kept raw otherwise.
pub fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for part in header.split(';') {
        let p = part.trim();
        let Some(eq) = p.find('=') else { continue; };
        let (k, v) = p.split_at(eq);
        let k = k.trim();
        if k.is_empty() { continue; }
        let raw = v[1..].trim().trim_matches('"');
        let value = urlencoding::decode(raw).map(|c| c.into_owned()).unwrap_or_else(|_| raw.to_string());
        out.push((k.to_string(), value));
    }
    out
}

pub fn format_set_cookie(name: &str, value: &str, policy: &CookiePolicy) -> String {
    let mut s = format!(
        "{}={}; Path={}; SameSite={}; Max-Age={}",
        name,
        urlencoding::encode(value),
        policy.path,
        policy.same_site.as_str(),
        policy.max_age_secs
    );
    if policy.secure { s.push_str("; Secure"); }
    if policy.http_only { s.push_str("; HttpOnly"); }
    s
}

pub fn format_clear_cookie(name: &str, path: &str) -> String {
    format!("{}=; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0; Path={}; SameSite=Lax", name, path)
}
