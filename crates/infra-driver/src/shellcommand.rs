//! Shell snippets run on managed hosts.

const ALIAS_TAG_PREFIX: &str = "#dcops-";
const HEREDOC_DELIMITER: &str = "DCOPS_EOF";

/// Single-quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Escape `value` for use as a literal inside a sed basic regex
fn sed_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '.' | '/' | '*' | '[' | ']' | '^' | '$') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Point `hostname` at `ip` in /etc/hosts, replacing any earlier entry this
/// tool wrote for the same name.
pub fn set_host_alias(hostname: &str, ip: &str) -> String {
    format!(
        "{} && echo {} >> /etc/hosts",
        unset_host_alias(hostname),
        shell_quote(&format!("{ip} {hostname} {ALIAS_TAG_PREFIX}{hostname}"))
    )
}

/// Remove the /etc/hosts entry this tool wrote for `hostname`
pub fn unset_host_alias(hostname: &str) -> String {
    let pattern = format!("/{}$/d", sed_escape(&format!("{ALIAS_TAG_PREFIX}{hostname}")));
    format!("sed -i {} /etc/hosts", shell_quote(&pattern))
}

/// Write `contents` to `path`, creating the parent directory
pub fn write_file(path: &str, contents: &str) -> String {
    let dir = path.rsplit_once('/').map_or(".", |(d, _)| if d.is_empty() { "/" } else { d });
    format!(
        "mkdir -p {} && cat > {} <<'{HEREDOC_DELIMITER}'\n{}\n{HEREDOC_DELIMITER}",
        shell_quote(dir),
        shell_quote(path),
        contents.trim_end_matches('\n')
    )
}
