//! Bootstrap Token Protocol
//!
//! Extracts the join token, CA certificate hashes and control-plane
//! certificate key from the human-readable output of `kubeadm init`,
//! `kubeadm token create --print-join-command` and
//! `kubeadm init phase upload-certs --upload-certs`.
//!
//! This is a textual parse of upstream CLI output. Wording changes upstream
//! surface as [`TokenParseError`], never as a generic failure.

use std::fmt;

use thiserror::Error;

/// Introduces the join command in kubeadm output
pub const JOIN_MARKER: &str = "kubeadm join";
/// Sentence that follows the control-plane join command in `kubeadm init` output
pub const END_MARKER: &str = "Please note";
/// Precedes the key in `kubeadm init phase upload-certs` output
pub const CERTIFICATE_KEY_MARKER: &str = "Using certificate key:";
/// Length of a kubeadm certificate key (32 bytes, hex encoded)
pub const CERTIFICATE_KEY_LEN: usize = 64;

const TOKEN_FLAG: &str = "--token";
const CA_CERT_HASH_FLAG: &str = "--discovery-token-ca-cert-hash";
const CERTIFICATE_KEY_FLAG: &str = "--certificate-key";

/// The upstream output no longer matches what the parser expects
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenParseError {
    /// Expected marker text is absent
    #[error("expected marker {0:?} not found in kubeadm output")]
    MarkerNotFound(&'static str),

    /// Flag is the last token or directly followed by another flag
    #[error("flag {0} has no value in join command")]
    MissingValue(&'static str),

    /// Certificate key shorter than 64 characters. The key is cut positionally
    /// at 64 characters, so a shorter value means the upstream format changed.
    #[error("certificate key {0:?} is shorter than {CERTIFICATE_KEY_LEN} characters")]
    ShortCertificateKey(String),

    /// Parsed command carries no token
    #[error("join command carries no token")]
    MissingToken,
}

/// Credentials for `kubeadm join`, shared read-only by every join of one
/// lifecycle operation. Never persisted.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BootstrapToken {
    /// `host:port` the join command targets
    pub api_server_endpoint: String,
    pub token: String,
    pub ca_cert_hashes: Vec<String>,
    /// Empty unless the output carried `--certificate-key`
    pub certificate_key: String,
}

impl fmt::Debug for BootstrapToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapToken")
            .field("api_server_endpoint", &self.api_server_endpoint)
            .field("token", &redact_token(&self.token))
            .field("ca_cert_hashes", &self.ca_cert_hashes)
            .field("certificate_key", &(!self.certificate_key.is_empty()).then_some("***"))
            .finish()
    }
}

impl BootstrapToken {
    /// Callers must check this before handing the token to a join
    pub fn validate(&self) -> Result<(), TokenParseError> {
        if self.token.is_empty() {
            return Err(TokenParseError::MissingToken);
        }
        Ok(())
    }

    #[must_use]
    pub fn with_certificate_key(mut self, certificate_key: String) -> Self {
        self.certificate_key = certificate_key;
        self
    }

    /// Join command with the token secret and certificate key masked, for logs
    pub fn redacted_join_command(&self) -> String {
        let mut command = format!(
            "{JOIN_MARKER} {} {TOKEN_FLAG} {}",
            self.api_server_endpoint,
            redact_token(&self.token)
        );
        for hash in &self.ca_cert_hashes {
            command.push_str(&format!(" {CA_CERT_HASH_FLAG} {hash}"));
        }
        if !self.certificate_key.is_empty() {
            command.push_str(&format!(" {CERTIFICATE_KEY_FLAG} <redacted>"));
        }
        command
    }
}

/// Keep the public token id, mask the secret
fn redact_token(token: &str) -> String {
    match token.split_once('.') {
        Some((id, _)) => format!("{id}.<redacted>"),
        None if token.is_empty() => String::new(),
        None => "<redacted>".to_string(),
    }
}

/// Parse the control-plane join command out of `kubeadm init` output: the
/// text between the first [`JOIN_MARKER`] and the following [`END_MARKER`].
pub fn parse_init_output(output: &str) -> Result<BootstrapToken, TokenParseError> {
    let (_, rest) = output
        .split_once(JOIN_MARKER)
        .ok_or(TokenParseError::MarkerNotFound(JOIN_MARKER))?;
    let (command, _) = rest
        .split_once(END_MARKER)
        .ok_or(TokenParseError::MarkerNotFound(END_MARKER))?;
    parse_join_command(command)
}

/// Parse `kubeadm token create --print-join-command` output
pub fn parse_print_join_command(output: &str) -> Result<BootstrapToken, TokenParseError> {
    let (_, rest) = output
        .split_once(JOIN_MARKER)
        .ok_or(TokenParseError::MarkerNotFound(JOIN_MARKER))?;
    parse_join_command(rest)
}

/// Parse the certificate key from `kubeadm init phase upload-certs --upload-certs`
pub fn parse_upload_certs_output(output: &str) -> Result<String, TokenParseError> {
    let (_, rest) = output
        .split_once(CERTIFICATE_KEY_MARKER)
        .ok_or(TokenParseError::MarkerNotFound(CERTIFICATE_KEY_MARKER))?;
    let key = rest
        .split_whitespace()
        .next()
        .ok_or(TokenParseError::MissingValue(CERTIFICATE_KEY_FLAG))?;
    truncate_certificate_key(key)
}

fn truncate_certificate_key(raw: &str) -> Result<String, TokenParseError> {
    raw.get(..CERTIFICATE_KEY_LEN)
        .map(str::to_string)
        .ok_or_else(|| TokenParseError::ShortCertificateKey(raw.to_string()))
}

/// Parse the arguments of a join command (everything after `kubeadm join`).
///
/// Tokens are split on whitespace and stripped of tab, newline and
/// backslash-continuation artifacts. Flags that are absent leave their field
/// empty; both `--flag value` and `--flag=value` are accepted.
pub fn parse_join_command(command: &str) -> Result<BootstrapToken, TokenParseError> {
    let tokens: Vec<String> = command
        .split_whitespace()
        .map(|t| t.replace(['\t', '\n', '\\'], ""))
        .filter(|t| !t.is_empty())
        .collect();

    let mut parsed = BootstrapToken::default();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i].as_str();
        let (flag, inline) = match token.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f, Some(v.to_string())),
            _ => (token, None),
        };
        let value = |name: &'static str| -> Result<String, TokenParseError> {
            if let Some(v) = &inline {
                return Ok(v.clone());
            }
            tokens
                .get(i + 1)
                .filter(|v| !v.starts_with("--"))
                .cloned()
                .ok_or(TokenParseError::MissingValue(name))
        };

        match flag {
            TOKEN_FLAG => parsed.token = value(TOKEN_FLAG)?,
            CA_CERT_HASH_FLAG => parsed.ca_cert_hashes.push(value(CA_CERT_HASH_FLAG)?),
            CERTIFICATE_KEY_FLAG => {
                parsed.certificate_key = truncate_certificate_key(&value(CERTIFICATE_KEY_FLAG)?)?;
            }
            endpoint if i == 0 && !endpoint.starts_with("--") => {
                parsed.api_server_endpoint = endpoint.to_string();
            }
            _ => {}
        }
        i += if inline.is_none() && matches!(flag, TOKEN_FLAG | CA_CERT_HASH_FLAG | CERTIFICATE_KEY_FLAG) {
            2
        } else {
            1
        };
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "f8902e114ef118304e561c3ecd4d0b543adc226b7a07f675f56564185ffe0c07";
    const HASH: &str = "sha256:7c2e69131a36ae2a042a339b33381c6d0d43887e2de83720eff5359e26aec866";

    const INIT_OUTPUT: &str = "[init] Using Kubernetes version: v1.19.8
Your Kubernetes control-plane has initialized successfully!

You can now join any number of the control-plane node running the following command on each as root:

  kubeadm join 192.168.0.200:6443 --token 9vr73a.a8uxyaju799qwdjv \\
\t--discovery-token-ca-cert-hash sha256:7c2e69131a36ae2a042a339b33381c6d0d43887e2de83720eff5359e26aec866 \\
\t--control-plane --certificate-key f8902e114ef118304e561c3ecd4d0b543adc226b7a07f675f56564185ffe0c07

Please note that the certificate-key gives access to cluster sensitive data, keep it secret!

Then you can join any number of worker nodes by running the following on each as root:

kubeadm join 192.168.0.200:6443 --token 9vr73a.a8uxyaju799qwdjv \\
\t--discovery-token-ca-cert-hash sha256:7c2e69131a36ae2a042a339b33381c6d0d43887e2de83720eff5359e26aec866
";

    #[test]
    fn test_parse_captured_single_line_output() {
        let output = "... kubeadm join 192.168.0.200:6443 --token 9vr73a.a8uxyaju799qwdjv --discovery-token-ca-cert-hash sha256:7c2e69131a36ae2a042a339b33381c6d0d43887e2de83720eff5359e26aec866 --experimental-control-plane --certificate-key f8902e114ef118304e561c3ecd4d0b543adc226b7a07f675f56564185ffe0c07extra ... Please note ...";

        let token = parse_init_output(output).unwrap();

        assert_eq!(token.token, "9vr73a.a8uxyaju799qwdjv");
        assert_eq!(token.ca_cert_hashes, vec![HASH.to_string()]);
        assert_eq!(token.certificate_key, KEY);
        assert_eq!(token.certificate_key.len(), 64);
        assert_eq!(token.api_server_endpoint, "192.168.0.200:6443");
    }

    #[test]
    fn test_parse_multiline_init_output() {
        let token = parse_init_output(INIT_OUTPUT).unwrap();

        assert_eq!(token.token, "9vr73a.a8uxyaju799qwdjv");
        assert_eq!(token.ca_cert_hashes, vec![HASH.to_string()]);
        assert_eq!(token.certificate_key, KEY);
        assert!(token.validate().is_ok());
    }

    #[test]
    fn test_missing_markers() {
        assert_eq!(
            parse_init_output("[init] failed"),
            Err(TokenParseError::MarkerNotFound(JOIN_MARKER))
        );
        assert_eq!(
            parse_init_output("kubeadm join 1.2.3.4:6443 --token a.b"),
            Err(TokenParseError::MarkerNotFound(END_MARKER))
        );
    }

    #[test]
    fn test_absent_flags_leave_fields_empty() {
        let token = parse_join_command(" 10.0.0.1:6443 --control-plane ").unwrap();

        assert!(token.token.is_empty());
        assert!(token.ca_cert_hashes.is_empty());
        assert!(token.certificate_key.is_empty());
        assert_eq!(token.validate(), Err(TokenParseError::MissingToken));
    }

    #[test]
    fn test_multiple_hashes_and_inline_values() {
        let token = parse_join_command(
            "10.0.0.1:6443 --token=abcdef.0123456789abcdef --discovery-token-ca-cert-hash sha256:aa --discovery-token-ca-cert-hash=sha256:bb",
        )
        .unwrap();

        assert_eq!(token.token, "abcdef.0123456789abcdef");
        assert_eq!(token.ca_cert_hashes, vec!["sha256:aa", "sha256:bb"]);
    }

    #[test]
    fn test_short_certificate_key_is_rejected() {
        assert_eq!(
            parse_join_command("10.0.0.1:6443 --token a.b --certificate-key abc"),
            Err(TokenParseError::ShortCertificateKey("abc".to_string()))
        );
    }

    #[test]
    fn test_flag_without_value() {
        assert_eq!(
            parse_join_command("10.0.0.1:6443 --token --control-plane"),
            Err(TokenParseError::MissingValue(TOKEN_FLAG))
        );
    }

    #[test]
    fn test_print_join_command_and_upload_certs() {
        let join = parse_print_join_command(
            "kubeadm join apiserver.cluster.local:6443 --token abcdef.0123456789abcdef --discovery-token-ca-cert-hash sha256:aa \n",
        )
        .unwrap();
        let key = parse_upload_certs_output(&format!(
            "[upload-certs] Storing the certificates in Secret \"kubeadm-certs\" in the \"kube-system\" Namespace\n[upload-certs] Using certificate key:\n{KEY}\n"
        ))
        .unwrap();

        let token = join.with_certificate_key(key);
        assert_eq!(token.api_server_endpoint, "apiserver.cluster.local:6443");
        assert_eq!(token.certificate_key, KEY);
        assert!(parse_upload_certs_output("no key here").is_err());
    }

    #[test]
    fn test_redaction_hides_secrets() {
        let token = parse_init_output(INIT_OUTPUT).unwrap();
        let logged = format!("{} {:?}", token.redacted_join_command(), token);

        assert!(logged.contains("9vr73a.<redacted>"));
        assert!(!logged.contains("a8uxyaju799qwdjv"));
        assert!(!logged.contains(KEY));
    }
}
