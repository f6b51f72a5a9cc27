//! Operator confirmation before destructive operations

use std::net::IpAddr;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use crate::error::RuntimeError;

/// Asks the operator whether `hosts` may be torn down
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// `Ok(true)` to proceed
    async fn confirm(&self, action: &str, hosts: &[IpAddr]) -> Result<bool, RuntimeError>;
}

/// Prompt on stdout, answer on stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirmer;

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, action: &str, hosts: &[IpAddr]) -> Result<bool, RuntimeError> {
        let mut stdout = tokio::io::stdout();
        let prompt = format!(
            "{action} will destroy kubernetes state on {}.\nAre you sure? [y/N] ",
            host_list(hosts)
        );
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        let mut input = String::new();
        let mut reader = tokio::io::BufReader::new(tokio::io::stdin());
        reader.read_line(&mut input).await?;
        Ok(is_yes(&input))
    }
}

/// Fixed answer, for `--yes` and tests
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, _action: &str, _hosts: &[IpAddr]) -> Result<bool, RuntimeError> {
        Ok(self.0)
    }
}

fn is_yes(input: &str) -> bool {
    let answer = input.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

fn host_list(hosts: &[IpAddr]) -> String {
    hosts.iter().map(IpAddr::to_string).collect::<Vec<_>>().join(", ")
}
