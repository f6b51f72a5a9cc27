//! minijinja rendering for kubeadm configs and static pod manifests.

use minijinja::{AutoEscape, Environment, Value};

use crate::error::RuntimeError;

/// Render `source` with `ctx`. Block tags on their own line leave no blank
/// line behind and output is never escaped.
pub(crate) fn render(name: &str, source: &str, ctx: Value) -> Result<String, RuntimeError> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.add_template(name, source)?;
    Ok(env.get_template(name)?.render(ctx)?)
}
