use anyhow::Context;
use wd_core::config::Config;

/// Print the effective configuration. Tokens never appear here; only the
/// name of the variable holding one does.
pub fn run(cfg: &Config) -> anyhow::Result<()> {
    let text = cfg.to_toml().context("rendering config")?;
    print!("{text}");
    Ok(())
}
