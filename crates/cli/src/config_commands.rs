use {
    anyhow::{Context, Result},
    clap::Subcommand,
    wagate_config::WagateConfig,
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (file, env substitution and
    /// overrides applied) as TOML.
    Show,
}

pub fn handle_config(action: ConfigAction, config: &WagateConfig) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let rendered = toml::to_string_pretty(config).context("failed to render config")?;
            print!("{rendered}");
            Ok(())
        },
    }
}
