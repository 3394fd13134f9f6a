use anyhow::Context;
use std::path::Path;
use stepwise_core::{config::Config, io, paths};

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing stepwise in: {}", root.display());

    let config = Config::default();
    let yaml = serde_yaml::to_string(&config).context("failed to serialize default config")?;
    let config_path = paths::config_path(root);
    let created = io::write_if_missing(&config_path, yaml.as_bytes())
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    report(created, paths::CONFIG_FILE);

    // An existing stepwise.yaml decides where the units live.
    let config = Config::load(root).context("failed to load stepwise.yaml")?;
    let migrations = config.migrations_path(root);
    let existed = migrations.is_dir();
    io::ensure_dir(&migrations)
        .with_context(|| format!("failed to create {}", migrations.display()))?;
    report(!existed, &format!("{}/", config.migrations_dir.display()));

    let state = paths::state_dir(root);
    let existed = state.is_dir();
    io::ensure_dir(&state).with_context(|| format!("failed to create {}", state.display()))?;
    report(!existed, &format!("{}/", paths::STATE_DIR));

    io::ensure_gitignore_entry(root, &format!("{}/", paths::STATE_DIR))
        .context("failed to update .gitignore")?;

    println!("\nstepwise initialized. Add unit files to {}/ and run `stepwise apply`.", config.migrations_dir.display());
    Ok(())
}

fn report(created: bool, what: &str) {
    if created {
        println!("  created: {what}");
    } else {
        println!("  exists:  {what}");
    }
}
