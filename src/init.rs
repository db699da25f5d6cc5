use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::config::EXAMPLE_CONFIG;
use crate::prompt::DEFAULT_ROLE_TEMPLATE;

/// Write `mdt.toml` and `role.txt` into `dir`. Existing files are never
/// overwritten.
pub fn scaffold_project(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let config_path = dir.join("mdt.toml");
    let role_path = dir.join("role.txt");
    for path in [&config_path, &role_path] {
        if path.exists() {
            bail!("File already exists: {}", path.display());
        }
    }

    std::fs::write(&config_path, EXAMPLE_CONFIG)?;
    std::fs::write(&role_path, DEFAULT_ROLE_TEMPLATE)?;

    println!("Created {}", config_path.display());
    println!("Created {}", role_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit mdt.toml (source_dir, languages, models)");
    println!("  2. export OPENROUTER_API_KEY=...   (or put it in .env)");
    println!("  3. mdt check");
    println!("  4. mdt translate");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use tempfile::TempDir;

    #[test]
    fn scaffold_writes_loadable_config() {
        let tmp = TempDir::new().unwrap();
        scaffold_project(tmp.path()).unwrap();
        let config = load_config(&tmp.path().join("mdt.toml")).unwrap();
        assert_eq!(config.role_template_path(), Some(tmp.path().join("role.txt")));
        assert!(scaffold_project(tmp.path()).is_err());
    }
}
