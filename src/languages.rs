use anyhow::Result;

use crate::client::normalize_model_id;
use crate::config::Config;
use crate::project::resolve_languages;
use crate::prompt::language_name;

/// Print the resolved target languages and each language's model ladder.
pub fn list_languages(config: &Config, filter: &[String]) -> Result<()> {
    let languages = resolve_languages(config, filter)?;

    println!("{:<10} {:<24} MODELS", "LANGUAGE", "NAME");
    for lang in &languages {
        let models: Vec<String> = config
            .model
            .models_for(lang)
            .iter()
            .map(|m| normalize_model_id(m, &config.model.aliases))
            .collect();
        println!("{:<10} {:<24} {}", lang, language_name(lang), models.join(" > "));
    }

    Ok(())
}
