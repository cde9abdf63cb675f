use crate::core::config::Config;
use crate::core::state::VoiceName;
use anyhow::{anyhow, Result};
use inquire::{Password, PasswordDisplayMode, Select};

/// Fills in what the studio cannot run without and saves the config when
/// anything changed.
pub fn run_setup(config: &mut Config) -> Result<()> {
    let mut needs_save = false;

    if config.gemini.api_key.trim().is_empty() {
        let key = Password::new("Gemini API key:")
            .with_display_mode(PasswordDisplayMode::Masked)
            .without_confirmation()
            .with_help_message("Stored in config.yml. GEMINI_API_KEY works too.")
            .prompt()?;
        if key.trim().is_empty() {
            return Err(anyhow!("A Gemini API key is required."));
        }
        config.gemini.api_key = key.trim().to_string();
        needs_save = true;
    }

    if needs_save {
        config.save()?;
        println!("Configuration saved.");
    }
    Ok(())
}

fn voice_option(voice: VoiceName) -> String {
    format!("{} - {}", voice, voice.description())
}

fn parse_voice_option(option: &str) -> Option<VoiceName> {
    let name = option.split_whitespace().next()?;
    VoiceName::ALL.into_iter().find(|v| v.as_str() == name)
}

/// Lets the user pick one of the prebuilt voices, starting at `current`.
pub fn select_voice(prompt: &str, current: Option<VoiceName>) -> Result<VoiceName> {
    let options: Vec<String> = VoiceName::ALL.into_iter().map(voice_option).collect();
    let start = current
        .and_then(|c| VoiceName::ALL.iter().position(|v| *v == c))
        .unwrap_or(0);

    let selection = Select::new(prompt, options)
        .with_starting_cursor(start)
        .prompt()?;
    parse_voice_option(&selection).ok_or_else(|| anyhow!("Unknown voice '{}'", selection))
}
