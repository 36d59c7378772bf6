use anyhow::{Context, Result};
use console::style;
use medgemma::bootstrap::ModelSettings;
use medgemma::hub::HubClient;
use medgemma::key_manager::{get_access_token, token_preview, RealEnvironment};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

const TOKEN_SETTINGS_URL: &str = "https://huggingface.co/settings/tokens";

pub async fn execute(env_file: &Path, settings: &ModelSettings) -> Result<()> {
    cliclack::intro(style(" medgemma setup-token ").on_cyan().black())?;
    let key = settings.token_env.as_str();

    if let Ok(existing) = get_access_token(key, &RealEnvironment) {
        cliclack::log::info(format!(
            "{} is already set: {}",
            key,
            token_preview(&existing)
        ))?;
        if !cliclack::confirm("Would you like to replace it?").interact()? {
            cliclack::outro("Keeping the existing token")?;
            return Ok(());
        }
    }

    cliclack::note(
        "Before you start",
        format!(
            "1. Create a token with read access at {}\n2. Accept the model terms at {}/{}",
            TOKEN_SETTINGS_URL, settings.endpoint, settings.repo
        ),
    )?;

    let token: String = cliclack::password(format!("Enter your {}", key))
        .mask('▪')
        .validate(|value: &String| {
            if value.trim().is_empty() {
                Err("The token cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact()?;
    let token = token.trim();

    let spin = cliclack::spinner();
    spin.start("Checking the token...");
    let client = HubClient::new(&settings.endpoint, token, key)?;
    match client.check_access(&settings.repo).await {
        Ok(()) => spin.stop(format!("Token can access {}", settings.repo)),
        Err(e) => {
            spin.stop(format!("Token check failed: {}", e));
            if !cliclack::confirm("Save it anyway?").interact()? {
                cliclack::outro("Nothing was saved")?;
                return Ok(());
            }
        }
    }

    write_env_var(env_file, key, token)?;
    cliclack::outro(format!("Saved {} to {}", key, env_file.display()))?;
    Ok(())
}

fn assigns(line: &str, key: &str) -> bool {
    let line = line.trim_start();
    let line = line.strip_prefix("export ").unwrap_or(line);
    line.split_once('=')
        .is_some_and(|(name, _)| name.trim() == key)
}

/// Set `key` in the contents of an env file. The first assignment is replaced in place, later
/// ones are removed, and everything else is kept as is.
pub fn upsert_env_var(content: &str, key: &str, value: &str) -> String {
    let assignment = format!("{}={}", key, value);
    let mut written = false;

    let mut lines: Vec<String> = content
        .lines()
        .filter_map(|line| {
            if !assigns(line, key) {
                Some(line.to_string())
            } else if written {
                None
            } else {
                written = true;
                Some(assignment.clone())
            }
        })
        .collect();
    if !written {
        lines.push(assignment);
    }

    let mut updated = lines.join("\n");
    updated.push('\n');
    updated
}

pub fn write_env_var(path: &Path, key: &str, value: &str) -> Result<()> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    fs::write(path, upsert_env_var(&content, key, value))
        .with_context(|| format!("Failed to write {}", path.display()))
}
