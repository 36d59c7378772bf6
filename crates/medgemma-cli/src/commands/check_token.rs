use anyhow::Result;
use console::style;
use medgemma::bootstrap::ModelSettings;
use medgemma::hub::HubClient;
use medgemma::key_manager::{get_access_token, token_preview, RealEnvironment};

pub async fn execute(settings: &ModelSettings) -> Result<()> {
    let token = match get_access_token(&settings.token_env, &RealEnvironment) {
        Ok(token) => token,
        Err(e) => {
            println!("{} {}", style("✗").red().bold(), e);
            println!(
                "  Run {} to create one.",
                style("medgemma setup-token").cyan()
            );
            return Err(e.into());
        }
    };
    println!(
        "{} {} is set: {}",
        style("✓").green().bold(),
        settings.token_env,
        token_preview(&token)
    );

    let client = HubClient::new(&settings.endpoint, token, &settings.token_env)?;
    match client.check_access(&settings.repo).await {
        Ok(()) => {
            println!(
                "{} Token can access {}",
                style("✓").green().bold(),
                style(&settings.repo).bold()
            );
            Ok(())
        }
        Err(e) => {
            println!("{} {}", style("✗").red().bold(), e);
            if e.is_access_error() {
                println!(
                    "  Accept the model terms at {}/{}",
                    settings.endpoint, settings.repo
                );
            }
            Err(e.into())
        }
    }
}
