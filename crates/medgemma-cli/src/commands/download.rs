use anyhow::Result;
use console::style;
use medgemma::bootstrap::{HubLoader, ModelSettings};
use medgemma::errors::ModelResult;
use medgemma::generation::{complete_in_background, Completion};
use medgemma::model::{ModelHandle, SamplingOptions};
use medgemma::models::message::Message;
use medgemma::prompt::format_prompt;
use medgemma::slot::ModelLoader;
use std::sync::Arc;

pub const SMOKE_TEST_PROMPT: &str = "Hello, how are you?";
pub const SMOKE_TEST_TOKENS: usize = 50;

/// Generate a short reply to a greeting, to prove the weights work end to end
pub async fn smoke_test(handle: Arc<dyn ModelHandle>) -> ModelResult<Completion> {
    let prompt = format_prompt(&[Message::user().with_text(SMOKE_TEST_PROMPT)], None)?;
    let options = SamplingOptions {
        max_new_tokens: SMOKE_TEST_TOKENS,
        ..Default::default()
    };
    complete_in_background(handle, prompt, options, usize::MAX).await
}

pub async fn execute(settings: ModelSettings, skip_test: bool) -> Result<()> {
    cliclack::intro(style(" medgemma download ").on_cyan().black())?;

    let spin = cliclack::spinner();
    spin.start(format!(
        "Downloading {} into {}",
        settings.gguf_file,
        settings.cache_dir.display()
    ));
    let handle = match HubLoader::new(settings).load().await {
        Ok(handle) => {
            spin.stop(format!(
                "Loaded {} on {}",
                handle.model_name(),
                handle.device()
            ));
            handle
        }
        Err(e) => {
            spin.stop(format!("Could not load the model: {}", e));
            cliclack::outro("Check your token with `medgemma check-token`")?;
            return Err(e.into());
        }
    };

    if skip_test {
        cliclack::outro("Model files are cached and ready")?;
        return Ok(());
    }

    let spin = cliclack::spinner();
    spin.start(format!("Asking: {}", SMOKE_TEST_PROMPT));
    let completion = smoke_test(handle).await?;
    spin.stop(format!(
        "Generated {} tokens",
        completion.token_usage.output_tokens
    ));
    cliclack::note("MedGemma says", completion.content.trim())?;
    cliclack::outro("MedGemma is ready")?;
    Ok(())
}
