pub mod codec;
pub mod config;
pub mod detector;
pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod report;
pub mod synthesizer;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use extractor_contracts::models::{ModelSelector, ModelSpec, CAPABILITY_EDIT, CAPABILITY_VISION};
use extractor_contracts::{
    GeneratedImageReference, ImageSize, ObjectDescriptor, Quality, ResultCollection,
};
use image::DynamicImage;
use reqwest::blocking::Client as HttpClient;

pub use codec::Materialize;
pub use config::ExtractorConfig;
pub use detector::ObjectDetector;
pub use error::ExtractError;
pub use orchestrator::{GenerationOrchestrator, PassReport};
pub use prompt::build_prompt;
pub use providers::{DryrunProvider, EditProvider, OpenAiProvider, ProviderRegistry, VisionProvider};
pub use report::{EventReporter, MemoryReporter, Reporter};
pub use synthesizer::ObjectSynthesizer;

/// Wires configuration, model selection and providers into the pipeline
/// stages.
pub struct ExtractorEngine {
    http: HttpClient,
    providers: ProviderRegistry,
    vision_model: ModelSpec,
    edit_model: ModelSpec,
    item_delay: Duration,
}

impl ExtractorEngine {
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        let http = config.http_client()?;
        let providers = default_provider_registry(config, &http);
        Self::with_providers(config, http, providers)
    }

    pub fn with_providers(
        config: &ExtractorConfig,
        http: HttpClient,
        providers: ProviderRegistry,
    ) -> Result<Self> {
        let selector = ModelSelector::new(None);
        let vision_model = resolve_model(
            &selector,
            &providers,
            config.vision_model.as_deref(),
            CAPABILITY_VISION,
        )?;
        let edit_model = resolve_model(
            &selector,
            &providers,
            config.edit_model.as_deref(),
            CAPABILITY_EDIT,
        )?;
        Ok(Self {
            http,
            providers,
            vision_model,
            edit_model,
            item_delay: config.item_delay,
        })
    }

    pub fn vision_model(&self) -> &ModelSpec {
        &self.vision_model
    }

    pub fn edit_model(&self) -> &ModelSpec {
        &self.edit_model
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn detect(&self, image: &DynamicImage, reporter: &dyn Reporter) -> Vec<ObjectDescriptor> {
        let Some(provider) = self.providers.vision(&self.vision_model.provider) else {
            reporter.error(&ExtractError::VisionRequest(format!(
                "no vision provider '{}' registered",
                self.vision_model.provider
            )));
            return Vec::new();
        };
        let mut detector = ObjectDetector::new(provider, self.vision_model.name.clone());
        if let Some(max_output_tokens) = self.vision_model.max_output_tokens {
            detector = detector.with_max_output_tokens(max_output_tokens);
        }
        detector.detect(image, reporter)
    }

    /// Runs one pass over `selected` and merges successes into `results`.
    #[allow(clippy::too_many_arguments)]
    pub fn generate(
        &self,
        results: &mut ResultCollection,
        source: &DynamicImage,
        selected: &[ObjectDescriptor],
        quality: Quality,
        size: ImageSize,
        reporter: &dyn Reporter,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<PassReport> {
        let Some(provider) = self.providers.edit(&self.edit_model.provider) else {
            bail!("no edit provider '{}' registered", self.edit_model.provider);
        };
        let mut orchestrator =
            GenerationOrchestrator::new(ObjectSynthesizer::new(provider, self.edit_model.name.clone()))
                .with_delay(self.item_delay);
        if let Some(cancel) = cancel {
            orchestrator = orchestrator.with_cancel_flag(cancel);
        }
        Ok(orchestrator.run_into(results, source, selected, quality, size, reporter))
    }

    /// Bytes for download; `None` (with a report) when the fetch fails.
    pub fn fetch(
        &self,
        reference: &GeneratedImageReference,
        reporter: &dyn Reporter,
    ) -> Option<Vec<u8>> {
        match reference.materialize(&self.http) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                reporter.error(&err);
                None
            }
        }
    }
}

fn default_provider_registry(config: &ExtractorConfig, http: &HttpClient) -> ProviderRegistry {
    let mut providers = ProviderRegistry::new();
    providers.register_vision(DryrunProvider);
    providers.register_edit(DryrunProvider);
    if let Some(api_key) = config.api_key.as_deref() {
        providers.register_vision(OpenAiProvider::new(&config.api_base, api_key, http.clone()));
        providers.register_edit(OpenAiProvider::new(&config.api_base, api_key, http.clone()));
    }
    providers
}

fn resolve_model(
    selector: &ModelSelector,
    providers: &ProviderRegistry,
    requested: Option<&str>,
    capability: &str,
) -> Result<ModelSpec> {
    let selection = selector.select(requested, capability)?;
    let registered = match capability {
        CAPABILITY_VISION => providers.vision(&selection.model.provider).is_some(),
        _ => providers.edit(&selection.model.provider).is_some(),
    };
    if !registered {
        let hint = if selection.model.provider == "openai" {
            " (set OPENAI_API_KEY or use the dryrun models)"
        } else {
            ""
        };
        bail!(
            "{capability} model '{}' needs provider '{}', which is not configured{hint}",
            selection.model.name,
            selection.model.provider
        );
    }
    Ok(selection.model)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use extractor_contracts::{ImageSize, Quality, ResultCollection};

    use super::{ExtractorConfig, ExtractorEngine, Materialize, MemoryReporter};
    use crate::codec::tests::sample_image;

    fn dryrun_config() -> ExtractorConfig {
        ExtractorConfig {
            vision_model: Some("dryrun-vision-1".to_string()),
            edit_model: Some("dryrun-edit-1".to_string()),
            item_delay: Duration::ZERO,
            ..ExtractorConfig::default()
        }
    }

    #[test]
    fn dryrun_engine_detects_generates_and_fetches() -> anyhow::Result<()> {
        let engine = ExtractorEngine::new(&dryrun_config())?;
        let reporter = MemoryReporter::new();
        let image = sample_image();

        let descriptors = engine.detect(&image, &reporter);
        assert_eq!(descriptors.len(), 2);

        let mut results = ResultCollection::new();
        let report = engine.generate(
            &mut results,
            &image,
            &descriptors,
            Quality::Low,
            ImageSize::Square,
            &reporter,
            None,
        )?;
        assert_eq!(report.succeeded.len(), 2);
        assert!(reporter.errors().is_empty());

        for (_, reference) in results.iter() {
            let bytes = engine.fetch(reference, &reporter).unwrap_or_default();
            let decoded = image::load_from_memory(&bytes)?;
            assert_eq!(decoded.width(), 1024);
            assert_eq!(reference.materialize(engine.http())?, bytes);
        }
        Ok(())
    }

    #[test]
    fn openai_models_require_a_credential() {
        let err = ExtractorEngine::new(&ExtractorConfig::default())
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("vision model 'gpt-4o' needs provider 'openai'"));
        assert!(err.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn credential_enables_openai_defaults() -> anyhow::Result<()> {
        let config = ExtractorConfig {
            api_key: Some("sk-test".to_string()),
            ..ExtractorConfig::default()
        };
        let engine = ExtractorEngine::new(&config)?;
        assert_eq!(engine.vision_model().name, "gpt-4o");
        assert_eq!(engine.edit_model().name, "gpt-image-1");
        Ok(())
    }

    #[test]
    fn unknown_model_is_refused_instead_of_substituted() {
        let config = ExtractorConfig {
            api_key: Some("sk-test".to_string()),
            edit_model: Some("dall-e-2".to_string()),
            ..ExtractorConfig::default()
        };
        let err = ExtractorEngine::new(&config)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.starts_with("unknown edit model 'dall-e-2'"));
        assert!(err.contains("gpt-image-1"));
    }
}
