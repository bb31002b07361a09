use std::sync::Arc;

use litmus_core::registry::{StrategyContext, StrategyRegistry};
use litmus_core::strategy_api::Strategy;

mod stats;
mod text;

pub mod detectors;
pub mod entity;
pub mod fairness;
pub mod fluency;
pub mod hallucination;
pub mod llm_judge;
pub mod privacy;
pub mod similarity;
pub mod tat;
pub mod truthfulness;

#[cfg(test)]
mod testutil;

pub use stats::{pearson_correlation, weighted_harmonic_mean, GaussianKde};
pub use text::normalize_answer;

fn boxed<S: Strategy + 'static>(s: S) -> anyhow::Result<Arc<dyn Strategy>> {
    Ok(Arc::new(s))
}

/// Every built-in strategy under its canonical name plus the legacy aliases.
pub fn register_defaults(reg: &mut StrategyRegistry) {
    reg.register("bias_detection", |ctx| {
        boxed(detectors::BiasDetection::new(
            ctx.require_classifier()?,
            ctx.classifier_model("bias", detectors::BIAS_MODEL),
        ))
    })
    .register("toxicity_detection", |ctx| {
        boxed(detectors::ToxicityDetection::new(
            ctx.toxicity.clone(),
            ctx.classifier.clone(),
            ctx.classifier_model("toxicity", detectors::TOXICITY_MODEL),
        )?)
    })
    .register("safety_strategy", |ctx| {
        boxed(detectors::SafetyStrategy::new(ctx.require_gpu()?))
    })
    .register("entity_recognition", |ctx| {
        boxed(entity::EntityRecognition::new(ctx.embedder.clone()))
    })
    .register("fairness_stereotype_recognition", |ctx| {
        boxed(fairness::FairnessStereotype::new(
            ctx.classifier.clone(),
            ctx.classifier_model("stereotype", fairness::STEREOTYPE_MODEL),
        ))
    })
    .alias("fairness_stereotype_agreement", "fairness_stereotype_recognition")
    .alias("fairness_stereotype_query", "fairness_stereotype_recognition")
    .register("fairness_preference", |_| boxed(fairness::FairnessPreference::new()))
    .register("truthfulness_internal", |_| boxed(truthfulness::TruthfulnessInternal))
    .register("truthfulness_external", |ctx| {
        boxed(truthfulness::TruthfulnessExternal::new(ctx.require_llm()?))
    })
    .register("hallucination", |_| boxed(hallucination::Hallucination))
    .register("llm_judge", |ctx| boxed(llm_judge::LlmJudge::new(ctx.require_llm()?)))
    .register("fluency", |ctx| boxed(fluency::Fluency::new(ctx.require_gpu()?)))
    .alias("indian_language_fluency", "fluency")
    .register("grammatical_check", |ctx| {
        boxed(fluency::GrammaticalCheck::new(ctx.require_gpu()?))
    })
    .alias("indian_lang_grammatical_check", "grammatical_check")
    .register("tat_tpm_mvh", |ctx| boxed(tat::TatTpmMvh::new(ctx.log_dir.clone())))
    .register("privacy", |_| boxed(privacy::Privacy::new()))
    .register("similarity", |ctx| {
        boxed(similarity::Similarity::new(ctx.require_embedder()?))
    })
    .register("exact_match", |_| boxed(similarity::ExactMatch));
}

pub fn default_registry(ctx: StrategyContext) -> StrategyRegistry {
    let mut reg = StrategyRegistry::new(ctx);
    register_defaults(&mut reg);
    reg
}
