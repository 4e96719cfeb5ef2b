//! Keyword intent routing.
//!
//! Matches user text against configured trigger phrases. An exact match
//! (after normalization) scores 1.0; a phrase contained in a longer
//! utterance scores by how much of the utterance it covers, so "what time
//! is it" inside a long rambling question does not short-circuit the model.

use crate::collaborator::{CannedAnswer, IntentRouter, RouteMatch};
use crate::config::{CannedIntent, RoutingConfig};
use crate::error::VoiceError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
struct CompiledIntent {
    intent: CannedIntent,
    phrases: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct KeywordRouter {
    intents: Vec<CompiledIntent>,
    artifacts_dir: PathBuf,
}

/// Lowercases and drops everything that is neither a letter nor a digit.
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

impl KeywordRouter {
    pub fn new(config: &RoutingConfig, artifacts_dir: impl AsRef<Path>) -> Self {
        let intents = config
            .intents
            .iter()
            .filter(|i| i.answer_text.is_some() || i.audio_path.is_some())
            .map(|intent| CompiledIntent {
                phrases: intent
                    .phrases
                    .iter()
                    .map(|p| normalize(p))
                    .filter(|p| !p.is_empty())
                    .collect(),
                intent: intent.clone(),
            })
            .collect();
        Self {
            intents,
            artifacts_dir: artifacts_dir.as_ref().to_path_buf(),
        }
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    fn best_match(&self, text: &str) -> Option<(&CannedIntent, f32)> {
        let query = normalize(text);
        if query.is_empty() {
            return None;
        }
        let query_len = query.chars().count() as f32;
        let mut best: Option<(&CannedIntent, f32)> = None;
        for compiled in &self.intents {
            for phrase in &compiled.phrases {
                let score = if *phrase == query {
                    1.0
                } else if query.contains(phrase.as_str()) {
                    phrase.chars().count() as f32 / query_len
                } else {
                    continue;
                };
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((&compiled.intent, score));
                }
            }
        }
        best
    }

    async fn answer_for(&self, intent: &CannedIntent) -> Result<CannedAnswer, VoiceError> {
        if let Some(path) = &intent.audio_path {
            let full = if Path::new(path).is_absolute() {
                PathBuf::from(path)
            } else {
                self.artifacts_dir.join(path)
            };
            let bytes = tokio::fs::read(&full).await.map_err(|e| {
                VoiceError::Routing(format!("failed to read artifact {:?}: {}", full, e))
            })?;
            return Ok(CannedAnswer::Audio {
                bytes,
                format: intent.audio_format,
            });
        }
        match &intent.answer_text {
            Some(text) => Ok(CannedAnswer::Text(text.clone())),
            None => Err(VoiceError::Routing(format!(
                "intent {} has no answer",
                intent.category
            ))),
        }
    }
}

#[async_trait]
impl IntentRouter for KeywordRouter {
    async fn route(&self, text: &str) -> Result<Option<RouteMatch>, VoiceError> {
        let Some((intent, confidence)) = self.best_match(text) else {
            return Ok(None);
        };
        let answer = self.answer_for(intent).await?;
        tracing::debug!(
            category = %intent.category,
            confidence,
            "intent matched"
        );
        Ok(Some(RouteMatch {
            category: intent.category.clone(),
            answer,
            confidence,
        }))
    }
}
