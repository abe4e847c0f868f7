//! Scripted AI classifier

use async_trait::async_trait;
use payee_resolver::{AiClassification, PayeeClassifier, PayeeType, ResolutionError, ResolutionResult};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns a fixed label per original name, a default label otherwise
pub struct ScriptedClassifier {
    labels: HashMap<String, AiClassification>,
    default: AiClassification,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    /// Everything is a Business at 0.9 unless scripted otherwise
    pub fn businesses() -> Self {
        Self {
            labels: HashMap::new(),
            default: label(PayeeType::Business, 0.9),
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, name: &str, payee_type: PayeeType, confidence: f64) -> Self {
        self.labels.insert(name.to_string(), label(payee_type, confidence));
        self
    }

    pub fn failing_on(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn label(payee_type: PayeeType, confidence: f64) -> AiClassification {
    AiClassification {
        payee_type,
        confidence,
        reasoning: format!("scripted {:?}", payee_type),
    }
}

#[async_trait]
impl PayeeClassifier for ScriptedClassifier {
    async fn classify(&self, name: &str) -> ResolutionResult<AiClassification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(name) {
            return Err(ResolutionError::Classifier("model timeout".to_string()));
        }
        Ok(self.labels.get(name).cloned().unwrap_or_else(|| self.default.clone()))
    }
}
