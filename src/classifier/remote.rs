//! Remote HTTP classifier
//!
//! POSTs the reading as JSON to a model service. The service answers either
//! with a probability map (`{"probabilities": {"dirty": 0.8, ...}}`) or with
//! a single prediction (`{"label": "dirty", "confidence": 0.8}`), in which
//! case the remaining mass is spread over the other concrete labels.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{Classifier, ClassifierError};
use crate::types::{Label, Reading};

#[derive(Debug, Deserialize)]
struct RemoteResponse {
    #[serde(default)]
    probabilities: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Classifier served over HTTP.
#[derive(Debug, Clone)]
pub struct RemoteClassifier {
    name: String,
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl RemoteClassifier {
    pub fn new(
        name: impl Into<String>,
        endpoint: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClassifierError> {
        let name = name.into();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifierError::failure(&name, format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            name,
            http,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }

    fn interpret(&self, response: RemoteResponse) -> Result<BTreeMap<Label, f64>, ClassifierError> {
        if let Some(raw) = response.probabilities {
            let mut out = BTreeMap::new();
            for (key, p) in raw {
                match key.parse::<Label>() {
                    Ok(label) => *out.entry(label).or_insert(0.0) += p,
                    Err(e) => tracing::debug!(model = %self.name, error = %e, "Ignoring unknown class"),
                }
            }
            return Ok(out);
        }

        let (Some(label), Some(confidence)) = (response.label, response.confidence) else {
            return Err(ClassifierError::failure(&self.name, "response has neither probabilities nor label"));
        };
        let label = label
            .parse::<Label>()
            .map_err(|e| ClassifierError::failure(&self.name, e))?;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(ClassifierError::failure(&self.name, format!("confidence {confidence} out of range")));
        }

        let others: Vec<Label> = Label::ALL
            .iter()
            .copied()
            .filter(|l| *l != label && *l != Label::Unknown)
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let share = (1.0 - confidence) / others.len().max(1) as f64;
        let mut out: BTreeMap<Label, f64> = others.into_iter().map(|l| (l, share)).collect();
        out.insert(label, confidence);
        Ok(out)
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn predict(&self, reading: &Reading) -> Result<BTreeMap<Label, f64>, ClassifierError> {
        let mut request = self.http.post(&self.endpoint).json(reading);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClassifierError::failure(&self.name, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::failure(&self.name, format!("server returned {status}")));
        }
        let body: RemoteResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::failure(&self.name, format!("bad response body: {e}")))?;
        self.interpret(body)
    }
}
