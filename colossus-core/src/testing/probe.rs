use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use colossus_model::Context;

use crate::error::StickyHostError;
use crate::sticky::{AvailabilityProbe, HostAvailability};

#[derive(Debug, Clone)]
enum Answer {
    Host { host: String, score: f64 },
    Fail,
}

/// Probe with canned answers per candidate index (the hint's trailing
/// number). Unknown indexes fail.
#[derive(Debug, Clone, Default)]
pub struct FixedProbe {
    answers: HashMap<u32, Answer>,
    delays: HashMap<u32, Duration>,
}

impl FixedProbe {
    pub fn respond(mut self, index: u32, host: &str, score: f64) -> Self {
        self.answers.insert(
            index,
            Answer::Host {
                host: host.to_owned(),
                score,
            },
        );
        self
    }

    pub fn fail(mut self, index: u32) -> Self {
        self.answers.insert(index, Answer::Fail);
        self
    }

    /// Delays the answer for `index` by `delay`.
    pub fn delay(mut self, index: u32, delay: Duration) -> Self {
        self.delays.insert(index, delay);
        self
    }
}

#[async_trait]
impl AvailabilityProbe for FixedProbe {
    async fn probe(
        &self,
        _ctx: &Context,
        resource: &str,
        hint: &str,
    ) -> Result<HostAvailability, StickyHostError> {
        let index = hint
            .rsplit_once(':')
            .and_then(|(_, index)| index.parse::<u32>().ok());
        let Some(index) = index else {
            return Err(StickyHostError::MissingHost(resource.to_owned()));
        };

        if let Some(delay) = self.delays.get(&index) {
            tokio::time::sleep(*delay).await;
        }
        match self.answers.get(&index) {
            Some(Answer::Host { host, score }) => Ok(HostAvailability {
                host: host.clone(),
                hostname: format!("{host}.internal"),
                score: *score,
                hint: hint.to_owned(),
            }),
            Some(Answer::Fail) | None => Err(StickyHostError::MissingHost(resource.to_owned())),
        }
    }
}
