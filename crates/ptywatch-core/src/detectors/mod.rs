mod common;
mod pack;
mod pattern;
mod remote;

pub use pack::{ClassifierPack, PackExample, PackRegistry, PackSource};
pub use pattern::{PatternClassifier, NO_MATCH_SUMMARY};
pub use remote::{parse_completion, RemoteClassifier};

use std::future::Future;

use crate::agents::Verdict;
use crate::config::{ClassifierMode, ClassifierSettings};

/// Turns a stabilized snapshot into a verdict
///
/// Implementations never fail: anything that goes wrong is folded into the
/// returned verdict.
pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        snapshot: &str,
        pack: &ClassifierPack,
    ) -> impl Future<Output = Verdict> + Send;
}

/// Classification strategy chosen once at startup
pub enum ClassifierDispatcher {
    Remote(RemoteClassifier),
    Pattern(PatternClassifier),
}

impl ClassifierDispatcher {
    /// Select the strategy from configuration and credential availability
    pub fn from_settings(settings: &ClassifierSettings) -> Self {
        let api_key = settings.resolve_api_key();
        match (settings.mode, api_key) {
            (ClassifierMode::Pattern, _) => Self::Pattern(PatternClassifier::new()),
            (ClassifierMode::Auto | ClassifierMode::Remote, Some(key)) => {
                Self::Remote(RemoteClassifier::new(settings, key))
            }
            (ClassifierMode::Remote, None) => {
                tracing::warn!(
                    env = %settings.api_key_env,
                    "Remote classifier requested but no API key found, using pattern classifier"
                );
                Self::Pattern(PatternClassifier::new())
            }
            (ClassifierMode::Auto, None) => Self::Pattern(PatternClassifier::new()),
        }
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            Self::Remote(remote) => format!("remote ({})", remote.model()),
            Self::Pattern(_) => "pattern".to_string(),
        }
    }
}

impl Classifier for ClassifierDispatcher {
    async fn classify(&self, snapshot: &str, pack: &ClassifierPack) -> Verdict {
        match self {
            Self::Remote(remote) => remote.classify(snapshot, pack).await,
            Self::Pattern(pattern) => pattern.classify(snapshot, pack).await,
        }
    }
}
