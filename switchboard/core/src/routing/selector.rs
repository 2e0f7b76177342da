//! Capability-based provider scoring

use crate::provider::{ProviderInfo, ProviderKind, RequiredCapabilities};

/// Score every compatible provider starts from
pub const BASE_SCORE: u32 = 100;

/// Added per required streaming/vision/tools capability the provider offers
pub const CAPABILITY_BONUS: u32 = 50;

/// Added when the provider is in the preferred list
pub const PREFERRED_BONUS: u32 = 200;

/// A compatible provider and its score
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// Provider tag
    pub kind: ProviderKind,
    /// Selection score, higher wins
    pub score: u32,
}

/// Ranks providers for a request's capability requirements
#[derive(Clone, Debug, Default)]
pub struct ProviderSelector {
    preferred: Vec<ProviderKind>,
}

impl ProviderSelector {
    /// Create a selector; duplicate preferences keep their first position
    pub fn new(preferred: impl IntoIterator<Item = ProviderKind>) -> Self {
        let mut ordered: Vec<ProviderKind> = Vec::new();
        for kind in preferred {
            if !ordered.contains(&kind) {
                ordered.push(kind);
            }
        }
        Self { preferred: ordered }
    }

    /// Preferred providers, most preferred first
    #[must_use]
    pub fn preferred(&self) -> &[ProviderKind] {
        &self.preferred
    }

    fn preference_rank(&self, kind: ProviderKind) -> usize {
        self.preferred
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(usize::MAX)
    }

    /// Score one provider, or `None` if it cannot serve the request
    #[must_use]
    pub fn score(&self, info: &ProviderInfo, required: &RequiredCapabilities) -> Option<u32> {
        if !required.is_satisfied_by(&info.capabilities) {
            return None;
        }
        let mut score = BASE_SCORE + CAPABILITY_BONUS * required.matched(&info.capabilities);
        if self.preferred.contains(&info.kind) {
            score += PREFERRED_BONUS;
        }
        Some(score)
    }

    /// Compatible providers, best first
    ///
    /// Ties go to the earlier preference, then to the lower provider tag, so
    /// the order is stable across calls.
    #[must_use]
    pub fn rank(&self, infos: &[ProviderInfo], required: &RequiredCapabilities) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = infos
            .iter()
            .filter_map(|info| {
                self.score(info, required).map(|score| Candidate {
                    kind: info.kind,
                    score,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| self.preference_rank(a.kind).cmp(&self.preference_rank(b.kind)))
                .then_with(|| a.kind.cmp(&b.kind))
        });
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderCapabilities;
    use pretty_assertions::assert_eq;

    fn info(kind: ProviderKind, streaming: bool, vision: bool) -> ProviderInfo {
        ProviderInfo::new(kind, kind.display_name(), "test").with_capabilities(
            ProviderCapabilities {
                streaming,
                vision,
                ..ProviderCapabilities::default()
            },
        )
    }

    #[test]
    fn test_incompatible_provider_scores_none() {
        let selector = ProviderSelector::default();
        let needs_vision = RequiredCapabilities {
            vision: true,
            ..RequiredCapabilities::default()
        };

        assert_eq!(selector.score(&info(ProviderKind::Kimi, true, false), &needs_vision), None);
        assert_eq!(
            selector.score(&info(ProviderKind::Google, false, true), &needs_vision),
            Some(BASE_SCORE + CAPABILITY_BONUS)
        );
    }

    #[test]
    fn test_preferred_outranks_better_match() {
        let selector = ProviderSelector::new([ProviderKind::Cohere]);
        let required = RequiredCapabilities {
            streaming: true,
            ..RequiredCapabilities::default()
        };
        let infos = [
            info(ProviderKind::Google, true, true),
            info(ProviderKind::Cohere, true, false),
            info(ProviderKind::Zhipu, false, false),
        ];

        let ranked = selector.rank(&infos, &required);
        assert_eq!(
            ranked,
            vec![
                Candidate {
                    kind: ProviderKind::Cohere,
                    score: BASE_SCORE + CAPABILITY_BONUS + PREFERRED_BONUS,
                },
                Candidate {
                    kind: ProviderKind::Google,
                    score: BASE_SCORE + CAPABILITY_BONUS,
                },
            ]
        );
    }

    #[test]
    fn test_ties_follow_preference_then_tag() {
        let selector = ProviderSelector::new([ProviderKind::Lambda, ProviderKind::Kimi, ProviderKind::Lambda]);
        assert_eq!(selector.preferred(), &[ProviderKind::Lambda, ProviderKind::Kimi]);

        let infos = [
            info(ProviderKind::Zhipu, false, false),
            info(ProviderKind::Kimi, false, false),
            info(ProviderKind::Lambda, false, false),
            info(ProviderKind::Alibaba, false, false),
        ];
        let order: Vec<_> = selector
            .rank(&infos, &RequiredCapabilities::default())
            .into_iter()
            .map(|c| c.kind)
            .collect();

        assert_eq!(
            order,
            vec![
                ProviderKind::Lambda,
                ProviderKind::Kimi,
                ProviderKind::Alibaba,
                ProviderKind::Zhipu,
            ]
        );
    }
}
