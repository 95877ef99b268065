use serde::{Deserialize, Serialize};

use crate::bank::QuestionBank;
use crate::similarity;

/// Tunables for intent resolution. The numeric defaults are heuristics
/// carried over verbatim; they are configuration, not derived values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Utterances with fewer chars than this use `short_ngram_len`.
    pub short_input_chars: usize,
    /// A best score must be strictly above this to count as a match.
    pub match_threshold: f64,
    pub ngram_len: usize,
    pub short_ngram_len: usize,
    pub fallback: String,
    pub follow_up: String,
    /// Answers containing any of these never get the follow-up line.
    pub follow_up_suppressors: Vec<String>,
    pub welcome: String,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            short_input_chars: 10,
            match_threshold: 0.5,
            ngram_len: 2,
            short_ngram_len: 1,
            fallback: "Sorry, I don't understand. Could you please rephrase your question?".into(),
            follow_up: "Can I help you with anything else?".into(),
            follow_up_suppressors: vec!["Sorry".into(), "No problem".into()],
            welcome: "Hi! I'm the Simdesk assistant. Ask me anything about running or saving simulations."
                .into(),
        }
    }
}

/// Outcome of matching one utterance against the bank.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Answer { index: usize, score: f64 },
    /// Nothing scored above the threshold. `best_score` is 0 for an empty bank.
    NoMatch { best_score: f64 },
}

/// Resolves free text to a bank answer. Holds no mutable state.
#[derive(Clone, Debug)]
pub struct Matcher {
    bank: QuestionBank,
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(bank: QuestionBank, config: MatcherConfig) -> Self {
        Self { bank, config }
    }

    pub fn with_defaults(bank: QuestionBank) -> Self {
        Self::new(bank, MatcherConfig::default())
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    fn ngram_len_for(&self, utterance: &str) -> usize {
        if utterance.chars().count() < self.config.short_input_chars {
            self.config.short_ngram_len
        } else {
            self.config.ngram_len
        }
    }

    pub fn resolve(&self, utterance: &str) -> Resolution {
        let n = self.ngram_len_for(utterance);

        let mut best: Option<(usize, f64)> = None;
        for (index, entry) in self.bank.entries().iter().enumerate() {
            let score = similarity::dice(utterance, &entry.question, n);
            // Strict comparison keeps the earliest entry on ties.
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((index, score)),
            }
        }

        match best {
            Some((index, score)) if score > self.config.match_threshold => {
                Resolution::Answer { index, score }
            }
            Some((_, score)) => Resolution::NoMatch { best_score: score },
            None => Resolution::NoMatch { best_score: 0.0 },
        }
    }

    /// The bare answer text for an utterance, or the fallback.
    pub fn answer(&self, utterance: &str) -> &str {
        let resolution = self.resolve(utterance);
        self.answer_for(&resolution)
    }

    fn answer_for(&self, resolution: &Resolution) -> &str {
        match resolution {
            Resolution::Answer { index, .. } => self
                .bank
                .get(*index)
                .map(|entry| entry.answer.as_str())
                .unwrap_or(&self.config.fallback),
            Resolution::NoMatch { .. } => &self.config.fallback,
        }
    }

    /// The answer with the follow-up policy applied.
    pub fn reply(&self, utterance: &str) -> String {
        let resolution = self.resolve(utterance);
        match &resolution {
            Resolution::Answer { index, score } => {
                tracing::debug!(index, score, "Utterance matched bank entry");
            }
            Resolution::NoMatch { best_score } => {
                tracing::debug!(best_score, "Utterance below match threshold");
            }
        }
        self.with_follow_up(self.answer_for(&resolution))
    }

    pub fn with_follow_up(&self, answer: &str) -> String {
        if self.suppresses_follow_up(answer) {
            answer.to_string()
        } else {
            format!("{answer}\n{}", self.config.follow_up)
        }
    }

    pub fn suppresses_follow_up(&self, answer: &str) -> bool {
        self.config
            .follow_up_suppressors
            .iter()
            .any(|marker| answer.contains(marker.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::QaPair;

    fn bank() -> QuestionBank {
        QuestionBank::new(vec![
            QaPair::new("How do I save a simulation?", "Press the save button under the chart."),
            QaPair::new("How do I log in?", "Use the login form with your username."),
            QaPair::new("Thank you", "No problem, happy to help!"),
            QaPair::new("What is starting capital?", "The amount you invest at the start."),
        ])
    }

    #[test]
    fn exact_question_always_selected() {
        let matcher = Matcher::with_defaults(bank());
        for (index, entry) in bank().entries().iter().enumerate() {
            match matcher.resolve(&entry.question) {
                Resolution::Answer { index: got, score } => {
                    assert_eq!(got, index);
                    assert!((score - 1.0).abs() < 1e-9);
                }
                other => panic!("expected answer for {:?}, got {other:?}", entry.question),
            }
        }
    }

    #[test]
    fn near_match_resolves() {
        let matcher = Matcher::with_defaults(bank());
        assert_eq!(
            matcher.answer("how can I save my simulation"),
            "Press the save button under the chart."
        );
    }

    #[test]
    fn gibberish_falls_back() {
        let matcher = Matcher::with_defaults(bank());
        let resolution = matcher.resolve("zzzz qqqq xxxx wwww");
        assert!(matches!(resolution, Resolution::NoMatch { .. }));
        assert_eq!(matcher.answer("zzzz qqqq xxxx wwww"), matcher.config().fallback);
    }

    #[test]
    fn empty_utterance_falls_back() {
        let matcher = Matcher::with_defaults(bank());
        assert_eq!(matcher.answer(""), matcher.config().fallback);
    }

    #[test]
    fn empty_bank_always_falls_back() {
        let matcher = Matcher::with_defaults(QuestionBank::empty());
        assert_eq!(matcher.resolve("anything"), Resolution::NoMatch { best_score: 0.0 });
        assert_eq!(matcher.answer("anything"), matcher.config().fallback);
    }

    #[test]
    fn ties_keep_earliest_entry() {
        let tied = QuestionBank::new(vec![
            QaPair::new("reset password", "first"),
            QaPair::new("reset password", "second"),
        ]);
        let matcher = Matcher::with_defaults(tied);
        for _ in 0..5 {
            assert_eq!(matcher.answer("reset my password"), "first");
        }
    }

    #[test]
    fn identical_question_wins_over_others() {
        let bank = QuestionBank::new(vec![
            QaPair::new("help me please now", "generic"),
            QaPair::new("help me", "exact"),
        ]);
        let matcher = Matcher::with_defaults(bank);
        assert_eq!(matcher.answer("help me"), "exact");
    }

    #[test]
    fn short_input_uses_short_ngram_len() {
        let matcher = Matcher::with_defaults(bank());
        assert_eq!(matcher.ngram_len_for("thanks"), 1);
        assert_eq!(matcher.ngram_len_for("123456789"), 1);
        assert_eq!(matcher.ngram_len_for("1234567890"), 2);
    }

    #[test]
    fn threshold_is_strict() {
        // "ab" vs "ac" with unigrams: one shared of four chars = 0.5 exactly.
        let bank = QuestionBank::new(vec![QaPair::new("ac", "never")]);
        let matcher = Matcher::with_defaults(bank);
        assert_eq!(matcher.resolve("ab"), Resolution::NoMatch { best_score: 0.5 });
    }

    #[test]
    fn follow_up_appended_once() {
        let matcher = Matcher::with_defaults(bank());
        let reply = matcher.reply("How do I log in?");
        assert_eq!(
            reply,
            "Use the login form with your username.\nCan I help you with anything else?"
        );
        assert_eq!(reply.matches(&matcher.config().follow_up).count(), 1);
    }

    #[test]
    fn follow_up_suppressed_for_no_problem() {
        let matcher = Matcher::with_defaults(bank());
        assert_eq!(matcher.reply("Thank you"), "No problem, happy to help!");
    }

    #[test]
    fn follow_up_suppressed_for_fallback() {
        let matcher = Matcher::with_defaults(bank());
        let reply = matcher.reply("zzzz qqqq xxxx wwww");
        assert_eq!(reply, matcher.config().fallback);
        assert!(!reply.contains(&matcher.config().follow_up));
    }

    #[test]
    fn resolution_never_out_of_range() {
        let matcher = Matcher::with_defaults(bank());
        for utterance in ["", "a", "save", "log in", "what capital", "?!", "how do i"] {
            if let Resolution::Answer { index, .. } = matcher.resolve(utterance) {
                assert!(index < bank().len());
            }
        }
    }
}
