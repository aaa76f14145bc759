//! Label matching for silences.
//!
//! Matchers are compiled once, when a silence is validated or enters the
//! cache, and alert filtering only ever evaluates [`CompiledSilence`]s.
//! Evaluation is pure: no time dependence and no side effects.
//!
//! The free function [`matches`] is for one-off checks such as previewing
//! which alerts a draft silence would catch. It compiles on every call and
//! is not used on the filtering path.

use regex::Regex;

use crate::error::{Result, SilenceError};
use crate::types::{Alert, Matcher, Silence};

/// A matcher with its regex (if any) compiled.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    label_name: String,
    value: String,
    regex: Option<Regex>,
    is_equal: bool,
}

impl CompiledMatcher {
    /// Compiles a matcher.
    ///
    /// Regex patterns are anchored on both ends, so `payment-.*` matches
    /// `payment-api` but not `legacy-payment-api`.
    ///
    /// # Errors
    ///
    /// Returns `SilenceError::InvalidMatcher` if the label name is empty or
    /// the pattern does not compile.
    pub fn compile(matcher: &Matcher) -> Result<Self> {
        if matcher.label_name.is_empty() {
            return Err(SilenceError::InvalidMatcher {
                label: String::new(),
                reason: "label name cannot be empty".to_string(),
            });
        }

        let regex = if matcher.is_regex {
            let anchored = format!("^(?:{})$", matcher.value);
            let compiled = Regex::new(&anchored).map_err(|e| SilenceError::InvalidMatcher {
                label: matcher.label_name.clone(),
                reason: e.to_string(),
            })?;
            Some(compiled)
        } else {
            None
        };

        Ok(Self {
            label_name: matcher.label_name.clone(),
            value: matcher.value.clone(),
            regex,
            is_equal: matcher.is_equal,
        })
    }

    /// Returns the label this matcher inspects.
    #[must_use]
    pub fn label_name(&self) -> &str {
        &self.label_name
    }

    /// Evaluates the matcher against an alert's labels.
    #[must_use]
    pub fn matches(&self, alert: &Alert) -> bool {
        let label = alert.get(&self.label_name);

        match (&self.regex, label) {
            // An absent label never satisfies a positive equality matcher.
            (None, None) => !self.is_equal && !self.value.is_empty(),
            (None, Some(actual)) => (actual == self.value) == self.is_equal,
            (Some(regex), actual) => regex.is_match(actual.unwrap_or_default()) == self.is_equal,
        }
    }
}

/// The compiled, AND-composed matcher list of a silence.
#[derive(Debug, Clone)]
pub struct MatcherSet {
    matchers: Vec<CompiledMatcher>,
}

impl MatcherSet {
    /// Compiles every matcher of a list.
    ///
    /// # Errors
    ///
    /// Returns `SilenceError::InvalidSilence` if the list is empty, or the
    /// first `SilenceError::InvalidMatcher` encountered.
    pub fn compile(matchers: &[Matcher]) -> Result<Self> {
        if matchers.is_empty() {
            return Err(SilenceError::invalid("matchers cannot be empty"));
        }

        let matchers = matchers
            .iter()
            .map(CompiledMatcher::compile)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { matchers })
    }

    /// Returns true if every matcher matches the alert.
    #[must_use]
    pub fn matches(&self, alert: &Alert) -> bool {
        self.matchers.iter().all(|m| m.matches(alert))
    }

    /// Returns the number of matchers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    /// Always false for a successfully compiled set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

/// A silence paired with its compiled matchers.
///
/// Silences read back from the store are compiled when they enter the cache.
/// A record that fails to compile is kept, and reports an evaluation error
/// each time it is matched, so one bad record cannot hide the others.
#[derive(Debug, Clone)]
pub struct CompiledSilence {
    silence: Silence,
    matchers: std::result::Result<MatcherSet, String>,
}

impl CompiledSilence {
    /// Compiles the matchers of a silence.
    #[must_use]
    pub fn new(silence: Silence) -> Self {
        let matchers = MatcherSet::compile(&silence.matchers).map_err(|e| e.to_string());
        Self { silence, matchers }
    }

    /// Returns the silence.
    #[must_use]
    pub const fn silence(&self) -> &Silence {
        &self.silence
    }

    /// Returns the silence ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.silence.id
    }

    /// Returns true if the matchers compiled.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.matchers.is_ok()
    }

    /// Evaluates the silence's matchers against an alert.
    ///
    /// # Errors
    ///
    /// Returns `SilenceError::MatcherEvaluation` if the stored matchers do
    /// not compile.
    pub fn matches(&self, alert: &Alert) -> Result<bool> {
        match &self.matchers {
            Ok(set) => Ok(set.matches(alert)),
            Err(reason) => Err(SilenceError::MatcherEvaluation {
                id: self.silence.id.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

/// Decides whether a silence applies to an alert.
///
/// Compiles the matchers on every call, so it suits one-off checks only.
/// Anything evaluating the same silence repeatedly should hold a
/// [`CompiledSilence`].
///
/// # Errors
///
/// Returns `SilenceError::MatcherEvaluation` if the silence's matchers do not
/// compile.
pub fn matches(alert: &Alert, silence: &Silence) -> Result<bool> {
    let set = MatcherSet::compile(&silence.matchers).map_err(|e| {
        SilenceError::MatcherEvaluation {
            id: silence.id.clone(),
            reason: e.to_string(),
        }
    })?;
    Ok(set.matches(alert))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use test_case::test_case;

    fn silence_with(matchers: Vec<Matcher>) -> Silence {
        let mut silence = Silence::new(
            matchers,
            Utc::now() - ChronoDuration::hours(1),
            Utc::now() + ChronoDuration::hours(1),
            "admin",
            "test",
        )
        .unwrap();
        silence.id = "s-1".to_string();
        silence
    }

    mod single_matcher_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(Matcher::equal("env", "prod"), Some("prod"), true ; "equal match")]
        #[test_case(Matcher::equal("env", "prod"), Some("dev"), false ; "equal mismatch")]
        #[test_case(Matcher::equal("env", "prod"), None, false ; "equal absent")]
        #[test_case(Matcher::equal("env", ""), None, false ; "equal empty absent")]
        #[test_case(Matcher::not_equal("env", "prod"), Some("dev"), true ; "not equal match")]
        #[test_case(Matcher::not_equal("env", "prod"), Some("prod"), false ; "not equal mismatch")]
        #[test_case(Matcher::not_equal("env", "prod"), None, true ; "not equal absent")]
        #[test_case(Matcher::regex("service", "payment-.*"), Some("payment-api"), true ; "regex match")]
        #[test_case(Matcher::regex("service", "payment-.*"), Some("checkout-api"), false ; "regex mismatch")]
        #[test_case(Matcher::regex("service", "payment-.*"), Some("legacy-payment-api"), false ; "regex anchored")]
        #[test_case(Matcher::regex("service", ".*"), None, true ; "regex absent empty match")]
        #[test_case(Matcher::not_regex("service", "payment-.*"), Some("checkout-api"), true ; "not regex match")]
        #[test_case(Matcher::not_regex("service", "payment-.*"), Some("payment-api"), false ; "not regex mismatch")]
        fn evaluate(matcher: Matcher, label: Option<&str>, expected: bool) {
            let compiled = CompiledMatcher::compile(&matcher).unwrap();
            let alert = match label {
                Some(value) => Alert::new().label(matcher.label_name.clone(), value),
                None => Alert::new().label("unrelated", "x"),
            };
            assert_eq!(compiled.matches(&alert), expected);
        }

        #[test]
        fn bad_regex_rejected() {
            let result = CompiledMatcher::compile(&Matcher::regex("service", "payment-("));
            match result {
                Err(SilenceError::InvalidMatcher { label, .. }) => assert_eq!(label, "service"),
                _ => panic!("expected InvalidMatcher error"),
            }
        }

        #[test]
        fn empty_label_name_rejected() {
            let result = CompiledMatcher::compile(&Matcher::equal("", "x"));
            assert!(matches!(result, Err(SilenceError::InvalidMatcher { .. })));
        }
    }

    mod set_tests {
        use super::*;

        #[test]
        fn empty_set_rejected() {
            assert!(matches!(
                MatcherSet::compile(&[]),
                Err(SilenceError::InvalidSilence { .. })
            ));
        }

        #[test]
        fn conjunction_requires_every_matcher() {
            let silence = silence_with(vec![
                Matcher::equal("alertname", "HighCPU"),
                Matcher::equal("env", "prod"),
            ]);

            let both = Alert::new().label("alertname", "HighCPU").label("env", "prod");
            let only_name = Alert::new().label("alertname", "HighCPU");
            let only_env = Alert::new().label("env", "prod");

            assert!(matches(&both, &silence).unwrap());
            assert!(!matches(&only_name, &silence).unwrap());
            assert!(!matches(&only_env, &silence).unwrap());
        }

        #[test]
        fn regex_silence_matches_service() {
            let silence = silence_with(vec![Matcher::regex("service", "payment-.*")]);

            let payment = Alert::new().label("service", "payment-api");
            let checkout = Alert::new().label("service", "checkout-api");

            assert!(matches(&payment, &silence).unwrap());
            assert!(!matches(&checkout, &silence).unwrap());
        }

        #[test]
        fn set_len() {
            let set = MatcherSet::compile(&[Matcher::equal("a", "1"), Matcher::equal("b", "2")])
                .unwrap();
            assert_eq!(set.len(), 2);
            assert!(!set.is_empty());
        }
    }

    mod compiled_silence_tests {
        use super::*;

        #[test]
        fn valid_silence_evaluates() {
            let compiled = CompiledSilence::new(silence_with(vec![Matcher::equal("env", "prod")]));
            assert!(compiled.is_valid());
            assert_eq!(compiled.id(), "s-1");
            assert!(compiled.matches(&Alert::new().label("env", "prod")).unwrap());
        }

        #[test]
        fn corrupt_silence_reports_evaluation_error() {
            let mut silence = silence_with(vec![Matcher::equal("env", "prod")]);
            silence.matchers = vec![Matcher::regex("env", "(")];

            let compiled = CompiledSilence::new(silence);
            assert!(!compiled.is_valid());
            match compiled.matches(&Alert::new().label("env", "prod")) {
                Err(SilenceError::MatcherEvaluation { id, .. }) => assert_eq!(id, "s-1"),
                _ => panic!("expected MatcherEvaluation error"),
            }
        }

        #[test]
        fn free_function_agrees_with_compiled() {
            let silence = silence_with(vec![
                Matcher::equal("alertname", "HighCPU"),
                Matcher::regex("env", "prod|staging"),
            ]);
            let compiled = CompiledSilence::new(silence.clone());

            for alert in [
                Alert::new().label("alertname", "HighCPU").label("env", "prod"),
                Alert::new().label("alertname", "HighCPU").label("env", "dev"),
                Alert::new().label("env", "staging"),
            ] {
                assert_eq!(
                    matches(&alert, &silence).unwrap(),
                    compiled.matches(&alert).unwrap()
                );
            }
        }

        #[test]
        fn free_function_reports_evaluation_error() {
            let mut silence = silence_with(vec![Matcher::equal("env", "prod")]);
            silence.matchers.clear();
            assert!(matches!(
                matches(&Alert::new(), &silence),
                Err(SilenceError::MatcherEvaluation { .. })
            ));
        }
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn evaluation_is_deterministic(
                name in "[a-z]{1,8}",
                value in "[a-z0-9-]{0,12}",
                actual in "[a-z0-9-]{0,12}",
                is_regex: bool,
                is_equal: bool,
            ) {
                let matcher = Matcher { label_name: name.clone(), value, is_regex, is_equal };
                if let Ok(compiled) = CompiledMatcher::compile(&matcher) {
                    let alert = Alert::new().label(name, actual);
                    prop_assert_eq!(compiled.matches(&alert), compiled.matches(&alert));
                }
            }

            #[test]
            fn removing_a_required_label_flips_conjunction(
                a in "[a-z0-9]{1,8}",
                b in "[a-z0-9]{1,8}",
            ) {
                let silence = silence_with(vec![
                    Matcher::equal("first", a.clone()),
                    Matcher::equal("second", b.clone()),
                ]);
                let full = Alert::new().label("first", a.clone()).label("second", b.clone());
                prop_assert!(matches(&full, &silence).unwrap());
                prop_assert!(!matches(&Alert::new().label("first", a), &silence).unwrap());
                prop_assert!(!matches(&Alert::new().label("second", b), &silence).unwrap());
            }

            #[test]
            fn negation_inverts_present_label(
                value in "[a-z]{1,6}",
                actual in "[a-z]{1,6}",
            ) {
                let positive = CompiledMatcher::compile(&Matcher::equal("k", value.clone())).unwrap();
                let negative = CompiledMatcher::compile(&Matcher::not_equal("k", value)).unwrap();
                let alert = Alert::new().label("k", actual);
                prop_assert_ne!(positive.matches(&alert), negative.matches(&alert));
            }
        }
    }
}
