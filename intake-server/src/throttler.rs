//! Rule-based throttling of incoming crash reports.
//!
//! The throttler decides which crashes to accept (save and process), defer
//! (save, but don't process), and reject. Rules are an ordered list; the
//! first matching rule decides, except for rules with a
//! [`Continue`](Verdict::Continue) verdict which fall through to the next
//! rule. When no rule matches, the crash is rejected.
//!
//! Rule sets are compiled in and selected by name through
//! `BREAKPAD_THROTTLER_RULES`. The predicate vocabulary covers equality,
//! regex, membership in a constant set and logical AND; a handful of built-in
//! rules use native predicate functions where that vocabulary is not enough.

use intake_config::{BreakpadConfig, ProductsConfig};
use rand::Rng;
use regex::Regex;

use crate::constants::THROTTLEABLE_FIELD;
use crate::report::Annotations;

/// The routing decision for a crash report.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// Save and publish for processing. The id encodes `0`.
    Accept,
    /// Save, but do not publish. The id encodes `1`.
    Defer,
    /// Do not save; respond with a rejection body.
    Reject,
    /// Return a crash id to the client, then drop the crash.
    ///
    /// Used to pacify clients that retry forever on rejection.
    FakeAccept,
    /// No decision; evaluation proceeds to the next rule.
    Continue,
}

impl Verdict {
    /// Short lowercase name, used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Defer => "defer",
            Self::Reject => "reject",
            Self::FakeAccept => "fakeaccept",
            Self::Continue => "continue",
        }
    }
}

/// Outcome of a matching rule.
#[derive(Clone, Copy, Debug)]
pub enum Outcome {
    /// Every matching crash gets this verdict.
    Fixed(Verdict),
    /// Matching crashes are sampled.
    ///
    /// A random number in `[0, 100)` is drawn; values up to `rate` yield
    /// `hit`, everything else yields `miss`.
    Sampled {
        /// Sampling percentage.
        rate: u8,
        /// Verdict for sampled-in crashes.
        hit: Verdict,
        /// Verdict for sampled-out crashes.
        miss: Verdict,
    },
}

/// A predicate over crash annotations.
///
/// Conditions addressing a specific annotation never match when that
/// annotation is absent.
pub enum Condition {
    /// Matches every crash.
    Always,
    /// The annotation is present, with any value.
    Present {
        /// Annotation name.
        key: &'static str,
    },
    /// The annotation equals a constant.
    Equals {
        /// Annotation name.
        key: &'static str,
        /// Expected value.
        value: &'static str,
    },
    /// The annotation matches a regular expression.
    Matches {
        /// Annotation name.
        key: &'static str,
        /// The pattern to search for.
        regex: Regex,
    },
    /// The annotation is one of a constant set of values.
    OneOf {
        /// Annotation name.
        key: &'static str,
        /// Accepted values.
        values: &'static [&'static str],
    },
    /// All inner conditions match.
    All(Vec<Condition>),
    /// A native predicate, for rules the declarative vocabulary cannot
    /// express.
    Native(fn(&Throttler, &Annotations) -> bool),
}

impl Condition {
    fn matches(&self, throttler: &Throttler, annotations: &Annotations) -> bool {
        match self {
            Self::Always => true,
            Self::Present { key } => annotations.contains_key(*key),
            Self::Equals { key, value } => {
                annotations.get(*key).is_some_and(|v| v == value)
            }
            Self::Matches { key, regex } => {
                annotations.get(*key).is_some_and(|v| regex.is_match(v))
            }
            Self::OneOf { key, values } => annotations
                .get(*key)
                .is_some_and(|v| values.contains(&v.as_str())),
            Self::All(conditions) => conditions
                .iter()
                .all(|condition| condition.matches(throttler, annotations)),
            Self::Native(predicate) => predicate(throttler, annotations),
        }
    }
}

/// A single throttle rule.
pub struct Rule {
    /// Friendly name, used for logging and statsd.
    pub name: &'static str,
    /// When this rule applies.
    pub condition: Condition,
    /// What happens when it does.
    pub outcome: Outcome,
}

/// Result of throttling one crash report.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThrottleResult {
    /// The decision.
    pub verdict: Verdict,
    /// Name of the rule that decided.
    pub rule: &'static str,
    /// Sampling percentage of the deciding rule; 100 for fixed verdicts.
    pub percentage: u8,
}

/// Error returned for an unknown rule set name.
#[derive(Debug, thiserror::Error)]
#[error("unknown throttle rule set {0:?}, expected one of: mozilla, accept_all")]
pub struct UnknownRuleSet(pub String);

/// Accepts or rejects incoming crashes based on the configured rule set.
pub struct Throttler {
    rules: Vec<Rule>,
    products: Vec<String>,
}

impl std::fmt::Debug for Throttler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field(
                "rules",
                &self.rules.iter().map(|rule| rule.name).collect::<Vec<_>>(),
            )
            .field("products", &self.products)
            .finish()
    }
}

impl Throttler {
    /// Builds a throttler from collector policy configuration.
    pub fn from_config(config: &BreakpadConfig) -> Result<Self, UnknownRuleSet> {
        let rules = rule_set(&config.throttler_rules)
            .ok_or_else(|| UnknownRuleSet(config.throttler_rules.clone()))?;

        let products = match &config.throttler_products {
            ProductsConfig::Mozilla => {
                MOZILLA_PRODUCTS.iter().map(|s| (*s).to_owned()).collect()
            }
            ProductsConfig::All => Vec::new(),
            ProductsConfig::List(products) => products.clone(),
        };

        Ok(Self { rules, products })
    }

    /// Builds a throttler from an explicit rule list, for tests.
    #[cfg(test)]
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            products: Vec::new(),
        }
    }

    /// Products this collector ingests; empty means all.
    pub fn products(&self) -> &[String] {
        &self.products
    }

    /// Walks the rule set and decides how to route a crash.
    pub fn throttle(&self, annotations: &Annotations) -> ThrottleResult {
        // Crash reports submitted through about:crashes are never throttled.
        if annotations.get(THROTTLEABLE_FIELD).map(String::as_str) == Some("0") {
            return ThrottleResult {
                verdict: Verdict::Accept,
                rule: "has_throttleable_0",
                percentage: 100,
            };
        }

        for rule in &self.rules {
            if !rule.condition.matches(self, annotations) {
                continue;
            }

            match rule.outcome {
                Outcome::Fixed(Verdict::Continue) => continue,
                Outcome::Fixed(verdict) => {
                    return ThrottleResult {
                        verdict,
                        rule: rule.name,
                        percentage: 100,
                    }
                }
                Outcome::Sampled { rate, hit, miss } => {
                    let roll = rand::thread_rng().gen_range(0.0..100.0);
                    let verdict = if roll <= f64::from(rate) { hit } else { miss };
                    return ThrottleResult {
                        verdict,
                        rule: rule.name,
                        percentage: rate,
                    };
                }
            }
        }

        ThrottleResult {
            verdict: Verdict::Reject,
            rule: "no_match",
            percentage: 0,
        }
    }
}

/// Looks up a compiled-in rule set by name.
fn rule_set(name: &str) -> Option<Vec<Rule>> {
    match name {
        "mozilla" => Some(mozilla_rules()),
        "accept_all" => Some(accept_all_rules()),
        _ => None,
    }
}

/// Products this collector supports by default. These have to match the
/// `ProductName` of the incoming crash report.
const MOZILLA_PRODUCTS: &[&str] = &[
    "Firefox",
    "Fennec",
    "FirefoxReality",
    "Focus",
    "GeckoViewExample",
    "ReferenceBrowser",
    "Thunderbird",
    "SeaMonkey",
];

/// Rule set that accepts every incoming crash.
fn accept_all_rules() -> Vec<Rule> {
    vec![Rule {
        name: "accept_everything",
        condition: Condition::Always,
        outcome: Outcome::Fixed(Verdict::Accept),
    }]
}

/// Matches crashes we need to filter out due to the infobar bug.
fn match_infobar_true(_throttler: &Throttler, annotations: &Annotations) -> bool {
    let product = annotations.get("ProductName").map(String::as_str);
    let infobar = annotations.get("SubmittedFromInfobar").map(String::as_str);
    let version = annotations.get("Version").map(String::as_str).unwrap_or("");
    let buildid = annotations.get("BuildID").map(String::as_str).unwrap_or("");

    if version.is_empty() || buildid.is_empty() {
        return false;
    }

    product == Some("Firefox")
        && infobar == Some("true")
        && ["52.", "53.", "54.", "55.", "56.", "57.", "58.", "59."]
            .iter()
            .any(|prefix| version.starts_with(prefix))
        && buildid < "20171226"
}

/// The browser side of multi-submission hang crashes is redundant.
fn match_hangid_and_browser(_throttler: &Throttler, annotations: &Annotations) -> bool {
    annotations.contains_key("HangID")
        && annotations
            .get("ProcessType")
            .map(String::as_str)
            .unwrap_or("browser")
            == "browser"
}

/// B2G doesn't handle rejection well and will retry ad infinitum.
fn match_b2g(throttler: &Throttler, annotations: &Annotations) -> bool {
    !throttler.products().iter().any(|p| p == "B2G")
        && annotations
            .get("ProductName")
            .is_some_and(|p| p.eq_ignore_ascii_case("b2g"))
}

/// Crash reports for products not in the supported list are rejected. Does
/// nothing when the product list is empty.
fn match_unsupported_product(throttler: &Throttler, annotations: &Annotations) -> bool {
    let products = throttler.products();
    if products.is_empty() {
        return false;
    }

    match annotations.get("ProductName") {
        Some(product) => !products.iter().any(|p| p == product),
        None => true,
    }
}

/// Rule set for the production crash collector.
fn mozilla_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "has_hangid_and_browser",
            condition: Condition::Native(match_hangid_and_browser),
            outcome: Outcome::Fixed(Verdict::Reject),
        },
        Rule {
            name: "infobar_is_true",
            condition: Condition::Native(match_infobar_true),
            outcome: Outcome::Fixed(Verdict::Reject),
        },
        Rule {
            name: "b2g",
            condition: Condition::Native(match_b2g),
            outcome: Outcome::Fixed(Verdict::FakeAccept),
        },
        Rule {
            name: "unsupported_product",
            condition: Condition::Native(match_unsupported_product),
            outcome: Outcome::Fixed(Verdict::Reject),
        },
        Rule {
            name: "has_comments",
            condition: Condition::Present { key: "Comments" },
            outcome: Outcome::Fixed(Verdict::Accept),
        },
        Rule {
            name: "has_email",
            condition: Condition::Matches {
                key: "Email",
                regex: Regex::new("@").expect("valid regex"),
            },
            outcome: Outcome::Fixed(Verdict::Accept),
        },
        Rule {
            name: "is_alpha_beta_esr",
            condition: Condition::OneOf {
                key: "ReleaseChannel",
                values: &["aurora", "beta", "esr"],
            },
            outcome: Outcome::Fixed(Verdict::Accept),
        },
        Rule {
            name: "is_nightly",
            condition: Condition::Matches {
                key: "ReleaseChannel",
                regex: Regex::new("^nightly").expect("valid regex"),
            },
            outcome: Outcome::Fixed(Verdict::Accept),
        },
        Rule {
            name: "is_firefox_desktop",
            condition: Condition::All(vec![
                Condition::Equals {
                    key: "ProductName",
                    value: "Firefox",
                },
                Condition::Equals {
                    key: "ReleaseChannel",
                    value: "release",
                },
            ]),
            outcome: Outcome::Sampled {
                rate: 10,
                hit: Verdict::Accept,
                miss: Verdict::Reject,
            },
        },
        Rule {
            name: "accept_everything",
            condition: Condition::Always,
            outcome: Outcome::Fixed(Verdict::Accept),
        },
    ]
}
