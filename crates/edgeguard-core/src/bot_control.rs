//! Built-in automated-traffic classifier.
//!
//! The `bot-control` group is a sub-classifier reached through delegation.
//! Its rules inspect request signals that indicate automated clients. Every
//! rule natively blocks; callers usually override the individual actions
//! (for example to `challenge` on API traffic).

use crate::condition::{Condition, Field, MatchOperator, MatchStatement, TextTransform};
use crate::request::LABEL_VOLUMETRIC_SESSION;
use crate::rule_engine::{Action, Rule, RuleGroup};

/// Name of the built-in group.
pub const BOT_CONTROL_GROUP: &str = "bot-control";

/// A session issued an unusually high number of requests.
pub const TGT_VOLUMETRIC_SESSION: &str = "TGT_VolumetricSession";

/// The client advertises browser automation.
pub const TGT_SIGNAL_AUTOMATED_BROWSER: &str = "TGT_SignalAutomatedBrowser";

/// The client claims to be a browser but its headers disagree.
pub const TGT_SIGNAL_BROWSER_INCONSISTENCY: &str = "TGT_SignalBrowserInconsistency";

/// User-agent fragments left by common automation frameworks (lowercase).
const AUTOMATION_MARKERS: &[&str] = &[
    "headlesschrome",
    "phantomjs",
    "selenium",
    "webdriver",
    "puppeteer",
    "playwright",
];

fn user_agent_contains_lower(fragment: &str) -> Condition {
    Condition::Match(
        MatchStatement::new(
            Field::header("User-Agent"),
            MatchOperator::Contains,
            fragment,
        )
        .with_transform(TextTransform::Lowercase),
    )
}

/// Builds the `bot-control` group.
pub fn bot_control_group() -> RuleGroup {
    let automated_browser = Condition::Or(
        AUTOMATION_MARKERS
            .iter()
            .map(|marker| user_agent_contains_lower(marker))
            .collect(),
    );

    // A browser user agent always sends an Accept header, and Chromium
    // browsers always send client hints.
    let browser_inconsistency = Condition::And(vec![
        Condition::header("User-Agent", MatchOperator::StartsWith, "Mozilla/"),
        Condition::Or(vec![
            Condition::negate(Condition::header("Accept", MatchOperator::Contains, "/")),
            Condition::And(vec![
                Condition::header("User-Agent", MatchOperator::Contains, "Chrome/"),
                Condition::negate(Condition::header("Sec-CH-UA", MatchOperator::Contains, ";v=")),
            ]),
        ]),
    ]);

    RuleGroup::new(
        BOT_CONTROL_GROUP,
        vec![
            Rule::new(
                TGT_VOLUMETRIC_SESSION,
                0,
                Condition::label(LABEL_VOLUMETRIC_SESSION),
                Action::Block,
            ),
            Rule::new(
                TGT_SIGNAL_AUTOMATED_BROWSER,
                10,
                automated_browser,
                Action::Block,
            ),
            Rule::new(
                TGT_SIGNAL_BROWSER_INCONSISTENCY,
                20,
                browser_inconsistency,
                Action::Block,
            ),
        ],
    )
}
