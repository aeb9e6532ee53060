//! EdgeGuard Core - Rule evaluation, script injection, and provisioning logic.
//!
//! This crate provides the request-independent building blocks of the
//! EdgeGuard gateway:
//!
//! - [`rule_engine`]: prioritized rules with delegation to named groups
//! - [`bot_control`]: the built-in automated-traffic rule group
//! - [`transform`]: HTML rewriting that injects the challenge script
//! - [`provisioning`]: one-time script URL resolution and the readiness gate
//! - [`challenge_token`]: signed cookies proving a solved challenge

pub mod bot_control;
pub mod challenge_token;
pub mod condition;
pub mod provisioning;
pub mod request;
pub mod rule_engine;
pub mod transform;

pub use challenge_token::{ChallengeTokens, TokenError, TokenRejection, CHALLENGE_COOKIE};
pub use condition::{Condition, Field, MatchOperator, MatchStatement, TextTransform};
pub use provisioning::{
    ConfigGate, ConfigResolver, HttpVerificationService, ProvisioningError, ResolvedConfig,
    StaticVerificationService, VerificationService, VerificationServiceHandle,
};
pub use request::{InboundRequest, LABEL_VOLUMETRIC_SESSION};
pub use rule_engine::{
    Action, Evaluation, Rule, RuleAction, RuleEngine, RuleError, RuleGroup, RuleSource, RuleTable,
};
pub use transform::{transform, ObjectResponse, TransformError};
