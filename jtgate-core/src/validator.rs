//! Rule-based message validation stage.

use crate::context::{attr, ProcessContext};
use crate::error::{StageError, ValidationError};
use crate::processor::Processor;
use crate::result::ProcessResult;
use async_trait::async_trait;
use jtgate_protocol::Message;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Longest terminal id accepted by the built-in format rule.
const MAX_TERMINAL_ID_DIGITS: usize = 20;

type Predicate = Arc<dyn Fn(&Message, &ProcessContext) -> bool + Send + Sync>;

/// A named predicate over a message and its context.
#[derive(Clone)]
pub struct ValidationRule {
    name: String,
    error_message: String,
    predicate: Predicate,
}

impl ValidationRule {
    pub fn new<F>(name: impl Into<String>, error_message: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Message, &ProcessContext) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            error_message: error_message.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn check(&self, message: &Message, ctx: &ProcessContext) -> Result<(), ValidationError> {
        if (self.predicate)(message, ctx) {
            Ok(())
        } else {
            Err(ValidationError::RuleFailed {
                rule: self.name.clone(),
                message: self.error_message.clone(),
            })
        }
    }
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRule")
            .field("name", &self.name)
            .field("error_message", &self.error_message)
            .finish()
    }
}

/// Runs global rules, then rules registered for the message id.
///
/// Strict mode fails the stage on any rule failure. Lenient mode records
/// the failures under [`attr::VALIDATION_WARNINGS`] and succeeds.
#[derive(Debug)]
pub struct Validator {
    strict: bool,
    global_rules: RwLock<Vec<ValidationRule>>,
    message_rules: RwLock<HashMap<u16, Vec<ValidationRule>>>,
}

impl Validator {
    pub const NAME: &'static str = "validator";
    pub const PRIORITY: i32 = 10;

    /// Creates a validator with the built-in global rules.
    pub fn new(strict: bool) -> Self {
        let validator = Self::without_rules(strict);
        for rule in builtin_rules() {
            validator.add_global_rule(rule);
        }
        validator
    }

    pub fn without_rules(strict: bool) -> Self {
        Self {
            strict,
            global_rules: RwLock::new(Vec::new()),
            message_rules: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn add_global_rule(&self, rule: ValidationRule) {
        self.global_rules.write().push(rule);
    }

    pub fn add_rule(&self, message_id: u16, rule: ValidationRule) {
        self.message_rules
            .write()
            .entry(message_id)
            .or_default()
            .push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.global_rules.read().len()
            + self.message_rules.read().values().map(Vec::len).sum::<usize>()
    }

    /// Evaluates every applicable rule, returning the failures.
    pub fn validate(&self, ctx: &ProcessContext) -> Vec<ValidationError> {
        let message = ctx.message();
        let mut failures: Vec<ValidationError> = self
            .global_rules
            .read()
            .iter()
            .filter_map(|rule| rule.check(message, ctx).err())
            .collect();

        if let Some(rules) = self.message_rules.read().get(&message.message_id()) {
            failures.extend(rules.iter().filter_map(|rule| rule.check(message, ctx).err()));
        }
        failures
    }
}

fn builtin_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule::new(
            "message_id_range",
            "message id must be in (0x0000, 0xFFFF]",
            |message, _| message.message_id() != 0,
        ),
        ValidationRule::new(
            "terminal_id_format",
            "terminal id must be at most 20 decimal digits",
            |message, _| {
                let id = &message.header.terminal_id;
                id.len() <= MAX_TERMINAL_ID_DIGITS && id.bytes().all(|b| b.is_ascii_digit())
            },
        ),
        ValidationRule::new(
            "subpackage_sequence",
            "subpackage sequence must be within 1..=total",
            |message, _| message.header.subpackage.map_or(true, |info| info.is_valid()),
        ),
    ]
}

#[async_trait]
impl Processor for Validator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    async fn process(&self, ctx: &mut ProcessContext) -> Result<ProcessResult, StageError> {
        let failures = self.validate(ctx);
        if failures.is_empty() {
            return Ok(ProcessResult::success(Self::NAME));
        }

        let reasons: Vec<String> = failures.iter().map(ToString::to_string).collect();
        if self.strict {
            return Ok(ProcessResult::failed(
                Self::NAME,
                format!("validation failed: {}", reasons.join("; ")),
            ));
        }

        tracing::debug!(
            "Message {:#06x} passed with {} validation warnings",
            ctx.message().message_id(),
            reasons.len()
        );
        let count = reasons.len();
        ctx.set_attribute(
            attr::VALIDATION_WARNINGS,
            Value::Array(reasons.into_iter().map(Value::String).collect()),
        );
        Ok(ProcessResult::success(Self::NAME)
            .with_message(format!("{} validation warnings", count))
            .with_metadata("warnings", count))
    }
}
