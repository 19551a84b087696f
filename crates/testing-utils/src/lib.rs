//! Shared testing utilities for the ruleflow workspace
//!
//! Provides in-memory mocks for every core trait and fluent builders
//! for test data, so unit tests never need a live database or SMTP
//! relay.

pub mod builders;
pub mod mocks;

pub use builders::{RuleBuilder, SubjectBuilder, TaskRecordBuilder};
pub use mocks::{
    MockArtifactStore, MockChatNotifier, MockEmailNotifier, MockMessageQueue,
    MockReminderRepository, MockRuleRepository, MockRunRepository, MockSubjectSource,
    MockTaskRecordRepository,
};
