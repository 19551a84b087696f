//! Mock implementations for all repository and service traits
//!
//! In-memory implementations backed by `Arc<Mutex<..>>`, usable from
//! unit tests without a database or external services.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ruleflow_core::{
    models::{ActivityRecord, ReminderJob, ReminderStatus, Subject},
    traits::{
        ArtifactStore, ChatNotifier, EmailAttachment, EmailNotifier, MessageQueue,
        ReminderRepository, RuleRepository, RunFilter, RunRepository, SubjectSource,
        TaskRecordFilter, TaskRecordRepository,
    },
    EngineError, EngineResult, JobMessage, Rule, RunStatus, ScheduledJobRun, TaskRecord,
    TaskState,
};

/// Mock implementation of RuleRepository
#[derive(Debug, Clone, Default)]
pub struct MockRuleRepository {
    rules: Arc<Mutex<HashMap<i64, Rule>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockRuleRepository {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn with_rules(rules: Vec<Rule>) -> Self {
        let mut map = HashMap::new();
        let mut max_id = 0;
        for rule in rules {
            if rule.id > max_id {
                max_id = rule.id;
            }
            map.insert(rule.id, rule);
        }
        Self {
            rules: Arc::new(Mutex::new(map)),
            next_id: Arc::new(Mutex::new(max_id + 1)),
        }
    }

    pub fn count(&self) -> usize {
        self.rules.lock().unwrap().len()
    }
}

#[async_trait]
impl RuleRepository for MockRuleRepository {
    async fn create(&self, rule: &Rule) -> EngineResult<Rule> {
        let mut rules = self.rules.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();
        let mut new_rule = rule.clone();
        new_rule.id = *next_id;
        *next_id += 1;
        rules.insert(new_rule.id, new_rule.clone());
        Ok(new_rule)
    }

    async fn get_by_id(&self, id: i64) -> EngineResult<Option<Rule>> {
        Ok(self.rules.lock().unwrap().get(&id).cloned())
    }

    async fn get_enabled(&self) -> EngineResult<Vec<Rule>> {
        let rules = self.rules.lock().unwrap();
        let mut enabled: Vec<Rule> = rules.values().filter(|r| r.enabled).cloned().collect();
        enabled.sort_by_key(|r| r.id);
        Ok(enabled)
    }

    async fn update(&self, rule: &Rule) -> EngineResult<()> {
        self.rules.lock().unwrap().insert(rule.id, rule.clone());
        Ok(())
    }

    async fn update_last_run(&self, id: i64, last_run_at: DateTime<Utc>) -> EngineResult<()> {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .get_mut(&id)
            .ok_or(EngineError::RuleNotFound { id })?;
        rule.last_run_at = Some(last_run_at);
        Ok(())
    }

    async fn delete(&self, id: i64) -> EngineResult<()> {
        self.rules.lock().unwrap().remove(&id);
        Ok(())
    }
}

/// Mock implementation of RunRepository
#[derive(Debug, Clone, Default)]
pub struct MockRunRepository {
    runs: Arc<Mutex<HashMap<i64, ScheduledJobRun>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockRunRepository {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn all_runs(&self) -> Vec<ScheduledJobRun> {
        let mut runs: Vec<ScheduledJobRun> =
            self.runs.lock().unwrap().values().cloned().collect();
        runs.sort_by_key(|r| r.id);
        runs
    }

    pub fn count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

#[async_trait]
impl RunRepository for MockRunRepository {
    async fn create(&self, run: &ScheduledJobRun) -> EngineResult<ScheduledJobRun> {
        let mut runs = self.runs.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();
        let mut new_run = run.clone();
        new_run.id = *next_id;
        *next_id += 1;
        runs.insert(new_run.id, new_run.clone());
        Ok(new_run)
    }

    async fn get_by_id(&self, id: i64) -> EngineResult<Option<ScheduledJobRun>> {
        Ok(self.runs.lock().unwrap().get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: i64,
        status: RunStatus,
        details: Option<&serde_json::Value>,
    ) -> EngineResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs.get_mut(&id).ok_or(EngineError::RunNotFound { id })?;
        run.status = status;
        if let Some(details) = details {
            run.details = details.clone();
        }
        Ok(())
    }

    async fn list(&self, filter: &RunFilter) -> EngineResult<Vec<ScheduledJobRun>> {
        let runs = self.runs.lock().unwrap();
        let mut filtered: Vec<ScheduledJobRun> = runs
            .values()
            .filter(|r| filter.rule_id.map_or(true, |id| r.rule_id == id))
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| filter.since.map_or(true, |t| r.run_time >= t))
            .filter(|r| filter.until.map_or(true, |t| r.run_time < t))
            .cloned()
            .collect();
        filtered.sort_by_key(|r| r.id);
        if let Some(limit) = filter.limit {
            filtered.truncate(limit as usize);
        }
        Ok(filtered)
    }

    async fn exists_in_window(
        &self,
        rule_id: i64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let runs = self.runs.lock().unwrap();
        Ok(runs
            .values()
            .any(|r| r.rule_id == rule_id && r.run_time >= from && r.run_time < until))
    }

    async fn count_by_status(&self, rule_id: i64) -> EngineResult<Vec<(RunStatus, i64)>> {
        let runs = self.runs.lock().unwrap();
        let mut counts: HashMap<&'static str, (RunStatus, i64)> = HashMap::new();
        for run in runs.values().filter(|r| r.rule_id == rule_id) {
            counts
                .entry(run.status.as_str())
                .or_insert((run.status, 0))
                .1 += 1;
        }
        Ok(counts.into_values().collect())
    }
}

/// Mock implementation of ReminderRepository
#[derive(Debug, Clone, Default)]
pub struct MockReminderRepository {
    jobs: Arc<Mutex<HashMap<i64, ReminderJob>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockReminderRepository {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn all_jobs(&self) -> Vec<ReminderJob> {
        let mut jobs: Vec<ReminderJob> = self.jobs.lock().unwrap().values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    pub fn count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

#[async_trait]
impl ReminderRepository for MockReminderRepository {
    async fn upsert_slot(
        &self,
        subject_id: i64,
        scheduled_at: DateTime<Utc>,
    ) -> EngineResult<ReminderJob> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(existing) = jobs
            .values()
            .find(|j| j.subject_id == subject_id && j.scheduled_at == scheduled_at)
        {
            return Ok(existing.clone());
        }

        let mut next_id = self.next_id.lock().unwrap();
        let job = ReminderJob {
            id: *next_id,
            subject_id,
            scheduled_at,
            status: ReminderStatus::Pending,
            sent_at: None,
            created_at: Utc::now(),
        };
        *next_id += 1;
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_by_id(&self, id: i64) -> EngineResult<Option<ReminderJob>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn mark_sent(&self, id: i64, sent_at: DateTime<Utc>) -> EngineResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or(EngineError::ReminderJobNotFound { id })?;
        job.status = ReminderStatus::Sent;
        job.sent_at = Some(sent_at);
        Ok(())
    }

    async fn mark_failed(&self, id: i64) -> EngineResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or(EngineError::ReminderJobNotFound { id })?;
        job.status = ReminderStatus::Failed;
        Ok(())
    }

    async fn mark_skipped(&self, id: i64) -> EngineResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or(EngineError::ReminderJobNotFound { id })?;
        job.status = ReminderStatus::Skipped;
        Ok(())
    }

    async fn list_for_subject(&self, subject_id: i64) -> EngineResult<Vec<ReminderJob>> {
        let jobs = self.jobs.lock().unwrap();
        let mut result: Vec<ReminderJob> = jobs
            .values()
            .filter(|j| j.subject_id == subject_id)
            .cloned()
            .collect();
        result.sort_by_key(|j| j.id);
        Ok(result)
    }

    async fn count_pending(&self) -> EngineResult<i64> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|j| j.status == ReminderStatus::Pending)
            .count() as i64)
    }
}

/// Mock implementation of TaskRecordRepository
#[derive(Debug, Clone, Default)]
pub struct MockTaskRecordRepository {
    records: Arc<Mutex<HashMap<String, TaskRecord>>>,
}

impl MockTaskRecordRepository {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn all_records(&self) -> Vec<TaskRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl TaskRecordRepository for MockTaskRecordRepository {
    async fn get_by_id(&self, id: &str) -> EngineResult<Option<TaskRecord>> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn upsert(&self, record: &TaskRecord) -> EngineResult<()> {
        let mut records = self.records.lock().unwrap();
        // REVOKED粘滞：与SQLite实现保持一致
        if let Some(existing) = records.get(&record.id) {
            if existing.status == TaskState::Revoked {
                return Ok(());
            }
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn list(&self, filter: &TaskRecordFilter) -> EngineResult<Vec<TaskRecord>> {
        let records = self.records.lock().unwrap();
        let mut filtered: Vec<TaskRecord> = records
            .values()
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| {
                filter
                    .name_pattern
                    .as_ref()
                    .map_or(true, |p| r.name.contains(p.as_str()))
            })
            .filter(|r| {
                filter
                    .worker
                    .as_ref()
                    .map_or(true, |w| r.worker.as_deref() == Some(w.as_str()))
            })
            .filter(|r| filter.since.map_or(true, |t| r.created_at >= t))
            .filter(|r| filter.until.map_or(true, |t| r.created_at < t))
            .cloned()
            .collect();
        filtered.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if let Some(limit) = filter.limit {
            filtered.truncate(limit as usize);
        }
        Ok(filtered)
    }
}

/// Mock implementation of SubjectSource
#[derive(Debug, Clone, Default)]
pub struct MockSubjectSource {
    subjects: Arc<Mutex<Vec<Subject>>>,
    new_resource_at: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl MockSubjectSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subjects(subjects: Vec<Subject>) -> Self {
        Self {
            subjects: Arc::new(Mutex::new(subjects)),
            new_resource_at: Arc::new(Mutex::new(None)),
        }
    }

    /// 设置最近一次新资源上线的时刻
    pub fn set_new_resource_at(&self, at: DateTime<Utc>) {
        *self.new_resource_at.lock().unwrap() = Some(at);
    }
}

#[async_trait]
impl SubjectSource for MockSubjectSource {
    async fn list_subjects(&self, offset: i64, limit: i64) -> EngineResult<Vec<Subject>> {
        let subjects = self.subjects.lock().unwrap();
        Ok(subjects
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_subject(&self, id: i64) -> EngineResult<Option<Subject>> {
        let subjects = self.subjects.lock().unwrap();
        Ok(subjects.iter().find(|s| s.id == id).cloned())
    }

    async fn activities_between(
        &self,
        subject_id: i64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> EngineResult<Vec<ActivityRecord>> {
        let subjects = self.subjects.lock().unwrap();
        Ok(subjects
            .iter()
            .find(|s| s.id == subject_id)
            .map(|s| {
                s.activities
                    .iter()
                    .filter(|a| a.occurred_at >= from && a.occurred_at < until)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn has_new_resources_since(&self, cutoff: DateTime<Utc>) -> EngineResult<bool> {
        Ok(self
            .new_resource_at
            .lock()
            .unwrap()
            .is_some_and(|at| at >= cutoff))
    }

    async fn mark_reminder_sent(&self, subject_id: i64, at: DateTime<Utc>) -> EngineResult<()> {
        let mut subjects = self.subjects.lock().unwrap();
        if let Some(subject) = subjects.iter_mut().find(|s| s.id == subject_id) {
            subject.last_reminder_sent_at = Some(at);
        }
        Ok(())
    }
}

/// Mock implementation of MessageQueue
#[derive(Debug, Clone, Default)]
pub struct MockMessageQueue {
    queues: Arc<Mutex<HashMap<String, VecDeque<JobMessage>>>>,
}

impl MockMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 不消费地查看队列内容
    pub fn peek(&self, queue: &str) -> Vec<JobMessage> {
        let queues = self.queues.lock().unwrap();
        queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageQueue for MockMessageQueue {
    async fn publish_message(&self, queue: &str, message: &JobMessage) -> EngineResult<()> {
        let mut queues = self.queues.lock().unwrap();
        queues
            .entry(queue.to_string())
            .or_default()
            .push_back(message.clone());
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> EngineResult<Vec<JobMessage>> {
        let mut queues = self.queues.lock().unwrap();
        Ok(queues
            .get_mut(queue)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default())
    }

    async fn ack_message(&self, _message_id: &str) -> EngineResult<()> {
        Ok(())
    }

    async fn nack_message(&self, _message_id: &str, _requeue: bool) -> EngineResult<()> {
        Ok(())
    }

    async fn create_queue(&self, queue: &str, _durable: bool) -> EngineResult<()> {
        let mut queues = self.queues.lock().unwrap();
        queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> EngineResult<()> {
        self.queues.lock().unwrap().remove(queue);
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> EngineResult<u32> {
        let queues = self.queues.lock().unwrap();
        Ok(queues.get(queue).map(|q| q.len() as u32).unwrap_or(0))
    }

    async fn purge_queue(&self, queue: &str) -> EngineResult<()> {
        let mut queues = self.queues.lock().unwrap();
        if let Some(q) = queues.get_mut(queue) {
            q.clear();
        }
        Ok(())
    }
}

/// Mock implementation of ChatNotifier
#[derive(Debug, Clone, Default)]
pub struct MockChatNotifier {
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
    fail: Arc<Mutex<bool>>,
}

impl MockChatNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock().unwrap() = failing;
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatNotifier for MockChatNotifier {
    async fn send_chat(&self, webhook_url: &str, text: &str) -> EngineResult<()> {
        if *self.fail.lock().unwrap() {
            return Err(EngineError::Notification("chat webhook不可达".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((webhook_url.to_string(), text.to_string()));
        Ok(())
    }
}

/// Mock implementation of EmailNotifier
#[derive(Debug, Clone, Default)]
pub struct MockEmailNotifier {
    pub sent: Arc<Mutex<Vec<(String, String, String)>>>,
    fail: Arc<Mutex<bool>>,
}

impl MockEmailNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock().unwrap() = failing;
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl EmailNotifier for MockEmailNotifier {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
        _attachments: Vec<EmailAttachment>,
    ) -> EngineResult<()> {
        if *self.fail.lock().unwrap() {
            return Err(EngineError::Notification("SMTP连接失败".to_string()));
        }
        self.sent.lock().unwrap().push((
            to.to_string(),
            subject.to_string(),
            html_body.to_string(),
        ));
        Ok(())
    }
}

/// Mock implementation of ArtifactStore
#[derive(Debug, Clone, Default)]
pub struct MockArtifactStore {
    pub objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> EngineResult<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> EngineResult<String> {
        Ok(format!(
            "http://artifacts.test/{key}?expires_in={}",
            ttl.as_secs()
        ))
    }
}
