//! The run orchestrator: filter, then claim-extract-resolve-validate per
//! candidate, isolating every per-candidate failure.

use anyhow::{Context, Result};
use tracing::{info, warn};

use spendtrack_ai::{CategoryResolver, ModelBackend, ResolveError};
use spendtrack_core::{
    validate_transaction, BackendError, BudgetGate, PipelineConfig, RetryPolicy, Transaction,
};
use spendtrack_mail::{Candidate, FieldExtractor, MailboxBackend, MessageFilter};

/// Where in the per-candidate sequence a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Claim,
    Extract,
    Resolve,
    Validate,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Claim => "claim",
            Stage::Extract => "extract",
            Stage::Resolve => "resolve",
            Stage::Validate => "validate",
        })
    }
}

/// One recorded per-candidate failure. Never aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub candidate_id: String,
    pub stage: Stage,
    pub reason: String,
}

/// Outcome of one pipeline run. Counts are reported regardless of outcome;
/// partial success is the expected common case.
#[derive(Debug, Default)]
pub struct RunReport {
    pub found: usize,
    pub claimed: usize,
    /// Claim failures: skipped this run, re-selected next run.
    pub claim_skipped: usize,
    pub transactions: Vec<Transaction>,
    pub failures: Vec<StageFailure>,
    pub model_calls: usize,
    pub estimated_cost: f64,
}

impl RunReport {
    pub fn failures_at(&self, stage: Stage) -> usize {
        self.failures.iter().filter(|f| f.stage == stage).count()
    }
}

/// Run the full pipeline once.
///
/// Candidates are processed sequentially in discovery order, and each one is
/// claimed BEFORE extraction/resolution/validation. A crash mid-batch
/// therefore never reprocesses a half-done candidate on the next run; a
/// claimed candidate that later fails a stage is a recorded permanent skip,
/// not a retry. Only a filter-level failure aborts, and that happens before
/// any claim.
pub async fn run_pipeline<M, B, G>(
    config: &PipelineConfig,
    mailbox: &M,
    resolver: &mut CategoryResolver<B>,
    gate: &mut G,
) -> Result<RunReport>
where
    M: MailboxBackend,
    B: ModelBackend,
    G: BudgetGate,
{
    config.validate().context("invalid pipeline configuration")?;
    let policy = RetryPolicy::default();
    let extractor = FieldExtractor::new(config).context("compiling provider patterns")?;
    let accounts = config.account_labels();

    let filter = MessageFilter::new(config, policy);
    let ids = filter
        .candidate_ids(mailbox)
        .await
        .context("retrieving candidate messages")?;

    let mut report = RunReport {
        found: ids.len(),
        ..RunReport::default()
    };

    for id in ids {
        // An exhausted budget would deny the resolve anyway; stopping before
        // the claim leaves the remaining candidates for the next run instead
        // of turning them into permanent skips.
        if gate.would_deny(config.cost_per_call) {
            warn!("model budget exhausted, leaving remaining candidates unclaimed");
            break;
        }

        // Claim first. If this fails the candidate is untouched and will be
        // selected again next run.
        if let Err(err) = claim_with_retry(mailbox, &id, policy).await {
            warn!(candidate = %id, %err, "claim failed, skipping candidate for this run");
            report.claim_skipped += 1;
            report.failures.push(StageFailure {
                candidate_id: id,
                stage: Stage::Claim,
                reason: err.to_string(),
            });
            continue;
        }
        report.claimed += 1;

        let candidate = match fetch_with_retry(mailbox, &id, policy).await {
            Ok(c) => c,
            Err(err) => {
                record_failure(&mut report, &id, Stage::Extract, err.to_string());
                continue;
            }
        };

        let record = match extractor.extract(&candidate) {
            Ok(r) => r,
            Err(err) => {
                record_failure(&mut report, &id, Stage::Extract, err.to_string());
                continue;
            }
        };

        let resolved = match resolver.resolve(&record, gate).await {
            Ok(v) => v,
            Err(err @ ResolveError::BudgetDenied) => {
                // Reached only when the gate denies mid-candidate (the
                // pre-claim check passed); stop the batch and report what we
                // have.
                record_failure(&mut report, &id, Stage::Resolve, err.to_string());
                warn!("model budget exhausted, ending run early");
                break;
            }
            Err(err) => {
                record_failure(&mut report, &id, Stage::Resolve, err.to_string());
                continue;
            }
        };

        match validate_transaction(&resolved, &accounts) {
            Ok(txn) => {
                info!(candidate = %id, %txn, "validated transaction");
                report.transactions.push(txn);
            }
            Err(err) => {
                record_failure(&mut report, &id, Stage::Validate, err.to_string());
            }
        }
    }

    report.model_calls = resolver.calls().len();
    report.estimated_cost = resolver.estimated_spend();
    info!(
        found = report.found,
        claimed = report.claimed,
        validated = report.transactions.len(),
        failed = report.failures.len(),
        "pipeline run completed"
    );
    Ok(report)
}

fn record_failure(report: &mut RunReport, id: &str, stage: Stage, reason: String) {
    warn!(candidate = %id, %stage, %reason, "candidate skipped");
    report.failures.push(StageFailure {
        candidate_id: id.to_string(),
        stage,
        reason,
    });
}

async fn claim_with_retry<M: MailboxBackend>(
    mailbox: &M,
    id: &str,
    policy: RetryPolicy,
) -> Result<(), BackendError> {
    let mut attempt = 1;
    loop {
        match mailbox.claim(id).await {
            Ok(()) => return Ok(()),
            Err(err) if policy.should_retry(&err, attempt) => {
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn fetch_with_retry<M: MailboxBackend>(
    mailbox: &M,
    id: &str,
    policy: RetryPolicy,
) -> Result<Candidate, BackendError> {
    let mut attempt = 1;
    loop {
        match mailbox.fetch(id).await {
            Ok(candidate) => return Ok(candidate),
            Err(err) if policy.should_retry(&err, attempt) => {
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use spendtrack_core::{GateDecision, RateBudget, UnmeteredGate};
    use spendtrack_mail::MessagePage;
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::rc::Rc;
    use std::time::Duration;

    const PAGE_SIZE: usize = 2;

    #[derive(Clone)]
    struct MockMessage {
        id: &'static str,
        sender: &'static str,
        body: &'static str,
    }

    /// In-memory mailbox honoring the claimed-label exclusion and paginating
    /// results PAGE_SIZE at a time.
    struct MockMailbox {
        messages: Vec<MockMessage>,
        claimed: RefCell<HashSet<String>>,
        failing_claims: RefCell<HashSet<String>>,
        events: Rc<RefCell<Vec<String>>>,
    }

    impl MockMailbox {
        fn new(messages: Vec<MockMessage>, events: Rc<RefCell<Vec<String>>>) -> Self {
            Self {
                messages,
                claimed: RefCell::new(HashSet::new()),
                failing_claims: RefCell::new(HashSet::new()),
                events,
            }
        }

        fn unclaimed(&self) -> Vec<&MockMessage> {
            let claimed = self.claimed.borrow();
            self.messages
                .iter()
                .filter(|m| !claimed.contains(m.id))
                .collect()
        }
    }

    impl MailboxBackend for MockMailbox {
        async fn search(
            &self,
            query: &str,
            page_token: Option<&str>,
        ) -> Result<MessagePage, BackendError> {
            assert!(query.contains("-label:"), "query must exclude claimed mail");
            let ids: Vec<String> = self.unclaimed().iter().map(|m| m.id.to_string()).collect();
            let start = page_token.map_or(0, |t| t.parse::<usize>().unwrap());
            let end = (start + PAGE_SIZE).min(ids.len());
            let next = (end < ids.len()).then(|| end.to_string());
            Ok(MessagePage {
                ids: ids[start..end].to_vec(),
                next_page_token: next,
            })
        }

        async fn fetch(&self, id: &str) -> Result<Candidate, BackendError> {
            let msg = self
                .messages
                .iter()
                .find(|m| m.id == id)
                .ok_or_else(|| BackendError::Fatal(format!("no such message {id}")))?;
            Ok(Candidate {
                id: id.to_string(),
                sender: msg.sender.to_string(),
                body: msg.body.to_string(),
                body_is_html: false,
                received_at: Utc.with_ymd_and_hms(2023, 1, 5, 11, 34, 0).unwrap(),
            })
        }

        async fn claim(&self, id: &str) -> Result<(), BackendError> {
            if self.failing_claims.borrow().contains(id) {
                return Err(BackendError::Fatal("label rejected".into()));
            }
            self.events.borrow_mut().push(format!("claim:{id}"));
            self.claimed.borrow_mut().insert(id.to_string());
            Ok(())
        }
    }

    /// Model answering from a queue, in call order.
    struct QueueModel {
        responses: RefCell<Vec<Result<String, BackendError>>>,
        events: Rc<RefCell<Vec<String>>>,
    }

    impl ModelBackend for QueueModel {
        async fn generate(&self, _prompt: &str) -> Result<String, BackendError> {
            self.events.borrow_mut().push("generate".to_string());
            self.responses.borrow_mut().remove(0)
        }
    }

    fn good_json(merchant: &str) -> String {
        format!(
            r#"{{"amount":"45.67","currency":"eur","merchant":"{merchant}",
               "category":"Food & Dining","date":"05-01-2023","time":"12:34 PM","account":"Wise"}}"#
        )
    }

    fn wise(id: &'static str, body: &'static str) -> MockMessage {
        MockMessage {
            id,
            sender: "Wise <noreply@wise.com>",
            body,
        }
    }

    fn test_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.timezone = "UTC".to_string();
        config
    }

    fn test_resolver(
        responses: Vec<Result<String, BackendError>>,
        events: Rc<RefCell<Vec<String>>>,
    ) -> CategoryResolver<QueueModel> {
        CategoryResolver::new(
            QueueModel {
                responses: RefCell::new(responses),
                events,
            },
            "test-model",
            0.0005,
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
            test_config().category_hints,
        )
    }

    #[tokio::test]
    async fn test_claim_happens_before_processing() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mailbox = MockMailbox::new(
            vec![wise("m1", "You spent 45.67 EUR at Coffee Shop.")],
            events.clone(),
        );
        let mut resolver = test_resolver(vec![Ok(good_json("Coffee Shop"))], events.clone());

        let report = run_pipeline(&test_config(), &mailbox, &mut resolver, &mut UnmeteredGate)
            .await
            .unwrap();

        assert_eq!(report.transactions.len(), 1);
        assert_eq!(*events.borrow(), vec!["claim:m1", "generate"]);
    }

    #[tokio::test]
    async fn test_transactions_preserve_discovery_order_across_pages() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mailbox = MockMailbox::new(
            vec![
                wise("m1", "You spent 1.00 EUR at Alpha."),
                wise("m2", "You spent 2.00 EUR at Beta."),
                wise("m3", "You spent 3.00 EUR at Gamma."),
            ],
            events.clone(),
        );
        let mut resolver = test_resolver(
            vec![
                Ok(good_json("Alpha")),
                Ok(good_json("Beta")),
                Ok(good_json("Gamma")),
            ],
            events.clone(),
        );

        let report = run_pipeline(&test_config(), &mailbox, &mut resolver, &mut UnmeteredGate)
            .await
            .unwrap();

        assert_eq!(report.found, 3);
        let merchants: Vec<&str> = report
            .transactions
            .iter()
            .map(|t| t.merchant.as_str())
            .collect();
        assert_eq!(merchants, vec!["Alpha", "Beta", "Gamma"]);
    }

    #[tokio::test]
    async fn test_one_bad_candidate_never_halts_the_batch() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mailbox = MockMailbox::new(
            vec![
                wise("m1", "You spent 1.00 EUR at Alpha."),
                wise("m2", "You spent 2.00 EUR at Beta."),
                wise("m3", "You spent 3.00 EUR at Gamma."),
            ],
            events.clone(),
        );
        // Middle candidate gets an undecodable response.
        let mut resolver = test_resolver(
            vec![
                Ok(good_json("Alpha")),
                Ok("the model rambles instead of emitting JSON".to_string()),
                Ok(good_json("Gamma")),
            ],
            events.clone(),
        );

        let report = run_pipeline(&test_config(), &mailbox, &mut resolver, &mut UnmeteredGate)
            .await
            .unwrap();

        assert_eq!(report.transactions.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].candidate_id, "m2");
        assert_eq!(report.failures[0].stage, Stage::Resolve);
    }

    #[tokio::test]
    async fn test_validation_failure_is_recorded_not_fatal() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mailbox = MockMailbox::new(
            vec![wise("m1", "You spent 1.00 EUR at Alpha.")],
            events.clone(),
        );
        let bad_time = r#"{"amount":"1.00","currency":"EUR","merchant":"Alpha",
            "category":"Food & Dining","date":"05-01-2023","time":"00:10 AM","account":"Wise"}"#;
        let mut resolver = test_resolver(vec![Ok(bad_time.to_string())], events.clone());

        let report = run_pipeline(&test_config(), &mailbox, &mut resolver, &mut UnmeteredGate)
            .await
            .unwrap();

        assert!(report.transactions.is_empty());
        assert_eq!(report.failures_at(Stage::Validate), 1);
        assert!(report.failures[0].reason.contains("time"));
        assert!(report.failures[0].reason.contains("00:10 AM"));
    }

    #[tokio::test]
    async fn test_promotional_mail_is_an_extract_failure() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mailbox = MockMailbox::new(
            vec![
                wise("m1", "Your money is now in your balance."),
                wise("m2", "You spent 2.00 EUR at Beta."),
            ],
            events.clone(),
        );
        let mut resolver = test_resolver(vec![Ok(good_json("Beta"))], events.clone());

        let report = run_pipeline(&test_config(), &mailbox, &mut resolver, &mut UnmeteredGate)
            .await
            .unwrap();

        assert_eq!(report.transactions.len(), 1);
        assert_eq!(report.failures_at(Stage::Extract), 1);
        // The promotional mail stays claimed: permanent skip, no poison loop.
        assert!(mailbox.claimed.borrow().contains("m1"));
    }

    #[tokio::test]
    async fn test_failed_claim_skips_candidate_without_processing() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mailbox = MockMailbox::new(
            vec![
                wise("m1", "You spent 1.00 EUR at Alpha."),
                wise("m2", "You spent 2.00 EUR at Beta."),
            ],
            events.clone(),
        );
        mailbox.failing_claims.borrow_mut().insert("m1".to_string());
        let mut resolver = test_resolver(vec![Ok(good_json("Beta"))], events.clone());

        let report = run_pipeline(&test_config(), &mailbox, &mut resolver, &mut UnmeteredGate)
            .await
            .unwrap();

        assert_eq!(report.claim_skipped, 1);
        assert_eq!(report.claimed, 1);
        assert_eq!(report.transactions.len(), 1);
        // m1 was never claimed, so the next run will see it again.
        assert!(!mailbox.claimed.borrow().contains("m1"));
        // And it never reached the model.
        assert_eq!(
            events.borrow().iter().filter(|e| *e == "generate").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_rerun_after_success_finds_zero_candidates() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mailbox = MockMailbox::new(
            vec![
                wise("m1", "You spent 1.00 EUR at Alpha."),
                wise("m2", "You spent 2.00 EUR at Beta."),
            ],
            events.clone(),
        );
        let mut resolver = test_resolver(
            vec![Ok(good_json("Alpha")), Ok(good_json("Beta"))],
            events.clone(),
        );

        let first = run_pipeline(&test_config(), &mailbox, &mut resolver, &mut UnmeteredGate)
            .await
            .unwrap();
        assert_eq!(first.transactions.len(), 2);

        let mut resolver = test_resolver(vec![], events.clone());
        let second = run_pipeline(&test_config(), &mailbox, &mut resolver, &mut UnmeteredGate)
            .await
            .unwrap();
        assert_eq!(second.found, 0);
        assert!(second.transactions.is_empty());
        assert!(second.failures.is_empty());
    }

    #[tokio::test]
    async fn test_fatal_search_error_aborts_before_any_claim() {
        struct BrokenMailbox;
        impl MailboxBackend for BrokenMailbox {
            async fn search(
                &self,
                _query: &str,
                _page_token: Option<&str>,
            ) -> Result<MessagePage, BackendError> {
                Err(BackendError::Fatal("401 unauthorized".into()))
            }
            async fn fetch(&self, _id: &str) -> Result<Candidate, BackendError> {
                unreachable!()
            }
            async fn claim(&self, _id: &str) -> Result<(), BackendError> {
                unreachable!()
            }
        }

        let events = Rc::new(RefCell::new(Vec::new()));
        let mut resolver = test_resolver(vec![], events);
        let err = run_pipeline(
            &test_config(),
            &BrokenMailbox,
            &mut resolver,
            &mut UnmeteredGate,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("retrieving candidate messages"));
    }

    #[tokio::test]
    async fn test_denied_budget_ends_run_with_failure_recorded() {
        struct DenyAll;
        impl BudgetGate for DenyAll {
            fn before_call(&mut self, _cost: f64) -> GateDecision {
                GateDecision::Deny
            }
        }

        let events = Rc::new(RefCell::new(Vec::new()));
        let mailbox = MockMailbox::new(
            vec![
                wise("m1", "You spent 1.00 EUR at Alpha."),
                wise("m2", "You spent 2.00 EUR at Beta."),
            ],
            events.clone(),
        );
        let mut resolver = test_resolver(vec![], events.clone());

        let report = run_pipeline(&test_config(), &mailbox, &mut resolver, &mut DenyAll)
            .await
            .unwrap();

        assert!(report.transactions.is_empty());
        assert_eq!(report.failures_at(Stage::Resolve), 1);
        assert_eq!(report.model_calls, 0);
    }

    #[tokio::test]
    async fn test_exhausted_budget_stops_before_any_claim() {
        struct Exhausted;
        impl BudgetGate for Exhausted {
            fn before_call(&mut self, _cost: f64) -> GateDecision {
                GateDecision::Deny
            }
            fn would_deny(&self, _cost: f64) -> bool {
                true
            }
        }

        let events = Rc::new(RefCell::new(Vec::new()));
        let mailbox = MockMailbox::new(
            vec![
                wise("m1", "You spent 1.00 EUR at Alpha."),
                wise("m2", "You spent 2.00 EUR at Beta."),
            ],
            events.clone(),
        );
        let mut resolver = test_resolver(vec![], events.clone());

        let report = run_pipeline(&test_config(), &mailbox, &mut resolver, &mut Exhausted)
            .await
            .unwrap();

        assert_eq!(report.found, 2);
        assert_eq!(report.claimed, 0);
        assert!(report.transactions.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(report.model_calls, 0);
        // Nothing was claimed, so the next run sees both candidates again.
        assert!(mailbox.claimed.borrow().is_empty());
        assert!(events.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_budget_exhaustion_mid_run_leaves_rest_unclaimed() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mailbox = MockMailbox::new(
            vec![
                wise("m1", "You spent 1.00 EUR at Alpha."),
                wise("m2", "You spent 2.00 EUR at Beta."),
            ],
            events.clone(),
        );
        let mut resolver = test_resolver(vec![Ok(good_json("Alpha"))], events.clone());
        // Budget covers exactly one call at the configured per-call cost.
        let mut gate = RateBudget::new(60, Duration::from_secs(60), 0.0005);

        let report = run_pipeline(&test_config(), &mailbox, &mut resolver, &mut gate)
            .await
            .unwrap();

        assert_eq!(report.transactions.len(), 1);
        assert_eq!(report.claimed, 1);
        assert!(report.failures.is_empty());
        assert!(mailbox.claimed.borrow().contains("m1"));
        assert!(!mailbox.claimed.borrow().contains("m2"));
    }

    #[tokio::test]
    async fn test_report_counts_model_calls_and_cost() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mailbox = MockMailbox::new(
            vec![wise("m1", "You spent 1.00 EUR at Alpha.")],
            events.clone(),
        );
        let mut resolver = test_resolver(
            vec![
                Err(BackendError::Transient("503".into())),
                Ok(good_json("Alpha")),
            ],
            events.clone(),
        );

        let report = run_pipeline(&test_config(), &mailbox, &mut resolver, &mut UnmeteredGate)
            .await
            .unwrap();

        assert_eq!(report.transactions.len(), 1);
        assert_eq!(report.model_calls, 2);
        assert!((report.estimated_cost - 0.001).abs() < 1e-9);
    }
}
