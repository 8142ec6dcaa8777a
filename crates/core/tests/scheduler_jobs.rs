//! Scheduler job integration tests.
//!
//! Jobs are triggered with `run_now` against real stores, a mock recipient
//! list, and a mock fetcher so winner imports run end to end.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use novels_core::{
    content::ContentStore,
    ledger::{GrantRunStatus, TransactionFilter},
    scheduler::{GrantRecipients, JobOutcome, Recipient},
    testing::{fixtures, MockFetcher, MockRecipients},
    voting::{ProposalStatus, TargetRef, TargetSelector, TargetStatus},
    ContentFetcher, Database, ImportOrchestrator, ImportRunStatus, ImportRunStore,
    ImporterConfig, Job, JobScheduler, LedgerStore, SchedulerConfig, SqliteContentStore,
    SqliteImportRunStore, SqliteLedger, SqliteVotingStore, TicketType, VotingStore,
};

const LINK: &str = "https://books.example.com/winner";

struct TestHarness {
    ledger: Arc<SqliteLedger>,
    voting: Arc<SqliteVotingStore>,
    runs: Arc<SqliteImportRunStore>,
    recipients: Arc<MockRecipients>,
    fetcher: Arc<MockFetcher>,
    scheduler: Arc<JobScheduler>,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = Database::open(&temp_dir.path().join("test.db")).expect("Failed to open db");

        let ledger = Arc::new(SqliteLedger::new(db.clone()).unwrap());
        let voting = Arc::new(SqliteVotingStore::new(db.clone()).unwrap());
        let runs = Arc::new(SqliteImportRunStore::new(db.clone()).unwrap());
        let content = Arc::new(SqliteContentStore::new(db).unwrap());
        let recipients = Arc::new(MockRecipients::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.add_novel(LINK, "Winner", 2);

        let orchestrator = Arc::new(ImportOrchestrator::new(
            ImporterConfig::default(),
            Arc::clone(&runs) as Arc<dyn ImportRunStore>,
            Arc::clone(&voting) as Arc<dyn VotingStore>,
            content as Arc<dyn ContentStore>,
            vec![Arc::clone(&fetcher) as Arc<dyn ContentFetcher>],
            None,
        ));

        let scheduler = Arc::new(JobScheduler::new(
            SchedulerConfig {
                recipients_page_size: 2,
                ..Default::default()
            },
            Arc::clone(&ledger) as Arc<dyn LedgerStore>,
            Arc::clone(&voting) as Arc<dyn VotingStore>,
            Arc::clone(&recipients) as Arc<dyn GrantRecipients>,
            orchestrator,
            None,
        ));

        Self {
            ledger,
            voting,
            runs,
            recipients,
            fetcher,
            scheduler,
            _temp_dir: temp_dir,
        }
    }

    async fn wait_for_run(&self, run_id: &str, expected: ImportRunStatus) -> bool {
        for _ in 0..500 {
            if self.runs.get(run_id).unwrap().unwrap().status == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

#[tokio::test]
async fn test_daily_votes_page_through_all_recipients() {
    let h = TestHarness::new();
    for i in 0..5 {
        h.recipients.add(Recipient::new(format!("u-{}", i)));
    }
    h.recipients.add(Recipient::new("vip").with_vote_multiplier(3));

    let report = h.scheduler.run_now(Job::DailyVotes, false).await.unwrap();
    let grant = report.grant.unwrap();
    assert_eq!(grant.status, GrantRunStatus::Completed);
    assert_eq!(grant.users_processed, 6);
    assert_eq!(grant.total_granted, 8);
    assert_eq!(h.recipients.pages_served(), 4);
    assert_eq!(h.ledger.balance("vip", TicketType::DailyVote).unwrap(), 3);

    // Spent votes are not refilled by a second run on the same day.
    h.ledger
        .spend("u-0", TicketType::DailyVote, 1, "vote_cast", None)
        .unwrap();
    let again = h.scheduler.run_now(Job::DailyVotes, true).await.unwrap();
    assert_eq!(again.grant.unwrap().users_processed, 0);
    assert_eq!(h.ledger.balance("u-0", TicketType::DailyVote).unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_triggers_of_one_grant_job_grant_once() {
    let h = TestHarness::new();
    for i in 0..5 {
        h.recipients.add(Recipient::new(format!("u-{}", i)));
    }

    // An operator trigger racing the scheduled run of the same job.
    let manual = {
        let scheduler = Arc::clone(&h.scheduler);
        tokio::spawn(async move { scheduler.run_now_by(Job::DailyVotes, false, "operator").await })
    };
    let scheduled = {
        let scheduler = Arc::clone(&h.scheduler);
        tokio::spawn(async move { scheduler.run_now_by(Job::DailyVotes, false, "scheduler").await })
    };
    let manual = manual.await.unwrap().unwrap();
    let scheduled = scheduled.await.unwrap().unwrap();

    // The second execution waited for the first and found nothing left to grant.
    assert_eq!(manual.outcome, JobOutcome::Completed);
    assert_eq!(scheduled.outcome, JobOutcome::Completed);
    let mut processed = vec![
        manual.grant.unwrap().users_processed,
        scheduled.grant.unwrap().users_processed,
    ];
    processed.sort();
    assert_eq!(processed, vec![0, 5]);

    for i in 0..5 {
        let user = format!("u-{}", i);
        assert_eq!(h.ledger.balance(&user, TicketType::DailyVote).unwrap(), 1);
        assert_eq!(
            h.ledger
                .count_transactions(&TransactionFilter::new().with_user(user.as_str()))
                .unwrap(),
            1
        );
    }
    assert_eq!(h.scheduler.status(Job::DailyVotes).unwrap().runs, 2);
}

#[tokio::test]
async fn test_failed_page_marks_grant_run_failed() {
    let h = TestHarness::new();
    for i in 0..3 {
        h.recipients.add(Recipient::new(format!("u-{}", i)));
    }
    h.recipients.fail_at_offset(2);

    let report = h.scheduler.run_now(Job::DailyVotes, false).await.unwrap();
    assert_eq!(report.outcome, JobOutcome::Failed);
    let grant = report.grant.unwrap();
    assert_eq!(grant.status, GrantRunStatus::Failed);
    assert!(grant.error.unwrap().contains("simulated"));

    let status = h.scheduler.status(Job::DailyVotes).unwrap();
    assert_eq!(status.last_outcome, Some(JobOutcome::Failed));
    assert_eq!(status.last_grant.unwrap().status, GrantRunStatus::Failed);
}

#[tokio::test]
async fn test_weekly_tickets_grant_plans_once_per_week() {
    let h = TestHarness::new();
    h.recipients.add(Recipient::new("premium").with_plan("premium"));
    h.recipients
        .add(Recipient::new("vip").with_plan("vip").with_level(20));

    h.scheduler.run_now(Job::WeeklyTickets, false).await.unwrap();
    h.scheduler.run_now(Job::WeeklyTickets, false).await.unwrap();

    let premium = h.ledger.wallet("premium").unwrap();
    assert_eq!(premium.novel_request, 2);
    assert_eq!(premium.translation_ticket, 5);
    let vip = h.ledger.wallet("vip").unwrap();
    assert_eq!(vip.novel_request, 6);
    assert_eq!(vip.translation_ticket, 15);

    let grants = h
        .ledger
        .count_transactions(&TransactionFilter::new().with_user("vip"))
        .unwrap();
    assert_eq!(grants, 3);
}

#[tokio::test]
async fn test_voting_winner_starts_import() {
    let h = TestHarness::new();
    let proposal = h
        .voting
        .create_proposal(fixtures::proposal("author", "Winner", LINK))
        .unwrap();
    h.ledger
        .grant("voter", TicketType::DailyVote, 1, "daily_grant", None, None)
        .unwrap();
    h.voting
        .cast_proposal_vote("voter", &proposal.id, TicketType::DailyVote, 1)
        .unwrap();

    let report = h.scheduler.run_now(Job::VotingWinner, false).await.unwrap();
    assert_eq!(report.outcome, JobOutcome::Completed);
    assert_eq!(report.winner_id.as_deref(), Some(proposal.id.as_str()));
    let run_id = report.import_run_id.expect("import was not started");

    assert!(h.wait_for_run(&run_id, ImportRunStatus::Succeeded).await);
    let stored = h.voting.get_proposal(&proposal.id).unwrap().unwrap();
    assert_eq!(stored.status, ProposalStatus::Published);
    assert_eq!(h.fetcher.fetched_numbers(), vec![1, 2]);

    let skipped = h.scheduler.run_now(Job::VotingWinner, false).await.unwrap();
    assert_eq!(skipped.outcome, JobOutcome::Skipped);
}

#[tokio::test]
async fn test_translation_winner_for_proposal_starts_import_and_rebinds() {
    let h = TestHarness::new();
    let proposal = h
        .voting
        .create_proposal(fixtures::proposal("author", "Winner", LINK))
        .unwrap();
    h.voting
        .set_proposal_status(&proposal.id, ProposalStatus::Accepted)
        .unwrap();
    h.ledger
        .grant("voter", TicketType::TranslationTicket, 3, "admin_adjustment", None, None)
        .unwrap();
    h.voting
        .cast_translation_vote("voter", &TargetSelector::Proposal(proposal.id.clone()), 3)
        .unwrap();

    let report = h
        .scheduler
        .run_now(Job::TranslationWinner, false)
        .await
        .unwrap();
    let target_id = report.winner_id.unwrap();
    let run_id = report.import_run_id.expect("import was not started");
    assert!(h.wait_for_run(&run_id, ImportRunStatus::Succeeded).await);

    let target = h.voting.get_target(&target_id).unwrap().unwrap();
    let novel_id = h.runs.get(&run_id).unwrap().unwrap().novel_id.unwrap();
    assert_eq!(target.target, TargetRef::Novel(novel_id));
    assert_eq!(target.status, TargetStatus::Translating);
    assert_eq!(target.tickets_invested, 3);

    let status = h.scheduler.status(Job::TranslationWinner).unwrap();
    assert_eq!(status.runs, 1);
    assert_eq!(status.last_outcome, Some(JobOutcome::Completed));
}
