//! Background Analysis Worker
//!
//! Runs beside the dialogue at its own fixed cadence, on its own thread and
//! runtime. Each tick it decides whether the conversation has moved on far
//! enough to be worth analysing, and if so drives the diagnosis collaborators,
//! folds their output into the pools and publishes a fresh snapshot.
//!
//! A failing collaborator costs at most its own step. The pools are only
//! written after a collaborator call has returned successfully, so a failed
//! step leaves them exactly as they were.

use crate::collaborators::Analysts;
use crate::error::SessionError;
use crate::question::RankedQuestion;
use crate::snapshot::{AnalysisSnapshot, SnapshotPublisher};
use crate::state::AnalysisState;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, warn};

/// Shortest tick period; a zero interval is clamped to it.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Time between wake-ups.
    pub interval: Duration,
    /// Completed exchanges required between two analyses.
    pub every_n_turns: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            every_n_turns: 1,
        }
    }
}

/// What a single wake-up amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Not enough new turns since the last analysis.
    Skipped,
    /// The trigger found nothing new to diagnose.
    NotTriggered,
    /// Pools were updated and snapshot `cycle` was published.
    Published { cycle: u64 },
}

pub struct AnalysisWorker {
    state: Arc<AnalysisState>,
    analysts: Analysts,
    publisher: SnapshotPublisher,
    config: WorkerConfig,
    last_analyzed_turn: u64,
    cycles: u64,
}

impl AnalysisWorker {
    pub fn new(
        state: Arc<AnalysisState>,
        analysts: Analysts,
        publisher: SnapshotPublisher,
        config: WorkerConfig,
    ) -> Self {
        Self {
            state,
            analysts,
            publisher,
            config,
            last_analyzed_turn: 0,
            cycles: 0,
        }
    }

    /// Runs the worker on a dedicated thread with its own single-threaded runtime.
    pub fn spawn(self) -> Result<WorkerHandle, SessionError> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let span = tracing::info_span!("analysis_worker");
        let thread = thread::Builder::new()
            .name("analysis-worker".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(error = ?e, "Failed to build analysis worker runtime");
                        return;
                    }
                };
                runtime.block_on(self.run(stop_rx).instrument(span));
            })?;
        Ok(WorkerHandle {
            stop_tx,
            thread: Some(thread),
        })
    }

    /// Ticks every `interval` until `stop` turns true or its sender is dropped.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!(interval = ?self.config.interval, every_n_turns = self.config.every_n_turns, "Analysis worker started");
        let mut ticker = tokio::time::interval(self.config.interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(CycleOutcome::Published { cycle }) => debug!(cycle, "Analysis cycle published"),
                        Ok(outcome) => debug!(?outcome, "Analysis cycle finished without publishing"),
                        Err(e) => warn!(error = %e, "Analysis cycle aborted"),
                    }
                }
            }
        }
        info!(cycles = self.cycles, "Analysis worker stopped");
    }

    /// Performs one wake-up: gate, trigger, diagnose, consolidate, rank, publish.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, SessionError> {
        let turn = self.state.turn_count();
        if turn == 0 || turn < self.last_analyzed_turn + self.config.every_n_turns {
            return Ok(CycleOutcome::Skipped);
        }

        let transcript = self.state.transcript_snapshot().await;
        if transcript.is_empty() {
            return Ok(CycleOutcome::NotTriggered);
        }

        let decision = self
            .analysts
            .trigger
            .check(&transcript)
            .await
            .map_err(|source| SessionError::Collaborator {
                step: "trigger",
                source,
            })?;
        if !decision.should_run {
            debug!(turn, reason = %decision.reason, "Trigger found nothing new");
            self.last_analyzed_turn = turn;
            return Ok(CycleOutcome::NotTriggered);
        }
        info!(turn, reason = %decision.reason, "Running diagnosis");

        let current = self.state.diagnoses().read().await.working_basic();
        let update = self
            .analysts
            .diagnoser
            .diagnose(&transcript, &current)
            .await
            .map_err(|source| SessionError::Collaborator {
                step: "diagnose",
                source,
            })?;
        self.last_analyzed_turn = turn;

        let working = {
            let mut pool = self.state.diagnoses().write().await;
            let applied = pool.update(&update.diagnosis_list);
            debug!(applied, "Merged candidates into working pool");
            pool.working_basic()
        };

        match self
            .analysts
            .evaluator
            .evaluate(&working, &update.diagnosis_list, &transcript)
            .await
        {
            Ok(merged) => self
                .state
                .diagnoses()
                .write()
                .await
                .replace_consolidated(&merged),
            Err(e) => warn!(step = "evaluate", error = ?e, "Keeping previous consolidated pool"),
        }

        let created = self
            .state
            .questions()
            .write()
            .await
            .ingest(&update.follow_up_questions);
        debug!(actionable = created.len(), "Ingested follow-up questions");

        let diagnoses = self
            .state
            .diagnoses()
            .read()
            .await
            .list_consolidated_with_severity();
        let queue = self.state.questions().read().await.active_queue();
        if !queue.is_empty() {
            let ranking = match self.analysts.ranker.rank(&transcript, &diagnoses, &queue).await {
                Ok(ranking) => ranking,
                Err(e) => {
                    warn!(step = "rank", error = ?e, "Falling back to queue order");
                    queue
                        .iter()
                        .enumerate()
                        .map(|(i, q)| RankedQuestion {
                            qid: q.qid.clone(),
                            rank: i as u32 + 1,
                        })
                        .collect()
                }
            };
            self.state.questions().write().await.apply_ranking(&ranking);
        }

        self.cycles += 1;
        let ranked_questions = self.state.questions().read().await.ranked_active();
        self.publisher.publish(AnalysisSnapshot {
            cycle: self.cycles,
            ranked_questions,
            diagnosis_data: diagnoses,
        });
        Ok(CycleOutcome::Published { cycle: self.cycles })
    }
}

/// Owner of a spawned worker. Dropping it signals the worker to stop.
pub struct WorkerHandle {
    stop_tx: watch::Sender<bool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signals the worker to stop and waits for its thread to finish.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(thread) = self.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => error!("Analysis worker thread panicked"),
                Err(e) => error!(error = ?e, "Failed to join analysis worker thread"),
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        DiagnosisUpdate, MockDiagnoser, MockDiagnosisEvaluator, MockDiagnosisTrigger,
        MockQuestionRanker, TriggerDecision,
    };
    use crate::diagnosis::DiagnosisRecord;
    use crate::question::{QuestionPoolConfig, QuestionStatus};
    use crate::snapshot::{self, SnapshotSubscriber};
    use crate::transcript::Speaker;
    use anyhow::anyhow;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn triggered() -> MockDiagnosisTrigger {
        let mut trigger = MockDiagnosisTrigger::new();
        trigger.expect_check().returning(|_| {
            Ok(TriggerDecision {
                should_run: true,
                reason: "new symptoms".to_string(),
            })
        });
        trigger
    }

    fn diagnosing(update: DiagnosisUpdate) -> MockDiagnoser {
        let mut diagnoser = MockDiagnoser::new();
        diagnoser
            .expect_diagnose()
            .returning(move |_, _| Ok(update.clone()));
        diagnoser
    }

    fn echo_evaluator() -> MockDiagnosisEvaluator {
        let mut evaluator = MockDiagnosisEvaluator::new();
        evaluator
            .expect_evaluate()
            .returning(|_, candidates, _| Ok(candidates.to_vec()));
        evaluator
    }

    fn unused_ranker() -> MockQuestionRanker {
        let mut ranker = MockQuestionRanker::new();
        ranker.expect_rank().never();
        ranker
    }

    fn analysts(
        trigger: MockDiagnosisTrigger,
        diagnoser: MockDiagnoser,
        evaluator: MockDiagnosisEvaluator,
        ranker: MockQuestionRanker,
    ) -> Analysts {
        Analysts {
            trigger: Arc::new(trigger),
            diagnoser: Arc::new(diagnoser),
            evaluator: Arc::new(evaluator),
            ranker: Arc::new(ranker),
        }
    }

    async fn state_with_exchange() -> Arc<AnalysisState> {
        let state = Arc::new(AnalysisState::new(QuestionPoolConfig::default()));
        state.record_utterance(Speaker::Interviewer, "Where does it hurt?").await;
        state
            .record_utterance(Speaker::Subject, "Upper right, worse after eating.")
            .await;
        state.complete_turn();
        state
    }

    fn worker(
        state: &Arc<AnalysisState>,
        analysts: Analysts,
        config: WorkerConfig,
    ) -> (AnalysisWorker, SnapshotSubscriber) {
        let (publisher, subscriber) = snapshot::channel();
        (
            AnalysisWorker::new(state.clone(), analysts, publisher, config),
            subscriber,
        )
    }

    #[tokio::test]
    async fn test_cycle_skips_until_enough_turns() {
        let state = Arc::new(AnalysisState::new(QuestionPoolConfig::default()));
        let mut trigger = MockDiagnosisTrigger::new();
        trigger.expect_check().never();
        let (mut worker, _sub) = worker(
            &state,
            analysts(trigger, MockDiagnoser::new(), MockDiagnosisEvaluator::new(), unused_ranker()),
            WorkerConfig {
                every_n_turns: 2,
                ..Default::default()
            },
        );

        assert_eq!(worker.run_cycle().await.unwrap(), CycleOutcome::Skipped);
        state.complete_turn();
        assert_eq!(worker.run_cycle().await.unwrap(), CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_not_triggered_leaves_pools_alone() {
        let state = state_with_exchange().await;
        let mut trigger = MockDiagnosisTrigger::new();
        trigger.expect_check().times(1).returning(|_| {
            Ok(TriggerDecision {
                should_run: false,
                reason: "small talk".to_string(),
            })
        });
        let mut diagnoser = MockDiagnoser::new();
        diagnoser.expect_diagnose().never();
        let (mut worker, mut sub) = worker(
            &state,
            analysts(trigger, diagnoser, MockDiagnosisEvaluator::new(), unused_ranker()),
            WorkerConfig::default(),
        );

        assert_eq!(worker.run_cycle().await.unwrap(), CycleOutcome::NotTriggered);
        // Same turn again: gated before the trigger is consulted.
        assert_eq!(worker.run_cycle().await.unwrap(), CycleOutcome::Skipped);
        assert!(sub.take_if_dirty().is_none());
        assert!(state.diagnoses().read().await.working().is_empty());
    }

    #[tokio::test]
    async fn test_full_cycle_updates_pools_and_publishes() {
        let state = state_with_exchange().await;
        let update = DiagnosisUpdate {
            diagnosis_list: vec![DiagnosisRecord::new(
                "D1",
                "Gallstones",
                ["RUQ pain", "Postprandial pain"],
            )],
            follow_up_questions: vec!["Any fever?".to_string(), "Any jaundice?".to_string()],
        };
        let mut ranker = MockQuestionRanker::new();
        ranker.expect_rank().times(1).returning(|_, diagnoses, queue| {
            assert_eq!(diagnoses.len(), 1);
            // Put the second question first; keep both.
            Ok(vec![
                RankedQuestion {
                    qid: queue[1].qid.clone(),
                    rank: 1,
                },
                RankedQuestion {
                    qid: queue[0].qid.clone(),
                    rank: 2,
                },
            ])
        });
        let (mut worker, mut sub) = worker(
            &state,
            analysts(triggered(), diagnosing(update), echo_evaluator(), ranker),
            WorkerConfig::default(),
        );

        assert_eq!(
            worker.run_cycle().await.unwrap(),
            CycleOutcome::Published { cycle: 1 }
        );

        let snapshot = sub.take_if_dirty().expect("snapshot should be published");
        assert_eq!(snapshot.cycle, 1);
        assert_eq!(snapshot.diagnosis_data[0].id, "D1");
        let contents: Vec<_> = snapshot
            .ranked_questions
            .iter()
            .map(|q| q.content.as_str())
            .collect();
        assert_eq!(contents, vec!["Any jaundice?", "Any fever?"]);
        assert_eq!(snapshot.ranked_questions[0].score, 10);
        assert_eq!(state.diagnoses().read().await.working().len(), 1);
    }

    #[tokio::test]
    async fn test_diagnoser_failure_leaves_pools_unchanged() {
        let state = state_with_exchange().await;
        state
            .diagnoses()
            .write()
            .await
            .update(&[DiagnosisRecord::new("D1", "Gastritis", ["Burning"])]);
        state.questions().write().await.ingest(["Any vomiting?"]);
        let diagnoses_before = state.diagnoses().read().await.clone();
        let questions_before = state.questions().read().await.clone();

        let mut diagnoser = MockDiagnoser::new();
        diagnoser
            .expect_diagnose()
            .returning(|_, _| Err(anyhow!("model overloaded")));
        let mut evaluator = MockDiagnosisEvaluator::new();
        evaluator.expect_evaluate().never();
        let (mut worker, mut sub) = worker(
            &state,
            analysts(triggered(), diagnoser, evaluator, unused_ranker()),
            WorkerConfig::default(),
        );

        let err = worker.run_cycle().await.unwrap_err();
        assert!(matches!(err, SessionError::Collaborator { step: "diagnose", .. }));
        assert_eq!(*state.diagnoses().read().await, diagnoses_before);
        assert_eq!(*state.questions().read().await, questions_before);
        assert!(sub.take_if_dirty().is_none());
    }

    #[tokio::test]
    async fn test_evaluator_failure_keeps_consolidated_pool() {
        let state = state_with_exchange().await;
        state
            .diagnoses()
            .write()
            .await
            .replace_consolidated(&[DiagnosisRecord::new("C1", "Previous", ["a"])]);
        let update = DiagnosisUpdate {
            diagnosis_list: vec![DiagnosisRecord::new("D2", "New", ["b"])],
            follow_up_questions: vec![],
        };
        let mut evaluator = MockDiagnosisEvaluator::new();
        evaluator
            .expect_evaluate()
            .returning(|_, _, _| Err(anyhow!("bad json")));
        let (mut worker, mut sub) = worker(
            &state,
            analysts(triggered(), diagnosing(update), evaluator, unused_ranker()),
            WorkerConfig::default(),
        );

        assert!(matches!(
            worker.run_cycle().await.unwrap(),
            CycleOutcome::Published { .. }
        ));
        let pool = state.diagnoses().read().await;
        assert_eq!(pool.consolidated().candidates()[0].id(), "C1");
        assert!(pool.working().get("D2").is_some());
        assert_eq!(sub.take_if_dirty().unwrap().diagnosis_data[0].id, "C1");
    }

    #[tokio::test]
    async fn test_ranker_failure_falls_back_to_queue_order() {
        let state = state_with_exchange().await;
        let update = DiagnosisUpdate {
            diagnosis_list: vec![],
            follow_up_questions: vec!["First?".to_string(), "Second?".to_string()],
        };
        let mut ranker = MockQuestionRanker::new();
        ranker
            .expect_rank()
            .returning(|_, _, _| Err(anyhow!("timeout")));
        let (mut worker, _sub) = worker(
            &state,
            analysts(triggered(), diagnosing(update), echo_evaluator(), ranker),
            WorkerConfig::default(),
        );

        worker.run_cycle().await.unwrap();

        let questions = state.questions().read().await;
        let ranked = questions.ranked_active();
        assert_eq!(ranked.len(), 2);
        assert_eq!((ranked[0].rank, ranked[0].score), (1, 10));
        assert_eq!((ranked[1].rank, ranked[1].score), (2, 9));
        assert!(questions.all().iter().all(|q| q.status == QuestionStatus::Active));
    }

    #[tokio::test]
    async fn test_trigger_failure_leaves_pools_and_gate_unchanged() {
        let state = state_with_exchange().await;
        state
            .diagnoses()
            .write()
            .await
            .update(&[DiagnosisRecord::new("D1", "Gastritis", ["Burning"])]);
        state.questions().write().await.ingest(["Any vomiting?"]);
        let diagnoses_before = state.diagnoses().read().await.clone();
        let questions_before = state.questions().read().await.clone();

        let mut trigger = MockDiagnosisTrigger::new();
        trigger
            .expect_check()
            .times(2)
            .returning(|_| Err(anyhow!("connection reset")));
        let mut diagnoser = MockDiagnoser::new();
        diagnoser.expect_diagnose().never();
        let (mut worker, mut sub) = worker(
            &state,
            analysts(trigger, diagnoser, MockDiagnosisEvaluator::new(), unused_ranker()),
            WorkerConfig::default(),
        );

        let err = worker.run_cycle().await.unwrap_err();
        assert!(matches!(err, SessionError::Collaborator { step: "trigger", .. }));
        assert_eq!(worker.last_analyzed_turn, 0);
        assert_eq!(*state.diagnoses().read().await, diagnoses_before);
        assert_eq!(*state.questions().read().await, questions_before);
        assert!(sub.take_if_dirty().is_none());

        // Same turn, but the gate did not move, so the trigger is asked again.
        assert!(worker.run_cycle().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_does_not_panic() {
        let state = Arc::new(AnalysisState::new(QuestionPoolConfig::default()));
        let mut trigger = MockDiagnosisTrigger::new();
        trigger.expect_check().never();
        let (worker, _sub) = worker(
            &state,
            analysts(trigger, MockDiagnoser::new(), MockDiagnosisEvaluator::new(), unused_ranker()),
            WorkerConfig {
                interval: Duration::ZERO,
                every_n_turns: 1,
            },
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = stop_tx.send(true);
        assert!(handle.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_does_not_stop_schedule() {
        let state = state_with_exchange().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let call_times = Arc::new(Mutex::new(Vec::new()));
        let mut diagnoser = MockDiagnoser::new();
        {
            let calls = calls.clone();
            let call_times = call_times.clone();
            diagnoser.expect_diagnose().returning(move |_, _| {
                call_times.lock().unwrap().push(tokio::time::Instant::now());
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(anyhow!("first call fails"))
                } else {
                    Ok(DiagnosisUpdate::default())
                }
            });
        }
        let (worker, mut sub) = worker(
            &state,
            analysts(triggered(), diagnoser, echo_evaluator(), unused_ranker()),
            WorkerConfig {
                interval: Duration::from_millis(100),
                every_n_turns: 1,
            },
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = stop_tx.send(true);
        handle.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let times = call_times.lock().unwrap();
        assert_eq!(times[1] - times[0], Duration::from_millis(100));
        assert_eq!(sub.take_if_dirty().unwrap().cycle, 1);
    }

    #[test]
    fn test_spawned_worker_stops_on_request() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let state = Arc::new(AnalysisState::new(QuestionPoolConfig::default()));
            let mut trigger = MockDiagnosisTrigger::new();
            trigger.expect_check().never();
            let (worker, _sub) = worker(
                &state,
                analysts(trigger, MockDiagnoser::new(), MockDiagnosisEvaluator::new(), unused_ranker()),
                WorkerConfig {
                    interval: Duration::from_millis(5),
                    every_n_turns: 1,
                },
            );
            let handle = worker.spawn().unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.stop().await;
        });
    }
}
