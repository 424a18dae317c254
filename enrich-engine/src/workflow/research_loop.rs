//! Loop driver
//!
//! Walks the research graph for one item. Parallel phases issue their tasks
//! concurrently and apply the results in planning order; the adaptive loop
//! runs one task at a time since every plan depends on the latest state.
//!
//! # Costs
//! Every task result is charged in full: the share carried by accepted
//! updates goes through the ledger, and the remainder (failed tasks,
//! rejected updates) is charged directly, so `metrics.total_cost` always
//! equals the money spent.

use super::stuck_detector::StuckDetector;
use super::{ResearchNode, ResearchOutcome, ResearchRequest, TaskRecord};
use crate::activity::{ActivityLogger, OperationId, TracingActivityLogger};
use crate::error::{ResearchError, Result};
use crate::executor::{apply_field_updates, TaskExecutor, TaskResult};
use crate::ledger::ConfidenceLedger;
use crate::store::{EvidenceBundle, ResearchRecord, ResearchStore};
use crate::tools::{Decision, Evaluation, StopReason, ToolRegistry, ToolScorer};
use crate::types::{
    ItemFieldStates, ResearchConstraints, ResearchContext, ResearchTask, TaskHistory, ToolId,
};
use anyhow::Context;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Node transitions allowed per run before the walk is aborted
pub const DEFAULT_MAX_STEPS: u32 = 100;

/// Candidates a field may receive before it is given up on
pub const MAX_FIELD_ATTEMPTS: u32 = 6;

/// Tasks per parallel phase
const PHASE_TASK_LIMIT: usize = 2;

const IMAGE_PHASE_TOOLS: [ToolId; 2] = [ToolId::Ocr, ToolId::Vision];
const LOOKUP_PHASE_TOOLS: [ToolId; 2] = [ToolId::UpcLookup, ToolId::PriceHistoryIdentifier];

/// Mutable state of one run
struct RunState {
    context: ResearchContext,
    constraints: ResearchConstraints,
    ledger: ConfidenceLedger,
    detector: StuckDetector,
    states: ItemFieldStates,
    history: TaskHistory,
    evidence: EvidenceBundle,
    evaluation: Option<Evaluation>,
    pending: Option<ResearchTask>,
    tasks: Vec<TaskRecord>,
    iteration: u32,
}

impl RunState {
    fn spent(&self) -> f64 {
        self.states.metrics.total_cost
    }
}

/// Research loop driver
pub struct ResearchLoop {
    scorer: ToolScorer,
    executor: TaskExecutor,
    store: Arc<dyn ResearchStore>,
    logger: Arc<dyn ActivityLogger>,
    max_steps: u32,
}

impl ResearchLoop {
    pub fn new(
        registry: Arc<ToolRegistry>,
        executor: TaskExecutor,
        store: Arc<dyn ResearchStore>,
    ) -> Self {
        Self {
            scorer: ToolScorer::new(registry),
            executor,
            store,
            logger: Arc::new(TracingActivityLogger),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn ActivityLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn scorer(&self) -> &ToolScorer {
        &self.scorer
    }

    /// Research one item
    ///
    /// # Errors
    /// - `ResearchError::Config` when a planned tool has no backing service
    /// - `ResearchError::StepLimitExceeded` when the walk does not terminate
    ///   within the step limit (evidence saved so far stays salvageable)
    /// - `ResearchError::Store` when the final research record cannot be saved
    pub async fn run(&self, request: ResearchRequest) -> Result<ResearchOutcome> {
        let run_id = Uuid::new_v4();
        let item_id = request.item_id.clone();
        let operation = self.logger.start_operation(
            &item_id,
            run_id,
            "research",
            &format!("Researching item {}", item_id),
        );

        match self.walk(request, run_id, operation).await {
            Ok(outcome) => {
                self.logger.complete_operation(
                    operation,
                    &format!(
                        "{:?} after {} iteration(s), {} task(s), cost {:.4}",
                        outcome.decision,
                        outcome.iterations,
                        outcome.tasks.len(),
                        outcome.spent
                    ),
                );
                Ok(outcome)
            }
            Err(e) => {
                self.logger.fail_operation(operation, &e.to_string());
                Err(e)
            }
        }
    }

    async fn walk(
        &self,
        request: ResearchRequest,
        run_id: Uuid,
        operation: OperationId,
    ) -> Result<ResearchOutcome> {
        let mut run = self.initialize(request, run_id);
        let mut node = ResearchNode::InitializeFieldStates;
        let mut steps: u32 = 0;

        loop {
            steps += 1;
            if steps > self.max_steps {
                warn!(
                    item_id = %run.context.item_id,
                    %run_id,
                    steps = self.max_steps,
                    node = %node,
                    "Step limit exceeded"
                );
                return Err(ResearchError::StepLimitExceeded {
                    item_id: run.context.item_id.clone(),
                    run_id,
                    steps: self.max_steps,
                });
            }
            debug!(item_id = %run.context.item_id, node = %node, steps, "Entering node");
            self.logger
                .emit_progress(operation, node.as_str(), Some(run.states.metrics.completion_score as f32));

            node = match node {
                // field states are built before the walk starts
                ResearchNode::InitializeFieldStates => ResearchNode::ExtractFromImages,
                ResearchNode::ExtractFromImages => self.extract_from_images(&mut run).await?,
                ResearchNode::QuickLookups => self.quick_lookups(&mut run).await?,
                ResearchNode::PlanNextResearch => self.plan_next_research(&mut run),
                ResearchNode::ExecuteResearch => self.execute_research(&mut run).await?,
                ResearchNode::EvaluateFields => self.evaluate_fields(&mut run),
                ResearchNode::PersistResults => return self.persist_results(run).await,
            };
        }
    }

    fn initialize(&self, request: ResearchRequest, run_id: Uuid) -> RunState {
        let ResearchRequest {
            item_id,
            required_fields,
            recommended_fields,
            seed_data,
            target_marketplaces,
            image_urls,
            constraints,
        } = request;

        let ledger = ConfidenceLedger::from_constraints(&constraints);
        let states = ledger.initialize(
            &required_fields,
            &recommended_fields,
            &seed_data,
            &target_marketplaces,
        );

        let mut context = ResearchContext::new(item_id.clone()).with_images(image_urls);
        context.run_id = run_id;
        context.services = self.executor.services().configured();

        let detector = StuckDetector::new(constraints.stuck_threshold);
        let mut history = TaskHistory::new();
        detector.prime(&states, &mut history);

        info!(
            item_id = %item_id,
            %run_id,
            mode = %constraints.mode,
            max_cost = constraints.max_cost,
            max_iterations = constraints.max_iterations,
            fields = states.fields.len(),
            images = context.image_urls.len(),
            "Research run started"
        );

        RunState {
            evidence: EvidenceBundle::new(item_id, run_id),
            context,
            constraints,
            ledger,
            detector,
            states,
            history,
            evaluation: None,
            pending: None,
            tasks: Vec::new(),
            iteration: 0,
        }
    }

    async fn extract_from_images(&self, run: &mut RunState) -> Result<ResearchNode> {
        if !run.context.has_images() {
            debug!(item_id = %run.context.item_id, "No images, extraction phase skipped");
            return Ok(ResearchNode::QuickLookups);
        }
        self.run_phase(run, "extract_from_images", &IMAGE_PHASE_TOOLS)
            .await?;
        Ok(ResearchNode::QuickLookups)
    }

    async fn quick_lookups(&self, run: &mut RunState) -> Result<ResearchNode> {
        if run.states.identifier().is_none() {
            debug!(item_id = %run.context.item_id, "No identifier, quick lookups skipped");
            return Ok(ResearchNode::PlanNextResearch);
        }
        self.run_phase(run, "quick_lookups", &LOOKUP_PHASE_TOOLS)
            .await?;
        Ok(ResearchNode::PlanNextResearch)
    }

    /// Plan and run one concurrent phase
    async fn run_phase(&self, run: &mut RunState, phase: &str, tools: &[ToolId]) -> Result<()> {
        let tasks = self.scorer.plan_parallel_tasks(
            &run.states,
            &run.constraints,
            &run.context,
            run.spent(),
            &run.history,
            PHASE_TASK_LIMIT,
            tools,
        );
        if tasks.is_empty() {
            debug!(item_id = %run.context.item_id, phase, "No tasks planned for phase");
            return Ok(());
        }

        let operation = self.logger.start_operation(
            &run.context.item_id,
            run.context.run_id,
            phase,
            &format!("Running {} task(s)", tasks.len()),
        );
        for task in &tasks {
            run.history.record_attempt(task.tool);
        }

        let results = join_all(
            tasks
                .iter()
                .map(|task| self.executor.execute_task(task, &run.context, &run.states)),
        )
        .await;

        // Apply every completed result before surfacing a configuration error
        let mut first_error = None;
        for (task, result) in tasks.iter().zip(results) {
            match result {
                Ok(result) => self.absorb(run, task, result),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        self.save_evidence(run).await;

        if let Some(e) = first_error {
            self.logger.fail_operation(operation, &e.to_string());
            return Err(e);
        }

        info!(
            item_id = %run.context.item_id,
            phase,
            tasks = tasks.len(),
            spent = run.spent(),
            completion = run.states.metrics.completion_score,
            "Phase complete"
        );
        self.logger.complete_operation(
            operation,
            &format!("{} task(s), completion {:.2}", tasks.len(), run.states.metrics.completion_score),
        );
        Ok(())
    }

    fn plan_next_research(&self, run: &mut RunState) -> ResearchNode {
        let evaluation = match run.evaluation.take() {
            Some(evaluation) => evaluation,
            None => self.scorer.evaluate_field_states(
                &run.states,
                &run.constraints,
                run.spent(),
                run.iteration,
            ),
        };
        if evaluation.decision != Decision::Continue {
            run.evaluation = Some(evaluation);
            return ResearchNode::PersistResults;
        }

        match self.scorer.plan_next_task(
            &run.states,
            &run.constraints,
            &run.context,
            run.spent(),
            run.iteration,
            &run.history,
        ) {
            Some(task) => {
                debug!(
                    item_id = %run.context.item_id,
                    tool = %task.tool,
                    targets = ?task.target_fields,
                    rationale = %task.rationale,
                    "Task planned"
                );
                run.evaluation = Some(evaluation);
                run.pending = Some(task);
                ResearchNode::ExecuteResearch
            }
            None => {
                let evaluation = if run.history.consecutive_no_progress >= run.constraints.stuck_threshold {
                    evaluation.into_stop(StopReason::Stuck, "Research stopped making progress")
                } else {
                    evaluation.into_stop(
                        StopReason::NoViableTool,
                        "No available tool can research the remaining fields",
                    )
                };
                info!(
                    item_id = %run.context.item_id,
                    reason = ?evaluation.diagnostics.reason,
                    "Planner found no task"
                );
                run.evaluation = Some(evaluation);
                ResearchNode::PersistResults
            }
        }
    }

    async fn execute_research(&self, run: &mut RunState) -> Result<ResearchNode> {
        let Some(task) = run.pending.take() else {
            return Ok(ResearchNode::PlanNextResearch);
        };

        let operation = self.logger.start_operation(
            &run.context.item_id,
            run.context.run_id,
            task.tool.as_str(),
            &task.rationale,
        );
        run.history.record_attempt(task.tool);

        let result = match self
            .executor
            .execute_task(&task, &run.context, &run.states)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                self.logger.fail_operation(operation, &e.to_string());
                return Err(e);
            }
        };

        match &result.error {
            Some(error) => self.logger.fail_operation(operation, error),
            None => self.logger.complete_operation(
                operation,
                &format!("{} candidate(s)", result.field_updates.len()),
            ),
        }

        self.absorb(run, &task, result);
        run.iteration += 1;
        run.states = run.ledger.with_iteration(&run.states, run.iteration);
        self.save_evidence(run).await;

        Ok(ResearchNode::EvaluateFields)
    }

    fn evaluate_fields(&self, run: &mut RunState) -> ResearchNode {
        for name in run.ledger.fields_needing_research(&run.states) {
            let exhausted = run
                .states
                .get(&name)
                .is_some_and(|f| f.attempts >= MAX_FIELD_ATTEMPTS);
            if exhausted {
                warn!(
                    item_id = %run.context.item_id,
                    field = %name,
                    attempts = MAX_FIELD_ATTEMPTS,
                    "Field attempt cap reached, giving up on field"
                );
                run.states = run.ledger.mark_as_failed(&run.states, &name);
            }
        }

        let mut evaluation = self.scorer.evaluate_field_states(
            &run.states,
            &run.constraints,
            run.spent(),
            run.iteration,
        );

        let stuck = run.detector.observe(&run.states, &mut run.history);
        if stuck && evaluation.decision == Decision::Continue {
            warn!(
                item_id = %run.context.item_id,
                no_progress = run.history.consecutive_no_progress,
                "Field state unchanged, stopping"
            );
            evaluation = evaluation.into_stop(StopReason::Stuck, "Research stopped making progress");
        }

        let next = if evaluation.decision == Decision::Continue {
            ResearchNode::PlanNextResearch
        } else {
            ResearchNode::PersistResults
        };
        run.evaluation = Some(evaluation);
        next
    }

    async fn persist_results(&self, run: RunState) -> Result<ResearchOutcome> {
        let evaluation = match run.evaluation {
            Some(evaluation) => evaluation,
            None => self.scorer.evaluate_field_states(
                &run.states,
                &run.constraints,
                run.spent(),
                run.iteration,
            ),
        };

        let outcome = ResearchOutcome {
            run_id: run.context.run_id,
            item_id: run.context.item_id.clone(),
            decision: evaluation.decision,
            diagnostics: evaluation.diagnostics,
            spent: run.states.metrics.total_cost,
            states: run.states,
            iterations: run.iteration,
            tasks: run.tasks,
        };

        if let Err(e) = self.store.save_evidence(&run.evidence).await {
            warn!(item_id = %outcome.item_id, error = %e, "Failed to save final evidence");
        }
        self.store
            .save_research(&ResearchRecord::from_outcome(outcome.clone()))
            .await
            .with_context(|| format!("Failed to persist research for item {}", outcome.item_id))?;

        info!(
            item_id = %outcome.item_id,
            run_id = %outcome.run_id,
            decision = ?outcome.decision,
            reason = ?outcome.diagnostics.reason,
            iterations = outcome.iterations,
            tasks = outcome.tasks.len(),
            spent = outcome.spent,
            completion = outcome.states.metrics.completion_score,
            "Research run finished"
        );

        Ok(outcome)
    }

    /// Fold one task result into the run
    fn absorb(&self, run: &mut RunState, task: &ResearchTask, result: TaskResult) {
        let before = run.spent();
        let (states, accepted) = apply_field_updates(&run.ledger, &run.states, &result.field_updates);
        let charged = states.metrics.total_cost - before;
        run.states = run.ledger.with_charge(&states, result.cost - charged);

        if !result.success || accepted.is_empty() {
            debug!(tool = %task.tool, success = result.success, "Tool produced no usable result");
            run.history.mark_failed(task.tool);
        }
        run.evidence.record(task.id, task.tool, &accepted);

        run.tasks.push(TaskRecord {
            task_id: task.id,
            tool: task.tool,
            target_fields: task.target_fields.clone(),
            success: result.success,
            cost: result.cost,
            time_ms: result.time_ms,
            accepted_updates: accepted.len(),
            rejected_updates: result.field_updates.len() - accepted.len(),
            error: result.error,
        });
    }

    /// Evidence is best-effort mid-run; a store outage must not end the run
    async fn save_evidence(&self, run: &RunState) {
        if let Err(e) = self.store.save_evidence(&run.evidence).await {
            warn!(
                item_id = %run.context.item_id,
                run_id = %run.context.run_id,
                error = %e,
                "Failed to save evidence"
            );
        }
    }
}
