//! The agent loop: the main driver from user input to completion.
//!
//! The loop reads input, runs the plan/approve/execute/validate/CI
//! cycle, and enforces the bounds the model cannot be trusted with:
//! phase gating, iteration ceilings, misrouted-proposal limits, and
//! recovery after repeated failures.

pub mod context_doc;
pub mod subagent;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use anyhow::Result;

use crate::commands::{parse_command, Command, BUILTINS};
use crate::config::EphraimConfig;
use crate::conversation::{ConversationMemory, Turn};
use crate::git::load_git_status;
use crate::history::CommandHistory;
use crate::hooks::{HookEvent, HookOutcome, HookRunner};
use crate::mcp::McpManager;
use crate::model::{InvocationContext, ModelAction, ModelInterface, ModelReply, PromptKind};
use crate::prompter::Prompter;
use crate::recovery::{ErrorContext, RecoveryStrategist};
use crate::state::manager::{permitted_categories, StateManager};
use crate::state::{Phase, Plan};
use crate::tasks::TaskManager;
use crate::tools::{ToolCategory, ToolContext, ToolRegistry};

/// Misrouted plan proposals tolerated after approval before the loop
/// surfaces the mismatch and exits.
const MAX_MISROUTED_PROPOSALS: u32 = 3;

/// Identical failures of one `(action, params)` pair before the task is
/// force-closed.
const FORCE_COMPLETE_FAILURES: u32 = 3;

/// Everything the loop needs, constructed at boot and injected.
pub struct AgentServices {
    pub config: Arc<EphraimConfig>,
    pub registry: Arc<ToolRegistry>,
    pub model: ModelInterface,
    pub prompter: Arc<dyn Prompter>,
    pub subagents: Arc<subagent::SubAgentSupervisor>,
    pub tasks: Arc<TaskManager>,
    pub mcp: Option<Arc<McpManager>>,
    pub hooks: HookRunner,
    pub history: CommandHistory,
    pub streaming: bool,
}

/// What a slash command asks the REPL to do next.
enum CommandAction {
    Continue,
    Quit,
    Task(String),
}

pub struct AgentLoop {
    manager: StateManager,
    memory: ConversationMemory,
    strategist: RecoveryStrategist,
    services: AgentServices,
    /// Failure counts per `(action, params)` signature for the current task.
    failure_counts: HashMap<String, u32>,
}

impl AgentLoop {
    pub fn new(manager: StateManager, services: AgentServices) -> Self {
        Self {
            manager,
            memory: ConversationMemory::default(),
            strategist: RecoveryStrategist::new(),
            services,
            failure_counts: HashMap::new(),
        }
    }

    pub fn manager(&self) -> &StateManager {
        &self.manager
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Highest failure count currently tracked (0 when everything is
    /// recovered).
    pub fn failure_count(&self) -> u32 {
        self.failure_counts.values().copied().max().unwrap_or(0)
    }

    fn prompter(&self) -> Arc<dyn Prompter> {
        Arc::clone(&self.services.prompter)
    }

    fn tool_context(&self) -> ToolContext {
        let mut ctx = ToolContext::new(self.manager.state().repo_root.clone())
            .with_prompter(self.prompter())
            .with_subagents(Arc::clone(&self.services.subagents))
            .with_tasks(Arc::clone(&self.services.tasks));
        if let Some(mcp) = &self.services.mcp {
            ctx = ctx.with_mcp(Arc::clone(mcp));
        }
        ctx
    }

    /// The interactive REPL. Returns when the user quits or input ends.
    pub async fn run(&mut self) -> Result<()> {
        let prompter = self.prompter();
        let repo_root = self.manager.state().repo_root.clone();
        self.services
            .hooks
            .fire(HookEvent::OnStart, None, &repo_root)
            .await;

        prompter.info("Enter a task, or /help for commands.");

        loop {
            let Some(line) = prompter.read_line("Ephraim> ").await? else {
                break;
            };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }

            self.services.history.add(&line);

            if let Some(command) = parse_command(&line) {
                match self.handle_command(command).await {
                    CommandAction::Continue => continue,
                    CommandAction::Quit => break,
                    CommandAction::Task(prompt) => self.process_task(prompt).await,
                }
            } else {
                self.process_task(line).await;
            }
        }

        prompter.info("Goodbye!");
        if let Some(mcp) = &self.services.mcp {
            mcp.disconnect_all().await;
        }
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) -> CommandAction {
        let prompter = self.prompter();

        match command.name.as_str() {
            "help" => {
                prompter.info("Commands:");
                for (name, description) in BUILTINS {
                    prompter.info(&format!("  /{name:<12} {description}"));
                }
                prompter.info("Skills:");
                for skill in crate::skills::all() {
                    prompter.info(&format!("  /{:<12} {}", skill.name, skill.description));
                }
                CommandAction::Continue
            }
            "clear" => {
                self.memory.clear();
                prompter.info("Conversation memory cleared.");
                CommandAction::Continue
            }
            "status" => {
                let summary = self.manager.summary();
                if let Some(map) = summary.as_object() {
                    for (key, value) in map {
                        prompter.info(&format!("  {key}: {value}"));
                    }
                }
                if let Some(mcp) = &self.services.mcp {
                    prompter.info(&format!("  mcp: {}", mcp.status().await));
                }
                CommandAction::Continue
            }
            "tasks" => {
                let tasks = self.services.tasks.list_tasks(true).await;
                if tasks.is_empty() {
                    prompter.info("No background tasks.");
                }
                for task in tasks {
                    prompter.info(&format!(
                        "  [{}] {} - {} (exit: {:?})",
                        task.id,
                        task.command,
                        task.status.as_str(),
                        task.exit_code
                    ));
                }
                CommandAction::Continue
            }
            "background" => {
                if command.args.is_empty() {
                    prompter.warn("Usage: /background <shell command>");
                    return CommandAction::Continue;
                }
                let cwd = Some(self.manager.state().repo_root.clone());
                match self.services.tasks.start(&command.args, cwd, None).await {
                    Ok(id) => prompter.success(&format!("Started background task {id}")),
                    Err(e) => prompter.error(&format!("Failed to start: {e}")),
                }
                CommandAction::Continue
            }
            "compact" => {
                let removed = self.manager.compact_actions();
                prompter.info(&format!(
                    "Compacted action log ({removed} older entries dropped)."
                ));
                CommandAction::Continue
            }
            "reset" => {
                let path = self.manager.state().context_doc_path.clone();
                match std::fs::write(&path, crate::config::default_context_doc()) {
                    Ok(()) => prompter.success("Context.md reset to defaults."),
                    Err(e) => prompter.error(&format!("Reset failed: {e}")),
                }
                CommandAction::Continue
            }
            "quit" | "exit" | "q" => CommandAction::Quit,
            name => match crate::skills::get(name) {
                Some(skill) => match skill.expand(&command.args) {
                    Ok(prompt) => CommandAction::Task(prompt),
                    Err(message) => {
                        prompter.warn(&message);
                        CommandAction::Continue
                    }
                },
                None => {
                    prompter.warn(&format!("Unknown command: /{name}"));
                    CommandAction::Continue
                }
            },
        }
    }

    /// Run one task through the full workflow.
    pub async fn process_task(&mut self, task: String) {
        let prompter = self.prompter();
        let repo_root = self.manager.state().repo_root.clone();

        self.manager.set_goal(&task);
        self.failure_counts.clear();
        tracing::info!(goal = %task, "new task");

        if self.manager.phase() != Phase::Planning && !self.manager.transition(Phase::Planning) {
            prompter.error("Cannot start planning from the current phase.");
            return;
        }
        prompter.phase(Phase::Planning);
        self.manager.set_git(load_git_status(&repo_root));

        let mut current_prompt = task;
        let mut failure_note: Option<String> = None;
        let mut previous_reasoning: Option<String> = None;
        let mut misrouted: u32 = 0;

        while self.manager.can_continue() {
            let brief = {
                let categories = permitted_categories(self.manager.phase());
                let tools = self.services.registry.schemas_for(categories).await;
                self.manager.build_brief(tools, None)
            };
            let kind = if self.manager.phase() == Phase::Planning {
                PromptKind::Planning
            } else {
                PromptKind::Execution
            };
            let invocation = InvocationContext {
                history: self.memory.recent_messages(10),
                failure_note: failure_note.take(),
                previous_reasoning: previous_reasoning.take(),
            };

            let reply = if self.services.streaming {
                let stream_prompter = self.prompter();
                self.services
                    .model
                    .invoke_streaming(kind, &brief, &invocation, &current_prompt, |fragment| {
                        stream_prompter.stream_fragment(fragment)
                    })
                    .await
            } else {
                self.services
                    .model
                    .invoke(kind, &brief, &invocation, &current_prompt)
                    .await
            };

            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    // Model failures end the task loop; the REPL goes on.
                    prompter.error(&format!("Model error: {e}"));
                    return;
                }
            };

            self.manager.update_confidence(reply.confidence);
            self.manager.update_risk(reply.risk.as_str());
            prompter.show_reply(&reply.reasoning, reply.confidence, reply.risk);

            // Service a clarification question before any non-question action.
            if let Some(question) = reply.question.clone() {
                if !matches!(reply.action, ModelAction::AskUser { .. })
                    && self.manager.should_ask_clarification()
                {
                    if !self.handle_question(&question).await {
                        return;
                    }
                    current_prompt = self.manager.state().current_goal.clone();
                    continue;
                }
            }

            match reply.action.clone() {
                ModelAction::ProposePlan(proposal) => {
                    if self.manager.state().current_plan.approved {
                        misrouted += 1;
                        tracing::warn!(misrouted, "misrouted plan proposal after approval");
                        if misrouted >= MAX_MISROUTED_PROPOSALS {
                            prompter.error(
                                "The execution model keeps proposing plans instead of executing. \
                                 Stopping this task; try rephrasing or a different model.",
                            );
                            return;
                        }
                        let step = self.manager.current_step();
                        let step_text = self
                            .manager
                            .state()
                            .current_plan
                            .execution_steps
                            .get(step)
                            .cloned()
                            .unwrap_or_default();
                        failure_note = Some(format!(
                            "A plan is ALREADY APPROVED. Do NOT propose another plan. \
                             Execute step {} ('{}') now: respond with a JSON object whose \
                             \"action\" is a tool name and whose \"params\" is an object.",
                            step + 1,
                            step_text
                        ));
                        continue;
                    }

                    if !self.handle_plan_proposal(proposal).await {
                        return;
                    }
                }
                ModelAction::AskUser { question } => {
                    if !self.handle_question(&question).await {
                        return;
                    }
                    current_prompt = self.manager.state().current_goal.clone();
                    continue;
                }
                ModelAction::ToolCall { name, params } => {
                    match self.dispatch_tool(&name, params, &reply).await {
                        Dispatch::Rejected(reason) => {
                            failure_note = Some(reason);
                            continue;
                        }
                        Dispatch::Failed { note } => {
                            failure_note = Some(note);
                            previous_reasoning = Some(reply.reasoning.clone());
                        }
                        Dispatch::ForceCompleted | Dispatch::TaskComplete => return,
                        Dispatch::Succeeded => {}
                    }
                }
            }

            current_prompt = self.next_prompt();
        }

        if !self.manager.can_continue() {
            prompter.warn(&format!(
                "Iteration limit reached ({}). Stopping this task.",
                self.manager.state().execution.max_iterations
            ));
        }
    }

    /// Ask the user a question; append the answer to the goal. Returns
    /// false when the user cancels the task.
    async fn handle_question(&mut self, question: &str) -> bool {
        let prompter = self.prompter();
        prompter.warn(&format!("Question: {question}"));

        let answer = match prompter.read_line("Your answer: ").await {
            Ok(Some(answer)) => answer,
            _ => return false,
        };
        let answer = answer.trim().to_string();
        if answer.is_empty() || matches!(answer.to_lowercase().as_str(), "quit" | "cancel" | "stop")
        {
            return false;
        }

        self.manager
            .append_to_goal(&format!("Clarification: {answer}"));
        true
    }

    /// Store the proposed plan and run the approval gate. Returns false
    /// when the task loop should end (denial).
    async fn handle_plan_proposal(&mut self, proposal: crate::model::PlanProposal) -> bool {
        let prompter = self.prompter();
        let repo_root = self.manager.state().repo_root.clone();

        let plan = Plan {
            goal_understanding: proposal.goal_understanding,
            reasoning: proposal.reasoning,
            execution_steps: proposal.execution_steps,
            risk_assessment: proposal.risk_assessment,
            validation_plan: proposal.validation_plan,
            commit_strategy: proposal.commit_strategy,
            approved: false,
        };
        self.manager.set_plan(plan);
        prompter.show_plan(&self.manager.state().current_plan);
        self.manager.request_approval();

        let approved = prompter.confirm("Approve this plan?").await.unwrap_or(false);
        if approved {
            self.manager.grant_approval();
            prompter.success("Plan approved. Executing...");
            prompter.phase(Phase::Executing);
            context_doc::update(self.manager.state());
            self.services
                .hooks
                .fire(HookEvent::OnPlanApproved, None, &repo_root)
                .await;
            true
        } else {
            self.manager.deny_approval();
            prompter.info("Plan rejected. Provide feedback or a new task.");
            false
        }
    }

    /// Gate, execute and record one tool call.
    async fn dispatch_tool(
        &mut self,
        name: &str,
        params: Map<String, Value>,
        reply: &ModelReply,
    ) -> Dispatch {
        let prompter = self.prompter();
        let repo_root = self.manager.state().repo_root.clone();

        let Some(tool) = self.services.registry.get(name).await else {
            tracing::warn!(tool = name, "model requested unknown tool");
            return Dispatch::Rejected(format!(
                "Unknown tool '{name}'. Use only tools from the available tools list."
            ));
        };

        let (allowed, reason) = self.manager.can_use_tool(tool.as_ref());
        if !allowed {
            // Phase-rule violations are rejected with a log message; the
            // loop re-prompts rather than failing.
            tracing::info!(tool = name, %reason, "tool rejected by phase rules");
            return Dispatch::Rejected(reason);
        }

        // Step header while executing an approved plan.
        let state = self.manager.state();
        if self.manager.phase() == Phase::Executing
            && state.current_plan.approved
            && !state.current_plan.execution_steps.is_empty()
        {
            let step = self.manager.current_step();
            let total = state.current_plan.execution_steps.len();
            if let Some(text) = state.current_plan.execution_steps.get(step) {
                prompter.info(&format!(">>> Step {}/{}: {}", step + 1, total, text));
            }
        }
        prompter.info(&format!("    Tool: {name}"));

        let commit_hooks = name == "git_commit";
        let blocked = match self
            .services
            .hooks
            .fire(HookEvent::PreTool, Some(name), &repo_root)
            .await
        {
            HookOutcome::Block { reason } => Some(reason),
            HookOutcome::Continue if commit_hooks => {
                match self
                    .services
                    .hooks
                    .fire(HookEvent::PreCommit, Some(name), &repo_root)
                    .await
                {
                    HookOutcome::Block { reason } => Some(reason),
                    HookOutcome::Continue => None,
                }
            }
            HookOutcome::Continue => None,
        };

        let result = match blocked {
            Some(reason) => crate::tools::ToolResult::fail(format!("Blocked by hook: {reason}")),
            None => {
                let ctx = self.tool_context();
                let result = self
                    .services
                    .registry
                    .invoke(name, params.clone(), &ctx)
                    .await;
                self.services
                    .hooks
                    .fire(HookEvent::PostTool, Some(name), &repo_root)
                    .await;
                if commit_hooks && result.success {
                    self.services
                        .hooks
                        .fire(HookEvent::PostCommit, Some(name), &repo_root)
                        .await;
                }
                result
            }
        };

        self.manager
            .record_action(name, params.clone(), result.to_map(), result.success);
        self.memory.push(Turn {
            user_message: self.manager.state().current_goal.clone(),
            reasoning: reply.reasoning.clone(),
            action: name.to_string(),
            params: params.clone(),
            confidence: reply.confidence,
            risk: reply.risk,
            tool_success: result.success,
            tool_summary: result.summary.clone(),
            tool_error: result.error.clone(),
            phase: self.manager.phase(),
            timestamp: chrono::Utc::now(),
        });

        if result.success {
            self.failure_counts.clear();
            prompter.success(&format!("Result: {}", result.summary));

            if tool.category() == ToolCategory::Git {
                self.manager.set_git(load_git_status(&repo_root));
            }
            if name == "ci_status" {
                let mut ci = crate::state::CiStatus::default();
                ci.status = result
                    .data
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                ci.workflow_name = result
                    .data
                    .get("workflow")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                ci.run_id = result.data.get("run_id").and_then(Value::as_u64);
                ci.last_run_url = result
                    .data
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.manager.set_ci(ci);
            }

            if name == "final_answer" {
                self.complete_task().await;
                return Dispatch::TaskComplete;
            }

            self.progress_phase(tool.category()).await;
            return Dispatch::Succeeded;
        }

        // Failure path: classify, count, decide.
        let error_message = result
            .error
            .clone()
            .unwrap_or_else(|| "Unknown error".to_string());
        prompter.error(&format!("Failed: {error_message}"));

        let signature = format!("{name}|{}", Value::Object(params.clone()));
        let attempts = {
            let entry = self.failure_counts.entry(signature).or_insert(0);
            *entry += 1;
            *entry
        };

        let error_ctx = ErrorContext::new(
            name,
            error_message.clone(),
            params,
            attempts,
            self.manager.phase(),
            reply.reasoning.clone(),
        );
        self.services
            .hooks
            .fire(HookEvent::OnError, Some(name), &repo_root)
            .await;

        if attempts >= FORCE_COMPLETE_FAILURES {
            if self.strategist.should_complete(&error_ctx)
                || !self.strategist.should_retry(&error_ctx)
            {
                prompter.warn(&format!(
                    "Closing the task: '{name}' failed {attempts} times. Last error: {error_message}"
                ));
                self.complete_task().await;
                return Dispatch::ForceCompleted;
            }
        }

        let mut note = format!(
            "Action '{name}' failed with {}: {error_message} (attempt {attempts})",
            error_ctx.kind.as_str()
        );
        if let Some(suggestion) = self.strategist.suggest(&error_ctx) {
            note.push_str(&format!(
                ". Suggested recovery: call '{}' with params {} ({})",
                suggestion.action,
                Value::Object(suggestion.params.clone()),
                suggestion.reasoning
            ));
        }
        if self.strategist.should_retry(&error_ctx) {
            let adjusted = self.strategist.adjust_params(&error_ctx);
            if adjusted != error_ctx.original_params {
                note.push_str(&format!(
                    ". If you retry '{name}', use these adjusted params: {}",
                    Value::Object(adjusted)
                ));
            }
        }

        Dispatch::Failed { note }
    }

    /// Transition between execution phases once progress warrants it.
    async fn progress_phase(&mut self, category: ToolCategory) {
        let prompter = self.prompter();
        let state = self.manager.state();
        let steps = state.current_plan.execution_steps.len();

        if self.manager.phase() == Phase::Executing
            && state.current_plan.approved
            && steps > 0
            && self.manager.mutation_count() >= steps
        {
            if self.manager.transition(Phase::Validating) {
                prompter.phase(Phase::Validating);
            }
            return;
        }

        if self.manager.phase() == Phase::Validating
            && category == ToolCategory::Execution
            && self.services.config.ci.enabled
            && self.manager.transition(Phase::CiCheck)
        {
            prompter.phase(Phase::CiCheck);
        }
    }

    /// Transition to COMPLETED, rewrite the context document, and reset
    /// per-task state.
    async fn complete_task(&mut self) {
        let prompter = self.prompter();
        let repo_root = self.manager.state().repo_root.clone();

        self.manager.transition(Phase::Completed);
        prompter.phase(Phase::Completed);
        context_doc::update(self.manager.state());
        self.services
            .hooks
            .fire(HookEvent::OnComplete, None, &repo_root)
            .await;
        self.manager.reset_task();
        self.failure_counts.clear();
    }

    /// Prompt for the next iteration.
    fn next_prompt(&self) -> String {
        let state = self.manager.state();
        match state.recent_actions(1).last() {
            Some(last) => format!(
                "Continue with the task: {}\nLast action: {} - {}",
                state.current_goal,
                last.tool,
                last.summary()
            ),
            None => state.current_goal.clone(),
        }
    }
}

/// Outcome of one tool dispatch.
enum Dispatch {
    /// The tool ran and succeeded.
    Succeeded,
    /// The tool ran and failed; inject the note into the next prompt.
    Failed { note: String },
    /// The tool was not run (unknown or phase-rejected); re-prompt.
    Rejected(String),
    /// final_answer succeeded; the task is complete.
    TaskComplete,
    /// Repeated failures closed the task.
    ForceCompleted,
}
