//! End-to-end scenarios for the agent loop with scripted fakes.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use anyhow::{anyhow, Result};

use ephraim_core::agent::subagent::{AgentKind, SubAgentSupervisor};
use ephraim_core::agent::{AgentLoop, AgentServices};
use ephraim_core::config::EphraimConfig;
use ephraim_core::history::CommandHistory;
use ephraim_core::hooks::HookRunner;
use ephraim_core::model::{ChatBackend, ChatMessage, ModelInterface};
use ephraim_core::prompter::Prompter;
use ephraim_core::state::{Phase, Plan, RiskLevel, SessionState};
use ephraim_core::tasks::TaskManager;
use ephraim_core::tools::implementations::register_all_tools;
use ephraim_core::tools::ToolRegistry;
use ephraim_core::StateManager;

/// Backend that replays a fixed script of replies.
struct ScriptedBackend {
    replies: Mutex<VecDeque<String>>,
    repeat_last: bool,
    last: Mutex<Option<String>>,
    calls: Mutex<u32>,
}

impl ScriptedBackend {
    fn new(replies: Vec<String>, repeat_last: bool) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            repeat_last,
            last: Mutex::new(None),
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn chat(&self, _model: &str, _messages: &[ChatMessage]) -> Result<String> {
        *self.calls.lock().unwrap() += 1;
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(reply) => {
                *self.last.lock().unwrap() = Some(reply.clone());
                Ok(reply)
            }
            None if self.repeat_last => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow!("empty script")),
            None => Err(anyhow!("script exhausted")),
        }
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<mpsc::UnboundedReceiver<Result<String>>> {
        let full = self.chat(model, messages).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(full));
        Ok(rx)
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Prompter that answers from queues and records everything shown.
#[derive(Default)]
struct ScriptedPrompter {
    confirms: Mutex<VecDeque<bool>>,
    answers: Mutex<VecDeque<String>>,
    phases: Mutex<Vec<Phase>>,
    errors: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    fn with_confirms(confirms: Vec<bool>) -> Self {
        Self {
            confirms: Mutex::new(confirms.into()),
            ..Default::default()
        }
    }

    fn phases(&self) -> Vec<Phase> {
        self.phases.lock().unwrap().clone()
    }

    fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn read_line(&self, _prompt: &str) -> Result<Option<String>> {
        Ok(self.answers.lock().unwrap().pop_front())
    }

    async fn confirm(&self, _question: &str) -> Result<bool> {
        Ok(self.confirms.lock().unwrap().pop_front().unwrap_or(false))
    }

    fn info(&self, _message: &str) {}

    fn success(&self, _message: &str) {}

    fn warn(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn phase(&self, phase: Phase) {
        self.phases.lock().unwrap().push(phase);
    }

    fn show_plan(&self, _plan: &Plan) {}

    fn show_reply(&self, _reasoning: &str, _confidence: i64, _risk: RiskLevel) {}

    fn stream_fragment(&self, _fragment: &str) {}
}

fn plan_reply(steps: &[&str]) -> String {
    json!({
        "reasoning": "plan the work",
        "confidence": 90,
        "risk": "LOW",
        "action": "propose_plan",
        "plan": {
            "goal_understanding": "the requested change",
            "reasoning": "straightforward",
            "execution_steps": steps,
            "risk_assessment": "low risk",
            "validation_plan": "run it",
            "commit_strategy": "single commit"
        }
    })
    .to_string()
}

fn tool_reply(action: &str, params: Value) -> String {
    json!({
        "reasoning": format!("use {action}"),
        "confidence": 90,
        "risk": "LOW",
        "action": action,
        "params": params
    })
    .to_string()
}

async fn build_loop(
    repo_root: &Path,
    backend: Arc<ScriptedBackend>,
    prompter: Arc<ScriptedPrompter>,
    configure: impl FnOnce(&mut EphraimConfig),
) -> AgentLoop {
    let mut config = EphraimConfig::default();
    config.ci.enabled = false;
    configure(&mut config);
    let config = Arc::new(config);

    let registry = Arc::new(ToolRegistry::new());
    register_all_tools(&registry).await;

    let backend: Arc<dyn ChatBackend> = backend;
    let services = AgentServices {
        config: Arc::clone(&config),
        registry,
        model: ModelInterface::new(Arc::clone(&backend), "planner", "executor"),
        prompter: prompter.clone(),
        subagents: Arc::new(SubAgentSupervisor::new(Arc::clone(&backend), "executor")),
        tasks: Arc::new(TaskManager::new()),
        mcp: None,
        hooks: HookRunner::from_config_lines(&config.hook_lines),
        history: CommandHistory::open(repo_root.join(".history")),
        streaming: false,
    };

    let state = SessionState {
        phase: Phase::Planning,
        repo_root: repo_root.to_path_buf(),
        config_doc_path: repo_root.join("Ephraim.md"),
        context_doc_path: repo_root.join("Context.md"),
        execution: ephraim_core::state::ExecutionState {
            iteration: 0,
            max_iterations: config.safety.max_iterations,
        },
        ..Default::default()
    };

    AgentLoop::new(StateManager::new(state, config), services)
}

#[tokio::test]
async fn plan_approval_happy_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(ScriptedBackend::new(
        vec![
            plan_reply(&["write calculator.py", "verify it", "wrap up"]),
            tool_reply(
                "write_file",
                json!({"path": "calculator.py", "content": "print(1 + 1)\n"}),
            ),
            tool_reply("final_answer", json!({"message": "Calculator created"})),
        ],
        false,
    ));
    let prompter = Arc::new(ScriptedPrompter::with_confirms(vec![true]));

    let mut agent = build_loop(dir.path(), backend, prompter.clone(), |_| {}).await;
    agent.process_task("create a cli calculator".to_string()).await;

    // Phase sequence as displayed: planning -> executing -> completed.
    assert_eq!(
        prompter.phases(),
        vec![Phase::Planning, Phase::Executing, Phase::Completed]
    );
    assert_eq!(agent.manager().phase(), Phase::Completed);

    // The file was really written.
    let written = std::fs::read_to_string(dir.path().join("calculator.py")).expect("tool wrote");
    assert!(written.contains("1 + 1"));

    // One record for the write, one for final_answer.
    let history = &agent.manager().state().action_history;
    assert_eq!(
        history.iter().filter(|a| a.tool == "write_file").count(),
        1
    );
    assert!(history.iter().all(|a| a.success));

    // Context document rewritten with the completed phase.
    let doc = std::fs::read_to_string(dir.path().join("Context.md")).expect("context doc");
    assert!(doc.contains("# Phase\ncompleted"));
}

#[tokio::test]
async fn context_document_rewritten_on_approval_and_completion() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(ScriptedBackend::new(
        vec![
            plan_reply(&["write the file"]),
            tool_reply("final_answer", json!({"message": "done"})),
        ],
        false,
    ));
    let prompter = Arc::new(ScriptedPrompter::with_confirms(vec![true]));

    // Hooks snapshot Context.md right after each rewrite.
    let mut agent = build_loop(dir.path(), backend, prompter, |config| {
        config.hook_lines = vec![
            "on_plan_approved: cp Context.md approved_snapshot.md".to_string(),
            "on_complete: cp Context.md complete_snapshot.md".to_string(),
        ];
    })
    .await;
    agent.process_task("small task".to_string()).await;

    let approved =
        std::fs::read_to_string(dir.path().join("approved_snapshot.md")).expect("approval write");
    assert!(approved.contains("# Phase\nexecuting"));
    assert!(approved.contains("1. write the file"));

    let completed =
        std::fs::read_to_string(dir.path().join("complete_snapshot.md")).expect("completion write");
    assert!(completed.contains("# Phase\ncompleted"));
}

#[tokio::test]
async fn misrouted_proposals_are_bounded() {
    let dir = tempfile::tempdir().expect("tempdir");
    // After approval the execution model keeps proposing plans.
    let backend = Arc::new(ScriptedBackend::new(
        vec![plan_reply(&["only step"]), plan_reply(&["again"])],
        true,
    ));
    let prompter = Arc::new(ScriptedPrompter::with_confirms(vec![true]));

    let mut agent = build_loop(dir.path(), backend.clone(), prompter.clone(), |_| {}).await;
    agent.process_task("do something".to_string()).await;

    // Loop surfaced the mismatch and stopped without completing.
    assert!(prompter
        .errors()
        .iter()
        .any(|e| e.contains("keeps proposing plans")));
    assert_eq!(agent.manager().phase(), Phase::Executing);

    // One planning call plus exactly three misrouted execution calls.
    assert_eq!(backend.calls(), 4);
    assert!(agent.manager().state().action_history.is_empty());
}

#[tokio::test]
async fn recoverable_patch_failure_counts_then_clears() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("main.py"), "print('hello')\n").expect("seed");

    // Failure only: script ends after the bad patch.
    let backend = Arc::new(ScriptedBackend::new(
        vec![
            plan_reply(&["patch main.py", "check result"]),
            tool_reply(
                "apply_patch",
                json!({"path": "main.py", "find": "no such text", "replace": "x"}),
            ),
        ],
        false,
    ));
    let prompter = Arc::new(ScriptedPrompter::with_confirms(vec![true]));
    let mut agent = build_loop(dir.path(), backend, prompter, |_| {}).await;
    agent.process_task("tweak main.py".to_string()).await;

    assert_eq!(agent.failure_count(), 1);
    assert_eq!(agent.manager().phase(), Phase::Executing);
    let failure = agent.memory().last_failure().expect("failed turn");
    assert_eq!(failure.action, "apply_patch");
    assert!(failure
        .tool_error
        .as_deref()
        .unwrap_or("")
        .contains("Pattern not found"));
}

#[tokio::test]
async fn failure_counter_resets_after_recovery() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("main.py"), "print('hello')\n").expect("seed");

    // Bad patch, then the model follows the recovery suggestion.
    let backend = Arc::new(ScriptedBackend::new(
        vec![
            plan_reply(&["patch main.py", "check result"]),
            tool_reply(
                "apply_patch",
                json!({"path": "main.py", "find": "no such text", "replace": "x"}),
            ),
            tool_reply("read_file", json!({"path": "main.py"})),
        ],
        false,
    ));
    let prompter = Arc::new(ScriptedPrompter::with_confirms(vec![true]));
    let mut agent = build_loop(dir.path(), backend, prompter, |_| {}).await;
    agent.process_task("tweak main.py".to_string()).await;

    assert_eq!(agent.failure_count(), 0);
    assert_eq!(agent.manager().phase(), Phase::Executing);

    let history = &agent.manager().state().action_history;
    assert_eq!(history.len(), 2);
    assert!(!history[0].success);
    assert!(history[1].success);
}

#[tokio::test]
async fn iteration_ceiling_halts_the_loop() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("notes.txt"), "neutral\n").expect("seed");

    let backend = Arc::new(ScriptedBackend::new(
        vec![
            plan_reply(&["read things forever"]),
            tool_reply("read_file", json!({"path": "notes.txt"})),
        ],
        true,
    ));
    let prompter = Arc::new(ScriptedPrompter::with_confirms(vec![true]));

    let mut agent = build_loop(dir.path(), backend, prompter.clone(), |config| {
        config.safety.max_iterations = 3;
    })
    .await;
    agent.process_task("loop forever".to_string()).await;

    // Exactly three dispatches, then the ceiling stops the loop.
    assert_eq!(agent.manager().state().action_history.len(), 3);
    assert!(!agent.manager().can_continue());
    assert!(prompter
        .warnings()
        .iter()
        .any(|w| w.contains("Iteration limit reached")));
}

#[tokio::test]
async fn phase_gating_blocks_run_command_while_planning() {
    let dir = tempfile::tempdir().expect("tempdir");

    // No plan proposed; while PLANNING the model asks for run_command.
    let backend = Arc::new(ScriptedBackend::new(
        vec![tool_reply(
            "run_command",
            json!({"command": "touch forbidden_marker"}),
        )],
        false,
    ));
    let prompter = Arc::new(ScriptedPrompter::default());
    let mut agent = build_loop(dir.path(), backend, prompter, |_| {}).await;
    agent.process_task("run something".to_string()).await;

    // No subprocess ran and nothing was recorded.
    assert!(!dir.path().join("forbidden_marker").exists());
    assert!(agent.manager().state().action_history.is_empty());
    assert_eq!(agent.manager().phase(), Phase::Planning);
}

#[tokio::test]
async fn parallel_explore_subagents_all_complete() {
    // Scenario 6 drives the supervisor directly, as the parent loop does.
    let backend = Arc::new(ScriptedBackend::new(
        vec![
            "found module A".to_string(),
            "found module B".to_string(),
            "found module C".to_string(),
        ],
        false,
    ));
    let supervisor = SubAgentSupervisor::new(backend, "executor");

    let mut ids = Vec::new();
    for task in ["map src/", "map tests/", "map docs/"] {
        ids.push(supervisor.spawn(task, AgentKind::Explore, None).await);
    }

    let results = supervisor
        .wait_all(&ids, std::time::Duration::from_secs(10))
        .await;
    assert_eq!(results.len(), 3);
    for id in &ids {
        let result = results[id].as_ref().expect("finished in time");
        assert!(result.success);
        assert!(result.output.contains("found module"));
    }

    for snapshot in supervisor.list(true).await {
        assert_eq!(
            snapshot.status,
            ephraim_core::agent::subagent::AgentStatus::Completed
        );
    }
}
