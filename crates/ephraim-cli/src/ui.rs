//! Console prompter: styled terminal output and line input.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use crossterm::style::Stylize;
use tokio::sync::{mpsc, Mutex};

use anyhow::Result;
use ephraim_core::prompter::Prompter;
use ephraim_core::state::{ConfidenceBand, Phase, Plan, RiskLevel};

/// Returned (as an error) when the user interrupts twice in a row; the
/// process exits with code 130.
#[derive(Debug)]
pub struct Interrupted;

impl std::fmt::Display for Interrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("interrupted")
    }
}

impl std::error::Error for Interrupted {}

pub struct ConsolePrompter {
    lines: Mutex<mpsc::UnboundedReceiver<String>>,
    consecutive_interrupts: AtomicU32,
}

impl ConsolePrompter {
    pub fn new() -> Self {
        // One reader thread for the whole session; read_line consumes
        // lines from the channel so an interrupted read does not leave a
        // competing reader behind.
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Self {
            lines: Mutex::new(rx),
            consecutive_interrupts: AtomicU32::new(0),
        }
    }
}

impl Default for ConsolePrompter {
    fn default() -> Self {
        Self::new()
    }
}

fn print_flush(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}

#[async_trait]
impl Prompter for ConsolePrompter {
    async fn read_line(&self, prompt: &str) -> Result<Option<String>> {
        print_flush(&format!("{}", prompt.bold()));

        let mut lines = self.lines.lock().await;
        tokio::select! {
            line = lines.recv() => {
                self.consecutive_interrupts.store(0, Ordering::Relaxed);
                Ok(line)
            }
            _ = tokio::signal::ctrl_c() => {
                let count = self.consecutive_interrupts.fetch_add(1, Ordering::Relaxed) + 1;
                if count >= 2 {
                    return Err(Interrupted.into());
                }
                println!();
                self.info("Interrupted. Type /quit to exit.");
                Ok(Some(String::new()))
            }
        }
    }

    async fn confirm(&self, question: &str) -> Result<bool> {
        loop {
            let Some(answer) = self.read_line(&format!("{question} [y/N]: ")).await? else {
                return Ok(false);
            };
            match answer.trim().to_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "" | "n" | "no" => return Ok(false),
                _ => self.warn("Please answer y or n."),
            }
        }
    }

    fn info(&self, message: &str) {
        println!("{message}");
    }

    fn success(&self, message: &str) {
        println!("{}", message.green());
    }

    fn warn(&self, message: &str) {
        println!("{}", message.yellow());
    }

    fn error(&self, message: &str) {
        println!("{}", message.red());
    }

    fn phase(&self, phase: Phase) {
        println!(
            "{}",
            format!("=== {} ===", phase.as_str().to_uppercase())
                .cyan()
                .bold()
        );
    }

    fn show_plan(&self, plan: &Plan) {
        println!("{}", "Proposed plan".bold());
        if !plan.goal_understanding.is_empty() {
            println!("  Goal: {}", plan.goal_understanding);
        }
        for (i, step) in plan.execution_steps.iter().enumerate() {
            println!("  {}. {}", i + 1, step);
        }
        if !plan.risk_assessment.is_empty() {
            println!("  Risk: {}", plan.risk_assessment);
        }
        if !plan.validation_plan.is_empty() {
            println!("  Validation: {}", plan.validation_plan);
        }
        if !plan.commit_strategy.is_empty() {
            println!("  Commit: {}", plan.commit_strategy);
        }
    }

    fn show_reply(&self, reasoning: &str, confidence: i64, risk: RiskLevel) {
        let shown: String = reasoning.chars().take(200).collect();
        println!("{} {}", "Reasoning:".dim(), shown.as_str().dim());

        let band = ConfidenceBand::from_score(confidence);
        let confidence_text = format!("Confidence: {confidence} ({})", band.as_str());
        match band {
            ConfidenceBand::High => println!("{}", confidence_text.green()),
            ConfidenceBand::Medium => println!("{}", confidence_text.yellow()),
            _ => println!("{}", confidence_text.red()),
        }

        let risk_text = format!("Risk: {}", risk.as_str());
        match risk {
            RiskLevel::Low => println!("{}", risk_text.green()),
            RiskLevel::Medium => println!("{}", risk_text.yellow()),
            RiskLevel::High => println!("{}", risk_text.red()),
        }
    }

    fn stream_fragment(&self, fragment: &str) {
        print_flush(fragment);
    }
}
