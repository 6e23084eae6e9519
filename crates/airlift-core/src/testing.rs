//! Recording fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::session::Session;
use crate::strategy::{Strategy, StrategyOutcome, StrategyPolicy};
use crate::tool::{CommandRunner, ToolError, ToolResult};
use crate::types::{CredentialCandidate, ExtractionStrategy, PeerDevice};

#[derive(Debug, Clone)]
pub enum Reply {
    Out(String),
    Fail,
    Hang,
}

struct Rule {
    pattern: String,
    replies: VecDeque<Reply>,
}

/// [`CommandRunner`] that answers from a script and records every command
/// line it was asked to run.
///
/// Rules match when the command line contains the pattern; the first
/// matching rule answers. A rule with several replies hands them out in
/// order and repeats the last one.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(self, pattern: &str, replies: Vec<Reply>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            replies: replies.into(),
        });
        self
    }

    pub fn reply(self, pattern: &str, out: &str) -> Self {
        self.rule(pattern, vec![Reply::Out(out.to_string())])
    }

    pub fn sequence(self, pattern: &str, outs: &[&str]) -> Self {
        let replies = outs.iter().map(|o| Reply::Out((*o).to_string())).collect();
        self.rule(pattern, replies)
    }

    pub fn fail(self, pattern: &str) -> Self {
        self.rule(pattern, vec![Reply::Fail])
    }

    pub fn hang(self, pattern: &str) -> Self {
        self.rule(pattern, vec![Reply::Hang])
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }

    fn next_reply(&self, line: &str) -> Reply {
        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules.iter_mut().find(|r| line.contains(&r.pattern)) else {
            return Reply::Fail;
        };
        if rule.replies.len() > 1 {
            rule.replies.pop_front().unwrap_or(Reply::Fail)
        } else {
            rule.replies.front().cloned().unwrap_or(Reply::Fail)
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str], limit: Duration) -> ToolResult<String> {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(line.clone());

        match self.next_reply(&line) {
            Reply::Out(out) => Ok(out),
            Reply::Fail => Err(ToolError::NonZeroExit {
                program: program.to_string(),
                code: Some(1),
                stderr: "scripted failure".to_string(),
            }),
            Reply::Hang => {
                tokio::time::sleep(limit).await;
                Err(ToolError::Timeout {
                    program: program.to_string(),
                    timeout: limit,
                })
            }
        }
    }
}

/// What a [`FakeStrategy`] does on each attempt.
#[derive(Debug, Clone)]
pub enum Step {
    Found(&'static str, &'static str),
    Nothing,
    Error,
}

/// [`Strategy`] that sleeps for a fixed cost, then plays scripted steps.
pub struct FakeStrategy {
    kind: ExtractionStrategy,
    policy: StrategyPolicy,
    cost: Duration,
    steps: Mutex<VecDeque<Step>>,
    invocations: Arc<Mutex<Vec<ExtractionStrategy>>>,
}

impl FakeStrategy {
    pub fn new(
        kind: ExtractionStrategy,
        steps: &[Step],
        log: &Arc<Mutex<Vec<ExtractionStrategy>>>,
    ) -> Self {
        Self {
            kind,
            policy: StrategyPolicy::new(Duration::ZERO, 1),
            cost: Duration::from_secs(1),
            steps: Mutex::new(steps.iter().cloned().collect()),
            invocations: Arc::clone(log),
        }
    }

    pub fn with_cost(mut self, cost: Duration) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_policy(mut self, min_budget: Duration, max_attempts: u32) -> Self {
        self.policy = StrategyPolicy::new(min_budget, max_attempts);
        self
    }
}

#[async_trait]
impl Strategy for FakeStrategy {
    fn kind(&self) -> ExtractionStrategy {
        self.kind
    }

    fn policy(&self) -> StrategyPolicy {
        self.policy
    }

    async fn attempt(&self, session: &Session) -> StrategyOutcome {
        self.invocations.lock().unwrap().push(self.kind);
        crate::poll::sleep_or_cancel(self.cost, session.cancel_token()).await;

        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Nothing);
        match step {
            Step::Found(name, pass) => StrategyOutcome::CredentialFound(CredentialCandidate {
                network_name: name.to_string(),
                passphrase: pass.to_string(),
                provenance: self.kind,
                raw_source: format!("ssid={name}\npsk={pass}\n"),
            }),
            Step::Nothing => StrategyOutcome::NoCredential,
            Step::Error => StrategyOutcome::StrategyError("scripted error".to_string()),
        }
    }
}

pub fn peer(address: &str) -> PeerDevice {
    PeerDevice::new(address, "Test Phone")
}

pub const ASSOCIATED: &str =
    "wlan0     IEEE 802.11  ESSID:\"HomeNet\"\n          Mode:Managed  Access Point: 11:22:33:44:55:66\n";

pub const UNASSOCIATED: &str =
    "wlan0     IEEE 802.11  ESSID:off/any\n          Mode:Managed  Access Point: Not-Associated\n";
