use crate::bus::{MessageBus, MessageHandler, Subscription, WeakMessageBus};
use crate::envelope::{topics, Envelope, ResultBody, TaskAssignment};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};
use ubos_agent::agent::panic_message;
use ubos_agent::{Agent, AgentContext, RunOptions};
use ubos_core::{AgentResult, AgentSpec};

/// Binds agents to their assignment topics on a [`MessageBus`].
///
/// Each registered agent listens on `task.assign/{requirementId}` and
/// `task.assign/agent/{specId}`, publishes its result on
/// `task.result/{requirementId}` and replies to correlated requests.
pub struct AgentAdapter {
    bus: MessageBus,
    subscriptions: Vec<Subscription>,
}

impl AgentAdapter {
    pub fn new(bus: MessageBus) -> Self {
        Self {
            bus,
            subscriptions: Vec::new(),
        }
    }

    /// Subscribe `agent` to the assignment topics of `spec`.
    pub fn register(&mut self, agent: Arc<dyn Agent>, spec: &AgentSpec) {
        let handler: Arc<dyn MessageHandler> = Arc::new(AgentTaskHandler {
            agent,
            bus: self.bus.downgrade(),
        });
        for topic in [
            topics::assign_requirement(&spec.requirement_id),
            topics::assign_agent(&spec.id),
        ] {
            self.subscriptions
                .push(self.bus.subscribe(topic, Arc::clone(&handler)));
        }
        info!(agent = %spec.id, requirement = %spec.requirement_id, "Agent registered on bus");
    }

    /// Number of live topic subscriptions held by this adapter.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Unsubscribe every registered agent.
    pub fn dispose(&mut self) {
        let count = self.subscriptions.len();
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        debug!(subscriptions = count, "Agent adapter disposed");
    }
}

struct AgentTaskHandler {
    agent: Arc<dyn Agent>,
    bus: WeakMessageBus,
}

impl AgentTaskHandler {
    async fn run_guarded(&self, assignment: &TaskAssignment) -> AgentResult {
        let options = RunOptions::new(assignment.input.clone())
            .with_timeout_ms(assignment.timeout_ms)
            .with_dry_run(assignment.dry_run.unwrap_or(false));
        let context = AgentContext::with_shared(assignment.params.clone().unwrap_or_default());

        let started_at = Utc::now();
        match AssertUnwindSafe(self.agent.run(&options, &context))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => AgentResult::failure(
                self.agent.id(),
                &assignment.requirement_id,
                format!("agent panicked: {}", panic_message(panic.as_ref())),
                started_at,
            ),
        }
    }
}

#[async_trait]
impl MessageHandler for AgentTaskHandler {
    async fn handle(&self, envelope: &Envelope) {
        let assignment = match TaskAssignment::from_body(&envelope.body) {
            Ok(assignment) => assignment,
            Err(e) => {
                debug!(agent = %self.agent.id(), error = %e, "Ignoring malformed task message");
                return;
            }
        };
        let Some(bus) = self.bus.upgrade() else {
            return;
        };

        let result = self.run_guarded(&assignment).await;
        let body = ResultBody {
            task_id: assignment.task_id.clone(),
            requirement_id: assignment.requirement_id.clone(),
            result,
        };
        let reply = match Envelope::result(
            self.agent.agent_type().as_str(),
            &body,
            envelope.header.correlation_id.clone(),
        ) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(agent = %self.agent.id(), error = %e, "Could not encode result message");
                return;
            }
        };

        if let Err(e) = bus
            .publish_result(&topics::result(&assignment.requirement_id), &reply)
            .await
        {
            warn!(agent = %self.agent.id(), error = %e, "Result publish rejected");
        }
        bus.reply(envelope.correlation_id(), reply);
    }
}
