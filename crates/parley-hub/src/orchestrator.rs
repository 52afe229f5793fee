use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use parley_agents::prompt::{build_system_prompt, clip_response, context_to_chat, recent_speakers};
use parley_agents::strategy::{instruction_snippet, plan_strategy, MentionTarget, StrategyPlan};
use parley_agents::{AgentRecord, AgentRegistry, CapabilityError, ChatMessage};
use parley_broker::MessageBroker;
use parley_context::ContextStore;
use parley_core::config::HubConfig;
use parley_core::message::now_ms;
use parley_core::{mentions, ContextMessage, HistorySink, HubEvent, Message, SenderKind};

use crate::delay::{response_delay, DelayTuning};
use crate::queue::{QueuedResponse, ResponseQueue, ResponseTrigger};

/// The room the background conversation loop ticks for.
const DEFAULT_ROOM: &str = "default";

const EVENT_CAPACITY: usize = 256;
const READY_CHANNEL_CAPACITY: usize = 64;
const DISPATCH_CHANNEL_CAPACITY: usize = 8;

struct SleepState {
    agent_message_count: u32,
    last_agent_message_ms: i64,
    sleeping: bool,
}

/// Top-level coordinator: wires the broker into the transcript and the
/// scheduler, owns the background ticker and the sleep/wake counter, and
/// turns inbound messages into scheduled replies and outbound broadcasts.
///
/// All mutable hub state lives here; tests construct fresh orchestrators.
pub struct Orchestrator {
    cfg: HubConfig,
    registry: Arc<AgentRegistry>,
    broker: Arc<MessageBroker>,
    context: Arc<RwLock<ContextStore>>,
    queue: Arc<ResponseQueue>,
    events: broadcast::Sender<HubEvent>,
    state: Mutex<SleepState>,
    /// roomId -> allowed agent ids. Missing or empty set means every active
    /// agent is eligible.
    allow: RwLock<HashMap<String, HashSet<String>>>,
    history: Option<Arc<dyn HistorySink>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(
        cfg: HubConfig,
        registry: Arc<AgentRegistry>,
        history: Option<Arc<dyn HistorySink>>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let broker = Arc::new(MessageBroker::new(
            cfg.max_queue,
            Duration::from_millis(cfg.processing_quantum_ms),
            events.clone(),
        ));
        let queue = Arc::new(ResponseQueue::new(
            cfg.max_concurrent_responses,
            Duration::from_millis(cfg.queue_retry_ms),
        ));
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            context: Arc::new(RwLock::new(ContextStore::new(cfg.max_messages))),
            cfg,
            registry,
            broker,
            queue,
            events,
            state: Mutex::new(SleepState {
                agent_message_count: 0,
                last_agent_message_ms: 0,
                sleeping: false,
            }),
            allow: RwLock::new(HashMap::new()),
            history,
            shutdown_tx,
        })
    }

    /// Spawn the broker loop, the ready handler, the response queue, and the
    /// background ticker. Call once.
    pub fn start(self: &Arc<Self>) {
        let shutdown = self.shutdown_tx.subscribe();

        let (ready_tx, mut ready_rx) = mpsc::channel::<Message>(READY_CHANNEL_CAPACITY);
        tokio::spawn(self.broker.clone().run(ready_tx, shutdown.clone()));

        let this = self.clone();
        let mut sd = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = ready_rx.recv() => match maybe {
                        Some(m) => this.handle_ready(m),
                        None => break,
                    },
                    _ = sd.changed() => {
                        if *sd.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let (dispatch_tx, mut dispatch_rx) =
            mpsc::channel::<QueuedResponse>(DISPATCH_CHANNEL_CAPACITY);
        let probe: Arc<dyn Fn() -> bool + Send + Sync> = {
            let this = self.clone();
            Arc::new(move || this.is_sleeping())
        };
        tokio::spawn(self.queue.clone().run(dispatch_tx, probe, shutdown.clone()));

        let this = self.clone();
        let mut sd = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = dispatch_rx.recv() => match maybe {
                        Some(task) => {
                            let worker = this.clone();
                            tokio::spawn(async move { worker.run_generation(task).await });
                        }
                        None => break,
                    },
                    _ = sd.changed() => {
                        if *sd.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        tokio::spawn(self.clone().background_loop(shutdown));
    }

    /// Subscribe to outbound hub events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn history(&self) -> Option<&Arc<dyn HistorySink>> {
        self.history.as_ref()
    }

    pub fn is_sleeping(&self) -> bool {
        self.state.lock().unwrap().sleeping
    }

    /// Feed an inbound message into the broker.
    pub fn add_message(&self, message: Message) {
        if let Err(e) = self.broker.enqueue(message, None) {
            warn!(error = %e, "inbound message dropped");
        }
    }

    /// Announce a topic change as a high-priority system message.
    pub fn change_topic(&self, new_topic: &str, changed_by: &str, room_id: &str) {
        let content = format!("Topic changed to: \"{}\" by {}", new_topic, changed_by);
        let message = Message::system("system", &content, room_id);
        if let Err(e) = self.broker.enqueue(message, Some(1_000)) {
            warn!(error = %e, "topic change dropped");
            return;
        }
        let _ = self.events.send(HubEvent::TopicChanged {
            new_topic: new_topic.to_string(),
            changed_by: changed_by.to_string(),
            room_id: room_id.to_string(),
        });
    }

    /// Restrict a room to the given agent ids. An empty list clears the
    /// restriction.
    pub fn set_room_allowed_agents(&self, room_id: &str, agent_ids: Vec<String>) {
        let mut allow = self.allow.write().unwrap();
        if agent_ids.is_empty() {
            allow.remove(room_id);
        } else {
            allow.insert(room_id.to_string(), agent_ids.into_iter().collect());
        }
    }

    pub fn clear_room_allowed_agents(&self, room_id: &str) {
        self.allow.write().unwrap().remove(room_id);
    }

    /// Admin wake: reset the counter and resume scheduling.
    pub fn wake(&self) {
        self.wake_agents();
    }

    /// Admin sleep: stop dispatching new generations. In-flight ones finish.
    pub fn sleep(&self) {
        self.enter_sleep("admin");
    }

    /// Cancel the background ticker and the processing loops, then drop all
    /// pending work. In-flight capability calls are detached; their
    /// completions are ignored.
    pub fn shutdown(&self) {
        info!("hub shutting down");
        let _ = self.shutdown_tx.send(true);
        self.queue.clear();
        self.broker.clear();
        self.context.write().unwrap().clear();
    }

    // -------------------------------------------------------------------------
    // Broker-ready path
    // -------------------------------------------------------------------------

    /// Handle one message leaving the broker loop: append it to the
    /// transcript, update scheduling state, and broadcast it. This runs on a
    /// single task, which keeps transcript writes and broadcast order
    /// aligned with broker dequeue order.
    fn handle_ready(&self, message: Message) {
        let room_id = message.room_id.clone();

        {
            let mut ctx = self.context.write().unwrap();
            ctx.append(ContextMessage::visible(message.clone()));
            if self.cfg.verbose_context_logging {
                debug!(room = %room_id, transcript_len = ctx.len(), "message appended");
            }
        }

        if let Some(history) = &self.history {
            if let Err(e) = history.record(&message) {
                warn!(error = %e, "failed to record message history");
            }
        }

        match message.sender_kind {
            SenderKind::User => {
                self.wake_agents();
                if !message.suppress_agent_responses {
                    self.schedule(&room_id, true, Some(&message));
                }
            }
            SenderKind::Agent => {
                if !message.is_internal_responder {
                    self.note_agent_message();
                }
            }
            SenderKind::System => {}
        }

        self.broker.broadcast(&message, &room_id);
    }

    fn note_agent_message(&self) {
        let should_sleep = {
            let mut state = self.state.lock().unwrap();
            state.agent_message_count += 1;
            state.last_agent_message_ms = now_ms();
            !state.sleeping && state.agent_message_count >= self.cfg.max_agent_messages
        };
        if should_sleep {
            self.enter_sleep("message-cap");
        }
    }

    fn wake_agents(&self) {
        let was_sleeping = {
            let mut state = self.state.lock().unwrap();
            state.agent_message_count = 0;
            std::mem::replace(&mut state.sleeping, false)
        };
        if was_sleeping {
            info!("agents awakened");
            let _ = self.events.send(HubEvent::AgentsAwakened);
        }
    }

    fn enter_sleep(&self, reason: &str) {
        let entered = {
            let mut state = self.state.lock().unwrap();
            !std::mem::replace(&mut state.sleeping, true)
        };
        if entered {
            info!(reason, "agents sleeping");
            let _ = self.events.send(HubEvent::AgentsSleeping {
                reason: reason.to_string(),
            });
        }
    }

    // -------------------------------------------------------------------------
    // Scheduling
    // -------------------------------------------------------------------------

    /// Pick the responder set for a trigger and enqueue their generation
    /// tasks. `trigger` is the message being answered; background rounds
    /// pass `None` and fall back to the transcript tail.
    fn schedule(&self, room_id: &str, is_user_response: bool, trigger: Option<&Message>) {
        if self.is_sleeping() {
            return;
        }

        let allowed = self.allow.read().unwrap().get(room_id).cloned();
        let active: Vec<Arc<AgentRecord>> = self
            .registry
            .active_agents()
            .into_iter()
            .filter(|a| allowed.as_ref().map(|set| set.contains(&a.id)).unwrap_or(true))
            .collect();
        if active.is_empty() {
            return;
        }

        let typing_count = self.registry.generating_count();
        let eligible: Vec<Arc<AgentRecord>> = active
            .into_iter()
            .filter(|a| !a.is_generating() && (is_user_response || !a.just_responded()))
            .collect();
        if eligible.is_empty() {
            return;
        }

        let trigger_message: Option<Message> = trigger.cloned().or_else(|| {
            let ctx = self.context.read().unwrap();
            ctx.last_message()
                .filter(|m| !m.is_internal)
                .map(|m| m.message.clone())
        });

        let mentioned: Vec<Arc<AgentRecord>> = trigger_message
            .as_ref()
            .map(|t| {
                eligible
                    .iter()
                    .filter(|a| t.mentions_alias(&a.normalized_alias))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let eligible_count = eligible.len();
        let (base_min, base_max) = if is_user_response {
            (1, (0.30 * eligible_count as f64).ceil().max(1.0) as usize)
        } else {
            (0, (0.25 * eligible_count as f64).ceil().max(1.0) as usize)
        };
        let final_min = base_min.max(mentioned.len());
        let final_max = base_max.max(final_min);

        let mut rng = rand::thread_rng();
        let lo = final_min.saturating_sub(mentioned.len());
        let hi = final_max.saturating_sub(mentioned.len());
        let extra_count = rng.gen_range(lo..=hi);

        let pool: Vec<Arc<AgentRecord>> = eligible
            .into_iter()
            .filter(|a| !mentioned.iter().any(|m| m.id == a.id))
            .collect();
        let extras = sample_by_recency(pool, extra_count, now_ms(), &mut rng);

        let tuning = DelayTuning::from(&self.cfg);
        let now = Instant::now();
        let trigger_ref = trigger_message.as_ref().map(|t| ResponseTrigger {
            message_id: t.id.clone(),
            sender: t.sender.clone(),
        });

        let mut tasks = Vec::with_capacity(mentioned.len() + extras.len());
        let responders = mentioned
            .iter()
            .map(|a| (a, true))
            .chain(extras.iter().map(|a| (a, false)));
        for (index, (agent, is_mentioned)) in responders.enumerate() {
            let delay = response_delay(
                index,
                is_user_response,
                is_mentioned,
                typing_count,
                &tuning,
                &mut rng,
            );
            tasks.push(QueuedResponse {
                agent_id: agent.id.clone(),
                room_id: room_id.to_string(),
                is_user_response,
                is_mentioned,
                trigger: trigger_ref.clone(),
                scheduled_at: now + delay,
            });
        }

        if !tasks.is_empty() {
            debug!(
                room = %room_id,
                responders = tasks.len(),
                mentioned = mentioned.len(),
                user_response = is_user_response,
                "scheduled agent replies"
            );
            self.queue.enqueue_batch(tasks);
        }
    }

    // -------------------------------------------------------------------------
    // Generation
    // -------------------------------------------------------------------------

    async fn run_generation(self: Arc<Self>, task: QueuedResponse) {
        let Some(agent) = self.registry.get(&task.agent_id) else {
            // A record vanishing mid-flight is a wiring bug; abort this task
            // but keep the scheduler alive.
            warn!(agent_id = %task.agent_id, "queued response for unknown agent");
            self.queue.on_complete();
            return;
        };

        if self.is_sleeping() || !agent.is_active() || agent.is_generating() {
            debug!(agent_id = %agent.id, "generation blocked at dispatch, dropping task");
            self.queue.on_complete();
            return;
        }

        agent.set_generating(true);
        let _ = self.events.send(HubEvent::AgentGeneratingStart {
            agent_id: agent.id.clone(),
            room_id: task.room_id.clone(),
        });

        let started = std::time::Instant::now();
        match self.generate_once(&agent, &task).await {
            Ok((content, plan, response_time_ms)) => {
                let mut reply = Message::agent(&agent.display_name, &content, &task.room_id);
                reply.agent_id = Some(agent.id.clone());
                reply.provider_key = Some(agent.provider_key.clone());
                reply.model_key = Some(agent.model_key.clone());
                reply.alias = Some(agent.alias.clone());
                reply.normalized_alias = Some(agent.normalized_alias.clone());
                reply.response_type = Some(
                    if task.is_user_response {
                        "user-response"
                    } else {
                        "background"
                    }
                    .to_string(),
                );
                reply.interaction_strategy = Some(plan.strategy.as_str().to_string());
                if task.is_mentioned {
                    if let Some(trigger) = &task.trigger {
                        reply.trigger_message_id = Some(trigger.message_id.clone());
                        reply.trigger_sender = Some(trigger.sender.clone());
                    }
                }

                if self.broker.enqueue(reply, None).is_ok() {
                    let _ = self.events.send(HubEvent::AgentResponse {
                        agent_id: agent.id.clone(),
                        room_id: task.room_id.clone(),
                        response_time_ms,
                    });
                }
                agent.touch_last_message(now_ms());
                agent.set_just_responded(true);
            }
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "agent generation failed");
                let _ = self.events.send(HubEvent::AgentError {
                    agent_id: agent.id.clone(),
                    room_id: task.room_id.clone(),
                    error: e.to_string(),
                    response_time_ms: started.elapsed().as_millis() as u64,
                });
            }
        }

        agent.set_generating(false);
        let _ = self.events.send(HubEvent::AgentGeneratingStop {
            agent_id: agent.id.clone(),
            room_id: task.room_id.clone(),
        });
        self.queue.on_complete();
    }

    /// Build prompt context, call the capability, and shape the response.
    async fn generate_once(
        &self,
        agent: &Arc<AgentRecord>,
        task: &QueuedResponse,
    ) -> Result<(String, StrategyPlan, u64), CapabilityError> {
        let tail = {
            let ctx = self.context.read().unwrap();
            ctx.tail(self.cfg.context_window)
        };
        let recent = &tail[tail.len().saturating_sub(self.cfg.recent_for_strategy)..];

        let plan = {
            let mut rng = rand::thread_rng();
            plan_strategy(
                agent,
                recent,
                task.is_user_response,
                &self.registry,
                self.cfg.potential_mention_targets,
                self.cfg.random_mention_probability,
                &mut rng,
            )
        };

        let last_visible = recent.iter().rev().find(|m| !m.is_internal);
        let last_kind = last_visible.map(|m| m.message.sender_kind);
        let mentioner_token = last_visible
            .filter(|m| m.message.sender_kind == SenderKind::Agent)
            .and_then(|m| self.registry.find_from_message(&m.message))
            .map(|r| self.registry.mention_token(&r));

        let snippet = instruction_snippet(&plan, last_kind, mentioner_token.as_deref());

        let mut prompt_tail = tail.clone();
        prompt_tail.push(ContextMessage::internal(Message::system(
            "system",
            &snippet,
            &task.room_id,
        )));

        let others: Vec<String> = self
            .registry
            .active_agents()
            .into_iter()
            .filter(|a| a.id != agent.id)
            .map(|a| a.display_name.clone())
            .collect();
        let speakers = recent_speakers(&tail, self.cfg.recent_for_prompt);
        let system = build_system_prompt(
            agent,
            &others,
            &speakers,
            task.is_user_response,
            self.cfg.enable_personas,
        );

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(context_to_chat(agent, &prompt_tail));
        if self.cfg.verbose_context_logging {
            debug!(agent_id = %agent.id, turns = messages.len(), "prompt context assembled");
        }

        let call_started = std::time::Instant::now();
        let generation = agent.capability().generate(&messages).await?;
        let response_time_ms = generation
            .response_time_ms
            .unwrap_or_else(|| call_started.elapsed().as_millis() as u64);

        let mut content = clip_response(
            &generation.content,
            self.cfg.max_sentences,
            self.cfg.max_response_chars,
        );

        if plan.should_mention {
            if let Some(token) = self.resolve_mention_token(plan.target.as_ref()) {
                let mut rng = rand::thread_rng();
                content =
                    mentions::add_mention(&content, &token, self.cfg.max_unique_mentions, &mut rng);
            }
        }
        content = mentions::limit_mentions(&content, self.cfg.max_unique_mentions);

        Ok((content, plan, response_time_ms))
    }

    fn resolve_mention_token(&self, target: Option<&MentionTarget>) -> Option<String> {
        match target? {
            MentionTarget::Agent(id) => self
                .registry
                .get(id)
                .map(|r| self.registry.mention_token(&r)),
            MentionTarget::User(name) => {
                let trimmed = name.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(format!("@{}", trimmed))
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Background conversation loop
    // -------------------------------------------------------------------------

    /// Keeps agents chatting while users are quiet. Retries on a short
    /// interval while asleep or agent-less; otherwise ticks at a random
    /// point in the background window, schedules a round if the room has not
    /// been silent too long, and clears `just_responded` flags afterwards.
    async fn background_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        debug!("background loop started");
        loop {
            let idle = self.is_sleeping() || self.registry.active_agents().is_empty();
            let wait = if idle {
                Duration::from_millis(self.cfg.sleep_retry_ms)
            } else {
                let mut rng = rand::thread_rng();
                Duration::from_millis(
                    rng.gen_range(self.cfg.min_background_delay_ms..=self.cfg.max_background_delay_ms),
                )
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("background loop shutting down");
                        return;
                    }
                }
            }

            if self.is_sleeping() || self.registry.active_agents().is_empty() {
                continue;
            }

            self.maybe_rotate_topic();

            let last_agent_ms = self.state.lock().unwrap().last_agent_message_ms;
            let silent_for = now_ms() - last_agent_ms;
            if last_agent_ms > 0 && silent_for <= self.cfg.silence_timeout_ms as i64 {
                self.schedule(DEFAULT_ROOM, false, None);
            } else {
                debug!(silent_for, "room silent past timeout, skipping background round");
            }

            // A responder from round N is suppressed for exactly one
            // background round; the flag resets after this tick's pass.
            for agent in self.registry.all() {
                agent.set_just_responded(false);
            }
        }
    }

    fn maybe_rotate_topic(&self) {
        if self.cfg.topics.is_empty() {
            return;
        }
        let topic = {
            let mut rng = rand::thread_rng();
            if !rng.gen_bool(self.cfg.topic_change_chance.clamp(0.0, 1.0)) {
                return;
            }
            self.cfg.topics[rng.gen_range(0..self.cfg.topics.len())].clone()
        };
        self.change_topic(&topic, "moderator", DEFAULT_ROOM);
    }
}

/// Sample `count` agents without replacement, weighting each pick by how
/// long the agent has been quiet (`1 + idle_minutes`), so the least recently
/// active agents are favoured.
fn sample_by_recency<R: Rng>(
    pool: Vec<Arc<AgentRecord>>,
    count: usize,
    now: i64,
    rng: &mut R,
) -> Vec<Arc<AgentRecord>> {
    let mut weighted: Vec<(Arc<AgentRecord>, f64)> = pool
        .into_iter()
        .map(|a| {
            let idle_ms = (now - a.last_message_ms()).max(0) as f64;
            let weight = 1.0 + idle_ms / 60_000.0;
            (a, weight)
        })
        .collect();

    let mut out = Vec::new();
    while out.len() < count && !weighted.is_empty() {
        let total: f64 = weighted.iter().map(|(_, w)| w).sum();
        let mut roll = rng.gen_range(0.0..total);
        let mut picked = weighted.len() - 1;
        for (i, (_, w)) in weighted.iter().enumerate() {
            if roll < *w {
                picked = i;
                break;
            }
            roll -= w;
        }
        out.push(weighted.swap_remove(picked).0);
    }
    out
}
