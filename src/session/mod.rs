pub mod scroll;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::analytics::{self, AnalyticsEvent, AnalyticsSink, HttpAnalytics};
use crate::auth::{acquire_token, NoAuth, TokenProvider};
use crate::config::BackendConfig;
use crate::conversation::{ConversationBackend, ConversationStore, HttpBackend};
use crate::credits::CreditsGuard;
use crate::events::EventBus;
use crate::model::{Attachment, ChatMessage, Problem, Solution, SolutionStatus};
use crate::transport::{CancelFlag, HttpTransport, ProblemStream, StreamEvent, Transport};

pub use scroll::ScrollFollower;

/// Session lifecycle. Terminal phases stay set until the next submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Submitting,
    Streaming,
    Completed,
    Cancelled,
    Errored,
}

/// Precondition failures. These are rejected before any transport call and
/// are not retryable through the retry mechanism.
#[derive(Debug, PartialEq, Eq)]
pub enum SubmitError {
    EmptyProblem,
    TooLong { limit: usize },
    NoCredits,
    NothingToRetry,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::EmptyProblem => write!(f, "question is empty"),
            SubmitError::TooLong { limit } => {
                write!(f, "question exceeds the {limit} character limit")
            }
            SubmitError::NoCredits => write!(f, "no credits remaining"),
            SubmitError::NothingToRetry => write!(f, "nothing to retry"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// State owned by one submission. Fresh per turn, so nothing leaks across
/// turns.
#[derive(Debug, Default)]
struct TurnState {
    first_content: bool,
    server_remaining: Option<u32>,
}

/// Orchestrates one submission end to end: precondition checks, transcript
/// appends, driving the pull stream, and the terminal transition.
///
/// At most one stream is active per instance: `submit` and `retry` take
/// `&mut self` and run the turn to its terminal phase before returning, so
/// the front end physically cannot start a second stream mid-turn.
pub struct ChatSession {
    config: BackendConfig,
    transport: Arc<dyn Transport>,
    analytics: Arc<dyn AnalyticsSink>,
    auth: Arc<dyn TokenProvider>,
    credits: CreditsGuard,
    store: ConversationStore,
    events: EventBus,
    scroll: ScrollFollower,
    user_id: String,
    phase: Phase,
    cancel: CancelFlag,
    loading: bool,
    error_message: Option<String>,
}

impl ChatSession {
    pub fn new(
        config: BackendConfig,
        user_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        backend: Arc<dyn ConversationBackend>,
        analytics: Arc<dyn AnalyticsSink>,
        auth: Arc<dyn TokenProvider>,
    ) -> Self {
        let events = EventBus::new();
        Self {
            credits: CreditsGuard::new(&config, events.clone()),
            store: ConversationStore::new(backend, events.clone()),
            transport,
            analytics,
            auth,
            events,
            scroll: ScrollFollower::new(),
            user_id: user_id.into(),
            phase: Phase::Idle,
            cancel: CancelFlag::new(),
            loading: false,
            error_message: None,
            config,
        }
    }

    /// Session wired against the HTTP backend, without authentication.
    pub fn from_config(config: BackendConfig, user_id: impl Into<String>) -> Self {
        let transport = Arc::new(HttpTransport::new(&config));
        let backend = Arc::new(HttpBackend::new(&config));
        let analytics = Arc::new(HttpAnalytics::new(&config));
        Self::new(config, user_id, transport, backend, analytics, Arc::new(NoAuth))
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True between submission and the first streamed content; the UI
    /// shows its blocking indicator exactly while this holds.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.store.messages()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.store.conversation_id()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn credits(&self) -> &CreditsGuard {
        &self.credits
    }

    pub fn credits_mut(&mut self) -> &mut CreditsGuard {
        &mut self.credits
    }

    pub fn scroll_mut(&mut self) -> &mut ScrollFollower {
        &mut self.scroll
    }

    /// Handle for the stop button; valid across submissions.
    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Submit a new problem and drive it to a terminal phase. Returns
    /// `Err` only for precondition failures; transport failures surface
    /// through `phase()` / `error_message()` and the message status.
    pub async fn submit(
        &mut self,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<(), SubmitError> {
        let trimmed = text.trim();
        if trimmed.is_empty() && attachment.is_none() {
            return Err(SubmitError::EmptyProblem);
        }
        if trimmed.chars().count() > self.config.question_limit {
            return Err(SubmitError::TooLong {
                limit: self.config.question_limit,
            });
        }

        let problem = Problem::new(trimmed, attachment, self.user_id.clone());
        self.run_problem(problem, true).await
    }

    /// Retry after an error: drop the failed assistant turn, then re-issue
    /// the most recent user message unchanged.
    pub async fn retry(&mut self) -> Result<(), SubmitError> {
        if self.phase != Phase::Errored {
            return Err(SubmitError::NothingToRetry);
        }
        self.store.retry_cleanup();
        let problem = match self.store.last_problem() {
            Some(problem) => problem.clone(),
            None => return Err(SubmitError::NothingToRetry),
        };
        info!(problem_id = problem.id.as_str(), "retrying failed turn");
        self.run_problem(problem, false).await
    }

    pub fn reset(&mut self) {
        self.cancel.cancel();
        self.store.reset();
        self.phase = Phase::Idle;
        self.loading = false;
        self.error_message = None;
    }

    pub async fn load_conversation(&mut self, conversation_id: &str) -> Result<()> {
        let token = acquire_token(self.auth.as_ref()).await;
        self.store
            .load(conversation_id, &self.user_id, token.as_deref())
            .await
    }

    async fn run_problem(
        &mut self,
        problem: Problem,
        append_user: bool,
    ) -> Result<(), SubmitError> {
        // Fast path: a cached zero balance blocks before any network I/O.
        if self.credits.cached(&self.user_id).is_exhausted() {
            return Err(SubmitError::NoCredits);
        }

        self.phase = Phase::Submitting;
        self.loading = true;
        self.error_message = None;

        let token = acquire_token(self.auth.as_ref()).await;

        if self.credits.check(&self.user_id, token.as_deref()).await.is_exhausted() {
            self.phase = Phase::Idle;
            self.loading = false;
            return Err(SubmitError::NoCredits);
        }

        self.store.ensure(&problem.text, &self.user_id);
        if append_user {
            self.store.append(ChatMessage::user(problem.clone()));
        }
        let placeholder = ChatMessage::assistant(Solution::placeholder());
        let assistant_id = placeholder.id.clone();
        self.store.append(placeholder);
        self.store.set_streaming(true);
        self.scroll.rearm();
        self.cancel.reset();

        let mut turn = TurnState::default();

        match self
            .transport
            .open(&problem, token.as_deref(), self.cancel.clone())
            .await
        {
            Ok(stream) => {
                self.phase = Phase::Streaming;
                self.drive(stream, &assistant_id, &mut turn, token).await;
            }
            Err(err) => {
                if self.cancel.is_cancelled() {
                    self.finish_cancelled(&assistant_id, token);
                } else {
                    self.finish_errored(&assistant_id, err.to_string(), token);
                }
            }
        }
        Ok(())
    }

    /// Apply stream events in arrival order until a terminal transition.
    async fn drive(
        &mut self,
        mut stream: Box<dyn ProblemStream>,
        assistant_id: &str,
        turn: &mut TurnState,
        token: Option<String>,
    ) {
        loop {
            match stream.next().await {
                Ok(Some(StreamEvent::Started { sources })) => {
                    self.store
                        .update_solution(assistant_id, move |s| s.sources = sources);
                }
                Ok(Some(StreamEvent::Delta {
                    content,
                    charged_remaining,
                })) => {
                    // A cancelled turn refuses any delta that slips in
                    // before the transport notices the flag.
                    if self.cancel.is_cancelled() {
                        continue;
                    }
                    if !turn.first_content && !content.is_empty() {
                        turn.first_content = true;
                        self.loading = false;
                        debug!(assistant_id, "first content received");
                    }
                    if let Some(remaining) = charged_remaining {
                        turn.server_remaining = Some(remaining);
                        self.credits.observe_server_charge(&self.user_id, remaining);
                    }
                    self.store.update_solution(assistant_id, move |s| {
                        // The transport sends cumulative text; a stale
                        // frame must never shrink what is on screen.
                        if content.len() >= s.content.len() {
                            s.content = content;
                        }
                    });
                }
                Ok(Some(StreamEvent::Finished {
                    content,
                    final_answer,
                    confidence,
                    charged_remaining,
                })) => {
                    // A terminal frame already in flight does not outrank
                    // the user's cancel.
                    if self.cancel.is_cancelled() {
                        self.finish_cancelled(assistant_id, token);
                        return;
                    }
                    if let Some(remaining) = charged_remaining {
                        turn.server_remaining = Some(remaining);
                    }
                    self.store.update_solution(assistant_id, move |s| {
                        // Unlike deltas, the terminal text is authoritative
                        // and may be shorter than what accumulated.
                        s.content = content;
                        s.final_answer = final_answer;
                        s.confidence = confidence;
                        s.charged_remaining = charged_remaining;
                        s.status = SolutionStatus::Ok;
                    });
                    self.finish_completed(turn, token);
                    return;
                }
                Ok(Some(StreamEvent::Failed { message })) => {
                    self.finish_errored(assistant_id, message, token);
                    return;
                }
                Ok(Some(StreamEvent::Aborted)) => {
                    self.finish_cancelled(assistant_id, token);
                    return;
                }
                Ok(None) => {
                    // Natural exhaustion counts as a completed answer.
                    self.store
                        .update_solution(assistant_id, |s| s.status = SolutionStatus::Ok);
                    self.finish_completed(turn, token);
                    return;
                }
                Err(err) => {
                    if self.cancel.is_cancelled() {
                        self.finish_cancelled(assistant_id, token);
                    } else {
                        self.finish_errored(assistant_id, err.to_string(), token);
                    }
                    return;
                }
            }
        }
    }

    fn finish_completed(&mut self, turn: &TurnState, token: Option<String>) {
        self.phase = Phase::Completed;
        self.loading = false;
        self.store.set_streaming(false);
        let _ = self.store.persist(token);
        self.credits.reconcile(&self.user_id, turn.server_remaining);

        if let Some(conversation_id) = self.store.conversation_id() {
            let question_chars = self
                .store
                .last_problem()
                .map(|p| p.text.chars().count())
                .unwrap_or(0);
            let answer_chars = self
                .store
                .last_solution()
                .map(|s| s.content.chars().count())
                .unwrap_or(0);
            analytics::dispatch(
                &self.analytics,
                AnalyticsEvent {
                    user_id: self.user_id.clone(),
                    conversation_id,
                    question_chars,
                    answer_chars,
                    ts: chrono::Utc::now().timestamp(),
                },
            );
        }
        info!("answer stream completed");
    }

    fn finish_cancelled(&mut self, assistant_id: &str, token: Option<String>) {
        self.store
            .update_solution(assistant_id, |s| s.status = SolutionStatus::Cancelled);
        self.phase = Phase::Cancelled;
        self.loading = false;
        self.store.set_streaming(false);
        let _ = self.store.persist(token);
        info!("answer stream cancelled");
    }

    fn finish_errored(&mut self, assistant_id: &str, message: String, token: Option<String>) {
        self.store
            .update_solution(assistant_id, |s| s.status = SolutionStatus::Error);
        warn!("answer stream failed: {message}");
        self.error_message = Some(message);
        self.phase = Phase::Errored;
        self.loading = false;
        self.store.set_streaming(false);
        let _ = self.store.persist(token);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use futures_util::future::BoxFuture;

    use crate::analytics::{AnalyticsEvent, AnalyticsSink};
    use crate::auth::NoAuth;
    use crate::config::BackendConfig;
    use crate::conversation::ConversationBackend;
    use crate::credits::Balance;
    use crate::model::{Conversation, SolutionStatus, GUEST_USER_ID};
    use crate::transport::{CancelFlag, ProblemStream, StreamEvent, Transport};

    use super::{ChatSession, Phase, SubmitError};

    enum Script {
        FailOpen(String),
        Stream {
            events: Vec<StreamEvent>,
            honor_cancel: bool,
            cancel_after: Option<usize>,
        },
    }

    impl Script {
        fn events(events: Vec<StreamEvent>) -> Self {
            Script::Stream {
                events,
                honor_cancel: true,
                cancel_after: None,
            }
        }
    }

    struct ScriptedStream {
        events: VecDeque<StreamEvent>,
        cancel: CancelFlag,
        honor_cancel: bool,
        cancel_after: Option<usize>,
        yielded: usize,
    }

    impl ProblemStream for ScriptedStream {
        fn next(&mut self) -> BoxFuture<'_, Result<Option<StreamEvent>>> {
            Box::pin(async move {
                if let Some(n) = self.cancel_after {
                    if self.yielded >= n {
                        self.cancel.cancel();
                    }
                }
                if self.honor_cancel && self.cancel.is_cancelled() {
                    return Ok(Some(StreamEvent::Aborted));
                }
                self.yielded += 1;
                Ok(self.events.pop_front())
            })
        }
    }

    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Script>>,
        opens: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                opens: AtomicUsize::new(0),
            })
        }

        fn open_count(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    impl Transport for ScriptedTransport {
        fn open<'a>(
            &'a self,
            _problem: &'a crate::model::Problem,
            _token: Option<&'a str>,
            cancel: CancelFlag,
        ) -> BoxFuture<'a, Result<Box<dyn ProblemStream>>> {
            Box::pin(async move {
                self.opens.fetch_add(1, Ordering::SeqCst);
                match self.scripts.lock().unwrap().pop_front() {
                    Some(Script::FailOpen(message)) => Err(anyhow!(message)),
                    Some(Script::Stream {
                        events,
                        honor_cancel,
                        cancel_after,
                    }) => Ok(Box::new(ScriptedStream {
                        events: events.into(),
                        cancel,
                        honor_cancel,
                        cancel_after,
                        yielded: 0,
                    }) as Box<dyn ProblemStream>),
                    None => Err(anyhow!("transport script exhausted")),
                }
            })
        }
    }

    #[derive(Default)]
    struct RecordingBackend {
        saves: Mutex<Vec<Conversation>>,
    }

    impl RecordingBackend {
        fn save_count(&self) -> usize {
            self.saves.lock().unwrap().len()
        }
    }

    impl ConversationBackend for RecordingBackend {
        fn save<'a>(
            &'a self,
            conversation: &'a Conversation,
            _token: Option<&'a str>,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.saves.lock().unwrap().push(conversation.clone());
                Ok(())
            })
        }

        fn fetch<'a>(
            &'a self,
            conversation_id: &'a str,
            user_id: &'a str,
            _token: Option<&'a str>,
        ) -> BoxFuture<'a, Result<Conversation>> {
            Box::pin(async move {
                let mut conversation = Conversation::new("stored", user_id);
                conversation.id = conversation_id.to_string();
                Ok(conversation)
            })
        }
    }

    struct NullSink;

    impl AnalyticsSink for NullSink {
        fn record(&self, _event: AnalyticsEvent) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn session(
        user_id: &str,
        guest_credits: u32,
        scripts: Vec<Script>,
    ) -> (ChatSession, Arc<ScriptedTransport>, Arc<RecordingBackend>) {
        let config = BackendConfig::new("http://localhost:8000", guest_credits, 4000);
        let transport = ScriptedTransport::new(scripts);
        let backend = Arc::new(RecordingBackend::default());
        let session = ChatSession::new(
            config,
            user_id,
            transport.clone(),
            backend.clone(),
            Arc::new(NullSink),
            Arc::new(NoAuth),
        );
        (session, transport, backend)
    }

    fn delta(content: &str) -> StreamEvent {
        StreamEvent::Delta {
            content: content.into(),
            charged_remaining: None,
        }
    }

    fn finished(content: &str) -> StreamEvent {
        StreamEvent::Finished {
            content: content.into(),
            final_answer: None,
            confidence: None,
            charged_remaining: None,
        }
    }

    #[tokio::test]
    async fn happy_path_decrements_guest_credits() {
        let (mut session, _, _) = session(
            GUEST_USER_ID,
            5,
            vec![Script::events(vec![
                StreamEvent::Started {
                    sources: Vec::new(),
                },
                delta("4"),
                finished("4"),
            ])],
        );

        session.submit("2+2", None).await.unwrap();

        assert_eq!(session.phase(), Phase::Completed);
        assert!(!session.is_loading());
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        let solution = messages[1].solution().unwrap();
        assert_eq!(solution.status, SolutionStatus::Ok);
        assert_eq!(solution.content, "4");
        assert_eq!(session.credits().balance(), Balance::Optimistic(4));
    }

    #[tokio::test]
    async fn content_never_regresses_within_a_turn() {
        let (mut session, _, _) = session(
            GUEST_USER_ID,
            5,
            vec![Script::events(vec![
                delta("4 because"),
                delta("4"),
                finished("4 because 2+2=4"),
            ])],
        );

        session.submit("2+2", None).await.unwrap();

        let solution = session.messages()[1].solution().unwrap();
        assert_eq!(solution.content, "4 because 2+2=4");
    }

    #[tokio::test]
    async fn terminal_frame_may_replace_longer_partial_content() {
        // The backend sometimes rewrites the answer in the end frame; the
        // delta guard must not apply to it.
        let (mut session, _, _) = session(
            GUEST_USER_ID,
            5,
            vec![Script::events(vec![
                delta("4, and here is a long derivation of why"),
                finished("4"),
            ])],
        );

        session.submit("2+2", None).await.unwrap();

        let solution = session.messages()[1].solution().unwrap();
        assert_eq!(solution.status, SolutionStatus::Ok);
        assert_eq!(solution.content, "4");
    }

    #[tokio::test]
    async fn cancel_beats_a_buffered_terminal_frame() {
        // The transport never sees the flag and delivers its end frame
        // anyway; the turn still ends as cancelled.
        let (mut session, _, _) = session(
            GUEST_USER_ID,
            5,
            vec![Script::Stream {
                events: vec![delta("part"), finished("part, but finished")],
                honor_cancel: false,
                cancel_after: Some(1),
            }],
        );

        session.submit("2+2", None).await.unwrap();

        assert_eq!(session.phase(), Phase::Cancelled);
        let solution = session.messages()[1].solution().unwrap();
        assert_eq!(solution.status, SolutionStatus::Cancelled);
        assert_eq!(solution.content, "part");
    }

    #[tokio::test]
    async fn zero_credit_fast_path_never_calls_the_transport() {
        let (mut session, transport, _) =
            session(GUEST_USER_ID, 0, vec![Script::events(vec![finished("x")])]);

        let err = session.submit("2+2", None).await.unwrap_err();

        assert_eq!(err, SubmitError::NoCredits);
        assert_eq!(transport.open_count(), 0);
        assert!(session.messages().is_empty());
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn empty_submission_is_rejected() {
        let (mut session, transport, _) = session(GUEST_USER_ID, 5, vec![]);
        assert_eq!(
            session.submit("   ", None).await.unwrap_err(),
            SubmitError::EmptyProblem
        );
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test]
    async fn over_limit_submission_is_rejected() {
        let (mut session, _, _) = session(GUEST_USER_ID, 5, vec![]);
        let long = "x".repeat(5000);
        assert_eq!(
            session.submit(&long, None).await.unwrap_err(),
            SubmitError::TooLong { limit: 4000 }
        );
    }

    #[tokio::test]
    async fn network_failure_then_retry_leaves_a_clean_transcript() {
        let (mut session, transport, _) = session(
            GUEST_USER_ID,
            5,
            vec![
                Script::FailOpen("Network error".into()),
                Script::events(vec![finished("x=1")]),
            ],
        );

        session.submit("solve x+1=2", None).await.unwrap();
        assert_eq!(session.phase(), Phase::Errored);
        assert_eq!(session.error_message(), Some("Network error"));
        assert_eq!(
            session.messages()[1].solution().unwrap().status,
            SolutionStatus::Error
        );

        session.retry().await.unwrap();

        assert_eq!(session.phase(), Phase::Completed);
        assert_eq!(transport.open_count(), 2);
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].problem().unwrap().text, "solve x+1=2");
        let solution = messages[1].solution().unwrap();
        assert_eq!(solution.status, SolutionStatus::Ok);
        assert_eq!(solution.content, "x=1");
    }

    #[tokio::test]
    async fn retry_outside_errored_phase_is_rejected() {
        let (mut session, _, _) = session(GUEST_USER_ID, 5, vec![]);
        assert_eq!(
            session.retry().await.unwrap_err(),
            SubmitError::NothingToRetry
        );
    }

    #[tokio::test]
    async fn cancellation_keeps_partial_content() {
        let (mut session, _, _) = session(
            GUEST_USER_ID,
            5,
            vec![Script::Stream {
                events: vec![delta("partial"), delta("partial answer"), finished("full")],
                honor_cancel: true,
                cancel_after: Some(1),
            }],
        );

        session.submit("2+2", None).await.unwrap();

        assert_eq!(session.phase(), Phase::Cancelled);
        let solution = session.messages()[1].solution().unwrap();
        assert_eq!(solution.status, SolutionStatus::Cancelled);
        assert_eq!(solution.content, "partial");
    }

    #[tokio::test]
    async fn late_frames_after_cancel_are_ignored() {
        // The stream keeps yielding deltas after the flag is set; the
        // session must refuse them.
        let (mut session, _, _) = session(
            GUEST_USER_ID,
            5,
            vec![Script::Stream {
                events: vec![
                    delta("partial"),
                    delta("partial but longer"),
                    StreamEvent::Aborted,
                ],
                honor_cancel: false,
                cancel_after: Some(1),
            }],
        );

        session.submit("2+2", None).await.unwrap();

        let solution = session.messages()[1].solution().unwrap();
        assert_eq!(solution.status, SolutionStatus::Cancelled);
        assert_eq!(solution.content, "partial");
    }

    #[tokio::test]
    async fn server_charge_suppresses_the_local_decrement() {
        let (mut session, _, _) = session(
            GUEST_USER_ID,
            5,
            vec![Script::events(vec![
                delta("4"),
                StreamEvent::Finished {
                    content: "4".into(),
                    final_answer: None,
                    confidence: None,
                    charged_remaining: Some(4),
                },
            ])],
        );

        session.submit("2+2", None).await.unwrap();

        // Authoritative 4, not 3: the guest fallback must not also fire.
        assert_eq!(session.credits().balance(), Balance::Authoritative(4));
    }

    #[tokio::test]
    async fn mid_stream_charge_is_applied_synchronously() {
        let (mut session, _, _) = session(
            "user-7",
            5,
            vec![Script::events(vec![
                StreamEvent::Delta {
                    content: "working".into(),
                    charged_remaining: Some(4),
                },
                finished("done"),
            ])],
        );
        session.credits_mut().prime(Balance::Authoritative(5));

        session.submit("integrate x", None).await.unwrap();

        assert_eq!(session.credits().balance(), Balance::Authoritative(4));
    }

    #[tokio::test]
    async fn failed_frame_surfaces_the_server_message() {
        let (mut session, _, _) = session(
            GUEST_USER_ID,
            5,
            vec![Script::events(vec![
                delta("part"),
                StreamEvent::Failed {
                    message: "model overloaded".into(),
                },
            ])],
        );

        session.submit("2+2", None).await.unwrap();

        assert_eq!(session.phase(), Phase::Errored);
        assert_eq!(session.error_message(), Some("model overloaded"));
        let solution = session.messages()[1].solution().unwrap();
        assert_eq!(solution.status, SolutionStatus::Error);
        assert_eq!(solution.content, "part");
    }

    #[tokio::test]
    async fn natural_exhaustion_completes_the_turn() {
        let (mut session, _, _) =
            session(GUEST_USER_ID, 5, vec![Script::events(vec![delta("ans")])]);

        session.submit("2+2", None).await.unwrap();

        assert_eq!(session.phase(), Phase::Completed);
        let solution = session.messages()[1].solution().unwrap();
        assert_eq!(solution.status, SolutionStatus::Ok);
        assert_eq!(solution.content, "ans");
    }

    #[tokio::test]
    async fn transcript_is_persisted_once_at_completion() {
        let (mut session, _, backend) = session(
            GUEST_USER_ID,
            5,
            vec![Script::events(vec![delta("4"), finished("4")])],
        );

        session.submit("2+2", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(backend.save_count(), 1);
        let saves = backend.saves.lock().unwrap();
        assert_eq!(saves[0].messages.len(), 2);
        assert_eq!(saves[0].title, "2+2");
    }

    #[tokio::test]
    async fn reset_clears_the_session() {
        let (mut session, _, _) = session(
            GUEST_USER_ID,
            5,
            vec![Script::events(vec![finished("4")])],
        );
        session.submit("2+2", None).await.unwrap();

        session.reset();

        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.messages().is_empty());
        assert!(session.conversation_id().is_none());
    }
}
