use log::{ error, info, warn };
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{ broadcast, watch, Mutex };

use crate::assembler::MessageAssembler;
use crate::config::DispatchSettings;
use crate::error::{ DispatchError, StoreError };
use crate::history::ConversationStore;
use crate::intent::{ classify_submission, Intent };
use crate::llm::chat::{ ChatClient, ChatRequest };
use crate::llm::image::ImageClient;
use crate::models::attachment::Attachment;
use crate::models::chat::{ title_from_input, Conversation, Message };
use crate::models::event::Event;
use crate::models::state::RequestState;
use crate::progress::ProgressSimulator;
use crate::segment::segment_for_intent;
use crate::usage::UsageRecorder;

const EVENT_CAPACITY: usize = 256;
const SEND_FAILED_NOTICE: &str = "Failed to send message. Please try again.";
const IMAGE_FAILED_NOTICE: &str = "Failed to generate image. Please try again.";

/// One user submission.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub text: String,
    pub attachment: Option<Attachment>,
    /// Caller-selected model; ignored when an attachment forces the vision model.
    pub model: Option<String>,
}

impl Submission {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Self::default() }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Assistant messages produced by one dispatch, in append order.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub intent: Intent,
    pub messages: Vec<Message>,
}

type SharedState = Arc<watch::Sender<RequestState>>;

/// Holds the request flags for the duration of a dispatch and clears them
/// on every exit path.
struct InFlight {
    state: SharedState,
}

/// Publishes image progress for one conversation. The event goes out while
/// the watch lock is held, so events follow the order of state changes and
/// nothing is emitted once 100 has been reached or the flags were cleared.
#[derive(Clone)]
struct ProgressSink {
    state: SharedState,
    events: broadcast::Sender<Event>,
    conversation_id: String,
}

impl ProgressSink {
    fn advance(&self, value: u8) -> bool {
        self.state.send_if_modified(|s| {
            if !s.generating_image || value <= s.progress {
                return false;
            }
            s.progress = value;
            let _ = self.events.send(Event::Progress {
                conversation_id: self.conversation_id.clone(),
                value,
            });
            true
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.state.send_modify(|s| {
            *s = RequestState::default();
        });
    }
}

/// Runs submissions against the chat and image endpoints and appends the
/// results. At most one dispatch is in flight per conversation.
pub struct Dispatcher {
    chat_client: Arc<dyn ChatClient>,
    image_client: Arc<dyn ImageClient>,
    usage: Arc<dyn UsageRecorder>,
    assembler: MessageAssembler,
    events: broadcast::Sender<Event>,
    settings: DispatchSettings,
    states: Mutex<HashMap<String, SharedState>>,
}

impl Dispatcher {
    pub fn new(
        chat_client: Arc<dyn ChatClient>,
        image_client: Arc<dyn ImageClient>,
        store: Arc<dyn ConversationStore>,
        usage: Arc<dyn UsageRecorder>,
        settings: DispatchSettings
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            chat_client,
            image_client,
            usage,
            assembler: MessageAssembler::new(store, events.clone()),
            events,
            settings,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Fails with [`StoreError::NotFound`] for conversations the store does
    /// not know.
    pub async fn subscribe_state(
        &self,
        conversation_id: &str
    ) -> Result<watch::Receiver<RequestState>, StoreError> {
        self.assembler.store().get_conversation(conversation_id).await?;
        let mut states = self.states.lock().await;
        Ok(Self::state_entry(&mut states, conversation_id).subscribe())
    }

    pub async fn request_state(&self, conversation_id: &str) -> RequestState {
        let states = self.states.lock().await;
        states
            .get(conversation_id)
            .map(|state| *state.borrow())
            .unwrap_or_default()
    }

    pub async fn start_conversation(
        &self,
        user_id: &str,
        first_input: &str
    ) -> Result<Conversation, StoreError> {
        let conversation = self.assembler
            .store()
            .create_conversation(user_id, &title_from_input(first_input)).await?;
        info!("Started conversation {} ({})", conversation.id, conversation.title);
        Ok(conversation)
    }

    pub async fn conversation(&self, conversation_id: &str) -> Result<Conversation, StoreError> {
        self.assembler.store().get_conversation(conversation_id).await
    }

    pub async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        self.assembler.store().list_conversations(user_id).await
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        self.assembler.store().delete_conversation(conversation_id).await?;
        let mut states = self.states.lock().await;
        if states.get(conversation_id).map_or(false, |state| !state.borrow().is_busy()) {
            states.remove(conversation_id);
        }
        Ok(())
    }

    /// Classifies and dispatches one submission.
    ///
    /// Returns [`DispatchError::Busy`] without side effects while another
    /// dispatch for the same conversation is in flight. Any other failure
    /// emits a notification; prior messages stay untouched.
    pub async fn submit(
        &self,
        conversation_id: &str,
        submission: Submission
    ) -> Result<DispatchOutcome, DispatchError> {
        let intent = classify_submission(&submission.text, submission.attachment.is_some());
        let in_flight = self.claim(conversation_id, intent).await?;
        info!("Dispatching {} request for conversation {}", intent, conversation_id);

        let result = self.run(conversation_id, intent, &submission, &in_flight).await;
        drop(in_flight);
        self.release(conversation_id).await;

        match result {
            Ok(messages) => {
                info!("Dispatch for {} produced {} message(s)", conversation_id, messages.len());
                Ok(DispatchOutcome { intent, messages })
            }
            Err(e) => {
                error!("Dispatch for {} failed: {}", conversation_id, e);
                let notice = match intent {
                    Intent::Image => IMAGE_FAILED_NOTICE,
                    Intent::Chat | Intent::Essay => SEND_FAILED_NOTICE,
                };
                let _ = self.events.send(Event::Notification {
                    conversation_id: conversation_id.to_string(),
                    message: notice.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        conversation_id: &str,
        intent: Intent,
        submission: &Submission,
        in_flight: &InFlight
    ) -> Result<Vec<Message>, DispatchError> {
        let mut user_message = Message::user(submission.text.as_str());
        if let Some(attachment) = &submission.attachment {
            user_message = user_message.with_image(attachment.data_url.as_str());
        }
        self.assembler.append(conversation_id, vec![user_message]).await?;

        match intent {
            Intent::Image => self.generate_image(conversation_id, &submission.text, in_flight).await,
            Intent::Chat | Intent::Essay => self.complete_chat(conversation_id, intent, submission).await,
        }
    }

    async fn generate_image(
        &self,
        conversation_id: &str,
        prompt: &str,
        in_flight: &InFlight
    ) -> Result<Vec<Message>, DispatchError> {
        self.record_usage(&self.settings.image_model);

        let sink = ProgressSink {
            state: in_flight.state.clone(),
            events: self.events.clone(),
            conversation_id: conversation_id.to_string(),
        };
        let simulator = {
            let sink = sink.clone();
            ProgressSimulator::start(self.settings.progress.clone(), move |value| {
                sink.advance(value);
            })
        };

        let generated = self.image_client.generate(prompt).await;
        simulator.cancel();
        let image = generated?;
        sink.advance(100);

        let message = Message::assistant(self.settings.image_caption.as_str()).with_image(
            image.to_data_url()
        );
        self.assembler.append(conversation_id, vec![message.clone()]).await?;
        Ok(vec![message])
    }

    async fn complete_chat(
        &self,
        conversation_id: &str,
        intent: Intent,
        submission: &Submission
    ) -> Result<Vec<Message>, DispatchError> {
        let model = match &submission.attachment {
            Some(_) => self.settings.vision_model.clone(),
            None => submission.model.clone().unwrap_or_else(|| self.settings.chat_model.clone()),
        };
        let max_tokens = match intent {
            Intent::Essay => self.settings.essay_max_tokens,
            Intent::Chat | Intent::Image => self.settings.chat_max_tokens,
        };
        let request = ChatRequest::single_turn(
            &model,
            &submission.text,
            submission.attachment.as_ref().map(|a| a.data_url.as_str()),
            max_tokens,
            self.settings.temperature
        );

        self.record_usage(&model);
        let completion = self.chat_client.complete(&request).await?;

        let fragments = segment_for_intent(&completion.response, intent, &self.settings.essay);
        let mut messages: Vec<Message> = fragments.into_iter().map(Message::from_fragment).collect();
        if let Some(first) = messages.first_mut() {
            first.reasoning = completion.reasoning;
        }

        self.assembler.append(conversation_id, messages.clone()).await?;
        Ok(messages)
    }

    /// Recorded before the request is awaited, so failed calls are counted.
    fn record_usage(&self, model: &str) {
        self.usage.record_call(model);
        self.usage.record_model_usage(model);
    }

    fn state_entry(states: &mut HashMap<String, SharedState>, conversation_id: &str) -> SharedState {
        states
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(watch::channel(RequestState::default()).0))
            .clone()
    }

    /// Drops the entry for an idle conversation nobody is watching. Claims
    /// and subscriptions hold the same lock, so a busy or observed entry is
    /// never removed.
    async fn release(&self, conversation_id: &str) {
        let mut states = self.states.lock().await;
        let idle = states
            .get(conversation_id)
            .map_or(false, |state| !state.borrow().is_busy() && state.receiver_count() == 0);
        if idle {
            states.remove(conversation_id);
        }
    }

    async fn claim(&self, conversation_id: &str, intent: Intent) -> Result<InFlight, DispatchError> {
        let mut states = self.states.lock().await;
        let state = Self::state_entry(&mut states, conversation_id);
        let claimed = state.send_if_modified(|s| {
            if s.is_busy() {
                return false;
            }
            match intent {
                Intent::Image => {
                    s.generating_image = true;
                }
                Intent::Chat | Intent::Essay => {
                    s.loading = true;
                }
            }
            s.progress = 0;
            true
        });
        drop(states);
        if !claimed {
            warn!("Ignoring submission for {}: a request is already in flight", conversation_id);
            return Err(DispatchError::Busy(conversation_id.to_string()));
        }
        Ok(InFlight { state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(initial: RequestState) -> (ProgressSink, watch::Receiver<RequestState>, broadcast::Receiver<Event>) {
        let (tx, rx) = watch::channel(initial);
        let (events, event_rx) = broadcast::channel(128);
        let sink = ProgressSink {
            state: Arc::new(tx),
            events,
            conversation_id: "c1".to_string(),
        };
        (sink, rx, event_rx)
    }

    fn progress_events(rx: &mut broadcast::Receiver<Event>) -> Vec<u8> {
        let mut values = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::Progress { value, .. } = event {
                values.push(value);
            }
        }
        values
    }

    #[test]
    fn test_in_flight_guard_resets_state() {
        let (sink, rx, _events) = sink(RequestState {
            loading: false,
            generating_image: true,
            progress: 0,
        });
        let guard = InFlight { state: sink.state.clone() };
        assert!(sink.advance(100));
        assert_eq!(rx.borrow().progress, 100);
        drop(guard);
        assert_eq!(*rx.borrow(), RequestState::default());
    }

    #[test]
    fn test_progress_is_ignored_when_not_generating() {
        let (sink, rx, mut events) = sink(RequestState { loading: true, ..RequestState::default() });
        assert!(!sink.advance(50));
        assert_eq!(rx.borrow().progress, 0);
        assert!(progress_events(&mut events).is_empty());
    }

    #[test]
    fn test_late_tick_after_completion_emits_nothing() {
        let (sink, rx, mut events) = sink(RequestState {
            generating_image: true,
            ..RequestState::default()
        });
        let guard = InFlight { state: sink.state.clone() };
        assert!(sink.advance(40));
        assert!(sink.advance(100));
        assert!(!sink.advance(60));
        assert_eq!(rx.borrow().progress, 100);

        drop(guard);
        assert!(!sink.advance(70));
        assert_eq!(progress_events(&mut events), vec![40, 100]);
    }

    #[test]
    fn test_ticks_from_other_threads_never_follow_completion() {
        let (sink, _rx, mut events) = sink(RequestState {
            generating_image: true,
            ..RequestState::default()
        });
        let ticker = {
            let sink = sink.clone();
            std::thread::spawn(move || {
                for value in 1..=89 {
                    sink.advance(value);
                }
            })
        };
        sink.advance(100);
        ticker.join().unwrap();

        let values = progress_events(&mut events);
        assert_eq!(values.last().copied(), Some(100));
        assert!(values.windows(2).all(|pair| pair[0] < pair[1]));
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl ChatClient for Unreachable {
        async fn complete(
            &self,
            _request: &ChatRequest
        ) -> Result<crate::llm::chat::CompletionResponse, crate::error::InferenceError> {
            Err(crate::error::InferenceError::Shape("unreachable".to_string()))
        }
    }

    #[async_trait::async_trait]
    impl ImageClient for Unreachable {
        async fn generate(
            &self,
            _prompt: &str
        ) -> Result<crate::llm::image::GeneratedImage, crate::error::InferenceError> {
            Err(crate::error::InferenceError::Shape("unreachable".to_string()))
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(Unreachable),
            Arc::new(Unreachable),
            Arc::new(crate::history::MemoryConversationStore::new()),
            Arc::new(crate::usage::UsageCounter::new()),
            DispatchSettings::default()
        )
    }

    #[tokio::test]
    async fn test_unknown_conversations_leave_no_state_behind() {
        let dispatcher = dispatcher();
        for id in ["nope-1", "nope-2", "nope-3"] {
            let result = dispatcher.submit(id, Submission::text("hi")).await;
            assert!(matches!(result, Err(DispatchError::Store(StoreError::NotFound(_)))));
        }
        assert!(dispatcher.subscribe_state("nope-4").await.is_err());
        assert_eq!(dispatcher.request_state("nope-5").await, RequestState::default());
        assert!(dispatcher.states.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_state_is_kept_while_subscribed() {
        let dispatcher = dispatcher();
        let conversation = dispatcher.start_conversation("tester", "hello").await.unwrap();
        let receiver = dispatcher.subscribe_state(&conversation.id).await.unwrap();

        let _ = dispatcher.submit(&conversation.id, Submission::text("hi")).await;
        assert!(dispatcher.states.lock().await.contains_key(&conversation.id));

        drop(receiver);
        let _ = dispatcher.submit(&conversation.id, Submission::text("again")).await;
        assert!(dispatcher.states.lock().await.is_empty());
    }

    #[test]
    fn test_submission_builders() {
        let submission = Submission::text("hello").with_model("gpt-4o");
        assert_eq!(submission.text, "hello");
        assert_eq!(submission.model.as_deref(), Some("gpt-4o"));
        assert!(submission.attachment.is_none());
    }
}
