use futures::StreamExt;
use log::{ info, warn };
use std::error::Error;
use std::sync::Arc;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{ BroadcastStream, errors::BroadcastStreamRecvError };

use crate::dispatch::{ Dispatcher, Submission };
use crate::error::DispatchError;
use crate::models::attachment::Attachment;
use crate::models::chat::{ Message, Role };
use crate::models::event::Event;

const HELP: &str =
    "Commands: /attach <path>, /model <name>, /new, /list, /delete <id>, /help, /quit";

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Attach(&'a str),
    Model(&'a str),
    New,
    List,
    Delete(&'a str),
    Help,
    Quit,
    Say(&'a str),
}

fn parse_command(line: &str) -> Option<Command<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if !line.starts_with('/') {
        return Some(Command::Say(line));
    }
    let (name, arg) = match line.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (line, ""),
    };
    let command = match (name, arg.is_empty()) {
        ("/attach", false) => Command::Attach(arg),
        ("/model", false) => Command::Model(arg),
        ("/delete", false) => Command::Delete(arg),
        ("/new", _) => Command::New,
        ("/list", _) => Command::List,
        ("/quit" | "/exit", _) => Command::Quit,
        _ => Command::Help,
    };
    Some(command)
}

fn render_message(message: &Message) -> Option<String> {
    if message.role == Role::User {
        return None;
    }
    let mut out = String::new();
    if let Some(reasoning) = &message.reasoning {
        out.push_str(&format!("(thinking) {}\n", reasoning));
    }
    if message.is_code {
        out.push_str(&format!("```{}\n{}\n```", message.language.as_deref().unwrap_or(""), message.content));
    } else if let Some(image) = &message.image {
        out.push_str(&format!("{}\n[image, {} byte data URL]", message.content, image.len()));
    } else {
        out.push_str(&message.content);
    }
    Some(out)
}

fn spawn_event_printer(dispatcher: &Dispatcher) {
    let mut events = BroadcastStream::new(dispatcher.subscribe_events());
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(Event::Progress { value, .. }) => println!("[generating image... {}%]", value),
                Ok(Event::MessagesAppended { messages, .. }) => {
                    for message in &messages {
                        if let Some(text) = render_message(message) {
                            println!("{}\n", text);
                        }
                    }
                }
                Ok(Event::ScrollToLatest { .. }) => {}
                Ok(Event::Notification { message, .. }) => eprintln!("! {}", message),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!("Display lagged behind by {} events", skipped);
                }
            }
        }
    });
}

/// Per-session shell state. The pending attachment is shared with the
/// spawned dispatch so a rejected submission can hand it back.
struct Session {
    dispatcher: Arc<Dispatcher>,
    user_id: String,
    conversation_id: Option<String>,
    attachment: Arc<Mutex<Option<Attachment>>>,
    model: Option<String>,
}

impl Session {
    fn new(dispatcher: Arc<Dispatcher>, user_id: String) -> Self {
        Self {
            dispatcher,
            user_id,
            conversation_id: None,
            attachment: Arc::new(Mutex::new(None)),
            model: None,
        }
    }

    /// Runs one command. Failures are printed and never end the session.
    /// Returns the spawned dispatch for submissions.
    async fn execute(&mut self, command: Command<'_>) -> Option<JoinHandle<()>> {
        match command {
            Command::Quit => {}
            Command::Help => println!("{}", HELP),
            Command::New => {
                self.conversation_id = None;
                println!("Next message starts a new conversation.");
            }
            Command::Model(name) => {
                self.model = Some(name.to_string());
                println!("Using model {}", name);
            }
            Command::Attach(path) => {
                match Attachment::from_path(path).await {
                    Ok(captured) => {
                        println!("Attached {} ({})", path, captured.mime);
                        *self.attachment.lock().await = Some(captured);
                    }
                    Err(e) => eprintln!("! {}", e),
                }
            }
            Command::List => {
                match self.dispatcher.list_conversations(&self.user_id).await {
                    Ok(conversations) => {
                        for conversation in conversations {
                            println!(
                                "{}  {} ({} messages)",
                                conversation.id,
                                conversation.title,
                                conversation.messages.len()
                            );
                        }
                    }
                    Err(e) => eprintln!("! {}", e),
                }
            }
            Command::Delete(id) => {
                match self.dispatcher.delete_conversation(id).await {
                    Ok(()) => {
                        if self.conversation_id.as_deref() == Some(id) {
                            self.conversation_id = None;
                        }
                        println!("Deleted {}", id);
                    }
                    Err(e) => eprintln!("! {}", e),
                }
            }
            Command::Say(text) => {
                return self.say(text).await;
            }
        }
        None
    }

    async fn say(&mut self, text: &str) -> Option<JoinHandle<()>> {
        let id = self.current_conversation(text).await?;

        let mut submission = Submission::text(text);
        submission.model = self.model.clone();
        submission.attachment = self.attachment.lock().await.take();

        let dispatcher = Arc::clone(&self.dispatcher);
        let pending = Arc::clone(&self.attachment);
        Some(
            tokio::spawn(async move {
                let attachment = submission.attachment.clone();
                match dispatcher.submit(&id, submission).await {
                    Ok(outcome) => info!("{} reply appended to {}", outcome.intent, id),
                    Err(DispatchError::Busy(_)) => {
                        let mut slot = pending.lock().await;
                        if slot.is_none() && attachment.is_some() {
                            *slot = attachment;
                            eprintln!("! Still working on the previous request; attachment kept.");
                        } else {
                            eprintln!("! Still working on the previous request.");
                        }
                    }
                    Err(_) => {}
                }
            })
        )
    }

    async fn current_conversation(&mut self, first_input: &str) -> Option<String> {
        if let Some(id) = &self.conversation_id {
            return Some(id.clone());
        }
        match self.dispatcher.start_conversation(&self.user_id, first_input).await {
            Ok(conversation) => {
                self.conversation_id = Some(conversation.id.clone());
                Some(conversation.id)
            }
            Err(e) => {
                eprintln!("! {}", e);
                None
            }
        }
    }
}

/// Reads submissions from stdin until `/quit` or end of input.
pub async fn run_repl(dispatcher: Arc<Dispatcher>, user_id: String) -> Result<(), Box<dyn Error + Send + Sync>> {
    spawn_event_printer(&dispatcher);
    println!("{}", HELP);

    let mut session = Session::new(dispatcher, user_id);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = parse_command(&line) else {
            continue;
        };
        if command == Command::Quit {
            break;
        }
        session.execute(command).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::config::DispatchSettings;
    use crate::error::{ InferenceError, StoreError };
    use crate::history::{ ConversationStore, MemoryConversationStore };
    use crate::llm::chat::{ ChatClient, ChatRequest, CompletionResponse };
    use crate::llm::image::{ GeneratedImage, ImageClient };
    use crate::models::chat::Conversation;
    use crate::usage::UsageCounter;

    /// Chat endpoint that answers once the gate opens.
    #[derive(Default)]
    struct GatedChat {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl ChatClient for GatedChat {
        async fn complete(&self, _request: &ChatRequest) -> Result<CompletionResponse, InferenceError> {
            self.gate.notified().await;
            Ok(CompletionResponse { response: "done".to_string(), reasoning: None })
        }
    }

    #[async_trait]
    impl ImageClient for GatedChat {
        async fn generate(&self, _prompt: &str) -> Result<GeneratedImage, InferenceError> {
            Err(InferenceError::Shape("no image".to_string()))
        }
    }

    /// Store whose backend is unreachable.
    struct OfflineStore;

    fn offline() -> StoreError {
        StoreError::Redis(redis::RedisError::from((redis::ErrorKind::IoError, "connection refused")))
    }

    #[async_trait]
    impl ConversationStore for OfflineStore {
        async fn create_conversation(&self, _user_id: &str, _title: &str) -> Result<Conversation, StoreError> {
            Err(offline())
        }

        async fn append_messages(&self, _id: &str, _messages: &[Message]) -> Result<(), StoreError> {
            Err(offline())
        }

        async fn get_conversation(&self, _id: &str) -> Result<Conversation, StoreError> {
            Err(offline())
        }

        async fn delete_conversation(&self, _id: &str) -> Result<(), StoreError> {
            Err(offline())
        }

        async fn list_conversations(&self, _user_id: &str) -> Result<Vec<Conversation>, StoreError> {
            Err(offline())
        }
    }

    fn session(chat: Arc<GatedChat>, store: Arc<dyn ConversationStore>) -> Session {
        let dispatcher = Dispatcher::new(
            chat.clone(),
            chat,
            store,
            Arc::new(UsageCounter::new()),
            DispatchSettings::default()
        );
        Session::new(Arc::new(dispatcher), "tester".to_string())
    }

    #[tokio::test]
    async fn test_store_failures_keep_the_session_alive() {
        let mut session = session(Arc::new(GatedChat::default()), Arc::new(OfflineStore));
        let attachment = Attachment::from_bytes("image/png", &[1, 2, 3]);
        *session.attachment.lock().await = Some(attachment.clone());

        assert!(session.execute(Command::List).await.is_none());
        assert!(session.execute(Command::Say("hello")).await.is_none());
        assert!(session.conversation_id.is_none());
        assert_eq!(session.attachment.lock().await.clone(), Some(attachment));

        assert!(session.execute(Command::Delete("abc")).await.is_none());
        assert!(session.execute(Command::Model("gpt-4o")).await.is_none());
        assert_eq!(session.model.as_deref(), Some("gpt-4o"));
    }

    #[tokio::test]
    async fn test_rejected_submission_keeps_attachment() {
        let chat = Arc::new(GatedChat::default());
        let mut session = session(chat.clone(), Arc::new(MemoryConversationStore::new()));

        let first = session.execute(Command::Say("first question")).await.unwrap();
        let id = session.conversation_id.clone().unwrap();
        let mut state = session.dispatcher.subscribe_state(&id).await.unwrap();
        state.wait_for(|s| s.loading).await.unwrap();

        let attachment = Attachment::from_bytes("image/png", &[1, 2, 3]);
        *session.attachment.lock().await = Some(attachment.clone());
        let second = session.execute(Command::Say("what is in this picture?")).await.unwrap();
        second.await.unwrap();
        assert_eq!(session.attachment.lock().await.clone(), Some(attachment));

        chat.gate.notify_one();
        first.await.unwrap();
        let conversation = session.dispatcher.conversation(&id).await.unwrap();
        assert_eq!(conversation.messages.len(), 2);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("  "), None);
        assert_eq!(parse_command("hello there"), Some(Command::Say("hello there")));
        assert_eq!(parse_command("/attach cat.png"), Some(Command::Attach("cat.png")));
        assert_eq!(parse_command("/model  gpt-4o "), Some(Command::Model("gpt-4o")));
        assert_eq!(parse_command("/attach"), Some(Command::Help));
        assert_eq!(parse_command("/exit"), Some(Command::Quit));
        assert_eq!(parse_command("/bogus"), Some(Command::Help));
    }

    #[test]
    fn test_render_message() {
        assert_eq!(render_message(&Message::user("hi")), None);

        let mut code = Message::assistant("let x = 1;");
        code.is_code = true;
        code.language = Some("rust".to_string());
        assert_eq!(render_message(&code).unwrap(), "```rust\nlet x = 1;\n```");

        let image = Message::assistant("caption").with_image("data:image/png;base64,AA==");
        assert!(render_message(&image).unwrap().starts_with("caption\n[image"));
    }
}
