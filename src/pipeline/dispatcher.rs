// src/pipeline/dispatcher.rs

//! Single consumer of fetch results and chat commands.
//!
//! [`DispatcherState`] holds the decision logic: it turns one [`Event`] into
//! a list of [`OutboundAction`]s without performing any I/O. [`Dispatcher`]
//! drives it from two queues, executes the sends and hands persistence work
//! to the persister.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::error::AppError;
use crate::models::{ChatId, Command, MessagesConfig, Region, Warning};
use crate::pipeline::command::{Intent, classify};
use crate::pipeline::dedup::DedupCache;
use crate::pipeline::registry::SubscriberRegistry;
use crate::services::{MessageSender, TextFormat};
use crate::storage::PersistHandle;

/// Result of fetching and parsing one region.
#[derive(Debug, Clone, PartialEq)]
pub struct WarningBatch {
    pub region: Region,
    pub warnings: Vec<Warning>,
}

/// Input to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Warnings(WarningBatch),
    Command(Command),
}

/// One message to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub format: TextFormat,
}

/// Side effect requested by a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    Send(OutboundMessage),
    PersistRegistry,
    PersistCache,
}

/// Registry, cache and reply templates.
#[derive(Debug)]
pub struct DispatcherState {
    registry: Arc<SubscriberRegistry>,
    cache: DedupCache,
    messages: MessagesConfig,
}

impl DispatcherState {
    pub fn new(registry: Arc<SubscriberRegistry>, cache: DedupCache, messages: MessagesConfig) -> Self {
        Self {
            registry,
            cache,
            messages,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    /// Apply one event. Sends come first, persistence requests last.
    pub fn handle_event(&mut self, event: Event) -> Vec<OutboundAction> {
        match event {
            Event::Warnings(batch) => self.handle_warnings(batch),
            Event::Command(command) => self.handle_command(command),
        }
    }

    fn handle_warnings(&mut self, batch: WarningBatch) -> Vec<OutboundAction> {
        let WarningBatch { region, warnings } = batch;

        if warnings.is_empty() {
            if self.cache.clear(&region) {
                log::info!("No active warnings for {}, cache cleared", region);
                return vec![OutboundAction::PersistCache];
            }
            return Vec::new();
        }

        let subscribers = self.registry.subscribers(&region);
        let mut actions = Vec::new();
        let mut marked = false;

        for warning in &warnings {
            let fingerprint = warning.fingerprint();
            if self.cache.has(&region, &fingerprint) {
                log::debug!("Already delivered for {}: {}", region, warning.title);
                continue;
            }

            self.cache.mark(&region, &fingerprint);
            marked = true;
            log::info!(
                "New warning for {} ({} subscribers): {}",
                region,
                subscribers.len(),
                warning.title
            );

            let text = warning.render();
            actions.extend(subscribers.iter().map(|subscriber| {
                OutboundAction::Send(OutboundMessage {
                    chat_id: subscriber.chat_id,
                    text: text.clone(),
                    format: TextFormat::Markdown,
                })
            }));
        }

        if marked {
            actions.push(OutboundAction::PersistCache);
        }
        actions
    }

    fn handle_command(&mut self, command: Command) -> Vec<OutboundAction> {
        let (text, changed) = match classify(&command.text) {
            Intent::Register(region) => {
                match self.registry.register(command.user_id, command.chat_id, &region) {
                    Ok(()) => {
                        log::info!("User {} subscribed to {}", command.user_id, region);
                        (self.messages.registered(&region), true)
                    }
                    Err(e @ AppError::AlreadySubscribed { .. }) => {
                        log::info!("{}", e);
                        (self.messages.register_failed.clone(), false)
                    }
                    Err(e) => {
                        log::warn!("Registration of user {} failed: {}", command.user_id, e);
                        (self.messages.register_failed.clone(), false)
                    }
                }
            }
            Intent::Unregister => {
                let count = self.registry.unregister(command.user_id);
                log::info!("User {} unsubscribed from {} regions", command.user_id, count);
                (self.messages.unregistered(count), count > 0)
            }
            Intent::Start => (self.messages.welcome(command.sender_name.as_deref()), false),
        };

        let mut actions = vec![OutboundAction::Send(OutboundMessage {
            chat_id: command.chat_id,
            text,
            format: TextFormat::Plain,
        })];
        if changed {
            actions.push(OutboundAction::PersistRegistry);
        }
        actions
    }
}

/// Producer side of the dispatcher queues.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    warnings: UnboundedSender<WarningBatch>,
    commands: UnboundedSender<Command>,
}

impl DispatcherHandle {
    pub fn new(warnings: UnboundedSender<WarningBatch>, commands: UnboundedSender<Command>) -> Self {
        Self { warnings, commands }
    }

    /// Queue a fetch result. Returns `false` if the dispatcher is gone.
    pub fn on_fetch_result(&self, region: Region, warnings: Vec<Warning>) -> bool {
        self.warnings.send(WarningBatch { region, warnings }).is_ok()
    }

    /// Queue an inbound command. Returns `false` if the dispatcher is gone.
    pub fn on_command(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Sender for transports that push commands directly.
    pub fn command_sender(&self) -> UnboundedSender<Command> {
        self.commands.clone()
    }
}

/// Async driver around [`DispatcherState`].
pub struct Dispatcher {
    state: DispatcherState,
    sender: Arc<dyn MessageSender>,
    persister: PersistHandle,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        state: DispatcherState,
        sender: Arc<dyn MessageSender>,
        persister: PersistHandle,
        send_timeout: Duration,
    ) -> Self {
        Self {
            state,
            sender,
            persister,
            send_timeout,
        }
    }

    /// Process events until both queues are closed and drained.
    ///
    /// Registry and cache are persisted one final time before returning.
    pub async fn run(
        mut self,
        mut warnings: UnboundedReceiver<WarningBatch>,
        mut commands: UnboundedReceiver<Command>,
    ) -> DispatcherState {
        let mut warnings_open = true;
        let mut commands_open = true;

        log::info!("Dispatcher started");
        while warnings_open || commands_open {
            let event = tokio::select! {
                batch = warnings.recv(), if warnings_open => match batch {
                    Some(batch) => Event::Warnings(batch),
                    None => {
                        warnings_open = false;
                        continue;
                    }
                },
                command = commands.recv(), if commands_open => match command {
                    Some(command) => Event::Command(command),
                    None => {
                        commands_open = false;
                        continue;
                    }
                },
                else => break,
            };
            self.process(event).await;
        }

        self.persister.save_registry(self.state.registry.snapshot());
        self.persister.save_cache(self.state.cache.snapshot());
        log::info!("Dispatcher stopped");
        self.state
    }

    /// Handle one event and execute the resulting actions.
    pub async fn process(&mut self, event: Event) {
        for action in self.state.handle_event(event) {
            match action {
                OutboundAction::Send(message) => self.deliver(&message).await,
                OutboundAction::PersistRegistry => {
                    self.persister.save_registry(self.state.registry.snapshot());
                }
                OutboundAction::PersistCache => {
                    self.persister.save_cache(self.state.cache.snapshot());
                }
            }
        }
    }

    async fn deliver(&self, message: &OutboundMessage) {
        let send = self
            .sender
            .send_message(message.chat_id, &message.text, message.format);

        match tokio::time::timeout(self.send_timeout, send).await {
            Ok(Ok(())) => log::debug!("Sent message to chat {}", message.chat_id),
            Ok(Err(e)) => log::warn!("{}", e),
            Err(_) => log::warn!(
                "{}",
                AppError::send(message.chat_id, AppError::Timeout(self.send_timeout))
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::error::Result;
    use crate::models::Subscriber;
    use crate::storage::Persister;
    use crate::storage::memory::MemoryStorage;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(ChatId, String, TextFormat)>>,
        stall_chat: Option<ChatId>,
        fail_chat: Option<ChatId>,
    }

    impl RecordingSender {
        fn sent(&self) -> Vec<(ChatId, String, TextFormat)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send_message(&self, chat_id: ChatId, text: &str, format: TextFormat) -> Result<()> {
            if self.stall_chat == Some(chat_id) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail_chat == Some(chat_id) {
                return Err(AppError::send(chat_id, "blocked by user"));
            }
            self.sent.lock().unwrap().push((chat_id, text.to_string(), format));
            Ok(())
        }
    }

    fn region(code: &str) -> Region {
        Region::parse(code).unwrap()
    }

    fn storm() -> Warning {
        Warning::new(
            "Sturmböen",
            vec!["gültig von Mo 14:00 *bis Mo 20:00*".to_string()],
            "zuletzt aktualisiert",
        )
    }

    fn state_with(subscribers: &[(i64, i64, &str)]) -> DispatcherState {
        let registry = Arc::new(SubscriberRegistry::new());
        for (user_id, chat_id, code) in subscribers {
            registry.register(*user_id, *chat_id, &region(code)).unwrap();
        }
        DispatcherState::new(registry, DedupCache::new(), MessagesConfig::default())
    }

    fn warnings(code: &str, warnings: Vec<Warning>) -> Event {
        Event::Warnings(WarningBatch {
            region: region(code),
            warnings,
        })
    }

    fn command(user_id: i64, chat_id: i64, text: &str) -> Event {
        Event::Command(Command::new(user_id, chat_id, text))
    }

    fn sends(actions: &[OutboundAction]) -> Vec<&OutboundMessage> {
        actions
            .iter()
            .filter_map(|action| match action {
                OutboundAction::Send(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_new_warning_goes_to_every_subscriber_in_order() {
        let mut state = state_with(&[(1, 11, "8045"), (2, 22, "8045"), (3, 33, "5621")]);

        let actions = state.handle_event(warnings("8045", vec![storm()]));

        let chats: Vec<ChatId> = sends(&actions).iter().map(|m| m.chat_id).collect();
        assert_eq!(chats, vec![11, 22]);
        assert!(sends(&actions).iter().all(|m| m.text == storm().render()));
        assert!(sends(&actions).iter().all(|m| m.format == TextFormat::Markdown));
        assert_eq!(actions.last(), Some(&OutboundAction::PersistCache));
    }

    #[test]
    fn test_same_warning_is_not_delivered_twice() {
        let mut state = state_with(&[(1, 11, "8045")]);

        let first = state.handle_event(warnings("8045", vec![storm()]));
        let second = state.handle_event(warnings("8045", vec![storm()]));

        assert_eq!(sends(&first).len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_warning_is_delivered_again_after_all_clear() {
        let mut state = state_with(&[(1, 11, "8045")]);

        state.handle_event(warnings("8045", vec![storm()]));
        let cleared = state.handle_event(warnings("8045", Vec::new()));
        let again = state.handle_event(warnings("8045", vec![storm()]));

        assert_eq!(cleared, vec![OutboundAction::PersistCache]);
        assert_eq!(sends(&again).len(), 1);
    }

    #[test]
    fn test_all_clear_without_cache_entry_does_nothing() {
        let mut state = state_with(&[(1, 11, "8045")]);
        assert!(state.handle_event(warnings("8045", Vec::new())).is_empty());
    }

    #[test]
    fn test_only_changed_warnings_are_sent() {
        let mut state = state_with(&[(1, 11, "8045")]);
        let rain = Warning::new("Starkregen", Vec::new(), "zuletzt aktualisiert");

        state.handle_event(warnings("8045", vec![storm()]));
        let actions = state.handle_event(warnings("8045", vec![storm(), rain.clone()]));

        let texts: Vec<&str> = sends(&actions).iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec![rain.render()]);
        assert_eq!(state.cache().fingerprint_count(), 2);
    }

    #[test]
    fn test_warnings_without_subscribers_are_still_marked() {
        let mut state = state_with(&[]);
        let actions = state.handle_event(warnings("8045", vec![storm()]));

        assert_eq!(actions, vec![OutboundAction::PersistCache]);
        assert!(state.cache().has(&region("8045"), &storm().fingerprint()));
    }

    #[test]
    fn test_register_command() {
        let mut state = state_with(&[]);
        let actions = state.handle_event(command(1, 11, "8045"));

        assert_eq!(
            actions,
            vec![
                OutboundAction::Send(OutboundMessage {
                    chat_id: 11,
                    text: MessagesConfig::default().registered(&region("8045")),
                    format: TextFormat::Plain,
                }),
                OutboundAction::PersistRegistry,
            ]
        );
        assert_eq!(state.registry().subscribers(&region("8045")), vec![Subscriber::new(1, 11)]);
    }

    #[test]
    fn test_register_twice_replies_with_failure() {
        let mut state = state_with(&[(1, 11, "8045")]);
        let actions = state.handle_event(command(1, 11, "PLZ 8045 bitte"));

        assert_eq!(actions.len(), 1);
        assert_eq!(sends(&actions)[0].text, MessagesConfig::default().register_failed);
    }

    #[test]
    fn test_unregister_command_reports_count() {
        let mut state = state_with(&[(1, 11, "8045"), (1, 11, "5621")]);
        let actions = state.handle_event(command(1, 11, "abmelden"));

        assert_eq!(sends(&actions)[0].text, MessagesConfig::default().unregistered(2));
        assert_eq!(actions.last(), Some(&OutboundAction::PersistRegistry));
        assert!(state.registry().active_regions().is_empty());

        let again = state.handle_event(command(1, 11, "abmelden"));
        assert_eq!(again.len(), 1);
        assert_eq!(sends(&again)[0].text, MessagesConfig::default().unregistered(0));
    }

    #[test]
    fn test_other_text_gets_welcome() {
        let mut state = state_with(&[]);
        let event = Event::Command(Command::new(1, 11, "hello").with_sender_name("Anna"));
        let actions = state.handle_event(event);

        assert_eq!(actions.len(), 1);
        assert_eq!(sends(&actions)[0].text, MessagesConfig::default().welcome(Some("Anna")));
        assert!(state.registry().active_regions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_send_times_out_and_processing_continues() {
        let sender = Arc::new(RecordingSender {
            stall_chat: Some(11),
            fail_chat: Some(22),
            ..RecordingSender::default()
        });
        let store = Arc::new(MemoryStorage::default());
        let persister = Persister::spawn(store.clone());

        let state = state_with(&[(1, 11, "8045"), (2, 22, "8045"), (3, 33, "8045")]);
        let mut dispatcher =
            Dispatcher::new(state, sender.clone(), persister.handle(), Duration::from_secs(10));

        dispatcher.process(warnings("8045", vec![storm()])).await;

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 33);

        drop(dispatcher);
        persister.shutdown().await;
        assert_eq!(*store.cache_saves.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_drains_queues_and_persists_on_exit() {
        let sender = Arc::new(RecordingSender::default());
        let store = Arc::new(MemoryStorage::default());
        let persister = Persister::spawn(store.clone());

        let (warnings_tx, warnings_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let handle = DispatcherHandle::new(warnings_tx, commands_tx);

        let state = DispatcherState::new(
            Arc::new(SubscriberRegistry::new()),
            DedupCache::new(),
            MessagesConfig::default(),
        );
        let dispatcher = Dispatcher::new(state, sender.clone(), persister.handle(), Duration::from_secs(1));
        let task = tokio::spawn(dispatcher.run(warnings_rx, commands_rx));

        assert!(handle.on_command(Command::new(1, 11, "8045")));
        // Commands and fetch results travel on separate queues, so wait for
        // the registration before the first warning shows up.
        while sender.sent().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(handle.on_fetch_result(region("8045"), vec![storm()]));
        assert!(handle.on_fetch_result(region("8045"), vec![storm()]));
        drop(handle);

        let state = task.await.unwrap();
        persister.shutdown().await;

        let sent = sender.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], (11, storm().render(), TextFormat::Markdown));
        assert_eq!(state.cache().fingerprint_count(), 1);

        let registry = store.registry.lock().unwrap().clone();
        assert_eq!(registry[&region("8045")], vec![Subscriber::new(1, 11)]);
        assert_eq!(store.cache.lock().unwrap()[&region("8045")].len(), 1);
    }
}
