//! Warning delivery pipeline.
//!
//! - `fetch_loop`: periodically fetch and parse every subscribed region
//! - `dispatcher`: dedup warnings, address subscribers, answer commands
//! - `registry` / `dedup`: the state the dispatcher works on
//!
//! [`start`] wires these together and spawns the long-running tasks.

pub mod command;
pub mod dedup;
pub mod dispatcher;
pub mod fetch_loop;
pub mod registry;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::models::Config;
use crate::services::{MessageSender, PageSource, WarningParser};
use crate::storage::PersistHandle;

pub use command::{Intent, classify};
pub use dedup::{CacheSnapshot, DedupCache};
pub use dispatcher::{
    Dispatcher, DispatcherHandle, DispatcherState, Event, OutboundAction, OutboundMessage,
    WarningBatch,
};
pub use fetch_loop::{CycleReport, FetchLoop};
pub use registry::{RegistrySnapshot, SubscriberRegistry};

/// Handles of a running pipeline.
pub struct Pipeline {
    /// Intake for inbound commands and external fetch results
    pub handle: DispatcherHandle,
    pub fetch_task: JoinHandle<()>,
    /// Yields the final state once every handle is dropped
    pub dispatch_task: JoinHandle<DispatcherState>,
}

impl Pipeline {
    /// Stop fetching and let the dispatcher drain its queues.
    pub async fn shutdown(self) -> Option<DispatcherState> {
        self.fetch_task.abort();
        drop(self.handle);
        match self.dispatch_task.await {
            Ok(state) => Some(state),
            Err(e) => {
                log::error!("Dispatcher task failed: {}", e);
                None
            }
        }
    }
}

/// Spawn the fetch loop and the dispatcher.
pub fn start(
    config: &Config,
    registry: Arc<SubscriberRegistry>,
    cache: DedupCache,
    source: Arc<dyn PageSource>,
    sender: Arc<dyn MessageSender>,
    persister: PersistHandle,
) -> Result<Pipeline> {
    let parser = WarningParser::new(config.parser.clone())?;

    let (warnings_tx, warnings_rx) = mpsc::unbounded_channel();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let handle = DispatcherHandle::new(warnings_tx, commands_tx);

    let state = DispatcherState::new(Arc::clone(&registry), cache, config.messages.clone());
    let dispatcher = Dispatcher::new(state, sender, persister, config.bot.send_timeout());
    let dispatch_task = tokio::spawn(dispatcher.run(warnings_rx, commands_rx));

    let fetch_loop = FetchLoop::new(
        registry,
        source,
        parser,
        handle.clone(),
        config.fetch.interval(),
    );
    let fetch_task = tokio::spawn(fetch_loop.run());

    Ok(Pipeline {
        handle,
        fetch_task,
        dispatch_task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::models::{ChatId, Command, Region};
    use crate::services::TextFormat;
    use crate::storage::Persister;
    use crate::storage::memory::MemoryStorage;

    struct OnePage;

    #[async_trait]
    impl PageSource for OnePage {
        async fn fetch_page(&self, _region: &Region) -> Result<String> {
            Ok(r#"<div id="content"><h1>Unwetterwarnungen</h1>
                <span>(1)</span><h2>Warnung vor Starkregen</h2>
                <p>gültig von: Freitag, 12:00 Uhr  bis Freitag, 18:00 Uhr</p>
                <p>Lokal bis 60 mm.</p>
                <p>Diese Warnung wurde zuletzt aktualisiert</p>
                <p>Die Höhenstufen des Bereichs werden berücksichtigt.</p></div>"#
                .to_string())
        }
    }

    #[derive(Default)]
    struct Outbox(Mutex<Vec<(ChatId, TextFormat)>>);

    #[async_trait]
    impl MessageSender for Outbox {
        async fn send_message(&self, chat_id: ChatId, _text: &str, format: TextFormat) -> Result<()> {
            self.0.lock().unwrap().push((chat_id, format));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_start_delivers_and_persists() {
        let registry = Arc::new(SubscriberRegistry::new());
        registry.register(1, 11, &Region::parse("8045").unwrap()).unwrap();

        let store = Arc::new(MemoryStorage::default());
        let persister = Persister::spawn(store.clone());
        let outbox = Arc::new(Outbox::default());

        let pipeline = start(
            &Config::default(),
            registry,
            DedupCache::new(),
            Arc::new(OnePage),
            outbox.clone(),
            persister.handle(),
        )
        .unwrap();

        while outbox.0.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(pipeline.handle.on_command(Command::new(2, 22, "hallo")));

        let state = pipeline.shutdown().await.unwrap();
        persister.shutdown().await;

        let sent = outbox.0.lock().unwrap().clone();
        assert_eq!(sent, vec![(11, TextFormat::Markdown), (22, TextFormat::Plain)]);
        assert_eq!(state.cache().fingerprint_count(), 1);
        assert_eq!(store.cache.lock().unwrap().len(), 1);
    }
}
