//! Caption Fan-out
//!
//! Per-room, per-language subscriber sets and translated caption delivery.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parla_common::{CaptionEvent, ConnectionId, Language, RoomId, ServerEvent};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::error::CaptionError;
use super::translator::{TranslateError, TranslateRequest, Translator};
use crate::session::registry::{ConnectionRegistry, Delivery};

/// Longest accepted utterance, in characters.
pub const MAX_CAPTION_TEXT_LEN: usize = 2000;

/// Delivery summary for one target language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageDelivery {
    pub to: Language,
    /// Subscribers that received the event.
    pub delivered: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub room_id: RoomId,
    pub deliveries: Vec<LanguageDelivery>,
}

impl PublishReport {
    #[must_use]
    pub fn delivery(&self, to: &Language) -> Option<&LanguageDelivery> {
        self.deliveries.iter().find(|d| &d.to == to)
    }
}

#[derive(Default)]
struct Subscriptions {
    by_room: HashMap<RoomId, HashMap<Language, HashSet<ConnectionId>>>,
    by_connection: HashMap<ConnectionId, HashSet<(RoomId, Language)>>,
}

/// Pushes translated captions to room subscribers.
pub struct CaptionFanout {
    registry: Arc<ConnectionRegistry>,
    translator: Arc<dyn Translator>,
    translate_timeout: Duration,
    subscriptions: RwLock<Subscriptions>,
}

impl CaptionFanout {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        translator: Arc<dyn Translator>,
        translate_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            translator,
            translate_timeout,
            subscriptions: RwLock::new(Subscriptions::default()),
        }
    }

    /// Register interest. Returns `false` if the tuple was already present.
    pub async fn subscribe(
        &self,
        room_id: RoomId,
        language: Language,
        connection_id: ConnectionId,
    ) -> bool {
        let mut subs = self.subscriptions.write().await;
        let added = subs
            .by_room
            .entry(room_id.clone())
            .or_default()
            .entry(language.clone())
            .or_default()
            .insert(connection_id);

        if added {
            subs.by_connection
                .entry(connection_id)
                .or_default()
                .insert((room_id.clone(), language.clone()));
            debug!(
                room_id = %room_id,
                lang = %language,
                connection_id = %connection_id,
                "Caption subscription added"
            );
        }
        added
    }

    /// Drop every subscription held by `connection_id`. Returns how many.
    pub async fn unsubscribe(&self, connection_id: ConnectionId) -> usize {
        let mut subs = self.subscriptions.write().await;
        let Some(owned) = subs.by_connection.remove(&connection_id) else {
            return 0;
        };

        for (room_id, language) in &owned {
            let Some(languages) = subs.by_room.get_mut(room_id) else {
                continue;
            };
            if let Some(members) = languages.get_mut(language) {
                members.remove(&connection_id);
                if members.is_empty() {
                    languages.remove(language);
                }
            }
            if languages.is_empty() {
                subs.by_room.remove(room_id);
            }
        }

        debug!(connection_id = %connection_id, removed = owned.len(), "Caption subscriptions removed");
        owned.len()
    }

    /// Target languages with at least one subscriber in the room.
    pub async fn languages(&self, room_id: &RoomId) -> Vec<Language> {
        let subs = self.subscriptions.read().await;
        let mut languages: Vec<Language> = subs
            .by_room
            .get(room_id)
            .map(|langs| langs.keys().cloned().collect())
            .unwrap_or_default();
        languages.sort();
        languages
    }

    pub async fn subscribers(&self, room_id: &RoomId, language: &Language) -> Vec<ConnectionId> {
        let subs = self.subscriptions.read().await;
        subs.by_room
            .get(room_id)
            .and_then(|langs| langs.get(language))
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions
            .read()
            .await
            .by_connection
            .values()
            .map(HashSet::len)
            .sum()
    }

    /// Translate `text` once per subscribed language and push the results.
    ///
    /// Subscriber sets are snapshotted before translation and re-read before
    /// delivery; no lock is held across the translation calls. A failure for
    /// one language is reported to that language's subscribers only.
    pub async fn publish(
        &self,
        room_id: &RoomId,
        text: &str,
        from: &Language,
    ) -> Result<PublishReport, CaptionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CaptionError::EmptyText);
        }
        if text.chars().count() > MAX_CAPTION_TEXT_LEN {
            return Err(CaptionError::TextTooLong {
                max: MAX_CAPTION_TEXT_LEN,
            });
        }

        let targets = self.languages(room_id).await;
        if targets.is_empty() {
            debug!(room_id = %room_id, "No caption subscribers, nothing to publish");
            return Ok(PublishReport {
                room_id: room_id.clone(),
                deliveries: Vec::new(),
            });
        }

        let translations = join_all(targets.into_iter().map(|to| async move {
            let outcome = self.translate(room_id, text, from, &to).await;
            (to, outcome)
        }))
        .await;

        let mut deliveries = Vec::with_capacity(translations.len());
        for (to, outcome) in translations {
            let (event, error) = match outcome {
                Ok(translated) => (
                    ServerEvent::from(CaptionEvent {
                        room_id: room_id.clone(),
                        text: text.to_string(),
                        translated,
                        from: from.clone(),
                        to: to.clone(),
                    }),
                    None,
                ),
                Err(e) => {
                    warn!(room_id = %room_id, from = %from, to = %to, error = %e, "Caption translation failed");
                    let error = e.to_string();
                    (
                        ServerEvent::CaptionError {
                            from: from.clone(),
                            to: to.clone(),
                            error: error.clone(),
                        },
                        Some(error),
                    )
                }
            };

            let delivered = self.deliver(room_id, &to, &event).await;
            deliveries.push(LanguageDelivery {
                to,
                delivered,
                error,
            });
        }

        info!(
            room_id = %room_id,
            from = %from,
            languages = deliveries.len(),
            "Caption published"
        );

        Ok(PublishReport {
            room_id: room_id.clone(),
            deliveries,
        })
    }

    async fn translate(
        &self,
        room_id: &RoomId,
        text: &str,
        from: &Language,
        to: &Language,
    ) -> Result<String, TranslateError> {
        if from == to {
            return Ok(text.to_string());
        }

        let request = TranslateRequest {
            text: text.to_string(),
            from_language: from.clone(),
            to_language: to.clone(),
            room_id: room_id.clone(),
        };
        match tokio::time::timeout(self.translate_timeout, self.translator.translate(&request)).await
        {
            Ok(result) => result,
            Err(_) => Err(TranslateError::Timeout(self.translate_timeout)),
        }
    }

    async fn deliver(&self, room_id: &RoomId, to: &Language, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for connection_id in self.subscribers(room_id, to).await {
            match self.registry.try_send(connection_id, event.clone()) {
                Delivery::Delivered => delivered += 1,
                Delivery::Lagging => {
                    warn!(connection_id = %connection_id, "Caption subscriber lagging, event dropped");
                }
                Delivery::Gone => {
                    debug!(connection_id = %connection_id, "Caption subscriber gone");
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::captions::translator::UnconfiguredTranslator;
    use crate::session::registry::TransportKind;

    /// Uppercases text, fails for the configured languages.
    struct StubTranslator {
        failing: Vec<Language>,
    }

    #[async_trait]
    impl Translator for StubTranslator {
        async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslateError> {
            if self.failing.contains(&request.to_language) {
                return Err(TranslateError::Provider("unsupported language".into()));
            }
            Ok(format!("[{}] {}", request.to_language, request.text.to_uppercase()))
        }
    }

    struct SlowTranslator;

    #[async_trait]
    impl Translator for SlowTranslator {
        async fn translate(&self, _request: &TranslateRequest) -> Result<String, TranslateError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(String::new())
        }
    }

    fn lang(tag: &str) -> Language {
        Language::parse(tag).unwrap()
    }

    fn room(name: &str) -> RoomId {
        RoomId::parse(name).unwrap()
    }

    fn fanout(translator: Arc<dyn Translator>) -> (Arc<ConnectionRegistry>, CaptionFanout) {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let fanout = CaptionFanout::new(registry.clone(), translator, Duration::from_millis(50));
        (registry, fanout)
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let (registry, fanout) = fanout(Arc::new(UnconfiguredTranslator));
        let sub = registry.insert(TransportKind::PushOnly);

        assert!(fanout.subscribe(room("abc123"), lang("it"), sub.id).await);
        assert!(!fanout.subscribe(room("abc123"), lang("it"), sub.id).await);
        assert_eq!(fanout.subscription_count().await, 1);
    }

    #[tokio::test]
    async fn test_same_language_passes_through() {
        let (registry, fanout) = fanout(Arc::new(UnconfiguredTranslator));
        let mut sub = registry.insert(TransportKind::PushOnly);
        fanout.subscribe(room("abc123"), lang("it"), sub.id).await;

        let report = fanout.publish(&room("abc123"), "ciao", &lang("it")).await.unwrap();
        assert_eq!(report.delivery(&lang("it")).unwrap().delivered, 1);

        assert_eq!(
            sub.rx.recv().await.unwrap(),
            ServerEvent::Translation {
                text: "ciao".into(),
                translated: "ciao".into(),
                from: lang("it"),
                to: lang("it"),
            }
        );
    }

    #[tokio::test]
    async fn test_translation_failure_is_isolated_per_language() {
        let translator = Arc::new(StubTranslator {
            failing: vec![lang("es")],
        });
        let (registry, fanout) = fanout(translator);
        let mut spanish = registry.insert(TransportKind::PushOnly);
        let mut english = registry.insert(TransportKind::PushOnly);
        fanout.subscribe(room("abc123"), lang("es"), spanish.id).await;
        fanout.subscribe(room("abc123"), lang("en"), english.id).await;

        let report = fanout.publish(&room("abc123"), "ciao", &lang("it")).await.unwrap();
        assert!(report.delivery(&lang("es")).unwrap().error.is_some());
        assert!(report.delivery(&lang("en")).unwrap().error.is_none());

        match english.rx.recv().await.unwrap() {
            ServerEvent::Translation { translated, to, .. } => {
                assert_eq!(translated, "[en] CIAO");
                assert_eq!(to, lang("en"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            spanish.rx.recv().await.unwrap(),
            ServerEvent::CaptionError { .. }
        ));
    }

    #[tokio::test]
    async fn test_translation_timeout_is_reported() {
        let (registry, fanout) = fanout(Arc::new(SlowTranslator));
        let mut sub = registry.insert(TransportKind::PushOnly);
        fanout.subscribe(room("abc123"), lang("es"), sub.id).await;

        let report = fanout.publish(&room("abc123"), "ciao", &lang("it")).await.unwrap();
        let error = report.delivery(&lang("es")).unwrap().error.clone().unwrap();
        assert!(error.contains("timed out"));
        assert!(matches!(sub.rx.recv().await.unwrap(), ServerEvent::CaptionError { .. }));
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_only_own_subscriptions() {
        let (registry, fanout) = fanout(Arc::new(UnconfiguredTranslator));
        let a = registry.insert(TransportKind::PushOnly);
        let b = registry.insert(TransportKind::PushOnly);
        fanout.subscribe(room("abc123"), lang("it"), a.id).await;
        fanout.subscribe(room("abc123"), lang("es"), a.id).await;
        fanout.subscribe(room("abc123"), lang("it"), b.id).await;

        assert_eq!(fanout.unsubscribe(a.id).await, 2);
        assert_eq!(fanout.subscribers(&room("abc123"), &lang("it")).await, vec![b.id]);
        assert_eq!(fanout.languages(&room("abc123")).await, vec![lang("it")]);
        assert_eq!(fanout.unsubscribe(a.id).await, 0);
    }

    #[tokio::test]
    async fn test_publish_other_room_is_not_delivered() {
        let (registry, fanout) = fanout(Arc::new(UnconfiguredTranslator));
        let mut sub = registry.insert(TransportKind::PushOnly);
        fanout.subscribe(room("abc123"), lang("it"), sub.id).await;

        let report = fanout.publish(&room("other"), "ciao", &lang("it")).await.unwrap();
        assert!(report.deliveries.is_empty());
        assert!(sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_rejects_empty_text() {
        let (_registry, fanout) = fanout(Arc::new(UnconfiguredTranslator));
        let err = fanout.publish(&room("abc123"), "   ", &lang("it")).await.unwrap_err();
        assert!(matches!(err, CaptionError::EmptyText));
    }
}
