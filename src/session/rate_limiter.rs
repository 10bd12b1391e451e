//! Per-actor cooldown gate in front of the input queue.

use super::error::RejectedInput;
use crate::controls::{ButtonSymbol, GlyphMap};
use chrono::{DateTime, Local, TimeDelta};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Chat user identifier as delivered by the transport
pub type ActorId = u64;

/// One accepted button press, immutable once created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub actor: ActorId,
    pub button: ButtonSymbol,
    pub glyph: String,
    pub accepted_at: DateTime<Local>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimiterSettings {
    pub cooldown_ms: u64,
    /// Upper bound for remembered actors. Only entries past their cooldown are evicted.
    pub max_tracked_actors: Option<usize>,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            cooldown_ms: 500,
            max_tracked_actors: None,
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    glyphs: Arc<GlyphMap>,
    cooldown: TimeDelta,
    max_tracked_actors: Option<usize>,
    history: Mutex<HashMap<ActorId, DateTime<Local>>>,
}

impl RateLimiter {
    pub fn new(glyphs: Arc<GlyphMap>, settings: &RateLimiterSettings) -> Self {
        Self {
            glyphs,
            cooldown: i64::try_from(settings.cooldown_ms)
                .ok()
                .and_then(TimeDelta::try_milliseconds)
                .unwrap_or(TimeDelta::MAX),
            max_tracked_actors: settings.max_tracked_actors,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Admits the input if the glyph is known and the actor is outside its cooldown.
    ///
    /// The check and the history update happen under one lock, so two calls for the
    /// same actor at the same instant admit exactly one.
    pub fn admit(
        &self,
        actor: ActorId,
        glyph: &str,
        now: DateTime<Local>,
    ) -> Result<InputEvent, RejectedInput> {
        let button = self
            .glyphs
            .resolve(glyph)
            .ok_or_else(|| RejectedInput::UnknownGlyph(glyph.to_string()))?;

        let mut history = self.history.lock();
        if let Some(last) = history.get(&actor) {
            let elapsed = now - *last;
            if elapsed < self.cooldown {
                return Err(RejectedInput::RateLimited {
                    actor,
                    retry_in: self.cooldown - elapsed,
                });
            }
        }
        history.insert(actor, now);

        if let Some(max) = self.max_tracked_actors {
            if history.len() > max {
                let cooldown = self.cooldown;
                let before = history.len();
                history.retain(|_, last| now - *last < cooldown);
                debug!(
                    "Evicted {} idle actor(s) from rate limiter history",
                    before - history.len()
                );
            }
        }

        Ok(InputEvent {
            actor,
            button,
            glyph: glyph.to_string(),
            accepted_at: now,
        })
    }

    pub fn accept(&self, actor: ActorId, glyph: &str, now: DateTime<Local>) -> bool {
        self.admit(actor, glyph, now).is_ok()
    }

    pub fn clear(&self) {
        self.history.lock().clear();
    }

    pub fn tracked_actors(&self) -> usize {
        self.history.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn limiter(settings: RateLimiterSettings) -> RateLimiter {
        RateLimiter::new(Arc::new(GlyphMap::default()), &settings)
    }

    fn at(ms: i64) -> DateTime<Local> {
        Local.timestamp_opt(1_700_000_000, 0).unwrap() + TimeDelta::milliseconds(ms)
    }

    #[test]
    fn test_cooldown_window() {
        let limiter = limiter(RateLimiterSettings::default());

        assert!(limiter.accept(1, "⬆️", at(0)));
        let rejected = limiter.admit(1, "⬇️", at(200)).unwrap_err();
        assert_eq!(
            rejected,
            RejectedInput::RateLimited {
                actor: 1,
                retry_in: TimeDelta::milliseconds(300)
            }
        );
        let event = limiter.admit(1, "⬇️", at(600)).unwrap();
        assert_eq!(event.button, ButtonSymbol::Down);
        assert_eq!(event.accepted_at, at(600));
    }

    #[test]
    fn test_cooldown_boundary_is_inclusive() {
        let limiter = limiter(RateLimiterSettings::default());
        assert!(limiter.accept(1, "🅰️", at(0)));
        assert!(!limiter.accept(1, "🅰️", at(499)));
        assert!(limiter.accept(1, "🅰️", at(500)));
    }

    #[test]
    fn test_rejected_input_does_not_extend_cooldown() {
        let limiter = limiter(RateLimiterSettings::default());
        assert!(limiter.accept(1, "🅰️", at(0)));
        assert!(!limiter.accept(1, "🅰️", at(400)));
        assert!(limiter.accept(1, "🅰️", at(500)));
    }

    #[test]
    fn test_unknown_glyph_not_recorded() {
        let limiter = limiter(RateLimiterSettings::default());
        assert_eq!(
            limiter.admit(7, "🍕", at(0)).unwrap_err(),
            RejectedInput::UnknownGlyph("🍕".to_string())
        );
        assert_eq!(limiter.tracked_actors(), 0);
        assert!(limiter.accept(7, "▶️", at(1)));
    }

    #[test]
    fn test_actors_are_independent() {
        let limiter = limiter(RateLimiterSettings::default());
        assert!(limiter.accept(1, "⬅️", at(0)));
        assert!(limiter.accept(2, "⬅️", at(10)));
        assert!(!limiter.accept(1, "⬅️", at(20)));
    }

    #[test]
    fn test_clear_resets_history() {
        let limiter = limiter(RateLimiterSettings::default());
        assert!(limiter.accept(1, "➡️", at(0)));
        limiter.clear();
        assert_eq!(limiter.tracked_actors(), 0);
        assert!(limiter.accept(1, "➡️", at(10)));
    }

    #[test]
    fn test_concurrent_same_actor_accepts_once() {
        let limiter = limiter(RateLimiterSettings::default());
        let now = at(0);

        let accepted = std::thread::scope(|scope| {
            let handles = (0..16)
                .map(|_| scope.spawn(|| limiter.accept(42, "🅱️", now)))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|accepted| *accepted)
                .count()
        });

        assert_eq!(accepted, 1);
    }

    #[test]
    fn test_huge_cooldown_saturates() {
        let limiter = limiter(RateLimiterSettings {
            cooldown_ms: u64::MAX,
            max_tracked_actors: None,
        });
        assert!(limiter.accept(1, "⬆️", at(0)));
        assert!(!limiter.accept(1, "⬆️", at(86_400_000)));
    }

    #[test]
    fn test_eviction_keeps_actors_in_cooldown() {
        let limiter = limiter(RateLimiterSettings {
            cooldown_ms: 500,
            max_tracked_actors: Some(2),
        });

        assert!(limiter.accept(1, "⬆️", at(0)));
        assert!(limiter.accept(2, "⬆️", at(100)));
        // Actor 1 and 2 are still cooling down, nothing can be evicted
        assert!(limiter.accept(3, "⬆️", at(200)));
        assert_eq!(limiter.tracked_actors(), 3);
        assert!(!limiter.accept(1, "⬆️", at(300)));

        // At 650 actor 1 and 2 have expired and get dropped
        assert!(limiter.accept(4, "⬆️", at(650)));
        assert_eq!(limiter.tracked_actors(), 2);
        assert!(!limiter.accept(3, "⬆️", at(660)));
    }
}
